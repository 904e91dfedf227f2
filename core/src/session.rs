//! A logged-in user's view of the lending API.
//!
//! # Design
//! `Session` owns the stateless `LendingClient`, a `Transport`, the auth token
//! and the entity `Store`. Entities never point back at the session: every
//! hydration or resolution step is a session method that receives the raw
//! record and reads or fills the store explicitly.
//!
//! Failures are reported with `tracing` where they happen and then returned
//! as `Err`. Nothing is retried, and a failed write never touches the store.

use std::collections::HashSet;

use chrono::NaiveDateTime;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::{LendingClient, ListQuery, Page, PageLinks};
use crate::config::{ClientConfig, USERNAME_VAR};
use crate::error::{ApiError, ErrorKind, ValidationError};
use crate::http::{HttpRequest, HttpResponse};
use crate::store::Store;
use crate::time;
use crate::transport::{Transport, UreqTransport};
use crate::types::{
    Belonging, BelongingRecord, Borrow, BorrowRecord, Credentials, Entity, EntityKind, Friend,
    FriendRecord, NewBorrow, NewThing, Record, ReturnPatch,
};

/// Per-user session: credentials, token and the local entity store.
#[derive(Debug)]
pub struct Session<T> {
    client: LendingClient,
    transport: T,
    username: String,
    token: Option<String>,
    store: Store,
}

impl Session<UreqTransport> {
    /// Session over real HTTP, configured from `config`.
    pub fn connect(config: &ClientConfig, username: &str) -> Self {
        Self::new(LendingClient::new(&config.base_url), UreqTransport::new(), username)
    }

    /// Session over real HTTP for the user named in `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        let username = config
            .username
            .as_deref()
            .ok_or(ApiError::MissingConfig(USERNAME_VAR))?;
        Ok(Self::connect(config, username))
    }
}

impl<T: Transport> Session<T> {
    pub fn new(client: LendingClient, transport: T, username: &str) -> Self {
        Self {
            client,
            transport,
            username: username.to_string(),
            token: None,
            store: Store::new(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn client(&self) -> &LendingClient {
        &self.client
    }

    // -----------------------------------------------------------------------
    // Authentication
    // -----------------------------------------------------------------------

    /// Create the account on the server. Returns the new user id.
    pub fn register(&mut self, password: &str) -> Result<u64, ApiError> {
        let request = self.client.build_register(&self.credentials(password))?;
        let user = self.call("register", request, |c, r| c.parse_register(r))?;
        info!(username = %self.username, id = user.id, "registered");
        Ok(user.id)
    }

    /// Obtain a token. Every later protected call carries it.
    pub fn login(&mut self, password: &str) -> Result<&str, ApiError> {
        let request = self.client.build_login(&self.credentials(password))?;
        let reply = self.call("login", request, |c, r| c.parse_login(r))?;
        info!(username = %self.username, "logged in");
        Ok(self.token.insert(reply.auth_token).as_str())
    }

    /// Revoke the token on the server and forget it locally.
    pub fn logout(&mut self) -> Result<(), ApiError> {
        let request = self.authorized(self.client.build_logout())?;
        self.call("logout", request, |c, r| c.parse_logout(r))?;
        self.token = None;
        info!(username = %self.username, "logged out");
        Ok(())
    }

    fn credentials(&self, password: &str) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: password.to_string(),
        }
    }

    fn authorized(&self, request: HttpRequest) -> Result<HttpRequest, ApiError> {
        match &self.token {
            Some(token) => Ok(request.with_auth(token)),
            None => Err(ApiError::NotAuthenticated),
        }
    }

    /// One round-trip plus parse, reporting any failure before returning it.
    fn call<R>(
        &mut self,
        operation: &'static str,
        request: HttpRequest,
        parse: impl FnOnce(&LendingClient, HttpResponse) -> Result<R, ApiError>,
    ) -> Result<R, ApiError> {
        let result = self
            .transport
            .execute(request)
            .and_then(|response| parse(&self.client, response));
        if let Err(err) = &result {
            match err.kind() {
                ErrorKind::NotFound => debug!(operation, "not found"),
                _ => warn!(operation, error = %err, "request failed"),
            }
        }
        result
    }

    // -----------------------------------------------------------------------
    // Collection fetches
    // -----------------------------------------------------------------------

    /// Walk every page of `kind`, overwriting cached entries by id.
    ///
    /// Returns how many records the server delivered. Pages already stored
    /// stay stored when a later page fails.
    pub fn fetch_all(&mut self, kind: EntityKind) -> Result<usize, ApiError> {
        self.fetch_all_with(kind, None)
    }

    pub fn fetch_all_with(
        &mut self,
        kind: EntityKind,
        query: Option<&ListQuery>,
    ) -> Result<usize, ApiError> {
        let mut total = 0;
        let first = self.client.build_list(kind, query);
        self.walk(kind, first, &mut |page: &[Entity]| total += page.len())?;
        info!(%kind, total, "collection fetched");
        Ok(total)
    }

    /// Every borrow matching `query`, across all pages. Also cached.
    pub fn fetch_borrowings(&mut self, query: &ListQuery) -> Result<Vec<Borrow>, ApiError> {
        let mut matched = Vec::new();
        let first = self.client.build_list(EntityKind::Borrow, Some(query));
        self.walk(EntityKind::Borrow, first, &mut |page: &[Entity]| {
            matched.extend(page.iter().filter_map(Entity::as_borrow).cloned());
        })?;
        Ok(matched)
    }

    /// Only the first page of `kind`, overwriting cached entries.
    pub fn fetch_first_page(&mut self, kind: EntityKind) -> Result<usize, ApiError> {
        let first = self.client.build_list(kind, None);
        let (entities, _) = self.load_page(kind, first)?;
        let count = entities.len();
        for entity in entities {
            self.store.insert(entity);
        }
        Ok(count)
    }

    /// One page plus its link set, for caller-driven pagination.
    ///
    /// Without `page_url` the first page is requested. Entities the store
    /// already holds are left as they are.
    pub fn fetch_page(
        &mut self,
        kind: EntityKind,
        page_url: Option<&str>,
    ) -> Result<(Vec<Entity>, PageLinks), ApiError> {
        let request = match page_url {
            Some(url) => self.client.build_page(url),
            None => self.client.build_list(kind, None),
        };
        let (entities, links) = self.load_page(kind, request)?;
        for entity in &entities {
            self.store.insert_if_absent(entity.clone());
        }
        Ok((entities, links))
    }

    fn walk(
        &mut self,
        kind: EntityKind,
        first: HttpRequest,
        on_page: &mut dyn FnMut(&[Entity]),
    ) -> Result<(), ApiError> {
        let mut visited = HashSet::new();
        let mut next = Some(first);
        while let Some(request) = next.take() {
            visited.insert(request.path.clone());
            let (entities, links) = self.load_page(kind, request)?;
            on_page(&entities);
            for entity in entities {
                self.store.insert(entity);
            }
            next = match links.get("next") {
                Some(url) if visited.contains(url) => {
                    warn!(%kind, %url, "pagination loops back, stopping");
                    None
                }
                Some(url) => Some(self.client.build_page(url)),
                None => None,
            };
        }
        Ok(())
    }

    /// Fetch and hydrate one page. Either every record of the page is
    /// returned or none is. References resolved for a borrow page stay
    /// cached even when a later record of that page fails.
    fn load_page(
        &mut self,
        kind: EntityKind,
        request: HttpRequest,
    ) -> Result<(Vec<Entity>, PageLinks), ApiError> {
        let request = self.authorized(request)?;
        let page: Page<Value> = self.call("list", request, |c, r| c.parse_page(r))?;
        let mut entities = Vec::with_capacity(page.records.len());
        for record in page.records {
            entities.push(self.hydrate(kind, record)?);
        }
        debug!(%kind, count = entities.len(), "page loaded");
        Ok((entities, page.links))
    }

    // -----------------------------------------------------------------------
    // Hydration
    // -----------------------------------------------------------------------

    fn hydrate(&mut self, kind: EntityKind, record: Value) -> Result<Entity, ApiError> {
        Ok(match kind {
            EntityKind::Friend => Entity::Friend(hydrate_friend(record)?),
            EntityKind::Belonging => Entity::Belonging(hydrate_belonging(record)?),
            EntityKind::Borrow => Entity::Borrow(self.hydrate_borrow(record)?),
        })
    }

    /// Resolve `who` and `what` before the borrow exists.
    fn hydrate_borrow(&mut self, record: Value) -> Result<Borrow, ApiError> {
        let record: BorrowRecord = decode(record)?;
        let who = self.resolve_friend(record.to_who)?;
        let what = self.resolve_belonging(record.what)?;
        Borrow::from_record(&record, &who, &what)
    }

    // -----------------------------------------------------------------------
    // Lazy resolution
    // -----------------------------------------------------------------------

    pub fn resolve(&mut self, kind: EntityKind, id: u64) -> Result<Entity, ApiError> {
        Ok(match kind {
            EntityKind::Friend => Entity::Friend(self.resolve_friend(id)?),
            EntityKind::Belonging => Entity::Belonging(self.resolve_belonging(id)?),
            EntityKind::Borrow => Entity::Borrow(self.resolve_borrow(id)?),
        })
    }

    /// Cached friend, or a single fetch of `friends/{id}/` on a miss.
    pub fn resolve_friend(&mut self, id: u64) -> Result<Friend, ApiError> {
        if let Some(friend) = self.store.friends.get(id) {
            return Ok(friend.clone());
        }
        let record = self.fetch_detail(EntityKind::Friend, id)?;
        let friend = hydrate_friend(record).map_err(|e| unresolved(EntityKind::Friend, id, e))?;
        ensure_id(EntityKind::Friend, id, friend.id())?;
        self.store.friends.insert(friend.clone());
        Ok(friend)
    }

    pub fn resolve_belonging(&mut self, id: u64) -> Result<Belonging, ApiError> {
        if let Some(belonging) = self.store.belongings.get(id) {
            return Ok(belonging.clone());
        }
        let record = self.fetch_detail(EntityKind::Belonging, id)?;
        let belonging =
            hydrate_belonging(record).map_err(|e| unresolved(EntityKind::Belonging, id, e))?;
        ensure_id(EntityKind::Belonging, id, belonging.id())?;
        self.store.belongings.insert(belonging.clone());
        Ok(belonging)
    }

    pub fn resolve_borrow(&mut self, id: u64) -> Result<Borrow, ApiError> {
        if let Some(borrow) = self.store.borrowings.get(id) {
            return Ok(borrow.clone());
        }
        let record = self.fetch_detail(EntityKind::Borrow, id)?;
        let borrow = self
            .hydrate_borrow(record)
            .map_err(|e| unresolved(EntityKind::Borrow, id, e))?;
        ensure_id(EntityKind::Borrow, id, borrow.id())?;
        self.store.borrowings.insert(borrow.clone());
        Ok(borrow)
    }

    /// GET a single record. Any failure past authentication reads as `NotFound`.
    fn fetch_detail(&mut self, kind: EntityKind, id: u64) -> Result<Value, ApiError> {
        let request = self.authorized(self.client.build_get(kind, id))?;
        debug!(%kind, id, "resolving from server");
        self.call("resolve", request, |c, r| c.parse_get(r))
            .map_err(|e| unresolved(kind, id, e))
    }

    // -----------------------------------------------------------------------
    // Store lookups
    // -----------------------------------------------------------------------

    pub fn friend_by_id(&self, id: u64) -> Result<&Friend, ApiError> {
        self.store
            .friends
            .get(id)
            .ok_or(ApiError::UnknownId { kind: EntityKind::Friend, id })
    }

    pub fn belonging_by_id(&self, id: u64) -> Result<&Belonging, ApiError> {
        self.store
            .belongings
            .get(id)
            .ok_or(ApiError::UnknownId { kind: EntityKind::Belonging, id })
    }

    pub fn borrow_by_id(&self, id: u64) -> Result<&Borrow, ApiError> {
        self.store
            .borrowings
            .get(id)
            .ok_or(ApiError::UnknownId { kind: EntityKind::Borrow, id })
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.store.len(kind)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Persist a draft. The draft itself is left untouched; the returned
    /// entity is built from what the server confirmed.
    pub fn create(&mut self, draft: &Entity) -> Result<Entity, ApiError> {
        Ok(match draft {
            Entity::Friend(friend) => Entity::Friend(self.add_friend(friend.name())?),
            Entity::Belonging(belonging) => Entity::Belonging(self.add_belonging(belonging.name())?),
            Entity::Borrow(borrow) => Entity::Borrow(self.submit_borrow(borrow)?),
        })
    }

    pub fn add_friend(&mut self, name: &str) -> Result<Friend, ApiError> {
        let record = self.post_thing(EntityKind::Friend, name)?;
        let friend = hydrate_friend(record)?;
        self.store.friends.insert(friend.clone());
        info!(id = friend.id(), name, "friend created");
        Ok(friend)
    }

    pub fn add_belonging(&mut self, name: &str) -> Result<Belonging, ApiError> {
        let record = self.post_thing(EntityKind::Belonging, name)?;
        let belonging = hydrate_belonging(record)?;
        self.store.belongings.insert(belonging.clone());
        info!(id = belonging.id(), name, "belonging created");
        Ok(belonging)
    }

    fn post_thing(&mut self, kind: EntityKind, name: &str) -> Result<Value, ApiError> {
        let input = NewThing { name: name.to_string() };
        let request = self.authorized(self.client.build_create_thing(kind, &input)?)?;
        self.call("create", request, |c, r| c.parse_create(r))
    }

    /// Lend `belonging` to `friend`. `when = None` lets the server use now.
    pub fn borrow_to(
        &mut self,
        friend: &Friend,
        belonging: &Belonging,
        when: Option<NaiveDateTime>,
    ) -> Result<Borrow, ApiError> {
        let draft = Borrow::draft(friend, belonging, when)?;
        self.submit_borrow(&draft)
    }

    fn submit_borrow(&mut self, draft: &Borrow) -> Result<Borrow, ApiError> {
        let input = NewBorrow::from_draft(draft);
        let request = self.authorized(self.client.build_create_borrow(&input)?)?;
        let record = self.call("create", request, |c, r| c.parse_create(r))?;
        let borrow = self.hydrate_borrow(record)?;
        self.store.borrowings.insert(borrow.clone());
        info!(id = borrow.id(), who = borrow.who(), what = borrow.what(), "borrow created");
        Ok(borrow)
    }

    /// Record the return of a borrowed item, at `when` or now.
    ///
    /// The cached borrow takes the `returned` value the server confirms,
    /// which is also what is handed back.
    pub fn mark_returned(
        &mut self,
        borrow: &Borrow,
        when: Option<NaiveDateTime>,
    ) -> Result<Borrow, ApiError> {
        if !borrow.is_persisted() {
            return Err(ValidationError::UnpersistedReference(EntityKind::Borrow).into());
        }
        let returned = when.unwrap_or_else(time::now);
        let patch = ReturnPatch { returned: time::to_wire(&returned) };
        let request = self.authorized(self.client.build_mark_returned(borrow.id(), &patch)?)?;
        let record = self.call("mark_returned", request, |c, r| c.parse_update(r))?;
        let confirmed = self.hydrate_borrow(record)?;
        if confirmed.id() != borrow.id() {
            return Err(ApiError::DeserializationError(format!(
                "asked to update borrow {}, server answered for {}",
                borrow.id(),
                confirmed.id()
            )));
        }
        if confirmed.returned() != Some(returned) {
            warn!(
                id = borrow.id(),
                sent = %patch.returned,
                confirmed = ?confirmed.returned(),
                "server recorded a different return time"
            );
        }
        self.store.borrowings.insert(confirmed.clone());
        Ok(confirmed)
    }
}

fn decode<R: serde::de::DeserializeOwned>(record: Value) -> Result<R, ApiError> {
    serde_json::from_value(record).map_err(|e| ApiError::DeserializationError(e.to_string()))
}

fn hydrate_friend(record: Value) -> Result<Friend, ApiError> {
    Ok(Friend::from_record(decode::<FriendRecord>(record)?)?)
}

fn hydrate_belonging(record: Value) -> Result<Belonging, ApiError> {
    Ok(Belonging::from_record(decode::<BelongingRecord>(record)?)?)
}

/// Collapse a failed single-entity fetch into `NotFound`, except when the
/// session never had the right to ask.
fn unresolved(kind: EntityKind, id: u64, err: ApiError) -> ApiError {
    match err {
        ApiError::NotAuthenticated => err,
        other => {
            debug!(%kind, id, error = %other, "resolution failed");
            ApiError::NotFound
        }
    }
}

fn ensure_id(kind: EntityKind, expected: u64, got: u64) -> Result<(), ApiError> {
    if expected == got {
        Ok(())
    } else {
        debug!(%kind, expected, got, "server answered with another id");
        Err(ApiError::NotFound)
    }
}
