use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// Records per listing page.
pub const PAGE_SIZE: usize = 5;

/// An unreturned loan older than this many days is overdue.
pub const OVERDUE_AFTER_DAYS: i64 = 14;

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Friend {
    pub id: u64,
    pub name: String,
    pub has_overdue: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Belonging {
    pub id: u64,
    pub name: String,
    pub is_borrowed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Borrowing {
    pub id: u64,
    pub what: u64,
    pub to_who: u64,
    pub when: String,
    pub returned: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisteredUser {
    pub id: u64,
    pub username: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenReply {
    pub auth_token: String,
}

#[derive(Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct CreateThing {
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateBorrowing {
    pub what: u64,
    pub to_who: u64,
    #[serde(default)]
    pub when: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateBorrowing {
    pub returned: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<usize>,
    #[serde(default)]
    pub missing: bool,
    #[serde(default)]
    pub overdue: bool,
}

#[derive(Debug, Clone)]
struct Loan {
    what: u64,
    to_who: u64,
    when: NaiveDateTime,
    returned: Option<NaiveDateTime>,
}

impl Loan {
    fn is_out(&self) -> bool {
        self.returned.is_none()
    }

    fn is_overdue(&self, now: NaiveDateTime) -> bool {
        self.is_out() && now - self.when > Duration::days(OVERDUE_AFTER_DAYS)
    }
}

#[derive(Debug, Default)]
struct Account {
    id: u64,
    password: String,
    friends: BTreeMap<u64, String>,
    belongings: BTreeMap<u64, String>,
    borrowings: BTreeMap<u64, Loan>,
}

impl Account {
    fn friend(&self, id: u64, name: &str, now: NaiveDateTime) -> Friend {
        Friend {
            id,
            name: name.to_string(),
            has_overdue: self
                .borrowings
                .values()
                .any(|loan| loan.to_who == id && loan.is_overdue(now)),
        }
    }

    fn belonging(&self, id: u64, name: &str) -> Belonging {
        Belonging {
            id,
            name: name.to_string(),
            is_borrowed: self
                .borrowings
                .values()
                .any(|loan| loan.what == id && loan.is_out()),
        }
    }
}

fn borrowing(id: u64, loan: &Loan) -> Borrowing {
    Borrowing {
        id,
        what: loan.what,
        to_who: loan.to_who,
        when: to_utc_string(&loan.when),
        returned: loan.returned.as_ref().map(to_utc_string),
    }
}

fn next_id<V>(map: &BTreeMap<u64, V>) -> u64 {
    map.keys().next_back().map_or(1, |id| id + 1)
}

#[derive(Debug, Default)]
pub struct Db {
    accounts: HashMap<String, Account>,
    tokens: HashMap<String, String>,
    next_user_id: u64,
}

impl Db {
    fn username_for(&self, headers: &HeaderMap) -> Result<String, StatusCode> {
        let token = token_of(headers).ok_or(StatusCode::UNAUTHORIZED)?;
        self.tokens
            .get(token)
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)
    }

    fn account(&self, headers: &HeaderMap) -> Result<&Account, StatusCode> {
        let username = self.username_for(headers)?;
        self.accounts.get(&username).ok_or(StatusCode::UNAUTHORIZED)
    }

    fn account_mut(&mut self, headers: &HeaderMap) -> Result<&mut Account, StatusCode> {
        let username = self.username_for(headers)?;
        self.accounts.get_mut(&username).ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Token from an `Authorization: Token <key>` header.
fn token_of(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Token "))
        .map(str::trim)
}

pub type SharedDb = Arc<RwLock<Db>>;

pub fn app() -> Router {
    let db: SharedDb = Arc::default();
    Router::new()
        .route("/api/auth/users/", post(register))
        .route("/api/auth/token/login/", post(login))
        .route("/api/auth/token/logout/", post(logout))
        .route("/api/v1/friends/", get(list_friends).post(create_friend))
        .route("/api/v1/friends/{id}/", get(get_friend))
        .route("/api/v1/belongings/", get(list_belongings).post(create_belonging))
        .route("/api/v1/belongings/{id}/", get(get_belonging))
        .route("/api/v1/borrowings/", get(list_borrowings).post(create_borrowing))
        .route(
            "/api/v1/borrowings/{id}/",
            get(get_borrowing).patch(update_borrowing),
        )
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

// --- time ---

fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

fn to_utc_string(value: &NaiveDateTime) -> String {
    format!("{}Z", value.format(DATE_FORMAT))
}

/// Accepts `YYYY-MM-DDTHH:MM:SS[.f]` with an optional `Z`, or a space
/// instead of the `T`.
pub fn parse_client_time(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim().trim_end_matches('Z');
    NaiveDateTime::parse_from_str(text, DATE_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

// --- pagination ---

fn origin(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|host| host.to_str().ok())
        .map(|host| format!("http://{host}"))
        .unwrap_or_default()
}

fn page_url(base: &str, params: &ListParams, page: usize) -> String {
    let mut query = Vec::new();
    if params.missing {
        query.push("missing=true".to_string());
    }
    if params.overdue {
        query.push("overdue=true".to_string());
    }
    query.push(format!("page={page}"));
    format!("{base}?{}", query.join("&"))
}

/// Slice `items` to the requested page and describe its neighbours in a
/// `Link` header. Pages past the end are 404, as with any unknown resource.
fn paginate<T: Serialize>(
    items: Vec<T>,
    params: &ListParams,
    headers: &HeaderMap,
    uri: &Uri,
) -> Result<Response, StatusCode> {
    let last = items.len().div_ceil(PAGE_SIZE).max(1);
    let page = params.page.unwrap_or(1);
    if page == 0 || page > last {
        return Err(StatusCode::NOT_FOUND);
    }
    let body: Vec<T> = items
        .into_iter()
        .skip((page - 1) * PAGE_SIZE)
        .take(PAGE_SIZE)
        .collect();

    let base = format!("{}{}", origin(headers), uri.path());
    let mut links = Vec::new();
    if page > 1 {
        links.push(format!("<{}>; rel=\"first\"", page_url(&base, params, 1)));
        links.push(format!("<{}>; rel=\"prev\"", page_url(&base, params, page - 1)));
    }
    if page < last {
        links.push(format!("<{}>; rel=\"next\"", page_url(&base, params, page + 1)));
        links.push(format!("<{}>; rel=\"last\"", page_url(&base, params, last)));
    }

    let mut response = Json(body).into_response();
    if !links.is_empty() {
        let value = HeaderValue::from_str(&links.join(", "))
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        response.headers_mut().insert(header::LINK, value);
    }
    Ok(response)
}

// --- auth ---

async fn register(
    State(db): State<SharedDb>,
    Json(input): Json<Credentials>,
) -> Result<(StatusCode, Json<RegisteredUser>), StatusCode> {
    if input.username.trim().is_empty() || input.password.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let mut db = db.write().await;
    if db.accounts.contains_key(&input.username) {
        return Err(StatusCode::BAD_REQUEST);
    }
    db.next_user_id += 1;
    let id = db.next_user_id;
    db.accounts.insert(
        input.username.clone(),
        Account {
            id,
            password: input.password,
            ..Account::default()
        },
    );
    tracing::info!(username = %input.username, id, "account registered");
    Ok((
        StatusCode::CREATED,
        Json(RegisteredUser {
            id,
            username: input.username,
        }),
    ))
}

async fn login(
    State(db): State<SharedDb>,
    Json(input): Json<Credentials>,
) -> Result<Json<TokenReply>, StatusCode> {
    let mut db = db.write().await;
    let account = db.accounts.get(&input.username).ok_or(StatusCode::BAD_REQUEST)?;
    if account.password != input.password {
        return Err(StatusCode::BAD_REQUEST);
    }
    tracing::debug!(username = %input.username, account = account.id, "login");
    let token = Uuid::new_v4().simple().to_string();
    db.tokens.insert(token.clone(), input.username);
    Ok(Json(TokenReply { auth_token: token }))
}

async fn logout(State(db): State<SharedDb>, headers: HeaderMap) -> Result<StatusCode, StatusCode> {
    let token = token_of(&headers).ok_or(StatusCode::UNAUTHORIZED)?;
    let username = db
        .write()
        .await
        .tokens
        .remove(token)
        .ok_or(StatusCode::UNAUTHORIZED)?;
    tracing::debug!(%username, "logout");
    Ok(StatusCode::NO_CONTENT)
}

// --- friends ---

async fn list_friends(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    uri: Uri,
    Query(params): Query<ListParams>,
) -> Result<Response, StatusCode> {
    let db = db.read().await;
    let account = db.account(&headers)?;
    let now = now();
    let friends = account
        .friends
        .iter()
        .map(|(id, name)| account.friend(*id, name, now))
        .collect();
    paginate::<Friend>(friends, &params, &headers, &uri)
}

async fn get_friend(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<Json<Friend>, StatusCode> {
    let db = db.read().await;
    let account = db.account(&headers)?;
    let name = account.friends.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(account.friend(id, name, now())))
}

async fn create_friend(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Json(input): Json<CreateThing>,
) -> Result<(StatusCode, Json<Friend>), StatusCode> {
    if input.name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let mut db = db.write().await;
    let account = db.account_mut(&headers)?;
    let id = next_id(&account.friends);
    account.friends.insert(id, input.name.clone());
    Ok((StatusCode::CREATED, Json(account.friend(id, &input.name, now()))))
}

// --- belongings ---

async fn list_belongings(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    uri: Uri,
    Query(params): Query<ListParams>,
) -> Result<Response, StatusCode> {
    let db = db.read().await;
    let account = db.account(&headers)?;
    let belongings = account
        .belongings
        .iter()
        .map(|(id, name)| account.belonging(*id, name))
        .collect();
    paginate::<Belonging>(belongings, &params, &headers, &uri)
}

async fn get_belonging(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<Json<Belonging>, StatusCode> {
    let db = db.read().await;
    let account = db.account(&headers)?;
    let name = account.belongings.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(account.belonging(id, name)))
}

async fn create_belonging(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Json(input): Json<CreateThing>,
) -> Result<(StatusCode, Json<Belonging>), StatusCode> {
    if input.name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let mut db = db.write().await;
    let account = db.account_mut(&headers)?;
    let id = next_id(&account.belongings);
    account.belongings.insert(id, input.name.clone());
    Ok((StatusCode::CREATED, Json(account.belonging(id, &input.name))))
}

// --- borrowings ---

async fn list_borrowings(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    uri: Uri,
    Query(params): Query<ListParams>,
) -> Result<Response, StatusCode> {
    let db = db.read().await;
    let account = db.account(&headers)?;
    let now = now();
    let borrowings = account
        .borrowings
        .iter()
        .filter(|(_, loan)| !params.missing || loan.is_out())
        .filter(|(_, loan)| !params.overdue || loan.is_overdue(now))
        .map(|(id, loan)| borrowing(*id, loan))
        .collect();
    paginate::<Borrowing>(borrowings, &params, &headers, &uri)
}

async fn get_borrowing(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<Json<Borrowing>, StatusCode> {
    let db = db.read().await;
    let account = db.account(&headers)?;
    let loan = account.borrowings.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(borrowing(id, loan)))
}

async fn create_borrowing(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Json(input): Json<CreateBorrowing>,
) -> Result<(StatusCode, Json<Borrowing>), StatusCode> {
    let when = match input.when.as_deref() {
        Some(text) => parse_client_time(text).ok_or(StatusCode::BAD_REQUEST)?,
        None => now(),
    };
    let mut db = db.write().await;
    let account = db.account_mut(&headers)?;
    if !account.friends.contains_key(&input.to_who) || !account.belongings.contains_key(&input.what)
    {
        return Err(StatusCode::BAD_REQUEST);
    }
    if account
        .borrowings
        .values()
        .any(|loan| loan.what == input.what && loan.is_out())
    {
        return Err(StatusCode::CONFLICT);
    }
    let id = next_id(&account.borrowings);
    let loan = Loan {
        what: input.what,
        to_who: input.to_who,
        when,
        returned: None,
    };
    let view = borrowing(id, &loan);
    account.borrowings.insert(id, loan);
    Ok((StatusCode::CREATED, Json(view)))
}

async fn update_borrowing(
    State(db): State<SharedDb>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    Json(input): Json<UpdateBorrowing>,
) -> Result<Json<Borrowing>, StatusCode> {
    let returned = match input.returned.as_deref() {
        Some(text) => Some(parse_client_time(text).ok_or(StatusCode::BAD_REQUEST)?),
        None => None,
    };
    let mut db = db.write().await;
    let account = db.account_mut(&headers)?;
    let loan = account.borrowings.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    loan.returned = returned;
    Ok(Json(borrowing(id, loan)))
}
