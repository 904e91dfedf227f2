//! Entity model and wire DTOs for the lending API.
//!
//! # Design
//! Entities (`Friend`, `Belonging`, `Borrow`) carry validated setters and are
//! what the session stores. Records (`FriendRecord`, ...) mirror the JSON the
//! server speaks and are defined independently of the mock-server crate;
//! integration tests catch schema drift. A `Borrow` refers to its friend and
//! belonging by id only. The session store is the owner of both.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, ValidationError};
use crate::time;

/// The three kinds of entity the API manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Friend,
    Belonging,
    Borrow,
}

impl EntityKind {
    /// Collection path relative to the API root, with trailing slash.
    pub fn collection_path(self) -> &'static str {
        match self {
            EntityKind::Friend => "v1/friends/",
            EntityKind::Belonging => "v1/belongings/",
            EntityKind::Borrow => "v1/borrowings/",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Friend => write!(f, "friend"),
            EntityKind::Belonging => write!(f, "belonging"),
            EntityKind::Borrow => write!(f, "borrow"),
        }
    }
}

/// Shared capability of every entity: a kind tag and a server-assigned id.
pub trait Record {
    const KIND: EntityKind;

    fn id(&self) -> u64;

    /// Id 0 marks a draft the server has not confirmed yet.
    fn is_persisted(&self) -> bool {
        self.id() != 0
    }
}

/// Validate a candidate id against the currently held one.
///
/// Leaves `current` untouched on rejection.
fn assign_id(current: &mut u64, candidate: i64) -> Result<(), ValidationError> {
    let candidate = u64::try_from(candidate)
        .ok()
        .filter(|id| *id > 0)
        .ok_or(ValidationError::NonPositiveId(candidate))?;
    if *current != 0 && *current != candidate {
        return Err(ValidationError::IdAlreadyAssigned {
            current: *current,
            attempted: candidate,
        });
    }
    *current = candidate;
    Ok(())
}

fn assign_id_value(current: &mut u64, candidate: &Value) -> Result<(), ValidationError> {
    match candidate.as_i64() {
        Some(id) => assign_id(current, id),
        None => Err(ValidationError::NonIntegerId(candidate.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Friend
// ---------------------------------------------------------------------------

/// Someone the user lends things to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Friend {
    id: u64,
    name: String,
    overdue: bool,
}

impl Friend {
    /// An unsaved friend. Pass it to `Session::create` to persist it.
    pub fn draft(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            overdue: false,
        }
    }

    pub fn from_record(record: FriendRecord) -> Result<Self, ValidationError> {
        let mut friend = Self::draft(&record.name);
        friend.set_id(record.id)?;
        friend.overdue = record.has_overdue;
        Ok(friend)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the friend holds an item past its due date.
    pub fn overdue(&self) -> bool {
        self.overdue
    }

    pub fn set_id(&mut self, id: i64) -> Result<(), ValidationError> {
        assign_id(&mut self.id, id)
    }

    pub fn set_id_value(&mut self, id: &Value) -> Result<(), ValidationError> {
        assign_id_value(&mut self.id, id)
    }
}

impl Record for Friend {
    const KIND: EntityKind = EntityKind::Friend;

    fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for Friend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Friend: {}", self.name)
    }
}

// ---------------------------------------------------------------------------
// Belonging
// ---------------------------------------------------------------------------

/// Something the user owns and may lend out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Belonging {
    id: u64,
    name: String,
    borrowed: bool,
}

impl Belonging {
    pub fn draft(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            borrowed: false,
        }
    }

    /// Hydrate from the server. A missing `is_borrowed` keeps the default.
    pub fn from_record(record: BelongingRecord) -> Result<Self, ValidationError> {
        let mut belonging = Self::draft(&record.name);
        belonging.set_id(record.id)?;
        if let Some(borrowed) = record.is_borrowed {
            belonging.borrowed = borrowed;
        }
        Ok(belonging)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the item is currently lent out.
    pub fn borrowed(&self) -> bool {
        self.borrowed
    }

    pub fn set_id(&mut self, id: i64) -> Result<(), ValidationError> {
        assign_id(&mut self.id, id)
    }

    pub fn set_id_value(&mut self, id: &Value) -> Result<(), ValidationError> {
        assign_id_value(&mut self.id, id)
    }
}

impl Record for Belonging {
    const KIND: EntityKind = EntityKind::Belonging;

    fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for Belonging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Belonging: {}", self.name)
    }
}

// ---------------------------------------------------------------------------
// Borrow
// ---------------------------------------------------------------------------

/// A belonging lent to a friend at a point in time.
///
/// `who` and `what` are ids into the session store. Construction requires
/// the referenced entities to be materialized already.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Borrow {
    id: u64,
    when: Option<NaiveDateTime>,
    returned: Option<NaiveDateTime>,
    who: u64,
    what: u64,
}

impl Borrow {
    /// An unsaved borrow. `when = None` lets the server stamp the current time.
    pub fn draft(
        who: &Friend,
        what: &Belonging,
        when: Option<NaiveDateTime>,
    ) -> Result<Self, ValidationError> {
        if !who.is_persisted() {
            return Err(ValidationError::UnpersistedReference(EntityKind::Friend));
        }
        if !what.is_persisted() {
            return Err(ValidationError::UnpersistedReference(EntityKind::Belonging));
        }
        Ok(Self {
            id: 0,
            when,
            returned: None,
            who: who.id(),
            what: what.id(),
        })
    }

    /// Hydrate from the server once `who` and `what` have been resolved.
    pub fn from_record(
        record: &BorrowRecord,
        who: &Friend,
        what: &Belonging,
    ) -> Result<Self, ApiError> {
        if who.id() != record.to_who {
            return Err(ApiError::UnknownId { kind: EntityKind::Friend, id: record.to_who });
        }
        if what.id() != record.what {
            return Err(ApiError::UnknownId { kind: EntityKind::Belonging, id: record.what });
        }
        let mut borrow = Self::draft(who, what, None)?;
        borrow.set_id(record.id)?;
        if let Some(when) = record.when.as_ref().filter(|v| !v.is_null()) {
            borrow.when = Some(time::normalize_json(when)?);
        }
        if let Some(returned) = record.returned.as_ref().filter(|v| !v.is_null()) {
            borrow.returned = Some(time::normalize_json(returned)?);
        }
        Ok(borrow)
    }

    /// Id of the friend holding the item.
    pub fn who(&self) -> u64 {
        self.who
    }

    /// Id of the lent belonging.
    pub fn what(&self) -> u64 {
        self.what
    }

    pub fn when(&self) -> Option<NaiveDateTime> {
        self.when
    }

    pub fn returned(&self) -> Option<NaiveDateTime> {
        self.returned
    }

    pub fn is_returned(&self) -> bool {
        self.returned.is_some()
    }

    pub fn set_id(&mut self, id: i64) -> Result<(), ValidationError> {
        assign_id(&mut self.id, id)
    }

    pub fn set_id_value(&mut self, id: &Value) -> Result<(), ValidationError> {
        assign_id_value(&mut self.id, id)
    }

    /// Re-point the borrow at another friend. Only persisted friends qualify.
    pub fn set_who(&mut self, who: &Entity) -> Result<(), ValidationError> {
        match who {
            Entity::Friend(friend) if friend.is_persisted() => {
                self.who = friend.id();
                Ok(())
            }
            Entity::Friend(_) => Err(ValidationError::UnpersistedReference(EntityKind::Friend)),
            other => Err(ValidationError::WrongReferenceKind {
                expected: EntityKind::Friend,
                found: other.kind(),
            }),
        }
    }

    /// Re-point the borrow at another belonging. Only persisted belongings qualify.
    pub fn set_what(&mut self, what: &Entity) -> Result<(), ValidationError> {
        match what {
            Entity::Belonging(belonging) if belonging.is_persisted() => {
                self.what = belonging.id();
                Ok(())
            }
            Entity::Belonging(_) => {
                Err(ValidationError::UnpersistedReference(EntityKind::Belonging))
            }
            other => Err(ValidationError::WrongReferenceKind {
                expected: EntityKind::Belonging,
                found: other.kind(),
            }),
        }
    }
}

impl Record for Borrow {
    const KIND: EntityKind = EntityKind::Borrow;

    fn id(&self) -> u64 {
        self.id
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Any entity, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Friend(Friend),
    Belonging(Belonging),
    Borrow(Borrow),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Friend(_) => EntityKind::Friend,
            Entity::Belonging(_) => EntityKind::Belonging,
            Entity::Borrow(_) => EntityKind::Borrow,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Entity::Friend(friend) => friend.id(),
            Entity::Belonging(belonging) => belonging.id(),
            Entity::Borrow(borrow) => borrow.id(),
        }
    }

    /// Display name. Borrows have none.
    pub fn name(&self) -> Option<&str> {
        match self {
            Entity::Friend(friend) => Some(friend.name()),
            Entity::Belonging(belonging) => Some(belonging.name()),
            Entity::Borrow(_) => None,
        }
    }

    pub fn as_friend(&self) -> Option<&Friend> {
        match self {
            Entity::Friend(friend) => Some(friend),
            _ => None,
        }
    }

    pub fn as_belonging(&self) -> Option<&Belonging> {
        match self {
            Entity::Belonging(belonging) => Some(belonging),
            _ => None,
        }
    }

    pub fn as_borrow(&self) -> Option<&Borrow> {
        match self {
            Entity::Borrow(borrow) => Some(borrow),
            _ => None,
        }
    }

    pub fn into_friend(self) -> Option<Friend> {
        match self {
            Entity::Friend(friend) => Some(friend),
            _ => None,
        }
    }

    pub fn into_belonging(self) -> Option<Belonging> {
        match self {
            Entity::Belonging(belonging) => Some(belonging),
            _ => None,
        }
    }

    pub fn into_borrow(self) -> Option<Borrow> {
        match self {
            Entity::Borrow(borrow) => Some(borrow),
            _ => None,
        }
    }
}

impl From<Friend> for Entity {
    fn from(value: Friend) -> Self {
        Entity::Friend(value)
    }
}

impl From<Belonging> for Entity {
    fn from(value: Belonging) -> Self {
        Entity::Belonging(value)
    }
}

impl From<Borrow> for Entity {
    fn from(value: Borrow) -> Self {
        Entity::Borrow(value)
    }
}

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

/// A friend as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FriendRecord {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub has_overdue: bool,
}

/// A belonging as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BelongingRecord {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_borrowed: Option<bool>,
}

/// A borrowing as returned by the API. Dates stay raw until normalized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BorrowRecord {
    pub id: i64,
    pub to_who: u64,
    pub what: u64,
    #[serde(default)]
    pub when: Option<Value>,
    #[serde(default)]
    pub returned: Option<Value>,
}

/// Request payload for creating a friend or a belonging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewThing {
    pub name: String,
}

/// Request payload for lending a belonging to a friend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewBorrow {
    pub what: u64,
    pub to_who: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

impl NewBorrow {
    pub fn from_draft(draft: &Borrow) -> Self {
        Self {
            what: draft.what(),
            to_who: draft.who(),
            when: draft.when().as_ref().map(time::to_wire),
        }
    }
}

/// Partial update marking a borrowing as returned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReturnPatch {
    pub returned: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenReply {
    pub auth_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisteredUser {
    pub id: u64,
    pub username: String,
}
