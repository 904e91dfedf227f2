//! Synchronous client core for the lending-tracker service.
//!
//! # Overview
//! Models friends, belongings and borrow records, and keeps a per-session
//! cache of them filled from a paginated REST API.
//!
//! # Design
//! - `LendingClient` is stateless: it builds `HttpRequest` values and parses
//!   `HttpResponse` values without touching the network.
//! - A `Transport` performs the round-trip. `UreqTransport` is the blocking
//!   default; tests script their own.
//! - `Session` ties both together with the auth token and the `Store`, and
//!   owns pagination, lazy reference resolution and writes.
//! - Wire records are defined independently from the mock-server crate;
//!   integration tests catch schema drift.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod session;
pub mod store;
pub mod time;
pub mod transport;
pub mod types;

pub use client::{parse_link_header, LendingClient, ListQuery, Page, PageLinks};
pub use config::ClientConfig;
pub use error::{ApiError, ErrorKind, ValidationError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use session::Session;
pub use store::{Collection, Store};
pub use time::TimeInput;
pub use transport::{Transport, UreqTransport};
pub use types::{
    Belonging, BelongingRecord, Borrow, BorrowRecord, Credentials, Entity, EntityKind, Friend,
    FriendRecord, NewBorrow, NewThing, Record, RegisteredUser, ReturnPatch, TokenReply,
};
