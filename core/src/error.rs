//! Error types for the lending API client.
//!
//! # Design
//! `NotFound` (the server answered 404) and `UnknownId` (a store lookup with
//! no lazy-fetch path) are kept apart from `HttpError` because callers treat
//! "does not exist" differently from "the server misbehaved". Entity setter
//! rejections live in their own `ValidationError` so they can be matched
//! without string comparison.

use thiserror::Error;

use crate::types::EntityKind;

/// Coarse classification of an `ApiError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network failure or unexpected HTTP status.
    Transport,
    /// Malformed JSON or an unexpected payload shape.
    Decode,
    /// An entity rejected an id or reference assignment.
    Validation,
    /// The requested entity does not exist.
    NotFound,
    /// Time normalization was given a value it does not understand.
    UnsupportedInput,
}

/// Rejected assignment on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("id must be a positive integer, got {0}")]
    NonPositiveId(i64),

    #[error("id must be a positive integer, got {0}")]
    NonIntegerId(String),

    #[error("id is already {current}, refusing to change it to {attempted}")]
    IdAlreadyAssigned { current: u64, attempted: u64 },

    #[error("{0} reference has not been persisted yet")]
    UnpersistedReference(EntityKind),

    #[error("expected a {expected} reference, got a {found}")]
    WrongReferenceKind { expected: EntityKind, found: EntityKind },
}

/// Errors returned by `LendingClient` parse methods and `Session` operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server returned 404 for the requested resource.
    #[error("resource not found")]
    NotFound,

    /// A store lookup by id found nothing.
    #[error("no {kind} with id {id} in the local store")]
    UnknownId { kind: EntityKind, id: u64 },

    /// The server returned a status other than the expected one.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The request never produced a response.
    #[error("transport failed: {0}")]
    Transport(String),

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    SerializationError(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("unsupported time input: {0}")]
    UnsupportedInput(String),

    /// A protected endpoint was called before `login`.
    #[error("session is not logged in")]
    NotAuthenticated,

    /// A required configuration value was not provided.
    #[error("{0} is not set")]
    MissingConfig(&'static str),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::NotFound | ApiError::UnknownId { .. } => ErrorKind::NotFound,
            ApiError::HttpError { .. } | ApiError::Transport(_) | ApiError::NotAuthenticated => {
                ErrorKind::Transport
            }
            ApiError::DeserializationError(_) | ApiError::SerializationError(_) => {
                ErrorKind::Decode
            }
            ApiError::Validation(_) | ApiError::MissingConfig(_) => ErrorKind::Validation,
            ApiError::UnsupportedInput(_) => ErrorKind::UnsupportedInput,
        }
    }
}
