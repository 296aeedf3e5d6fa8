//! Error types for the message service.
//!
//! Each boundary gets its own enum so that callers can tell *whose* fault a
//! failure is without string matching:
//!
//! - [`ConfigError`]: supervisor configuration is unusable. Fatal, surfaced at
//!   construction.
//! - [`ConnectError`]: a single connect attempt failed. Feeds the retry loop.
//! - [`AllocationError`]: an identifier could not be obtained.
//! - [`StoreError`]: the message store is unreachable or rejected a query.
//! - [`QueryInputError`]: the caller sent malformed listing parameters.
//! - [`Error`]: data-model violations (identifier range, enum parsing).

use crate::common::types::ConnectionState;
use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = core::result::Result<T, Error>;

/// Data-model errors raised while constructing or parsing shared types.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The input contained something other than ASCII digits.
    #[error("`{input}` is not a non-negative integer")]
    NotADigitString { input: String },

    /// The value does not fit in 63 bits.
    #[error("`{value}` is outside the 63-bit identifier range")]
    IdOutOfRange { value: String },

    #[error("unknown orderBy `{input}`, expected `id:asc` or `id:desc`")]
    UnknownOrderBy { input: String },

    #[error("unknown message type `{input}`")]
    UnknownMessageType { input: String },
}

/// Invalid supervisor configuration. Never retried.
#[derive(Clone, thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("deadline must be >= 0 seconds, got {0}")]
    NegativeDeadline(i64),

    #[error("retries must be >= 0, got {0}")]
    NegativeRetries(i64),

    #[error("invalid allocator endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// A credential file could not be read.
    #[error("cannot read {what} at {}: {reason}", path.display())]
    UnreadableCredential {
        what: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// Only some of root certificate, client certificate and client key were
    /// supplied.
    #[error("mutual TLS needs a root certificate, a client certificate and a client key")]
    IncompleteTls,
}

/// Failure of one connect attempt.
#[derive(Clone, thiserror::Error, Debug)]
pub enum ConnectError {
    /// The attempt did not finish within the per-attempt deadline.
    #[error("connect attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The transport (TCP, TLS handshake, HTTP/2) rejected the attempt. Wrong
    /// credential material ends up here too.
    #[error("transport error: {0}")]
    Transport(String),

    /// `disconnect()` was called while the attempt was in flight.
    #[error("connect attempt cancelled")]
    Cancelled,
}

/// Failure to obtain an identifier from the allocator.
#[derive(Clone, thiserror::Error, Debug)]
pub enum AllocationError {
    /// The supervisor is not in the `Initialized` state; no RPC was issued.
    #[error("allocator connection is not ready (state: {state})")]
    NotReady { state: ConnectionState },

    /// The RPC was issued on a ready channel and failed. Not retried here.
    #[error("allocation failed: {reason}")]
    AllocationFailed { reason: String },
}

/// Infrastructure failure of the message store.
#[derive(Clone, thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store rejected query: {0}")]
    Query(String),

    /// A row could not be mapped back onto the message model.
    #[error("corrupt row: {0}")]
    Decode(String),

    #[error("message {id} already exists")]
    Duplicate { id: u64 },
}

/// Malformed listing parameters. Produced by request validation and never
/// seen by the pagination engine.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct QueryInputError {
    pub field: &'static str,
    pub reason: String,
}

impl QueryInputError {
    pub fn new(field: &'static str, source: &Error) -> Self {
        Self {
            field,
            reason: source.to_string(),
        }
    }
}
