//! Error types for the bank-aggregation client.
//!
//! # Design
//! One `ApiError` covers both single HTTP exchanges and whole task runs,
//! because a task run is a sequence of exchanges and every failure along
//! the way is terminal for the task. `NotFound` keeps its dedicated variant;
//! other non-2xx responses land in `Server` when the body carries the
//! structured error envelope and in `HttpError` otherwise.

use thiserror::Error;

use crate::types::ServerError;

/// Errors returned by `BankClient` parsers, transports and the task poller.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server returned 404.
    #[error("resource not found")]
    NotFound,

    /// Non-2xx status whose body decoded as a structured error.
    #[error("HTTP {status}: {error}")]
    Server { status: u16, error: ServerError },

    /// Non-2xx status with an unstructured body.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The network exchange itself failed.
    #[error("transport failed: {0}")]
    Transport(String),

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    SerializationError(String),

    /// The task reported failure and attached a structured error.
    #[error("task failed: {0}")]
    TaskFailed(ServerError),

    /// The task reported failure without a structured error.
    #[error("task for account {account_id} failed: {message}")]
    TaskProcessing { account_id: String, message: String },

    /// The poll budget ran out before the task reached a terminal state.
    #[error("task did not finish within the poll budget")]
    TaskTimeout,

    /// The caller did not supply something the operation needed.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Misuse detected at runtime: the server asked for an interaction the
/// caller cannot serve, or the client lacks required settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("server requested a PIN but no PIN responder was supplied")]
    MissingPinResponder,

    #[error("server requested a challenge response but no challenge responder was supplied")]
    MissingChallengeResponder,

    #[error("server requested a challenge response without sending a challenge")]
    MissingChallenge,

    #[error("client credentials are required for login")]
    MissingClientCredentials,

    #[error("the {0} responder panicked")]
    ResponderPanicked(&'static str),
}

impl ApiError {
    /// HTTP status associated with this error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::NotFound => Some(404),
            ApiError::Server { status, .. } | ApiError::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }
}
