//! Wire DTOs for the authentication and task-submission endpoints.
//!
//! # Design
//! Only the payloads that feed the asynchronous task protocol live here:
//! login, account setup, payment submission, synchronization and the
//! `task_token` envelope they all answer with. Resource models (accounts,
//! transactions, securities) are out of scope for this crate.
//!
//! The mock-server crate defines its own copies of these shapes; the
//! integration tests catch any drift between the two.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a server-side asynchronous job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskToken(String);

impl TaskToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

/// Envelope returned by every operation that starts a bank-side task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTokenResponse {
    pub task_token: TaskToken,
}

/// Resource-owner password grant sent to `/auth/token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub grant_type: String,
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl LoginRequest {
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            grant_type: "password".to_string(),
            username: username.into(),
            password: password.into(),
            scope: None,
        }
    }
}

/// Access grant returned by a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Request payload for connecting a new bank account.
///
/// `credentials` are the bank login fields in the order the bank's login
/// form lists them. Omitting the PIN makes the server ask for it through
/// the task protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupAccount {
    pub bank_code: String,
    #[serde(default = "default_country")]
    pub country: String,
    pub credentials: Vec<String>,
    #[serde(default)]
    pub save_pin: bool,
    #[serde(default)]
    pub disable_first_sync: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_tasks: Option<Vec<String>>,
}

fn default_country() -> String {
    "de".to_string()
}

impl SetupAccount {
    pub fn new(bank_code: impl Into<String>, credentials: Vec<String>) -> Self {
        Self {
            bank_code: bank_code.into(),
            country: default_country(),
            credentials,
            save_pin: false,
            disable_first_sync: false,
            sync_tasks: None,
        }
    }
}

/// Request payload for submitting a stored payment to the bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitPayment {
    pub tan_scheme_id: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
}

/// Request payload for a background synchronization of the user's accounts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Synchronize {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub disable_notifications: bool,
    /// Skip accounts synchronized within this many hours.
    #[serde(default)]
    pub if_not_synced_since: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_tasks: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_ids: Option<Vec<String>>,
}

/// Structured error object reported by the server, either as the body of
/// a failed HTTP exchange or embedded in a failed task's state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .description
            .as_deref()
            .or(self.message.as_deref())
            .or(self.name.as_deref())
            .unwrap_or("unspecified server error");
        match self.code {
            Some(code) => write!(f, "{text} (code {code})"),
            None => f.write_str(text),
        }
    }
}

/// `{"error": {...}}` wrapper used by non-2xx responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ServerError,
}
