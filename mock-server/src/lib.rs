//! In-memory stand-in for the bank-aggregation API's task endpoints.
//!
//! Every task follows a fixed script so clients can be tested end to end:
//! two "still running" polls, then whatever interaction the task needs
//! (PIN for account setup without a stored PIN, a TAN challenge for
//! payments), then the end. Tasks for [`STALLED_BANK_CODE`] never finish.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const DEMO_USERNAME: &str = "demo@example.com";
pub const DEMO_PASSWORD: &str = "demo";
pub const DEMO_PIN: &str = "1234";
pub const DEMO_TAN: &str = "111111";
pub const STALLED_BANK_CODE: &str = "00000000";

/// "Still running" answers before a task asks for input or ends.
pub const WARMUP_POLLS: u32 = 2;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
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
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ServerError,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub title: String,
    pub label: String,
    pub format: String,
    pub data: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub account_id: String,
    pub message: String,
    pub is_waiting_for_pin: bool,
    pub is_waiting_for_response: bool,
    pub is_erroneous: bool,
    pub is_ended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<Challenge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ServerError>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskTokenResponse {
    pub task_token: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Authorization {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub grant_type: String,
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct SetupAccount {
    pub bank_code: String,
    pub credentials: Vec<String>,
    #[serde(default)]
    pub save_pin: bool,
}

#[derive(Deserialize)]
pub struct SubmitPayment {
    pub tan_scheme_id: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Default, Deserialize)]
pub struct Synchronize {
    #[serde(default)]
    pub account_ids: Option<Vec<String>>,
}

#[derive(Default, Deserialize)]
pub struct PollParams {
    pub pin: Option<String>,
    pub save_pin: Option<bool>,
    #[serde(rename = "continue")]
    pub continue_after_error: Option<bool>,
    pub response: Option<String>,
}

#[derive(Deserialize)]
pub struct TaskQuery {
    pub id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Script {
    AccountSetup { needs_pin: bool },
    Payment,
    Sync,
    Stalled,
}

/// Server-side bookkeeping for one task token.
#[derive(Debug)]
pub struct Task {
    account_id: String,
    script: Script,
    polls: u32,
    pin_accepted: bool,
    response_accepted: bool,
    last: Option<TaskState>,
}

impl Task {
    fn new(account_id: String, script: Script) -> Self {
        Self {
            account_id,
            script,
            polls: 0,
            pin_accepted: false,
            response_accepted: false,
            last: None,
        }
    }

    fn state(&self, message: &str) -> TaskState {
        TaskState {
            account_id: self.account_id.clone(),
            message: message.to_string(),
            ..TaskState::default()
        }
    }

    fn fail(&mut self, name: &str, description: &str) -> TaskState {
        let state = TaskState {
            is_erroneous: true,
            error: Some(ServerError {
                code: Some(10000),
                name: Some(name.to_string()),
                message: Some(name.to_string()),
                description: Some(description.to_string()),
                group: Some("user".to_string()),
            }),
            ..self.state(description)
        };
        self.last = Some(state.clone());
        state
    }

    /// Apply the client's answers and move the script one step forward.
    fn advance(&mut self, params: &PollParams) -> TaskState {
        if let Some(last) = &self.last {
            return last.clone();
        }
        if let Some(pin) = &params.pin {
            if pin != DEMO_PIN {
                return self.fail("Wrong PIN", "The bank rejected the PIN");
            }
            self.pin_accepted = true;
        }
        if let Some(response) = &params.response {
            if response != DEMO_TAN {
                return self.fail("Wrong TAN", "The bank rejected the TAN");
            }
            self.response_accepted = true;
        }

        self.polls += 1;
        if self.script == Script::Stalled || self.polls <= WARMUP_POLLS {
            return self.state("Connecting to bank");
        }
        match self.script {
            Script::AccountSetup { needs_pin: true } if !self.pin_accepted => TaskState {
                is_waiting_for_pin: true,
                ..self.state("Please enter your PIN")
            },
            Script::Payment if !self.response_accepted => TaskState {
                is_waiting_for_response: true,
                challenge: Some(Challenge {
                    title: "pushTAN".to_string(),
                    label: "TAN".to_string(),
                    format: "Text".to_string(),
                    data: "Please confirm the transfer in your banking app".to_string(),
                }),
                ..self.state("Please enter the TAN")
            },
            _ => {
                let state = TaskState {
                    is_ended: true,
                    ..self.state("Task completed")
                };
                self.last = Some(state.clone());
                state
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Bank {
    tasks: RwLock<HashMap<String, Task>>,
    access_tokens: RwLock<HashSet<String>>,
}

pub type Db = Arc<Bank>;

type Failure = (StatusCode, Json<ErrorEnvelope>);

fn failure(status: StatusCode, code: i64, name: &str, description: &str) -> Failure {
    let error = ServerError {
        code: Some(code),
        name: Some(name.to_string()),
        message: Some(name.to_string()),
        description: Some(description.to_string()),
        group: Some("client".to_string()),
    };
    (status, Json(ErrorEnvelope { error }))
}

pub fn app() -> Router {
    let db: Db = Arc::new(Bank::default());
    Router::new()
        .route("/auth/token", post(login))
        .route("/rest/accounts", post(setup_account))
        .route("/rest/sync", post(synchronize))
        .route(
            "/rest/accounts/{account_id}/payments/{payment_id}/submit",
            post(submit_payment),
        )
        .route("/task/progress", post(task_progress))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// `id:secret` from an HTTP Basic header, both parts non-empty.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded).ok()?).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    (!id.is_empty() && !secret.is_empty()).then(|| (id.to_string(), secret.to_string()))
}

async fn require_bearer(db: &Bank, headers: &HeaderMap) -> Result<(), Failure> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match token {
        Some(token) if db.access_tokens.read().await.contains(token) => Ok(()),
        _ => Err(failure(
            StatusCode::UNAUTHORIZED,
            1001,
            "Unauthorized",
            "Missing or invalid access token",
        )),
    }
}

async fn create_task(db: &Bank, account_id: String, script: Script) -> String {
    let token = Uuid::new_v4().simple().to_string();
    tracing::info!(task = %token, ?script, "task created");
    db.tasks
        .write()
        .await
        .insert(token.clone(), Task::new(account_id, script));
    token
}

async fn login(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<LoginRequest>,
) -> Result<Json<Authorization>, Failure> {
    if basic_credentials(&headers).is_none() {
        return Err(failure(
            StatusCode::UNAUTHORIZED,
            1002,
            "Invalid client",
            "Client credentials are missing or malformed",
        ));
    }
    if input.grant_type != "password"
        || input.username != DEMO_USERNAME
        || input.password != DEMO_PASSWORD
    {
        return Err(failure(
            StatusCode::BAD_REQUEST,
            1000,
            "Invalid grant",
            "Username or password is wrong",
        ));
    }
    let access_token = Uuid::new_v4().simple().to_string();
    db.access_tokens.write().await.insert(access_token.clone());
    Ok(Json(Authorization {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: 3600,
        refresh_token: None,
        scope: Some("accounts=rw user=rw".to_string()),
    }))
}

async fn setup_account(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<SetupAccount>,
) -> Result<(StatusCode, Json<TaskTokenResponse>), Failure> {
    require_bearer(&db, &headers).await?;
    if input.bank_code.is_empty() {
        return Err(failure(
            StatusCode::BAD_REQUEST,
            1000,
            "Invalid bank code",
            "bank_code must not be empty",
        ));
    }
    let script = if input.bank_code == STALLED_BANK_CODE {
        Script::Stalled
    } else {
        // login name alone: the PIN has to come through the task protocol
        Script::AccountSetup {
            needs_pin: input.credentials.len() < 2,
        }
    };
    let account_id = format!("A{}", &Uuid::new_v4().simple().to_string()[..8]);
    let task_token = create_task(&db, account_id, script).await;
    Ok((StatusCode::CREATED, Json(TaskTokenResponse { task_token })))
}

async fn submit_payment(
    State(db): State<Db>,
    headers: HeaderMap,
    Path((account_id, payment_id)): Path<(String, String)>,
    Json(input): Json<SubmitPayment>,
) -> Result<Json<TaskTokenResponse>, Failure> {
    require_bearer(&db, &headers).await?;
    if input.tan_scheme_id.is_empty() {
        return Err(failure(
            StatusCode::BAD_REQUEST,
            1000,
            "Invalid TAN scheme",
            "tan_scheme_id must not be empty",
        ));
    }
    tracing::debug!(%payment_id, state = %input.state, "payment submitted");
    let task_token = create_task(&db, account_id, Script::Payment).await;
    Ok(Json(TaskTokenResponse { task_token }))
}

async fn synchronize(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(input): Json<Synchronize>,
) -> Result<Json<TaskTokenResponse>, Failure> {
    require_bearer(&db, &headers).await?;
    let account_id = input
        .account_ids
        .and_then(|ids| ids.into_iter().next())
        .unwrap_or_default();
    let task_token = create_task(&db, account_id, Script::Sync).await;
    Ok(Json(TaskTokenResponse { task_token }))
}

async fn task_progress(
    State(db): State<Db>,
    headers: HeaderMap,
    Query(query): Query<TaskQuery>,
    Json(params): Json<PollParams>,
) -> Result<Json<TaskState>, Failure> {
    require_bearer(&db, &headers).await?;
    let mut tasks = db.tasks.write().await;
    let task = tasks.get_mut(&query.id).ok_or_else(|| {
        failure(
            StatusCode::NOT_FOUND,
            1004,
            "Task not found",
            "Unknown task token",
        )
    })?;
    if params.save_pin == Some(true) {
        tracing::debug!(task = %query.id, "client asked to store the PIN");
    }
    if params.continue_after_error == Some(true) {
        tracing::debug!(task = %query.id, "client asked to continue after error");
    }
    let state = task.advance(&params);
    tracing::info!(task = %query.id, message = %state.message, "task polled");
    Ok(Json(state))
}
