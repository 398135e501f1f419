//! Stateless HTTP request builder and response parser for the bank API.
//!
//! # Design
//! `BankClient` holds only configuration (base URL, client credentials,
//! access token) and carries no mutable state between calls. Each operation
//! is split into a `build_*` method that produces an `HttpRequest` and a
//! `parse_*` method that consumes an `HttpResponse`. The caller (a
//! [`Transport`](crate::transport::Transport), the task poller, or a
//! foreign host) executes the actual HTTP round-trip.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ApiError, ConfigurationError};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::task::{PollParameters, TaskState};
use crate::types::{
    Authorization, ErrorEnvelope, LoginRequest, SetupAccount, SubmitPayment, Synchronize,
    TaskToken, TaskTokenResponse,
};

/// Synchronous, stateless client for the bank-aggregation API.
///
/// Builds `HttpRequest` values and parses `HttpResponse` values without
/// touching the network.
#[derive(Clone)]
pub struct BankClient {
    base_url: String,
    client_credentials: Option<(String, String)>,
    access_token: Option<String>,
}

impl fmt::Debug for BankClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BankClient")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_credentials.as_ref().map(|(id, _)| id))
            .field("authorized", &self.access_token.is_some())
            .finish()
    }
}

impl BankClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client_credentials: None,
            access_token: None,
        }
    }

    /// Attach the application's OAuth client id and secret, used by login.
    pub fn with_client_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.client_credentials = Some((client_id.into(), client_secret.into()));
        self
    }

    /// Attach a bearer token sent with every API request.
    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    pub fn with_authorization(self, authorization: &Authorization) -> Self {
        self.with_access_token(authorization.access_token.clone())
    }

    // -----------------------------------------------------------------------
    // Authentication
    // -----------------------------------------------------------------------

    pub fn build_login(&self, input: &LoginRequest) -> Result<HttpRequest, ApiError> {
        let (client_id, client_secret) = self
            .client_credentials
            .as_ref()
            .ok_or(ConfigurationError::MissingClientCredentials)?;
        let basic = STANDARD.encode(format!("{client_id}:{client_secret}"));
        let body = to_json(input)?;
        Ok(HttpRequest {
            method: HttpMethod::Post,
            path: format!("{}/auth/token", self.base_url),
            headers: vec![
                ("authorization".to_string(), format!("Basic {basic}")),
                ("content-type".to_string(), "application/json".to_string()),
            ],
            body: Some(body),
        })
    }

    pub fn parse_login(&self, response: HttpResponse) -> Result<Authorization, ApiError> {
        decode(response, &[200])
    }

    // -----------------------------------------------------------------------
    // Task submission
    // -----------------------------------------------------------------------

    pub fn build_setup_account(&self, input: &SetupAccount) -> Result<HttpRequest, ApiError> {
        self.json_request(HttpMethod::Post, "/rest/accounts", input)
    }

    pub fn build_submit_payment(
        &self,
        account_id: &str,
        payment_id: &str,
        input: &SubmitPayment,
    ) -> Result<HttpRequest, ApiError> {
        let path = format!(
            "/rest/accounts/{}/payments/{}/submit",
            encode_segment(account_id),
            encode_segment(payment_id)
        );
        self.json_request(HttpMethod::Post, &path, input)
    }

    pub fn build_synchronize(&self, input: &Synchronize) -> Result<HttpRequest, ApiError> {
        self.json_request(HttpMethod::Post, "/rest/sync", input)
    }

    /// Extract the task token from a submission response.
    pub fn parse_task_token(&self, response: HttpResponse) -> Result<TaskToken, ApiError> {
        let envelope: TaskTokenResponse = decode(response, &[200, 201])?;
        Ok(envelope.task_token)
    }

    // -----------------------------------------------------------------------
    // Task progress
    // -----------------------------------------------------------------------

    pub fn build_poll_task(&self, params: &PollParameters) -> Result<HttpRequest, ApiError> {
        let path = format!(
            "/task/progress?id={}",
            encode_query(params.task_token.as_str())
        );
        self.json_request(HttpMethod::Post, &path, params)
    }

    pub fn parse_task_state(&self, response: HttpResponse) -> Result<TaskState, ApiError> {
        decode(response, &[200])
    }

    fn json_request<T: Serialize>(
        &self,
        method: HttpMethod,
        path: &str,
        input: &T,
    ) -> Result<HttpRequest, ApiError> {
        let body = to_json(input)?;
        let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
        if let Some(token) = &self.access_token {
            headers.push(("authorization".to_string(), format!("Bearer {token}")));
        }
        Ok(HttpRequest {
            method,
            path: format!("{}{path}", self.base_url),
            headers,
            body: Some(body),
        })
    }
}

fn to_json<T: Serialize>(input: &T) -> Result<String, ApiError> {
    serde_json::to_string(input).map_err(|e| ApiError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(response: HttpResponse, expected: &[u16]) -> Result<T, ApiError> {
    check_status(&response, expected)?;
    serde_json::from_str(&response.body).map_err(|e| ApiError::DeserializationError(e.to_string()))
}

/// Map non-success status codes to the appropriate `ApiError` variant.
fn check_status(response: &HttpResponse, expected: &[u16]) -> Result<(), ApiError> {
    if expected.contains(&response.status) {
        return Ok(());
    }
    if response.status == 404 {
        return Err(ApiError::NotFound);
    }
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&response.body) {
        return Err(ApiError::Server {
            status: response.status,
            error: envelope.error,
        });
    }
    Err(ApiError::HttpError {
        status: response.status,
        body: response.body.clone(),
    })
}

fn encode_query(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn encode_segment(value: &str) -> String {
    // form encoding turns spaces into '+', which is literal inside a path
    encode_query(value).replace('+', "%20")
}
