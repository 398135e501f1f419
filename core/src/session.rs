//! Task-submitting operations bound to a transport.
//!
//! # Design
//! `Session` pairs the stateless `BankClient` with a `Transport`. Every
//! operation that starts bank-side work performs its own initial request,
//! pulls the task token out of the response and hands it to a
//! [`TaskPoller`]. The operation's result is the poller's result, unchanged.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::instrument;

use crate::client::BankClient;
use crate::error::ApiError;
use crate::http::HttpRequest;
use crate::poller::{Responders, TaskPoller};
use crate::task::PollConfig;
use crate::transport::Transport;
use crate::types::{Authorization, LoginRequest, SetupAccount, SubmitPayment, Synchronize, TaskToken};

/// A `BankClient` plus the transport that executes its requests.
#[derive(Debug)]
pub struct Session<T: Transport + ?Sized> {
    client: BankClient,
    transport: Arc<T>,
    config: PollConfig,
}

impl<T: Transport + ?Sized> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            transport: Arc::clone(&self.transport),
            config: self.config,
        }
    }
}

impl<T: Transport + ?Sized> Session<T> {
    pub fn new(client: BankClient, transport: Arc<T>) -> Self {
        Self {
            client,
            transport,
            config: PollConfig::default(),
        }
    }

    pub fn with_poll_config(mut self, config: PollConfig) -> Self {
        self.config = config;
        self
    }

    /// Same transport and settings, requests sent with `authorization`.
    pub fn authorized(&self, authorization: &Authorization) -> Self {
        Self {
            client: self.client.clone().with_authorization(authorization),
            ..self.clone()
        }
    }

    /// Exchange user credentials for an access token.
    #[instrument(skip_all, fields(username = %input.username))]
    pub async fn login(&self, input: &LoginRequest) -> Result<Authorization, ApiError> {
        let request = self.client.build_login(input)?;
        let response = self.transport.execute(request).await?;
        self.client.parse_login(response)
    }

    /// Connect a new bank account and wait for the bank-side setup.
    #[instrument(skip_all, fields(bank_code = %input.bank_code))]
    pub async fn setup_account(
        &self,
        input: &SetupAccount,
        responders: &Responders,
    ) -> Result<(), ApiError> {
        let request = self.client.build_setup_account(input)?;
        let token = self.start_task(request).await?;
        self.poller(responders).run(token).await
    }

    /// Submit a stored payment and wait until the bank accepts or rejects it.
    #[instrument(skip(self, input, responders))]
    pub async fn submit_payment(
        &self,
        account_id: &str,
        payment_id: &str,
        input: &SubmitPayment,
        responders: &Responders,
    ) -> Result<(), ApiError> {
        let request = self
            .client
            .build_submit_payment(account_id, payment_id, input)?;
        let token = self.start_task(request).await?;
        self.poller(responders).run(token).await
    }

    /// Synchronize the user's accounts with their banks.
    #[instrument(skip_all)]
    pub async fn synchronize(
        &self,
        input: &Synchronize,
        responders: &Responders,
    ) -> Result<(), ApiError> {
        let request = self.client.build_synchronize(input)?;
        let token = self.start_task(request).await?;
        self.poller(responders).run(token).await
    }

    /// Poll an existing task on the runtime and report through `on_complete`.
    ///
    /// Returns immediately. `on_complete` runs exactly once, on the spawned
    /// task, with the terminal result.
    pub fn spawn_task<F>(&self, token: TaskToken, responders: Responders, on_complete: F) -> JoinHandle<()>
    where
        T: 'static,
        F: FnOnce(Result<(), ApiError>) + Send + 'static,
    {
        let session = self.clone();
        tokio::spawn(async move {
            let result = session.poller(&responders).run(token).await;
            on_complete(result);
        })
    }

    async fn start_task(&self, request: HttpRequest) -> Result<TaskToken, ApiError> {
        let response = self.transport.execute(request).await?;
        let token = self.client.parse_task_token(response)?;
        tracing::debug!(task = %token, "task started");
        Ok(token)
    }

    fn poller<'a>(&'a self, responders: &'a Responders) -> TaskPoller<'a, T> {
        TaskPoller::new(&self.client, self.transport.as_ref(), responders).with_config(self.config)
    }
}
