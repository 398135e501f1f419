//! Drives one bank-side task to a terminal outcome.
//!
//! # Overview
//! The server answers every `/task/progress` poll with a `TaskState`. The
//! poller interprets it (see [`TaskState::outcome`]) and either finishes,
//! asks a caller-supplied responder for a PIN or a challenge response and
//! polls again with the answer, or sleeps for the poll interval and polls
//! again with the bare token.
//!
//! # Design
//! - An explicit loop with a `Countdown` replaces callback recursion. Every
//!   iteration that does not finish the task consumes one unit, so a task
//!   can never be polled more than `budget` times.
//! - Transport, decode and configuration failures are terminal. The only
//!   thing that is retried is the server's own "still running" answer.
//! - The poller borrows its collaborators and owns nothing but the
//!   parameters of the current iteration, so concurrent pollers for
//!   different tasks share no mutable state.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::instrument;

use crate::client::BankClient;
use crate::error::{ApiError, ConfigurationError};
use crate::task::{
    Challenge, Countdown, PinResponse, PollConfig, PollParameters, TaskOutcome, TaskState,
};
use crate::transport::Transport;
use crate::types::TaskToken;

/// Receives the server's status message after every poll.
pub type ProgressResponder = Box<dyn Fn(&str) + Send + Sync>;

/// Answers a PIN request: `(message, account_id) -> PinResponse`.
pub type PinResponder = Box<dyn Fn(&str, &str) -> PinResponse + Send + Sync>;

/// Answers a challenge: `(message, account_id, challenge) -> response`.
pub type ChallengeResponder = Box<dyn Fn(&str, &str, &Challenge) -> String + Send + Sync>;

/// The caller's hooks for human interaction during a task.
///
/// Every hook is optional. A task that demands a PIN or a challenge
/// response the caller did not provide a responder for fails with
/// [`ConfigurationError`].
#[derive(Default)]
pub struct Responders {
    progress: Option<ProgressResponder>,
    pin: Option<PinResponder>,
    challenge: Option<ChallengeResponder>,
}

impl Responders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    pub fn on_pin(mut self, f: impl Fn(&str, &str) -> PinResponse + Send + Sync + 'static) -> Self {
        self.pin = Some(Box::new(f));
        self
    }

    pub fn on_challenge(
        mut self,
        f: impl Fn(&str, &str, &Challenge) -> String + Send + Sync + 'static,
    ) -> Self {
        self.challenge = Some(Box::new(f));
        self
    }

    /// Best effort: a panicking observer is logged and otherwise ignored.
    fn notify_progress(&self, message: &str) {
        if let Some(progress) = &self.progress {
            if catch_unwind(AssertUnwindSafe(|| progress(message))).is_err() {
                tracing::warn!("progress responder panicked; continuing");
            }
        }
    }
}

impl fmt::Debug for Responders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responders")
            .field("progress", &self.progress.is_some())
            .field("pin", &self.pin.is_some())
            .field("challenge", &self.challenge.is_some())
            .finish()
    }
}

/// What the loop does after interpreting one state.
enum Step {
    Finished,
    /// Poll again right away, carrying the responder's answer.
    Answer(PollParameters),
    /// Poll again with the bare token after the interval.
    Wait(PollParameters),
}

/// Polls a single task until it ends, fails, or runs out of budget.
pub struct TaskPoller<'a, T: Transport + ?Sized> {
    client: &'a BankClient,
    transport: &'a T,
    responders: &'a Responders,
    config: PollConfig,
}

impl<'a, T: Transport + ?Sized> TaskPoller<'a, T> {
    pub fn new(client: &'a BankClient, transport: &'a T, responders: &'a Responders) -> Self {
        Self {
            client,
            transport,
            responders,
            config: PollConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PollConfig) -> Self {
        self.config = config;
        self
    }

    /// Poll `token` from scratch with the configured budget.
    pub async fn run(&self, token: TaskToken) -> Result<(), ApiError> {
        self.poll(PollParameters::new(token), self.config.budget).await
    }

    /// Continue polling with explicit starting parameters and budget.
    ///
    /// ## Errors
    ///
    /// - `TaskTimeout` once `countdown` is exhausted; no further request is sent.
    /// - Transport, HTTP and decode errors from the poll exchange, unchanged.
    /// - `TaskFailed` / `TaskProcessing` when the server reports failure.
    /// - `Configuration` when the server asks for a missing responder.
    #[instrument(name = "task_poll", skip_all, fields(task = %params.task_token))]
    pub async fn poll(
        &self,
        mut params: PollParameters,
        mut countdown: Countdown,
    ) -> Result<(), ApiError> {
        loop {
            if countdown.is_exhausted() {
                tracing::info!("poll budget exhausted");
                return Err(ApiError::TaskTimeout);
            }

            let request = self.client.build_poll_task(&params)?;
            let response = self.transport.execute(request).await?;
            let state = self.client.parse_task_state(response)?;
            countdown.tick();

            tracing::debug!(
                remaining = countdown.remaining(),
                message = %state.message,
                "task progress"
            );
            self.responders.notify_progress(&state.message);

            let token = params.task_token;
            params = match self.next_step(token, &state)? {
                Step::Finished => {
                    tracing::info!(account_id = %state.account_id, "task ended");
                    return Ok(());
                }
                Step::Answer(next) => next,
                Step::Wait(next) => {
                    tokio::time::sleep(self.config.interval).await;
                    next
                }
            };
        }
    }

    fn next_step(&self, token: TaskToken, state: &TaskState) -> Result<Step, ApiError> {
        match state.outcome() {
            TaskOutcome::Failed(failure) => {
                let err = failure.into_error();
                tracing::info!(error = %err, "task failed");
                Err(err)
            }
            TaskOutcome::Ended => Ok(Step::Finished),
            TaskOutcome::WaitingForPin => {
                let responder = self
                    .responders
                    .pin
                    .as_ref()
                    .ok_or(ConfigurationError::MissingPinResponder)?;
                let answer = guard("pin", || responder(&state.message, &state.account_id))?;
                Ok(Step::Answer(PollParameters::with_pin(token, answer)))
            }
            TaskOutcome::WaitingForResponse(challenge) => {
                let responder = self
                    .responders
                    .challenge
                    .as_ref()
                    .ok_or(ConfigurationError::MissingChallengeResponder)?;
                let challenge = challenge.ok_or(ConfigurationError::MissingChallenge)?;
                let answer = guard("challenge", || {
                    responder(&state.message, &state.account_id, challenge)
                })?;
                Ok(Step::Answer(PollParameters::with_response(token, answer)))
            }
            TaskOutcome::Running => Ok(Step::Wait(PollParameters::new(token))),
        }
    }
}

/// Run a prompting responder; a panic ends the task instead of the caller's runtime task.
fn guard<R>(name: &'static str, f: impl FnOnce() -> R) -> Result<R, ConfigurationError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|_| {
        tracing::warn!(responder = name, "responder panicked; stopping task");
        ConfigurationError::ResponderPanicked(name)
    })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;
    use crate::http::{HttpRequest, HttpResponse};
    use crate::types::ServerError;

    /// Replays canned poll answers and records every request it receives.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<HttpResponse, String>>>,
        fallback: Option<HttpResponse>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn states(states: Vec<serde_json::Value>) -> Self {
            Self {
                script: Mutex::new(
                    states
                        .into_iter()
                        .map(|s| Ok(HttpResponse::new(200, s.to_string())))
                        .collect(),
                ),
                ..Self::default()
            }
        }

        fn forever(state: serde_json::Value) -> Self {
            Self {
                fallback: Some(HttpResponse::new(200, state.to_string())),
                ..Self::default()
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                script: Mutex::new(VecDeque::from([Err(message.to_string())])),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn body(&self, index: usize) -> serde_json::Value {
            let requests = self.requests.lock().unwrap();
            serde_json::from_str(requests[index].body.as_deref().unwrap()).unwrap()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
            self.requests.lock().unwrap().push(request);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(answer) => answer.map_err(ApiError::Transport),
                None => Ok(self.fallback.clone().expect("poll after end of script")),
            }
        }
    }

    fn running() -> serde_json::Value {
        json!({"account_id": "A1.1", "message": "Retrieving balance", "is_waiting_for_pin": false,
               "is_waiting_for_response": false, "is_erroneous": false, "is_ended": false})
    }

    fn ended() -> serde_json::Value {
        json!({"account_id": "A1.1", "message": "Done", "is_ended": true})
    }

    fn waiting_for_pin() -> serde_json::Value {
        json!({"account_id": "A1.1", "message": "Please enter your PIN", "is_waiting_for_pin": true})
    }

    fn waiting_for_response() -> serde_json::Value {
        json!({"account_id": "A1.1", "message": "Please enter the TAN", "is_waiting_for_response": true,
               "challenge": {"title": "pushTAN", "label": "TAN", "format": "Text",
                             "data": "Confirm the transfer in your banking app"}})
    }

    fn client() -> BankClient {
        BankClient::new("http://bank.test").with_access_token("tok")
    }

    fn config(budget: u32) -> PollConfig {
        PollConfig::default().with_budget(budget)
    }

    fn token() -> TaskToken {
        TaskToken::new("task-1")
    }

    #[tokio::test]
    async fn ended_on_first_poll_succeeds_after_one_call() {
        for budget in [1, 3, 100] {
            let transport = ScriptedTransport::states(vec![ended()]);
            let responders = Responders::new();
            let result = TaskPoller::new(&client(), &transport, &responders)
                .with_config(config(budget))
                .run(token())
                .await;
            assert!(result.is_ok(), "budget {budget}");
            assert_eq!(transport.calls(), 1, "budget {budget}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn still_running_times_out_after_exactly_budget_calls() {
        for budget in [1, 2, 7] {
            let transport = ScriptedTransport::forever(running());
            let responders = Responders::new();
            let result = TaskPoller::new(&client(), &transport, &responders)
                .with_config(config(budget))
                .run(token())
                .await;
            assert!(matches!(result, Err(ApiError::TaskTimeout)), "budget {budget}");
            assert_eq!(transport.calls(), budget as usize, "budget {budget}");
        }
    }

    #[tokio::test]
    async fn exhausted_budget_sends_nothing() {
        let transport = ScriptedTransport::forever(running());
        let responders = Responders::new();
        let result = TaskPoller::new(&client(), &transport, &responders)
            .poll(PollParameters::new(token()), Countdown::new(0))
            .await;
        assert!(matches!(result, Err(ApiError::TaskTimeout)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn running_waits_one_interval_between_polls() {
        let transport = ScriptedTransport::states(vec![running(), running(), ended()]);
        let responders = Responders::new();
        let started = tokio::time::Instant::now();
        TaskPoller::new(&client(), &transport, &responders)
            .run(token())
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(800), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1200), "{elapsed:?}");
        assert_eq!(transport.body(1), json!({}));
    }

    #[tokio::test]
    async fn structured_task_error_is_returned_verbatim() {
        let error = json!({"code": 10000, "name": "Wrong PIN", "message": "PIN rejected",
                           "description": "The bank rejected the PIN", "group": "user",
                           "data": {"attempts_left": 2}});
        let transport = ScriptedTransport::states(vec![json!({
            "account_id": "A1.1", "message": "Login failed", "is_erroneous": true, "error": error
        })]);
        let responders = Responders::new();
        let result = TaskPoller::new(&client(), &transport, &responders)
            .run(token())
            .await;
        let expected: ServerError = serde_json::from_value(error).unwrap();
        match result {
            Err(ApiError::TaskFailed(got)) => assert_eq!(got, expected),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unstructured_task_error_carries_account_and_message() {
        let transport = ScriptedTransport::states(vec![json!({
            "account_id": "A1.2", "message": "Bank unavailable", "is_erroneous": true, "is_ended": true
        })]);
        let responders = Responders::new();
        let result = TaskPoller::new(&client(), &transport, &responders)
            .run(token())
            .await;
        match result {
            Err(ApiError::TaskProcessing {
                account_id,
                message,
            }) => {
                assert_eq!(account_id, "A1.2");
                assert_eq!(message, "Bank unavailable");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_pin_responder_stops_polling() {
        let transport = ScriptedTransport::states(vec![waiting_for_pin(), ended()]);
        let responders = Responders::new().on_challenge(|_, _, _| "unused".to_string());
        let result = TaskPoller::new(&client(), &transport, &responders)
            .run(token())
            .await;
        assert!(matches!(
            result,
            Err(ApiError::Configuration(ConfigurationError::MissingPinResponder))
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn pin_answer_is_sent_with_next_poll() {
        let transport = ScriptedTransport::states(vec![waiting_for_pin(), ended()]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let responders = Responders::new().on_pin(move |message, account_id| {
            recorder
                .lock()
                .unwrap()
                .push((message.to_string(), account_id.to_string()));
            PinResponse::new("1234", true)
        });

        TaskPoller::new(&client(), &transport, &responders)
            .run(token())
            .await
            .unwrap();

        assert_eq!(transport.calls(), 2);
        assert_eq!(transport.body(1), json!({"pin": "1234", "save_pin": true}));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("Please enter your PIN".to_string(), "A1.1".to_string())]
        );
        let second = &transport.requests.lock().unwrap()[1];
        assert!(second.path.ends_with("/task/progress?id=task-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn challenge_is_relayed_once_and_answered() {
        let transport = ScriptedTransport::states(vec![
            running(),
            running(),
            waiting_for_response(),
            ended(),
        ]);
        let challenges = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&challenges);
        let responders = Responders::new().on_challenge(move |_, _, challenge| {
            recorder.lock().unwrap().push(challenge.clone());
            "999999".to_string()
        });

        TaskPoller::new(&client(), &transport, &responders)
            .run(token())
            .await
            .unwrap();

        assert_eq!(transport.calls(), 4);
        let expected: Challenge =
            serde_json::from_value(waiting_for_response()["challenge"].clone()).unwrap();
        assert_eq!(*challenges.lock().unwrap(), vec![expected]);
        assert_eq!(transport.body(3), json!({"response": "999999"}));
    }

    #[tokio::test]
    async fn response_flag_without_challenge_is_a_configuration_error() {
        let transport = ScriptedTransport::states(vec![json!({
            "account_id": "A1.1", "message": "TAN?", "is_waiting_for_response": true
        })]);
        let responders = Responders::new().on_challenge(|_, _, _| "111111".to_string());
        let result = TaskPoller::new(&client(), &transport, &responders)
            .run(token())
            .await;
        assert!(matches!(
            result,
            Err(ApiError::Configuration(ConfigurationError::MissingChallenge))
        ));
    }

    #[tokio::test]
    async fn missing_challenge_responder_is_a_configuration_error() {
        let transport = ScriptedTransport::states(vec![waiting_for_response()]);
        let responders = Responders::new().on_pin(|_, _| PinResponse::new("1234", false));
        let result = TaskPoller::new(&client(), &transport, &responders)
            .run(token())
            .await;
        assert!(matches!(
            result,
            Err(ApiError::Configuration(
                ConfigurationError::MissingChallengeResponder
            ))
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn panicking_challenge_responder_ends_the_task() {
        let transport = ScriptedTransport::states(vec![waiting_for_response(), ended()]);
        let responders = Responders::new().on_challenge(|_, _, _| panic!("dialog closed"));
        let result = TaskPoller::new(&client(), &transport, &responders)
            .run(token())
            .await;
        assert!(matches!(
            result,
            Err(ApiError::Configuration(ConfigurationError::ResponderPanicked("challenge")))
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn transport_failure_is_not_retried() {
        let transport = ScriptedTransport::failing("connection refused");
        let responders = Responders::new();
        let result = TaskPoller::new(&client(), &transport, &responders)
            .run(token())
            .await;
        assert!(matches!(result, Err(ApiError::Transport(msg)) if msg == "connection refused"));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_state_is_fatal() {
        let transport = ScriptedTransport::default();
        transport
            .script
            .lock()
            .unwrap()
            .push_back(Ok(HttpResponse::new(200, "<html>maintenance</html>")));
        let responders = Responders::new();
        let result = TaskPoller::new(&client(), &transport, &responders)
            .run(token())
            .await;
        assert!(matches!(result, Err(ApiError::DeserializationError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_sees_every_message_and_may_panic() {
        let transport = ScriptedTransport::states(vec![running(), waiting_for_pin(), ended()]);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let responders = Responders::new()
            .on_progress(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("observer bug");
            })
            .on_pin(|_, _| PinResponse::new("1234", false));

        let result = TaskPoller::new(&client(), &transport, &responders)
            .run(token())
            .await;
        assert!(result.is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    #[traced_test]
    async fn terminal_outcome_is_logged() {
        let transport = ScriptedTransport::states(vec![ended()]);
        let responders = Responders::new();
        TaskPoller::new(&client(), &transport, &responders)
            .run(token())
            .await
            .unwrap();
        assert!(logs_contain("task ended"));
    }
}
