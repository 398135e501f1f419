//! Value types for the asynchronous task protocol.
//!
//! # Design
//! `PollParameters` is rebuilt for every poll and never mutated: each
//! iteration carries only what the server asked for in the previous
//! iteration. `TaskState::outcome` is the single place where the status
//! flags are interpreted, so the async poller and the C ABI agree on the
//! precedence order.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::types::{ServerError, TaskToken};

/// Delay before re-polling a task that is still running.
pub const POLL_INTERVAL: Duration = Duration::from_millis(400);

/// Parameters for one `/task/progress` request.
///
/// The token travels in the query string; the remaining fields form the
/// JSON body and are omitted when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollParameters {
    #[serde(skip)]
    pub task_token: TaskToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_pin: Option<bool>,
    #[serde(
        rename = "continue",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub continue_after_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl PollParameters {
    /// Plain progress query: token only.
    pub fn new(task_token: TaskToken) -> Self {
        Self {
            task_token,
            pin: None,
            save_pin: None,
            continue_after_error: None,
            response: None,
        }
    }

    /// Progress query answering a PIN request.
    pub fn with_pin(task_token: TaskToken, answer: PinResponse) -> Self {
        Self {
            pin: Some(answer.pin),
            save_pin: Some(answer.save_pin),
            ..Self::new(task_token)
        }
    }

    /// Progress query answering a challenge.
    pub fn with_response(task_token: TaskToken, response: String) -> Self {
        Self {
            response: Some(response),
            ..Self::new(task_token)
        }
    }
}

/// What a PIN responder hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinResponse {
    pub pin: String,
    pub save_pin: bool,
}

impl PinResponse {
    pub fn new(pin: impl Into<String>, save_pin: bool) -> Self {
        Self {
            pin: pin.into(),
            save_pin,
        }
    }
}

/// Prompt content relayed verbatim to the challenge responder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub data: String,
}

/// Snapshot of server-side progress returned by one poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub is_waiting_for_pin: bool,
    #[serde(default)]
    pub is_waiting_for_response: bool,
    #[serde(default)]
    pub is_erroneous: bool,
    #[serde(default)]
    pub is_ended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<Challenge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ServerError>,
}

/// The operative condition of a `TaskState`.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<'a> {
    Failed(TaskFailure<'a>),
    Ended,
    WaitingForPin,
    /// `None` when the server set the flag but sent no challenge.
    WaitingForResponse(Option<&'a Challenge>),
    Running,
}

/// Why a task reported failure.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskFailure<'a> {
    Structured(&'a ServerError),
    Unstructured { account_id: &'a str, message: &'a str },
}

impl TaskFailure<'_> {
    pub fn into_error(self) -> ApiError {
        match self {
            TaskFailure::Structured(error) => ApiError::TaskFailed(error.clone()),
            TaskFailure::Unstructured {
                account_id,
                message,
            } => ApiError::TaskProcessing {
                account_id: account_id.to_string(),
                message: message.to_string(),
            },
        }
    }
}

impl TaskState {
    /// Interpret the status flags.
    ///
    /// The protocol does not promise the flags are exclusive, so they are
    /// checked in a fixed order: erroneous, ended, waiting for PIN, waiting
    /// for response, running.
    pub fn outcome(&self) -> TaskOutcome<'_> {
        if self.is_erroneous {
            let failure = match &self.error {
                Some(error) => TaskFailure::Structured(error),
                None => TaskFailure::Unstructured {
                    account_id: &self.account_id,
                    message: &self.message,
                },
            };
            TaskOutcome::Failed(failure)
        } else if self.is_ended {
            TaskOutcome::Ended
        } else if self.is_waiting_for_pin {
            TaskOutcome::WaitingForPin
        } else if self.is_waiting_for_response {
            TaskOutcome::WaitingForResponse(self.challenge.as_ref())
        } else {
            TaskOutcome::Running
        }
    }
}

/// Remaining poll attempts for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Countdown(u32);

impl Countdown {
    /// 100 attempts at 400 ms is a ceiling of roughly 40 seconds.
    pub const INITIAL: Countdown = Countdown(100);

    pub fn new(remaining: u32) -> Self {
        Self(remaining)
    }

    pub fn remaining(&self) -> u32 {
        self.0
    }

    pub fn is_exhausted(&self) -> bool {
        self.0 == 0
    }

    /// Consume one attempt.
    pub fn tick(&mut self) {
        self.0 = self.0.saturating_sub(1);
    }
}

impl Default for Countdown {
    fn default() -> Self {
        Self::INITIAL
    }
}

/// Timing knobs for the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub budget: Countdown,
}

impl PollConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_budget(mut self, attempts: u32) -> Self {
        self.budget = Countdown::new(attempts);
        self
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            budget: Countdown::INITIAL,
        }
    }
}
