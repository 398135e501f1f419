//! Client core for a bank-aggregation REST API.
//!
//! # Overview
//! Builds `HttpRequest` values and parses `HttpResponse` values without
//! touching the network (host-does-IO pattern), and drives the server's
//! asynchronous task protocol: operations such as account setup, payment
//! submission and synchronization return a task token that is polled until
//! the bank-side work ends, fails, or asks the user for a PIN or a
//! challenge response.
//!
//! # Design
//! - `BankClient` is stateless: base URL plus credentials.
//! - Each operation is split into `build_*` (produces request) and
//!   `parse_*` (consumes response), so the I/O boundary is explicit.
//! - `Transport` is the only async seam; `ReqwestTransport` is the stock
//!   implementation, tests plug in scripted ones.
//! - `TaskPoller` runs the polling state machine as a bounded loop;
//!   `Session` wires submission, token extraction and polling together.
//! - DTOs are defined independently from the mock-server crate;
//!   integration tests catch schema drift.

pub mod client;
pub mod error;
pub mod http;
pub mod poller;
pub mod session;
pub mod task;
pub mod transport;
pub mod types;

pub use client::BankClient;
pub use error::{ApiError, ConfigurationError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use poller::{Responders, TaskPoller};
pub use session::Session;
pub use task::{
    Challenge, Countdown, PinResponse, PollConfig, PollParameters, TaskFailure, TaskOutcome,
    TaskState, POLL_INTERVAL,
};
pub use transport::{ReqwestTransport, Transport};
pub use types::{
    Authorization, ErrorEnvelope, LoginRequest, ServerError, SetupAccount, SubmitPayment,
    Synchronize, TaskToken, TaskTokenResponse,
};
