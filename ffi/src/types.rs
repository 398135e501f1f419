//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Each type mirrors a core type but uses C-compatible representations:
//! `*mut c_char` instead of `String`, raw pointers instead of `Vec` and
//! `Option`, and enums with explicit discriminants. Conversion functions
//! live here to keep `lib.rs` focused on the `extern "C"` surface.

use std::ffi::CString;
use std::os::raw::c_char;

use bankagg_core::{ApiError, HttpMethod, TaskOutcome, TaskState};

/// Opaque handle to a `BankClient`. C callers receive a pointer to this
/// and pass it back into every FFI function.
pub struct FfiBankClient {
    pub(crate) inner: bankagg_core::BankClient,
}

/// Heap-allocate `s` as a C string. Interior NULs are dropped.
pub(crate) fn to_c_string(s: impl Into<String>) -> *mut c_char {
    let s: String = s.into();
    CString::new(s.replace('\0', ""))
        .unwrap_or_default()
        .into_raw()
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// HTTP method as a C enum.
#[repr(C)]
#[derive(Debug, PartialEq, Eq)]
pub enum FfiHttpMethod {
    Get = 0,
    Post = 1,
    Put = 2,
    Delete = 3,
}

impl From<HttpMethod> for FfiHttpMethod {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Get => FfiHttpMethod::Get,
            HttpMethod::Post => FfiHttpMethod::Post,
            HttpMethod::Put => FfiHttpMethod::Put,
            HttpMethod::Delete => FfiHttpMethod::Delete,
        }
    }
}

/// A single HTTP header as a key-value pair of C strings.
#[repr(C)]
pub struct FfiHeader {
    pub key: *mut c_char,
    pub value: *mut c_char,
}

/// An HTTP request described as C-compatible plain data.
///
/// Built by `bankagg_build_*` functions. The C caller executes the request
/// and passes the response back through `bankagg_parse_*`.
#[repr(C)]
pub struct FfiHttpRequest {
    pub method: FfiHttpMethod,
    pub path: *mut c_char,
    pub headers: *mut FfiHeader,
    pub headers_len: u32,
    pub body: *mut c_char,
}

impl FfiHttpRequest {
    /// Convert a core `HttpRequest` into a heap-allocated `FfiHttpRequest`.
    pub(crate) fn from_core(req: bankagg_core::HttpRequest) -> *mut Self {
        let path = to_c_string(req.path);
        let body = match req.body {
            Some(b) => to_c_string(b),
            None => std::ptr::null_mut(),
        };

        let headers_len = req.headers.len() as u32;
        let headers = if req.headers.is_empty() {
            std::ptr::null_mut()
        } else {
            // boxed slice: capacity == len, so free can rebuild it exactly
            let ffi_headers: Box<[FfiHeader]> = req
                .headers
                .into_iter()
                .map(|(k, v)| FfiHeader {
                    key: to_c_string(k),
                    value: to_c_string(v),
                })
                .collect();
            Box::into_raw(ffi_headers) as *mut FfiHeader
        };

        Box::into_raw(Box::new(FfiHttpRequest {
            method: req.method.into(),
            path,
            headers,
            headers_len,
            body,
        }))
    }
}

// ---------------------------------------------------------------------------
// Response input (caller-provided, not heap-allocated by us)
// ---------------------------------------------------------------------------

/// An HTTP response described as C-compatible plain data.
///
/// The C caller constructs this on the stack after executing an HTTP request,
/// then passes a pointer to a `bankagg_parse_*` function. The FFI layer reads
/// but does not free these fields.
#[repr(C)]
pub struct FfiHttpResponse {
    pub status: u16,
    pub body: *const c_char,
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Error codes returned in `FfiTaskResult`.
#[repr(C)]
#[derive(Debug, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    NotFound = 1,
    Http = 2,
    Server = 3,
    Deserialization = 4,
    Serialization = 5,
    Configuration = 6,
    Panic = 7,
    NullArg = 8,
    Task = 9,
    Transport = 10,
}

/// What the host should do next with a polled task.
///
/// Derived with the same precedence as the Rust poller: failed, ended,
/// waiting for PIN, waiting for response, running.
#[repr(C)]
#[derive(Debug, PartialEq, Eq)]
pub enum FfiTaskStep {
    /// Sleep `bankagg_poll_interval_ms()` and poll again with the bare token.
    Running = 0,
    Ended = 1,
    Failed = 2,
    /// Ask the user for a PIN and poll again with it.
    WaitingForPin = 3,
    /// Show `challenge` to the user and poll again with the response.
    WaitingForResponse = 4,
}

/// Challenge content exposed to C.
#[repr(C)]
pub struct FfiChallenge {
    pub title: *mut c_char,
    pub label: *mut c_char,
    pub format: *mut c_char,
    pub data: *mut c_char,
}

/// A decoded task state exposed to C.
///
/// `challenge` is null unless the server sent one. `error_message` is null
/// unless the task failed; `error_code` is the server's code or 0.
/// `error_name`, `error_group` and `error_data` (compact JSON) mirror the
/// server's structured error and are null when it did not send that field.
#[repr(C)]
pub struct FfiTaskState {
    pub step: FfiTaskStep,
    pub account_id: *mut c_char,
    pub message: *mut c_char,
    pub is_waiting_for_pin: bool,
    pub is_waiting_for_response: bool,
    pub is_erroneous: bool,
    pub is_ended: bool,
    pub challenge: *mut FfiChallenge,
    pub error_code: i64,
    pub error_message: *mut c_char,
    pub error_name: *mut c_char,
    pub error_group: *mut c_char,
    pub error_data: *mut c_char,
}

fn optional_c_string(s: Option<String>) -> *mut c_char {
    s.map(to_c_string).unwrap_or(std::ptr::null_mut())
}

impl FfiTaskState {
    fn from_core(state: TaskState) -> Self {
        let (step, error_code, error_message) = match state.outcome() {
            TaskOutcome::Failed(failure) => {
                let code = state.error.as_ref().and_then(|e| e.code).unwrap_or(0);
                (
                    FfiTaskStep::Failed,
                    code,
                    to_c_string(failure.into_error().to_string()),
                )
            }
            TaskOutcome::Ended => (FfiTaskStep::Ended, 0, std::ptr::null_mut()),
            TaskOutcome::WaitingForPin => (FfiTaskStep::WaitingForPin, 0, std::ptr::null_mut()),
            TaskOutcome::WaitingForResponse(_) => {
                (FfiTaskStep::WaitingForResponse, 0, std::ptr::null_mut())
            }
            TaskOutcome::Running => (FfiTaskStep::Running, 0, std::ptr::null_mut()),
        };

        let (error_name, error_group, error_data) = match state.error {
            Some(error) if step == FfiTaskStep::Failed => (
                optional_c_string(error.name),
                optional_c_string(error.group),
                optional_c_string(error.data.map(|d| d.to_string())),
            ),
            _ => (std::ptr::null_mut(), std::ptr::null_mut(), std::ptr::null_mut()),
        };

        let challenge = match state.challenge {
            Some(c) => Box::into_raw(Box::new(FfiChallenge {
                title: to_c_string(c.title),
                label: to_c_string(c.label),
                format: to_c_string(c.format),
                data: to_c_string(c.data),
            })),
            None => std::ptr::null_mut(),
        };

        FfiTaskState {
            step,
            account_id: to_c_string(state.account_id),
            message: to_c_string(state.message),
            is_waiting_for_pin: state.is_waiting_for_pin,
            is_waiting_for_response: state.is_waiting_for_response,
            is_erroneous: state.is_erroneous,
            is_ended: state.is_ended,
            challenge,
            error_code,
            error_message,
            error_name,
            error_group,
            error_data,
        }
    }
}

/// Result envelope for parse operations.
///
/// On success `error_code` is `Ok`, `error_message` is null, and `state`
/// points to the decoded task state. On failure `error_code` describes the
/// category, `error_message` is a human-readable C string, and `state` is
/// null.
#[repr(C)]
pub struct FfiTaskResult {
    pub error_code: FfiErrorCode,
    pub error_message: *mut c_char,
    pub http_status: u16,
    pub state: *mut FfiTaskState,
}

impl FfiTaskResult {
    /// Build a success result carrying a decoded task state.
    pub(crate) fn ok_state(state: TaskState) -> *mut Self {
        let ffi_state = Box::new(FfiTaskState::from_core(state));
        Box::into_raw(Box::new(FfiTaskResult {
            error_code: FfiErrorCode::Ok,
            error_message: std::ptr::null_mut(),
            http_status: 0,
            state: Box::into_raw(ffi_state),
        }))
    }

    /// Build an error result from an `ApiError`.
    pub(crate) fn from_error(err: ApiError) -> *mut Self {
        let error_code = match &err {
            ApiError::NotFound => FfiErrorCode::NotFound,
            ApiError::HttpError { .. } => FfiErrorCode::Http,
            ApiError::Server { .. } => FfiErrorCode::Server,
            ApiError::DeserializationError(_) => FfiErrorCode::Deserialization,
            ApiError::SerializationError(_) => FfiErrorCode::Serialization,
            ApiError::Configuration(_) => FfiErrorCode::Configuration,
            ApiError::Transport(_) => FfiErrorCode::Transport,
            ApiError::TaskFailed(_) | ApiError::TaskProcessing { .. } | ApiError::TaskTimeout => {
                FfiErrorCode::Task
            }
        };
        Self::error(error_code, err.status().unwrap_or(0), err.to_string())
    }

    /// Build an error result for a null argument.
    pub(crate) fn null_arg(name: &str) -> *mut Self {
        Self::error(FfiErrorCode::NullArg, 0, format!("null argument: {name}"))
    }

    /// Build an error result for a caught panic.
    pub(crate) fn panic(msg: &str) -> *mut Self {
        Self::error(FfiErrorCode::Panic, 0, msg)
    }

    fn error(error_code: FfiErrorCode, http_status: u16, msg: impl Into<String>) -> *mut Self {
        Box::into_raw(Box::new(FfiTaskResult {
            error_code,
            error_message: to_c_string(msg),
            http_status,
            state: std::ptr::null_mut(),
        }))
    }
}
