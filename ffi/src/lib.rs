//! C-ABI wrapper around `bankagg-core`'s task protocol.
//!
//! # Overview
//! Lets a host without a Rust async runtime drive the task-polling loop
//! itself: build a `/task/progress` request, execute it with the host's
//! own HTTP stack, parse the answer, and read the next step off the
//! decoded state.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - `FfiTaskState::step` carries the interpreted outcome, so hosts never
//!   re-implement the flag precedence.
//! - The host owns the loop: it sleeps `bankagg_poll_interval_ms()` between
//!   "running" answers and gives up after `bankagg_poll_budget()` polls.
//! - The C caller owns all returned pointers and must call the matching
//!   `bankagg_free_*` function to release them.

pub mod types;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::catch_unwind;
use std::str::Utf8Error;

use bankagg_core::{Countdown, HttpResponse, PollParameters, TaskToken, POLL_INTERVAL};

use types::*;

/// Borrow a C string as `&str`, treating invalid UTF-8 as empty.
///
/// # Safety
/// `ptr` must be non-null and point to a NUL-terminated string that outlives
/// the returned reference.
unsafe fn borrow_str<'a>(ptr: *const c_char) -> &'a str {
    unsafe { CStr::from_ptr(ptr) }.to_str().unwrap_or("")
}

/// Borrow a C string as `&str`, `None` if it is not valid UTF-8.
///
/// # Safety
/// Same contract as [`borrow_str`].
unsafe fn try_borrow_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// `Ok(None)` for a null pointer, `Err` for invalid UTF-8, otherwise an owned copy.
fn optional_string(ptr: *const c_char) -> Result<Option<String>, Utf8Error> {
    if ptr.is_null() {
        Ok(None)
    } else {
        let s = unsafe { CStr::from_ptr(ptr) }.to_str()?;
        Ok(Some(s.to_string()))
    }
}

/// Tri-state flag: -1 = absent, 0 = false, 1 = true.
fn optional_flag(value: i32) -> Option<bool> {
    match value {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Client lifecycle
// ---------------------------------------------------------------------------

/// Create a new `BankClient` bound to `base_url`.
///
/// Returns null if `base_url` is null or if an internal panic occurs.
/// The caller must free the returned pointer with `bankagg_client_free`.
#[unsafe(no_mangle)]
pub extern "C" fn bankagg_client_new(base_url: *const c_char) -> *mut FfiBankClient {
    catch_unwind(|| {
        if base_url.is_null() {
            return std::ptr::null_mut();
        }
        let url = unsafe { borrow_str(base_url) };
        let client = bankagg_core::BankClient::new(url);
        Box::into_raw(Box::new(FfiBankClient { inner: client }))
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Attach the bearer token sent with every subsequent request.
///
/// Returns false if either argument is null.
#[unsafe(no_mangle)]
pub extern "C" fn bankagg_client_set_access_token(
    client: *mut FfiBankClient,
    access_token: *const c_char,
) -> bool {
    catch_unwind(|| {
        if client.is_null() || access_token.is_null() {
            return false;
        }
        let client = unsafe { &mut *client };
        let token = unsafe { borrow_str(access_token) };
        client.inner = client.inner.clone().with_access_token(token);
        true
    })
    .unwrap_or(false)
}

/// Free a `BankClient` created by `bankagg_client_new`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn bankagg_client_free(client: *mut FfiBankClient) {
    if !client.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { Box::from_raw(client) });
        });
    }
}

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

/// Delay between polls of a running task, in milliseconds.
#[unsafe(no_mangle)]
pub extern "C" fn bankagg_poll_interval_ms() -> u32 {
    POLL_INTERVAL.as_millis() as u32
}

/// Maximum number of polls before a task counts as timed out.
#[unsafe(no_mangle)]
pub extern "C" fn bankagg_poll_budget() -> u32 {
    Countdown::INITIAL.remaining()
}

// ---------------------------------------------------------------------------
// Build / parse
// ---------------------------------------------------------------------------

/// Build a `/task/progress` request.
///
/// `pin` and `response` may be null (omitted). `save_pin` and
/// `continue_after_error` use tri-state: -1 = omit, 0 = false, 1 = true.
/// Returns null if `client` or `task_token` is null, or if any string
/// argument is not valid UTF-8.
/// The caller must free the returned pointer with `bankagg_free_request`.
#[unsafe(no_mangle)]
pub extern "C" fn bankagg_build_poll_task(
    client: *const FfiBankClient,
    task_token: *const c_char,
    pin: *const c_char,
    save_pin: i32,
    continue_after_error: i32,
    response: *const c_char,
) -> *mut FfiHttpRequest {
    catch_unwind(|| {
        if client.is_null() || task_token.is_null() {
            return std::ptr::null_mut();
        }
        let client = unsafe { &*client };
        let Some(token) = (unsafe { try_borrow_str(task_token) }) else {
            return std::ptr::null_mut();
        };
        let (Ok(pin), Ok(response)) = (optional_string(pin), optional_string(response)) else {
            return std::ptr::null_mut();
        };
        let params = PollParameters {
            task_token: TaskToken::new(token),
            pin,
            save_pin: optional_flag(save_pin),
            continue_after_error: optional_flag(continue_after_error),
            response,
        };
        match client.inner.build_poll_task(&params) {
            Ok(req) => FfiHttpRequest::from_core(req),
            Err(_) => std::ptr::null_mut(),
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Convert an `FfiHttpResponse` to a core `HttpResponse`.
///
/// A null body is treated as empty.
fn ffi_response_to_core(resp: &FfiHttpResponse) -> HttpResponse {
    let body = if resp.body.is_null() {
        String::new()
    } else {
        unsafe { borrow_str(resp.body) }.to_string()
    };
    HttpResponse::new(resp.status, body)
}

/// Parse the answer to a `/task/progress` request.
///
/// On success `state->step` tells the host what to do next.
#[unsafe(no_mangle)]
pub extern "C" fn bankagg_parse_task_state(
    client: *const FfiBankClient,
    response: *const FfiHttpResponse,
) -> *mut FfiTaskResult {
    catch_unwind(|| {
        if client.is_null() {
            return FfiTaskResult::null_arg("client");
        }
        if response.is_null() {
            return FfiTaskResult::null_arg("response");
        }
        let client = unsafe { &*client };
        let resp = unsafe { &*response };
        match client.inner.parse_task_state(ffi_response_to_core(resp)) {
            Ok(state) => FfiTaskResult::ok_state(state),
            Err(e) => FfiTaskResult::from_error(e),
        }
    })
    .unwrap_or_else(|_| FfiTaskResult::panic("panic in bankagg_parse_task_state"))
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

fn free_c_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}

/// Free an `FfiHttpRequest` returned by any `bankagg_build_*` function.
/// Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn bankagg_free_request(req: *mut FfiHttpRequest) {
    if req.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let req = unsafe { Box::from_raw(req) };
        free_c_string(req.path);
        free_c_string(req.body);
        if !req.headers.is_null() && req.headers_len > 0 {
            let headers: Box<[FfiHeader]> = unsafe {
                Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                    req.headers,
                    req.headers_len as usize,
                ))
            };
            for h in headers.iter() {
                free_c_string(h.key);
                free_c_string(h.value);
            }
        }
    });
}

/// Free an `FfiTaskResult` returned by `bankagg_parse_task_state`.
/// Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn bankagg_free_result(result: *mut FfiTaskResult) {
    if result.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let result = unsafe { Box::from_raw(result) };
        free_c_string(result.error_message);
        if !result.state.is_null() {
            let state = unsafe { Box::from_raw(result.state) };
            free_c_string(state.account_id);
            free_c_string(state.message);
            free_c_string(state.error_message);
            free_c_string(state.error_name);
            free_c_string(state.error_group);
            free_c_string(state.error_data);
            if !state.challenge.is_null() {
                let challenge = unsafe { Box::from_raw(state.challenge) };
                free_c_string(challenge.title);
                free_c_string(challenge.label);
                free_c_string(challenge.format);
                free_c_string(challenge.data);
            }
        }
    });
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
