//! Verify build/parse methods against JSON test vectors stored in `test-vectors/`.
//!
//! Each vector file describes inputs, expected requests, simulated responses,
//! and expected parse results. Comparing parsed JSON (not raw strings) avoids
//! false negatives from field-ordering differences.

use bankagg_core::{
    ApiError, BankClient, HttpMethod, HttpRequest, HttpResponse, PollParameters, SetupAccount,
    SubmitPayment, Synchronize, TaskOutcome, TaskState, TaskToken,
};

const BASE_URL: &str = "http://localhost:3000";

fn client() -> BankClient {
    BankClient::new(BASE_URL).with_access_token("tok-123")
}

/// Parse the method string from test vectors into `HttpMethod`.
fn parse_method(s: &str) -> HttpMethod {
    match s {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "DELETE" => HttpMethod::Delete,
        other => panic!("unknown method: {other}"),
    }
}

fn assert_request(name: &str, req: &HttpRequest, expected: &serde_json::Value) {
    assert_eq!(req.method, parse_method(expected["method"].as_str().unwrap()), "{name}: method");
    assert_eq!(req.path, format!("{BASE_URL}{}", expected["path"].as_str().unwrap()), "{name}: path");

    let expected_headers: Vec<(String, String)> = expected["headers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| {
            let arr = h.as_array().unwrap();
            (arr[0].as_str().unwrap().to_string(), arr[1].as_str().unwrap().to_string())
        })
        .collect();
    assert_eq!(req.headers, expected_headers, "{name}: headers");

    let body: serde_json::Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
    assert_eq!(body, expected["body"], "{name}: body");
}

fn simulated(case: &serde_json::Value) -> HttpResponse {
    let sim = &case["simulated_response"];
    HttpResponse::new(
        sim["status"].as_u64().unwrap() as u16,
        sim["body"].as_str().unwrap(),
    )
}

fn outcome_name(state: &TaskState) -> &'static str {
    match state.outcome() {
        TaskOutcome::Failed(_) => "failed",
        TaskOutcome::Ended => "ended",
        TaskOutcome::WaitingForPin => "waiting_for_pin",
        TaskOutcome::WaitingForResponse(_) => "waiting_for_response",
        TaskOutcome::Running => "running",
    }
}

// ---------------------------------------------------------------------------
// Task progress
// ---------------------------------------------------------------------------

#[test]
fn task_progress_test_vectors() {
    let raw = include_str!("../../test-vectors/task_progress.json");
    let vectors: serde_json::Value = serde_json::from_str(raw).unwrap();

    let c = client();
    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let input = &case["input"];

        // Verify build
        let params = PollParameters {
            task_token: TaskToken::new(input["task_token"].as_str().unwrap()),
            pin: input["pin"].as_str().map(str::to_string),
            save_pin: input["save_pin"].as_bool(),
            continue_after_error: input["continue"].as_bool(),
            response: input["response"].as_str().map(str::to_string),
        };
        let req = c.build_poll_task(&params).unwrap();
        assert_request(name, &req, &case["expected_request"]);

        // Verify parse
        let expected = &case["expected_result"];
        let result = c.parse_task_state(simulated(case));
        match expected["error"].as_str() {
            None => {
                let state = result.unwrap();
                let expected_state: TaskState =
                    serde_json::from_value(expected["state"].clone()).unwrap();
                assert_eq!(state, expected_state, "{name}: parsed state");
                assert_eq!(
                    outcome_name(&state),
                    expected["outcome"].as_str().unwrap(),
                    "{name}: outcome"
                );
            }
            Some(kind) => {
                let err = result.unwrap_err();
                let matched = match kind {
                    "not_found" => matches!(err, ApiError::NotFound),
                    "server" => matches!(err, ApiError::Server { .. }),
                    "http" => matches!(err, ApiError::HttpError { .. }),
                    "deserialization" => matches!(err, ApiError::DeserializationError(_)),
                    other => panic!("{name}: unknown error kind {other}"),
                };
                assert!(matched, "{name}: expected {kind}, got {err:?}");
                if let Some(status) = expected["status"].as_u64() {
                    assert_eq!(err.status(), Some(status as u16), "{name}: status");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Task submission
// ---------------------------------------------------------------------------

#[test]
fn submission_test_vectors() {
    let raw = include_str!("../../test-vectors/submissions.json");
    let vectors: serde_json::Value = serde_json::from_str(raw).unwrap();

    let c = client();
    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let input = case["input"].clone();

        // Verify build
        let req = match case["operation"].as_str().unwrap() {
            "setup_account" => {
                let input: SetupAccount = serde_json::from_value(input).unwrap();
                c.build_setup_account(&input).unwrap()
            }
            "submit_payment" => {
                let input: SubmitPayment = serde_json::from_value(input).unwrap();
                c.build_submit_payment(
                    case["account_id"].as_str().unwrap(),
                    case["payment_id"].as_str().unwrap(),
                    &input,
                )
                .unwrap()
            }
            "synchronize" => {
                let input: Synchronize = serde_json::from_value(input).unwrap();
                c.build_synchronize(&input).unwrap()
            }
            other => panic!("{name}: unknown operation {other}"),
        };
        assert_request(name, &req, &case["expected_request"]);

        // Verify parse
        let token = c.parse_task_token(simulated(case)).unwrap();
        assert_eq!(
            token.as_str(),
            case["expected_token"].as_str().unwrap(),
            "{name}: task token"
        );
    }
}
