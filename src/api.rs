//! Remote check-in authority client.
//!
//! The authority's check-in endpoint is keyed by QR code hash and is
//! idempotent server-side: submitting a code that another terminal already
//! consumed for the same event comes back as a success, not an error. The
//! client folds every response into a three-way `RemoteOutcome` so the
//! sync engine never has to inspect HTTP details: success (remove from
//! queue), business rejection (remove, never retry), or transient failure
//! (retry with backoff).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for check-in requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout used specifically for the lightweight connectivity probe.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(3);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the authority base URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Payload of a confirmed remote check-in.
#[derive(Debug, Clone)]
pub struct CheckInConfirmation {
    /// Reservation as the authority sees it, when it returned one.
    pub reservation: Option<Value>,
    /// Human-readable table location for the door staff.
    pub table_location: Option<String>,
}

/// Tagged result of one remote check-in attempt.
#[derive(Debug, Clone)]
pub enum RemoteOutcome {
    /// Admitted (or already admitted by another terminal — same thing).
    Success(CheckInConfirmation),
    /// Rejected by the authority (invalid/expired code). Never retried.
    Business(String),
    /// Connectivity, timeout, or server fault. Retried with backoff.
    Transient(String),
}

impl RemoteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RemoteOutcome::Success(_))
    }
}

/// The remote check-in authority, behind a trait so the sync engine and
/// facade can be driven by an in-process fake in tests.
#[async_trait]
pub trait RemoteCheckInApi: Send + Sync {
    async fn check_in(&self, qr_code_hash: &str, event_id: Option<&str>) -> RemoteOutcome;

    /// Lightweight reachability probe. Default maps a check of the health
    /// endpoint; fakes can just answer.
    async fn is_reachable(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly transient message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach check-in authority at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid authority URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Terminal not authorized".to_string(),
        404 => "Check-in endpoint not found".to_string(),
        s if s >= 500 => format!("Check-in authority server error (HTTP {s})"),
        s => format!("Unexpected response from check-in authority (HTTP {s})"),
    }
}

/// Pull the most specific error message out of a response body.
fn extract_message(body: &str, fallback: String) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        if let Some(msg) = json
            .get("error")
            .or_else(|| json.get("message"))
            .and_then(Value::as_str)
        {
            return msg.to_string();
        }
    }
    fallback
}

/// Does this body say the code was already consumed? The authority signals
/// replay either with a 409 or with an `alreadyCheckedIn` flag.
fn is_already_checked_in(body: &Value) -> bool {
    body.get("alreadyCheckedIn")
        .and_then(Value::as_bool)
        .unwrap_or(false)
        || body
            .get("code")
            .and_then(Value::as_str)
            .is_some_and(|c| c == "already_checked_in")
}

/// Classify a response into an outcome. Pure so it is testable without a
/// live server.
fn classify_response(status: StatusCode, body: &str) -> RemoteOutcome {
    if status.is_success() {
        let json: Value = serde_json::from_str(body).unwrap_or(Value::Null);
        return RemoteOutcome::Success(CheckInConfirmation {
            reservation: json.get("reservation").cloned().filter(|v| !v.is_null()),
            table_location: json
                .get("tableLocation")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }

    if status.is_server_error() || status.as_u16() == 429 {
        return RemoteOutcome::Transient(extract_message(body, status_error(status)));
    }

    // 4xx. A duplicate submission is an idempotent replay, not a failure.
    let json: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    if status.as_u16() == 409 && is_already_checked_in(&json) {
        return RemoteOutcome::Success(CheckInConfirmation {
            reservation: json.get("reservation").cloned().filter(|v| !v.is_null()),
            table_location: json
                .get("tableLocation")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }

    RemoteOutcome::Business(extract_message(body, status_error(status)))
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// reqwest-backed client for the check-in authority.
pub struct CheckInClient {
    base_url: String,
    api_key: String,
    terminal_id: String,
    client: Client,
    probe_client: Client,
}

impl CheckInClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        terminal_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Self, String> {
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;
        let probe_client = Client::builder()
            .timeout(CONNECTIVITY_TIMEOUT)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;

        Ok(CheckInClient {
            base_url: normalize_base_url(base_url),
            api_key: api_key.to_string(),
            terminal_id: terminal_id.to_string(),
            client,
            probe_client,
        })
    }
}

#[async_trait]
impl RemoteCheckInApi for CheckInClient {
    async fn check_in(&self, qr_code_hash: &str, event_id: Option<&str>) -> RemoteOutcome {
        let url = format!("{}/api/events/check-in", self.base_url);

        let mut payload = serde_json::json!({ "qrCodeHash": qr_code_hash });
        if let Some(ev) = event_id {
            payload["eventId"] = Value::String(ev.to_string());
        }

        let resp = match self
            .client
            .post(&url)
            .header("X-Event-API-Key", &self.api_key)
            .header("x-terminal-id", &self.terminal_id)
            .json(&payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                let msg = friendly_error(&self.base_url, &e);
                warn!(qr_code_hash, error = %msg, "Check-in request failed");
                return RemoteOutcome::Transient(msg);
            }
        };

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        debug!(qr_code_hash, status = status.as_u16(), "Check-in response");
        classify_response(status, &body)
    }

    async fn is_reachable(&self) -> bool {
        let url = format!("{}/api/health", self.base_url);
        match self
            .probe_client
            .get(&url)
            .header("X-Event-API-Key", &self.api_key)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
