//! HTTP API client.
//!
//! Thin wrapper over [`reqwest::Client`] for the backend's REST surface:
//!
//! | Endpoint | Method | Use |
//! |----------|--------|-----|
//! | `/health` | GET | Latency probe |
//! | `/api/status` | GET | Full telemetry snapshot (`{"robot": {...}}`) |
//! | `/api/images` | GET | Image history, newest last |
//! | `/api/stream` | GET | SSE push channel |
//! | `/api/robot/command` | POST | Command submission |
//!
//! The client carries no overall request timeout because the SSE stream is a
//! long-lived response. Every one-shot request sets its own.

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, Instant};

use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, Response, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{CommandOutcome, PerceptionPayload};

// ============================================================================
// Constants
// ============================================================================

/// Default per-request timeout for one-shot requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const HEALTH_PATH: &str = "health";
const STATUS_PATH: &str = "api/status";
const IMAGES_PATH: &str = "api/images";
const STREAM_PATH: &str = "api/stream";
const COMMAND_PATH: &str = "api/robot/command";

// ============================================================================
// HttpApi
// ============================================================================

/// Client for the backend REST API.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    base: Url,
    request_timeout: Duration,
}

impl HttpApi {
    /// Creates a client rooted at `base` (e.g. `http://localhost:3000`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `base` is not http(s), or
    /// [`Error::Http`] if the TLS backend fails to initialize.
    pub fn new(base: Url, connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "API URL must be http(s), got '{}'",
                base.scheme()
            )));
        }

        let client = Client::builder().connect_timeout(connect_timeout).build()?;

        Ok(Self {
            client,
            base: normalize_base(base),
            request_timeout,
        })
    }

    /// Creates a client with default timeouts.
    ///
    /// # Errors
    ///
    /// See [`HttpApi::new`].
    pub fn with_defaults(base: Url) -> Result<Self> {
        Self::new(base, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Base URL (always ends with `/`).
    #[inline]
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    // ========================================================================
    // Endpoints
    // ========================================================================

    /// Measures round-trip time of `GET /health`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure or [`Error::Unavailable`]
    /// on a non-2xx status.
    pub async fn health(&self) -> Result<Duration> {
        let started = Instant::now();
        let response = self
            .client
            .get(self.endpoint(HEALTH_PATH)?)
            .header(CACHE_CONTROL, "no-store")
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::unavailable(status.as_u16()));
        }

        let elapsed = started.elapsed();
        trace!(latency = ?elapsed, "Health probe answered");
        Ok(elapsed)
    }

    /// Fetches the full telemetry snapshot from `GET /api/status`.
    ///
    /// Returns `None` when the body carries no `robot` object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure or a non-2xx status.
    pub async fn status(&self) -> Result<Option<Map<String, Value>>> {
        let body: Value = self
            .client
            .get(self.endpoint(STATUS_PATH)?)
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let robot = match body {
            Value::Object(mut map) => match map.remove("robot") {
                Some(Value::Object(robot)) => Some(robot),
                _ => None,
            },
            _ => None,
        };
        Ok(robot)
    }

    /// Fetches the newest image record from `GET /api/images`.
    ///
    /// Accepts either a bare array or `{"images": [...]}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure or a non-2xx status.
    pub async fn last_image(&self) -> Result<Option<PerceptionPayload>> {
        let body: Value = self
            .client
            .get(self.endpoint(IMAGES_PATH)?)
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let images = match &body {
            Value::Array(items) => Some(items),
            Value::Object(map) => map.get("images").and_then(Value::as_array),
            _ => None,
        };

        Ok(images
            .and_then(|items| items.last())
            .map(PerceptionPayload::from_value)
            .filter(|payload| payload.url.is_some()))
    }

    /// Opens the SSE push stream (`GET /api/stream`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure or a non-2xx status.
    pub async fn open_stream(&self) -> Result<Response> {
        let response = self
            .client
            .get(self.endpoint(STREAM_PATH)?)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?
            .error_for_status()?;
        Ok(response)
    }

    /// Posts a command body to `POST /api/robot/command` and classifies the
    /// answer.
    ///
    /// # Errors
    ///
    /// Network failures and gateway-class statuses are errors, never
    /// outcomes; see [`classify_response`].
    pub async fn post_command(&self, body: &Value) -> Result<CommandOutcome> {
        let response = self
            .client
            .post(self.endpoint(COMMAND_PATH)?)
            .json(body)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        debug!(status = status.as_u16(), "Command answered");
        classify_response(status, &text)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Ensures the base path ends with `/` so `join` appends instead of replacing
/// the last segment.
fn normalize_base(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

/// Maps a command response to an outcome.
///
/// | Status | Result |
/// |--------|--------|
/// | 2xx | `Accepted` with the JSON body (`null` if empty or not JSON) |
/// | 408, 429, 502, 503, 504 | `Err(Unavailable)` |
/// | other 4xx / 5xx | `Rejected` with the body's message |
///
/// # Errors
///
/// Returns [`Error::Unavailable`] for transient statuses.
pub fn classify_response(status: StatusCode, body: &str) -> Result<CommandOutcome> {
    if status.is_success() {
        let value = serde_json::from_str(body).unwrap_or(Value::Null);
        return Ok(CommandOutcome::Accepted(value));
    }

    match status {
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => Err(Error::unavailable(status.as_u16())),
        _ => Ok(CommandOutcome::Rejected {
            status: Some(status.as_u16()),
            message: rejection_message(body),
        }),
    }
}

/// Pulls `error`/`message` out of a JSON body, falling back to the raw text.
fn rejection_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["error", "message", "detail"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> HttpApi {
        HttpApi::with_defaults(Url::parse(&server.uri()).expect("url")).expect("client")
    }

    #[test]
    fn test_rejects_non_http_base() {
        let url = Url::parse("ws://localhost:3000").expect("url");
        assert!(matches!(HttpApi::with_defaults(url), Err(Error::Config { .. })));
    }

    #[test]
    fn test_normalize_base_keeps_prefix() {
        let base = normalize_base(Url::parse("http://h/v1").expect("url"));
        assert_eq!(base.join(COMMAND_PATH).expect("join").as_str(), "http://h/v1/api/robot/command");
    }

    #[test]
    fn test_classify_response() {
        assert!(matches!(
            classify_response(StatusCode::OK, r#"{"ok":true}"#),
            Ok(CommandOutcome::Accepted(v)) if v == json!({"ok": true})
        ));
        assert!(matches!(
            classify_response(StatusCode::NO_CONTENT, ""),
            Ok(CommandOutcome::Accepted(Value::Null))
        ));
        assert!(matches!(
            classify_response(StatusCode::BAD_REQUEST, r#"{"error":"unknown task"}"#),
            Ok(CommandOutcome::Rejected { status: Some(400), message }) if message == "unknown task"
        ));
        assert!(matches!(
            classify_response(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            Ok(CommandOutcome::Rejected { status: Some(500), message }) if message == "boom"
        ));
        assert!(matches!(
            classify_response(StatusCode::SERVICE_UNAVAILABLE, ""),
            Err(Error::Unavailable { status: 503 })
        ));
    }

    #[tokio::test]
    async fn test_post_command() {
        let server = MockServer::start().await;
        let body = json!({"robotId": "r1", "task": "stop", "source": "web_ui"});

        Mock::given(method("POST"))
            .and(path("/api/robot/command"))
            .and(body_json(&body))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"queued": true})))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = api(&server).post_command(&body).await.expect("post");
        assert_eq!(outcome, CommandOutcome::Accepted(json!({"queued": true})));
    }

    #[tokio::test]
    async fn test_status_extracts_robot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/status"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"robot": {"battery": 64, "mode": "manual"}})),
            )
            .mount(&server)
            .await;

        let robot = api(&server).status().await.expect("status").expect("robot");
        assert_eq!(robot.get("battery"), Some(&json!(64)));
    }

    #[tokio::test]
    async fn test_last_image_takes_newest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/images"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"url": "/img/1.jpg"},
                {"url": "/img/2.jpg", "description": "pallet"}
            ])))
            .mount(&server)
            .await;

        let image = api(&server).last_image().await.expect("images").expect("image");
        assert_eq!(image.url.as_deref(), Some("/img/2.jpg"));
        assert_eq!(image.description.as_deref(), Some("pallet"));
    }

    #[tokio::test]
    async fn test_health_maps_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = api(&server).health().await.expect_err("502");
        assert!(err.is_connection_error());
    }
}
