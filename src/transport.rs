//! REST and GraphQL transport with token rotation and backoff.
//!
//! Every call goes through one retry loop that classifies each outcome:
//!
//! | Outcome | Action |
//! |---------|--------|
//! | `2xx` | return, reset rotation bookkeeping |
//! | `401` | rotate to the next token and retry at once; with no other token, return |
//! | `403`/`429` with quota signal | rotate; after a full cycle sleep the exhausted interval |
//! | `403`/`429` otherwise | wait `Retry-After` / reset / backoff, capped, jittered |
//! | `400`/`404`/`410`/`422` | terminal, log and return |
//! | other status, network error | exponential backoff until attempts run out |
//!
//! A quota signal is `X-RateLimit-Remaining: 0` or a numeric
//! `X-RateLimit-Reset` header.
//!
//! GraphQL calls share the loop. A response carrying a top-level `errors`
//! list is a hard failure and is never retried.
//!
//! The wire is behind [`HttpSend`] and waiting is behind [`Sleeper`], so the
//! whole state machine runs against in-memory doubles in tests.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::credentials::{CredentialRotator, Rotation};

const TERMINAL_STATUSES: [u16; 4] = [400, 404, 410, 422];
const REST_ACCEPT: &str = "application/vnd.github.v3+json";
const GRAPHQL_ACCEPT: &str = "application/vnd.github+json";

/// Classified transport failures, wrapped in `anyhow::Error` when returned.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP {status} for {url}: {message}")]
    Status {
        status: u16,
        url: String,
        message: String,
    },
    #[error("GraphQL errors: {0}")]
    GraphQl(String),
    #[error("request failed after retries: {url}")]
    RetriesExhausted { url: String },
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A fully-read response. Header names are stored lowercase.
#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .with_context(|| format!("Failed to decode response body (HTTP {})", self.status))
    }

    /// `message`/`error` from a JSON error body, else the first 300 chars.
    pub fn error_message(&self) -> String {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&self.body) {
            for key in ["message", "error"] {
                if let Some(Value::String(s)) = map.get(key) {
                    return s.clone();
                }
            }
        }
        self.body.trim().chars().take(300).collect()
    }
}

/// Sends one request and reads the whole response.
///
/// `Err` means the request never produced an HTTP status (DNS, TLS, timeout).
pub trait HttpSend {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

/// Blocking reqwest client.
pub struct ReqwestSender {
    client: reqwest::blocking::Client,
}

impl ReqwestSender {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl HttpSend for ReqwestSender {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text()?;
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub max_wait_on_403: Duration,
    pub exhausted_wait: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config, token_count: usize) -> Self {
        Self {
            max_retries: config.retry.effective_max_retries(token_count),
            backoff_base: config.retry.backoff_base(),
            max_wait_on_403: config.retry.max_wait_on_403(),
            exhausted_wait: config.retry.exhausted_wait(),
        }
    }

    /// `base * 2^(attempt-1)` before jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

/// Scale by a uniform factor in `[0.75, 1.25)`.
pub fn jittered(base: Duration) -> Duration {
    let factor = 1.0 + 0.25 * (2.0 * fastrand::f64() - 1.0);
    base.mul_f64(factor)
}

/// Rate-limit headers of a 403/429 response.
#[derive(Debug, Default)]
struct RateLimitSignal {
    remaining: Option<String>,
    reset_epoch: Option<i64>,
    retry_after: Option<u64>,
}

impl RateLimitSignal {
    fn from_response(response: &ApiResponse) -> Self {
        Self {
            remaining: response
                .header("x-ratelimit-remaining")
                .map(|s| s.trim().to_string()),
            reset_epoch: response
                .header("x-ratelimit-reset")
                .and_then(|s| s.trim().parse().ok()),
            retry_after: response
                .header("retry-after")
                .and_then(|s| s.trim().parse().ok()),
        }
    }

    fn quota_exhausted(&self) -> bool {
        self.remaining.as_deref() == Some("0") || self.reset_epoch.is_some()
    }

    fn wait_hint(&self, now_epoch: i64) -> Option<Duration> {
        if let Some(secs) = self.retry_after {
            return Some(Duration::from_secs(secs));
        }
        self.reset_epoch
            .map(|reset| Duration::from_secs((reset - now_epoch).max(0) as u64 + 1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiKind {
    Rest,
    GraphQl,
}

/// Last thing an attempt produced, returned when attempts run out.
enum LastOutcome {
    Response(ApiResponse),
    Failed(anyhow::Error),
}

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<GraphQlErrorItem>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorItem {
    #[serde(default)]
    message: Option<String>,
}

pub struct Transport {
    sender: Box<dyn HttpSend>,
    sleeper: Box<dyn Sleeper>,
    credentials: CredentialRotator,
    policy: RetryPolicy,
    user_agent: String,
    graphql_url: String,
}

impl Transport {
    pub fn new(
        sender: Box<dyn HttpSend>,
        sleeper: Box<dyn Sleeper>,
        credentials: CredentialRotator,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            sender,
            sleeper,
            credentials,
            policy,
            user_agent: "forge-harvest/0.1".to_string(),
            graphql_url: "https://api.github.com/graphql".to_string(),
        }
    }

    /// Production transport: reqwest over the wire, real sleeps.
    pub fn from_config(config: &Config, tokens: Vec<String>) -> Result<Self> {
        let credentials = CredentialRotator::new(tokens);
        let policy = RetryPolicy::from_config(config, credentials.len());
        let sender = ReqwestSender::new(Duration::from_secs(config.github.timeout_secs))?;
        Ok(Self::new(Box::new(sender), Box::new(ThreadSleeper), credentials, policy)
            .with_user_agent(&config.github.user_agent)
            .with_graphql_url(&config.github.graphql_url))
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    pub fn with_graphql_url(mut self, url: &str) -> Self {
        self.graphql_url = url.to_string();
        self
    }

    pub fn credentials(&self) -> &CredentialRotator {
        &self.credentials
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn get(&mut self, url: &str) -> Result<ApiResponse> {
        self.request(Method::GET, url)
    }

    /// REST call. Non-2xx responses that are terminal or outlast the retry
    /// budget are returned as-is; only exhausted network failures are `Err`.
    pub fn request(&mut self, method: Method, url: &str) -> Result<ApiResponse> {
        self.execute(ApiKind::Rest, method, url, None)
    }

    /// GraphQL call returning `data`. Any non-2xx or top-level `errors` is `Err`.
    pub fn graphql(&mut self, query: &str, variables: Value) -> Result<Value> {
        let payload = json!({ "query": query, "variables": variables });
        let url = self.graphql_url.clone();
        let response = self.execute(ApiKind::GraphQl, Method::POST, &url, Some(payload))?;

        if !response.is_success() {
            return Err(TransportError::Status {
                status: response.status,
                url,
                message: response.error_message(),
            }
            .into());
        }

        let envelope: GraphQlEnvelope = response.json()?;
        if let Some(errors) = envelope.errors.filter(|e| !e.is_empty()) {
            let messages: Vec<String> = errors
                .into_iter()
                .map(|e| e.message.unwrap_or_else(|| "unknown error".to_string()))
                .collect();
            return Err(TransportError::GraphQl(messages.join("; ")).into());
        }
        Ok(envelope.data.unwrap_or_else(|| json!({})))
    }

    fn build_request(
        &self,
        kind: ApiKind,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> ApiRequest {
        let mut headers = vec![("User-Agent".to_string(), self.user_agent.clone())];
        match kind {
            ApiKind::Rest => {
                headers.push(("Accept".to_string(), REST_ACCEPT.to_string()));
                if let Some(token) = self.credentials.current() {
                    headers.push(("Authorization".to_string(), format!("token {}", token)));
                }
            }
            ApiKind::GraphQl => {
                headers.push(("Accept".to_string(), GRAPHQL_ACCEPT.to_string()));
                headers.push(("Content-Type".to_string(), "application/json".to_string()));
                if let Some(token) = self.credentials.current() {
                    headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
                }
            }
        }
        ApiRequest {
            method,
            url: url.to_string(),
            headers,
            body: body.cloned(),
        }
    }

    fn execute(
        &mut self,
        kind: ApiKind,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<ApiResponse> {
        let max_attempts = self.policy.max_retries.max(1);
        let mut last: Option<LastOutcome> = None;

        for attempt in 1..=max_attempts {
            let request = self.build_request(kind, method.clone(), url, body.as_ref());
            debug!("{} {} (attempt {}/{})", request.method, url, attempt, max_attempts);

            let response = match self.sender.send(&request) {
                Ok(response) => response,
                Err(e) => {
                    let delay = jittered(self.policy.backoff_delay(attempt));
                    warn!(
                        "[retry {}/{}] {:#} -> sleep {:.1}s",
                        attempt,
                        max_attempts,
                        e,
                        delay.as_secs_f64()
                    );
                    if attempt < max_attempts {
                        self.sleeper.sleep(delay);
                    }
                    last = Some(LastOutcome::Failed(e));
                    continue;
                }
            };

            let status = response.status;
            if response.is_success() {
                self.credentials.settle();
                return Ok(response);
            }

            if status == 401 {
                self.credentials.settle();
                if self.credentials.rotate() {
                    info!(
                        "[auth] HTTP 401, switched to token {}/{}",
                        self.credentials.position(),
                        self.credentials.len()
                    );
                    last = Some(LastOutcome::Response(response));
                    continue;
                }
                log_http_error(&response, url);
                return Ok(response);
            }

            if status == 403 || status == 429 {
                let signal = RateLimitSignal::from_response(&response);
                if signal.quota_exhausted() {
                    match self.credentials.rotate_on_rate_limit() {
                        Rotation::Rotated => {
                            info!(
                                "[rate-limit] switched to token {}/{}",
                                self.credentials.position(),
                                self.credentials.len()
                            );
                        }
                        Rotation::Exhausted => {
                            let wait = self.policy.exhausted_wait;
                            warn!(
                                "[rate-limit] all {} token(s) exhausted, sleeping {}s",
                                self.credentials.len(),
                                wait.as_secs()
                            );
                            if attempt < max_attempts {
                                self.sleeper.sleep(wait);
                            }
                        }
                    }
                    last = Some(LastOutcome::Response(response));
                    continue;
                }

                let now = chrono::Utc::now().timestamp();
                let wait = signal
                    .wait_hint(now)
                    .unwrap_or_else(|| self.policy.backoff_delay(attempt))
                    .min(self.policy.max_wait_on_403);
                warn!("[backoff {}] waiting {}s for {}", status, wait.as_secs(), url);
                self.credentials.settle();
                if attempt < max_attempts {
                    self.sleeper.sleep(jittered(wait));
                }
                last = Some(LastOutcome::Response(response));
                continue;
            }

            if TERMINAL_STATUSES.contains(&status) {
                self.credentials.settle();
                log_http_error(&response, url);
                return Ok(response);
            }

            self.credentials.settle();
            if attempt < max_attempts {
                let delay = jittered(self.policy.backoff_delay(attempt));
                warn!(
                    "[retry {}/{}] HTTP {} for {} -> sleep {:.1}s",
                    attempt,
                    max_attempts,
                    status,
                    url,
                    delay.as_secs_f64()
                );
                self.sleeper.sleep(delay);
                last = Some(LastOutcome::Response(response));
                continue;
            }
            log_http_error(&response, url);
            return Ok(response);
        }

        match last {
            Some(LastOutcome::Response(response)) => {
                log_http_error(&response, url);
                Ok(response)
            }
            Some(LastOutcome::Failed(e)) => Err(e.context(TransportError::RetriesExhausted {
                url: url.to_string(),
            })),
            None => Err(TransportError::RetriesExhausted {
                url: url.to_string(),
            }
            .into()),
        }
    }
}

pub fn log_http_error(response: &ApiResponse, url: &str) {
    error!(
        "[error] HTTP {} for {} -> {}",
        response.status,
        url,
        response.error_message()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock_transport, MockSender, RecordingSleeper};

    fn rate_limited() -> ApiResponse {
        ApiResponse::new(403, r#"{"message":"API rate limit exceeded"}"#)
            .with_header("X-RateLimit-Remaining", "0")
    }

    fn auth_header(req: &ApiRequest) -> String {
        req.header("authorization").unwrap_or_default().to_string()
    }

    #[test]
    fn success_returns_immediately() {
        let sender = MockSender::new();
        sender.route("/repos/o/r", ApiResponse::new(200, "{}"));
        let sleeper = RecordingSleeper::new();
        let mut t = mock_transport(&sender, &sleeper, &["a"]);

        let resp = t.get("https://api.test/repos/o/r").unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(sender.request_count(), 1);
        assert!(sleeper.durations().is_empty());
        assert_eq!(auth_header(&sender.requests()[0]), "token a");
    }

    #[test]
    fn terminal_status_is_not_retried() {
        let sender = MockSender::new();
        sender.route("/missing", ApiResponse::new(404, r#"{"message":"Not Found"}"#));
        let sleeper = RecordingSleeper::new();
        let mut t = mock_transport(&sender, &sleeper, &["a", "b"]);

        let resp = t.get("https://api.test/missing").unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.error_message(), "Not Found");
        assert_eq!(sender.request_count(), 1);
    }

    #[test]
    fn unauthorized_rotates_without_sleeping() {
        let sender = MockSender::new();
        sender
            .route("/x", ApiResponse::new(401, "{}"))
            .route("/x", ApiResponse::new(200, "[]"));
        let sleeper = RecordingSleeper::new();
        let mut t = mock_transport(&sender, &sleeper, &["a", "b"]);

        assert_eq!(t.get("https://api.test/x").unwrap().status, 200);
        let reqs = sender.requests();
        assert_eq!(auth_header(&reqs[0]), "token a");
        assert_eq!(auth_header(&reqs[1]), "token b");
        assert!(sleeper.durations().is_empty());
    }

    #[test]
    fn unauthorized_single_token_returns() {
        let sender = MockSender::new();
        sender.route("/x", ApiResponse::new(401, "{}"));
        let sleeper = RecordingSleeper::new();
        let mut t = mock_transport(&sender, &sleeper, &["a"]);

        assert_eq!(t.get("https://api.test/x").unwrap().status, 401);
        assert_eq!(sender.request_count(), 1);
    }

    #[test]
    fn rate_limit_rotation_stops_after_one_cycle() {
        let sender = MockSender::new();
        sender.route("/x", rate_limited());
        let sleeper = RecordingSleeper::new();
        let mut t = mock_transport(&sender, &sleeper, &["a", "b", "c"]);

        let resp = t.get("https://api.test/x").unwrap();
        assert_eq!(resp.status, 403);

        // Budget is max(6, 2 * 3) attempts: a b c (sleep) a b c.
        let tokens: Vec<String> = sender.requests().iter().map(auth_header).collect();
        assert_eq!(
            tokens,
            vec!["token a", "token b", "token c", "token a", "token b", "token c"]
        );
        let exhausted = t.policy().exhausted_wait;
        assert_eq!(sleeper.durations(), vec![exhausted]);
    }

    #[test]
    fn rate_limit_with_one_token_sleeps_then_recovers() {
        let sender = MockSender::new();
        sender.route("/x", rate_limited()).route("/x", ApiResponse::new(200, "{}"));
        let sleeper = RecordingSleeper::new();
        let mut t = mock_transport(&sender, &sleeper, &["a"]);

        assert_eq!(t.get("https://api.test/x").unwrap().status, 200);
        assert_eq!(sleeper.durations(), vec![t.policy().exhausted_wait]);
    }

    #[test]
    fn retry_after_is_capped_and_jittered() {
        let sender = MockSender::new();
        sender
            .route("/x", ApiResponse::new(429, "{}").with_header("Retry-After", "100000"))
            .route("/x", ApiResponse::new(200, "{}"));
        let sleeper = RecordingSleeper::new();
        let mut t = mock_transport(&sender, &sleeper, &["a"]);

        assert_eq!(t.get("https://api.test/x").unwrap().status, 200);
        let cap = t.policy().max_wait_on_403;
        let slept = sleeper.durations();
        assert_eq!(slept.len(), 1);
        assert!(slept[0] >= cap.mul_f64(0.75) && slept[0] <= cap.mul_f64(1.25));
    }

    #[test]
    fn server_errors_back_off_exponentially() {
        let sender = MockSender::new();
        sender
            .route("/x", ApiResponse::new(502, "bad gateway"))
            .route("/x", ApiResponse::new(503, "unavailable"))
            .route("/x", ApiResponse::new(200, "{}"));
        let sleeper = RecordingSleeper::new();
        let mut t = mock_transport(&sender, &sleeper, &["a"]);

        assert_eq!(t.get("https://api.test/x").unwrap().status, 200);
        let base = t.policy().backoff_base;
        let slept = sleeper.durations();
        assert_eq!(slept.len(), 2);
        assert!(slept[0] >= base.mul_f64(0.75) && slept[0] <= base.mul_f64(1.25));
        let doubled = base * 2;
        assert!(slept[1] >= doubled.mul_f64(0.75) && slept[1] <= doubled.mul_f64(1.25));
    }

    #[test]
    fn exhausted_network_failures_surface_as_error() {
        let sender = MockSender::new();
        sender.fail("/x", "connection reset");
        let sleeper = RecordingSleeper::new();
        let mut t = mock_transport(&sender, &sleeper, &["a"]);

        let err = t.get("https://api.test/x").unwrap_err();
        assert!(format!("{:#}", err).contains("connection reset"));
        assert_eq!(sender.request_count(), t.policy().max_retries as usize);
    }

    #[test]
    fn persistent_server_error_returns_last_response() {
        let sender = MockSender::new();
        sender
            .route("/x", ApiResponse::new(502, "first"))
            .route("/x", ApiResponse::new(500, "boom"));
        let sleeper = RecordingSleeper::new();
        let mut t = mock_transport(&sender, &sleeper, &[]);

        let resp = t.get("https://api.test/x").unwrap();
        assert_eq!(resp.status, 500);
        assert_eq!(resp.body, "boom");
        assert_eq!(sender.request_count(), 6);

        // One sleep between each pair of attempts, none after the last.
        let base = t.policy().backoff_base;
        let slept = sleeper.durations();
        assert_eq!(slept.len(), 5);
        for (i, delay) in slept.iter().enumerate() {
            let expected = base * (1u32 << i);
            assert!(
                *delay >= expected.mul_f64(0.75) && *delay <= expected.mul_f64(1.25),
                "sleep {} was {:?}, expected about {:?}",
                i,
                delay,
                expected
            );
        }
    }

    #[test]
    fn forbidden_with_retry_after_waits_on_same_token() {
        let sender = MockSender::new();
        sender
            .route("/x", ApiResponse::new(403, r#"{"message":"secondary rate limit"}"#).with_header("Retry-After", "30"))
            .route("/x", ApiResponse::new(200, "{}"));
        let sleeper = RecordingSleeper::new();
        let mut t = mock_transport(&sender, &sleeper, &["a", "b"]);

        assert_eq!(t.get("https://api.test/x").unwrap().status, 200);
        let tokens: Vec<String> = sender.requests().iter().map(auth_header).collect();
        assert_eq!(tokens, vec!["token a", "token a"]);

        let slept = sleeper.durations();
        assert_eq!(slept.len(), 1);
        let hint = Duration::from_secs(30);
        assert!(slept[0] >= hint.mul_f64(0.75) && slept[0] <= hint.mul_f64(1.25));
    }

    #[test]
    fn forbidden_retry_after_is_capped() {
        let sender = MockSender::new();
        sender
            .route("/x", ApiResponse::new(403, "{}").with_header("Retry-After", "7200"))
            .route("/x", ApiResponse::new(200, "{}"));
        let sleeper = RecordingSleeper::new();
        let mut t = mock_transport(&sender, &sleeper, &["a", "b"]);

        assert_eq!(t.get("https://api.test/x").unwrap().status, 200);
        assert_eq!(auth_header(&sender.requests()[1]), "token a");
        let cap = t.policy().max_wait_on_403;
        let slept = sleeper.durations();
        assert_eq!(slept.len(), 1);
        assert!(slept[0] >= cap.mul_f64(0.75) && slept[0] <= cap.mul_f64(1.25));
    }

    #[test]
    fn graphql_errors_fail_hard() {
        let sender = MockSender::new();
        sender.route(
            "/graphql",
            ApiResponse::new(200, r#"{"data":null,"errors":[{"message":"Field 'x' doesn't exist"}]}"#),
        );
        let sleeper = RecordingSleeper::new();
        let mut t = mock_transport(&sender, &sleeper, &["a"]);

        let err = t.graphql("query { x }", json!({})).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TransportError>(),
            Some(TransportError::GraphQl(msg)) if msg.contains("doesn't exist")
        ));
        assert_eq!(sender.request_count(), 1);
        assert_eq!(auth_header(&sender.requests()[0]), "Bearer a");
    }

    #[test]
    fn graphql_returns_data() {
        let sender = MockSender::new();
        sender.route("/graphql", ApiResponse::new(200, r#"{"data":{"viewer":{"login":"ana"}}}"#));
        let sleeper = RecordingSleeper::new();
        let mut t = mock_transport(&sender, &sleeper, &["a"]);

        let data = t.graphql("query { viewer { login } }", json!({})).unwrap();
        assert_eq!(data["viewer"]["login"], "ana");
    }

    #[test]
    fn graphql_terminal_status_is_error() {
        let sender = MockSender::new();
        sender.route("/graphql", ApiResponse::new(422, r#"{"message":"bad"}"#));
        let sleeper = RecordingSleeper::new();
        let mut t = mock_transport(&sender, &sleeper, &["a"]);

        let err = t.graphql("query { x }", json!({})).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TransportError>(),
            Some(TransportError::Status { status: 422, .. })
        ));
    }

    #[test]
    fn reset_header_wait_counts_from_now() {
        let signal = RateLimitSignal {
            remaining: Some("12".into()),
            reset_epoch: Some(1_000),
            retry_after: None,
        };
        assert_eq!(signal.wait_hint(990), Some(Duration::from_secs(11)));
        assert_eq!(signal.wait_hint(2_000), Some(Duration::from_secs(1)));
        assert!(signal.quota_exhausted());
    }
}
