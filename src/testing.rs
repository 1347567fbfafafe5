//! In-memory [`HttpSend`] and [`Sleeper`] doubles.
//!
//! Used by the unit tests and by the integration tests under `tests/`, which
//! cannot see `#[cfg(test)]` items.
//!
//! Routes match when every needle occurs in the request URL or in the
//! serialized JSON body; the most specific route (longest needles) wins. Each
//! route replays its queued replies in order and repeats the last one forever.
//! Unrouted requests get a `404`.

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::credentials::CredentialRotator;
use crate::transport::{ApiRequest, ApiResponse, HttpSend, RetryPolicy, Sleeper, Transport};

#[derive(Debug, Clone)]
pub enum Reply {
    Respond(ApiResponse),
    Fail(String),
}

struct Route {
    needles: Vec<String>,
    replies: VecDeque<Reply>,
}

impl Route {
    fn matches(&self, url: &str, body: &str) -> bool {
        self.needles
            .iter()
            .all(|n| url.contains(n.as_str()) || body.contains(n.as_str()))
    }

    fn weight(&self) -> usize {
        self.needles.iter().map(String::len).sum()
    }

    fn next_reply(&mut self) -> Option<Reply> {
        if self.replies.len() > 1 {
            self.replies.pop_front()
        } else {
            self.replies.front().cloned()
        }
    }
}

#[derive(Default)]
struct MockState {
    routes: Vec<Route>,
    log: Vec<ApiRequest>,
}

/// Scripted HTTP backend. Clones share state, so a test keeps one handle
/// while the transport owns another.
#[derive(Clone, Default)]
pub struct MockSender {
    state: Rc<RefCell<MockState>>,
}

impl MockSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, needle: &str, response: ApiResponse) -> &Self {
        self.push(&[needle], Reply::Respond(response))
    }

    /// Respond with `status` and a JSON body.
    pub fn route_json(&self, needle: &str, status: u16, body: Value) -> &Self {
        self.push(&[needle], Reply::Respond(ApiResponse::new(status, body.to_string())))
    }

    /// Route that requires every needle to match.
    pub fn route_all(&self, needles: &[&str], status: u16, body: Value) -> &Self {
        self.push(needles, Reply::Respond(ApiResponse::new(status, body.to_string())))
    }

    pub fn fail(&self, needle: &str, message: &str) -> &Self {
        self.push(&[needle], Reply::Fail(message.to_string()))
    }

    fn push(&self, needles: &[&str], reply: Reply) -> &Self {
        let mut state = self.state.borrow_mut();
        let needles: Vec<String> = needles.iter().map(|n| n.to_string()).collect();
        match state.routes.iter_mut().find(|r| r.needles == needles) {
            Some(route) => route.replies.push_back(reply),
            None => state.routes.push(Route {
                needles,
                replies: VecDeque::from([reply]),
            }),
        }
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.state.borrow().log.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.borrow().log.len()
    }

    /// Requests whose URL or body contains `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.state
            .borrow()
            .log
            .iter()
            .filter(|r| {
                r.url.contains(needle)
                    || r.body
                        .as_ref()
                        .map(|b| b.to_string().contains(needle))
                        .unwrap_or(false)
            })
            .count()
    }
}

impl HttpSend for MockSender {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let mut state = self.state.borrow_mut();
        state.log.push(request.clone());

        let body = request
            .body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();
        let best = state
            .routes
            .iter_mut()
            .filter(|r| r.matches(&request.url, &body))
            .max_by_key(|r| r.weight());

        match best.and_then(|r| r.next_reply()) {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail(message)) => Err(anyhow!(message)),
            None => Ok(ApiResponse::new(404, r#"{"message":"Not Found"}"#)),
        }
    }
}

/// Records requested sleeps without sleeping.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    slept: Rc<RefCell<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.slept.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.borrow_mut().push(duration);
    }
}

/// Transport wired to the doubles, with the production retry budget and
/// `https://api.test/graphql` as the GraphQL endpoint.
pub fn mock_transport(sender: &MockSender, sleeper: &RecordingSleeper, tokens: &[&str]) -> Transport {
    let credentials = CredentialRotator::new(tokens.iter().map(|t| t.to_string()).collect());
    let policy = RetryPolicy {
        max_retries: 6u32.max(2 * credentials.len() as u32),
        backoff_base: Duration::from_secs(2),
        max_wait_on_403: Duration::from_secs(180),
        exhausted_wait: Duration::from_secs(3600),
    };
    Transport::new(Box::new(sender.clone()), Box::new(sleeper.clone()), credentials, policy)
        .with_graphql_url("https://api.test/graphql")
}

/// `n` JSON objects `{"id": start + i}`.
pub fn numbered_page(start: u64, n: usize) -> Value {
    Value::Array(
        (0..n as u64)
            .map(|i| serde_json::json!({ "id": start + i }))
            .collect(),
    )
}
