// src/hosting.rs

use crate::error::{ClientError, HostingError};
use crate::model::Languages;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Read-only access to the hosting provider's REST API
pub trait HostingApi {
    fn get_json(&self, path: &str) -> Result<Value, HostingError>;
}

/// Blocking GitHub REST client
#[derive(Debug, Clone)]
pub struct GitHubApi {
    client: Client,
    base_url: String,
}

impl GitHubApi {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }
}

impl HostingApi for GitHubApi {
    fn get_json(&self, path: &str) -> Result<Value, HostingError> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "GET");

        let transport = |source| HostingError::Transport { path: path.to_string(), source };
        let response = self.client.get(&url).send().map_err(transport)?;
        let status = response.status();

        if !status.is_success() {
            let headers = response.headers();
            let rate_limited = headers.get("x-ratelimit-remaining").is_some_and(|remaining| remaining.as_bytes() == b"0");
            let retry_after = requested_wait(headers, rate_limited, Utc::now());
            let message = response.text().unwrap_or_default();
            return Err(HostingError::Status { path: path.to_string(), status: status.as_u16(), message, rate_limited, retry_after });
        }

        response.json().map_err(transport)
    }
}

/// How long the API asked us to wait: `Retry-After` seconds, or, once the
/// rate limit is exhausted, the time left until `x-ratelimit-reset`
fn requested_wait(headers: &HeaderMap, rate_limited: bool, now: DateTime<Utc>) -> Option<Duration> {
    let seconds = |name: &str| -> Option<i64> { headers.get(name)?.to_str().ok()?.trim().parse().ok() };

    if let Some(retry_after) = seconds(RETRY_AFTER.as_str()) {
        return Some(Duration::from_secs(retry_after.max(0).unsigned_abs()));
    }
    if !rate_limited {
        return None;
    }
    let reset_at = DateTime::from_timestamp(seconds("x-ratelimit-reset")?, 0)?;
    Some((reset_at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Pauses between retry attempts
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Bounded retry with exponential backoff for transient hosting errors.
/// A wait requested by the API replaces a shorter backoff, up to `max_wait`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_wait: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given zero-based failed attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Pause after a failed attempt, honoring any wait the API requested
    pub fn delay(&self, attempt: u32, error: &HostingError) -> Duration {
        let backoff = self.backoff(attempt);
        match error.retry_after() {
            Some(requested) => backoff.max(requested).min(self.max_wait.max(backoff)),
            None => backoff,
        }
    }

    /// Runs `operation` until it succeeds, fails permanently, or the attempts run out.
    /// The last error is returned once the bound is reached.
    pub fn run<T, S, F>(&self, sleeper: &S, operation_name: &str, mut operation: F) -> Result<T, HostingError>
    where
        S: Sleeper,
        F: FnMut() -> Result<T, HostingError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.delay(attempt, &e);
                    warn!(operation = operation_name, attempt, error = %e, backoff_ms = delay.as_millis() as u64, "retrying");
                    sleeper.sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Hosting-side facts about repositories of one owner
#[derive(Debug)]
pub struct Aggregator<A, S> {
    api: A,
    owner: String,
    policy: RetryPolicy,
    sleeper: S,
}

impl<A: HostingApi, S: Sleeper> Aggregator<A, S> {
    pub fn new(api: A, owner: &str, policy: RetryPolicy, sleeper: S) -> Self {
        Self { api, owner: owner.to_string(), policy, sleeper }
    }

    /// Bytes of code per language, keyed by lowercased language name, in the API's order
    pub fn languages(&self, repo: &str) -> Result<Languages, HostingError> {
        let path = format!("/repos/{}/{repo}/languages", self.owner);
        let body = self.policy.run(&self.sleeper, "languages", || self.api.get_json(&path))?;

        let Value::Object(entries) = body else {
            return Err(HostingError::Payload { path, message: "expected an object of language byte counts".into() });
        };

        let mut languages = Languages::new();
        for (name, bytes) in entries {
            let Value::Number(bytes) = bytes else {
                return Err(HostingError::Payload { path, message: format!("byte count for {name} is not a number") });
            };
            languages.insert(name.to_lowercase(), bytes.to_string());
        }
        Ok(languages)
    }

    /// The repository's `created_at` timestamp as reported by the API
    pub fn creation_date(&self, repo: &str) -> Result<String, HostingError> {
        let path = format!("/repos/{}/{repo}", self.owner);
        let body = self.policy.run(&self.sleeper, "creation_date", || self.api.get_json(&path))?;

        match body.get("created_at").and_then(Value::as_str) {
            Some(created_at) => Ok(created_at.to_string()),
            None => Err(HostingError::Payload { path, message: "missing created_at".into() }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::collections::{HashMap, VecDeque};

    /// Scripted API: each path answers with its queued responses in order, then 404
    #[derive(Default)]
    pub(crate) struct FakeApi {
        responses: RefCell<HashMap<String, VecDeque<Result<Value, HostingError>>>>,
        pub calls: Cell<usize>,
    }

    impl FakeApi {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(self, path: &str, body: Value) -> Self {
            self.push(path, Ok(body))
        }

        pub fn fail(self, path: &str, status: u16) -> Self {
            let err = HostingError::Status { path: path.to_string(), status, message: "boom".into(), rate_limited: false, retry_after: None };
            self.push(path, Err(err))
        }

        /// A 403 with the rate limit exhausted and the given wait requested
        pub fn rate_limit(self, path: &str, wait: Duration) -> Self {
            let err = HostingError::Status {
                path: path.to_string(),
                status: 403,
                message: "API rate limit exceeded".into(),
                rate_limited: true,
                retry_after: Some(wait),
            };
            self.push(path, Err(err))
        }

        fn push(self, path: &str, response: Result<Value, HostingError>) -> Self {
            self.responses.borrow_mut().entry(path.to_string()).or_default().push_back(response);
            self
        }
    }

    impl HostingApi for FakeApi {
        fn get_json(&self, path: &str) -> Result<Value, HostingError> {
            self.calls.set(self.calls.get() + 1);
            self.responses
                .borrow_mut()
                .get_mut(path)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| {
                    Err(HostingError::Status {
                        path: path.to_string(),
                        status: 404,
                        message: "Not Found".into(),
                        rate_limited: false,
                        retry_after: None,
                    })
                })
        }
    }

    /// Records requested delays instead of sleeping
    #[derive(Default)]
    pub(crate) struct NoSleep {
        pub slept: RefCell<Vec<Duration>>,
    }

    impl Sleeper for NoSleep {
        fn sleep(&self, duration: Duration) {
            self.slept.borrow_mut().push(duration);
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
            max_wait: Duration::from_secs(60),
        }
    }

    #[test]
    fn languages_are_lowercased_and_stringified() {
        let api = FakeApi::new().respond("/repos/acme/tech-radar/languages", json!({"Kotlin": 5000, "Python": 4000}));
        let hosting = Aggregator::new(api, "acme", policy(3), NoSleep::default());

        let languages = hosting.languages("tech-radar").unwrap();

        let expected: Languages = [("kotlin".to_string(), "5000".to_string()), ("python".to_string(), "4000".to_string())].into();
        assert_eq!(languages, expected);
    }

    #[test]
    fn languages_keep_largest_first_order() {
        let body = serde_json::from_str(r#"{"Python": 90000, "Kotlin": 5000, "Dockerfile": 120}"#).unwrap();
        let api = FakeApi::new().respond("/repos/acme/tech-radar/languages", body);
        let hosting = Aggregator::new(api, "acme", policy(3), NoSleep::default());

        let languages = hosting.languages("tech-radar").unwrap();

        assert_eq!(languages.keys().collect::<Vec<_>>(), vec!["python", "kotlin", "dockerfile"]);
        assert_eq!(serde_json::to_string(&languages).unwrap(), r#"{"python":"90000","kotlin":"5000","dockerfile":"120"}"#);
    }

    #[test]
    fn repository_without_languages_yields_empty_map() {
        let api = FakeApi::new().respond("/repos/acme/zero-lang-repo/languages", json!({}));
        let hosting = Aggregator::new(api, "acme", policy(3), NoSleep::default());

        assert!(hosting.languages("zero-lang-repo").unwrap().is_empty());
    }

    #[test]
    fn creation_date_is_read_from_repository() {
        let api = FakeApi::new().respond("/repos/acme/tech-radar", json!({"created_at": "2022-04-08T17:46:53Z", "name": "tech-radar"}));
        let hosting = Aggregator::new(api, "acme", policy(3), NoSleep::default());

        assert_eq!(hosting.creation_date("tech-radar").unwrap(), "2022-04-08T17:46:53Z");
    }

    #[test]
    fn transient_failures_are_retried_with_backoff() {
        let api = FakeApi::new()
            .fail("/repos/acme/tech-radar", 502)
            .fail("/repos/acme/tech-radar", 503)
            .respond("/repos/acme/tech-radar", json!({"created_at": "2022-04-08T17:46:53Z"}));
        let hosting = Aggregator::new(api, "acme", policy(3), NoSleep::default());

        assert_eq!(hosting.creation_date("tech-radar").unwrap(), "2022-04-08T17:46:53Z");
        assert_eq!(*hosting.sleeper.slept.borrow(), vec![Duration::from_millis(100), Duration::from_millis(200)]);
    }

    #[test]
    fn last_error_surfaces_after_attempts_run_out() {
        let api = FakeApi::new()
            .fail("/repos/acme/tech-radar", 500)
            .fail("/repos/acme/tech-radar", 500)
            .fail("/repos/acme/tech-radar", 503);
        let hosting = Aggregator::new(api, "acme", policy(3), NoSleep::default());

        let err = hosting.creation_date("tech-radar").unwrap_err();

        assert!(matches!(err, HostingError::Status { status: 503, .. }));
        assert_eq!(hosting.api.calls.get(), 3);
    }

    #[test]
    fn permanent_failures_are_not_retried() {
        let hosting = Aggregator::new(FakeApi::new(), "acme", policy(5), NoSleep::default());

        let err = hosting.languages("missing").unwrap_err();

        assert!(matches!(err, HostingError::Status { status: 404, .. }));
        assert_eq!(hosting.api.calls.get(), 1);
        assert!(hosting.sleeper.slept.borrow().is_empty());
    }

    #[test]
    fn rate_limit_waits_as_long_as_the_api_asks() {
        let api = FakeApi::new()
            .rate_limit("/repos/acme/tech-radar", Duration::from_secs(42))
            .respond("/repos/acme/tech-radar", json!({"created_at": "2022-04-08T17:46:53Z"}));
        let hosting = Aggregator::new(api, "acme", policy(3), NoSleep::default());

        assert_eq!(hosting.creation_date("tech-radar").unwrap(), "2022-04-08T17:46:53Z");
        assert_eq!(*hosting.sleeper.slept.borrow(), vec![Duration::from_secs(42)]);
    }

    #[test]
    fn requested_wait_is_capped() {
        let api = FakeApi::new()
            .rate_limit("/repos/acme/tech-radar", Duration::from_secs(7200))
            .respond("/repos/acme/tech-radar", json!({"created_at": "2022-04-08T17:46:53Z"}));
        let hosting = Aggregator::new(api, "acme", policy(3), NoSleep::default());

        hosting.creation_date("tech-radar").unwrap();

        assert_eq!(*hosting.sleeper.slept.borrow(), vec![Duration::from_secs(60)]);
    }

    #[test]
    fn wait_is_read_from_retry_after_or_reset_headers() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("17"));
        assert_eq!(requested_wait(&headers, false, now), Some(Duration::from_secs(17)));

        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1700000090"));
        assert_eq!(requested_wait(&headers, true, now), Some(Duration::from_secs(90)));
        assert_eq!(requested_wait(&headers, false, now), None);

        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1699999000"));
        assert_eq!(requested_wait(&headers, true, now), Some(Duration::ZERO));
        assert_eq!(requested_wait(&HeaderMap::new(), true, now), None);
    }

    #[test]
    fn token_that_is_not_a_header_value_is_rejected() {
        assert!(matches!(GitHubApi::new(DEFAULT_API_URL, Some("ghp_abc\ndef")), Err(ClientError::InvalidToken(_))));
        assert!(GitHubApi::new(DEFAULT_API_URL, Some("ghp_abcdef")).is_ok());
        assert!(GitHubApi::new(DEFAULT_API_URL, None).is_ok());
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = policy(10);
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(300));
        assert_eq!(policy.backoff(31), Duration::from_millis(300));
    }

    #[test]
    fn non_numeric_byte_count_is_rejected() {
        let api = FakeApi::new().respond("/repos/acme/odd/languages", json!({"Rust": "lots"}));
        let hosting = Aggregator::new(api, "acme", policy(1), NoSleep::default());

        assert!(matches!(hosting.languages("odd"), Err(HostingError::Payload { .. })));
    }
}
