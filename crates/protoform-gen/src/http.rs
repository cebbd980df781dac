//! Blocking HTTP transport shared by the enhancer and remote providers
//!
//! Maps ureq failures onto the upstream error taxonomy and retries the
//! transient ones (connect errors, 404 "not ready yet", 429, 5xx) with a
//! fixed delay.

use base64::Engine;
use protoform_core::{ProtoformError, Result};
use serde_json::Value;
use std::io::Read;
use std::time::Duration;
use ureq::http::Response;
use ureq::Body;

/// Longest slice of an error body carried into an error message
const BODY_SNIPPET_LEN: usize = 200;

/// How many times a request is attempted, and the pause between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// `max_retries` counts total attempts; zero still makes one attempt
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            attempts: max_retries.max(1),
            delay,
        }
    }

    /// A single attempt
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// A failed attempt and whether it is worth repeating
#[derive(Debug)]
pub(crate) struct Failure {
    pub error: ProtoformError,
    pub retryable: bool,
}

impl Failure {
    pub fn retryable(error: ProtoformError) -> Self {
        Self {
            error,
            retryable: true,
        }
    }

    pub fn fatal(error: ProtoformError) -> Self {
        Self {
            error,
            retryable: false,
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts
pub(crate) fn with_retry<T, F>(policy: RetryPolicy, service: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> std::result::Result<T, Failure>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(failure) if failure.retryable && attempt < policy.attempts => {
                tracing::warn!(
                    service,
                    attempt,
                    max_attempts = policy.attempts,
                    error = %failure.error,
                    "Upstream not ready, retrying"
                );
                attempt += 1;
                std::thread::sleep(policy.delay);
            }
            Err(failure) => return Err(failure.error),
        }
    }
}

/// Status codes that mean "try again shortly"
pub(crate) fn is_retryable_status(code: u16) -> bool {
    matches!(code, 404 | 429 | 500..=599)
}

fn classify(service: &str, e: &ureq::Error) -> Failure {
    match e {
        ureq::Error::Timeout(_) => Failure::fatal(ProtoformError::UpstreamTimeout(format!(
            "{} did not respond in time",
            service
        ))),
        ureq::Error::ConnectionFailed | ureq::Error::HostNotFound | ureq::Error::Io(_) => {
            Failure::retryable(ProtoformError::UpstreamUnavailable(format!(
                "{} is unreachable: {}",
                service, e
            )))
        }
        ureq::Error::StatusCode(code) => Failure {
            error: ProtoformError::generation(format!("{} returned HTTP {}", service, code)),
            retryable: is_retryable_status(*code),
        },
        other => Failure::fatal(ProtoformError::generation(format!(
            "{} request failed: {}",
            service, other
        ))),
    }
}

fn snippet(body: &str) -> &str {
    let body = body.trim();
    match body.char_indices().nth(BODY_SNIPPET_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// An agent bound to one upstream service
pub(crate) struct HttpClient {
    agent: ureq::Agent,
    service: String,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(service: &str, timeout: Duration, retry: RetryPolicy) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: config.into(),
            service: service.to_string(),
            retry,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// POST a JSON payload and parse a JSON reply
    pub fn post_json(&self, url: &str, auth: Option<&str>, payload: &Value) -> Result<Value> {
        with_retry(self.retry, &self.service, || {
            let mut request = self
                .agent
                .post(url)
                .header("Content-Type", "application/json");
            if let Some(auth) = auth {
                request = request.header("Authorization", auth);
            }
            let response = request
                .send_json(payload)
                .map_err(|e| classify(&self.service, &e))?;
            self.read_json(response)
        })
    }

    pub fn get_json(&self, url: &str, auth: Option<&str>) -> Result<Value> {
        with_retry(self.retry, &self.service, || {
            let mut request = self.agent.get(url);
            if let Some(auth) = auth {
                request = request.header("Authorization", auth);
            }
            let response = request.call().map_err(|e| classify(&self.service, &e))?;
            self.read_json(response)
        })
    }

    /// Download a binary payload without the default body size cap
    pub fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        with_retry(self.retry, &self.service, || {
            let response = self
                .agent
                .get(url)
                .call()
                .map_err(|e| classify(&self.service, &e))?;
            let response = self.check_status(response)?;
            let mut reader = response.into_body().into_reader();
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes).map_err(|e| {
                Failure::retryable(ProtoformError::UpstreamUnavailable(format!(
                    "{} download interrupted: {}",
                    self.service, e
                )))
            })?;
            Ok(bytes)
        })
    }

    /// Resolve a result value that is either a URL to download, a data URI,
    /// or a bare base64 payload
    pub fn fetch_payload(&self, value: &str) -> Result<Vec<u8>> {
        let value = value.trim();
        if value.starts_with("http://") || value.starts_with("https://") {
            return self.get_bytes(value);
        }
        decode_base64_payload(value).map_err(|reason| {
            ProtoformError::generation(format!("{} returned {}", self.service, reason))
        })
    }

    fn check_status(
        &self,
        mut response: Response<Body>,
    ) -> std::result::Result<Response<Body>, Failure> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.body_mut().read_to_string().unwrap_or_default();
        let code = status.as_u16();
        tracing::debug!(service = %self.service, code, body = snippet(&body), "Upstream error response");
        Err(Failure {
            error: ProtoformError::generation(format!(
                "{} returned HTTP {}: {}",
                self.service,
                code,
                snippet(&body)
            )),
            retryable: is_retryable_status(code),
        })
    }

    fn read_json(&self, response: Response<Body>) -> std::result::Result<Value, Failure> {
        let mut response = self.check_status(response)?;
        response.body_mut().read_json::<Value>().map_err(|e| {
            Failure::fatal(ProtoformError::generation(format!(
                "{} sent an unreadable response: {}",
                self.service, e
            )))
        })
    }
}

/// Decode a base64 payload, tolerating a `data:...;base64,` prefix
pub(crate) fn decode_base64_payload(value: &str) -> std::result::Result<Vec<u8>, String> {
    let encoded = match value.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => value,
    };
    if encoded.is_empty() {
        return Err("an empty payload".to_string());
    }
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| format!("a payload that is neither a URL nor base64 ({})", e))
}

pub(crate) fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
