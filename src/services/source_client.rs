//! Thin retrying HTTP client shared by all fetchers.
//!
//! Result-typed: no exception-style control flow crosses this boundary. The
//! raw body is always preserved so callers can report upstream errors
//! verbatim (to logs, never to API clients).

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
pub const BASE_DELAY_MS: u64 = 500;

/// Outcome of a successful (2xx) call. `json` is Some when the body parsed
/// as JSON; `text` always carries the raw body.
#[derive(Debug, Clone)]
pub struct SourceResponse {
    pub status: u16,
    pub json: Option<Value>,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub timeout_ms: Option<u64>,
    pub headers: HashMap<String, String>,
}

impl CallOptions {
    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self { timeout_ms: Some(timeout_ms), ..Default::default() }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("authorization", &format!("Bearer {}", token))
    }
}

/// Retry only what might succeed on a second try: network faults and 5xx.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
}

#[derive(Debug, Clone)]
pub struct SourceClient {
    client: reqwest::Client,
    max_attempts: u32,
    base_delay: Duration,
}

impl SourceClient {
    pub fn new() -> Result<Self> {
        Self::with_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_attempts(max_attempts: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(BASE_DELAY_MS),
        })
    }

    pub async fn get(&self, url: &str, opts: &CallOptions) -> Result<SourceResponse> {
        self.request(Method::GET, url, None, opts).await
    }

    pub async fn post_json(
        &self,
        url: &str,
        payload: &Value,
        opts: &CallOptions,
    ) -> Result<SourceResponse> {
        self.request(Method::POST, url, Some(payload), opts).await
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        payload: Option<&Value>,
        opts: &CallOptions,
    ) -> Result<SourceResponse> {
        let timeout = Duration::from_millis(opts.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        let mut headers = HeaderMap::new();
        for (name, value) in &opts.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Validation(format!("Bad header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Validation(format!("Bad header value: {}", e)))?;
            headers.insert(name, value);
        }

        let mut last_error = String::new();
        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                // exponential with jitter: base * 2^(n-1) * (1 + rand)
                let exp = self.base_delay.as_millis() as u64 * (1u64 << (attempt - 1));
                let jitter = rand::thread_rng().gen_range(0..=exp / 2);
                let delay = Duration::from_millis(exp + jitter);
                info!(
                    url,
                    attempt = attempt + 1,
                    max = self.max_attempts,
                    reason = %last_error,
                    wait_ms = delay.as_millis() as u64,
                    "Retrying source call"
                );
                sleep(delay).await;
            }

            let mut builder = self
                .client
                .request(method.clone(), url)
                .timeout(timeout)
                .headers(headers.clone());
            if let Some(body) = payload {
                builder = builder.json(body);
            }

            match builder.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();

                    if status.is_success() {
                        let json = serde_json::from_str::<Value>(&text).ok();
                        debug!(url, status = status.as_u16(), bytes = text.len(), "Source call ok");
                        return Ok(SourceResponse { status: status.as_u16(), json, text });
                    }

                    if is_retryable_status(status) {
                        last_error = format!("HTTP {}", status.as_u16());
                        continue;
                    }

                    // 4xx: the request itself is wrong; retrying won't help.
                    return Err(Error::SourceTerminal {
                        status: status.as_u16(),
                        body: crate::utils::truncate_chars(&text, 500),
                    });
                }
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            }
        }

        Err(Error::SourceTransient(format!(
            "{} attempts exhausted: {}",
            self.max_attempts, last_error
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
        assert!(!is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
    }

    #[test]
    fn call_options_compose() {
        let opts = CallOptions::with_timeout(2_000)
            .header("user-agent", "test")
            .bearer("tok");
        assert_eq!(opts.timeout_ms, Some(2_000));
        assert_eq!(opts.headers.get("user-agent").unwrap(), "test");
        assert_eq!(opts.headers.get("authorization").unwrap(), "Bearer tok");
    }

    #[tokio::test]
    async fn connection_refused_is_transient_after_retries() {
        let client = SourceClient::with_attempts(2).unwrap();
        // nothing listens on this port
        let err = client
            .get("http://127.0.0.1:59999/nope", &CallOptions::with_timeout(500))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceTransient(_)));
    }
}
