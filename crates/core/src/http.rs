//! Outbound HTTP with transport-level retries
//!
//! [`HttpClient`] is the seam between the orchestrator and the network. The
//! production implementation, [`ReqwestHttpClient`], retries network errors
//! and transient status codes (408, 429, 5xx) using the request's
//! [`TransportOptions`]. A call that still fails after the last attempt is
//! reported as a [`TransportError`]; a call that ends with a non-transient
//! response is returned as-is for the caller to interpret.

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::request::TransportOptions;

/// Transport failures that survived every retry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Every attempt failed before a response arrived
    #[error("{method} {url} failed after {attempts} attempt(s): {message}")]
    Exhausted {
        method: HttpMethod,
        url: String,
        attempts: u32,
        message: String,
    },

    /// The request could not be built
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// HTTP methods the orchestrator issues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

/// Request body
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Sent as `text/plain`
    Text(String),

    /// Sent as `application/json`
    Json(serde_json::Value),
}

impl RequestBody {
    /// Body for an opaque content payload
    ///
    /// JSON strings travel as plain text, `null` means no body, anything
    /// else is sent as JSON.
    pub fn from_content(content: &serde_json::Value) -> Option<Self> {
        match content {
            serde_json::Value::Null => None,
            serde_json::Value::String(text) => Some(RequestBody::Text(text.clone())),
            other => Some(RequestBody::Json(other.clone())),
        }
    }
}

/// One logical outbound call
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub body: Option<RequestBody>,
    pub transport: TransportOptions,
}

impl HttpRequest {
    /// GET without a body
    pub fn get(url: Url, transport: TransportOptions) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            body: None,
            transport,
        }
    }

    /// POST with an optional body
    pub fn post(url: Url, body: Option<RequestBody>, transport: TransportOptions) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            body,
            transport,
        }
    }
}

/// Final response of a logical call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Check for a 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Client issuing logical HTTP calls
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send a request, retrying transient failures per its transport options
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Status codes worth another transport attempt
pub fn is_transient_status(status: u16) -> bool {
    status == StatusCode::REQUEST_TIMEOUT.as_u16()
        || status == StatusCode::TOO_MANY_REQUESTS.as_u16()
        || (500..600).contains(&status)
}

/// reqwest-backed [`HttpClient`]
#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpClient {
    http: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured reqwest client
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn send_once(&self, request: &HttpRequest) -> Result<HttpResponse, reqwest::Error> {
        let builder = match request.method {
            HttpMethod::Get => self.http.get(request.url.clone()),
            HttpMethod::Post => self.http.post(request.url.clone()),
        };
        let builder = match &request.body {
            Some(RequestBody::Text(text)) => builder
                .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(text.clone()),
            Some(RequestBody::Json(value)) => builder.json(value),
            None => builder,
        };

        let response = builder.timeout(request.transport.timeout()).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if request.transport.timeout().is_zero() {
            return Err(TransportError::InvalidRequest(
                "timeout must be greater than zero".to_string(),
            ));
        }

        let policy = request.transport.retry_policy();
        let mut attempt = 1;
        loop {
            let result = self.send_once(&request).await;
            let transient = match &result {
                Ok(response) => is_transient_status(response.status),
                Err(_) => true,
            };

            if !transient || !policy.has_attempts_remaining(attempt) {
                return match result {
                    Ok(response) => {
                        debug!(
                            method = %request.method,
                            url = %request.url,
                            status = response.status,
                            attempts = attempt,
                            "HTTP call finished"
                        );
                        Ok(response)
                    }
                    Err(e) => Err(TransportError::Exhausted {
                        method: request.method,
                        url: request.url.to_string(),
                        attempts: attempt,
                        message: e.to_string(),
                    }),
                };
            }

            let delay = policy.delay_for_attempt(attempt + 1);
            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            match &result {
                Ok(response) => warn!(
                    method = %request.method,
                    url = %request.url,
                    status = response.status,
                    attempt,
                    delay_ms,
                    "transient status, retrying"
                ),
                Err(e) => warn!(
                    method = %request.method,
                    url = %request.url,
                    error = %e,
                    attempt,
                    delay_ms,
                    "HTTP call failed, retrying"
                ),
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
