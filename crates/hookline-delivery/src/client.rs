//! HTTP dispatcher for webhook delivery.
//!
//! Builds one signed request per call and classifies the outcome for the
//! retry logic. The client holds no per-task state: retries are the worker's
//! business.

use std::time::{Duration, Instant};

use bytes::Bytes;
use hookline_core::models::{TaskId, WebhookPayload};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    error::{DeliveryError, Result},
    signing::{sign_payload, SIGNATURE_HEADER},
};

/// Header carrying the task id, the recipient's idempotency key.
pub const WEBHOOK_ID_HEADER: &str = "x-webhook-id";

/// Header carrying the event type.
pub const EVENT_HEADER: &str = "x-event";

/// Default `User-Agent` sent with every delivery.
pub const DEFAULT_USER_AGENT: &str = "Hookline-Dispatcher/1.0";

/// Response bodies kept on errors are cut to this many bytes.
const MAX_ERROR_BODY_SIZE: usize = 1024;

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for a whole request, connect to last body byte.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// Successful (2xx) response from a delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body.
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
}

/// HTTP client for webhook delivery.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// configured with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        HeaderValue::from_str(&config.user_agent).map_err(|_| {
            DeliveryError::configuration(format!("invalid user agent: {}", config.user_agent))
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Performs exactly one delivery attempt of `payload` for `task_id`.
    ///
    /// The body is `payload.data` serialized as JSON. Mandatory headers are
    /// `Content-Type`, `User-Agent`, `X-Webhook-ID` and `X-Event`; caller
    /// headers may replace the first two but never the identity headers or
    /// `X-Signature`, and hop-by-hop headers from the caller are dropped.
    /// `X-Signature` is only sent when the payload carries a secret.
    ///
    /// # Errors
    ///
    /// - `InvalidPayload` if the method, a header or the URL cannot be sent
    /// - `Timeout` if no response arrived within the configured timeout
    /// - `Network` for connection and transport failures
    /// - `HttpStatus` for any status outside `[200, 300)`
    pub async fn deliver(
        &self,
        task_id: TaskId,
        payload: &WebhookPayload,
    ) -> Result<DeliveryResponse> {
        let method = payload
            .http_method()
            .map_err(|e| DeliveryError::invalid_payload(e.to_string()))?;

        let span = info_span!(
            "webhook_delivery",
            task_id = %task_id,
            url = %payload.url,
            event = %payload.event,
            method = %method,
        );

        async move {
            let body = Bytes::from(
                serde_json::to_vec(&payload.data)
                    .map_err(|e| DeliveryError::invalid_payload(e.to_string()))?,
            );
            let headers = self.build_headers(task_id, payload, &body)?;

            debug!("starting webhook delivery");
            let start_time = Instant::now();

            let response = match self
                .client
                .request(method, &payload.url)
                .headers(headers)
                .body(body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    warn!(duration_ms = duration.as_millis(), "request failed: {}", e);
                    return Err(self.classify_error(&e));
                },
            };

            let status_code = response.status().as_u16();
            let is_success = response.status().is_success();
            let body = read_body(response).await;
            let duration = start_time.elapsed();

            debug!(status = status_code, duration_ms = duration.as_millis(), "received response");

            if !is_success {
                return Err(DeliveryError::http_status(status_code, truncate_body(&body)));
            }

            Ok(DeliveryResponse {
                status_code,
                body: String::from_utf8_lossy(&body).into_owned(),
                duration,
            })
        }
        .instrument(span)
        .await
    }

    fn build_headers(
        &self,
        task_id: TaskId,
        payload: &WebhookPayload,
        body: &[u8],
    ) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, header_value(&self.config.user_agent)?);

        for (name, value) in &payload.headers {
            if is_managed_header(name) {
                continue;
            }
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                DeliveryError::invalid_payload(format!("invalid header name: {name}"))
            })?;
            headers.insert(header_name, header_value(value)?);
        }

        headers.insert(
            HeaderName::from_static(WEBHOOK_ID_HEADER),
            header_value(&task_id.to_string())?,
        );
        headers.insert(HeaderName::from_static(EVENT_HEADER), header_value(&payload.event)?);

        if let Some(secret) = payload.signing_secret() {
            let signature = sign_payload(body, secret)
                .map_err(|e| DeliveryError::invalid_payload(e.to_string()))?;
            headers.insert(HeaderName::from_static(SIGNATURE_HEADER), header_value(&signature)?);
        }

        Ok(headers)
    }

    fn classify_error(&self, error: &reqwest::Error) -> DeliveryError {
        if error.is_timeout() {
            return DeliveryError::timeout(self.config.timeout);
        }
        if error.is_builder() {
            return DeliveryError::invalid_payload(format!("cannot build request: {error}"));
        }
        if error.is_connect() {
            return DeliveryError::network(format!("connection failed: {error}"));
        }
        DeliveryError::network(error.to_string())
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| DeliveryError::invalid_payload(format!("invalid header value: {value}")))
}

async fn read_body(response: reqwest::Response) -> Bytes {
    match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("failed to read response body: {}", e);
            Bytes::new()
        },
    }
}

fn truncate_body(body: &[u8]) -> String {
    if body.len() <= MAX_ERROR_BODY_SIZE {
        return String::from_utf8_lossy(body).into_owned();
    }

    let suffix = "... (truncated)";
    let truncated = String::from_utf8_lossy(&body[..MAX_ERROR_BODY_SIZE - suffix.len()]);
    format!("{truncated}{suffix}")
}

/// Checks if a caller-supplied header is owned by the dispatcher or is
/// hop-by-hop and must not be forwarded.
fn is_managed_header(header_name: &str) -> bool {
    let lowercase = header_name.to_ascii_lowercase();
    matches!(
        lowercase.as_str(),
        "x-webhook-id"
            | "x-event"
            | "x-signature"
            | "content-length"
            | "host"
            | "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}
