use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use reqwest::{Client, Response, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{GenerationRequest, SingleShotResponse};
use super::ProviderTransport;
use crate::config::{ProviderConfig, RequestConfig};
use crate::error::{TransportError, TransportResult};
use crate::stream::ByteStream;

/// Client for the generation gateway's HTTP API
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    request_config: RequestConfig,
}

impl HttpTransport {
    /// Create a new gateway client
    pub fn new(config: &ProviderConfig, request_config: RequestConfig) -> TransportResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(TransportError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST with retries on connection failures, timeouts and 429/502/503.
    ///
    /// Only the initial request is retried; once a body is handed back the
    /// caller owns it.
    async fn send_with_retry(
        &self,
        url: &str,
        request: &GenerationRequest,
        timeout: Option<Duration>,
    ) -> TransportResult<Response> {
        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    node_id = %request.node_id,
                    provider = %request.provider,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying provider request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(url, request, timeout).await {
                Ok(response) => {
                    info!(
                        node_id = %request.node_id,
                        provider = %request.provider,
                        stream = request.stream,
                        latency_ms = start.elapsed().as_millis(),
                        "Provider request accepted"
                    );
                    return Ok(response);
                }
                Err(e) if is_retryable(&e) => {
                    error!(
                        node_id = %request.node_id,
                        provider = %request.provider,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Provider request failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
                Err(e) => {
                    error!(
                        node_id = %request.node_id,
                        provider = %request.provider,
                        error = %e,
                        "Provider request rejected"
                    );
                    return Err(e);
                }
            }
        }

        Err(TransportError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries: retries.saturating_sub(1),
        })
    }

    /// Execute a single request (internal)
    async fn execute_request(
        &self,
        url: &str,
        request: &GenerationRequest,
        timeout: Option<Duration>,
    ) -> TransportResult<Response> {
        debug!(
            node_id = %request.node_id,
            model = %request.model,
            node_type = %request.node_type,
            "Calling provider gateway"
        );

        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(request);
        if let Some(api_key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", api_key));
        }
        if request.stream {
            builder = builder.header("Accept", "text/event-stream");
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    timeout_ms: self.request_config.timeout_ms,
                }
            } else {
                TransportError::Http(e)
            }
        })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(TransportError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn generate(&self, request: &GenerationRequest) -> TransportResult<SingleShotResponse> {
        let url = format!("{}/v1/generate", self.base_url);
        let timeout = Duration::from_millis(self.request_config.timeout_ms);
        let response = self.send_with_retry(&url, request, Some(timeout)).await?;

        response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })
    }

    async fn open_stream(&self, request: &GenerationRequest) -> TransportResult<ByteStream> {
        let url = format!("{}/v1/generate/stream", self.base_url);
        // Whole-request timeouts would cut long streams; reads are bounded one at a time.
        let response = self.send_with_retry(&url, request, None).await?;

        Ok(with_idle_timeout(
            response.bytes_stream(),
            Duration::from_millis(self.request_config.stream_idle_timeout_ms),
        ))
    }
}

/// Fail the body with `TransportError::Timeout` when no read arrives within `idle`.
///
/// The stream ends after the first error.
fn with_idle_timeout<S>(body: S, idle: Duration) -> ByteStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let body = Box::pin(body);
    Box::pin(stream::unfold(Some(body), move |state| async move {
        let mut body = state?;
        match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(Ok(bytes))) => Some((Ok(bytes), Some(body))),
            Ok(Some(Err(e))) => Some((Err(TransportError::Http(e)), None)),
            Ok(None) => None,
            Err(_) => {
                let timeout_ms = idle.as_millis() as u64;
                warn!(timeout_ms = timeout_ms, "Stream stalled, giving up");
                Some((Err(TransportError::Timeout { timeout_ms }), None))
            }
        }
    }))
}

fn is_retryable(error: &TransportError) -> bool {
    match error {
        TransportError::Timeout { .. } => true,
        TransportError::Http(e) => e.is_connect() || e.is_timeout(),
        TransportError::Api { status, .. } => matches!(
            StatusCode::from_u16(*status),
            Ok(StatusCode::TOO_MANY_REQUESTS)
                | Ok(StatusCode::BAD_GATEWAY)
                | Ok(StatusCode::SERVICE_UNAVAILABLE)
        ),
        _ => false,
    }
}
