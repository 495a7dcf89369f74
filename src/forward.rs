//! Ordered-failover delivery to the n8n webhook.
//!
//! Endpoints are tried strictly in list order; the first response wins. A
//! transport failure, a per-attempt timeout or an HTTP error status from the
//! downstream all count as a failed attempt and trigger failover to the next
//! candidate. A fixed 500ms pause separates attempts; there is no pause after
//! the last one and no cross-attempt cancellation, so total latency is
//! bounded by n * (timeout + delay).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ProxyError;

pub const USER_AGENT: &str = "InkFlow-Proxy/1.1";
pub const INTER_ATTEMPT_DELAY: Duration = Duration::from_millis(500);

/// n8n answers some workflows with an empty 200; the widget always expects a
/// JSON body, so we substitute a canned success message.
pub const EMPTY_SUCCESS_BODY: &str =
    "{\"status\":\"success\",\"message\":\"הודעה נשלחה בהצלחה!\"}";

/// Clock seam for the inter-attempt pause. Production sleeps on the tokio
/// timer; tests inject a counting fake.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug)]
pub struct ForwardReply {
    pub body: Bytes,
    /// The endpoint that answered.
    pub endpoint: String,
}

pub struct WebhookForwarder {
    client: reqwest::Client,
    endpoints: Vec<String>,
    delay: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl WebhookForwarder {
    pub fn new(endpoints: Vec<String>, per_attempt_timeout: Duration) -> Self {
        Self::with_sleeper(endpoints, per_attempt_timeout, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(
        endpoints: Vec<String>,
        per_attempt_timeout: Duration,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(per_attempt_timeout)
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            endpoints,
            delay: INTER_ATTEMPT_DELAY,
            sleeper,
        }
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Deliver `body` to the first endpoint that answers. All candidates
    /// failing maps to 502 with the last observed error attached.
    pub async fn forward(&self, body: Bytes) -> Result<ForwardReply, ProxyError> {
        let total = self.endpoints.len();
        let mut last_error: Option<String> = None;

        for (index, url) in self.endpoints.iter().enumerate() {
            tracing::info!(
                url = %url,
                attempt = index + 1,
                total,
                "forwarding payload to webhook"
            );
            match self.attempt(url, body.clone()).await {
                Ok(reply) => {
                    let reply = if reply.is_empty() {
                        tracing::info!(url = %url, "empty but successful webhook response");
                        Bytes::from_static(EMPTY_SUCCESS_BODY.as_bytes())
                    } else {
                        reply
                    };
                    return Ok(ForwardReply {
                        body: reply,
                        endpoint: url.clone(),
                    });
                }
                Err(detail) => {
                    tracing::warn!(url = %url, error = %detail, "webhook attempt failed");
                    last_error = Some(detail);
                    if index + 1 < total {
                        self.sleeper.sleep(self.delay).await;
                    }
                }
            }
        }

        Err(ProxyError::DownstreamUnavailable {
            last_error: last_error.unwrap_or_else(|| "no webhook endpoints configured".to_string()),
        })
    }

    async fn attempt(&self, url: &str, body: Bytes) -> Result<Bytes, String> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            // An error status from n8n is connectivity trouble as far as the
            // client is concerned; the next candidate may still work.
            return Err(format!("endpoint returned HTTP {}", status.as_u16()));
        }
        response.bytes().await.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct CountingSleeper {
        pub count: AtomicUsize,
    }

    #[async_trait]
    impl Sleeper for CountingSleeper {
        async fn sleep(&self, _duration: Duration) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn canned_success_body_is_valid_json() {
        let v: serde_json::Value = serde_json::from_str(EMPTY_SUCCESS_BODY).unwrap();
        assert_eq!(v.get("status").and_then(|s| s.as_str()), Some("success"));
    }

    #[tokio::test]
    async fn all_endpoints_down_yields_last_error_and_one_pause() {
        // Two refusing endpoints: exactly one backoff pause, none after the last.
        let sleeper = Arc::new(CountingSleeper {
            count: AtomicUsize::new(0),
        });
        let forwarder = WebhookForwarder::with_sleeper(
            vec![
                "http://127.0.0.1:9/never".to_string(),
                "http://127.0.0.1:9/still-never".to_string(),
            ],
            Duration::from_millis(500),
            sleeper.clone(),
        );
        let err = forwarder
            .forward(Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        match err {
            ProxyError::DownstreamUnavailable { last_error } => {
                assert!(!last_error.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(sleeper.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_endpoint_list_is_downstream_unavailable() {
        let forwarder = WebhookForwarder::new(Vec::new(), Duration::from_millis(100));
        let err = forwarder
            .forward(Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::DownstreamUnavailable { .. }));
    }
}
