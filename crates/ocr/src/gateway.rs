//! Primary/secondary backend dispatch with rate-limit retry.
//!
//! The retry decision is a pure function of the last outcome and the attempt
//! count ([`next_step`]); [`OcrGateway`] only drives it.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::backend::{is_retryable, BackendError, VisionBackend};
use crate::config::OcrConfig;
use crate::gemini::GeminiBackend;
use crate::openai::OpenAiBackend;
use crate::response::{parse_response, ResponseItem};

/// Exponential backoff for the primary backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total calls to the primary, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: u32,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 2_000,
            multiplier: 2,
            max_delay_ms: 16_000,
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget, no waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy { max_attempts, base_delay_ms: 0, multiplier: 1, max_delay_ms: 0 }
    }

    /// Wait after the `attempt`-th failure (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = (self.multiplier as u64).saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

/// Result of one backend call, reduced to what the retry logic needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success(String),
    Failure { error: String, retryable: bool },
}

impl From<Result<String, BackendError>> for CallOutcome {
    fn from(r: Result<String, BackendError>) -> Self {
        match r {
            Ok(text) => CallOutcome::Success(text),
            Err(e) => {
                let error = e.to_string();
                let retryable = is_retryable(&error);
                CallOutcome::Failure { error, retryable }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    Accept(String),
    Retry(Duration),
    /// Give up on the primary; carries the last error.
    Fallback(String),
}

/// Decide what follows the `attempt`-th call (1-based).
pub fn next_step(outcome: CallOutcome, attempt: u32, policy: &RetryPolicy) -> NextStep {
    match outcome {
        CallOutcome::Success(text) => NextStep::Accept(text),
        CallOutcome::Failure { error, retryable } => {
            if retryable && attempt < policy.max_attempts {
                NextStep::Retry(policy.delay_after(attempt))
            } else {
                NextStep::Fallback(error)
            }
        }
    }
}

/// What one image scan produced.
#[derive(Debug, Clone, Default)]
pub struct ScanReply {
    pub items: Vec<ResponseItem>,
    /// Name of the backend whose reply was used; `None` when both failed.
    pub backend: Option<String>,
    pub primary_attempts: u32,
}

pub struct OcrGateway {
    primary: Option<Arc<dyn VisionBackend>>,
    secondary: Option<Arc<dyn VisionBackend>>,
    policy: RetryPolicy,
}

impl OcrGateway {
    pub fn new(
        primary: Option<Arc<dyn VisionBackend>>,
        secondary: Option<Arc<dyn VisionBackend>>,
        policy: RetryPolicy,
    ) -> Self {
        Self { primary, secondary, policy }
    }

    /// Gemini as primary and OpenAI as secondary, each only when its key is set.
    pub fn from_config(config: &OcrConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        let primary = config.gemini_api_key.as_ref().map(|key| {
            Arc::new(GeminiBackend::new(http.clone(), key.clone(), config.gemini_model.clone()))
                as Arc<dyn VisionBackend>
        });
        let secondary = config.openai_api_key.as_ref().map(|key| {
            Arc::new(OpenAiBackend::new(http.clone(), key.clone(), config.openai_model.clone()))
                as Arc<dyn VisionBackend>
        });
        if primary.is_none() && secondary.is_none() {
            warn!("no backend API key configured; every scan will come back empty");
        }
        Ok(Self::new(primary, secondary, config.retry.clone()))
    }

    pub fn has_backend(&self) -> bool {
        self.primary.is_some() || self.secondary.is_some()
    }

    /// Scan one encoded image. Never fails: when neither backend produces a
    /// reply the result is empty.
    pub async fn analyze(&self, image: &[u8]) -> ScanReply {
        let mut attempts = 0;

        if let Some(primary) = &self.primary {
            let (reply, used) = self.call_with_retry(primary.as_ref(), image).await;
            attempts = used;
            match reply {
                Ok(text) => {
                    return ScanReply {
                        items: parse_response(&text),
                        backend: Some(primary.name().to_string()),
                        primary_attempts: attempts,
                    };
                }
                Err(e) => warn!(backend = primary.name(), attempts, error = %e, "primary backend gave up"),
            }
        }

        if let Some(secondary) = &self.secondary {
            info!(backend = secondary.name(), "falling back to secondary backend");
            match secondary.extract(image).await {
                Ok(text) => {
                    return ScanReply {
                        items: parse_response(&text),
                        backend: Some(secondary.name().to_string()),
                        primary_attempts: attempts,
                    };
                }
                Err(e) => error!(backend = secondary.name(), error = %e, "secondary backend failed"),
            }
        }

        ScanReply { items: Vec::new(), backend: None, primary_attempts: attempts }
    }

    async fn call_with_retry(&self, backend: &dyn VisionBackend, image: &[u8]) -> (Result<String, String>, u32) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = CallOutcome::from(backend.extract(image).await);
            match next_step(outcome, attempt, &self.policy) {
                NextStep::Accept(text) => return (Ok(text), attempt),
                NextStep::Fallback(error) => return (Err(error), attempt),
                NextStep::Retry(delay) => {
                    warn!(
                        backend = backend.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    const ONE_ITEM: &str = r#"[{"vendor": "ローソン", "total_amount": 500}]"#;

    fn gateway(primary: Option<Arc<MockBackend>>, secondary: Option<Arc<MockBackend>>) -> OcrGateway {
        OcrGateway::new(
            primary.map(|p| p as Arc<dyn VisionBackend>),
            secondary.map(|s| s as Arc<dyn VisionBackend>),
            RetryPolicy::immediate(3),
        )
    }

    #[test]
    fn backoff_grows_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_after(1), Duration::from_secs(2));
        assert_eq!(p.delay_after(2), Duration::from_secs(4));
        assert_eq!(p.delay_after(3), Duration::from_secs(8));
        assert_eq!(p.delay_after(5), Duration::from_secs(16));
        assert_eq!(p.delay_after(40), Duration::from_secs(16));
    }

    #[test]
    fn next_step_transitions() {
        let p = RetryPolicy::default();
        let limited = || CallOutcome::Failure { error: "429".into(), retryable: true };

        assert_eq!(next_step(CallOutcome::Success("x".into()), 1, &p), NextStep::Accept("x".into()));
        assert_eq!(next_step(limited(), 1, &p), NextStep::Retry(Duration::from_secs(2)));
        assert_eq!(next_step(limited(), 3, &p), NextStep::Fallback("429".into()));
        assert_eq!(
            next_step(CallOutcome::Failure { error: "HTTP 400".into(), retryable: false }, 1, &p),
            NextStep::Fallback("HTTP 400".into())
        );
    }

    #[test]
    fn outcome_classifies_backend_errors() {
        let o = CallOutcome::from(Err(BackendError::Http { status: 429, body: String::new() }));
        assert!(matches!(o, CallOutcome::Failure { retryable: true, .. }));
        let o = CallOutcome::from(Err(BackendError::Transport("reset".into())));
        assert!(matches!(o, CallOutcome::Failure { retryable: false, .. }));
    }

    #[tokio::test]
    async fn rate_limit_twice_then_success() {
        let primary = Arc::new(MockBackend::scripted(
            "primary",
            vec![
                Err("HTTP 429: Too Many Requests".into()),
                Err("RESOURCE_EXHAUSTED".into()),
                Ok(ONE_ITEM.into()),
            ],
        ));
        let secondary = Arc::new(MockBackend::new("secondary", "[]"));
        let reply = gateway(Some(primary.clone()), Some(secondary.clone())).analyze(b"img").await;

        assert_eq!(primary.calls(), 3);
        assert_eq!(reply.primary_attempts, 3);
        assert_eq!(secondary.calls(), 0);
        assert_eq!(reply.backend.as_deref(), Some("primary"));
        assert_eq!(reply.items.len(), 1);
    }

    #[tokio::test]
    async fn retries_exhausted_falls_back() {
        let primary = Arc::new(MockBackend::failing("primary", "quota exceeded"));
        let secondary = Arc::new(MockBackend::new("secondary", ONE_ITEM));
        let reply = gateway(Some(primary.clone()), Some(secondary.clone())).analyze(b"img").await;

        assert_eq!(primary.calls(), 3);
        assert_eq!(secondary.calls(), 1);
        assert_eq!(reply.backend.as_deref(), Some("secondary"));
        assert_eq!(reply.items[0].vendor, "ローソン");
    }

    #[tokio::test]
    async fn fatal_error_skips_retry() {
        let primary = Arc::new(MockBackend::failing("primary", "HTTP 401: invalid key"));
        let secondary = Arc::new(MockBackend::new("secondary", ONE_ITEM));
        let reply = gateway(Some(primary.clone()), Some(secondary.clone())).analyze(b"img").await;

        assert_eq!(primary.calls(), 1);
        assert_eq!(reply.backend.as_deref(), Some("secondary"));
    }

    #[tokio::test]
    async fn both_fail_is_empty() {
        let primary = Arc::new(MockBackend::failing("primary", "HTTP 500"));
        let secondary = Arc::new(MockBackend::failing("secondary", "HTTP 500"));
        let reply = gateway(Some(primary), Some(secondary.clone())).analyze(b"img").await;

        assert!(reply.items.is_empty());
        assert!(reply.backend.is_none());
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn secondary_only() {
        let secondary = Arc::new(MockBackend::new("secondary", ONE_ITEM));
        let reply = gateway(None, Some(secondary)).analyze(b"img").await;
        assert_eq!(reply.items.len(), 1);
        assert_eq!(reply.primary_attempts, 0);
    }

    #[tokio::test]
    async fn no_backends_is_empty() {
        let g = gateway(None, None);
        assert!(!g.has_backend());
        assert!(g.analyze(b"img").await.items.is_empty());
    }

    #[tokio::test]
    async fn unparsable_success_does_not_fall_back() {
        let primary = Arc::new(MockBackend::new("primary", "sorry, no receipts here"));
        let secondary = Arc::new(MockBackend::new("secondary", ONE_ITEM));
        let reply = gateway(Some(primary), Some(secondary.clone())).analyze(b"img").await;
        assert!(reply.items.is_empty());
        assert_eq!(reply.backend.as_deref(), Some("primary"));
        assert_eq!(secondary.calls(), 0);
    }
}
