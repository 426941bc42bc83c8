use crate::config::LlmConfig;
use crate::services::generation::{GeneratedAnswer, GenerationBackend, GenerationError};
use crate::services::memory::ConversationWindow;
use crate::services::retrieval::RetrievedPassage;
use std::time::Duration;
use tracing::{error, info, warn};

/// What to do after a failed primary attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Rate limited within budget: sleep, then try the primary again.
    Retry(Duration),
    /// Budget exhausted or non-transient error: hand off to the fallback.
    Escalate,
}

/// Bounded exponential backoff for rate-limited primary attempts. The delay
/// cap is a hardening addition on top of plain doubling, so a long streak of
/// 429s cannot grow the sleep without bound.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_secs(config.initial_backoff_seconds),
            max_backoff: Duration::from_secs(config.max_backoff_seconds),
        }
    }

    /// Delay before retry number `retry` (zero-based): initial * 2^retry,
    /// capped at max_backoff.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let doubled = self
            .initial_backoff
            .checked_mul(1u32.checked_shl(retry).unwrap_or(u32::MAX))
            .unwrap_or(self.max_backoff);
        doubled.min(self.max_backoff)
    }

    /// Classify a failed primary attempt into the next state transition.
    pub fn classify(&self, error: &GenerationError, retries_used: u32) -> FailureAction {
        match error {
            GenerationError::RateLimited(_) if retries_used < self.max_retries => {
                FailureAction::Retry(self.delay_for(retries_used))
            }
            GenerationError::RateLimited(_) => FailureAction::Escalate,
            GenerationError::Model(_) => FailureAction::Escalate,
        }
    }
}

/// Drives one generation request through the primary backend with bounded
/// retries, escalating to the fallback at most once. Total failure yields
/// `None`; the orchestrator turns that into a degraded response.
pub struct ResilientInvoker {
    policy: RetryPolicy,
}

impl ResilientInvoker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub async fn invoke(
        &self,
        primary: &dyn GenerationBackend,
        fallback: &dyn GenerationBackend,
        question: &str,
        passages: &[RetrievedPassage],
        window: &ConversationWindow,
    ) -> Option<GeneratedAnswer> {
        // Each backend gets its own copy of the window so a failed primary
        // attempt cannot leak prompt state into the fallback attempt.
        let primary_window = window.clone();
        let mut retries_used = 0;

        loop {
            match primary.generate(question, passages, &primary_window).await {
                Ok(answer) => return Some(answer),
                Err(e) => match self.policy.classify(&e, retries_used) {
                    FailureAction::Retry(delay) => {
                        warn!(
                            "Model {} rate limited (retry {}/{}), backing off {:?}: {}",
                            primary.model(),
                            retries_used + 1,
                            self.policy.max_retries,
                            delay,
                            e
                        );
                        tokio::time::sleep(delay).await;
                        retries_used += 1;
                    }
                    FailureAction::Escalate => {
                        warn!(
                            "Model {} failed after {} retries, escalating to {}: {}",
                            primary.model(),
                            retries_used,
                            fallback.model(),
                            e
                        );
                        break;
                    }
                },
            }
        }

        let fallback_window = window.clone();
        match fallback.generate(question, passages, &fallback_window).await {
            Ok(answer) => {
                info!("Fallback model {} answered", fallback.model());
                Some(answer)
            }
            Err(e) => {
                error!("Fallback model {} failed, no answer: {}", fallback.model(), e);
                None
            }
        }
    }
}
