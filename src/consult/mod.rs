// src/consult/mod.rs — Optional external consult source
//
// The closed loop periodically asks an external text model for a candidate.
// Calls are rate-limited by a cooldown and bounded by a timeout; every
// failure degrades to "no consult candidate this time".

pub mod openai_compat;
pub mod parse;

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::core::types::{Attempt, Candidate, Domain};
use crate::infra::config::{self, ConsultConfig};
use crate::infra::errors::FusionLoopError;

pub use openai_compat::OpenAiCompatConsult;

/// Free-text completion service.
#[async_trait]
pub trait ConsultClient: Send + Sync {
    fn id(&self) -> &str;

    async fn complete(
        &self,
        prompt: &str,
        context: &serde_json::Value,
    ) -> Result<String, FusionLoopError>;
}

const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Cooldown + timeout wrapper around a [`ConsultClient`].
pub struct ConsultGate {
    client: Arc<dyn ConsultClient>,
    min_interval: Duration,
    timeout: Duration,
    recent_attempts: usize,
    last_call: Mutex<Option<Instant>>,
}

impl ConsultGate {
    pub fn new(client: Arc<dyn ConsultClient>, cfg: &ConsultConfig) -> Self {
        Self {
            client,
            min_interval: config::secs_or(cfg.min_interval_secs, DEFAULT_MIN_INTERVAL),
            timeout: config::secs_or(cfg.timeout_secs, DEFAULT_TIMEOUT).max(MIN_TIMEOUT),
            recent_attempts: cfg.recent_attempts,
            last_call: Mutex::new(None),
        }
    }

    pub fn with_limits(mut self, min_interval: Duration, timeout: Duration) -> Self {
        self.min_interval = min_interval;
        self.timeout = timeout;
        self
    }

    pub fn client_id(&self) -> &str {
        self.client.id()
    }

    /// Claim the call slot; false while the cooldown is running.
    fn try_acquire(&self) -> bool {
        let Ok(mut last) = self.last_call.lock() else {
            return false;
        };
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.min_interval {
                return false;
            }
        }
        *last = Some(now);
        true
    }

    /// Ask for a candidate.
    ///
    /// `Ok(None)` means skipped: cooldown active or no usable numbers in the
    /// reply. Errors cover client failures and timeouts.
    pub async fn consult(
        &self,
        issue_index: u64,
        recent: &[Attempt],
        domain: &Domain,
    ) -> Result<Option<Candidate>, FusionLoopError> {
        if !self.try_acquire() {
            tracing::debug!("Consult skipped for issue {}: cooldown", issue_index);
            return Ok(None);
        }

        let prompt = build_prompt(domain);
        let context = build_context(issue_index, recent, self.recent_attempts);
        let call = self.client.complete(&prompt, &context);
        let text = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FusionLoopError::ConsultTimeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        };

        let parsed = parse::parse_candidate(&text, domain);
        if parsed.is_none() {
            tracing::debug!(
                "Consult reply for issue {} had no usable candidate ({} chars)",
                issue_index,
                text.len()
            );
        }
        Ok(parsed)
    }
}

pub fn build_prompt(domain: &Domain) -> String {
    format!(
        "Predict the next draw: {} distinct primary numbers from 1 to {} and one \
         secondary number from 1 to {}. Reply with the primaries first, then the secondary.",
        domain.primary_count, domain.primary_max, domain.secondary_max
    )
}

fn build_context(issue_index: u64, recent: &[Attempt], limit: usize) -> serde_json::Value {
    let start = recent.len().saturating_sub(limit);
    let attempts: Vec<serde_json::Value> = recent[start..]
        .iter()
        .map(|a| {
            serde_json::json!({
                "strategy": a.strategy_id,
                "primary": a.candidate.primary(),
                "secondary": a.candidate.secondary(),
            })
        })
        .collect();
    serde_json::json!({
        "issue_index": issue_index,
        "recent_misses": attempts,
    })
}
