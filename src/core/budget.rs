// src/core/budget.rs — Per-issue attempt/time budget with an injectable clock

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::types::StopReason;
use crate::infra::config::ClosedLoopConfig;

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock advanced by hand.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.lock().map(|n| *n).unwrap_or_else(|_| Instant::now())
    }
}

/// Limits shared by every issue in a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetLimits {
    /// `None` = unlimited by count.
    pub max_attempts: Option<u32>,
    pub max_duration: Option<Duration>,
}

impl From<&ClosedLoopConfig> for BudgetLimits {
    fn from(cfg: &ClosedLoopConfig) -> Self {
        let max_attempts = if cfg.max_attempts_per_issue <= 0 {
            None
        } else {
            Some(cfg.max_attempts_per_issue.min(u32::MAX as i64) as u32)
        };
        // out-of-range values (negative, NaN, overflow) mean no time limit
        let max_duration = cfg
            .max_seconds_per_issue
            .and_then(|s| Duration::try_from_secs_f64(s).ok());
        Self {
            max_attempts,
            max_duration,
        }
    }
}

/// Budget for one issue, started when the loop opens.
pub struct IssueBudget {
    limits: BudgetLimits,
    started: Instant,
    clock: Arc<dyn Clock>,
}

impl IssueBudget {
    pub fn start(limits: BudgetLimits, clock: Arc<dyn Clock>) -> Self {
        let started = clock.now();
        Self {
            limits,
            started,
            clock,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.started)
    }

    /// The first limit hit, if any. The count limit is checked first.
    pub fn exhausted_by(&self, attempts: u32) -> Option<StopReason> {
        if let Some(max) = self.limits.max_attempts {
            if attempts >= max {
                return Some(StopReason::AttemptLimit);
            }
        }
        if let Some(max) = self.limits.max_duration {
            if self.elapsed() >= max {
                return Some(StopReason::TimeLimit);
            }
        }
        None
    }

    pub fn should_continue(&self, attempts: u32) -> bool {
        self.exhausted_by(attempts).is_none()
    }

    /// Human-readable remark for an unmatched stop.
    pub fn remark(&self, reason: StopReason, attempts: u32) -> String {
        let mut configured = Vec::new();
        if let Some(max) = self.limits.max_attempts {
            configured.push(format!("max {} attempts", max));
        }
        if let Some(max) = self.limits.max_duration {
            configured.push(format!("max {:.2}s", max.as_secs_f64()));
        }
        let limits = if configured.is_empty() {
            "no limits".to_string()
        } else {
            configured.join(", ")
        };
        format!(
            "stopped on {} after {} attempts in {:.2}s ({})",
            reason,
            attempts,
            self.elapsed().as_secs_f64(),
            limits
        )
    }
}
