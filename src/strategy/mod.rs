// src/strategy/mod.rs — Candidate generation strategies

pub mod heuristic;
pub mod model;
pub mod random;

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::core::types::{Candidate, Domain, Meta};
use crate::infra::config::Config;
use crate::infra::errors::FusionLoopError;
use crate::scoring::ScoringParams;

use heuristic::{HeuristicKind, HeuristicStrategy};
use model::{ModelStrategy, StatisticalModel};
use random::DrawSeeds;

/// Core trait that every generator implements.
///
/// Implementations must be deterministic given `issue_index` and their own
/// seed when one is configured; without a seed they may use entropy.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn id(&self) -> &str;

    async fn generate(&self, issue_index: u64) -> Result<Candidate, FusionLoopError>;
}

/// Result of a fail-open strategy call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub candidate: Candidate,
    /// `{"substituted": true, "error": ...}` when the strategy failed.
    pub meta: Meta,
}

impl Invocation {
    pub fn substituted(&self) -> bool {
        self.meta.contains_key("substituted")
    }
}

/// Call `strategy`, converting errors and panics into a random candidate.
pub async fn invoke(
    strategy: &dyn Strategy,
    issue_index: u64,
    domain: &Domain,
    fallback: &DrawSeeds,
) -> Invocation {
    let outcome = AssertUnwindSafe(strategy.generate(issue_index))
        .catch_unwind()
        .await;
    let error = match outcome {
        Ok(Ok(candidate)) => {
            return Invocation {
                candidate,
                meta: Meta::new(),
            }
        }
        Ok(Err(e)) => e.to_string(),
        Err(panic) => panic_message(panic.as_ref()),
    };

    substitute(strategy.id(), issue_index, error, domain, fallback)
}

/// Random stand-in for a source that failed, tagged `substituted`.
pub fn substitute(
    source: &str,
    issue_index: u64,
    error: String,
    domain: &Domain,
    fallback: &DrawSeeds,
) -> Invocation {
    tracing::warn!(
        "'{}' failed on issue {}: {}; substituting random candidate",
        source,
        issue_index,
        error
    );
    let mut meta = Meta::new();
    meta.insert("substituted".into(), true.into());
    meta.insert("error".into(), error.into());
    Invocation {
        candidate: fallback.random_candidate(domain, issue_index),
        meta,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// The explicit strategy list: the heuristic generators, then the model adapter.
pub fn registry(
    config: &Config,
    domain: Domain,
    model: Option<Arc<dyn StatisticalModel>>,
) -> Vec<Arc<dyn Strategy>> {
    let scoring = ScoringParams::from(&config.scoring);
    let seed = config.closed_loop.seed;

    let mut strategies: Vec<Arc<dyn Strategy>> = HeuristicKind::ALL
        .iter()
        .map(|kind| {
            Arc::new(HeuristicStrategy::new(
                *kind,
                domain,
                config.scoring.gamma_for(kind.id()),
                scoring.clone(),
                seed,
            )) as Arc<dyn Strategy>
        })
        .collect();

    if let Some(model) = model {
        strategies.push(Arc::new(ModelStrategy::new(model, domain, seed)));
    }
    strategies
}
