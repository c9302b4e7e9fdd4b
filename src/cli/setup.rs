// src/cli/setup.rs — Shared engine assembly for `run` and `live`

use std::path::Path;
use std::sync::Arc;

use crate::core::types::{Domain, IssueRecord};
use crate::fusion::priors::PriorTable;
use crate::fusion::rank::CandidateRanker;
use crate::fusion::refine::CandidateRefiner;
use crate::fusion::{FusionEngine, FusionParams};
use crate::history;
use crate::infra::config::Config;
use crate::infra::paths::ArtifactPaths;
use crate::memory::{
    JsonMemoryStore, JsonWeightStore, MemoryParams, SharedMemory, StatsLedger, WeightResolver,
    WeightStore,
};
use crate::scoring::ScoringParams;
use crate::strategy::heuristic::HeuristicKind;
use crate::strategy::model::{FrequencyModel, StatisticalModel};
use crate::strategy::{self, Strategy};

/// Everything a run needs, wired from config and the artifact directory.
pub struct Engine {
    pub domain: Domain,
    pub history: Arc<[IssueRecord]>,
    pub strategies: Vec<Arc<dyn Strategy>>,
    pub fusion: Arc<FusionEngine>,
}

pub fn load_history(path: &Path, domain: &Domain) -> anyhow::Result<Arc<[IssueRecord]>> {
    let records = history::load_history(path, domain)
        .map_err(|e| anyhow::anyhow!("Cannot read history {}: {}", path.display(), e))?;
    if records.is_empty() {
        anyhow::bail!("No usable rows in {}", path.display());
    }
    Ok(records.into())
}

/// Assemble strategies and the fusion engine. `live` drops the seed so
/// scoring uses wall-clock instants and draws come from entropy.
pub fn assemble(
    config: &Config,
    paths: &ArtifactPaths,
    history: Arc<[IssueRecord]>,
    live: bool,
) -> anyhow::Result<Engine> {
    let domain = Domain::from(&config.domain);
    domain.validate()?;
    paths.ensure_dirs()?;

    let mut config = config.clone();
    if live {
        config.closed_loop.seed = None;
    }

    let model: Option<Arc<dyn StatisticalModel>> = if config.model.enabled {
        Some(Arc::new(FrequencyModel::new(history.clone(), domain, &config.model)))
    } else {
        None
    };
    let strategies = strategy::registry(&config, domain, model.clone());
    let ids: Vec<String> = strategies.iter().map(|s| s.id().to_string()).collect();

    let store: Option<Box<dyn WeightStore>> = if config.fusion.use_tuned {
        Some(Box::new(JsonWeightStore::new(paths.strategy_weights())))
    } else {
        None
    };
    let weights = Arc::new(WeightResolver::new(
        store,
        Arc::new(StatsLedger::new()),
        config.fusion.weight_window,
        ids,
    ));

    let mut params = FusionParams::from(&config.fusion);
    if let Some(tuned) = weights.tuned().and_then(|w| w.fusion) {
        params = params.with_tuned(&tuned);
    }

    let memory = Arc::new(SharedMemory::new(
        Box::new(JsonMemoryStore::new(paths.memory())),
        MemoryParams::from(&config.memory),
    ));
    let prior = PriorTable::load(&paths.priors()).and_then(|t| t.to_distributions(&domain));
    if prior.is_none() {
        tracing::debug!("No prior table at {}", paths.priors().display());
    }

    let profiles: Vec<_> = HeuristicKind::ALL.iter().map(|k| k.profile()).collect();
    let refiner = CandidateRefiner::new(
        profiles.clone(),
        ScoringParams::from(&config.scoring),
        live,
        config.fusion.refine_iters,
        config.fusion.refine_topk,
    );
    let ranker = CandidateRanker::new(
        profiles,
        ScoringParams::from(&config.scoring),
        live,
        config.fusion.rescore_model_mix,
    );

    let fusion = FusionEngine::new(domain, params, memory, weights)
        .with_prior_table(prior)
        .with_model(model)
        .with_seed(config.closed_loop.seed)
        .with_learning(config.memory.learn)
        .with_refiner(refiner)
        .with_ranker(ranker)
        .with_trace_path(paths.fusion_trace());

    tracing::info!(
        "Engine ready: {} strategies, {} history rows",
        strategies.len(),
        history.len()
    );
    Ok(Engine {
        domain,
        history,
        strategies,
        fusion: Arc::new(fusion),
    })
}
