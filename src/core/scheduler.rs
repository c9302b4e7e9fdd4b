// src/core/scheduler.rs — Closed-loop retry scheduler
//
// One issue runs in rounds until a candidate matches or the budget runs out:
// every strategy once, one fusion of the round's proposals, one random
// fallback, and a consult call whenever the attempt count crosses the next
// consult threshold. The budget is checked before every single attempt.

use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::budget::{BudgetLimits, Clock, IssueBudget, SystemClock};
use super::cancel::CancellationToken;
use super::state::AttemptLog;
use super::summary::ClosedLoopSummary;
use super::types::*;
use crate::consult::ConsultGate;
use crate::fusion::FusionEngine;
use crate::infra::errors::FusionLoopError;
use crate::memory::StatsLedger;
use crate::strategy::random::DrawSeeds;
use crate::strategy::{self, Invocation, Strategy};

pub type ProgressFn = Box<dyn Fn(LoopEvent) + Send + Sync>;

/// Everything one issue produced.
#[derive(Debug, Clone)]
pub struct IssueOutcome {
    pub state: IssueState,
    pub attempts: Vec<Attempt>,
}

pub struct ClosedLoopScheduler {
    strategies: Vec<Arc<dyn Strategy>>,
    fusion: Arc<FusionEngine>,
    consult: Option<Arc<ConsultGate>>,
    consult_interval: u32,
    domain: Domain,
    limits: BudgetLimits,
    clock: Arc<dyn Clock>,
    fallback: DrawSeeds,
    attempt_log: Option<AttemptLog>,
    ledger: Arc<StatsLedger>,
    concurrency: usize,
    sleep_interval: Duration,
    summary_path: Option<PathBuf>,
    on_progress: Option<ProgressFn>,
}

impl ClosedLoopScheduler {
    /// Completed issues feed the fusion engine's own stats ledger, so dynamic
    /// weights follow the run.
    pub fn new(
        strategies: Vec<Arc<dyn Strategy>>,
        fusion: Arc<FusionEngine>,
        limits: BudgetLimits,
    ) -> Self {
        let domain = *fusion.domain();
        let ledger = fusion.weights().ledger().clone();
        Self {
            strategies,
            fusion,
            consult: None,
            consult_interval: 12,
            domain,
            limits,
            clock: Arc::new(SystemClock),
            fallback: DrawSeeds::new(None, FALLBACK_ID),
            attempt_log: None,
            ledger,
            concurrency: 1,
            sleep_interval: Duration::ZERO,
            summary_path: None,
            on_progress: None,
        }
    }

    pub fn with_consult(mut self, gate: Arc<ConsultGate>, interval: u32) -> Self {
        self.consult = Some(gate);
        self.consult_interval = interval.max(1);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.fallback = DrawSeeds::new(seed, FALLBACK_ID);
        self
    }

    pub fn with_attempt_log(mut self, path: PathBuf) -> Self {
        self.attempt_log = Some(AttemptLog::new(path));
        self
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    /// Pause between rounds.
    pub fn with_sleep_interval(mut self, interval: Duration) -> Self {
        self.sleep_interval = interval;
        self
    }

    pub fn with_summary_path(mut self, path: PathBuf) -> Self {
        self.summary_path = Some(path);
        self
    }

    pub fn with_progress(mut self, cb: impl Fn(LoopEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(cb));
        self
    }

    pub fn ledger(&self) -> &Arc<StatsLedger> {
        &self.ledger
    }

    fn emit(&self, event: LoopEvent) {
        if let Some(ref cb) = self.on_progress {
            cb(event);
        }
    }

    /// True while another attempt is allowed. Marks the state exhausted on
    /// the first limit hit.
    fn admit(&self, budget: &IssueBudget, state: &mut IssueState) -> bool {
        if state.matched {
            return false;
        }
        match budget.exhausted_by(state.attempts) {
            None => true,
            Some(reason) => {
                if state.phase != LoopPhase::Exhausted {
                    let remark = budget.remark(reason, state.attempts);
                    tracing::info!("Issue {}: {}", state.issue_index, remark);
                    state.exhaust(reason, remark);
                }
                false
            }
        }
    }

    /// Record one attempt. Returns true on a match.
    fn push(
        &self,
        state: &mut IssueState,
        attempts: &mut Vec<Attempt>,
        truth: &IssueRecord,
        strategy_id: &str,
        candidate: Candidate,
        meta: Meta,
    ) -> bool {
        let attempt = state.record(strategy_id, candidate, truth, meta);
        if let Some(log) = &self.attempt_log {
            log.append(&attempt);
        }
        self.emit(LoopEvent::AttemptRecorded {
            issue_index: attempt.issue_index,
            strategy_id: attempt.strategy_id.clone(),
            ordinal: attempt.ordinal,
            is_match: attempt.is_match,
        });
        if attempt.is_match {
            tracing::info!(
                "Issue {} matched by '{}' on attempt {}",
                attempt.issue_index,
                attempt.strategy_id,
                attempt.ordinal
            );
        }
        let matched = attempt.is_match;
        attempts.push(attempt);
        matched
    }

    /// The fused candidate (learned into memory), or a substituted random
    /// candidate when fusion failed.
    fn fusion_attempt(
        &self,
        fused: Result<Candidate, FusionLoopError>,
        round: &[Proposal],
        issue: u64,
    ) -> Invocation {
        match fused {
            Ok(candidate) => {
                let batch: Vec<Candidate> = round.iter().map(|p| p.candidate.clone()).collect();
                if let Err(e) = self.fusion.update_memory(&candidate, &batch) {
                    tracing::warn!("Memory update failed: {}", e);
                }
                Invocation {
                    candidate,
                    meta: Meta::new(),
                }
            }
            Err(e) => strategy::substitute(FUSION_ID, issue, e.to_string(), &self.domain, &self.fallback),
        }
    }

    /// Drive one issue to a match, a budget limit, or cancellation.
    pub async fn run_issue(&self, record: &IssueRecord, cancel: &CancellationToken) -> IssueOutcome {
        let issue = record.index;
        self.emit(LoopEvent::IssueStart {
            issue_index: issue,
            label: record.label.clone(),
        });

        let budget = IssueBudget::start(self.limits, self.clock.clone());
        let mut state = IssueState::new(issue);
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut next_consult = self.consult_interval;

        'rounds: loop {
            if cancel.is_cancelled() {
                state.cancel();
                break;
            }

            let mut round: Vec<Proposal> = Vec::with_capacity(self.strategies.len());
            for s in &self.strategies {
                if !self.admit(&budget, &mut state) {
                    break 'rounds;
                }
                let inv = strategy::invoke(s.as_ref(), issue, &self.domain, &self.fallback).await;
                round.push(Proposal::new(s.id(), inv.candidate.clone()));
                if self.push(&mut state, &mut attempts, record, s.id(), inv.candidate, inv.meta) {
                    break 'rounds;
                }
            }

            if !self.admit(&budget, &mut state) {
                break;
            }
            let fused = self.fusion_attempt(self.fusion.fuse(&round, issue), &round, issue);
            if self.push(&mut state, &mut attempts, record, FUSION_ID, fused.candidate, fused.meta) {
                break;
            }

            if !self.admit(&budget, &mut state) {
                break;
            }
            let random = self.fallback.random_candidate(&self.domain, issue);
            if self.push(&mut state, &mut attempts, record, FALLBACK_ID, random, Meta::new()) {
                break;
            }

            if let Some(gate) = &self.consult {
                if state.attempts >= next_consult {
                    while next_consult <= state.attempts {
                        next_consult = next_consult.saturating_add(self.consult_interval);
                    }
                    if !self.admit(&budget, &mut state) {
                        break;
                    }
                    match gate.consult(issue, &attempts, &self.domain).await {
                        Ok(Some(candidate)) => {
                            let mut meta = Meta::new();
                            meta.insert("client".into(), gate.client_id().into());
                            if self.push(&mut state, &mut attempts, record, CONSULT_ID, candidate, meta) {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!("Consult failed on issue {}: {}", issue, e),
                    }
                }
            }

            if !self.sleep_interval.is_zero() && cancel.sleep_or_cancel(self.sleep_interval).await {
                state.cancel();
                break;
            }
        }

        state.elapsed_ms = budget.elapsed().as_millis() as u64;
        self.fallback.release(issue);
        self.fusion.release(issue);
        self.emit(LoopEvent::IssueEnd {
            issue_index: issue,
            matched: state.matched,
            attempts: state.attempts,
            stop_reason: state.stop_reason,
        });
        IssueOutcome { state, attempts }
    }

    /// Run every issue through a bounded worker pool. Issues not yet started
    /// when `cancel` fires are skipped.
    pub async fn run_batch(
        &self,
        records: &[IssueRecord],
        cancel: &CancellationToken,
    ) -> ClosedLoopSummary {
        tracing::info!(
            "Closed loop over {} issues (concurrency {})",
            records.len(),
            self.concurrency
        );

        let states: Vec<IssueState> = stream::iter(records.iter())
            .map(|record| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let outcome = self.run_issue(record, cancel).await;
                self.ledger.record(record.index, outcome.state.strategies.clone());
                Some(outcome.state)
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|s| async move { s })
            .collect()
            .await;

        let cancelled = cancel.is_cancelled();
        let summary = ClosedLoopSummary::build(states, &self.limits, cancelled);
        if let Some(path) = &self.summary_path {
            if let Err(e) = summary.save(path) {
                tracing::warn!("Failed to write closed-loop summary: {}", e);
            }
        }

        self.emit(LoopEvent::BatchComplete {
            issues: summary.total_issues,
            total_attempts: summary.total_attempts,
            total_matches: summary.total_matches,
            cancelled,
        });
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::budget::ManualClock;
    use crate::fusion::FusionParams;
    use crate::memory::{MemoryParams, SharedMemory, WeightResolver};
    use async_trait::async_trait;

    /// Always proposes the same candidate.
    struct Fixed {
        id: String,
        candidate: Candidate,
    }

    #[async_trait]
    impl Strategy for Fixed {
        fn id(&self) -> &str {
            &self.id
        }
        async fn generate(&self, _issue_index: u64) -> Result<Candidate, FusionLoopError> {
            Ok(self.candidate.clone())
        }
    }

    fn cand(p: [u32; 6], s: u32) -> Candidate {
        Candidate::new(p, s, &Domain::default()).unwrap()
    }

    fn truth(p: [u32; 6], s: u32) -> IssueRecord {
        IssueRecord {
            index: 0,
            label: "2024001".into(),
            draw: cand(p, s),
        }
    }

    fn fusion() -> Arc<FusionEngine> {
        Arc::new(
            FusionEngine::new(
                Domain::default(),
                FusionParams::default(),
                Arc::new(SharedMemory::in_memory(MemoryParams::default())),
                Arc::new(WeightResolver::uniform()),
            )
            .with_seed(Some(1)),
        )
    }

    fn fixed(id: &str, c: Candidate) -> Arc<dyn Strategy> {
        Arc::new(Fixed {
            id: id.into(),
            candidate: c,
        })
    }

    fn limits(max: u32) -> BudgetLimits {
        BudgetLimits {
            max_attempts: Some(max),
            max_duration: None,
        }
    }

    #[tokio::test]
    async fn test_round_order() {
        let s = ClosedLoopScheduler::new(
            vec![fixed("a", cand([1, 2, 3, 4, 5, 6], 1))],
            fusion(),
            limits(6),
        )
        .with_seed(Some(3));
        let out = s
            .run_issue(&truth([28, 29, 30, 31, 32, 33], 16), &CancellationToken::new())
            .await;
        let ids: Vec<&str> = out.attempts.iter().map(|a| a.strategy_id.as_str()).collect();
        assert_eq!(ids[..3], ["a", FUSION_ID, FALLBACK_ID]);
        assert_eq!(ids[3..6], ["a", FUSION_ID, FALLBACK_ID]);
    }

    #[test]
    fn test_failed_fusion_substitutes_random_candidate() {
        let s = ClosedLoopScheduler::new(vec![], fusion(), limits(6)).with_seed(Some(3));
        let inv = s.fusion_attempt(
            Err(FusionLoopError::InvalidCandidate("expected 6 primaries, got 5".into())),
            &[],
            7,
        );
        assert!(inv.substituted());
        assert!(inv.meta["error"].as_str().unwrap().contains("expected 6 primaries"));
        assert_eq!(inv.candidate.primary().len(), 6);
    }

    #[test]
    fn test_successful_fusion_kept_untagged() {
        let s = ClosedLoopScheduler::new(vec![], fusion(), limits(6));
        let c = cand([3, 8, 14, 19, 25, 30], 9);
        let round = [Proposal::new("a", c.clone())];
        let inv = s.fusion_attempt(Ok(c.clone()), &round, 0);
        assert!(!inv.substituted());
        assert_eq!(inv.candidate, c);
    }

    #[tokio::test]
    async fn test_match_stops_immediately() {
        let target = cand([1, 2, 3, 4, 5, 6], 1);
        let s = ClosedLoopScheduler::new(
            vec![
                fixed("miss", cand([7, 8, 9, 10, 11, 12], 2)),
                fixed("hit", target.clone()),
                fixed("never", cand([7, 8, 9, 10, 11, 12], 2)),
            ],
            fusion(),
            limits(100),
        );
        let out = s
            .run_issue(&truth([1, 2, 3, 4, 5, 6], 1), &CancellationToken::new())
            .await;
        assert!(out.state.matched);
        assert_eq!(out.state.attempts, 2);
        assert_eq!(out.state.matched_strategy.as_deref(), Some("hit"));
        assert_eq!(out.state.stop_reason, Some(StopReason::Matched));
        assert!(out.state.remarks.is_none());
    }

    #[tokio::test]
    async fn test_time_limit_with_manual_clock() {
        let clock = Arc::new(ManualClock::new());
        clock.advance(Duration::from_secs(5));
        let s = ClosedLoopScheduler::new(
            vec![fixed("a", cand([1, 2, 3, 4, 5, 6], 1))],
            fusion(),
            BudgetLimits {
                max_attempts: None,
                max_duration: Some(Duration::ZERO),
            },
        )
        .with_clock(clock);
        let out = s
            .run_issue(&truth([28, 29, 30, 31, 32, 33], 16), &CancellationToken::new())
            .await;
        assert_eq!(out.state.attempts, 0);
        assert_eq!(out.state.stop_reason, Some(StopReason::TimeLimit));
        assert_eq!(out.state.phase, LoopPhase::Exhausted);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let s = ClosedLoopScheduler::new(
            vec![fixed("a", cand([1, 2, 3, 4, 5, 6], 1))],
            fusion(),
            limits(10),
        );
        let out = s.run_issue(&truth([28, 29, 30, 31, 32, 33], 16), &cancel).await;
        assert_eq!(out.state.phase, LoopPhase::Cancelled);
        assert_eq!(out.state.attempts, 0);
    }

    #[tokio::test]
    async fn test_batch_feeds_ledger() {
        let s = ClosedLoopScheduler::new(
            vec![fixed("a", cand([1, 2, 3, 4, 5, 6], 1))],
            fusion(),
            limits(3),
        );
        let records: Vec<IssueRecord> = (0..4)
            .map(|i| IssueRecord {
                index: i,
                label: format!("{}", i),
                draw: cand([28, 29, 30, 31, 32, 33], 16),
            })
            .collect();
        let summary = s.run_batch(&records, &CancellationToken::new()).await;
        assert_eq!(summary.total_issues, 4);
        assert_eq!(summary.total_attempts, 12);
        assert_eq!(s.ledger().len(), 4);
    }
}
