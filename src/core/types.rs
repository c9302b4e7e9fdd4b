// src/core/types.rs — Core domain types

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;

use crate::infra::config::DomainConfig;
use crate::infra::errors::FusionLoopError;

/// Strategy id recorded for fused attempts.
pub const FUSION_ID: &str = "fusion";
/// Strategy id recorded for uniform-random fallback attempts.
pub const FALLBACK_ID: &str = "fallback";
/// Strategy id recorded for external consult attempts.
pub const CONSULT_ID: &str = "consult";

/// Free-form attempt metadata.
pub type Meta = serde_json::Map<String, serde_json::Value>;

/// Shape of the number space: K primaries from [1,P] plus one secondary from [1,S].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub primary_count: usize,
    pub primary_max: u32,
    pub secondary_max: u32,
}

impl Default for Domain {
    fn default() -> Self {
        Self {
            primary_count: 6,
            primary_max: 33,
            secondary_max: 16,
        }
    }
}

impl From<&DomainConfig> for Domain {
    fn from(cfg: &DomainConfig) -> Self {
        Self {
            primary_count: cfg.primary_count,
            primary_max: cfg.primary_max,
            secondary_max: cfg.secondary_max,
        }
    }
}

impl Domain {
    pub fn validate(&self) -> Result<(), FusionLoopError> {
        if self.primary_count == 0 || self.secondary_max == 0 {
            return Err(FusionLoopError::Config(
                "domain needs at least one primary and one secondary value".into(),
            ));
        }
        if (self.primary_max as usize) < self.primary_count {
            return Err(FusionLoopError::Config(format!(
                "cannot draw {} distinct primaries from [1,{}]",
                self.primary_count, self.primary_max
            )));
        }
        Ok(())
    }

    pub fn primary_range(&self) -> RangeInclusive<u32> {
        1..=self.primary_max
    }

    pub fn secondary_range(&self) -> RangeInclusive<u32> {
        1..=self.secondary_max
    }

    pub fn contains_primary(&self, n: u32) -> bool {
        self.primary_range().contains(&n)
    }

    pub fn contains_secondary(&self, n: u32) -> bool {
        self.secondary_range().contains(&n)
    }

    /// Uniform-random valid candidate.
    pub fn random_candidate<R: Rng + ?Sized>(&self, rng: &mut R) -> Candidate {
        let mut primary: Vec<u32> =
            rand::seq::index::sample(rng, self.primary_max as usize, self.primary_count)
                .into_iter()
                .map(|i| i as u32 + 1)
                .collect();
        primary.sort_unstable();
        Candidate {
            primary,
            secondary: rng.gen_range(self.secondary_range()),
        }
    }
}

/// One proposed primary set plus secondary value. Primaries are kept sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    primary: Vec<u32>,
    secondary: u32,
}

impl Candidate {
    pub fn new(
        primary: impl IntoIterator<Item = u32>,
        secondary: u32,
        domain: &Domain,
    ) -> Result<Self, FusionLoopError> {
        let mut primary: Vec<u32> = primary.into_iter().collect();
        if primary.len() != domain.primary_count {
            return Err(FusionLoopError::InvalidCandidate(format!(
                "expected {} primaries, got {}",
                domain.primary_count,
                primary.len()
            )));
        }
        if let Some(bad) = primary.iter().find(|n| !domain.contains_primary(**n)) {
            return Err(FusionLoopError::InvalidCandidate(format!(
                "primary {} outside [1,{}]",
                bad, domain.primary_max
            )));
        }
        primary.sort_unstable();
        if primary.windows(2).any(|w| w[0] == w[1]) {
            return Err(FusionLoopError::InvalidCandidate(
                "duplicate primary values".into(),
            ));
        }
        if !domain.contains_secondary(secondary) {
            return Err(FusionLoopError::InvalidCandidate(format!(
                "secondary {} outside [1,{}]",
                secondary, domain.secondary_max
            )));
        }
        Ok(Self { primary, secondary })
    }

    pub fn primary(&self) -> &[u32] {
        &self.primary
    }

    pub fn secondary(&self) -> u32 {
        self.secondary
    }

    /// Number of primaries shared with `other`.
    pub fn overlap(&self, other: &Candidate) -> usize {
        let (mut i, mut j, mut shared) = (0, 0, 0);
        while i < self.primary.len() && j < other.primary.len() {
            match self.primary[i].cmp(&other.primary[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    shared += 1;
                    i += 1;
                    j += 1;
                }
            }
        }
        shared
    }

    pub fn matches(&self, record: &IssueRecord) -> bool {
        *self == record.draw
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let primary: Vec<String> = self.primary.iter().map(|n| format!("{:02}", n)).collect();
        write!(f, "{} + {:02}", primary.join(" "), self.secondary)
    }
}

/// One historical record with its ground truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub index: u64,
    /// The record's own identifier, for reporting.
    pub label: String,
    pub draw: Candidate,
}

/// One recorded generation within an issue's closed loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub id: String,
    pub issue_index: u64,
    pub strategy_id: String,
    pub candidate: Candidate,
    pub is_match: bool,
    /// 1-based position within the issue.
    pub ordinal: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub meta: Meta,
}

/// A `(strategy, candidate)` pair offered to fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub strategy_id: String,
    pub candidate: Candidate,
}

impl Proposal {
    pub fn new(strategy_id: impl Into<String>, candidate: Candidate) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            candidate,
        }
    }
}

impl From<&Attempt> for Proposal {
    fn from(a: &Attempt) -> Self {
        Self {
            strategy_id: a.strategy_id.clone(),
            candidate: a.candidate.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub attempts: u32,
    pub matches: u32,
}

impl StrategyStats {
    pub fn absorb(&mut self, other: &StrategyStats) {
        self.attempts += other.attempts;
        self.matches += other.matches;
    }
}

/// Per-issue loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Open,
    Running,
    Matched,
    Exhausted,
    Cancelled,
}

/// Why an issue's loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Matched,
    AttemptLimit,
    TimeLimit,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Matched => write!(f, "matched"),
            StopReason::AttemptLimit => write!(f, "attempt limit"),
            StopReason::TimeLimit => write!(f, "time limit"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueState {
    pub issue_index: u64,
    pub attempts: u32,
    pub matched: bool,
    pub matched_strategy: Option<String>,
    pub matched_ordinal: Option<u32>,
    pub matched_candidate: Option<Candidate>,
    pub strategies: BTreeMap<String, StrategyStats>,
    pub phase: LoopPhase,
    pub stop_reason: Option<StopReason>,
    pub remarks: Option<String>,
    pub consult_attempts: u32,
    pub consult_matched: bool,
    pub elapsed_ms: u64,
}

impl IssueState {
    pub fn new(issue_index: u64) -> Self {
        Self {
            issue_index,
            attempts: 0,
            matched: false,
            matched_strategy: None,
            matched_ordinal: None,
            matched_candidate: None,
            strategies: BTreeMap::new(),
            phase: LoopPhase::Open,
            stop_reason: None,
            remarks: None,
            consult_attempts: 0,
            consult_matched: false,
            elapsed_ms: 0,
        }
    }

    /// Record one attempt against the issue's ground truth.
    pub fn record(
        &mut self,
        strategy_id: &str,
        candidate: Candidate,
        truth: &IssueRecord,
        meta: Meta,
    ) -> Attempt {
        self.attempts += 1;
        self.phase = LoopPhase::Running;
        let is_match = candidate.matches(truth);

        let stats = self.strategies.entry(strategy_id.to_string()).or_default();
        stats.attempts += 1;
        if strategy_id == CONSULT_ID {
            self.consult_attempts += 1;
        }
        if is_match {
            stats.matches += 1;
            self.matched = true;
            self.matched_strategy = Some(strategy_id.to_string());
            self.matched_ordinal = Some(self.attempts);
            self.matched_candidate = Some(candidate.clone());
            self.phase = LoopPhase::Matched;
            self.stop_reason = Some(StopReason::Matched);
            if strategy_id == CONSULT_ID {
                self.consult_matched = true;
            }
        }

        Attempt {
            id: uuid::Uuid::new_v4().to_string(),
            issue_index: self.issue_index,
            strategy_id: strategy_id.to_string(),
            candidate,
            is_match,
            ordinal: self.attempts,
            timestamp: Utc::now(),
            meta,
        }
    }

    /// Close the loop without a match.
    pub fn cancel(&mut self) {
        self.phase = LoopPhase::Cancelled;
        self.remarks = Some(format!("cancelled after {} attempts", self.attempts));
    }

    pub fn exhaust(&mut self, reason: StopReason, remarks: String) {
        self.phase = LoopPhase::Exhausted;
        self.stop_reason = Some(reason);
        self.remarks = Some(remarks);
    }
}

/// Progress events emitted by the scheduler and the continuous runner.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    IssueStart {
        issue_index: u64,
        label: String,
    },
    AttemptRecorded {
        issue_index: u64,
        strategy_id: String,
        ordinal: u32,
        is_match: bool,
    },
    IssueEnd {
        issue_index: u64,
        matched: bool,
        attempts: u32,
        stop_reason: Option<StopReason>,
    },
    BatchComplete {
        issues: usize,
        total_attempts: u64,
        total_matches: u64,
        cancelled: bool,
    },
    Tick {
        tick: u64,
        virtual_issue: u64,
        fused: Candidate,
        candidates: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn domain() -> Domain {
        Domain::default()
    }

    fn truth(primary: [u32; 6], secondary: u32) -> IssueRecord {
        IssueRecord {
            index: 7,
            label: "2024007".into(),
            draw: Candidate::new(primary, secondary, &domain()).unwrap(),
        }
    }

    // ─── Domain ─────────────────────────────────────────────────

    #[test]
    fn test_domain_validate() {
        assert!(domain().validate().is_ok());
        let bad = Domain {
            primary_count: 6,
            primary_max: 5,
            secondary_max: 16,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_random_candidate_is_valid() {
        let d = domain();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let c = d.random_candidate(&mut rng);
            assert!(Candidate::new(c.primary().to_vec(), c.secondary(), &d).is_ok());
        }
    }

    // ─── Candidate ──────────────────────────────────────────────

    #[test]
    fn test_candidate_sorts_primary() {
        let c = Candidate::new([9, 3, 1, 33, 12, 20], 4, &domain()).unwrap();
        assert_eq!(c.primary(), &[1, 3, 9, 12, 20, 33]);
        assert_eq!(c.secondary(), 4);
    }

    #[test]
    fn test_candidate_rejects_invalid() {
        let d = domain();
        assert!(Candidate::new([1, 2, 3, 4, 5], 1, &d).is_err());
        assert!(Candidate::new([1, 2, 3, 4, 5, 5], 1, &d).is_err());
        assert!(Candidate::new([0, 2, 3, 4, 5, 6], 1, &d).is_err());
        assert!(Candidate::new([1, 2, 3, 4, 5, 34], 1, &d).is_err());
        assert!(Candidate::new([1, 2, 3, 4, 5, 6], 17, &d).is_err());
        assert!(Candidate::new([1, 2, 3, 4, 5, 6], 0, &d).is_err());
    }

    #[test]
    fn test_overlap_counts_shared_primaries() {
        let d = domain();
        let a = Candidate::new([1, 2, 3, 4, 5, 6], 1, &d).unwrap();
        let b = Candidate::new([4, 5, 6, 7, 8, 9], 1, &d).unwrap();
        assert_eq!(a.overlap(&b), 3);
        assert_eq!(a.overlap(&a), 6);
    }

    #[test]
    fn test_display_format() {
        let c = Candidate::new([1, 2, 3, 4, 5, 33], 9, &domain()).unwrap();
        assert_eq!(c.to_string(), "01 02 03 04 05 33 + 09");
    }

    // ─── IssueState ─────────────────────────────────────────────

    #[test]
    fn test_record_tracks_stats_and_match() {
        let t = truth([1, 2, 3, 4, 5, 6], 7);
        let mut state = IssueState::new(7);
        assert_eq!(state.phase, LoopPhase::Open);

        let miss = Candidate::new([1, 2, 3, 4, 5, 6], 8, &domain()).unwrap();
        let a1 = state.record("stride", miss, &t, Meta::new());
        assert!(!a1.is_match);
        assert_eq!(a1.ordinal, 1);
        assert_eq!(state.phase, LoopPhase::Running);

        let hit = t.draw.clone();
        let a2 = state.record(CONSULT_ID, hit, &t, Meta::new());
        assert!(a2.is_match);
        assert_eq!(state.matched_ordinal, Some(2));
        assert_eq!(state.matched_strategy.as_deref(), Some(CONSULT_ID));
        assert!(state.consult_matched);
        assert_eq!(state.phase, LoopPhase::Matched);
        assert_eq!(state.strategies["stride"].attempts, 1);
        assert_eq!(state.strategies[CONSULT_ID].matches, 1);
    }

    #[test]
    fn test_exhaust_sets_remark() {
        let mut state = IssueState::new(1);
        state.exhaust(StopReason::AttemptLimit, "attempt limit 5 reached".into());
        assert_eq!(state.phase, LoopPhase::Exhausted);
        assert_eq!(state.stop_reason, Some(StopReason::AttemptLimit));
        assert!(!state.matched);
        assert!(state.remarks.is_some());
    }
}
