// src/strategy/random.rs — Seeded randomness for reproducible backtests
//
// Every consumer draws a fresh StdRng per (issue, call) so results do not
// depend on how concurrent issues interleave. Without a base seed the
// generators come from OS entropy (live mode).

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::core::types::{Candidate, Domain};

/// FNV-1a over the parts; stable across runs and platforms.
pub fn mix_seed(base: u64, salt: &str, issue_index: u64, call: u64) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut h = OFFSET;
    let mut feed = |bytes: &[u8]| {
        for b in bytes {
            h ^= *b as u64;
            h = h.wrapping_mul(PRIME);
        }
    };
    feed(&base.to_le_bytes());
    feed(salt.as_bytes());
    feed(&issue_index.to_le_bytes());
    feed(&call.to_le_bytes());
    h
}

/// Per-issue RNG stream for one consumer (a strategy, fusion, fallback).
#[derive(Debug)]
pub struct DrawSeeds {
    base: Option<u64>,
    salt: String,
    calls: Mutex<HashMap<u64, u64>>,
}

impl DrawSeeds {
    pub fn new(base: Option<u64>, salt: impl Into<String>) -> Self {
        Self {
            base,
            salt: salt.into(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_live(&self) -> bool {
        self.base.is_none()
    }

    /// RNG for the next call on `issue_index`.
    pub fn next_rng(&self, issue_index: u64) -> StdRng {
        let Some(base) = self.base else {
            return StdRng::from_entropy();
        };
        let call = {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            let c = calls.entry(issue_index).or_insert(0);
            *c += 1;
            *c
        };
        StdRng::seed_from_u64(mix_seed(base, &self.salt, issue_index, call))
    }

    /// Uniform-random valid candidate for `issue_index`.
    pub fn random_candidate(&self, domain: &Domain, issue_index: u64) -> Candidate {
        domain.random_candidate(&mut self.next_rng(issue_index))
    }

    /// Forget call counters for a finished issue.
    pub fn release(&self, issue_index: u64) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.remove(&issue_index);
        }
    }
}
