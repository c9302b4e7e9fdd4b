// src/scoring/mod.rs — Number-level bias scoring

pub mod bias;

pub use bias::{adjust_secondary, rerank, score_numbers, Axis, BiasProfile, NumberScores, ScoringParams};
