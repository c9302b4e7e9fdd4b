// src/memory/mod.rs — Persistent adaptive state: decaying memory and strategy weights

pub mod decay;
pub mod store;
pub mod weights;

pub use decay::{Memory, MemoryParams};
pub use store::{InMemoryStore, JsonMemoryStore, MemoryStore, SharedMemory};
pub use weights::{JsonWeightStore, StatsLedger, TunedFusion, WeightFile, WeightResolver, WeightStore};
