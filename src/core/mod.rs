// src/core/mod.rs — Closed-loop engine: domain types, budgets, scheduling, live mode

pub mod budget;
pub mod cancel;
pub mod continuous;
pub mod scheduler;
pub mod state;
pub mod summary;
pub mod types;
