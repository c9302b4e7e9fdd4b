// src/lib.rs — Library root for fusionloop

pub mod cli;
pub mod consult;
pub mod core;
pub mod fusion;
pub mod history;
pub mod infra;
pub mod memory;
pub mod scoring;
pub mod strategy;
