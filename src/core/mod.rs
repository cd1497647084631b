// src/core/mod.rs — Research engine: governors, executor and the iteration loop

pub mod context;
pub mod cost;
pub mod decode;
pub mod executor;
pub mod orchestrator;
pub mod rate_limiter;
pub mod safety;
pub mod token_budget;
pub mod truncation;
pub mod types;
