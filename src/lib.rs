// src/lib.rs — Library root for delve

pub mod agents;
pub mod cli;
pub mod core;
pub mod hooks;
pub mod infra;
pub mod provider;
