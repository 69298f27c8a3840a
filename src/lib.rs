// src/lib.rs
// Migration orchestrator - job scheduling for analysis and fix runs

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod analyzer;
pub mod backend;
pub mod config;
pub mod error;
pub mod facade;
pub mod http;
pub mod process;
pub mod results;
pub mod scheduler;

pub use error::{OrchestratorError, Result};
pub use facade::Orchestrator;
