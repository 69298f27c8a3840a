// src/config/mod.rs
// Configuration: environment knobs and the analysis configuration file

pub mod env;
pub mod file;

pub use env::{ConfigValidation, EnvConfig};
pub use file::{AnalysisConfig, ProviderEntry};
