// Configuration module
//
// Orchestrator settings loaded from `orchestrator.toml` with `OMICS_*`
// environment overrides.

pub mod manager;
pub mod types;

pub use manager::ConfigManager;
pub use types::{ConfigPaths, EnvVars, LogLevel, OrchestratorConfig, ValidationResult};
