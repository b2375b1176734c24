// Configuration types for the orchestrator
//
// The TOML file, environment overrides and the runner settings derived from
// them all meet here.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::workflow::JobId;

/// Log level for the orchestrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Error => write!(f, "error"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Trace => write!(f, "trace"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

/// Orchestrator settings, stored as `orchestrator.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Engine executable, a bare name is looked up on `PATH`
    pub engine_binary: PathBuf,
    /// Parent of the per-job working directories
    pub work_root: PathBuf,
    /// Parent of the per-job output directories
    pub output_root: PathBuf,
    /// Root of the JSON job store
    pub store_dir: PathBuf,
    /// Engine profile applied when a run names none
    pub engine_profile: Option<String>,
    /// Extra variables for every engine process
    pub environment: BTreeMap<String, String>,
    pub log_level: LogLevel,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let temp = std::env::temp_dir();
        let store_dir = dirs::data_local_dir()
            .map(|dir| dir.join(ConfigPaths::APP_DIR_NAME).join("store"))
            .unwrap_or_else(|| temp.join("omics-orchestrator-store"));

        Self {
            engine_binary: PathBuf::from("nextflow"),
            work_root: temp.clone(),
            output_root: temp,
            store_dir,
            engine_profile: None,
            environment: BTreeMap::new(),
            log_level: LogLevel::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Working directory of one job
    pub fn work_dir_for(&self, job_id: &JobId) -> PathBuf {
        self.work_root.join(format!("nextflow-work-{}", job_id))
    }

    /// Output directory of one job
    pub fn output_dir_for(&self, job_id: &JobId) -> PathBuf {
        self.output_root.join(format!("nextflow-output-{}", job_id))
    }
}

/// Configuration validation result
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.is_valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn has_issues(&self) -> bool {
        !self.errors.is_empty() || !self.warnings.is_empty()
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Environment variables read by the orchestrator
pub struct EnvVars;

impl EnvVars {
    pub const CONFIG_DIR: &'static str = "OMICS_CONFIG_DIR";
    pub const ENGINE_BIN: &'static str = "OMICS_ENGINE_BIN";
    pub const WORK_ROOT: &'static str = "OMICS_WORK_ROOT";
    pub const OUTPUT_ROOT: &'static str = "OMICS_OUTPUT_ROOT";
    pub const STORE_DIR: &'static str = "OMICS_STORE_DIR";
    pub const ENGINE_PROFILE: &'static str = "OMICS_ENGINE_PROFILE";
    pub const LOG_LEVEL: &'static str = "OMICS_LOG_LEVEL";
}

/// Configuration file paths and names
pub struct ConfigPaths;

impl ConfigPaths {
    pub const APP_DIR_NAME: &'static str = "omics-orchestrator";

    pub const CONFIG_FILE: &'static str = "orchestrator.toml";

    /// Templates picked up by the catalog
    pub const TEMPLATES_DIR: &'static str = "templates";

    /// Get the default configuration directory
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(Self::APP_DIR_NAME))
            .context("Failed to determine configuration directory")
    }

    /// Get the default configuration file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::default_config_dir()?.join(Self::CONFIG_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_log_level_display_and_parse() {
        assert_eq!(LogLevel::Error.to_string(), "error");
        assert_eq!(LogLevel::Debug.to_string(), "debug");
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.engine_binary, PathBuf::from("nextflow"));
        assert_eq!(config.work_root, std::env::temp_dir());
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.engine_profile.is_none());
        assert!(config.environment.is_empty());
    }

    #[test]
    fn test_job_directories() {
        let config = OrchestratorConfig {
            work_root: PathBuf::from("/scratch/work"),
            output_root: PathBuf::from("/scratch/out"),
            ..OrchestratorConfig::default()
        };
        let job_id = Uuid::nil();

        assert_eq!(
            config.work_dir_for(&job_id),
            PathBuf::from("/scratch/work/nextflow-work-00000000-0000-0000-0000-000000000000")
        );
        assert_eq!(
            config.output_dir_for(&job_id),
            PathBuf::from("/scratch/out/nextflow-output-00000000-0000-0000-0000-000000000000")
        );
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: OrchestratorConfig = toml::from_str(
            r#"
engine_binary = "/opt/nextflow/bin/nextflow"
log_level = "debug"

[environment]
NXF_OPTS = "-Xms1g"
"#,
        )
        .unwrap();

        assert_eq!(config.engine_binary, PathBuf::from("/opt/nextflow/bin/nextflow"));
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.environment.get("NXF_OPTS").map(String::as_str), Some("-Xms1g"));
        assert_eq!(config.work_root, std::env::temp_dir());
    }

    #[test]
    fn test_validation_result() {
        let mut result = ValidationResult::new();
        assert!(result.is_valid);
        assert!(!result.has_issues());

        result.add_warning("Test warning".to_string());
        assert!(result.is_valid);
        assert!(result.has_issues());

        result.add_error("Test error".to_string());
        assert!(!result.is_valid);
    }

    #[test]
    fn test_config_paths() {
        if let Ok(file) = ConfigPaths::config_file() {
            assert!(file.ends_with("omics-orchestrator/orchestrator.toml"));
        }
    }
}
