// Configuration manager for the orchestrator
//
// Resolution order, lowest to highest: built-in defaults, `orchestrator.toml`
// in the configuration directory, `OMICS_*` environment variables.

use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;

use super::types::{ConfigPaths, EnvVars, LogLevel, OrchestratorConfig, ValidationResult};
use crate::execution::RunnerConfig;

/// Loads, validates and saves [`OrchestratorConfig`]
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: OrchestratorConfig,
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Load from the default configuration directory
    pub async fn new() -> Result<Self> {
        let config_dir = Self::determine_config_dir()?;
        Self::load(config_dir).await
    }

    /// Load from `config_dir`, creating it when missing
    pub async fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();
        tracing::debug!("Using configuration directory: {:?}", config_dir);

        if !config_dir.exists() {
            async_fs::create_dir_all(&config_dir)
                .await
                .context("Failed to create configuration directory")?;
            tracing::info!("Created configuration directory: {:?}", config_dir);
        }

        let mut manager = Self {
            config: OrchestratorConfig::default(),
            config_dir,
        };
        manager.load_config_file().await?;
        manager.apply_overrides(|key| env::var(key).ok());

        tracing::debug!("Configuration loaded");
        Ok(manager)
    }

    fn determine_config_dir() -> Result<PathBuf> {
        if let Ok(config_dir) = env::var(EnvVars::CONFIG_DIR) {
            return Ok(PathBuf::from(config_dir));
        }
        ConfigPaths::default_config_dir()
    }

    async fn load_config_file(&mut self) -> Result<()> {
        let config_file = self.config_file();
        if !config_file.exists() {
            tracing::debug!("Configuration file not found, using defaults");
            return Ok(());
        }

        tracing::debug!("Loading configuration from: {:?}", config_file);
        let content = async_fs::read_to_string(&config_file)
            .await
            .with_context(|| format!("Failed to read {}", config_file.display()))?;

        self.config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_file.display()))?;
        Ok(())
    }

    /// Overlay values found through `lookup`, keyed by [`EnvVars`] names
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(engine) = lookup(EnvVars::ENGINE_BIN) {
            self.config.engine_binary = PathBuf::from(engine);
        }
        if let Some(work_root) = lookup(EnvVars::WORK_ROOT) {
            self.config.work_root = PathBuf::from(work_root);
        }
        if let Some(output_root) = lookup(EnvVars::OUTPUT_ROOT) {
            self.config.output_root = PathBuf::from(output_root);
        }
        if let Some(store_dir) = lookup(EnvVars::STORE_DIR) {
            self.config.store_dir = PathBuf::from(store_dir);
        }
        if let Some(profile) = lookup(EnvVars::ENGINE_PROFILE) {
            self.config.engine_profile = Some(profile).filter(|p| !p.is_empty());
        }
        if let Some(log_level) = lookup(EnvVars::LOG_LEVEL) {
            match log_level.parse::<LogLevel>() {
                Ok(level) => self.config.log_level = level,
                Err(e) => tracing::warn!("Ignoring {}: {}", EnvVars::LOG_LEVEL, e),
            }
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut OrchestratorConfig {
        &mut self.config
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(ConfigPaths::CONFIG_FILE)
    }

    /// Directory scanned for user template files
    pub fn templates_dir(&self) -> PathBuf {
        self.config_dir.join(ConfigPaths::TEMPLATES_DIR)
    }

    /// Validate the current configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        let engine = &self.config.engine_binary;

        if engine.as_os_str().is_empty() {
            result.add_error("engine_binary must not be empty".to_string());
        } else if engine.components().count() > 1 && !engine.exists() {
            result.add_warning(format!("Engine binary does not exist: {}", engine.display()));
        }

        for (key, value) in &self.config.environment {
            if key.is_empty() || key.contains('=') {
                result.add_error(format!("Invalid environment variable name: {:?}", key));
            } else if value.contains('\0') {
                result.add_error(format!("Environment variable {} contains a NUL byte", key));
            }
        }

        if self.config.work_root == self.config.output_root {
            result.add_warning("work_root and output_root are the same directory".to_string());
        }

        result
    }

    /// Runner settings for the engine described by this configuration
    pub fn runner_config(&self) -> RunnerConfig {
        let mut runner = RunnerConfig {
            engine_binary: self.config.engine_binary.clone(),
            ..RunnerConfig::default()
        };
        runner.environment.extend(
            self.config
                .environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        runner
    }

    /// Write the current configuration to `orchestrator.toml`
    pub async fn save(&self) -> Result<()> {
        let config_file = self.config_file();
        let content =
            toml::to_string_pretty(&self.config).context("Failed to serialize configuration")?;
        async_fs::write(&config_file, content)
            .await
            .with_context(|| format!("Failed to write {}", config_file.display()))?;

        tracing::info!("Configuration saved to {:?}", config_file);
        Ok(())
    }
}
