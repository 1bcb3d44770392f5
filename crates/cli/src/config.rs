//! `.codeloop/config.toml`

use anyhow::{Context, Result};
use orchestrator::{ConvergenceConfig, ProviderConfig};
use sandbox::{PythonRuntimeConfig, SessionConfig, SnapshotLimits};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CODELOOP_DIR: &str = ".codeloop";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeloopConfig {
    pub runtime: RuntimeConfig,
    pub execution: ExecutionConfig,
    pub orchestrator: OrchestratorConfig,
    pub provider: ProviderSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interpreter path; `python3` on PATH when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    pub preload_modules: Vec<String>,
    pub startup_timeout_ms: u64,
    pub denied_env_patterns: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let defaults = PythonRuntimeConfig::default();
        Self {
            interpreter: None,
            preload_modules: defaults.preload_modules,
            startup_timeout_ms: defaults.startup_timeout_ms,
            denied_env_patterns: defaults.denied_env_patterns,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub run_timeout_ms: u64,
    pub max_variables: usize,
    pub max_preview_chars: usize,
    pub max_depth: usize,
    pub excluded_prefixes: Vec<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        let snapshot = SnapshotLimits::default();
        Self {
            run_timeout_ms: 30_000,
            max_variables: snapshot.max_variables,
            max_preview_chars: snapshot.max_preview_chars,
            max_depth: snapshot.max_depth,
            excluded_prefixes: snapshot.excluded_prefixes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_iterations: u32,
    pub visualize: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let defaults = ConvergenceConfig::default();
        Self {
            max_iterations: defaults.max_iterations,
            visualize: defaults.visualize,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub primary_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ProviderSection {
    fn default() -> Self {
        let defaults = ProviderConfig::default();
        Self {
            base_url: defaults.base_url,
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            primary_model: defaults.model,
            fallback_model: None,
            temperature: defaults.temperature.unwrap_or(0.2),
            max_tokens: defaults.max_tokens.unwrap_or(4096),
        }
    }
}

impl CodeloopConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Project config under `dir`, then the user config directory, then defaults.
    pub fn discover(dir: &Path) -> Result<(Self, Option<PathBuf>)> {
        let candidates = [
            Some(project_config_path(dir)),
            dirs::config_dir().map(|d| d.join("codeloop").join(CONFIG_FILE)),
        ];
        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                return Ok((Self::load(&path)?, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn python_runtime(&self) -> PythonRuntimeConfig {
        let defaults = PythonRuntimeConfig::default();
        PythonRuntimeConfig {
            interpreter: self
                .runtime
                .interpreter
                .clone()
                .unwrap_or(defaults.interpreter),
            preload_modules: self.runtime.preload_modules.clone(),
            startup_timeout_ms: self.runtime.startup_timeout_ms,
            denied_env_patterns: self.runtime.denied_env_patterns.clone(),
        }
    }

    pub fn session(&self) -> SessionConfig {
        let execution = &self.execution;
        SessionConfig::default()
            .with_run_timeout(Duration::from_millis(execution.run_timeout_ms))
            .with_snapshot(
                SnapshotLimits::default()
                    .with_max_variables(execution.max_variables)
                    .with_max_preview_chars(execution.max_preview_chars)
                    .with_max_depth(execution.max_depth)
                    .with_excluded_prefixes(execution.excluded_prefixes.clone()),
            )
    }

    pub fn convergence(&self) -> ConvergenceConfig {
        ConvergenceConfig::default()
            .with_max_iterations(self.orchestrator.max_iterations)
            .with_visualize(self.orchestrator.visualize)
    }

    /// Provider config for `model`, with the key read from the configured variable.
    pub fn provider(&self, model: &str) -> Result<ProviderConfig> {
        let section = &self.provider;
        let api_key = std::env::var(&section.api_key_env).with_context(|| {
            format!(
                "Environment variable {} is not set; it must hold the provider API key",
                section.api_key_env
            )
        })?;
        Ok(ProviderConfig {
            base_url: section.base_url.clone(),
            api_key,
            model: model.to_string(),
            temperature: Some(section.temperature),
            max_tokens: Some(section.max_tokens),
            ..ProviderConfig::default()
        })
    }
}

pub fn project_config_path(dir: &Path) -> PathBuf {
    dir.join(CODELOOP_DIR).join(CONFIG_FILE)
}
