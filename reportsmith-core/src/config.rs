//! Configuration system for reportsmith.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/reportsmith/config.toml` and/or
//! `.reportsmith/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Top-level configuration for a report run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub assembly: AssemblyConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl ReportConfig {
    /// Validate every section, returning the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.validate()?;
        self.retrieval.validate()?;
        self.llm.throttle.validate("llm")?;
        Ok(())
    }
}

/// Longest accepted pause between sections.
pub const MAX_SECTION_PAUSE_MS: u64 = 10_000;

/// Knobs of the revision loop and the pipeline state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum critique score (1-10) that accepts a draft.
    pub acceptance_threshold: u8,
    /// Extra drafting attempts allowed per section after the first one.
    pub max_revisions: u32,
    /// Pause between an accepted section and the next drafting attempt.
    pub section_pause_ms: u64,
    /// Whole-run timeout; `None` disables it.
    pub run_timeout_secs: Option<u64>,
    /// Upper bound on outline length accepted from the planner.
    pub max_outline_sections: usize,
    /// An evidence slice with fewer items than this is insufficient.
    pub min_evidence_items: usize,
    /// An evidence slice whose bodies total fewer characters than this is insufficient.
    pub min_evidence_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 8,
            max_revisions: 2,
            section_pause_ms: 4_000,
            run_timeout_secs: None,
            max_outline_sections: 50,
            min_evidence_items: 1,
            min_evidence_chars: 200,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=10).contains(&self.acceptance_threshold) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "pipeline.acceptance_threshold must be within 1..=10, got {}",
                    self.acceptance_threshold
                ),
            });
        }
        if self.max_outline_sections == 0 {
            return Err(ConfigError::Invalid {
                message: "pipeline.max_outline_sections must be at least 1".into(),
            });
        }
        if self.section_pause_ms > MAX_SECTION_PAUSE_MS {
            return Err(ConfigError::Invalid {
                message: format!(
                    "pipeline.section_pause_ms must be at most {MAX_SECTION_PAUSE_MS}, got {}",
                    self.section_pause_ms
                ),
            });
        }
        Ok(())
    }

    pub fn section_pause(&self) -> Duration {
        Duration::from_millis(self.section_pause_ms)
    }
}

/// Concurrency cap and minimum spacing for one external dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Maximum simultaneous holders.
    pub max_concurrent: usize,
    /// Minimum time between successive grants.
    pub min_spacing_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            min_spacing_ms: 0,
        }
    }
}

impl ThrottleConfig {
    pub fn new(max_concurrent: usize, min_spacing_ms: u64) -> Self {
        Self {
            max_concurrent,
            min_spacing_ms,
        }
    }

    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }

    pub fn validate(&self, key: &str) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid {
                message: format!("{key}: max_concurrent must be at least 1"),
            });
        }
        Ok(())
    }
}

/// Settings for one evidence provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Results requested per query.
    pub max_results: usize,
    /// Environment variable holding the API key, if the provider needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(flatten)]
    pub throttle: ThrottleConfig,
}

impl ProviderConfig {
    fn new(max_results: usize, api_key_env: Option<&str>, throttle: ThrottleConfig) -> Self {
        Self {
            enabled: true,
            max_results,
            api_key_env: api_key_env.map(str::to_string),
            throttle,
        }
    }

    /// Resolve the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

fn default_true() -> bool {
    true
}

/// Evidence retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Sections whose provider queries may be in flight at the same time.
    pub sections_in_flight: usize,
    pub web: ProviderConfig,
    pub arxiv: ProviderConfig,
    pub semantic_scholar: ProviderConfig,
    pub news: ProviderConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            sections_in_flight: 3,
            web: ProviderConfig::new(5, Some("TAVILY_API_KEY"), ThrottleConfig::new(2, 0)),
            arxiv: ProviderConfig::new(3, None, ThrottleConfig::new(1, 500)),
            semantic_scholar: ProviderConfig::new(
                3,
                Some("SEMANTIC_SCHOLAR_API_KEY"),
                ThrottleConfig::new(1, 1_000),
            ),
            news: ProviderConfig::new(3, Some("NEWS_API_KEY"), ThrottleConfig::new(1, 1_000)),
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sections_in_flight == 0 {
            return Err(ConfigError::Invalid {
                message: "retrieval.sections_in_flight must be at least 1".into(),
            });
        }
        for (name, provider) in self.providers() {
            provider.throttle.validate(&format!("retrieval.{name}"))?;
        }
        Ok(())
    }

    /// All provider sections with their config key.
    pub fn providers(&self) -> [(&'static str, &ProviderConfig); 4] {
        [
            ("web", &self.web),
            ("arxiv", &self.arxiv),
            ("semantic_scholar", &self.semantic_scholar),
            ("news", &self.news),
        ]
    }
}

/// Retry policy for transient LLM errors within a single call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 32_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "openai" (or any OpenAI-compatible endpoint) or "gemini".
    pub provider: String,
    /// Model identifier (e.g., "gpt-4o-mini", "gemini-1.5-flash").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Sampling temperature for free-text calls (planning, drafting, editing).
    pub temperature: f32,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    pub retry: RetryConfig,
    /// Pacing for all language-model calls made by the collaborators.
    pub throttle: ThrottleConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key_env: "GOOGLE_API_KEY".to_string(),
            base_url: None,
            temperature: 0.7,
            max_tokens: 4096,
            timeout_secs: 120,
            retry: RetryConfig::default(),
            // 15 requests per minute.
            throttle: ThrottleConfig::new(1, 4_000),
        }
    }
}

/// Final document assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Run the assembled draft through the LLM editor.
    pub polish: bool,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self { polish: true }
    }
}

/// Where run artifacts are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("reports"),
        }
    }
}

/// Path of the user-level config file, if a home directory can be resolved.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "reportsmith", "reportsmith")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".reportsmith").join("config.toml")
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `REPORTSMITH_`)
/// 3. An explicit config file (`--config`)
/// 4. Workspace-local config (`.reportsmith/config.toml`)
/// 5. User config (`~/.config/reportsmith/config.toml`)
/// 6. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
    overrides: Option<&ReportConfig>,
) -> Result<ReportConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(ReportConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }

    // REPORTSMITH_PIPELINE__MAX_REVISIONS, REPORTSMITH_LLM__MODEL, etc.
    figment = figment.merge(Env::prefixed("REPORTSMITH_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}
