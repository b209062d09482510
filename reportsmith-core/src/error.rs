//! Error types for the reportsmith core library.
//!
//! Uses `thiserror` for public API error types, one enum per failure domain.
//! Only [`PipelineError`] escapes a run; provider and per-section errors are
//! converted into degraded data by the stage that observes them.

/// Top-level error type for the reportsmith core library.
#[derive(Debug, thiserror::Error)]
pub enum ReportsmithError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from language-model provider interactions.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Unsupported LLM provider: {provider}")]
    UnsupportedProvider { provider: String },

    #[error("LLM call cancelled")]
    Cancelled,
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// The planner could not produce a usable outline. Fatal for the run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlanningError {
    #[error("planner produced an empty outline")]
    EmptyOutline,

    #[error("planner produced {sections} sections, more than the limit of {limit}")]
    OutlineTooLong { sections: usize, limit: usize },

    #[error("planner call failed: {0}")]
    Llm(#[from] LlmError),
}

/// A single evidence source failed. Recovered locally by the fan-out.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider}: request failed: {message}")]
    Request { provider: String, message: String },

    #[error("{provider}: returned HTTP {status}")]
    Status { provider: String, status: u16 },

    #[error("{provider}: could not parse response: {message}")]
    Parse { provider: String, message: String },

    #[error("{provider}: not configured ({reason})")]
    NotConfigured { provider: String, reason: String },
}

/// Drafting or critique of one section failed. Recovered by substituting an
/// error-marked section body.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StageError {
    #[error("drafting '{heading}' failed: {source}")]
    Draft { heading: String, source: LlmError },

    #[error("critique of '{heading}' failed: {source}")]
    Critique { heading: String, source: LlmError },
}

/// The final document could not be produced. Fatal for the run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AssemblyError {
    #[error("editor call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("editor returned an empty document")]
    EmptyDocument,
}

/// Errors from [`crate::throttle::Throttle`] acquisition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThrottleError {
    #[error("acquisition of throttle '{key}' was cancelled")]
    Cancelled { key: String },
}

/// The reason a run failed. This is the only error a run surfaces.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error("assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("run cancelled during {phase}")]
    Cancelled { phase: String },

    #[error("run timed out after {secs}s")]
    TimedOut { secs: u64 },

    #[error("invalid state transition: {from} on {event}")]
    InvalidTransition { from: String, event: String },
}

impl PipelineError {
    /// Short, stable label for the failure kind (used in logs and run records).
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Planning(_) => "planning",
            PipelineError::Assembly(_) => "assembly",
            PipelineError::Cancelled { .. } => "cancelled",
            PipelineError::TimedOut { .. } => "timed_out",
            PipelineError::InvalidTransition { .. } => "invalid_transition",
        }
    }
}

/// A type alias for results using the top-level `ReportsmithError`.
pub type Result<T> = std::result::Result<T, ReportsmithError>;
