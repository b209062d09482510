//! # Reportsmith Core
//!
//! Core library for the reportsmith report generator.
//! Provides the pipeline state machine, the per-section revision loop, the
//! throttled retrieval fan-out, the LLM interface (brain), configuration and
//! the error types shared by the other crates.

pub mod brain;
pub mod config;
pub mod error;
pub mod persistence;
pub mod providers;
pub mod research;
pub mod throttle;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{Brain, LlmProvider, MockLlmProvider};
pub use config::{ReportConfig, load_config};
pub use error::{PipelineError, ReportsmithError, Result};
pub use research::{ResearchPipeline, ResearchRun, RunState};
pub use throttle::{Throttle, ThrottlePermit};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
