//! Contracts of the external collaborators the pipeline coordinates.
//!
//! The pipeline only sees these traits. LLM-backed implementations live in
//! [`super::agents`], HTTP evidence providers in the `reportsmith-tools` crate.

use async_trait::async_trait;

use super::evidence::{EvidenceHit, EvidenceItem};
use super::outline::{Outline, SectionHeading};
use super::revision::Critique;
use crate::error::{AssemblyError, LlmError, PlanningError, ProviderError};

/// Produces the outline for a topic.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, topic: &str) -> Result<Outline, PlanningError>;
}

/// One external evidence source.
///
/// "No results" is an empty vector, never an error.
#[async_trait]
pub trait EvidenceProvider: Send + Sync {
    /// Stable provider tag, also used as the throttle key.
    fn name(&self) -> &str;

    async fn query(&self, text: &str, max_results: usize)
    -> Result<Vec<EvidenceHit>, ProviderError>;
}

/// Whether a draft should be grounded in evidence or written as a marked fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftMode {
    Grounded,
    Fallback,
}

/// Input of one drafting attempt.
#[derive(Debug, Clone, Copy)]
pub struct DraftRequest<'a> {
    pub topic: &'a str,
    pub heading: &'a SectionHeading,
    pub evidence: &'a [EvidenceItem],
    /// Critique of the previous attempt, if this is a revision.
    pub prior_critique: Option<&'a Critique>,
    pub mode: DraftMode,
}

/// Writes section bodies.
///
/// In [`DraftMode::Fallback`], or when the drafter judges the evidence
/// insufficient, the returned body must begin with
/// [`super::revision::FALLBACK_MARKER`].
#[async_trait]
pub trait Drafter: Send + Sync {
    async fn draft(&self, request: DraftRequest<'_>) -> Result<String, LlmError>;
}

/// Input of one critique.
#[derive(Debug, Clone, Copy)]
pub struct CritiqueRequest<'a> {
    pub topic: &'a str,
    pub heading: &'a SectionHeading,
    pub draft: &'a str,
    pub evidence: &'a [EvidenceItem],
}

/// Scores a grounded draft.
#[async_trait]
pub trait Critiquer: Send + Sync {
    async fn critique(&self, request: CritiqueRequest<'_>) -> Result<Critique, LlmError>;
}

/// One accepted section as handed to the assembler.
#[derive(Debug, Clone, Copy)]
pub struct SectionText<'a> {
    pub heading: &'a SectionHeading,
    pub body: &'a str,
}

/// Turns the ordered approved sections into the final document.
#[async_trait]
pub trait Assembler: Send + Sync {
    async fn assemble(
        &self,
        topic: &str,
        sections: &[SectionText<'_>],
    ) -> Result<String, AssemblyError>;
}
