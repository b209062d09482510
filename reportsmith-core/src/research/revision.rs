//! Section revision loop: draft, critique, then accept or revise.
//!
//! The loop's control decisions are pure ([`RevisionPolicy::decide`]); the
//! side-effecting steps live in [`SectionWriter`], which converts every
//! collaborator failure into degraded section text instead of an error.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::collaborators::{CritiqueRequest, Critiquer, DraftMode, DraftRequest, Drafter};
use super::evidence::{EvidenceItem, EvidenceSufficiency};
use super::outline::SectionHeading;
use crate::config::PipelineConfig;
use crate::error::StageError;

/// First line of every body written without sufficient evidence.
pub const FALLBACK_MARKER: &str = "*Generated using LLM due to insufficient search results.*";

/// Score given to a fallback draft without consulting the critiquer.
pub const FALLBACK_PASS_SCORE: u8 = 8;

pub const FALLBACK_PASS_NOTE: &str =
    "Writer fallback detected due to insufficient context. Passing.";

/// Whether a body carries the fallback marker.
pub fn is_fallback(body: &str) -> bool {
    body.trim_start().starts_with(FALLBACK_MARKER)
}

/// Prefix `body` with the fallback marker unless it already starts with it.
pub fn mark_fallback(body: &str) -> String {
    if is_fallback(body) {
        body.trim_start().to_string()
    } else {
        format!("{FALLBACK_MARKER}\n\n{}", body.trim())
    }
}

/// Score and feedback for the latest draft of a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    /// Always within 1..=10.
    pub score: u8,
    pub feedback: String,
}

impl Critique {
    /// Build a critique, clamping the score into 1..=10.
    pub fn new(score: i64, feedback: impl Into<String>) -> Self {
        Self {
            score: score.clamp(1, 10) as u8,
            feedback: feedback.into(),
        }
    }

    /// The fixed pass given to fallback drafts.
    pub fn fallback_pass() -> Self {
        Self::new(i64::from(FALLBACK_PASS_SCORE), FALLBACK_PASS_NOTE)
    }
}

/// One drafting attempt. `revision` counts from 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDraft {
    pub heading: SectionHeading,
    pub body: String,
    pub revision: u32,
}

/// How a section came to be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    /// Scored at or above the acceptance threshold.
    Approved,
    /// Accepted because the revision budget ran out.
    BudgetExhausted,
    /// Fallback draft, passed without critique.
    Fallback,
    /// Drafting or critique failed; the body is error-marked.
    Error,
}

impl SectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionStatus::Approved => "approved",
            SectionStatus::BudgetExhausted => "budget_exhausted",
            SectionStatus::Fallback => "fallback",
            SectionStatus::Error => "error",
        }
    }
}

/// Outcome of evaluating a critique score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept(SectionStatus),
    Revise { next_revision: u32 },
}

/// Acceptance rule of the revision loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionPolicy {
    pub acceptance_threshold: u8,
    pub max_revisions: u32,
}

impl Default for RevisionPolicy {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for RevisionPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            acceptance_threshold: config.acceptance_threshold,
            max_revisions: config.max_revisions,
        }
    }
}

impl RevisionPolicy {
    /// Decide what happens after the draft of revision `revision` scored `score`.
    ///
    /// A draft at or above the threshold is accepted. Below it, the section is
    /// revised until `revision` reaches `max_revisions`, after which the draft is
    /// accepted as is. At most `max_revisions + 1` drafts are written.
    pub fn decide(&self, score: u8, revision: u32) -> Verdict {
        if score >= self.acceptance_threshold {
            Verdict::Accept(SectionStatus::Approved)
        } else if revision >= self.max_revisions {
            Verdict::Accept(SectionStatus::BudgetExhausted)
        } else {
            Verdict::Revise {
                next_revision: revision + 1,
            }
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_revisions + 1
    }
}

/// Result of a drafting step.
#[derive(Debug, Clone)]
pub enum DraftOutcome {
    Drafted(SectionDraft),
    /// The drafter failed; `draft` holds the error-marked body.
    Failed {
        draft: SectionDraft,
        error: StageError,
    },
}

impl DraftOutcome {
    pub fn draft(&self) -> &SectionDraft {
        match self {
            DraftOutcome::Drafted(draft) | DraftOutcome::Failed { draft, .. } => draft,
        }
    }

    pub fn into_draft(self) -> SectionDraft {
        match self {
            DraftOutcome::Drafted(draft) | DraftOutcome::Failed { draft, .. } => draft,
        }
    }
}

/// Result of a critique step.
#[derive(Debug, Clone)]
pub enum CritiqueOutcome {
    Scored(Critique),
    /// The draft was a fallback; the critiquer was not consulted.
    FallbackPass(Critique),
    /// The critiquer failed; `body` is the error-marked replacement section body.
    Failed { body: String, error: StageError },
}

/// Body used when a section could not be drafted.
pub fn draft_error_body(error: &StageError) -> String {
    format!("Error: Could not generate content for this section due to an API error: {error}")
}

/// Body used when a draft could not be reviewed: an error note, then the draft.
pub fn critique_error_body(error: &StageError, draft: &str) -> String {
    format!(
        "Error: This section could not be reviewed ({error}). The unreviewed draft follows.\n\n{}",
        draft.trim()
    )
}

/// Executes the drafting and critique steps of the revision loop.
pub struct SectionWriter<'a> {
    drafter: &'a dyn Drafter,
    critiquer: &'a dyn Critiquer,
    sufficiency: EvidenceSufficiency,
}

impl<'a> SectionWriter<'a> {
    pub fn new(
        drafter: &'a dyn Drafter,
        critiquer: &'a dyn Critiquer,
        sufficiency: EvidenceSufficiency,
    ) -> Self {
        Self {
            drafter,
            critiquer,
            sufficiency,
        }
    }

    /// The drafting mode an evidence slice calls for.
    pub fn mode_for(&self, evidence: &[EvidenceItem]) -> DraftMode {
        if self.sufficiency.is_sufficient(evidence) {
            DraftMode::Grounded
        } else {
            DraftMode::Fallback
        }
    }

    /// Write one draft of `heading`, taking `prior_critique` into account.
    pub async fn draft(
        &self,
        topic: &str,
        heading: &SectionHeading,
        evidence: &[EvidenceItem],
        prior_critique: Option<&Critique>,
        revision: u32,
    ) -> DraftOutcome {
        let mode = self.mode_for(evidence);
        debug!(section = %heading, revision, ?mode, evidence = evidence.len(), "Drafting section");

        let request = DraftRequest {
            topic,
            heading,
            evidence,
            prior_critique,
            mode,
        };
        match self.drafter.draft(request).await {
            Ok(body) => {
                let body = match mode {
                    DraftMode::Fallback => mark_fallback(&body),
                    DraftMode::Grounded => body.trim().to_string(),
                };
                DraftOutcome::Drafted(SectionDraft {
                    heading: heading.clone(),
                    body,
                    revision,
                })
            }
            Err(source) => {
                let error = StageError::Draft {
                    heading: heading.label.clone(),
                    source,
                };
                warn!(section = %heading, revision, error = %error, "Drafting failed, using error-marked body");
                DraftOutcome::Failed {
                    draft: SectionDraft {
                        heading: heading.clone(),
                        body: draft_error_body(&error),
                        revision,
                    },
                    error,
                }
            }
        }
    }

    /// Critique `draft`. Fallback drafts get the fixed pass without a critiquer call.
    pub async fn critique(
        &self,
        topic: &str,
        draft: &SectionDraft,
        evidence: &[EvidenceItem],
    ) -> CritiqueOutcome {
        if is_fallback(&draft.body) {
            info!(section = %draft.heading, "Fallback draft, skipping critique");
            return CritiqueOutcome::FallbackPass(Critique::fallback_pass());
        }

        let request = CritiqueRequest {
            topic,
            heading: &draft.heading,
            draft: &draft.body,
            evidence,
        };
        match self.critiquer.critique(request).await {
            Ok(critique) => {
                info!(
                    section = %draft.heading,
                    revision = draft.revision,
                    score = critique.score,
                    "Section critiqued"
                );
                CritiqueOutcome::Scored(critique)
            }
            Err(source) => {
                let error = StageError::Critique {
                    heading: draft.heading.label.clone(),
                    source,
                };
                warn!(section = %draft.heading, error = %error, "Critique failed, keeping draft with error note");
                CritiqueOutcome::Failed {
                    body: critique_error_body(&error, &draft.body),
                    error,
                }
            }
        }
    }
}
