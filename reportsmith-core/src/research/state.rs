//! Run state threaded through the pipeline.
//!
//! A [`RunState`] is created at run start, mutated only by the pipeline driver
//! as it applies state-machine transitions, and returned (or persisted) when the
//! machine reaches `Done` or `Failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::collaborators::SectionText;
use super::evidence::{EvidenceItem, EvidencePool};
use super::outline::{Outline, SectionHeading};
use super::pipeline::PipelinePhase;
use super::retrieval::{Retrieval, RetrievalReport};
use super::revision::{Critique, SectionDraft, SectionStatus};
use crate::error::PipelineError;

/// An accepted section, immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedSection {
    pub heading: SectionHeading,
    pub body: String,
    /// Number of drafts written for this heading.
    pub attempts: u32,
    /// Score of the accepted draft; `None` when no critique applied.
    pub score: Option<u8>,
    pub status: SectionStatus,
}

/// The full mutable context of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub id: Uuid,
    pub topic: String,
    pub phase: PipelinePhase,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub outline: Outline,
    pub pool: EvidencePool,
    #[serde(default)]
    pub retrieval: RetrievalReport,
    /// Index of the heading currently being written.
    pub section_index: usize,
    /// Latest draft of the current heading.
    pub current_draft: Option<SectionDraft>,
    /// Critique of the latest draft, handed to the next attempt.
    pub critique: Option<Critique>,
    pub revision_count: u32,
    pub approved: Vec<ApprovedSection>,
    pub report: Option<String>,
    /// Human-readable failure reason once the run has failed.
    pub failure: Option<String>,
}

impl RunState {
    pub fn new(topic: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            phase: PipelinePhase::Planning,
            started_at: now,
            updated_at: now,
            outline: Outline::default(),
            pool: EvidencePool::default(),
            retrieval: RetrievalReport::default(),
            section_index: 0,
            current_draft: None,
            critique: None,
            revision_count: 0,
            approved: Vec::new(),
            report: None,
            failure: None,
        }
    }

    pub(crate) fn set_outline(&mut self, outline: Outline) {
        self.pool = EvidencePool::for_outline(&outline);
        self.outline = outline;
    }

    pub(crate) fn set_retrieval(&mut self, retrieval: Retrieval) {
        self.pool = retrieval.pool;
        self.retrieval = retrieval.report;
    }

    /// The heading at the current section index, if any remain.
    pub fn current_heading(&self) -> Option<&SectionHeading> {
        self.outline.get(self.section_index)
    }

    /// Evidence slice of the current heading.
    pub fn current_evidence(&self) -> &[EvidenceItem] {
        self.current_heading()
            .map(|heading| self.pool.slice(heading))
            .unwrap_or(&[])
    }

    pub(crate) fn record_draft(&mut self, draft: SectionDraft) {
        self.current_draft = Some(draft);
    }

    pub(crate) fn record_critique(&mut self, critique: Critique) {
        self.critique = Some(critique);
    }

    /// Replace the body of the current draft (used for error-marked bodies).
    pub(crate) fn replace_draft_body(&mut self, body: String) {
        if let Some(draft) = self.current_draft.as_mut() {
            draft.body = body;
        }
    }

    /// Keep the critique, bump the revision count, stay on the same heading.
    pub(crate) fn revise(&mut self, next_revision: u32) {
        self.revision_count = next_revision;
        self.current_draft = None;
    }

    /// Append the current draft to the approved sections and advance.
    pub(crate) fn accept(
        &mut self,
        status: SectionStatus,
        score: Option<u8>,
    ) -> Result<&ApprovedSection, PipelineError> {
        let draft = self
            .current_draft
            .take()
            .filter(|draft| draft.heading.position == self.section_index)
            .ok_or_else(|| PipelineError::InvalidTransition {
                from: self.phase.to_string(),
                event: format!("accept without a draft for section {}", self.section_index),
            })?;

        self.approved.push(ApprovedSection {
            heading: draft.heading,
            body: draft.body,
            attempts: draft.revision + 1,
            score,
            status,
        });
        self.section_index += 1;
        self.critique = None;
        self.revision_count = 0;
        self.touch();
        Ok(&self.approved[self.approved.len() - 1])
    }

    /// The approved sections in outline order, as handed to the assembler.
    pub fn section_texts(&self) -> Vec<SectionText<'_>> {
        self.approved
            .iter()
            .map(|section| SectionText {
                heading: &section.heading,
                body: &section.body,
            })
            .collect()
    }

    pub fn sections_with_status(&self, status: SectionStatus) -> usize {
        self.approved.iter().filter(|s| s.status == status).count()
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
