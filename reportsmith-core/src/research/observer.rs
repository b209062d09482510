//! Progress callbacks for front ends that show a live workflow log.

use std::sync::Mutex;

use super::outline::{Outline, SectionHeading};
use super::pipeline::PipelinePhase;
use super::revision::{Critique, SectionDraft};
use super::state::ApprovedSection;
use crate::error::PipelineError;

/// Callback trait for pipeline progress updates.
pub trait PipelineObserver: Send + Sync {
    /// Called whenever the state machine enters a phase.
    fn on_phase(&self, phase: &PipelinePhase);
    /// Called once the outline has been accepted.
    fn on_outline(&self, outline: &Outline);
    /// Called per heading after retrieval completes.
    fn on_evidence(&self, heading: &SectionHeading, items: usize, failed_providers: usize);
    /// Called after every drafting attempt.
    fn on_draft(&self, draft: &SectionDraft);
    /// Called after every critique (including the fixed fallback pass).
    fn on_critique(&self, heading: &SectionHeading, revision: u32, critique: &Critique);
    /// Called when a section is appended to the approved list.
    fn on_accepted(&self, section: &ApprovedSection);
    /// Called once if the run fails.
    fn on_failed(&self, error: &PipelineError);
}

/// No-op observer.
pub struct NoOpObserver;

impl PipelineObserver for NoOpObserver {
    fn on_phase(&self, _phase: &PipelinePhase) {}
    fn on_outline(&self, _outline: &Outline) {}
    fn on_evidence(&self, _heading: &SectionHeading, _items: usize, _failed: usize) {}
    fn on_draft(&self, _draft: &SectionDraft) {}
    fn on_critique(&self, _heading: &SectionHeading, _revision: u32, _critique: &Critique) {}
    fn on_accepted(&self, _section: &ApprovedSection) {}
    fn on_failed(&self, _error: &PipelineError) {}
}

/// Everything a [`RecordingObserver`] saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedEvent {
    Phase(PipelinePhase),
    Outline(Vec<String>),
    Evidence {
        section: usize,
        items: usize,
        failed_providers: usize,
    },
    Draft {
        section: usize,
        revision: u32,
    },
    Critique {
        section: usize,
        revision: u32,
        score: u8,
    },
    Accepted {
        section: usize,
        attempts: u32,
    },
    Failed(String),
}

/// Observer that records events, for tests and run summaries.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Phases entered, in order.
    pub fn phases(&self) -> Vec<PipelinePhase> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ObservedEvent::Phase(phase) => Some(phase),
                _ => None,
            })
            .collect()
    }

    /// Number of drafts written for the heading at `section`.
    pub fn drafts_for(&self, section: usize) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, ObservedEvent::Draft { section: s, .. } if *s == section))
            .count()
    }

    fn push(&self, event: ObservedEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }
}

impl PipelineObserver for RecordingObserver {
    fn on_phase(&self, phase: &PipelinePhase) {
        self.push(ObservedEvent::Phase(*phase));
    }

    fn on_outline(&self, outline: &Outline) {
        self.push(ObservedEvent::Outline(
            outline.iter().map(|h| h.label.clone()).collect(),
        ));
    }

    fn on_evidence(&self, heading: &SectionHeading, items: usize, failed_providers: usize) {
        self.push(ObservedEvent::Evidence {
            section: heading.position,
            items,
            failed_providers,
        });
    }

    fn on_draft(&self, draft: &SectionDraft) {
        self.push(ObservedEvent::Draft {
            section: draft.heading.position,
            revision: draft.revision,
        });
    }

    fn on_critique(&self, heading: &SectionHeading, revision: u32, critique: &Critique) {
        self.push(ObservedEvent::Critique {
            section: heading.position,
            revision,
            score: critique.score,
        });
    }

    fn on_accepted(&self, section: &ApprovedSection) {
        self.push(ObservedEvent::Accepted {
            section: section.heading.position,
            attempts: section.attempts,
        });
    }

    fn on_failed(&self, error: &PipelineError) {
        self.push(ObservedEvent::Failed(error.to_string()));
    }
}
