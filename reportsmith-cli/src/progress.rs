//! Live workflow log printed to stderr while a run is in progress.

use reportsmith_core::error::PipelineError;
use reportsmith_core::research::{
    ApprovedSection, Critique, Outline, PipelineObserver, PipelinePhase, SectionDraft,
    SectionHeading, SectionStatus,
};

/// Prints one line per workflow event. With `quiet`, only failures are shown.
pub struct ConsoleObserver {
    quiet: bool,
}

impl ConsoleObserver {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    fn line(&self, text: String) {
        if !self.quiet {
            eprintln!("{text}");
        }
    }
}

/// Short label for an accepted section's status.
pub fn status_label(status: SectionStatus) -> &'static str {
    match status {
        SectionStatus::Approved => "approved",
        SectionStatus::BudgetExhausted => "accepted after max revisions",
        SectionStatus::Fallback => "written from general knowledge",
        SectionStatus::Error => "error",
    }
}

impl PipelineObserver for ConsoleObserver {
    fn on_phase(&self, phase: &PipelinePhase) {
        match phase {
            PipelinePhase::Planning => self.line("Planning outline...".to_string()),
            PipelinePhase::Retrieving => self.line("Retrieving evidence...".to_string()),
            PipelinePhase::Assembling => self.line("Assembling report...".to_string()),
            // Per-section phases are reported through the draft/critique callbacks.
            _ => {}
        }
    }

    fn on_outline(&self, outline: &Outline) {
        self.line(format!("Outline ({} sections):", outline.len()));
        for heading in outline.iter() {
            self.line(format!("  {}. {}", heading.position + 1, heading.clean_label()));
        }
    }

    fn on_evidence(&self, heading: &SectionHeading, items: usize, failed_providers: usize) {
        let mut text = format!("  [{}] {items} evidence items", heading.clean_label());
        if failed_providers > 0 {
            text.push_str(&format!(" ({failed_providers} providers failed)"));
        }
        self.line(text);
    }

    fn on_draft(&self, draft: &SectionDraft) {
        self.line(format!(
            "Drafting '{}' (attempt {})",
            draft.heading.clean_label(),
            draft.revision + 1
        ));
    }

    fn on_critique(&self, heading: &SectionHeading, revision: u32, critique: &Critique) {
        self.line(format!(
            "  critique of '{}' attempt {}: {}/10",
            heading.clean_label(),
            revision + 1,
            critique.score
        ));
    }

    fn on_accepted(&self, section: &ApprovedSection) {
        self.line(format!(
            "  accepted '{}' after {} attempt(s): {}",
            section.heading.clean_label(),
            section.attempts,
            status_label(section.status)
        ));
    }

    fn on_failed(&self, error: &PipelineError) {
        eprintln!("Run failed: {error}");
    }
}
