//! Research report pipeline.
//!
//! Turns one topic into a report in four stages:
//! 1. **Plan**: the planner produces an ordered [`Outline`]
//! 2. **Retrieve**: every heading is queried against every evidence provider
//! 3. **Write**: each heading goes through the draft/critique revision loop
//! 4. **Assemble**: approved sections become the final document
//!
//! [`ResearchPipeline`] drives the stages through the explicit state machine in
//! [`pipeline`]; the collaborators it calls are the traits in [`collaborators`].

pub mod agents;
pub mod assembly;
pub mod collaborators;
pub mod evidence;
pub mod observer;
pub mod outline;
pub mod pipeline;
pub mod retrieval;
pub mod revision;
pub mod state;

pub use agents::{LlmCritiquer, LlmDrafter, LlmPlanner};
pub use assembly::{EditorAssembler, MarkdownAssembler, render_markdown};
pub use collaborators::{
    Assembler, CritiqueRequest, Critiquer, DraftMode, DraftRequest, Drafter, EvidenceProvider,
    Planner, SectionText,
};
pub use evidence::{EvidenceHit, EvidenceItem, EvidencePool, EvidenceSufficiency};
pub use observer::{NoOpObserver, ObservedEvent, PipelineObserver, RecordingObserver};
pub use outline::{Outline, SectionHeading, clean_heading};
pub use pipeline::{
    Collaborators, PipelineEvent, PipelinePhase, ResearchPipeline, ResearchRun, transition,
};
pub use retrieval::{ProviderOutcome, RetrievalFanout, RetrievalReport};
pub use revision::{Critique, FALLBACK_MARKER, RevisionPolicy, SectionDraft, SectionStatus};
pub use state::{ApprovedSection, RunState};
