//! Pipeline state machine and its async driver.
//!
//! The machine is a closed set of [`PipelinePhase`]s with a pure
//! [`transition`] function. [`ResearchPipeline`] performs the side effects of
//! each phase (collaborator calls), turns their results into
//! [`PipelineEvent`]s, and applies the resulting [`Transition`] to the
//! [`RunState`]. Sections are written strictly one at a time.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::collaborators::{Assembler, Critiquer, Drafter, Planner};
use super::evidence::EvidenceSufficiency;
use super::observer::{NoOpObserver, PipelineObserver};
use super::retrieval::{ProviderOutcome, RetrievalFanout};
use super::revision::{
    CritiqueOutcome, DraftOutcome, RevisionPolicy, SectionStatus, SectionWriter, Verdict,
};
use super::state::RunState;
use crate::config::PipelineConfig;
use crate::error::{AssemblyError, PipelineError};

/// Phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PipelinePhase {
    Planning,
    Retrieving,
    /// Drafting attempt `revision` (from 0) of heading `index`.
    Writing { index: usize, revision: u32 },
    /// Critiquing the draft of attempt `revision` of heading `index`.
    Critiquing { index: usize, revision: u32 },
    Assembling,
    Done,
    Failed,
}

impl PipelinePhase {
    pub fn name(&self) -> &'static str {
        match self {
            PipelinePhase::Planning => "planning",
            PipelinePhase::Retrieving => "retrieving",
            PipelinePhase::Writing { .. } => "writing",
            PipelinePhase::Critiquing { .. } => "critiquing",
            PipelinePhase::Assembling => "assembling",
            PipelinePhase::Done => "done",
            PipelinePhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelinePhase::Done | PipelinePhase::Failed)
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelinePhase::Writing { index, revision }
            | PipelinePhase::Critiquing { index, revision } => {
                write!(f, "{}(section {index}, revision {revision})", self.name())
            }
            other => f.write_str(other.name()),
        }
    }
}

/// Inputs to the state machine, produced by the driver from collaborator results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    Planned { sections: usize },
    PlanningFailed,
    Retrieved,
    Drafted,
    DraftFailed,
    Critiqued { score: u8 },
    /// A fallback draft received the fixed pass without critique.
    FallbackPassed,
    CritiqueFailed,
    Assembled,
    AssemblyFailed,
    /// Cancellation, timeout, or an internal inconsistency.
    Aborted,
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::Planned { .. } => "planned",
            PipelineEvent::PlanningFailed => "planning_failed",
            PipelineEvent::Retrieved => "retrieved",
            PipelineEvent::Drafted => "drafted",
            PipelineEvent::DraftFailed => "draft_failed",
            PipelineEvent::Critiqued { .. } => "critiqued",
            PipelineEvent::FallbackPassed => "fallback_passed",
            PipelineEvent::CritiqueFailed => "critique_failed",
            PipelineEvent::Assembled => "assembled",
            PipelineEvent::AssemblyFailed => "assembly_failed",
            PipelineEvent::Aborted => "aborted",
        }
    }
}

/// What the driver must do to the run state alongside a phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Append the current draft to the approved sections and advance the index.
    Accept(SectionStatus),
    /// Keep the critique and draft the same heading again.
    Revise { next_revision: u32 },
}

/// Result of [`transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: PipelinePhase,
    pub effect: Effect,
}

impl Transition {
    fn to(next: PipelinePhase) -> Self {
        Self {
            next,
            effect: Effect::None,
        }
    }

    fn accept(index: usize, sections: usize, status: SectionStatus) -> Self {
        Self {
            next: route_after_section(index + 1, sections),
            effect: Effect::Accept(status),
        }
    }
}

/// Static facts the transition function needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineShape {
    /// Outline length; ignored until planning has completed.
    pub sections: usize,
    pub policy: RevisionPolicy,
}

/// Where to go once `index` sections are complete.
pub fn route_after_section(index: usize, sections: usize) -> PipelinePhase {
    if index >= sections {
        PipelinePhase::Assembling
    } else {
        PipelinePhase::Writing { index, revision: 0 }
    }
}

/// The pure transition function `(phase, event) -> next phase`.
pub fn transition(
    phase: PipelinePhase,
    event: PipelineEvent,
    shape: &MachineShape,
) -> Result<Transition, PipelineError> {
    use PipelineEvent as E;
    use PipelinePhase as P;

    let next = match (phase, event) {
        (p, E::Aborted) if !p.is_terminal() => Transition::to(P::Failed),
        (P::Planning, E::Planned { .. }) => Transition::to(P::Retrieving),
        (P::Planning, E::PlanningFailed) => Transition::to(P::Failed),
        (P::Retrieving, E::Retrieved) => Transition::to(route_after_section(0, shape.sections)),
        (P::Writing { index, revision }, E::Drafted) => {
            Transition::to(P::Critiquing { index, revision })
        }
        (P::Writing { index, .. }, E::DraftFailed) => {
            Transition::accept(index, shape.sections, SectionStatus::Error)
        }
        (P::Critiquing { index, revision }, E::Critiqued { score }) => {
            match shape.policy.decide(score, revision) {
                Verdict::Accept(status) => Transition::accept(index, shape.sections, status),
                Verdict::Revise { next_revision } => Transition {
                    next: P::Writing {
                        index,
                        revision: next_revision,
                    },
                    effect: Effect::Revise { next_revision },
                },
            }
        }
        (P::Critiquing { index, .. }, E::FallbackPassed) => {
            Transition::accept(index, shape.sections, SectionStatus::Fallback)
        }
        (P::Critiquing { index, .. }, E::CritiqueFailed) => {
            Transition::accept(index, shape.sections, SectionStatus::Error)
        }
        (P::Assembling, E::Assembled) => Transition::to(P::Done),
        (P::Assembling, E::AssemblyFailed) => Transition::to(P::Failed),
        (from, event) => {
            return Err(PipelineError::InvalidTransition {
                from: from.to_string(),
                event: event.name().to_string(),
            });
        }
    };
    Ok(next)
}

/// The collaborators a pipeline coordinates.
#[derive(Clone)]
pub struct Collaborators {
    pub planner: Arc<dyn Planner>,
    pub drafter: Arc<dyn Drafter>,
    pub critiquer: Arc<dyn Critiquer>,
    pub assembler: Arc<dyn Assembler>,
}

/// Outcome of a run: the final state and, if it failed, why.
#[derive(Debug, Clone)]
pub struct ResearchRun {
    pub state: RunState,
    pub error: Option<PipelineError>,
}

impl ResearchRun {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.state.phase == PipelinePhase::Done
    }

    /// The final document, if the run completed.
    pub fn report(&self) -> Option<&str> {
        self.state.report.as_deref()
    }

    pub fn into_report(self) -> Result<String, PipelineError> {
        match (self.error, self.state.report) {
            (None, Some(report)) => Ok(report),
            (Some(error), _) => Err(error),
            (None, None) => Err(PipelineError::InvalidTransition {
                from: self.state.phase.to_string(),
                event: "finished without a report".into(),
            }),
        }
    }
}

/// Run-level cancellation and deadline, observed at every suspension point.
struct RunGuard {
    cancel: CancellationToken,
    deadline: Option<(Instant, u64)>,
}

impl RunGuard {
    fn new(cancel: CancellationToken, timeout_secs: Option<u64>) -> Self {
        let deadline = timeout_secs.map(|secs| (Instant::now() + Duration::from_secs(secs), secs));
        Self { cancel, deadline }
    }

    async fn watch<F: Future>(
        &self,
        phase: PipelinePhase,
        operation: F,
    ) -> Result<F::Output, PipelineError> {
        let deadline = async {
            match self.deadline {
                Some((at, _)) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PipelineError::Cancelled { phase: phase.to_string() }),
            _ = deadline => Err(PipelineError::TimedOut {
                secs: self.deadline.map(|(_, secs)| secs).unwrap_or_default(),
            }),
            output = operation => Ok(output),
        }
    }
}

/// Orchestrates planning, retrieval, per-section revision and assembly.
pub struct ResearchPipeline {
    collaborators: Collaborators,
    fanout: RetrievalFanout,
    config: PipelineConfig,
    observer: Arc<dyn PipelineObserver>,
}

impl ResearchPipeline {
    pub fn new(
        collaborators: Collaborators,
        fanout: RetrievalFanout,
        config: PipelineConfig,
    ) -> Self {
        Self {
            collaborators,
            fanout,
            config,
            observer: Arc::new(NoOpObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn fanout(&self) -> &RetrievalFanout {
        &self.fanout
    }

    /// Run the whole pipeline for `topic`.
    ///
    /// Cancelling `cancel` (or hitting the configured run timeout) stops the run
    /// at its next suspension point and releases every outstanding permit.
    pub async fn run(&self, topic: &str, cancel: &CancellationToken) -> ResearchRun {
        let guard = RunGuard::new(cancel.clone(), self.config.run_timeout_secs);
        let writer = SectionWriter::new(
            self.collaborators.drafter.as_ref(),
            self.collaborators.critiquer.as_ref(),
            EvidenceSufficiency {
                min_items: self.config.min_evidence_items,
                min_chars: self.config.min_evidence_chars,
            },
        );
        let mut shape = MachineShape {
            sections: 0,
            policy: RevisionPolicy::from(&self.config),
        };
        let mut state = RunState::new(topic.trim());
        let mut fatal: Option<PipelineError> = None;

        info!(
            run_id = %state.id,
            topic = %state.topic,
            max_attempts = shape.policy.max_attempts(),
            "Starting research run"
        );

        loop {
            let phase = state.phase;
            self.observer.on_phase(&phase);

            let step = match phase {
                PipelinePhase::Done => {
                    info!(run_id = %state.id, sections = state.approved.len(), "Research run complete");
                    return ResearchRun { state, error: None };
                }
                PipelinePhase::Failed => {
                    let error = fatal.unwrap_or_else(|| PipelineError::InvalidTransition {
                        from: "failed".into(),
                        event: "unknown failure".into(),
                    });
                    error!(run_id = %state.id, kind = error.kind(), error = %error, "Research run failed");
                    state.failure = Some(error.to_string());
                    self.observer.on_failed(&error);
                    return ResearchRun {
                        state,
                        error: Some(error),
                    };
                }
                PipelinePhase::Planning => self.plan(&guard, &mut state, &mut shape).await,
                PipelinePhase::Retrieving => self.retrieve(&guard, &mut state).await,
                PipelinePhase::Writing { revision, .. } => {
                    self.write(&guard, &writer, &mut state, revision).await
                }
                PipelinePhase::Critiquing { revision, .. } => {
                    self.critique(&guard, &writer, &mut state, revision).await
                }
                PipelinePhase::Assembling => self.assemble(&guard, &mut state).await,
            };

            let event = match step {
                Ok(event) => event,
                Err(error) => {
                    let event = match error {
                        PipelineError::Planning(_) => PipelineEvent::PlanningFailed,
                        PipelineError::Assembly(_) => PipelineEvent::AssemblyFailed,
                        _ => {
                            warn!(phase = %phase, error = %error, "Run interrupted");
                            PipelineEvent::Aborted
                        }
                    };
                    fatal = Some(error);
                    event
                }
            };

            let step = match transition(phase, event, &shape) {
                Ok(step) => step,
                Err(error) => {
                    fatal = Some(error);
                    state.phase = PipelinePhase::Failed;
                    continue;
                }
            };

            match step.effect {
                Effect::None => {}
                Effect::Revise { next_revision } => state.revise(next_revision),
                Effect::Accept(status) => {
                    let score = match status {
                        SectionStatus::Error => None,
                        _ => state.critique.as_ref().map(|c| c.score),
                    };
                    match state.accept(status, score) {
                        Ok(section) => {
                            info!(
                                section = %section.heading,
                                status = status.as_str(),
                                attempts = section.attempts,
                                "Section accepted"
                            );
                            self.observer.on_accepted(section);
                        }
                        Err(error) => {
                            fatal = Some(error);
                            state.phase = PipelinePhase::Failed;
                            continue;
                        }
                    }
                    if matches!(step.next, PipelinePhase::Writing { .. })
                        && let Err(error) = self.pause(&guard, phase).await
                    {
                        fatal = Some(error);
                        state.phase = PipelinePhase::Failed;
                        continue;
                    }
                }
            }

            state.phase = step.next;
            state.touch();
        }
    }

    async fn plan(
        &self,
        guard: &RunGuard,
        state: &mut RunState,
        shape: &mut MachineShape,
    ) -> Result<PipelineEvent, PipelineError> {
        let planned = guard
            .watch(state.phase, self.collaborators.planner.plan(&state.topic))
            .await?;
        let outline = planned.and_then(|outline| {
            outline.validate(self.config.max_outline_sections)?;
            Ok(outline)
        })?;
        info!(sections = outline.len(), "Outline planned");
        self.observer.on_outline(&outline);
        shape.sections = outline.len();
        state.set_outline(outline);
        Ok(PipelineEvent::Planned {
            sections: shape.sections,
        })
    }

    async fn retrieve(
        &self,
        guard: &RunGuard,
        state: &mut RunState,
    ) -> Result<PipelineEvent, PipelineError> {
        let retrieval = guard
            .watch(
                state.phase,
                self.fanout
                    .retrieve(&state.topic, &state.outline, &guard.cancel),
            )
            .await?;
        for heading in state.outline.iter() {
            let items = retrieval.pool.slice(heading).len();
            let failed = retrieval
                .report
                .for_section(heading)
                .filter(|e| matches!(e.outcome, ProviderOutcome::Failed { .. }))
                .count();
            self.observer.on_evidence(heading, items, failed);
        }
        state.set_retrieval(retrieval);
        Ok(PipelineEvent::Retrieved)
    }

    async fn write(
        &self,
        guard: &RunGuard,
        writer: &SectionWriter<'_>,
        state: &mut RunState,
        revision: u32,
    ) -> Result<PipelineEvent, PipelineError> {
        let heading = state
            .current_heading()
            .cloned()
            .ok_or_else(|| PipelineError::InvalidTransition {
                from: state.phase.to_string(),
                event: "no heading at section index".into(),
            })?;

        let outcome = guard
            .watch(
                state.phase,
                writer.draft(
                    &state.topic,
                    &heading,
                    state.current_evidence(),
                    state.critique.as_ref(),
                    revision,
                ),
            )
            .await?;

        let event = match outcome {
            DraftOutcome::Drafted(_) => PipelineEvent::Drafted,
            DraftOutcome::Failed { .. } => PipelineEvent::DraftFailed,
        };
        let draft = outcome.into_draft();
        self.observer.on_draft(&draft);
        state.record_draft(draft);
        Ok(event)
    }

    async fn critique(
        &self,
        guard: &RunGuard,
        writer: &SectionWriter<'_>,
        state: &mut RunState,
        revision: u32,
    ) -> Result<PipelineEvent, PipelineError> {
        let draft = state
            .current_draft
            .clone()
            .ok_or_else(|| PipelineError::InvalidTransition {
                from: state.phase.to_string(),
                event: "no draft to critique".into(),
            })?;

        let outcome = guard
            .watch(
                state.phase,
                writer.critique(&state.topic, &draft, state.pool.slice(&draft.heading)),
            )
            .await?;

        let event = match outcome {
            CritiqueOutcome::Scored(critique) => {
                self.observer.on_critique(&draft.heading, revision, &critique);
                let score = critique.score;
                state.record_critique(critique);
                PipelineEvent::Critiqued { score }
            }
            CritiqueOutcome::FallbackPass(critique) => {
                self.observer.on_critique(&draft.heading, revision, &critique);
                state.record_critique(critique);
                PipelineEvent::FallbackPassed
            }
            CritiqueOutcome::Failed { body, .. } => {
                state.replace_draft_body(body);
                PipelineEvent::CritiqueFailed
            }
        };
        Ok(event)
    }

    async fn assemble(
        &self,
        guard: &RunGuard,
        state: &mut RunState,
    ) -> Result<PipelineEvent, PipelineError> {
        let sections = state.section_texts();
        let assembled = guard
            .watch(
                state.phase,
                self.collaborators.assembler.assemble(&state.topic, &sections),
            )
            .await?;
        drop(sections);

        let report = assembled?;
        if report.trim().is_empty() {
            return Err(AssemblyError::EmptyDocument.into());
        }
        info!(chars = report.len(), "Report assembled");
        state.report = Some(report);
        Ok(PipelineEvent::Assembled)
    }

    /// Bounded pause between an accepted section and the next drafting attempt.
    async fn pause(&self, guard: &RunGuard, phase: PipelinePhase) -> Result<(), PipelineError> {
        let pause = self.config.section_pause();
        if pause.is_zero() {
            return Ok(());
        }
        info!(pause_ms = pause.as_millis() as u64, "Pausing before next section");
        guard.watch(phase, tokio::time::sleep(pause)).await
    }
}
