//! End-to-end runs of the research pipeline with scripted collaborators.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use reportsmith_core::config::{PipelineConfig, ThrottleConfig};
use reportsmith_core::error::{AssemblyError, LlmError, PipelineError, PlanningError, ProviderError};
use reportsmith_core::research::{
    Assembler, Collaborators, Critique, CritiqueRequest, Critiquer, DraftMode, DraftRequest,
    Drafter, EvidenceHit, EvidenceProvider, FALLBACK_MARKER, MarkdownAssembler, ObservedEvent,
    Outline, PipelinePhase, Planner, RecordingObserver, ResearchPipeline, RetrievalFanout,
    SectionStatus, SectionText,
};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

struct ScriptedPlanner {
    result: Result<Vec<&'static str>, PlanningError>,
}

impl ScriptedPlanner {
    fn new(labels: &[&'static str]) -> Self {
        Self {
            result: Ok(labels.to_vec()),
        }
    }

    fn failing(error: PlanningError) -> Self {
        Self { result: Err(error) }
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, _topic: &str) -> Result<Outline, PlanningError> {
        self.result.clone().map(Outline::new)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct DraftCall {
    label: String,
    mode: DraftMode,
    prior_score: Option<u8>,
}

#[derive(Default)]
struct ScriptedDrafter {
    calls: Mutex<Vec<DraftCall>>,
    fail_on: Option<&'static str>,
    hang: bool,
}

impl ScriptedDrafter {
    fn calls(&self) -> Vec<DraftCall> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_for(&self, label: &str) -> usize {
        self.calls().iter().filter(|c| c.label == label).count()
    }
}

#[async_trait]
impl Drafter for ScriptedDrafter {
    async fn draft(&self, request: DraftRequest<'_>) -> Result<String, LlmError> {
        let label = request.heading.label.clone();
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(DraftCall {
                label: label.clone(),
                mode: request.mode,
                prior_score: request.prior_critique.map(|c| c.score),
            });
            calls.iter().filter(|c| c.label == label).count()
        };
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        if self.fail_on == Some(label.as_str()) {
            return Err(LlmError::Timeout { timeout_secs: 120 });
        }
        Ok(match request.mode {
            DraftMode::Grounded => format!("{label} body, attempt {attempt}."),
            DraftMode::Fallback => format!("{label} from general knowledge."),
        })
    }
}

/// Returns queued scores per heading label, 9 once a queue runs dry.
#[derive(Default)]
struct ScriptedCritiquer {
    scores: Mutex<HashMap<String, VecDeque<u8>>>,
    calls: Mutex<Vec<String>>,
    fail_on: Option<&'static str>,
}

impl ScriptedCritiquer {
    fn with_scores(label: &str, scores: &[u8]) -> Self {
        let critiquer = Self::default();
        critiquer
            .scores
            .lock()
            .unwrap()
            .insert(label.to_string(), scores.iter().copied().collect());
        critiquer
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Critiquer for ScriptedCritiquer {
    async fn critique(&self, request: CritiqueRequest<'_>) -> Result<Critique, LlmError> {
        let label = request.heading.label.clone();
        self.calls.lock().unwrap().push(label.clone());
        if self.fail_on == Some(label.as_str()) {
            return Err(LlmError::ResponseParse {
                message: "not JSON".into(),
            });
        }
        let score = self
            .scores
            .lock()
            .unwrap()
            .get_mut(&label)
            .and_then(VecDeque::pop_front)
            .unwrap_or(9);
        Ok(Critique::new(i64::from(score), format!("score {score}")))
    }
}

struct FailingAssembler;

#[async_trait]
impl Assembler for FailingAssembler {
    async fn assemble(
        &self,
        _topic: &str,
        _sections: &[SectionText<'_>],
    ) -> Result<String, AssemblyError> {
        Err(AssemblyError::Llm(LlmError::ApiRequest {
            message: "editor unavailable".into(),
        }))
    }
}

/// Returns one relevant hit per query; fails or stays silent for chosen headings.
struct StubProvider {
    name: &'static str,
    fail_on: Option<&'static str>,
    empty_on: Option<&'static str>,
    hang: bool,
}

impl StubProvider {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            fail_on: None,
            empty_on: None,
            hang: false,
        }
    }
}

#[async_trait]
impl EvidenceProvider for StubProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn query(&self, text: &str, _max: usize) -> Result<Vec<EvidenceHit>, ProviderError> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail_on.is_some_and(|label| text.ends_with(label)) {
            return Err(ProviderError::Status {
                provider: self.name.into(),
                status: 503,
            });
        }
        if self.empty_on.is_some_and(|label| text.ends_with(label)) {
            return Ok(Vec::new());
        }
        Ok(vec![EvidenceHit::new(
            format!("{} result", self.name),
            format!("Evidence for {text} from {}.", self.name),
            Some(format!("https://{}.example/1", self.name)),
        )])
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn test_config() -> PipelineConfig {
    PipelineConfig {
        section_pause_ms: 0,
        min_evidence_chars: 10,
        ..PipelineConfig::default()
    }
}

fn open_throttle() -> ThrottleConfig {
    ThrottleConfig::new(4, 0)
}

fn fanout(providers: Vec<StubProvider>) -> RetrievalFanout {
    providers
        .into_iter()
        .fold(RetrievalFanout::new(3), |fanout, provider| {
            fanout.with_provider(Arc::new(provider), open_throttle(), 5)
        })
}

struct Harness {
    drafter: Arc<ScriptedDrafter>,
    critiquer: Arc<ScriptedCritiquer>,
    observer: Arc<RecordingObserver>,
    pipeline: ResearchPipeline,
}

fn harness(
    planner: ScriptedPlanner,
    drafter: ScriptedDrafter,
    critiquer: ScriptedCritiquer,
    assembler: Arc<dyn Assembler>,
    fanout: RetrievalFanout,
    config: PipelineConfig,
) -> Harness {
    let drafter = Arc::new(drafter);
    let critiquer = Arc::new(critiquer);
    let observer = Arc::new(RecordingObserver::new());
    let collaborators = Collaborators {
        planner: Arc::new(planner),
        drafter: drafter.clone(),
        critiquer: critiquer.clone(),
        assembler,
    };
    let pipeline =
        ResearchPipeline::new(collaborators, fanout, config).with_observer(observer.clone());
    Harness {
        drafter,
        critiquer,
        observer,
        pipeline,
    }
}

fn simple(labels: &[&'static str], critiquer: ScriptedCritiquer) -> Harness {
    harness(
        ScriptedPlanner::new(labels),
        ScriptedDrafter::default(),
        critiquer,
        Arc::new(MarkdownAssembler),
        fanout(vec![StubProvider::new("web"), StubProvider::new("arxiv")]),
        test_config(),
    )
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_two_sections_accepted_first_time() {
    let h = simple(&["Intro", "Background"], ScriptedCritiquer::default());
    let run = h.pipeline.run("Rust async", &CancellationToken::new()).await;

    assert!(run.is_success(), "run failed: {:?}", run.error);
    assert_eq!(h.drafter.calls().len(), 2);
    assert_eq!(h.critiquer.calls(), vec!["Intro", "Background"]);

    let report = run.report().unwrap();
    let intro = report.find("Intro body, attempt 1.").unwrap();
    let background = report.find("Background body, attempt 1.").unwrap();
    assert!(intro < background);
    assert!(report.starts_with("# Rust async\n"));

    let statuses: Vec<_> = run.state.approved.iter().map(|s| s.status).collect();
    assert_eq!(statuses, vec![SectionStatus::Approved, SectionStatus::Approved]);
    assert_eq!(run.state.approved[0].score, Some(9));
}

#[tokio::test]
async fn test_low_scores_revise_until_accepted() {
    let h = simple(&["X"], ScriptedCritiquer::with_scores("X", &[5, 5, 9]));
    let run = h.pipeline.run("t", &CancellationToken::new()).await;

    assert!(run.is_success());
    assert_eq!(h.drafter.calls_for("X"), 3);
    assert_eq!(h.critiquer.calls().len(), 3);

    let priors: Vec<_> = h.drafter.calls().iter().map(|c| c.prior_score).collect();
    assert_eq!(priors, vec![None, Some(5), Some(5)]);

    let section = &run.state.approved[0];
    assert_eq!(section.attempts, 3);
    assert_eq!(section.status, SectionStatus::Approved);
    assert_eq!(section.body, "X body, attempt 3.");
}

#[tokio::test]
async fn test_persistent_rejection_exhausts_budget() {
    let h = simple(&["X"], ScriptedCritiquer::with_scores("X", &[3; 10]));
    let run = h.pipeline.run("t", &CancellationToken::new()).await;

    assert!(run.is_success());
    assert_eq!(h.drafter.calls_for("X"), 3);
    let section = &run.state.approved[0];
    assert_eq!(section.status, SectionStatus::BudgetExhausted);
    assert_eq!(section.score, Some(3));
    assert_eq!(section.body, "X body, attempt 3.");
}

#[tokio::test]
async fn test_revision_budget_follows_config() {
    let mut config = test_config();
    config.max_revisions = 0;
    let h = harness(
        ScriptedPlanner::new(&["X"]),
        ScriptedDrafter::default(),
        ScriptedCritiquer::with_scores("X", &[1; 5]),
        Arc::new(MarkdownAssembler),
        fanout(vec![StubProvider::new("web")]),
        config,
    );
    let run = h.pipeline.run("t", &CancellationToken::new()).await;
    assert!(run.is_success());
    assert_eq!(h.drafter.calls_for("X"), 1);
}

#[tokio::test]
async fn test_failing_provider_degrades_one_heading() {
    let failing = StubProvider {
        fail_on: Some("Y"),
        ..StubProvider::new("news")
    };
    let h = harness(
        ScriptedPlanner::new(&["X", "Y"]),
        ScriptedDrafter::default(),
        ScriptedCritiquer::default(),
        Arc::new(MarkdownAssembler),
        fanout(vec![StubProvider::new("web"), failing]),
        test_config(),
    );
    let run = h.pipeline.run("t", &CancellationToken::new()).await;

    assert!(run.is_success());
    let y = run.state.outline.get(1).unwrap();
    let providers: Vec<_> = run
        .state
        .pool
        .slice(y)
        .iter()
        .map(|item| item.provider.as_str())
        .collect();
    assert_eq!(providers, vec!["web"]);
    assert_eq!(run.state.retrieval.failures().count(), 1);
    assert!(h.observer.events().contains(&ObservedEvent::Evidence {
        section: 1,
        items: 1,
        failed_providers: 1,
    }));
    assert_eq!(h.drafter.calls()[1].mode, DraftMode::Grounded);
}

#[tokio::test]
async fn test_empty_evidence_produces_marked_fallback() {
    let h = harness(
        ScriptedPlanner::new(&["A", "Z"]),
        ScriptedDrafter::default(),
        ScriptedCritiquer::default(),
        Arc::new(MarkdownAssembler),
        fanout(vec![StubProvider {
            empty_on: Some("Z"),
            ..StubProvider::new("web")
        }]),
        test_config(),
    );
    let run = h.pipeline.run("t", &CancellationToken::new()).await;

    assert!(run.is_success());
    assert_eq!(h.drafter.calls()[1].mode, DraftMode::Fallback);
    assert_eq!(h.critiquer.calls(), vec!["A"]);

    let z = &run.state.approved[1];
    assert_eq!(z.status, SectionStatus::Fallback);
    assert_eq!(z.score, Some(8));
    assert!(z.body.starts_with(FALLBACK_MARKER));
    assert!(
        run.report()
            .unwrap()
            .contains(&format!("## Z\n\n{FALLBACK_MARKER}\n\nZ from general knowledge."))
    );
}

#[tokio::test]
async fn test_draft_error_yields_error_marked_section() {
    let drafter = ScriptedDrafter {
        fail_on: Some("B"),
        ..ScriptedDrafter::default()
    };
    let h = harness(
        ScriptedPlanner::new(&["A", "B", "C"]),
        drafter,
        ScriptedCritiquer::default(),
        Arc::new(MarkdownAssembler),
        fanout(vec![StubProvider::new("web")]),
        test_config(),
    );
    let run = h.pipeline.run("t", &CancellationToken::new()).await;

    assert!(run.is_success());
    assert_eq!(h.drafter.calls_for("B"), 1);
    assert_eq!(h.critiquer.calls(), vec!["A", "C"]);
    let b = &run.state.approved[1];
    assert_eq!(b.status, SectionStatus::Error);
    assert_eq!(b.score, None);
    assert!(b.body.starts_with("Error: Could not generate content"));
    assert!(run.report().unwrap().contains("C body, attempt 1."));
}

#[tokio::test]
async fn test_critique_error_keeps_unreviewed_draft() {
    let critiquer = ScriptedCritiquer {
        fail_on: Some("A"),
        ..ScriptedCritiquer::default()
    };
    let h = simple(&["A"], critiquer);
    let run = h.pipeline.run("t", &CancellationToken::new()).await;

    assert!(run.is_success());
    let a = &run.state.approved[0];
    assert_eq!(a.status, SectionStatus::Error);
    assert!(a.body.starts_with("Error: This section could not be reviewed"));
    assert!(a.body.ends_with("A body, attempt 1."));
}

#[tokio::test]
async fn test_duplicate_labels_stay_distinct() {
    let h = simple(&["Summary", "Summary"], ScriptedCritiquer::default());
    let run = h.pipeline.run("t", &CancellationToken::new()).await;

    assert!(run.is_success());
    assert_eq!(run.state.approved.len(), 2);
    assert_eq!(run.state.approved[0].heading.position, 0);
    assert_eq!(run.state.approved[1].heading.position, 1);
    assert_eq!(run.state.pool.slice(run.state.outline.get(1).unwrap()).len(), 2);
}

#[tokio::test]
async fn test_observer_sees_phases_in_order() {
    let h = simple(&["X"], ScriptedCritiquer::with_scores("X", &[4]));
    let run = h.pipeline.run("t", &CancellationToken::new()).await;
    assert!(run.is_success());

    assert_eq!(
        h.observer.phases(),
        vec![
            PipelinePhase::Planning,
            PipelinePhase::Retrieving,
            PipelinePhase::Writing {
                index: 0,
                revision: 0
            },
            PipelinePhase::Critiquing {
                index: 0,
                revision: 0
            },
            PipelinePhase::Writing {
                index: 0,
                revision: 1
            },
            PipelinePhase::Critiquing {
                index: 0,
                revision: 1
            },
            PipelinePhase::Assembling,
            PipelinePhase::Done,
        ]
    );
    assert_eq!(h.observer.drafts_for(0), 2);
    assert!(h.observer.events().contains(&ObservedEvent::Accepted {
        section: 0,
        attempts: 2
    }));
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_planning_failure_fails_run() {
    let h = harness(
        ScriptedPlanner::failing(PlanningError::EmptyOutline),
        ScriptedDrafter::default(),
        ScriptedCritiquer::default(),
        Arc::new(MarkdownAssembler),
        fanout(vec![StubProvider::new("web")]),
        test_config(),
    );
    let run = h.pipeline.run("t", &CancellationToken::new()).await;

    assert!(!run.is_success());
    assert_eq!(run.state.phase, PipelinePhase::Failed);
    assert!(matches!(
        run.error,
        Some(PipelineError::Planning(PlanningError::EmptyOutline))
    ));
    assert!(run.state.failure.as_deref().unwrap().contains("empty outline"));
    assert!(h.drafter.calls().is_empty());
    assert!(matches!(
        h.observer.events().last(),
        Some(ObservedEvent::Failed(_))
    ));
}

#[tokio::test]
async fn test_outline_over_limit_fails_run() {
    let mut config = test_config();
    config.max_outline_sections = 2;
    let h = harness(
        ScriptedPlanner::new(&["A", "B", "C"]),
        ScriptedDrafter::default(),
        ScriptedCritiquer::default(),
        Arc::new(MarkdownAssembler),
        fanout(vec![]),
        config,
    );
    let run = h.pipeline.run("t", &CancellationToken::new()).await;
    assert!(matches!(
        run.error,
        Some(PipelineError::Planning(PlanningError::OutlineTooLong {
            sections: 3,
            limit: 2
        }))
    ));
}

#[tokio::test]
async fn test_assembly_failure_fails_run_without_report() {
    let h = harness(
        ScriptedPlanner::new(&["A"]),
        ScriptedDrafter::default(),
        ScriptedCritiquer::default(),
        Arc::new(FailingAssembler),
        fanout(vec![StubProvider::new("web")]),
        test_config(),
    );
    let run = h.pipeline.run("t", &CancellationToken::new()).await;

    assert!(matches!(run.error, Some(PipelineError::Assembly(_))));
    assert!(run.report().is_none());
    assert_eq!(run.state.approved.len(), 1);
    assert!(run.into_report().is_err());
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let h = simple(&["A"], ScriptedCritiquer::default());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let run = h.pipeline.run("t", &cancel).await;

    match run.error {
        Some(PipelineError::Cancelled { phase }) => assert_eq!(phase, "planning"),
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert!(h.drafter.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_retrieval_releases_permits() {
    let hanging = StubProvider {
        hang: true,
        ..StubProvider::new("slow")
    };
    let h = harness(
        ScriptedPlanner::new(&["A", "B"]),
        ScriptedDrafter::default(),
        ScriptedCritiquer::default(),
        Arc::new(MarkdownAssembler),
        fanout(vec![hanging]),
        test_config(),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let run = h.pipeline.run("t", &cancel).await;
    assert!(matches!(
        run.error,
        Some(PipelineError::Cancelled { ref phase }) if phase == "retrieving"
    ));
    assert_eq!(h.pipeline.fanout().slots()[0].throttle().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_timeout_is_terminal() {
    let drafter = ScriptedDrafter {
        hang: true,
        ..ScriptedDrafter::default()
    };
    let mut config = test_config();
    config.run_timeout_secs = Some(30);
    let h = harness(
        ScriptedPlanner::new(&["A"]),
        drafter,
        ScriptedCritiquer::default(),
        Arc::new(MarkdownAssembler),
        fanout(vec![StubProvider::new("web")]),
        config,
    );
    let run = h.pipeline.run("t", &CancellationToken::new()).await;

    assert!(matches!(run.error, Some(PipelineError::TimedOut { secs: 30 })));
    assert!(run.state.approved.is_empty());
    assert_eq!(run.state.phase, PipelinePhase::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_pause_separates_sections() {
    let mut config = test_config();
    config.section_pause_ms = 4_000;
    let h = harness(
        ScriptedPlanner::new(&["A", "B", "C"]),
        ScriptedDrafter::default(),
        ScriptedCritiquer::default(),
        Arc::new(MarkdownAssembler),
        fanout(vec![StubProvider::new("web")]),
        config,
    );
    let start = tokio::time::Instant::now();
    let run = h.pipeline.run("t", &CancellationToken::new()).await;

    assert!(run.is_success());
    // Two pauses: between A and B, and between B and C. None before assembly.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(8), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(12), "elapsed {elapsed:?}");
}
