//! Property-based tests for the pipeline state machine and revision policy.

use proptest::prelude::*;

use reportsmith_core::research::outline::clean_heading;
use reportsmith_core::research::pipeline::{Effect, MachineShape, PipelineEvent, transition};
use reportsmith_core::research::revision::Verdict;
use reportsmith_core::research::{Critique, PipelinePhase, RevisionPolicy, SectionStatus};

/// Drive the pure machine with a cyclic score script and record what happened.
struct Simulation {
    drafts_per_section: Vec<u32>,
    accepted: Vec<(usize, SectionStatus)>,
    final_phase: PipelinePhase,
    steps: usize,
}

fn simulate(sections: usize, policy: RevisionPolicy, scores: &[u8]) -> Simulation {
    let shape = MachineShape { sections, policy };
    let mut phase = PipelinePhase::Planning;
    let mut drafts_per_section = vec![0u32; sections];
    let mut accepted = Vec::new();
    let mut next_score = scores.iter().cycle();
    let mut steps = 0;
    let step_limit = 4 + sections * 2 * (policy.max_revisions as usize + 1);

    while !phase.is_terminal() && steps <= step_limit {
        let event = match phase {
            PipelinePhase::Planning => PipelineEvent::Planned { sections },
            PipelinePhase::Retrieving => PipelineEvent::Retrieved,
            PipelinePhase::Writing { index, .. } => {
                drafts_per_section[index] += 1;
                PipelineEvent::Drafted
            }
            PipelinePhase::Critiquing { .. } => PipelineEvent::Critiqued {
                score: *next_score.next().unwrap_or(&1),
            },
            PipelinePhase::Assembling => PipelineEvent::Assembled,
            PipelinePhase::Done | PipelinePhase::Failed => unreachable!(),
        };
        let t = transition(phase, event, &shape).expect("valid transition");

        // Approved count never exceeds the index being worked on.
        if let PipelinePhase::Writing { index, .. } | PipelinePhase::Critiquing { index, .. } =
            phase
        {
            assert!(accepted.len() <= index);
            assert!(index < sections);
        }
        if let Effect::Accept(status) = t.effect
            && let PipelinePhase::Critiquing { index, .. } = phase
        {
            accepted.push((index, status));
        }
        phase = t.next;
        steps += 1;
    }

    Simulation {
        drafts_per_section,
        accepted,
        final_phase: phase,
        steps,
    }
}

proptest! {
    #[test]
    fn every_run_terminates_with_all_sections(
        sections in 0usize..8,
        threshold in 1u8..=10,
        max_revisions in 0u32..4,
        scores in prop::collection::vec(1u8..=10, 1..12),
    ) {
        let policy = RevisionPolicy { acceptance_threshold: threshold, max_revisions };
        let sim = simulate(sections, policy, &scores);

        prop_assert_eq!(sim.final_phase, PipelinePhase::Done);
        prop_assert!(sim.steps <= 4 + sections * 2 * (max_revisions as usize + 1));
        prop_assert_eq!(sim.accepted.len(), sections);
    }

    #[test]
    fn drafting_attempts_are_bounded(
        sections in 1usize..6,
        max_revisions in 0u32..5,
        scores in prop::collection::vec(1u8..=10, 1..12),
    ) {
        let policy = RevisionPolicy { acceptance_threshold: 8, max_revisions };
        let sim = simulate(sections, policy, &scores);
        for drafts in sim.drafts_per_section {
            prop_assert!(drafts >= 1);
            prop_assert!(drafts <= max_revisions + 1);
        }
    }

    #[test]
    fn acceptance_is_monotonic_and_ordered(
        sections in 1usize..8,
        scores in prop::collection::vec(1u8..=10, 1..12),
    ) {
        let sim = simulate(sections, RevisionPolicy::default(), &scores);
        let indices: Vec<usize> = sim.accepted.iter().map(|(i, _)| *i).collect();
        let expected: Vec<usize> = (0..sections).collect();
        prop_assert_eq!(indices, expected);
    }

    #[test]
    fn rejected_everywhere_means_budget_exhausted(
        sections in 1usize..5,
        max_revisions in 0u32..4,
    ) {
        let policy = RevisionPolicy { acceptance_threshold: 8, max_revisions };
        let sim = simulate(sections, policy, &[3]);
        for (_, status) in &sim.accepted {
            prop_assert_eq!(*status, SectionStatus::BudgetExhausted);
        }
        for drafts in &sim.drafts_per_section {
            prop_assert_eq!(*drafts, max_revisions + 1);
        }
    }

    #[test]
    fn decide_accepts_at_or_above_threshold(
        threshold in 1u8..=10,
        score in 1u8..=10,
        revision in 0u32..10,
    ) {
        let policy = RevisionPolicy { acceptance_threshold: threshold, max_revisions: 2 };
        match policy.decide(score, revision) {
            Verdict::Accept(SectionStatus::Approved) => prop_assert!(score >= threshold),
            Verdict::Accept(SectionStatus::BudgetExhausted) => {
                prop_assert!(score < threshold);
                prop_assert!(revision >= 2);
            }
            Verdict::Revise { next_revision } => {
                prop_assert!(score < threshold);
                prop_assert_eq!(next_revision, revision + 1);
            }
            other => prop_assert!(false, "unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn critique_score_is_clamped(score in any::<i64>()) {
        let critique = Critique::new(score, "");
        prop_assert!((1..=10).contains(&critique.score));
    }

    #[test]
    fn clean_heading_strips_bold_and_never_empties(raw in "[*#\\-0-9. ]{0,4}[A-Za-z][A-Za-z ]{0,20}(\\*\\*)?") {
        let cleaned = clean_heading(&raw);
        prop_assert!(!cleaned.is_empty());
        prop_assert!(!cleaned.contains("**"));
        prop_assert_eq!(cleaned.trim(), cleaned.as_str());
    }
}
