//! Subcommand handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reportsmith_core::config::{ReportConfig, load_config, workspace_config_path};
use reportsmith_core::persistence;
use reportsmith_core::providers;
use reportsmith_core::research::{
    Assembler, Collaborators, EditorAssembler, LlmCritiquer, LlmDrafter, LlmPlanner,
    MarkdownAssembler, Planner, ResearchPipeline, SectionStatus,
};
use reportsmith_core::Brain;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::progress::ConsoleObserver;
use crate::{Commands, ConfigAction, RunArgs};

pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_file: Option<&Path>,
    quiet: bool,
) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => {
            let mut config = load(workspace, config_file)?;
            apply_run_overrides(&mut config, &args);
            config.validate()?;
            run_report(&config, &args.topic, quiet).await
        }
        Commands::Plan { topic } => {
            let config = load(workspace, config_file)?;
            config.validate()?;
            plan_outline(&config, &topic).await
        }
        Commands::Config { action } => handle_config(action, workspace, config_file),
    }
}

fn load(workspace: &Path, config_file: Option<&Path>) -> anyhow::Result<ReportConfig> {
    load_config(Some(workspace), config_file, None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

/// Apply `run` flags on top of the layered configuration.
pub(crate) fn apply_run_overrides(config: &mut ReportConfig, args: &RunArgs) {
    if let Some(threshold) = args.threshold {
        config.pipeline.acceptance_threshold = threshold;
    }
    if let Some(max_revisions) = args.max_revisions {
        config.pipeline.max_revisions = max_revisions;
    }
    if let Some(timeout) = args.timeout {
        config.pipeline.run_timeout_secs = Some(timeout);
    }
    if args.no_polish {
        config.assembly.polish = false;
    }
    if let Some(output) = &args.output {
        config.output.dir = output.clone();
    }
}

fn build_brain(config: &ReportConfig) -> anyhow::Result<Brain> {
    let provider = providers::create_provider(&config.llm)
        .map_err(|e| anyhow::anyhow!("Failed to initialize LLM provider: {}", e))?;
    info!(
        provider = %config.llm.provider,
        model = %config.llm.model,
        "LLM provider ready"
    );
    Ok(Brain::new(provider, &config.llm))
}

/// Wire the LLM-backed collaborators around one shared brain, so every call
/// goes through the same throttle.
fn build_collaborators(config: &ReportConfig, brain: &Arc<Brain>) -> Collaborators {
    let assembler: Arc<dyn Assembler> = if config.assembly.polish {
        Arc::new(EditorAssembler::new(brain.clone()))
    } else {
        Arc::new(MarkdownAssembler)
    };
    Collaborators {
        planner: Arc::new(LlmPlanner::new(
            brain.clone(),
            config.pipeline.max_outline_sections,
        )),
        drafter: Arc::new(LlmDrafter::new(brain.clone())),
        critiquer: Arc::new(LlmCritiquer::new(brain.clone())),
        assembler,
    }
}

async fn run_report(config: &ReportConfig, topic: &str, quiet: bool) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let brain = Arc::new(build_brain(config)?.with_cancellation(cancel.clone()));
    let collaborators = build_collaborators(config, &brain);

    let registration = reportsmith_tools::build_fanout(&config.retrieval);
    for skipped in &registration.skipped {
        if !quiet {
            eprintln!("Skipping provider '{}': {}", skipped.name, skipped.reason);
        }
    }
    if registration.fanout.slots().is_empty() {
        warn!("No evidence providers available; every section will use the fallback path");
    }

    let pipeline = ResearchPipeline::new(collaborators, registration.fanout, config.pipeline.clone())
        .with_observer(Arc::new(ConsoleObserver::new(quiet)));

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, cancelling run...");
            signal_token.cancel();
        }
    });

    let run = pipeline.run(topic, &cancel).await;
    cancel.cancel();

    let artifacts = persistence::write_run(&config.output.dir, &run.state)
        .map_err(|e| anyhow::anyhow!("Failed to save run: {}", e))?;

    let usage = brain.total_usage();
    if !quiet {
        let state = &run.state;
        eprintln!();
        eprintln!(
            "Sections: {} approved, {} after max revisions, {} fallback, {} errors",
            state.sections_with_status(SectionStatus::Approved),
            state.sections_with_status(SectionStatus::BudgetExhausted),
            state.sections_with_status(SectionStatus::Fallback),
            state.sections_with_status(SectionStatus::Error),
        );
        eprintln!(
            "Tokens: {} in / {} out",
            usage.input_tokens, usage.output_tokens
        );
        eprintln!("Run state: {}", artifacts.state.display());
    }

    match (&run.error, &artifacts.report) {
        (None, Some(report)) => {
            println!("{}", report.display());
            Ok(())
        }
        (Some(error), _) => Err(anyhow::anyhow!("Run failed ({}): {}", error.kind(), error)),
        (None, None) => Err(anyhow::anyhow!("Run finished without a report")),
    }
}

async fn plan_outline(config: &ReportConfig, topic: &str) -> anyhow::Result<()> {
    let brain = Arc::new(build_brain(config)?);
    let planner = LlmPlanner::new(brain, config.pipeline.max_outline_sections);
    let outline = planner
        .plan(topic)
        .await
        .map_err(|e| anyhow::anyhow!("Planning failed: {}", e))?;

    println!("# {topic}");
    for heading in outline.iter() {
        println!("{}. {}", heading.position + 1, heading.clean_label());
    }
    Ok(())
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let path = init_config(workspace)?;
            println!("Created configuration at {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace, config_file)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Write the default configuration to the workspace config path.
pub(crate) fn init_config(workspace: &Path) -> anyhow::Result<PathBuf> {
    let path = workspace_config_path(workspace);
    if path.exists() {
        anyhow::bail!("Config file already exists: {}", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(&ReportConfig::default())?;
    std::fs::write(&path, content)?;
    Ok(path)
}
