use anyhow::{Context as _, Result};
use indicatif::ProgressBar;
use pipeline_runner::cli::commands::{
    parse_json_value, HistoryCommand, ResumeCommand, RunCommand, ValidateCommand,
};
use pipeline_runner::cli::output::*;
use pipeline_runner::cli::{Cli, Command};
use pipeline_runner::core::config::PipelineConfig;
use pipeline_runner::persistence::{CheckpointStore, FileCheckpointStore};
#[cfg(feature = "sqlite")]
use pipeline_runner::persistence::SqliteCheckpointStore;
use pipeline_runner::{Checkpoint, Context, NodeRegistry, Pipeline, RunState, RunStatus};
use serde_json::Value;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG overrides the verbosity flag
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, &cli).await?,
        Command::Resume(cmd) => resume_pipeline(cmd, &cli).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::History(cmd) => show_history(cmd, &cli).await?,
    }

    Ok(())
}

async fn open_store(cli: &Cli) -> Result<Arc<dyn CheckpointStore>> {
    if let Some(dir) = &cli.checkpoint_dir {
        return Ok(Arc::new(FileCheckpointStore::new(dir)?));
    }

    #[cfg(feature = "sqlite")]
    let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::with_default_path().await?);
    #[cfg(not(feature = "sqlite"))]
    let store: Arc<dyn CheckpointStore> = Arc::new(FileCheckpointStore::with_default_path()?);

    Ok(store)
}

fn load_pipeline(file: &str) -> Result<Pipeline> {
    let config = PipelineConfig::from_file(file).context("Failed to load pipeline config")?;
    let pipeline = Pipeline::from_config(&config, Arc::new(NodeRegistry::with_builtins()))?;

    println!("{} Loaded pipeline: {}", INFO, style(pipeline.name()).bold());
    Ok(pipeline)
}

/// Print events above the spinner while runs advance
async fn attach_printer(pipeline: &Pipeline, spinner: &ProgressBar) {
    let spinner = spinner.clone();
    pipeline
        .add_event_handler(move |event| {
            if let Some(line) = format_execution_event(&event) {
                spinner.println(line);
            }
        })
        .await;
}

async fn run_pipeline(cmd: &RunCommand, cli: &Cli) -> Result<()> {
    let pipeline = load_pipeline(&cmd.file)?;

    let input = cmd.input.as_deref().map(parse_json_value).unwrap_or(Value::Null);
    let mut context = Context::new();
    for (key, value) in &cmd.context {
        context.set(key.clone(), parse_json_value(value));
        println!(
            "{} Context: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let spinner = create_spinner("running");
    attach_printer(&pipeline, &spinner).await;

    println!();
    let started = pipeline
        .start_with_context(input, context, cmd.run_id.clone(), cmd.single_step)
        .await?;
    pipeline.wait(&started.run_id).await?;
    spinner.finish_and_clear();

    let state = pipeline.state(&started.run_id).await?;
    println!("\n{}", format_run(&state));

    if state.status.is_live() && !cmd.no_history {
        save_checkpoint(&pipeline, cli).await?;
    }

    finish(&pipeline, &[state]);
    Ok(())
}

async fn resume_pipeline(cmd: &ResumeCommand, cli: &Cli) -> Result<()> {
    let pipeline = load_pipeline(&cmd.file)?;

    let checkpoint = match &cmd.checkpoint {
        Some(path) => Checkpoint::load_from_file(path)
            .with_context(|| format!("Failed to read checkpoint {}", path))?,
        None => open_store(cli)
            .await?
            .load_latest(pipeline.name())
            .await?
            .with_context(|| format!("No checkpoint stored for pipeline '{}'", pipeline.name()))?,
    };

    let restored = pipeline.load_checkpoint(&checkpoint).await?;
    let targets: Vec<String> = match &cmd.run_id {
        Some(run_id) if restored.contains(run_id) => vec![run_id.clone()],
        Some(run_id) => anyhow::bail!("Run '{}' is not part of the checkpoint", run_id),
        None => restored,
    };

    if targets.is_empty() {
        println!("{} Checkpoint holds no live runs", WARN);
        return Ok(());
    }

    let spinner = create_spinner("resuming");
    attach_printer(&pipeline, &spinner).await;

    let mut states = Vec::new();
    for run_id in &targets {
        pipeline.set_single_step(run_id, cmd.single_step).await?;
        pipeline.resume(run_id).await?;
        pipeline.wait(run_id).await?;
        states.push(pipeline.state(run_id).await?);
    }
    spinner.finish_and_clear();

    for state in &states {
        println!("\n{}", format_run(state));
    }

    if states.iter().any(|state| state.status.is_live()) {
        save_checkpoint(&pipeline, cli).await?;
    }

    finish(&pipeline, &states);
    Ok(())
}

async fn save_checkpoint(pipeline: &Pipeline, cli: &Cli) -> Result<()> {
    let store = open_store(cli).await?;
    let summary = store.save(&pipeline.save_checkpoint().await).await?;
    println!(
        "\n{} Checkpoint saved (ID: {})",
        INFO,
        style(&summary.checkpoint_id.to_string()[..8]).dim()
    );
    Ok(())
}

fn finish(pipeline: &Pipeline, states: &[RunState]) {
    let failed: Vec<&RunState> = states
        .iter()
        .filter(|state| state.status == RunStatus::Exception)
        .collect();

    if failed.is_empty() {
        println!(
            "\n{} {} {}",
            CHECK,
            style(pipeline.name()).bold(),
            if states.iter().all(|state| state.status == RunStatus::Success) {
                style("completed successfully").green()
            } else {
                style("paused").blue()
            }
        );
        return;
    }

    println!("\n{} {} {}", CROSS, style(pipeline.name()).bold(), style("failed").red());
    for state in failed {
        if let Some(entry) = state.trace.last() {
            error!("Run {} failed at node {}: {}", state.run_id, entry.node_id, entry.message);
        }
    }
    std::process::exit(1);
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let result = PipelineConfig::from_file(&cmd.file).and_then(|config| {
        Pipeline::from_config(&config, Arc::new(NodeRegistry::with_builtins()))?;
        Ok(config)
    });

    match result {
        Ok(config) => {
            let nested = config.nodes.values().filter(|node| node.is_sub_pipeline).count();
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Nodes: {}", style(config.nodes.len()).cyan());
            println!(
                "  Entry: {}",
                style(config.entry_node().unwrap_or_default()).cyan()
            );
            println!("  Sub-pipelines: {}", style(nested).cyan());
            println!(
                "  Mode: {}",
                style(if config.asynchronous { "asynchronous" } else { "synchronous" }).dim()
            );

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn show_history(cmd: &HistoryCommand, cli: &Cli) -> Result<()> {
    let store = open_store(cli).await?;

    let mut summaries = if let Some(pipeline_name) = &cmd.pipeline {
        store.list(pipeline_name).await?
    } else {
        let mut all = Vec::new();
        for pipeline in store.list_pipelines().await? {
            all.extend(store.list(&pipeline).await?);
        }
        all
    };
    summaries.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
    summaries.truncate(cmd.limit);

    if summaries.is_empty() {
        println!("{} No checkpoints found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "checkpoints": summaries });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Checkpoints (showing latest {}):", INFO, cmd.limit);
        for summary in &summaries {
            println!("  {}", format_checkpoint_summary(summary));
        }
    }

    Ok(())
}
