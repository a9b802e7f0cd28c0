// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses arguments with clap and hands everything else to
// Layer 2. The CLI is one more host of the session directory:
// it publishes events to the log and blocks until its single
// session reaches a terminal state.
//
//   llmbreaker train --dataset shakespeare --model-size small
//   llmbreaker checkpoints list

pub mod commands;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::{path::PathBuf, sync::Arc};

use crate::application::{session_directory::SessionDirectory, settings::EngineSettings};
use crate::domain::{config::Hyperparameters, session::SessionStatus};
use crate::infra::{checkpoint::CheckpointRegistry, metrics::TracingPublisher};
use commands::{CheckpointCommand, Commands, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "llmbreaker",
    version,
    about = "Train a tiny character-level transformer and watch it learn."
)]
pub struct Cli {
    /// JSON file with engine settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Overrides `checkpoints_dir` from the settings
    #[arg(long, global = true)]
    pub checkpoints_dir: Option<PathBuf>,

    /// Overrides `datasets_dir` from the settings
    #[arg(long, global = true)]
    pub datasets_dir: Option<PathBuf>,

    /// Fixed RNG seed
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let settings = self.settings()?;
        match self.command {
            Commands::Train(args)      => run_train(settings, args),
            Commands::Checkpoints(cmd) => run_checkpoints(settings, cmd),
        }
    }

    fn settings(&self) -> Result<EngineSettings> {
        let mut settings = match &self.config {
            Some(path) => EngineSettings::from_file(path)?,
            None       => EngineSettings::default(),
        };
        if let Some(dir) = &self.checkpoints_dir { settings.checkpoints_dir = dir.clone(); }
        if let Some(dir) = &self.datasets_dir    { settings.datasets_dir    = dir.clone(); }
        if self.seed.is_some()                   { settings.seed            = self.seed; }
        Ok(settings)
    }
}

// ─── train ────────────────────────────────────────────────────────────────────
fn run_train(settings: EngineSettings, args: TrainArgs) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Cannot start the async runtime")?;

    runtime.block_on(train(settings, args))
}

async fn train(settings: EngineSettings, args: TrainArgs) -> Result<()> {
    let temperature = settings.sample_temperature;
    let directory   = SessionDirectory::new(settings, Arc::new(TracingPublisher));
    let dataset     = args.dataset()?;

    let id = match &args.from_checkpoint {
        Some(checkpoint) => directory.create_session_from_checkpoint(checkpoint, &args.feature_type, &dataset)?,
        None => directory.create_session(&args.feature_type, &dataset, &Hyperparameters::from(&args))?,
    };
    directory.set_speed(&id, args.speed);

    let mut rx = directory.subscribe(&id).context("session disappeared after creation")?;
    if !directory.start(&id) {
        bail!("session {id} could not be started");
    }
    let status = rx
        .wait_for(|s| s.status.is_terminal())
        .await
        .context("session control channel closed")?
        .status;

    let snapshot = directory.get_session(&id).context("session disappeared while training")?;
    if status == SessionStatus::Error {
        bail!(
            "training failed: {}",
            snapshot.error_message.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    println!("\nSession {} {} after {} steps", id, status, snapshot.current_step);
    if let Some(last) = snapshot.loss_history.last() {
        println!("  train loss {:.4} | val loss {:.4}", last.train_loss, last.val_loss);
    }

    if args.generate > 0 {
        let text = directory.generate_text(&id, &args.prompt, args.generate, temperature).await?;
        println!("\n{text}\n");
    }

    if args.wants_checkpoint() {
        let record = directory.save_checkpoint(&id, args.checkpoint_name.as_deref()).await?;
        println!("Saved checkpoint '{}' ({})", record.name, record.id);
    }
    Ok(())
}

// ─── checkpoints ──────────────────────────────────────────────────────────────
fn run_checkpoints(settings: EngineSettings, cmd: CheckpointCommand) -> Result<()> {
    let registry = CheckpointRegistry::new(settings.checkpoints_dir);

    match cmd {
        CheckpointCommand::List => {
            let records = registry.list();
            if records.is_empty() {
                println!("No checkpoints in '{}'", registry.dir().display());
            }
            for r in records {
                let loss = r.train_loss.map_or_else(|| "-".to_string(), |l| format!("{l:.4}"));
                println!(
                    "{}  {:<28} {:<17} step {:>6}  loss {:>7}  {}",
                    r.id, r.name, r.feature_type.as_str(), r.step, loss, r.created_at.format("%Y-%m-%d %H:%M"),
                );
            }
        }
        CheckpointCommand::Show { id } => {
            let (record, payload) = registry.load(&id)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            println!("vocabulary: {} characters", payload.vocabulary.len());
            println!("model:    {}", serde_json::to_string(&payload.model_config)?);
            println!("training: {}", serde_json::to_string(&payload.training_config)?);
        }
        CheckpointCommand::Rename { id, name } => {
            let record = registry.rename(&id, &name)?;
            println!("Renamed {} to '{}'", record.id, record.name);
        }
        CheckpointCommand::Delete { id } => {
            registry.delete(&id)?;
            println!("Deleted {id}");
        }
    }
    Ok(())
}
