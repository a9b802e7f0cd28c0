// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Two subcommands:
//   train        — run one session to completion, optionally
//                  warm-started from and/or saved to a checkpoint
//   checkpoints  — list / show / rename / delete registry entries
//
// Every hyperparameter flag is optional; unset flags fall back
// to the model-size preset and the built-in defaults.

use anyhow::{bail, Result};
use clap::{ArgGroup, Args, Subcommand};
use std::path::PathBuf;

use crate::data::loader::DatasetRef;
use crate::domain::config::Hyperparameters;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a model on a corpus and report its losses
    Train(TrainArgs),

    /// Manage saved checkpoints
    #[command(subcommand)]
    Checkpoints(CheckpointCommand),
}

/// Arguments for the `train` command.
#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("corpus")
        .required(true)
        .args(["text", "file", "dataset"]),
))]
pub struct TrainArgs {
    /// Corpus given inline
    #[arg(long)]
    pub text: Option<String>,

    /// Corpus file (.txt or .docx)
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Bundled corpus name (shakespeare, poems, childrens, bible,
    /// scifi, philosophy, code)
    #[arg(long)]
    pub dataset: Option<String>,

    /// watch_learn, attention_cinema or style_transfer
    #[arg(long, default_value = "watch_learn")]
    pub feature_type: String,

    /// Warm-start from this checkpoint id
    #[arg(long)]
    pub from_checkpoint: Option<String>,

    /// small, medium or large
    #[arg(long)]
    pub model_size: Option<String>,

    #[arg(long)]
    pub embedding_dim: Option<usize>,

    #[arg(long)]
    pub num_layers: Option<usize>,

    /// Must divide embedding_dim
    #[arg(long)]
    pub num_heads: Option<usize>,

    #[arg(long)]
    pub context_length: Option<usize>,

    #[arg(long)]
    pub dropout: Option<f64>,

    /// Share the token embedding with the output projection
    #[arg(long)]
    pub weight_tying: Option<bool>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub max_steps: Option<usize>,

    #[arg(long)]
    pub learning_rate: Option<f64>,

    /// Steps between loss estimates, samples and attention snapshots
    #[arg(long)]
    pub eval_interval: Option<usize>,

    #[arg(long)]
    pub warmup_steps: Option<usize>,

    /// Gradient-norm clip; 0 disables clipping
    #[arg(long)]
    pub grad_clip: Option<f64>,

    /// Speed multiplier; at 10 or more the loop never sleeps
    #[arg(long, default_value_t = 10.0)]
    pub speed: f64,

    /// Characters to generate after training (0 to skip)
    #[arg(long, default_value_t = 200)]
    pub generate: usize,

    /// Seed text for the final generation
    #[arg(long, default_value = "")]
    pub prompt: String,

    /// Save a checkpoint when training ends
    #[arg(long)]
    pub save: bool,

    /// Checkpoint name; implies --save
    #[arg(long)]
    pub checkpoint_name: Option<String>,
}

impl TrainArgs {
    pub fn dataset(&self) -> Result<DatasetRef> {
        match (&self.text, &self.file, &self.dataset) {
            (Some(text), None, None) => Ok(DatasetRef::Text(text.clone())),
            (None, Some(path), None) => Ok(DatasetRef::File(path.clone())),
            (None, None, Some(name)) => Ok(DatasetRef::Bundled(name.clone())),
            _ => bail!("exactly one of --text, --file or --dataset is required"),
        }
    }

    pub fn wants_checkpoint(&self) -> bool {
        self.save || self.checkpoint_name.is_some()
    }
}

/// The application layer never sees clap types.
impl From<&TrainArgs> for Hyperparameters {
    fn from(a: &TrainArgs) -> Self {
        Hyperparameters {
            model_size:     a.model_size.clone(),
            embedding_dim:  a.embedding_dim,
            num_layers:     a.num_layers,
            num_heads:      a.num_heads,
            context_length: a.context_length,
            dropout:        a.dropout,
            weight_tying:   a.weight_tying,
            batch_size:     a.batch_size,
            max_steps:      a.max_steps,
            learning_rate:  a.learning_rate,
            eval_interval:  a.eval_interval,
            warmup_steps:   a.warmup_steps,
            grad_clip:      a.grad_clip,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum CheckpointCommand {
    /// List saved checkpoints, oldest first
    List,

    /// Print one checkpoint's metadata and configs
    Show { id: String },

    Rename { id: String, name: String },

    /// Remove the entry and its payload file
    Delete { id: String },
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("llmbreaker").chain(args.iter().copied()))
    }

    #[test]
    fn test_train_requires_a_corpus() {
        assert!(parse(&["train"]).is_err());
        assert!(parse(&["train", "--text", "abc", "--dataset", "poems"]).is_err());
    }

    #[test]
    fn test_train_flags_become_hyperparameters() {
        let cli = parse(&[
            "train", "--dataset", "poems", "--model-size", "small", "--max-steps", "50", "--num-heads", "2",
        ])
        .unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };

        assert_eq!(args.dataset().unwrap(), DatasetRef::Bundled("poems".into()));
        let hp = Hyperparameters::from(&args);
        assert_eq!(hp.model_size.as_deref(), Some("small"));
        assert_eq!(hp.max_steps, Some(50));
        assert_eq!(hp.num_heads, Some(2));
        assert_eq!(hp.learning_rate, None);
        assert!(!args.wants_checkpoint());
    }

    #[test]
    fn test_checkpoint_name_implies_save() {
        let cli = parse(&["train", "--text", "abc", "--checkpoint-name", "mine"]).unwrap();
        let Commands::Train(args) = cli.command else { panic!("expected train") };
        assert!(args.wants_checkpoint());
    }

    #[test]
    fn test_checkpoint_subcommands() {
        let cli = parse(&["checkpoints", "rename", "abc", "new name"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Checkpoints(CheckpointCommand::Rename { ref id, ref name }) if id == "abc" && name == "new name"
        ));
    }
}
