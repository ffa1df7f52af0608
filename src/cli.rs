//! Command-line interface definitions.

use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// A bounded, retrying video transcoding pipeline backed by Redis.
#[derive(Parser, Debug)]
#[command(name = "transcode-pipeline", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "/config/pipeline.yaml", env = "CONFIG_PATH", global = true)]
    pub config: PathBuf,

    /// Increase logging verbosity (-v, -vv). Overrides the configured level.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log level from the verbosity flags, if any were given.
    pub fn log_level_override(&self) -> Option<&'static str> {
        match self.verbose {
            0 => None,
            1 => Some("debug"),
            _ => Some("trace"),
        }
    }
}

/// Available subcommands for the transcoding pipeline.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the worker pool and process jobs until interrupted.
    Run(RunArgs),

    /// Validate the configuration file without starting.
    #[command(name = "config-validate")]
    ConfigValidate,

    /// Display the parsed configuration with defaults filled in.
    #[command(name = "config-show")]
    ConfigShow,

    /// Push a job read from a JSON file onto the queue.
    Enqueue {
        /// File holding one job descriptor.
        file: PathBuf,
    },

    /// List pending and dead-lettered jobs.
    #[command(name = "queue-list")]
    QueueList,

    /// Clear all pending jobs from the queue.
    #[command(name = "queue-clear")]
    QueueClear,

    /// Return a dead-lettered job to the queue with a fresh retry budget.
    #[command(name = "retry-dead-letter")]
    RetryDeadLetter {
        /// The video id of the job to retry.
        video_id: String,
    },
}

/// Arguments for the run subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Override the configured number of jobs processed at once.
    #[arg(long)]
    pub concurrency: Option<NonZeroUsize>,

    /// Leave jobs found in this worker's in-flight list where they are.
    #[arg(long, default_value = "false")]
    pub skip_recovery: bool,
}
