//! Command-line surface: a thin invocation layer over the engine modules.
//! Parsing, subcommand shape, and the JSON envelope mirror `ironclaw`'s own
//! CLI conventions (doc comments as help text, `#[command(subcommand)]`
//! nesting); styling and starter-content bundling are not this crate's job.

pub mod envelope;
pub mod handlers;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::model::{Outcome, Severity};

#[derive(Debug, Parser)]
#[command(name = "cass-memory", version, about = "Local, agent-neutral learning memory for AI coding assistants")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Emit the JSON command envelope instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose logging; also adds a backtrace to error output.
    #[arg(long, global = true, env = "CASS_MEMORY_VERBOSE")]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the reflect pipeline over unprocessed sessions.
    Reflect {
        /// Directory of session transcripts to scan. Defaults to the repo
        /// overlay's `sessions` directory if one is discoverable, else cwd.
        #[arg(long)]
        session: Option<PathBuf>,

        /// Agent name attributed to extracted deltas.
        #[arg(long, default_value = "unknown")]
        agent: String,
    },

    /// Assemble ranked playbook context for a task description.
    Context {
        /// Free-text description of the task at hand.
        task: String,
    },

    /// Print playbook maturity/score distribution and pipeline health.
    Status,

    /// Manage the trauma safety-guard list.
    Trauma(TraumaArgs),

    /// Record a session outcome.
    Outcome(OutcomeArgs),

    /// Inspect or prune the playbook directly.
    Playbook(PlaybookArgs),
}

#[derive(Debug, Args)]
pub struct TraumaArgs {
    #[command(subcommand)]
    pub command: TraumaCommand,
}

#[derive(Debug, Subcommand)]
pub enum TraumaCommand {
    /// List active trauma entries.
    List,

    /// Add a new trauma entry after a human flags a catastrophic command.
    Add {
        /// Regex source matched case-insensitively against future commands.
        pattern: String,
        #[arg(long, value_enum, default_value = "critical")]
        severity: SeverityArg,
        #[arg(long, default_value = "global")]
        scope: String,
        /// Session the trigger was observed in.
        #[arg(long)]
        session: String,
        /// The human message that flagged the command.
        #[arg(long)]
        message: String,
    },

    /// Mark a trauma entry healed so the guard stops blocking it.
    Heal {
        /// Id of the entry to heal.
        id: String,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum SeverityArg {
    Critical,
    Fatal,
}

impl From<SeverityArg> for Severity {
    fn from(value: SeverityArg) -> Self {
        match value {
            SeverityArg::Critical => Severity::Critical,
            SeverityArg::Fatal => Severity::Fatal,
        }
    }
}

#[derive(Debug, Args)]
pub struct OutcomeArgs {
    #[command(subcommand)]
    pub command: OutcomeCommand,
}

#[derive(Debug, Subcommand)]
pub enum OutcomeCommand {
    /// Append a session outcome to the outcomes log.
    Record {
        #[arg(long)]
        session_id: String,
        #[arg(long, value_enum)]
        outcome: OutcomeArg,
        #[arg(long, value_delimiter = ',')]
        rules_used: Vec<String>,
        #[arg(long)]
        duration_sec: Option<f64>,
        #[arg(long)]
        error_count: Option<u32>,
        #[arg(long)]
        had_retries: Option<bool>,
        #[arg(long)]
        sentiment: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Path of the session this outcome describes.
        #[arg(long)]
        path: String,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutcomeArg {
    Success,
    Failure,
    Mixed,
    Partial,
}

impl From<OutcomeArg> for Outcome {
    fn from(value: OutcomeArg) -> Self {
        match value {
            OutcomeArg::Success => Outcome::Success,
            OutcomeArg::Failure => Outcome::Failure,
            OutcomeArg::Mixed => Outcome::Mixed,
            OutcomeArg::Partial => Outcome::Partial,
        }
    }
}

#[derive(Debug, Args)]
pub struct PlaybookArgs {
    #[command(subcommand)]
    pub command: PlaybookCommand,
}

#[derive(Debug, Subcommand)]
pub enum PlaybookCommand {
    /// Print the merged global+repo playbook.
    Show,

    /// Deprecate bullets whose last feedback predates `max_age_days`.
    Prune {
        #[arg(long, default_value_t = 180)]
        max_age_days: u32,
    },
}
