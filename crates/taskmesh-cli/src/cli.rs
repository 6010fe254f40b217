use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "taskmesh")]
#[command(about = "Local-first tasks that sync when the network allows")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Never contact the remote service, even if one is configured
    #[arg(long, global = true)]
    pub offline: bool,

    /// Quick capture: taskmesh "call the plumber"
    #[arg(trailing_var_arg = true)]
    pub title: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a task
    #[command(alias = "new")]
    Add {
        /// Task title
        title: Vec<String>,
        /// File the task under a list (ID or unique ID prefix)
        #[arg(long, value_name = "ID")]
        list: Option<String>,
        /// Due date as RFC 3339 (e.g. 2026-11-02T09:00:00Z)
        #[arg(long, value_name = "WHEN")]
        due: Option<String>,
        /// Priority from 0 (none) to 3 (urgent)
        #[arg(short, long, default_value = "0")]
        priority: u8,
    },
    /// List tasks
    List {
        /// Number of tasks to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Include completed tasks
        #[arg(short, long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rename a task
    Edit {
        /// Task ID or unique ID prefix
        id: String,
        /// New title
        title: Vec<String>,
    },
    /// Mark a task as completed
    Done {
        /// Task ID or unique ID prefix
        id: String,
    },
    /// Delete a task
    Delete {
        /// Task ID or unique ID prefix
        id: String,
    },
    /// List task lists
    Lists {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a task list
    NewList {
        /// List name
        name: Vec<String>,
    },
    /// Show records waiting to sync
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push pending changes and pull the latest server state
    Sync,
    /// Retry records that ran out of sync attempts
    Retry,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
