//! taskmesh CLI - local-first tasks from the terminal
//!
//! Every command writes to the local store first; sync happens when a
//! remote is configured and reachable.

mod cli;
mod commands;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::{
    common::resolve_db_path, run_add, run_completions, run_delete, run_done, run_edit, run_list,
    run_lists, run_new_list, run_retry, run_status, run_sync,
};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "taskmesh=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Some(Commands::Completions { shell, output }) = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let db_path = resolve_db_path(cli.db_path)?;
    let offline = cli.offline;

    match cli.command {
        Some(Commands::Add {
            title,
            list,
            due,
            priority,
        }) => {
            run_add(&title, list.as_deref(), due.as_deref(), priority, &db_path, offline).await?;
        }
        Some(Commands::List { limit, all, json }) => {
            run_list(limit, all, json, &db_path, offline).await?;
        }
        Some(Commands::Edit { id, title }) => run_edit(&id, &title, &db_path, offline).await?,
        Some(Commands::Done { id }) => run_done(&id, &db_path, offline).await?,
        Some(Commands::Delete { id }) => run_delete(&id, &db_path, offline).await?,
        Some(Commands::Lists { json }) => run_lists(json, &db_path, offline).await?,
        Some(Commands::NewList { name }) => run_new_list(&name, &db_path, offline).await?,
        Some(Commands::Status { json }) => run_status(json, &db_path, offline).await?,
        Some(Commands::Sync) => run_sync(&db_path, offline).await?,
        Some(Commands::Retry) => run_retry(&db_path, offline).await?,
        Some(Commands::Completions { .. }) => {}
        None => {
            if cli.title.is_empty() {
                run_list(20, false, false, &db_path, offline).await?;
            } else {
                run_add(&cli.title, None, None, 0, &db_path, offline).await?;
            }
        }
    }

    Ok(())
}
