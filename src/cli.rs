use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::commands::{self, CommandReport};

#[derive(Debug, Parser)]
#[command(
    name = "rolesync",
    version,
    about = "Reconcile community tier roles against a spreadsheet membership ledger"
)]
pub struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show paths, configured communities and credential presence.
    Status,
    /// Run one sync tick over every enabled community.
    SyncOnce,
    /// Run the sync scheduler.
    SyncWatch(SyncWatchArgs),
    /// Reconcile one community without mutating roles or the ledger.
    SyncDryRun(CommunityArgs),
    /// Show the current ledger page window and the last cycle for one community.
    SyncStatus(CommunityArgs),
    /// Write a manually verified member into the current page.
    AddManual(AddManualArgs),
}

#[derive(Debug, Args)]
pub struct SyncWatchArgs {
    #[arg(long)]
    pub once: bool,
    #[arg(long)]
    pub daemon: bool,
}

#[derive(Debug, Args)]
pub struct CommunityArgs {
    #[arg(long)]
    pub community: String,
}

#[derive(Debug, Args)]
pub struct AddManualArgs {
    #[arg(long)]
    pub community: String,
    /// `username#discriminator` as shown in chat.
    #[arg(long)]
    pub handle: String,
    #[arg(long)]
    pub user_id: String,
    #[arg(long)]
    pub plan: i64,
    /// Link or note backing the verification.
    #[arg(long, default_value = "")]
    pub proof: String,
    #[arg(long)]
    pub verified_by: String,
}

fn render(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    let status = if report.ok { "ok" } else { "issues" };
    println!("{}: {status}", report.command);
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  ! {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = match &cli.command {
        Command::Status => commands::status::run()?,
        Command::SyncOnce => commands::sync_watch::run(&commands::sync_watch::SyncWatchOptions {
            once: true,
            daemon: false,
        })?,
        Command::SyncWatch(args) => {
            commands::sync_watch::run(&commands::sync_watch::SyncWatchOptions {
                once: args.once,
                daemon: args.daemon,
            })?
        }
        Command::SyncDryRun(args) => commands::sync_dry_run::run(&args.community)?,
        Command::SyncStatus(args) => commands::sync_status::run(&args.community)?,
        Command::AddManual(args) => commands::add_manual::run(&commands::add_manual::AddManualOptions {
            community: args.community.clone(),
            handle: args.handle.clone(),
            user_id: args.user_id.clone(),
            plan: args.plan,
            proof: args.proof.clone(),
            verified_by: args.verified_by.clone(),
        })?,
    };

    render(&report, cli.json)?;
    if !report.ok {
        std::process::exit(2);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_add_manual_flags() {
        let cli = Cli::try_parse_from([
            "rolesync",
            "add-manual",
            "--community",
            "42",
            "--handle",
            "foo#0001",
            "--user-id",
            "1",
            "--plan",
            "1500",
            "--verified-by",
            "mod#0002",
        ])
        .expect("parse");
        let Command::AddManual(args) = cli.command else {
            panic!("expected add-manual");
        };
        assert_eq!(args.plan, 1500);
        assert_eq!(args.proof, "");
    }
}
