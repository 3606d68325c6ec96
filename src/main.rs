//! silently-commit - CLI entry point.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use git2::Repository;

use silent_committer::attribution::{BlameBackend, Identity, InsertionPolicy};
use silent_committer::config::{Config, Overrides};
use silent_committer::diff::{PendingDiff, collect_pending_diff, read_patch_file};
use silent_committer::error::DiffError;
use silent_committer::pipeline::{blame_source, execute, plan};
use silent_committer::sequence::{
    CommitterPolicy, GroupSummary, GroupingPolicy, RunReport, TimestampPolicy,
};

/// Commit pending changes as the authors of the lines they touch.
#[derive(Parser, Debug)]
#[command(name = "silently-commit")]
#[command(about = "Commit pending changes as the authors of the lines they touch")]
#[command(version)]
struct Cli {
    /// Run as if started in this directory
    #[arg(short = 'C', default_value = ".")]
    path: PathBuf,

    /// Maximum changed lines per hunk
    #[arg(long, env = "SILENT_COMMITTER_MAX_HUNK_SIZE", allow_negative_numbers = true)]
    max_hunk_size: Option<i64>,

    /// Identity for added lines and failed blame, as "Name <email>"
    #[arg(long, env = "SILENT_COMMITTER_DEFAULT_AUTHOR")]
    default_author: Option<Identity>,

    /// One commit per author, or per run of consecutive hunks (author|run)
    #[arg(long, env = "SILENT_COMMITTER_GROUPING")]
    grouping: Option<GroupingPolicy>,

    /// Who gets pure insertions (default|neighbor)
    #[arg(long, env = "SILENT_COMMITTER_INSERTIONS")]
    insertions: Option<InsertionPolicy>,

    /// Author timestamps (original|now)
    #[arg(long, env = "SILENT_COMMITTER_TIMESTAMPS")]
    timestamps: Option<TimestampPolicy>,

    /// Committer identity (author|self)
    #[arg(long, env = "SILENT_COMMITTER_COMMITTER")]
    committer: Option<CommitterPolicy>,

    /// Blame implementation (libgit2|git)
    #[arg(long, env = "SILENT_COMMITTER_BLAME")]
    blame: Option<BlameBackend>,

    /// Also commit untracked files
    #[arg(long)]
    include_untracked: bool,

    /// Read the diff from a file ("-" for stdin) instead of the working tree
    #[arg(long)]
    patch: Option<PathBuf>,

    /// Commit message template ({author} and {files} are replaced)
    #[arg(short = 'm', long = "message", env = "SILENT_COMMITTER_MESSAGE")]
    message: Option<String>,

    /// Print the plan without committing
    #[arg(long)]
    dry_run: bool,

    /// Do not ask for confirmation
    #[arg(short = 'y', long)]
    yes: bool,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            max_hunk_size: self.max_hunk_size,
            default_author: self.default_author.clone(),
            grouping: self.grouping,
            insertions: self.insertions,
            timestamps: self.timestamps,
            committer: self.committer,
            blame: self.blame,
            message: self.message.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received; stopping after the current commit...");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let result = tokio::task::spawn_blocking(move || run(cli, &cancel))
        .await
        .context("Pipeline task panicked")
        .and_then(|r| r);

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run the whole pipeline and return the process exit code.
fn run(cli: Cli, cancel: &AtomicBool) -> Result<u8> {
    // ── Stage 1: Repository and configuration ──
    let repo = Repository::discover(&cli.path)
        .context("Not a git repository. Run silently-commit from within a git repository.")?;
    let git_config = repo.config().context("Failed to read git config")?;
    let config = Config::resolve(&git_config, cli.overrides()).context("Invalid configuration")?;

    // ── Stage 2: Pending diff ──
    let pending = match &cli.patch {
        Some(path) => PendingDiff {
            text: read_patch_file(path)?,
            ..Default::default()
        },
        None => match collect_pending_diff(&repo, cli.include_untracked) {
            Ok(pending) => pending,
            Err(DiffError::NoChanges) => {
                if cli.json {
                    print_json(&RunReport::default())?;
                } else {
                    println!("No pending changes. Nothing to commit.");
                }
                return Ok(0);
            }
            Err(e) => return Err(e).context("Failed to collect the pending diff"),
        },
    };
    let patch = pending.parse().context("Refusing to commit a malformed diff")?;

    // ── Stage 3: Split, attribute, group ──
    let blame = blame_source(&repo, config.blame);
    let plan = plan(&patch, &config, blame.as_ref());

    if plan.is_empty() {
        if cli.json {
            print_json(&RunReport {
                skipped_files: plan.skipped.clone(),
                ..Default::default()
            })?;
        } else {
            print!("{plan}");
            println!("Nothing to commit.");
        }
        return Ok(0);
    }

    if !cli.json {
        print!("{plan}");
    }

    if cli.dry_run {
        if cli.json {
            let planned = RunReport {
                not_attempted: plan.groups.iter().map(GroupSummary::from_group).collect(),
                skipped_files: plan.skipped.clone(),
                ..Default::default()
            };
            print_json(&planned)?;
        } else {
            println!();
            println!("Dry run complete. No changes made.");
        }
        return Ok(0);
    }

    // ── Stage 4: Confirmation ──
    if !cli.yes && std::io::stdin().is_terminal() {
        println!();
        let confirmed = Confirm::new()
            .with_prompt(format!("Create {} commit(s)?", plan.groups.len()))
            .default(true)
            .interact()
            .context("Failed to read confirmation")?;
        if !confirmed {
            println!("Aborted. No changes made.");
            return Ok(0);
        }
    }

    // ── Stage 5: Commit ──
    let report = execute(&repo, &plan, &config, cancel).context("Failed to start committing")?;

    if cli.json {
        print_json(&report)?;
    } else {
        println!();
        println!("{report}");
    }

    Ok(report.exit_code())
}

fn print_json(report: &RunReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize the run report")?;
    println!("{json}");
    Ok(())
}
