//! Command-line interface for centralink.
//!
//! This module handles:
//! - Argument parsing (missing paths are asked for interactively)
//! - Path validation and the advisory preflight checks
//! - Running the transition batch and printing the summary
//! - The revert prompt and the automatic revert after an interrupt

use crate::config::{Config, OrderPolicy};
use crate::discovery::discover;
use crate::logging::{Console, RunLogger};
use crate::output::{OutputFormatter, confirm_revert, prompt_line};
use crate::preflight::{check_capacity, warn_if_case_insensitive};
use crate::revert::{RevertOptions, RevertReport, revert};
use crate::transition::{Transition, TransitionEngine, TransitionReport};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{error, info};

/// Move playlist files into one central repository and leave symlinks behind.
#[derive(Debug, Parser)]
#[command(name = "centralink", version, about, args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Consolidate files into the repository (the default)
    Run(RunArgs),
    /// Put every linked file back at its playlist path
    Revert(PathArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct PathArgs {
    /// Central repository folder
    #[arg(short, long)]
    pub repository: Option<PathBuf>,

    /// Folder containing the playlists
    #[arg(short, long)]
    pub playlists: Option<PathBuf>,

    /// Configuration file (defaults to .centralinkrc.toml, then ~/.config/centralink/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. "debug" (overrides the configuration file)
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub paths: PathArgs,

    /// Processing order (overrides the configuration file)
    #[arg(long, value_enum)]
    pub order: Option<OrderPolicy>,

    /// Do not offer to revert after the run
    #[arg(long)]
    pub no_prompt: bool,

    /// Print the summary as JSON (implies --no-prompt)
    #[arg(long)]
    pub json: bool,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// The user asked for a revert after the run.
    Reverted,
    /// Ctrl-C during the batch; an automatic revert was performed.
    Interrupted,
}

impl RunOutcome {
    pub fn exit_code(self) -> ExitCode {
        match self {
            RunOutcome::Completed | RunOutcome::Reverted => ExitCode::SUCCESS,
            RunOutcome::Interrupted => ExitCode::FAILURE,
        }
    }
}

#[derive(Serialize)]
struct RunSummary<'a> {
    started_at: String,
    repository: &'a Path,
    playlists: &'a Path,
    order: OrderPolicy,
    interrupted: bool,
    transitioned: &'a [Transition],
    failures: Vec<FailureSummary<'a>>,
    /// Present when the batch was interrupted and reverted.
    #[serde(skip_serializing_if = "Option::is_none")]
    restored: Option<&'a [PathBuf]>,
}

#[derive(Serialize)]
struct FailureSummary<'a> {
    path: &'a Path,
    reason: String,
}

/// How often the revert prompt checks for Ctrl-C while waiting for an answer.
const PROMPT_POLL: Duration = Duration::from_millis(100);

/// Arms the Ctrl-C handler. Interrupts only set `flag`; the batch polls it between files.
pub fn install_interrupt_handler(flag: &'static AtomicBool) -> Result<(), String> {
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .map_err(|e| format!("Could not install interrupt handler: {}", e))
}

/// Runs the parsed command line.
///
/// `interrupted` is the flag the Ctrl-C handler sets; the handler is armed once the
/// interactive path questions are answered. With `--json` only the summary goes to
/// stdout; logs and progress go to stderr.
pub fn run_cli(cli: Cli, interrupted: &'static AtomicBool) -> Result<RunOutcome, String> {
    match cli.command {
        Some(Command::Run(args)) => run_consolidation(args, interrupted),
        Some(Command::Revert(paths)) => run_revert(paths),
        None => run_consolidation(cli.run, interrupted),
    }
}

fn run_consolidation(args: RunArgs, interrupted: &'static AtomicBool) -> Result<RunOutcome, String> {
    let started_at = chrono::Local::now();
    let mut config = load_config(&args.paths)?;
    if let Some(order) = args.order {
        config.discovery.order = order;
    }

    let (repository, playlists) = resolve_paths(&args.paths)?;
    let console = if args.json { Console::Stderr } else { Console::Stdout };
    let logger = RunLogger::new(
        &playlists,
        &config.logging.file_name,
        &config.logging.level,
        console,
    )
    .map_err(|e| e.to_string())?;

    install_interrupt_handler(interrupted)?;
    let is_interrupted = || interrupted.load(Ordering::SeqCst);

    logger.scope(|| -> Result<RunOutcome, String> {
        let report = consolidate(&repository, &playlists, &config, &is_interrupted)?;

        if args.json {
            let reverted = if report.interrupted {
                Some(revert_after_interrupt(&repository, &playlists, &config)?)
            } else {
                None
            };
            let summary = RunSummary {
                started_at: started_at.to_rfc3339(),
                repository: &repository,
                playlists: &playlists,
                order: config.discovery.order,
                interrupted: report.interrupted,
                transitioned: &report.transitions,
                failures: failure_summaries(&report),
                restored: reverted.as_ref().map(|r| r.restored.as_slice()),
            };
            println!("{}", summary_json(&summary)?);
            return Ok(if report.interrupted {
                RunOutcome::Interrupted
            } else {
                RunOutcome::Completed
            });
        }

        if report.interrupted {
            return abort_and_revert(&repository, &playlists, &config);
        }

        OutputFormatter::success("Consolidation finished.");
        OutputFormatter::transition_summary(&report);
        if args.no_prompt || report.transitions.is_empty() {
            return Ok(RunOutcome::Completed);
        }

        let (answers, answer_rx) = mpsc::channel();
        // The read blocks until a newline arrives, even across Ctrl-C, so it runs on its
        // own thread and is abandoned if the run is interrupted.
        thread::spawn(move || {
            let answer = confirm_revert(&mut io::stdin().lock(), &mut io::stdout());
            let _ = answers.send(answer);
        });

        let wants_revert = match wait_for_answer(&answer_rx, &is_interrupted, PROMPT_POLL) {
            PromptWait::Answered(answer) => {
                answer.map_err(|e| format!("Could not read answer: {}", e))?
            }
            PromptWait::Closed => false,
            PromptWait::Interrupted => return abort_and_revert(&repository, &playlists, &config),
        };
        if is_interrupted() {
            return abort_and_revert(&repository, &playlists, &config);
        }

        if wants_revert {
            let reverted = revert_tree(&repository, &playlists, &config)?;
            OutputFormatter::revert_summary(&reverted);
            OutputFormatter::success(
                "Changes reverted. Your files are back in their original locations.",
            );
            return Ok(RunOutcome::Reverted);
        }

        Ok(RunOutcome::Completed)
    })
}

fn abort_and_revert(
    repository: &Path,
    playlists: &Path,
    config: &Config,
) -> Result<RunOutcome, String> {
    OutputFormatter::warning("Operation aborted by the user. Reverting changes...");
    let reverted = revert_after_interrupt(repository, playlists, config)?;
    OutputFormatter::revert_summary(&reverted);
    Ok(RunOutcome::Interrupted)
}

fn failure_summaries(report: &TransitionReport) -> Vec<FailureSummary<'_>> {
    report
        .failures
        .iter()
        .map(|f| FailureSummary {
            path: &f.path,
            reason: f.error.to_string(),
        })
        .collect()
}

fn summary_json(summary: &RunSummary<'_>) -> Result<String, String> {
    serde_json::to_string_pretty(summary).map_err(|e| format!("Could not serialize summary: {}", e))
}

enum PromptWait<T> {
    Answered(T),
    Interrupted,
    /// The reader went away without answering.
    Closed,
}

/// Waits for the prompt thread's answer, giving up as soon as `is_interrupted` turns true.
fn wait_for_answer<T>(
    answers: &Receiver<T>,
    is_interrupted: &dyn Fn() -> bool,
    poll: Duration,
) -> PromptWait<T> {
    loop {
        if is_interrupted() {
            return PromptWait::Interrupted;
        }
        match answers.recv_timeout(poll) {
            Ok(answer) => return PromptWait::Answered(answer),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return PromptWait::Closed,
        }
    }
}

fn run_revert(paths: PathArgs) -> Result<RunOutcome, String> {
    let config = load_config(&paths)?;
    let (repository, playlists) = resolve_paths(&paths)?;
    let logger = RunLogger::new(
        &playlists,
        &config.logging.file_name,
        &config.logging.level,
        Console::Stdout,
    )
    .map_err(|e| e.to_string())?;

    logger.scope(|| -> Result<RunOutcome, String> {
        let report = revert_tree(&repository, &playlists, &config)?;
        OutputFormatter::revert_summary(&report);
        if !report.is_complete_success() {
            OutputFormatter::warning("Some files could not be restored. Please review errors above.");
        }
        Ok(RunOutcome::Completed)
    })
}

/// Discovers candidates, runs the preflight checks, and transitions every candidate.
///
/// `repository` and `playlists` must be existing, distinct directories. Per-file failures
/// are in the returned report; only discovery, configuration and capacity problems are
/// errors.
pub fn consolidate(
    repository: &Path,
    playlists: &Path,
    config: &Config,
    cancelled: &dyn Fn() -> bool,
) -> Result<TransitionReport, String> {
    info!(
        repository = %repository.display(),
        playlists = %playlists.display(),
        order = ?config.discovery.order,
        "Consolidating playlist files"
    );

    let rules = config
        .discovery_rules()
        .map_err(|e| format!("Error compiling discovery rules: {}", e))?;
    let candidates = discover(playlists, repository, &rules, config.discovery.order)
        .map_err(|e| e.to_string())?;
    info!(count = candidates.len(), "Discovered candidate files");

    if warn_if_case_insensitive(repository) == Some(false) {
        OutputFormatter::warning(
            "The central repository folder is not case-sensitive. This might cause issues with symlinks.",
        );
    }
    check_capacity(repository, playlists, &candidates).map_err(|e| {
        error!(error = %e, "Capacity check failed");
        e.to_string()
    })?;

    let engine = TransitionEngine::new(config.transition.on_collision);
    let progress = OutputFormatter::create_progress_bar(candidates.len() as u64);
    let report = engine.run(&candidates, cancelled, &progress);

    info!(
        moved = report.transitions.len(),
        failed = report.failures.len(),
        interrupted = report.interrupted,
        "Batch finished"
    );
    Ok(report)
}

/// Reverts every transition found under `playlists`, with the configured revert options.
pub fn revert_tree(
    repository: &Path,
    playlists: &Path,
    config: &Config,
) -> Result<RevertReport, String> {
    revert_with(
        repository,
        playlists,
        config,
        config.revert.reconcile_plain_files,
    )
}

/// Reverts after an interrupted batch. Only links are undone; plain playlist files are
/// never reconciled here because they were not part of the batch.
pub fn revert_after_interrupt(
    repository: &Path,
    playlists: &Path,
    config: &Config,
) -> Result<RevertReport, String> {
    revert_with(repository, playlists, config, false)
}

fn revert_with(
    repository: &Path,
    playlists: &Path,
    config: &Config,
    reconcile_plain_files: bool,
) -> Result<RevertReport, String> {
    let options = RevertOptions {
        reconcile_plain_files,
        log_file_name: config.logging.file_name.clone(),
    };
    let report = revert(playlists, repository, &options).map_err(|e| e.to_string())?;
    info!(
        restored = report.restored.len(),
        skipped = report.skipped.len(),
        failed = report.failures.len(),
        "Revert finished"
    );
    Ok(report)
}

fn load_config(paths: &PathArgs) -> Result<Config, String> {
    let mut config = Config::load(paths.config.as_deref())
        .map_err(|e| format!("Error loading configuration: {}", e))?;
    if let Some(level) = &paths.log_level {
        config.logging.level = level.clone();
    }
    Ok(config)
}

/// Resolves both folders from the arguments, prompting for any that are missing.
fn resolve_paths(paths: &PathArgs) -> Result<(PathBuf, PathBuf), String> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();

    let repository = match &paths.repository {
        Some(path) => path.clone(),
        None => ask_path(
            &mut input,
            &mut output,
            "Enter the path for the central repository folder:",
        )?,
    };
    let playlists = match &paths.playlists {
        Some(path) => path.clone(),
        None => ask_path(
            &mut input,
            &mut output,
            "Enter the path for the folder containing your playlists:",
        )?,
    };

    validate_folders(&repository, &playlists)
}

fn ask_path<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    question: &str,
) -> Result<PathBuf, String> {
    match prompt_line(input, output, question) {
        Ok(Some(answer)) if !answer.is_empty() => Ok(PathBuf::from(answer)),
        Ok(_) => Err("No path given".to_string()),
        Err(e) => Err(format!("Could not read path: {}", e)),
    }
}

/// Checks both folders exist, are directories and differ, and returns them in
/// absolute canonical form.
pub fn validate_folders(repository: &Path, playlists: &Path) -> Result<(PathBuf, PathBuf), String> {
    let repository = canonical_dir(repository, "central repository")?;
    let playlists = canonical_dir(playlists, "playlist")?;

    if repository == playlists {
        return Err(format!(
            "The central repository and the playlist folder are the same folder: '{}'",
            repository.display()
        ));
    }
    if playlists.starts_with(&repository) {
        return Err(format!(
            "The playlist folder '{}' is inside the central repository",
            playlists.display()
        ));
    }
    Ok((repository, playlists))
}

fn canonical_dir(path: &Path, label: &str) -> Result<PathBuf, String> {
    if !path.is_dir() {
        return Err(format!(
            "The {} folder '{}' does not exist or is not a valid directory.",
            label,
            path.display()
        ));
    }
    path.canonicalize()
        .map_err(|e| format!("Cannot resolve {} folder '{}': {}", label, path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transition::{TransitionError, TransitionFailure};
    use std::fs;
    use std::io::Cursor;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_parse_default_run() {
        let cli = Cli::try_parse_from(["centralink", "-r", "/repo", "-p", "/lists", "--no-prompt"])
            .unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.run.paths.repository, Some(PathBuf::from("/repo")));
        assert_eq!(cli.run.paths.playlists, Some(PathBuf::from("/lists")));
        assert!(cli.run.no_prompt);
    }

    #[test]
    fn test_parse_order_values() {
        let cli = Cli::try_parse_from(["centralink", "run", "--order", "traversal"]).unwrap();
        match cli.command {
            Some(Command::Run(args)) => assert_eq!(args.order, Some(OrderPolicy::Traversal)),
            other => panic!("Expected run command, got {:?}", other),
        }

        let cli = Cli::try_parse_from(["centralink", "--order", "creation-time"]).unwrap();
        assert_eq!(cli.run.order, Some(OrderPolicy::CreationTime));

        assert!(Cli::try_parse_from(["centralink", "--order", "size"]).is_err());
    }

    #[test]
    fn test_parse_revert() {
        let cli = Cli::try_parse_from(["centralink", "revert", "--repository", "/repo"]).unwrap();
        match cli.command {
            Some(Command::Revert(paths)) => {
                assert_eq!(paths.repository, Some(PathBuf::from("/repo")));
                assert!(paths.playlists.is_none());
            }
            other => panic!("Expected revert command, got {:?}", other),
        }
    }

    #[test]
    fn test_ask_path_empty_answer_is_error() {
        let mut input = Cursor::new(b"\n".to_vec());
        let mut output = Vec::new();
        assert!(ask_path(&mut input, &mut output, "Path:").is_err());

        let mut input = Cursor::new(b" /music \n".to_vec());
        assert_eq!(
            ask_path(&mut input, &mut output, "Path:").unwrap(),
            PathBuf::from("/music")
        );
    }

    #[test]
    fn test_validate_folders_rejects_missing_and_files() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let file = dir.path().join("not_a_dir.txt");
        fs::write(&file, "x").unwrap();
        fs::create_dir(dir.path().join("lists")).unwrap();

        assert!(validate_folders(&dir.path().join("missing"), &dir.path().join("lists")).is_err());
        assert!(validate_folders(&file, &dir.path().join("lists")).is_err());
    }

    #[test]
    fn test_validate_folders_rejects_same_or_nested() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let repo = dir.path().join("repo");
        fs::create_dir_all(repo.join("lists")).unwrap();

        assert!(validate_folders(&repo, &repo).is_err());
        assert!(validate_folders(&repo, &repo.join("lists")).is_err());
    }

    #[test]
    fn test_validate_folders_canonicalizes() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir(dir.path().join("repo")).unwrap();
        fs::create_dir(dir.path().join("lists")).unwrap();

        let (repo, lists) = validate_folders(
            &dir.path().join("lists/../repo"),
            &dir.path().join("lists"),
        )
        .unwrap();
        assert!(repo.is_absolute());
        assert!(repo.ends_with("repo"));
        assert!(lists.ends_with("lists"));
    }

    #[test]
    fn test_summary_json_is_machine_readable() {
        let report = TransitionReport {
            transitions: vec![Transition {
                original_path: PathBuf::from("/lists/rock/song.mp3"),
                repository_path: PathBuf::from("/central/song.mp3"),
            }],
            failures: vec![TransitionFailure {
                path: PathBuf::from("/lists/rock/taken.mp3"),
                error: TransitionError::DestinationOccupied {
                    destination: PathBuf::from("/central/taken.mp3"),
                },
            }],
            interrupted: false,
        };
        let summary = RunSummary {
            started_at: "2026-01-01T00:00:00+00:00".to_string(),
            repository: Path::new("/central"),
            playlists: Path::new("/lists"),
            order: OrderPolicy::CreationTime,
            interrupted: false,
            transitioned: &report.transitions,
            failures: failure_summaries(&report),
            restored: None,
        };

        let json = summary_json(&summary).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).expect("Summary is not JSON");

        assert_eq!(value["order"], "creation-time");
        assert_eq!(value["interrupted"], false);
        assert_eq!(value["transitioned"][0]["original_path"], "/lists/rock/song.mp3");
        assert_eq!(value["transitioned"][0]["repository_path"], "/central/song.mp3");
        assert_eq!(value["failures"][0]["path"], "/lists/rock/taken.mp3");
        assert!(value.get("restored").is_none());
    }

    #[test]
    fn test_summary_json_lists_restored_after_interrupt() {
        let report = TransitionReport {
            transitions: Vec::new(),
            failures: Vec::new(),
            interrupted: true,
        };
        let restored = vec![PathBuf::from("/lists/a.mp3")];
        let summary = RunSummary {
            started_at: String::new(),
            repository: Path::new("/central"),
            playlists: Path::new("/lists"),
            order: OrderPolicy::Traversal,
            interrupted: true,
            transitioned: &report.transitions,
            failures: failure_summaries(&report),
            restored: Some(&restored),
        };

        let value: serde_json::Value = serde_json::from_str(&summary_json(&summary).unwrap()).unwrap();
        assert_eq!(value["interrupted"], true);
        assert_eq!(value["restored"][0], "/lists/a.mp3");
    }

    #[test]
    fn test_wait_for_answer_returns_answer() {
        let (tx, rx) = mpsc::channel();
        tx.send(true).unwrap();
        assert!(matches!(
            wait_for_answer(&rx, &|| false, Duration::from_millis(10)),
            PromptWait::Answered(true)
        ));
    }

    #[test]
    fn test_wait_for_answer_closed_reader() {
        let (tx, rx) = mpsc::channel::<bool>();
        drop(tx);
        assert!(matches!(
            wait_for_answer(&rx, &|| false, Duration::from_millis(10)),
            PromptWait::Closed
        ));
    }

    #[test]
    fn test_interrupt_while_waiting_for_answer() {
        let (_tx, rx) = mpsc::channel::<bool>();
        let flag = Arc::new(AtomicBool::new(false));

        let setter = Arc::clone(&flag);
        let ctrl_c = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            setter.store(true, Ordering::SeqCst);
        });

        // No answer ever arrives; only the flag can end the wait.
        let waited = wait_for_answer(&rx, &|| flag.load(Ordering::SeqCst), Duration::from_millis(10));
        ctrl_c.join().unwrap();

        assert!(matches!(waited, PromptWait::Interrupted));
    }
}
