/// Transition engine: moves a playlist file into the central repository and leaves a
/// symbolic link at its original path.
///
/// Each file is handled independently. A failure on one file is logged, recorded in the
/// [`TransitionReport`], and the batch carries on with the next candidate.
use crate::config::CollisionPolicy;
use crate::discovery::CandidateFile;
use indicatif::ProgressBar;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// One completed move + link.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Transition {
    /// Path in the playlist folder, now a symbolic link.
    pub original_path: PathBuf,
    /// Path of the relocated file inside the repository.
    pub repository_path: PathBuf,
}

/// Errors that can occur while transitioning a single file.
#[derive(Debug)]
pub enum TransitionError {
    /// The repository already has a file with this name and the policy is to skip.
    DestinationOccupied { destination: PathBuf },
    /// Moving the file into the repository failed; nothing changed at the source.
    RelocationFailed {
        source: PathBuf,
        destination: PathBuf,
        source_error: io::Error,
    },
    /// The file was moved but the link could not be created. `rolled_back` says whether
    /// the file was put back at its original path.
    LinkFailed {
        link: PathBuf,
        target: PathBuf,
        source_error: io::Error,
        rolled_back: bool,
    },
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DestinationOccupied { destination } => {
                write!(f, "Destination {} already exists", destination.display())
            }
            Self::RelocationFailed {
                source,
                destination,
                source_error,
            } => {
                write!(
                    f,
                    "Failed to move {} to {}: {}",
                    source.display(),
                    destination.display(),
                    source_error
                )
            }
            Self::LinkFailed {
                link,
                target,
                source_error,
                rolled_back,
            } => {
                write!(
                    f,
                    "Failed to link {} -> {}: {} ({})",
                    link.display(),
                    target.display(),
                    source_error,
                    if *rolled_back {
                        "file moved back"
                    } else {
                        "file left in repository"
                    }
                )
            }
        }
    }
}

impl std::error::Error for TransitionError {}

pub type TransitionResult<T> = Result<T, TransitionError>;

/// A candidate that could not be transitioned, with the reason.
#[derive(Debug)]
pub struct TransitionFailure {
    pub path: PathBuf,
    pub error: TransitionError,
}

/// Outcome of a batch run.
#[derive(Debug, Default)]
pub struct TransitionReport {
    /// Successful transitions, in processing order.
    pub transitions: Vec<Transition>,
    pub failures: Vec<TransitionFailure>,
    /// The batch stopped early because an interrupt was requested.
    pub interrupted: bool,
}

impl TransitionReport {
    pub fn moved_paths(&self) -> Vec<&Path> {
        self.transitions
            .iter()
            .map(|t| t.original_path.as_path())
            .collect()
    }
}

type LinkFn = fn(&Path, &Path) -> io::Result<()>;

/// Moves candidates into a repository and links them back.
pub struct TransitionEngine {
    collision: CollisionPolicy,
    link: LinkFn,
}

impl TransitionEngine {
    pub fn new(collision: CollisionPolicy) -> Self {
        Self {
            collision,
            link: create_symlink,
        }
    }

    /// Transitions a single candidate.
    ///
    /// 1. Moves the file to `candidate.destination` (see [`relocate`]).
    /// 2. Clears whatever is left at the source path and creates a link there that
    ///    points at the destination.
    /// 3. If linking fails, moves the file back so the source is a regular file again.
    ///
    /// The file's bytes are never modified.
    pub fn transition(&self, candidate: &CandidateFile) -> TransitionResult<Transition> {
        let source = &candidate.source;
        let destination = &candidate.destination;

        if self.collision == CollisionPolicy::Skip && destination.symlink_metadata().is_ok() {
            return Err(TransitionError::DestinationOccupied {
                destination: destination.clone(),
            });
        }

        relocate(source, destination).map_err(|e| TransitionError::RelocationFailed {
            source: source.clone(),
            destination: destination.clone(),
            source_error: e,
        })?;

        if let Err(e) = self.place_link(source, destination) {
            let rolled_back = match relocate(destination, source) {
                Ok(()) => true,
                Err(rollback_error) => {
                    error!(
                        source = %source.display(),
                        destination = %destination.display(),
                        error = %rollback_error,
                        "Rollback failed, file remains in repository"
                    );
                    false
                }
            };
            return Err(TransitionError::LinkFailed {
                link: source.clone(),
                target: destination.clone(),
                source_error: e,
                rolled_back,
            });
        }

        Ok(Transition {
            original_path: source.clone(),
            repository_path: destination.clone(),
        })
    }

    fn place_link(&self, link: &Path, target: &Path) -> io::Result<()> {
        // A stale entry can only be left here by an earlier, interrupted run.
        if link.symlink_metadata().is_ok() {
            fs::remove_file(link)?;
        }
        (self.link)(target, link)
    }

    /// Transitions every candidate in order.
    ///
    /// `cancelled` is polled before each file; once it returns true the batch stops and
    /// the report is marked interrupted. Files already transitioned stay transitioned.
    pub fn run(
        &self,
        candidates: &[CandidateFile],
        cancelled: &dyn Fn() -> bool,
        progress: &ProgressBar,
    ) -> TransitionReport {
        let mut report = TransitionReport::default();

        for candidate in candidates {
            if cancelled() {
                warn!(
                    done = report.transitions.len(),
                    remaining = candidates.len() - report.transitions.len() - report.failures.len(),
                    "Interrupt requested, stopping batch"
                );
                report.interrupted = true;
                break;
            }

            match self.transition(candidate) {
                Ok(transition) => {
                    info!(
                        source = %transition.original_path.display(),
                        destination = %transition.repository_path.display(),
                        "Moved to repository and linked"
                    );
                    report.transitions.push(transition);
                }
                Err(e) => {
                    error!(
                        source = %candidate.source.display(),
                        destination = %candidate.destination.display(),
                        error = %e,
                        "Transition failed"
                    );
                    report.failures.push(TransitionFailure {
                        path: candidate.source.clone(),
                        error: e,
                    });
                }
            }
            progress.inc(1);
        }

        progress.finish_and_clear();
        report
    }
}

/// Moves `source` to `destination`, replacing any file already there.
///
/// Uses a rename when both paths are on one volume. Across volumes the file is copied,
/// flushed to disk, and the source removed; a failed copy removes the partial destination.
pub fn relocate(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(err) if is_cross_device_error(&err) => match fs::copy(source, destination) {
            Ok(_) => {
                fs::File::open(destination)?.sync_all()?;
                fs::remove_file(source)
            }
            Err(copy_err) => {
                let _ = fs::remove_file(destination);
                Err(copy_err)
            }
        },
        Err(err) => Err(err),
    }
}

#[cfg(unix)]
fn is_cross_device_error(err: &io::Error) -> bool {
    err.raw_os_error() == Some(18) // EXDEV
}

#[cfg(windows)]
fn is_cross_device_error(err: &io::Error) -> bool {
    err.raw_os_error() == Some(17) // ERROR_NOT_SAME_DEVICE
}

/// Creates a symbolic link at `link` pointing to `target`.
#[cfg(unix)]
pub fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
pub fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}
