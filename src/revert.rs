/// Revert: puts consolidated files back at their playlist paths.
///
/// Nothing is replayed from memory. The playlist folder is walked again and every link
/// into the repository is resolved and undone, so a revert works just as well from a
/// fresh process as from the run that created the links.
use crate::config::DEFAULT_LOG_FILE_NAME;
use crate::transition::{create_symlink, relocate};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct RevertOptions {
    /// Also restore plain playlist files whose repository copy has identical bytes.
    pub reconcile_plain_files: bool,
    /// Never touched; this is the log being written during the run.
    pub log_file_name: String,
}

impl Default for RevertOptions {
    fn default() -> Self {
        Self {
            reconcile_plain_files: false,
            log_file_name: DEFAULT_LOG_FILE_NAME.to_string(),
        }
    }
}

/// Represents the result of a revert pass.
#[derive(Debug, Default)]
pub struct RevertReport {
    /// Playlist paths that are regular files again.
    pub restored: Vec<PathBuf>,
    /// Entries whose reversal failed, with the reason.
    pub failures: Vec<(PathBuf, String)>,
    /// Entries looked at but left as they were (or only unlinked), with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

impl RevertReport {
    pub fn total_processed(&self) -> usize {
        self.restored.len() + self.failures.len() + self.skipped.len()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug)]
pub enum RevertError {
    /// The playlist folder cannot be walked.
    InvalidPlaylistRoot {
        path: PathBuf,
        source: io::Error,
    },
}

impl std::fmt::Display for RevertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPlaylistRoot { path, source } => {
                write!(f, "Invalid playlist folder {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for RevertError {}

pub type RevertResult<T> = Result<T, RevertError>;

/// Undoes every transition found under `playlists`.
///
/// Links are handled first:
///
/// * **Link into the repository, target present**: the link is removed and the file
///   moved back to the link's path.
/// * **Second link to an already restored target**: the link is replaced by a copy of
///   the file restored for the first link.
/// * **Link into the repository, target gone**: the link is removed and the entry
///   reported as skipped.
/// * **Link pointing elsewhere**: left alone.
///
/// Then, when `reconcile_plain_files` is set, a regular playlist file whose name also
/// exists directly under the repository is replaced by the repository copy, but only
/// if both hold the same bytes. A file that differs was never transitioned and is left
/// in place.
///
/// A failure on one entry is logged and recorded; the walk continues. Running revert a
/// second time finds nothing to do.
///
/// # Examples
///
/// ```no_run
/// use centralink::revert::{revert, RevertOptions};
/// use std::path::Path;
///
/// let report = revert(
///     Path::new("/music/playlists"),
///     Path::new("/music/central"),
///     &RevertOptions::default(),
/// );
/// match report {
///     Ok(report) => println!("Restored {} files", report.restored.len()),
///     Err(e) => eprintln!("Revert failed: {}", e),
/// }
/// ```
pub fn revert(
    playlists: &Path,
    repository: &Path,
    options: &RevertOptions,
) -> RevertResult<RevertReport> {
    fs::read_dir(playlists).map_err(|e| RevertError::InvalidPlaylistRoot {
        path: playlists.to_path_buf(),
        source: e,
    })?;

    info!(
        playlists = %playlists.display(),
        repository = %repository.display(),
        "Reverting changes"
    );

    let repository_roots = repository_roots(repository);
    let (links, plain_files) = collect_entries(playlists, repository, &options.log_file_name);

    let mut report = RevertReport::default();
    // Repository path -> playlist path it was restored to during this pass.
    let mut restored_from: HashMap<PathBuf, PathBuf> = HashMap::new();

    for link in links {
        let target = match resolve_link(&link) {
            Ok(target) => target,
            Err(e) => {
                error!(link = %link.display(), error = %e, "Cannot read link");
                report.failures.push((link, format!("Cannot read link: {}", e)));
                continue;
            }
        };

        if !repository_roots.iter().any(|root| target.starts_with(root)) {
            report
                .skipped
                .push((link, "Link points outside the repository".to_string()));
            continue;
        }

        match restore_link(&link, &target, &restored_from) {
            Ok(LinkRestore::Moved) => {
                info!(from = %target.display(), to = %link.display(), "Restored file");
                restored_from.insert(target, link.clone());
                report.restored.push(link);
            }
            Ok(LinkRestore::Copied(from)) => {
                info!(from = %from.display(), to = %link.display(), "Restored duplicate");
                report.restored.push(link);
            }
            Ok(LinkRestore::TargetMissing) => {
                warn!(link = %link.display(), target = %target.display(), "Target missing, link removed");
                report.skipped.push((
                    link,
                    format!("Target {} not found; link removed", target.display()),
                ));
            }
            Err(reason) => {
                error!(link = %link.display(), target = %target.display(), error = %reason, "Revert failed");
                report.failures.push((link, reason));
            }
        }
    }

    if options.reconcile_plain_files {
        for path in plain_files {
            let Some(file_name) = path.file_name() else {
                continue;
            };
            let stored = repository.join(file_name);
            if !fs::symlink_metadata(&stored).is_ok_and(|m| m.is_file()) {
                continue;
            }

            match same_contents(&path, &stored) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(path = %path.display(), stored = %stored.display(), "Differs from repository copy, left in place");
                    report.skipped.push((
                        path,
                        format!("Differs from {}; left in place", stored.display()),
                    ));
                    continue;
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Could not compare with repository copy");
                    report
                        .failures
                        .push((path, format!("Could not compare with repository copy: {}", e)));
                    continue;
                }
            }

            match replace_with_repository_copy(&path, &stored) {
                Ok(()) => {
                    info!(from = %stored.display(), to = %path.display(), "Restored file from repository");
                    report.restored.push(path);
                }
                Err(reason) => {
                    error!(path = %path.display(), error = %reason, "Revert failed");
                    report.failures.push((path, reason));
                }
            }
        }
    }

    Ok(report)
}

enum LinkRestore {
    Moved,
    Copied(PathBuf),
    TargetMissing,
}

fn restore_link(
    link: &Path,
    target: &Path,
    restored_from: &HashMap<PathBuf, PathBuf>,
) -> Result<LinkRestore, String> {
    fs::remove_file(link).map_err(|e| format!("Could not remove link: {}", e))?;

    if fs::symlink_metadata(target).is_ok_and(|m| m.is_file()) {
        return match relocate(target, link) {
            Ok(()) => Ok(LinkRestore::Moved),
            Err(e) => {
                relink(link, target);
                Err(format!("Failed to move {} back: {}", target.display(), e))
            }
        };
    }

    if let Some(first) = restored_from.get(target) {
        return match fs::copy(first, link) {
            Ok(_) => Ok(LinkRestore::Copied(first.clone())),
            Err(e) => {
                let _ = fs::remove_file(link);
                relink(link, target);
                Err(format!("Failed to copy {}: {}", first.display(), e))
            }
        };
    }

    Ok(LinkRestore::TargetMissing)
}

fn replace_with_repository_copy(path: &Path, stored: &Path) -> Result<(), String> {
    fs::remove_file(path).map_err(|e| format!("Could not remove {}: {}", path.display(), e))?;
    relocate(stored, path).map_err(|e| format!("Failed to move {} back: {}", stored.display(), e))
}

/// Byte-for-byte comparison of two regular files.
fn same_contents(a: &Path, b: &Path) -> io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }

    let mut left = BufReader::new(File::open(a)?);
    let mut right = BufReader::new(File::open(b)?);
    loop {
        let chunk = left.fill_buf()?;
        if chunk.is_empty() {
            return Ok(right.fill_buf()?.is_empty());
        }
        let len = chunk.len();
        let mut other = vec![0u8; len];
        right.read_exact(&mut other)?;
        if chunk != other.as_slice() {
            return Ok(false);
        }
        left.consume(len);
    }
}

/// Puts a link back after a failed restore so the entry can be retried later.
fn relink(link: &Path, target: &Path) {
    if let Err(e) = create_symlink(target, link) {
        error!(link = %link.display(), error = %e, "Could not recreate link after failed restore");
    }
}

/// Absolute target of a link with its directory canonicalized, so two links to the same
/// repository file resolve to the same path even after the file has been moved away.
fn resolve_link(link: &Path) -> io::Result<PathBuf> {
    let raw = fs::read_link(link)?;
    let absolute = if raw.is_absolute() {
        raw
    } else {
        link.parent().unwrap_or(Path::new("")).join(raw)
    };

    if let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name())
        && let Ok(parent) = fs::canonicalize(parent)
    {
        return Ok(parent.join(name));
    }
    Ok(absolute)
}

/// The repository as given and in canonical form; link targets may use either spelling.
fn repository_roots(repository: &Path) -> Vec<PathBuf> {
    let mut roots = vec![repository.to_path_buf()];
    if let Ok(canonical) = fs::canonicalize(repository)
        && canonical != repository
    {
        roots.push(canonical);
    }
    roots
}

/// Splits the playlist tree into links and regular files before anything is mutated.
fn collect_entries(
    playlists: &Path,
    repository: &Path,
    log_file_name: &str,
) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut links = Vec::new();
    let mut plain_files = Vec::new();

    let walker = WalkDir::new(playlists)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || entry.path() != repository);

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        if entry.file_name() == log_file_name {
            continue;
        }

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            links.push(entry.into_path());
        } else if file_type.is_file() {
            plain_files.push(entry.into_path());
        }
    }

    (links, plain_files)
}
