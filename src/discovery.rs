//! Candidate discovery under the playlist folder.
//!
//! Walks the tree without following links, keeps regular files accepted by the
//! [`DiscoveryRules`], and orders them according to an [`OrderPolicy`].

use crate::config::{DiscoveryRules, OrderPolicy};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A regular file found under the playlist folder that is eligible for transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    /// Absolute path of the file inside the playlist folder.
    pub source: PathBuf,
    /// Where the file lands in the repository (repository root + basename).
    pub destination: PathBuf,
    /// Birth time, or modification time where birth time is unavailable.
    pub created: SystemTime,
    /// Size in bytes, used for the capacity check.
    pub size: u64,
}

impl CandidateFile {
    pub fn file_name(&self) -> Option<&std::ffi::OsStr> {
        self.source.file_name()
    }
}

#[derive(Debug)]
pub enum DiscoveryError {
    /// The playlist root could not be read at all.
    UnreadableRoot {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnreadableRoot { path, source } => {
                write!(f, "Cannot read playlist folder {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for DiscoveryError {}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Enumerates every candidate under `playlists` and orders them by `order`.
///
/// The repository subtree is skipped when it lives inside the playlist folder, and
/// symbolic links are never candidates. Entries that cannot be read are logged and
/// skipped; only an unreadable root is an error.
pub fn discover(
    playlists: &Path,
    repository: &Path,
    rules: &DiscoveryRules,
    order: OrderPolicy,
) -> DiscoveryResult<Vec<CandidateFile>> {
    fs::read_dir(playlists).map_err(|e| DiscoveryError::UnreadableRoot {
        path: playlists.to_path_buf(),
        source: e,
    })?;

    let mut candidates = Vec::new();
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

        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(playlists).unwrap_or(entry.path());
        if !rules.accepts(relative) {
            debug!(path = %entry.path().display(), "Excluded by discovery rules");
            continue;
        }

        let Some(file_name) = entry.path().file_name() else {
            continue;
        };

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Skipping file: metadata unavailable");
                continue;
            }
        };

        let created = match metadata.created() {
            Ok(time) => time,
            Err(e) => match metadata.modified() {
                Ok(time) => {
                    debug!(
                        path = %entry.path().display(),
                        error = %e,
                        "Birth time unavailable, ordering by modification time"
                    );
                    time
                }
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Skipping file: no readable timestamp");
                    continue;
                }
            },
        };

        candidates.push(CandidateFile {
            source: entry.path().to_path_buf(),
            destination: repository.join(file_name),
            created,
            size: metadata.len(),
        });
    }

    let candidates = order_candidates(candidates, order);
    for candidate in &candidates {
        debug!(
            path = %candidate.source.display(),
            created = %DateTime::<Local>::from(candidate.created).to_rfc3339(),
            "Candidate"
        );
    }

    Ok(candidates)
}

/// Applies the ordering policy. The sort is stable, so equal timestamps keep traversal order.
pub fn order_candidates(mut candidates: Vec<CandidateFile>, order: OrderPolicy) -> Vec<CandidateFile> {
    if order == OrderPolicy::CreationTime {
        candidates.sort_by_key(|candidate| candidate.created);
    }
    candidates
}
