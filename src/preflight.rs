//! Advisory checks run before any file is touched.

use crate::discovery::CandidateFile;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use sysinfo::Disks;
use tracing::{debug, warn};

const PROBE_NAME: &str = "centralink_case_probe.tmp";

#[derive(Debug)]
pub enum PreflightError {
    /// The repository disk does not have room for the candidates.
    InsufficientSpace { required: u64, available: u64 },
}

impl std::fmt::Display for PreflightError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientSpace {
                required,
                available,
            } => write!(
                f,
                "Insufficient disk space in the central repository: {} bytes needed, {} bytes free",
                required, available
            ),
        }
    }
}

impl std::error::Error for PreflightError {}

/// Whether names differing only in case refer to different files in `dir`.
///
/// Creates a lower-case probe file, checks whether the upper-case spelling resolves to
/// it, and removes the probe again. Fails with `AlreadyExists` rather than touch a file
/// that already carries the probe name.
pub fn is_case_sensitive(dir: &Path) -> io::Result<bool> {
    let probe = dir.join(PROBE_NAME);
    let upper = dir.join(PROBE_NAME.to_uppercase());

    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&probe)?
        .write_all(b"probe")?;
    let sensitive = fs::symlink_metadata(&upper).is_err();

    fs::remove_file(&probe)?;
    Ok(sensitive)
}

/// Runs the case probe and logs a warning when the repository is case-insensitive.
///
/// Returns `None` when the probe itself could not run.
pub fn warn_if_case_insensitive(repository: &Path) -> Option<bool> {
    match is_case_sensitive(repository) {
        Ok(true) => Some(true),
        Ok(false) => {
            warn!(
                repository = %repository.display(),
                "Repository filesystem is case-insensitive; files differing only in case will collide"
            );
            Some(false)
        }
        Err(e) => {
            warn!(repository = %repository.display(), error = %e, "Case sensitivity probe failed");
            None
        }
    }
}

/// Total bytes the candidates occupy.
pub fn required_space(candidates: &[CandidateFile]) -> u64 {
    candidates.iter().map(|c| c.size).sum()
}

/// Fails when `required` exceeds `available`.
pub fn ensure_capacity(required: u64, available: u64) -> Result<(), PreflightError> {
    if required > available {
        return Err(PreflightError::InsufficientSpace {
            required,
            available,
        });
    }
    Ok(())
}

/// Mount point and free bytes of the disk that holds `path`.
fn disk_for(disks: &Disks, path: &Path) -> Option<(PathBuf, u64)> {
    disks
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| (disk.mount_point().to_path_buf(), disk.available_space()))
}

/// Checks that the repository disk can take every candidate.
///
/// Moves within one disk are renames and need no extra room, so the check only applies
/// when the playlist folder and the repository live on different disks. If the disk
/// list cannot be matched the check is skipped with a warning.
pub fn check_capacity(
    repository: &Path,
    playlists: &Path,
    candidates: &[CandidateFile],
) -> Result<(), PreflightError> {
    let disks = Disks::new_with_refreshed_list();

    let Some((repository_mount, available)) = disk_for(&disks, repository) else {
        warn!(repository = %repository.display(), "Could not determine free space, skipping capacity check");
        return Ok(());
    };

    if let Some((playlist_mount, _)) = disk_for(&disks, playlists)
        && playlist_mount == repository_mount
    {
        debug!(mount = %repository_mount.display(), "Same disk, moves are renames");
        return Ok(());
    }

    let required = required_space(candidates);
    debug!(required, available, "Capacity check");
    ensure_capacity(required, available)
}
