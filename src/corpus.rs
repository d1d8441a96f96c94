//! Facilities for discovering capture files and loading them with the duration filter applied.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::error::{Result, VgmtokError};
use crate::vgm::VgmFile;

/// Returns `true` for names matching the capture pattern `*.vg?` (`.vgm`, `.vgz`, ...).
#[must_use]
pub fn is_capture_name(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.len() == 3 && ext[..2].eq_ignore_ascii_case("vg"))
}

/// Discovers capture files rooted at the provided input paths according to the ingest
/// configuration.
///
/// Directories are traversed recursively by default and only files matching
/// [`is_capture_name`] are kept; files named explicitly are always kept.  Unreadable
/// directory entries are logged and skipped.  The result is sorted so repeated runs visit
/// files in the same order.
pub fn collect_paths<P: AsRef<Path>>(inputs: &[P], cfg: &IngestConfig) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let path = input.as_ref();
        if !path.exists() {
            return Err(VgmtokError::InvalidConfig(format!(
                "input path {path:?} does not exist"
            )));
        }
        let metadata = path
            .symlink_metadata()
            .map_err(|err| VgmtokError::io(err, Some(path.to_path_buf())))?;
        if metadata.is_file() {
            files.push(path.to_path_buf());
            continue;
        }
        if !metadata.is_dir() && !cfg.follow_symlinks {
            continue;
        }
        let walker = WalkDir::new(path)
            .follow_links(cfg.follow_symlinks)
            .max_depth(if cfg.recursive { usize::MAX } else { 1 });
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() && is_capture_name(entry.path()) => {
                    files.push(entry.into_path());
                }
                Ok(_) => {}
                Err(err) => warn!("skipping unreadable entry under {}: {err}", path.display()),
            }
        }
    }
    if files.is_empty() {
        return Err(VgmtokError::InvalidConfig(
            "no capture files discovered in provided inputs".into(),
        ));
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// Result of loading one discovered capture.
#[derive(Debug)]
pub enum CaptureOutcome {
    /// The capture decoded and is long enough to be music.
    Accepted(VgmFile),
    /// The capture is shorter than the configured minimum and is treated as a sound effect.
    TooShort {
        /// Total duration in ticks.
        duration: u64,
    },
    /// The capture could not be read or decoded.
    Failed(VgmtokError),
}

/// Loads a capture and applies the duration filter, logging the outcome.
pub fn load_capture(path: &Path, cfg: &IngestConfig) -> CaptureOutcome {
    match VgmFile::load(path) {
        Ok(vgm) => {
            let duration = vgm.total_duration();
            if duration < cfg.min_duration_ticks {
                info!("SFX: {} ({duration} ticks)", path.display());
                CaptureOutcome::TooShort { duration }
            } else {
                debug!(
                    "{}: {} commands, {duration} ticks",
                    path.display(),
                    vgm.commands().len()
                );
                CaptureOutcome::Accepted(vgm)
            }
        }
        Err(err) => {
            warn!("skipping {}: {err}", path.display());
            CaptureOutcome::Failed(err)
        }
    }
}
