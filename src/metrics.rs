//! Reports describing corpus scans, dataset assembly, and generated samples.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::vgm::TICK_RATE;

/// Outcome counts of one pass over the capture corpus.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanReport {
    /// Captures discovered under the input roots.
    pub files_discovered: usize,
    /// Captures that passed the duration filter.
    pub files_accepted: usize,
    /// Captures skipped as sound effects.
    pub files_skipped_short: usize,
    /// Captures that could not be decoded, sorted by path.
    pub failed_files: Vec<PathBuf>,
    /// Vocabulary-eligible commands seen across both variants of every accepted capture.
    pub token_count: u64,
    /// Wait ticks seen across both variants of every accepted capture.
    pub total_ticks: u64,
}

impl ScanReport {
    /// Folds another partial report into this one.
    pub fn merge(&mut self, other: ScanReport) {
        self.files_discovered += other.files_discovered;
        self.files_accepted += other.files_accepted;
        self.files_skipped_short += other.files_skipped_short;
        self.failed_files.extend(other.failed_files);
        self.token_count += other.token_count;
        self.total_ticks += other.total_ticks;
    }

    /// Returns `true` when at least one capture failed to decode.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failed_files.is_empty()
    }

    /// Total ticks expressed in minutes of playback.
    #[must_use]
    pub fn total_minutes(&self) -> f64 {
        ticks_to_minutes(self.total_ticks)
    }
}

/// Converts native ticks to minutes.
#[must_use]
pub fn ticks_to_minutes(ticks: u64) -> f64 {
    ticks as f64 / f64::from(TICK_RATE) / 60.0
}
