//! Configuration builders controlling corpus ingestion, dataset assembly, and generation.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VgmtokError};

/// Files shorter than this many ticks (half a second) are treated as sound effects.
pub const DEFAULT_MIN_DURATION_TICKS: u64 = 22_050;

/// Configuration controlling how capture corpora are discovered and filtered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestConfig {
    /// Enables recursive directory traversal.
    pub recursive: bool,
    /// Follows symlinks encountered during traversal.
    pub follow_symlinks: bool,
    /// Captures whose total duration is below this many ticks are skipped.
    pub min_duration_ticks: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            follow_symlinks: false,
            min_duration_ticks: DEFAULT_MIN_DURATION_TICKS,
        }
    }
}

impl IngestConfig {
    /// Returns a builder initialised with [`IngestConfig::default`].
    #[must_use]
    pub fn builder() -> IngestBuilder {
        IngestBuilder::default()
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug, Default, Clone)]
pub struct IngestBuilder {
    cfg: IngestConfig,
}

impl IngestBuilder {
    /// Creates a new builder with [`IngestConfig::default`] settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables recursive directory traversal.
    #[must_use]
    pub fn recursive(mut self, enabled: bool) -> Self {
        self.cfg.recursive = enabled;
        self
    }

    /// Enables or disables following of symlinks when traversing directories.
    #[must_use]
    pub fn follow_symlinks(mut self, enabled: bool) -> Self {
        self.cfg.follow_symlinks = enabled;
        self
    }

    /// Sets the minimum capture duration in ticks.
    #[must_use]
    pub fn min_duration_ticks(mut self, ticks: u64) -> Self {
        self.cfg.min_duration_ticks = ticks;
        self
    }

    /// Finalises the builder, returning the [`IngestConfig`].
    pub fn build(self) -> IngestConfig {
        self.cfg
    }
}

/// Configuration for assembling the train/validation token corpus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetConfig {
    /// Dataset identifier recorded in the metadata.
    pub dataset: String,
    /// The validation split is `1 / validation_divisor` of the corpus.
    pub validation_divisor: usize,
    /// The recorded vocabulary size is rounded up to a multiple of this value.
    pub vocab_multiple: usize,
    /// Seed for the work-unit shuffle; `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            dataset: "vgm".into(),
            validation_divisor: 10,
            vocab_multiple: 64,
            seed: None,
        }
    }
}

impl DatasetConfig {
    /// Returns a builder initialised with [`DatasetConfig::default`].
    #[must_use]
    pub fn builder() -> DatasetBuilder {
        DatasetBuilder::default()
    }

    /// Validates the invariants required for assembly.
    pub fn validate(&self) -> Result<()> {
        if self.dataset.trim().is_empty() {
            return Err(VgmtokError::InvalidConfig(
                "dataset name must not be empty".into(),
            ));
        }
        if self.validation_divisor < 2 {
            return Err(VgmtokError::InvalidConfig(format!(
                "validation_divisor ({}) must be at least 2",
                self.validation_divisor
            )));
        }
        if self.vocab_multiple == 0 {
            return Err(VgmtokError::InvalidConfig(
                "vocab_multiple must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`DatasetConfig`].
#[derive(Debug, Default, Clone)]
pub struct DatasetBuilder {
    cfg: DatasetConfig,
}

impl DatasetBuilder {
    /// Sets the dataset identifier.
    #[must_use]
    pub fn dataset<S: Into<String>>(mut self, name: S) -> Self {
        self.cfg.dataset = name.into();
        self
    }

    /// Sets the validation divisor.
    #[must_use]
    pub fn validation_divisor(mut self, divisor: usize) -> Self {
        self.cfg.validation_divisor = divisor;
        self
    }

    /// Sets the vocabulary padding multiple.
    #[must_use]
    pub fn vocab_multiple(mut self, multiple: usize) -> Self {
        self.cfg.vocab_multiple = multiple;
        self
    }

    /// Fixes the shuffle seed.
    #[must_use]
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.cfg.seed = seed;
        self
    }

    /// Finalises the builder, returning a validated [`DatasetConfig`].
    pub fn build(self) -> Result<DatasetConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}

/// Configuration for turning sampled token streams back into captures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerateConfig {
    /// Maximum number of tokens drawn from the sampler per sample.
    pub max_new_tokens: usize,
    /// Priming stops once this many ticks have been imported from the priming file.
    pub start_ticks: u64,
    /// Generated files are named `{output_name}{index}.vgm`.
    pub output_name: String,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 50_000,
            start_ticks: 10_000,
            output_name: "gen".into(),
        }
    }
}

impl GenerateConfig {
    /// Validates the generation settings.
    pub fn validate(&self) -> Result<()> {
        if self.max_new_tokens == 0 {
            return Err(VgmtokError::InvalidConfig(
                "max_new_tokens must be greater than zero".into(),
            ));
        }
        if self.output_name.is_empty() {
            return Err(VgmtokError::InvalidConfig(
                "output_name must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Returns the file name for the sample with the given index.
    #[must_use]
    pub fn sample_file_name(&self, index: usize) -> String {
        format!("{}{index}.vgm", self.output_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_builder_overrides_defaults() {
        let cfg = IngestConfig::builder()
            .recursive(false)
            .follow_symlinks(true)
            .min_duration_ticks(10)
            .build();
        assert!(!cfg.recursive);
        assert!(cfg.follow_symlinks);
        assert_eq!(cfg.min_duration_ticks, 10);
        assert_eq!(
            IngestConfig::default().min_duration_ticks,
            DEFAULT_MIN_DURATION_TICKS
        );
    }

    #[test]
    fn dataset_validate_rejects_degenerate_split() {
        let err = DatasetConfig::builder()
            .validation_divisor(1)
            .build()
            .expect_err("validation should fail");
        assert!(matches!(
            err,
            VgmtokError::InvalidConfig(message) if message.contains("validation_divisor")
        ));
        assert!(DatasetConfig::builder().vocab_multiple(0).build().is_err());
        assert!(DatasetConfig::builder().dataset(" ").build().is_err());
    }

    #[test]
    fn dataset_builder_keeps_seed() {
        let cfg = DatasetConfig::builder()
            .dataset("nes")
            .seed(Some(7))
            .build()
            .expect("config should be valid");
        assert_eq!(cfg.dataset, "nes");
        assert_eq!(cfg.seed, Some(7));
        assert_eq!(cfg.validation_divisor, 10);
    }

    #[test]
    fn sample_names_use_prefix_and_index() {
        let cfg = GenerateConfig::default();
        assert_eq!(cfg.sample_file_name(3), "gen3.vgm");
        assert!(GenerateConfig {
            max_new_tokens: 0,
            ..GenerateConfig::default()
        }
        .validate()
        .is_err());
    }
}
