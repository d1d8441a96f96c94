//! Tokenization of NES APU music captures in the VGM format.
//!
//! The crate exposes both a library API and a `vgmtok` command line interface.  A corpus
//! of `.vgm`/`.vgz` captures is scanned for the distinct command payloads it contains,
//! which become a sorted vocabulary; every capture is then encoded twice (as recorded and
//! with the two pulse channels swapped) into 16-bit token streams that are shuffled, split,
//! and written as flat `train.bin`/`val.bin` files for a sequence model.  Sampled token
//! streams are decoded back into playable captures.
//!
//! ```no_run
//! use vgmtok::{prepare_dataset, DatasetConfig, IngestConfig};
//!
//! # fn main() -> vgmtok::Result<()> {
//! let dataset_cfg = DatasetConfig::builder().dataset("nes").seed(Some(7)).build()?;
//! let prepared = prepare_dataset(
//!     &["/path/to/captures"],
//!     std::path::Path::new("data/nes"),
//!     &IngestConfig::default(),
//!     &dataset_cfg,
//! )?;
//! println!("{} training tokens", prepared.metadata.train_tokens);
//! # Ok(())
//! # }
//! ```
//!
//! The CLI is enabled by default through the `cli` feature.  Users targeting the
//! library portion only can disable default features to avoid the CLI
//! dependencies: `vgmtok = { version = "...", default-features = false }`.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    clippy::all,
    rust_2018_idioms,
    future_incompatible,
    unused_lifetimes,
    unreachable_pub
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::doc_markdown,
    clippy::multiple_crate_versions
)]

pub mod bytes;
pub mod config;
pub mod corpus;
pub mod dataset;
pub mod decoder;
pub mod error;
pub mod metrics;
pub mod transform;
pub mod vgm;
pub mod vocab;

pub use config::{DatasetConfig, GenerateConfig, IngestConfig};
pub use dataset::{prepare_dataset, DatasetMetadata, PreparedDataset, WorkUnit};
pub use decoder::{DecodedSample, ReplaySampler, StopReason, TokenSampler, TokenStreamDecoder};
pub use error::{Result, VgmtokError};
pub use metrics::ScanReport;
pub use vgm::{Command, VgmFile, VgmHeader};
pub use vocab::{TokenId, Vocabulary, SENTINEL};
