//! Assembly of the shuffled train/validation token corpus.
//!
//! Every accepted capture yields two work units, one per [`Variant`].  A work unit is the
//! little-endian `u16` token id of each vocabulary-eligible command in document order,
//! followed by the sentinel id.  Units are shuffled whole, concatenated, and split so the
//! validation suffix is roughly a tenth of the corpus and always a whole number of tokens.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bytes::command_key;
use crate::config::{DatasetConfig, IngestConfig};
use crate::corpus::{collect_paths, load_capture, CaptureOutcome};
use crate::error::{Result, VgmtokError};
use crate::metrics::{ticks_to_minutes, ScanReport};
use crate::transform::Variant;
use crate::vgm::Command;
use crate::vocab::{load_or_build, TokenId, Vocabulary, VOCABULARY_FILE};

/// Width of one persisted token in bytes.
pub const TOKEN_BYTES: usize = 2;
/// Training split file name.
pub const TRAIN_FILE: &str = "train.bin";
/// Validation split file name.
pub const VAL_FILE: &str = "val.bin";
/// Metadata file name.
pub const META_FILE: &str = "meta.json";

/// Token bytes of one (capture, variant) pair, terminated by the sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    bytes: Vec<u8>,
}

impl WorkUnit {
    /// Encodes a command sequence, returning the unit and the ticks it covers.
    ///
    /// A command whose payload is missing from the vocabulary means the vocabulary was not
    /// built from this corpus and is reported as [`VgmtokError::Consistency`].
    pub fn encode<I>(commands: I, vocab: &Vocabulary) -> Result<(Self, u64)>
    where
        I: IntoIterator<Item = Command>,
    {
        let commands = commands.into_iter();
        let mut bytes = Vec::with_capacity(commands.size_hint().0 * TOKEN_BYTES + TOKEN_BYTES);
        let mut ticks = 0u64;
        for command in commands {
            ticks += u64::from(command.ticks());
            let Some(key) = command_key(&command) else {
                continue;
            };
            let id = vocab.token_for_key(&key).ok_or_else(|| {
                VgmtokError::Consistency(format!("payload `{key}` is not in the vocabulary"))
            })?;
            bytes.extend_from_slice(&id.to_le_bytes());
        }
        bytes.extend_from_slice(&vocab.end_id().to_le_bytes());
        Ok((Self { bytes }, ticks))
    }

    /// Raw little-endian token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of tokens, sentinel included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len() / TOKEN_BYTES
    }

    /// Always `false`: a unit holds at least its sentinel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decodes the unit back into token ids.
    #[must_use]
    pub fn tokens(&self) -> Vec<TokenId> {
        decode_tokens(&self.bytes)
    }
}

/// Reads little-endian `u16` token ids, ignoring a trailing odd byte.
#[must_use]
pub fn decode_tokens(bytes: &[u8]) -> Vec<TokenId> {
    bytes
        .chunks_exact(TOKEN_BYTES)
        .map(|pair| TokenId::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Byte length of the validation suffix: a `1 / divisor` share rounded down to whole tokens.
#[must_use]
pub fn validation_len(total: usize, divisor: usize) -> usize {
    TOKEN_BYTES * ((total / TOKEN_BYTES) / divisor.max(1))
}

/// Splits the corpus into its training prefix and validation suffix.
#[must_use]
pub fn split_corpus(corpus: &[u8], divisor: usize) -> (&[u8], &[u8]) {
    let train_len = corpus.len() - validation_len(corpus.len(), divisor);
    corpus.split_at(train_len)
}

/// Shuffles whole work units with a single uniform permutation.
pub fn shuffle_units(units: &mut [WorkUnit], seed: Option<u64>) {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    units.shuffle(&mut rng);
}

/// Metadata record consumed by model configuration and generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetMetadata {
    /// Vocabulary size rounded up to the configured multiple.
    pub vocab_size: usize,
    /// Dataset identifier.
    pub dataset: String,
    /// Actual number of vocabulary entries, sentinel included.
    #[serde(default)]
    pub vocabulary_len: usize,
    /// Token id of the sentinel.
    #[serde(default)]
    pub end_token: TokenId,
    /// Tokens in the training split.
    #[serde(default)]
    pub train_tokens: usize,
    /// Tokens in the validation split.
    #[serde(default)]
    pub val_tokens: usize,
    /// Wait ticks across all work units.
    #[serde(default)]
    pub total_ticks: u64,
}

impl DatasetMetadata {
    /// Loads metadata from JSON.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| VgmtokError::io(err, Some(path.to_path_buf())))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Persists metadata as pretty JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let io_err = |err: std::io::Error| VgmtokError::io(err, Some(path.to_path_buf()));
        let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n").map_err(io_err)?;
        writer.flush().map_err(io_err)
    }
}

/// Work units assembled from a corpus, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    /// Two units per accepted capture: original, then swapped.
    pub units: Vec<WorkUnit>,
    /// Scan counts; `total_ticks` covers both variants of every capture.
    pub report: ScanReport,
}

enum FileUnits {
    Accepted([WorkUnit; 2], u64, u64),
    Short,
    Failed(PathBuf),
}

fn encode_capture(path: &Path, vocab: &Vocabulary, cfg: &IngestConfig) -> Result<FileUnits> {
    let vgm = match load_capture(path, cfg) {
        CaptureOutcome::Accepted(vgm) => vgm,
        CaptureOutcome::TooShort { .. } => return Ok(FileUnits::Short),
        CaptureOutcome::Failed(_) => return Ok(FileUnits::Failed(path.to_path_buf())),
    };
    let encode = |variant: Variant| {
        WorkUnit::encode(variant.apply(vgm.commands()), vocab)
            .map_err(|err| match err {
                VgmtokError::Consistency(message) => {
                    VgmtokError::Consistency(format!("{}: {message}", path.display()))
                }
                other => other,
            })
    };
    let (original, original_ticks) = encode(Variant::Original)?;
    let (swapped, swapped_ticks) = encode(Variant::Swapped)?;
    let real_tokens = (original.len() + swapped.len() - 2) as u64;
    Ok(FileUnits::Accepted(
        [original, swapped],
        original_ticks + swapped_ticks,
        real_tokens,
    ))
}

/// Re-walks the corpus and encodes both variants of every accepted capture.
pub fn assemble<P: AsRef<Path>>(
    inputs: &[P],
    vocab: &Vocabulary,
    cfg: &IngestConfig,
) -> Result<Assembly> {
    let paths = collect_paths(inputs, cfg)?;
    let encoded = paths
        .par_iter()
        .map(|path| encode_capture(path, vocab, cfg))
        .collect::<Result<Vec<_>>>()?;

    let mut assembly = Assembly::default();
    assembly.report.files_discovered = paths.len();
    for outcome in encoded {
        match outcome {
            FileUnits::Accepted(units, ticks, tokens) => {
                assembly.report.files_accepted += 1;
                assembly.report.total_ticks += ticks;
                assembly.report.token_count += tokens;
                assembly.units.extend(units);
            }
            FileUnits::Short => assembly.report.files_skipped_short += 1,
            FileUnits::Failed(path) => assembly.report.failed_files.push(path),
        }
    }
    Ok(assembly)
}

/// Shuffles and splits assembled units, writes both splits and the metadata into `out_dir`.
pub fn write_dataset(
    out_dir: &Path,
    vocab: &Vocabulary,
    mut assembly: Assembly,
    cfg: &DatasetConfig,
) -> Result<DatasetMetadata> {
    cfg.validate()?;
    fs::create_dir_all(out_dir).map_err(|err| VgmtokError::io(err, Some(out_dir.into())))?;

    shuffle_units(&mut assembly.units, cfg.seed);
    let total: usize = assembly.units.iter().map(|u| u.as_bytes().len()).sum();
    let mut corpus = Vec::with_capacity(total);
    for unit in &assembly.units {
        corpus.extend_from_slice(unit.as_bytes());
    }
    let (train, val) = split_corpus(&corpus, cfg.validation_divisor);
    info!(
        "training size={}, validation size={}",
        train.len(),
        val.len()
    );

    for (name, bytes) in [(TRAIN_FILE, train), (VAL_FILE, val)] {
        let path = out_dir.join(name);
        fs::write(&path, bytes).map_err(|err| VgmtokError::io(err, Some(path.clone())))?;
    }

    let metadata = DatasetMetadata {
        vocab_size: vocab.padded_len(cfg.vocab_multiple),
        dataset: cfg.dataset.clone(),
        vocabulary_len: vocab.len(),
        end_token: vocab.end_id(),
        train_tokens: train.len() / TOKEN_BYTES,
        val_tokens: val.len() / TOKEN_BYTES,
        total_ticks: assembly.report.total_ticks,
    };
    metadata.save(out_dir.join(META_FILE))?;
    info!(
        "vocabulary size={}, optimized to {}",
        metadata.vocabulary_len, metadata.vocab_size
    );
    info!(
        "total duration={} ({:.2} minutes)",
        metadata.total_ticks,
        ticks_to_minutes(metadata.total_ticks)
    );
    Ok(metadata)
}

/// Result of a full preparation run.
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    /// Metadata written next to the splits.
    pub metadata: DatasetMetadata,
    /// Counts from the vocabulary scan, when the vocabulary was built in this run.
    pub vocabulary_report: Option<ScanReport>,
    /// Counts from the assembly pass.
    pub assembly_report: ScanReport,
}

/// Builds (or reuses) the vocabulary, assembles the corpus, and writes every output.
///
/// Outputs are written even if some captures failed to decode; callers should inspect
/// [`ScanReport::has_failures`] on the returned reports.
pub fn prepare_dataset<P: AsRef<Path>>(
    inputs: &[P],
    out_dir: &Path,
    ingest: &IngestConfig,
    cfg: &DatasetConfig,
) -> Result<PreparedDataset> {
    cfg.validate()?;
    let (vocab, vocabulary_report) = load_or_build(&out_dir.join(VOCABULARY_FILE), inputs, ingest)?;
    info!("building data set");
    let assembly = assemble(inputs, &vocab, ingest)?;
    for path in &assembly.report.failed_files {
        warn!("excluded undecodable capture {}", path.display());
    }
    let assembly_report = assembly.report.clone();
    let metadata = write_dataset(out_dir, &vocab, assembly, cfg)?;
    Ok(PreparedDataset {
        metadata,
        vocabulary_report,
        assembly_report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vgm::{RegisterWrite, VgmFile, Wait};
    use tempfile::tempdir;

    fn vocab(keys: &[&str]) -> Vocabulary {
        Vocabulary::from_keys(keys.iter().map(|k| k.to_string())).expect("vocab")
    }

    fn song(pulse_register: u8, ticks: u16) -> VgmFile {
        VgmFile::from_commands(vec![
            Command::Write(RegisterWrite::nes_apu(pulse_register, 0x9F)),
            Command::Write(RegisterWrite::nes_apu(0x15, 0x03)),
            Command::DataBlock {
                kind: 0,
                second_chip: false,
                data: vec![0x80; 16],
            },
            Command::Wait(Wait::Samples(ticks)),
        ])
    }

    #[test]
    fn work_unit_ends_with_single_sentinel() {
        let vocab = vocab(&["62", "b40030"]);
        let commands = vec![
            Command::Write(RegisterWrite::nes_apu(0, 0x30)),
            Command::Wait(Wait::NtscFrame),
            Command::Wait(Wait::NtscFrame),
        ];
        let (unit, ticks) = WorkUnit::encode(commands, &vocab).expect("encode");
        assert_eq!(ticks, 1470);
        let tokens = unit.tokens();
        assert_eq!(tokens, vec![2, 1, 1, vocab.end_id()]);
        assert_eq!(
            tokens.iter().filter(|&&t| t == vocab.end_id()).count(),
            1
        );
        assert_eq!(&unit.as_bytes()[..2], &[2, 0]);
    }

    #[test]
    fn empty_sequence_still_terminates() {
        let vocab = vocab(&[]);
        let (unit, ticks) = WorkUnit::encode(Vec::new(), &vocab).expect("encode");
        assert_eq!(unit.tokens(), vec![vocab.end_id()]);
        assert_eq!(ticks, 0);
    }

    #[test]
    fn unknown_payload_is_a_consistency_error() {
        let vocab = vocab(&["62"]);
        let err = WorkUnit::encode(vec![Command::Wait(Wait::PalFrame)], &vocab)
            .expect_err("63 missing");
        assert!(matches!(err, VgmtokError::Consistency(m) if m.contains("63")));
    }

    #[test]
    fn split_is_exact_and_token_aligned() {
        for total_tokens in [0usize, 1, 9, 10, 11, 99, 1_001] {
            let corpus = vec![0u8; total_tokens * TOKEN_BYTES];
            let (train, val) = split_corpus(&corpus, 10);
            assert_eq!(train.len() + val.len(), corpus.len());
            assert_eq!(val.len() % TOKEN_BYTES, 0);
            assert_eq!(val.len(), TOKEN_BYTES * (total_tokens / 10));
        }
    }

    #[test]
    fn seeded_shuffle_is_reproducible_and_keeps_units_whole() {
        let units: Vec<WorkUnit> = (0u16..20)
            .map(|i| WorkUnit {
                bytes: [i.to_le_bytes(), 0u16.to_le_bytes()].concat(),
            })
            .collect();
        let mut first = units.clone();
        let mut second = units.clone();
        shuffle_units(&mut first, Some(42));
        shuffle_units(&mut second, Some(42));
        assert_eq!(first, second);
        let mut sorted = first.clone();
        sorted.sort_by_key(|u| u.tokens()[0]);
        assert_eq!(sorted, units);
    }

    #[test]
    fn end_to_end_three_file_corpus() {
        let dir = tempdir().expect("tempdir");
        let corpus = dir.path().join("corpus");
        let out = dir.path().join("data");
        fs::create_dir(&corpus).expect("mkdir");
        VgmFile::from_commands(vec![
            Command::Write(RegisterWrite::nes_apu(0x0C, 0x3F)),
            Command::Wait(Wait::Samples(500)),
        ])
        .save(corpus.join("a_sfx.vgm"))
        .expect("save sfx");
        song(0x00, 30_000).save(corpus.join("b.vgm")).expect("save b");
        song(0x06, 40_000).save(corpus.join("c.vgz")).expect("save c");

        let cfg = DatasetConfig::builder()
            .dataset("nes")
            .seed(Some(1))
            .build()
            .expect("config");
        let prepared =
            prepare_dataset(&[&corpus], &out, &IngestConfig::default(), &cfg).expect("prepare");

        let vocab = Vocabulary::load(out.join(VOCABULARY_FILE)).expect("vocab");
        assert!(vocab.token_for_key("b40c3f").is_none());
        assert!(vocab.token_for_key("61f401").is_none());
        assert_eq!(
            vocab.entries(),
            &[
                "*END*", "613075", "61409c", "b4009f", "b4029f", "b4049f", "b4069f", "b41503"
            ]
            .map(String::from)
        );
        let scan = prepared.vocabulary_report.expect("vocabulary built");
        assert_eq!(scan.files_skipped_short, 1);
        assert_eq!(scan.files_accepted, 2);

        let report = prepared.assembly_report;
        assert_eq!(report.files_accepted, 2);
        assert_eq!(report.total_ticks, 2 * (30_000 + 40_000));
        assert_eq!(report.token_count, 12);

        let train = fs::read(out.join(TRAIN_FILE)).expect("train");
        let val = fs::read(out.join(VAL_FILE)).expect("val");
        // Four units of three commands plus a sentinel.
        assert_eq!(train.len() + val.len(), 4 * 4 * TOKEN_BYTES);
        assert_eq!(val.len(), TOKEN_BYTES);
        let tokens = decode_tokens(&[train, val].concat());
        assert_eq!(
            tokens.iter().filter(|&&t| t == vocab.end_id()).count(),
            4
        );

        let meta = DatasetMetadata::load(out.join(META_FILE)).expect("meta");
        assert_eq!(meta, prepared.metadata);
        assert_eq!(meta.vocab_size, 64);
        assert_eq!(meta.vocabulary_len, 8);
        assert_eq!(meta.dataset, "nes");
        assert_eq!(meta.train_tokens + meta.val_tokens, 16);
    }
}
