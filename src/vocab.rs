//! Vocabulary construction, persistence, and lookup.
//!
//! The vocabulary is the sorted set of hex payloads of every vocabulary-eligible command found
//! in the corpus, in both augmentation variants, plus the [`SENTINEL`] entry.  A token id is
//! the position of its entry in the listing, so the listing file is the contract shared by
//! dataset assembly and generation and is never rewritten once it exists.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use tempfile::NamedTempFile;

use crate::bytes::{command_key, key_to_command};
use crate::config::IngestConfig;
use crate::corpus::{collect_paths, load_capture, CaptureOutcome};
use crate::error::{Result, VgmtokError};
use crate::metrics::ScanReport;
use crate::transform::Variant;
use crate::vgm::Command;

/// Token identifier; tokens are persisted as two little-endian bytes.
pub type TokenId = u16;

/// Reserved entry terminating every work unit.
pub const SENTINEL: &str = "*END*";
/// Conventional file name of the vocabulary listing inside a dataset directory.
pub const VOCABULARY_FILE: &str = "vocabulary_list.txt";
/// Largest vocabulary addressable by [`TokenId`].
pub const MAX_VOCABULARY_LEN: usize = TokenId::MAX as usize + 1;

/// Ordered, deduplicated vocabulary with its reverse index.
#[must_use]
#[derive(Debug, Clone)]
pub struct Vocabulary {
    entries: Vec<String>,
    index: FxHashMap<String, TokenId>,
    end_id: TokenId,
}

impl Vocabulary {
    /// Builds a vocabulary from payload keys, adding the sentinel and sorting the result.
    pub fn from_keys<I>(keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut set: FxHashSet<String> = keys.into_iter().collect();
        set.insert(SENTINEL.to_string());
        let mut entries: Vec<String> = set.into_iter().collect();
        entries.sort_unstable();
        Self::from_entries(entries)
    }

    /// Wraps an already ordered listing, where each entry's id is its position.
    pub fn from_entries(entries: Vec<String>) -> Result<Self> {
        if entries.len() > MAX_VOCABULARY_LEN {
            return Err(VgmtokError::InvalidVocabulary(format!(
                "{} entries exceed the {MAX_VOCABULARY_LEN} addressable by 16-bit tokens",
                entries.len()
            )));
        }
        let mut index = FxHashMap::default();
        index.reserve(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            if entry.is_empty() {
                return Err(VgmtokError::InvalidVocabulary(format!(
                    "blank entry on line {}",
                    position + 1
                )));
            }
            if index.insert(entry.clone(), position as TokenId).is_some() {
                return Err(VgmtokError::InvalidVocabulary(format!(
                    "duplicate entry `{entry}` on line {}",
                    position + 1
                )));
            }
        }
        let end_id = index.get(SENTINEL).copied().ok_or_else(|| {
            VgmtokError::InvalidVocabulary(format!("missing `{SENTINEL}` entry"))
        })?;
        Ok(Self {
            entries,
            index,
            end_id,
        })
    }

    /// Loads a newline-delimited listing verbatim.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| VgmtokError::io(err, Some(path.to_path_buf())))?;
        let entries = text.lines().map(str::to_owned).collect();
        Self::from_entries(entries).map_err(|err| match err {
            VgmtokError::InvalidVocabulary(message) => {
                VgmtokError::InvalidVocabulary(format!("{}: {message}", path.display()))
            }
            other => other,
        })
    }

    /// Writes the listing atomically, refusing to replace an existing listing.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let io_err = |err: std::io::Error| VgmtokError::io(err, Some(path.to_path_buf()));
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(io_err)?;
        let mut staged = NamedTempFile::new_in(dir).map_err(io_err)?;
        {
            let mut writer = BufWriter::new(staged.as_file_mut());
            for entry in &self.entries {
                writeln!(writer, "{entry}").map_err(io_err)?;
            }
            writer.flush().map_err(io_err)?;
        }
        staged.as_file().sync_all().map_err(io_err)?;
        staged
            .persist_noclobber(path)
            .map_err(|err| io_err(err.error))?;
        Ok(())
    }

    /// Number of entries, sentinel included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the vocabulary has no entries (never the case once constructed).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Token id of the sentinel.
    #[must_use]
    pub fn end_id(&self) -> TokenId {
        self.end_id
    }

    /// Entries in id order.
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Returns the entry text for a token id.
    #[must_use]
    pub fn key(&self, id: TokenId) -> Option<&str> {
        self.entries.get(usize::from(id)).map(String::as_str)
    }

    /// Returns the token id of an entry.
    #[must_use]
    pub fn token_for_key(&self, key: &str) -> Option<TokenId> {
        self.index.get(key).copied()
    }

    /// Returns the token id of a command, or `None` for bulk or unknown commands.
    #[must_use]
    pub fn token_for(&self, command: &Command) -> Option<TokenId> {
        command_key(command).and_then(|key| self.token_for_key(&key))
    }

    /// Decodes a token id into a command, or `None` for the sentinel, out-of-range ids, and
    /// entries that do not hold a valid command.
    #[must_use]
    pub fn command(&self, id: TokenId) -> Option<Command> {
        self.key(id).and_then(key_to_command)
    }

    /// Vocabulary size rounded up to the next multiple of `multiple`.
    #[must_use]
    pub fn padded_len(&self, multiple: usize) -> usize {
        padded_size(self.len(), multiple)
    }
}

/// Smallest multiple of `multiple` that is at least `len`.
#[must_use]
pub fn padded_size(len: usize, multiple: usize) -> usize {
    if multiple == 0 {
        return len;
    }
    len.div_ceil(multiple) * multiple
}

/// Explicit accumulator threaded through a corpus scan; partial accumulators from parallel
/// workers are combined with [`VocabularyAccumulator::merge`].
#[derive(Debug, Clone, Default)]
pub struct VocabularyAccumulator {
    keys: FxHashSet<String>,
    report: ScanReport,
}

impl VocabularyAccumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the payloads of both variants of an accepted capture.
    pub fn absorb(&mut self, commands: &[Command]) {
        self.report.files_accepted += 1;
        for variant in Variant::ALL {
            for command in variant.apply(commands) {
                self.report.total_ticks += u64::from(command.ticks());
                if let Some(key) = command_key(&command) {
                    self.keys.insert(key);
                    self.report.token_count += 1;
                }
            }
        }
    }

    /// Loads one discovered capture and records it according to its outcome.
    #[must_use]
    pub fn absorb_capture(mut self, path: &Path, cfg: &IngestConfig) -> Self {
        self.report.files_discovered += 1;
        match load_capture(path, cfg) {
            CaptureOutcome::Accepted(vgm) => {
                info!("{}", path.display());
                self.absorb(vgm.commands());
            }
            CaptureOutcome::TooShort { .. } => self.report.files_skipped_short += 1,
            CaptureOutcome::Failed(_) => self.report.failed_files.push(path.to_path_buf()),
        }
        self
    }

    /// Combines two partial accumulators.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        if self.keys.len() < other.keys.len() {
            let keys = std::mem::take(&mut self.keys);
            self.keys = other.keys;
            self.keys.extend(keys);
        } else {
            self.keys.extend(other.keys);
        }
        self.report.merge(other.report);
        self
    }

    /// Number of distinct payloads seen so far.
    #[must_use]
    pub fn distinct(&self) -> usize {
        self.keys.len()
    }

    /// Produces the sorted vocabulary and the scan report.
    pub fn finish(self) -> Result<(Vocabulary, ScanReport)> {
        let mut report = self.report;
        report.failed_files.sort();
        let vocabulary = Vocabulary::from_keys(self.keys)?;
        Ok((vocabulary, report))
    }
}

/// Scans the corpus and builds a fresh vocabulary, without touching the disk.
pub fn build_vocabulary<P: AsRef<Path>>(
    inputs: &[P],
    cfg: &IngestConfig,
) -> Result<(Vocabulary, ScanReport)> {
    let paths = collect_paths(inputs, cfg)?;
    let accumulator = paths
        .par_iter()
        .fold(VocabularyAccumulator::new, |acc, path| {
            acc.absorb_capture(path, cfg)
        })
        .reduce(VocabularyAccumulator::new, VocabularyAccumulator::merge);
    let (vocabulary, report) = accumulator.finish()?;
    info!(
        "vocabulary: {} entries from {} of {} files ({} tokens)",
        vocabulary.len(),
        report.files_accepted,
        report.files_discovered,
        report.token_count
    );
    Ok((vocabulary, report))
}

/// Loads the listing at `path` if it exists; otherwise scans the corpus, persists the new
/// listing atomically, and returns it together with the scan report.
pub fn load_or_build<P: AsRef<Path>>(
    path: &Path,
    inputs: &[P],
    cfg: &IngestConfig,
) -> Result<(Vocabulary, Option<ScanReport>)> {
    if path.exists() {
        info!("loading existing vocabulary from {}", path.display());
        return Ok((Vocabulary::load(path)?, None));
    }
    info!("building vocabulary");
    let (vocabulary, report) = build_vocabulary(inputs, cfg)?;
    vocabulary.save(path)?;
    Ok((vocabulary, Some(report)))
}

/// Opens a listing for reading, mapping a missing file to a configuration error.
pub fn open_existing(path: &Path) -> Result<Vocabulary> {
    if !path.exists() {
        return Err(VgmtokError::InvalidConfig(format!(
            "vocabulary listing {} not found; run `vgmtok vocab` or `vgmtok prepare` first",
            path.display()
        )));
    }
    Vocabulary::load(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vgm::{RegisterWrite, VgmFile, Wait};
    use tempfile::tempdir;

    fn keys(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn entries_are_sorted_with_sentinel() {
        let vocab = Vocabulary::from_keys(keys(&["b40430", "62", "b40030", "62"])).expect("vocab");
        assert_eq!(vocab.entries(), &keys(&["*END*", "62", "b40030", "b40430"]));
        assert_eq!(vocab.end_id(), 0);
    }

    #[test]
    fn ids_round_trip_through_entries() {
        let vocab = Vocabulary::from_keys(keys(&["61e803", "62", "b40030"])).expect("vocab");
        for (position, entry) in vocab.entries().iter().enumerate() {
            let id = vocab.token_for_key(entry).expect("entry indexed");
            assert_eq!(usize::from(id), position);
            assert_eq!(vocab.key(id), Some(entry.as_str()));
        }
        let real_ids: Vec<TokenId> = vocab
            .entries()
            .iter()
            .filter(|e| e.as_str() != SENTINEL)
            .filter_map(|e| vocab.token_for_key(e))
            .collect();
        assert!(!real_ids.contains(&vocab.end_id()));
    }

    #[test]
    fn listing_must_be_well_formed() {
        assert!(matches!(
            Vocabulary::from_entries(keys(&["62", "63"])),
            Err(VgmtokError::InvalidVocabulary(m)) if m.contains("missing")
        ));
        assert!(matches!(
            Vocabulary::from_entries(keys(&["*END*", "62", "62"])),
            Err(VgmtokError::InvalidVocabulary(m)) if m.contains("duplicate")
        ));
        assert!(Vocabulary::from_entries(keys(&["*END*", ""])).is_err());
    }

    #[test]
    fn save_is_atomic_and_never_overwrites() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("data").join(VOCABULARY_FILE);
        let vocab = Vocabulary::from_keys(keys(&["62", "b40030"])).expect("vocab");
        vocab.save(&path).expect("save");
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "*END*\n62\nb40030\n"
        );
        let loaded = Vocabulary::load(&path).expect("load");
        assert_eq!(loaded.entries(), vocab.entries());
        assert!(vocab.save(&path).is_err());
        let leftovers = fs::read_dir(path.parent().unwrap()).expect("read dir").count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn padding_rounds_up_to_multiple() {
        assert_eq!(padded_size(130, 64), 192);
        assert_eq!(padded_size(128, 64), 128);
        assert_eq!(padded_size(1, 64), 64);
        assert_eq!(padded_size(0, 64), 0);
    }

    #[test]
    fn accumulator_collects_both_variants() {
        let commands = vec![
            Command::Write(RegisterWrite::nes_apu(0x00, 0x30)),
            Command::Wait(Wait::NtscFrame),
            Command::DataBlock {
                kind: 0,
                second_chip: false,
                data: vec![9; 4],
            },
        ];
        let mut left = VocabularyAccumulator::new();
        left.absorb(&commands);
        let right = VocabularyAccumulator::new();
        let (vocab, report) = right.merge(left).finish().expect("finish");
        assert_eq!(vocab.entries(), &keys(&["*END*", "62", "b40030", "b40430"]));
        assert_eq!(report.files_accepted, 1);
        assert_eq!(report.token_count, 4);
        assert_eq!(report.total_ticks, 2 * 735);
    }

    #[test]
    fn build_skips_short_and_broken_files() {
        let dir = tempdir().expect("tempdir");
        VgmFile::from_commands(vec![
            Command::Write(RegisterWrite::nes_apu(0x15, 0x0F)),
            Command::Wait(Wait::Samples(500)),
        ])
        .save(dir.path().join("sfx.vgm"))
        .expect("save sfx");
        VgmFile::from_commands(vec![
            Command::Write(RegisterWrite::nes_apu(0x01, 0x08)),
            Command::Wait(Wait::Samples(30_000)),
        ])
        .save(dir.path().join("song.vgz"))
        .expect("save song");
        fs::write(dir.path().join("broken.vgm"), b"garbage").expect("write broken");

        let (vocab, report) =
            build_vocabulary(&[dir.path()], &IngestConfig::default()).expect("build");
        assert_eq!(
            vocab.entries(),
            &keys(&["*END*", "613075", "b40108", "b40508"])
        );
        assert_eq!(report.files_discovered, 3);
        assert_eq!(report.files_skipped_short, 1);
        assert_eq!(report.failed_files, vec![dir.path().join("broken.vgm")]);
    }

    #[test]
    fn load_or_build_reuses_existing_listing() {
        let dir = tempdir().expect("tempdir");
        let corpus = dir.path().join("corpus");
        fs::create_dir(&corpus).expect("mkdir");
        VgmFile::from_commands(vec![Command::Wait(Wait::Samples(40_000))])
            .save(corpus.join("a.vgm"))
            .expect("save");
        let listing = dir.path().join(VOCABULARY_FILE);

        let (first, report) =
            load_or_build(&listing, &[&corpus], &IngestConfig::default()).expect("build");
        assert!(report.is_some());
        VgmFile::from_commands(vec![Command::Wait(Wait::Samples(50_000))])
            .save(corpus.join("b.vgm"))
            .expect("save");
        let (second, report) =
            load_or_build(&listing, &[&corpus], &IngestConfig::default()).expect("reuse");
        assert!(report.is_none());
        assert_eq!(first.entries(), second.entries());
    }

    #[test]
    fn commands_decode_from_ids() {
        let vocab = Vocabulary::from_entries(keys(&["*END*", "62", "zz"])).expect("vocab");
        assert_eq!(vocab.command(1), Some(Command::Wait(Wait::NtscFrame)));
        assert_eq!(vocab.command(0), None);
        assert_eq!(vocab.command(2), None);
        assert_eq!(vocab.command(3), None);
    }
}
