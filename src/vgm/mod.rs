//! VGM capture container: header handling plus the parsed command stream.
//!
//! Only the header fields needed to locate and rewrite the command stream are interpreted.
//! All other header bytes (chip clocks, volume modifiers, ...) are carried through verbatim so
//! a file loaded and saved again keeps its chip configuration.

pub mod command;

use std::fs::File;
use std::io::{Read, Write};
use std::ops::Range;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Result, VgmtokError};

pub use command::{
    Chip, Command, RegisterWrite, Wait, WriteForm, END_OF_DATA, NES_APU_WRITE, TICK_RATE,
};

const MAGIC: &[u8; 4] = b"Vgm ";
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

const EOF_OFFSET: usize = 0x04;
const VERSION_OFFSET: usize = 0x08;
const GD3_OFFSET: usize = 0x14;
const TOTAL_SAMPLES_OFFSET: usize = 0x18;
const LOOP_OFFSET: usize = 0x1C;
const LOOP_SAMPLES_OFFSET: usize = 0x20;
const DATA_OFFSET: usize = 0x34;
const NES_APU_CLOCK_OFFSET: usize = 0x84;

const LEGACY_DATA_START: usize = 0x40;
const DEFAULT_HEADER_LEN: usize = 0x100;
const DEFAULT_VERSION: u32 = 0x171;
const NES_APU_CLOCK: u32 = 1_789_772;

/// Raw VGM header bytes preceding the command stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VgmHeader {
    bytes: Vec<u8>,
}

impl Default for VgmHeader {
    /// A version 1.71 header with only the NES APU clocked.
    fn default() -> Self {
        let mut header = Self {
            bytes: vec![0u8; DEFAULT_HEADER_LEN],
        };
        header.bytes[..4].copy_from_slice(MAGIC);
        header.write_u32(VERSION_OFFSET, DEFAULT_VERSION);
        header.write_u32(DATA_OFFSET, (DEFAULT_HEADER_LEN - DATA_OFFSET) as u32);
        header.write_u32(NES_APU_CLOCK_OFFSET, NES_APU_CLOCK);
        header
    }
}

impl VgmHeader {
    /// Parses the header of a complete file image, returning it together with the byte range
    /// holding the command stream.
    pub fn parse(data: &[u8]) -> Result<(Self, Range<usize>)> {
        if data.len() < LEGACY_DATA_START || &data[..4] != MAGIC {
            return Err(VgmtokError::Format("missing `Vgm ` header".into()));
        }
        let version = read_u32(data, VERSION_OFFSET);
        let relative_data = read_u32(data, DATA_OFFSET) as usize;
        let start = if version >= 0x150 && relative_data != 0 {
            DATA_OFFSET + relative_data
        } else {
            LEGACY_DATA_START
        };
        if start < LEGACY_DATA_START || start > data.len() {
            return Err(VgmtokError::Format(format!(
                "command stream offset 0x{start:x} is outside the file ({} bytes)",
                data.len()
            )));
        }

        let mut end = data.len();
        let relative_eof = read_u32(data, EOF_OFFSET) as usize;
        if relative_eof != 0 {
            end = end.min(EOF_OFFSET + relative_eof);
        }
        let relative_gd3 = read_u32(data, GD3_OFFSET) as usize;
        if relative_gd3 != 0 && GD3_OFFSET + relative_gd3 > start {
            end = end.min(GD3_OFFSET + relative_gd3);
        }
        let end = end.max(start);

        let header = Self {
            bytes: data[..start].to_vec(),
        };
        Ok((header, start..end))
    }

    /// Returns the BCD-encoded format version.
    #[must_use]
    pub fn version(&self) -> u32 {
        read_u32(&self.bytes, VERSION_OFFSET)
    }

    /// Returns the total sample count declared by the header.
    #[must_use]
    pub fn declared_samples(&self) -> u32 {
        read_u32(&self.bytes, TOTAL_SAMPLES_OFFSET)
    }

    /// Returns the header length, which is also where the command stream starts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the header holds no bytes (never the case for parsed headers).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

/// A capture file: header plus the ordered command stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VgmFile {
    header: VgmHeader,
    commands: Vec<Command>,
}

impl VgmFile {
    /// Creates an empty capture with the default header.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty capture reusing an existing header.
    #[must_use]
    pub fn with_header(header: VgmHeader) -> Self {
        Self {
            header,
            commands: Vec::new(),
        }
    }

    /// Creates a capture from a command sequence with the default header.
    #[must_use]
    pub fn from_commands(commands: Vec<Command>) -> Self {
        Self {
            header: VgmHeader::default(),
            commands,
        }
    }

    /// Parses an uncompressed file image.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (header, range) = VgmHeader::parse(data)?;
        let mut cursor = &data[range];
        let mut commands = Vec::new();
        while let Some(command) = Command::read(&mut cursor)? {
            commands.push(command);
        }
        Ok(Self { header, commands })
    }

    /// Reads a file image from `reader`, decompressing it first if it is gzip compressed.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut raw = Vec::new();
        reader
            .read_to_end(&mut raw)
            .map_err(|err| VgmtokError::io(err, None))?;
        if raw.starts_with(&GZIP_MAGIC) {
            let mut inflated = Vec::with_capacity(raw.len() * 4);
            GzDecoder::new(raw.as_slice())
                .read_to_end(&mut inflated)
                .map_err(|err| VgmtokError::Format(format!("gzip stream: {err}")))?;
            raw = inflated;
        }
        Self::from_bytes(&raw)
    }

    /// Loads a `.vgm` or `.vgz` file from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| VgmtokError::io(err, Some(path.into())))?;
        Self::from_reader(file).map_err(|err| match err {
            VgmtokError::Io { source, .. } => VgmtokError::io(source, Some(path.into())),
            other => other.in_file(path),
        })
    }

    /// Returns the header carried by this capture.
    #[must_use]
    pub fn header(&self) -> &VgmHeader {
        &self.header
    }

    /// Returns the command stream.
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Consumes the capture, returning its command stream.
    #[must_use]
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    /// Appends a command to the stream.
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Total playback duration in ticks, summed over every command in the stream.
    #[must_use]
    pub fn total_duration(&self) -> u64 {
        self.commands.iter().map(|c| u64::from(c.ticks())).sum()
    }

    /// Serialises the capture, rewriting length and duration fields and dropping loop and
    /// GD3 references that no longer point at valid data.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut header = self.header.clone();
        let mut out = Vec::with_capacity(header.len() + self.commands.len() * 3 + 1);
        out.extend_from_slice(&header.bytes);
        for command in &self.commands {
            command.encode(&mut out);
        }
        out.push(END_OF_DATA);

        let total = u32::try_from(self.total_duration()).unwrap_or(u32::MAX);
        header.write_u32(EOF_OFFSET, (out.len() - EOF_OFFSET) as u32);
        header.write_u32(GD3_OFFSET, 0);
        header.write_u32(TOTAL_SAMPLES_OFFSET, total);
        header.write_u32(LOOP_OFFSET, 0);
        header.write_u32(LOOP_SAMPLES_OFFSET, 0);
        out[..header.len()].copy_from_slice(&header.bytes);
        out
    }

    /// Writes the capture to disk, gzip compressing it when the file name ends in `z`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.to_bytes();
        let io_err = |err: std::io::Error| VgmtokError::io(err, Some(path.to_path_buf()));
        let file = File::create(path).map_err(io_err)?;
        if is_compressed_name(path) {
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(&bytes).map_err(io_err)?;
            encoder.finish().map_err(io_err)?;
        } else {
            let mut file = file;
            file.write_all(&bytes).map_err(io_err)?;
        }
        Ok(())
    }
}

/// Returns `true` for names following the compressed-capture convention (`*.vgz`).
#[must_use]
pub fn is_compressed_name(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.to_ascii_lowercase().ends_with('z'))
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    bytes
        .get(offset..offset + 4)
        .map_or(0, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_file() -> VgmFile {
        VgmFile::from_commands(vec![
            Command::Write(RegisterWrite::nes_apu(0x00, 0xBF)),
            Command::Wait(Wait::NtscFrame),
            Command::Write(RegisterWrite::nes_apu(0x04, 0x3F)),
            Command::Wait(Wait::Samples(1000)),
        ])
    }

    #[test]
    fn save_and_load_preserve_commands() {
        let dir = tempdir().expect("tempdir");
        let original = sample_file();
        for name in ["song.vgm", "song.vgz"] {
            let path = dir.path().join(name);
            original.save(&path).expect("save");
            let loaded = VgmFile::load(&path).expect("load");
            assert_eq!(loaded.commands(), original.commands());
            assert_eq!(loaded.header().declared_samples(), 1735);
        }
    }

    #[test]
    fn gzip_is_detected_by_content() {
        let dir = tempdir().expect("tempdir");
        let compressed = dir.path().join("song.vgz");
        sample_file().save(&compressed).expect("save");
        let renamed = dir.path().join("song.vgm");
        std::fs::rename(&compressed, &renamed).expect("rename");
        assert_eq!(VgmFile::load(&renamed).expect("load").commands().len(), 4);
    }

    #[test]
    fn header_fields_are_rewritten() {
        let bytes = sample_file().to_bytes();
        assert_eq!(read_u32(&bytes, EOF_OFFSET) as usize, bytes.len() - 4);
        assert_eq!(read_u32(&bytes, NES_APU_CLOCK_OFFSET), NES_APU_CLOCK);
        assert_eq!(*bytes.last().unwrap(), END_OF_DATA);
        assert_eq!(bytes.len(), DEFAULT_HEADER_LEN + 3 + 1 + 3 + 3 + 1);
    }

    #[test]
    fn legacy_files_start_at_0x40() {
        let mut bytes = vec![0u8; LEGACY_DATA_START];
        bytes[..4].copy_from_slice(MAGIC);
        bytes[VERSION_OFFSET..VERSION_OFFSET + 4].copy_from_slice(&0x110u32.to_le_bytes());
        bytes.extend_from_slice(&[0x50, 0x9F, 0x62, END_OF_DATA, 0xFF]);
        let vgm = VgmFile::from_bytes(&bytes).expect("parse legacy");
        assert_eq!(vgm.commands().len(), 2);
        assert_eq!(vgm.total_duration(), 735);
        assert_eq!(vgm.header().len(), LEGACY_DATA_START);
    }

    #[test]
    fn rejects_non_vgm_data() {
        assert!(matches!(
            VgmFile::from_bytes(b"RIFF not a capture file at all, just some text padding it out"),
            Err(VgmtokError::Format(_))
        ));
    }

    #[test]
    fn truncated_stream_is_reported() {
        let mut bytes = sample_file().to_bytes();
        let len = bytes.len();
        bytes.truncate(len - 3);
        bytes[EOF_OFFSET..EOF_OFFSET + 4].copy_from_slice(&0u32.to_le_bytes());
        assert!(VgmFile::from_bytes(&bytes).is_err());
    }
}
