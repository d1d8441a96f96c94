//! Single-command codec for the VGM register stream.
//!
//! Every command occupies a fixed number of bytes determined by its opcode, except data
//! blocks which carry an explicit length.  [`Command::read`] consumes exactly one command
//! from a byte cursor and [`Command::encode`] reproduces the bytes it was read from, which is
//! what makes the hex form of a command usable as a vocabulary key.

use crate::error::{Result, VgmtokError};

/// Opcode terminating the command stream.
pub const END_OF_DATA: u8 = 0x66;
/// Opcode of an NES APU register write (`0xB4 aa dd`).
pub const NES_APU_WRITE: u8 = 0xB4;
/// Native tick rate of the format, in ticks per second.
pub const TICK_RATE: u32 = 44_100;
/// Ticks covered by the one-byte NTSC frame wait (`0x62`).
pub const NTSC_FRAME_TICKS: u32 = 735;
/// Ticks covered by the one-byte PAL frame wait (`0x63`).
pub const PAL_FRAME_TICKS: u32 = 882;

const DATA_BLOCK: u8 = 0x67;
const PCM_RAM_WRITE: u8 = 0x68;
const SECOND_CHIP_FLAG: u32 = 0x8000_0000;

/// Sound chip addressed by a register write, derived from the write opcode.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chip {
    Sn76489,
    GameGearStereo,
    Mikey,
    Ym2413,
    Ym2612,
    Ym2151,
    Ym2203,
    Ym2608,
    Ym2610,
    Ym3812,
    Ym3526,
    Y8950,
    Ymz280b,
    Ymf262,
    Ay8910,
    Rf5c68,
    Rf5c164,
    Pwm,
    GameBoyDmg,
    NesApu,
    MultiPcm,
    Upd7759,
    Okim6258,
    Okim6295,
    Huc6280,
    K053260,
    Pokey,
    WonderSwan,
    Saa1099,
    Es5506,
    Ga20,
    SegaPcm,
    QSound,
    Scsp,
    Vsu,
    X1010,
    Ymf278b,
    Ymf271,
    Scc1,
    K054539,
    C140,
    Es5503,
    /// Opcode reserved by the format for future chips.
    Reserved,
}

impl Chip {
    /// Maps a register-write opcode to the chip it addresses.
    #[must_use]
    pub fn from_opcode(opcode: u8) -> Self {
        match opcode {
            0x30 | 0x50 => Self::Sn76489,
            0x3F | 0x4F => Self::GameGearStereo,
            0x40 => Self::Mikey,
            0x51 | 0xA1 => Self::Ym2413,
            0x52 | 0x53 | 0xA2 | 0xA3 => Self::Ym2612,
            0x54 | 0xA4 => Self::Ym2151,
            0x55 | 0xA5 => Self::Ym2203,
            0x56 | 0x57 | 0xA6 | 0xA7 => Self::Ym2608,
            0x58 | 0x59 | 0xA8 | 0xA9 => Self::Ym2610,
            0x5A | 0xAA => Self::Ym3812,
            0x5B | 0xAB => Self::Ym3526,
            0x5C | 0xAC => Self::Y8950,
            0x5D | 0xAD => Self::Ymz280b,
            0x5E | 0x5F | 0xAE | 0xAF => Self::Ymf262,
            0xA0 => Self::Ay8910,
            0xB0 | 0xC1 => Self::Rf5c68,
            0xB1 | 0xC2 => Self::Rf5c164,
            0xB2 => Self::Pwm,
            0xB3 => Self::GameBoyDmg,
            NES_APU_WRITE => Self::NesApu,
            0xB5 | 0xC3 => Self::MultiPcm,
            0xB6 => Self::Upd7759,
            0xB7 => Self::Okim6258,
            0xB8 => Self::Okim6295,
            0xB9 => Self::Huc6280,
            0xBA => Self::K053260,
            0xBB => Self::Pokey,
            0xBC | 0xC6 => Self::WonderSwan,
            0xBD => Self::Saa1099,
            0xBE | 0xD6 => Self::Es5506,
            0xBF => Self::Ga20,
            0xC0 => Self::SegaPcm,
            0xC4 => Self::QSound,
            0xC5 => Self::Scsp,
            0xC7 => Self::Vsu,
            0xC8 => Self::X1010,
            0xD0 => Self::Ymf278b,
            0xD1 => Self::Ymf271,
            0xD2 => Self::Scc1,
            0xD3 => Self::K054539,
            0xD4 => Self::C140,
            0xD5 => Self::Es5503,
            _ => Self::Reserved,
        }
    }
}

/// Operand layout of a register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteForm {
    /// `op dd`: the register is implied by the data byte.
    Data,
    /// `op aa dd`: eight-bit register index.
    Register,
    /// `op aa bb dd`: sixteen-bit address or port/register pair.
    Wide,
}

impl WriteForm {
    fn of(opcode: u8) -> Option<Self> {
        match opcode {
            0x30..=0x3F | 0x4F | 0x50 => Some(Self::Data),
            0x40..=0x4E | 0x51..=0x5F | 0xA0..=0xBF => Some(Self::Register),
            0xC0..=0xDF => Some(Self::Wide),
            _ => None,
        }
    }
}

/// A single chip register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterWrite {
    opcode: u8,
    register: u16,
    value: u8,
}

impl RegisterWrite {
    /// Builds a register write, rejecting opcodes that are not register writes and registers
    /// that do not fit the opcode's operand layout.
    pub fn new(opcode: u8, register: u16, value: u8) -> Result<Self> {
        let fits = match WriteForm::of(opcode) {
            Some(WriteForm::Data) => register == 0,
            Some(WriteForm::Register) => register <= u16::from(u8::MAX),
            Some(WriteForm::Wide) => true,
            None => false,
        };
        if !fits {
            return Err(VgmtokError::Format(format!(
                "opcode 0x{opcode:02x} cannot address register 0x{register:x}"
            )));
        }
        Ok(Self {
            opcode,
            register,
            value,
        })
    }

    /// Convenience constructor for an NES APU write.
    #[must_use]
    pub fn nes_apu(register: u8, value: u8) -> Self {
        Self {
            opcode: NES_APU_WRITE,
            register: u16::from(register),
            value,
        }
    }

    /// Returns the opcode this write was encoded with.
    #[must_use]
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Returns the chip addressed by the write.
    #[must_use]
    pub fn chip(&self) -> Chip {
        Chip::from_opcode(self.opcode)
    }

    /// Returns the register (or address) operand.
    #[must_use]
    pub fn register(&self) -> u16 {
        self.register
    }

    /// Returns the value written.
    #[must_use]
    pub fn value(&self) -> u8 {
        self.value
    }

    /// Returns a copy of the write targeting a different register on the same chip.
    pub fn with_register(&self, register: u16) -> Result<Self> {
        Self::new(self.opcode, register, self.value)
    }

    fn form(&self) -> WriteForm {
        // Construction guarantees the opcode has a form.
        WriteForm::of(self.opcode).unwrap_or(WriteForm::Wide)
    }
}

/// Timing wait, in ticks of [`TICK_RATE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wait {
    /// `0x61 nn nn`: explicit sixteen-bit tick count.
    Samples(u16),
    /// `0x62`: one NTSC frame.
    NtscFrame,
    /// `0x63`: one PAL frame.
    PalFrame,
    /// `0x7n`: short wait of `n + 1` ticks, stored as the tick count.
    ///
    /// Only 1 to 16 ticks are encodable; build hand-made values through [`Wait::short`].
    Short(u8),
}

impl Wait {
    /// Shortest and longest tick counts a `0x7n` wait can carry.
    pub const SHORT_TICKS: std::ops::RangeInclusive<u8> = 1..=16;

    /// Builds a `0x7n` wait, rejecting tick counts outside [`Wait::SHORT_TICKS`].
    pub fn short(ticks: u8) -> Result<Self> {
        if Self::SHORT_TICKS.contains(&ticks) {
            Ok(Self::Short(ticks))
        } else {
            Err(VgmtokError::Format(format!(
                "short wait of {ticks} ticks is outside 1..=16"
            )))
        }
    }

    /// Returns the number of ticks covered by the wait.
    #[must_use]
    pub fn ticks(&self) -> u32 {
        match self {
            Self::Samples(n) => u32::from(*n),
            Self::NtscFrame => NTSC_FRAME_TICKS,
            Self::PalFrame => PAL_FRAME_TICKS,
            Self::Short(n) => u32::from(*n),
        }
    }
}

/// One event of a capture stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Chip register write.
    Write(RegisterWrite),
    /// Timing wait.
    Wait(Wait),
    /// `0x8n`: YM2612 DAC write from the data bank followed by a wait of `n` ticks.
    DacWrite {
        /// Ticks waited after the write (0 to 15).
        wait: u8,
    },
    /// `0x67`: bulk sample data for a chip's PCM memory or the DAC data bank.
    DataBlock {
        /// Block type byte.
        kind: u8,
        /// Whether the size field carries the second-chip flag.
        second_chip: bool,
        /// Raw block contents.
        data: Vec<u8>,
    },
    /// `0x68`: copy of data-bank contents into chip RAM.
    PcmRamWrite {
        /// Chip type byte.
        chip_type: u8,
        /// 24-bit read offset into the data bank.
        read_offset: u32,
        /// 24-bit write offset into chip RAM.
        write_offset: u32,
        /// 24-bit transfer size.
        size: u32,
    },
    /// DAC stream control (`0x90`-`0x95`), seek (`0xE0`) and reserved four-operand commands.
    Control {
        /// Command opcode.
        opcode: u8,
        /// Operand bytes, exactly as many as the opcode defines.
        operands: Vec<u8>,
    },
}

impl Command {
    /// Decodes one command from the front of `input`, advancing the cursor past it.
    ///
    /// Returns `Ok(None)` at the end of the stream, either because the input is exhausted or
    /// because the end-of-data marker was read.  Unknown opcodes and truncated operands are
    /// reported as [`VgmtokError::Format`].
    pub fn read(input: &mut &[u8]) -> Result<Option<Self>> {
        let Some((&opcode, rest)) = input.split_first() else {
            return Ok(None);
        };
        *input = rest;

        let command = match opcode {
            END_OF_DATA => return Ok(None),
            0x30..=0x3F | 0x4F | 0x50 => {
                let [value] = take_array::<1>(input, opcode)?;
                Self::Write(RegisterWrite {
                    opcode,
                    register: 0,
                    value,
                })
            }
            0x40..=0x4E | 0x51..=0x5F | 0xA0..=0xBF => {
                let [register, value] = take_array::<2>(input, opcode)?;
                Self::Write(RegisterWrite {
                    opcode,
                    register: u16::from(register),
                    value,
                })
            }
            0xC0..=0xDF => {
                let [low, high, value] = take_array::<3>(input, opcode)?;
                Self::Write(RegisterWrite {
                    opcode,
                    register: u16::from_le_bytes([low, high]),
                    value,
                })
            }
            0x61 => Self::Wait(Wait::Samples(u16::from_le_bytes(take_array::<2>(
                input, opcode,
            )?))),
            0x62 => Self::Wait(Wait::NtscFrame),
            0x63 => Self::Wait(Wait::PalFrame),
            0x70..=0x7F => Self::Wait(Wait::Short((opcode & 0x0F) + 1)),
            0x80..=0x8F => Self::DacWrite {
                wait: opcode & 0x0F,
            },
            DATA_BLOCK => {
                let [compat, kind, s0, s1, s2, s3] = take_array::<6>(input, opcode)?;
                if compat != END_OF_DATA {
                    return Err(VgmtokError::Format(format!(
                        "data block has compatibility byte 0x{compat:02x}, expected 0x66"
                    )));
                }
                let size = u32::from_le_bytes([s0, s1, s2, s3]);
                let len = (size & !SECOND_CHIP_FLAG) as usize;
                let data = take_slice(input, len, opcode)?.to_vec();
                Self::DataBlock {
                    kind,
                    second_chip: size & SECOND_CHIP_FLAG != 0,
                    data,
                }
            }
            PCM_RAM_WRITE => {
                let bytes = take_array::<11>(input, opcode)?;
                if bytes[0] != END_OF_DATA {
                    return Err(VgmtokError::Format(format!(
                        "PCM RAM write has compatibility byte 0x{:02x}, expected 0x66",
                        bytes[0]
                    )));
                }
                Self::PcmRamWrite {
                    chip_type: bytes[1],
                    read_offset: read_u24(&bytes[2..5]),
                    write_offset: read_u24(&bytes[5..8]),
                    size: read_u24(&bytes[8..11]),
                }
            }
            0x90..=0x95 | 0xE0..=0xFF => {
                let len = control_operand_len(opcode);
                let operands = take_slice(input, len, opcode)?.to_vec();
                Self::Control { opcode, operands }
            }
            _ => {
                return Err(VgmtokError::Format(format!(
                    "unknown command opcode 0x{opcode:02x}"
                )))
            }
        };
        Ok(Some(command))
    }

    /// Decodes a standalone payload that must contain exactly one non-bulk command.
    ///
    /// Returns `None` for empty, truncated, over-long, or unknown payloads as well as for the
    /// end-of-data marker and bulk commands.
    #[must_use]
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        let mut cursor = payload;
        match Self::read(&mut cursor) {
            Ok(Some(command)) if cursor.is_empty() && !command.is_bulk() => Some(command),
            _ => None,
        }
    }

    /// Appends the exact byte encoding of the command to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::Write(write) => {
                out.push(write.opcode);
                match write.form() {
                    WriteForm::Data => {}
                    WriteForm::Register => out.push(write.register as u8),
                    WriteForm::Wide => out.extend_from_slice(&write.register.to_le_bytes()),
                }
                out.push(write.value);
            }
            Self::Wait(Wait::Samples(n)) => {
                out.push(0x61);
                out.extend_from_slice(&n.to_le_bytes());
            }
            Self::Wait(Wait::NtscFrame) => out.push(0x62),
            Self::Wait(Wait::PalFrame) => out.push(0x63),
            Self::Wait(Wait::Short(n)) => out.push(0x70 | (n.saturating_sub(1) & 0x0F)),
            Self::DacWrite { wait } => out.push(0x80 | (wait & 0x0F)),
            Self::DataBlock {
                kind,
                second_chip,
                data,
            } => {
                let mut size = data.len() as u32 & !SECOND_CHIP_FLAG;
                if *second_chip {
                    size |= SECOND_CHIP_FLAG;
                }
                out.extend_from_slice(&[DATA_BLOCK, END_OF_DATA, *kind]);
                out.extend_from_slice(&size.to_le_bytes());
                out.extend_from_slice(data);
            }
            Self::PcmRamWrite {
                chip_type,
                read_offset,
                write_offset,
                size,
            } => {
                out.extend_from_slice(&[PCM_RAM_WRITE, END_OF_DATA, *chip_type]);
                out.extend_from_slice(&read_offset.to_le_bytes()[..3]);
                out.extend_from_slice(&write_offset.to_le_bytes()[..3]);
                out.extend_from_slice(&size.to_le_bytes()[..3]);
            }
            Self::Control { opcode, operands } => {
                out.push(*opcode);
                out.extend_from_slice(operands);
            }
        }
    }

    /// Returns the canonical vocabulary payload, or `None` for bulk commands which never take
    /// part in the vocabulary or the token stream.
    #[must_use]
    pub fn payload(&self) -> Option<Vec<u8>> {
        if self.is_bulk() {
            return None;
        }
        let mut out = Vec::with_capacity(4);
        self.encode(&mut out);
        Some(out)
    }

    /// Returns `true` for data blocks and PCM RAM writes.
    #[must_use]
    pub fn is_bulk(&self) -> bool {
        matches!(self, Self::DataBlock { .. } | Self::PcmRamWrite { .. })
    }

    /// Returns `true` for commands that advance playback time.
    #[must_use]
    pub fn is_wait(&self) -> bool {
        matches!(self, Self::Wait(_) | Self::DacWrite { .. })
    }

    /// Returns the number of ticks the command advances playback by.
    #[must_use]
    pub fn ticks(&self) -> u32 {
        match self {
            Self::Wait(wait) => wait.ticks(),
            Self::DacWrite { wait } => u32::from(*wait),
            _ => 0,
        }
    }
}

fn control_operand_len(opcode: u8) -> usize {
    match opcode {
        0x90 | 0x91 | 0x95 => 4,
        0x92 => 5,
        0x93 => 10,
        0x94 => 1,
        _ => 4,
    }
}

fn read_u24(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])
}

fn take_slice<'a>(input: &mut &'a [u8], len: usize, opcode: u8) -> Result<&'a [u8]> {
    if input.len() < len {
        return Err(VgmtokError::Format(format!(
            "command 0x{opcode:02x} truncated: needs {len} operand bytes, {} available",
            input.len()
        )));
    }
    let (head, tail) = input.split_at(len);
    *input = tail;
    Ok(head)
}

fn take_array<const N: usize>(input: &mut &[u8], opcode: u8) -> Result<[u8; N]> {
    let bytes = take_slice(input, N, opcode)?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}
