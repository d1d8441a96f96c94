//! Channel-swap augmentation.
//!
//! The NES APU has two identical pulse channels whose registers occupy `0x00..=0x03` and
//! `0x04..=0x07`.  Exchanging the two register blocks yields the same music on swapped
//! channels, so every capture contributes a second training example.  The rule is its own
//! inverse and leaves every other command untouched.

use crate::vgm::{Chip, Command};

/// Register block of the first pulse channel.
pub const PULSE1_REGISTERS: std::ops::RangeInclusive<u16> = 0x00..=0x03;
/// Register block of the second pulse channel.
pub const PULSE2_REGISTERS: std::ops::RangeInclusive<u16> = 0x04..=0x07;
const CHANNEL_STRIDE: u16 = 0x04;

/// Rewrites a single command, moving pulse 1 writes to pulse 2 and vice versa.
#[must_use]
pub fn swap_channels(command: &Command) -> Command {
    if let Command::Write(write) = command {
        if write.chip() == Chip::NesApu {
            let register = write.register();
            let swapped = if PULSE1_REGISTERS.contains(&register) {
                Some(register + CHANNEL_STRIDE)
            } else if PULSE2_REGISTERS.contains(&register) {
                Some(register - CHANNEL_STRIDE)
            } else {
                None
            };
            if let Some(target) = swapped.and_then(|r| write.with_register(r).ok()) {
                return Command::Write(target);
            }
        }
    }
    command.clone()
}

/// Iterator adaptor applying [`swap_channels`] lazily, preserving order.
#[derive(Debug, Clone)]
pub struct SwapChannels<I> {
    inner: I,
}

impl<'a, I> Iterator for SwapChannels<I>
where
    I: Iterator<Item = &'a Command>,
{
    type Item = Command;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(swap_channels)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Extension trait exposing the channel swap on any iterator of borrowed commands.
pub trait CommandStreamExt<'a>: Iterator<Item = &'a Command> + Sized {
    /// Wraps the iterator in a [`SwapChannels`] adaptor.
    fn swap_channels(self) -> SwapChannels<Self> {
        SwapChannels { inner: self }
    }
}

impl<'a, I> CommandStreamExt<'a> for I where I: Iterator<Item = &'a Command> {}

/// The two renditions each capture contributes to the vocabulary and the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// Commands as recorded.
    Original,
    /// Commands with the pulse channels exchanged.
    Swapped,
}

impl Variant {
    /// Both variants, in the order work units are produced.
    pub const ALL: [Variant; 2] = [Variant::Original, Variant::Swapped];

    /// Produces the variant's command sequence.
    pub fn apply<'a>(self, commands: &'a [Command]) -> Box<dyn Iterator<Item = Command> + 'a> {
        match self {
            Variant::Original => Box::new(commands.iter().cloned()),
            Variant::Swapped => Box::new(commands.iter().swap_channels()),
        }
    }
}
