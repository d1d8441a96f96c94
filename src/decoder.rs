//! Generation-side decoding of sampled token streams back into captures.
//!
//! The sequence model is an external collaborator reached through [`TokenSampler`].  Tokens
//! are decoded as they arrive: the sentinel ends a sample once at least one command has been
//! accepted, and any token that does not decode to a command ends the sample early without
//! being kept.

use std::fs;
use std::path::Path;

use crate::dataset::decode_tokens;
use crate::error::{Result, VgmtokError};
use crate::vgm::{Command, VgmFile, VgmHeader};
use crate::vocab::{TokenId, Vocabulary};

/// Source of sampled tokens, typically a sequence model behind a sampling policy.
pub trait TokenSampler {
    /// Draws the next token given every token produced so far, prompt included.
    ///
    /// Returning `Ok(None)` signals that the sampler has nothing more to offer.
    fn next_token(&mut self, context: &[TokenId]) -> Result<Option<TokenId>>;
}

/// Sampler replaying a recorded token stream.
#[derive(Debug, Clone)]
pub struct ReplaySampler {
    tokens: std::vec::IntoIter<TokenId>,
}

impl ReplaySampler {
    /// Replays the given tokens in order.
    #[must_use]
    pub fn new(tokens: Vec<TokenId>) -> Self {
        Self {
            tokens: tokens.into_iter(),
        }
    }

    /// Loads a recording: raw little-endian `u16` ids for `.bin` files, otherwise
    /// whitespace-separated decimal ids.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let is_binary = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("bin"));
        let tokens = if is_binary {
            let bytes =
                fs::read(path).map_err(|err| VgmtokError::io(err, Some(path.to_path_buf())))?;
            decode_tokens(&bytes)
        } else {
            let text = fs::read_to_string(path)
                .map_err(|err| VgmtokError::io(err, Some(path.to_path_buf())))?;
            parse_token_list(&text)
                .map_err(|err| VgmtokError::Serialization(format!("{}: {err}", path.display())))?
        };
        Ok(Self::new(tokens))
    }
}

impl TokenSampler for ReplaySampler {
    fn next_token(&mut self, _context: &[TokenId]) -> Result<Option<TokenId>> {
        Ok(self.tokens.next())
    }
}

/// Parses whitespace-separated decimal token ids.
pub fn parse_token_list(text: &str) -> Result<Vec<TokenId>, String> {
    text.split_whitespace()
        .map(|part| {
            part.parse::<TokenId>()
                .map_err(|err| format!("invalid token id `{part}`: {err}"))
        })
        .collect()
}

/// Reason a sample stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The sentinel arrived after at least one accepted command.
    Terminator,
    /// A token had no decodable vocabulary entry; it was discarded.
    InvalidToken(TokenId),
    /// The token budget or the sampler ran out.
    Exhausted,
}

/// Commands recovered from one sample.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSample {
    /// Accepted commands in arrival order.
    pub commands: Vec<Command>,
    /// Ticks covered by the accepted wait commands.
    pub ticks: u64,
    /// Why decoding stopped.
    pub stop: StopReason,
}

impl DecodedSample {
    /// Number of accepted commands.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.commands.len()
    }

    /// Wraps the accepted commands in a capture, reusing `header` when given.
    #[must_use]
    pub fn into_vgm(self, header: Option<VgmHeader>) -> VgmFile {
        let mut vgm = header.map_or_else(VgmFile::new, VgmFile::with_header);
        for command in self.commands {
            vgm.push(command);
        }
        vgm
    }
}

/// Incremental decoder for a single sample.
#[derive(Debug)]
pub struct TokenStreamDecoder<'v> {
    vocab: &'v Vocabulary,
    commands: Vec<Command>,
    ticks: u64,
}

impl<'v> TokenStreamDecoder<'v> {
    /// Starts an empty sample.
    pub fn new(vocab: &'v Vocabulary) -> Self {
        Self {
            vocab,
            commands: Vec::new(),
            ticks: 0,
        }
    }

    /// Feeds one token, returning the stop reason if the sample is complete.
    pub fn push(&mut self, token: TokenId) -> Option<StopReason> {
        if token == self.vocab.end_id() {
            // A leading sentinel means the sample has not started yet.
            return (!self.commands.is_empty()).then_some(StopReason::Terminator);
        }
        match self.vocab.command(token) {
            Some(command) => {
                self.ticks += u64::from(command.ticks());
                self.commands.push(command);
                None
            }
            None => Some(StopReason::InvalidToken(token)),
        }
    }

    /// Number of commands accepted so far.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.commands.len()
    }

    /// Finishes the sample.
    pub fn finish(self, stop: StopReason) -> DecodedSample {
        DecodedSample {
            commands: self.commands,
            ticks: self.ticks,
            stop,
        }
    }
}

/// Decodes a complete token sequence.
pub fn decode_stream<I>(vocab: &Vocabulary, tokens: I) -> DecodedSample
where
    I: IntoIterator<Item = TokenId>,
{
    let mut decoder = TokenStreamDecoder::new(vocab);
    for token in tokens {
        if let Some(stop) = decoder.push(token) {
            return decoder.finish(stop);
        }
    }
    decoder.finish(StopReason::Exhausted)
}

/// Decodes `prompt` and then draws up to `max_new_tokens` tokens from `sampler`, stopping
/// early on the sentinel or an undecodable token.
pub fn generate<S>(
    vocab: &Vocabulary,
    sampler: &mut S,
    prompt: &[TokenId],
    max_new_tokens: usize,
) -> Result<DecodedSample>
where
    S: TokenSampler + ?Sized,
{
    let mut decoder = TokenStreamDecoder::new(vocab);
    for &token in prompt {
        if let Some(stop) = decoder.push(token) {
            return Ok(decoder.finish(stop));
        }
    }
    let mut context = prompt.to_vec();
    for _ in 0..max_new_tokens {
        let Some(token) = sampler.next_token(&context)? else {
            break;
        };
        context.push(token);
        if let Some(stop) = decoder.push(token) {
            return Ok(decoder.finish(stop));
        }
    }
    Ok(decoder.finish(StopReason::Exhausted))
}

/// Prompt used when no priming capture is given: a lone sentinel.
#[must_use]
pub fn default_prompt(vocab: &Vocabulary) -> Vec<TokenId> {
    vec![vocab.end_id()]
}

/// Converts the start of a capture into prompt tokens, stopping once `start_ticks` ticks
/// have been covered.  Bulk commands are skipped; any other command missing from the
/// vocabulary is a [`VgmtokError::Consistency`] error.
pub fn prime_tokens(vgm: &VgmFile, vocab: &Vocabulary, start_ticks: u64) -> Result<Vec<TokenId>> {
    let mut tokens = Vec::new();
    let mut ticks = 0u64;
    for command in vgm.commands() {
        if command.is_bulk() {
            continue;
        }
        ticks += u64::from(command.ticks());
        let token = vocab.token_for(command).ok_or_else(|| {
            VgmtokError::Consistency(format!(
                "priming command {command:?} has no vocabulary entry"
            ))
        })?;
        tokens.push(token);
        if ticks >= start_ticks {
            break;
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vgm::{RegisterWrite, Wait};
    use tempfile::tempdir;

    // *END*=0, 62=1, 63=2, b40030=3, b40430=4
    fn vocab() -> Vocabulary {
        Vocabulary::from_keys(["62", "63", "b40030", "b40430"].map(String::from)).expect("vocab")
    }

    #[test]
    fn unknown_token_discards_rest_of_sample() {
        let vocab = vocab();
        let unknown = vocab.len() as TokenId;
        let sample = decode_stream(&vocab, [3, 1, unknown, 4]);
        assert_eq!(sample.accepted(), 2);
        assert_eq!(sample.ticks, 735);
        assert_eq!(sample.stop, StopReason::InvalidToken(unknown));
        assert_eq!(
            sample.commands,
            vec![
                Command::Write(RegisterWrite::nes_apu(0, 0x30)),
                Command::Wait(Wait::NtscFrame)
            ]
        );
    }

    #[test]
    fn undecodable_entry_stops_like_unknown_token() {
        let vocab =
            Vocabulary::from_entries(["*END*", "62", "zz"].map(String::from).to_vec()).expect("v");
        let sample = decode_stream(&vocab, [1, 2, 1]);
        assert_eq!(sample.accepted(), 1);
        assert_eq!(sample.stop, StopReason::InvalidToken(2));
    }

    #[test]
    fn leading_sentinel_is_skipped() {
        let vocab = vocab();
        let end = vocab.end_id();
        let sample = decode_stream(&vocab, [end, end, 2, 2, end, 1]);
        assert_eq!(sample.accepted(), 2);
        assert_eq!(sample.ticks, 2 * 882);
        assert_eq!(sample.stop, StopReason::Terminator);
    }

    #[test]
    fn generate_honours_budget_and_prompt() {
        let vocab = vocab();
        let mut sampler = ReplaySampler::new(vec![1, 1, 1, 1]);
        let sample =
            generate(&vocab, &mut sampler, &default_prompt(&vocab), 3).expect("generate");
        assert_eq!(sample.accepted(), 3);
        assert_eq!(sample.stop, StopReason::Exhausted);

        let mut sampler = ReplaySampler::new(vec![2, vocab.end_id(), 1]);
        let sample = generate(&vocab, &mut sampler, &[3, 4], 10).expect("generate");
        assert_eq!(sample.accepted(), 3);
        assert_eq!(sample.stop, StopReason::Terminator);
    }

    #[test]
    fn sampler_sees_growing_context() {
        struct Echo(Vec<usize>);
        impl TokenSampler for Echo {
            fn next_token(&mut self, context: &[TokenId]) -> Result<Option<TokenId>> {
                self.0.push(context.len());
                Ok(Some(1))
            }
        }
        let vocab = vocab();
        let mut sampler = Echo(Vec::new());
        let sample = generate(&vocab, &mut sampler, &[0], 3).expect("generate");
        assert_eq!(sample.accepted(), 3);
        assert_eq!(sampler.0, vec![1, 2, 3]);
    }

    #[test]
    fn priming_stops_at_tick_budget() {
        let vocab = vocab();
        let vgm = VgmFile::from_commands(vec![
            Command::Write(RegisterWrite::nes_apu(0, 0x30)),
            Command::DataBlock {
                kind: 0,
                second_chip: false,
                data: vec![1],
            },
            Command::Wait(Wait::NtscFrame),
            Command::Write(RegisterWrite::nes_apu(4, 0x30)),
            Command::Wait(Wait::PalFrame),
            Command::Wait(Wait::PalFrame),
        ]);
        assert_eq!(prime_tokens(&vgm, &vocab, 1000).expect("prime"), vec![3, 1, 4, 2]);
        assert_eq!(prime_tokens(&vgm, &vocab, 1).expect("prime"), vec![3, 1]);

        let foreign = VgmFile::from_commands(vec![Command::Wait(Wait::Samples(5))]);
        assert!(matches!(
            prime_tokens(&foreign, &vocab, 10),
            Err(VgmtokError::Consistency(_))
        ));
    }

    #[test]
    fn replay_sampler_reads_text_and_binary() {
        let dir = tempdir().expect("tempdir");
        let text = dir.path().join("tokens.txt");
        let binary = dir.path().join("tokens.bin");
        fs::write(&text, "3 1\n4\t0\n").expect("write text");
        fs::write(&binary, [3u8, 0, 1, 0, 4, 0, 0, 0]).expect("write bin");
        for path in [&text, &binary] {
            let mut sampler = ReplaySampler::from_file(path).expect("load");
            let mut seen = Vec::new();
            while let Some(token) = sampler.next_token(&[]).expect("next") {
                seen.push(token);
            }
            assert_eq!(seen, vec![3, 1, 4, 0]);
        }
        fs::write(&text, "3 x").expect("write bad");
        assert!(ReplaySampler::from_file(&text).is_err());
    }

    #[test]
    fn decoded_sample_becomes_capture() {
        let vocab = vocab();
        let sample = decode_stream(&vocab, [3, 1, 0]);
        let vgm = sample.into_vgm(None);
        assert_eq!(vgm.commands().len(), 2);
        assert_eq!(vgm.total_duration(), 735);
    }
}
