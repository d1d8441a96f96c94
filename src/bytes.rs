//! Utilities for converting between command payloads and their vocabulary text form.

use crate::vgm::Command;

/// Converts a canonical payload into the lowercase hex text stored in the vocabulary.
#[must_use]
pub fn payload_to_hex(payload: &[u8]) -> String {
    hex::encode(payload)
}

/// Parses a vocabulary line back into payload bytes, returning `None` for non-hex text.
#[must_use]
pub fn hex_to_payload(text: &str) -> Option<Vec<u8>> {
    hex::decode(text).ok()
}

/// Returns the vocabulary text of a command, or `None` for bulk commands.
#[must_use]
pub fn command_key(command: &Command) -> Option<String> {
    command.payload().map(|payload| payload_to_hex(&payload))
}

/// Decodes vocabulary text into a command, returning `None` when the text is not valid hex or
/// does not hold exactly one vocabulary-eligible command.
#[must_use]
pub fn key_to_command(text: &str) -> Option<Command> {
    hex_to_payload(text).and_then(|payload| Command::from_payload(&payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vgm::{RegisterWrite, Wait};

    #[test]
    fn keys_are_lowercase_hex() {
        let write = Command::Write(RegisterWrite::nes_apu(0x0A, 0xFE));
        assert_eq!(command_key(&write).as_deref(), Some("b40afe"));
        assert_eq!(
            command_key(&Command::Wait(Wait::Samples(0x1234))).as_deref(),
            Some("613412")
        );
    }

    #[test]
    fn invalid_text_does_not_decode() {
        assert_eq!(hex_to_payload("zz"), None);
        assert_eq!(hex_to_payload("abc"), None);
        assert_eq!(key_to_command("*END*"), None);
        assert_eq!(key_to_command("00"), None);
        assert_eq!(key_to_command("62"), Some(Command::Wait(Wait::NtscFrame)));
    }

    #[test]
    fn bulk_commands_have_no_key() {
        let block = Command::DataBlock {
            kind: 0,
            second_chip: false,
            data: vec![1, 2, 3],
        };
        assert_eq!(command_key(&block), None);
    }
}
