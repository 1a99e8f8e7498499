// ABOUTME: Protocol module for Open Sound Control
// ABOUTME: Message/bundle data model, wire codec, pattern matching and time tags

/// Argument types, views into a message buffer and owned values
pub mod argument;
/// Bundle container
pub mod bundle;
/// Packet decoding into messages
pub mod decoder;
/// OSC message with typed append and accessors
pub mod message;
/// Address pattern matching
pub mod pattern;
/// NTP time tags
pub mod time;

pub use argument::{ArgRef, ArgType, ArgValue, Argument};
pub use bundle::Bundle;
pub use decoder::{decode_data, decode_message, decode_packet};
pub use message::Message;
pub use pattern::pattern_match;

/// Magic string opening every bundle, NUL included
pub const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// Number of NUL bytes appended to an address, type tag list or string of
/// `len` bytes. Always at least one, so an aligned string gets four.
#[inline]
pub fn trailing_zeros(len: usize) -> usize {
    4 - (len % 4)
}

/// Padding after blob bytes, bringing them to a 4-byte boundary (0..=3)
#[inline]
pub fn blob_padding(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_always_terminates() {
        for len in 0..64 {
            let padded = len + trailing_zeros(len);
            assert_eq!(padded % 4, 0);
            assert!(padded >= len + 1);
        }
    }

    #[test]
    fn test_blob_padding() {
        assert_eq!(blob_padding(0), 0);
        assert_eq!(blob_padding(1), 3);
        assert_eq!(blob_padding(4), 0);
        assert_eq!(blob_padding(7), 1);
    }
}
