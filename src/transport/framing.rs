// ABOUTME: Stream framing strategies for OSC over TCP
// ABOUTME: 4-byte length prefix (OSC 1.0) and SLIP double-END encoding (OSC 1.1)

use std::fmt;

/// SLIP frame delimiter
pub const SLIP_END: u8 = 0xC0;
/// SLIP escape byte
pub const SLIP_ESC: u8 = 0xDB;
/// Escaped END
pub const SLIP_ESC_END: u8 = 0xDC;
/// Escaped ESC
pub const SLIP_ESC_ESC: u8 = 0xDD;

/// Delimits OSC packets on a byte stream.
///
/// Packets handed to [`encode`](PacketFraming::encode) are codec output and
/// start with their 4-byte big-endian size. [`decode`](PacketFraming::decode)
/// returns the bare OSC packet, ready for the decoder.
pub trait PacketFraming: Send + Sync + fmt::Debug {
    /// Wrap one packet for the wire
    fn encode(&self, packet: &[u8]) -> Vec<u8>;

    /// Unwrap one complete frame as returned by `message_complete`
    fn decode(&self, frame: &[u8]) -> Vec<u8>;

    /// Length of the first complete frame at the front of `buffer`, or `None`
    /// while more bytes are needed
    fn message_complete(&self, buffer: &[u8]) -> Option<usize>;
}

/// OSC 1.0 stream framing: the packet's own size field is the frame header
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthPrefixFraming;

impl PacketFraming for LengthPrefixFraming {
    fn encode(&self, packet: &[u8]) -> Vec<u8> {
        packet.to_vec()
    }

    fn decode(&self, frame: &[u8]) -> Vec<u8> {
        frame.get(4..).unwrap_or_default().to_vec()
    }

    fn message_complete(&self, buffer: &[u8]) -> Option<usize> {
        let (size, rest) = buffer.split_first_chunk::<4>()?;
        let size = u32::from_be_bytes(*size) as usize;
        (size <= rest.len()).then_some(size + 4)
    }
}

/// OSC 1.1 stream framing: SLIP with an END byte on both sides of a packet
#[derive(Debug, Clone, Copy, Default)]
pub struct SlipFraming;

impl PacketFraming for SlipFraming {
    fn encode(&self, packet: &[u8]) -> Vec<u8> {
        let body = packet.get(4..).unwrap_or_default();
        let mut frame = Vec::with_capacity(body.len() + 2);
        frame.push(SLIP_END);
        for &byte in body {
            match byte {
                SLIP_END => frame.extend_from_slice(&[SLIP_ESC, SLIP_ESC_END]),
                SLIP_ESC => frame.extend_from_slice(&[SLIP_ESC, SLIP_ESC_ESC]),
                other => frame.push(other),
            }
        }
        frame.push(SLIP_END);
        frame
    }

    fn decode(&self, frame: &[u8]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(frame.len());
        let mut bytes = frame.iter();
        while let Some(&byte) = bytes.next() {
            match byte {
                SLIP_END => {}
                SLIP_ESC => match bytes.next() {
                    Some(&SLIP_ESC_END) => packet.push(SLIP_END),
                    Some(&SLIP_ESC_ESC) => packet.push(SLIP_ESC),
                    // protocol violation: drop the escape
                    _ => {}
                },
                other => packet.push(other),
            }
        }
        packet
    }

    fn message_complete(&self, buffer: &[u8]) -> Option<usize> {
        // byte 0 is the opening END (or data after a lost one)
        buffer
            .iter()
            .skip(1)
            .position(|&b| b == SLIP_END)
            .map(|i| i + 2)
    }
}
