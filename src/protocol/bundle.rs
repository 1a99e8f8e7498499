// ABOUTME: OSC bundle container
// ABOUTME: Packs serialized messages and bundles behind a #bundle header and time tag

use crate::protocol::message::Message;
use crate::protocol::time::IMMEDIATE;
use crate::protocol::BUNDLE_TAG;
use std::sync::Arc;

/// Offset of the time tag: 4-byte size field + "#bundle\0"
const TIMETAG_OFFSET: usize = 4 + BUNDLE_TAG.len();

/// Size of the header: size field, magic and time tag
const HEADER_LEN: usize = TIMETAG_OFFSET + 8;

/// A group of messages and bundles sharing one time tag.
///
/// Elements are copied in when appended; later changes to a message do not
/// reach the bundle. The receivers in this crate dispatch bundle contents
/// immediately regardless of the time tag.
#[derive(Debug, Clone)]
pub struct Bundle {
    buffer: Vec<u8>,
}

impl Bundle {
    /// Create an empty bundle timed "immediately"
    pub fn new() -> Self {
        let mut buffer = vec![0u8; HEADER_LEN];
        buffer[4..TIMETAG_OFFSET].copy_from_slice(BUNDLE_TAG);
        buffer[TIMETAG_OFFSET..HEADER_LEN].copy_from_slice(&IMMEDIATE.to_be_bytes());
        Self { buffer }
    }

    /// Append a message. Its wire form already starts with its own size.
    pub fn append_message(&mut self, message: &Message) {
        self.buffer.extend_from_slice(&message.shared_buffer());
    }

    /// Append a nested bundle
    pub fn append_bundle(&mut self, bundle: &Bundle) {
        self.buffer.extend_from_slice(&bundle.shared_buffer());
    }

    /// Set the NTP time tag
    pub fn set_timetag(&mut self, ntp_time: u64) {
        self.buffer[TIMETAG_OFFSET..HEADER_LEN].copy_from_slice(&ntp_time.to_be_bytes());
    }

    /// Current NTP time tag
    pub fn timetag(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.buffer[TIMETAG_OFFSET..HEADER_LEN]);
        u64::from_be_bytes(raw)
    }

    /// True when nothing has been appended
    pub fn is_empty(&self) -> bool {
        self.buffer.len() == HEADER_LEN
    }

    /// Size of the complete packet, including the 4-byte size field
    pub fn packet_size(&self) -> usize {
        self.buffer.len()
    }

    /// Drop all elements and reset the time tag to immediate
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Wire form with the size field filled in
    pub fn shared_buffer(&self) -> Arc<Vec<u8>> {
        let mut buffer = self.buffer.clone();
        let size = (buffer.len() - 4) as u32;
        buffer[0..4].copy_from_slice(&size.to_be_bytes());
        Arc::new(buffer)
    }
}

impl Default for Bundle {
    fn default() -> Self {
        Self::new()
    }
}
