// ABOUTME: OSC message with typed append API and lazily cached wire encoding
// ABOUTME: Arguments are views into one contiguous host-order data buffer

use crate::error::Error;
use crate::protocol::argument::{ArgRef, ArgType, ArgValue, Argument};
use crate::protocol::{blob_padding, time, trailing_zeros};
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

/// An Open Sound Control message: an address plus an ordered list of arguments.
///
/// Appended values are stored in host byte order in a single data buffer.
/// The wire form is built on the first call to [`Message::shared_buffer`]
/// and cached until the next mutation.
#[derive(Debug, Clone, Default)]
pub struct Message {
    address: String,
    data: Vec<u8>,
    arguments: Vec<Argument>,
    cache: OnceLock<Arc<Vec<u8>>>,
    sender: Option<SocketAddr>,
    timetag: Option<u64>,
}

impl Message {
    /// Create an empty message with the given address
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Message address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Replace the address
    pub fn set_address(&mut self, address: impl Into<String>) {
        self.invalidate();
        self.address = address.into();
    }

    /// Whether the address is usable on the wire (non-empty, starts with '/')
    pub fn has_valid_address(&self) -> bool {
        self.address.starts_with('/')
    }

    /// Endpoint this message was received from. `None` for locally built messages.
    pub fn sender_addr(&self) -> Option<SocketAddr> {
        self.sender
    }

    pub(crate) fn set_sender(&mut self, sender: SocketAddr) {
        self.sender = Some(sender);
    }

    /// Time tag of the enclosing bundle, when the message was decoded from one
    pub fn timetag(&self) -> Option<u64> {
        self.timetag
    }

    pub(crate) fn set_timetag(&mut self, timetag: u64) {
        self.timetag = Some(timetag);
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    /// True when the message has no arguments
    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    /// Argument views, in append order
    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    fn invalidate(&mut self) {
        self.cache.take();
    }

    /// Record an argument whose payload is `bytes` followed by `padding` zero bytes.
    pub(crate) fn push_argument(
        &mut self,
        arg_type: ArgType,
        size: usize,
        bytes: &[u8],
        padding: usize,
    ) {
        self.invalidate();
        if !arg_type.has_payload() {
            self.arguments.push(Argument::without_payload(arg_type));
            return;
        }
        self.arguments
            .push(Argument::new(arg_type, self.data.len(), size));
        self.data.extend_from_slice(bytes);
        self.data.resize(self.data.len() + padding, 0);
    }

    /// Append a 32-bit integer
    pub fn append_int32(&mut self, v: i32) {
        self.push_argument(ArgType::Int32, 4, &v.to_ne_bytes(), 0);
    }

    /// Append a 32-bit float
    pub fn append_float(&mut self, v: f32) {
        self.push_argument(ArgType::Float, 4, &v.to_ne_bytes(), 0);
    }

    /// Append a 64-bit float
    pub fn append_double(&mut self, v: f64) {
        self.push_argument(ArgType::Double, 8, &v.to_ne_bytes(), 0);
    }

    /// Append a 64-bit integer
    pub fn append_int64(&mut self, v: i64) {
        self.push_argument(ArgType::Int64, 8, &v.to_ne_bytes(), 0);
    }

    /// Append an NTP time tag
    pub fn append_time_tag(&mut self, v: u64) {
        self.push_argument(ArgType::TimeTag, 8, &v.to_ne_bytes(), 0);
    }

    /// Append the current system time as an NTP time tag
    pub fn append_current_time(&mut self) {
        self.append_time_tag(time::current_ntp_time(0));
    }

    /// Append a string. It is NUL-terminated and padded to a 4-byte boundary.
    pub fn append_string(&mut self, v: &str) {
        let padding = trailing_zeros(v.len());
        self.push_argument(ArgType::String, v.len() + padding, v.as_bytes(), padding);
    }

    /// Append a blob. The stored form is a 4-byte length followed by the bytes.
    pub fn append_blob(&mut self, blob: &[u8]) {
        self.invalidate();
        self.arguments
            .push(Argument::new(ArgType::Blob, self.data.len(), blob.len()));
        self.data
            .extend_from_slice(&(blob.len() as u32).to_ne_bytes());
        self.data.extend_from_slice(blob);
        self.data
            .resize(self.data.len() + blob_padding(blob.len()), 0);
    }

    /// Append a boolean, carried only by the `T`/`F` type tag
    pub fn append_bool(&mut self, v: bool) {
        let arg_type = if v { ArgType::True } else { ArgType::False };
        self.push_argument(arg_type, 0, &[], 0);
    }

    /// Append a character, sent as a 32-bit value
    pub fn append_char(&mut self, v: char) {
        self.push_argument(ArgType::Char, 4, &(v as u32).to_ne_bytes(), 0);
    }

    /// Append a 4-byte MIDI message
    pub fn append_midi(&mut self, port: u8, status: u8, data1: u8, data2: u8) {
        self.push_argument(ArgType::Midi, 4, &[port, status, data1, data2], 0);
    }

    /// Append a nil argument
    pub fn append_nil(&mut self) {
        self.push_argument(ArgType::Nil, 0, &[], 0);
    }

    /// Append an impulse argument
    pub fn append_impulse(&mut self) {
        self.push_argument(ArgType::Impulse, 0, &[], 0);
    }

    /// Append an owned value of any type
    pub fn append_value(&mut self, value: ArgValue) {
        match value {
            ArgValue::Int32(v) => self.append_int32(v),
            ArgValue::Float(v) => self.append_float(v),
            ArgValue::Double(v) => self.append_double(v),
            ArgValue::String(v) => self.append_string(&v),
            ArgValue::Blob(v) => self.append_blob(&v),
            ArgValue::Midi([port, status, data1, data2]) => {
                self.append_midi(port, status, data1, data2)
            }
            ArgValue::TimeTag(v) => self.append_time_tag(v),
            ArgValue::Int64(v) => self.append_int64(v),
            ArgValue::Bool(v) => self.append_bool(v),
            ArgValue::Char(v) => self.append_char(v),
            ArgValue::Nil => self.append_nil(),
            ArgValue::Impulse => self.append_impulse(),
        }
    }

    /// Append anything convertible into an [`ArgValue`]
    pub fn append(&mut self, value: impl Into<ArgValue>) {
        self.append_value(value.into());
    }

    /// Remove the address and every argument
    pub fn clear(&mut self) {
        self.invalidate();
        self.address.clear();
        self.arguments.clear();
        self.data.clear();
    }

    /// Borrow argument `index`
    pub fn arg(&self, index: usize) -> Result<ArgRef<'_>, Error> {
        let argument = self
            .arguments
            .get(index)
            .ok_or_else(|| Error::IndexOutOfBounds {
                address: self.address.clone(),
                index,
            })?;
        Ok(ArgRef {
            message: self,
            argument,
        })
    }

    /// Iterate over all arguments
    pub fn iter(&self) -> impl Iterator<Item = ArgRef<'_>> {
        self.arguments.iter().map(move |argument| ArgRef {
            message: self,
            argument,
        })
    }

    /// Type of argument `index`
    pub fn arg_type(&self, index: usize) -> Result<ArgType, Error> {
        self.arg(index).map(|a| a.arg_type())
    }

    /// `i` argument at `index`
    pub fn arg_int32(&self, index: usize) -> Result<i32, Error> {
        self.arg(index)?.int32()
    }

    /// `f` argument at `index`
    pub fn arg_float(&self, index: usize) -> Result<f32, Error> {
        self.arg(index)?.flt()
    }

    /// `d` argument at `index`
    pub fn arg_double(&self, index: usize) -> Result<f64, Error> {
        self.arg(index)?.dbl()
    }

    /// `h` argument at `index`
    pub fn arg_int64(&self, index: usize) -> Result<i64, Error> {
        self.arg(index)?.int64()
    }

    /// `t` argument at `index`
    pub fn arg_time(&self, index: usize) -> Result<u64, Error> {
        self.arg(index)?.time_tag()
    }

    /// `T`/`F` argument at `index`
    pub fn arg_bool(&self, index: usize) -> Result<bool, Error> {
        self.arg(index)?.boolean()
    }

    /// `c` argument at `index`
    pub fn arg_char(&self, index: usize) -> Result<char, Error> {
        self.arg(index)?.character()
    }

    /// `m` argument at `index` as `[port, status, data1, data2]`
    pub fn arg_midi(&self, index: usize) -> Result<[u8; 4], Error> {
        self.arg(index)?.midi()
    }

    /// `s` argument at `index`
    pub fn arg_string(&self, index: usize) -> Result<String, Error> {
        self.arg(index)?.string()
    }

    /// Borrowed `s` argument bytes at `index`, including NUL padding
    pub fn arg_string_data(&self, index: usize) -> Result<&[u8], Error> {
        self.arg(index)?.string_data()
    }

    /// `b` argument at `index`
    pub fn arg_blob(&self, index: usize) -> Result<Vec<u8>, Error> {
        self.arg(index)?.blob()
    }

    /// Borrowed `b` argument payload at `index`
    pub fn arg_blob_data(&self, index: usize) -> Result<&[u8], Error> {
        self.arg(index)?.blob_data()
    }

    /// Owned copies of every argument value
    pub fn values(&self) -> Vec<ArgValue> {
        self.iter().map(|a| a.value()).collect()
    }

    /// Type tags of all arguments, without the leading ','
    pub fn type_tag_string(&self) -> String {
        self.arguments
            .iter()
            .map(|a| a.arg_type.to_tag() as char)
            .collect()
    }

    /// Wire form: 4-byte big-endian size, padded address, padded type tags,
    /// big-endian payload. Built once per mutation and shared afterwards.
    pub fn shared_buffer(&self) -> Arc<Vec<u8>> {
        Arc::clone(self.cache.get_or_init(|| Arc::new(self.encode())))
    }

    /// Size of the wire form, including the 4-byte size field
    pub fn packet_size(&self) -> usize {
        self.shared_buffer().len()
    }

    fn encode(&self) -> Vec<u8> {
        let address_len = self.address.len() + trailing_zeros(self.address.len());
        // one extra for the ','
        let types_len = self.arguments.len() + 1;
        let types_padded = types_len + trailing_zeros(types_len);
        let message_size = address_len + types_padded + self.data.len();

        let mut out = Vec::with_capacity(4 + message_size);
        out.extend_from_slice(&(message_size as u32).to_be_bytes());
        out.extend_from_slice(self.address.as_bytes());
        out.resize(4 + address_len, 0);
        out.push(b',');
        out.extend(self.arguments.iter().map(|a| a.arg_type.to_tag()));
        out.resize(4 + address_len + types_padded, 0);

        let payload_start = out.len();
        out.extend_from_slice(&self.data);
        let payload = &mut out[payload_start..];
        for argument in &self.arguments {
            argument.swap_endian(payload);
        }
        out
    }
}

/// Equal when address, argument views (type, offset, size) and raw data
/// buffers all match. Sender and bundle time tag are not compared.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.arguments == other.arguments
            && self.data == other.data
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Address: {}", self.address)?;
        if let Some(sender) = self.sender {
            writeln!(f, "Sender Ip Address: {} Port: {}", sender.ip(), sender.port())?;
        }
        for arg in self.iter() {
            writeln!(f, "\t{}", arg)?;
        }
        Ok(())
    }
}

impl From<i32> for ArgValue {
    fn from(v: i32) -> Self {
        ArgValue::Int32(v)
    }
}

impl From<f32> for ArgValue {
    fn from(v: f32) -> Self {
        ArgValue::Float(v)
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        ArgValue::Double(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int64(v)
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Bool(v)
    }
}

impl From<char> for ArgValue {
    fn from(v: char) -> Self {
        ArgValue::Char(v)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::String(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::String(v)
    }
}

impl From<Vec<u8>> for ArgValue {
    fn from(v: Vec<u8>) -> Self {
        ArgValue::Blob(v)
    }
}
