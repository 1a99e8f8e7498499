// ABOUTME: OSC argument types and argument views into a message buffer
// ABOUTME: Typed accessors with exact type checking, plus an owned value model

use crate::error::Error;
use crate::protocol::message::Message;
use serde::{Serialize, Serializer};
use std::fmt;

/// Offset used by arguments that carry no payload bytes (T, F, N, I)
pub(crate) const NO_PAYLOAD: usize = usize::MAX;

/// Argument types supported by [`Message`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgType {
    /// 32-bit signed integer (`i`)
    Int32,
    /// 32-bit IEEE float (`f`)
    Float,
    /// 64-bit IEEE float (`d`)
    Double,
    /// NUL-terminated string (`s`)
    String,
    /// Length-prefixed byte blob (`b`)
    Blob,
    /// 4-byte MIDI message: port, status, data1, data2 (`m`)
    Midi,
    /// 64-bit NTP time tag (`t`)
    TimeTag,
    /// 64-bit signed integer (`h`)
    Int64,
    /// Boolean true, no payload (`T`)
    True,
    /// Boolean false, no payload (`F`)
    False,
    /// 32-bit ASCII character (`c`)
    Char,
    /// Nil, no payload (`N`)
    Nil,
    /// Impulse ("bang"), no payload (`I`)
    Impulse,
}

impl ArgType {
    /// Type tag character used on the wire
    pub fn to_tag(self) -> u8 {
        match self {
            ArgType::Int32 => b'i',
            ArgType::Float => b'f',
            ArgType::Double => b'd',
            ArgType::String => b's',
            ArgType::Blob => b'b',
            ArgType::Midi => b'm',
            ArgType::TimeTag => b't',
            ArgType::Int64 => b'h',
            ArgType::True => b'T',
            ArgType::False => b'F',
            ArgType::Char => b'c',
            ArgType::Nil => b'N',
            ArgType::Impulse => b'I',
        }
    }

    /// Parse a wire type tag. `S` (symbol) is read as a string.
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            b'i' => ArgType::Int32,
            b'f' => ArgType::Float,
            b'd' => ArgType::Double,
            b's' | b'S' => ArgType::String,
            b'b' => ArgType::Blob,
            b'm' => ArgType::Midi,
            b't' => ArgType::TimeTag,
            b'h' => ArgType::Int64,
            b'T' => ArgType::True,
            b'F' => ArgType::False,
            b'c' => ArgType::Char,
            b'N' => ArgType::Nil,
            b'I' => ArgType::Impulse,
            _ => return None,
        })
    }

    /// Upper-case name used in diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            ArgType::Int32 => "INTEGER_32",
            ArgType::Float => "FLOAT",
            ArgType::Double => "DOUBLE",
            ArgType::String => "STRING",
            ArgType::Blob => "BLOB",
            ArgType::Midi => "MIDI",
            ArgType::TimeTag => "TIME_TAG",
            ArgType::Int64 => "INTEGER_64",
            ArgType::True => "BOOL_T",
            ArgType::False => "BOOL_F",
            ArgType::Char => "CHAR",
            ArgType::Nil => "NULL_T",
            ArgType::Impulse => "IMPULSE",
        }
    }

    /// Whether the stored bytes are host order and must be flipped to
    /// big-endian for transmission. MIDI bytes are order-agnostic.
    pub fn needs_swap(self) -> bool {
        matches!(
            self,
            ArgType::Int32
                | ArgType::Float
                | ArgType::Double
                | ArgType::Blob
                | ArgType::TimeTag
                | ArgType::Int64
                | ArgType::Char
        )
    }

    /// True for the four types that have no payload bytes
    pub fn has_payload(self) -> bool {
        !matches!(
            self,
            ArgType::True | ArgType::False | ArgType::Nil | ArgType::Impulse
        )
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A view of one argument inside its message's data buffer.
///
/// The view never owns bytes. `offset` indexes the owning message's buffer
/// and is only meaningful while that buffer is unchanged. For blobs the
/// offset points at the 4-byte length field and `size` is the payload
/// length; for strings `size` includes the NUL padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argument {
    pub(crate) arg_type: ArgType,
    pub(crate) offset: usize,
    pub(crate) size: usize,
    pub(crate) needs_swap: bool,
}

impl Argument {
    pub(crate) fn new(arg_type: ArgType, offset: usize, size: usize) -> Self {
        Self {
            arg_type,
            offset,
            size,
            needs_swap: arg_type.needs_swap(),
        }
    }

    pub(crate) fn without_payload(arg_type: ArgType) -> Self {
        Self::new(arg_type, NO_PAYLOAD, 0)
    }

    /// Argument type
    pub fn arg_type(&self) -> ArgType {
        self.arg_type
    }

    /// Byte offset into the owning message's data buffer
    pub fn offset(&self) -> Option<usize> {
        (self.offset != NO_PAYLOAD).then_some(self.offset)
    }

    /// Payload size in bytes, excluding any length prefix
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the argument is byte-swapped on its way to the wire
    pub fn needs_swap(&self) -> bool {
        self.needs_swap
    }

    /// Flip this argument's numeric field between host order and big-endian
    /// inside `payload`, which starts where the data buffer starts.
    pub(crate) fn swap_endian(&self, payload: &mut [u8]) {
        if !self.needs_swap || self.offset == NO_PAYLOAD {
            return;
        }
        let width = match self.arg_type {
            ArgType::Int32 | ArgType::Float | ArgType::Char | ArgType::Blob => 4,
            ArgType::Int64 | ArgType::Double | ArgType::TimeTag => 8,
            _ => return,
        };
        swap_in_place(&mut payload[self.offset..self.offset + width]);
    }
}

/// Host order <-> big-endian for a 4 or 8 byte field. The transform is its own inverse.
pub(crate) fn swap_in_place(bytes: &mut [u8]) {
    match bytes.len() {
        4 => {
            let v = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            bytes.copy_from_slice(&v.to_be_bytes());
        }
        8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            bytes.copy_from_slice(&u64::from_ne_bytes(raw).to_be_bytes());
        }
        _ => {}
    }
}

/// Borrowed pairing of a message and one of its argument views
#[derive(Debug, Clone, Copy)]
pub struct ArgRef<'a> {
    pub(crate) message: &'a Message,
    pub(crate) argument: &'a Argument,
}

impl<'a> ArgRef<'a> {
    /// Argument type
    pub fn arg_type(&self) -> ArgType {
        self.argument.arg_type
    }

    /// The underlying view
    pub fn argument(&self) -> &'a Argument {
        self.argument
    }

    fn expect(&self, requested: ArgType) -> Result<(), Error> {
        if self.argument.arg_type == requested {
            Ok(())
        } else {
            Err(self.non_convertible(requested))
        }
    }

    fn non_convertible(&self, requested: ArgType) -> Error {
        Error::NonConvertible {
            address: self.message.address().to_string(),
            requested,
            actual: self.argument.arg_type,
        }
    }

    fn bytes<const N: usize>(&self) -> [u8; N] {
        let start = self.argument.offset;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.message.data()[start..start + N]);
        out
    }

    /// Value of an `i` argument
    pub fn int32(&self) -> Result<i32, Error> {
        self.expect(ArgType::Int32)?;
        Ok(i32::from_ne_bytes(self.bytes()))
    }

    /// Value of an `h` argument
    pub fn int64(&self) -> Result<i64, Error> {
        self.expect(ArgType::Int64)?;
        Ok(i64::from_ne_bytes(self.bytes()))
    }

    /// Value of a `t` argument
    pub fn time_tag(&self) -> Result<u64, Error> {
        self.expect(ArgType::TimeTag)?;
        Ok(u64::from_ne_bytes(self.bytes()))
    }

    /// Value of an `f` argument
    pub fn flt(&self) -> Result<f32, Error> {
        self.expect(ArgType::Float)?;
        Ok(f32::from_ne_bytes(self.bytes()))
    }

    /// Value of a `d` argument
    pub fn dbl(&self) -> Result<f64, Error> {
        self.expect(ArgType::Double)?;
        Ok(f64::from_ne_bytes(self.bytes()))
    }

    /// Value of a `T` or `F` argument, carried entirely by the type tag
    pub fn boolean(&self) -> Result<bool, Error> {
        match self.argument.arg_type {
            ArgType::True => Ok(true),
            ArgType::False => Ok(false),
            _ => Err(self.non_convertible(ArgType::True)),
        }
    }

    /// Value of a `c` argument
    pub fn character(&self) -> Result<char, Error> {
        self.expect(ArgType::Char)?;
        let code = u32::from_ne_bytes(self.bytes());
        Ok(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
    }

    /// Value of an `m` argument as `[port, status, data1, data2]`
    pub fn midi(&self) -> Result<[u8; 4], Error> {
        self.expect(ArgType::Midi)?;
        Ok(self.bytes())
    }

    /// Borrowed string bytes, including trailing NUL padding
    pub fn string_data(&self) -> Result<&'a [u8], Error> {
        self.expect(ArgType::String)?;
        let start = self.argument.offset;
        Ok(&self.message.data()[start..start + self.argument.size])
    }

    /// Value of an `s` argument, up to its first NUL
    pub fn string(&self) -> Result<String, Error> {
        let data = self.string_data()?;
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        Ok(String::from_utf8_lossy(&data[..end]).into_owned())
    }

    /// Borrowed blob payload, without the length prefix
    pub fn blob_data(&self) -> Result<&'a [u8], Error> {
        self.expect(ArgType::Blob)?;
        let start = self.argument.offset + 4;
        Ok(&self.message.data()[start..start + self.argument.size])
    }

    /// Copy of a `b` argument's payload
    pub fn blob(&self) -> Result<Vec<u8>, Error> {
        self.blob_data().map(<[u8]>::to_vec)
    }

    /// Owned value, whatever the type
    pub fn value(&self) -> ArgValue {
        // Each accessor below is called with its own matching type, so none can fail.
        let value = match self.argument.arg_type {
            ArgType::Int32 => self.int32().map(ArgValue::Int32),
            ArgType::Float => self.flt().map(ArgValue::Float),
            ArgType::Double => self.dbl().map(ArgValue::Double),
            ArgType::String => self.string().map(ArgValue::String),
            ArgType::Blob => self.blob().map(ArgValue::Blob),
            ArgType::Midi => self.midi().map(ArgValue::Midi),
            ArgType::TimeTag => self.time_tag().map(ArgValue::TimeTag),
            ArgType::Int64 => self.int64().map(ArgValue::Int64),
            ArgType::True => Ok(ArgValue::Bool(true)),
            ArgType::False => Ok(ArgValue::Bool(false)),
            ArgType::Char => self.character().map(ArgValue::Char),
            ArgType::Nil => Ok(ArgValue::Nil),
            ArgType::Impulse => Ok(ArgValue::Impulse),
        };
        value.unwrap_or(ArgValue::Nil)
    }
}

impl fmt::Display for ArgRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>: ", self.arg_type())?;
        match self.value() {
            ArgValue::Int32(v) => write!(f, "{}", v),
            ArgValue::Float(v) => write!(f, "{}", v),
            ArgValue::Double(v) => write!(f, "{}", v),
            ArgValue::String(v) => f.write_str(&v),
            ArgValue::Blob(v) => write!(f, "Size: {}", v.len()),
            ArgValue::Midi([port, status, data1, data2]) => write!(
                f,
                "Port: {} Status: {} Data1: {} Data2: {}",
                port, status, data1, data2
            ),
            ArgValue::TimeTag(v) => write!(f, "{}", v),
            ArgValue::Int64(v) => write!(f, "{}", v),
            ArgValue::Bool(true) => f.write_str("True"),
            ArgValue::Bool(false) => f.write_str("False"),
            ArgValue::Char(v) => write!(f, "{}", v as u32),
            ArgValue::Nil => f.write_str("Null"),
            ArgValue::Impulse => f.write_str("IMPULSE"),
        }
    }
}

/// Owned argument value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ArgValue {
    /// 32-bit integer
    Int32(i32),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// String
    String(String),
    /// Blob bytes (base64 in JSON)
    Blob(#[serde(serialize_with = "serialize_blob")] Vec<u8>),
    /// MIDI port, status, data1, data2
    Midi([u8; 4]),
    /// NTP time tag
    TimeTag(u64),
    /// 64-bit integer
    Int64(i64),
    /// Boolean, encoded as `T` or `F`
    Bool(bool),
    /// Character
    Char(char),
    /// Nil
    Nil,
    /// Impulse
    Impulse,
}

impl ArgValue {
    /// Type this value is encoded as
    pub fn arg_type(&self) -> ArgType {
        match self {
            ArgValue::Int32(_) => ArgType::Int32,
            ArgValue::Float(_) => ArgType::Float,
            ArgValue::Double(_) => ArgType::Double,
            ArgValue::String(_) => ArgType::String,
            ArgValue::Blob(_) => ArgType::Blob,
            ArgValue::Midi(_) => ArgType::Midi,
            ArgValue::TimeTag(_) => ArgType::TimeTag,
            ArgValue::Int64(_) => ArgType::Int64,
            ArgValue::Bool(true) => ArgType::True,
            ArgValue::Bool(false) => ArgType::False,
            ArgValue::Char(_) => ArgType::Char,
            ArgValue::Nil => ArgType::Nil,
            ArgValue::Impulse => ArgType::Impulse,
        }
    }
}

fn serialize_blob<S: Serializer>(blob: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    use base64::Engine;
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(blob))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        for t in [
            ArgType::Int32,
            ArgType::Float,
            ArgType::Double,
            ArgType::String,
            ArgType::Blob,
            ArgType::Midi,
            ArgType::TimeTag,
            ArgType::Int64,
            ArgType::True,
            ArgType::False,
            ArgType::Char,
            ArgType::Nil,
            ArgType::Impulse,
        ] {
            assert_eq!(ArgType::from_tag(t.to_tag()), Some(t));
        }
        assert_eq!(ArgType::from_tag(b'S'), Some(ArgType::String));
        assert_eq!(ArgType::from_tag(b'x'), None);
    }

    #[test]
    fn test_swap_flags() {
        assert!(ArgType::Int32.needs_swap());
        assert!(ArgType::TimeTag.needs_swap());
        assert!(!ArgType::Midi.needs_swap());
        assert!(!ArgType::String.needs_swap());
        assert!(!ArgType::True.has_payload());
        assert!(ArgType::Char.has_payload());
    }

    #[test]
    fn test_swap_in_place_is_big_endian() {
        let mut field = 245i32.to_ne_bytes();
        swap_in_place(&mut field);
        assert_eq!(field, 245i32.to_be_bytes());
        swap_in_place(&mut field);
        assert_eq!(field, 245i32.to_ne_bytes());
    }

    #[test]
    fn test_value_json() {
        let json = serde_json::to_string(&ArgValue::Blob(vec![1, 2, 3])).unwrap();
        assert_eq!(json, r#"{"type":"blob","value":"AQID"}"#);
        let json = serde_json::to_string(&ArgValue::Nil).unwrap();
        assert_eq!(json, r#"{"type":"nil"}"#);
    }
}
