// ABOUTME: Binary OSC packet decoder
// ABOUTME: Rebuilds messages from raw bytes, recursing through nested bundles

use crate::error::Error;
use crate::protocol::argument::{swap_in_place, ArgType};
use crate::protocol::message::Message;
use crate::protocol::{blob_padding, trailing_zeros, BUNDLE_TAG};

/// Nested bundles deeper than this are rejected
const MAX_BUNDLE_DEPTH: usize = 32;

/// Decode one packet (message or bundle), without the transport size prefix.
pub fn decode_packet(data: &[u8]) -> Result<Vec<Message>, Error> {
    let mut messages = Vec::new();
    decode_data(data, &mut messages, None)?;
    Ok(messages)
}

/// Decode a message or bundle, pushing every decoded message onto `messages`.
///
/// Messages decoded before a failure stay in `messages`. Messages inside a
/// bundle carry the time tag of the outermost bundle; `timetag` is the tag
/// inherited from an enclosing bundle, if any.
pub fn decode_data(
    data: &[u8],
    messages: &mut Vec<Message>,
    timetag: Option<u64>,
) -> Result<(), Error> {
    decode_nested(data, messages, timetag, 0)
}

fn decode_nested(
    data: &[u8],
    messages: &mut Vec<Message>,
    timetag: Option<u64>,
    depth: usize,
) -> Result<(), Error> {
    if !data.starts_with(BUNDLE_TAG) {
        return decode_message(data, messages, timetag);
    }
    if depth >= MAX_BUNDLE_DEPTH {
        return Err(Error::Malformed("Bundles nested too deeply.".into()));
    }

    let rest = &data[BUNDLE_TAG.len()..];
    let (stamp, mut rest) = rest
        .split_first_chunk::<8>()
        .ok_or_else(|| Error::Malformed("Bundle ends before its time tag.".into()))?;
    let timetag = timetag.unwrap_or(u64::from_be_bytes(*stamp));

    while !rest.is_empty() {
        let (size, tail) = rest
            .split_first_chunk::<4>()
            .ok_or_else(|| Error::Malformed("Bundle segment size is truncated.".into()))?;
        let size = u32::from_be_bytes(*size) as usize;
        if size > tail.len() {
            return Err(Error::Malformed(
                "Segment Size is greater than bundle size.".into(),
            ));
        }
        decode_nested(&tail[..size], messages, Some(timetag), depth + 1)?;
        rest = &tail[size..];
    }
    Ok(())
}

/// Decode a single message and push it onto `messages`.
pub fn decode_message(
    data: &[u8],
    messages: &mut Vec<Message>,
    timetag: Option<u64>,
) -> Result<(), Error> {
    let address_len = find_nul(data, 0)
        .ok_or_else(|| Error::Malformed("No address.".into()))?;
    let address = std::str::from_utf8(&data[..address_len])
        .map_err(|_| Error::Malformed("Address is not valid UTF-8.".into()))?;
    if !address.starts_with('/') {
        return Err(Error::Malformed(format!(
            "Address {:?} does not start with '/'.",
            address
        )));
    }

    let mut message = Message::new(address);
    let malformed = |reason: &str| {
        Error::Malformed(format!(
            "Message with address [{}] not properly formatted; {}",
            address, reason
        ))
    };

    let mut cursor = address_len + trailing_zeros(address_len);
    if data.get(cursor) != Some(&b',') {
        return Err(malformed("no , separator."));
    }
    let types_end = find_nul(data, cursor).ok_or_else(|| malformed("Types not complete."))?;
    let types = &data[cursor + 1..types_end];
    let types_len = types_end - cursor;
    cursor += types_len + trailing_zeros(types_len);
    if cursor > data.len() {
        return Err(malformed("Types not complete."));
    }

    for &tag in types {
        let arg_type = ArgType::from_tag(tag)
            .ok_or_else(|| malformed(&format!("unknown type tag '{}'.", tag as char)))?;
        match arg_type {
            ArgType::Int32 | ArgType::Float | ArgType::Char => {
                let mut field = take_array::<4>(data, &mut cursor)
                    .ok_or_else(|| malformed("payload truncated."))?;
                swap_in_place(&mut field);
                message.push_argument(arg_type, 4, &field, 0);
            }
            ArgType::Int64 | ArgType::Double | ArgType::TimeTag => {
                let mut field = take_array::<8>(data, &mut cursor)
                    .ok_or_else(|| malformed("payload truncated."))?;
                swap_in_place(&mut field);
                message.push_argument(arg_type, 8, &field, 0);
            }
            ArgType::Midi => {
                let field = take_array::<4>(data, &mut cursor)
                    .ok_or_else(|| malformed("payload truncated."))?;
                message.push_argument(arg_type, 4, &field, 0);
            }
            ArgType::String => {
                let end = find_nul(data, cursor).ok_or_else(|| malformed("string not terminated."))?;
                let len = end - cursor;
                let padding = trailing_zeros(len);
                let field = take(data, &mut cursor, len + padding)
                    .ok_or_else(|| malformed("string padding truncated."))?;
                message.push_argument(arg_type, len + padding, &field[..len], padding);
            }
            ArgType::Blob => {
                let size = take_array::<4>(data, &mut cursor)
                    .ok_or_else(|| malformed("payload truncated."))?;
                let size = u32::from_be_bytes(size) as usize;
                if size > data.len() - cursor {
                    return Err(malformed("Blobs size is too long."));
                }
                let field = take(data, &mut cursor, size + blob_padding(size))
                    .ok_or_else(|| malformed("blob padding truncated."))?;
                message.append_blob(&field[..size]);
            }
            ArgType::True | ArgType::False | ArgType::Nil | ArgType::Impulse => {
                message.push_argument(arg_type, 0, &[], 0);
            }
        }
    }

    if let Some(timetag) = timetag {
        message.set_timetag(timetag);
    }
    messages.push(message);
    Ok(())
}

fn find_nul(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .iter()
        .position(|&b| b == 0)
        .map(|i| from + i)
}

fn take<'a>(data: &'a [u8], cursor: &mut usize, len: usize) -> Option<&'a [u8]> {
    let field = data.get(*cursor..cursor.checked_add(len)?)?;
    *cursor += len;
    Some(field)
}

fn take_array<const N: usize>(data: &[u8], cursor: &mut usize) -> Option<[u8; N]> {
    let mut out = [0u8; N];
    out.copy_from_slice(take(data, cursor, N)?);
    Some(out)
}
