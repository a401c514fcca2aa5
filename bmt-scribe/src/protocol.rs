//! Thrift binary encoding of the Scribe `Log` call.
//!
//! Only the subset of the protocol needed by `Log(1: list<LogEntry> messages)` is implemented.
//! Requests are written with the non-strict message header, which every Thrift server accepts.
//! Both strict and non-strict headers are accepted when reading.
//!
//! The server-side halves ([`decode_log_call`], [`encode_log_reply`] and [`encode_exception`]) are
//! exposed for in-process test collectors.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::LengthDelimitedCodec;

use crate::{Error, LogEntry, Result, ResultCode};

/// The name of the only remote method of the Scribe service.
pub const METHOD_LOG: &str = "Log";

/// Upper bound for a single frame, in either direction.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

const VERSION_1: u32 = 0x8001_0000;
const VERSION_MASK: u32 = 0xffff_0000;
const MAX_SKIP_DEPTH: usize = 64;
/// Encoded size of a `LogEntry` struct with empty strings.
const ENTRY_OVERHEAD: usize = 15;

/// Thrift wire type identifiers.
mod ttype {
    pub const STOP: u8 = 0;
    pub const BOOL: u8 = 2;
    pub const BYTE: u8 = 3;
    pub const DOUBLE: u8 = 4;
    pub const I16: u8 = 6;
    pub const I32: u8 = 8;
    pub const I64: u8 = 10;
    pub const STRING: u8 = 11;
    pub const STRUCT: u8 = 12;
    pub const MAP: u8 = 13;
    pub const SET: u8 = 14;
    pub const LIST: u8 = 15;
}

/// Creates the codec for the framed transport: a 4-byte big-endian length prefix.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// The kind of a Thrift message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageType {
    /// A request expecting a reply.
    Call,
    /// A successful reply.
    Reply,
    /// An application exception in place of a reply.
    Exception,
    /// A request without a reply.
    Oneway,
}

impl MessageType {
    fn as_u8(self) -> u8 {
        match self {
            MessageType::Call => 1,
            MessageType::Reply => 2,
            MessageType::Exception => 3,
            MessageType::Oneway => 4,
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(MessageType::Call),
            2 => Ok(MessageType::Reply),
            3 => Ok(MessageType::Exception),
            4 => Ok(MessageType::Oneway),
            other => Err(Error::protocol(format!("unknown message type {other}"))),
        }
    }
}

/// The envelope of every Thrift message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageHeader {
    /// Name of the remote method.
    pub name: String,
    /// Kind of the message.
    pub kind: MessageType,
    /// Sequence id pairing a reply with its call.
    pub seqid: i32,
}

/// Encodes a `Log` call carrying the given entries.
pub fn encode_log_call(seqid: i32, entries: &[LogEntry]) -> Bytes {
    let payload_len: usize = entries
        .iter()
        .map(|e| e.category.len() + e.message.len() + ENTRY_OVERHEAD)
        .sum();
    let mut buf = BytesMut::with_capacity(32 + payload_len);

    // Non-strict header: name, type, seqid.
    put_string(&mut buf, METHOD_LOG);
    buf.put_u8(MessageType::Call.as_u8());
    buf.put_i32(seqid);

    put_field_header(&mut buf, ttype::LIST, 1);
    buf.put_u8(ttype::STRUCT);
    buf.put_i32(entries.len() as i32);
    for entry in entries {
        put_field_header(&mut buf, ttype::STRING, 1);
        put_string(&mut buf, &entry.category);
        put_field_header(&mut buf, ttype::STRING, 2);
        put_string(&mut buf, &entry.message);
        buf.put_u8(ttype::STOP);
    }
    buf.put_u8(ttype::STOP);

    buf.freeze()
}

/// Decodes the reply to the `Log` call with the given sequence id.
pub fn decode_log_reply(mut frame: Bytes, expected_seqid: i32) -> Result<ResultCode> {
    let header = read_message_header(&mut frame)?;
    if header.name != METHOD_LOG {
        return Err(Error::protocol(format!(
            "reply for unexpected method `{}`",
            header.name
        )));
    }
    if header.seqid != expected_seqid {
        return Err(Error::protocol(format!(
            "out of order reply: expected seqid {expected_seqid}, got {}",
            header.seqid
        )));
    }

    match header.kind {
        MessageType::Reply => read_log_result(&mut frame),
        MessageType::Exception => {
            let (kind, message) = read_application_exception(&mut frame)?;
            Err(Error::Application { kind, message })
        }
        kind => Err(Error::protocol(format!("unexpected {kind:?} message"))),
    }
}

/// Decodes a `Log` call as received by a collector.
pub fn decode_log_call(mut frame: Bytes) -> Result<(MessageHeader, Vec<LogEntry>)> {
    let header = read_message_header(&mut frame)?;
    if !matches!(header.kind, MessageType::Call | MessageType::Oneway) {
        return Err(Error::protocol(format!(
            "expected a call, got {:?}",
            header.kind
        )));
    }
    if header.name != METHOD_LOG {
        return Err(Error::protocol(format!("unknown method `{}`", header.name)));
    }

    let mut entries = Vec::new();
    loop {
        let field_type = read_u8(&mut frame)?;
        if field_type == ttype::STOP {
            break;
        }
        let id = read_i16(&mut frame)?;
        if id == 1 && field_type == ttype::LIST {
            let elem_type = read_u8(&mut frame)?;
            let len = read_len(&mut frame)?;
            if elem_type != ttype::STRUCT {
                return Err(Error::protocol("`messages` must be a list of structs"));
            }
            entries.reserve(len.min(frame.remaining() / ENTRY_OVERHEAD));
            for _ in 0..len {
                entries.push(read_log_entry(&mut frame)?);
            }
        } else {
            skip(&mut frame, field_type, 0)?;
        }
    }

    Ok((header, entries))
}

/// Encodes a successful reply to a `Log` call.
pub fn encode_log_reply(seqid: i32, code: ResultCode) -> Bytes {
    let mut buf = BytesMut::with_capacity(32);
    put_strict_header(&mut buf, MessageType::Reply, seqid);
    put_field_header(&mut buf, ttype::I32, 0);
    buf.put_i32(code.as_i32());
    buf.put_u8(ttype::STOP);
    buf.freeze()
}

/// Encodes an application exception in reply to a `Log` call.
pub fn encode_exception(seqid: i32, kind: i32, message: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(32 + message.len());
    put_strict_header(&mut buf, MessageType::Exception, seqid);
    put_field_header(&mut buf, ttype::STRING, 1);
    put_string(&mut buf, message);
    put_field_header(&mut buf, ttype::I32, 2);
    buf.put_i32(kind);
    buf.put_u8(ttype::STOP);
    buf.freeze()
}

fn put_strict_header(buf: &mut BytesMut, kind: MessageType, seqid: i32) {
    buf.put_u32(VERSION_1 | u32::from(kind.as_u8()));
    put_string(buf, METHOD_LOG);
    buf.put_i32(seqid);
}

fn put_field_header(buf: &mut BytesMut, field_type: u8, id: i16) {
    buf.put_u8(field_type);
    buf.put_i16(id);
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_i32(value.len() as i32);
    buf.put_slice(value.as_bytes());
}

fn read_message_header(buf: &mut Bytes) -> Result<MessageHeader> {
    let first = read_i32(buf)?;

    if first < 0 {
        let first = first as u32;
        if first & VERSION_MASK != VERSION_1 {
            return Err(Error::protocol(format!(
                "bad protocol version {:#x}",
                first & VERSION_MASK
            )));
        }
        let kind = MessageType::from_u8((first & 0xff) as u8)?;
        let name = read_string(buf)?;
        let seqid = read_i32(buf)?;
        Ok(MessageHeader { name, kind, seqid })
    } else {
        // Old-style header: the first word is the length of the method name.
        let name = read_string_of_len(buf, first as usize)?;
        let kind = MessageType::from_u8(read_u8(buf)?)?;
        let seqid = read_i32(buf)?;
        Ok(MessageHeader { name, kind, seqid })
    }
}

fn read_log_result(buf: &mut Bytes) -> Result<ResultCode> {
    let mut success = None;
    loop {
        let field_type = read_u8(buf)?;
        if field_type == ttype::STOP {
            break;
        }
        match (read_i16(buf)?, field_type) {
            (0, ttype::I32) => {
                let value = read_i32(buf)?;
                let code = ResultCode::from_i32(value)
                    .ok_or_else(|| Error::protocol(format!("unknown result code {value}")))?;
                success = Some(code);
            }
            (_, field_type) => skip(buf, field_type, 0)?,
        }
    }

    success.ok_or_else(|| Error::protocol("`Log` reply is missing its result"))
}

fn read_log_entry(buf: &mut Bytes) -> Result<LogEntry> {
    let mut entry = LogEntry::default();
    loop {
        let field_type = read_u8(buf)?;
        if field_type == ttype::STOP {
            break;
        }
        match (read_i16(buf)?, field_type) {
            (1, ttype::STRING) => entry.category = read_string(buf)?,
            (2, ttype::STRING) => entry.message = read_string(buf)?,
            (_, field_type) => skip(buf, field_type, 0)?,
        }
    }
    Ok(entry)
}

fn read_application_exception(buf: &mut Bytes) -> Result<(i32, String)> {
    let mut kind = 0;
    let mut message = String::new();
    loop {
        let field_type = read_u8(buf)?;
        if field_type == ttype::STOP {
            break;
        }
        match (read_i16(buf)?, field_type) {
            (1, ttype::STRING) => message = read_string(buf)?,
            (2, ttype::I32) => kind = read_i32(buf)?,
            (_, field_type) => skip(buf, field_type, 0)?,
        }
    }
    Ok((kind, message))
}

/// Skips over a value of the given type.
fn skip(buf: &mut Bytes, field_type: u8, depth: usize) -> Result<()> {
    if depth > MAX_SKIP_DEPTH {
        return Err(Error::protocol("maximum nesting depth exceeded"));
    }

    match field_type {
        ttype::BOOL | ttype::BYTE => advance(buf, 1),
        ttype::I16 => advance(buf, 2),
        ttype::I32 => advance(buf, 4),
        ttype::DOUBLE | ttype::I64 => advance(buf, 8),
        ttype::STRING => {
            let len = read_len(buf)?;
            advance(buf, len)
        }
        ttype::STRUCT => loop {
            let field_type = read_u8(buf)?;
            if field_type == ttype::STOP {
                return Ok(());
            }
            read_i16(buf)?;
            skip(buf, field_type, depth + 1)?;
        },
        ttype::MAP => {
            let key_type = read_u8(buf)?;
            let value_type = read_u8(buf)?;
            for _ in 0..read_len(buf)? {
                skip(buf, key_type, depth + 1)?;
                skip(buf, value_type, depth + 1)?;
            }
            Ok(())
        }
        ttype::SET | ttype::LIST => {
            let elem_type = read_u8(buf)?;
            for _ in 0..read_len(buf)? {
                skip(buf, elem_type, depth + 1)?;
            }
            Ok(())
        }
        other => Err(Error::protocol(format!("unknown field type {other}"))),
    }
}

fn ensure(buf: &Bytes, len: usize) -> Result<()> {
    if buf.remaining() < len {
        return Err(Error::protocol("unexpected end of frame"));
    }
    Ok(())
}

fn advance(buf: &mut Bytes, len: usize) -> Result<()> {
    ensure(buf, len)?;
    buf.advance(len);
    Ok(())
}

fn read_u8(buf: &mut Bytes) -> Result<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn read_i16(buf: &mut Bytes) -> Result<i16> {
    ensure(buf, 2)?;
    Ok(buf.get_i16())
}

fn read_i32(buf: &mut Bytes) -> Result<i32> {
    ensure(buf, 4)?;
    Ok(buf.get_i32())
}

fn read_len(buf: &mut Bytes) -> Result<usize> {
    let len = read_i32(buf)?;
    usize::try_from(len).map_err(|_| Error::protocol(format!("negative length {len}")))
}

fn read_string(buf: &mut Bytes) -> Result<String> {
    let len = read_len(buf)?;
    read_string_of_len(buf, len)
}

fn read_string_of_len(buf: &mut Bytes, len: usize) -> Result<String> {
    ensure(buf, len)?;
    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::protocol("string is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<LogEntry> {
        vec![
            LogEntry::new("bmt_0", "first line\n"),
            LogEntry::new("bmt_0", "second line\n"),
        ]
    }

    #[test]
    fn call_is_readable_by_collector() {
        let frame = encode_log_call(7, &entries());
        let (header, decoded) = decode_log_call(frame).unwrap();

        assert_eq!(header.name, "Log");
        assert_eq!(header.kind, MessageType::Call);
        assert_eq!(header.seqid, 7);
        assert_eq!(decoded, entries());
    }

    #[test]
    fn call_uses_non_strict_header() {
        let frame = encode_log_call(1, &[]);
        assert_eq!(&frame[..7], b"\x00\x00\x00\x03Log");
        assert_eq!(frame[7], 1);
    }

    #[test]
    fn reply_is_decoded() {
        let reply = encode_log_reply(3, ResultCode::TryLater);
        assert_eq!(decode_log_reply(reply, 3).unwrap(), ResultCode::TryLater);
    }

    #[test]
    fn non_strict_reply_is_decoded() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "Log");
        buf.put_u8(2);
        buf.put_i32(9);
        put_field_header(&mut buf, ttype::I32, 0);
        buf.put_i32(0);
        buf.put_u8(ttype::STOP);

        assert_eq!(decode_log_reply(buf.freeze(), 9).unwrap(), ResultCode::Ok);
    }

    #[test]
    fn reply_skips_unknown_fields() {
        let mut buf = BytesMut::new();
        put_strict_header(&mut buf, MessageType::Reply, 1);
        put_field_header(&mut buf, ttype::LIST, 5);
        buf.put_u8(ttype::STRING);
        buf.put_i32(1);
        put_string(&mut buf, "ignored");
        put_field_header(&mut buf, ttype::I32, 0);
        buf.put_i32(0);
        buf.put_u8(ttype::STOP);

        assert_eq!(decode_log_reply(buf.freeze(), 1).unwrap(), ResultCode::Ok);
    }

    #[test]
    fn exception_is_surfaced() {
        let reply = encode_exception(4, 6, "internal error");
        let err = decode_log_reply(reply, 4).unwrap_err();

        let Error::Application { kind, message } = err else {
            panic!("expected application error, got {err:?}");
        };
        assert_eq!(kind, 6);
        assert_eq!(message, "internal error");
    }

    #[test]
    fn mismatched_seqid_is_rejected() {
        let reply = encode_log_reply(2, ResultCode::Ok);
        assert!(matches!(
            decode_log_reply(reply, 3),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let frame = encode_log_call(1, &entries());
        let truncated = frame.slice(..frame.len() - 4);
        assert!(matches!(decode_log_call(truncated), Err(Error::Protocol(_))));
    }

    #[test]
    fn oversized_list_length_is_rejected() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, METHOD_LOG);
        buf.put_u8(MessageType::Call.as_u8());
        buf.put_i32(1);
        put_field_header(&mut buf, ttype::LIST, 1);
        buf.put_u8(ttype::STRUCT);
        buf.put_i32(i32::MAX);
        buf.put_u8(ttype::STOP);

        assert!(matches!(
            decode_log_call(buf.freeze()),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(0x8002_0002);
        assert!(matches!(
            decode_log_reply(buf.freeze(), 0),
            Err(Error::Protocol(_))
        ));
    }
}
