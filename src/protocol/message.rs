use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use crc::crc32;
use nom::{be_i32, be_i64, be_i8, IResult};

use compression::Compression;
use errors::{ErrorKind, Result};
use protocol::{parse_bytes, Offset, WriteExt};

/// A single Kafka message, v0 layout:
///
/// ```text
/// Message => Crc MagicByte Attributes Key Value
///   Crc => int32
///   MagicByte => int8
///   Attributes => int8
///   Key => bytes
///   Value => bytes
/// ```
///
/// The low two bits of the attributes byte carry the compression scheme.
/// Offsets are assigned by brokers; messages built on the producer side use
/// the `-1` placeholder.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub offset: Offset,
    pub compression: Compression,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
}

impl Message {
    pub fn new(key: Option<Bytes>, value: Option<Bytes>) -> Message {
        Message {
            offset: -1,
            compression: Compression::None,
            key: key,
            value: value,
        }
    }
}

/// An ordered batch of messages, each entry encoded as
/// `i64 offset | i32 message_size | Message`.
///
/// Kafka's compression scheme nests message sets: the plain set is rendered,
/// compressed, and the raw output wrapped as the value of a single container
/// message whose attributes carry the compression flag.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageSet {
    pub messages: Vec<Message>,
}

impl MessageSet {
    pub fn new(messages: Vec<Message>) -> MessageSet {
        MessageSet { messages: messages }
    }

    /// Builds a message set ready for a produce request, compressing into
    /// the nested container form unless `compression` is `None`.
    pub fn compressed(compression: Compression, messages: Vec<Message>) -> Result<MessageSet> {
        if compression == Compression::None {
            return Ok(MessageSet { messages: messages });
        }

        let mut buf = BytesMut::with_capacity(messages.len() * 64);
        MessageSet { messages: messages }.encode::<BigEndian>(&mut buf)?;

        let compressed = compression.compress(&buf)?;

        let mut container = Message::new(None, Some(Bytes::from(compressed)));
        container.compression = compression;

        Ok(MessageSet { messages: vec![container] })
    }

    /// Encodes the entries only; callers put the `i32` size prefix where the
    /// enclosing frame requires one.  Nested compressed sets are encoded
    /// without any prefix.
    pub fn encode<T: ByteOrder>(&self, buf: &mut BytesMut) -> Result<()> {
        for message in &self.messages {
            encode_message::<T>(message, buf)?;
        }

        Ok(())
    }
}

fn encode_message<T: ByteOrder>(message: &Message, buf: &mut BytesMut) -> Result<()> {
    buf.put_i64::<T>(message.offset);

    let size_off = buf.len();
    buf.put_i32::<T>(0);
    let crc_off = buf.len();
    buf.put_i32::<T>(0);
    let data_off = buf.len();

    buf.put_i8(0); // magic
    buf.put_i8(message.compression.attribute_bits());
    buf.put_bytes::<T>(message.key.as_ref().map(|b| &b[..]))?;
    buf.put_bytes::<T>(message.value.as_ref().map(|b| &b[..]))?;

    let size = buf.len() - crc_off;
    let crc = crc32::checksum_ieee(&buf[data_off..]);

    T::write_i32(&mut buf[size_off..], size as i32);
    T::write_i32(&mut buf[crc_off..], crc as i32);

    Ok(())
}

named!(parse_entry<(Offset, &[u8])>,
    do_parse!(
        offset: be_i64
     >> raw: length_bytes!(be_i32)
     >> ((offset, raw))
    )
);

named!(parse_message_body<(i32, i8, i8, Option<Bytes>, Option<Bytes>)>,
    do_parse!(
        crc: be_i32
     >> magic: be_i8
     >> attributes: be_i8
     >> key: parse_bytes
     >> value: parse_bytes
     >> ((crc, magic, attributes, key, value))
    )
);

/// Parses a message set from a raw slice.
///
/// Brokers may cut a response off at `max_bytes`, so a trailing message with
/// insufficient bytes ends the parse and the messages decoded so far are
/// returned.  Entries whose attributes carry a compression flag are inflated
/// and their nested entries spliced into the output in order.
pub fn parse_message_set(input: &[u8]) -> Result<MessageSet> {
    let mut messages = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        let (remaining, (offset, raw)) = match parse_entry(rest) {
            IResult::Done(remaining, entry) => (remaining, entry),
            _ => break,
        };

        rest = remaining;

        let message = match parse_message(offset, raw) {
            Some(message) => message,
            None => break,
        };

        if message.compression == Compression::None {
            messages.push(message);
        } else {
            let value = message
                .value
                .ok_or(ErrorKind::CodecError("compressed message without value"))?;
            let inflated = message.compression.decompress(&value)?;
            let nested = parse_message_set(&inflated)?;

            messages.extend(nested.messages);
        }
    }

    Ok(MessageSet { messages: messages })
}

fn parse_message(offset: Offset, raw: &[u8]) -> Option<Message> {
    match parse_message_body(raw) {
        IResult::Done(_, (crc, _magic, attributes, key, value)) => {
            let checksum = crc32::checksum_ieee(&raw[4..]);

            if checksum != crc as u32 {
                trace!("message checksum mismatched, expected={}, current={}",
                       checksum,
                       crc as u32);
            }

            Compression::from_attributes(attributes).map(|compression| {
                Message {
                    offset: offset,
                    compression: compression,
                    key: key,
                    value: value,
                }
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(key: Option<&[u8]>, value: &[u8]) -> Message {
        Message::new(key.map(Bytes::from), Some(Bytes::from(value)))
    }

    fn encoded(message_set: &MessageSet) -> BytesMut {
        let mut buf = BytesMut::with_capacity(256);
        message_set.encode::<BigEndian>(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_plain_round_trip() {
        let message_set = MessageSet::new(vec![message(Some(b"key"), b"value"),
                                               message(None, b"other")]);

        let parsed = parse_message_set(&encoded(&message_set)).unwrap();

        assert_eq!(parsed, message_set);
    }

    #[test]
    fn test_crc_matches_zlib() {
        // crc of [magic, attributes, key(-1), value "fu"] must equal
        // zlib.crc32 of the same payload, with i32 wraparound
        let buf = encoded(&MessageSet::new(vec![message(None, b"fu")]));

        let crc = BigEndian::read_i32(&buf[12..16]);
        let payload = &buf[16..];

        assert_eq!(payload,
                   &b"\0\0\xff\xff\xff\xff\0\0\0\x02fu"[..]);
        assert_eq!(crc as u32, ::crc::crc32::checksum_ieee(payload));
    }

    #[test]
    fn test_offset_placeholder() {
        let buf = encoded(&MessageSet::new(vec![message(None, b"v")]));

        assert_eq!(BigEndian::read_i64(&buf[..8]), -1);
    }

    #[test]
    fn test_truncated_tail() {
        let message_set = MessageSet::new(vec![message(None, b"first"),
                                               message(None, b"second")]);
        let buf = encoded(&message_set);

        // chop into the trailing message, the first one still parses
        let parsed = parse_message_set(&buf[..buf.len() - 4]).unwrap();

        assert_eq!(parsed.messages.len(), 1);
        assert_eq!(parsed.messages[0].value, Some(Bytes::from(&b"first"[..])));
    }

    #[test]
    fn test_compressed_round_trip() {
        for compression in &[Compression::Gzip, Compression::Snappy] {
            let messages = vec![message(Some(b"a"), b"one"), message(None, b"two")];
            let message_set = MessageSet::compressed(*compression, messages.clone()).unwrap();

            // single container message wrapping the compressed inner set
            assert_eq!(message_set.messages.len(), 1);
            assert_eq!(message_set.messages[0].compression, *compression);

            let parsed = parse_message_set(&encoded(&message_set)).unwrap();

            assert_eq!(parsed.messages, messages);
        }
    }

    #[test]
    fn test_uncompressed_passthrough() {
        let messages = vec![message(None, b"plain")];
        let message_set = MessageSet::compressed(Compression::None, messages.clone()).unwrap();

        assert_eq!(message_set.messages, messages);
    }
}
