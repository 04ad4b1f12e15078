use std::fmt;
use std::str;

use byteorder::ByteOrder;
use bytes::{BufMut, Bytes, BytesMut};
use nom::{be_i16, be_i32};

use errors::{ErrorKind, Result};

mod header;
mod message;
mod metadata;
mod produce;
mod fetch;
mod offset;
mod offset_commit;
mod offset_fetch;
mod group_coordinator;

pub use self::header::RequestHeader;
pub use self::message::{parse_message_set, Message, MessageSet};
pub use self::metadata::{parse_metadata_response, BrokerMetadata, MetadataRequest,
                         MetadataResponse, PartitionMetadata, TopicMetadata};
pub use self::produce::{parse_produce_response, ProducePartitionRequest,
                        ProducePartitionResponse, ProduceRequest, ProduceResponse,
                        ProduceTopicRequest, ProduceTopicResponse};
pub use self::fetch::{parse_fetch_response, FetchPartitionRequest, FetchPartitionResponse,
                      FetchRequest, FetchResponse, FetchTopicRequest, FetchTopicResponse};
pub use self::offset::{parse_offset_response, OffsetPartitionRequest, OffsetPartitionResponse,
                       OffsetRequest, OffsetResponse, OffsetTopicRequest, OffsetTopicResponse};
pub use self::offset_commit::{parse_offset_commit_response, OffsetCommitPartitionRequest,
                              OffsetCommitPartitionResponse, OffsetCommitRequest,
                              OffsetCommitResponse, OffsetCommitTopicRequest,
                              OffsetCommitTopicResponse};
pub use self::offset_fetch::{parse_offset_fetch_response, OffsetFetchPartitionResponse,
                             OffsetFetchRequest, OffsetFetchResponse, OffsetFetchTopicRequest,
                             OffsetFetchTopicResponse};
pub use self::group_coordinator::{parse_group_coordinator_response, GroupCoordinatorRequest,
                                  GroupCoordinatorResponse};

pub type ApiVersion = i16;
pub type CorrelationId = i32;
pub type BrokerId = i32;
pub type PartitionId = i32;
pub type Offset = i64;
pub type ErrorCode = i16;
pub type RequiredAcks = i16;

/// The only request version spoken by this client.
pub const DEFAULT_API_VERSION: ApiVersion = 0;

/// All consumers use replica id -1, other values are reserved for
/// broker-to-broker replication traffic.
pub const CONSUMER_REPLICA_ID: i32 = -1;

/// Numeric codes the ApiKey field in a request preamble can take.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ApiKeys {
    Produce = 0,
    Fetch = 1,
    Offsets = 2,
    Metadata = 3,
    OffsetCommit = 8,
    OffsetFetch = 9,
    GroupCoordinator = 10,
}

impl ApiKeys {
    pub fn key(&self) -> i16 {
        *self as i16
    }

    pub fn name(&self) -> &'static str {
        match *self {
            ApiKeys::Produce => "produce",
            ApiKeys::Fetch => "fetch",
            ApiKeys::Offsets => "offset",
            ApiKeys::Metadata => "metadata",
            ApiKeys::OffsetCommit => "offset_commit",
            ApiKeys::OffsetFetch => "offset_fetch",
            ApiKeys::GroupCoordinator => "group_coordinator",
        }
    }
}

impl fmt::Display for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error codes reported by a remote Kafka broker.
///
/// See also [Kafka Errors](http://kafka.apache.org/protocol.html)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KafkaCode {
    /// The server experienced an unexpected error when processing the request
    Unknown,
    None,
    /// The requested offset is outside the range of offsets
    /// maintained by the server for the given topic/partition
    OffsetOutOfRange,
    /// This indicates that a message contents does not match its CRC
    InvalidMessage,
    /// This request is for a topic or partition that does not exist
    /// on this broker.
    UnknownTopicOrPartition,
    /// This error is thrown if we are in the middle of a leadership
    /// election and there is currently no leader for this partition
    /// and hence it is unavailable for writes.
    LeaderNotAvailable,
    /// This error is thrown if the client attempts to send messages
    /// to a replica that is not the leader for some partition. It
    /// indicates that the clients metadata is out of date.
    NotPartitionLeader,
    /// This error is thrown if the request exceeds the user-specified
    /// time limit in the request.
    RequestTimedOut,
    /// This is not a client facing error and is used mostly by tools
    /// when a broker is not alive.
    BrokerNotAvailable,
    /// If replica is expected on a broker, but is not (this can be
    /// safely ignored).
    ReplicaNotAvailable,
    /// The server has a configurable maximum message size to avoid
    /// unbounded memory allocation. This error is thrown if the
    /// client attempt to produce a message larger than this maximum.
    MessageSizeTooLarge,
    /// Internal error code for broker-to-broker communication.
    StaleControllerEpoch,
    /// If you specify a string larger than configured maximum for
    /// offset metadata
    OffsetMetadataTooLarge,
    /// The broker returns this error code for an offset fetch request
    /// if it is still loading offsets for the group's partition of the
    /// offsets topic.
    OffsetsLoadInProgress,
    /// The broker returns this error code for group coordinator
    /// requests and offset commits if the offsets topic has not yet
    /// been created, or if the group coordinator is not active.
    CoordinatorNotAvailable,
    /// The broker returns this error code if it receives an offset
    /// fetch or commit request for a group that it is not a
    /// coordinator for.
    NotCoordinator,
    /// Returned from a produce request when the number of in-sync
    /// replicas is lower than the configured minimum and requiredAcks
    /// is -1.
    NotEnoughReplicas,
    /// Returned from a produce request when the message was written
    /// to the log, but with fewer in-sync replicas than required.
    NotEnoughReplicasAfterAppend,
    /// A code this client has no name for.
    Other(ErrorCode),
}

impl KafkaCode {
    pub fn from_code(code: ErrorCode) -> KafkaCode {
        match code {
            -1 => KafkaCode::Unknown,
            0 => KafkaCode::None,
            1 => KafkaCode::OffsetOutOfRange,
            2 => KafkaCode::InvalidMessage,
            3 => KafkaCode::UnknownTopicOrPartition,
            5 => KafkaCode::LeaderNotAvailable,
            6 => KafkaCode::NotPartitionLeader,
            7 => KafkaCode::RequestTimedOut,
            8 => KafkaCode::BrokerNotAvailable,
            9 => KafkaCode::ReplicaNotAvailable,
            10 => KafkaCode::MessageSizeTooLarge,
            11 => KafkaCode::StaleControllerEpoch,
            12 => KafkaCode::OffsetMetadataTooLarge,
            14 => KafkaCode::OffsetsLoadInProgress,
            15 => KafkaCode::CoordinatorNotAvailable,
            16 => KafkaCode::NotCoordinator,
            19 => KafkaCode::NotEnoughReplicas,
            20 => KafkaCode::NotEnoughReplicasAfterAppend,
            other => KafkaCode::Other(other),
        }
    }

    /// Whether the operation that produced this code may succeed on a later
    /// attempt without operator intervention.
    pub fn is_retriable(&self) -> bool {
        match *self {
            KafkaCode::InvalidMessage
            | KafkaCode::UnknownTopicOrPartition
            | KafkaCode::LeaderNotAvailable
            | KafkaCode::NotPartitionLeader
            | KafkaCode::RequestTimedOut
            | KafkaCode::OffsetsLoadInProgress
            | KafkaCode::CoordinatorNotAvailable
            | KafkaCode::NotCoordinator
            | KafkaCode::NotEnoughReplicas
            | KafkaCode::NotEnoughReplicasAfterAppend => true,
            _ => false,
        }
    }

    /// The symbolic name used in log output.
    pub fn name(&self) -> &'static str {
        match *self {
            KafkaCode::Unknown => "unknown",
            KafkaCode::None => "no_error",
            KafkaCode::OffsetOutOfRange => "offset_out_of_range",
            KafkaCode::InvalidMessage => "invalid_message",
            KafkaCode::UnknownTopicOrPartition => "unknown_topic_or_partition",
            KafkaCode::LeaderNotAvailable => "leader_not_available",
            KafkaCode::NotPartitionLeader => "not_partition_leader",
            KafkaCode::RequestTimedOut => "request_timed_out",
            KafkaCode::BrokerNotAvailable => "broker_not_available",
            KafkaCode::ReplicaNotAvailable => "replica_not_available",
            KafkaCode::MessageSizeTooLarge => "message_size_too_large",
            KafkaCode::StaleControllerEpoch => "stale_controller_epoch",
            KafkaCode::OffsetMetadataTooLarge => "offset_metadata_too_large",
            KafkaCode::OffsetsLoadInProgress => "offsets_load_in_progress",
            KafkaCode::CoordinatorNotAvailable => "coordinator_not_available",
            KafkaCode::NotCoordinator => "not_coordinator",
            KafkaCode::NotEnoughReplicas => "not_enough_replicas",
            KafkaCode::NotEnoughReplicasAfterAppend => "not_enough_replicas_after_append",
            KafkaCode::Other(_) => "unrecognized",
        }
    }
}

impl fmt::Display for KafkaCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let KafkaCode::Other(code) = *self {
            write!(f, "unrecognized error code {}", code)
        } else {
            f.write_str(self.name())
        }
    }
}

named!(pub parse_str<Option<String>>,
    do_parse!(
        len: be_i16
     >> s: cond!(len > 0, map!(map_res!(take!(len), str::from_utf8), String::from))
     >> (s)
    )
);

named!(pub parse_string<String>,
    do_parse!(
        len: be_i16
     >> s: cond_reduce!(len > 0, map!(map_res!(take!(len), str::from_utf8), String::from))
     >> (s)
    )
);

named!(pub parse_bytes<Option<Bytes>>,
    do_parse!(
        len: be_i32
     >> s: cond!(len > 0, map!(take!(len), Bytes::from))
     >> (s)
    )
);

/// Big-endian encoding of the protocol's variable-size primitives on top of
/// a growable buffer.
pub trait WriteExt {
    fn put_str<T: ByteOrder>(&mut self, s: Option<&str>) -> Result<()>;

    fn put_bytes<T: ByteOrder>(&mut self, d: Option<&[u8]>) -> Result<()>;

    fn put_array<T, E, F>(&mut self, items: Vec<E>, f: F) -> Result<()>
    where
        T: ByteOrder,
        F: FnMut(&mut Self, E) -> Result<()>;
}

impl WriteExt for BytesMut {
    fn put_str<T: ByteOrder>(&mut self, s: Option<&str>) -> Result<()> {
        match s {
            Some(s) if s.len() > i16::max_value() as usize => {
                Err(ErrorKind::CodecError("string exceeds i16 length prefix").into())
            }
            Some(s) => {
                self.put_i16::<T>(s.len() as i16);
                self.put_slice(s.as_bytes());
                Ok(())
            }
            None => {
                self.put_i16::<T>(-1);
                Ok(())
            }
        }
    }

    fn put_bytes<T: ByteOrder>(&mut self, d: Option<&[u8]>) -> Result<()> {
        match d {
            Some(d) if d.len() > i32::max_value() as usize => {
                Err(ErrorKind::CodecError("bytes exceed i32 length prefix").into())
            }
            Some(d) => {
                self.put_i32::<T>(d.len() as i32);
                self.put_slice(d);
                Ok(())
            }
            None => {
                self.put_i32::<T>(-1);
                Ok(())
            }
        }
    }

    fn put_array<T, E, F>(&mut self, items: Vec<E>, mut f: F) -> Result<()>
    where
        T: ByteOrder,
        F: FnMut(&mut Self, E) -> Result<()>,
    {
        self.put_i32::<T>(items.len() as i32);

        for item in items {
            f(self, item)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use byteorder::BigEndian;
    use nom::{ErrorKind, IResult, Needed};

    use super::*;

    #[test]
    fn test_parse_str() {
        assert_eq!(parse_str(b"\0"), IResult::Incomplete(Needed::Size(2)));
        assert_eq!(parse_str(b"\xff\xff"), IResult::Done(&b""[..], None));
        assert_eq!(parse_str(b"\0\0"), IResult::Done(&b""[..], None));
        assert_eq!(parse_str(b"\0\x04test"),
                   IResult::Done(&b""[..], Some("test".to_owned())));
    }

    #[test]
    fn test_parse_string() {
        assert_eq!(parse_string(b"\0"), IResult::Incomplete(Needed::Size(2)));
        assert_eq!(parse_string(b"\xff\xff"),
                   IResult::Error(::nom::Err::Position(ErrorKind::CondReduce, &b""[..])));
        assert_eq!(parse_string(b"\0\x04test"),
                   IResult::Done(&b""[..], "test".to_owned()));
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes(b"\0"), IResult::Incomplete(Needed::Size(4)));
        assert_eq!(parse_bytes(b"\xff\xff\xff\xff"), IResult::Done(&b""[..], None));
        assert_eq!(parse_bytes(b"\0\0\0\x04test"),
                   IResult::Done(&b""[..], Some(Bytes::from(&b"test"[..]))));
    }

    #[test]
    fn test_put_str() {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_str::<BigEndian>(Some("test")).unwrap();
        buf.put_str::<BigEndian>(None).unwrap();
        assert_eq!(&buf[..], b"\0\x04test\xff\xff");
    }

    #[test]
    fn test_put_bytes() {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_bytes::<BigEndian>(Some(b"test")).unwrap();
        buf.put_bytes::<BigEndian>(None).unwrap();
        assert_eq!(&buf[..], b"\0\0\0\x04test\xff\xff\xff\xff");
    }

    #[test]
    fn test_put_array() {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_array::<BigEndian, i32, _>(vec![1, 2], |buf, v| {
               buf.put_i32::<BigEndian>(v);
               Ok(())
           })
           .unwrap();
        assert_eq!(&buf[..], b"\0\0\0\x02\0\0\0\x01\0\0\0\x02");
    }

    #[test]
    fn test_retriable_codes() {
        for code in &[2, 3, 5, 6, 7, 14, 15, 16, 19, 20] {
            assert!(KafkaCode::from_code(*code).is_retriable(), "code {}", code);
        }
        for code in &[-1, 0, 1, 8, 9, 10, 12, 35] {
            assert!(!KafkaCode::from_code(*code).is_retriable(), "code {}", code);
        }
    }
}
