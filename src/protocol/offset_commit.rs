//! The v0 offset commit api, compatible with clusters running 0.8.1.

use byteorder::ByteOrder;
use bytes::{BufMut, BytesMut};
use nom::{be_i16, be_i32};

use errors::Result;
use protocol::{parse_string, ErrorCode, Offset, PartitionId, WriteExt};

#[derive(Clone, Debug, PartialEq)]
pub struct OffsetCommitRequest {
    pub group: String,
    pub topics: Vec<OffsetCommitTopicRequest>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OffsetCommitTopicRequest {
    pub name: String,
    pub partitions: Vec<OffsetCommitPartitionRequest>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OffsetCommitPartitionRequest {
    pub partition_id: PartitionId,
    pub offset: Offset,
    pub metadata: Option<String>,
}

impl OffsetCommitRequest {
    pub fn encode<T: ByteOrder>(self, dst: &mut BytesMut) -> Result<()> {
        dst.put_str::<T>(Some(&self.group))?;
        dst.put_array::<T, _, _>(self.topics, |buf, topic| {
            buf.put_str::<T>(Some(&topic.name))?;
            buf.put_array::<T, _, _>(topic.partitions, |buf, partition| {
                buf.put_i32::<T>(partition.partition_id);
                buf.put_i64::<T>(partition.offset);
                buf.put_str::<T>(partition.metadata.as_ref().map(|s| s.as_str()))
            })
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OffsetCommitResponse {
    pub topics: Vec<OffsetCommitTopicResponse>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OffsetCommitTopicResponse {
    pub name: String,
    pub partitions: Vec<OffsetCommitPartitionResponse>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OffsetCommitPartitionResponse {
    pub partition_id: PartitionId,
    pub error_code: ErrorCode,
}

named!(pub parse_offset_commit_response<OffsetCommitResponse>,
    do_parse!(
        topics: length_count!(be_i32, parse_offset_commit_topic)
     >> (OffsetCommitResponse {
            topics: topics,
        })
    )
);

named!(parse_offset_commit_topic<OffsetCommitTopicResponse>,
    do_parse!(
        name: parse_string
     >> partitions: length_count!(be_i32, parse_offset_commit_partition)
     >> (OffsetCommitTopicResponse {
            name: name,
            partitions: partitions,
        })
    )
);

named!(parse_offset_commit_partition<OffsetCommitPartitionResponse>,
    do_parse!(
        partition_id: be_i32
     >> error_code: be_i16
     >> (OffsetCommitPartitionResponse {
            partition_id: partition_id,
            error_code: error_code,
        })
    )
);

#[cfg(test)]
mod tests {
    use byteorder::BigEndian;
    use nom::IResult;

    use super::*;

    #[test]
    fn test_encode_request() {
        let request = OffsetCommitRequest {
            group: "g".to_owned(),
            topics: vec![OffsetCommitTopicRequest {
                             name: "t".to_owned(),
                             partitions: vec![OffsetCommitPartitionRequest {
                                                  partition_id: 0,
                                                  offset: 2,
                                                  metadata: Some("m".to_owned()),
                                              }],
                         }],
        };

        let mut buf = BytesMut::with_capacity(64);
        request.encode::<BigEndian>(&mut buf).unwrap();

        assert_eq!(&buf[..],
                   &b"\0\x01g\0\0\0\x01\0\x01t\0\0\0\x01\0\0\0\0\
                      \0\0\0\0\0\0\0\x02\0\x01m"[..]);
    }

    #[test]
    fn test_parse_response() {
        let raw = b"\0\0\0\x01\0\x01t\0\0\0\x01\0\0\0\0\0\x0c";

        let expected = OffsetCommitResponse {
            topics: vec![OffsetCommitTopicResponse {
                             name: "t".to_owned(),
                             partitions: vec![OffsetCommitPartitionResponse {
                                                  partition_id: 0,
                                                  error_code: 12,
                                              }],
                         }],
        };

        assert_eq!(parse_offset_commit_response(&raw[..]),
                   IResult::Done(&b""[..], expected));
    }
}
