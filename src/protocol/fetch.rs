use byteorder::ByteOrder;
use bytes::{BufMut, BytesMut};
use nom::{be_i16, be_i32, be_i64};

use errors::Result;
use protocol::{parse_message_set, parse_string, ErrorCode, MessageSet, Offset, PartitionId,
               WriteExt};

#[derive(Clone, Debug, PartialEq)]
pub struct FetchRequest {
    /// The node id of the replica initiating this request; consumers always
    /// send `-1`.
    pub replica_id: i32,
    /// The maximum amount of time in milliseconds to block waiting if
    /// insufficient data is available at the time the request is issued.
    pub max_wait_time: i32,
    /// This is the minimum number of bytes of messages that must be
    /// available to give a response.
    pub min_bytes: i32,
    pub topics: Vec<FetchTopicRequest>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchTopicRequest {
    pub name: String,
    pub partitions: Vec<FetchPartitionRequest>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchPartitionRequest {
    pub partition_id: PartitionId,
    /// The offset to begin this fetch from.
    pub offset: Offset,
    /// The maximum bytes to include in the message set for this partition.
    pub max_bytes: i32,
}

impl FetchRequest {
    pub fn encode<T: ByteOrder>(self, dst: &mut BytesMut) -> Result<()> {
        dst.put_i32::<T>(self.replica_id);
        dst.put_i32::<T>(self.max_wait_time);
        dst.put_i32::<T>(self.min_bytes);
        dst.put_array::<T, _, _>(self.topics, |buf, topic| {
            buf.put_str::<T>(Some(&topic.name))?;
            buf.put_array::<T, _, _>(topic.partitions, |buf, partition| {
                buf.put_i32::<T>(partition.partition_id);
                buf.put_i64::<T>(partition.offset);
                buf.put_i32::<T>(partition.max_bytes);
                Ok(())
            })
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchResponse {
    pub topics: Vec<FetchTopicResponse>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchTopicResponse {
    pub name: String,
    pub partitions: Vec<FetchPartitionResponse>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchPartitionResponse {
    pub partition_id: PartitionId,
    pub error_code: ErrorCode,
    /// The offset at the end of the log for this partition.
    pub highwater_mark_offset: Offset,
    pub message_set: MessageSet,
}

named!(pub parse_fetch_response<FetchResponse>,
    do_parse!(
        topics: length_count!(be_i32, parse_fetch_topic)
     >> (FetchResponse {
            topics: topics,
        })
    )
);

named!(parse_fetch_topic<FetchTopicResponse>,
    do_parse!(
        name: parse_string
     >> partitions: length_count!(be_i32, parse_fetch_partition)
     >> (FetchTopicResponse {
            name: name,
            partitions: partitions,
        })
    )
);

named!(parse_fetch_partition<FetchPartitionResponse>,
    do_parse!(
        partition_id: be_i32
     >> error_code: be_i16
     >> highwater_mark_offset: be_i64
     >> message_set: map_res!(length_bytes!(be_i32), parse_message_set)
     >> (FetchPartitionResponse {
            partition_id: partition_id,
            error_code: error_code,
            highwater_mark_offset: highwater_mark_offset,
            message_set: message_set,
        })
    )
);

#[cfg(test)]
mod tests {
    use byteorder::BigEndian;
    use bytes::Bytes;
    use nom::IResult;

    use super::*;
    use protocol::Message;

    #[test]
    fn test_encode_request() {
        let request = FetchRequest {
            replica_id: -1,
            max_wait_time: 1000,
            min_bytes: 1,
            topics: vec![FetchTopicRequest {
                             name: "t".to_owned(),
                             partitions: vec![FetchPartitionRequest {
                                                  partition_id: 0,
                                                  offset: 7,
                                                  max_bytes: 1024,
                                              }],
                         }],
        };

        let mut buf = BytesMut::with_capacity(64);
        request.encode::<BigEndian>(&mut buf).unwrap();

        assert_eq!(&buf[..],
                   &b"\xff\xff\xff\xff\0\0\x03\xe8\0\0\0\x01\0\0\0\x01\0\x01t\
                      \0\0\0\x01\0\0\0\0\0\0\0\0\0\0\0\x07\0\0\x04\0"[..]);
    }

    #[test]
    fn test_parse_response() {
        let mut message_set = BytesMut::with_capacity(64);
        MessageSet::new(vec![Message {
                                 offset: 3,
                                 compression: ::compression::Compression::None,
                                 key: None,
                                 value: Some(Bytes::from(&b"v"[..])),
                             }])
            .encode::<BigEndian>(&mut message_set)
            .unwrap();

        let mut raw = BytesMut::with_capacity(128);
        raw.put_slice(b"\0\0\0\x01\0\x01t\0\0\0\x01\0\0\0\x02\0\0\0\0\0\0\0\0\0\x09");
        raw.put_i32::<BigEndian>(message_set.len() as i32);
        raw.put_slice(&message_set);

        match parse_fetch_response(&raw[..]) {
            IResult::Done(remaining, response) => {
                assert!(remaining.is_empty());
                assert_eq!(response.topics.len(), 1);

                let partition = &response.topics[0].partitions[0];
                assert_eq!(partition.partition_id, 2);
                assert_eq!(partition.error_code, 0);
                assert_eq!(partition.highwater_mark_offset, 9);
                assert_eq!(partition.message_set.messages.len(), 1);
                assert_eq!(partition.message_set.messages[0].offset, 3);
            }
            other => panic!("unexpected parse result: {:?}", other),
        }
    }
}
