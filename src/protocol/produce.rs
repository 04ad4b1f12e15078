use byteorder::ByteOrder;
use bytes::{BufMut, BytesMut};
use nom::{be_i16, be_i32, be_i64};

use errors::Result;
use protocol::{parse_string, ErrorCode, MessageSet, Offset, PartitionId, RequiredAcks,
               WriteExt};

#[derive(Clone, Debug, PartialEq)]
pub struct ProduceRequest {
    pub required_acks: RequiredAcks,
    /// How long the broker may wait for the requested acknowledgements,
    /// in milliseconds.
    pub timeout: i32,
    pub topics: Vec<ProduceTopicRequest>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProduceTopicRequest {
    pub name: String,
    pub partitions: Vec<ProducePartitionRequest>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProducePartitionRequest {
    pub partition_id: PartitionId,
    pub message_set: MessageSet,
}

impl ProduceRequest {
    pub fn encode<T: ByteOrder>(self, dst: &mut BytesMut) -> Result<()> {
        dst.put_i16::<T>(self.required_acks);
        dst.put_i32::<T>(self.timeout);
        dst.put_array::<T, _, _>(self.topics, |buf, topic| {
            buf.put_str::<T>(Some(&topic.name))?;
            buf.put_array::<T, _, _>(topic.partitions, |buf, partition| {
                buf.put_i32::<T>(partition.partition_id);

                let size_off = buf.len();
                buf.put_i32::<T>(0);
                partition.message_set.encode::<T>(buf)?;
                let size = buf.len() - size_off - 4;
                T::write_i32(&mut buf[size_off..], size as i32);

                Ok(())
            })
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProduceResponse {
    pub topics: Vec<ProduceTopicResponse>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProduceTopicResponse {
    pub name: String,
    pub partitions: Vec<ProducePartitionResponse>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProducePartitionResponse {
    pub partition_id: PartitionId,
    pub error_code: ErrorCode,
    /// Offset assigned to the first message in the appended set.
    pub offset: Offset,
}

named!(pub parse_produce_response<ProduceResponse>,
    do_parse!(
        topics: length_count!(be_i32, parse_produce_topic)
     >> (ProduceResponse {
            topics: topics,
        })
    )
);

named!(parse_produce_topic<ProduceTopicResponse>,
    do_parse!(
        name: parse_string
     >> partitions: length_count!(be_i32, parse_produce_partition)
     >> (ProduceTopicResponse {
            name: name,
            partitions: partitions,
        })
    )
);

named!(parse_produce_partition<ProducePartitionResponse>,
    do_parse!(
        partition_id: be_i32
     >> error_code: be_i16
     >> offset: be_i64
     >> (ProducePartitionResponse {
            partition_id: partition_id,
            error_code: error_code,
            offset: offset,
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
        let request = ProduceRequest {
            required_acks: -1,
            timeout: 500,
            topics: vec![ProduceTopicRequest {
                             name: "t".to_owned(),
                             partitions: vec![ProducePartitionRequest {
                                                  partition_id: 2,
                                                  message_set:
                                                      MessageSet::new(vec![Message::new(None,
                                                          Some(Bytes::from(&b"v"[..])))]),
                                              }],
                         }],
        };

        let mut buf = BytesMut::with_capacity(128);
        request.encode::<BigEndian>(&mut buf).unwrap();

        // acks, timeout, topic and partition framing
        assert_eq!(&buf[..17], b"\xff\xff\0\0\x01\xf4\0\0\0\x01\0\x01t\0\0\0\x01");
        // partition id then the size-prefixed message set
        assert_eq!(&buf[17..21], b"\0\0\0\x02");
        let set_size = BigEndian::read_i32(&buf[21..25]) as usize;
        assert_eq!(buf.len(), 25 + set_size);
    }

    #[test]
    fn test_parse_response() {
        let raw = b"\0\0\0\x01\0\x01t\0\0\0\x01\0\0\0\x02\0\0\0\0\0\0\0\0\0\x2a";

        let expected = ProduceResponse {
            topics: vec![ProduceTopicResponse {
                             name: "t".to_owned(),
                             partitions: vec![ProducePartitionResponse {
                                                  partition_id: 2,
                                                  error_code: 0,
                                                  offset: 42,
                                              }],
                         }],
        };

        assert_eq!(parse_produce_response(&raw[..]),
                   IResult::Done(&b""[..], expected));
    }
}
