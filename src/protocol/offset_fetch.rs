use byteorder::ByteOrder;
use bytes::{BufMut, BytesMut};
use nom::{be_i16, be_i32, be_i64};

use errors::Result;
use protocol::{parse_str, parse_string, ErrorCode, Offset, PartitionId, WriteExt};

#[derive(Clone, Debug, PartialEq)]
pub struct OffsetFetchRequest {
    pub group: String,
    pub topics: Vec<OffsetFetchTopicRequest>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OffsetFetchTopicRequest {
    pub name: String,
    pub partitions: Vec<PartitionId>,
}

impl OffsetFetchRequest {
    pub fn encode<T: ByteOrder>(self, dst: &mut BytesMut) -> Result<()> {
        dst.put_str::<T>(Some(&self.group))?;
        dst.put_array::<T, _, _>(self.topics, |buf, topic| {
            buf.put_str::<T>(Some(&topic.name))?;
            buf.put_array::<T, _, _>(topic.partitions, |buf, partition_id| {
                buf.put_i32::<T>(partition_id);
                Ok(())
            })
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OffsetFetchResponse {
    pub topics: Vec<OffsetFetchTopicResponse>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OffsetFetchTopicResponse {
    pub name: String,
    pub partitions: Vec<OffsetFetchPartitionResponse>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OffsetFetchPartitionResponse {
    pub partition_id: PartitionId,
    pub offset: Offset,
    pub metadata: Option<String>,
    pub error_code: ErrorCode,
}

named!(pub parse_offset_fetch_response<OffsetFetchResponse>,
    do_parse!(
        topics: length_count!(be_i32, parse_offset_fetch_topic)
     >> (OffsetFetchResponse {
            topics: topics,
        })
    )
);

named!(parse_offset_fetch_topic<OffsetFetchTopicResponse>,
    do_parse!(
        name: parse_string
     >> partitions: length_count!(be_i32, parse_offset_fetch_partition)
     >> (OffsetFetchTopicResponse {
            name: name,
            partitions: partitions,
        })
    )
);

named!(parse_offset_fetch_partition<OffsetFetchPartitionResponse>,
    do_parse!(
        partition_id: be_i32
     >> offset: be_i64
     >> metadata: parse_str
     >> error_code: be_i16
     >> (OffsetFetchPartitionResponse {
            partition_id: partition_id,
            offset: offset,
            metadata: metadata,
            error_code: error_code,
        })
    )
);
