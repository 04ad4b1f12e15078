use byteorder::ByteOrder;
use bytes::{BufMut, BytesMut};
use nom::{be_i16, be_i32, be_i64};

use errors::Result;
use protocol::{parse_string, ErrorCode, Offset, PartitionId, WriteExt};

#[derive(Clone, Debug, PartialEq)]
pub struct OffsetRequest {
    pub replica_id: i32,
    pub topics: Vec<OffsetTopicRequest>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OffsetTopicRequest {
    pub name: String,
    pub partitions: Vec<OffsetPartitionRequest>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OffsetPartitionRequest {
    pub partition_id: PartitionId,
    /// `-1` for the latest offset, `-2` for the earliest, any non-negative
    /// value is an epoch-seconds timestamp.
    pub time: i64,
    pub max_offsets: i32,
}

impl OffsetRequest {
    pub fn encode<T: ByteOrder>(self, dst: &mut BytesMut) -> Result<()> {
        dst.put_i32::<T>(self.replica_id);
        dst.put_array::<T, _, _>(self.topics, |buf, topic| {
            buf.put_str::<T>(Some(&topic.name))?;
            buf.put_array::<T, _, _>(topic.partitions, |buf, partition| {
                buf.put_i32::<T>(partition.partition_id);
                buf.put_i64::<T>(partition.time);
                buf.put_i32::<T>(partition.max_offsets);
                Ok(())
            })
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OffsetResponse {
    pub topics: Vec<OffsetTopicResponse>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OffsetTopicResponse {
    pub name: String,
    pub partitions: Vec<OffsetPartitionResponse>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OffsetPartitionResponse {
    pub partition_id: PartitionId,
    pub error_code: ErrorCode,
    pub offsets: Vec<Offset>,
}

named!(pub parse_offset_response<OffsetResponse>,
    do_parse!(
        topics: length_count!(be_i32, parse_offset_topic)
     >> (OffsetResponse {
            topics: topics,
        })
    )
);

named!(parse_offset_topic<OffsetTopicResponse>,
    do_parse!(
        name: parse_string
     >> partitions: length_count!(be_i32, parse_offset_partition)
     >> (OffsetTopicResponse {
            name: name,
            partitions: partitions,
        })
    )
);

named!(parse_offset_partition<OffsetPartitionResponse>,
    do_parse!(
        partition_id: be_i32
     >> error_code: be_i16
     >> offsets: length_count!(be_i32, be_i64)
     >> (OffsetPartitionResponse {
            partition_id: partition_id,
            error_code: error_code,
            offsets: offsets,
        })
    )
);
