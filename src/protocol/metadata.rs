use byteorder::ByteOrder;
use bytes::BytesMut;
use nom::{be_i16, be_i32};

use errors::Result;
use protocol::{parse_string, BrokerId, ErrorCode, PartitionId, WriteExt};

/// Requests metadata for the named topics; an empty list asks for all of
/// them.
#[derive(Clone, Debug, PartialEq)]
pub struct MetadataRequest {
    pub topics: Vec<String>,
}

impl MetadataRequest {
    pub fn encode<T: ByteOrder>(self, dst: &mut BytesMut) -> Result<()> {
        dst.put_array::<T, _, _>(self.topics, |buf, topic_name| {
            buf.put_str::<T>(Some(&topic_name))
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetadataResponse {
    pub brokers: Vec<BrokerMetadata>,
    pub topics: Vec<TopicMetadata>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BrokerMetadata {
    pub broker_id: BrokerId,
    pub host: String,
    pub port: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TopicMetadata {
    pub error_code: ErrorCode,
    pub name: String,
    pub partitions: Vec<PartitionMetadata>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PartitionMetadata {
    pub error_code: ErrorCode,
    pub partition_id: PartitionId,
    pub leader: BrokerId,
    pub replicas: Vec<BrokerId>,
    pub isrs: Vec<BrokerId>,
}

named!(pub parse_metadata_response<MetadataResponse>,
    do_parse!(
        brokers: length_count!(be_i32, parse_broker_metadata)
     >> topics: length_count!(be_i32, parse_topic_metadata)
     >> (MetadataResponse {
            brokers: brokers,
            topics: topics,
        })
    )
);

named!(parse_broker_metadata<BrokerMetadata>,
    do_parse!(
        broker_id: be_i32
     >> host: parse_string
     >> port: be_i32
     >> (BrokerMetadata {
            broker_id: broker_id,
            host: host,
            port: port,
        })
    )
);

named!(parse_topic_metadata<TopicMetadata>,
    do_parse!(
        error_code: be_i16
     >> name: parse_string
     >> partitions: length_count!(be_i32, parse_partition_metadata)
     >> (TopicMetadata {
            error_code: error_code,
            name: name,
            partitions: partitions,
        })
    )
);

named!(parse_partition_metadata<PartitionMetadata>,
    do_parse!(
        error_code: be_i16
     >> partition_id: be_i32
     >> leader: be_i32
     >> replicas: length_count!(be_i32, be_i32)
     >> isrs: length_count!(be_i32, be_i32)
     >> (PartitionMetadata {
            error_code: error_code,
            partition_id: partition_id,
            leader: leader,
            replicas: replicas,
            isrs: isrs,
        })
    )
);
