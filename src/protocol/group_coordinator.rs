use byteorder::ByteOrder;
use bytes::BytesMut;
use nom::{be_i16, be_i32};

use errors::Result;
use protocol::{parse_string, BrokerId, ErrorCode, WriteExt};

/// Asks any broker which of its peers coordinates the given consumer group.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupCoordinatorRequest {
    pub group: String,
}

impl GroupCoordinatorRequest {
    pub fn encode<T: ByteOrder>(self, dst: &mut BytesMut) -> Result<()> {
        dst.put_str::<T>(Some(&self.group))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GroupCoordinatorResponse {
    pub error_code: ErrorCode,
    pub coordinator_id: BrokerId,
    pub coordinator_host: String,
    pub coordinator_port: i32,
}

named!(pub parse_group_coordinator_response<GroupCoordinatorResponse>,
    do_parse!(
        error_code: be_i16
     >> coordinator_id: be_i32
     >> coordinator_host: parse_string
     >> coordinator_port: be_i32
     >> (GroupCoordinatorResponse {
            error_code: error_code,
            coordinator_id: coordinator_id,
            coordinator_host: coordinator_host,
            coordinator_port: coordinator_port,
        })
    )
);
