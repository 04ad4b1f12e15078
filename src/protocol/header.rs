use byteorder::ByteOrder;
use bytes::{BufMut, BytesMut};

use errors::Result;
use protocol::{ApiKeys, ApiVersion, CorrelationId, WriteExt};

/// Preamble shared by every request:
///
/// ```text
/// RequestHeader => ApiKey ApiVersion CorrelationId ClientId
///   ApiKey => int16
///   ApiVersion => int16
///   CorrelationId => int32
///   ClientId => string
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct RequestHeader {
    pub api_key: ApiKeys,
    pub api_version: ApiVersion,
    pub correlation_id: CorrelationId,
    pub client_id: Option<String>,
}

impl RequestHeader {
    pub fn encode<T: ByteOrder>(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_i16::<T>(self.api_key.key());
        dst.put_i16::<T>(self.api_version);
        dst.put_i32::<T>(self.correlation_id);
        dst.put_str::<T>(self.client_id.as_ref().map(|s| s.as_str()))
    }
}
