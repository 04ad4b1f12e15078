use byteorder::ByteOrder;
use bytes::{BufMut, BytesMut};
use hexplay::HexViewBuilder;

use errors::{ErrorKind, Result};
use protocol::{parse_fetch_response, parse_group_coordinator_response, parse_metadata_response,
               parse_offset_commit_response, parse_offset_fetch_response, parse_offset_response,
               parse_produce_response, ApiKeys, CorrelationId, FetchRequest, FetchResponse,
               GroupCoordinatorRequest, GroupCoordinatorResponse, MetadataRequest,
               MetadataResponse, OffsetCommitRequest, OffsetCommitResponse, OffsetFetchRequest,
               OffsetFetchResponse, OffsetRequest, OffsetResponse, ProduceRequest,
               ProduceResponse, RequestHeader, DEFAULT_API_VERSION};

mod conn;

pub use self::conn::{Connection, ConnectFuture, SendResponse};

/// A request bound for a broker, tagged with its api.
#[derive(Clone, Debug, PartialEq)]
pub enum KafkaRequest {
    Metadata(MetadataRequest),
    Produce(ProduceRequest),
    Fetch(FetchRequest),
    Offsets(OffsetRequest),
    OffsetCommit(OffsetCommitRequest),
    OffsetFetch(OffsetFetchRequest),
    GroupCoordinator(GroupCoordinatorRequest),
}

impl KafkaRequest {
    pub fn api_key(&self) -> ApiKeys {
        match *self {
            KafkaRequest::Metadata(_) => ApiKeys::Metadata,
            KafkaRequest::Produce(_) => ApiKeys::Produce,
            KafkaRequest::Fetch(_) => ApiKeys::Fetch,
            KafkaRequest::Offsets(_) => ApiKeys::Offsets,
            KafkaRequest::OffsetCommit(_) => ApiKeys::OffsetCommit,
            KafkaRequest::OffsetFetch(_) => ApiKeys::OffsetFetch,
            KafkaRequest::GroupCoordinator(_) => ApiKeys::GroupCoordinator,
        }
    }

    /// Renders the size-prefixed wire form: `i32 size` followed by the
    /// request preamble and the api-specific body.
    pub fn encode<T: ByteOrder>(self,
                                correlation_id: CorrelationId,
                                client_id: Option<&str>,
                                dst: &mut BytesMut)
                                -> Result<()> {
        let size_off = dst.len();
        dst.put_i32::<T>(0);

        let header = RequestHeader {
            api_key: self.api_key(),
            api_version: DEFAULT_API_VERSION,
            correlation_id: correlation_id,
            client_id: client_id.map(|s| s.to_owned()),
        };
        header.encode::<T>(dst)?;

        match self {
            KafkaRequest::Metadata(request) => request.encode::<T>(dst)?,
            KafkaRequest::Produce(request) => request.encode::<T>(dst)?,
            KafkaRequest::Fetch(request) => request.encode::<T>(dst)?,
            KafkaRequest::Offsets(request) => request.encode::<T>(dst)?,
            KafkaRequest::OffsetCommit(request) => request.encode::<T>(dst)?,
            KafkaRequest::OffsetFetch(request) => request.encode::<T>(dst)?,
            KafkaRequest::GroupCoordinator(request) => request.encode::<T>(dst)?,
        }

        let size = dst.len() - size_off - 4;
        T::write_i32(&mut dst[size_off..], size as i32);

        Ok(())
    }
}

/// A decoded response along with the correlation id it answers.
#[derive(Clone, Debug, PartialEq)]
pub struct KafkaResponse {
    pub correlation_id: CorrelationId,
    pub body: ResponseBody,
}

/// Response bodies routed by enum tag; the dispatcher matches on the
/// variant instead of looking handlers up by name.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseBody {
    Metadata(MetadataResponse),
    Produce(ProduceResponse),
    Fetch(FetchResponse),
    Offsets(OffsetResponse),
    OffsetCommit(OffsetCommitResponse),
    OffsetFetch(OffsetFetchResponse),
    GroupCoordinator(GroupCoordinatorResponse),
}

impl ResponseBody {
    pub fn api(&self) -> ApiKeys {
        match *self {
            ResponseBody::Metadata(_) => ApiKeys::Metadata,
            ResponseBody::Produce(_) => ApiKeys::Produce,
            ResponseBody::Fetch(_) => ApiKeys::Fetch,
            ResponseBody::Offsets(_) => ApiKeys::Offsets,
            ResponseBody::OffsetCommit(_) => ApiKeys::OffsetCommit,
            ResponseBody::OffsetFetch(_) => ApiKeys::OffsetFetch,
            ResponseBody::GroupCoordinator(_) => ApiKeys::GroupCoordinator,
        }
    }
}

/// Decodes a response payload using the api recorded for its correlation id.
pub fn parse_response(api: ApiKeys,
                      correlation_id: CorrelationId,
                      payload: &[u8])
                      -> Result<KafkaResponse> {
    let body = match api {
        ApiKeys::Metadata => {
            parse_metadata_response(payload)
                .to_full_result()
                .map(ResponseBody::Metadata)
        }
        ApiKeys::Produce => {
            parse_produce_response(payload)
                .to_full_result()
                .map(ResponseBody::Produce)
        }
        ApiKeys::Fetch => {
            parse_fetch_response(payload)
                .to_full_result()
                .map(ResponseBody::Fetch)
        }
        ApiKeys::Offsets => {
            parse_offset_response(payload)
                .to_full_result()
                .map(ResponseBody::Offsets)
        }
        ApiKeys::OffsetCommit => {
            parse_offset_commit_response(payload)
                .to_full_result()
                .map(ResponseBody::OffsetCommit)
        }
        ApiKeys::OffsetFetch => {
            parse_offset_fetch_response(payload)
                .to_full_result()
                .map(ResponseBody::OffsetFetch)
        }
        ApiKeys::GroupCoordinator => {
            parse_group_coordinator_response(payload)
                .to_full_result()
                .map(ResponseBody::GroupCoordinator)
        }
    };

    match body {
        Ok(body) => {
            Ok(KafkaResponse {
                   correlation_id: correlation_id,
                   body: body,
               })
        }
        Err(_) => {
            trace!("malformed {} response #{}:\n{}",
                   api,
                   correlation_id,
                   HexViewBuilder::new(payload).row_width(16).finish());

            Err(ErrorKind::CodecError("malformed response").into())
        }
    }
}
