use bytes::Bytes;
use serde_json::{self, Value};

use errors::Result;

/// Turns application values into message payloads.
pub trait Serializer {
    /// The type of value this serializer accepts.
    type Item;

    fn serialize(&self, topic_name: &str, item: Self::Item) -> Result<Bytes>;
}

/// Turns message payloads back into application values.
pub trait Deserializer {
    /// The type of value this deserializer produces.
    type Item;

    fn deserialize(&self, topic_name: &str, data: &[u8]) -> Result<Self::Item>;
}

/// JSON serializer over `serde_json::Value`.
///
/// Object keys render in sorted order, so equal values always serialize to
/// identical payloads.
#[derive(Clone, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    type Item = Value;

    fn serialize(&self, _topic_name: &str, item: Value) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(&item)?))
    }
}

#[derive(Clone, Debug, Default)]
pub struct JsonDeserializer;

impl Deserializer for JsonDeserializer {
    type Item = Value;

    fn deserialize(&self, _topic_name: &str, data: &[u8]) -> Result<Value> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Passes payload bytes through untouched.
#[derive(Clone, Debug, Default)]
pub struct RawSerializer;

impl Serializer for RawSerializer {
    type Item = Bytes;

    fn serialize(&self, _topic_name: &str, item: Bytes) -> Result<Bytes> {
        Ok(item)
    }
}

#[derive(Clone, Debug, Default)]
pub struct RawDeserializer;

impl Deserializer for RawDeserializer {
    type Item = Bytes;

    fn deserialize(&self, _topic_name: &str, data: &[u8]) -> Result<Bytes> {
        Ok(Bytes::from(data))
    }
}
