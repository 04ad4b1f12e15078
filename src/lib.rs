//! An asynchronous client for Kafka 0.8/0.9 brokers.
//!
//! `sund` keeps one connection per broker, multiplexes requests over them
//! by correlation id, and heals its view of the cluster whenever metadata
//! drifts.  On top of that sit a batching [`KafkaProducer`], a standalone
//! [`SingleConsumer`] driven by the stateless offset api, and a
//! [`GroupedConsumer`] that splits partitions with its peers through an
//! external coordination service.

#![recursion_limit = "128"]

#[macro_use]
extern crate log;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate lazy_static;
extern crate byteorder;
extern crate bytes;
#[macro_use]
extern crate nom;
extern crate crc;
extern crate flate2;
extern crate hexplay;
#[macro_use]
extern crate prometheus;
extern crate rand;
extern crate serde;
#[macro_use]
extern crate serde_derive;
#[cfg_attr(test, macro_use)]
extern crate serde_json;
extern crate snap;
extern crate time;
extern crate twox_hash;

extern crate futures;
extern crate tokio_core;
extern crate tokio_io;
extern crate tokio_timer;

pub mod errors;
pub mod compression;
pub mod protocol;
pub mod network;
pub mod client;
pub mod producer;
pub mod consumer;
pub mod coordination;
pub mod serialization;

pub mod consts {
    pub use client::{DEFAULT_KAFKA_PORT, DEFAULT_RETRY_BACKOFF_MILLIS};
    pub use consumer::{DEFAULT_MAX_BYTES, DEFAULT_MAX_WAIT_TIME_MILLIS, DEFAULT_MIN_BYTES};
    pub use producer::{DEFAULT_ACK_TIMEOUT_MILLIS, DEFAULT_BATCH_SIZE, DEFAULT_REQUIRED_ACKS};
}

pub use client::{ClientConfig, ClientCore, Cluster, Metrics, StaticBoxFuture};
pub use compression::Compression;
pub use consumer::{Consumer, ConsumerConfig, GroupConfig, GroupMembership, GroupedConsumer,
                   OffsetStrategy, SingleConsumer, StandaloneOffsets, StartPosition};
pub use coordination::{round_robin_allocator, CoordinationClient, MemoryCoordination,
                       PartitionAllocator, Signal};
pub use errors::{Error, ErrorKind, Result};
pub use network::{Connection, KafkaRequest, KafkaResponse, ResponseBody};
pub use producer::{KafkaProducer, KeyMaker, Partitioner, ProducerConfig, RandomPartitioner};
pub use protocol::{ApiKeys, BrokerId, CorrelationId, KafkaCode, Message, MessageSet, Offset,
                   PartitionId};
pub use serialization::{Deserializer, JsonDeserializer, JsonSerializer, RawDeserializer,
                        RawSerializer, Serializer};
