use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use futures::future::Future;
use time;

use client::{ClientCore, StaticBoxFuture};
use errors::{Error, ErrorKind, Result};
use network::{KafkaRequest, KafkaResponse, ResponseBody};
use protocol::{BrokerId, FetchPartitionRequest, FetchRequest, FetchTopicRequest, KafkaCode,
               MessageSet, Offset, PartitionId, CONSUMER_REPLICA_ID};
use serialization::Deserializer;

mod config;
mod single;
mod grouped;

pub use self::config::{ConsumerConfig, GroupConfig, DEFAULT_MAX_BYTES,
                       DEFAULT_MAX_WAIT_TIME_MILLIS, DEFAULT_MIN_BYTES};
pub use self::grouped::{GroupMembership, GroupedConsumer};
pub use self::single::{SingleConsumer, StandaloneOffsets};

/// Protocol `time` value for the very latest offset.
pub const LATEST_OFFSET: i64 = -1;
/// Protocol `time` value for the earliest available offset.
pub const EARLIEST_OFFSET: i64 = -2;

/// Where to begin consuming a topic that has no synced offsets yet.
#[derive(Clone, Debug)]
pub enum StartPosition {
    /// The earliest offset still held by the brokers.
    Beginning,
    /// Only messages appended from now on.
    Latest,
    /// Messages appended at or after an epoch-seconds timestamp.
    At(i64),
    /// Messages appended within the given duration before now.
    Ago(Duration),
}

impl StartPosition {
    /// Translates the position into the offset api's `time` parameter.
    pub fn to_offset_time(&self) -> i64 {
        match *self {
            StartPosition::Beginning => EARLIEST_OFFSET,
            StartPosition::Latest => LATEST_OFFSET,
            StartPosition::At(epoch_seconds) => epoch_seconds,
            StartPosition::Ago(duration) => time::get_time().sec - duration.as_secs() as i64,
        }
    }
}

/// Offset bookkeeping shared by the consumer and its offset strategy.
///
/// A topic is absent from `synced_offsets` until its offsets have been
/// determined; dropping it from the set forces re-determination on the next
/// consume.
#[derive(Default)]
pub struct ConsumerState {
    pub(crate) offsets: HashMap<String, HashMap<PartitionId, Offset>>,
    pub(crate) synced_offsets: HashSet<String>,
}

impl ConsumerState {
    pub(crate) fn offset(&self, topic: &str, partition_id: PartitionId) -> Offset {
        self.offsets
            .get(topic)
            .and_then(|partitions| partitions.get(&partition_id))
            .cloned()
            .unwrap_or(0)
    }

    pub(crate) fn set_offset(&mut self, topic: &str, partition_id: PartitionId, offset: Offset) {
        self.offsets
            .entry(topic.to_owned())
            .or_insert_with(HashMap::new)
            .insert(partition_id, offset);
    }
}

/// How a consumer learns which partitions it owns and where to start
/// reading them.  `SingleConsumer` reads everything via the stateless
/// offset api; `GroupedConsumer` asks its group coordinator.
pub trait OffsetStrategy: Clone + 'static {
    /// The topics and partitions this consumer is responsible for.
    fn allocation(&self) -> HashMap<String, Vec<PartitionId>>;

    /// Fills in `ConsumerState::offsets` for the topic, or fails with
    /// `NoOffsets` when that is fatally impossible.
    fn determine_offsets(&self, topic: &str, start: Option<&StartPosition>) -> StaticBoxFuture<()>;

    /// Extra startup work once the cluster is up.
    fn on_connect(&self) -> StaticBoxFuture<()> {
        StaticBoxFuture::ok(())
    }

    /// Hook invoked after each successful consume of `topic`.
    fn post_consume(&self, _topic: &str) -> StaticBoxFuture<()> {
        StaticBoxFuture::ok(())
    }

    /// Cleanup on close.
    fn wind_down(&self) -> StaticBoxFuture<()> {
        StaticBoxFuture::ok(())
    }
}

/// Fetching client over a pluggable offset strategy.
pub struct Consumer<S, D>
where
    S: OffsetStrategy,
    D: Deserializer,
{
    core: ClientCore,
    config: ConsumerConfig,
    deserializer: D,
    state: Rc<RefCell<ConsumerState>>,
    strategy: S,
}

impl<S, D> Clone for Consumer<S, D>
where
    S: OffsetStrategy,
    D: Deserializer + Clone,
{
    fn clone(&self) -> Self {
        Consumer {
            core: self.core.clone(),
            config: self.config.clone(),
            deserializer: self.deserializer.clone(),
            state: self.state.clone(),
            strategy: self.strategy.clone(),
        }
    }
}

impl<S, D> Consumer<S, D>
where
    S: OffsetStrategy,
    D: Deserializer + Clone + 'static,
    D::Item: 'static,
{
    pub(crate) fn from_parts(core: ClientCore,
                             config: ConsumerConfig,
                             deserializer: D,
                             state: Rc<RefCell<ConsumerState>>,
                             strategy: S)
                             -> Consumer<S, D> {
        Consumer {
            core: core,
            config: config,
            deserializer: deserializer,
            state: state,
            strategy: strategy,
        }
    }

    pub(crate) fn core(&self) -> &ClientCore {
        &self.core
    }

    pub(crate) fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn connect(&self) -> StaticBoxFuture<()> {
        let strategy = self.strategy.clone();

        StaticBoxFuture::new(self.core.connect().and_then(move |_| strategy.on_connect()))
    }

    /// Fetches from the topic and returns the deserialized values, in the
    /// order the per-leader responses arrived.
    ///
    /// Offsets are synced through the strategy first when needed; a fatal
    /// `NoOffsets` yields an empty result.  An unknown or empty allocation
    /// triggers one heal before giving up on the call.
    pub fn consume(&self, topic: &str, start: Option<StartPosition>) -> StaticBoxFuture<Vec<D::Item>> {
        if self.core.is_closing() {
            return StaticBoxFuture::ok(Vec::new());
        }

        let consumer = self.clone();
        let topic = topic.to_owned();

        let synced = self.state.borrow().synced_offsets.contains(&topic);

        let sync = if synced {
            StaticBoxFuture::ok(true)
        } else {
            let state = self.state.clone();
            let sync_topic = topic.clone();

            StaticBoxFuture::new(self.strategy
                                     .determine_offsets(&topic, start.as_ref())
                                     .then(move |result| match result {
                Ok(()) => {
                    state.borrow_mut().synced_offsets.insert(sync_topic);
                    Ok(true)
                }
                Err(Error(ErrorKind::NoOffsets, _)) => {
                    error!("unable to determine offsets for topic {}", sync_topic);
                    Ok(false)
                }
                Err(err) => Err(err),
            }))
        };

        StaticBoxFuture::new(sync.and_then(move |synced| if synced {
                                               consumer.fetch(topic)
                                           } else {
                                               StaticBoxFuture::ok(Vec::new())
                                           }))
    }

    fn allocated_partitions(&self, topic: &str) -> Vec<PartitionId> {
        self.strategy
            .allocation()
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    fn fetch(&self, topic: String) -> StaticBoxFuture<Vec<D::Item>> {
        let lookup = if self.allocated_partitions(&topic).is_empty() {
            debug!("consuming unknown topic {}, reloading metadata", topic);
            self.core.cluster().heal()
        } else {
            StaticBoxFuture::ok(())
        };

        let consumer = self.clone();

        StaticBoxFuture::new(lookup.and_then(move |_| {
            let partitions = consumer.allocated_partitions(&topic);

            if partitions.is_empty() {
                error!("consuming unknown topic {} and not auto-created", topic);
                return StaticBoxFuture::ok(Vec::new());
            }

            let mut ordered: HashMap<BrokerId, Vec<PartitionId>> = HashMap::new();

            for partition_id in partitions {
                match consumer.core.cluster().get_leader(&topic, partition_id) {
                    Some(leader) => {
                        ordered
                            .entry(leader)
                            .or_insert_with(Vec::new)
                            .push(partition_id)
                    }
                    None => consumer.core.request_heal(),
                }
            }

            let mut requests = HashMap::new();

            {
                let state = consumer.state.borrow();

                for (leader, partitions) in ordered {
                    let max_partition_bytes = consumer.config.max_bytes /
                                              partitions.len() as i32;

                    let partition_requests = partitions
                        .into_iter()
                        .map(|partition_id| {
                                 FetchPartitionRequest {
                                     partition_id: partition_id,
                                     offset: state.offset(&topic, partition_id),
                                     max_bytes: max_partition_bytes,
                                 }
                             })
                        .collect();

                    requests.insert(leader,
                                    KafkaRequest::Fetch(FetchRequest {
                                        replica_id: CONSUMER_REPLICA_ID,
                                        max_wait_time: consumer.config.max_wait_time,
                                        min_bytes: consumer.config.min_bytes,
                                        topics: vec![FetchTopicRequest {
                                                         name: topic.clone(),
                                                         partitions: partition_requests,
                                                     }],
                                    }));
                }
            }

            let handler_consumer = consumer.clone();
            let post_consumer = consumer.clone();
            let post_topic = topic.clone();

            let fetched = consumer
                .core
                .dispatch(requests,
                          move |response| handler_consumer.handle_fetch_response(response))
                .map(|results| {
                         results
                             .into_iter()
                             .flat_map(|(_, messages)| messages)
                             .collect::<Vec<_>>()
                     });

            StaticBoxFuture::new(fetched.and_then(move |values| {
                post_consumer
                    .strategy
                    .post_consume(&post_topic)
                    .map(move |_| values)
            }))
        }))
    }

    /// Consumers fetch a single topic per request, so only the first topic
    /// of the response is examined.  Retriable codes flag a heal; an
    /// out-of-range offset desyncs the topic so offsets are re-determined.
    fn handle_fetch_response(&self, response: KafkaResponse) -> Result<Vec<D::Item>> {
        let fetch = match response.body {
            ResponseBody::Fetch(fetch) => fetch,
            body => bail!(ErrorKind::UnhandledResponse(body.api())),
        };

        let mut values = Vec::new();

        if let Some(topic) = fetch.topics.into_iter().next() {
            for partition in topic.partitions {
                let code = KafkaCode::from_code(partition.error_code);

                if code == KafkaCode::None {
                    values.extend(self.deserialize_messages(&topic.name,
                                                            partition.partition_id,
                                                            partition.message_set));
                } else if code == KafkaCode::OffsetOutOfRange {
                    warn!("offset out of range for topic {}", topic.name);
                    self.state.borrow_mut().synced_offsets.remove(&topic.name);
                } else if code.is_retriable() {
                    self.core.request_heal();
                } else {
                    error!("got error {} for topic {} partition {}",
                           code,
                           topic.name,
                           partition.partition_id);
                }
            }
        }

        if let Some(metrics) = self.core.metrics() {
            metrics.messages_consumed(values.len());
        }

        Ok(values)
    }

    /// Runs the deserializer over each message in order.  A failed message
    /// is logged and skipped without advancing the offset; successful ones
    /// advance the partition offset to just past the broker-assigned one.
    fn deserialize_messages(&self,
                            topic: &str,
                            partition_id: PartitionId,
                            message_set: MessageSet)
                            -> Vec<D::Item> {
        let mut values = Vec::new();

        for message in message_set.messages {
            let payload = message.value.as_ref().map(|value| &value[..]).unwrap_or(&[]);

            match self.deserializer.deserialize(topic, payload) {
                Ok(value) => {
                    values.push(value);
                    self.state
                        .borrow_mut()
                        .set_offset(topic, partition_id, message.offset + 1);
                }
                Err(err) => {
                    error!("error deserializing message at offset {} of {}|{}, {}",
                           message.offset,
                           topic,
                           partition_id,
                           err);
                }
            }
        }

        values
    }

    pub fn close(&self) -> StaticBoxFuture<()> {
        self.core.set_closing();

        let core = self.core.clone();

        StaticBoxFuture::new(self.strategy
                                 .wind_down()
                                 .map(move |_| core.cluster().stop()))
    }
}
