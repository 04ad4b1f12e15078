use std::cell::RefCell;
use std::collections::HashMap;
use std::mem;
use std::rc::Rc;

use bytes::Bytes;
use futures::future::Future;
use tokio_core::reactor::Handle;

use client::{ClientConfig, ClientCore, StaticBoxFuture};
use errors::Result;
use network::{KafkaRequest, KafkaResponse, ResponseBody};
use protocol::{BrokerId, CorrelationId, KafkaCode, Message, MessageSet, PartitionId,
               ProducePartitionRequest, ProduceRequest, ProduceTopicRequest};
use serialization::{JsonSerializer, Serializer};

mod config;
mod partitioner;

pub use self::config::{ProducerConfig, DEFAULT_ACK_TIMEOUT_MILLIS, DEFAULT_BATCH_SIZE,
                       DEFAULT_REQUIRED_ACKS};
pub use self::partitioner::{Partitioner, RandomPartitioner};

/// Extracts an optional message key from the value being produced; keys
/// route messages through the partitioner and default to `None`.
pub type KeyMaker<T> = Rc<Fn(&T) -> Option<Bytes>>;

/// Client that appends messages to Kafka topics.
///
/// Messages accumulate in an unsent buffer until a flush sends them,
/// grouped by partition leader.  Messages whose partitions respond with a
/// retriable error move back into the buffer and flag a cluster heal;
/// fatal codes are logged and the affected messages abandoned.
pub struct KafkaProducer<S = JsonSerializer, P = RandomPartitioner>
where
    S: Serializer,
{
    core: ClientCore,
    config: ProducerConfig,
    serializer: S,
    partitioner: P,
    key_maker: KeyMaker<S::Item>,
    state: Rc<RefCell<ProducerState>>,
}

#[derive(Default)]
struct ProducerState {
    unsent: HashMap<String, Vec<Message>>,
    in_flight: HashMap<CorrelationId, HashMap<String, HashMap<PartitionId, Vec<Message>>>>,
}

impl<S, P> Clone for KafkaProducer<S, P>
where
    S: Serializer + Clone,
    P: Clone,
{
    fn clone(&self) -> Self {
        KafkaProducer {
            core: self.core.clone(),
            config: self.config.clone(),
            serializer: self.serializer.clone(),
            partitioner: self.partitioner.clone(),
            key_maker: self.key_maker.clone(),
            state: self.state.clone(),
        }
    }
}

impl KafkaProducer<JsonSerializer, RandomPartitioner> {
    /// Producer with the default JSON serializer, no keys and random
    /// partitioning.
    pub fn new(client_config: ClientConfig,
               config: ProducerConfig,
               handle: Handle)
               -> KafkaProducer<JsonSerializer, RandomPartitioner> {
        KafkaProducer::with_serialization(client_config,
                                          config,
                                          handle,
                                          JsonSerializer,
                                          Rc::new(|_: &_| None),
                                          RandomPartitioner)
    }
}

impl<S, P> KafkaProducer<S, P>
where
    S: Serializer + Clone + 'static,
    S::Item: 'static,
    P: Partitioner + Clone + 'static,
{
    pub fn with_serialization(client_config: ClientConfig,
                              config: ProducerConfig,
                              handle: Handle,
                              serializer: S,
                              key_maker: KeyMaker<S::Item>,
                              partitioner: P)
                              -> KafkaProducer<S, P> {
        KafkaProducer {
            core: ClientCore::new(client_config, handle),
            config: config,
            serializer: serializer,
            partitioner: partitioner,
            key_maker: key_maker,
            state: Rc::new(RefCell::new(ProducerState::default())),
        }
    }

    pub fn connect(&self) -> StaticBoxFuture<()> {
        self.core.connect()
    }

    /// Total pending messages awaiting a flush.
    pub fn unsent_count(&self) -> usize {
        self.state
            .borrow()
            .unsent
            .values()
            .map(|unsent| unsent.len())
            .sum()
    }

    /// Queues a message, healing the cluster once if the topic is unknown
    /// and dropping it if the topic still does not exist afterwards.
    /// Depending on `batch_size` this may or may not flush.
    pub fn produce(&self, topic: &str, item: S::Item) -> StaticBoxFuture<()> {
        if self.core.is_closing() {
            warn!("producing to {} topic while closing", topic);
            return StaticBoxFuture::ok(());
        }

        let key = (self.key_maker)(&item);
        let value = match self.serializer.serialize(topic, item) {
            Ok(value) => value,
            Err(err) => {
                error!("error serializing message for topic {}, {}", topic, err);
                return StaticBoxFuture::err(err);
            }
        };
        let message = Message::new(key, Some(value));

        let lookup = if self.core.cluster().has_topic(topic) {
            StaticBoxFuture::ok(())
        } else {
            debug!("producing to unknown topic {}, loading metadata", topic);
            self.core.cluster().heal()
        };

        let producer = self.clone();
        let topic = topic.to_owned();

        StaticBoxFuture::new(lookup.and_then(move |_| {
            if !producer.core.cluster().has_topic(&topic) {
                error!("unknown topic {} and not auto-created", topic);
                return StaticBoxFuture::ok(());
            }

            producer
                .state
                .borrow_mut()
                .unsent
                .entry(topic)
                .or_insert_with(Vec::new)
                .push(message);

            if producer.config.batch_size == 0 ||
               producer.unsent_count() >= producer.config.batch_size {
                producer.flush()
            } else {
                StaticBoxFuture::ok(())
            }
        }))
    }

    /// Drains the unsent buffer into one produce request per partition
    /// leader and dispatches them.  Messages whose leader is not currently
    /// connected go back into the buffer and flag a heal before the
    /// dispatch, so the post-dispatch heal picks them up.
    pub fn flush(&self) -> StaticBoxFuture<()> {
        let drained = {
            let mut state = self.state.borrow_mut();
            mem::replace(&mut state.unsent, HashMap::new())
        };

        if drained.is_empty() {
            return StaticBoxFuture::ok(());
        }

        // leader -> topic -> partition -> messages
        let mut ordered: HashMap<BrokerId, HashMap<String, HashMap<PartitionId, Vec<Message>>>> =
            HashMap::new();
        let mut to_retry: HashMap<String, Vec<Message>> = HashMap::new();

        for (topic, messages) in drained {
            let partitions = self.core.cluster().partitions(&topic).unwrap_or_default();

            for message in messages {
                let partition = self.partitioner
                    .partition(message.key.as_ref().map(|key| &key[..]), &partitions);

                let leader = partition
                    .and_then(|partition_id| {
                                  self.core
                                      .cluster()
                                      .get_leader(&topic, partition_id)
                                      .map(|leader| (partition_id, leader))
                              });

                match leader {
                    Some((partition_id, leader)) if self.core.cluster().has_broker(leader) => {
                        ordered
                            .entry(leader)
                            .or_insert_with(HashMap::new)
                            .entry(topic.clone())
                            .or_insert_with(HashMap::new)
                            .entry(partition_id)
                            .or_insert_with(Vec::new)
                            .push(message);
                    }
                    _ => {
                        to_retry
                            .entry(topic.clone())
                            .or_insert_with(Vec::new)
                            .push(message);
                    }
                }
            }
        }

        let mut prepared = Vec::new();
        let mut flushed = 0;

        for (leader, topics) in ordered {
            let correlation_id = match self.core.cluster().connection(leader) {
                Some(conn) => conn.next_correlation_id(),
                None => {
                    for (topic, partitions) in topics {
                        for (_, messages) in partitions {
                            to_retry
                                .entry(topic.clone())
                                .or_insert_with(Vec::new)
                                .extend(messages);
                        }
                    }
                    continue;
                }
            };

            let mut topic_requests = Vec::new();

            for (topic, partitions) in topics {
                let mut partition_requests = Vec::new();

                for (partition_id, messages) in partitions {
                    flushed += messages.len();

                    let message_set =
                        match MessageSet::compressed(self.config.compression, messages.clone()) {
                            Ok(message_set) => message_set,
                            Err(err) => return StaticBoxFuture::err(err),
                        };

                    partition_requests.push(ProducePartitionRequest {
                                                partition_id: partition_id,
                                                message_set: message_set,
                                            });

                    self.state
                        .borrow_mut()
                        .in_flight
                        .entry(correlation_id)
                        .or_insert_with(HashMap::new)
                        .entry(topic.clone())
                        .or_insert_with(HashMap::new)
                        .insert(partition_id, messages);
                }

                topic_requests.push(ProduceTopicRequest {
                                        name: topic,
                                        partitions: partition_requests,
                                    });
            }

            prepared.push((leader,
                           correlation_id,
                           KafkaRequest::Produce(ProduceRequest {
                                                     required_acks: self.config.required_acks,
                                                     timeout: self.config.ack_timeout as i32,
                                                     topics: topic_requests,
                                                 })));
        }

        if let Some(metrics) = self.core.metrics() {
            metrics.messages_produced(flushed);
        }

        for (topic, messages) in to_retry {
            self.queue_retries(topic, messages);
        }

        let producer = self.clone();

        StaticBoxFuture::new(self.core
                                 .dispatch_prepared(prepared, move |response| {
                                                        producer.handle_produce_response(response)
                                                    })
                                 .map(|_| ()))
    }

    /// Re-inserts messages into the unsent buffer and flags a heal.
    fn queue_retries(&self, topic: String, messages: Vec<Message>) {
        debug!("queueing {} messages for retry", messages.len());

        self.state
            .borrow_mut()
            .unsent
            .entry(topic)
            .or_insert_with(Vec::new)
            .extend(messages);

        self.core.request_heal();
    }

    /// Acknowledged partitions are dropped from the in-flight map,
    /// retriable ones go back into the unsent buffer, anything else is
    /// logged and abandoned.
    fn handle_produce_response(&self, response: KafkaResponse) -> Result<()> {
        let produce = match response.body {
            ResponseBody::Produce(produce) => produce,
            body => bail!(::errors::ErrorKind::UnhandledResponse(body.api())),
        };

        let correlation_id = response.correlation_id;

        for topic in produce.topics {
            for partition in &topic.partitions {
                let code = KafkaCode::from_code(partition.error_code);

                if code == KafkaCode::None {
                    // delivered; dropped with the in-flight entry below
                } else if code.is_retriable() {
                    let messages = self.state
                        .borrow_mut()
                        .in_flight
                        .get_mut(&correlation_id)
                        .and_then(|topics| topics.get_mut(&topic.name))
                        .and_then(|partitions| partitions.remove(&partition.partition_id));

                    if let Some(messages) = messages {
                        self.queue_retries(topic.name.clone(), messages);
                    }
                } else {
                    error!("got error {} for topic {} partition {}",
                           code,
                           topic.name,
                           partition.partition_id);
                }
            }
        }

        self.state.borrow_mut().in_flight.remove(&correlation_id);

        Ok(())
    }

    /// Flushes whatever is still buffered so nothing is lost on close.
    fn wind_down(&self) -> StaticBoxFuture<()> {
        self.flush()
    }

    pub fn close(&self) -> StaticBoxFuture<()> {
        self.core.set_closing();

        let core = self.core.clone();

        StaticBoxFuture::new(self.wind_down().map(move |_| core.cluster().stop()))
    }
}
