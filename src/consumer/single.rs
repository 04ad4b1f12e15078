use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use futures::future::Future;
use tokio_core::reactor::Handle;

use client::{ClientConfig, ClientCore, StaticBoxFuture};
use consumer::{Consumer, ConsumerConfig, ConsumerState, OffsetStrategy, StartPosition,
               LATEST_OFFSET};
use errors::{ErrorKind, Result};
use network::{KafkaRequest, KafkaResponse, ResponseBody};
use protocol::{BrokerId, KafkaCode, OffsetPartitionRequest, OffsetRequest, OffsetTopicRequest,
               PartitionId, CONSUMER_REPLICA_ID};
use serialization::{Deserializer, JsonDeserializer};

/// A consumer that runs on its own and does not share work with peers.
pub type SingleConsumer<D = JsonDeserializer> = Consumer<StandaloneOffsets, D>;

impl SingleConsumer<JsonDeserializer> {
    pub fn new(client_config: ClientConfig,
               config: ConsumerConfig,
               handle: Handle)
               -> SingleConsumer<JsonDeserializer> {
        Self::with_deserializer(client_config, config, handle, JsonDeserializer)
    }
}

impl<D> SingleConsumer<D>
where
    D: Deserializer + Clone + 'static,
    D::Item: 'static,
{
    pub fn with_deserializer(client_config: ClientConfig,
                             config: ConsumerConfig,
                             handle: Handle,
                             deserializer: D)
                             -> SingleConsumer<D> {
        let core = ClientCore::new(client_config, handle);
        let state = Rc::new(RefCell::new(ConsumerState::default()));
        let strategy = StandaloneOffsets {
            core: core.clone(),
            state: state.clone(),
        };

        Consumer::from_parts(core, config, deserializer, state, strategy)
    }
}

/// Offset strategy of the isolated consumer: every known topic and
/// partition is in scope, and start offsets come from the stateless offset
/// api.
#[derive(Clone)]
pub struct StandaloneOffsets {
    core: ClientCore,
    state: Rc<RefCell<ConsumerState>>,
}

impl OffsetStrategy for StandaloneOffsets {
    fn allocation(&self) -> HashMap<String, Vec<PartitionId>> {
        self.core.cluster().topics()
    }

    /// Sends one offset request per partition leader, asking for a single
    /// offset at the translated start time.
    fn determine_offsets(&self, topic: &str, start: Option<&StartPosition>) -> StaticBoxFuture<()> {
        let offset_time = start
            .map(StartPosition::to_offset_time)
            .unwrap_or(LATEST_OFFSET);

        info!("getting offsets for topic {} at time {}", topic, offset_time);

        let mut ordered: HashMap<BrokerId, Vec<OffsetPartitionRequest>> = HashMap::new();

        for partition_id in self.allocation().get(topic).cloned().unwrap_or_default() {
            if let Some(leader) = self.core.cluster().get_leader(topic, partition_id) {
                ordered
                    .entry(leader)
                    .or_insert_with(Vec::new)
                    .push(OffsetPartitionRequest {
                              partition_id: partition_id,
                              time: offset_time,
                              max_offsets: 1,
                          });
            }
        }

        debug!("sending offset request to {} leaders", ordered.len());

        let requests = ordered
            .into_iter()
            .map(|(leader, partitions)| {
                (leader,
                 KafkaRequest::Offsets(OffsetRequest {
                                           replica_id: CONSUMER_REPLICA_ID,
                                           topics: vec![OffsetTopicRequest {
                                                            name: topic.to_owned(),
                                                            partitions: partitions,
                                                        }],
                                       }))
            })
            .collect();

        let strategy = self.clone();
        let topic = topic.to_owned();

        StaticBoxFuture::new(self.core
                                 .dispatch(requests, move |response| {
                                               strategy.handle_offset_response(&topic, response)
                                           })
                                 .map(|_| ()))
    }
}

impl StandaloneOffsets {
    /// Stores returned offsets; a retriable code flags a heal and desyncs
    /// the topic, any other error is fatal for this determination.
    fn handle_offset_response(&self, topic: &str, response: KafkaResponse) -> Result<()> {
        let offsets = match response.body {
            ResponseBody::Offsets(offsets) => offsets,
            body => bail!(ErrorKind::UnhandledResponse(body.api())),
        };

        // requests cover a single topic at a time
        if let Some(topic_response) = offsets.topics.into_iter().next() {
            for partition in topic_response.partitions {
                let code = KafkaCode::from_code(partition.error_code);

                if code == KafkaCode::None {
                    match partition.offsets.first() {
                        Some(&offset) => {
                            self.state
                                .borrow_mut()
                                .set_offset(topic, partition.partition_id, offset);
                        }
                        None => {
                            warn!("no offset returned for {}|{}",
                                  topic,
                                  partition.partition_id)
                        }
                    }
                } else if code.is_retriable() {
                    self.core.request_heal();
                    self.state.borrow_mut().synced_offsets.remove(topic);
                } else {
                    error!("got error {} for topic {} partition {}",
                           code,
                           topic,
                           partition.partition_id);
                    bail!(ErrorKind::NoOffsets);
                }
            }
        }

        Ok(())
    }
}
