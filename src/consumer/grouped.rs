use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::env;
use std::process;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering, ATOMIC_USIZE_INIT};

use futures::future::{self, loop_fn, Future, Loop};
use tokio_core::reactor::Handle;

use client::{ClientConfig, ClientCore, StaticBoxFuture};
use consumer::{Consumer, ConsumerConfig, ConsumerState, GroupConfig, OffsetStrategy,
               StartPosition};
use coordination::{round_robin_allocator, CoordinationClient, PartitionAllocator};
use errors::{Error, ErrorKind, Result};
use network::{KafkaRequest, KafkaResponse, ResponseBody};
use protocol::{BrokerId, GroupCoordinatorRequest, KafkaCode, OffsetCommitPartitionRequest,
               OffsetCommitRequest, OffsetCommitTopicRequest, OffsetFetchRequest,
               OffsetFetchTopicRequest, PartitionId};
use serialization::{Deserializer, JsonDeserializer};

static NEXT_MEMBER_SUFFIX: AtomicUsize = ATOMIC_USIZE_INIT;

/// `hostname:pid.seq`, unique per consumer within a process and
/// recognizable across the group.
fn generate_member_name() -> String {
    let hostname = env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_owned());
    let suffix = NEXT_MEMBER_SUFFIX.fetch_add(1, Ordering::SeqCst);

    format!("{}:{}.{}", hostname, process::id(), suffix)
}

/// A consumer that splits partitions with its peers through an external
/// coordination service and keeps committed offsets on the group's
/// coordinator broker.
pub type GroupedConsumer<D = JsonDeserializer> = Consumer<GroupMembership, D>;

impl GroupedConsumer<JsonDeserializer> {
    pub fn new(client_config: ClientConfig,
               config: ConsumerConfig,
               group_config: GroupConfig,
               coordination: Rc<CoordinationClient>,
               handle: Handle)
               -> GroupedConsumer<JsonDeserializer> {
        Self::with_deserializer(client_config,
                                config,
                                group_config,
                                coordination,
                                handle,
                                JsonDeserializer)
    }
}

impl<D> GroupedConsumer<D>
where
    D: Deserializer + Clone + 'static,
    D::Item: 'static,
{
    pub fn with_deserializer(client_config: ClientConfig,
                             config: ConsumerConfig,
                             group_config: GroupConfig,
                             coordination: Rc<CoordinationClient>,
                             handle: Handle,
                             deserializer: D)
                             -> GroupedConsumer<D> {
        let core = ClientCore::new(client_config, handle.clone());
        let state = Rc::new(RefCell::new(ConsumerState::default()));
        let member_name = generate_member_name();

        // every rebalance forces offsets to be fetched again
        let rebalance_state = state.clone();
        let allocator = PartitionAllocator::new(coordination,
                                                &group_config.group,
                                                &member_name,
                                                Box::new(round_robin_allocator),
                                                Box::new(move || {
                                                    rebalance_state
                                                        .borrow_mut()
                                                        .synced_offsets
                                                        .clear();
                                                }),
                                                handle);

        let strategy = GroupMembership {
            core: core.clone(),
            state: state.clone(),
            group_name: group_config.group.clone(),
            member_name: member_name,
            allocator: allocator,
            group_state: Rc::new(RefCell::new(GroupState {
                                                  coordinator_id: None,
                                                  topics_to_commit: HashSet::new(),
                                                  autocommit: group_config.autocommit,
                                              })),
        };

        Consumer::from_parts(core, config, deserializer, state, strategy)
    }

    pub fn member_name(&self) -> String {
        self.strategy().member_name.clone()
    }

    pub fn coordinator_id(&self) -> Option<BrokerId> {
        self.strategy().coordinator_id()
    }

    /// The partitions currently assigned to this member.
    pub fn allocation(&self) -> HashMap<String, Vec<PartitionId>> {
        self.strategy().allocation()
    }

    /// Topics consumed since their last successful offset commit.
    pub fn topics_awaiting_commit(&self) -> Vec<String> {
        self.strategy()
            .group_state
            .borrow()
            .topics_to_commit
            .iter()
            .cloned()
            .collect()
    }

    /// Commits the offsets of every consumed-but-uncommitted topic to the
    /// group coordinator.
    pub fn commit_offsets(&self) -> StaticBoxFuture<()> {
        self.strategy().commit_offsets(None)
    }
}

struct GroupState {
    coordinator_id: Option<BrokerId>,
    topics_to_commit: HashSet<String>,
    autocommit: bool,
}

/// Offset strategy of the grouped consumer: the allocation comes from the
/// partition allocator, offsets from the coordinator's offset fetch and
/// commit apis.
#[derive(Clone)]
pub struct GroupMembership {
    core: ClientCore,
    state: Rc<RefCell<ConsumerState>>,
    group_name: String,
    member_name: String,
    allocator: PartitionAllocator,
    group_state: Rc<RefCell<GroupState>>,
}

impl OffsetStrategy for GroupMembership {
    fn allocation(&self) -> HashMap<String, Vec<PartitionId>> {
        self.allocator.allocation()
    }

    /// Seeds the allocator with the known topics, joins the group, then
    /// finds the group's coordinator broker.
    fn on_connect(&self) -> StaticBoxFuture<()> {
        let membership = self.clone();
        let seed = self.core.cluster().topics();

        StaticBoxFuture::new(self.allocator
                                 .start(&seed)
                                 .and_then(move |_| membership.determine_coordinator()))
    }

    /// Loops on the coordinator's offset fetch api until it stops asking
    /// for a retry, pausing between attempts.
    fn determine_offsets(&self, topic: &str, _start: Option<&StartPosition>) -> StaticBoxFuture<()> {
        info!("fetching offsets for consumer group '{}'", self.group_name);

        let membership = self.clone();
        let topic = topic.to_owned();

        StaticBoxFuture::new(loop_fn((), move |()| -> OffsetFetchAttempt {
            let coordinator = match membership.coordinator_id() {
                Some(coordinator) => coordinator,
                None => {
                    warn!("no coordinator known for group '{}'", membership.group_name);
                    return Box::new(future::err(ErrorKind::NoOffsets.into()));
                }
            };

            let request =
                KafkaRequest::OffsetFetch(OffsetFetchRequest {
                    group: membership.group_name.clone(),
                    topics: vec![OffsetFetchTopicRequest {
                                     name: topic.clone(),
                                     partitions: membership
                                         .allocation()
                                         .get(&topic)
                                         .cloned()
                                         .unwrap_or_default(),
                                 }],
                });

            let mut requests = HashMap::new();
            requests.insert(coordinator, request);

            let handler = membership.clone();
            let handler_topic = topic.clone();
            let backoff = membership.clone();

            Box::new(membership.core
                .dispatch(requests, move |response| {
                    handler.handle_offset_fetch_response(&handler_topic, response)
                })
                .and_then(move |results| -> StaticBoxFuture<Loop<(), ()>> {
                    let retry = match results.into_iter().next() {
                        Some((_, retry)) => retry,
                        None => {
                            warn!("no offset fetch response from coordinator for group '{}'",
                                  backoff.group_name);
                            return StaticBoxFuture::err(ErrorKind::NoOffsets.into());
                        }
                    };

                    if retry {
                        let pause = backoff.core.retry_backoff();
                        StaticBoxFuture::new(backoff.core.sleep(pause).map(|_| Loop::Continue(())))
                    } else {
                        StaticBoxFuture::ok(Loop::Break(()))
                    }
                }))
        }))
    }

    /// Marks the topic as needing a commit and, when autocommit is on,
    /// commits right away.
    fn post_consume(&self, topic: &str) -> StaticBoxFuture<()> {
        if !self.state.borrow().synced_offsets.contains(topic) {
            return StaticBoxFuture::ok(());
        }

        let autocommit = {
            let mut group_state = self.group_state.borrow_mut();
            group_state.topics_to_commit.insert(topic.to_owned());
            group_state.autocommit
        };

        if autocommit {
            self.commit_offsets(None)
        } else {
            StaticBoxFuture::ok(())
        }
    }

    /// Leaves the group so peers rebalance without us.
    fn wind_down(&self) -> StaticBoxFuture<()> {
        self.allocator.stop()
    }
}

impl GroupMembership {
    pub fn coordinator_id(&self) -> Option<BrokerId> {
        self.group_state.borrow().coordinator_id
    }

    /// Asks each broker in turn which of them coordinates the group,
    /// healing and starting over on retriable codes, until the question is
    /// settled one way or the other.
    fn determine_coordinator(&self) -> StaticBoxFuture<()> {
        let membership = self.clone();

        StaticBoxFuture::new(loop_fn((), move |()| -> CoordinatorSearch {
            let broker_ids = membership.core.cluster().broker_ids();

            if broker_ids.is_empty() {
                return Box::new(future::err(ErrorKind::NoBrokers.into()));
            }

            let membership = membership.clone();

            let walk = loop_fn(0, move |index| -> CoordinatorAttempt {
                if index >= broker_ids.len() {
                    return Box::new(future::ok(Loop::Break(false)));
                }

                let request = KafkaRequest::GroupCoordinator(GroupCoordinatorRequest {
                                                                 group: membership
                                                                     .group_name
                                                                     .clone(),
                                                             });

                let mut requests = HashMap::new();
                requests.insert(broker_ids[index], request);

                let handler = membership.clone();

                Box::new(membership.core
                    .dispatch(requests, move |response| {
                        handler.handle_group_coordinator_response(response)
                    })
                    .map(move |results| {
                        let determined = results
                            .into_iter()
                            .next()
                            .map(|(_, determined)| determined)
                            .unwrap_or(false);

                        if determined {
                            Loop::Break(true)
                        } else {
                            Loop::Continue(index + 1)
                        }
                    }))
            });

            Box::new(walk.map(|determined| if determined {
                                  Loop::Break(())
                              } else {
                                  Loop::Continue(())
                              }))
        }))
    }

    /// `true` once the search can stop: either the coordinator is known or
    /// a fatal code ended it.  Retriable codes flag a heal and keep the
    /// search going.
    fn handle_group_coordinator_response(&self, response: KafkaResponse) -> Result<bool> {
        let coordinator = match response.body {
            ResponseBody::GroupCoordinator(coordinator) => coordinator,
            body => bail!(ErrorKind::UnhandledResponse(body.api())),
        };

        let code = KafkaCode::from_code(coordinator.error_code);

        if code == KafkaCode::None {
            info!("found coordinator: broker {}", coordinator.coordinator_id);
            self.group_state.borrow_mut().coordinator_id = Some(coordinator.coordinator_id);
            Ok(true)
        } else if code.is_retriable() {
            self.core.request_heal();
            Ok(false)
        } else {
            error!("got error {} when determining coordinator for group '{}'",
                   code,
                   self.group_name);
            Ok(true)
        }
    }

    /// Stores fetched offsets and reports whether the fetch needs a retry.
    fn handle_offset_fetch_response(&self, topic: &str, response: KafkaResponse) -> Result<bool> {
        let fetched = match response.body {
            ResponseBody::OffsetFetch(fetched) => fetched,
            body => bail!(ErrorKind::UnhandledResponse(body.api())),
        };

        let mut retry = false;

        if let Some(topic_response) = fetched.topics.into_iter().next() {
            for partition in topic_response.partitions {
                let code = KafkaCode::from_code(partition.error_code);

                if code == KafkaCode::None {
                    debug!("got offset {} for group {} topic {} partition {}",
                           partition.offset,
                           self.group_name,
                           topic,
                           partition.partition_id);
                    self.state
                        .borrow_mut()
                        .set_offset(topic, partition.partition_id, partition.offset);
                } else if code == KafkaCode::OffsetsLoadInProgress {
                    info!("offsets load in progress for topic {} partition {}, \
                           retrying offset fetch",
                          topic,
                          partition.partition_id);
                    retry = true;
                } else if code.is_retriable() {
                    self.core.request_heal();
                    retry = true;
                } else {
                    error!("got error {} for topic {} partition {}",
                           code,
                           topic,
                           partition.partition_id);
                    bail!(ErrorKind::NoOffsets);
                }
            }
        }

        Ok(retry)
    }

    /// Commits the offsets of every allocated partition whose topic was
    /// consumed since the last commit.  An oversize-metadata response
    /// triggers one retry with empty metadata; retriable codes retry with
    /// the metadata unchanged.
    pub fn commit_offsets(&self, metadata: Option<String>) -> StaticBoxFuture<()> {
        let metadata =
            metadata.unwrap_or_else(|| format!("committed by {}", self.member_name));

        self.commit_with(metadata)
    }

    fn commit_with(&self, metadata: String) -> StaticBoxFuture<()> {
        debug!("committing offsets for consumer group {}", self.group_name);

        let topics: Vec<OffsetCommitTopicRequest> = {
            let state = self.state.borrow();
            let group_state = self.group_state.borrow();

            self.allocation()
                .into_iter()
                .filter(|&(ref topic, _)| group_state.topics_to_commit.contains(topic))
                .map(|(topic, partition_ids)| {
                    let partitions = partition_ids
                        .into_iter()
                        .map(|partition_id| {
                                 OffsetCommitPartitionRequest {
                                     partition_id: partition_id,
                                     offset: state.offset(&topic, partition_id),
                                     metadata: Some(metadata.clone()),
                                 }
                             })
                        .collect();

                    OffsetCommitTopicRequest {
                        name: topic,
                        partitions: partitions,
                    }
                })
                .collect()
        };

        if topics.is_empty() {
            trace!("no topics awaiting an offset commit");
            return StaticBoxFuture::ok(());
        }

        let coordinator = match self.coordinator_id() {
            Some(coordinator) => coordinator,
            None => {
                warn!("cannot commit offsets, no coordinator known for group '{}'",
                      self.group_name);
                return StaticBoxFuture::ok(());
            }
        };

        let request = KafkaRequest::OffsetCommit(OffsetCommitRequest {
                                                     group: self.group_name.clone(),
                                                     topics: topics,
                                                 });

        let mut requests = HashMap::new();
        requests.insert(coordinator, request);

        let handler = self.clone();
        let membership = self.clone();

        StaticBoxFuture::new(self.core
            .dispatch(requests, move |response| {
                handler.handle_offset_commit_response(response)
            })
            .and_then(move |results| -> StaticBoxFuture<()> {
                let (retry, adjust_metadata) = results
                    .into_iter()
                    .next()
                    .map(|(_, outcome)| outcome)
                    .unwrap_or((false, false));

                if adjust_metadata {
                    warn!("offset commit metadata '{}' was too long", metadata);
                    membership.commit_with(String::new())
                } else if retry {
                    membership.commit_with(metadata)
                } else {
                    StaticBoxFuture::ok(())
                }
            }))
    }

    /// Returns `(retry, adjust_metadata)` for the commit call site.
    fn handle_offset_commit_response(&self, response: KafkaResponse) -> Result<(bool, bool)> {
        let committed = match response.body {
            ResponseBody::OffsetCommit(committed) => committed,
            body => bail!(ErrorKind::UnhandledResponse(body.api())),
        };

        let mut retry = false;
        let mut adjust_metadata = false;

        for topic in committed.topics {
            for partition in topic.partitions {
                let code = KafkaCode::from_code(partition.error_code);

                if code == KafkaCode::None {
                    self.group_state
                        .borrow_mut()
                        .topics_to_commit
                        .remove(&topic.name);
                } else if code == KafkaCode::OffsetMetadataTooLarge {
                    retry = true;
                    adjust_metadata = true;
                } else if code.is_retriable() {
                    retry = true;
                    self.core.request_heal();
                } else {
                    error!("got error {} for topic {} partition {}",
                           code,
                           topic.name,
                           partition.partition_id);
                }
            }
        }

        Ok((retry, adjust_metadata))
    }
}

type OffsetFetchAttempt = Box<Future<Item = Loop<(), ()>, Error = Error>>;
type CoordinatorSearch = Box<Future<Item = Loop<(), ()>, Error = Error>>;
type CoordinatorAttempt = Box<Future<Item = Loop<bool, usize>, Error = Error>>;

#[cfg(test)]
mod tests {
    use tokio_core::reactor::Core;

    use super::*;
    use coordination::MemoryCoordination;
    use protocol::{GroupCoordinatorResponse, OffsetCommitPartitionResponse,
                   OffsetCommitResponse, OffsetCommitTopicResponse,
                   OffsetFetchPartitionResponse, OffsetFetchResponse, OffsetFetchTopicResponse};

    fn membership(core: &Core) -> GroupMembership {
        let consumer: GroupedConsumer = GroupedConsumer::new(ClientConfig::default(),
                                                             ConsumerConfig::default(),
                                                             GroupConfig::new("g"),
                                                             MemoryCoordination::shared(),
                                                             core.handle());
        consumer.strategy().clone()
    }

    fn coordinator_response(error_code: i16) -> KafkaResponse {
        KafkaResponse {
            correlation_id: 1,
            body: ResponseBody::GroupCoordinator(GroupCoordinatorResponse {
                                                     error_code: error_code,
                                                     coordinator_id: 8,
                                                     coordinator_host: "kafka08".to_owned(),
                                                     coordinator_port: 9092,
                                                 }),
        }
    }

    fn commit_response(error_code: i16) -> KafkaResponse {
        KafkaResponse {
            correlation_id: 1,
            body: ResponseBody::OffsetCommit(OffsetCommitResponse {
                topics: vec![OffsetCommitTopicResponse {
                    name: "t".to_owned(),
                    partitions: vec![OffsetCommitPartitionResponse {
                        partition_id: 0,
                        error_code: error_code,
                    }],
                }],
            }),
        }
    }

    fn fetch_response(error_code: i16) -> KafkaResponse {
        KafkaResponse {
            correlation_id: 1,
            body: ResponseBody::OffsetFetch(OffsetFetchResponse {
                topics: vec![OffsetFetchTopicResponse {
                    name: "t".to_owned(),
                    partitions: vec![OffsetFetchPartitionResponse {
                        partition_id: 0,
                        offset: 11,
                        metadata: None,
                        error_code: error_code,
                    }],
                }],
            }),
        }
    }

    #[test]
    fn test_member_names_are_unique() {
        assert_ne!(generate_member_name(), generate_member_name());
    }

    #[test]
    fn test_coordinator_found() {
        let core = Core::new().unwrap();
        let membership = membership(&core);

        assert!(membership
                    .handle_group_coordinator_response(coordinator_response(0))
                    .unwrap());
        assert_eq!(membership.coordinator_id(), Some(8));
    }

    #[test]
    fn test_coordinator_retriable_heals_and_continues() {
        let core = Core::new().unwrap();
        let membership = membership(&core);

        // request_timed_out
        assert!(!membership
                     .handle_group_coordinator_response(coordinator_response(7))
                     .unwrap());
        assert!(membership.core.heal_requested());
        assert_eq!(membership.coordinator_id(), None);
    }

    #[test]
    fn test_coordinator_fatal_settles_without_id() {
        let core = Core::new().unwrap();
        let membership = membership(&core);

        // unrecognized fatal code ends the search with no coordinator
        assert!(membership
                    .handle_group_coordinator_response(coordinator_response(35))
                    .unwrap());
        assert_eq!(membership.coordinator_id(), None);
    }

    #[test]
    fn test_offset_fetch_stores_offsets() {
        let core = Core::new().unwrap();
        let membership = membership(&core);

        let retry = membership
            .handle_offset_fetch_response("t", fetch_response(0))
            .unwrap();

        assert!(!retry);
        assert_eq!(membership.state.borrow().offset("t", 0), 11);
    }

    #[test]
    fn test_offset_fetch_load_in_progress_retries() {
        let core = Core::new().unwrap();
        let membership = membership(&core);

        let retry = membership
            .handle_offset_fetch_response("t", fetch_response(14))
            .unwrap();

        assert!(retry);
        assert!(!membership.core.heal_requested());
    }

    #[test]
    fn test_offset_fetch_fatal_raises() {
        let core = Core::new().unwrap();
        let membership = membership(&core);

        let result = membership.handle_offset_fetch_response("t", fetch_response(10));

        match result {
            Err(Error(ErrorKind::NoOffsets, _)) => {}
            other => panic!("expected NoOffsets, got {:?}", other),
        }
    }

    #[test]
    fn test_commit_success_clears_topic() {
        let core = Core::new().unwrap();
        let membership = membership(&core);

        membership
            .group_state
            .borrow_mut()
            .topics_to_commit
            .insert("t".to_owned());

        let outcome = membership
            .handle_offset_commit_response(commit_response(0))
            .unwrap();

        assert_eq!(outcome, (false, false));
        assert!(!membership
                     .group_state
                     .borrow()
                     .topics_to_commit
                     .contains("t"));
    }

    #[test]
    fn test_commit_metadata_too_large_adjusts() {
        let core = Core::new().unwrap();
        let membership = membership(&core);

        membership
            .group_state
            .borrow_mut()
            .topics_to_commit
            .insert("t".to_owned());

        let outcome = membership
            .handle_offset_commit_response(commit_response(12))
            .unwrap();

        assert_eq!(outcome, (true, true));
        assert!(membership
                    .group_state
                    .borrow()
                    .topics_to_commit
                    .contains("t"));
    }

    #[test]
    fn test_commit_retriable_heals() {
        let core = Core::new().unwrap();
        let membership = membership(&core);

        let outcome = membership
            .handle_offset_commit_response(commit_response(16))
            .unwrap();

        assert_eq!(outcome, (true, false));
        assert!(membership.core.heal_requested());
    }
}
