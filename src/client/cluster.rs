use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use futures::future::{self, loop_fn, Future, Loop};
use tokio_core::reactor::Handle;

use client::config::DEFAULT_KAFKA_PORT;
use client::StaticBoxFuture;
use errors::{Error, ErrorKind, Result};
use network::{Connection, KafkaRequest, ResponseBody};
use protocol::{BrokerId, BrokerMetadata, KafkaCode, MetadataRequest, MetadataResponse,
               PartitionId, TopicMetadata};

/// The client's view of the Kafka cluster.
///
/// Owns one `Connection` per known broker, keyed by broker id, along with
/// the topic/partition layout and the partition leader map.  `heal` brings
/// all three back in line with a fresh metadata snapshot whenever anything
/// drifts.
#[derive(Clone)]
pub struct Cluster {
    inner: Rc<Inner>,
}

struct Inner {
    handle: Handle,
    bootstrap_hosts: Vec<String>,
    client_id: Option<String>,
    state: RefCell<ClusterState>,
}

#[derive(Default)]
struct ClusterState {
    conns: HashMap<BrokerId, Connection>,
    topics: HashMap<String, Vec<PartitionId>>,
    leaders: HashMap<String, HashMap<PartitionId, BrokerId>>,
}

impl Cluster {
    pub fn new(bootstrap_hosts: Vec<String>, client_id: Option<String>, handle: Handle) -> Cluster {
        Cluster {
            inner: Rc::new(Inner {
                               handle: handle,
                               bootstrap_hosts: bootstrap_hosts,
                               client_id: client_id,
                               state: RefCell::new(ClusterState::default()),
                           }),
        }
    }

    pub fn get_leader(&self, topic: &str, partition_id: PartitionId) -> Option<BrokerId> {
        self.inner
            .state
            .borrow()
            .leaders
            .get(topic)
            .and_then(|partitions| partitions.get(&partition_id))
            .cloned()
    }

    pub fn has_broker(&self, broker_id: BrokerId) -> bool {
        self.inner.state.borrow().conns.contains_key(&broker_id)
    }

    pub fn broker_ids(&self) -> Vec<BrokerId> {
        self.inner.state.borrow().conns.keys().cloned().collect()
    }

    pub fn connection(&self, broker_id: BrokerId) -> Option<Connection> {
        self.inner.state.borrow().conns.get(&broker_id).cloned()
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.inner.state.borrow().topics.contains_key(topic)
    }

    /// Snapshot of the known topics and their partition ids.
    pub fn topics(&self) -> HashMap<String, Vec<PartitionId>> {
        self.inner.state.borrow().topics.clone()
    }

    pub fn partitions(&self, topic: &str) -> Option<Vec<PartitionId>> {
        self.inner.state.borrow().topics.get(topic).cloned()
    }

    /// Walks the bootstrap hosts in order until one answers a metadata
    /// request, then heals from that response.  Fails with `NoBrokers` when
    /// none of them can be reached.
    pub fn start(&self) -> StaticBoxFuture<()> {
        let cluster = self.clone();
        let hosts = self.inner.bootstrap_hosts.clone();

        let bootstrap = loop_fn(0, move |index| -> BootstrapAttempt {
            if index >= hosts.len() {
                return Box::new(future::err(ErrorKind::NoBrokers.into()));
            }

            let (host, port) = match split_host_port(&hosts[index]) {
                Ok(parts) => parts,
                Err(err) => {
                    warn!("skipping malformed bootstrap host '{}', {}", hosts[index], err);
                    return Box::new(future::ok(Loop::Continue(index + 1)));
                }
            };

            info!("using bootstrap host '{}'", host);

            let attempt = Connection::connect(&host,
                                              port,
                                              cluster.inner.client_id.clone(),
                                              &cluster.inner.handle)
                .and_then(|conn| {
                    conn.send(KafkaRequest::Metadata(MetadataRequest { topics: Vec::new() }))
                        .map(move |response| (conn, response))
                })
                .then(move |result| match result {
                    Ok((conn, response)) => {
                        conn.close();

                        match response.body {
                            ResponseBody::Metadata(metadata) => Ok(Loop::Break(metadata)),
                            body => Err(ErrorKind::UnhandledResponse(body.api()).into()),
                        }
                    }
                    Err(err) => {
                        warn!("could not bootstrap from {}:{}, {}", host, port, err);
                        Ok(Loop::Continue(index + 1))
                    }
                });

            Box::new(attempt)
        });

        let cluster = self.clone();

        StaticBoxFuture::new(bootstrap.and_then(move |response| {
            info!("metadata gathered, setting up connections");
            cluster.heal_with(response)
        }))
    }

    /// Fetches a fresh metadata snapshot from any live connection and
    /// reconciles against it.
    pub fn heal(&self) -> StaticBoxFuture<()> {
        let cluster = self.clone();

        StaticBoxFuture::new(self.get_metadata(Vec::new())
                                 .and_then(move |response| cluster.heal_with(response)))
    }

    /// Reconciles brokers and topics against the given snapshot, re-fetching
    /// metadata restricted to whatever is still missing until nothing is.
    pub fn heal_with(&self, response: MetadataResponse) -> StaticBoxFuture<()> {
        // cull connections that went bad since the last heal
        {
            let mut state = self.inner.state.borrow_mut();
            let closing: Vec<BrokerId> = state
                .conns
                .iter()
                .filter(|&(_, conn)| conn.closing())
                .map(|(broker_id, _)| *broker_id)
                .collect();

            for broker_id in closing {
                if let Some(conn) = state.conns.remove(&broker_id) {
                    debug!("removing {}:{} from cluster", conn.host(), conn.port());
                }
            }
        }

        let cluster = self.clone();

        StaticBoxFuture::new(loop_fn(response, move |response| {
            let MetadataResponse { brokers, topics } = response;

            let cluster = cluster.clone();

            cluster
                .clone()
                .process_brokers(brokers)
                .and_then(move |missing_conns| -> HealStep {
                    let missing_topics = cluster.process_topics(topics);

                    if missing_conns.is_empty() && missing_topics.is_empty() {
                        Box::new(future::ok(Loop::Break(())))
                    } else {
                        let topics: Vec<String> = missing_topics.into_iter().collect();
                        Box::new(cluster.get_metadata(topics).map(Loop::Continue))
                    }
                })
        }))
    }

    /// Retrieves metadata from the cluster, trying each connection until one
    /// works.  `NoBrokers` when every connection fails.
    pub fn get_metadata(&self, topics: Vec<String>) -> StaticBoxFuture<MetadataResponse> {
        debug!("gathering metadata (topics={:?})", topics);

        let conns: Vec<Connection> =
            self.inner.state.borrow().conns.values().cloned().collect();

        StaticBoxFuture::new(loop_fn(0, move |index| -> MetadataAttempt {
            if index >= conns.len() {
                return Box::new(future::err(ErrorKind::NoBrokers.into()));
            }

            let request = KafkaRequest::Metadata(MetadataRequest { topics: topics.clone() });

            Box::new(conns[index].send(request).then(move |result| match result {
                Ok(response) => {
                    match response.body {
                        ResponseBody::Metadata(metadata) => Ok(Loop::Break(metadata)),
                        body => Err(ErrorKind::UnhandledResponse(body.api()).into()),
                    }
                }
                Err(err) => {
                    debug!("metadata request failed, {}", err);
                    Ok(Loop::Continue(index + 1))
                }
            }))
        }))
    }

    /// Syncs connections with the given broker list.  Brokers that cannot be
    /// connected to end up in the returned missing set; connections to
    /// brokers absent from the list are aborted.
    fn process_brokers(self, brokers: Vec<BrokerMetadata>) -> StaticBoxFuture<HashSet<BrokerId>> {
        let to_drop: Vec<BrokerId> = {
            let state = self.inner.state.borrow();
            let listed: HashSet<BrokerId> = brokers.iter().map(|b| b.broker_id).collect();

            state
                .conns
                .keys()
                .filter(|broker_id| !listed.contains(broker_id))
                .cloned()
                .collect()
        };

        let attempts: Vec<_> = brokers
            .into_iter()
            .filter(|broker| !self.has_broker(broker.broker_id))
            .map(|broker| {
                let cluster = self.clone();

                Connection::connect(&broker.host,
                                    broker.port as u16,
                                    self.inner.client_id.clone(),
                                    &self.inner.handle)
                    .then(move |result| match result {
                        Ok(conn) => {
                            cluster
                                .inner
                                .state
                                .borrow_mut()
                                .conns
                                .insert(broker.broker_id, conn);
                            Ok::<Option<BrokerId>, Error>(None)
                        }
                        Err(err) => {
                            warn!("could not add broker {} ({}:{}), {}",
                                  broker.broker_id,
                                  broker.host,
                                  broker.port,
                                  err);
                            Ok(Some(broker.broker_id))
                        }
                    })
            })
            .collect();

        let cluster = self.clone();

        StaticBoxFuture::new(future::join_all(attempts).map(move |missing| {
            for broker_id in to_drop {
                if let Some(conn) = cluster.connection(broker_id) {
                    conn.abort();
                }
            }

            missing.into_iter().filter_map(|broker_id| broker_id).collect()
        }))
    }

    /// Rebuilds the topic and leader maps from the given topic metadata,
    /// replacing both wholesale.  Topics with transient errors or leaders we
    /// have no connection for are returned as missing.
    fn process_topics(&self, response_topics: Vec<TopicMetadata>) -> HashSet<String> {
        let mut topics: HashMap<String, Vec<PartitionId>> = HashMap::new();
        let mut leaders: HashMap<String, HashMap<PartitionId, BrokerId>> = HashMap::new();
        let mut missing = HashSet::new();

        for topic in response_topics {
            match KafkaCode::from_code(topic.error_code) {
                KafkaCode::UnknownTopicOrPartition => {
                    error!("unknown topic {}", topic.name);
                    continue;
                }
                KafkaCode::ReplicaNotAvailable => {
                    missing.insert(topic.name);
                    continue;
                }
                _ => {}
            }

            for partition in topic.partitions {
                match KafkaCode::from_code(partition.error_code) {
                    KafkaCode::LeaderNotAvailable => {
                        warn!("leader not available for {}|{}, election in progress",
                              topic.name,
                              partition.partition_id);
                        missing.insert(topic.name.clone());
                        continue;
                    }
                    KafkaCode::ReplicaNotAvailable => {
                        missing.insert(topic.name.clone());
                        continue;
                    }
                    _ => {}
                }

                if !self.has_broker(partition.leader) {
                    warn!("leader for {}|{} not in current connections",
                          topic.name,
                          partition.partition_id);
                    missing.insert(topic.name.clone());
                    continue;
                }

                topics
                    .entry(topic.name.clone())
                    .or_insert_with(Vec::new)
                    .push(partition.partition_id);
                leaders
                    .entry(topic.name.clone())
                    .or_insert_with(HashMap::new)
                    .insert(partition.partition_id, partition.leader);
            }
        }

        let mut state = self.inner.state.borrow_mut();
        state.topics = topics;
        state.leaders = leaders;

        missing
    }

    /// Closes every connection.
    pub fn stop(&self) {
        for conn in self.inner.state.borrow().conns.values() {
            conn.close();
        }
    }

    #[cfg(test)]
    pub(crate) fn set_topic_leaders(&self, topic: &str, leaders: Vec<(PartitionId, BrokerId)>) {
        let mut state = self.inner.state.borrow_mut();
        state
            .topics
            .insert(topic.to_owned(), leaders.iter().map(|&(p, _)| p).collect());
        state
            .leaders
            .insert(topic.to_owned(), leaders.into_iter().collect());
    }
}

type BootstrapAttempt = Box<Future<Item = Loop<MetadataResponse, usize>, Error = Error>>;
type MetadataAttempt = Box<Future<Item = Loop<MetadataResponse, usize>, Error = Error>>;
type HealStep = Box<Future<Item = Loop<(), MetadataResponse>, Error = Error>>;

fn split_host_port(host: &str) -> Result<(String, u16)> {
    match host.find(':') {
        Some(index) => {
            let port = host[index + 1..]
                .parse()
                .map_err(|_| ErrorKind::CodecError("invalid bootstrap port"))?;
            Ok((host[..index].to_owned(), port))
        }
        None => Ok((host.to_owned(), DEFAULT_KAFKA_PORT)),
    }
}
