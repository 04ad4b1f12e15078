use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use futures::sync::mpsc::{self, UnboundedReceiver};
use futures::{Future, Stream};
use tokio_core::reactor::Handle;

use client::StaticBoxFuture;
use coordination::{CoordinationClient, Party, SharedSet, Signal};
use protocol::PartitionId;

/// Member name → topic → partitions owned by that member.
pub type Mapping = HashMap<String, HashMap<String, Vec<PartitionId>>>;

/// Computes the whole group's mapping from the sorted member and partition
/// lists.
///
/// Every member must agree on what partitions go where, so the function has
/// to be a pure function of its (deterministically sorted) inputs.
pub type AllocatorFn = Box<Fn(&[String], &[String]) -> Mapping>;

/// Divvies up the partitions of a consumer group via the coordination
/// service: a `Party` tracks the members, a `SharedSet` the pool of
/// `"topic:partition_id"` strings, and any change to either recomputes the
/// mapping.
#[derive(Clone)]
pub struct PartitionAllocator {
    inner: Rc<Inner>,
}

struct Inner {
    handle: Handle,
    group_name: String,
    member_name: String,
    allocator_fn: AllocatorFn,
    on_rebalance: Box<Fn()>,
    party: Party,
    shared_set: SharedSet,
    state: RefCell<AllocatorState>,
    members_collected: Signal,
    partitions_collected: Signal,
}

#[derive(Default)]
struct AllocatorState {
    members: BTreeSet<String>,
    partitions: BTreeSet<String>,
    mapping: Mapping,
}

impl PartitionAllocator {
    pub fn new(client: Rc<CoordinationClient>,
               group_name: &str,
               member_name: &str,
               allocator_fn: AllocatorFn,
               on_rebalance: Box<Fn()>,
               handle: Handle)
               -> PartitionAllocator {
        let members_path = format!("/sund/groups/{}/members", group_name);
        let partition_path = format!("/sund/groups/{}/partitions", group_name);

        PartitionAllocator {
            inner: Rc::new(Inner {
                               handle: handle,
                               group_name: group_name.to_owned(),
                               member_name: member_name.to_owned(),
                               allocator_fn: allocator_fn,
                               on_rebalance: on_rebalance,
                               party: Party::new(client.clone(), member_name, &members_path),
                               shared_set: SharedSet::new(client, &partition_path),
                               state: RefCell::new(AllocatorState::default()),
                               members_collected: Signal::new(),
                               partitions_collected: Signal::new(),
                           }),
        }
    }

    /// The topics and partitions currently assigned to this member.
    pub fn allocation(&self) -> HashMap<String, Vec<PartitionId>> {
        self.inner
            .state
            .borrow()
            .mapping
            .get(&self.inner.member_name)
            .cloned()
            .unwrap_or_default()
    }

    /// Attaches the watches, joins the party, seeds the shared partition
    /// set, and resolves once both membership and partitions have been
    /// collected at least once.
    pub fn start(&self, seed_partitions: &HashMap<String, Vec<PartitionId>>) -> StaticBoxFuture<()> {
        info!("starting partitioner for group '{}'", self.inner.group_name);

        let (member_tx, member_rx) = mpsc::unbounded();
        let (partition_tx, partition_rx) = mpsc::unbounded();

        self.spawn_member_watch(member_rx);
        self.spawn_partition_watch(partition_rx);

        let allocator = self.clone();
        let join_allocator = self.clone();
        let seed_allocator = self.clone();
        let ready_allocator = self.clone();
        let seed = partition_strings(seed_partitions);

        StaticBoxFuture::new(self.inner
            .party
            .start(member_tx)
            .and_then(move |_| allocator.inner.shared_set.start(partition_tx))
            .and_then(move |_| join_allocator.inner.party.join())
            .and_then(move |_| {
                info!("attempting to add {} partitions to consumer group '{}'",
                      seed.len(),
                      seed_allocator.inner.group_name);
                seed_allocator.inner.shared_set.add_items(seed)
            })
            .and_then(move |_| {
                ready_allocator
                    .inner
                    .members_collected
                    .wait()
                    .join(ready_allocator.inner.partitions_collected.wait())
                    .map(|_| ())
            }))
    }

    /// Leaves the party so the remaining members rebalance.
    pub fn stop(&self) -> StaticBoxFuture<()> {
        info!("stopping partitioner for group '{}'", self.inner.group_name);

        self.inner.party.leave()
    }

    /// Ensures the shared set contains the given partitions.
    pub fn add_partitions(&self,
                          partitions: &HashMap<String, Vec<PartitionId>>)
                          -> StaticBoxFuture<()> {
        let items = partition_strings(partitions);

        info!("attempting to add {} partitions to consumer group '{}'",
              items.len(),
              self.inner.group_name);

        self.inner.shared_set.add_items(items)
    }

    /// Ensures the shared set does *not* contain the given partitions.
    pub fn remove_partitions(&self,
                             partitions: &HashMap<String, Vec<PartitionId>>)
                             -> StaticBoxFuture<()> {
        let items = partition_strings(partitions);

        info!("attempting to remove {} partitions from consumer group '{}'",
              items.len(),
              self.inner.group_name);

        self.inner.shared_set.remove_items(items)
    }

    fn spawn_member_watch(&self, rx: UnboundedReceiver<Vec<String>>) {
        let allocator = self.clone();

        self.inner
            .handle
            .spawn(rx.for_each(move |members| {
                                   allocator.on_members_change(members);
                                   Ok(())
                               }));
    }

    fn spawn_partition_watch(&self, rx: UnboundedReceiver<Option<Vec<u8>>>) {
        let allocator = self.clone();

        self.inner
            .handle
            .spawn(rx.for_each(move |data| {
                                   allocator.on_partitions_change(data);
                                   Ok(())
                               }));
    }

    fn on_members_change(&self, new_members: Vec<String>) {
        info!("consumer group '{}' members changed", self.inner.group_name);

        let new_members: BTreeSet<String> = new_members.into_iter().collect();

        let changed = {
            let mut state = self.inner.state.borrow_mut();

            if new_members != state.members {
                state.members = new_members;
                true
            } else {
                false
            }
        };

        if changed {
            self.rebalance();
        }

        self.inner.members_collected.set();
    }

    fn on_partitions_change(&self, data: Option<Vec<u8>>) {
        let new_partitions: BTreeSet<String> = match data {
            Some(data) => {
                ::serde_json::from_slice::<Vec<String>>(&data)
                    .map(|list| list.into_iter().collect())
                    .unwrap_or_default()
            }
            None => BTreeSet::new(),
        };

        let changed = {
            let mut state = self.inner.state.borrow_mut();

            if new_partitions != state.partitions {
                state.partitions = new_partitions;
                true
            } else {
                false
            }
        };

        if changed {
            self.rebalance();
        }

        self.inner.partitions_collected.set();
    }

    /// Recomputes the mapping from the sorted member and partition sets and
    /// fires the rebalance callback.
    fn rebalance(&self) {
        info!("rebalancing partitions for group '{}'", self.inner.group_name);

        let mapping = {
            let state = self.inner.state.borrow();
            let members: Vec<String> = state.members.iter().cloned().collect();
            let partitions: Vec<String> = state.partitions.iter().cloned().collect();

            (self.inner.allocator_fn)(&members, &partitions)
        };

        self.inner.state.borrow_mut().mapping = mapping;

        for (topic, partitions) in self.allocation() {
            debug!("allocation for topic '{}': partitions {:?}", topic, partitions);
        }

        (self.inner.on_rebalance)();
    }
}

fn partition_strings(partitions: &HashMap<String, Vec<PartitionId>>) -> BTreeSet<String> {
    partitions
        .iter()
        .flat_map(|(topic, partition_ids)| {
                      partition_ids
                          .iter()
                          .map(move |partition_id| format!("{}:{}", topic, partition_id))
                  })
        .collect()
}

/// Default allocator: cycle the sorted members, assigning each partition to
/// the next one.  Assumes roughly equal capacity per member and aims for
/// even partition counts; incidental clustering of one topic's partitions
/// on one member is possible.
pub fn round_robin_allocator(members: &[String], partitions: &[String]) -> Mapping {
    let mut mapping = Mapping::new();

    if members.is_empty() {
        return mapping;
    }

    for (index, partition) in partitions.iter().enumerate() {
        let member = &members[index % members.len()];

        // topic names may contain ':', the partition id never does
        let mut pieces = partition.rsplitn(2, ':');
        let partition_id = pieces.next().and_then(|id| id.parse().ok());

        match (pieces.next(), partition_id) {
            (Some(topic), Some(partition_id)) => {
                mapping
                    .entry(member.clone())
                    .or_insert_with(HashMap::new)
                    .entry(topic.to_owned())
                    .or_insert_with(Vec::new)
                    .push(partition_id);
            }
            _ => warn!("ignoring malformed partition entry '{}'", partition),
        }
    }

    mapping
}
