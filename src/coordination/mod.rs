//! Group membership over an external coordination service.
//!
//! The service itself (ZooKeeper or anything shaped like it) stays behind
//! the `CoordinationClient` trait: a durable key/value tree with ephemeral
//! nodes, change watches and a distributed lock.  Watch events originate on
//! the service client's own threads and cross into the event loop through
//! thread-safe channel senders; loop-side tasks drain them.

use futures::sync::mpsc::UnboundedSender;

use client::StaticBoxFuture;

mod allocator;
mod events;
mod memory;
mod party;
mod shared_set;

pub use self::allocator::{round_robin_allocator, AllocatorFn, Mapping, PartitionAllocator};
pub use self::events::Signal;
pub use self::memory::MemoryCoordination;
pub use self::party::Party;
pub use self::shared_set::SharedSet;

/// Delivers the current child names of a watched path, first immediately on
/// registration and then on every membership change.
pub type ChildrenWatcher = UnboundedSender<Vec<String>>;

/// Delivers the data of a watched path, `None` while the node has no data.
pub type DataWatcher = UnboundedSender<Option<Vec<u8>>>;

/// Contract this crate requires of a coordination service client.
///
/// Ephemeral nodes must disappear with the session that created them, so a
/// lost session is indistinguishable from an explicit departure.  `create`
/// on an existing ephemeral path re-establishes ownership for the caller's
/// session.  `delete` of a missing path is not an error.
pub trait CoordinationClient: 'static {
    /// Creates the path and any missing parents, with empty data.
    fn ensure_path(&self, path: &str) -> StaticBoxFuture<()>;

    fn create(&self,
              path: &str,
              value: Vec<u8>,
              ephemeral: bool,
              makepath: bool)
              -> StaticBoxFuture<()>;

    fn get(&self, path: &str) -> StaticBoxFuture<Option<Vec<u8>>>;

    fn set(&self, path: &str, value: Vec<u8>) -> StaticBoxFuture<()>;

    fn delete(&self, path: &str) -> StaticBoxFuture<()>;

    fn children_watch(&self, path: &str, watcher: ChildrenWatcher) -> StaticBoxFuture<()>;

    fn data_watch(&self, path: &str, watcher: DataWatcher) -> StaticBoxFuture<()>;

    /// Blocks (asynchronously) until the lock at `path` is held by this
    /// client.
    fn acquire_lock(&self, path: &str) -> StaticBoxFuture<()>;

    fn release_lock(&self, path: &str) -> StaticBoxFuture<()>;
}
