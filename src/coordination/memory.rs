use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use futures::unsync::oneshot;
use futures::Future;

use client::StaticBoxFuture;
use coordination::{ChildrenWatcher, CoordinationClient, DataWatcher};
use errors::ErrorKind;

/// In-process coordination backend.
///
/// Implements the full client contract against a node tree in memory; handy
/// for tests and for single-process deployments that have no coordination
/// service to talk to.  Sessions are not modeled, so ephemeral nodes only
/// disappear through explicit deletes.
#[derive(Clone, Default)]
pub struct MemoryCoordination {
    state: Rc<RefCell<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    nodes: HashMap<String, Vec<u8>>,
    children_watchers: HashMap<String, Vec<ChildrenWatcher>>,
    data_watchers: HashMap<String, Vec<DataWatcher>>,
    locks: HashMap<String, LockState>,
}

#[derive(Default)]
struct LockState {
    held: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

impl MemoryCoordination {
    pub fn new() -> MemoryCoordination {
        MemoryCoordination::default()
    }

    /// Convenience for handing the backend to a consumer.
    pub fn shared() -> Rc<MemoryCoordination> {
        Rc::new(MemoryCoordination::new())
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = format!("{}/", path);

        self.state
            .borrow()
            .nodes
            .keys()
            .filter_map(|node| if node.starts_with(&prefix) {
                            let rest = &node[prefix.len()..];

                            if rest.is_empty() || rest.contains('/') {
                                None
                            } else {
                                Some(rest.to_owned())
                            }
                        } else {
                            None
                        })
            .collect()
    }

    fn notify_children(&self, path: &str) {
        let children = self.children_of(path);

        let mut state = self.state.borrow_mut();
        if let Some(watchers) = state.children_watchers.get_mut(path) {
            watchers.retain(|watcher| watcher.unbounded_send(children.clone()).is_ok());
        }
    }

    fn notify_data(&self, path: &str) {
        let data = self.state.borrow().nodes.get(path).cloned();

        let mut state = self.state.borrow_mut();
        if let Some(watchers) = state.data_watchers.get_mut(path) {
            watchers.retain(|watcher| watcher.unbounded_send(data.clone()).is_ok());
        }
    }

    fn parent_of(path: &str) -> Option<&str> {
        path.rfind('/').and_then(|index| if index == 0 {
                                     None
                                 } else {
                                     Some(&path[..index])
                                 })
    }

    fn insert(&self, path: &str, value: Vec<u8>, makepath: bool) {
        if makepath {
            if let Some(parent) = Self::parent_of(path) {
                if !self.state.borrow().nodes.contains_key(parent) {
                    self.insert(parent, Vec::new(), true);
                }
            }
        }

        let created = {
            let mut state = self.state.borrow_mut();
            state.nodes.insert(path.to_owned(), value).is_none()
        };

        if created {
            if let Some(parent) = Self::parent_of(path) {
                self.notify_children(parent);
            }
        }

        self.notify_data(path);
    }
}

impl CoordinationClient for MemoryCoordination {
    fn ensure_path(&self, path: &str) -> StaticBoxFuture<()> {
        if !self.state.borrow().nodes.contains_key(path) {
            self.insert(path, Vec::new(), true);
        }

        StaticBoxFuture::ok(())
    }

    fn create(&self,
              path: &str,
              value: Vec<u8>,
              _ephemeral: bool,
              makepath: bool)
              -> StaticBoxFuture<()> {
        self.insert(path, value, makepath);

        StaticBoxFuture::ok(())
    }

    fn get(&self, path: &str) -> StaticBoxFuture<Option<Vec<u8>>> {
        StaticBoxFuture::ok(self.state.borrow().nodes.get(path).cloned())
    }

    fn set(&self, path: &str, value: Vec<u8>) -> StaticBoxFuture<()> {
        self.state
            .borrow_mut()
            .nodes
            .insert(path.to_owned(), value);
        self.notify_data(path);

        StaticBoxFuture::ok(())
    }

    fn delete(&self, path: &str) -> StaticBoxFuture<()> {
        let removed = self.state.borrow_mut().nodes.remove(path).is_some();

        if removed {
            self.notify_data(path);

            if let Some(parent) = Self::parent_of(path) {
                self.notify_children(parent);
            }
        }

        StaticBoxFuture::ok(())
    }

    fn children_watch(&self, path: &str, watcher: ChildrenWatcher) -> StaticBoxFuture<()> {
        // watchers get a snapshot immediately on registration
        drop(watcher.unbounded_send(self.children_of(path)));

        self.state
            .borrow_mut()
            .children_watchers
            .entry(path.to_owned())
            .or_insert_with(Vec::new)
            .push(watcher);

        StaticBoxFuture::ok(())
    }

    fn data_watch(&self, path: &str, watcher: DataWatcher) -> StaticBoxFuture<()> {
        drop(watcher.unbounded_send(self.state.borrow().nodes.get(path).cloned()));

        self.state
            .borrow_mut()
            .data_watchers
            .entry(path.to_owned())
            .or_insert_with(Vec::new)
            .push(watcher);

        StaticBoxFuture::ok(())
    }

    fn acquire_lock(&self, path: &str) -> StaticBoxFuture<()> {
        let mut state = self.state.borrow_mut();
        let lock = state.locks.entry(path.to_owned()).or_insert_with(LockState::default);

        if !lock.held {
            lock.held = true;
            return StaticBoxFuture::ok(());
        }

        let (sender, receiver) = oneshot::channel();
        lock.waiters.push_back(sender);

        StaticBoxFuture::new(receiver
                                 .map_err(|_| ErrorKind::Canceled("lock holder vanished").into()))
    }

    fn release_lock(&self, path: &str) -> StaticBoxFuture<()> {
        let mut state = self.state.borrow_mut();

        if let Some(lock) = state.locks.get_mut(path) {
            // hand the lock to the next waiter, or free it
            loop {
                match lock.waiters.pop_front() {
                    Some(waiter) => {
                        if waiter.send(()).is_ok() {
                            return StaticBoxFuture::ok(());
                        }
                    }
                    None => {
                        lock.held = false;
                        break;
                    }
                }
            }
        }

        StaticBoxFuture::ok(())
    }
}
