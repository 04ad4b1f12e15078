use std::collections::BTreeSet;
use std::rc::Rc;

use futures::future::{self, Future};
use serde_json;

use client::StaticBoxFuture;
use coordination::{CoordinationClient, DataWatcher};
use errors::Result;

/// A set shared between processes, stored as a JSON-encoded list in a
/// single node and guarded by a lock at `<path>/lock`.
///
/// Used for the pool of `"topic:partition_id"` strings a consumer group
/// divides among its members.
pub struct SharedSet {
    client: Rc<CoordinationClient>,
    path: String,
}

impl SharedSet {
    pub fn new(client: Rc<CoordinationClient>, path: &str) -> SharedSet {
        SharedSet {
            client: client,
            path: path.to_owned(),
        }
    }

    pub fn lock_path(&self) -> String {
        format!("{}/lock", self.path)
    }

    /// Creates the set's path and attaches the data watch.
    pub fn start(&self, watcher: DataWatcher) -> StaticBoxFuture<()> {
        let client = self.client.clone();
        let path = self.path.clone();

        StaticBoxFuture::new(self.client
                                 .ensure_path(&self.path)
                                 .and_then(move |_| client.data_watch(&path, watcher)))
    }

    /// Adds items under the set's lock; the write is skipped entirely when
    /// every item is already present.
    pub fn add_items(&self, new_items: BTreeSet<String>) -> StaticBoxFuture<()> {
        self.update(move |existing| if new_items.is_subset(existing) {
                        None
                    } else {
                        let mut updated = existing.clone();
                        updated.extend(new_items.iter().cloned());
                        Some(updated)
                    })
    }

    /// Removes items under the set's lock; the write is skipped when none
    /// of them are present.
    pub fn remove_items(&self, old_items: BTreeSet<String>) -> StaticBoxFuture<()> {
        self.update(move |existing| if old_items.is_disjoint(existing) {
                        None
                    } else {
                        Some(existing.difference(&old_items).cloned().collect())
                    })
    }

    /// Read-modify-write under the lock; `None` from the closure means
    /// nothing changed.
    fn update<F>(&self, apply: F) -> StaticBoxFuture<()>
    where
        F: FnOnce(&BTreeSet<String>) -> Option<BTreeSet<String>> + 'static,
    {
        let client = self.client.clone();
        let release_client = self.client.clone();
        let path = self.path.clone();
        let lock_path = self.lock_path();
        let release_path = lock_path.clone();

        let locked = self.client.acquire_lock(&lock_path).and_then(move |_| {
            client
                .get(&path)
                .and_then(move |data| -> StaticBoxFuture<()> {
                    let existing = deserialize(data);

                    match apply(&existing) {
                        Some(updated) => {
                            match serialize(&updated) {
                                Ok(encoded) => client.set(&path, encoded),
                                Err(err) => StaticBoxFuture::err(err),
                            }
                        }
                        None => StaticBoxFuture::ok(()),
                    }
                })
        });

        StaticBoxFuture::new(locked.then(move |result| {
            release_client
                .release_lock(&release_path)
                .and_then(move |_| future::result(result))
        }))
    }
}

fn serialize(items: &BTreeSet<String>) -> Result<Vec<u8>> {
    let list: Vec<&String> = items.iter().collect();
    Ok(serde_json::to_vec(&list)?)
}

fn deserialize(data: Option<Vec<u8>>) -> BTreeSet<String> {
    data.and_then(|data| if data.is_empty() {
                      None
                  } else {
                      serde_json::from_slice::<Vec<String>>(&data).ok()
                  })
        .map(|list| list.into_iter().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_round_trip() {
        let items: BTreeSet<String> =
            vec!["t:0".to_owned(), "t:1".to_owned()].into_iter().collect();

        let encoded = serialize(&items).unwrap();

        assert_eq!(deserialize(Some(encoded)), items);
    }

    #[test]
    fn test_deserialize_empty() {
        assert!(deserialize(None).is_empty());
        assert!(deserialize(Some(Vec::new())).is_empty());
        assert!(deserialize(Some(b"garbage".to_vec())).is_empty());
    }
}
