use std::rc::Rc;

use futures::Future;

use client::StaticBoxFuture;
use coordination::{ChildrenWatcher, CoordinationClient};

/// The "party" recipe: each member is an ephemeral child of the party path,
/// so a lost session is indistinguishable from leaving.  Everyone watching
/// the path learns about membership changes.
pub struct Party {
    client: Rc<CoordinationClient>,
    member_name: String,
    path: String,
}

impl Party {
    pub fn new(client: Rc<CoordinationClient>, member_name: &str, path: &str) -> Party {
        Party {
            client: client,
            member_name: member_name.to_owned(),
            path: path.to_owned(),
        }
    }

    /// Creates the party path and attaches the membership watch.  Expected
    /// to be called before `join`.
    pub fn start(&self, watcher: ChildrenWatcher) -> StaticBoxFuture<()> {
        let client = self.client.clone();
        let path = self.path.clone();

        StaticBoxFuture::new(self.client
                                 .ensure_path(&self.path)
                                 .and_then(move |_| client.children_watch(&path, watcher)))
    }

    /// Joins the party by creating this member's ephemeral child node.
    pub fn join(&self) -> StaticBoxFuture<()> {
        info!("joining {} party as {}", self.path, self.member_name);

        self.client
            .create(&self.member_path(), Vec::new(), true, true)
    }

    /// Deletes the member node; a no-op if it is already gone.
    pub fn leave(&self) -> StaticBoxFuture<()> {
        info!("leaving {} party as {}", self.path, self.member_name);

        self.client.delete(&self.member_path())
    }

    fn member_path(&self) -> String {
        format!("{}/{}", self.path, self.member_name)
    }
}
