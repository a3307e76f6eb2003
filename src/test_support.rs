use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::{self, relay::MemoryRelay, QueuePublisher, Redelivery};
use crate::external::{MemoryObjectStore, StaticIdentities};
use crate::hierarchy::{self, CreateNode};
use crate::lock::Locks;
use crate::state::{ArcShared, Shared};
use crate::store::memory::MemoryStore;
use crate::store::FileNode;

pub const OWNER: &str = "u1";
pub const OTHER: &str = "u2";

/// bound on how many queued messages a single drain will handle
const DRAIN_LIMIT: usize = 10_000;

/// engine state over in-memory collaborators. published messages stay
/// queued until `drain` handles them
pub struct Env {
    pub state: ArcShared,
    pub queue: Arc<QueuePublisher>,
    pub relay: Arc<MemoryRelay>,
    pub objects: Arc<MemoryObjectStore>,
}

impl Env {
    pub fn new() -> Self {
        let queue = Arc::new(QueuePublisher::default());
        let relay = Arc::new(MemoryRelay::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let identities = StaticIdentities::new(HashMap::from([
            (String::from(OWNER), String::from("alice")),
            (String::from(OTHER), String::from("bob")),
        ]));

        let state = Shared::builder(
            Arc::new(MemoryStore::new()),
            Locks::local(Duration::from_millis(100)),
            queue.clone(),
        )
            .relay(relay.clone())
            .objects(objects.clone())
            .identities(Arc::new(identities))
            .build();

        Env {
            state: Arc::new(state),
            queue,
            relay,
            objects,
        }
    }

    pub fn redelivery(&self) -> Redelivery {
        Redelivery {
            max_attempts: 3,
            retry: Duration::from_millis(10),
        }
    }

    /// handles queued messages, including the ones they publish, until the
    /// queue is empty
    pub async fn drain(&self) {
        for _ in 0..DRAIN_LIMIT {
            let Some(msg) = self.queue.pop() else {
                return;
            };

            if let Err(err) = bus::handle(&self.state, &msg).await {
                panic!("failed to handle {}: {err}", msg.name());
            }
        }

        panic!("queue did not settle after {DRAIN_LIMIT} messages");
    }

    pub async fn node(&self, key: &str) -> FileNode {
        self.state.store()
            .node(key)
            .await
            .expect("failed to read node")
            .expect("node does not exist")
    }

    pub async fn dir(&self, name: &str, parent: Option<&str>) -> FileNode {
        hierarchy::create_node(&self.state, CreateNode::directory(name, parent, OWNER))
            .await
            .expect("failed to create directory")
    }

    pub async fn dir_as(&self, name: &str, owner: &str) -> FileNode {
        hierarchy::create_node(&self.state, CreateNode::directory(name, None, owner))
            .await
            .expect("failed to create directory")
    }

    /// the file's content reference is "content-<name>"
    pub async fn file(&self, name: &str, parent: Option<&str>, size: i64) -> FileNode {
        hierarchy::create_node(&self.state, CreateNode::file(
            name,
            parent,
            OWNER,
            size,
            Some(format!("content-{name}"))
        ))
            .await
            .expect("failed to create file")
    }

    pub async fn file_as(&self, name: &str, owner: &str) -> FileNode {
        hierarchy::create_node(&self.state, CreateNode::file(
            name,
            None,
            owner,
            1,
            Some(format!("content-{name}"))
        ))
            .await
            .expect("failed to create file")
    }

    pub async fn dir_with_file(&self, dir: &str, file: &str, size: i64) -> (FileNode, FileNode) {
        let dir = self.dir(dir, None).await;
        let file = self.file(file, Some(&dir.key), size).await;

        (dir, file)
    }
}
