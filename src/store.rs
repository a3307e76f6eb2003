//! persistence seam. every method is a single atomic unit: one transaction
//! for postgres, one critical section for the in-memory tables.

use std::sync::Arc;

use canopy_api::records::{HistoryEntry, NodeEntry};
use canopy_lib::collections::CollectionKind;
use canopy_lib::fs::NodeKind;
use canopy_lib::ids;
use canopy_lib::query::PageRequest;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;

use crate::config;
use crate::error::{self, Context};

pub mod memory;
pub mod pg;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    pub id: ids::NodeId,
    pub key: ids::NodeKey,
    pub name: String,
    pub kind: NodeKind,
    pub size: i64,
    pub owner: ids::UserRef,
    pub parent: Option<ids::NodeKey>,
    pub content: Option<String>,
    pub thumbnail: Option<String>,
    pub sensitive: bool,
    pub deleted: bool,
    pub purged: bool,
    pub hidden: bool,
    pub created: DateTime<Utc>,
    pub updated: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileNode {
    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    pub fn has_thumbnail(&self) -> bool {
        self.thumbnail.as_ref().map(|t| !t.is_empty()).unwrap_or(false)
    }

    pub fn to_entry(&self) -> NodeEntry {
        NodeEntry {
            key: self.key.clone(),
            name: self.name.clone(),
            kind: self.kind,
            size: self.size,
            owner: self.owner.clone(),
            parent: self.parent.clone(),
            thumbnail: self.thumbnail.clone(),
            sensitive: self.sensitive,
            created: self.created,
            updated: self.updated,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewNode {
    pub key: ids::NodeKey,
    pub name: String,
    pub kind: NodeKind,
    pub size: i64,
    pub owner: ids::UserRef,
    pub content: Option<String>,
    pub sensitive: bool,
    pub created: DateTime<Utc>,
}

/// result of a directory size recompute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeChange {
    pub old: i64,
    pub new: i64,
    pub parent: Option<ids::NodeKey>,
}

impl SizeChange {
    pub fn changed(&self) -> bool {
        self.old != self.new
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub id: ids::CollectionId,
    pub key: ids::CollectionKey,
    pub kind: CollectionKind,
    pub name: String,
    pub owner: ids::UserRef,
    pub directory: Option<ids::NodeKey>,
    pub deleted: bool,
    pub created: DateTime<Utc>,
    pub updated: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewCollection {
    pub key: ids::CollectionKey,
    pub kind: CollectionKind,
    pub name: String,
    pub owner: ids::UserRef,
    pub directory: Option<ids::NodeKey>,
    pub created: DateTime<Utc>,
}

/// stored role of a collection access row. owners get one implicitly on
/// creation, grantees through a grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRole {
    Owner,
    Grantee,
}

impl AccessRole {
    pub fn as_i16(&self) -> i16 {
        match self {
            AccessRole::Owner => 0,
            AccessRole::Grantee => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagUsage {
    pub exists: bool,
    pub files: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedFile {
    pub id: ids::VersionedId,
    pub file_key: ids::NodeKey,
    pub owner: ids::UserRef,
    pub deleted: bool,
    pub created: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// which set of nodes a listing walks. exactly one applies per call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListScope {
    Directory {
        owner: ids::UserRef,
        parent: Option<ids::NodeKey>,
    },
    Tag {
        owner: ids::UserRef,
        name: String,
    },
    Collection(ids::CollectionKey),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub name: Option<String>,
    pub kind: Option<NodeKind>,
    pub include_sensitive: bool,
}

impl ListFilter {
    pub fn files() -> Self {
        ListFilter {
            kind: Some(NodeKind::File),
            include_sensitive: true,
            ..Default::default()
        }
    }

    pub fn everything() -> Self {
        ListFilter {
            include_sensitive: true,
            ..Default::default()
        }
    }

    pub fn accepts(&self, node: &FileNode) -> bool {
        if let Some(kind) = &self.kind {
            if node.kind != *kind {
                return false;
            }
        }

        if !self.include_sensitive && node.sensitive {
            return false;
        }

        if let Some(name) = &self.name {
            if !node.name.contains(name.as_str()) {
                return false;
            }
        }

        true
    }
}

#[async_trait::async_trait]
pub trait Store: std::fmt::Debug + Send + Sync {
    async fn node(&self, key: &str) -> error::Result<Option<FileNode>>;

    /// inserts every node under `parent` and adds their sizes to it. all or
    /// nothing
    async fn insert_nodes(
        &self,
        parent: Option<&str>,
        nodes: Vec<NewNode>
    ) -> error::Result<Vec<FileNode>>;

    /// repoints the parent and adds the node's size to the destination
    async fn move_node(&self, key: &str, to: Option<&str>) -> error::Result<()>;

    /// false when the node was already marked
    async fn mark_deleted(&self, key: &str, at: DateTime<Utc>, purged: bool) -> error::Result<bool>;

    /// false when the node is missing, deleted or already carries the thumbnail
    async fn set_thumbnail(&self, key: &str, thumbnail: &str) -> error::Result<bool>;

    async fn live_child_count(&self, key: &str) -> error::Result<i64>;

    /// None when the key is not a live directory
    async fn recompute_size(&self, key: &str) -> error::Result<Option<SizeChange>>;

    /// live directories with an id greater than `after`, oldest first
    async fn directories_after(
        &self,
        after: ids::NodeId,
        limit: i64
    ) -> error::Result<Vec<(ids::NodeId, ids::NodeKey)>>;

    /// never includes hidden or logically deleted nodes
    async fn list_nodes(
        &self,
        scope: &ListScope,
        filter: &ListFilter,
        page: &PageRequest
    ) -> error::Result<Vec<FileNode>>;

    async fn collection(&self, key: &str) -> error::Result<Option<Collection>>;

    async fn active_collection_named(
        &self,
        kind: CollectionKind,
        owner: &str,
        name: &str
    ) -> error::Result<Option<Collection>>;

    async fn directory_gallery(&self, dir_key: &str) -> error::Result<Option<Collection>>;

    /// also records the owner access row
    async fn insert_collection(&self, new: NewCollection) -> error::Result<Collection>;

    /// soft deletes the collection with its members and access rows
    async fn remove_collection(&self, key: &str, at: DateTime<Utc>) -> error::Result<bool>;

    /// adds or restores memberships. returns how many changed
    async fn insert_members(&self, collection: ids::CollectionId, keys: &[ids::NodeKey]) -> error::Result<u64>;

    async fn remove_members(&self, collection: ids::CollectionId, keys: &[ids::NodeKey]) -> error::Result<u64>;

    /// drops the file from every live gallery
    async fn remove_file_from_galleries(&self, file_key: &str) -> error::Result<u64>;

    async fn grant(&self, collection: ids::CollectionId, grantee: &str, granted_by: &str) -> error::Result<bool>;

    async fn revoke(&self, collection: ids::CollectionId, grantee: &str) -> error::Result<bool>;

    async fn has_grant(&self, collection: ids::CollectionId, user: &str) -> error::Result<bool>;

    /// find or create the tag, find or restore the association
    async fn tag_file(&self, node: ids::NodeId, owner: &str, name: &str) -> error::Result<bool>;

    /// removes the association and the tag once nothing references it
    async fn untag_file(&self, node: ids::NodeId, owner: &str, name: &str) -> error::Result<bool>;

    async fn tag_usage(&self, owner: &str, name: &str) -> error::Result<TagUsage>;

    async fn tags_for_file(&self, node: ids::NodeId, owner: &str) -> error::Result<Vec<String>>;

    /// inserts the row with its first log entry and hides the bound node
    async fn insert_versioned(
        &self,
        id: &str,
        file_key: &str,
        owner: &str,
        at: DateTime<Utc>
    ) -> error::Result<VersionedFile>;

    async fn versioned(&self, id: &str) -> error::Result<Option<VersionedFile>>;

    /// appends a log entry, moves the current pointer and hides the new node
    async fn rebind_versioned(
        &self,
        id: &str,
        file_key: &str,
        by: &str,
        at: DateTime<Utc>
    ) -> error::Result<()>;

    async fn mark_versioned_deleted(&self, id: &str, at: DateTime<Utc>) -> error::Result<bool>;

    /// log entries in binding order
    async fn versioned_history(&self, id: &str) -> error::Result<Vec<HistoryEntry>>;
}

pub type ArcStore = Arc<dyn Store>;

pub fn from_config(config: &config::Config, pool: Option<&Pool>) -> error::Result<ArcStore> {
    match config.settings.store.kind {
        config::StoreKind::Memory => {
            tracing::info!("using in-memory store");

            Ok(Arc::new(memory::MemoryStore::new()))
        }
        config::StoreKind::Postgres => {
            let pool = pool.context("postgres store requires a database pool")?;

            Ok(Arc::new(pg::PgStore::new(pool.clone())))
        }
    }
}
