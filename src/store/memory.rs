use std::collections::{BTreeMap, HashMap, HashSet};

use canopy_api::records::HistoryEntry;
use canopy_lib::collections::CollectionKind;
use canopy_lib::fs::NodeKind;
use canopy_lib::ids;
use canopy_lib::query::PageRequest;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error;

use super::{
    AccessRole,
    Collection,
    FileNode,
    ListFilter,
    ListScope,
    NewCollection,
    NewNode,
    SizeChange,
    Store,
    TagUsage,
    VersionedFile,
};

#[derive(Debug)]
struct Member {
    deleted: bool,
}

#[derive(Debug)]
struct Access {
    role: AccessRole,
    deleted: bool,
}

#[derive(Debug)]
struct LogRow {
    versioned: ids::VersionedId,
    entry: HistoryEntry,
}

#[derive(Debug, Default)]
struct Tables {
    next_node: ids::NodeId,
    next_collection: ids::CollectionId,
    next_tag: ids::TagId,

    // ordered by id so listings come out oldest first
    nodes: BTreeMap<ids::NodeId, FileNode>,
    node_keys: HashMap<ids::NodeKey, ids::NodeId>,

    collections: HashMap<ids::CollectionKey, Collection>,
    members: BTreeMap<(ids::CollectionId, ids::NodeKey), Member>,
    access: HashMap<(ids::CollectionId, ids::UserRef), Access>,

    tags: HashMap<(ids::UserRef, String), ids::TagId>,
    file_tags: HashMap<(ids::NodeId, ids::TagId), bool>,

    versioned: HashMap<ids::VersionedId, VersionedFile>,
    log: Vec<LogRow>,
}

impl Tables {
    fn node(&self, key: &str) -> Option<&FileNode> {
        self.node_keys.get(key).and_then(|id| self.nodes.get(id))
    }

    fn node_mut(&mut self, key: &str) -> Option<&mut FileNode> {
        let id = self.node_keys.get(key)?;

        self.nodes.get_mut(id)
    }

    fn require_node_mut(&mut self, key: &str) -> error::Result<&mut FileNode> {
        match self.node_mut(key) {
            Some(node) => Ok(node),
            None => Err(error::Error::not_found(format!("node \"{key}\" was not found"))),
        }
    }

    fn add_size(&mut self, key: &str, amount: i64) -> error::Result<()> {
        let node = self.require_node_mut(key)?;

        node.size += amount;
        node.updated = Some(Utc::now());

        Ok(())
    }

    fn listed(&self, node: &FileNode, filter: &ListFilter) -> bool {
        node.is_live() && !node.hidden && filter.accepts(node)
    }

    fn collection_by_id(&self, id: ids::CollectionId) -> Option<&Collection> {
        self.collections.values().find(|c| c.id == id)
    }
}

/// in-process tables behind a single mutex
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn node(&self, key: &str) -> error::Result<Option<FileNode>> {
        Ok(self.tables.lock().node(key).cloned())
    }

    async fn insert_nodes(
        &self,
        parent: Option<&str>,
        nodes: Vec<NewNode>
    ) -> error::Result<Vec<FileNode>> {
        let mut tables = self.tables.lock();

        if let Some(parent) = parent {
            if tables.node(parent).is_none() {
                return Err(error::Error::not_found(format!(
                    "parent \"{parent}\" was not found"
                )));
            }
        }

        let mut seen = HashSet::new();

        for new in &nodes {
            if tables.node_keys.contains_key(&new.key) || !seen.insert(new.key.as_str()) {
                return Err(error::Error::conflict(format!(
                    "node key \"{}\" already exists", new.key
                )));
            }
        }

        let mut total = 0;
        let mut created = Vec::with_capacity(nodes.len());

        for new in nodes {
            tables.next_node += 1;

            let node = FileNode {
                id: tables.next_node,
                key: new.key,
                name: new.name,
                kind: new.kind,
                size: new.size,
                owner: new.owner,
                parent: parent.map(String::from),
                content: new.content,
                thumbnail: None,
                sensitive: new.sensitive,
                deleted: false,
                purged: false,
                hidden: false,
                created: new.created,
                updated: None,
                deleted_at: None,
            };

            total += node.size;

            tables.node_keys.insert(node.key.clone(), node.id);
            tables.nodes.insert(node.id, node.clone());

            created.push(node);
        }

        if let Some(parent) = parent {
            tables.add_size(parent, total)?;
        }

        Ok(created)
    }

    async fn move_node(&self, key: &str, to: Option<&str>) -> error::Result<()> {
        let mut tables = self.tables.lock();

        if let Some(to) = to {
            if tables.node(to).is_none() {
                return Err(error::Error::not_found(format!(
                    "destination \"{to}\" was not found"
                )));
            }
        }

        let node = tables.require_node_mut(key)?;

        node.parent = to.map(String::from);
        node.updated = Some(Utc::now());

        let size = node.size;

        if let Some(to) = to {
            tables.add_size(to, size)?;
        }

        Ok(())
    }

    async fn mark_deleted(&self, key: &str, at: DateTime<Utc>, purged: bool) -> error::Result<bool> {
        let mut tables = self.tables.lock();

        let Some(node) = tables.node_mut(key) else {
            return Ok(false);
        };

        if node.deleted {
            return Ok(false);
        }

        node.deleted = true;
        node.purged = purged;
        node.deleted_at = Some(at);
        node.updated = Some(at);

        Ok(true)
    }

    async fn set_thumbnail(&self, key: &str, thumbnail: &str) -> error::Result<bool> {
        let mut tables = self.tables.lock();

        let Some(node) = tables.node_mut(key) else {
            return Ok(false);
        };

        if node.deleted || node.thumbnail.as_deref() == Some(thumbnail) {
            return Ok(false);
        }

        node.thumbnail = Some(thumbnail.to_owned());
        node.updated = Some(Utc::now());

        Ok(true)
    }

    async fn live_child_count(&self, key: &str) -> error::Result<i64> {
        let tables = self.tables.lock();

        let count = tables.nodes.values()
            .filter(|n| n.is_live() && n.parent.as_deref() == Some(key))
            .count();

        Ok(count as i64)
    }

    async fn recompute_size(&self, key: &str) -> error::Result<Option<SizeChange>> {
        let mut tables = self.tables.lock();

        match tables.node(key) {
            Some(node) if node.is_live() && node.kind.is_dir() => {}
            _ => return Ok(None),
        }

        let total: i64 = tables.nodes.values()
            .filter(|n| n.is_live() && n.parent.as_deref() == Some(key))
            .map(|n| n.size)
            .sum();

        let node = tables.require_node_mut(key)?;
        let change = SizeChange {
            old: node.size,
            new: total,
            parent: node.parent.clone(),
        };

        if change.changed() {
            node.size = total;
            node.updated = Some(Utc::now());
        }

        Ok(Some(change))
    }

    async fn directories_after(
        &self,
        after: ids::NodeId,
        limit: i64
    ) -> error::Result<Vec<(ids::NodeId, ids::NodeKey)>> {
        let tables = self.tables.lock();

        Ok(tables.nodes.range((after + 1)..)
            .map(|(_, node)| node)
            .filter(|n| n.is_live() && n.kind.is_dir())
            .take(limit.max(0) as usize)
            .map(|n| (n.id, n.key.clone()))
            .collect())
    }

    async fn list_nodes(
        &self,
        scope: &ListScope,
        filter: &ListFilter,
        page: &PageRequest
    ) -> error::Result<Vec<FileNode>> {
        let tables = self.tables.lock();
        let skip = page.skip();
        let take = page.limit.as_usize();

        let found: Vec<FileNode> = match scope {
            ListScope::Directory { owner, parent } => tables.nodes.values()
                .filter(|n| n.owner == *owner && n.parent == *parent)
                .filter(|n| tables.listed(n, filter))
                .skip(skip)
                .take(take)
                .cloned()
                .collect(),
            ListScope::Tag { owner, name } => {
                let Some(tag_id) = tables.tags.get(&(owner.clone(), name.clone())) else {
                    return Ok(Vec::new());
                };

                tables.nodes.values()
                    .filter(|n| matches!(tables.file_tags.get(&(n.id, *tag_id)), Some(false)))
                    .filter(|n| tables.listed(n, filter))
                    .skip(skip)
                    .take(take)
                    .cloned()
                    .collect()
            }
            ListScope::Collection(key) => {
                let Some(collection) = tables.collections.get(key) else {
                    return Ok(Vec::new());
                };

                let mut members: Vec<&FileNode> = tables.members.iter()
                    .filter(|((cid, _), m)| *cid == collection.id && !m.deleted)
                    .filter_map(|((_, node_key), _)| tables.node(node_key))
                    .filter(|n| tables.listed(n, filter))
                    .collect();

                members.sort_by_key(|n| n.id);

                members.into_iter()
                    .skip(skip)
                    .take(take)
                    .cloned()
                    .collect()
            }
        };

        Ok(found)
    }

    async fn collection(&self, key: &str) -> error::Result<Option<Collection>> {
        Ok(self.tables.lock().collections.get(key).cloned())
    }

    async fn active_collection_named(
        &self,
        kind: CollectionKind,
        owner: &str,
        name: &str
    ) -> error::Result<Option<Collection>> {
        let tables = self.tables.lock();

        Ok(tables.collections.values()
            .find(|c| {
                !c.deleted &&
                    c.directory.is_none() &&
                    c.kind == kind &&
                    c.owner == owner &&
                    c.name == name
            })
            .cloned())
    }

    async fn directory_gallery(&self, dir_key: &str) -> error::Result<Option<Collection>> {
        let tables = self.tables.lock();

        Ok(tables.collections.values()
            .find(|c| !c.deleted && c.directory.as_deref() == Some(dir_key))
            .cloned())
    }

    async fn insert_collection(&self, new: NewCollection) -> error::Result<Collection> {
        let mut tables = self.tables.lock();

        let duplicate = tables.collections.values().any(|c| {
            !c.deleted && match (&new.directory, &c.directory) {
                (Some(dir), Some(existing)) => dir == existing,
                (None, None) => c.kind == new.kind && c.owner == new.owner && c.name == new.name,
                _ => false,
            }
        });

        if duplicate || tables.collections.contains_key(&new.key) {
            return Err(error::Error::conflict(format!(
                "collection \"{}\" already exists", new.name
            )));
        }

        tables.next_collection += 1;

        let collection = Collection {
            id: tables.next_collection,
            key: new.key,
            kind: new.kind,
            name: new.name,
            owner: new.owner,
            directory: new.directory,
            deleted: false,
            created: new.created,
            updated: None,
            deleted_at: None,
        };

        tables.access.insert((collection.id, collection.owner.clone()), Access {
            role: AccessRole::Owner,
            deleted: false,
        });
        tables.collections.insert(collection.key.clone(), collection.clone());

        Ok(collection)
    }

    async fn remove_collection(&self, key: &str, at: DateTime<Utc>) -> error::Result<bool> {
        let mut tables = self.tables.lock();

        let id = match tables.collections.get_mut(key) {
            Some(collection) if !collection.deleted => {
                collection.deleted = true;
                collection.deleted_at = Some(at);
                collection.updated = Some(at);

                collection.id
            }
            _ => return Ok(false),
        };

        for ((cid, _), member) in tables.members.iter_mut() {
            if *cid == id {
                member.deleted = true;
            }
        }

        for ((cid, _), access) in tables.access.iter_mut() {
            if *cid == id {
                access.deleted = true;
            }
        }

        Ok(true)
    }

    async fn insert_members(&self, collection: ids::CollectionId, keys: &[ids::NodeKey]) -> error::Result<u64> {
        let mut tables = self.tables.lock();
        let mut changed = 0;

        for key in keys {
            if tables.node(key).is_none() {
                return Err(error::Error::not_found(format!("node \"{key}\" was not found")));
            }

            match tables.members.get_mut(&(collection, key.clone())) {
                Some(member) => if member.deleted {
                    member.deleted = false;
                    changed += 1;
                },
                None => {
                    tables.members.insert((collection, key.clone()), Member { deleted: false });
                    changed += 1;
                }
            }
        }

        Ok(changed)
    }

    async fn remove_members(&self, collection: ids::CollectionId, keys: &[ids::NodeKey]) -> error::Result<u64> {
        let mut tables = self.tables.lock();
        let mut changed = 0;

        for key in keys {
            if let Some(member) = tables.members.get_mut(&(collection, key.clone())) {
                if !member.deleted {
                    member.deleted = true;
                    changed += 1;
                }
            }
        }

        Ok(changed)
    }

    async fn remove_file_from_galleries(&self, file_key: &str) -> error::Result<u64> {
        let mut tables = self.tables.lock();

        let galleries: HashSet<ids::CollectionId> = tables.collections.values()
            .filter(|c| !c.deleted && c.kind == CollectionKind::Gallery)
            .map(|c| c.id)
            .collect();

        let mut changed = 0;

        for ((cid, key), member) in tables.members.iter_mut() {
            if key == file_key && galleries.contains(cid) && !member.deleted {
                member.deleted = true;
                changed += 1;
            }
        }

        Ok(changed)
    }

    async fn grant(&self, collection: ids::CollectionId, grantee: &str, _granted_by: &str) -> error::Result<bool> {
        let mut tables = self.tables.lock();

        if tables.collection_by_id(collection).is_none() {
            return Err(error::Error::not_found("collection was not found"));
        }

        match tables.access.get_mut(&(collection, grantee.to_owned())) {
            Some(access) => {
                if access.role == AccessRole::Owner || !access.deleted {
                    return Ok(false);
                }

                access.deleted = false;

                Ok(true)
            }
            None => {
                tables.access.insert((collection, grantee.to_owned()), Access {
                    role: AccessRole::Grantee,
                    deleted: false,
                });

                Ok(true)
            }
        }
    }

    async fn revoke(&self, collection: ids::CollectionId, grantee: &str) -> error::Result<bool> {
        let mut tables = self.tables.lock();

        match tables.access.get_mut(&(collection, grantee.to_owned())) {
            Some(access) if access.role == AccessRole::Grantee && !access.deleted => {
                access.deleted = true;

                Ok(true)
            }
            _ => Ok(false)
        }
    }

    async fn has_grant(&self, collection: ids::CollectionId, user: &str) -> error::Result<bool> {
        let tables = self.tables.lock();

        Ok(matches!(
            tables.access.get(&(collection, user.to_owned())),
            Some(Access { role: AccessRole::Grantee, deleted: false })
        ))
    }

    async fn tag_file(&self, node: ids::NodeId, owner: &str, name: &str) -> error::Result<bool> {
        let mut tables = self.tables.lock();
        let tag_key = (owner.to_owned(), name.to_owned());

        let tag_id = match tables.tags.get(&tag_key) {
            Some(id) => *id,
            None => {
                tables.next_tag += 1;

                let id = tables.next_tag;

                tables.tags.insert(tag_key, id);

                id
            }
        };

        match tables.file_tags.insert((node, tag_id), false) {
            Some(false) => Ok(false),
            _ => Ok(true),
        }
    }

    async fn untag_file(&self, node: ids::NodeId, owner: &str, name: &str) -> error::Result<bool> {
        let mut tables = self.tables.lock();
        let tag_key = (owner.to_owned(), name.to_owned());

        let Some(tag_id) = tables.tags.get(&tag_key).copied() else {
            return Ok(false);
        };

        let removed = matches!(tables.file_tags.remove(&(node, tag_id)), Some(false));

        let in_use = tables.file_tags.iter()
            .any(|((_, tid), deleted)| *tid == tag_id && !*deleted);

        if !in_use {
            tables.file_tags.retain(|(_, tid), _| *tid != tag_id);
            tables.tags.remove(&tag_key);
        }

        Ok(removed)
    }

    async fn tag_usage(&self, owner: &str, name: &str) -> error::Result<TagUsage> {
        let tables = self.tables.lock();

        let Some(tag_id) = tables.tags.get(&(owner.to_owned(), name.to_owned())) else {
            return Ok(TagUsage::default());
        };

        let files = tables.file_tags.iter()
            .filter(|((_, tid), deleted)| tid == tag_id && !**deleted)
            .count();

        Ok(TagUsage {
            exists: true,
            files: files as i64,
        })
    }

    async fn tags_for_file(&self, node: ids::NodeId, owner: &str) -> error::Result<Vec<String>> {
        let tables = self.tables.lock();

        let mut names: Vec<String> = tables.tags.iter()
            .filter(|((tag_owner, _), tid)| {
                tag_owner == owner && matches!(tables.file_tags.get(&(node, **tid)), Some(false))
            })
            .map(|((_, name), _)| name.clone())
            .collect();

        names.sort();

        Ok(names)
    }

    async fn insert_versioned(
        &self,
        id: &str,
        file_key: &str,
        owner: &str,
        at: DateTime<Utc>
    ) -> error::Result<VersionedFile> {
        let mut tables = self.tables.lock();

        if tables.versioned.contains_key(id) {
            return Err(error::Error::conflict(format!("versioned file \"{id}\" already exists")));
        }

        tables.require_node_mut(file_key)?.hidden = true;

        let versioned = VersionedFile {
            id: id.to_owned(),
            file_key: file_key.to_owned(),
            owner: owner.to_owned(),
            deleted: false,
            created: at,
            deleted_at: None,
        };

        tables.versioned.insert(versioned.id.clone(), versioned.clone());
        tables.log.push(LogRow {
            versioned: versioned.id.clone(),
            entry: HistoryEntry {
                file_key: file_key.to_owned(),
                bound_by: owner.to_owned(),
                bound_at: at,
            }
        });

        Ok(versioned)
    }

    async fn versioned(&self, id: &str) -> error::Result<Option<VersionedFile>> {
        Ok(self.tables.lock().versioned.get(id).cloned())
    }

    async fn rebind_versioned(
        &self,
        id: &str,
        file_key: &str,
        by: &str,
        at: DateTime<Utc>
    ) -> error::Result<()> {
        let mut tables = self.tables.lock();

        if !tables.versioned.contains_key(id) {
            return Err(error::Error::not_found(format!("versioned file \"{id}\" was not found")));
        }

        tables.require_node_mut(file_key)?.hidden = true;

        if let Some(versioned) = tables.versioned.get_mut(id) {
            versioned.file_key = file_key.to_owned();
        }

        tables.log.push(LogRow {
            versioned: id.to_owned(),
            entry: HistoryEntry {
                file_key: file_key.to_owned(),
                bound_by: by.to_owned(),
                bound_at: at,
            }
        });

        Ok(())
    }

    async fn mark_versioned_deleted(&self, id: &str, at: DateTime<Utc>) -> error::Result<bool> {
        let mut tables = self.tables.lock();

        match tables.versioned.get_mut(id) {
            Some(versioned) if !versioned.deleted => {
                versioned.deleted = true;
                versioned.deleted_at = Some(at);

                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(error::Error::not_found(format!("versioned file \"{id}\" was not found"))),
        }
    }

    async fn versioned_history(&self, id: &str) -> error::Result<Vec<HistoryEntry>> {
        let tables = self.tables.lock();

        Ok(tables.log.iter()
            .filter(|row| row.versioned == id)
            .map(|row| row.entry.clone())
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use canopy_lib::query::Limit;

    fn new_node(name: &str, kind: NodeKind, size: i64) -> NewNode {
        NewNode {
            key: ids::create_key(),
            name: name.into(),
            kind,
            size,
            owner: "u1".into(),
            content: None,
            sensitive: false,
            created: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_adds_to_parent() {
        let store = MemoryStore::new();

        let dir = store.insert_nodes(None, vec![new_node("d", NodeKind::Directory, 0)])
            .await
            .expect("failed to insert directory")
            .remove(0);

        store.insert_nodes(Some(&dir.key), vec![
            new_node("a", NodeKind::File, 10),
            new_node("b", NodeKind::File, 5),
        ]).await.expect("failed to insert files");

        let dir = store.node(&dir.key).await.expect("failed to read").expect("missing dir");

        assert_eq!(dir.size, 15);
        assert_eq!(store.live_child_count(&dir.key).await.expect("failed to count"), 2);
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let store = MemoryStore::new();
        let dup = new_node("a", NodeKind::File, 1);

        let result = store.insert_nodes(None, vec![dup.clone(), dup]).await;

        assert!(result.is_err());

        let listed = store.list_nodes(
            &ListScope::Directory { owner: "u1".into(), parent: None },
            &ListFilter::everything(),
            &PageRequest::first(Limit::Small)
        ).await.expect("failed to list");

        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn untag_collects_orphans() {
        let store = MemoryStore::new();

        assert!(store.tag_file(1, "u1", "t").await.expect("failed to tag"));
        assert!(!store.tag_file(1, "u1", "t").await.expect("failed to tag"));
        assert!(store.tag_file(2, "u1", "t").await.expect("failed to tag"));

        assert!(store.untag_file(1, "u1", "t").await.expect("failed to untag"));
        assert_eq!(store.tag_usage("u1", "t").await.expect("usage"), TagUsage { exists: true, files: 1 });

        assert!(store.untag_file(2, "u1", "t").await.expect("failed to untag"));
        assert_eq!(store.tag_usage("u1", "t").await.expect("usage"), TagUsage::default());
    }
}
