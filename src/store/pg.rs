use canopy_api::records::HistoryEntry;
use canopy_lib::collections::CollectionKind;
use canopy_lib::ids;
use canopy_lib::query::PageRequest;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Error as PgError;

use crate::error;
use crate::sql;

use super::{
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

pub mod nodes;
pub mod collections;
pub mod tags;
pub mod versioned;

#[derive(Debug)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        PgStore { pool }
    }
}

fn conflict_or(err: PgError, cxt: &str) -> error::Error {
    if let Some(constraint) = sql::unique_constraint_error(&err) {
        error::Error::conflict(format!("{cxt}. constraint: {constraint}"))
            .source(err)
    } else {
        error::Error::from(err)
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn node(&self, key: &str) -> error::Result<Option<FileNode>> {
        let conn = self.pool.get().await?;

        Ok(nodes::by_key(&conn, key).await?)
    }

    async fn insert_nodes(
        &self,
        parent: Option<&str>,
        new_nodes: Vec<NewNode>
    ) -> error::Result<Vec<FileNode>> {
        let mut conn = self.pool.get().await?;
        let transaction = conn.transaction().await?;
        let mut total = 0;
        let mut created = Vec::with_capacity(new_nodes.len());

        for new in &new_nodes {
            let node = nodes::insert(&transaction, parent, new)
                .await
                .map_err(|e| conflict_or(e, "node key already exists"))?;

            total += node.size;
            created.push(node);
        }

        if let Some(parent) = parent {
            if nodes::add_size(&transaction, parent, total).await? == 0 {
                return Err(error::Error::not_found(format!(
                    "parent \"{parent}\" was not found"
                )));
            }
        }

        transaction.commit().await?;

        Ok(created)
    }

    async fn move_node(&self, key: &str, to: Option<&str>) -> error::Result<()> {
        let mut conn = self.pool.get().await?;
        let transaction = conn.transaction().await?;

        let Some(size) = nodes::set_parent(&transaction, key, to).await? else {
            return Err(error::Error::not_found(format!("node \"{key}\" was not found")));
        };

        if let Some(to) = to {
            if nodes::add_size(&transaction, to, size).await? == 0 {
                return Err(error::Error::not_found(format!(
                    "destination \"{to}\" was not found"
                )));
            }
        }

        transaction.commit().await?;

        Ok(())
    }

    async fn mark_deleted(&self, key: &str, at: DateTime<Utc>, purged: bool) -> error::Result<bool> {
        let conn = self.pool.get().await?;

        Ok(nodes::mark_deleted(&conn, key, &at, purged).await?)
    }

    async fn set_thumbnail(&self, key: &str, thumbnail: &str) -> error::Result<bool> {
        let conn = self.pool.get().await?;

        Ok(nodes::set_thumbnail(&conn, key, thumbnail).await?)
    }

    async fn live_child_count(&self, key: &str) -> error::Result<i64> {
        let conn = self.pool.get().await?;

        Ok(nodes::live_child_count(&conn, key).await?)
    }

    async fn recompute_size(&self, key: &str) -> error::Result<Option<SizeChange>> {
        let mut conn = self.pool.get().await?;
        let transaction = conn.transaction().await?;

        let change = nodes::recompute_size(&transaction, key).await?;

        transaction.commit().await?;

        Ok(change)
    }

    async fn directories_after(
        &self,
        after: ids::NodeId,
        limit: i64
    ) -> error::Result<Vec<(ids::NodeId, ids::NodeKey)>> {
        let conn = self.pool.get().await?;

        Ok(nodes::directories_after(&conn, after, limit).await?)
    }

    async fn list_nodes(
        &self,
        scope: &ListScope,
        filter: &ListFilter,
        page: &PageRequest
    ) -> error::Result<Vec<FileNode>> {
        let conn = self.pool.get().await?;

        Ok(nodes::list(&conn, scope, filter, page).await?)
    }

    async fn collection(&self, key: &str) -> error::Result<Option<Collection>> {
        let conn = self.pool.get().await?;

        Ok(collections::by_key(&conn, key).await?)
    }

    async fn active_collection_named(
        &self,
        kind: CollectionKind,
        owner: &str,
        name: &str
    ) -> error::Result<Option<Collection>> {
        let conn = self.pool.get().await?;

        Ok(collections::active_named(&conn, kind, owner, name).await?)
    }

    async fn directory_gallery(&self, dir_key: &str) -> error::Result<Option<Collection>> {
        let conn = self.pool.get().await?;

        Ok(collections::directory_gallery(&conn, dir_key).await?)
    }

    async fn insert_collection(&self, new: NewCollection) -> error::Result<Collection> {
        let mut conn = self.pool.get().await?;
        let transaction = conn.transaction().await?;

        let collection = collections::insert(&transaction, &new)
            .await
            .map_err(|e| conflict_or(e, "collection already exists"))?;

        transaction.commit().await?;

        Ok(collection)
    }

    async fn remove_collection(&self, key: &str, at: DateTime<Utc>) -> error::Result<bool> {
        let mut conn = self.pool.get().await?;
        let transaction = conn.transaction().await?;

        let removed = collections::remove(&transaction, key, &at).await?;

        transaction.commit().await?;

        Ok(removed)
    }

    async fn insert_members(&self, collection: ids::CollectionId, keys: &[ids::NodeKey]) -> error::Result<u64> {
        let conn = self.pool.get().await?;

        Ok(collections::insert_members(&conn, collection, keys).await?)
    }

    async fn remove_members(&self, collection: ids::CollectionId, keys: &[ids::NodeKey]) -> error::Result<u64> {
        let conn = self.pool.get().await?;

        Ok(collections::remove_members(&conn, collection, keys).await?)
    }

    async fn remove_file_from_galleries(&self, file_key: &str) -> error::Result<u64> {
        let conn = self.pool.get().await?;

        Ok(collections::remove_file_from_galleries(&conn, file_key).await?)
    }

    async fn grant(&self, collection: ids::CollectionId, grantee: &str, granted_by: &str) -> error::Result<bool> {
        let conn = self.pool.get().await?;

        Ok(collections::grant(&conn, collection, grantee, granted_by).await?)
    }

    async fn revoke(&self, collection: ids::CollectionId, grantee: &str) -> error::Result<bool> {
        let conn = self.pool.get().await?;

        Ok(collections::revoke(&conn, collection, grantee).await?)
    }

    async fn has_grant(&self, collection: ids::CollectionId, user: &str) -> error::Result<bool> {
        let conn = self.pool.get().await?;

        Ok(collections::has_grant(&conn, collection, user).await?)
    }

    async fn tag_file(&self, node: ids::NodeId, owner: &str, name: &str) -> error::Result<bool> {
        let mut conn = self.pool.get().await?;
        let transaction = conn.transaction().await?;

        let changed = tags::tag_file(&transaction, node, owner, name).await?;

        transaction.commit().await?;

        Ok(changed)
    }

    async fn untag_file(&self, node: ids::NodeId, owner: &str, name: &str) -> error::Result<bool> {
        let mut conn = self.pool.get().await?;
        let transaction = conn.transaction().await?;

        let removed = tags::untag_file(&transaction, node, owner, name).await?;

        transaction.commit().await?;

        Ok(removed)
    }

    async fn tag_usage(&self, owner: &str, name: &str) -> error::Result<TagUsage> {
        let conn = self.pool.get().await?;

        Ok(tags::usage(&conn, owner, name).await?)
    }

    async fn tags_for_file(&self, node: ids::NodeId, owner: &str) -> error::Result<Vec<String>> {
        let conn = self.pool.get().await?;

        Ok(tags::for_file(&conn, node, owner).await?)
    }

    async fn insert_versioned(
        &self,
        id: &str,
        file_key: &str,
        owner: &str,
        at: DateTime<Utc>
    ) -> error::Result<VersionedFile> {
        let mut conn = self.pool.get().await?;
        let transaction = conn.transaction().await?;

        let versioned = versioned::insert(&transaction, id, file_key, owner, &at)
            .await
            .map_err(|e| conflict_or(e, "versioned file already exists"))?;

        transaction.commit().await?;

        Ok(versioned)
    }

    async fn versioned(&self, id: &str) -> error::Result<Option<VersionedFile>> {
        let conn = self.pool.get().await?;

        Ok(versioned::by_id(&conn, id).await?)
    }

    async fn rebind_versioned(
        &self,
        id: &str,
        file_key: &str,
        by: &str,
        at: DateTime<Utc>
    ) -> error::Result<()> {
        let mut conn = self.pool.get().await?;
        let transaction = conn.transaction().await?;

        if !versioned::rebind(&transaction, id, file_key, by, &at).await? {
            return Err(error::Error::not_found(format!("versioned file \"{id}\" was not found")));
        }

        transaction.commit().await?;

        Ok(())
    }

    async fn mark_versioned_deleted(&self, id: &str, at: DateTime<Utc>) -> error::Result<bool> {
        let mut conn = self.pool.get().await?;
        let transaction = conn.transaction().await?;

        let Some(marked) = versioned::mark_deleted(&transaction, id, &at).await? else {
            return Err(error::Error::not_found(format!("versioned file \"{id}\" was not found")));
        };

        transaction.commit().await?;

        Ok(marked)
    }

    async fn versioned_history(&self, id: &str) -> error::Result<Vec<HistoryEntry>> {
        let conn = self.pool.get().await?;

        Ok(versioned::history(&conn, id).await?)
    }
}
