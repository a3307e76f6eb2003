use canopy_lib::fs::NodeKind;
use canopy_lib::ids;
use canopy_lib::query::PageRequest;
use chrono::{DateTime, Utc};
use deadpool_postgres::GenericClient;
use futures::TryStreamExt;
use tokio_postgres::{Error as PgError, Row};

use crate::sql;
use crate::store::{FileNode, ListFilter, ListScope, NewNode, SizeChange};

pub const COLUMNS: &str = "\
    nodes.id, \
    nodes.key, \
    nodes.name, \
    nodes.kind, \
    nodes.size, \
    nodes.owner, \
    nodes.parent, \
    nodes.content, \
    nodes.thumbnail, \
    nodes.sensitive, \
    nodes.deleted, \
    nodes.purged, \
    nodes.hidden, \
    nodes.created, \
    nodes.updated, \
    nodes.deleted_at";

pub fn from_row(row: &Row) -> FileNode {
    FileNode {
        id: row.get(0),
        key: row.get(1),
        name: row.get(2),
        kind: row.get(3),
        size: row.get(4),
        owner: row.get(5),
        parent: row.get(6),
        content: row.get(7),
        thumbnail: row.get(8),
        sensitive: row.get(9),
        deleted: row.get(10),
        purged: row.get(11),
        hidden: row.get(12),
        created: row.get(13),
        updated: row.get(14),
        deleted_at: row.get(15),
    }
}

pub async fn by_key(conn: &impl GenericClient, key: &str) -> Result<Option<FileNode>, PgError> {
    let query = format!("select {COLUMNS} from nodes where nodes.key = $1");

    Ok(conn.query_opt(query.as_str(), &[&key])
        .await?
        .map(|row| from_row(&row)))
}

pub async fn insert(
    conn: &impl GenericClient,
    parent: Option<&str>,
    new: &NewNode,
) -> Result<FileNode, PgError> {
    let query = format!(
        "\
        insert into nodes (\
            key, \
            name, \
            kind, \
            size, \
            owner, \
            parent, \
            content, \
            sensitive, \
            created\
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
        returning {COLUMNS}"
    );

    let row = conn.query_one(query.as_str(), &[
        &new.key,
        &new.name,
        &new.kind,
        &new.size,
        &new.owner,
        &parent,
        &new.content,
        &new.sensitive,
        &new.created,
    ]).await?;

    Ok(from_row(&row))
}

pub async fn add_size(conn: &impl GenericClient, key: &str, amount: i64) -> Result<u64, PgError> {
    let updated = Utc::now();

    conn.execute(
        "update nodes set size = size + $2, updated = $3 where key = $1",
        &[&key, &amount, &updated]
    ).await
}

/// returns the size of the moved node
pub async fn set_parent(
    conn: &impl GenericClient,
    key: &str,
    to: Option<&str>,
) -> Result<Option<i64>, PgError> {
    let updated = Utc::now();

    let row = conn.query_opt(
        "\
        update nodes \
        set parent = $2, \
            updated = $3 \
        where key = $1 \
        returning size",
        &[&key, &to, &updated]
    ).await?;

    Ok(row.map(|r| r.get(0)))
}

pub async fn mark_deleted(
    conn: &impl GenericClient,
    key: &str,
    at: &DateTime<Utc>,
    purged: bool,
) -> Result<bool, PgError> {
    let count = conn.execute(
        "\
        update nodes \
        set deleted = true, \
            purged = $3, \
            deleted_at = $2, \
            updated = $2 \
        where key = $1 and deleted = false",
        &[&key, at, &purged]
    ).await?;

    Ok(count > 0)
}

pub async fn set_thumbnail(conn: &impl GenericClient, key: &str, thumbnail: &str) -> Result<bool, PgError> {
    let updated = Utc::now();

    let count = conn.execute(
        "\
        update nodes \
        set thumbnail = $2, \
            updated = $3 \
        where key = $1 \
            and deleted = false \
            and thumbnail is distinct from $2",
        &[&key, &thumbnail, &updated]
    ).await?;

    Ok(count > 0)
}

pub async fn set_hidden(conn: &impl GenericClient, key: &str, at: &DateTime<Utc>) -> Result<u64, PgError> {
    conn.execute(
        "update nodes set hidden = true, updated = $2 where key = $1",
        &[&key, at]
    ).await
}

pub async fn live_child_count(conn: &impl GenericClient, key: &str) -> Result<i64, PgError> {
    let row = conn.query_one(
        "select count(*) from nodes where parent = $1 and deleted = false",
        &[&key]
    ).await?;

    Ok(row.get(0))
}

/// expected to run inside a transaction. the directory row stays locked
/// until commit
pub async fn recompute_size(conn: &impl GenericClient, key: &str) -> Result<Option<SizeChange>, PgError> {
    let Some(row) = conn.query_opt(
        "\
        select size, parent, kind, deleted \
        from nodes \
        where key = $1 \
        for update",
        &[&key]
    ).await? else {
        return Ok(None);
    };

    let kind: NodeKind = row.get(2);
    let deleted: bool = row.get(3);

    if deleted || !kind.is_dir() {
        return Ok(None);
    }

    let total_row = conn.query_one(
        "\
        select coalesce(sum(size), 0)::bigint \
        from nodes \
        where parent = $1 and deleted = false",
        &[&key]
    ).await?;

    let change = SizeChange {
        old: row.get(0),
        new: total_row.get(0),
        parent: row.get(1),
    };

    if change.changed() {
        let updated = Utc::now();

        conn.execute(
            "update nodes set size = $2, updated = $3 where key = $1",
            &[&key, &change.new, &updated]
        ).await?;
    }

    Ok(Some(change))
}

pub async fn directories_after(
    conn: &impl GenericClient,
    after: ids::NodeId,
    limit: i64,
) -> Result<Vec<(ids::NodeId, ids::NodeKey)>, PgError> {
    let params: sql::ParamsVec = vec![&after, &NodeKind::Directory, &limit];

    let stream = conn.query_raw(
        "\
        select id, key \
        from nodes \
        where id > $1 and kind = $2 and deleted = false \
        order by id \
        limit $3",
        params
    ).await?;

    futures::pin_mut!(stream);

    let mut rtn = Vec::new();

    while let Some(row) = stream.try_next().await? {
        rtn.push((row.get(0), row.get(1)));
    }

    Ok(rtn)
}

pub async fn list(
    conn: &impl GenericClient,
    scope: &ListScope,
    filter: &ListFilter,
    page: &PageRequest,
) -> Result<Vec<FileNode>, PgError> {
    let offset = page.limit.sql_offset(page.offset);
    let mut params: sql::ParamsVec = Vec::new();
    let mut query = format!("select {COLUMNS} from nodes ");

    match scope {
        ListScope::Directory { owner, parent } => {
            let owner_pos = sql::push_param(&mut params, owner);

            query.push_str(&format!("where nodes.owner = ${owner_pos} "));

            if let Some(parent) = parent {
                let parent_pos = sql::push_param(&mut params, parent);

                query.push_str(&format!("and nodes.parent = ${parent_pos} "));
            } else {
                query.push_str("and nodes.parent is null ");
            }
        }
        ListScope::Tag { owner, name } => {
            let owner_pos = sql::push_param(&mut params, owner);
            let name_pos = sql::push_param(&mut params, name);

            query.push_str(&format!(
                "\
                join file_tags on \
                    file_tags.node_id = nodes.id and \
                    file_tags.deleted = false \
                join tags on \
                    tags.id = file_tags.tag_id \
                where tags.owner = ${owner_pos} and \
                      tags.name = ${name_pos} "
            ));
        }
        ListScope::Collection(key) => {
            let key_pos = sql::push_param(&mut params, key);

            query.push_str(&format!(
                "\
                join collection_members on \
                    collection_members.node_key = nodes.key and \
                    collection_members.deleted = false \
                join collections on \
                    collections.id = collection_members.collection_id \
                where collections.key = ${key_pos} "
            ));
        }
    }

    query.push_str("and nodes.deleted = false and nodes.hidden = false ");

    if let Some(kind) = &filter.kind {
        let pos = sql::push_param(&mut params, kind);

        query.push_str(&format!("and nodes.kind = ${pos} "));
    }

    if !filter.include_sensitive {
        query.push_str("and nodes.sensitive = false ");
    }

    if let Some(name) = &filter.name {
        let pos = sql::push_param(&mut params, name);

        query.push_str(&format!("and strpos(nodes.name, ${pos}) > 0 "));
    }

    let limit_pos = sql::push_param(&mut params, &page.limit);
    let offset_pos = sql::push_param(&mut params, &offset);

    query.push_str(&format!("order by nodes.id limit ${limit_pos} offset ${offset_pos}"));

    let stream = conn.query_raw(query.as_str(), params).await?;

    futures::pin_mut!(stream);

    let mut rtn = Vec::new();

    while let Some(row) = stream.try_next().await? {
        rtn.push(from_row(&row));
    }

    Ok(rtn)
}
