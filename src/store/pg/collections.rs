use canopy_lib::collections::CollectionKind;
use canopy_lib::ids;
use chrono::{DateTime, Utc};
use deadpool_postgres::GenericClient;
use tokio_postgres::{Error as PgError, Row};

use crate::store::{AccessRole, Collection, NewCollection};

pub const COLUMNS: &str = "\
    collections.id, \
    collections.key, \
    collections.kind, \
    collections.name, \
    collections.owner, \
    collections.directory, \
    collections.deleted, \
    collections.created, \
    collections.updated, \
    collections.deleted_at";

pub fn from_row(row: &Row) -> Collection {
    Collection {
        id: row.get(0),
        key: row.get(1),
        kind: row.get(2),
        name: row.get(3),
        owner: row.get(4),
        directory: row.get(5),
        deleted: row.get(6),
        created: row.get(7),
        updated: row.get(8),
        deleted_at: row.get(9),
    }
}

pub async fn by_key(conn: &impl GenericClient, key: &str) -> Result<Option<Collection>, PgError> {
    let query = format!("select {COLUMNS} from collections where collections.key = $1");

    Ok(conn.query_opt(query.as_str(), &[&key])
        .await?
        .map(|row| from_row(&row)))
}

pub async fn active_named(
    conn: &impl GenericClient,
    kind: CollectionKind,
    owner: &str,
    name: &str,
) -> Result<Option<Collection>, PgError> {
    let query = format!(
        "\
        select {COLUMNS} \
        from collections \
        where collections.kind = $1 and \
              collections.owner = $2 and \
              collections.name = $3 and \
              collections.directory is null and \
              collections.deleted = false"
    );

    Ok(conn.query_opt(query.as_str(), &[&kind, &owner, &name])
        .await?
        .map(|row| from_row(&row)))
}

pub async fn directory_gallery(conn: &impl GenericClient, dir_key: &str) -> Result<Option<Collection>, PgError> {
    let query = format!(
        "\
        select {COLUMNS} \
        from collections \
        where collections.directory = $1 and \
              collections.deleted = false"
    );

    Ok(conn.query_opt(query.as_str(), &[&dir_key])
        .await?
        .map(|row| from_row(&row)))
}

pub async fn insert(conn: &impl GenericClient, new: &NewCollection) -> Result<Collection, PgError> {
    let query = format!(
        "\
        insert into collections (\
            key, \
            kind, \
            name, \
            owner, \
            directory, \
            created\
        ) values ($1, $2, $3, $4, $5, $6) \
        returning {COLUMNS}"
    );

    let row = conn.query_one(query.as_str(), &[
        &new.key,
        &new.kind,
        &new.name,
        &new.owner,
        &new.directory,
        &new.created,
    ]).await?;

    let collection = from_row(&row);

    conn.execute(
        "\
        insert into collection_access (\
            collection_id, \
            user_id, \
            role, \
            granted_by, \
            created\
        ) values ($1, $2, $3, $2, $4)",
        &[&collection.id, &collection.owner, &AccessRole::Owner.as_i16(), &new.created]
    ).await?;

    Ok(collection)
}

pub async fn remove(conn: &impl GenericClient, key: &str, at: &DateTime<Utc>) -> Result<bool, PgError> {
    let Some(row) = conn.query_opt(
        "\
        update collections \
        set deleted = true, \
            deleted_at = $2, \
            updated = $2 \
        where key = $1 and deleted = false \
        returning id",
        &[&key, at]
    ).await? else {
        return Ok(false);
    };

    let id: ids::CollectionId = row.get(0);

    conn.execute(
        "update collection_members set deleted = true where collection_id = $1",
        &[&id]
    ).await?;

    conn.execute(
        "update collection_access set deleted = true where collection_id = $1",
        &[&id]
    ).await?;

    Ok(true)
}

pub async fn insert_members(
    conn: &impl GenericClient,
    collection: ids::CollectionId,
    keys: &[ids::NodeKey],
) -> Result<u64, PgError> {
    let added = Utc::now();

    conn.execute(
        "\
        insert into collection_members (collection_id, node_key, deleted, added) \
        select $1, unnest($2::text[]), false, $3 \
        on conflict (collection_id, node_key) do update \
            set deleted = false, \
                added = excluded.added \
            where collection_members.deleted = true",
        &[&collection, &keys, &added]
    ).await
}

pub async fn remove_members(
    conn: &impl GenericClient,
    collection: ids::CollectionId,
    keys: &[ids::NodeKey],
) -> Result<u64, PgError> {
    conn.execute(
        "\
        update collection_members \
        set deleted = true \
        where collection_id = $1 and \
              node_key = any($2) and \
              deleted = false",
        &[&collection, &keys]
    ).await
}

pub async fn remove_file_from_galleries(conn: &impl GenericClient, file_key: &str) -> Result<u64, PgError> {
    conn.execute(
        "\
        update collection_members \
        set deleted = true \
        from collections \
        where collections.id = collection_members.collection_id and \
              collections.kind = $2 and \
              collections.deleted = false and \
              collection_members.node_key = $1 and \
              collection_members.deleted = false",
        &[&file_key, &CollectionKind::Gallery]
    ).await
}

pub async fn grant(
    conn: &impl GenericClient,
    collection: ids::CollectionId,
    grantee: &str,
    granted_by: &str,
) -> Result<bool, PgError> {
    let created = Utc::now();

    let count = conn.execute(
        "\
        insert into collection_access (\
            collection_id, \
            user_id, \
            role, \
            granted_by, \
            created\
        ) values ($1, $2, $3, $4, $5) \
        on conflict (collection_id, user_id) do update \
            set deleted = false, \
                granted_by = excluded.granted_by \
            where collection_access.deleted = true and \
                  collection_access.role = excluded.role",
        &[&collection, &grantee, &AccessRole::Grantee.as_i16(), &granted_by, &created]
    ).await?;

    Ok(count > 0)
}

pub async fn revoke(conn: &impl GenericClient, collection: ids::CollectionId, grantee: &str) -> Result<bool, PgError> {
    let count = conn.execute(
        "\
        update collection_access \
        set deleted = true \
        where collection_id = $1 and \
              user_id = $2 and \
              role = $3 and \
              deleted = false",
        &[&collection, &grantee, &AccessRole::Grantee.as_i16()]
    ).await?;

    Ok(count > 0)
}

pub async fn has_grant(conn: &impl GenericClient, collection: ids::CollectionId, user: &str) -> Result<bool, PgError> {
    let row = conn.query_one(
        "\
        select exists(\
            select 1 \
            from collection_access \
            where collection_id = $1 and \
                  user_id = $2 and \
                  role = $3 and \
                  deleted = false\
        )",
        &[&collection, &user, &AccessRole::Grantee.as_i16()]
    ).await?;

    Ok(row.get(0))
}
