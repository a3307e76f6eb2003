use canopy_api::records::HistoryEntry;
use chrono::{DateTime, Utc};
use deadpool_postgres::GenericClient;
use futures::TryStreamExt;
use tokio_postgres::{Error as PgError, Row};

use crate::sql;
use crate::store::VersionedFile;

use super::nodes;

fn from_row(row: &Row) -> VersionedFile {
    VersionedFile {
        id: row.get(0),
        file_key: row.get(1),
        owner: row.get(2),
        deleted: row.get(3),
        created: row.get(4),
        deleted_at: row.get(5),
    }
}

pub async fn by_id(conn: &impl GenericClient, id: &str) -> Result<Option<VersionedFile>, PgError> {
    Ok(conn.query_opt(
        "\
        select id, file_key, owner, deleted, created, deleted_at \
        from versioned_files \
        where id = $1",
        &[&id]
    ).await?.map(|row| from_row(&row)))
}

async fn append_log(
    conn: &impl GenericClient,
    id: &str,
    file_key: &str,
    by: &str,
    at: &DateTime<Utc>,
) -> Result<(), PgError> {
    conn.execute(
        "\
        insert into versioned_file_log (versioned_id, file_key, bound_by, bound_at) \
        values ($1, $2, $3, $4)",
        &[&id, &file_key, &by, at]
    ).await?;

    Ok(())
}

pub async fn insert(
    conn: &impl GenericClient,
    id: &str,
    file_key: &str,
    owner: &str,
    at: &DateTime<Utc>,
) -> Result<VersionedFile, PgError> {
    let row = conn.query_one(
        "\
        insert into versioned_files (id, file_key, owner, created) \
        values ($1, $2, $3, $4) \
        returning id, file_key, owner, deleted, created, deleted_at",
        &[&id, &file_key, &owner, at]
    ).await?;

    append_log(conn, id, file_key, owner, at).await?;
    nodes::set_hidden(conn, file_key, at).await?;

    Ok(from_row(&row))
}

pub async fn rebind(
    conn: &impl GenericClient,
    id: &str,
    file_key: &str,
    by: &str,
    at: &DateTime<Utc>,
) -> Result<bool, PgError> {
    let count = conn.execute(
        "update versioned_files set file_key = $2 where id = $1",
        &[&id, &file_key]
    ).await?;

    if count == 0 {
        return Ok(false);
    }

    append_log(conn, id, file_key, by, at).await?;
    nodes::set_hidden(conn, file_key, at).await?;

    Ok(true)
}

/// None when the row does not exist
pub async fn mark_deleted(conn: &impl GenericClient, id: &str, at: &DateTime<Utc>) -> Result<Option<bool>, PgError> {
    let Some(row) = conn.query_opt(
        "select deleted from versioned_files where id = $1 for update",
        &[&id]
    ).await? else {
        return Ok(None);
    };

    if row.get::<usize, bool>(0) {
        return Ok(Some(false));
    }

    conn.execute(
        "update versioned_files set deleted = true, deleted_at = $2 where id = $1",
        &[&id, at]
    ).await?;

    Ok(Some(true))
}

pub async fn history(conn: &impl GenericClient, id: &str) -> Result<Vec<HistoryEntry>, PgError> {
    let params: sql::ParamsVec = vec![&id];

    let stream = conn.query_raw(
        "\
        select file_key, bound_by, bound_at \
        from versioned_file_log \
        where versioned_id = $1 \
        order by id",
        params
    ).await?;

    futures::pin_mut!(stream);

    let mut rtn = Vec::new();

    while let Some(row) = stream.try_next().await? {
        rtn.push(HistoryEntry {
            file_key: row.get(0),
            bound_by: row.get(1),
            bound_at: row.get(2),
        });
    }

    Ok(rtn)
}
