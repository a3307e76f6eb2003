use canopy_lib::ids;
use chrono::Utc;
use deadpool_postgres::GenericClient;
use futures::TryStreamExt;
use tokio_postgres::Error as PgError;

use crate::sql;
use crate::store::TagUsage;

async fn find_tag(conn: &impl GenericClient, owner: &str, name: &str) -> Result<Option<ids::TagId>, PgError> {
    let row = conn.query_opt(
        "select id from tags where owner = $1 and name = $2 for update",
        &[&owner, &name]
    ).await?;

    Ok(row.map(|r| r.get(0)))
}

pub async fn tag_file(
    conn: &impl GenericClient,
    node: ids::NodeId,
    owner: &str,
    name: &str,
) -> Result<bool, PgError> {
    let created = Utc::now();

    let row = conn.query_one(
        "\
        insert into tags (owner, name) values ($1, $2) \
        on conflict (owner, name) do update \
            set name = excluded.name \
        returning id",
        &[&owner, &name]
    ).await?;

    let tag_id: ids::TagId = row.get(0);

    let count = conn.execute(
        "\
        insert into file_tags (node_id, tag_id, deleted, created) \
        values ($1, $2, false, $3) \
        on conflict (node_id, tag_id) do update \
            set deleted = false \
            where file_tags.deleted = true",
        &[&node, &tag_id, &created]
    ).await?;

    Ok(count > 0)
}

pub async fn untag_file(
    conn: &impl GenericClient,
    node: ids::NodeId,
    owner: &str,
    name: &str,
) -> Result<bool, PgError> {
    let Some(tag_id) = find_tag(conn, owner, name).await? else {
        return Ok(false);
    };

    let removed = conn.execute(
        "delete from file_tags where node_id = $1 and tag_id = $2 and deleted = false",
        &[&node, &tag_id]
    ).await?;

    let in_use = conn.query_one(
        "select exists(select 1 from file_tags where tag_id = $1 and deleted = false)",
        &[&tag_id]
    ).await?;

    if !in_use.get::<usize, bool>(0) {
        conn.execute("delete from file_tags where tag_id = $1", &[&tag_id]).await?;
        conn.execute("delete from tags where id = $1", &[&tag_id]).await?;

        tracing::debug!("removed orphaned tag {tag_id}");
    }

    Ok(removed > 0)
}

pub async fn usage(conn: &impl GenericClient, owner: &str, name: &str) -> Result<TagUsage, PgError> {
    let row = conn.query_opt(
        "\
        select count(file_tags.node_id) \
        from tags \
        left join file_tags on \
            file_tags.tag_id = tags.id and \
            file_tags.deleted = false \
        where tags.owner = $1 and tags.name = $2 \
        group by tags.id",
        &[&owner, &name]
    ).await?;

    Ok(match row {
        Some(row) => TagUsage {
            exists: true,
            files: row.get(0),
        },
        None => TagUsage::default(),
    })
}

pub async fn for_file(conn: &impl GenericClient, node: ids::NodeId, owner: &str) -> Result<Vec<String>, PgError> {
    let params: sql::ParamsVec = vec![&node, &owner];

    let stream = conn.query_raw(
        "\
        select tags.name \
        from tags \
        join file_tags on \
            file_tags.tag_id = tags.id and \
            file_tags.deleted = false \
        where file_tags.node_id = $1 and tags.owner = $2 \
        order by tags.name",
        params
    ).await?;

    futures::pin_mut!(stream);

    let mut rtn = Vec::new();

    while let Some(row) = stream.try_next().await? {
        rtn.push(row.get(0));
    }

    Ok(rtn)
}
