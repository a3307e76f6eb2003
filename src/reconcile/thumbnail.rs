use canopy_api::messages::{CompressionRequest, CompressionResult};

use crate::bus::Message;
use crate::error;
use crate::hierarchy;
use crate::lock;
use crate::state::Shared;

/// asks the compression service for a thumbnail of a newly inserted image
pub async fn request(state: &Shared, key: &str) -> error::Result<()> {
    let Some(node) = state.store().node(key).await? else {
        tracing::debug!("inserted node \"{key}\" is gone");

        return Ok(());
    };

    if node.deleted || !node.kind.is_file() || node.has_thumbnail() {
        return Ok(());
    }

    if !hierarchy::is_image_by_name(&node.name) {
        return Ok(());
    }

    let Some(content) = node.content.filter(|c| !c.is_empty()) else {
        tracing::debug!("image \"{key}\" has no content yet");

        return Ok(());
    };

    state.publish(Message::CompressionRequest(CompressionRequest {
        identifier: node.key,
        external_content_id: content,
        reply_topic: state.topics().compression_reply.clone(),
    }))
}

/// a thumbnail produced for a file that was deleted in the meantime is
/// removed from the object store instead of being attached
pub async fn attach(state: &Shared, result: &CompressionResult) -> error::Result<()> {
    let key = result.identifier.as_str();
    let thumbnail = result.produced_external_content_id.as_str();

    let mut guard = state.locks().acquire(lock::file(key)).await?;
    let attached = attach_locked(state, key, thumbnail).await;

    guard.release().await;

    match attached? {
        Attached::Set => tracing::debug!("attached thumbnail to \"{key}\""),
        Attached::Unchanged => tracing::debug!("thumbnail for \"{key}\" unchanged"),
        Attached::Missing => tracing::debug!("file \"{key}\" is gone. dropping thumbnail"),
        Attached::Deleted => {
            tracing::debug!("file \"{key}\" was deleted. removing thumbnail \"{thumbnail}\"");

            state.objects().delete(thumbnail).await?;
        }
    }

    Ok(())
}

enum Attached {
    Set,
    Unchanged,
    Missing,
    Deleted,
}

async fn attach_locked(state: &Shared, key: &str, thumbnail: &str) -> error::Result<Attached> {
    let Some(node) = state.store().node(key).await? else {
        return Ok(Attached::Missing);
    };

    if node.deleted {
        return Ok(Attached::Deleted);
    }

    if state.store().set_thumbnail(key, thumbnail).await? {
        Ok(Attached::Set)
    } else {
        Ok(Attached::Unchanged)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::test_support::Env;

    #[tokio::test]
    async fn requests_for_images_only() {
        let env = Env::new();
        let image = env.file("a.PNG", None, 3).await;
        let text = env.file("a.txt", None, 3).await;
        let dir = env.dir("b.png", None).await;

        for key in [&image.key, &text.key, &dir.key] {
            request(&env.state, key).await.expect("request failed");
        }

        request(&env.state, "missing").await.expect("missing node should be skipped");

        assert_eq!(env.queue.pending(), vec![Message::CompressionRequest(CompressionRequest {
            identifier: image.key.clone(),
            external_content_id: format!("content-{}", image.name),
            reply_topic: env.state.topics().compression_reply.clone(),
        })]);

        env.queue.clear();

        attach(&env.state, &CompressionResult {
            identifier: image.key.clone(),
            produced_external_content_id: "thumb-a".into(),
        }).await.expect("attach failed");

        request(&env.state, &image.key).await.expect("request failed");

        assert!(env.queue.pending().is_empty());
    }

    #[tokio::test]
    async fn attach_to_missing_is_dropped() {
        let env = Env::new();

        attach(&env.state, &CompressionResult {
            identifier: "missing".into(),
            produced_external_content_id: "thumb".into(),
        }).await.expect("attach to a missing file should succeed");
    }

    #[tokio::test]
    async fn attach_after_delete_removes_thumbnail() {
        let env = Env::new();
        let (_dir, image) = env.dir_with_file("Trip", "a.png", 1).await;

        crate::hierarchy::delete_node(&env.state, &image.key, crate::test_support::OWNER)
            .await
            .expect("failed to delete");

        attach(&env.state, &CompressionResult {
            identifier: image.key.clone(),
            produced_external_content_id: "thumb-late".into(),
        }).await.expect("late attach failed");

        let node = env.node(&image.key).await;

        assert!(node.deleted);
        assert_eq!(node.thumbnail, None);
        assert!(env.objects.deleted().contains(&String::from("thumb-late")));
    }
}
