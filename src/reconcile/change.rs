use canopy_api::messages::{columns, ChangeNotification, ChangeType};
use canopy_lib::fs::NodeKind;

use crate::error;
use crate::state::Shared;

use super::{gallery, thumbnail};

/// routes a captured row change to the reconcilers interested in it
pub async fn handle(state: &Shared, notify: &ChangeNotification) -> error::Result<()> {
    if !notify.is_nodes() {
        tracing::trace!("ignoring change on \"{}\"", notify.table);

        return Ok(());
    }

    let Some(key) = notify.current_text(columns::KEY) else {
        tracing::warn!("node change without a key column");

        return Ok(());
    };

    if notify.kind() == Some(NodeKind::Directory) {
        return Ok(());
    }

    match notify.change_type {
        ChangeType::Insert => thumbnail::request(state, &key).await,
        ChangeType::Update => {
            if notify.became_non_empty(columns::THUMBNAIL) {
                gallery::request_link(state, &key).await?;
            }

            if notify.flipped_on(columns::DELETED) {
                gallery::notify_deleted(state, &key)?;
            }

            Ok(())
        }
        ChangeType::Delete => gallery::notify_deleted(state, &key),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use canopy_api::messages::{CompressionRequest, FileDeleted};
    use serde_json::json;

    use crate::bus::Message;
    use crate::test_support::Env;

    fn change(value: serde_json::Value) -> ChangeNotification {
        serde_json::from_value(value).expect("invalid change notification")
    }

    #[tokio::test]
    async fn insert_requests_thumbnail() {
        let env = Env::new();
        let file = env.file("a.jpg", None, 1).await;

        handle(&env.state, &change(json!({
            "table": "nodes",
            "changeType": "INSERT",
            "columns": {
                "key": {"after": file.key},
                "kind": {"after": 0}
            }
        }))).await.expect("handle failed");

        assert_eq!(env.queue.pending(), vec![Message::CompressionRequest(CompressionRequest {
            identifier: file.key.clone(),
            external_content_id: "content-a.jpg".into(),
            reply_topic: env.state.topics().compression_reply.clone(),
        })]);
    }

    #[tokio::test]
    async fn delete_flag_notifies() {
        let env = Env::new();

        handle(&env.state, &change(json!({
            "table": "nodes",
            "changeType": "UPDATE",
            "columns": {
                "key": {"before": "k1", "after": "k1"},
                "deleted": {"before": false, "after": true}
            }
        }))).await.expect("handle failed");

        handle(&env.state, &change(json!({
            "table": "collections",
            "changeType": "UPDATE",
            "columns": {
                "key": {"after": "c1"},
                "deleted": {"before": false, "after": true}
            }
        }))).await.expect("handle failed");

        assert_eq!(env.queue.pending(), vec![Message::FileDeleted(FileDeleted {
            file_key: "k1".into(),
        })]);
    }
}
