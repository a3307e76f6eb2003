//! end to end behaviour across the stores, reconcilers and sagas

use canopy_api::messages::{columns, ChangeNotification, ChangeType, ColumnChange, CompressionResult};
use canopy_api::ErrorKind;
use canopy_lib::collections::CollectionKind;
use canopy_lib::query::{Limit, PageRequest};
use serde_json::json;

use crate::bus::Message;
use crate::collection;
use crate::hierarchy::{self, ListRequest};
use crate::jobs::sweep;
use crate::tags;
use crate::test_support::{Env, OWNER, OTHER};
use crate::versioned;

async fn sweep_and_settle(env: &Env) {
    sweep::signal_all(&env.state, 100).await.expect("sweep failed");

    env.drain().await;
}

fn node_update(key: &str, column: &str, before: serde_json::Value, after: serde_json::Value) -> ChangeNotification {
    ChangeNotification {
        table: "nodes".into(),
        change_type: ChangeType::Update,
        columns: [
            (columns::KEY.to_owned(), ColumnChange { before: json!(key), after: json!(key) }),
            (column.to_owned(), ColumnChange { before, after }),
        ].into_iter().collect(),
    }
}

#[tokio::test]
async fn sweep_restores_sizes() {
    let env = Env::new();
    let photos = env.dir("Photos", None).await;
    let file = env.file("a.png", Some(&photos.key), 100).await;

    sweep_and_settle(&env).await;

    assert_eq!(env.node(&photos.key).await.size, 100);

    hierarchy::move_node(&env.state, &file.key, Some(""), OWNER).await.expect("failed to move");

    sweep_and_settle(&env).await;

    assert_eq!(env.node(&photos.key).await.size, 0);

    hierarchy::delete_node(&env.state, &file.key, OWNER).await.expect("failed to delete");

    let listing = hierarchy::list_children(&env.state, ListRequest {
        requester: OWNER.into(),
        parent: Some(photos.key.clone()),
        ..Default::default()
    }).await.expect("failed to list");

    assert!(listing.items.is_empty());
}

#[tokio::test]
async fn nested_sizes_converge() {
    let env = Env::new();
    let a = env.dir("a", None).await;
    let b = env.dir("b", Some(&a.key)).await;
    let c = env.dir("c", Some(&b.key)).await;
    let other = env.dir("other", None).await;
    let file = env.file("f.bin", Some(&c.key), 7).await;

    env.drain().await;

    assert_eq!(env.node(&a.key).await.size, 7);

    hierarchy::move_node(&env.state, &file.key, Some(&other.key), OWNER).await.expect("failed to move");

    env.drain().await;

    for dir in [&a, &b, &c] {
        assert_eq!(env.node(&dir.key).await.size, 0, "{} not recomputed", dir.name);
    }

    assert_eq!(env.node(&other.key).await.size, 7);
}

#[tokio::test]
async fn repeated_move_is_noop() {
    let env = Env::new();
    let a = env.dir("A", None).await;
    let b = env.dir("B", None).await;
    let file = env.file("f.txt", Some(&a.key), 5).await;

    hierarchy::move_node(&env.state, &file.key, Some(&b.key), OWNER).await.expect("failed to move");
    env.drain().await;

    let before = env.node(&b.key).await;

    hierarchy::move_node(&env.state, &file.key, Some(&b.key), OWNER).await.expect("repeat move failed");

    assert!(env.queue.pending().is_empty());
    assert_eq!(env.node(&b.key).await, before);
}

#[tokio::test]
async fn directory_delete_requires_empty() {
    let env = Env::new();
    let (dir, file) = env.dir_with_file("d", "f.txt", 1).await;

    let err = hierarchy::delete_node(&env.state, &dir.key, OWNER).await.unwrap_err();

    assert_eq!(err.error_kind(), ErrorKind::InvalidState);

    hierarchy::delete_node(&env.state, &file.key, OWNER).await.expect("failed to delete file");
    hierarchy::delete_node(&env.state, &dir.key, OWNER).await.expect("failed to delete dir");
    hierarchy::delete_node(&env.state, &dir.key, OWNER).await.expect("repeat delete failed");
}

#[tokio::test]
async fn tag_round_trip_leaves_nothing() {
    let env = Env::new();
    let file = env.file("f.txt", None, 1).await;

    tags::tag_file(&env.state, &file.key, "later", OWNER).await.expect("failed to tag");
    tags::untag_file(&env.state, &file.key, "later", OWNER).await.expect("failed to untag");

    let usage = tags::tag_usage(&env.state, OWNER, "later").await.expect("usage failed");

    assert!(!usage.exists);
    assert_eq!(usage.files, 0);
}

#[tokio::test]
async fn collection_names_per_owner() {
    let env = Env::new();

    collection::create_collection(&env.state, CollectionKind::Folder, "Trip", OWNER)
        .await
        .expect("failed to create");

    let dup = collection::create_collection(&env.state, CollectionKind::Folder, "Trip", OWNER).await;

    assert_eq!(dup.unwrap_err().error_kind(), ErrorKind::Conflict);

    collection::create_collection(&env.state, CollectionKind::Folder, "Trip", OTHER)
        .await
        .expect("other owner failed");
}

#[tokio::test]
async fn add_files_ignores_duplicates() {
    let env = Env::new();
    let k1 = env.file("k1.txt", None, 1).await;
    let k2 = env.file("k2.txt", None, 1).await;

    let mut listings = Vec::new();

    for files in [
        vec![k1.key.clone(), k1.key.clone(), k2.key.clone()],
        vec![k1.key.clone(), k2.key.clone()],
    ] {
        let folder = collection::create_collection(
            &env.state,
            CollectionKind::Folder,
            &format!("c{}", listings.len()),
            OWNER
        ).await.expect("failed to create");

        collection::add_files(&env.state, &folder.key, files, OWNER).await.expect("failed to add");
        env.drain().await;

        let members = collection::collection_members(&env.state, &folder.key, OWNER, PageRequest::first(Limit::Small))
            .await
            .expect("failed to list");

        listings.push(members.items);
    }

    assert_eq!(listings[0], listings[1]);
    assert_eq!(listings[0].len(), 2);
}

#[tokio::test]
async fn versioned_round_trip() {
    let env = Env::new();
    let fk = env.file("v1.txt", None, 1).await;
    let new_fk = env.file("v2.txt", None, 1).await;

    let file = versioned::create(&env.state, &fk.key, OWNER).await.expect("failed to create");

    versioned::update(&env.state, &file.id, &new_fk.key, OWNER).await.expect("failed to update");

    let history = versioned::history(&env.state, &file.id, OWNER).await.expect("history failed");
    let bound: Vec<_> = history.iter().map(|h| h.file_key.clone()).collect();

    assert_eq!(bound, vec![fk.key.clone(), new_fk.key.clone()]);

    versioned::delete(&env.state, &file.id, OWNER).await.expect("failed to delete");

    assert!(env.node(&fk.key).await.deleted);
    assert!(env.node(&new_fk.key).await.deleted);
    assert_eq!(env.state.store().versioned_history(&file.id).await.expect("history failed").len(), 2);
}

#[tokio::test]
async fn directory_gallery_keyed_by_directory() {
    let env = Env::new();

    let first = collection::ensure_directory_gallery(&env.state, "DIRX", "Trip", OWNER)
        .await
        .expect("failed to create");
    let second = collection::ensure_directory_gallery(&env.state, "DIRX", "Trip", OWNER)
        .await
        .expect("failed to create again");

    assert_eq!(first.key, second.key);
}

#[tokio::test]
async fn grant_then_revoke() {
    let env = Env::new();
    let file = env.file("f.txt", None, 1).await;
    let shared = collection::create_collection(&env.state, CollectionKind::Folder, "C", OWNER)
        .await
        .expect("failed to create");

    collection::add_files(&env.state, &shared.key, vec![file.key.clone()], OWNER).await.expect("failed to add");
    env.drain().await;

    collection::grant_access(&env.state, &shared.key, OTHER, OWNER).await.expect("failed to grant");

    let members = collection::collection_members(&env.state, &shared.key, OTHER, PageRequest::default())
        .await
        .expect("grantee failed to list");

    assert_eq!(members.items.len(), 1);

    collection::revoke_access(&env.state, &shared.key, OTHER, OWNER).await.expect("failed to revoke");

    assert!(!collection::has_access(&env.state, OTHER, &shared.key).await.expect("check failed"));

    let denied = collection::collection_members(&env.state, &shared.key, OTHER, PageRequest::default()).await;

    assert_eq!(denied.unwrap_err().error_kind(), ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn thumbnail_to_gallery_and_back() {
    let env = Env::new();
    let (dir, file) = env.dir_with_file("Trip", "beach.png", 10).await;

    env.drain().await;

    // capture reports the insert, the compression service replies
    crate::reconcile::change::handle(&env.state, &ChangeNotification {
        table: "nodes".into(),
        change_type: ChangeType::Insert,
        columns: [
            (columns::KEY.to_owned(), ColumnChange { before: json!(null), after: json!(file.key) }),
        ].into_iter().collect(),
    }).await.expect("insert change failed");

    env.drain().await;

    assert_eq!(env.relay.sent().len(), 1);

    crate::bus::handle(&env.state, &Message::CompressionResult(CompressionResult {
        identifier: file.key.clone(),
        produced_external_content_id: "thumb-beach".into(),
    })).await.expect("attach failed");

    crate::reconcile::change::handle(
        &env.state,
        &node_update(&file.key, columns::THUMBNAIL, json!(""), json!("thumb-beach"))
    ).await.expect("thumbnail change failed");

    env.drain().await;

    let gallery = env.state.store().directory_gallery(&dir.key)
        .await
        .expect("lookup failed")
        .expect("gallery was not created");

    assert_eq!(gallery.name, "Trip");

    let members = collection::collection_members(&env.state, &gallery.key, OWNER, PageRequest::default())
        .await
        .expect("failed to list gallery");

    assert_eq!(members.items.len(), 1);

    hierarchy::delete_node(&env.state, &file.key, OWNER).await.expect("failed to delete");

    crate::reconcile::change::handle(
        &env.state,
        &node_update(&file.key, columns::DELETED, json!(false), json!(true))
    ).await.expect("delete change failed");

    env.drain().await;

    assert_eq!(
        env.state.store().remove_file_from_galleries(&file.key).await.expect("cleanup failed"),
        0
    );
}
