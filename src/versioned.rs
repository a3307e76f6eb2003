//! stable identities bound over time to a sequence of file nodes. every
//! bound node is hidden from listings and kept until the versioned file is
//! deleted

use std::collections::HashSet;

use canopy_api::records::HistoryEntry;
use canopy_lib::ids;
use chrono::Utc;

use crate::error;
use crate::hierarchy;
use crate::lock;
use crate::state::Shared;
use crate::store::{FileNode, VersionedFile};

async fn valid_target(state: &Shared, file_key: &str, owner: &str) -> error::Result<FileNode> {
    let Some(node) = state.store().node(file_key).await? else {
        return Err(error::Error::not_found(format!("file \"{file_key}\" was not found")));
    };

    if node.deleted || node.hidden || !node.kind.is_file() {
        return Err(error::Error::invalid_state(format!(
            "\"{file_key}\" is not a live, visible file"
        )));
    }

    if node.owner != owner {
        return Err(error::Error::permission_denied(format!(
            "file \"{file_key}\" is not owned by the requester"
        )));
    }

    Ok(node)
}

async fn owned(state: &Shared, id: &str, requester: &str) -> error::Result<VersionedFile> {
    let Some(found) = state.store().versioned(id).await? else {
        return Err(error::Error::not_found(format!("versioned file \"{id}\" was not found")));
    };

    if found.owner != requester {
        return Err(error::Error::permission_denied(format!(
            "versioned file \"{id}\" is not owned by the requester"
        )));
    }

    Ok(found)
}

pub async fn create(state: &Shared, file_key: &str, owner: &str) -> error::Result<VersionedFile> {
    let mut guard = state.locks().acquire(lock::file(file_key)).await?;
    let result = async {
        let node = valid_target(state, file_key, owner).await?;

        state.store().insert_versioned(&ids::create_key(), &node.key, owner, Utc::now()).await
    }.await;

    guard.release().await;

    let created = result?;

    tracing::debug!("created versioned file \"{}\" bound to \"{file_key}\"", created.id);

    Ok(created)
}

pub async fn update(state: &Shared, id: &str, file_key: &str, requester: &str) -> error::Result<()> {
    let mut guard = state.locks().acquire(lock::versioned_file(id)).await?;
    let result = update_locked(state, id, file_key, requester).await;

    guard.release().await;

    result
}

async fn update_locked(state: &Shared, id: &str, file_key: &str, requester: &str) -> error::Result<()> {
    let current = owned(state, id, requester).await?;

    if current.deleted {
        return Err(error::Error::not_found(format!("versioned file \"{id}\" was not found")));
    }

    if current.file_key == file_key {
        return Ok(());
    }

    let node = valid_target(state, file_key, requester).await?;

    state.store().rebind_versioned(id, &node.key, requester, Utc::now()).await?;

    tracing::debug!("rebound versioned file \"{id}\" to \"{file_key}\"");

    Ok(())
}

/// marks the versioned file deleted then deletes every node it was ever
/// bound to. repeating a partially failed delete picks up where it stopped
pub async fn delete(state: &Shared, id: &str, requester: &str) -> error::Result<()> {
    let mut guard = state.locks().acquire(lock::versioned_file(id)).await?;
    let result = delete_locked(state, id, requester).await;

    guard.release().await;

    result
}

async fn delete_locked(state: &Shared, id: &str, requester: &str) -> error::Result<()> {
    let found = owned(state, id, requester).await?;

    if !state.store().mark_versioned_deleted(id, Utc::now()).await? {
        tracing::debug!("versioned file \"{id}\" already deleted, resuming");
    }

    let history = state.store().versioned_history(id).await?;
    let mut seen = HashSet::with_capacity(history.len());

    for entry in history {
        if seen.insert(entry.file_key.clone()) {
            hierarchy::delete_owned(state, &entry.file_key, &found.owner).await?;
        }
    }

    Ok(())
}

pub async fn history(state: &Shared, id: &str, requester: &str) -> error::Result<Vec<HistoryEntry>> {
    let found = owned(state, id, requester).await?;

    if found.deleted {
        return Err(error::Error::not_found(format!("versioned file \"{id}\" was not found")));
    }

    state.store().versioned_history(id).await
}

#[cfg(test)]
mod test {
    use super::*;

    use canopy_api::ErrorKind;

    use crate::test_support::{Env, OWNER, OTHER};

    #[tokio::test]
    async fn binding_hides_node() {
        let env = Env::new();
        let file = env.file("doc.txt", None, 5).await;

        let versioned = create(&env.state, &file.key, OWNER).await.expect("failed to create");

        assert_eq!(versioned.file_key, file.key);
        assert!(env.node(&file.key).await.hidden);

        let rebinding_hidden = create(&env.state, &file.key, OWNER).await;

        assert_eq!(rebinding_hidden.unwrap_err().error_kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn update_validates_target() {
        let env = Env::new();
        let file = env.file("doc.txt", None, 5).await;
        let dir = env.dir("d", None).await;
        let theirs = env.file_as("theirs.txt", OTHER).await;
        let versioned = create(&env.state, &file.key, OWNER).await.expect("failed to create");

        let into_dir = update(&env.state, &versioned.id, &dir.key, OWNER).await;
        assert_eq!(into_dir.unwrap_err().error_kind(), ErrorKind::InvalidState);

        let not_owned = update(&env.state, &versioned.id, &theirs.key, OWNER).await;
        assert_eq!(not_owned.unwrap_err().error_kind(), ErrorKind::PermissionDenied);

        let not_requester = update(&env.state, &versioned.id, &file.key, OTHER).await;
        assert_eq!(not_requester.unwrap_err().error_kind(), ErrorKind::PermissionDenied);

        update(&env.state, &versioned.id, &file.key, OWNER).await.expect("same target is a no-op");

        assert_eq!(history(&env.state, &versioned.id, OWNER).await.expect("history failed").len(), 1);
    }

    #[tokio::test]
    async fn delete_is_resumable() {
        let env = Env::new();
        let first = env.file("v1.txt", None, 5).await;
        let second = env.file("v2.txt", None, 6).await;
        let versioned = create(&env.state, &first.key, OWNER).await.expect("failed to create");

        update(&env.state, &versioned.id, &second.key, OWNER).await.expect("failed to update");

        env.objects.set_failing(true);

        let failed = delete(&env.state, &versioned.id, OWNER).await;

        assert!(failed.unwrap_err().is_retryable());
        assert!(!env.node(&first.key).await.deleted);

        env.objects.set_failing(false);

        delete(&env.state, &versioned.id, OWNER).await.expect("resumed delete failed");

        assert!(env.node(&first.key).await.deleted);
        assert!(env.node(&second.key).await.deleted);

        delete(&env.state, &versioned.id, OWNER).await.expect("repeat delete failed");

        let gone = history(&env.state, &versioned.id, OWNER).await;

        assert_eq!(gone.unwrap_err().error_kind(), ErrorKind::NotFound);
    }
}
