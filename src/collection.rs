use std::collections::HashSet;

use canopy_api::records::{NodeEntry, Page};
use canopy_lib::collections::{self, CollectionKind};
use canopy_lib::ids;
use canopy_lib::query::PageRequest;
use chrono::Utc;

use crate::bus::{AddFiles, Message};
use crate::error;
use crate::hierarchy::{self, ListRequest};
use crate::lock;
use crate::state::Shared;
use crate::store::{Collection, ListFilter, NewCollection};

fn not_found(key: &str) -> error::Error {
    error::Error::not_found(format!("collection \"{key}\" was not found"))
}

async fn active(state: &Shared, key: &str) -> error::Result<Collection> {
    match state.store().collection(key).await? {
        Some(found) if !found.deleted => Ok(found),
        _ => Err(not_found(key)),
    }
}

async fn require_owned(state: &Shared, key: &str, requester: &str) -> error::Result<Collection> {
    let found = active(state, key).await?;

    if found.owner != requester {
        return Err(error::Error::permission_denied(format!(
            "collection \"{key}\" is not owned by the requester"
        )));
    }

    Ok(found)
}

/// the collection when the requester is its owner or holds a grant
pub async fn require_access(state: &Shared, key: &str, requester: &str) -> error::Result<Collection> {
    let found = active(state, key).await?;

    if found.owner == requester || state.store().has_grant(found.id, requester).await? {
        Ok(found)
    } else {
        Err(error::Error::permission_denied(format!(
            "no access to collection \"{key}\""
        )))
    }
}

pub async fn has_access(state: &Shared, requester: &str, key: &str) -> error::Result<bool> {
    let Some(found) = state.store().collection(key).await? else {
        return Ok(false);
    };

    if found.deleted {
        return Ok(false);
    }

    if found.owner == requester {
        return Ok(true);
    }

    state.store().has_grant(found.id, requester).await
}

pub async fn create_collection(
    state: &Shared,
    kind: CollectionKind,
    name: &str,
    owner: &str
) -> error::Result<Collection> {
    if !collections::name_valid(name) {
        return Err(error::Error::invalid_state(format!("invalid collection name \"{name}\"")));
    }

    let mut guard = state.locks().acquire(lock::collection_owner(kind, owner)).await?;
    let result = create_locked(state, kind, name, owner).await;

    guard.release().await;

    result
}

async fn create_locked(
    state: &Shared,
    kind: CollectionKind,
    name: &str,
    owner: &str
) -> error::Result<Collection> {
    if state.store().active_collection_named(kind, owner, name).await?.is_some() {
        return Err(error::Error::conflict(format!(
            "{} \"{name}\" already exists", kind.as_str()
        )));
    }

    let created = state.store().insert_collection(NewCollection {
        key: ids::create_key(),
        kind,
        name: name.to_owned(),
        owner: owner.to_owned(),
        directory: None,
        created: Utc::now(),
    }).await?;

    tracing::debug!("created {} \"{}\"", kind.as_str(), created.key);

    Ok(created)
}

/// finds or creates the gallery bound to a directory. repeated calls for
/// the same directory return the same gallery
pub async fn ensure_directory_gallery(
    state: &Shared,
    dir_key: &str,
    name: &str,
    owner: &str
) -> error::Result<Collection> {
    let mut guard = state.locks().acquire(lock::gallery_dir(dir_key)).await?;
    let result = ensure_locked(state, dir_key, name, owner).await;

    guard.release().await;

    result
}

async fn ensure_locked(
    state: &Shared,
    dir_key: &str,
    name: &str,
    owner: &str
) -> error::Result<Collection> {
    if let Some(existing) = state.store().directory_gallery(dir_key).await? {
        return Ok(existing);
    }

    let created = state.store().insert_collection(NewCollection {
        key: ids::create_key(),
        kind: CollectionKind::Gallery,
        name: name.to_owned(),
        owner: owner.to_owned(),
        directory: Some(dir_key.to_owned()),
        created: Utc::now(),
    }).await?;

    tracing::info!("created gallery \"{}\" for directory \"{dir_key}\"", created.key);

    Ok(created)
}

/// adds an image to a gallery. false when it was already registered
pub async fn register_gallery_image(
    state: &Shared,
    gallery: &Collection,
    file_key: &str
) -> error::Result<bool> {
    let mut guard = state.locks()
        .acquire(lock::gallery_image(&gallery.key, file_key))
        .await?;
    let result = register_locked(state, gallery, file_key).await;

    guard.release().await;

    result
}

async fn register_locked(
    state: &Shared,
    gallery: &Collection,
    file_key: &str
) -> error::Result<bool> {
    let Some(file) = state.store().node(file_key).await? else {
        return Err(error::Error::not_found(format!("file \"{file_key}\" was not found")));
    };

    if file.deleted || !file.kind.is_file() {
        tracing::debug!("skipping gallery image \"{file_key}\", not a live file");

        return Ok(false);
    }

    let changed = state.store().insert_members(gallery.id, &[file.key]).await?;

    Ok(changed > 0)
}

pub async fn remove_gallery_images(state: &Shared, file_key: &str) -> error::Result<u64> {
    let removed = state.store().remove_file_from_galleries(file_key).await?;

    if removed > 0 {
        tracing::debug!("removed \"{file_key}\" from {removed} galleries");
    }

    Ok(removed)
}

/// checks ownership and hands the transfer to the workers. the caller does
/// not wait for the members to be added
pub async fn add_files(
    state: &Shared,
    key: &str,
    files: Vec<ids::NodeKey>,
    requester: &str
) -> error::Result<()> {
    require_owned(state, key, requester).await?;

    state.publish(Message::AddFiles(AddFiles {
        collection: key.to_owned(),
        files,
        requester: requester.to_owned(),
    }))
}

fn dedup(keys: &[ids::NodeKey]) -> Vec<ids::NodeKey> {
    let mut seen = HashSet::with_capacity(keys.len());

    keys.iter()
        .filter(|k| seen.insert(k.as_str()))
        .cloned()
        .collect()
}

pub async fn apply_add_files(state: &Shared, task: &AddFiles) -> error::Result<()> {
    let mut guard = state.locks().acquire(lock::collection(&task.collection)).await?;
    let result = apply_locked(state, task).await;

    guard.release().await;

    let added = result?;

    tracing::debug!("added {added} files to \"{}\"", task.collection);

    Ok(())
}

async fn apply_locked(state: &Shared, task: &AddFiles) -> error::Result<u64> {
    let found = require_owned(state, &task.collection, &task.requester).await?;
    let mut members = Vec::new();

    for key in dedup(&task.files) {
        let Some(node) = state.store().node(&key).await? else {
            continue;
        };

        if node.deleted || node.hidden || node.owner != task.requester {
            continue;
        }

        if node.kind.is_file() {
            members.push(node.key);
        } else {
            let children = hierarchy::all_children(
                state,
                &task.requester,
                &node.key,
                &ListFilter::files()
            ).await?;

            members.extend(children.into_iter().map(|c| c.key));
        }
    }

    let members = dedup(&members);

    if members.is_empty() {
        return Ok(0);
    }

    state.store().insert_members(found.id, &members).await
}

/// non-matching keys are skipped
pub async fn remove_files(
    state: &Shared,
    key: &str,
    files: &[ids::NodeKey],
    requester: &str
) -> error::Result<u64> {
    require_owned(state, key, requester).await?;

    let mut guard = state.locks().acquire(lock::collection(key)).await?;
    let result = remove_files_locked(state, key, files, requester).await;

    guard.release().await;

    result
}

async fn remove_files_locked(
    state: &Shared,
    key: &str,
    files: &[ids::NodeKey],
    requester: &str
) -> error::Result<u64> {
    let found = require_owned(state, key, requester).await?;
    let mut matching = Vec::with_capacity(files.len());

    for file_key in dedup(files) {
        if let Some(node) = state.store().node(&file_key).await? {
            if node.kind.is_file() && node.owner == requester {
                matching.push(node.key);
            }
        }
    }

    if matching.is_empty() {
        return Ok(0);
    }

    state.store().remove_members(found.id, &matching).await
}

pub async fn grant_access(
    state: &Shared,
    key: &str,
    grantee: &str,
    requester: &str
) -> error::Result<()> {
    let found = require_owned(state, key, requester).await?;

    if grantee == requester {
        return Ok(());
    }

    if state.store().grant(found.id, grantee, requester).await? {
        tracing::debug!("granted \"{grantee}\" access to \"{key}\"");
    }

    Ok(())
}

pub async fn revoke_access(
    state: &Shared,
    key: &str,
    grantee: &str,
    requester: &str
) -> error::Result<()> {
    let found = require_owned(state, key, requester).await?;

    if grantee == requester {
        return Ok(());
    }

    if state.store().revoke(found.id, grantee).await? {
        tracing::debug!("revoked \"{grantee}\" access to \"{key}\"");
    }

    Ok(())
}

pub async fn remove_collection(state: &Shared, key: &str, requester: &str) -> error::Result<()> {
    require_owned(state, key, requester).await?;

    let mut guard = state.locks().acquire(lock::collection(key)).await?;
    let result = async {
        require_owned(state, key, requester).await?;

        state.store().remove_collection(key, Utc::now()).await
    }.await;

    guard.release().await;

    if result? {
        tracing::debug!("removed collection \"{key}\"");
    }

    Ok(())
}

pub async fn collection_members(
    state: &Shared,
    key: &str,
    requester: &str,
    page: PageRequest
) -> error::Result<Page<NodeEntry>> {
    hierarchy::list_children(state, ListRequest {
        requester: requester.to_owned(),
        collection: Some(key.to_owned()),
        filter: ListFilter::everything(),
        page,
        ..Default::default()
    }).await
}
