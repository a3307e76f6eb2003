use canopy_api::messages::{FileDeleted, GalleryLinkRequest};

use crate::bus::Message;
use crate::collection;
use crate::error;
use crate::state::Shared;

/// a file gained a thumbnail. requests that it is linked into the gallery of
/// its parent directory
pub async fn request_link(state: &Shared, key: &str) -> error::Result<()> {
    let Some(file) = state.store().node(key).await? else {
        return Ok(());
    };

    if file.deleted || !file.kind.is_file() || !file.has_thumbnail() {
        return Ok(());
    }

    let Some(parent_key) = &file.parent else {
        tracing::debug!("\"{key}\" is top level, no gallery to link");

        return Ok(());
    };

    let Some(parent) = state.store().node(parent_key).await? else {
        return Ok(());
    };

    if parent.deleted {
        return Ok(());
    }

    let username = match state.identities().username(&file.owner).await? {
        Some(name) => name,
        None => {
            tracing::warn!("no username for \"{}\"", file.owner);

            file.owner.clone()
        }
    };

    state.publish(Message::GalleryLink(GalleryLinkRequest {
        acting_user_identity: file.owner,
        acting_username: username,
        parent_directory_key: parent.key,
        parent_directory_name: parent.name,
        image_name: file.name,
        image_file_key: file.key,
    }))
}

pub async fn link(state: &Shared, request: &GalleryLinkRequest) -> error::Result<()> {
    let gallery = collection::ensure_directory_gallery(
        state,
        &request.parent_directory_key,
        &request.parent_directory_name,
        &request.acting_user_identity,
    ).await?;

    if collection::register_gallery_image(state, &gallery, &request.image_file_key).await? {
        tracing::debug!(
            "linked \"{}\" into gallery \"{}\"",
            request.image_name,
            gallery.key
        );
    }

    Ok(())
}

pub fn notify_deleted(state: &Shared, key: &str) -> error::Result<()> {
    state.publish(Message::FileDeleted(FileDeleted {
        file_key: key.to_owned(),
    }))
}

pub async fn unlink(state: &Shared, deleted: &FileDeleted) -> error::Result<()> {
    collection::remove_gallery_images(state, &deleted.file_key).await?;

    Ok(())
}
