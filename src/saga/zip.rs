//! zip import. the first step creates the destination directory and asks
//! the archive service to unpack. the reply carries the payload back and
//! every entry becomes a file node in one atomic insert

use std::collections::HashSet;

use canopy_api::messages::{UnzipRequest, UnzipResult};
use canopy_lib::fs;
use canopy_lib::ids;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::bus::Message;
use crate::error;
use crate::hierarchy::{self, CreateNode};
use crate::lock;
use crate::state::Shared;
use crate::store::{FileNode, ListFilter, NewNode};

/// round trips through the archive service unchanged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub file_key: ids::NodeKey,
    pub directory_key: ids::NodeKey,
    pub user: ids::UserRef,
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed correlation payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("correlation payload is missing {0}")]
    Missing(&'static str),
}

impl From<PayloadError> for error::Error {
    fn from(err: PayloadError) -> Self {
        error::Error::invalid_state("invalid unzip reply").source(err)
    }
}

impl Payload {
    pub fn encode(&self) -> error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(given: &str) -> Result<Self, PayloadError> {
        let payload: Payload = serde_json::from_str(given)?;

        if payload.directory_key.is_empty() {
            return Err(PayloadError::Missing("directory_key"));
        }

        if payload.user.is_empty() {
            return Err(PayloadError::Missing("user"));
        }

        Ok(payload)
    }
}

pub async fn start_import(state: &Shared, zip_key: &str, requester: &str) -> error::Result<FileNode> {
    let mut guard = state.locks().acquire(lock::file(zip_key)).await?;
    let result = start_locked(state, zip_key, requester).await;

    guard.release().await;

    let (directory, request) = result?;

    state.publish(Message::UnzipRequest(request))?;

    tracing::info!("unzip of \"{zip_key}\" requested into \"{}\"", directory.key);

    Ok(directory)
}

async fn start_locked(
    state: &Shared,
    zip_key: &str,
    requester: &str
) -> error::Result<(FileNode, UnzipRequest)> {
    let Some(zip) = state.store().node(zip_key).await? else {
        return Err(error::Error::not_found(format!("file \"{zip_key}\" was not found")));
    };

    if zip.deleted || !zip.kind.is_file() || !fs::is_zip_name(&zip.name) {
        return Err(error::Error::invalid_state(format!(
            "\"{zip_key}\" is not a live zip file"
        )));
    }

    if zip.owner != requester {
        return Err(error::Error::permission_denied(format!(
            "file \"{zip_key}\" is not owned by the requester"
        )));
    }

    let Some(content) = zip.content.clone().filter(|c| !c.is_empty()) else {
        return Err(error::Error::invalid_state(format!(
            "zip \"{zip_key}\" has no content"
        )));
    };

    let directory = hierarchy::create_node(state, CreateNode::directory(
        fs::stem(&zip.name),
        zip.parent.as_deref(),
        requester,
    )).await?;

    let payload = Payload {
        file_key: zip.key,
        directory_key: directory.key.clone(),
        user: requester.to_owned(),
    };

    let request = UnzipRequest {
        external_content_id: content,
        reply_topic: state.topics().unzip_reply.clone(),
        correlation_payload: payload.encode()?,
    };

    Ok((directory, request))
}

/// imports every entry of an unzip reply. entries already imported by an
/// earlier delivery are skipped
pub async fn finish_import(state: &Shared, result: &UnzipResult) -> error::Result<Vec<FileNode>> {
    let payload = Payload::decode(&result.correlation_payload)?;

    let mut guard = state.locks().acquire(lock::folder(&payload.directory_key)).await?;
    let outcome = finish_locked(state, &payload, result).await;

    guard.release().await;

    let (created, parent) = outcome?;

    if !created.is_empty() {
        tracing::info!(
            "imported {} entries from \"{}\" into \"{}\"",
            created.len(),
            payload.file_key,
            payload.directory_key
        );

        if let Some(parent) = parent {
            state.publish(Message::size_recalc(&parent))?;
        }
    }

    Ok(created)
}

async fn finish_locked(
    state: &Shared,
    payload: &Payload,
    result: &UnzipResult
) -> error::Result<(Vec<FileNode>, Option<ids::NodeKey>)> {
    let dir_key = payload.directory_key.as_str();

    let Some(directory) = state.store().node(dir_key).await? else {
        return Err(error::Error::not_found(format!("directory \"{dir_key}\" was not found")));
    };

    if directory.deleted || !directory.kind.is_dir() {
        return Err(error::Error::invalid_state(format!(
            "\"{dir_key}\" is not a live directory"
        )));
    }

    if directory.owner != payload.user {
        return Err(error::Error::permission_denied(format!(
            "directory \"{dir_key}\" is not owned by \"{}\"", payload.user
        )));
    }

    let existing = hierarchy::all_children(state, &payload.user, dir_key, &ListFilter::files()).await?;
    let mut seen: HashSet<String> = existing.into_iter()
        .filter_map(|n| n.content)
        .collect();

    let created = Utc::now();
    let mut nodes = Vec::with_capacity(result.entries.len());

    for entry in &result.entries {
        let Some(name) = fs::entry_basename(&entry.name) else {
            continue;
        };

        if !seen.insert(entry.external_content_id.clone()) {
            continue;
        }

        if !fs::basename_valid(name) {
            return Err(error::Error::invalid_state(format!(
                "invalid entry name \"{}\"", entry.name
            )));
        }

        let Ok(size) = i64::try_from(entry.size) else {
            return Err(error::Error::invalid_state(format!(
                "entry \"{}\" is too large", entry.name
            )));
        };

        nodes.push(NewNode {
            key: ids::create_key(),
            name: name.to_owned(),
            kind: fs::NodeKind::File,
            size,
            owner: payload.user.clone(),
            content: Some(entry.external_content_id.clone()),
            sensitive: false,
            created,
        });
    }

    if nodes.is_empty() {
        return Ok((Vec::new(), directory.parent));
    }

    let inserted = state.store().insert_nodes(Some(dir_key), nodes).await?;

    Ok((inserted, directory.parent))
}

#[cfg(test)]
mod test {
    use super::*;

    use canopy_api::messages::UnzipEntry;
    use canopy_api::ErrorKind;

    use crate::test_support::{Env, OWNER, OTHER};

    fn entry(name: &str, content: &str, size: u64) -> UnzipEntry {
        UnzipEntry {
            name: name.into(),
            external_content_id: content.into(),
            size,
        }
    }

    async fn started(env: &Env) -> (FileNode, FileNode, UnzipRequest) {
        let (holder, zip) = env.dir_with_file("downloads", "trip.zip", 50).await;

        env.queue.clear();

        let directory = start_import(&env.state, &zip.key, OWNER).await.expect("failed to start");

        let request = env.queue.pending()
            .into_iter()
            .find_map(|msg| match msg {
                Message::UnzipRequest(request) => Some(request),
                _ => None
            })
            .expect("no unzip request published");

        assert_eq!(directory.parent.as_deref(), Some(holder.key.as_str()));

        (zip, directory, request)
    }

    #[tokio::test]
    async fn start_validates_zip() {
        let env = Env::new();
        let text = env.file("notes.txt", None, 1).await;
        let zip = env.file("a.zip", None, 1).await;

        let not_zip = start_import(&env.state, &text.key, OWNER).await;
        assert_eq!(not_zip.unwrap_err().error_kind(), ErrorKind::InvalidState);

        let not_owner = start_import(&env.state, &zip.key, OTHER).await;
        assert_eq!(not_owner.unwrap_err().error_kind(), ErrorKind::PermissionDenied);

        let missing = start_import(&env.state, "missing", OWNER).await;
        assert_eq!(missing.unwrap_err().error_kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn import_round_trip() {
        let env = Env::new();
        let (zip, directory, request) = started(&env).await;

        assert_eq!(directory.name, "trip");
        assert_eq!(request.external_content_id, format!("content-{}", zip.name));

        let payload = Payload::decode(&request.correlation_payload).expect("bad payload");

        assert_eq!(payload.file_key, zip.key);
        assert_eq!(payload.directory_key, directory.key);

        let reply = UnzipResult {
            correlation_payload: request.correlation_payload.clone(),
            entries: vec![
                entry("trip/", "", 0),
                entry("trip/a.png", "z1", 10),
                entry("trip/b.txt", "z2", 5),
            ],
        };

        let created = finish_import(&env.state, &reply).await.expect("import failed");

        assert_eq!(created.len(), 2);
        assert_eq!(created[0].name, "a.png");
        assert_eq!(env.node(&directory.key).await.size, 15);

        let replayed = finish_import(&env.state, &reply).await.expect("replay failed");

        assert!(replayed.is_empty());
        assert_eq!(env.node(&directory.key).await.size, 15);
    }

    #[tokio::test]
    async fn bad_entry_aborts_batch() {
        let env = Env::new();
        let (_, directory, request) = started(&env).await;

        let reply = UnzipResult {
            correlation_payload: request.correlation_payload,
            entries: vec![
                entry("a.png", "z1", 10),
                entry("bad\u{0007}name", "z2", 5),
            ],
        };

        let result = finish_import(&env.state, &reply).await;

        assert_eq!(result.unwrap_err().error_kind(), ErrorKind::InvalidState);
        assert_eq!(env.node(&directory.key).await.size, 0);

        let malformed = finish_import(&env.state, &UnzipResult {
            correlation_payload: "not json".into(),
            entries: Vec::new(),
        }).await;

        assert_eq!(malformed.unwrap_err().error_kind(), ErrorKind::InvalidState);
    }
}
