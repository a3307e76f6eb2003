use canopy_api::records::{NodeEntry, Page};
use canopy_lib::fs::{self, NodeKind};
use canopy_lib::ids;
use canopy_lib::query::PageRequest;
use chrono::Utc;

use crate::bus::Message;
use crate::collection;
use crate::error;
use crate::lock;
use crate::state::Shared;
use crate::store::{FileNode, ListFilter, ListScope, NewNode};

/// upper bound on ancestor walks. a deeper chain means the tree is broken
const MAX_DEPTH: usize = 4096;

#[derive(Debug, Clone)]
pub struct CreateNode {
    pub kind: NodeKind,
    pub name: String,
    pub parent: Option<ids::NodeKey>,
    pub owner: ids::UserRef,
    pub size: i64,
    pub content: Option<String>,
    pub sensitive: bool,
}

impl CreateNode {
    pub fn directory<N, O>(name: N, parent: Option<&str>, owner: O) -> Self
    where
        N: Into<String>,
        O: Into<String>,
    {
        CreateNode {
            kind: NodeKind::Directory,
            name: name.into(),
            parent: parent.map(String::from),
            owner: owner.into(),
            size: 0,
            content: None,
            sensitive: false,
        }
    }

    pub fn file<N, O>(name: N, parent: Option<&str>, owner: O, size: i64, content: Option<String>) -> Self
    where
        N: Into<String>,
        O: Into<String>,
    {
        CreateNode {
            kind: NodeKind::File,
            name: name.into(),
            parent: parent.map(String::from),
            owner: owner.into(),
            size,
            content,
            sensitive: false,
        }
    }
}

pub fn is_image_by_name(name: &str) -> bool {
    fs::is_image_name(name)
}

async fn require_node(state: &Shared, key: &str) -> error::Result<FileNode> {
    match state.store().node(key).await? {
        Some(node) => Ok(node),
        None => Err(error::Error::not_found(format!("node \"{key}\" was not found"))),
    }
}

/// a live directory owned by `owner`
fn check_directory(node: &FileNode, owner: &str) -> error::Result<()> {
    if node.deleted {
        return Err(error::Error::invalid_state(format!(
            "directory \"{}\" is deleted", node.key
        )));
    }

    if !node.kind.is_dir() {
        return Err(error::Error::invalid_state(format!(
            "\"{}\" is not a directory", node.key
        )));
    }

    if node.owner != owner {
        return Err(error::Error::permission_denied(format!(
            "directory \"{}\" is not owned by the requester", node.key
        )));
    }

    Ok(())
}

fn signal_size(state: &Shared, directory: Option<&str>) {
    let Some(directory) = directory else {
        return;
    };

    if let Err(err) = state.publish(Message::size_recalc(directory)) {
        tracing::warn!("failed to signal size recalculation for \"{directory}\": {err}");
    }
}

pub async fn create_node(state: &Shared, create: CreateNode) -> error::Result<FileNode> {
    if !fs::basename_valid(&create.name) {
        return Err(error::Error::invalid_state(format!(
            "invalid node name \"{}\"", create.name
        )));
    }

    if create.size < 0 || (create.kind.is_dir() && create.size != 0) {
        return Err(error::Error::invalid_state("invalid node size"));
    }

    let new = NewNode {
        key: ids::create_key(),
        name: create.name,
        kind: create.kind,
        size: create.size,
        owner: create.owner,
        content: if create.kind.is_dir() { None } else { create.content },
        sensitive: create.sensitive,
        created: Utc::now(),
    };

    let Some(parent) = create.parent else {
        let mut created = state.store().insert_nodes(None, vec![new]).await?;

        return created.pop()
            .ok_or_else(|| error::Error::new().context("insert returned no node"));
    };

    let mut guard = state.locks().acquire(lock::folder(&parent)).await?;
    let result = create_under(state, &parent, new).await;

    guard.release().await;

    let (node, grandparent) = result?;

    signal_size(state, grandparent.as_deref());

    Ok(node)
}

async fn create_under(
    state: &Shared,
    parent_key: &str,
    new: NewNode
) -> error::Result<(FileNode, Option<ids::NodeKey>)> {
    let Some(parent) = state.store().node(parent_key).await? else {
        return Err(error::Error::not_found(format!(
            "parent \"{parent_key}\" was not found"
        )));
    };

    if parent.deleted {
        return Err(error::Error::not_found(format!(
            "parent \"{parent_key}\" was not found"
        )));
    }

    check_directory(&parent, &new.owner)?;

    let mut created = state.store().insert_nodes(Some(parent_key), vec![new]).await?;
    let node = created.pop()
        .ok_or_else(|| error::Error::new().context("insert returned no node"))?;

    Ok((node, parent.parent))
}

/// true when `ancestor` appears in the parent chain of `start` (inclusive)
async fn is_within(state: &Shared, start: &FileNode, ancestor: &str) -> error::Result<bool> {
    if start.key == ancestor {
        return Ok(true);
    }

    let mut next = start.parent.clone();
    let mut depth = 0;

    while let Some(key) = next {
        if key == ancestor {
            return Ok(true);
        }

        depth += 1;

        if depth > MAX_DEPTH {
            return Err(error::Error::new().context(format!(
                "ancestor chain of \"{}\" is too deep", start.key
            )));
        }

        next = state.store().node(&key).await?.and_then(|n| n.parent);
    }

    Ok(false)
}

pub async fn move_node(
    state: &Shared,
    key: &str,
    to: Option<&str>,
    mover: &str
) -> error::Result<()> {
    let to = ids::parent_key(to);

    if to == Some(key) {
        return Ok(());
    }

    let kind = require_node(state, key).await?.kind;

    let mut node_guard = state.locks().acquire(lock::node(kind, key)).await?;
    let result = move_locked(state, key, to, mover).await;

    node_guard.release().await;

    let Some((previous, destination_parent)) = result? else {
        return Ok(());
    };

    signal_size(state, previous.as_deref());
    signal_size(state, destination_parent.as_deref());

    Ok(())
}

/// returns the previous parent and the destination's parent, None when
/// nothing moved
async fn move_locked(
    state: &Shared,
    key: &str,
    to: Option<&str>,
    mover: &str
) -> error::Result<Option<(Option<ids::NodeKey>, Option<ids::NodeKey>)>> {
    let node = require_node(state, key).await?;

    if node.parent.as_deref() == to {
        tracing::debug!("\"{key}\" already under {to:?}");

        return Ok(None);
    }

    if node.deleted {
        return Err(error::Error::invalid_state(format!("node \"{key}\" is deleted")));
    }

    if node.owner != mover {
        return Err(error::Error::permission_denied(format!(
            "node \"{key}\" is not owned by the requester"
        )));
    }

    let Some(to) = to else {
        state.store().move_node(key, None).await?;

        return Ok(Some((node.parent, None)));
    };

    let mut dest_guard = state.locks().acquire(lock::folder(to)).await?;
    let result = move_into(state, &node, to, mover).await;

    dest_guard.release().await;

    let destination_parent = result?;

    Ok(Some((node.parent, destination_parent)))
}

async fn move_into(
    state: &Shared,
    node: &FileNode,
    to: &str,
    mover: &str
) -> error::Result<Option<ids::NodeKey>> {
    let Some(destination) = state.store().node(to).await? else {
        return Err(error::Error::not_found(format!("destination \"{to}\" was not found")));
    };

    check_directory(&destination, mover)?;

    if node.kind.is_dir() && is_within(state, &destination, &node.key).await? {
        return Err(error::Error::invalid_state(format!(
            "cannot move \"{}\" into itself or a descendant", node.key
        )));
    }

    state.store().move_node(&node.key, Some(to)).await?;

    Ok(destination.parent)
}

pub async fn delete_node(state: &Shared, key: &str, requester: &str) -> error::Result<()> {
    let kind = require_node(state, key).await?.kind;

    let mut guard = state.locks().acquire(lock::node(kind, key)).await?;
    let result = delete_locked(state, key, requester).await;

    guard.release().await;

    if let Some(parent) = result? {
        signal_size(state, parent.as_deref());
    }

    Ok(())
}

/// deletes on behalf of the owner, nodes that are already gone are skipped
pub async fn delete_owned(state: &Shared, key: &str, owner: &str) -> error::Result<()> {
    match state.store().node(key).await? {
        Some(node) if !node.deleted => delete_node(state, key, owner).await,
        _ => Ok(()),
    }
}

/// Some(parent) when the node was marked deleted
async fn delete_locked(
    state: &Shared,
    key: &str,
    requester: &str
) -> error::Result<Option<Option<ids::NodeKey>>> {
    let node = require_node(state, key).await?;

    if node.owner != requester {
        return Err(error::Error::permission_denied(format!(
            "node \"{key}\" is not owned by the requester"
        )));
    }

    if node.deleted {
        return Ok(None);
    }

    if node.kind.is_dir() && state.store().live_child_count(key).await? > 0 {
        return Err(error::Error::invalid_state(format!(
            "directory \"{key}\" is not empty"
        )));
    }

    // external objects go first. the record is only marked once they are
    // gone so a failed attempt can be repeated
    for content in [&node.content, &node.thumbnail].into_iter().flatten() {
        if !content.is_empty() {
            state.objects().delete(content).await?;
        }
    }

    state.store().mark_deleted(key, Utc::now(), true).await?;

    tracing::debug!("deleted node \"{key}\"");

    Ok(Some(node.parent))
}

/// listing criteria. a collection key takes precedence over a tag which
/// takes precedence over plain hierarchy listing
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub requester: ids::UserRef,
    pub parent: Option<ids::NodeKey>,
    pub tag: Option<String>,
    pub collection: Option<ids::CollectionKey>,
    pub filter: ListFilter,
    pub page: PageRequest,
}

pub async fn list_children(state: &Shared, request: ListRequest) -> error::Result<Page<NodeEntry>> {
    let scope = if let Some(collection_key) = request.collection {
        collection::require_access(state, &collection_key, &request.requester).await?;

        ListScope::Collection(collection_key)
    } else if let Some(tag) = request.tag {
        ListScope::Tag {
            owner: request.requester,
            name: tag,
        }
    } else {
        let parent = request.parent.filter(|p| !p.is_empty());

        if let Some(parent_key) = &parent {
            let Some(parent) = state.store().node(parent_key).await? else {
                return Err(error::Error::not_found(format!(
                    "directory \"{parent_key}\" was not found"
                )));
            };

            if parent.deleted {
                return Err(error::Error::not_found(format!(
                    "directory \"{parent_key}\" was not found"
                )));
            }

            check_directory(&parent, &request.requester)?;
        }

        ListScope::Directory {
            owner: request.requester,
            parent,
        }
    };

    let nodes = state.store().list_nodes(&scope, &request.filter, &request.page).await?;

    Ok(Page::new(
        &request.page,
        nodes.iter().map(FileNode::to_entry).collect()
    ))
}

/// every live child of a directory, following pages until exhausted
pub async fn all_children(
    state: &Shared,
    owner: &str,
    directory: &str,
    filter: &ListFilter
) -> error::Result<Vec<FileNode>> {
    let scope = ListScope::Directory {
        owner: owner.to_owned(),
        parent: Some(directory.to_owned()),
    };
    let mut page = PageRequest::first(Default::default());
    let mut rtn = Vec::new();

    loop {
        let found = state.store().list_nodes(&scope, filter, &page).await?;
        let full = found.len() >= page.limit.as_usize();

        rtn.extend(found);

        if !full {
            break;
        }

        page = page.next();
    }

    Ok(rtn)
}
