use canopy_lib::tags;

use crate::error;
use crate::lock;
use crate::state::Shared;
use crate::store::{FileNode, TagUsage};

async fn taggable(state: &Shared, file_key: &str, owner: &str) -> error::Result<FileNode> {
    let Some(node) = state.store().node(file_key).await? else {
        return Err(error::Error::not_found(format!("file \"{file_key}\" was not found")));
    };

    if node.deleted {
        return Err(error::Error::not_found(format!("file \"{file_key}\" was not found")));
    }

    if node.owner != owner {
        return Err(error::Error::permission_denied(format!(
            "file \"{file_key}\" is not owned by the requester"
        )));
    }

    if !node.kind.is_file() {
        return Err(error::Error::invalid_state(format!(
            "\"{file_key}\" is not a file"
        )));
    }

    Ok(node)
}

pub async fn tag_file(state: &Shared, file_key: &str, name: &str, owner: &str) -> error::Result<()> {
    if !tags::name_valid(name) {
        return Err(error::Error::invalid_state(format!("invalid tag name \"{name}\"")));
    }

    let mut guard = state.locks().acquire(lock::tag(owner, name)).await?;
    let result = async {
        let node = taggable(state, file_key, owner).await?;

        state.store().tag_file(node.id, owner, name).await
    }.await;

    guard.release().await;

    if result? {
        tracing::debug!("tagged \"{file_key}\" with \"{name}\"");
    }

    Ok(())
}

/// the tag itself is removed once no file carries it
pub async fn untag_file(state: &Shared, file_key: &str, name: &str, owner: &str) -> error::Result<()> {
    let mut guard = state.locks().acquire(lock::tag(owner, name)).await?;
    let result = async {
        let Some(node) = state.store().node(file_key).await? else {
            return Ok(false);
        };

        if node.owner != owner {
            return Err(error::Error::permission_denied(format!(
                "file \"{file_key}\" is not owned by the requester"
            )));
        }

        state.store().untag_file(node.id, owner, name).await
    }.await;

    guard.release().await;

    if result? {
        tracing::debug!("untagged \"{file_key}\" from \"{name}\"");
    }

    Ok(())
}

pub async fn file_tags(state: &Shared, file_key: &str, owner: &str) -> error::Result<Vec<String>> {
    let node = taggable(state, file_key, owner).await?;

    state.store().tags_for_file(node.id, owner).await
}

pub async fn tag_usage(state: &Shared, owner: &str, name: &str) -> error::Result<TagUsage> {
    state.store().tag_usage(owner, name).await
}

#[cfg(test)]
mod test {
    use super::*;

    use canopy_api::ErrorKind;

    use crate::test_support::{Env, OWNER, OTHER};

    #[tokio::test]
    async fn untag_collects_tag() {
        let env = Env::new();
        let a = env.file("a.txt", None, 1).await;
        let b = env.file("b.txt", None, 1).await;

        tag_file(&env.state, &a.key, "todo", OWNER).await.expect("failed to tag");
        tag_file(&env.state, &a.key, "todo", OWNER).await.expect("repeat tag failed");
        tag_file(&env.state, &b.key, "todo", OWNER).await.expect("failed to tag");

        assert_eq!(
            tag_usage(&env.state, OWNER, "todo").await.expect("usage failed"),
            TagUsage { exists: true, files: 2 }
        );

        untag_file(&env.state, &a.key, "todo", OWNER).await.expect("failed to untag");

        assert_eq!(file_tags(&env.state, &a.key, OWNER).await.expect("read failed"), Vec::<String>::new());
        assert_eq!(file_tags(&env.state, &b.key, OWNER).await.expect("read failed"), vec![String::from("todo")]);

        untag_file(&env.state, &b.key, "todo", OWNER).await.expect("failed to untag");
        untag_file(&env.state, &b.key, "todo", OWNER).await.expect("repeat untag failed");

        assert_eq!(tag_usage(&env.state, OWNER, "todo").await.expect("usage failed"), TagUsage::default());
    }

    #[tokio::test]
    async fn tag_checks_node() {
        let env = Env::new();
        let dir = env.dir("d", None).await;
        let file = env.file("a.txt", None, 1).await;

        let on_dir = tag_file(&env.state, &dir.key, "x", OWNER).await;
        assert_eq!(on_dir.unwrap_err().error_kind(), ErrorKind::InvalidState);

        let not_owner = tag_file(&env.state, &file.key, "x", OTHER).await;
        assert_eq!(not_owner.unwrap_err().error_kind(), ErrorKind::PermissionDenied);

        let missing = tag_file(&env.state, "missing", "x", OWNER).await;
        assert_eq!(missing.unwrap_err().error_kind(), ErrorKind::NotFound);

        let bad_name = tag_file(&env.state, &file.key, "", OWNER).await;
        assert_eq!(bad_name.unwrap_err().error_kind(), ErrorKind::InvalidState);

        tag_file(&env.state, &file.key, "x", OWNER).await.expect("failed to tag");

        // scoped per owner
        assert!(!tag_usage(&env.state, OTHER, "x").await.expect("usage failed").exists);
    }
}
