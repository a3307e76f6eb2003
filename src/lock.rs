//! named mutual exclusion keyed by logical resource.
//!
//! flows that need two resources acquire them child first, then parent
//! (a node before its destination directory, a versioned file before the
//! nodes it references). handles are not reentrant.

use std::time::Duration;

use canopy_lib::collections::CollectionKind;
use canopy_lib::fs::NodeKind;
use deadpool_postgres::Pool;

use crate::config;
use crate::error::{self, Context};

pub mod local;
pub mod lease;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("timed out waiting for lock \"{0}\"")]
    Timeout(String),

    #[error("lock backend failed")]
    Database(#[from] tokio_postgres::Error),

    #[error("lock backend connection unavailable")]
    Pool(#[from] deadpool_postgres::PoolError),
}

impl From<LockError> for error::Error {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout(key) => error::Error::transient(format!(
                "timed out waiting for lock \"{key}\""
            )),
            LockError::Database(err) => error::Error::from(err)
                .context("lock backend failed"),
            LockError::Pool(err) => error::Error::from(err),
        }
    }
}

#[derive(Debug)]
pub enum Locks {
    Local(local::LocalLocks),
    Lease(lease::LeaseLocks),
}

impl Locks {
    pub fn local(timeout: Duration) -> Self {
        Locks::Local(local::LocalLocks::new(timeout))
    }

    pub fn from_config(config: &config::Config, pool: Option<&Pool>) -> error::Result<Self> {
        let settings = &config.settings.locks;

        match settings.kind {
            config::LockKind::Local => Ok(Locks::local(settings.timeout)),
            config::LockKind::Lease => {
                let pool = pool.context("lease locks require a database pool")?;

                Ok(Locks::Lease(lease::LeaseLocks::new(
                    pool.clone(),
                    settings.timeout,
                    settings.ttl,
                    settings.poll,
                )))
            }
        }
    }

    /// waits until `key` is held exclusively or the configured timeout
    /// passes
    pub async fn acquire<K>(&self, key: K) -> error::Result<LockHandle>
    where
        K: Into<String>
    {
        let key = key.into();

        tracing::trace!("acquiring lock \"{key}\"");

        let held = match self {
            Locks::Local(locks) => locks.acquire(key).await?,
            Locks::Lease(locks) => locks.acquire(key).await?,
        };

        Ok(LockHandle { held: Some(held) })
    }
}

#[derive(Debug)]
pub(crate) enum Held {
    Local(local::LocalHeld),
    Lease(lease::LeaseHeld),
}

#[derive(Debug)]
pub struct LockHandle {
    held: Option<Held>,
}

impl LockHandle {
    pub fn key(&self) -> Option<&str> {
        match self.held.as_ref()? {
            Held::Local(held) => Some(held.key()),
            Held::Lease(held) => Some(held.key()),
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// safe to call any number of times
    pub async fn release(&mut self) {
        match self.held.take() {
            Some(Held::Local(held)) => held.release(),
            Some(Held::Lease(held)) => held.release().await,
            None => {}
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        match self.held.take() {
            Some(Held::Local(held)) => held.release(),
            Some(Held::Lease(held)) => held.release_detached(),
            None => {}
        }
    }
}

pub fn file(key: &str) -> String {
    format!("file:{key}")
}

pub fn folder(key: &str) -> String {
    format!("folder:{key}")
}

/// files and directories share the key space of nodes but lock under
/// different prefixes
pub fn node(kind: NodeKind, key: &str) -> String {
    match kind {
        NodeKind::File => file(key),
        NodeKind::Directory => folder(key),
    }
}

pub fn collection(key: &str) -> String {
    format!("collection:{key}")
}

pub fn collection_owner(kind: CollectionKind, owner: &str) -> String {
    format!("collection-owner:{}:{owner}", kind.as_str())
}

pub fn gallery_dir(dir_key: &str) -> String {
    format!("gallery-dir:{dir_key}")
}

pub fn gallery_image(gallery: &str, file: &str) -> String {
    format!("gallery-image:{gallery}:{file}")
}

pub fn tag(owner: &str, name: &str) -> String {
    format!("tag:{owner}:{name}")
}

pub fn versioned_file(id: &str) -> String {
    format!("versioned-file:{id}")
}

#[cfg(test)]
mod test {
    use super::*;

    use canopy_api::ErrorKind;

    #[test]
    fn key_builders() {
        assert_eq!(node(NodeKind::File, "abc"), "file:abc");
        assert_eq!(node(NodeKind::Directory, "abc"), "folder:abc");
        assert_eq!(collection_owner(CollectionKind::Gallery, "u1"), "collection-owner:gallery:u1");
        assert_eq!(gallery_image("g", "f"), "gallery-image:g:f");
        assert_eq!(tag("u1", "holiday"), "tag:u1:holiday");
        assert_eq!(versioned_file("v1"), "versioned-file:v1");
    }

    #[test]
    fn timeout_is_transient() {
        let err = error::Error::from(LockError::Timeout("file:abc".into()));

        assert_eq!(err.error_kind(), ErrorKind::Transient);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let locks = Locks::local(Duration::from_millis(100));

        let mut handle = locks.acquire(file("abc")).await.expect("failed to acquire");

        assert_eq!(handle.key(), Some("file:abc"));

        handle.release().await;
        handle.release().await;

        assert!(!handle.is_held());

        let mut again = locks.acquire(file("abc")).await.expect("failed to reacquire");
        again.release().await;
    }
}
