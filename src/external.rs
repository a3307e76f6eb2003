//! collaborators the engine calls out to but does not implement

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use canopy_lib::ids;
use deadpool_postgres::Pool;
use futures::TryStreamExt;
use parking_lot::Mutex;
use reqwest::StatusCode;

use crate::config;
use crate::error::{self, Context};
use crate::sql;

#[async_trait::async_trait]
pub trait ObjectStore: std::fmt::Debug + Send + Sync {
    /// removing an object that is already gone is not an error
    async fn delete(&self, content_id: &str) -> error::Result<()>;
}

#[derive(Debug)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    base: String,
}

impl HttpObjectStore {
    pub fn new(client: reqwest::Client, url: &url::Url) -> Self {
        HttpObjectStore {
            client,
            base: url.as_str().trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for HttpObjectStore {
    async fn delete(&self, content_id: &str) -> error::Result<()> {
        let url = format!("{}/objects/{content_id}", self.base);

        let response = self.client.delete(&url)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                tracing::debug!("object \"{content_id}\" already removed");

                Ok(())
            }
            status if status.is_success() => Ok(()),
            status if status.is_server_error() => Err(error::Error::transient(format!(
                "object store responded with {status} deleting \"{content_id}\""
            ))),
            status => Err(error::Error::new().context(format!(
                "object store rejected delete of \"{content_id}\" with {status}"
            ))),
        }
    }
}

/// keeps a record of deleted objects. can be switched into failing to
/// mimic an unavailable store
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    deleted: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        MemoryObjectStore::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn delete(&self, content_id: &str) -> error::Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(error::Error::transient("object store unavailable"));
        }

        let mut deleted = self.deleted.lock();

        if !deleted.iter().any(|d| d == content_id) {
            deleted.push(content_id.to_owned());
        }

        Ok(())
    }
}

pub fn object_store_from_config(
    config: &config::Config,
    client: &reqwest::Client
) -> Arc<dyn ObjectStore> {
    match &config.settings.object_store.url {
        Some(url) => Arc::new(HttpObjectStore::new(client.clone(), url)),
        None => {
            tracing::warn!("no object store url configured. deletions stay in memory");

            Arc::new(MemoryObjectStore::new())
        }
    }
}

#[async_trait::async_trait]
pub trait Identities: std::fmt::Debug + Send + Sync {
    async fn username(&self, user: &str) -> error::Result<Option<String>>;

    async fn usernames(&self, users: &[ids::UserRef]) -> error::Result<HashMap<ids::UserRef, String>>;
}

#[derive(Debug, Default)]
pub struct StaticIdentities {
    names: HashMap<ids::UserRef, String>,
}

impl StaticIdentities {
    pub fn new(names: HashMap<ids::UserRef, String>) -> Self {
        StaticIdentities { names }
    }
}

#[async_trait::async_trait]
impl Identities for StaticIdentities {
    async fn username(&self, user: &str) -> error::Result<Option<String>> {
        Ok(self.names.get(user).cloned())
    }

    async fn usernames(&self, users: &[ids::UserRef]) -> error::Result<HashMap<ids::UserRef, String>> {
        Ok(users.iter()
            .filter_map(|u| self.names.get(u).map(|n| (u.clone(), n.clone())))
            .collect())
    }
}

#[derive(Debug)]
pub struct PgIdentities {
    pool: Pool,
}

impl PgIdentities {
    pub fn new(pool: Pool) -> Self {
        PgIdentities { pool }
    }
}

#[async_trait::async_trait]
impl Identities for PgIdentities {
    async fn username(&self, user: &str) -> error::Result<Option<String>> {
        let conn = self.pool.get().await?;

        let row = conn.query_opt(
            "select username from users where id = $1",
            &[&user]
        ).await?;

        Ok(row.map(|r| r.get(0)))
    }

    async fn usernames(&self, users: &[ids::UserRef]) -> error::Result<HashMap<ids::UserRef, String>> {
        let conn = self.pool.get().await?;
        let params: sql::ParamsVec = vec![&users];

        let stream = conn.query_raw(
            "select id, username from users where id = any($1)",
            params
        ).await?;

        futures::pin_mut!(stream);

        let mut rtn = HashMap::with_capacity(users.len());

        while let Some(row) = stream.try_next().await? {
            rtn.insert(row.get(0), row.get(1));
        }

        Ok(rtn)
    }
}

/// username lookups rarely change so they are cached for a while
pub struct CachedIdentities {
    inner: Box<dyn Identities>,
    cache: moka::sync::Cache<ids::UserRef, String>,
}

impl CachedIdentities {
    pub fn new(inner: Box<dyn Identities>) -> Self {
        let cache = moka::sync::Cache::builder()
            .name("usernames")
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(60 * 10))
            .build();

        CachedIdentities { inner, cache }
    }
}

impl std::fmt::Debug for CachedIdentities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedIdentities")
            .field("inner", &self.inner)
            .field("cached", &self.cache.entry_count())
            .finish()
    }
}

#[async_trait::async_trait]
impl Identities for CachedIdentities {
    async fn username(&self, user: &str) -> error::Result<Option<String>> {
        if let Some(found) = self.cache.get(user) {
            return Ok(Some(found));
        }

        let found = self.inner.username(user).await?;

        if let Some(name) = &found {
            self.cache.insert(user.to_owned(), name.clone());
        }

        Ok(found)
    }

    async fn usernames(&self, users: &[ids::UserRef]) -> error::Result<HashMap<ids::UserRef, String>> {
        let mut rtn = HashMap::with_capacity(users.len());
        let mut missing = Vec::new();

        for user in users {
            match self.cache.get(user) {
                Some(name) => {
                    rtn.insert(user.clone(), name);
                }
                None => missing.push(user.clone()),
            }
        }

        if !missing.is_empty() {
            for (user, name) in self.inner.usernames(&missing).await? {
                self.cache.insert(user.clone(), name.clone());
                rtn.insert(user, name);
            }
        }

        Ok(rtn)
    }
}

pub fn identities_from_config(
    config: &config::Config,
    pool: Option<&Pool>
) -> error::Result<Arc<dyn Identities>> {
    let inner: Box<dyn Identities> = match config.settings.store.kind {
        config::StoreKind::Memory => Box::new(StaticIdentities::new(
            config.settings.identities.clone()
        )),
        config::StoreKind::Postgres => Box::new(PgIdentities::new(
            pool.context("identity lookups require a database pool")?.clone()
        )),
    };

    Ok(Arc::new(CachedIdentities::new(inner)))
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn memory_object_store() {
        let store = MemoryObjectStore::new();

        store.delete("c1").await.expect("failed to delete");
        store.delete("c1").await.expect("second delete failed");

        assert_eq!(store.deleted(), vec![String::from("c1")]);

        store.set_failing(true);

        let err = store.delete("c2").await.expect_err("delete should fail");

        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn cached_lookups() {
        let names = HashMap::from([
            (String::from("u1"), String::from("alice")),
            (String::from("u2"), String::from("bob")),
        ]);

        let identities = CachedIdentities::new(Box::new(StaticIdentities::new(names)));

        assert_eq!(identities.username("u1").await.expect("lookup failed").as_deref(), Some("alice"));
        assert_eq!(identities.username("nobody").await.expect("lookup failed"), None);

        let found = identities.usernames(&[
            String::from("u1"),
            String::from("u2"),
            String::from("u3"),
        ]).await.expect("lookup failed");

        assert_eq!(found.len(), 2);
        assert_eq!(found.get("u2").map(String::as_str), Some("bob"));
    }
}
