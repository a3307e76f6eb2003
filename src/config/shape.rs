use std::path::PathBuf;
use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize)]
pub struct Store {
    pub kind: Option<StoreKind>,
}

#[derive(Debug, Deserialize)]
pub struct Db {
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
    pub pool_size: Option<usize>,
    pub setup: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    Local,
    Lease,
}

#[derive(Debug, Deserialize)]
pub struct Locks {
    pub kind: Option<LockKind>,
    pub timeout_ms: Option<u64>,
    pub ttl_ms: Option<u64>,
    pub poll_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct Workers {
    pub concurrency: Option<usize>,
    pub queue: Option<usize>,
    pub max_attempts: Option<u32>,
    pub retry_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct Sweep {
    pub crontab: Option<String>,
    pub batch: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct Topics {
    pub compression_reply: Option<String>,
    pub unzip_reply: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Relay {
    pub compression: Option<String>,
    pub unzip: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ObjectStore {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Http {
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct Listener {
    pub addr: String,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub id: Option<i64>,
    pub data: Option<PathBuf>,

    pub store: Option<Store>,
    pub db: Option<Db>,
    pub locks: Option<Locks>,
    pub workers: Option<Workers>,
    pub sweep: Option<Sweep>,
    pub topics: Option<Topics>,
    pub relay: Option<Relay>,
    pub object_store: Option<ObjectStore>,
    pub http: Option<Http>,
    pub identities: Option<HashMap<String, String>>,

    pub listeners: Option<HashMap<String, Listener>>,
}
