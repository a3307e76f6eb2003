use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::io::ErrorKind as IoErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use crate::error::{self, Context};

mod shape;

pub trait TryDefault: Sized {
    type Error;

    fn try_default() -> Result<Self, Self::Error>;
}

#[derive(Debug, Parser)]
#[command(author, version ,about, long_about = None)]
pub struct CliArgs {
    /// a config file to load settings from. may be given multiple times,
    /// later files override earlier ones
    #[arg(long)]
    config: Vec<PathBuf>
}

#[derive(Debug)]
pub struct Config {
    pub settings: Settings,
}

impl Config {
    pub fn from_args(args: CliArgs) -> error::Result<Self> {
        let cwd = std::env::current_dir()
            .context("failed to retrieve cwd for Settings")?;
        let mut settings = Settings::try_default()?;

        for config_path in args.config {
            let full = if config_path.is_absolute() {
                config_path
            } else {
                normalize(cwd.join(config_path))
            };

            tracing::debug!("loading config file \"{}\"", full.display());

            let loaded = Self::load_file(&full)?;
            let src = SrcFile::new(&full)?;
            let dot = DotPath::new(&"settings");

            settings.merge(&src, dot, loaded)?;
        }

        {
            let meta = metadata(&settings.data).context(
                "failed to retrieve metadata for settings.data"
            )?.context(
                "settings.data does not exist"
            )?;

            if !meta.is_dir() {
                return Err(error::Error::new().context(
                    "settings.data is not a directory"
                ));
            }
        }

        settings.check()?;

        tracing::debug!("{settings:#?}");

        Ok(Config { settings })
    }

    fn load_file(path: &PathBuf) -> error::Result<shape::Settings> {
        let ext = path.extension().context(format!(
            "failed to retrieve the file extension for config file: \"{}\"", path.display()
        ))?;

        let ext = ext.to_ascii_lowercase();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .open(path)
            .context(format!("failed to open config file: \"{}\"", path.display()))?;
        let reader = std::io::BufReader::new(file);

        if ext.eq("yaml") || ext.eq("yml") {
            serde_yaml::from_reader(reader).context(format!(
                "failed to parse yaml config file: \"{}\"", path.display()
            ))
        } else if ext.eq("json") {
            serde_json::from_reader(reader).context(format!(
                "failed to parse json config file: \"{}\"", path.display()
            ))
        } else {
            Err(error::Error::new().context(format!(
                "unknown type of config file: \"{}\"", path.display()
            )))
        }
    }
}

pub fn get_config() -> error::Result<Config> {
    let args = CliArgs::parse();

    Config::from_args(args)
}

struct SrcFile<'a> {
    parent: &'a Path,
    src: &'a Path,
}

impl<'a> SrcFile<'a> {
    fn new(src: &'a Path) -> error::Result<Self> {
        let parent = src.parent().context(format!(
            "failed to retrieve parent path from source file \"{}\"", src.display()
        ))?;

        Ok(SrcFile {
            parent,
            src
        })
    }
}

impl<'a> Display for SrcFile<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\"", self.src.display())
    }
}

struct Quote<'a>(&'a dyn Display);

impl<'a> Display for Quote<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

struct DotPath<'a>(Vec<&'a dyn Display>);

impl<'a> DotPath<'a> {
    fn new(name: &'a (dyn Display)) -> Self {
        DotPath(vec![name])
    }

    fn push(&self, name: &'a (dyn Display)) -> Self {
        let mut path = self.0.clone();
        path.push(name);

        DotPath(path)
    }
}

impl<'a> Display for DotPath<'a> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> std::fmt::Result {
        let mut first = true;

        for name in &self.0 {
            if first {
                write!(fmt, "{name}")?;
                first = false;
            } else {
                write!(fmt, ".{name}")?;
            }
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct Settings {
    pub id: i64,
    pub data: PathBuf,
    pub store: Store,
    pub db: Db,
    pub locks: Locks,
    pub workers: Workers,
    pub sweep: Sweep,
    pub topics: Topics,
    pub relay: Relay,
    pub object_store: ObjectStore,
    pub http: Http,
    pub identities: HashMap<String, String>,
    pub listeners: HashMap<String, Listener>,
}

impl Settings {
    fn merge(&mut self, src: &SrcFile<'_>, dot: DotPath<'_>, settings: shape::Settings) -> error::Result<()> {
        if let Some(id) = settings.id {
            self.id = id;
        }

        if let Some(data) = settings.data {
            self.data = check_path(data, src, dot.push(&"data"))?;
        }

        if let Some(store) = settings.store {
            if let Some(kind) = store.kind {
                self.store.kind = match kind {
                    shape::StoreKind::Memory => StoreKind::Memory,
                    shape::StoreKind::Postgres => StoreKind::Postgres,
                };
            }
        }

        if let Some(db) = settings.db {
            self.db.merge(src, dot.push(&"db"), db)?;
        }

        if let Some(locks) = settings.locks {
            self.locks.merge(src, dot.push(&"locks"), locks)?;
        }

        if let Some(workers) = settings.workers {
            self.workers.merge(src, dot.push(&"workers"), workers)?;
        }

        if let Some(sweep) = settings.sweep {
            self.sweep.merge(src, dot.push(&"sweep"), sweep)?;
        }

        if let Some(topics) = settings.topics {
            if let Some(compression_reply) = topics.compression_reply {
                self.topics.compression_reply = compression_reply;
            }

            if let Some(unzip_reply) = topics.unzip_reply {
                self.topics.unzip_reply = unzip_reply;
            }
        }

        if let Some(relay) = settings.relay {
            let relay_dot = dot.push(&"relay");

            if let Some(compression) = relay.compression {
                self.relay.compression = Some(check_url(compression, src, relay_dot.push(&"compression"))?);
            }

            if let Some(unzip) = relay.unzip {
                self.relay.unzip = Some(check_url(unzip, src, relay_dot.push(&"unzip"))?);
            }
        }

        if let Some(object_store) = settings.object_store {
            if let Some(url) = object_store.url {
                self.object_store.url = Some(check_url(
                    url,
                    src,
                    dot.push(&"object_store").push(&"url")
                )?);
            }
        }

        if let Some(http) = settings.http {
            if let Some(timeout_ms) = http.timeout_ms {
                if timeout_ms == 0 {
                    return Err(error::Error::new().context(format!(
                        "{} must be greater than 0. file: {src}", dot.push(&"http").push(&"timeout_ms")
                    )));
                }

                self.http.timeout = Duration::from_millis(timeout_ms);
            }
        }

        if let Some(identities) = settings.identities {
            self.identities.extend(identities);
        }

        if let Some(listeners) = settings.listeners {
            for (key, listener) in listeners {
                if let Some(found) = self.listeners.get_mut(&key) {
                    found.merge(src, dot.push(&"listeners").push(&Quote(&key)), listener)?;
                } else {
                    let mut default = Listener::default();
                    default.merge(src, dot.push(&"listeners").push(&Quote(&key)), listener)?;

                    self.listeners.insert(key, default);
                }
            }
        }

        Ok(())
    }

    /// rules that span sections, checked once every file is merged
    fn check(&self) -> error::Result<()> {
        if matches!(self.locks.kind, LockKind::Lease) &&
            !matches!(self.store.kind, StoreKind::Postgres) {
            return Err(error::Error::new().context(
                "settings.locks.kind \"lease\" requires settings.store.kind \"postgres\""
            ));
        }

        // outbound calls run while holding locks
        if self.http.timeout >= self.locks.ttl {
            return Err(error::Error::new().context(format!(
                "settings.http.timeout_ms ({}ms) must be less than settings.locks.ttl_ms ({}ms)",
                self.http.timeout.as_millis(),
                self.locks.ttl.as_millis(),
            )));
        }

        Ok(())
    }
}

impl TryDefault for Settings {
    type Error = error::Error;

    fn try_default() -> Result<Self, Self::Error> {
        let cwd = std::env::current_dir()
            .context("failed to retrieve cwd for Settings")?;

        Ok(Settings {
            id: 1,
            data: cwd.join("data"),
            store: Store::default(),
            db: Db::default(),
            locks: Locks::default(),
            workers: Workers::default(),
            sweep: Sweep::default(),
            topics: Topics::default(),
            relay: Relay::default(),
            object_store: ObjectStore::default(),
            http: Http::default(),
            identities: HashMap::new(),
            listeners: HashMap::new(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Postgres,
}

#[derive(Debug)]
pub struct Store {
    pub kind: StoreKind,
}

impl Default for Store {
    fn default() -> Self {
        Store {
            kind: StoreKind::Memory,
        }
    }
}

#[derive(Debug)]
pub struct Db {
    pub user: String,
    pub password: Option<String>,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub pool_size: usize,
    pub setup: bool,
}

impl Db {
    fn merge(&mut self, src: &SrcFile<'_>, dot: DotPath<'_>, db: shape::Db) -> error::Result<()> {
        if let Some(user) = db.user {
            self.user = user;
        }

        if let Some(password) = db.password {
            self.password = Some(password);
        }

        if let Some(host) = db.host {
            self.host = host;
        }

        if let Some(port) = db.port {
            self.port = port;
        }

        if let Some(dbname) = db.dbname {
            self.dbname = dbname;
        }

        if let Some(pool_size) = db.pool_size {
            if pool_size == 0 {
                return Err(error::Error::new().context(format!(
                    "{} must be greater than 0. file: {src}", dot.push(&"pool_size")
                )));
            }

            self.pool_size = pool_size;
        }

        if let Some(setup) = db.setup {
            self.setup = setup;
        }

        Ok(())
    }
}

impl Default for Db {
    fn default() -> Self {
        Db {
            user: "postgres".into(),
            password: None,
            host: "localhost".into(),
            port: 5432,
            dbname: "canopy".into(),
            pool_size: 8,
            setup: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Local,
    Lease,
}

#[derive(Debug)]
pub struct Locks {
    pub kind: LockKind,
    pub timeout: Duration,
    pub ttl: Duration,
    pub poll: Duration,
}

impl Locks {
    fn merge(&mut self, src: &SrcFile<'_>, dot: DotPath<'_>, locks: shape::Locks) -> error::Result<()> {
        if let Some(kind) = locks.kind {
            self.kind = match kind {
                shape::LockKind::Local => LockKind::Local,
                shape::LockKind::Lease => LockKind::Lease,
            };
        }

        if let Some(timeout_ms) = locks.timeout_ms {
            self.timeout = Duration::from_millis(timeout_ms);
        }

        if let Some(ttl_ms) = locks.ttl_ms {
            self.ttl = Duration::from_millis(ttl_ms);
        }

        if let Some(poll_ms) = locks.poll_ms {
            if poll_ms == 0 {
                return Err(error::Error::new().context(format!(
                    "{} must be greater than 0. file: {src}", dot.push(&"poll_ms")
                )));
            }

            self.poll = Duration::from_millis(poll_ms);
        }

        if self.ttl <= self.timeout {
            tracing::warn!(
                "{dot} ttl is not greater than timeout, a lease may expire while a flow still holds it. file: {src}"
            );
        }

        Ok(())
    }
}

impl Default for Locks {
    fn default() -> Self {
        Locks {
            kind: LockKind::Local,
            timeout: Duration::from_secs(10),
            ttl: Duration::from_secs(60),
            poll: Duration::from_millis(50),
        }
    }
}

#[derive(Debug)]
pub struct Workers {
    pub concurrency: usize,
    pub queue: usize,
    pub max_attempts: u32,
    pub retry: Duration,
}

impl Workers {
    fn merge(&mut self, src: &SrcFile<'_>, dot: DotPath<'_>, workers: shape::Workers) -> error::Result<()> {
        if let Some(concurrency) = workers.concurrency {
            if concurrency == 0 {
                return Err(error::Error::new().context(format!(
                    "{} must be greater than 0. file: {src}", dot.push(&"concurrency")
                )));
            }

            self.concurrency = concurrency;
        }

        if let Some(queue) = workers.queue {
            if queue == 0 {
                return Err(error::Error::new().context(format!(
                    "{} must be greater than 0. file: {src}", dot.push(&"queue")
                )));
            }

            self.queue = queue;
        }

        if let Some(max_attempts) = workers.max_attempts {
            if max_attempts == 0 {
                return Err(error::Error::new().context(format!(
                    "{} must be greater than 0. file: {src}", dot.push(&"max_attempts")
                )));
            }

            self.max_attempts = max_attempts;
        }

        if let Some(retry_ms) = workers.retry_ms {
            self.retry = Duration::from_millis(retry_ms);
        }

        Ok(())
    }
}

impl Default for Workers {
    fn default() -> Self {
        Workers {
            concurrency: 16,
            queue: 4096,
            max_attempts: 5,
            retry: Duration::from_millis(500),
        }
    }
}

#[derive(Debug)]
pub struct Sweep {
    pub crontab: String,
    pub batch: i64,
}

impl Sweep {
    fn merge(&mut self, src: &SrcFile<'_>, dot: DotPath<'_>, sweep: shape::Sweep) -> error::Result<()> {
        if let Some(crontab) = sweep.crontab {
            if let Err(err) = cron::Schedule::from_str(&crontab) {
                return Err(error::Error::new().context(format!(
                    "{} invalid: \"{crontab}\" file: {src}", dot.push(&"crontab")
                )).source(err));
            }

            self.crontab = crontab;
        }

        if let Some(batch) = sweep.batch {
            if batch <= 0 {
                return Err(error::Error::new().context(format!(
                    "{} must be greater than 0. file: {src}", dot.push(&"batch")
                )));
            }

            self.batch = batch;
        }

        Ok(())
    }
}

impl Default for Sweep {
    fn default() -> Self {
        Sweep {
            // sec  min   hour   day of month   month   day of week   year
            crontab: "0 */15 * * * * *".into(),
            batch: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Topics {
    pub compression_reply: String,
    pub unzip_reply: String,
}

impl Default for Topics {
    fn default() -> Self {
        Topics {
            compression_reply: "canopy.compression.result".into(),
            unzip_reply: "canopy.unzip.result".into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Relay {
    pub compression: Option<url::Url>,
    pub unzip: Option<url::Url>,
}

#[derive(Debug, Default)]
pub struct ObjectStore {
    pub url: Option<url::Url>,
}

#[derive(Debug)]
pub struct Http {
    pub timeout: Duration,
}

impl Default for Http {
    fn default() -> Self {
        Http {
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug)]
pub struct Listener {
    pub addr: SocketAddr,
}

impl Listener {
    fn merge(&mut self, src: &SrcFile<'_>, dot_path: DotPath<'_>, listener: shape::Listener) -> error::Result<()> {
        self.addr = match SocketAddr::from_str(&listener.addr) {
            Ok(valid) => valid,
            Err(_) => match IpAddr::from_str(&listener.addr) {
                Ok(valid) => SocketAddr::from((valid, 8080)),
                Err(_) => {
                    return Err(error::Error::new().context(format!(
                        "{dot_path}.addr invalid: \"{}\" file: {src}", listener.addr
                    )));
                }
            }
        };

        Ok(())
    }
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            addr: SocketAddr::from((
                IpAddr::from([0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0]),
                8080
            )),
        }
    }
}

fn metadata<P>(path: P) -> Result<Option<std::fs::Metadata>, std::io::Error>
where
    P: AsRef<Path>
{
    match path.as_ref().metadata() {
        Ok(m) => Ok(Some(m)),
        Err(err) => match err.kind() {
            IoErrorKind::NotFound => Ok(None),
            _ => Err(err)
        }
    }
}

fn normalize<P>(path: P) -> PathBuf
where
    P: AsRef<Path>
{
    let mut rtn = PathBuf::new();

    for comp in path.as_ref().components() {
        match comp {
            Component::ParentDir => {
                rtn.pop();
            }
            Component::CurDir => {}
            _ => {
                rtn.push(comp.as_os_str());
            }
        }
    }

    rtn
}

fn check_path(given: PathBuf, src: &SrcFile<'_>, dot: DotPath<'_>) -> error::Result<PathBuf> {
    let full = if given.is_absolute() {
        given
    } else {
        normalize(src.parent.join(given))
    };

    tracing::debug!("{dot} {src} checking {}", full.display());

    let meta = metadata(&full).context(format!(
        "{dot} failed to retrieve metadata for: {src}"
    ))?.context(format!(
        "{dot} {src} was not found"
    ))?;

    if !meta.is_dir() {
        return Err(error::Error::new().context(format!(
            "{dot} is not a directory in: {src}"
        )));
    }

    Ok(full)
}

fn check_url(given: String, src: &SrcFile<'_>, dot: DotPath<'_>) -> error::Result<url::Url> {
    let url = url::Url::parse(given.trim()).context(format!(
        "{dot} \"{given}\" is not a valid url. file: {src}"
    ))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(error::Error::new().context(format!(
            "{dot} \"{given}\" must be an http or https url. file: {src}"
        )));
    }

    Ok(url)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalize_paths() {
        assert_eq!(normalize("/a/b/../c/./d"), PathBuf::from("/a/c/d"));
        assert_eq!(normalize("/a/./b"), PathBuf::from("/a/b"));
    }

    #[test]
    fn merge_sections() {
        let mut settings = Settings::try_default().expect("failed to create default settings");
        let src_path = PathBuf::from("/etc/canopy/config.yaml");
        let src = SrcFile::new(&src_path).expect("failed to create src file");

        let loaded: shape::Settings = serde_yaml::from_str("
store:
  kind: postgres
locks:
  kind: lease
  timeout_ms: 2000
  ttl_ms: 30000
workers:
  concurrency: 4
  queue: 128
sweep:
  batch: 50
relay:
  unzip: http://localhost:9000/unzip
identities:
  u1: alice
listeners:
  main:
    addr: 127.0.0.1:9090
").expect("failed to parse settings");

        settings.merge(&src, DotPath::new(&"settings"), loaded)
            .expect("failed to merge settings");

        assert_eq!(settings.store.kind, StoreKind::Postgres);
        assert_eq!(settings.locks.kind, LockKind::Lease);
        assert_eq!(settings.locks.timeout, Duration::from_secs(2));
        assert_eq!(settings.workers.concurrency, 4);
        assert_eq!(settings.workers.queue, 128);
        assert_eq!(settings.workers.max_attempts, 5);
        assert_eq!(settings.sweep.batch, 50);
        assert!(settings.relay.compression.is_none());
        assert_eq!(settings.relay.unzip.as_ref().map(|u| u.as_str()), Some("http://localhost:9000/unzip"));
        assert_eq!(settings.identities.get("u1").map(String::as_str), Some("alice"));
        assert_eq!(
            settings.listeners.get("main").map(|l| l.addr),
            Some(SocketAddr::from(([127, 0, 0, 1], 9090)))
        );
    }

    #[test]
    fn rejects_bad_values() {
        let mut settings = Settings::try_default().expect("failed to create default settings");
        let src_path = PathBuf::from("/etc/canopy/config.yaml");
        let src = SrcFile::new(&src_path).expect("failed to create src file");

        let loaded: shape::Settings = serde_yaml::from_str("
sweep:
  crontab: not a schedule
").expect("failed to parse settings");

        assert!(settings.merge(&src, DotPath::new(&"settings"), loaded).is_err());

        let loaded: shape::Settings = serde_yaml::from_str("
relay:
  compression: ftp://example.com
").expect("failed to parse settings");

        assert!(settings.merge(&src, DotPath::new(&"settings"), loaded).is_err());
    }

    #[test]
    fn http_timeout_below_lease_ttl() {
        let mut settings = Settings::try_default().expect("failed to create default settings");

        settings.check().expect("defaults should pass");

        let src_path = PathBuf::from("/etc/canopy/config.yaml");
        let src = SrcFile::new(&src_path).expect("failed to create src file");

        let loaded: shape::Settings = serde_yaml::from_str("
locks:
  ttl_ms: 5000
http:
  timeout_ms: 5000
").expect("failed to parse settings");

        settings.merge(&src, DotPath::new(&"settings"), loaded)
            .expect("failed to merge settings");

        assert_eq!(settings.http.timeout, Duration::from_secs(5));
        assert!(settings.check().is_err());

        settings.http.timeout = Duration::from_secs(4);

        settings.check().expect("shorter timeout should pass");
    }
}
