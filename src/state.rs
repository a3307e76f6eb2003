use std::sync::Arc;

use deadpool_postgres::Pool;

use crate::bus::{self, relay::Relay, Publisher};
use crate::config;
use crate::error;
use crate::external::{self, Identities, ObjectStore};
use crate::lock::Locks;
use crate::store::{self, ArcStore, Store};

#[derive(Debug)]
pub struct Shared {
    store: ArcStore,
    locks: Locks,
    publisher: Arc<dyn Publisher>,
    relay: Arc<dyn Relay>,
    objects: Arc<dyn ObjectStore>,
    identities: Arc<dyn Identities>,
    topics: config::Topics,
}

pub type ArcShared = Arc<Shared>;

impl Shared {
    pub fn from_config(
        config: &config::Config,
        pool: Option<&Pool>,
        publisher: bus::ChannelPublisher,
    ) -> error::Result<Shared> {
        tracing::debug!("creating Shared state");

        let client = reqwest::Client::builder()
            .user_agent(concat!("canopy/", env!("CARGO_PKG_VERSION")))
            .timeout(config.settings.http.timeout)
            .build()?;

        Ok(Shared {
            store: store::from_config(config, pool)?,
            locks: Locks::from_config(config, pool)?,
            publisher: Arc::new(publisher),
            relay: bus::relay::from_config(config, &client),
            objects: external::object_store_from_config(config, &client),
            identities: external::identities_from_config(config, pool)?,
            topics: config.settings.topics.clone(),
        })
    }

    pub fn builder(store: ArcStore, locks: Locks, publisher: Arc<dyn Publisher>) -> Builder {
        Builder {
            store,
            locks,
            publisher,
            relay: None,
            objects: None,
            identities: None,
            topics: None,
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn locks(&self) -> &Locks {
        &self.locks
    }

    pub fn publisher(&self) -> &dyn Publisher {
        self.publisher.as_ref()
    }

    pub fn relay(&self) -> &dyn Relay {
        self.relay.as_ref()
    }

    pub fn objects(&self) -> &dyn ObjectStore {
        self.objects.as_ref()
    }

    pub fn identities(&self) -> &dyn Identities {
        self.identities.as_ref()
    }

    pub fn topics(&self) -> &config::Topics {
        &self.topics
    }

    pub fn publish(&self, msg: bus::Message) -> error::Result<()> {
        self.publisher.publish(msg)
    }
}

/// assembles state from explicit parts. anything not given falls back to
/// the in-memory collaborator
pub struct Builder {
    store: ArcStore,
    locks: Locks,
    publisher: Arc<dyn Publisher>,
    relay: Option<Arc<dyn Relay>>,
    objects: Option<Arc<dyn ObjectStore>>,
    identities: Option<Arc<dyn Identities>>,
    topics: Option<config::Topics>,
}

impl Builder {
    pub fn relay(mut self, relay: Arc<dyn Relay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn objects(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    pub fn identities(mut self, identities: Arc<dyn Identities>) -> Self {
        self.identities = Some(identities);
        self
    }

    pub fn topics(mut self, topics: config::Topics) -> Self {
        self.topics = Some(topics);
        self
    }

    pub fn build(self) -> Shared {
        Shared {
            store: self.store,
            locks: self.locks,
            publisher: self.publisher,
            relay: self.relay.unwrap_or_else(|| Arc::new(bus::relay::MemoryRelay::new())),
            objects: self.objects.unwrap_or_else(|| Arc::new(external::MemoryObjectStore::new())),
            identities: self.identities.unwrap_or_else(|| Arc::new(external::StaticIdentities::default())),
            topics: self.topics.unwrap_or_default(),
        }
    }
}
