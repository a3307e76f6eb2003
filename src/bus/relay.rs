use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::config;
use crate::error;

use super::Message;

#[async_trait::async_trait]
pub trait Relay: std::fmt::Debug + Send + Sync {
    async fn send(&self, msg: &Message) -> error::Result<()>;
}

/// records outbound messages instead of sending them
#[derive(Debug, Default)]
pub struct MemoryRelay {
    sent: Mutex<Vec<Message>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        MemoryRelay::default()
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }
}

#[async_trait::async_trait]
impl Relay for MemoryRelay {
    async fn send(&self, msg: &Message) -> error::Result<()> {
        self.sent.lock().push(msg.clone());

        Ok(())
    }
}

#[derive(Debug)]
pub struct HttpRelay {
    client: reqwest::Client,
    compression: Option<url::Url>,
    unzip: Option<url::Url>,
    held: MemoryRelay,
}

impl HttpRelay {
    pub fn new(client: reqwest::Client, relay: &config::Relay) -> Self {
        HttpRelay {
            client,
            compression: relay.compression.clone(),
            unzip: relay.unzip.clone(),
            held: MemoryRelay::new(),
        }
    }

    async fn post<B>(&self, url: Option<&url::Url>, msg: &Message, body: &B) -> error::Result<()>
    where
        B: Serialize + Sync
    {
        let Some(url) = url else {
            tracing::warn!("no endpoint configured for {}. holding message", msg.name());

            return self.held.send(msg).await;
        };

        let response = self.client.post(url.clone())
            .json(body)
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            tracing::debug!("relayed {} to {url}", msg.name());

            Ok(())
        } else if status.is_server_error() {
            Err(error::Error::transient(format!(
                "{url} responded with {status} for {}", msg.name()
            )))
        } else {
            Err(error::Error::new().context(format!(
                "{url} rejected {} with {status}", msg.name()
            )))
        }
    }
}

#[async_trait::async_trait]
impl Relay for HttpRelay {
    async fn send(&self, msg: &Message) -> error::Result<()> {
        match msg {
            Message::CompressionRequest(request) => {
                self.post(self.compression.as_ref(), msg, request).await
            }
            Message::UnzipRequest(request) => {
                self.post(self.unzip.as_ref(), msg, request).await
            }
            other => Err(error::Error::new().context(format!(
                "{} is not an outbound message", other.name()
            )))
        }
    }
}

pub fn from_config(config: &config::Config, client: &reqwest::Client) -> Arc<dyn Relay> {
    Arc::new(HttpRelay::new(client.clone(), &config.settings.relay))
}

#[cfg(test)]
mod test {
    use super::*;

    use canopy_api::messages::CompressionRequest;

    #[tokio::test]
    async fn unconfigured_endpoint_holds() {
        let relay = HttpRelay::new(reqwest::Client::new(), &config::Relay::default());
        let msg = Message::CompressionRequest(CompressionRequest {
            identifier: "f1".into(),
            external_content_id: "c1".into(),
            reply_topic: "reply".into(),
        });

        relay.send(&msg).await.expect("failed to hold message");

        assert_eq!(relay.held.sent(), vec![msg]);

        let not_outbound = relay.send(&Message::size_recalc("d1")).await;

        assert!(not_outbound.is_err());
    }
}
