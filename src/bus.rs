//! in-process message transport. handlers may see a message more than
//! once, every handler re-reads current state before acting

use std::sync::Arc;
use std::time::Duration;

use canopy_api::messages::{
    ChangeNotification,
    CompressionRequest,
    CompressionResult,
    FileDeleted,
    GalleryLinkRequest,
    SizeRecalc,
    UnzipRequest,
    UnzipResult,
};
use canopy_lib::ids;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tracing::Instrument;

use crate::collection;
use crate::config;
use crate::error;
use crate::reconcile;
use crate::saga;
use crate::state::{ArcShared, Shared};

pub mod relay;

/// batch membership transfer handed off by `collection::add_files`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddFiles {
    pub collection: ids::CollectionKey,
    pub files: Vec<ids::NodeKey>,
    pub requester: ids::UserRef,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Change(ChangeNotification),
    CompressionRequest(CompressionRequest),
    CompressionResult(CompressionResult),
    UnzipRequest(UnzipRequest),
    UnzipResult(UnzipResult),
    GalleryLink(GalleryLinkRequest),
    FileDeleted(FileDeleted),
    SizeRecalc(SizeRecalc),
    AddFiles(AddFiles),
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Message::Change(_) => "change",
            Message::CompressionRequest(_) => "compression_request",
            Message::CompressionResult(_) => "compression_result",
            Message::UnzipRequest(_) => "unzip_request",
            Message::UnzipResult(_) => "unzip_result",
            Message::GalleryLink(_) => "gallery_link",
            Message::FileDeleted(_) => "file_deleted",
            Message::SizeRecalc(_) => "size_recalc",
            Message::AddFiles(_) => "add_files",
        }
    }

    /// messages that leave the process through the relay
    pub fn is_outbound(&self) -> bool {
        matches!(self, Message::CompressionRequest(_) | Message::UnzipRequest(_))
    }

    pub fn size_recalc(directory_key: &str) -> Self {
        Message::SizeRecalc(SizeRecalc {
            directory_key: directory_key.to_owned(),
        })
    }
}

pub trait Publisher: std::fmt::Debug + Send + Sync {
    /// hands the message off without waiting for it to be handled
    fn publish(&self, msg: Message) -> error::Result<()>;
}

#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<Message>,
}

pub fn channel(capacity: usize) -> (ChannelPublisher, mpsc::Receiver<Message>) {
    let (tx, rx) = mpsc::channel(capacity);

    (ChannelPublisher { tx }, rx)
}

impl Publisher for ChannelPublisher {
    /// a full queue is reported as transient so the caller backs off
    fn publish(&self, msg: Message) -> error::Result<()> {
        tracing::trace!("publishing {}", msg.name());

        self.tx.try_send(msg).map_err(|err| match err {
            TrySendError::Full(msg) => error::Error::transient(format!(
                "message queue full, {} not published", msg.name()
            )),
            TrySendError::Closed(_) => error::Error::transient("message channel closed"),
        })
    }
}

/// holds messages until a test drains them
#[cfg(test)]
#[derive(Debug, Default)]
pub struct QueuePublisher {
    queue: parking_lot::Mutex<std::collections::VecDeque<Message>>,
}

#[cfg(test)]
impl QueuePublisher {
    pub fn pop(&self) -> Option<Message> {
        self.queue.lock().pop_front()
    }

    pub fn pending(&self) -> Vec<Message> {
        self.queue.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}

#[cfg(test)]
impl Publisher for QueuePublisher {
    fn publish(&self, msg: Message) -> error::Result<()> {
        self.queue.lock().push_back(msg);

        Ok(())
    }
}

pub async fn handle(state: &Shared, msg: &Message) -> error::Result<()> {
    match msg {
        Message::Change(notify) => reconcile::change::handle(state, notify).await,
        Message::CompressionRequest(_) |
        Message::UnzipRequest(_) => state.relay().send(msg).await,
        Message::CompressionResult(result) => reconcile::thumbnail::attach(state, result).await,
        Message::UnzipResult(result) => saga::zip::finish_import(state, result)
            .await
            .map(|_| ()),
        Message::GalleryLink(request) => reconcile::gallery::link(state, request).await,
        Message::FileDeleted(deleted) => reconcile::gallery::unlink(state, deleted).await,
        Message::SizeRecalc(signal) => reconcile::size::recalculate(state, signal).await,
        Message::AddFiles(task) => collection::apply_add_files(state, task).await,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Redelivery {
    pub max_attempts: u32,
    pub retry: Duration,
}

impl From<&config::Workers> for Redelivery {
    fn from(workers: &config::Workers) -> Self {
        Redelivery {
            max_attempts: workers.max_attempts,
            retry: workers.retry,
        }
    }
}

/// handles the message, retrying transient failures with a linear back
/// off. returns false when the message was dropped
pub async fn deliver(state: &Shared, msg: &Message, redelivery: Redelivery) -> bool {
    let mut attempt = 1;

    loop {
        match handle(state, msg).await {
            Ok(()) => return true,
            Err(err) => {
                if err.is_retryable() && attempt < redelivery.max_attempts {
                    tracing::warn!(
                        kind = msg.name(),
                        attempt,
                        "message failed, redelivering: {err}"
                    );

                    tokio::time::sleep(redelivery.retry * attempt).await;

                    attempt += 1;
                } else {
                    tracing::error!(
                        kind = msg.name(),
                        attempt,
                        "message dropped: {err}"
                    );

                    return false;
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    state: ArcShared,
    rx: mpsc::Receiver<Message>,
    permits: Arc<Semaphore>,
    redelivery: Redelivery,
}

impl Dispatcher {
    pub fn new(
        state: &ArcShared,
        rx: mpsc::Receiver<Message>,
        workers: &config::Workers
    ) -> Self {
        Dispatcher {
            state: Arc::clone(state),
            rx,
            permits: Arc::new(Semaphore::new(workers.concurrency)),
            redelivery: workers.into(),
        }
    }

    pub async fn run(mut self) {
        tracing::info!("message dispatcher started");

        while let Some(msg) = self.rx.recv().await {
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };

            let state = Arc::clone(&self.state);
            let redelivery = self.redelivery;
            let span = tracing::span!(
                tracing::Level::INFO,
                "message",
                kind = msg.name()
            );

            tokio::spawn(async move {
                deliver(&state, &msg, redelivery).await;

                drop(permit);
            }.instrument(span));
        }

        tracing::info!("message dispatcher stopped");
    }
}
