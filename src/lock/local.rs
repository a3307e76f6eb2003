use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Held, LockError};

type Table = DashMap<String, Arc<Mutex<()>>>;

/// per key mutexes for a single process
#[derive(Debug)]
pub struct LocalLocks {
    table: Arc<Table>,
    timeout: Duration,
}

impl LocalLocks {
    pub fn new(timeout: Duration) -> Self {
        LocalLocks {
            table: Arc::new(DashMap::new()),
            timeout,
        }
    }

    pub(crate) async fn acquire(&self, key: String) -> Result<Held, LockError> {
        let mutex = self.table.entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let Ok(guard) = tokio::time::timeout(self.timeout, mutex.lock_owned()).await else {
            remove_idle(&self.table, &key);

            return Err(LockError::Timeout(key));
        };

        Ok(Held::Local(LocalHeld {
            key,
            guard,
            table: Arc::clone(&self.table),
        }))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.table.len()
    }
}

#[derive(Debug)]
pub struct LocalHeld {
    key: String,
    guard: OwnedMutexGuard<()>,
    table: Arc<Table>,
}

impl LocalHeld {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn release(self) {
        let LocalHeld { key, guard, table } = self;

        drop(guard);

        remove_idle(&table, &key);
    }
}

/// drops the entry when the table holds the only reference. waiters keep a
/// clone of the mutex so their entry stays
fn remove_idle(table: &Table, key: &str) {
    table.remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lock::Locks;

    #[tokio::test]
    async fn serializes_same_key() {
        let locks = Arc::new(Locks::local(Duration::from_millis(50)));

        let mut first = locks.acquire("file:a").await.expect("failed to acquire");

        let result = locks.acquire("file:a").await;

        assert!(matches!(
            result.map_err(|e| e.error_kind()),
            Err(canopy_api::ErrorKind::Transient)
        ));

        let mut other = locks.acquire("file:b").await.expect("different key blocked");

        other.release().await;
        first.release().await;

        let mut second = locks.acquire("file:a").await.expect("failed after release");
        second.release().await;
    }

    #[tokio::test]
    async fn waiter_gets_lock_after_release() {
        let locks = Arc::new(Locks::local(Duration::from_secs(5)));

        let mut first = locks.acquire("folder:a").await.expect("failed to acquire");

        let waiting = {
            let locks = Arc::clone(&locks);

            tokio::spawn(async move {
                let mut handle = locks.acquire("folder:a").await?;
                handle.release().await;

                Ok::<(), crate::error::Error>(())
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;

        first.release().await;

        waiting.await
            .expect("waiting task panicked")
            .expect("waiter failed to acquire");
    }

    #[tokio::test]
    async fn idle_entries_removed() {
        let locks = LocalLocks::new(Duration::from_millis(50));

        let held = locks.acquire("file:a".into()).await.expect("failed to acquire");

        assert_eq!(locks.len(), 1);

        match held {
            Held::Local(held) => held.release(),
            Held::Lease(_) => unreachable!(),
        }

        assert_eq!(locks.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn long_holder_is_not_shared() {
        let locks = Arc::new(Locks::local(Duration::from_millis(50)));

        let mut holder = locks.acquire("file:a").await.expect("failed to acquire");

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(120)).await;

            let err = locks.acquire("file:a").await.unwrap_err();

            assert_eq!(err.error_kind(), canopy_api::ErrorKind::Transient);
        }

        assert!(holder.is_held());

        holder.release().await;

        let mut next = locks.acquire("file:a").await.expect("failed after release");
        next.release().await;
    }
}
