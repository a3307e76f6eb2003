use std::time::Duration;

use chrono::Utc;
use deadpool_postgres::{GenericClient, Pool};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{Held, LockError};

/// expiring lease rows shared by every instance using the same database
#[derive(Debug)]
pub struct LeaseLocks {
    pool: Pool,
    timeout: Duration,
    ttl: Duration,
    poll: Duration,
}

impl LeaseLocks {
    pub fn new(pool: Pool, timeout: Duration, ttl: Duration, poll: Duration) -> Self {
        LeaseLocks {
            pool,
            timeout,
            ttl,
            poll,
        }
    }

    pub(crate) async fn acquire(&self, key: String) -> Result<Held, LockError> {
        let token = nanoid::nanoid!();
        let deadline = Instant::now() + self.timeout;
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or(chrono::Duration::seconds(60));

        loop {
            {
                let conn = self.pool.get().await?;

                if try_take(&conn, &key, &token, ttl).await? {
                    tracing::trace!("lease \"{key}\" taken");

                    let renewal = spawn_renewal(
                        self.pool.clone(),
                        key.clone(),
                        token.clone(),
                        ttl,
                        renew_every(self.ttl),
                    );

                    return Ok(Held::Lease(LeaseHeld {
                        key,
                        token,
                        pool: self.pool.clone(),
                        renewal,
                    }));
                }
            }

            if Instant::now() + self.poll > deadline {
                return Err(LockError::Timeout(key));
            }

            tokio::time::sleep(self.poll).await;
        }
    }
}

/// inserts a new lease or steals one that has already expired
async fn try_take(
    conn: &impl GenericClient,
    key: &str,
    token: &str,
    ttl: chrono::Duration,
) -> Result<bool, tokio_postgres::Error> {
    let now = Utc::now();
    let expires = now + ttl;

    let result = conn.query_opt(
        "\
        insert into resource_locks (key, token, expires) \
        values ($1, $2, $3) \
        on conflict (key) do update \
            set token = excluded.token, \
                expires = excluded.expires \
            where resource_locks.expires < $4 \
        returning token",
        &[&key, &token, &expires, &now]
    ).await?;

    Ok(result.is_some())
}

/// a held lease is pushed forward well before it can expire
fn renew_every(ttl: Duration) -> Duration {
    (ttl / 3).max(Duration::from_millis(10))
}

/// false when the lease no longer carries our token
async fn extend(
    conn: &impl GenericClient,
    key: &str,
    token: &str,
    ttl: chrono::Duration,
) -> Result<bool, tokio_postgres::Error> {
    let expires = Utc::now() + ttl;

    let count = conn.execute(
        "update resource_locks set expires = $3 where key = $1 and token = $2",
        &[&key, &token, &expires]
    ).await?;

    Ok(count > 0)
}

fn spawn_renewal(
    pool: Pool,
    key: String,
    token: String,
    ttl: chrono::Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + every, every);

        loop {
            interval.tick().await;

            let result = match pool.get().await {
                Ok(conn) => extend(&conn, &key, &token, ttl).await.map_err(LockError::from),
                Err(err) => Err(LockError::from(err)),
            };

            match result {
                Ok(true) => tracing::trace!("lease \"{key}\" renewed"),
                Ok(false) => {
                    tracing::error!("lease \"{key}\" was lost while held");

                    return;
                }
                Err(err) => tracing::warn!("failed to renew lease \"{key}\": {err}"),
            }
        }
    })
}

async fn give_back(pool: &Pool, key: &str, token: &str) -> Result<(), LockError> {
    let conn = pool.get().await?;

    let removed = conn.execute(
        "delete from resource_locks where key = $1 and token = $2",
        &[&key, &token]
    ).await?;

    if removed == 0 {
        tracing::warn!("lease \"{key}\" expired before it was released");
    }

    Ok(())
}

#[derive(Debug)]
pub struct LeaseHeld {
    key: String,
    token: String,
    pool: Pool,
    renewal: JoinHandle<()>,
}

impl LeaseHeld {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) async fn release(self) {
        self.renewal.abort();

        if let Err(err) = give_back(&self.pool, &self.key, &self.token).await {
            tracing::warn!("failed to release lease \"{}\": {err}", self.key);
        }
    }

    /// used from drop where awaiting is not possible. without a runtime
    /// the lease is left to expire
    pub(crate) fn release_detached(self) {
        self.renewal.abort();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(self.release());
            }
            Err(_) => {
                tracing::warn!("no runtime to release lease \"{}\". waiting for expiry", self.key);
            }
        }
    }
}
