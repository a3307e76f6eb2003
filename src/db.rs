use tokio_postgres::{Config, NoTls};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};

use crate::config;
use crate::error::{self, Context};

const SCHEMA: &str = include_str!("../db/setup/postgres/01_schema.sql");

pub fn from_config(config: &config::Config) -> Result<Pool, deadpool_postgres::BuildError> {
    let mut pg_config = Config::new();

    pg_config.user(config.settings.db.user.as_str());

    if let Some(password) = &config.settings.db.password {
        pg_config.password(password.as_str());
    }

    pg_config.host(config.settings.db.host.as_str());
    pg_config.port(config.settings.db.port);
    pg_config.dbname(config.settings.db.dbname.as_str());

    let manager_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let manager = Manager::from_config(pg_config, NoTls, manager_config);

    Pool::builder(manager)
        .max_size(config.settings.db.pool_size)
        .build()
}

/// applies the bundled schema in a single transaction. every statement is
/// written with "if not exists" so running it again is harmless
pub async fn setup(pool: &Pool) -> error::Result<()> {
    let mut conn = pool.get().await?;
    let transaction = conn.transaction().await?;

    for sql in SCHEMA.split(';') {
        let trim = sql.trim();

        if trim.is_empty() {
            continue;
        }

        transaction.execute(trim, &[])
            .await
            .context(format!("failed to apply schema statement:\n{trim}"))?;
    }

    transaction.commit().await?;

    tracing::info!("database schema applied");

    Ok(())
}
