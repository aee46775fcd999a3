pub mod auth;
pub mod error;
pub mod job;
pub mod scheduled;
pub mod synced;
pub mod task;
pub mod webhook;

use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::ConnectOptions;
use tracing::info;

pub use auth::{AuthToken, TokenKind};
pub use error::{StoreError, StoreResult};
pub use job::{Job, JobLite, JobStatus, JobUpdate, MessageStatus, NewJob};
pub use scheduled::{ScheduledTask, ScheduledTaskStatus, ScheduledTaskUpdate};
pub use synced::SyncedObject;
pub use task::{Task, TaskStatus, TaskUpdate};
pub use webhook::{EventStatus, NewWebhookEvent, WebhookEvent};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Handle over the Postgres-backed durable state. Cheap to clone; all
/// operations borrow a connection from the pool and multi-row mutations
/// run inside explicit transactions, locking tasks before their job.
#[derive(Clone, Debug)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect to Postgres and replay pending migrations.
    pub async fn open(dsn: &str) -> StoreResult<Self> {
        Self::open_with(dsn, false).await
    }

    /// Like [`Store::open`], optionally echoing every statement at debug
    /// level (`QUERY_LOGGING`).
    pub async fn open_with(dsn: &str, query_logging: bool) -> StoreResult<Self> {
        let mut options = PgConnectOptions::from_str(dsn)?;
        options = if query_logging {
            options.log_statements(log::LevelFilter::Debug)
        } else {
            options.log_statements(log::LevelFilter::Off)
        };
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await?;
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StoreError::Sqlx(sqlx::Error::Migrate(Box::new(e))))?;
        info!("store ready, migrations applied");
        Ok(Self { pool })
    }

    /// Wrap an existing pool; used by tests that manage their own schema.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
