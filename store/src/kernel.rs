//! Storage Kernel (spec §4.1): uniform query/exec primitives and the
//! `Store` handle shared by every entity store, the lease manager, the
//! migrator, and the event engine.
//!
//! Both drivers are reached through `sqlx::Any`, and every query in the
//! crate is written against one `?`-style bind placeholder surface; `q()`
//! below rewrites it per-backend before the driver ever sees it, since
//! `sqlx::Any` does not do that translation itself. That collapses the
//! dialect switch the spec calls for down to a handful of genuinely
//! dialect-aware spots ([`crate::dialect::Dialect`]): placeholder syntax,
//! reserved-identifier quoting, and the `FOR UPDATE SKIP LOCKED` claim hint.

use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::dialect::Dialect;
use crate::error::StoreError;
use crate::error::StoreResult;
use sqlx::Any;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use std::sync::Once;

static INSTALL_DRIVERS: Once = Once::new();

/// The shared database handle. Cheap to clone: the pool is reference
/// counted internally, mirroring the teacher's `Arc<sqlx::SqlitePool>`.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: AnyPool,
    pub(crate) dialect: Dialect,
    pub(crate) clock: Clock,
}

impl Store {
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        Self::connect_with_clock(config, Clock::system()).await
    }

    /// Connects with an injectable clock, used by tests that need
    /// deterministic timestamp ordering (spec §9 "Clock").
    pub async fn connect_with_clock(config: &StoreConfig, clock: Clock) -> StoreResult<Self> {
        INSTALL_DRIVERS.call_once(|| {
            sqlx::any::install_default_drivers();
        });
        let dialect = Dialect::from_dsn(&config.dsn).ok_or_else(|| StoreError::Io {
            operation: "connect",
            source: sqlx::Error::Configuration(
                format!("unrecognized store DSN scheme: {}", config.dsn).into(),
            ),
        })?;
        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.dsn)
            .await
            .map_err(|e| StoreError::from_driver("connect", e))?;
        let store = Store {
            pool,
            dialect,
            clock,
        };
        if dialect == Dialect::Sqlite {
            store.apply_sqlite_pragmas(config.busy_timeout_ms).await?;
        }
        Ok(store)
    }

    async fn apply_sqlite_pragmas(&self, busy_timeout_ms: u64) -> StoreResult<()> {
        exec(
            &self.pool,
            "connect.pragma_busy_timeout",
            sqlx::query(&q(
                self.dialect,
                &format!("PRAGMA busy_timeout = {busy_timeout_ms}"),
            )),
        )
        .await?;
        exec(
            &self.pool,
            "connect.pragma_foreign_keys",
            sqlx::query(&q(self.dialect, "PRAGMA foreign_keys = ON")),
        )
        .await?;
        Ok(())
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Opens a transaction. sqlx rolls it back automatically on drop if
    /// `commit()` was never called, giving every non-commit exit path
    /// (including an early `?`) the guaranteed release spec §4.1 requires.
    pub(crate) async fn begin(&self) -> StoreResult<sqlx::Transaction<'static, Any>> {
        self.pool
            .begin()
            .await
            .map_err(|e| StoreError::from_driver("begin_transaction", e))
    }
}

/// Rewrites `sql`'s `?` placeholders for `dialect` before it is handed to
/// `sqlx::query`/`sqlx::query_scalar` (spec §4.1; see
/// [`Dialect::rewrite_placeholders`]). Every query call site in the crate
/// routes through this.
pub(crate) fn q(dialect: Dialect, sql: &str) -> String {
    dialect.rewrite_placeholders(sql)
}

/// Runs a statement against either the pool or an in-progress transaction
/// and classifies any driver error (spec §4.1 "exec").
pub(crate) async fn exec<'e, E>(
    executor: E,
    operation: &'static str,
    query: sqlx::query::Query<'e, Any, sqlx::any::AnyArguments<'e>>,
) -> StoreResult<sqlx::any::AnyQueryResult>
where
    E: sqlx::Executor<'e, Database = Any>,
{
    query
        .execute(executor)
        .await
        .map_err(|e| StoreError::from_driver(operation, e))
}
