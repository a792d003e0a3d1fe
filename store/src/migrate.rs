//! Schema Migrator (spec §4.3): an ordered, linear migration chain whose
//! current position is recorded in the `System` key/value table. Runs once
//! at process start, before any other component touches the store.

use crate::dialect::Dialect;
use crate::error::StoreError;
use crate::error::StoreResult;
use crate::kernel::Store;
use futures::future::BoxFuture;
use sqlx::Any;
use sqlx::Transaction;

pub const DATABASE_VERSION_KEY: &str = "DatabaseVersion";

struct MigrationStep {
    from: &'static str,
    to: &'static str,
    run: for<'a> fn(&'a mut Transaction<'_, Any>, Dialect) -> BoxFuture<'a, StoreResult<()>>,
}

const MIGRATIONS: &[MigrationStep] = &[
    MigrationStep {
        from: "",
        to: "0.1.0",
        run: |tx, dialect| Box::pin(migration_0001(tx, dialect)),
    },
    MigrationStep {
        from: "0.1.0",
        to: "0.2.0",
        run: |tx, dialect| Box::pin(migration_0002(tx, dialect)),
    },
];

impl Store {
    /// Applies every pending migration in order, starting from whatever
    /// version the `System` table currently records (or an empty version if
    /// the table does not exist yet). Returns the number of steps applied;
    /// `0` means the store was already at the latest version.
    pub async fn migrate(&self) -> StoreResult<usize> {
        let mut current = self.current_schema_version().await?;
        let mut applied = 0;
        while let Some(step) = MIGRATIONS.iter().find(|m| m.from == current) {
            let mut tx = self.begin().await?;
            (step.run)(&mut tx, self.dialect)
                .await
                .map_err(|e| match e {
                    StoreError::Io { source, .. } => StoreError::Migration {
                        from: step.from.to_string(),
                        to: step.to.to_string(),
                        source,
                    },
                    other => other,
                })?;
            set_schema_version(&mut tx, self.dialect, step.to).await?;
            tx.commit()
                .await
                .map_err(|e| StoreError::from_driver("migrate.commit", e))?;
            tracing::info!(from = step.from, to = step.to, "applied schema migration");
            current = step.to.to_string();
            applied += 1;
        }
        Ok(applied)
    }

    /// Probes whether the `System` table exists; if not, the store is
    /// treated as being at an empty version (spec §4.3).
    async fn current_schema_version(&self) -> StoreResult<String> {
        let quoted = self.dialect.quote_ident("System");
        let sql = crate::kernel::q(
            self.dialect,
            &format!("SELECT Value AS \"Value\" FROM {quoted} WHERE Key = ?"),
        );
        match sqlx::query_scalar::<_, String>(&sql)
            .bind(DATABASE_VERSION_KEY)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(value) => Ok(value.unwrap_or_default()),
            Err(err) => {
                let message = err.to_string().to_lowercase();
                if message.contains("no such table") || message.contains("does not exist") {
                    Ok(String::new())
                } else {
                    Err(StoreError::from_driver("migrate.probe_version", err))
                }
            }
        }
    }
}

async fn set_schema_version(
    tx: &mut Transaction<'_, Any>,
    dialect: Dialect,
    version: &str,
) -> StoreResult<()> {
    let sql = crate::kernel::q(
        dialect,
        r#"
INSERT INTO "System" (Key, Value) VALUES (?, ?)
ON CONFLICT (Key) DO UPDATE SET Value = excluded.Value
        "#,
    );
    sqlx::query(&sql)
        .bind(DATABASE_VERSION_KEY)
        .bind(version)
        .execute(&mut **tx)
        .await
        .map_err(|e| StoreError::from_driver("migrate.set_version", e))?;
    Ok(())
}

async fn migration_0001(tx: &mut Transaction<'_, Any>, _dialect: Dialect) -> StoreResult<()> {
    let statements = [
        r#"CREATE TABLE IF NOT EXISTS "System" (
            Key TEXT PRIMARY KEY,
            Value TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS Cluster (
            ID TEXT PRIMARY KEY,
            Provider TEXT NOT NULL,
            Provisioner TEXT NOT NULL,
            ProviderMetadataJson TEXT,
            ProvisionerMetadataJson TEXT,
            State TEXT NOT NULL,
            AllowInstallations INTEGER NOT NULL,
            APISecurityLock INTEGER NOT NULL DEFAULT 0,
            CreateAt BIGINT NOT NULL,
            DeleteAt BIGINT NOT NULL DEFAULT 0,
            LockAcquiredAt BIGINT NOT NULL DEFAULT 0,
            LockAcquiredBy TEXT
        )"#,
        r#"CREATE TABLE IF NOT EXISTS Installation (
            ID TEXT PRIMARY KEY,
            Name TEXT UNIQUE,
            OwnerID TEXT NOT NULL,
            Version TEXT NOT NULL,
            Image TEXT NOT NULL,
            Size TEXT NOT NULL,
            Database TEXT NOT NULL,
            Filestore TEXT NOT NULL,
            GroupID TEXT,
            GroupSequence BIGINT,
            SingleTenantDatabaseConfigJson TEXT,
            ExternalDatabaseConfigJson TEXT,
            CRVersion TEXT NOT NULL,
            PriorityEnvJson TEXT,
            State TEXT NOT NULL,
            CreateAt BIGINT NOT NULL,
            DeleteAt BIGINT NOT NULL DEFAULT 0,
            LockAcquiredAt BIGINT NOT NULL DEFAULT 0,
            LockAcquiredBy TEXT
        )"#,
        r#"CREATE TABLE IF NOT EXISTS InstallationDNS (
            ID TEXT PRIMARY KEY,
            InstallationID TEXT NOT NULL,
            DomainName TEXT NOT NULL UNIQUE,
            CreateAt BIGINT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS ClusterInstallation (
            ID TEXT PRIMARY KEY,
            ClusterID TEXT NOT NULL,
            InstallationID TEXT NOT NULL,
            Namespace TEXT NOT NULL,
            State TEXT NOT NULL,
            IsActive INTEGER NOT NULL DEFAULT 0,
            CreateAt BIGINT NOT NULL,
            DeleteAt BIGINT NOT NULL DEFAULT 0,
            LockAcquiredAt BIGINT NOT NULL DEFAULT 0,
            LockAcquiredBy TEXT
        )"#,
        r#"CREATE TABLE IF NOT EXISTS "Group" (
            ID TEXT PRIMARY KEY,
            Name TEXT UNIQUE,
            Version TEXT NOT NULL,
            Image TEXT NOT NULL,
            EnvironmentVariablesJson TEXT,
            Sequence BIGINT NOT NULL DEFAULT 0,
            MaxRolling BIGINT NOT NULL DEFAULT 1,
            APISecurityLock INTEGER NOT NULL DEFAULT 0,
            CreateAt BIGINT NOT NULL,
            DeleteAt BIGINT NOT NULL DEFAULT 0,
            LockAcquiredAt BIGINT NOT NULL DEFAULT 0,
            LockAcquiredBy TEXT
        )"#,
        r#"CREATE TABLE IF NOT EXISTS Annotation (
            ID TEXT PRIMARY KEY,
            Name TEXT NOT NULL UNIQUE
        )"#,
        r#"CREATE TABLE IF NOT EXISTS ClusterAnnotation (
            ClusterID TEXT NOT NULL,
            AnnotationID TEXT NOT NULL,
            UNIQUE (ClusterID, AnnotationID)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS InstallationAnnotation (
            InstallationID TEXT NOT NULL,
            AnnotationID TEXT NOT NULL,
            UNIQUE (InstallationID, AnnotationID)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS GroupAnnotation (
            GroupID TEXT NOT NULL,
            AnnotationID TEXT NOT NULL,
            UNIQUE (GroupID, AnnotationID)
        )"#,
        r#"CREATE TABLE IF NOT EXISTS MultitenantDatabase (
            ID TEXT PRIMARY KEY,
            VpcID TEXT NOT NULL,
            DatabaseType TEXT NOT NULL,
            MaxInstallationsPerLogicalDatabase BIGINT NOT NULL,
            InstallationsJson TEXT NOT NULL DEFAULT '[]',
            CreateAt BIGINT NOT NULL,
            DeleteAt BIGINT NOT NULL DEFAULT 0,
            LockAcquiredAt BIGINT NOT NULL DEFAULT 0,
            LockAcquiredBy TEXT
        )"#,
        r#"CREATE TABLE IF NOT EXISTS LogicalDatabase (
            ID TEXT PRIMARY KEY,
            MultitenantDatabaseID TEXT NOT NULL,
            Name TEXT NOT NULL,
            CreateAt BIGINT NOT NULL,
            DeleteAt BIGINT NOT NULL DEFAULT 0
        )"#,
        r#"CREATE TABLE IF NOT EXISTS DatabaseSchema (
            ID TEXT PRIMARY KEY,
            LogicalDatabaseID TEXT NOT NULL,
            InstallationID TEXT NOT NULL,
            CreateAt BIGINT NOT NULL,
            DeleteAt BIGINT NOT NULL DEFAULT 0
        )"#,
        r#"CREATE TABLE IF NOT EXISTS BackupMetadata (
            ID TEXT PRIMARY KEY,
            InstallationID TEXT NOT NULL,
            State TEXT NOT NULL,
            DataResidence TEXT,
            CreateAt BIGINT NOT NULL,
            StartAt BIGINT NOT NULL DEFAULT 0,
            DeleteAt BIGINT NOT NULL DEFAULT 0,
            LockAcquiredAt BIGINT NOT NULL DEFAULT 0,
            LockAcquiredBy TEXT
        )"#,
        r#"CREATE TABLE IF NOT EXISTS Subscription (
            ID TEXT PRIMARY KEY,
            Name TEXT NOT NULL UNIQUE,
            URL TEXT NOT NULL,
            OwnerID TEXT NOT NULL,
            EventType TEXT NOT NULL,
            HeadersJson TEXT,
            FailureThresholdSeconds BIGINT NOT NULL DEFAULT 0,
            LastDeliveryStatus TEXT NOT NULL DEFAULT 'none',
            LastDeliveryAttemptAt BIGINT NOT NULL DEFAULT 0,
            CreateAt BIGINT NOT NULL,
            DeleteAt BIGINT NOT NULL DEFAULT 0,
            LockAcquiredAt BIGINT NOT NULL DEFAULT 0,
            LockAcquiredBy TEXT
        )"#,
        r#"CREATE TABLE IF NOT EXISTS Webhook (
            ID TEXT PRIMARY KEY,
            OwnerID TEXT NOT NULL,
            URL TEXT NOT NULL,
            HeadersJson TEXT,
            CreateAt BIGINT NOT NULL,
            DeleteAt BIGINT NOT NULL DEFAULT 0
        )"#,
        r#"CREATE TABLE IF NOT EXISTS Event (
            ID TEXT PRIMARY KEY,
            EventType TEXT NOT NULL,
            Timestamp BIGINT NOT NULL,
            ExtraDataJson TEXT
        )"#,
        r#"CREATE TABLE IF NOT EXISTS StateChangeEvent (
            ID TEXT PRIMARY KEY,
            EventID TEXT NOT NULL,
            ResourceID TEXT NOT NULL,
            ResourceType TEXT NOT NULL,
            OldState TEXT NOT NULL,
            NewState TEXT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS EventDelivery (
            ID TEXT PRIMARY KEY,
            EventID TEXT NOT NULL,
            SubscriptionID TEXT NOT NULL,
            Status TEXT NOT NULL,
            Attempts BIGINT NOT NULL DEFAULT 0,
            LastAttempt BIGINT NOT NULL DEFAULT 0,
            CreateAt BIGINT NOT NULL
        )"#,
    ];
    for statement in statements {
        sqlx::query(statement)
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::from_driver("migrate.0001", e))?;
    }
    Ok(())
}

/// Adds the indexes that make the pending-work scanner (spec §4.7) and the
/// event claim path (spec §4.8) cheap; split into its own step so the chain
/// demonstrates genuine forward-only, multi-step progression.
async fn migration_0002(tx: &mut Transaction<'_, Any>, _dialect: Dialect) -> StoreResult<()> {
    let statements = [
        "CREATE INDEX IF NOT EXISTS idx_installation_state_lock ON Installation (State, LockAcquiredAt)",
        "CREATE INDEX IF NOT EXISTS idx_cluster_state_lock ON Cluster (State, LockAcquiredAt)",
        "CREATE INDEX IF NOT EXISTS idx_clusterinstallation_state_lock ON ClusterInstallation (State, LockAcquiredAt)",
        "CREATE INDEX IF NOT EXISTS idx_eventdelivery_subscription_status ON EventDelivery (SubscriptionID, Status)",
        "CREATE INDEX IF NOT EXISTS idx_event_timestamp ON Event (Timestamp)",
    ];
    for statement in statements {
        sqlx::query(statement)
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::from_driver("migrate.0002", e))?;
    }
    Ok(())
}
