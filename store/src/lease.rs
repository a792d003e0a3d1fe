//! Lease Manager (spec §4.2): row-level leases keyed by `(table, id,
//! locker)`. The lease is advisory at the storage layer — acquiring it is a
//! protocol obligation supervisors must honor, not a column the database
//! enforces on writes (spec §9 "Advisory locking vs. row locks").

use crate::error::StoreResult;
use crate::kernel::Store;
use crate::kernel::exec;
use crate::kernel::q;
use sqlx::Any;
use sqlx::Transaction;

/// Every table the lease manager can operate on. Using an enum (rather than
/// a bare `&str`) keeps table names out of caller control and lets
/// [`LeasedTable::quoted`] centralize the one reserved-word quoting case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeasedTable {
    Cluster,
    Installation,
    ClusterInstallation,
    Group,
    MultitenantDatabase,
    Subscription,
    BackupMetadata,
}

impl LeasedTable {
    fn name(self) -> &'static str {
        match self {
            LeasedTable::Cluster => "Cluster",
            LeasedTable::Installation => "Installation",
            LeasedTable::ClusterInstallation => "ClusterInstallation",
            LeasedTable::Group => "Group",
            LeasedTable::MultitenantDatabase => "MultitenantDatabase",
            LeasedTable::Subscription => "Subscription",
            LeasedTable::BackupMetadata => "BackupMetadata",
        }
    }

    /// The table reference to splice into a query. `Group` is a reserved
    /// word and its DDL keeps it quoted on both backends (see
    /// `store/group.rs`); every other table's DDL is unquoted, and on
    /// Postgres an unquoted identifier folds to lowercase, so quoting it
    /// here would reference a table that doesn't exist.
    fn quoted(self) -> &'static str {
        match self {
            LeasedTable::Group => "\"Group\"",
            _ => self.name(),
        }
    }
}

impl Store {
    /// Atomically sets `LockAcquiredBy = locker, LockAcquiredAt = now_ms` on
    /// every row in `ids` iff every one of them is currently free. If even
    /// one row is already leased, nothing is mutated and this returns
    /// `false`. All rows that do get leased share one timestamp, so "locked
    /// together" is directly observable (spec §8 "batch lease").
    pub async fn acquire_lease(
        &self,
        table: LeasedTable,
        ids: &[&str],
        locker: &str,
    ) -> StoreResult<bool> {
        if ids.is_empty() {
            return Ok(false);
        }
        let now = self.now_ms();
        let mut tx = self.begin().await?;
        if !self.all_free(&mut tx, table, ids).await? {
            tracing::warn!(
                table = table.name(),
                count = ids.len(),
                locker,
                "lease contention: one or more rows already held"
            );
            return Ok(false);
        }
        let placeholders = std::iter::repeat_n("?", ids.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET LockAcquiredBy = ?, LockAcquiredAt = ? WHERE ID IN ({placeholders})",
            table.quoted(),
        );
        let __sql = q(self.dialect, &sql);
        let mut query = sqlx::query(&__sql).bind(locker).bind(now);
        for id in ids {
            query = query.bind(*id);
        }
        let result = exec(&mut *tx, "lease.acquire", query).await?;
        tx.commit()
            .await
            .map_err(|e| crate::error::StoreError::from_driver("lease.acquire.commit", e))?;
        let acquired = result.rows_affected() == ids.len() as u64;
        if acquired {
            tracing::info!(
                table = table.name(),
                count = ids.len(),
                locker,
                "lease acquired"
            );
        }
        Ok(acquired)
    }

    async fn all_free(
        &self,
        tx: &mut Transaction<'_, Any>,
        table: LeasedTable,
        ids: &[&str],
    ) -> StoreResult<bool> {
        let placeholders = std::iter::repeat_n("?", ids.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE ID IN ({placeholders}) AND LockAcquiredAt != 0",
            table.quoted(),
        );
        let __sql = q(self.dialect, &sql);
        let mut query = sqlx::query_scalar::<_, i64>(&__sql);
        for id in ids {
            query = query.bind(*id);
        }
        let locked_count = query
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| crate::error::StoreError::from_driver("lease.check_free", e))?;
        Ok(locked_count == 0)
    }

    /// Clears the lease fields on `ids`. A non-forced release only succeeds
    /// for rows currently held by `locker`; a forced release succeeds for
    /// any row that is held by anyone, irrespective of `locker` — the
    /// crash-recovery escape hatch an operator uses out-of-band (spec §9).
    pub async fn release_lease(
        &self,
        table: LeasedTable,
        ids: &[&str],
        locker: &str,
        force: bool,
    ) -> StoreResult<bool> {
        if ids.is_empty() {
            return Ok(false);
        }
        let placeholders = std::iter::repeat_n("?", ids.len())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = if force {
            format!(
                "UPDATE {} SET LockAcquiredBy = NULL, LockAcquiredAt = 0 WHERE ID IN ({placeholders}) AND LockAcquiredAt != 0",
                table.quoted(),
            )
        } else {
            format!(
                "UPDATE {} SET LockAcquiredBy = NULL, LockAcquiredAt = 0 WHERE ID IN ({placeholders}) AND LockAcquiredBy = ?",
                table.quoted(),
            )
        };
        let __sql = q(self.dialect, &sql);
        let mut query = sqlx::query(&__sql);
        for id in ids {
            query = query.bind(*id);
        }
        if !force {
            query = query.bind(locker);
        }
        let result = exec(&self.pool, "lease.release", query).await?;
        let released = result.rows_affected() > 0;
        if released && force {
            tracing::warn!(
                table = table.name(),
                count = ids.len(),
                locker,
                "lease force-released"
            );
        } else if released {
            tracing::info!(
                table = table.name(),
                count = ids.len(),
                locker,
                "lease released"
            );
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_store;

    async fn seed_cluster(store: &Store, id: &str) {
        store
            .create_cluster(crate::model::cluster::NewCluster {
                id: id.to_string(),
                provider: "aws".into(),
                provisioner: "kops".into(),
                provider_metadata_json: None,
                provisioner_metadata_json: None,
                state: "creation-requested".into(),
                allow_installations: true,
            })
            .await
            .expect("create cluster");
    }

    #[tokio::test]
    async fn mutual_exclusion_between_two_lockers() {
        let store = test_store().await;
        seed_cluster(&store, "cluster-a").await;

        assert!(
            store
                .acquire_lease(LeasedTable::Cluster, &["cluster-a"], "worker-a")
                .await
                .unwrap()
        );
        assert!(
            !store
                .acquire_lease(LeasedTable::Cluster, &["cluster-a"], "worker-a")
                .await
                .unwrap()
        );
        assert!(
            !store
                .acquire_lease(LeasedTable::Cluster, &["cluster-a"], "worker-b")
                .await
                .unwrap()
        );

        assert!(
            store
                .release_lease(LeasedTable::Cluster, &["cluster-a"], "worker-a", false)
                .await
                .unwrap()
        );
        assert!(
            store
                .acquire_lease(LeasedTable::Cluster, &["cluster-a"], "worker-b")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn forced_release_allows_a_third_party_to_acquire() {
        let store = test_store().await;
        seed_cluster(&store, "cluster-b").await;

        assert!(
            store
                .acquire_lease(LeasedTable::Cluster, &["cluster-b"], "worker-a")
                .await
                .unwrap()
        );
        assert!(
            store
                .release_lease(LeasedTable::Cluster, &["cluster-b"], "worker-b", true)
                .await
                .unwrap()
        );
        assert!(
            store
                .acquire_lease(LeasedTable::Cluster, &["cluster-b"], "worker-c")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn batch_lease_shares_one_timestamp() {
        let store = test_store().await;
        seed_cluster(&store, "cluster-c").await;
        seed_cluster(&store, "cluster-d").await;

        assert!(
            store
                .acquire_lease(
                    LeasedTable::Cluster,
                    &["cluster-c", "cluster-d"],
                    "worker-a"
                )
                .await
                .unwrap()
        );
        let c = store.get_cluster("cluster-c").await.unwrap().unwrap();
        let d = store.get_cluster("cluster-d").await.unwrap().unwrap();
        assert_eq!(c.lock_acquired_at, d.lock_acquired_at);
        assert_ne!(c.lock_acquired_at, 0);
    }

    #[tokio::test]
    async fn partial_contention_leaves_every_row_untouched() {
        let store = test_store().await;
        seed_cluster(&store, "cluster-e").await;
        seed_cluster(&store, "cluster-f").await;
        assert!(
            store
                .acquire_lease(LeasedTable::Cluster, &["cluster-f"], "worker-a")
                .await
                .unwrap()
        );

        assert!(
            !store
                .acquire_lease(
                    LeasedTable::Cluster,
                    &["cluster-e", "cluster-f"],
                    "worker-b"
                )
                .await
                .unwrap()
        );
        let e = store.get_cluster("cluster-e").await.unwrap().unwrap();
        assert_eq!(e.lock_acquired_at, 0);
    }
}
