use crate::error::StoreResult;
use crate::kernel::Store;
use crate::kernel::exec;
use crate::kernel::q;
use crate::lease::LeasedTable;
use crate::model::cluster::Cluster;
use crate::model::cluster::ClusterFilter;
use crate::model::cluster::NewCluster;
use crate::model::common::bool_col;
use crate::model::common::json_col;
use crate::model::common::to_json;
use serde_json::Value;
use sqlx::Row;
use sqlx::any::AnyRow;

const SELECT: &str = r#"
SELECT ID AS "ID", Provider AS "Provider", Provisioner AS "Provisioner",
       ProviderMetadataJson AS "ProviderMetadataJson", ProvisionerMetadataJson AS "ProvisionerMetadataJson",
       State AS "State", AllowInstallations AS "AllowInstallations", APISecurityLock AS "APISecurityLock",
       CreateAt AS "CreateAt", DeleteAt AS "DeleteAt", LockAcquiredAt AS "LockAcquiredAt",
       LockAcquiredBy AS "LockAcquiredBy"
FROM Cluster
"#;

fn from_row(row: &AnyRow) -> StoreResult<Cluster> {
    Ok(Cluster {
        id: row.try_get("ID").map_err(|e| err("cluster.from_row", e))?,
        provider: row
            .try_get("Provider")
            .map_err(|e| err("cluster.from_row", e))?,
        provisioner: row
            .try_get("Provisioner")
            .map_err(|e| err("cluster.from_row", e))?,
        provider_metadata: json_col(row, "ProviderMetadataJson")
            .map_err(|e| err("cluster.from_row", e))?,
        provisioner_metadata: json_col(row, "ProvisionerMetadataJson")
            .map_err(|e| err("cluster.from_row", e))?,
        state: row
            .try_get("State")
            .map_err(|e| err("cluster.from_row", e))?,
        allow_installations: bool_col(row, "AllowInstallations")
            .map_err(|e| err("cluster.from_row", e))?,
        api_security_lock: bool_col(row, "APISecurityLock")
            .map_err(|e| err("cluster.from_row", e))?,
        create_at: row
            .try_get("CreateAt")
            .map_err(|e| err("cluster.from_row", e))?,
        delete_at: row
            .try_get("DeleteAt")
            .map_err(|e| err("cluster.from_row", e))?,
        lock_acquired_at: row
            .try_get("LockAcquiredAt")
            .map_err(|e| err("cluster.from_row", e))?,
        lock_acquired_by: row
            .try_get("LockAcquiredBy")
            .map_err(|e| err("cluster.from_row", e))?,
    })
}

fn err(operation: &'static str, source: sqlx::Error) -> crate::error::StoreError {
    crate::error::StoreError::from_driver(operation, source)
}

impl Store {
    pub async fn create_cluster(&self, new: NewCluster) -> StoreResult<Cluster> {
        let now = self.now_ms();
        let provider_metadata_json = new
            .provider_metadata_json
            .as_ref()
            .map(to_json)
            .transpose()
            .map_err(|e| crate::error::StoreError::Constraint {
                message: e.to_string(),
            })?;
        let provisioner_metadata_json = new
            .provisioner_metadata_json
            .as_ref()
            .map(to_json)
            .transpose()
            .map_err(|e| crate::error::StoreError::Constraint {
                message: e.to_string(),
            })?;
        let __sql = q(
            self.dialect,
            r#"
INSERT INTO Cluster (
    ID, Provider, Provisioner, ProviderMetadataJson, ProvisionerMetadataJson, State,
    AllowInstallations, APISecurityLock, CreateAt, DeleteAt, LockAcquiredAt, LockAcquiredBy
) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, 0, 0, NULL)
            "#,
        );
        let query = sqlx::query(&__sql)
            .bind(&new.id)
            .bind(&new.provider)
            .bind(&new.provisioner)
            .bind(provider_metadata_json)
            .bind(provisioner_metadata_json)
            .bind(&new.state)
            .bind(i64::from(new.allow_installations))
            .bind(now);
        exec(&self.pool, "cluster.create", query).await?;
        self.get_cluster(&new.id)
            .await?
            .ok_or_else(|| crate::error::StoreError::Io {
                operation: "cluster.create.reload",
                source: sqlx::Error::RowNotFound,
            })
    }

    pub async fn get_cluster(&self, id: &str) -> StoreResult<Option<Cluster>> {
        let __sql = q(self.dialect, &format!("{SELECT} WHERE ID = ?"));
        let row = sqlx::query(&__sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| err("cluster.get", e))?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn list_clusters(&self, filter: &ClusterFilter) -> StoreResult<Vec<Cluster>> {
        let Some(limit_offset) = filter.paging.limit_offset() else {
            return Ok(Vec::new());
        };
        let mut sql = SELECT.to_string();
        let mut clauses = Vec::new();
        if !filter.paging.include_deleted {
            clauses.push("DeleteAt = 0".to_string());
        }
        if let Some(ids) = &filter.ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            clauses.push(format!("ID IN ({placeholders})"));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY CreateAt ASC");
        if limit_offset.is_some() {
            sql.push_str(" LIMIT ? OFFSET ?");
        }
        let __sql = q(self.dialect, &sql);
        let mut query = sqlx::query(&__sql);
        if let Some(ids) = &filter.ids {
            for id in ids {
                query = query.bind(id);
            }
        }
        if let Some((limit, offset)) = limit_offset {
            query = query.bind(limit).bind(offset);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| err("cluster.list", e))?;
        rows.iter().map(from_row).collect()
    }

    /// Updates mutable cluster attributes. Never touches `State` or the
    /// lease columns (spec §4.4 "Update ... never touches the lock
    /// fields"); use [`Store::update_cluster_state`] for state transitions.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_cluster(
        &self,
        id: &str,
        provider: &str,
        provisioner: &str,
        provider_metadata_json: Option<&Value>,
        provisioner_metadata_json: Option<&Value>,
        allow_installations: bool,
        api_security_lock: bool,
    ) -> StoreResult<()> {
        let provider_metadata_json =
            provider_metadata_json
                .map(to_json)
                .transpose()
                .map_err(|e| crate::error::StoreError::Constraint {
                    message: e.to_string(),
                })?;
        let provisioner_metadata_json = provisioner_metadata_json
            .map(to_json)
            .transpose()
            .map_err(|e| crate::error::StoreError::Constraint {
                message: e.to_string(),
            })?;
        let __sql = q(
            self.dialect,
            r#"
UPDATE Cluster
SET Provider = ?, Provisioner = ?, ProviderMetadataJson = ?, ProvisionerMetadataJson = ?,
    AllowInstallations = ?, APISecurityLock = ?
WHERE ID = ?
            "#,
        );
        let query = sqlx::query(&__sql)
            .bind(provider)
            .bind(provisioner)
            .bind(provider_metadata_json)
            .bind(provisioner_metadata_json)
            .bind(i64::from(allow_installations))
            .bind(i64::from(api_security_lock))
            .bind(id);
        exec(&self.pool, "cluster.update", query).await?;
        Ok(())
    }

    /// Writes only the `State` column, ignoring every other field (spec
    /// §4.4 "UpdateState writes only the state column").
    pub async fn update_cluster_state(&self, id: &str, state: &str) -> StoreResult<()> {
        let __sql = q(self.dialect, "UPDATE Cluster SET State = ? WHERE ID = ?");
        let query = sqlx::query(&__sql).bind(state).bind(id);
        exec(&self.pool, "cluster.update_state", query).await?;
        tracing::info!(id, state, "cluster state updated");
        Ok(())
    }

    /// Soft-deletes a cluster. Idempotent: re-deleting an already-deleted
    /// cluster never moves `DeleteAt` (spec §4.4, §8).
    pub async fn delete_cluster(&self, id: &str) -> StoreResult<()> {
        let now = self.now_ms();
        let __sql = q(
            self.dialect,
            "UPDATE Cluster SET DeleteAt = ? WHERE ID = ? AND DeleteAt = 0",
        );
        let query = sqlx::query(&__sql).bind(now).bind(id);
        exec(&self.pool, "cluster.delete", query).await?;
        Ok(())
    }

    pub async fn lock_cluster(&self, id: &str, locker: &str) -> StoreResult<bool> {
        self.acquire_lease(LeasedTable::Cluster, &[id], locker)
            .await
    }

    pub async fn unlock_cluster(&self, id: &str, locker: &str, force: bool) -> StoreResult<bool> {
        self.release_lease(LeasedTable::Cluster, &[id], locker, force)
            .await
    }

    /// Pending-Work Scanner (spec §4.7): free clusters whose state is
    /// actionable, ordered by state text rather than creation time — the
    /// one kind-specific exception the spec calls out.
    pub async fn get_unlocked_cluster_pending_work(&self) -> StoreResult<Vec<Cluster>> {
        let placeholders = crate::model::cluster::PENDING_STATES
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "{SELECT} WHERE DeleteAt = 0 AND LockAcquiredAt = 0 AND State IN ({placeholders}) ORDER BY State ASC"
        );
        let __sql = q(self.dialect, &sql);
        let mut query = sqlx::query(&__sql);
        for state in crate::model::cluster::PENDING_STATES {
            query = query.bind(*state);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| err("cluster.pending_work", e))?;
        rows.iter().map(from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paging::Paging;
    use crate::test_support::test_store;

    fn new_cluster(id: &str) -> NewCluster {
        NewCluster {
            id: id.to_string(),
            provider: "aws".into(),
            provisioner: "kops".into(),
            provider_metadata_json: None,
            provisioner_metadata_json: None,
            state: "creation-requested".into(),
            allow_installations: true,
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = test_store().await;
        let created = store.create_cluster(new_cluster("c1")).await.unwrap();
        let fetched = store.get_cluster("c1").await.unwrap().unwrap();
        assert_eq!(created, fetched);
        assert_eq!(fetched.state, "creation-requested");
        assert_eq!(fetched.delete_at, 0);
    }

    #[tokio::test]
    async fn get_missing_returns_none_without_error() {
        let store = test_store().await;
        assert!(store.get_cluster("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = test_store().await;
        store.create_cluster(new_cluster("c2")).await.unwrap();
        store.delete_cluster("c2").await.unwrap();
        let first = store.get_cluster("c2").await.unwrap().unwrap().delete_at;
        store.delete_cluster("c2").await.unwrap();
        let second = store.get_cluster("c2").await.unwrap().unwrap().delete_at;
        assert_eq!(first, second);
        assert_ne!(first, 0);
    }

    #[tokio::test]
    async fn listing_excludes_deleted_by_default() {
        let store = test_store().await;
        store.create_cluster(new_cluster("c3")).await.unwrap();
        store.create_cluster(new_cluster("c4")).await.unwrap();
        store.delete_cluster("c4").await.unwrap();

        let live = store
            .list_clusters(&ClusterFilter {
                paging: Paging::all_pages(),
                ids: None,
            })
            .await
            .unwrap();
        assert_eq!(
            live.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            vec!["c3"]
        );

        let all = store
            .list_clusters(&ClusterFilter {
                paging: Paging::all_pages_with_deleted(),
                ids: None,
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn update_state_ignores_other_fields() {
        let store = test_store().await;
        store.create_cluster(new_cluster("c5")).await.unwrap();
        store.update_cluster_state("c5", "stable").await.unwrap();
        let fetched = store.get_cluster("c5").await.unwrap().unwrap();
        assert_eq!(fetched.state, "stable");
        assert_eq!(fetched.provider, "aws");
    }

    #[tokio::test]
    async fn pending_work_scenario_from_spec() {
        let store = test_store().await;
        store.create_cluster(new_cluster("c6")).await.unwrap();

        let pending = store.get_unlocked_cluster_pending_work().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "c6");

        assert!(store.lock_cluster("c6", "worker-1").await.unwrap());
        let pending_after_lock = store.get_unlocked_cluster_pending_work().await.unwrap();
        assert!(pending_after_lock.is_empty());
    }
}
