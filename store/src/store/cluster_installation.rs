use crate::error::StoreError;
use crate::error::StoreResult;
use crate::kernel::Store;
use crate::kernel::exec;
use crate::kernel::q;
use crate::lease::LeasedTable;
use crate::model::cluster_installation::ClusterInstallation;
use crate::model::cluster_installation::ClusterInstallationFilter;
use crate::model::cluster_installation::NewClusterInstallation;
use crate::model::common::bool_col;
use sqlx::Row;
use sqlx::any::AnyRow;

const SELECT: &str = r#"
SELECT ID AS "ID", ClusterID AS "ClusterID", InstallationID AS "InstallationID",
       Namespace AS "Namespace", State AS "State", IsActive AS "IsActive", CreateAt AS "CreateAt",
       DeleteAt AS "DeleteAt", LockAcquiredAt AS "LockAcquiredAt", LockAcquiredBy AS "LockAcquiredBy"
FROM ClusterInstallation
"#;

fn err(operation: &'static str, source: sqlx::Error) -> StoreError {
    StoreError::from_driver(operation, source)
}

fn from_row(row: &AnyRow) -> StoreResult<ClusterInstallation> {
    Ok(ClusterInstallation {
        id: row
            .try_get("ID")
            .map_err(|e| err("cluster_installation.from_row", e))?,
        cluster_id: row
            .try_get("ClusterID")
            .map_err(|e| err("cluster_installation.from_row", e))?,
        installation_id: row
            .try_get("InstallationID")
            .map_err(|e| err("cluster_installation.from_row", e))?,
        namespace: row
            .try_get("Namespace")
            .map_err(|e| err("cluster_installation.from_row", e))?,
        state: row
            .try_get("State")
            .map_err(|e| err("cluster_installation.from_row", e))?,
        is_active: bool_col(row, "IsActive")
            .map_err(|e| err("cluster_installation.from_row", e))?,
        create_at: row
            .try_get("CreateAt")
            .map_err(|e| err("cluster_installation.from_row", e))?,
        delete_at: row
            .try_get("DeleteAt")
            .map_err(|e| err("cluster_installation.from_row", e))?,
        lock_acquired_at: row
            .try_get("LockAcquiredAt")
            .map_err(|e| err("cluster_installation.from_row", e))?,
        lock_acquired_by: row
            .try_get("LockAcquiredBy")
            .map_err(|e| err("cluster_installation.from_row", e))?,
    })
}

impl Store {
    pub async fn create_cluster_installation(
        &self,
        new: NewClusterInstallation,
    ) -> StoreResult<ClusterInstallation> {
        let now = self.now_ms();
        let __sql = q(
            self.dialect,
            r#"
INSERT INTO ClusterInstallation (
    ID, ClusterID, InstallationID, Namespace, State, IsActive, CreateAt, DeleteAt,
    LockAcquiredAt, LockAcquiredBy
) VALUES (?, ?, ?, ?, ?, 0, ?, 0, 0, NULL)
            "#,
        );
        let query = sqlx::query(&__sql)
            .bind(&new.id)
            .bind(&new.cluster_id)
            .bind(&new.installation_id)
            .bind(&new.namespace)
            .bind(&new.state)
            .bind(now);
        exec(&self.pool, "cluster_installation.create", query).await?;
        self.get_cluster_installation(&new.id)
            .await?
            .ok_or_else(|| StoreError::Io {
                operation: "cluster_installation.create.reload",
                source: sqlx::Error::RowNotFound,
            })
    }

    pub async fn get_cluster_installation(
        &self,
        id: &str,
    ) -> StoreResult<Option<ClusterInstallation>> {
        let __sql = q(self.dialect, &format!("{SELECT} WHERE ID = ?"));
        let row = sqlx::query(&__sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| err("cluster_installation.get", e))?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn list_cluster_installations(
        &self,
        filter: &ClusterInstallationFilter,
    ) -> StoreResult<Vec<ClusterInstallation>> {
        let Some(limit_offset) = filter.paging.limit_offset() else {
            return Ok(Vec::new());
        };
        let mut sql = SELECT.to_string();
        let mut clauses = Vec::new();
        if !filter.paging.include_deleted {
            clauses.push("DeleteAt = 0".to_string());
        }
        if filter.cluster_id.is_some() {
            clauses.push("ClusterID = ?".to_string());
        }
        if filter.installation_id.is_some() {
            clauses.push("InstallationID = ?".to_string());
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
        if let Some(cluster_id) = &filter.cluster_id {
            query = query.bind(cluster_id);
        }
        if let Some(installation_id) = &filter.installation_id {
            query = query.bind(installation_id);
        }
        if let Some((limit, offset)) = limit_offset {
            query = query.bind(limit).bind(offset);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| err("cluster_installation.list", e))?;
        rows.iter().map(from_row).collect()
    }

    pub async fn update_cluster_installation_state(
        &self,
        id: &str,
        state: &str,
    ) -> StoreResult<()> {
        let __sql = q(
            self.dialect,
            "UPDATE ClusterInstallation SET State = ? WHERE ID = ?",
        );
        let query = sqlx::query(&__sql).bind(state).bind(id);
        exec(&self.pool, "cluster_installation.update_state", query).await?;
        tracing::info!(id, state, "cluster installation state updated");
        Ok(())
    }

    /// Marks `id` active and every other `ClusterInstallation` for the same
    /// installation inactive, modeling the DNS switch-over (spec §3).
    pub async fn set_active_cluster_installation(
        &self,
        installation_id: &str,
        id: &str,
    ) -> StoreResult<()> {
        let mut tx = self.begin().await?;
        exec(
            &mut *tx,
            "cluster_installation.deactivate_others",
            sqlx::query(&q(
                self.dialect,
                "UPDATE ClusterInstallation SET IsActive = 0 WHERE InstallationID = ?",
            ))
            .bind(installation_id),
        )
        .await?;
        exec(
            &mut *tx,
            "cluster_installation.activate",
            sqlx::query(&q(
                self.dialect,
                "UPDATE ClusterInstallation SET IsActive = 1 WHERE ID = ?",
            ))
            .bind(id),
        )
        .await?;
        tx.commit()
            .await
            .map_err(|e| err("cluster_installation.set_active.commit", e))?;
        Ok(())
    }

    pub async fn delete_cluster_installation(&self, id: &str) -> StoreResult<()> {
        let now = self.now_ms();
        let __sql = q(
            self.dialect,
            "UPDATE ClusterInstallation SET DeleteAt = ? WHERE ID = ? AND DeleteAt = 0",
        );
        let query = sqlx::query(&__sql).bind(now).bind(id);
        exec(&self.pool, "cluster_installation.delete", query).await?;
        Ok(())
    }

    pub async fn lock_cluster_installation(&self, id: &str, locker: &str) -> StoreResult<bool> {
        self.acquire_lease(LeasedTable::ClusterInstallation, &[id], locker)
            .await
    }

    pub async fn unlock_cluster_installation(
        &self,
        id: &str,
        locker: &str,
        force: bool,
    ) -> StoreResult<bool> {
        self.release_lease(LeasedTable::ClusterInstallation, &[id], locker, force)
            .await
    }

    pub async fn get_unlocked_cluster_installation_pending_work(
        &self,
    ) -> StoreResult<Vec<ClusterInstallation>> {
        let placeholders = crate::model::cluster_installation::PENDING_STATES
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "{SELECT} WHERE DeleteAt = 0 AND LockAcquiredAt = 0 AND State IN ({placeholders}) ORDER BY CreateAt ASC"
        );
        let __sql = q(self.dialect, &sql);
        let mut query = sqlx::query(&__sql);
        for state in crate::model::cluster_installation::PENDING_STATES {
            query = query.bind(*state);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| err("cluster_installation.pending_work", e))?;
        rows.iter().map(from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cluster::NewCluster;
    use crate::model::installation::NewInstallation;
    use crate::test_support::test_store;

    async fn seed(store: &Store) {
        store
            .create_cluster(NewCluster {
                id: "c1".into(),
                provider: "aws".into(),
                provisioner: "kops".into(),
                provider_metadata_json: None,
                provisioner_metadata_json: None,
                state: "stable".into(),
                allow_installations: true,
            })
            .await
            .unwrap();
        store
            .create_installation(NewInstallation {
                id: "i1".into(),
                name: None,
                owner_id: "owner".into(),
                version: "1.0.0".into(),
                image: "mattermost".into(),
                size: "100users".into(),
                database: "postgres".into(),
                filestore: "s3".into(),
                group_id: None,
                single_tenant_database_config: None,
                external_database_config: None,
                cr_version: "v1beta1".into(),
                priority_env: None,
                state: "stable".into(),
                annotations: Vec::new(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn exactly_one_cluster_installation_is_active_after_switch_over() {
        let store = test_store().await;
        seed(&store).await;

        store
            .create_cluster_installation(NewClusterInstallation {
                id: "ci1".into(),
                cluster_id: "c1".into(),
                installation_id: "i1".into(),
                namespace: "i1".into(),
                state: "stable".into(),
            })
            .await
            .unwrap();
        store
            .create_cluster_installation(NewClusterInstallation {
                id: "ci2".into(),
                cluster_id: "c1".into(),
                installation_id: "i1".into(),
                namespace: "i1-migrating".into(),
                state: "stable".into(),
            })
            .await
            .unwrap();

        store
            .set_active_cluster_installation("i1", "ci2")
            .await
            .unwrap();

        let ci1 = store
            .get_cluster_installation("ci1")
            .await
            .unwrap()
            .unwrap();
        let ci2 = store
            .get_cluster_installation("ci2")
            .await
            .unwrap()
            .unwrap();
        assert!(!ci1.is_active);
        assert!(ci2.is_active);
    }
}
