use crate::error::StoreError;
use crate::error::StoreResult;
use crate::kernel::Store;
use crate::kernel::exec;
use crate::kernel::q;
use crate::lease::LeasedTable;
use crate::model::backup::BackupMetadata;
use crate::model::backup::BackupMetadataFilter;
use crate::model::backup::NewBackupMetadata;
use sqlx::Row;
use sqlx::any::AnyRow;

const SELECT: &str = r#"
SELECT ID AS "ID", InstallationID AS "InstallationID", State AS "State",
       DataResidence AS "DataResidence", CreateAt AS "CreateAt", StartAt AS "StartAt",
       DeleteAt AS "DeleteAt", LockAcquiredAt AS "LockAcquiredAt", LockAcquiredBy AS "LockAcquiredBy"
FROM BackupMetadata
"#;

fn err(operation: &'static str, source: sqlx::Error) -> StoreError {
    StoreError::from_driver(operation, source)
}

fn from_row(row: &AnyRow) -> StoreResult<BackupMetadata> {
    Ok(BackupMetadata {
        id: row.try_get("ID").map_err(|e| err("backup.from_row", e))?,
        installation_id: row
            .try_get("InstallationID")
            .map_err(|e| err("backup.from_row", e))?,
        state: row
            .try_get("State")
            .map_err(|e| err("backup.from_row", e))?,
        data_residence: row
            .try_get("DataResidence")
            .map_err(|e| err("backup.from_row", e))?,
        create_at: row
            .try_get("CreateAt")
            .map_err(|e| err("backup.from_row", e))?,
        start_at: row
            .try_get("StartAt")
            .map_err(|e| err("backup.from_row", e))?,
        delete_at: row
            .try_get("DeleteAt")
            .map_err(|e| err("backup.from_row", e))?,
        lock_acquired_at: row
            .try_get("LockAcquiredAt")
            .map_err(|e| err("backup.from_row", e))?,
        lock_acquired_by: row
            .try_get("LockAcquiredBy")
            .map_err(|e| err("backup.from_row", e))?,
    })
}

impl Store {
    pub async fn create_backup(&self, new: NewBackupMetadata) -> StoreResult<BackupMetadata> {
        let now = self.now_ms();
        let __sql = q(
            self.dialect,
            r#"
INSERT INTO BackupMetadata (
    ID, InstallationID, State, DataResidence, CreateAt, StartAt, DeleteAt,
    LockAcquiredAt, LockAcquiredBy
) VALUES (?, ?, ?, ?, ?, 0, 0, 0, NULL)
            "#,
        );
        let query = sqlx::query(&__sql)
            .bind(&new.id)
            .bind(&new.installation_id)
            .bind(&new.state)
            .bind(&new.data_residence)
            .bind(now);
        exec(&self.pool, "backup.create", query).await?;
        self.get_backup(&new.id)
            .await?
            .ok_or_else(|| StoreError::Io {
                operation: "backup.create.reload",
                source: sqlx::Error::RowNotFound,
            })
    }

    pub async fn get_backup(&self, id: &str) -> StoreResult<Option<BackupMetadata>> {
        let __sql = q(self.dialect, &format!("{SELECT} WHERE ID = ?"));
        let row = sqlx::query(&__sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| err("backup.get", e))?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn list_backups(
        &self,
        filter: &BackupMetadataFilter,
    ) -> StoreResult<Vec<BackupMetadata>> {
        let Some(limit_offset) = filter.paging.limit_offset() else {
            return Ok(Vec::new());
        };
        let mut sql = SELECT.to_string();
        let mut clauses = Vec::new();
        if !filter.paging.include_deleted {
            clauses.push("DeleteAt = 0".to_string());
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
        if let Some(installation_id) = &filter.installation_id {
            query = query.bind(installation_id);
        }
        if let Some((limit, offset)) = limit_offset {
            query = query.bind(limit).bind(offset);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| err("backup.list", e))?;
        rows.iter().map(from_row).collect()
    }

    pub async fn update_backup_state(&self, id: &str, state: &str) -> StoreResult<()> {
        let __sql = q(
            self.dialect,
            "UPDATE BackupMetadata SET State = ? WHERE ID = ?",
        );
        let query = sqlx::query(&__sql).bind(state).bind(id);
        exec(&self.pool, "backup.update_state", query).await?;
        tracing::info!(id, state, "backup state updated");
        Ok(())
    }

    pub async fn start_backup(&self, id: &str) -> StoreResult<()> {
        let now = self.now_ms();
        let __sql = q(
            self.dialect,
            "UPDATE BackupMetadata SET StartAt = ?, State = 'in-progress' WHERE ID = ?",
        );
        let query = sqlx::query(&__sql).bind(now).bind(id);
        exec(&self.pool, "backup.start", query).await?;
        Ok(())
    }

    pub async fn delete_backup(&self, id: &str) -> StoreResult<()> {
        let now = self.now_ms();
        let __sql = q(
            self.dialect,
            "UPDATE BackupMetadata SET DeleteAt = ? WHERE ID = ? AND DeleteAt = 0",
        );
        let query = sqlx::query(&__sql).bind(now).bind(id);
        exec(&self.pool, "backup.delete", query).await?;
        Ok(())
    }

    pub async fn lock_backup(&self, id: &str, locker: &str) -> StoreResult<bool> {
        self.acquire_lease(LeasedTable::BackupMetadata, &[id], locker)
            .await
    }

    pub async fn unlock_backup(&self, id: &str, locker: &str, force: bool) -> StoreResult<bool> {
        self.release_lease(LeasedTable::BackupMetadata, &[id], locker, force)
            .await
    }

    pub async fn get_unlocked_backup_pending_work(&self) -> StoreResult<Vec<BackupMetadata>> {
        let placeholders = crate::model::backup::PENDING_STATES
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "{SELECT} WHERE DeleteAt = 0 AND LockAcquiredAt = 0 AND State IN ({placeholders}) ORDER BY CreateAt ASC"
        );
        let __sql = q(self.dialect, &sql);
        let mut query = sqlx::query(&__sql);
        for state in crate::model::backup::PENDING_STATES {
            query = query.bind(*state);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| err("backup.pending_work", e))?;
        rows.iter().map(from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::installation::NewInstallation;
    use crate::test_support::test_store;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = test_store().await;
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
        let created = store
            .create_backup(NewBackupMetadata {
                id: "b1".into(),
                installation_id: "i1".into(),
                state: "requested".into(),
                data_residence: None,
            })
            .await
            .unwrap();
        let fetched = store.get_backup("b1").await.unwrap().unwrap();
        assert_eq!(created, fetched);

        store.start_backup("b1").await.unwrap();
        let started = store.get_backup("b1").await.unwrap().unwrap();
        assert_eq!(started.state, "in-progress");
        assert_ne!(started.start_at, 0);
    }
}
