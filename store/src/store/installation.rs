use crate::error::StoreError;
use crate::error::StoreResult;
use crate::kernel::Store;
use crate::kernel::exec;
use crate::kernel::q;
use crate::lease::LeasedTable;
use crate::model::common::json_col;
use crate::model::common::to_json;
use crate::model::installation::Installation;
use crate::model::installation::InstallationFilter;
use crate::model::installation::NewInstallation;
use sqlx::Row;
use sqlx::any::AnyRow;

const SELECT: &str = r#"
SELECT ID AS "ID", Name AS "Name", OwnerID AS "OwnerID", Version AS "Version", Image AS "Image",
       Size AS "Size", Database AS "Database", Filestore AS "Filestore", GroupID AS "GroupID",
       GroupSequence AS "GroupSequence", SingleTenantDatabaseConfigJson AS "SingleTenantDatabaseConfigJson",
       ExternalDatabaseConfigJson AS "ExternalDatabaseConfigJson", CRVersion AS "CRVersion",
       PriorityEnvJson AS "PriorityEnvJson", State AS "State", CreateAt AS "CreateAt",
       DeleteAt AS "DeleteAt", LockAcquiredAt AS "LockAcquiredAt", LockAcquiredBy AS "LockAcquiredBy"
FROM Installation
"#;

fn err(operation: &'static str, source: sqlx::Error) -> StoreError {
    StoreError::from_driver(operation, source)
}

fn from_row(row: &AnyRow) -> StoreResult<Installation> {
    Ok(Installation {
        id: row
            .try_get("ID")
            .map_err(|e| err("installation.from_row", e))?,
        name: row
            .try_get("Name")
            .map_err(|e| err("installation.from_row", e))?,
        owner_id: row
            .try_get("OwnerID")
            .map_err(|e| err("installation.from_row", e))?,
        version: row
            .try_get("Version")
            .map_err(|e| err("installation.from_row", e))?,
        image: row
            .try_get("Image")
            .map_err(|e| err("installation.from_row", e))?,
        size: row
            .try_get("Size")
            .map_err(|e| err("installation.from_row", e))?,
        database: row
            .try_get("Database")
            .map_err(|e| err("installation.from_row", e))?,
        filestore: row
            .try_get("Filestore")
            .map_err(|e| err("installation.from_row", e))?,
        group_id: row
            .try_get("GroupID")
            .map_err(|e| err("installation.from_row", e))?,
        group_sequence: row
            .try_get("GroupSequence")
            .map_err(|e| err("installation.from_row", e))?,
        single_tenant_database_config: json_col(row, "SingleTenantDatabaseConfigJson")
            .map_err(|e| err("installation.from_row", e))?,
        external_database_config: json_col(row, "ExternalDatabaseConfigJson")
            .map_err(|e| err("installation.from_row", e))?,
        cr_version: row
            .try_get("CRVersion")
            .map_err(|e| err("installation.from_row", e))?,
        priority_env: json_col(row, "PriorityEnvJson")
            .map_err(|e| err("installation.from_row", e))?,
        state: row
            .try_get("State")
            .map_err(|e| err("installation.from_row", e))?,
        create_at: row
            .try_get("CreateAt")
            .map_err(|e| err("installation.from_row", e))?,
        delete_at: row
            .try_get("DeleteAt")
            .map_err(|e| err("installation.from_row", e))?,
        lock_acquired_at: row
            .try_get("LockAcquiredAt")
            .map_err(|e| err("installation.from_row", e))?,
        lock_acquired_by: row
            .try_get("LockAcquiredBy")
            .map_err(|e| err("installation.from_row", e))?,
    })
}

fn encode_json(value: Option<&serde_json::Value>) -> StoreResult<Option<String>> {
    value
        .map(to_json)
        .transpose()
        .map_err(|e| StoreError::Constraint {
            message: e.to_string(),
        })
}

impl Store {
    /// Creates the installation and, in the same transaction, get-or-creates
    /// and links every named annotation (spec §4.4).
    pub async fn create_installation(&self, new: NewInstallation) -> StoreResult<Installation> {
        let now = self.now_ms();
        let single_tenant = encode_json(new.single_tenant_database_config.as_ref())?;
        let external = encode_json(new.external_database_config.as_ref())?;
        let priority_env = encode_json(new.priority_env.as_ref())?;

        let mut tx = self.begin().await?;
        let __sql = q(
            self.dialect,
            r#"
INSERT INTO Installation (
    ID, Name, OwnerID, Version, Image, Size, Database, Filestore, GroupID, GroupSequence,
    SingleTenantDatabaseConfigJson, ExternalDatabaseConfigJson, CRVersion, PriorityEnvJson,
    State, CreateAt, DeleteAt, LockAcquiredAt, LockAcquiredBy
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?, ?, ?, ?, 0, 0, NULL)
            "#,
        );
        let query = sqlx::query(&__sql)
            .bind(&new.id)
            .bind(&new.name)
            .bind(&new.owner_id)
            .bind(&new.version)
            .bind(&new.image)
            .bind(&new.size)
            .bind(&new.database)
            .bind(&new.filestore)
            .bind(&new.group_id)
            .bind(single_tenant)
            .bind(external)
            .bind(&new.cr_version)
            .bind(priority_env)
            .bind(&new.state)
            .bind(now);
        exec(&mut *tx, "installation.create", query).await?;

        for name in &new.annotations {
            let annotation = self.get_or_create_annotation_tx(&mut tx, name).await?;
            self.link_annotation_tx(
                &mut tx,
                crate::model::annotation::AnnotatedKind::Installation,
                &new.id,
                &annotation.id,
            )
            .await?;
        }

        tx.commit()
            .await
            .map_err(|e| err("installation.create.commit", e))?;

        self.get_installation(&new.id)
            .await?
            .ok_or_else(|| StoreError::Io {
                operation: "installation.create.reload",
                source: sqlx::Error::RowNotFound,
            })
    }

    pub async fn get_installation(&self, id: &str) -> StoreResult<Option<Installation>> {
        let __sql = q(self.dialect, &format!("{SELECT} WHERE ID = ?"));
        let row = sqlx::query(&__sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| err("installation.get", e))?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn get_installation_by_name(&self, name: &str) -> StoreResult<Option<Installation>> {
        let __sql = q(self.dialect, &format!("{SELECT} WHERE Name = ?"));
        let row = sqlx::query(&__sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| err("installation.get_by_name", e))?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn list_installations(
        &self,
        filter: &InstallationFilter,
    ) -> StoreResult<Vec<Installation>> {
        let Some(limit_offset) = filter.paging.limit_offset() else {
            return Ok(Vec::new());
        };
        let mut sql = SELECT.to_string();
        let mut clauses = Vec::new();
        if !filter.paging.include_deleted {
            clauses.push("DeleteAt = 0".to_string());
        }
        if filter.owner_id.is_some() {
            clauses.push("OwnerID = ?".to_string());
        }
        if filter.group_id.is_some() {
            clauses.push("GroupID = ?".to_string());
        }
        if filter.state.is_some() {
            clauses.push("State = ?".to_string());
        }
        if filter.name.is_some() {
            clauses.push("Name = ?".to_string());
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
        if let Some(owner_id) = &filter.owner_id {
            query = query.bind(owner_id);
        }
        if let Some(group_id) = &filter.group_id {
            query = query.bind(group_id);
        }
        if let Some(state) = &filter.state {
            query = query.bind(state);
        }
        if let Some(name) = &filter.name {
            query = query.bind(name);
        }
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
            .map_err(|e| err("installation.list", e))?;
        rows.iter().map(from_row).collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update_installation(
        &self,
        id: &str,
        version: &str,
        image: &str,
        size: &str,
        group_id: Option<&str>,
        priority_env: Option<&serde_json::Value>,
    ) -> StoreResult<()> {
        let priority_env_json = encode_json(priority_env)?;
        let __sql = q(
            self.dialect,
            "UPDATE Installation SET Version = ?, Image = ?, Size = ?, GroupID = ?, PriorityEnvJson = ? WHERE ID = ?",
        );
        let query = sqlx::query(&__sql)
            .bind(version)
            .bind(image)
            .bind(size)
            .bind(group_id)
            .bind(priority_env_json)
            .bind(id);
        exec(&self.pool, "installation.update", query).await?;
        Ok(())
    }

    /// Advances the installation to its group's current rollout generation,
    /// the write that clears it from [`Store::get_unlocked_groups_pending_work`].
    pub async fn set_installation_group_sequence(
        &self,
        id: &str,
        group_sequence: i64,
    ) -> StoreResult<()> {
        let __sql = q(
            self.dialect,
            "UPDATE Installation SET GroupSequence = ? WHERE ID = ?",
        );
        let query = sqlx::query(&__sql).bind(group_sequence).bind(id);
        exec(&self.pool, "installation.set_group_sequence", query).await?;
        Ok(())
    }

    pub async fn update_installation_state(&self, id: &str, state: &str) -> StoreResult<()> {
        let __sql = q(
            self.dialect,
            "UPDATE Installation SET State = ? WHERE ID = ?",
        );
        let query = sqlx::query(&__sql).bind(state).bind(id);
        exec(&self.pool, "installation.update_state", query).await?;
        tracing::info!(id, state, "installation state updated");
        Ok(())
    }

    pub async fn delete_installation(&self, id: &str) -> StoreResult<()> {
        let now = self.now_ms();
        let __sql = q(
            self.dialect,
            "UPDATE Installation SET DeleteAt = ? WHERE ID = ? AND DeleteAt = 0",
        );
        let query = sqlx::query(&__sql).bind(now).bind(id);
        exec(&self.pool, "installation.delete", query).await?;
        Ok(())
    }

    pub async fn lock_installation(&self, id: &str, locker: &str) -> StoreResult<bool> {
        self.acquire_lease(LeasedTable::Installation, &[id], locker)
            .await
    }

    pub async fn unlock_installation(
        &self,
        id: &str,
        locker: &str,
        force: bool,
    ) -> StoreResult<bool> {
        self.release_lease(LeasedTable::Installation, &[id], locker, force)
            .await
    }

    /// Pending-Work Scanner for installations (spec §4.7): free, non-deleted
    /// rows whose state is in the pending subset, ordered by creation time.
    pub async fn get_unlocked_installation_pending_work(&self) -> StoreResult<Vec<Installation>> {
        let placeholders = crate::model::installation::PENDING_STATES
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "{SELECT} WHERE DeleteAt = 0 AND LockAcquiredAt = 0 AND State IN ({placeholders}) ORDER BY CreateAt ASC"
        );
        let __sql = q(self.dialect, &sql);
        let mut query = sqlx::query(&__sql);
        for state in crate::model::installation::PENDING_STATES {
            query = query.bind(*state);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| err("installation.pending_work", e))?;
        rows.iter().map(from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_store;

    fn new_installation(id: &str) -> NewInstallation {
        NewInstallation {
            id: id.to_string(),
            name: None,
            owner_id: "owner-1".into(),
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
            state: "creation-requested".into(),
            annotations: Vec::new(),
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = test_store().await;
        let created = store
            .create_installation(new_installation("i1"))
            .await
            .unwrap();
        let fetched = store.get_installation("i1").await.unwrap().unwrap();
        assert_eq!(created, fetched);
    }

    #[tokio::test]
    async fn name_uniqueness_is_enforced_by_the_driver() {
        let store = test_store().await;
        let mut first = new_installation("i2");
        first.name = Some("shared-name".into());
        store.create_installation(first).await.unwrap();

        let mut second = new_installation("i3");
        second.name = Some("shared-name".into());
        let result = store.create_installation(second).await;
        assert!(matches!(result, Err(StoreError::Constraint { .. })));
    }

    #[tokio::test]
    async fn create_attaches_annotations_atomically() {
        let store = test_store().await;
        let mut new = new_installation("i4");
        new.annotations = vec!["multi-tenant".to_string(), "beta".to_string()];
        store.create_installation(new).await.unwrap();

        let annotations = store.get_installation_annotations("i4").await.unwrap();
        let mut names: Vec<_> = annotations.into_iter().map(|a| a.name).collect();
        names.sort();
        assert_eq!(names, vec!["beta", "multi-tenant"]);
    }
}
