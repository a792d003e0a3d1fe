use crate::error::StoreError;
use crate::error::StoreResult;
use crate::kernel::Store;
use crate::kernel::exec;
use crate::kernel::q;
use crate::lease::LeasedTable;
use crate::model::common::bool_col;
use crate::model::common::json_col;
use crate::model::common::to_json;
use crate::model::group::Group;
use crate::model::group::GroupFilter;
use crate::model::group::NewGroup;
use sqlx::Row;
use sqlx::any::AnyRow;

const SELECT: &str = r#"
SELECT ID AS "ID", Name AS "Name", Version AS "Version", Image AS "Image",
       EnvironmentVariablesJson AS "EnvironmentVariablesJson", Sequence AS "Sequence",
       MaxRolling AS "MaxRolling", APISecurityLock AS "APISecurityLock", CreateAt AS "CreateAt",
       DeleteAt AS "DeleteAt", LockAcquiredAt AS "LockAcquiredAt", LockAcquiredBy AS "LockAcquiredBy"
FROM "Group"
"#;

fn err(operation: &'static str, source: sqlx::Error) -> StoreError {
    StoreError::from_driver(operation, source)
}

fn from_row(row: &AnyRow) -> StoreResult<Group> {
    Ok(Group {
        id: row.try_get("ID").map_err(|e| err("group.from_row", e))?,
        name: row.try_get("Name").map_err(|e| err("group.from_row", e))?,
        version: row
            .try_get("Version")
            .map_err(|e| err("group.from_row", e))?,
        image: row.try_get("Image").map_err(|e| err("group.from_row", e))?,
        environment_variables: json_col(row, "EnvironmentVariablesJson")
            .map_err(|e| err("group.from_row", e))?,
        sequence: row
            .try_get("Sequence")
            .map_err(|e| err("group.from_row", e))?,
        max_rolling: row
            .try_get("MaxRolling")
            .map_err(|e| err("group.from_row", e))?,
        api_security_lock: bool_col(row, "APISecurityLock")
            .map_err(|e| err("group.from_row", e))?,
        create_at: row
            .try_get("CreateAt")
            .map_err(|e| err("group.from_row", e))?,
        delete_at: row
            .try_get("DeleteAt")
            .map_err(|e| err("group.from_row", e))?,
        lock_acquired_at: row
            .try_get("LockAcquiredAt")
            .map_err(|e| err("group.from_row", e))?,
        lock_acquired_by: row
            .try_get("LockAcquiredBy")
            .map_err(|e| err("group.from_row", e))?,
    })
}

impl Store {
    pub async fn create_group(&self, new: NewGroup) -> StoreResult<Group> {
        let now = self.now_ms();
        let env_json = new
            .environment_variables
            .as_ref()
            .map(to_json)
            .transpose()
            .map_err(|e| StoreError::Constraint {
                message: e.to_string(),
            })?;
        let __sql = q(
            self.dialect,
            r#"
INSERT INTO "Group" (
    ID, Name, Version, Image, EnvironmentVariablesJson, Sequence, MaxRolling,
    APISecurityLock, CreateAt, DeleteAt, LockAcquiredAt, LockAcquiredBy
) VALUES (?, ?, ?, ?, ?, 0, ?, 0, ?, 0, 0, NULL)
            "#,
        );
        let query = sqlx::query(&__sql)
            .bind(&new.id)
            .bind(&new.name)
            .bind(&new.version)
            .bind(&new.image)
            .bind(env_json)
            .bind(new.max_rolling)
            .bind(now);
        exec(&self.pool, "group.create", query).await?;
        self.get_group(&new.id)
            .await?
            .ok_or_else(|| StoreError::Io {
                operation: "group.create.reload",
                source: sqlx::Error::RowNotFound,
            })
    }

    pub async fn get_group(&self, id: &str) -> StoreResult<Option<Group>> {
        let __sql = q(self.dialect, &format!("{SELECT} WHERE ID = ?"));
        let row = sqlx::query(&__sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| err("group.get", e))?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn list_groups(&self, filter: &GroupFilter) -> StoreResult<Vec<Group>> {
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
            .map_err(|e| err("group.list", e))?;
        rows.iter().map(from_row).collect()
    }

    /// Bumps the rollout generation counter, the write that makes
    /// installations whose `GroupSequence` lags behind eligible for
    /// pending rollout work (spec §4.7).
    pub async fn bump_group_sequence(&self, id: &str) -> StoreResult<()> {
        let __sql = q(
            self.dialect,
            r#"UPDATE "Group" SET Sequence = Sequence + 1 WHERE ID = ?"#,
        );
        let query = sqlx::query(&__sql).bind(id);
        exec(&self.pool, "group.bump_sequence", query).await?;
        Ok(())
    }

    pub async fn delete_group(&self, id: &str) -> StoreResult<()> {
        let now = self.now_ms();
        let __sql = q(
            self.dialect,
            r#"UPDATE "Group" SET DeleteAt = ? WHERE ID = ? AND DeleteAt = 0"#,
        );
        let query = sqlx::query(&__sql).bind(now).bind(id);
        exec(&self.pool, "group.delete", query).await?;
        Ok(())
    }

    pub async fn lock_group(&self, id: &str, locker: &str) -> StoreResult<bool> {
        self.acquire_lease(LeasedTable::Group, &[id], locker).await
    }

    pub async fn unlock_group(&self, id: &str, locker: &str, force: bool) -> StoreResult<bool> {
        self.release_lease(LeasedTable::Group, &[id], locker, force)
            .await
    }

    /// Groups with at least one live installation whose `GroupSequence`
    /// lags the group's `Sequence` — i.e. pending rollout work (spec §4.7).
    pub async fn get_unlocked_groups_pending_work(&self) -> StoreResult<Vec<Group>> {
        let sql = format!(
            r#"{SELECT} WHERE DeleteAt = 0 AND LockAcquiredAt = 0 AND EXISTS (
                SELECT 1 FROM Installation i
                WHERE i.GroupID = "Group".ID AND i.DeleteAt = 0
                  AND (i.GroupSequence IS NULL OR i.GroupSequence != "Group".Sequence)
            ) ORDER BY CreateAt ASC"#
        );
        let __sql = q(self.dialect, &sql);
        let rows = sqlx::query(&__sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| err("group.pending_work", e))?;
        rows.iter().map(from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::installation::NewInstallation;
    use crate::test_support::test_store;

    #[tokio::test]
    async fn pending_work_reflects_lagging_installation_sequence() {
        let store = test_store().await;
        let group = store
            .create_group(NewGroup {
                id: "g1".into(),
                name: Some("g1".into()),
                version: "1.0.0".into(),
                image: "mattermost".into(),
                environment_variables: None,
                max_rolling: 1,
            })
            .await
            .unwrap();
        assert!(
            store
                .get_unlocked_groups_pending_work()
                .await
                .unwrap()
                .is_empty()
        );

        let new_installation = NewInstallation {
            id: "i1".into(),
            name: None,
            owner_id: "owner".into(),
            version: "1.0.0".into(),
            image: "mattermost".into(),
            size: "100users".into(),
            database: "postgres".into(),
            filestore: "s3".into(),
            group_id: Some(group.id.clone()),
            single_tenant_database_config: None,
            external_database_config: None,
            cr_version: "v1beta1".into(),
            priority_env: None,
            state: "stable".into(),
            annotations: Vec::new(),
        };
        store.create_installation(new_installation).await.unwrap();
        store
            .set_installation_group_sequence("i1", 0)
            .await
            .unwrap();
        assert!(
            store
                .get_unlocked_groups_pending_work()
                .await
                .unwrap()
                .is_empty()
        );

        store.bump_group_sequence(&group.id).await.unwrap();
        let pending = store.get_unlocked_groups_pending_work().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, group.id);
    }
}
