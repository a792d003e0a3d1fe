//! Placement Allocator (spec §4.6): bin-packs installations into logical
//! databases under a multitenant database's per-logical-database cap.

use crate::error::StoreError;
use crate::error::StoreResult;
use crate::ids::new_id;
use crate::kernel::Store;
use crate::kernel::exec;
use crate::kernel::q;
use crate::lease::LeasedTable;
use crate::model::database::DatabaseSchema;
use crate::model::database::LogicalDatabase;
use crate::model::database::MultitenantDatabase;
use crate::model::database::MultitenantDatabaseFilter;
use crate::model::database::NewMultitenantDatabase;
use crate::model::database::ProxyDatabaseResources;
use sqlx::Any;
use sqlx::Row;
use sqlx::Transaction;
use sqlx::any::AnyRow;

fn err(operation: &'static str, source: sqlx::Error) -> StoreError {
    StoreError::from_driver(operation, source)
}

const SELECT_MULTITENANT: &str = r#"
SELECT ID AS "ID", VpcID AS "VpcID", DatabaseType AS "DatabaseType",
       MaxInstallationsPerLogicalDatabase AS "MaxInstallationsPerLogicalDatabase",
       InstallationsJson AS "InstallationsJson", CreateAt AS "CreateAt", DeleteAt AS "DeleteAt",
       LockAcquiredAt AS "LockAcquiredAt", LockAcquiredBy AS "LockAcquiredBy"
FROM MultitenantDatabase
"#;

const SELECT_LOGICAL: &str = r#"
SELECT ID AS "ID", MultitenantDatabaseID AS "MultitenantDatabaseID", Name AS "Name",
       CreateAt AS "CreateAt", DeleteAt AS "DeleteAt"
FROM LogicalDatabase
"#;

const SELECT_SCHEMA: &str = r#"
SELECT ID AS "ID", LogicalDatabaseID AS "LogicalDatabaseID", InstallationID AS "InstallationID",
       CreateAt AS "CreateAt", DeleteAt AS "DeleteAt"
FROM DatabaseSchema
"#;

fn multitenant_from_row(row: &AnyRow) -> StoreResult<MultitenantDatabase> {
    let installations_json: String = row
        .try_get("InstallationsJson")
        .map_err(|e| err("multitenant_database.from_row", e))?;
    let installations: Vec<String> =
        serde_json::from_str(&installations_json).map_err(|e| StoreError::Constraint {
            message: format!("corrupt InstallationsJson: {e}"),
        })?;
    Ok(MultitenantDatabase {
        id: row
            .try_get("ID")
            .map_err(|e| err("multitenant_database.from_row", e))?,
        vpc_id: row
            .try_get("VpcID")
            .map_err(|e| err("multitenant_database.from_row", e))?,
        database_type: row
            .try_get("DatabaseType")
            .map_err(|e| err("multitenant_database.from_row", e))?,
        max_installations_per_logical_database: row
            .try_get("MaxInstallationsPerLogicalDatabase")
            .map_err(|e| {
            err("multitenant_database.from_row", e)
        })?,
        installations,
        create_at: row
            .try_get("CreateAt")
            .map_err(|e| err("multitenant_database.from_row", e))?,
        delete_at: row
            .try_get("DeleteAt")
            .map_err(|e| err("multitenant_database.from_row", e))?,
        lock_acquired_at: row
            .try_get("LockAcquiredAt")
            .map_err(|e| err("multitenant_database.from_row", e))?,
        lock_acquired_by: row
            .try_get("LockAcquiredBy")
            .map_err(|e| err("multitenant_database.from_row", e))?,
    })
}

fn logical_from_row(row: &AnyRow) -> StoreResult<LogicalDatabase> {
    Ok(LogicalDatabase {
        id: row
            .try_get("ID")
            .map_err(|e| err("logical_database.from_row", e))?,
        multitenant_database_id: row
            .try_get("MultitenantDatabaseID")
            .map_err(|e| err("logical_database.from_row", e))?,
        name: row
            .try_get("Name")
            .map_err(|e| err("logical_database.from_row", e))?,
        create_at: row
            .try_get("CreateAt")
            .map_err(|e| err("logical_database.from_row", e))?,
        delete_at: row
            .try_get("DeleteAt")
            .map_err(|e| err("logical_database.from_row", e))?,
    })
}

fn schema_from_row(row: &AnyRow) -> StoreResult<DatabaseSchema> {
    Ok(DatabaseSchema {
        id: row
            .try_get("ID")
            .map_err(|e| err("database_schema.from_row", e))?,
        logical_database_id: row
            .try_get("LogicalDatabaseID")
            .map_err(|e| err("database_schema.from_row", e))?,
        installation_id: row
            .try_get("InstallationID")
            .map_err(|e| err("database_schema.from_row", e))?,
        create_at: row
            .try_get("CreateAt")
            .map_err(|e| err("database_schema.from_row", e))?,
        delete_at: row
            .try_get("DeleteAt")
            .map_err(|e| err("database_schema.from_row", e))?,
    })
}

impl Store {
    pub async fn create_multitenant_database(
        &self,
        new: NewMultitenantDatabase,
    ) -> StoreResult<MultitenantDatabase> {
        let now = self.now_ms();
        let __sql = q(
            self.dialect,
            r#"
INSERT INTO MultitenantDatabase (
    ID, VpcID, DatabaseType, MaxInstallationsPerLogicalDatabase, InstallationsJson,
    CreateAt, DeleteAt, LockAcquiredAt, LockAcquiredBy
) VALUES (?, ?, ?, ?, '[]', ?, 0, 0, NULL)
            "#,
        );
        let query = sqlx::query(&__sql)
            .bind(&new.id)
            .bind(&new.vpc_id)
            .bind(&new.database_type)
            .bind(new.max_installations_per_logical_database)
            .bind(now);
        exec(&self.pool, "multitenant_database.create", query).await?;
        self.get_multitenant_database(&new.id)
            .await?
            .ok_or_else(|| StoreError::Io {
                operation: "multitenant_database.create.reload",
                source: sqlx::Error::RowNotFound,
            })
    }

    pub async fn get_multitenant_database(
        &self,
        id: &str,
    ) -> StoreResult<Option<MultitenantDatabase>> {
        let __sql = q(self.dialect, &format!("{SELECT_MULTITENANT} WHERE ID = ?"));
        let row = sqlx::query(&__sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| err("multitenant_database.get", e))?;
        row.as_ref().map(multitenant_from_row).transpose()
    }

    pub async fn list_multitenant_databases(
        &self,
        filter: &MultitenantDatabaseFilter,
    ) -> StoreResult<Vec<MultitenantDatabase>> {
        let Some(limit_offset) = filter.paging.limit_offset() else {
            return Ok(Vec::new());
        };
        let mut sql = SELECT_MULTITENANT.to_string();
        let mut clauses = Vec::new();
        if !filter.paging.include_deleted {
            clauses.push("DeleteAt = 0".to_string());
        }
        if filter.vpc_id.is_some() {
            clauses.push("VpcID = ?".to_string());
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
        if let Some(vpc_id) = &filter.vpc_id {
            query = query.bind(vpc_id);
        }
        if let Some((limit, offset)) = limit_offset {
            query = query.bind(limit).bind(offset);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| err("multitenant_database.list", e))?;
        rows.iter().map(multitenant_from_row).collect()
    }

    /// Multitenant databases whose weighted installation count — stable
    /// installations weigh 1.0, hibernating ones 0.75 — is below `cap`
    /// (spec §4.6 "Secondary filter").
    pub async fn find_multitenant_databases_under_weighted_cap(
        &self,
        cap: f64,
    ) -> StoreResult<Vec<MultitenantDatabase>> {
        let candidates = self
            .list_multitenant_databases(&MultitenantDatabaseFilter::default())
            .await?;
        let mut under_cap = Vec::new();
        for candidate in candidates {
            if candidate.installations.is_empty() {
                under_cap.push(candidate);
                continue;
            }
            let placeholders = candidate
                .installations
                .iter()
                .map(|_| "?")
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                r#"SELECT State AS "State" FROM Installation WHERE ID IN ({placeholders})"#
            );
            let __sql = q(self.dialect, &sql);
            let mut query = sqlx::query(&__sql);
            for id in &candidate.installations {
                query = query.bind(id);
            }
            let rows = query
                .fetch_all(&self.pool)
                .await
                .map_err(|e| err("multitenant_database.weighted_cap", e))?;
            let mut weight: f64 = 0.0;
            for row in &rows {
                let state: String = row
                    .try_get("State")
                    .map_err(|e| err("multitenant_database.weighted_cap", e))?;
                weight += if state == "hibernating" { 0.75 } else { 1.0 };
            }
            if weight.ceil() < cap {
                under_cap.push(candidate);
            }
        }
        Ok(under_cap)
    }

    async fn logical_databases_for(
        &self,
        tx: &mut Transaction<'_, Any>,
        multitenant_database_id: &str,
    ) -> StoreResult<Vec<LogicalDatabase>> {
        let __sql = q(
            self.dialect,
            &format!(
                "{SELECT_LOGICAL} WHERE MultitenantDatabaseID = ? AND DeleteAt = 0 ORDER BY CreateAt ASC"
            ),
        );
        let rows = sqlx::query(&__sql)
            .bind(multitenant_database_id)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| err("logical_database.list", e))?;
        rows.iter().map(logical_from_row).collect()
    }

    async fn live_schema_count(
        &self,
        tx: &mut Transaction<'_, Any>,
        logical_database_id: &str,
    ) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>(&q(
            self.dialect,
            "SELECT COUNT(*) FROM DatabaseSchema WHERE LogicalDatabaseID = ? AND DeleteAt = 0",
        ))
        .bind(logical_database_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| err("database_schema.count", e))
    }

    /// Returns the installation's resource triple, creating it if it
    /// doesn't exist (spec §4.6 steps 1-6). Re-invoking with the same
    /// `(installation, multitenant)` is a no-op returning the existing
    /// triple (spec §8 allocator property).
    pub async fn get_or_create_proxy_database_resources_for_installation(
        &self,
        installation_id: &str,
        multitenant_database_id: &str,
    ) -> StoreResult<ProxyDatabaseResources> {
        if let Some(existing) = self
            .find_proxy_database_resources_for_installation(installation_id)
            .await?
        {
            return Ok(existing);
        }

        let mut tx = self.begin().await?;

        let __sql = q(self.dialect, &format!("{SELECT_MULTITENANT} WHERE ID = ?"));
        let multitenant_row = sqlx::query(&__sql)
            .bind(multitenant_database_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| err("multitenant_database.get_for_placement", e))?;
        let Some(multitenant_row) = multitenant_row else {
            return Err(StoreError::Constraint {
                message: format!("multitenant database {multitenant_database_id} not found"),
            });
        };
        let multitenant = multitenant_from_row(&multitenant_row)?;
        if multitenant.delete_at != 0 {
            return Err(StoreError::Constraint {
                message: format!("multitenant database {multitenant_database_id} is deleted"),
            });
        }

        let logical_databases = self
            .logical_databases_for(&mut tx, multitenant_database_id)
            .await?;
        let mut best: Option<(LogicalDatabase, i64)> = None;
        for logical in logical_databases {
            let count = self.live_schema_count(&mut tx, &logical.id).await?;
            if count < multitenant.max_installations_per_logical_database
                && best
                    .as_ref()
                    .is_none_or(|(_, best_count)| count > *best_count)
            {
                best = Some((logical, count));
            }
        }

        let created_new_logical = best.is_none();
        let logical_database = match best {
            Some((logical, _)) => logical,
            None => {
                let now = self.now_ms();
                let id = new_id();
                let name = format!("cloud_{id}");
                exec(
                    &mut *tx,
                    "logical_database.create",
                    sqlx::query(&q(
                        self.dialect,
                        "INSERT INTO LogicalDatabase (ID, MultitenantDatabaseID, Name, CreateAt, DeleteAt) VALUES (?, ?, ?, ?, 0)",
                    ))
                    .bind(&id)
                    .bind(multitenant_database_id)
                    .bind(&name)
                    .bind(now),
                )
                .await?;
                LogicalDatabase {
                    id,
                    multitenant_database_id: multitenant_database_id.to_string(),
                    name,
                    create_at: now,
                    delete_at: 0,
                }
            }
        };

        let now = self.now_ms();
        let schema_id = new_id();
        exec(
            &mut *tx,
            "database_schema.create",
            sqlx::query(&q(
                self.dialect,
                "INSERT INTO DatabaseSchema (ID, LogicalDatabaseID, InstallationID, CreateAt, DeleteAt) VALUES (?, ?, ?, ?, 0)",
            ))
            .bind(&schema_id)
            .bind(&logical_database.id)
            .bind(installation_id)
            .bind(now),
        )
        .await?;

        let mut installations = multitenant.installations.clone();
        if !installations.iter().any(|i| i == installation_id) {
            installations.push(installation_id.to_string());
        }
        let installations_json =
            serde_json::to_string(&installations).map_err(|e| StoreError::Constraint {
                message: e.to_string(),
            })?;
        exec(
            &mut *tx,
            "multitenant_database.add_installation",
            sqlx::query(&q(
                self.dialect,
                "UPDATE MultitenantDatabase SET InstallationsJson = ? WHERE ID = ?",
            ))
            .bind(installations_json)
            .bind(multitenant_database_id),
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| err("placement.allocate.commit", e))?;
        tracing::info!(
            installation_id,
            logical_database_id = logical_database.id,
            created_new_logical,
            "installation placed in logical database"
        );

        let schema = DatabaseSchema {
            id: schema_id,
            logical_database_id: logical_database.id.clone(),
            installation_id: installation_id.to_string(),
            create_at: now,
            delete_at: 0,
        };
        let multitenant = self
            .get_multitenant_database(multitenant_database_id)
            .await?
            .ok_or_else(|| StoreError::Io {
                operation: "placement.allocate.reload",
                source: sqlx::Error::RowNotFound,
            })?;
        Ok(ProxyDatabaseResources {
            multitenant_database: multitenant,
            logical_database,
            database_schema: schema,
        })
    }

    pub async fn find_proxy_database_resources_for_installation(
        &self,
        installation_id: &str,
    ) -> StoreResult<Option<ProxyDatabaseResources>> {
        let __sql = q(
            self.dialect,
            &format!("{SELECT_SCHEMA} WHERE InstallationID = ? AND DeleteAt = 0"),
        );
        let schema_row = sqlx::query(&__sql)
            .bind(installation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| err("database_schema.find_for_installation", e))?;
        let Some(schema_row) = schema_row else {
            return Ok(None);
        };
        let schema = schema_from_row(&schema_row)?;

        let __sql = q(self.dialect, &format!("{SELECT_LOGICAL} WHERE ID = ?"));
        let logical_row = sqlx::query(&__sql)
            .bind(&schema.logical_database_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| err("logical_database.get", e))?;
        let logical_database = logical_from_row(&logical_row)?;

        let multitenant = self
            .get_multitenant_database(&logical_database.multitenant_database_id)
            .await?
            .ok_or_else(|| StoreError::Io {
                operation: "placement.find.reload_multitenant",
                source: sqlx::Error::RowNotFound,
            })?;

        Ok(Some(ProxyDatabaseResources {
            multitenant_database: multitenant,
            logical_database,
            database_schema: schema,
        }))
    }

    /// Soft-deletes the installation's schema and removes it from the
    /// multitenant database's installation set, in one transaction
    /// (spec §4.6 "Deletion mirror").
    pub async fn delete_installation_proxy_database_resources(
        &self,
        installation_id: &str,
    ) -> StoreResult<()> {
        let Some(resources) = self
            .find_proxy_database_resources_for_installation(installation_id)
            .await?
        else {
            return Ok(());
        };

        let now = self.now_ms();
        let mut tx = self.begin().await?;
        exec(
            &mut *tx,
            "database_schema.delete",
            sqlx::query(&q(
                self.dialect,
                "UPDATE DatabaseSchema SET DeleteAt = ? WHERE ID = ? AND DeleteAt = 0",
            ))
            .bind(now)
            .bind(&resources.database_schema.id),
        )
        .await?;

        let remaining: Vec<String> = resources
            .multitenant_database
            .installations
            .iter()
            .filter(|id| id.as_str() != installation_id)
            .cloned()
            .collect();
        let remaining_json =
            serde_json::to_string(&remaining).map_err(|e| StoreError::Constraint {
                message: e.to_string(),
            })?;
        exec(
            &mut *tx,
            "multitenant_database.remove_installation",
            sqlx::query(&q(
                self.dialect,
                "UPDATE MultitenantDatabase SET InstallationsJson = ? WHERE ID = ?",
            ))
            .bind(remaining_json)
            .bind(&resources.multitenant_database.id),
        )
        .await?;

        tx.commit()
            .await
            .map_err(|e| err("placement.delete.commit", e))?;
        Ok(())
    }

    pub async fn lock_multitenant_database(&self, id: &str, locker: &str) -> StoreResult<bool> {
        self.acquire_lease(LeasedTable::MultitenantDatabase, &[id], locker)
            .await
    }

    pub async fn unlock_multitenant_database(
        &self,
        id: &str,
        locker: &str,
        force: bool,
    ) -> StoreResult<bool> {
        self.release_lease(LeasedTable::MultitenantDatabase, &[id], locker, force)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::installation::NewInstallation;
    use crate::test_support::test_store;

    async fn seed_installation(store: &Store, id: &str) {
        store
            .create_installation(NewInstallation {
                id: id.to_string(),
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
    async fn allocator_spills_into_a_new_logical_database_once_full() {
        let store = test_store().await;
        let multitenant = store
            .create_multitenant_database(NewMultitenantDatabase {
                id: "m1".into(),
                vpc_id: "vpc-1".into(),
                database_type: "postgres".into(),
                max_installations_per_logical_database: 3,
            })
            .await
            .unwrap();

        for i in 0..3 {
            let installation_id = format!("install-{i}");
            seed_installation(&store, &installation_id).await;
            store
                .get_or_create_proxy_database_resources_for_installation(
                    &installation_id,
                    &multitenant.id,
                )
                .await
                .unwrap();
        }

        let after_three = store
            .get_multitenant_database(&multitenant.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after_three.installations.len(), 3);

        seed_installation(&store, "install-3").await;
        let fourth = store
            .get_or_create_proxy_database_resources_for_installation("install-3", &multitenant.id)
            .await
            .unwrap();

        let first = store
            .find_proxy_database_resources_for_installation("install-0")
            .await
            .unwrap()
            .unwrap();
        assert_ne!(fourth.logical_database.id, first.logical_database.id);
    }

    #[tokio::test]
    async fn reinvocation_returns_the_identical_resource_triple() {
        let store = test_store().await;
        let multitenant = store
            .create_multitenant_database(NewMultitenantDatabase {
                id: "m2".into(),
                vpc_id: "vpc-1".into(),
                database_type: "postgres".into(),
                max_installations_per_logical_database: 3,
            })
            .await
            .unwrap();
        seed_installation(&store, "install-x").await;

        let first = store
            .get_or_create_proxy_database_resources_for_installation("install-x", &multitenant.id)
            .await
            .unwrap();
        let second = store
            .get_or_create_proxy_database_resources_for_installation("install-x", &multitenant.id)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn deletion_removes_schema_and_installation_membership() {
        let store = test_store().await;
        let multitenant = store
            .create_multitenant_database(NewMultitenantDatabase {
                id: "m3".into(),
                vpc_id: "vpc-1".into(),
                database_type: "postgres".into(),
                max_installations_per_logical_database: 3,
            })
            .await
            .unwrap();
        seed_installation(&store, "install-y").await;
        store
            .get_or_create_proxy_database_resources_for_installation("install-y", &multitenant.id)
            .await
            .unwrap();

        store
            .delete_installation_proxy_database_resources("install-y")
            .await
            .unwrap();

        assert!(
            store
                .find_proxy_database_resources_for_installation("install-y")
                .await
                .unwrap()
                .is_none()
        );
        let multitenant_after = store
            .get_multitenant_database(&multitenant.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!multitenant_after.contains_installation("install-y"));
    }
}
