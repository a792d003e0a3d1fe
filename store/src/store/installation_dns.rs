use crate::error::StoreError;
use crate::error::StoreResult;
use crate::kernel::Store;
use crate::kernel::exec;
use crate::kernel::q;
use crate::model::installation_dns::InstallationDns;
use crate::model::installation_dns::NewInstallationDns;
use sqlx::Row;
use sqlx::any::AnyRow;

const SELECT: &str = r#"SELECT ID AS "ID", InstallationID AS "InstallationID", DomainName AS "DomainName", CreateAt AS "CreateAt" FROM InstallationDNS"#;

fn err(operation: &'static str, source: sqlx::Error) -> StoreError {
    StoreError::from_driver(operation, source)
}

fn from_row(row: &AnyRow) -> StoreResult<InstallationDns> {
    Ok(InstallationDns {
        id: row
            .try_get("ID")
            .map_err(|e| err("installation_dns.from_row", e))?,
        installation_id: row
            .try_get("InstallationID")
            .map_err(|e| err("installation_dns.from_row", e))?,
        domain_name: row
            .try_get("DomainName")
            .map_err(|e| err("installation_dns.from_row", e))?,
        create_at: row
            .try_get("CreateAt")
            .map_err(|e| err("installation_dns.from_row", e))?,
    })
}

impl Store {
    pub async fn create_installation_dns(
        &self,
        new: NewInstallationDns,
    ) -> StoreResult<InstallationDns> {
        let now = self.now_ms();
        let __sql = q(
            self.dialect,
            "INSERT INTO InstallationDNS (ID, InstallationID, DomainName, CreateAt) VALUES (?, ?, ?, ?)",
        );
        let query = sqlx::query(&__sql)
            .bind(&new.id)
            .bind(&new.installation_id)
            .bind(&new.domain_name)
            .bind(now);
        exec(&self.pool, "installation_dns.create", query).await?;
        self.get_installation_dns(&new.id)
            .await?
            .ok_or_else(|| StoreError::Io {
                operation: "installation_dns.create.reload",
                source: sqlx::Error::RowNotFound,
            })
    }

    pub async fn get_installation_dns(&self, id: &str) -> StoreResult<Option<InstallationDns>> {
        let __sql = q(self.dialect, &format!("{SELECT} WHERE ID = ?"));
        let row = sqlx::query(&__sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| err("installation_dns.get", e))?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn list_installation_dns_records(
        &self,
        installation_id: &str,
    ) -> StoreResult<Vec<InstallationDns>> {
        let __sql = q(
            self.dialect,
            &format!("{SELECT} WHERE InstallationID = ? ORDER BY CreateAt ASC"),
        );
        let rows = sqlx::query(&__sql)
            .bind(installation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| err("installation_dns.list", e))?;
        rows.iter().map(from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::installation::NewInstallation;
    use crate::test_support::test_store;

    #[tokio::test]
    async fn domain_name_uniqueness_is_enforced_by_the_driver() {
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

        store
            .create_installation_dns(NewInstallationDns {
                id: "d1".into(),
                installation_id: "i1".into(),
                domain_name: "i1.example.com".into(),
            })
            .await
            .unwrap();

        let result = store
            .create_installation_dns(NewInstallationDns {
                id: "d2".into(),
                installation_id: "i1".into(),
                domain_name: "i1.example.com".into(),
            })
            .await;
        assert!(matches!(result, Err(StoreError::Constraint { .. })));
    }
}
