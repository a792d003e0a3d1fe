//! Annotation Graph (spec §4.5): a globally named label joined to Cluster,
//! Installation, or Group rows through three typed link tables, with
//! cross-entity consistency rules enforced at write time.

use crate::error::StoreError;
use crate::error::StoreResult;
use crate::ids::new_id;
use crate::kernel::Store;
use crate::kernel::exec;
use crate::kernel::q;
use crate::model::annotation::AnnotatedKind;
use crate::model::annotation::Annotation;
use sqlx::Any;
use sqlx::Row;
use sqlx::Transaction;
use sqlx::any::AnyRow;
use std::collections::BTreeMap;

fn err(operation: &'static str, source: sqlx::Error) -> StoreError {
    StoreError::from_driver(operation, source)
}

fn from_row(row: &AnyRow) -> StoreResult<Annotation> {
    Ok(Annotation {
        id: row
            .try_get("ID")
            .map_err(|e| err("annotation.from_row", e))?,
        name: row
            .try_get("Name")
            .map_err(|e| err("annotation.from_row", e))?,
    })
}

impl Store {
    pub async fn get_annotation_by_name(&self, name: &str) -> StoreResult<Option<Annotation>> {
        let __sql = q(
            self.dialect,
            r#"SELECT ID AS "ID", Name AS "Name" FROM Annotation WHERE Name = ?"#,
        );
        let row = sqlx::query(&__sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| err("annotation.get_by_name", e))?;
        row.as_ref().map(from_row).transpose()
    }

    /// Materializes an annotation if it doesn't already exist by name
    /// (spec §4.4 "get-or-create"), inside an existing transaction.
    pub(crate) async fn get_or_create_annotation_tx(
        &self,
        tx: &mut Transaction<'_, Any>,
        name: &str,
    ) -> StoreResult<Annotation> {
        let __sql = q(
            self.dialect,
            r#"SELECT ID AS "ID", Name AS "Name" FROM Annotation WHERE Name = ?"#,
        );
        let existing = sqlx::query(&__sql)
            .bind(name)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| err("annotation.get_or_create", e))?;
        if let Some(row) = existing.as_ref() {
            return from_row(row);
        }
        let id = new_id();
        exec(
            &mut **tx,
            "annotation.get_or_create.insert",
            sqlx::query(&q(
                self.dialect,
                "INSERT INTO Annotation (ID, Name) VALUES (?, ?)",
            ))
            .bind(&id)
            .bind(name),
        )
        .await?;
        Ok(Annotation {
            id,
            name: name.to_string(),
        })
    }

    pub(crate) async fn link_annotation_tx(
        &self,
        tx: &mut Transaction<'_, Any>,
        kind: AnnotatedKind,
        parent_id: &str,
        annotation_id: &str,
    ) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO {} ({}, AnnotationID) VALUES (?, ?)",
            kind.join_table(),
            kind.parent_column(),
        );
        exec(
            &mut **tx,
            "annotation.link",
            sqlx::query(&q(self.dialect, &sql))
                .bind(parent_id)
                .bind(annotation_id),
        )
        .await?;
        Ok(())
    }

    async fn annotations_for(
        &self,
        kind: AnnotatedKind,
        parent_id: &str,
    ) -> StoreResult<Vec<Annotation>> {
        let sql = format!(
            "SELECT a.ID AS \"ID\", a.Name AS \"Name\" FROM Annotation a JOIN {} j ON j.AnnotationID = a.ID WHERE j.{} = ? ORDER BY a.Name ASC",
            kind.join_table(),
            kind.parent_column(),
        );
        let __sql = q(self.dialect, &sql);
        let rows = sqlx::query(&__sql)
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| err("annotation.list_for_parent", e))?;
        rows.iter().map(from_row).collect()
    }

    pub async fn get_cluster_annotations(&self, cluster_id: &str) -> StoreResult<Vec<Annotation>> {
        self.annotations_for(AnnotatedKind::Cluster, cluster_id)
            .await
    }

    pub async fn get_installation_annotations(
        &self,
        installation_id: &str,
    ) -> StoreResult<Vec<Annotation>> {
        self.annotations_for(AnnotatedKind::Installation, installation_id)
            .await
    }

    pub async fn get_group_annotations(&self, group_id: &str) -> StoreResult<Vec<Annotation>> {
        self.annotations_for(AnnotatedKind::Group, group_id).await
    }

    /// Bulk lookup used by listing endpoints: one round trip returning a
    /// parent-id -> annotations map, rather than N+1 queries (spec §4.5
    /// "Bulk listings").
    pub async fn get_annotations_for_clusters(
        &self,
        cluster_ids: &[&str],
    ) -> StoreResult<BTreeMap<String, Vec<Annotation>>> {
        self.annotations_for_many(AnnotatedKind::Cluster, cluster_ids)
            .await
    }

    pub async fn get_annotations_for_installations(
        &self,
        installation_ids: &[&str],
    ) -> StoreResult<BTreeMap<String, Vec<Annotation>>> {
        self.annotations_for_many(AnnotatedKind::Installation, installation_ids)
            .await
    }

    async fn annotations_for_many(
        &self,
        kind: AnnotatedKind,
        parent_ids: &[&str],
    ) -> StoreResult<BTreeMap<String, Vec<Annotation>>> {
        let mut result = BTreeMap::new();
        if parent_ids.is_empty() {
            return Ok(result);
        }
        let placeholders = parent_ids
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT j.{} AS \"ParentID\", a.ID AS \"ID\", a.Name AS \"Name\" FROM Annotation a JOIN {} j ON j.AnnotationID = a.ID WHERE j.{} IN ({placeholders}) ORDER BY a.Name ASC",
            kind.parent_column(),
            kind.join_table(),
            kind.parent_column(),
        );
        let __sql = q(self.dialect, &sql);
        let mut query = sqlx::query(&__sql);
        for id in parent_ids {
            query = query.bind(*id);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| err("annotation.list_for_many", e))?;
        for row in &rows {
            let parent_id: String = row
                .try_get("ParentID")
                .map_err(|e| err("annotation.list_for_many", e))?;
            result
                .entry(parent_id)
                .or_insert_with(Vec::new)
                .push(from_row(row)?);
        }
        for id in parent_ids {
            result.entry((*id).to_string()).or_default();
        }
        Ok(result)
    }

    /// Links one or more named annotations to a cluster, creating any
    /// annotation that doesn't already exist.
    pub async fn create_cluster_annotations(
        &self,
        cluster_id: &str,
        names: &[&str],
    ) -> StoreResult<Vec<Annotation>> {
        let mut tx = self.begin().await?;
        let mut linked = Vec::with_capacity(names.len());
        for name in names {
            let annotation = self.get_or_create_annotation_tx(&mut tx, name).await?;
            self.link_annotation_tx(&mut tx, AnnotatedKind::Cluster, cluster_id, &annotation.id)
                .await?;
            linked.push(annotation);
        }
        tx.commit()
            .await
            .map_err(|e| err("annotation.create_cluster_annotations.commit", e))?;
        Ok(linked)
    }

    /// Links named annotations to an installation, failing the whole batch
    /// with [`StoreError::InstallationAnnotationDoNotMatchClusters`] unless
    /// every cluster currently hosting the installation already carries
    /// every named annotation (spec §4.5).
    pub async fn create_installation_annotations(
        &self,
        installation_id: &str,
        names: &[&str],
    ) -> StoreResult<Vec<Annotation>> {
        let __sql = q(
            self.dialect,
            r#"SELECT DISTINCT ClusterID AS "ClusterID" FROM ClusterInstallation WHERE InstallationID = ? AND DeleteAt = 0"#,
        );
        let hosting_clusters = sqlx::query(&__sql)
            .bind(installation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| err("annotation.installation_hosts", e))?;

        for cluster_row in &hosting_clusters {
            let cluster_id: String = cluster_row
                .try_get("ClusterID")
                .map_err(|e| err("annotation.installation_hosts", e))?;
            let cluster_annotations = self.get_cluster_annotations(&cluster_id).await?;
            for name in names {
                if !cluster_annotations.iter().any(|a| a.name == *name) {
                    return Err(StoreError::InstallationAnnotationDoNotMatchClusters);
                }
            }
        }

        let mut tx = self.begin().await?;
        let mut linked = Vec::with_capacity(names.len());
        for name in names {
            let annotation = self.get_or_create_annotation_tx(&mut tx, name).await?;
            self.link_annotation_tx(
                &mut tx,
                AnnotatedKind::Installation,
                installation_id,
                &annotation.id,
            )
            .await?;
            linked.push(annotation);
        }
        tx.commit()
            .await
            .map_err(|e| err("annotation.create_installation_annotations.commit", e))?;
        Ok(linked)
    }

    /// Unlinks a cluster annotation, failing with
    /// [`StoreError::ClusterAnnotationUsedByInstallation`] if any
    /// installation scheduled on that cluster still carries it.
    pub async fn delete_cluster_annotation(
        &self,
        cluster_id: &str,
        annotation_name: &str,
    ) -> StoreResult<()> {
        let Some(annotation) = self.get_annotation_by_name(annotation_name).await? else {
            return Ok(());
        };

        let __sql = q(
            self.dialect,
            r#"
SELECT 1 FROM ClusterInstallation ci
JOIN InstallationAnnotation ia ON ia.InstallationID = ci.InstallationID
WHERE ci.ClusterID = ? AND ci.DeleteAt = 0 AND ia.AnnotationID = ?
            "#,
        );
        let conflict = sqlx::query(&__sql)
            .bind(cluster_id)
            .bind(&annotation.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| err("annotation.delete_cluster_annotation.check", e))?;
        if conflict.is_some() {
            return Err(StoreError::ClusterAnnotationUsedByInstallation);
        }

        exec(
            &self.pool,
            "annotation.delete_cluster_annotation",
            sqlx::query(&q(
                self.dialect,
                "DELETE FROM ClusterAnnotation WHERE ClusterID = ? AND AnnotationID = ?",
            ))
            .bind(cluster_id)
            .bind(&annotation.id),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cluster::NewCluster;
    use crate::model::cluster_installation::NewClusterInstallation;
    use crate::model::installation::NewInstallation;
    use crate::test_support::test_store;

    async fn seed_scenario(store: &Store) {
        store
            .create_cluster(NewCluster {
                id: "cluster-1".into(),
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
            .create_cluster_annotations("cluster-1", &["a1", "a4"])
            .await
            .unwrap();

        store
            .create_installation(NewInstallation {
                id: "installation-1".into(),
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
                annotations: vec!["a1".into(), "a2".into()],
            })
            .await
            .unwrap();

        store
            .create_cluster_installation(NewClusterInstallation {
                id: "ci-1".into(),
                cluster_id: "cluster-1".into(),
                installation_id: "installation-1".into(),
                namespace: "installation-1".into(),
                state: "stable".into(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn installation_annotation_must_match_every_hosting_cluster() {
        let store = test_store().await;
        seed_scenario(&store).await;

        let result = store
            .create_installation_annotations("installation-1", &["a3"])
            .await;
        assert!(matches!(
            result,
            Err(StoreError::InstallationAnnotationDoNotMatchClusters)
        ));

        let result = store
            .create_installation_annotations("installation-1", &["a4"])
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn cluster_annotation_deletion_is_blocked_by_matching_installation() {
        let store = test_store().await;
        seed_scenario(&store).await;

        let result = store.delete_cluster_annotation("cluster-1", "a1").await;
        assert!(matches!(
            result,
            Err(StoreError::ClusterAnnotationUsedByInstallation)
        ));
    }

    #[tokio::test]
    async fn bulk_lookup_returns_an_entry_for_every_requested_parent() {
        let store = test_store().await;
        seed_scenario(&store).await;

        let map = store
            .get_annotations_for_clusters(&["cluster-1", "missing-cluster"])
            .await
            .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["cluster-1"].len(), 2);
        assert!(map["missing-cluster"].is_empty());
    }
}
