use crate::error::StoreError;
use crate::error::StoreResult;
use crate::kernel::Store;
use crate::kernel::exec;
use crate::kernel::q;
use crate::model::common::json_col;
use crate::model::common::to_json;
use crate::model::webhook::NewWebhook;
use crate::model::webhook::Webhook;
use crate::model::webhook::WebhookFilter;
use sqlx::Row;
use sqlx::any::AnyRow;

const SELECT: &str = r#"SELECT ID AS "ID", OwnerID AS "OwnerID", URL AS "URL", HeadersJson AS "HeadersJson", CreateAt AS "CreateAt", DeleteAt AS "DeleteAt" FROM Webhook"#;

fn err(operation: &'static str, source: sqlx::Error) -> StoreError {
    StoreError::from_driver(operation, source)
}

fn from_row(row: &AnyRow) -> StoreResult<Webhook> {
    Ok(Webhook {
        id: row.try_get("ID").map_err(|e| err("webhook.from_row", e))?,
        owner_id: row
            .try_get("OwnerID")
            .map_err(|e| err("webhook.from_row", e))?,
        url: row.try_get("URL").map_err(|e| err("webhook.from_row", e))?,
        headers: json_col(row, "HeadersJson").map_err(|e| err("webhook.from_row", e))?,
        create_at: row
            .try_get("CreateAt")
            .map_err(|e| err("webhook.from_row", e))?,
        delete_at: row
            .try_get("DeleteAt")
            .map_err(|e| err("webhook.from_row", e))?,
    })
}

impl Store {
    pub async fn create_webhook(&self, new: NewWebhook) -> StoreResult<Webhook> {
        let now = self.now_ms();
        let headers_json =
            new.headers
                .as_ref()
                .map(to_json)
                .transpose()
                .map_err(|e| StoreError::Constraint {
                    message: e.to_string(),
                })?;
        let __sql = q(
            self.dialect,
            "INSERT INTO Webhook (ID, OwnerID, URL, HeadersJson, CreateAt, DeleteAt) VALUES (?, ?, ?, ?, ?, 0)",
        );
        let query = sqlx::query(&__sql)
            .bind(&new.id)
            .bind(&new.owner_id)
            .bind(&new.url)
            .bind(headers_json)
            .bind(now);
        exec(&self.pool, "webhook.create", query).await?;
        self.get_webhook(&new.id)
            .await?
            .ok_or_else(|| StoreError::Io {
                operation: "webhook.create.reload",
                source: sqlx::Error::RowNotFound,
            })
    }

    pub async fn get_webhook(&self, id: &str) -> StoreResult<Option<Webhook>> {
        let __sql = q(self.dialect, &format!("{SELECT} WHERE ID = ?"));
        let row = sqlx::query(&__sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| err("webhook.get", e))?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn list_webhooks(&self, filter: &WebhookFilter) -> StoreResult<Vec<Webhook>> {
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
        if let Some((limit, offset)) = limit_offset {
            query = query.bind(limit).bind(offset);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| err("webhook.list", e))?;
        rows.iter().map(from_row).collect()
    }

    pub async fn delete_webhook(&self, id: &str) -> StoreResult<()> {
        let now = self.now_ms();
        let __sql = q(
            self.dialect,
            "UPDATE Webhook SET DeleteAt = ? WHERE ID = ? AND DeleteAt = 0",
        );
        let query = sqlx::query(&__sql).bind(now).bind(id);
        exec(&self.pool, "webhook.delete", query).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_store;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = test_store().await;
        let created = store
            .create_webhook(NewWebhook {
                id: "w1".into(),
                owner_id: "owner".into(),
                url: "https://example.com/hook".into(),
                headers: None,
            })
            .await
            .unwrap();
        let fetched = store.get_webhook("w1").await.unwrap().unwrap();
        assert_eq!(created, fetched);
    }
}
