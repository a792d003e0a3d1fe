use crate::error::StoreError;
use crate::error::StoreResult;
use crate::kernel::Store;
use crate::kernel::exec;
use crate::kernel::q;
use crate::lease::LeasedTable;
use crate::model::common::json_col;
use crate::model::common::to_json;
use crate::model::subscription::NewSubscription;
use crate::model::subscription::Subscription;
use crate::model::subscription::SubscriptionFilter;
use sqlx::Row;
use sqlx::any::AnyRow;

pub(crate) const SELECT: &str = r#"
SELECT ID AS "ID", Name AS "Name", URL AS "URL", OwnerID AS "OwnerID", EventType AS "EventType",
       HeadersJson AS "HeadersJson", FailureThresholdSeconds AS "FailureThresholdSeconds",
       LastDeliveryStatus AS "LastDeliveryStatus", LastDeliveryAttemptAt AS "LastDeliveryAttemptAt",
       CreateAt AS "CreateAt", DeleteAt AS "DeleteAt", LockAcquiredAt AS "LockAcquiredAt",
       LockAcquiredBy AS "LockAcquiredBy"
FROM Subscription
"#;

fn err(operation: &'static str, source: sqlx::Error) -> StoreError {
    StoreError::from_driver(operation, source)
}

pub(crate) fn from_row(row: &AnyRow) -> StoreResult<Subscription> {
    Ok(Subscription {
        id: row
            .try_get("ID")
            .map_err(|e| err("subscription.from_row", e))?,
        name: row
            .try_get("Name")
            .map_err(|e| err("subscription.from_row", e))?,
        url: row
            .try_get("URL")
            .map_err(|e| err("subscription.from_row", e))?,
        owner_id: row
            .try_get("OwnerID")
            .map_err(|e| err("subscription.from_row", e))?,
        event_type: row
            .try_get("EventType")
            .map_err(|e| err("subscription.from_row", e))?,
        headers: json_col(row, "HeadersJson").map_err(|e| err("subscription.from_row", e))?,
        failure_threshold_seconds: row
            .try_get("FailureThresholdSeconds")
            .map_err(|e| err("subscription.from_row", e))?,
        last_delivery_status: row
            .try_get("LastDeliveryStatus")
            .map_err(|e| err("subscription.from_row", e))?,
        last_delivery_attempt_at: row
            .try_get("LastDeliveryAttemptAt")
            .map_err(|e| err("subscription.from_row", e))?,
        create_at: row
            .try_get("CreateAt")
            .map_err(|e| err("subscription.from_row", e))?,
        delete_at: row
            .try_get("DeleteAt")
            .map_err(|e| err("subscription.from_row", e))?,
        lock_acquired_at: row
            .try_get("LockAcquiredAt")
            .map_err(|e| err("subscription.from_row", e))?,
        lock_acquired_by: row
            .try_get("LockAcquiredBy")
            .map_err(|e| err("subscription.from_row", e))?,
    })
}

impl Store {
    pub async fn create_subscription(&self, new: NewSubscription) -> StoreResult<Subscription> {
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
            r#"
INSERT INTO Subscription (
    ID, Name, URL, OwnerID, EventType, HeadersJson, FailureThresholdSeconds,
    LastDeliveryStatus, LastDeliveryAttemptAt, CreateAt, DeleteAt, LockAcquiredAt, LockAcquiredBy
) VALUES (?, ?, ?, ?, ?, ?, ?, 'none', 0, ?, 0, 0, NULL)
            "#,
        );
        let query = sqlx::query(&__sql)
            .bind(&new.id)
            .bind(&new.name)
            .bind(&new.url)
            .bind(&new.owner_id)
            .bind(&new.event_type)
            .bind(headers_json)
            .bind(new.failure_threshold_seconds)
            .bind(now);
        exec(&self.pool, "subscription.create", query).await?;
        self.get_subscription(&new.id)
            .await?
            .ok_or_else(|| StoreError::Io {
                operation: "subscription.create.reload",
                source: sqlx::Error::RowNotFound,
            })
    }

    pub async fn get_subscription(&self, id: &str) -> StoreResult<Option<Subscription>> {
        let __sql = q(self.dialect, &format!("{SELECT} WHERE ID = ?"));
        let row = sqlx::query(&__sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| err("subscription.get", e))?;
        row.as_ref().map(from_row).transpose()
    }

    pub async fn list_subscriptions(
        &self,
        filter: &SubscriptionFilter,
    ) -> StoreResult<Vec<Subscription>> {
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
        if filter.event_type.is_some() {
            clauses.push("EventType = ?".to_string());
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
        if let Some(event_type) = &filter.event_type {
            query = query.bind(event_type);
        }
        if let Some((limit, offset)) = limit_offset {
            query = query.bind(limit).bind(offset);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| err("subscription.list", e))?;
        rows.iter().map(from_row).collect()
    }

    /// Writes the delivery-status aggregate on a subscription (spec §4.8
    /// "Process": `UpdateSubscriptionStatus` after the dispatcher runs).
    pub async fn update_subscription_status(&self, id: &str, status: &str) -> StoreResult<()> {
        let now = self.now_ms();
        let __sql = q(
            self.dialect,
            "UPDATE Subscription SET LastDeliveryStatus = ?, LastDeliveryAttemptAt = ? WHERE ID = ?",
        );
        let query = sqlx::query(&__sql).bind(status).bind(now).bind(id);
        exec(&self.pool, "subscription.update_status", query).await?;
        Ok(())
    }

    pub async fn delete_subscription(&self, id: &str) -> StoreResult<()> {
        let now = self.now_ms();
        let __sql = q(
            self.dialect,
            "UPDATE Subscription SET DeleteAt = ? WHERE ID = ? AND DeleteAt = 0",
        );
        let query = sqlx::query(&__sql).bind(now).bind(id);
        exec(&self.pool, "subscription.delete", query).await?;
        Ok(())
    }

    pub async fn lock_subscription(&self, id: &str, locker: &str) -> StoreResult<bool> {
        self.acquire_lease(LeasedTable::Subscription, &[id], locker)
            .await
    }

    pub async fn unlock_subscription(
        &self,
        id: &str,
        locker: &str,
        force: bool,
    ) -> StoreResult<bool> {
        self.release_lease(LeasedTable::Subscription, &[id], locker, force)
            .await
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
            .create_subscription(NewSubscription {
                id: "s1".into(),
                name: "s1".into(),
                url: "https://example.com/hook".into(),
                owner_id: "owner".into(),
                event_type: "installation-state-changed".into(),
                headers: None,
                failure_threshold_seconds: 3600,
            })
            .await
            .unwrap();
        let fetched = store.get_subscription("s1").await.unwrap().unwrap();
        assert_eq!(created, fetched);
        assert_eq!(fetched.last_delivery_status, "none");
    }
}
