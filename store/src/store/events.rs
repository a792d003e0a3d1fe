//! Event & Subscription Engine (spec §4.8): records state-change events,
//! materializes one delivery per matching subscription, and lets workers
//! claim a subscription for processing under fair ordering and cooldown.

use crate::error::StoreError;
use crate::error::StoreResult;
use crate::ids::new_id;
use crate::kernel::Store;
use crate::kernel::exec;
use crate::kernel::q;
use crate::model::common::json_col;
use crate::model::common::to_json;
use crate::model::event::DELIVERY_NOT_ATTEMPTED;
use crate::model::event::DeliveryWithEvent;
use crate::model::event::Event;
use crate::model::event::EventDelivery;
use crate::model::event::NewStateChangeEvent;
use crate::model::subscription::Subscription;
use sqlx::Row;

/// Driver parameter-count safety margin for batched delivery inserts
/// (spec §4.8 "batches of <= 50 rows").
const DELIVERY_BATCH_SIZE: usize = 50;

fn err(operation: &'static str, source: sqlx::Error) -> StoreError {
    StoreError::from_driver(operation, source)
}

impl Store {
    /// Inserts the event, its state-change row, and one `not-attempted`
    /// delivery per live subscription matching `event_type`, all in one
    /// transaction (spec §4.8 "Recording"). Returns the number of
    /// deliveries created.
    pub async fn create_state_change_event(&self, new: NewStateChangeEvent) -> StoreResult<usize> {
        let now = self.now_ms();
        let extra_data_json = new
            .extra_data
            .as_ref()
            .map(to_json)
            .transpose()
            .map_err(|e| StoreError::Constraint {
                message: e.to_string(),
            })?;
        let event_id = new_id();

        let mut tx = self.begin().await?;
        exec(
            &mut *tx,
            "event.create",
            sqlx::query(&q(
                self.dialect,
                "INSERT INTO Event (ID, EventType, Timestamp, ExtraDataJson) VALUES (?, ?, ?, ?)",
            ))
            .bind(&event_id)
            .bind(&new.event_type)
            .bind(now)
            .bind(extra_data_json),
        )
        .await?;

        let state_change_id = new_id();
        exec(
            &mut *tx,
            "state_change_event.create",
            sqlx::query(&q(
                self.dialect,
                "INSERT INTO StateChangeEvent (ID, EventID, ResourceID, ResourceType, OldState, NewState) VALUES (?, ?, ?, ?, ?, ?)",
            ))
            .bind(&state_change_id)
            .bind(&event_id)
            .bind(&new.resource_id)
            .bind(&new.resource_type)
            .bind(&new.old_state)
            .bind(&new.new_state),
        )
        .await?;

        let __sql = q(
            self.dialect,
            r#"SELECT ID AS "ID" FROM Subscription WHERE EventType = ? AND DeleteAt = 0"#,
        );
        let subscriber_rows = sqlx::query(&__sql)
            .bind(&new.event_type)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| err("event.find_subscribers", e))?;
        let subscription_ids: Vec<String> = subscriber_rows
            .iter()
            .map(|row| {
                row.try_get::<String, _>("ID")
                    .map_err(|e| err("event.find_subscribers", e))
            })
            .collect::<StoreResult<_>>()?;

        for batch in subscription_ids.chunks(DELIVERY_BATCH_SIZE) {
            let mut sql = String::from(
                "INSERT INTO EventDelivery (ID, EventID, SubscriptionID, Status, Attempts, LastAttempt, CreateAt) VALUES ",
            );
            let row_values = std::iter::repeat_n("(?, ?, ?, ?, 0, 0, ?)", batch.len())
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&row_values);
            let __sql = q(self.dialect, &sql);
            let mut query = sqlx::query(&__sql);
            for subscription_id in batch {
                query = query
                    .bind(new_id())
                    .bind(&event_id)
                    .bind(subscription_id)
                    .bind(DELIVERY_NOT_ATTEMPTED)
                    .bind(now);
            }
            exec(&mut *tx, "event_delivery.create_batch", query).await?;
        }

        tx.commit()
            .await
            .map_err(|e| err("event.create.commit", e))?;
        Ok(subscription_ids.len())
    }

    /// Claims, via `FOR UPDATE SKIP LOCKED` on server dialects, the
    /// subscription with the oldest `LastDeliveryAttemptAt` whose last
    /// delivery succeeded or never ran and that has pending deliveries
    /// (spec §4.8 "Claim").
    pub async fn claim_up_to_date_subscription(
        &self,
        worker_id: &str,
    ) -> StoreResult<Subscription> {
        self.claim_subscription(
            worker_id,
            "Subscription.LastDeliveryStatus IN ('succeeded', 'none')",
            &[DELIVERY_NOT_ATTEMPTED],
        )
        .await
    }

    /// As [`Store::claim_up_to_date_subscription`] but restricted to
    /// subscriptions whose last delivery failed more than `cooldown_ms`
    /// ago.
    pub async fn claim_retrying_subscription(
        &self,
        worker_id: &str,
        cooldown_ms: i64,
    ) -> StoreResult<Subscription> {
        let cutoff = self.now_ms() - cooldown_ms;
        self.claim_subscription(
            worker_id,
            &format!("Subscription.LastDeliveryStatus = 'failed' AND Subscription.LastDeliveryAttemptAt < {cutoff}"),
        	&["retrying", DELIVERY_NOT_ATTEMPTED],
        )
        .await
    }

    async fn claim_subscription(
        &self,
        worker_id: &str,
        status_predicate: &str,
        delivery_statuses: &[&str],
    ) -> StoreResult<Subscription> {
        let placeholders = delivery_statuses
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(", ");
        let lock_hint = if self.dialect().supports_skip_locked() {
            " FOR UPDATE SKIP LOCKED"
        } else {
            ""
        };
        let sql = format!(
            "{} WHERE DeleteAt = 0 AND LockAcquiredAt = 0 AND {status_predicate} AND EXISTS (
                SELECT 1 FROM EventDelivery d WHERE d.SubscriptionID = Subscription.ID AND d.Status IN ({placeholders})
            ) ORDER BY LastDeliveryAttemptAt ASC LIMIT 1{lock_hint}",
            crate::store::subscription::SELECT.trim_end(),
        );
        let mut tx = self.begin().await?;
        let __sql = q(self.dialect, &sql);
        let mut query = sqlx::query(&__sql);
        for status in delivery_statuses {
            query = query.bind(*status);
        }
        let row = query
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| err("event.claim_subscription", e))?;
        let Some(row) = row else {
            tracing::warn!(worker_id, "claim found no subscriptions to process");
            return Err(StoreError::NoSubscriptionsToProcess);
        };
        let subscription = crate::store::subscription::from_row(&row)?;

        let now = self.now_ms();
        exec(
            &mut *tx,
            "event.claim_subscription.lock",
            sqlx::query(&q(
                self.dialect,
                "UPDATE Subscription SET LockAcquiredBy = ?, LockAcquiredAt = ? WHERE ID = ?",
            ))
            .bind(worker_id)
            .bind(now)
            .bind(&subscription.id),
        )
        .await?;
        tx.commit()
            .await
            .map_err(|e| err("event.claim_subscription.commit", e))?;
        tracing::info!(
            worker_id,
            subscription_id = subscription.id,
            "subscription claimed"
        );
        Ok(subscription)
    }

    /// Every pending delivery for a claimed subscription, joined with its
    /// event, ordered by event timestamp ascending (spec §4.8 "Process").
    pub async fn get_state_change_events_to_process(
        &self,
        subscription_id: &str,
    ) -> StoreResult<Vec<DeliveryWithEvent>> {
        let __sql = q(
            self.dialect,
            r#"
SELECT d.ID AS "DeliveryID", d.EventID AS "EventID", d.SubscriptionID AS "SubscriptionID",
       d.Status AS "Status", d.Attempts AS "Attempts", d.LastAttempt AS "LastAttempt",
       d.CreateAt AS "DeliveryCreateAt",
       e.EventType AS "EventType", e.Timestamp AS "Timestamp", e.ExtraDataJson AS "ExtraDataJson"
FROM EventDelivery d
JOIN Event e ON e.ID = d.EventID
WHERE d.SubscriptionID = ? AND d.Status IN ('not-attempted', 'retrying')
ORDER BY e.Timestamp ASC
            "#,
        );
        let rows = sqlx::query(&__sql)
            .bind(subscription_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| err("event.get_to_process", e))?;

        rows.iter()
            .map(|row| {
                let delivery = EventDelivery {
                    id: row
                        .try_get("DeliveryID")
                        .map_err(|e| err("event.get_to_process", e))?,
                    event_id: row
                        .try_get("EventID")
                        .map_err(|e| err("event.get_to_process", e))?,
                    subscription_id: row
                        .try_get("SubscriptionID")
                        .map_err(|e| err("event.get_to_process", e))?,
                    status: row
                        .try_get("Status")
                        .map_err(|e| err("event.get_to_process", e))?,
                    attempts: row
                        .try_get("Attempts")
                        .map_err(|e| err("event.get_to_process", e))?,
                    last_attempt: row
                        .try_get("LastAttempt")
                        .map_err(|e| err("event.get_to_process", e))?,
                    create_at: row
                        .try_get("DeliveryCreateAt")
                        .map_err(|e| err("event.get_to_process", e))?,
                };
                let event = Event {
                    id: delivery.event_id.clone(),
                    event_type: row
                        .try_get("EventType")
                        .map_err(|e| err("event.get_to_process", e))?,
                    timestamp: row
                        .try_get("Timestamp")
                        .map_err(|e| err("event.get_to_process", e))?,
                    extra_data: json_col(row, "ExtraDataJson")
                        .map_err(|e| err("event.get_to_process", e))?,
                };
                Ok(DeliveryWithEvent { delivery, event })
            })
            .collect()
    }

    pub async fn update_event_delivery_status(
        &self,
        delivery_id: &str,
        status: &str,
    ) -> StoreResult<()> {
        let now = self.now_ms();
        let __sql = q(
            self.dialect,
            "UPDATE EventDelivery SET Status = ?, Attempts = Attempts + 1, LastAttempt = ? WHERE ID = ?",
        );
        let query = sqlx::query(&__sql).bind(status).bind(now).bind(delivery_id);
        exec(&self.pool, "event_delivery.update_status", query).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::subscription::NewSubscription;
    use crate::test_support::test_store;

    async fn seed_subscription(store: &Store, id: &str, event_type: &str) {
        store
            .create_subscription(NewSubscription {
                id: id.to_string(),
                name: id.to_string(),
                url: format!("https://example.com/{id}"),
                owner_id: "owner".into(),
                event_type: event_type.to_string(),
                headers: None,
                failure_threshold_seconds: 3600,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn matching_subscriptions_each_get_one_delivery() {
        let store = test_store().await;
        seed_subscription(&store, "s1", "installation-state-changed").await;
        seed_subscription(&store, "s2", "installation-state-changed").await;
        seed_subscription(&store, "s3", "cluster-state-changed").await;

        let created = store
            .create_state_change_event(NewStateChangeEvent {
                event_type: "installation-state-changed".into(),
                extra_data: None,
                resource_id: "i1".into(),
                resource_type: "installation".into(),
                old_state: "creation-requested".into(),
                new_state: "stable".into(),
            })
            .await
            .unwrap();
        assert_eq!(created, 2);
    }

    #[tokio::test]
    async fn two_sequential_claims_never_return_the_same_subscription() {
        let store = test_store().await;
        seed_subscription(&store, "s1", "e").await;
        seed_subscription(&store, "s2", "e").await;
        store
            .create_state_change_event(NewStateChangeEvent {
                event_type: "e".into(),
                extra_data: None,
                resource_id: "r1".into(),
                resource_type: "installation".into(),
                old_state: "a".into(),
                new_state: "b".into(),
            })
            .await
            .unwrap();

        let first = store.claim_up_to_date_subscription("w1").await.unwrap();
        let second = store.claim_up_to_date_subscription("w2").await.unwrap();
        assert_ne!(first.id, second.id);

        let third = store.claim_up_to_date_subscription("w1").await;
        assert!(matches!(third, Err(StoreError::NoSubscriptionsToProcess)));
    }

    #[tokio::test]
    async fn deliveries_are_returned_in_event_timestamp_order() {
        let store = test_store().await;
        seed_subscription(&store, "s1", "e").await;

        store
            .create_state_change_event(NewStateChangeEvent {
                event_type: "e".into(),
                extra_data: None,
                resource_id: "r1".into(),
                resource_type: "installation".into(),
                old_state: "a".into(),
                new_state: "b".into(),
            })
            .await
            .unwrap();
        store
            .create_state_change_event(NewStateChangeEvent {
                event_type: "e".into(),
                extra_data: None,
                resource_id: "r1".into(),
                resource_type: "installation".into(),
                old_state: "b".into(),
                new_state: "c".into(),
            })
            .await
            .unwrap();

        let to_process = store
            .get_state_change_events_to_process("s1")
            .await
            .unwrap();
        assert_eq!(to_process.len(), 2);
        assert!(to_process[0].event.timestamp < to_process[1].event.timestamp);
    }
}
