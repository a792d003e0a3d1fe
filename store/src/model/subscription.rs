use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: String,
    pub name: String,
    pub url: String,
    pub owner_id: String,
    pub event_type: String,
    pub headers: Option<Value>,
    pub failure_threshold_seconds: i64,
    pub last_delivery_status: String,
    pub last_delivery_attempt_at: i64,
    pub create_at: i64,
    pub delete_at: i64,
    pub lock_acquired_at: i64,
    pub lock_acquired_by: Option<String>,
}

impl Subscription {
    pub fn is_locked(&self) -> bool {
        self.lock_acquired_at != 0
    }
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub id: String,
    pub name: String,
    pub url: String,
    pub owner_id: String,
    pub event_type: String,
    pub headers: Option<Value>,
    pub failure_threshold_seconds: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub paging: crate::paging::Paging,
    pub owner_id: Option<String>,
    pub event_type: Option<String>,
}
