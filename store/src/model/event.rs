use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: String,
    pub event_type: String,
    pub timestamp: i64,
    pub extra_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateChangeEvent {
    pub id: String,
    pub event_id: String,
    pub resource_id: String,
    pub resource_type: String,
    pub old_state: String,
    pub new_state: String,
}

/// Inputs to [`crate::Store::create_state_change_event`]: the event plus
/// the resource transition that triggered it (spec §4.8 "Recording").
#[derive(Debug, Clone)]
pub struct NewStateChangeEvent {
    pub event_type: String,
    pub extra_data: Option<Value>,
    pub resource_id: String,
    pub resource_type: String,
    pub old_state: String,
    pub new_state: String,
}

pub const DELIVERY_NOT_ATTEMPTED: &str = "not-attempted";
pub const DELIVERY_RETRYING: &str = "retrying";
pub const DELIVERY_DELIVERED: &str = "delivered";
pub const DELIVERY_FAILED: &str = "failed";

#[derive(Debug, Clone, PartialEq)]
pub struct EventDelivery {
    pub id: String,
    pub event_id: String,
    pub subscription_id: String,
    pub status: String,
    pub attempts: i64,
    pub last_attempt: i64,
    pub create_at: i64,
}

/// An [`EventDelivery`] joined with the [`Event`] it is delivering, ordered
/// by event timestamp (spec §4.8 "Process").
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryWithEvent {
    pub delivery: EventDelivery,
    pub event: Event,
}
