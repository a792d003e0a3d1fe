use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Webhook {
    pub id: String,
    pub owner_id: String,
    pub url: String,
    pub headers: Option<Value>,
    pub create_at: i64,
    pub delete_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewWebhook {
    pub id: String,
    pub owner_id: String,
    pub url: String,
    pub headers: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct WebhookFilter {
    pub paging: crate::paging::Paging,
    pub owner_id: Option<String>,
}
