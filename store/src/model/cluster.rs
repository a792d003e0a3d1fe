use serde_json::Value;

pub const PENDING_STATES: &[&str] = &[
    "creation-requested",
    "upgrade-requested",
    "deletion-requested",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub id: String,
    pub provider: String,
    pub provisioner: String,
    pub provider_metadata: Option<Value>,
    pub provisioner_metadata: Option<Value>,
    pub state: String,
    pub allow_installations: bool,
    pub api_security_lock: bool,
    pub create_at: i64,
    pub delete_at: i64,
    pub lock_acquired_at: i64,
    pub lock_acquired_by: Option<String>,
}

impl Cluster {
    pub fn is_locked(&self) -> bool {
        self.lock_acquired_at != 0
    }
}

#[derive(Debug, Clone)]
pub struct NewCluster {
    pub id: String,
    pub provider: String,
    pub provisioner: String,
    pub provider_metadata_json: Option<Value>,
    pub provisioner_metadata_json: Option<Value>,
    pub state: String,
    pub allow_installations: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterFilter {
    pub paging: crate::paging::Paging,
    pub ids: Option<Vec<String>>,
}
