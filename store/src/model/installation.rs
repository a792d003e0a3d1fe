use serde_json::Value;

pub const PENDING_STATES: &[&str] = &[
    "creation-requested",
    "creation-dns",
    "update-requested",
    "deletion-requested",
    "deletion-pending",
    "hibernating",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Installation {
    pub id: String,
    pub name: Option<String>,
    pub owner_id: String,
    pub version: String,
    pub image: String,
    pub size: String,
    pub database: String,
    pub filestore: String,
    pub group_id: Option<String>,
    pub group_sequence: Option<i64>,
    pub single_tenant_database_config: Option<Value>,
    pub external_database_config: Option<Value>,
    pub cr_version: String,
    pub priority_env: Option<Value>,
    pub state: String,
    pub create_at: i64,
    pub delete_at: i64,
    pub lock_acquired_at: i64,
    pub lock_acquired_by: Option<String>,
}

impl Installation {
    pub fn is_locked(&self) -> bool {
        self.lock_acquired_at != 0
    }
}

#[derive(Debug, Clone)]
pub struct NewInstallation {
    pub id: String,
    pub name: Option<String>,
    pub owner_id: String,
    pub version: String,
    pub image: String,
    pub size: String,
    pub database: String,
    pub filestore: String,
    pub group_id: Option<String>,
    pub single_tenant_database_config: Option<Value>,
    pub external_database_config: Option<Value>,
    pub cr_version: String,
    pub priority_env: Option<Value>,
    pub state: String,
    /// Annotation names to attach atomically at create time (spec §4.4
    /// "Create of an installation ... may atomically attach annotations").
    pub annotations: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InstallationFilter {
    pub paging: crate::paging::Paging,
    pub ids: Option<Vec<String>>,
    pub owner_id: Option<String>,
    pub group_id: Option<String>,
    pub state: Option<String>,
    pub name: Option<String>,
}
