pub const PENDING_STATES: &[&str] = &["creation-requested", "deletion-requested"];

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterInstallation {
    pub id: String,
    pub cluster_id: String,
    pub installation_id: String,
    pub namespace: String,
    pub state: String,
    pub is_active: bool,
    pub create_at: i64,
    pub delete_at: i64,
    pub lock_acquired_at: i64,
    pub lock_acquired_by: Option<String>,
}

impl ClusterInstallation {
    pub fn is_locked(&self) -> bool {
        self.lock_acquired_at != 0
    }
}

#[derive(Debug, Clone)]
pub struct NewClusterInstallation {
    pub id: String,
    pub cluster_id: String,
    pub installation_id: String,
    pub namespace: String,
    pub state: String,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterInstallationFilter {
    pub paging: crate::paging::Paging,
    pub cluster_id: Option<String>,
    pub installation_id: Option<String>,
}
