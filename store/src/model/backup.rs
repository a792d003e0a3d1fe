pub const PENDING_STATES: &[&str] = &["requested"];

#[derive(Debug, Clone, PartialEq)]
pub struct BackupMetadata {
    pub id: String,
    pub installation_id: String,
    pub state: String,
    pub data_residence: Option<String>,
    pub create_at: i64,
    pub start_at: i64,
    pub delete_at: i64,
    pub lock_acquired_at: i64,
    pub lock_acquired_by: Option<String>,
}

impl BackupMetadata {
    pub fn is_locked(&self) -> bool {
        self.lock_acquired_at != 0
    }
}

#[derive(Debug, Clone)]
pub struct NewBackupMetadata {
    pub id: String,
    pub installation_id: String,
    pub state: String,
    pub data_residence: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BackupMetadataFilter {
    pub paging: crate::paging::Paging,
    pub installation_id: Option<String>,
}
