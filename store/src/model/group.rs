use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub id: String,
    pub name: Option<String>,
    pub version: String,
    pub image: String,
    pub environment_variables: Option<Value>,
    pub sequence: i64,
    pub max_rolling: i64,
    pub api_security_lock: bool,
    pub create_at: i64,
    pub delete_at: i64,
    pub lock_acquired_at: i64,
    pub lock_acquired_by: Option<String>,
}

impl Group {
    pub fn is_locked(&self) -> bool {
        self.lock_acquired_at != 0
    }
}

#[derive(Debug, Clone)]
pub struct NewGroup {
    pub id: String,
    pub name: Option<String>,
    pub version: String,
    pub image: String,
    pub environment_variables: Option<Value>,
    pub max_rolling: i64,
}

#[derive(Debug, Clone, Default)]
pub struct GroupFilter {
    pub paging: crate::paging::Paging,
    pub ids: Option<Vec<String>>,
}
