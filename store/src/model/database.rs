#[derive(Debug, Clone, PartialEq)]
pub struct MultitenantDatabase {
    pub id: String,
    pub vpc_id: String,
    pub database_type: String,
    pub max_installations_per_logical_database: i64,
    /// Raw JSON array of installation ids (spec §9: "deliberate choice,
    /// membership lists are small"). Contains/add/remove live at the store
    /// layer rather than on this struct so every mutation goes through one
    /// read-modify-write path.
    pub installations: Vec<String>,
    pub create_at: i64,
    pub delete_at: i64,
    pub lock_acquired_at: i64,
    pub lock_acquired_by: Option<String>,
}

impl MultitenantDatabase {
    pub fn is_locked(&self) -> bool {
        self.lock_acquired_at != 0
    }

    pub fn contains_installation(&self, installation_id: &str) -> bool {
        self.installations.iter().any(|i| i == installation_id)
    }
}

#[derive(Debug, Clone)]
pub struct NewMultitenantDatabase {
    pub id: String,
    pub vpc_id: String,
    pub database_type: String,
    pub max_installations_per_logical_database: i64,
}

#[derive(Debug, Clone, Default)]
pub struct MultitenantDatabaseFilter {
    pub paging: crate::paging::Paging,
    pub vpc_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalDatabase {
    pub id: String,
    pub multitenant_database_id: String,
    pub name: String,
    pub create_at: i64,
    pub delete_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSchema {
    pub id: String,
    pub logical_database_id: String,
    pub installation_id: String,
    pub create_at: i64,
    pub delete_at: i64,
}

/// The full resource triple returned by the placement allocator (spec §4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyDatabaseResources {
    pub multitenant_database: MultitenantDatabase,
    pub logical_database: LogicalDatabase,
    pub database_schema: DatabaseSchema,
}
