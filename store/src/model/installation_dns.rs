#[derive(Debug, Clone, PartialEq)]
pub struct InstallationDns {
    pub id: String,
    pub installation_id: String,
    pub domain_name: String,
    pub create_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewInstallationDns {
    pub id: String,
    pub installation_id: String,
    pub domain_name: String,
}
