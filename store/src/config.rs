/// Canonical environment variable carrying the backing store DSN (spec §6).
pub const DSN_ENV_VAR: &str = "CLOUD_STORE_DSN";

/// Everything needed to open a [`crate::Store`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub dsn: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl StoreConfig {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            max_connections: 10,
            busy_timeout_ms: 5_000,
        }
    }

    /// Reads the DSN from [`DSN_ENV_VAR`], the canonical source in test and
    /// operational contexts (spec §6).
    pub fn from_env() -> anyhow::Result<Self> {
        let dsn =
            std::env::var(DSN_ENV_VAR).map_err(|_| anyhow::anyhow!("{DSN_ENV_VAR} is not set"))?;
        Ok(Self::new(dsn))
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }
}
