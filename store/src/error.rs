use thiserror::Error;

/// Errors surfaced by `cloud_store` to its callers.
///
/// Four kinds of failure map onto four policies: not-found is never an
/// error (see every `get_*` returning `Option`), contention is a plain
/// `bool`/sentinel rather than a generic error, constraint violations and
/// driver I/O are wrapped here with enough context to act on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no subscriptions to process")]
    NoSubscriptionsToProcess,

    #[error("cluster annotation is used by an installation scheduled on the cluster")]
    ClusterAnnotationUsedByInstallation,

    #[error("installation annotation does not match every cluster hosting the installation")]
    InstallationAnnotationDoNotMatchClusters,

    #[error("unique constraint violation: {message}")]
    Constraint { message: String },

    #[error("schema migration from {from} to {to} failed: {source}")]
    Migration {
        from: String,
        to: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("store I/O error during {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Wraps a driver error, classifying it as a constraint violation when
    /// the driver's message names one (see spec §6 error taxonomy), and as
    /// opaque I/O otherwise.
    pub(crate) fn from_driver(operation: &'static str, source: sqlx::Error) -> Self {
        let message = source.to_string();
        if message.to_lowercase().contains("unique constraint") {
            StoreError::Constraint { message }
        } else {
            StoreError::Io { operation, source }
        }
    }
}
