//! Persistence and coordination core for the cloud control plane: entity
//! CRUD, row-level leases, schema migration, placement, pending-work
//! scanning, and event/subscription delivery over a single SQLite-or-Postgres
//! backing store.

mod clock;
mod config;
mod dialect;
mod error;
mod ids;
mod kernel;
mod lease;
mod migrate;
mod model;
mod paging;
mod store;

#[cfg(test)]
mod test_support;

pub use clock::Clock;
pub use config::DSN_ENV_VAR;
pub use config::StoreConfig;
pub use dialect::Dialect;
pub use error::StoreError;
pub use error::StoreResult;
pub use ids::new_id;
pub use kernel::Store;
pub use lease::LeasedTable;
pub use migrate::DATABASE_VERSION_KEY;
pub use paging::ALL_PER_PAGE;
pub use paging::Paging;

pub use model::annotation::AnnotatedKind;
pub use model::annotation::Annotation;

pub use model::backup::BackupMetadata;
pub use model::backup::BackupMetadataFilter;
pub use model::backup::NewBackupMetadata;
pub use model::backup::PENDING_STATES as BACKUP_PENDING_STATES;

pub use model::cluster::Cluster;
pub use model::cluster::ClusterFilter;
pub use model::cluster::NewCluster;
pub use model::cluster::PENDING_STATES as CLUSTER_PENDING_STATES;

pub use model::cluster_installation::ClusterInstallation;
pub use model::cluster_installation::ClusterInstallationFilter;
pub use model::cluster_installation::NewClusterInstallation;
pub use model::cluster_installation::PENDING_STATES as CLUSTER_INSTALLATION_PENDING_STATES;

pub use model::database::DatabaseSchema;
pub use model::database::LogicalDatabase;
pub use model::database::MultitenantDatabase;
pub use model::database::MultitenantDatabaseFilter;
pub use model::database::NewMultitenantDatabase;
pub use model::database::ProxyDatabaseResources;

pub use model::event::DELIVERY_DELIVERED;
pub use model::event::DELIVERY_FAILED;
pub use model::event::DELIVERY_NOT_ATTEMPTED;
pub use model::event::DELIVERY_RETRYING;
pub use model::event::DeliveryWithEvent;
pub use model::event::Event;
pub use model::event::EventDelivery;
pub use model::event::NewStateChangeEvent;
pub use model::event::StateChangeEvent;

pub use model::group::Group;
pub use model::group::GroupFilter;
pub use model::group::NewGroup;

pub use model::installation::Installation;
pub use model::installation::InstallationFilter;
pub use model::installation::NewInstallation;
pub use model::installation::PENDING_STATES as INSTALLATION_PENDING_STATES;

pub use model::installation_dns::InstallationDns;
pub use model::installation_dns::NewInstallationDns;

pub use model::subscription::NewSubscription;
pub use model::subscription::Subscription;
pub use model::subscription::SubscriptionFilter;

pub use model::webhook::NewWebhook;
pub use model::webhook::Webhook;
pub use model::webhook::WebhookFilter;
