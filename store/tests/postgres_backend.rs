//! Exercises the store against a real Postgres backend rather than the
//! SQLite driver the unit tests use everywhere else. Postgres folds every
//! unquoted identifier in a DDL statement to lowercase, so this is the only
//! place that would catch a `SELECT`/`from_row` pair whose column aliasing
//! silently drifted out of sync (spec §6 "exact column names are stable").
//!
//! Skipped unless `CLOUD_STORE_TEST_POSTGRES_DSN` points at a reachable
//! Postgres database, since CI and most dev machines don't run one.

#![allow(clippy::expect_used)]

use cloud_store::NewCluster;
use cloud_store::NewInstallation;
use cloud_store::NewMultitenantDatabase;
use cloud_store::NewStateChangeEvent;
use cloud_store::NewSubscription;
use cloud_store::Store;
use cloud_store::StoreConfig;
use cloud_store::new_id;

async fn postgres_store() -> Option<Store> {
    let dsn = std::env::var("CLOUD_STORE_TEST_POSTGRES_DSN").ok()?;
    let config = StoreConfig::new(dsn);
    let store = Store::connect(&config)
        .await
        .expect("connect to postgres test database");
    store
        .migrate()
        .await
        .expect("migrate postgres test database");
    Some(store)
}

#[tokio::test]
async fn round_trips_a_cluster_through_postgres() {
    let Some(store) = postgres_store().await else {
        eprintln!("skipping: CLOUD_STORE_TEST_POSTGRES_DSN not set");
        return;
    };
    let id = new_id();
    store
        .create_cluster(NewCluster {
            id: id.clone(),
            provider: "aws".into(),
            provisioner: "kops".into(),
            provider_metadata_json: None,
            provisioner_metadata_json: None,
            state: "creation-requested".into(),
            allow_installations: true,
        })
        .await
        .expect("create cluster");

    let fetched = store
        .get_cluster(&id)
        .await
        .expect("get cluster")
        .expect("cluster round-trips through postgres");
    assert_eq!(fetched.id, id);
    assert_eq!(fetched.state, "creation-requested");

    assert!(
        store
            .acquire_lease(cloud_store::LeasedTable::Cluster, &[&id], "worker-a")
            .await
            .expect("acquire lease")
    );
    let locked = store
        .get_cluster(&id)
        .await
        .expect("get cluster")
        .expect("cluster exists");
    assert_eq!(locked.lock_acquired_by.as_deref(), Some("worker-a"));
}

#[tokio::test]
async fn round_trips_an_installation_with_json_columns_through_postgres() {
    let Some(store) = postgres_store().await else {
        eprintln!("skipping: CLOUD_STORE_TEST_POSTGRES_DSN not set");
        return;
    };
    let id = new_id();
    store
        .create_installation(NewInstallation {
            id: id.clone(),
            name: None,
            owner_id: "owner".into(),
            version: "1.0.0".into(),
            image: "mattermost".into(),
            size: "100users".into(),
            database: "postgres".into(),
            filestore: "s3".into(),
            group_id: None,
            single_tenant_database_config: None,
            external_database_config: None,
            cr_version: "v1beta1".into(),
            priority_env: None,
            state: "stable".into(),
            annotations: vec![],
        })
        .await
        .expect("create installation");

    let fetched = store
        .get_installation(&id)
        .await
        .expect("get installation")
        .expect("installation round-trips through postgres");
    assert_eq!(fetched.id, id);
    assert_eq!(fetched.database, "postgres");
}

#[tokio::test]
async fn placement_allocator_round_trips_through_postgres() {
    let Some(store) = postgres_store().await else {
        eprintln!("skipping: CLOUD_STORE_TEST_POSTGRES_DSN not set");
        return;
    };
    let multitenant_id = new_id();
    store
        .create_multitenant_database(NewMultitenantDatabase {
            id: multitenant_id.clone(),
            vpc_id: "vpc-1".into(),
            database_type: "aurora-postgres".into(),
            max_installations_per_logical_database: 2,
        })
        .await
        .expect("create multitenant database");

    let installation_id = new_id();
    let resources = store
        .get_or_create_proxy_database_resources_for_installation(&installation_id, &multitenant_id)
        .await
        .expect("allocate placement");
    assert_eq!(resources.multitenant_database.id, multitenant_id);
    assert!(
        resources
            .multitenant_database
            .installations
            .contains(&installation_id)
    );
}

#[tokio::test]
async fn event_delivery_claim_round_trips_through_postgres() {
    let Some(store) = postgres_store().await else {
        eprintln!("skipping: CLOUD_STORE_TEST_POSTGRES_DSN not set");
        return;
    };
    let event_type = new_id();
    let subscription_id = new_id();
    store
        .create_subscription(NewSubscription {
            id: subscription_id.clone(),
            name: subscription_id.clone(),
            url: "https://example.com/hook".into(),
            owner_id: "owner".into(),
            event_type: event_type.clone(),
            headers: None,
            failure_threshold_seconds: 3600,
        })
        .await
        .expect("create subscription");

    let created = store
        .create_state_change_event(NewStateChangeEvent {
            event_type: event_type.clone(),
            extra_data: None,
            resource_id: "r1".into(),
            resource_type: "installation".into(),
            old_state: "a".into(),
            new_state: "b".into(),
        })
        .await
        .expect("create state change event");
    assert_eq!(created, 1);

    let claimed = store
        .claim_up_to_date_subscription("worker-a")
        .await
        .expect("claim subscription");
    assert_eq!(claimed.id, subscription_id);

    let to_process = store
        .get_state_change_events_to_process(&subscription_id)
        .await
        .expect("list deliveries to process");
    assert_eq!(to_process.len(), 1);
}
