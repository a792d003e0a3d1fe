//! Operator CLI for the cloud store: applying migrations and breaking
//! stuck leases out of band, mirroring the teacher's small `clap`-derived
//! maintenance binaries.

use clap::Parser;
use clap::Subcommand;
use cloud_store::LeasedTable;
use cloud_store::Store;
use cloud_store::StoreConfig;

#[derive(Parser)]
#[command(name = "store-admin", about = "Cloud store maintenance CLI")]
struct Cli {
    /// Store DSN; falls back to CLOUD_STORE_DSN if unset.
    #[arg(long, env = "CLOUD_STORE_DSN")]
    dsn: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Applies every pending schema migration.
    Migrate,
    /// Forcibly releases a lease an operator has confirmed is stale.
    Unlock {
        #[arg(value_enum)]
        table: UnlockTable,
        id: String,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum UnlockTable {
    Cluster,
    Installation,
    ClusterInstallation,
    Group,
    MultitenantDatabase,
    Subscription,
    BackupMetadata,
}

impl From<UnlockTable> for LeasedTable {
    fn from(table: UnlockTable) -> Self {
        match table {
            UnlockTable::Cluster => LeasedTable::Cluster,
            UnlockTable::Installation => LeasedTable::Installation,
            UnlockTable::ClusterInstallation => LeasedTable::ClusterInstallation,
            UnlockTable::Group => LeasedTable::Group,
            UnlockTable::MultitenantDatabase => LeasedTable::MultitenantDatabase,
            UnlockTable::Subscription => LeasedTable::Subscription,
            UnlockTable::BackupMetadata => LeasedTable::BackupMetadata,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let store = Store::connect(&StoreConfig::new(cli.dsn)).await?;

    match cli.command {
        Command::Migrate => {
            let applied = store.migrate().await?;
            tracing::info!(applied, "migration complete");
        }
        Command::Unlock { table, id } => {
            let released = store
                .release_lease(table.into(), &[id.as_str()], "store-admin", true)
                .await?;
            tracing::info!(id, released, "forced lease release");
        }
    }
    Ok(())
}
