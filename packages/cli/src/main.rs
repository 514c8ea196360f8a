use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use lobstore::config::StoreConfig;
use lobstore::storage::postgres::PostgresBlobStore;
use lobstore::{BlobStore, ContentHash, FsObjectCatalog};
use sea_orm::TransactionTrait;
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "lobstore",
    version,
    about = "Store and retrieve files kept in PostgreSQL large objects"
)]
struct Cli {
    /// Database URL, overriding the configuration file
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a file and print its digest
    Put {
        path: PathBuf,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Write a stored file to stdout, or to --output
    Get {
        digest: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check that a stored file's large object can still be opened
    Check { digest: String },
    /// Print the description recorded for a file
    Describe { digest: String },
    /// List every catalogued file
    List,
    /// Delete one file
    Delete { digest: String },
    /// Delete every catalogued file (unreferenced large objects are not found)
    Purge {
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = StoreConfig::load().context("Failed to load config")?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }

    let db = lobstore::database::init_db(&config.database)
        .await
        .context("Failed to connect to database")?;
    let store = PostgresBlobStore::new(db.clone(), &config.storage);

    match cli.command {
        Command::Put { path, description } => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let hash = store.put_with_description(&data, description).await?;
            info!(%hash, size = data.len(), "Stored file");
            println!("{hash}");
        }
        Command::Get { digest, output } => {
            let data = store.get(&parse_digest(&digest)?).await?;
            match output {
                Some(path) => tokio::fs::write(&path, &data)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&data).await?;
                    stdout.flush().await?;
                }
            }
        }
        Command::Check { digest } => {
            if !store.exists(&parse_digest(&digest)?).await? {
                bail!("{digest} is missing or its large object cannot be opened");
            }
            println!("ok");
        }
        Command::Describe { digest } => {
            let description = store.describe(&parse_digest(&digest)?).await?;
            println!("{}", description.unwrap_or_default());
        }
        Command::List => {
            let scan = FsObjectCatalog::new(&db).get_all().await?;
            let mut records = scan.stream(&db).await?;
            while let Some(record) = records.try_next().await? {
                println!(
                    "{}\t{}\t{}",
                    record.digest,
                    record.object_id,
                    record.description.as_deref().unwrap_or("")
                );
            }
        }
        Command::Delete { digest } => {
            if !store.delete(&parse_digest(&digest)?).await? {
                bail!("{digest} is not stored");
            }
        }
        Command::Purge { yes } => {
            if !yes {
                bail!("Refusing to delete every stored file without --yes");
            }
            let txn = db.begin().await?;
            let deleted = FsObjectCatalog::new(&txn).delete_all().await?;
            txn.commit().await?;
            info!(deleted, "Purge complete");
        }
    }

    Ok(())
}

fn parse_digest(digest: &str) -> anyhow::Result<ContentHash> {
    digest
        .parse()
        .with_context(|| format!("{digest:?} is not a SHA-256 digest"))
}
