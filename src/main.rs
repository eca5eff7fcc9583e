use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chatvault::cloud_storage::{CloudStorage, LocalCloudStorage, S3CloudStorage};
use chatvault::config::Config;
use chatvault::db::Database;
use chatvault::import::{ArchiveExtractor, BatchImporter, ImportLocks, ImportService};
use chatvault::media_store::MediaStore;

#[derive(Parser, Debug)]
#[command(name = "chatvault", version, about = "Chat history archive importer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import every export archive found in the import directory
    Import {
        /// Conversation the archives belong to
        #[arg(long, allow_negative_numbers = true)]
        conversation_id: i64,
        /// Directory to scan (overrides CHATVAULT_IMPORT_DIR)
        #[arg(long)]
        import_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Import {
            conversation_id,
            import_dir,
        } => {
            let import_dir = import_dir.unwrap_or_else(|| config.import_dir.clone());
            run_import(&config, conversation_id, import_dir).await
        }
    }
}

async fn run_import(config: &Config, conversation_id: i64, import_dir: PathBuf) -> Result<()> {
    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let database = Database::new(&config.database_path.to_string_lossy())
        .await
        .context("Failed to open database")?;

    let media = MediaStore::new(build_storage(config).await?)
        .await
        .context("Failed to provision media store")?;

    let service = ImportService::new(
        Arc::new(database),
        media,
        ImportLocks::new(),
        config.import_chunk_size,
    );
    let extractor = ArchiveExtractor::new(config.work_dir.clone(), config.max_import_bytes());
    let importer = BatchImporter::new(extractor, service, config.progress_interval);

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current chunk");
            ctrl_c_token.cancel();
        }
    });

    let summary = importer
        .import_directory(conversation_id, &import_dir, cancel)
        .await;

    info!(
        "Imported {}/{} archive(s) into conversation {}",
        summary.succeeded, summary.total, conversation_id
    );
    if summary.failed > 0 {
        bail!("{} of {} archive(s) failed to import", summary.failed, summary.total);
    }
    Ok(())
}

async fn build_storage(config: &Config) -> Result<Arc<dyn CloudStorage>> {
    if config.use_local_storage {
        let root = config.storage_root();
        info!("Using local media storage at {}", root.display());
        return Ok(Arc::new(LocalCloudStorage::new(root)));
    }

    let s3_config = config
        .s3
        .clone()
        .context("S3 settings are required unless local storage is enabled")?;
    info!("Using S3 media storage, bucket {}", s3_config.bucket_name);
    let storage = S3CloudStorage::new(s3_config)
        .await
        .context("Failed to create S3 client")?;
    Ok(Arc::new(storage))
}
