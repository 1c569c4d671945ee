//! Blobway command-line client

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::fs::File;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use blobway::config::{AppConfig, LogFormat};
use blobway::{ByteRange, DeleteOptions, DownloadOptions, OperationResult, StorageAdapter};

#[derive(Parser)]
#[command(name = "blobway")]
#[command(about = "Container and blob operations against object storage")]
struct Cli {
    #[arg(long, help = "Config file path (overrides BLOBWAY_CONFIG)")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the container if it does not exist
    EnsureContainer { name: String },
    /// Count the blobs in a container
    List { container: String },
    /// Upload a local file as a blob
    Upload {
        container: String,
        blob: String,
        file: String,
    },
    /// Download a blob into a local file
    Download {
        container: String,
        blob: String,
        file: String,
        #[arg(long, help = "First byte to fetch")]
        start: Option<u64>,
        #[arg(long, help = "Last byte to fetch (inclusive)", requires = "start")]
        end: Option<u64>,
    },
    /// Delete a blob
    DeleteBlob {
        container: String,
        blob: String,
        #[arg(long)]
        version_id: Option<String>,
    },
    /// Delete a container if it exists
    DeleteContainer { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .context("failed to load configuration")?;

    init_tracing(&config)?;

    let backend = config.backend().context("invalid storage configuration")?;
    let adapter = StorageAdapter::bind_with(
        config.account.name.clone(),
        config.account.access_key.clone(),
        &backend,
    )
    .context("invalid account configuration")?;
    tracing::info!(account = adapter.account(), "Storage adapter bound");

    let result = run(&adapter, cli.command).await?;
    println!("{}", serde_json::to_string(&result)?);

    Ok(())
}

async fn run(adapter: &StorageAdapter, command: Commands) -> Result<OperationResult> {
    let result = match command {
        Commands::EnsureContainer { name } => adapter.ensure_container(&name).await?,
        Commands::List { container } => adapter.list_blobs(&container).await?,
        Commands::Upload {
            container,
            blob,
            file,
        } => {
            let mut source = File::open(&file)
                .await
                .with_context(|| format!("failed to open {}", file))?;
            let size = source.metadata().await?.len();
            let result = adapter.upload_blob(&container, &blob, &mut source, size).await;
            drop(source);
            result?
        }
        Commands::Download {
            container,
            blob,
            file,
            start,
            end,
        } => {
            let options = DownloadOptions {
                range: start.map(|start| ByteRange { start, end }),
            };
            let mut dest = File::create(&file)
                .await
                .with_context(|| format!("failed to create {}", file))?;
            let result = adapter
                .download_blob(&container, &blob, &mut dest, Some(&options))
                .await;
            match result {
                Ok(result) => {
                    dest.sync_all().await?;
                    result
                }
                Err(err) => {
                    // Leave no empty or truncated file behind
                    drop(dest);
                    if let Err(remove_err) = tokio::fs::remove_file(&file).await {
                        tracing::warn!(file = %file, error = %remove_err, "Failed to remove partial download");
                    }
                    return Err(err.into());
                }
            }
        }
        Commands::DeleteBlob {
            container,
            blob,
            version_id,
        } => {
            let options = DeleteOptions { version_id };
            adapter.delete_blob(&container, &blob, Some(&options)).await?
        }
        Commands::DeleteContainer { name } => adapter.delete_container_if_exists(&name).await?,
    };

    Ok(result)
}

fn init_tracing(config: &AppConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.logging.level.clone()))
        .unwrap_or_else(|_| EnvFilter::new("blobway=info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Results go to stdout, so logs stay on stderr.
    match config.logging.format {
        LogFormat::Json => {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        LogFormat::Text => {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobway::BackendConfig;
    use tempfile::TempDir;

    fn local_adapter(root: &TempDir) -> StorageAdapter {
        let config = BackendConfig::Local {
            root_path: root.path().join("store").to_string_lossy().into_owned(),
        };
        StorageAdapter::bind_with("account", "key", &config).unwrap()
    }

    #[tokio::test]
    async fn failed_download_removes_output_file() {
        let temp_dir = TempDir::new().unwrap();
        let adapter = local_adapter(&temp_dir);
        adapter.ensure_container("c").await.unwrap();
        let output = temp_dir.path().join("out.bin");

        let command = Commands::Download {
            container: "c".to_string(),
            blob: "missing.bin".to_string(),
            file: output.to_string_lossy().into_owned(),
            start: None,
            end: None,
        };
        let err = run(&adapter, command).await.unwrap_err();
        let backend = err.downcast_ref::<blobway::Error>().unwrap();
        assert!(backend.is_not_found());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn successful_download_keeps_output_file() {
        let temp_dir = TempDir::new().unwrap();
        let adapter = local_adapter(&temp_dir);
        adapter.ensure_container("c").await.unwrap();
        let mut source: &[u8] = b"payload";
        adapter.upload_blob("c", "b", &mut source, 7).await.unwrap();
        let output = temp_dir.path().join("out.bin");

        let command = Commands::Download {
            container: "c".to_string(),
            blob: "b".to_string(),
            file: output.to_string_lossy().into_owned(),
            start: Some(3),
            end: None,
        };
        let result = run(&adapter, command).await.unwrap();
        assert!(result.is_success());
        assert_eq!(std::fs::read(&output).unwrap(), b"load");
    }
}
