mod media;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use assetup_bridge::{Collaborators, LoggingFeedback, SequentialPreviews};
use assetup_contract::{BatchMetadata, BatchTarget, ROOT_FOLDER};
use assetup_orchestrator::{OrchestratorHandle, PipelineConfig, UploadOrchestrator};
use assetup_storage::{CatalogStorage, LocalAssetConfig, LocalAssetRepository, StorageConfig};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "Batch asset upload pipeline")]
struct Cli {
    #[arg(long, global = true, default_value = "config/assetup.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage projects in the catalog.
    Project {
        #[command(subcommand)]
        command: ProjectCommand,
    },
    /// Manage folders inside a project.
    Folder {
        #[command(subcommand)]
        command: FolderCommand,
    },
    /// Upload local files as one batch.
    Upload {
        #[arg(long)]
        project: String,
        #[arg(long, default_value = ROOT_FOLDER)]
        folder: String,
        #[arg(long)]
        license: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        max_concurrent: Option<usize>,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
enum ProjectCommand {
    Create { name: String },
    List,
}

#[derive(Debug, Subcommand)]
enum FolderCommand {
    Create {
        #[arg(long)]
        project: String,
        name: String,
    },
    List {
        #[arg(long)]
        project: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct RuntimeConfig {
    #[serde(default)]
    pipeline: PipelineConfig,
    storage: StorageConfig,
    assets: LocalAssetConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let catalog = CatalogStorage::connect(&config.storage).await?;

    match cli.command {
        Command::Project { command } => project(&catalog, command).await,
        Command::Folder { command } => folder(&catalog, command).await,
        Command::Upload {
            project,
            folder,
            license,
            tags,
            max_concurrent,
            files,
        } => {
            let mut pipeline = config.pipeline.clone();
            if let Some(limit) = max_concurrent {
                pipeline.max_concurrent_transfers = limit;
            }
            let target = BatchTarget::new(project, folder);
            let metadata = BatchMetadata { license, tags };
            upload(catalog, config.assets, pipeline, target, metadata, files).await
        }
    }
}

fn load_config(path: &Path) -> Result<RuntimeConfig> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&source).with_context(|| format!("invalid config TOML at {}", path.display()))
}

async fn project(catalog: &CatalogStorage, command: ProjectCommand) -> Result<()> {
    match command {
        ProjectCommand::Create { name } => {
            let record = catalog.create_project(&name).await?;
            info!(project_id = %record.project_id, name = %record.name, "project created");
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        ProjectCommand::List => {
            let records = catalog.list_projects().await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }
    Ok(())
}

async fn folder(catalog: &CatalogStorage, command: FolderCommand) -> Result<()> {
    match command {
        FolderCommand::Create { project, name } => {
            let record = catalog.create_folder(&project, &name).await?;
            info!(folder_id = %record.folder_id, project_id = %record.project_id, "folder created");
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        FolderCommand::List { project } => {
            let records = catalog.list_folders(&project).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }
    Ok(())
}

async fn upload(
    catalog: CatalogStorage,
    assets: LocalAssetConfig,
    pipeline: PipelineConfig,
    target: BatchTarget,
    metadata: BatchMetadata,
    paths: Vec<PathBuf>,
) -> Result<()> {
    let feedback = Arc::new(LoggingFeedback);
    let collaborators = Collaborators {
        projects: Arc::new(catalog.clone()),
        folders: Arc::new(catalog.clone()),
        assets: Arc::new(LocalAssetRepository::new(assets, catalog)),
        notifications: feedback.clone(),
        refresh: feedback.clone(),
        navigation: feedback,
        previews: Arc::new(SequentialPreviews::new()),
    };
    let handle = UploadOrchestrator::spawn(pipeline, collaborators);

    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        files.push(media::raw_file(path).await?);
    }
    let report = handle.add_files(files).await?;
    for rejected in &report.rejected {
        warn!(name = %rejected.name, reason = %rejected.reason, "file skipped");
    }
    if report.admitted.is_empty() {
        bail!("none of the {} file(s) can be uploaded", paths.len());
    }

    let progress = tokio::spawn(log_progress(handle.clone()));
    let started = handle.start(target, metadata).await?;
    info!(
        batch_id = %started.batch_id,
        target = %started.target.display_name(),
        files = report.admitted.len(),
        "upload running, ctrl-c cancels"
    );

    let outcome = started.wait();
    tokio::pin!(outcome);
    let result = tokio::select! {
        result = &mut outcome => result?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            warn!("interrupt received, cancelling remaining items");
            cancel_all(&handle).await;
            outcome.await?
        }
    };
    progress.abort();

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        bail!("{} file(s) failed to upload", result.errored_count);
    }
    Ok(())
}

async fn log_progress(handle: OrchestratorHandle) {
    let mut snapshots = Box::pin(handle.snapshots());
    while let Some(snapshot) = snapshots.next().await {
        info!(
            percent = snapshot.overall_percent,
            done = snapshot.completed_count,
            total = snapshot.total_count,
            bytes_per_sec = snapshot.throughput_bytes_per_sec as u64,
            eta_secs = snapshot.eta_secs,
            "progress"
        );
    }
}

async fn cancel_all(handle: &OrchestratorHandle) {
    let items = match handle.items().await {
        Ok(items) => items,
        Err(err) => {
            warn!(error = %err, "could not list items to cancel");
            return;
        }
    };
    for item in items.into_iter().filter(|item| !item.status.is_terminal()) {
        if let Err(err) = handle.cancel(&item.id).await {
            warn!(item_id = %item.id, error = %err, "cancel failed");
        }
    }
}
