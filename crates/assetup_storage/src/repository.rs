use anyhow::{bail, Context, Result};
use assetup_bridge::{FolderInfo, FolderRepository, ProjectInfo, ProjectRepository, RepositoryError};
use assetup_contract::new_id;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use tracing::info;

const SCHEMA_SQL: &str = include_str!("sql/schema.sql");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub sqlite_path: String,
}

/// SQLite catalog of projects, folders and finalized assets.
#[derive(Debug, Clone)]
pub struct CatalogStorage {
    pool: SqlitePool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProjectRecord {
    pub project_id: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FolderRecord {
    pub folder_id: String,
    pub project_id: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AssetRecord {
    pub asset_id: String,
    pub project_id: String,
    pub folder_id: String,
    pub name: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub license: Option<String>,
    pub tags_json: String,
    pub stored_path: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewAsset {
    pub asset_id: String,
    pub project_id: String,
    pub folder_id: String,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub license: Option<String>,
    pub tags: Vec<String>,
    pub stored_path: String,
}

impl CatalogStorage {
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let uri = normalize_sqlite_uri(&config.sqlite_path);
        let options = SqliteConnectOptions::from_str(&uri)
            .with_context(|| format!("invalid sqlite URI: {}", uri))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect sqlite pool")?;

        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA_SQL.split(';') {
            let sql = statement.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("migration failed for statement: {sql}"))?;
        }
        info!("assetup sqlite schema ready");
        Ok(())
    }

    pub async fn create_project(&self, name: &str) -> Result<ProjectRecord> {
        let project_id = new_id();
        let now = Utc::now().to_rfc3339();

        sqlx::query("INSERT INTO projects(project_id, name, created_at) VALUES (?, ?, ?)")
            .bind(&project_id)
            .bind(name)
            .bind(&now)
            .execute(&self.pool)
            .await
            .context("insert project")?;

        self.get_project_record(&project_id)
            .await?
            .context("project missing after insert")
    }

    pub async fn get_project_record(&self, project_id: &str) -> Result<Option<ProjectRecord>> {
        sqlx::query_as::<_, ProjectRecord>(
            "SELECT project_id, name, created_at FROM projects WHERE project_id = ?",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("query project {project_id}"))
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectRecord>> {
        sqlx::query_as::<_, ProjectRecord>(
            "SELECT project_id, name, created_at FROM projects ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("query projects")
    }

    pub async fn create_folder(&self, project_id: &str, name: &str) -> Result<FolderRecord> {
        if self.get_project_record(project_id).await?.is_none() {
            bail!("project {project_id} does not exist");
        }

        let folder_id = new_id();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO folders(folder_id, project_id, name, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&folder_id)
        .bind(project_id)
        .bind(name)
        .bind(&now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert folder into project {project_id}"))?;

        self.get_folder_record(&folder_id)
            .await?
            .context("folder missing after insert")
    }

    pub async fn get_folder_record(&self, folder_id: &str) -> Result<Option<FolderRecord>> {
        sqlx::query_as::<_, FolderRecord>(
            "SELECT folder_id, project_id, name, created_at FROM folders WHERE folder_id = ?",
        )
        .bind(folder_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("query folder {folder_id}"))
    }

    pub async fn list_folders(&self, project_id: &str) -> Result<Vec<FolderRecord>> {
        sqlx::query_as::<_, FolderRecord>(
            "SELECT folder_id, project_id, name, created_at FROM folders WHERE project_id = ? ORDER BY name ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("query folders of project {project_id}"))
    }

    pub async fn record_asset(&self, asset: &NewAsset) -> Result<AssetRecord> {
        let now = Utc::now().to_rfc3339();
        let tags_json = serde_json::to_string(&asset.tags).context("serialize asset tags")?;
        let size_bytes = i64::try_from(asset.size_bytes).context("asset size exceeds i64")?;

        sqlx::query(
            "INSERT INTO assets(asset_id, project_id, folder_id, name, size_bytes, mime_type, license, tags_json, stored_path, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&asset.asset_id)
        .bind(&asset.project_id)
        .bind(&asset.folder_id)
        .bind(&asset.name)
        .bind(size_bytes)
        .bind(&asset.mime_type)
        .bind(asset.license.as_deref())
        .bind(&tags_json)
        .bind(&asset.stored_path)
        .bind(&now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert asset {}", asset.asset_id))?;

        sqlx::query_as::<_, AssetRecord>(
            "SELECT asset_id, project_id, folder_id, name, size_bytes, mime_type, license, tags_json, stored_path, created_at FROM assets WHERE asset_id = ?",
        )
        .bind(&asset.asset_id)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("query asset {}", asset.asset_id))
    }

    pub async fn list_assets(&self, project_id: &str, folder_id: &str) -> Result<Vec<AssetRecord>> {
        sqlx::query_as::<_, AssetRecord>(
            "SELECT asset_id, project_id, folder_id, name, size_bytes, mime_type, license, tags_json, stored_path, created_at FROM assets WHERE project_id = ? AND folder_id = ? ORDER BY created_at ASC",
        )
        .bind(project_id)
        .bind(folder_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("query assets of {project_id}/{folder_id}"))
    }

    /// Returns whether a row was removed.
    pub async fn delete_asset(&self, asset_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM assets WHERE asset_id = ?")
            .bind(asset_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("delete asset {asset_id}"))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ProjectRepository for CatalogStorage {
    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectInfo>, RepositoryError> {
        let record = self
            .get_project_record(project_id)
            .await
            .map_err(|err| RepositoryError::Backend(format!("{err:#}")))?;
        Ok(record.map(|row| ProjectInfo {
            id: row.project_id,
            name: row.name,
        }))
    }
}

#[async_trait]
impl FolderRepository for CatalogStorage {
    async fn get_folder(
        &self,
        _project_id: &str,
        folder_id: &str,
    ) -> Result<Option<FolderInfo>, RepositoryError> {
        let record = self
            .get_folder_record(folder_id)
            .await
            .map_err(|err| RepositoryError::Backend(format!("{err:#}")))?;
        Ok(record.map(|row| FolderInfo {
            id: row.folder_id,
            project_id: row.project_id,
            name: row.name,
        }))
    }
}

fn normalize_sqlite_uri(raw: &str) -> String {
    if raw.starts_with("sqlite:") {
        raw.to_string()
    } else {
        format!("sqlite://{raw}")
    }
}

#[cfg(test)]
mod tests {
    use super::{CatalogStorage, NewAsset, StorageConfig};
    use assetup_bridge::{FolderRepository, ProjectRepository};
    use tempfile::TempDir;

    async fn catalog(dir: &TempDir) -> CatalogStorage {
        let path = dir.path().join("catalog.db");
        CatalogStorage::connect(&StorageConfig {
            sqlite_path: path.display().to_string(),
        })
        .await
        .expect("connect")
    }

    #[tokio::test]
    async fn folders_report_their_owning_project() {
        let dir = TempDir::new().expect("tempdir");
        let storage = catalog(&dir).await;
        let alpha = storage.create_project("Alpha").await.expect("project");
        let beta = storage.create_project("Beta").await.expect("project");
        let folder = storage
            .create_folder(&beta.project_id, "Renders")
            .await
            .expect("folder");

        let info = storage
            .get_folder(&alpha.project_id, &folder.folder_id)
            .await
            .expect("lookup")
            .expect("folder exists");
        assert_eq!(info.project_id, beta.project_id);

        let project = storage
            .get_project(&alpha.project_id)
            .await
            .expect("lookup")
            .expect("project exists");
        assert_eq!(project.name, "Alpha");
    }

    #[tokio::test]
    async fn folder_requires_existing_project() {
        let dir = TempDir::new().expect("tempdir");
        let storage = catalog(&dir).await;
        assert!(storage.create_folder("nope", "Orphan").await.is_err());
    }

    #[tokio::test]
    async fn assets_are_listed_per_location() {
        let dir = TempDir::new().expect("tempdir");
        let storage = catalog(&dir).await;
        let project = storage.create_project("Alpha").await.expect("project");

        let record = storage
            .record_asset(&NewAsset {
                asset_id: "a1".to_string(),
                project_id: project.project_id.clone(),
                folder_id: "root".to_string(),
                name: "cover.png".to_string(),
                size_bytes: 2048,
                mime_type: "image/png".to_string(),
                license: Some("CC-BY-4.0".to_string()),
                tags: vec!["cover".to_string()],
                stored_path: "/tmp/cover.png".to_string(),
            })
            .await
            .expect("record");
        assert_eq!(record.size_bytes, 2048);
        assert_eq!(record.tags_json, "[\"cover\"]");

        let listed = storage
            .list_assets(&project.project_id, "root")
            .await
            .expect("list");
        assert_eq!(listed.len(), 1);
        assert!(storage
            .list_assets(&project.project_id, "other")
            .await
            .expect("list")
            .is_empty());

        assert!(storage.delete_asset("a1").await.expect("delete"));
        assert!(!storage.delete_asset("a1").await.expect("delete again"));
        assert!(storage
            .list_assets(&project.project_id, "root")
            .await
            .expect("list")
            .is_empty());
    }
}
