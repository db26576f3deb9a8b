//! Backup producer, restorer and archive management.
//!
//! Two strategies produce archives: the external dump tool (`.gz`) and an
//! in-process JSON export through the document store (`.json`). The active one
//! is picked by configuration, or by probing for the tool once per process.

pub mod dump;
pub mod naming;
pub mod retention;
pub mod snapshot;
pub mod store;

use crate::config::{AppConfig, MethodSelection};
use crate::db::connection::sqlite_path;
use crate::error::BackupError;
use crate::models::document::DocumentStore;
use chrono::{DateTime, SecondsFormat, Utc};
use dump::DumpTool;
use retention::RetentionReport;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use store::{ArchiveInfo, ArchiveStats, ArchiveStore};
use tokio::sync::OnceCell;
use uuid::Uuid;

const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupMethod {
    Dump,
    Json,
}

impl BackupMethod {
    pub fn extension(self) -> &'static str {
        match self {
            BackupMethod::Dump => "gz",
            BackupMethod::Json => "json",
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        match Path::new(name).extension().and_then(|e| e.to_str()) {
            Some("gz") => Some(BackupMethod::Dump),
            Some("json") => Some(BackupMethod::Json),
            _ => None,
        }
    }
}

impl fmt::Display for BackupMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupMethod::Dump => f.write_str("dump"),
            BackupMethod::Json => f.write_str("json"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResult {
    pub file_name: String,
    pub path: PathBuf,
    /// Size in MB, rounded to two decimals.
    pub size: f64,
    pub size_bytes: u64,
    pub timestamp: DateTime<Utc>,
    pub method: BackupMethod,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub file_name: String,
    pub method: BackupMethod,
    /// Documents restored per collection (JSON archives only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<BTreeMap<String, usize>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOverview {
    pub method: BackupMethod,
    pub backups: Vec<ArchiveInfo>,
    pub stats: ArchiveStats,
}

pub struct BackupService {
    archives: ArchiveStore,
    documents: Arc<dyn DocumentStore>,
    tool: DumpTool,
    selection: MethodSelection,
    tool_available: OnceCell<bool>,
    prefix: String,
    connection: Option<String>,
}

impl BackupService {
    pub fn new(config: &AppConfig, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            archives: ArchiveStore::new(&config.backups_dir),
            documents,
            tool: DumpTool::new(
                config.dump_tool.clone(),
                Duration::from_secs(config.tool_timeout_secs),
            ),
            selection: config.backup_method,
            tool_available: OnceCell::new(),
            prefix: config.backup_prefix.clone(),
            connection: config.database_url.clone(),
        }
    }

    pub fn archives(&self) -> &ArchiveStore {
        &self.archives
    }

    /// The strategy new archives are produced with. In `Auto` mode the tool is
    /// probed on first use and the answer kept for the life of the process.
    pub async fn active_method(&self) -> BackupMethod {
        match self.selection {
            MethodSelection::Dump => BackupMethod::Dump,
            MethodSelection::Json => BackupMethod::Json,
            MethodSelection::Auto => {
                let available = *self
                    .tool_available
                    .get_or_init(|| async {
                        let available = self.tool.probe().await;
                        if !available {
                            tracing::info!(
                                tool = %self.tool.program(),
                                "[Backup] Dump tool missing, falling back to JSON export"
                            );
                        }
                        available
                    })
                    .await;
                if available {
                    BackupMethod::Dump
                } else {
                    BackupMethod::Json
                }
            }
        }
    }

    fn database_path(&self) -> Result<PathBuf, BackupError> {
        let connection = self
            .connection
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or(BackupError::MissingConnection)?;
        sqlite_path(connection).ok_or_else(|| BackupError::InvalidConnection(connection.to_string()))
    }

    /// Produce one archive of the whole database.
    pub async fn create(&self) -> Result<BackupResult, BackupError> {
        let db_path = self.database_path()?;
        let method = self.active_method().await;
        self.archives.ensure_dir()?;

        let now = Utc::now();
        let file_name = naming::archive_name(&self.prefix, method, now);
        let partial = self
            .archives
            .dir()
            .join(format!(".{file_name}.{}.partial", Uuid::new_v4().simple()));

        tracing::info!(file = %file_name, %method, "[Backup] Creating backup");

        let produced = match method {
            BackupMethod::Dump => self.create_dump(&db_path, &partial).await,
            BackupMethod::Json => self.create_json(&partial, now).await,
        };
        if let Err(e) = produced {
            let _ = tokio::fs::remove_file(&partial).await;
            tracing::error!(file = %file_name, error = %e, "[Backup] Backup failed");
            return Err(e);
        }

        let (file_name, final_path) = self.publish(&partial, &file_name).await?;
        let size_bytes = tokio::fs::metadata(&final_path).await?.len();

        let result = BackupResult {
            file_name,
            path: final_path,
            size: naming::bytes_to_mb(size_bytes),
            size_bytes,
            timestamp: now,
            method,
        };
        tracing::info!(file = %result.file_name, size_mb = result.size, "[Backup] Backup created");
        Ok(result)
    }

    /// Move a finished archive into place without replacing an existing one.
    /// A name already taken within the same second gets a `-<n>` suffix.
    async fn publish(&self, partial: &Path, file_name: &str) -> Result<(String, PathBuf), BackupError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = if attempt == 0 {
                file_name.to_string()
            } else {
                naming::with_sequence(file_name, attempt)
            };
            let target = self.archives.dir().join(&candidate);
            match tokio::fs::hard_link(partial, &target).await {
                Ok(()) => {
                    let _ = tokio::fs::remove_file(partial).await;
                    return Ok((candidate, target));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    let _ = tokio::fs::remove_file(partial).await;
                    return Err(e.into());
                }
            }
        }

        let _ = tokio::fs::remove_file(partial).await;
        Err(BackupError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free archive name for {file_name}"),
        )))
    }

    async fn create_dump(&self, db_path: &Path, partial: &Path) -> Result<(), BackupError> {
        let staging = partial.with_extension("staging");
        let dumped = self.tool.dump(db_path, &staging).await;

        let compressed = match dumped {
            Ok(()) => {
                let (src, dst) = (staging.clone(), partial.to_path_buf());
                tokio::task::spawn_blocking(move || dump::gzip_file(&src, &dst))
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?
                    .map(|_| ())
                    .map_err(BackupError::from)
            }
            Err(e) => Err(e),
        };

        let _ = tokio::fs::remove_file(&staging).await;
        compressed
    }

    async fn create_json(&self, partial: &Path, now: DateTime<Utc>) -> Result<(), BackupError> {
        let documents = self.documents.clone();
        let path = partial.to_path_buf();
        let timestamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);

        let summary = tokio::task::spawn_blocking(move || {
            snapshot::export(documents.as_ref(), &path, &timestamp)
        })
        .await
        .map_err(|e| anyhow::anyhow!(e))??;

        tracing::info!(
            collections = summary.collections,
            documents = summary.documents,
            "[Backup] JSON export written"
        );
        Ok(())
    }

    /// Reload the database from an archive. The strategy follows the archive's
    /// extension, not the currently active method.
    pub async fn restore(&self, file_name: &str) -> Result<RestoreReport, BackupError> {
        let path = self.archives.existing_path(file_name)?;
        let method = BackupMethod::from_file_name(file_name)
            .ok_or_else(|| BackupError::InvalidName(file_name.to_string()))?;

        tracing::info!(file = %file_name, %method, "[Restore] Restoring backup");

        let collections = match method {
            BackupMethod::Dump => {
                let db_path = self.database_path()?;
                if !self.tool.probe().await {
                    return Err(BackupError::ToolUnavailable(self.tool.program().to_string()));
                }
                self.restore_dump(&db_path, file_name, &path).await?;
                None
            }
            BackupMethod::Json => {
                let documents = self.documents.clone();
                let restored =
                    tokio::task::spawn_blocking(move || snapshot::restore(documents.as_ref(), &path))
                        .await
                        .map_err(|e| anyhow::anyhow!(e))??;
                Some(restored)
            }
        };

        tracing::info!(file = %file_name, "[Restore] Restore completed");
        Ok(RestoreReport {
            file_name: file_name.to_string(),
            method,
            collections,
        })
    }

    async fn restore_dump(
        &self,
        db_path: &Path,
        file_name: &str,
        archive: &Path,
    ) -> Result<(), BackupError> {
        let staging = self.archives.dir().join(format!(".{file_name}.restore"));
        let (src, dst) = (archive.to_path_buf(), staging.clone());
        let unpacked = tokio::task::spawn_blocking(move || dump::gunzip_file(&src, &dst))
            .await
            .map_err(|e| anyhow::anyhow!(e))?;

        let restored = match unpacked {
            Ok(_) => self.tool.restore(db_path, &staging).await,
            Err(e) => Err(e.into()),
        };

        let _ = tokio::fs::remove_file(&staging).await;
        restored
    }

    pub async fn list(&self) -> Result<Vec<ArchiveInfo>, BackupError> {
        let method = self.active_method().await;
        let archives = self.archives.clone();
        tokio::task::spawn_blocking(move || archives.list(method.extension()))
            .await
            .map_err(|e| anyhow::anyhow!(e))?
    }

    pub async fn overview(&self) -> Result<BackupOverview, BackupError> {
        let method = self.active_method().await;
        let backups = self.list().await?;
        let stats = store::stats(&backups);
        Ok(BackupOverview {
            method,
            backups,
            stats,
        })
    }

    pub async fn delete(&self, file_name: &str) -> Result<(), BackupError> {
        let archives = self.archives.clone();
        let name = file_name.to_string();
        tokio::task::spawn_blocking(move || archives.delete(&name))
            .await
            .map_err(|e| anyhow::anyhow!(e))?
    }

    /// Retention over the active method's archives.
    pub async fn clean(&self, keep: usize) -> Result<RetentionReport, BackupError> {
        let method = self.active_method().await;
        let archives = self.archives.clone();
        tokio::task::spawn_blocking(move || retention::apply(&archives, method.extension(), keep))
            .await
            .map_err(|e| anyhow::anyhow!(e))?
    }

    /// Path and metadata of an archive to stream back to a client.
    pub async fn locate(&self, file_name: &str) -> Result<(PathBuf, ArchiveInfo), BackupError> {
        let archives = self.archives.clone();
        let name = file_name.to_string();
        tokio::task::spawn_blocking(move || {
            let info = archives.info(&name)?;
            Ok::<_, BackupError>((archives.dir().join(&name), info))
        })
        .await
        .map_err(|e| anyhow::anyhow!(e))?
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::connection::DbPool;
    use crate::models::document::tests::test_pool;
    use crate::models::document::{self, SqliteDocumentStore};
    use serde_json::json;
    use tempfile::TempDir;

    pub(crate) fn json_config(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::for_data_dir(dir.path());
        config.backup_method = MethodSelection::Json;
        config
    }

    pub(crate) fn json_service(dir: &TempDir) -> (DbPool, BackupService) {
        let pool = test_pool(dir);
        let service = BackupService::new(
            &json_config(dir),
            Arc::new(SqliteDocumentStore::new(pool.clone())),
        );
        (pool, service)
    }

    #[test]
    fn test_method_from_file_name() {
        assert_eq!(BackupMethod::from_file_name("backup-2024.gz"), Some(BackupMethod::Dump));
        assert_eq!(BackupMethod::from_file_name("backup-api-2024.json"), Some(BackupMethod::Json));
        assert_eq!(BackupMethod::from_file_name("backup.tar"), None);
    }

    #[tokio::test]
    async fn test_create_json_backup() -> Result<(), BackupError> {
        let dir = TempDir::new()?;
        let (pool, service) = json_service(&dir);
        {
            let conn = pool.get().map_err(anyhow::Error::from)?;
            document::insert_many(&conn, "users", &[json!({ "_id": "u1" }), json!({ "_id": "u2" })])?;
        }

        let result = service.create().await?;
        assert_eq!(result.method, BackupMethod::Json);
        assert!(result.file_name.starts_with("backup-api-"));
        assert!(result.file_name.ends_with(".json"));
        assert!(result.path.is_file());
        assert!(result.size_bytes > 0);

        let listed = service.list().await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, result.file_name);

        // No staging or partial files left behind
        let leftovers = std::fs::read_dir(service.archives().dir())?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_same_second_creates_keep_every_archive() -> Result<(), BackupError> {
        let dir = TempDir::new()?;
        let (_pool, service) = json_service(&dir);

        let mut names = Vec::new();
        for _ in 0..3 {
            names.push(service.create().await?.file_name);
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 3);
        assert_eq!(service.list().await?.len(), 3);

        let leftovers = std::fs::read_dir(service.archives().dir())?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_connection_rejected_before_io() -> Result<(), BackupError> {
        let dir = TempDir::new()?;
        let pool = test_pool(&dir);
        let mut config = json_config(&dir);
        config.database_url = None;
        config.backups_dir = dir.path().join("never-created");
        let service = BackupService::new(&config, Arc::new(SqliteDocumentStore::new(pool)));

        assert!(matches!(service.create().await, Err(BackupError::MissingConnection)));
        assert!(!config.backups_dir.exists());

        config.database_url = Some("mongodb://localhost/shop".into());
        let pool = test_pool(&dir);
        let service = BackupService::new(&config, Arc::new(SqliteDocumentStore::new(pool)));
        assert!(matches!(service.create().await, Err(BackupError::InvalidConnection(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_missing_archive_is_not_found() -> Result<(), BackupError> {
        let dir = TempDir::new()?;
        let (pool, service) = json_service(&dir);
        {
            let conn = pool.get().map_err(anyhow::Error::from)?;
            document::insert_many(&conn, "products", &[json!({ "_id": "p1" })])?;
        }

        let err = service.restore("backup-api-1999-01-01T00-00-00.json").await.unwrap_err();
        assert!(err.is_not_found());

        let conn = pool.get().map_err(anyhow::Error::from)?;
        assert_eq!(document::count(&conn, "products")?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_json_backup_then_restore() -> Result<(), BackupError> {
        let dir = TempDir::new()?;
        let (pool, service) = json_service(&dir);
        {
            let conn = pool.get().map_err(anyhow::Error::from)?;
            document::insert_many(
                &conn,
                "products",
                &[json!({ "_id": "p1", "name": "Alfajor", "price": 900 })],
            )?;
        }
        let backup = service.create().await?;

        {
            let conn = pool.get().map_err(anyhow::Error::from)?;
            document::delete_all(&conn, "products")?;
            document::insert_many(&conn, "categories", &[json!({ "_id": "c9" })])?;
        }

        let report = service.restore(&backup.file_name).await?;
        assert_eq!(report.method, BackupMethod::Json);
        let collections = report.collections.expect("json restore reports collections");
        assert_eq!(collections.get("products"), Some(&1));
        assert_eq!(collections.get("categories"), Some(&0));

        let conn = pool.get().map_err(anyhow::Error::from)?;
        assert_eq!(document::find_all(&conn, "products")?[0]["name"], "Alfajor");
        assert_eq!(document::count(&conn, "categories")?, 0);
        // The archive itself survives a restore
        assert!(backup.path.is_file());
        Ok(())
    }

    #[tokio::test]
    async fn test_dump_backup_then_restore() -> Result<(), BackupError> {
        if !DumpTool::new("sqlite3", Duration::from_secs(10)).probe().await {
            eprintln!("sqlite3 not on PATH, skipping dump round trip");
            return Ok(());
        }

        let dir = TempDir::new()?;
        let pool = test_pool(&dir);
        let mut config = AppConfig::for_data_dir(dir.path());
        config.backup_method = MethodSelection::Dump;
        config.database_url = Some(format!("sqlite://{}", dir.path().join("shop.db").display()));
        let service = BackupService::new(&config, Arc::new(SqliteDocumentStore::new(pool.clone())));
        {
            let conn = pool.get().map_err(anyhow::Error::from)?;
            document::insert_many(&conn, "products", &[json!({ "_id": "p1", "name": "Alfajor" })])?;
        }

        let backup = service.create().await?;
        assert_eq!(backup.method, BackupMethod::Dump);
        assert!(backup.file_name.ends_with(".gz"));
        assert!(backup.size_bytes > 0);

        {
            let conn = pool.get().map_err(anyhow::Error::from)?;
            document::delete_all(&conn, "products")?;
            document::insert_many(&conn, "orders", &[json!({ "_id": "o1" })])?;
        }

        let report = service.restore(&backup.file_name).await?;
        assert_eq!(report.method, BackupMethod::Dump);
        assert!(report.collections.is_none());

        let conn = pool.get().map_err(anyhow::Error::from)?;
        assert_eq!(document::count(&conn, "products")?, 1);
        assert_eq!(document::count(&conn, "orders")?, 0);

        let leftovers = std::fs::read_dir(service.archives().dir())?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_gz_without_tool_is_unavailable() -> Result<(), BackupError> {
        let dir = TempDir::new()?;
        let pool = test_pool(&dir);
        let mut config = json_config(&dir);
        config.dump_tool = "definitely-not-a-real-dump-tool".into();
        let service = BackupService::new(&config, Arc::new(SqliteDocumentStore::new(pool)));
        service.archives().ensure_dir()?;
        std::fs::write(config.backups_dir.join("backup-2024-01-01T00-00-00.gz"), b"x")?;

        let err = service.restore("backup-2024-01-01T00-00-00.gz").await.unwrap_err();
        assert!(matches!(err, BackupError::ToolUnavailable(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_auto_falls_back_to_json_without_tool() -> Result<(), BackupError> {
        let dir = TempDir::new()?;
        let pool = test_pool(&dir);
        let mut config = AppConfig::for_data_dir(dir.path());
        config.dump_tool = "definitely-not-a-real-dump-tool".into();
        let service = BackupService::new(&config, Arc::new(SqliteDocumentStore::new(pool)));

        assert_eq!(service.active_method().await, BackupMethod::Json);
        assert_eq!(service.create().await?.method, BackupMethod::Json);
        Ok(())
    }

    #[tokio::test]
    async fn test_overview_reports_stats() -> Result<(), BackupError> {
        let dir = TempDir::new()?;
        let (_pool, service) = json_service(&dir);
        service.create().await?;

        let overview = service.overview().await?;
        assert_eq!(overview.method, BackupMethod::Json);
        assert_eq!(overview.stats.count, 1);
        assert_eq!(overview.stats.newest_backup, Some(overview.backups[0].created_at));
        Ok(())
    }
}
