//! The archive directory: listing, stats and deletion.

use crate::error::BackupError;
use crate::services::backup::naming::{bytes_to_mb, round2, validate_name};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveInfo {
    pub name: String,
    /// Size in MB, rounded to two decimals.
    pub size: f64,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveStats {
    pub count: usize,
    pub total_size: f64,
    pub oldest_backup: Option<DateTime<Utc>>,
    pub newest_backup: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
}

impl ArchiveStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    /// Path of an existing archive; not-found when the file is absent.
    pub fn existing_path(&self, name: &str) -> Result<PathBuf, BackupError> {
        validate_name(name)?;
        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(BackupError::NotFound(name.to_string()));
        }
        Ok(path)
    }

    /// Archives with the given extension, most recently modified first.
    pub fn list(&self, extension: &str) -> Result<Vec<ArchiveInfo>, BackupError> {
        self.ensure_dir()?;

        let mut archives = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                // Removed between read_dir and stat
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            archives.push(archive_info(name, &meta)?);
        }

        archives.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(archives)
    }

    pub fn info(&self, name: &str) -> Result<ArchiveInfo, BackupError> {
        let path = self.existing_path(name)?;
        let meta = fs::metadata(&path)?;
        archive_info(name.to_string(), &meta)
    }

    pub fn delete(&self, name: &str) -> Result<(), BackupError> {
        let path = self.existing_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(file = %name, "[Backup] Deleted archive");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BackupError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

fn archive_info(name: String, meta: &fs::Metadata) -> Result<ArchiveInfo, BackupError> {
    let modified: DateTime<Utc> = meta.modified()?.into();
    let created: DateTime<Utc> = meta.created().map(Into::into).unwrap_or(modified);
    Ok(ArchiveInfo {
        name,
        size: bytes_to_mb(meta.len()),
        size_bytes: meta.len(),
        created_at: created,
        modified_at: modified,
    })
}

/// Aggregate over a listing already sorted newest first.
pub fn stats(archives: &[ArchiveInfo]) -> ArchiveStats {
    ArchiveStats {
        count: archives.len(),
        total_size: round2(archives.iter().map(|a| a.size).sum()),
        oldest_backup: archives.last().map(|a| a.created_at),
        newest_backup: archives.first().map(|a| a.created_at),
    }
}
