use crate::error::BackupError;
use crate::services::backup::BackupMethod;
use chrono::{DateTime, SecondsFormat, Utc};

/// ISO-8601 instant with `:` and `.` replaced by `-` and the
/// `-<millis>Z` suffix dropped: `2024-05-01T03-00-00`.
pub fn file_timestamp(at: DateTime<Utc>) -> String {
    let iso = at.to_rfc3339_opts(SecondsFormat::Millis, true);
    let replaced = iso.replace([':', '.'], "-");
    replaced[..replaced.len() - 5].to_string()
}

pub fn archive_name(prefix: &str, method: BackupMethod, at: DateTime<Utc>) -> String {
    let ts = file_timestamp(at);
    match method {
        BackupMethod::Dump => format!("{prefix}-{ts}.{}", method.extension()),
        BackupMethod::Json => format!("{prefix}-api-{ts}.{}", method.extension()),
    }
}

/// `backup-<ts>.gz` with sequence 2 becomes `backup-<ts>-2.gz`.
pub fn with_sequence(file_name: &str, sequence: u32) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}-{sequence}.{ext}"),
        None => format!("{file_name}-{sequence}"),
    }
}

/// Archive names are bare file names inside the archive directory.
pub fn validate_name(name: &str) -> Result<(), BackupError> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
        || name.contains("..");
    if invalid {
        return Err(BackupError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    round2(bytes as f64 / 1024.0 / 1024.0)
}
