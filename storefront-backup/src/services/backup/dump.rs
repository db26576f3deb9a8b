//! Binary strategy: the `sqlite3` shell's online backup, gzip-compressed.

use crate::error::BackupError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct DumpTool {
    program: String,
    timeout: Duration,
}

impl DumpTool {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether the tool can be spawned from `PATH` and reports a version.
    pub async fn probe(&self) -> bool {
        let status = Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(PROBE_TIMEOUT, status).await {
            Ok(Ok(status)) if status.success() => true,
            Ok(Ok(status)) => {
                tracing::warn!(tool = %self.program, %status, "[Backup] Dump tool probe failed");
                false
            }
            Ok(Err(e)) => {
                tracing::info!(tool = %self.program, error = %e, "[Backup] Dump tool not available");
                false
            }
            Err(_) => {
                tracing::warn!(tool = %self.program, "[Backup] Dump tool probe timed out");
                false
            }
        }
    }

    /// Online copy of the database at `db_path` into `staging`.
    pub async fn dump(&self, db_path: &Path, staging: &Path) -> Result<(), BackupError> {
        let command = format!(".backup '{}'", sql_literal(staging));
        self.run(db_path, &command).await?;
        if !staging.is_file() {
            return Err(BackupError::MissingOutput {
                tool: self.program.clone(),
            });
        }
        Ok(())
    }

    /// Replace the whole database at `db_path` with the contents of `source`.
    pub async fn restore(&self, db_path: &Path, source: &Path) -> Result<(), BackupError> {
        let command = format!(".restore '{}'", sql_literal(source));
        self.run(db_path, &command).await.map(|_| ())
    }

    async fn run(&self, db_path: &Path, command: &str) -> Result<Output, BackupError> {
        tracing::debug!(tool = %self.program, db = %db_path.display(), %command, "[Backup] Running dump tool");

        let child = Command::new(&self.program)
            .arg("-bail")
            .arg(db_path)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => BackupError::ToolUnavailable(self.program.clone()),
                _ => BackupError::Io(e),
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(BackupError::Timeout {
                    tool: self.program.clone(),
                    secs: self.timeout.as_secs(),
                })
            }
        };

        if !output.status.success() {
            return Err(BackupError::ProcessFailed {
                tool: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

fn sql_literal(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "''")
}

pub fn gzip_file(source: &Path, dest: &Path) -> std::io::Result<u64> {
    let mut reader = BufReader::new(File::open(source)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(dest)?), Compression::default());
    let copied = std::io::copy(&mut reader, &mut encoder)?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(copied)
}

pub fn gunzip_file(source: &Path, dest: &Path) -> std::io::Result<u64> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(source)?));
    let mut writer = BufWriter::new(File::create(dest)?);
    let copied = std::io::copy(&mut decoder, &mut writer)?;
    writer.flush()?;
    Ok(copied)
}
