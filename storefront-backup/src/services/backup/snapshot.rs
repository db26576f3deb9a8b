//! JSON strategy: a snapshot record of every collection.
//!
//! ```text
//! {
//!   "timestamp": "2024-05-01T03:00:00.000Z",
//!   "collections": {
//!     "orders": [],
//!     "users": [ { "_id": "..." }, ... ]
//!   }
//! }
//! ```
//!
//! Export streams one document at a time from the store into the file, so
//! memory stays flat regardless of database size.

use crate::error::BackupError;
use crate::models::document::DocumentStore;
use serde::ser::{Error as _, SerializeMap, SerializeSeq, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Snapshot {
    pub timestamp: String,
    pub collections: BTreeMap<String, Vec<Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    pub collections: usize,
    pub documents: usize,
}

struct SnapshotWriter<'a> {
    timestamp: &'a str,
    collections: &'a [String],
    store: &'a dyn DocumentStore,
    documents: Cell<usize>,
}

struct CollectionsView<'a>(&'a SnapshotWriter<'a>);

struct DocumentsView<'a> {
    name: &'a str,
    writer: &'a SnapshotWriter<'a>,
}

impl Serialize for SnapshotWriter<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut record = serializer.serialize_struct("Snapshot", 2)?;
        record.serialize_field("timestamp", self.timestamp)?;
        record.serialize_field("collections", &CollectionsView(self))?;
        record.end()
    }
}

impl Serialize for CollectionsView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.collections.len()))?;
        for name in self.0.collections {
            map.serialize_entry(name, &DocumentsView { name, writer: self.0 })?;
        }
        map.end()
    }
}

impl Serialize for DocumentsView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(None)?;
        let mut write_error = None;
        let mut written = 0usize;

        let scanned = self.writer.store.scan(self.name, &mut |doc| {
            if let Err(e) = seq.serialize_element(&doc) {
                write_error = Some(e);
                anyhow::bail!("write aborted");
            }
            written += 1;
            Ok(())
        });

        if let Some(e) = write_error {
            return Err(e);
        }
        scanned.map_err(|e| S::Error::custom(format!("reading collection {}: {e:#}", self.name)))?;

        self.writer.documents.set(self.writer.documents.get() + written);
        tracing::debug!(collection = %self.name, documents = written, "[Backup] Collection exported");
        seq.end()
    }
}

/// Write every collection of `store` to `path` as a pretty-printed snapshot.
pub fn export(
    store: &dyn DocumentStore,
    path: &Path,
    timestamp: &str,
) -> Result<ExportSummary, BackupError> {
    let collections = store.list_collections()?;
    if collections.is_empty() {
        return Err(BackupError::NoCollections);
    }

    let record = SnapshotWriter {
        timestamp,
        collections: &collections,
        store,
        documents: Cell::new(0),
    };

    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &record)?;
    writer.write_all(b"\n")?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok(ExportSummary {
        collections: collections.len(),
        documents: record.documents.get(),
    })
}

pub fn read(path: &Path) -> Result<Snapshot, BackupError> {
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader).map_err(|e| BackupError::InvalidSnapshot(e.to_string()))
}

/// Replace every collection named in the snapshot at `path`.
pub fn restore(
    store: &dyn DocumentStore,
    path: &Path,
) -> Result<BTreeMap<String, usize>, BackupError> {
    let snapshot = read(path)?;
    tracing::info!(
        taken_at = %snapshot.timestamp,
        collections = snapshot.collections.len(),
        "[Restore] Loading snapshot"
    );
    Ok(store.replace_collections(&snapshot.collections)?)
}
