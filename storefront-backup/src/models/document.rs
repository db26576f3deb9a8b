//! Document access layer over the SQLite-backed store.
//!
//! Every document is a JSON object stored as text and keyed by
//! `(collection, _id)`. Collections are tracked in their own table so an empty
//! collection still exists and shows up in exports.

use crate::db::connection::DbPool;
use anyhow::Context;
use rusqlite::{params, Connection};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// The operations the backup subsystem needs from the database.
pub trait DocumentStore: Send + Sync {
    fn list_collections(&self) -> anyhow::Result<Vec<String>>;

    /// Visit every document of `collection` in insertion order without
    /// materialising the whole collection.
    fn scan(
        &self,
        collection: &str,
        visit: &mut dyn FnMut(Value) -> anyhow::Result<()>,
    ) -> anyhow::Result<()>;

    /// Replace the contents of each named collection with the given documents.
    /// Returns the number of documents written per collection.
    fn replace_collections(
        &self,
        collections: &BTreeMap<String, Vec<Value>>,
    ) -> anyhow::Result<BTreeMap<String, usize>>;
}

#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: DbPool,
}

impl SqliteDocumentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn list_collections(&self) -> anyhow::Result<Vec<String>> {
        let conn = self.pool.get()?;
        list_collections(&conn)
    }

    fn scan(
        &self,
        collection: &str,
        visit: &mut dyn FnMut(Value) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let conn = self.pool.get()?;
        scan(&conn, collection, visit)
    }

    fn replace_collections(
        &self,
        collections: &BTreeMap<String, Vec<Value>>,
    ) -> anyhow::Result<BTreeMap<String, usize>> {
        let mut conn = self.pool.get()?;
        replace_collections(&mut conn, collections)
    }
}

/// Identity of a document: `_id` as a string, `{ "$oid": .. }` unwrapped,
/// numbers rendered as text.
pub fn document_id(doc: &Value) -> Option<String> {
    match doc.get("_id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => match map.get("$oid") {
            Some(Value::String(oid)) => Some(oid.clone()),
            _ => Some(Value::Object(map.clone()).to_string()),
        },
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn prepare_document(mut doc: Value) -> anyhow::Result<(String, Value)> {
    let Some(map) = doc.as_object_mut() else {
        anyhow::bail!("document must be a JSON object");
    };
    if map.get("_id").map_or(true, Value::is_null) {
        map.insert("_id".into(), Value::String(Uuid::new_v4().to_string()));
    }
    let id = document_id(&doc).context("document has no usable _id")?;
    Ok((id, doc))
}

pub fn list_collections(conn: &Connection) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM collections ORDER BY name")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn create_collection(conn: &Connection, name: &str) -> anyhow::Result<()> {
    if name.trim().is_empty() {
        anyhow::bail!("collection name must not be empty");
    }
    conn.execute("INSERT OR IGNORE INTO collections (name) VALUES (?1)", params![name])?;
    Ok(())
}

pub fn count(conn: &Connection, collection: &str) -> anyhow::Result<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM documents WHERE collection = ?1",
        params![collection],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

pub fn scan(
    conn: &Connection,
    collection: &str,
    visit: &mut dyn FnMut(Value) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let mut stmt =
        conn.prepare("SELECT id, body FROM documents WHERE collection = ?1 ORDER BY rowid")?;
    let mut rows = stmt.query(params![collection])?;
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let body: String = row.get(1)?;
        let doc: Value = serde_json::from_str(&body)
            .with_context(|| format!("corrupt document {collection}/{id}"))?;
        visit(doc)?;
    }
    Ok(())
}

pub fn find_all(conn: &Connection, collection: &str) -> anyhow::Result<Vec<Value>> {
    let mut docs = Vec::new();
    scan(conn, collection, &mut |doc| {
        docs.push(doc);
        Ok(())
    })?;
    Ok(docs)
}

/// First document whose top-level string `field` equals `value`.
pub fn find_one_by_field(
    conn: &Connection,
    collection: &str,
    field: &str,
    value: &str,
) -> anyhow::Result<Option<Value>> {
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!("invalid field name: {field}");
    }
    let mut stmt = conn.prepare(
        "SELECT body FROM documents WHERE collection = ?1 AND json_extract(body, ?2) = ?3 ORDER BY rowid LIMIT 1",
    )?;
    let mut rows = stmt.query(params![collection, format!("$.{field}"), value])?;
    match rows.next()? {
        Some(row) => {
            let body: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&body)?))
        }
        None => Ok(None),
    }
}

pub fn insert_many(conn: &Connection, collection: &str, docs: &[Value]) -> anyhow::Result<usize> {
    create_collection(conn, collection)?;
    let mut stmt =
        conn.prepare("INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)")?;
    for doc in docs {
        let (id, doc) = prepare_document(doc.clone())?;
        stmt.execute(params![collection, id, doc.to_string()])
            .with_context(|| format!("failed to insert {collection}/{id}"))?;
    }
    Ok(docs.len())
}

pub fn delete_all(conn: &Connection, collection: &str) -> anyhow::Result<usize> {
    let deleted = conn.execute("DELETE FROM documents WHERE collection = ?1", params![collection])?;
    Ok(deleted)
}

/// Wipe and reload every collection in `collections` inside one transaction.
/// Nothing is committed unless every collection succeeds.
pub fn replace_collections(
    conn: &mut Connection,
    collections: &BTreeMap<String, Vec<Value>>,
) -> anyhow::Result<BTreeMap<String, usize>> {
    let tx = conn.transaction()?;
    let mut restored = BTreeMap::new();

    for (name, docs) in collections {
        create_collection(&tx, name)?;
        let removed = delete_all(&tx, name)?;
        let inserted = if docs.is_empty() {
            0
        } else {
            insert_many(&tx, name, docs)?
        };
        tracing::debug!(collection = %name, removed, inserted, "[DB] Collection replaced");
        restored.insert(name.clone(), inserted);
    }

    tx.commit()?;
    Ok(restored)
}
