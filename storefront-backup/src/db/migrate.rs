use crate::db::connection::DbPool;
use rusqlite::params;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
  name TEXT PRIMARY KEY,
  created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS documents (
  collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
  id TEXT NOT NULL,
  body TEXT NOT NULL,
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
"#;

/// Collections the storefront creates on a fresh database.
pub const STOREFRONT_COLLECTIONS: &[&str] = &[
    "users",
    "products",
    "categories",
    "flavors",
    "orders",
    "siteconfigs",
];

pub fn migrate(pool: &DbPool) -> anyhow::Result<()> {
    tracing::info!("[DB] Starting database migration...");

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    for name in STOREFRONT_COLLECTIONS {
        conn.execute(
            "INSERT OR IGNORE INTO collections (name) VALUES (?1)",
            params![name],
        )?;
    }

    tracing::info!("[DB] Migration completed successfully");
    Ok(())
}
