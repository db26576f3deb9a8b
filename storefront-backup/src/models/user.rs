use crate::models::document;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

pub const COLLECTION: &str = "users";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

fn default_role() -> String {
    "customer".into()
}

fn default_active() -> bool {
    true
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

pub fn find_by_token(conn: &Connection, token: &str) -> anyhow::Result<Option<User>> {
    if token.is_empty() {
        return Ok(None);
    }
    match document::find_one_by_field(conn, COLLECTION, "apiToken", token)? {
        Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
        None => Ok(None),
    }
}

pub fn find_by_email(conn: &Connection, email: &str) -> anyhow::Result<Option<User>> {
    match document::find_one_by_field(conn, COLLECTION, "email", email)? {
        Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
        None => Ok(None),
    }
}

/// Create an active admin with a freshly generated API token.
pub fn create_admin(conn: &Connection, email: &str, name: &str) -> anyhow::Result<User> {
    if email.trim().is_empty() {
        anyhow::bail!("email is required");
    }
    if find_by_email(conn, email)?.is_some() {
        anyhow::bail!("a user with email {email} already exists");
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        email: email.to_string(),
        name: name.to_string(),
        role: "admin".into(),
        active: true,
        api_token: Some(Uuid::new_v4().simple().to_string()),
    };
    let mut doc = serde_json::to_value(&user)?;
    doc["createdAt"] = json!(chrono::Utc::now().to_rfc3339());
    document::insert_many(conn, COLLECTION, &[doc])?;
    Ok(user)
}
