//! Storefront backup service.
//!
//! Backups, restores and retention for the storefront's document database,
//! exposed through an admin HTTP API, a cron scheduler and a CLI.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;
pub mod ws;

pub use config::AppConfig;
pub use error::{AppError, BackupError};
