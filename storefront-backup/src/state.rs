use crate::config::AppConfig;
use crate::db::connection::DbPool;
use crate::models::document::SqliteDocumentStore;
use crate::services::backup::BackupService;
use crate::services::backup_scheduler::BackupRunner;
use crate::ws::ui::UiBroadcaster;
use std::sync::Arc;

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub ui: UiBroadcaster,
    pub backups: Arc<BackupService>,
    pub runner: Arc<BackupRunner>,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        let ui = UiBroadcaster::new();
        let documents = Arc::new(SqliteDocumentStore::new(db.clone()));
        let backups = Arc::new(BackupService::new(&config, documents));
        let runner = Arc::new(BackupRunner::new(
            backups.clone(),
            ui.clone(),
            config.daily_keep,
            config.weekly_keep,
        ));
        Self {
            db,
            config,
            ui,
            backups,
            runner,
        }
    }
}
