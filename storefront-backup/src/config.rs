use std::path::PathBuf;

/// Which backup strategy the service should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodSelection {
    /// Probe for the dump tool once and fall back to JSON export when it is missing.
    Auto,
    Dump,
    Json,
}

impl MethodSelection {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "dump" | "binary" => Self::Dump,
            "json" | "api" => Self::Json,
            _ => Self::Auto,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub database_url: Option<String>,
    pub backups_dir: PathBuf,
    pub backup_prefix: String,
    pub backup_method: MethodSelection,
    pub dump_tool: String,
    pub tool_timeout_secs: u64,
    pub schedule_enabled: bool,
    pub daily_cron: String,
    pub weekly_cron: String,
    pub daily_keep: usize,
    pub weekly_keep: usize,
    pub admin_dist: PathBuf,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let data_dir = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "data".into()));
        let database_url = std::env::var("DATABASE_URL").ok().or_else(|| {
            Some(format!("sqlite://{}", data_dir.join("storefront.db").display()))
        });

        Self {
            port: env_parse("PORT", 3000),
            database_url,
            backups_dir: std::env::var("BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("backups")),
            data_dir,
            backup_prefix: std::env::var("BACKUP_PREFIX").unwrap_or_else(|_| "backup".into()),
            backup_method: MethodSelection::parse(
                &std::env::var("BACKUP_METHOD").unwrap_or_default(),
            ),
            dump_tool: std::env::var("BACKUP_DUMP_TOOL").unwrap_or_else(|_| "sqlite3".into()),
            tool_timeout_secs: env_parse("BACKUP_TOOL_TIMEOUT_SECS", 300),
            schedule_enabled: env_parse("BACKUP_SCHEDULE_ENABLED", true),
            daily_cron: std::env::var("BACKUP_DAILY_CRON").unwrap_or_else(|_| "0 0 2 * * *".into()),
            weekly_cron: std::env::var("BACKUP_WEEKLY_CRON")
                .unwrap_or_else(|_| "0 0 3 * * Sun".into()),
            daily_keep: env_parse("BACKUP_DAILY_KEEP", 7),
            weekly_keep: env_parse("BACKUP_WEEKLY_KEEP", 4),
            admin_dist: std::env::var("ADMIN_DIST")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../admin/dist")),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        }
    }

    /// Configuration rooted at `data_dir` with scheduling disabled. Used by tests
    /// and one-shot CLI commands.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            port: 0,
            database_url: Some(format!("sqlite://{}", data_dir.join("storefront.db").display())),
            backups_dir: data_dir.join("backups"),
            data_dir,
            backup_prefix: "backup".into(),
            backup_method: MethodSelection::Auto,
            dump_tool: "sqlite3".into(),
            tool_timeout_secs: 300,
            schedule_enabled: false,
            daily_cron: "0 0 2 * * *".into(),
            weekly_cron: "0 0 3 * * Sun".into(),
            daily_keep: 7,
            weekly_keep: 4,
            admin_dist: PathBuf::from("admin/dist"),
            log_level: "info".into(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
