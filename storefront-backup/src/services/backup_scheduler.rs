use crate::error::BackupError;
use crate::services::backup::{BackupResult, BackupService, RestoreReport};
use crate::ws::ui::UiBroadcaster;
use serde_json::json;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

pub const RUN_MARKER: &str = ".backup-in-progress";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Daily,
    Weekly,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::Daily => "daily",
            Trigger::Weekly => "weekly",
            Trigger::Manual => "manual",
        })
    }
}

/// Process-wide "backup in progress" flag, mirrored to a marker file so a run
/// interrupted by a crash is noticed on the next start.
pub struct RunFlag {
    running: AtomicBool,
    marker: PathBuf,
}

pub struct RunGuard<'a> {
    flag: &'a RunFlag,
}

impl RunFlag {
    pub fn new(marker: PathBuf) -> Self {
        Self {
            running: AtomicBool::new(false),
            marker,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn try_acquire(&self, activity: &str) -> Option<RunGuard<'_>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let record = json!({
            "pid": std::process::id(),
            "activity": activity,
            "startedAt": chrono::Utc::now().to_rfc3339(),
        });
        let written = self
            .marker
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| std::fs::write(&self.marker, record.to_string()));
        if let Err(e) = written {
            tracing::warn!(marker = %self.marker.display(), error = %e, "[Scheduler] Could not write run marker");
        }

        Some(RunGuard { flag: self })
    }

    /// Clear a marker left behind by a previous process. Returns its contents.
    pub fn recover_stale(&self) -> Option<String> {
        let contents = std::fs::read_to_string(&self.marker).ok()?;
        tracing::warn!(marker = %contents, "[Scheduler] Previous backup run did not finish, clearing marker");
        if let Err(e) = std::fs::remove_file(&self.marker) {
            tracing::warn!(error = %e, "[Scheduler] Could not remove stale run marker");
        }
        Some(contents)
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.flag.marker);
        self.flag.running.store(false, Ordering::Release);
    }
}

/// Serialises backup and restore runs behind the run flag and applies
/// per-trigger retention.
pub struct BackupRunner {
    service: Arc<BackupService>,
    flag: RunFlag,
    ui: UiBroadcaster,
    daily_keep: usize,
    weekly_keep: usize,
}

impl BackupRunner {
    pub fn new(
        service: Arc<BackupService>,
        ui: UiBroadcaster,
        daily_keep: usize,
        weekly_keep: usize,
    ) -> Self {
        let marker = service.archives().dir().join(RUN_MARKER);
        Self {
            service,
            flag: RunFlag::new(marker),
            ui,
            daily_keep,
            weekly_keep,
        }
    }

    pub fn service(&self) -> &Arc<BackupService> {
        &self.service
    }

    pub fn flag(&self) -> &RunFlag {
        &self.flag
    }

    pub fn is_running(&self) -> bool {
        self.flag.is_running()
    }

    fn keep_count(&self, trigger: Trigger) -> Option<usize> {
        match trigger {
            Trigger::Daily => Some(self.daily_keep),
            Trigger::Weekly => Some(self.weekly_keep),
            Trigger::Manual => None,
        }
    }

    /// Run one backup. Returns `Ok(None)` when another run holds the flag;
    /// the trigger is dropped, not queued.
    pub async fn run(&self, trigger: Trigger) -> Result<Option<BackupResult>, BackupError> {
        let Some(_guard) = self.flag.try_acquire(&format!("backup:{trigger}")) else {
            tracing::warn!(%trigger, "[Scheduler] Backup already in progress, skipping trigger");
            return Ok(None);
        };

        tracing::info!(%trigger, "[Scheduler] Starting backup");
        self.ui.broadcast("backup:started", json!({ "trigger": trigger.to_string() }));

        let result = match self.service.create().await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(%trigger, error = %e, "[Scheduler] Backup failed");
                self.ui.broadcast(
                    "backup:failed",
                    json!({ "trigger": trigger.to_string(), "error": e.to_string() }),
                );
                return Err(e);
            }
        };
        self.ui.broadcast(
            "backup:completed",
            json!({ "trigger": trigger.to_string(), "backup": result }),
        );

        if let Some(keep) = self.keep_count(trigger) {
            match self.service.clean(keep).await {
                Ok(report) => {
                    if !report.deleted.is_empty() || !report.failed.is_empty() {
                        self.ui.broadcast("backup:cleaned", json!(report));
                    }
                }
                Err(e) => {
                    tracing::warn!(%trigger, keep, error = %e, "[Scheduler] Retention after backup failed");
                }
            }
        }

        Ok(Some(result))
    }

    /// Restore an archive. Refused while a backup or another restore is running.
    pub async fn restore(&self, file_name: &str) -> Result<RestoreReport, BackupError> {
        let _guard = self
            .flag
            .try_acquire(&format!("restore:{file_name}"))
            .ok_or(BackupError::Busy)?;

        match self.service.restore(file_name).await {
            Ok(report) => {
                self.ui.broadcast("backup:restored", json!(report));
                Ok(report)
            }
            Err(e) => {
                tracing::error!(file = %file_name, error = %e, "[Restore] Restore failed");
                self.ui.broadcast(
                    "backup:failed",
                    json!({ "fileName": file_name, "error": e.to_string() }),
                );
                Err(e)
            }
        }
    }
}

pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    runner: Arc<BackupRunner>,
}

impl BackupScheduler {
    pub async fn new(runner: Arc<BackupRunner>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            runner,
        })
    }

    /// Fire `trigger` on `cron_expression` (seconds-resolution cron, UTC).
    pub async fn schedule(&self, trigger: Trigger, cron_expression: &str) -> anyhow::Result<()> {
        let runner = self.runner.clone();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let runner = runner.clone();
            Box::pin(async move {
                match runner.run(trigger).await {
                    Ok(Some(result)) => {
                        tracing::info!(%trigger, file = %result.file_name, "[Scheduler] Scheduled backup finished");
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(%trigger, error = %e, "[Scheduler] Scheduled backup failed");
                    }
                }
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(%trigger, cron = %cron_expression, "[Scheduler] Backup scheduled");
        Ok(())
    }

    pub async fn init_schedules(&self, daily_cron: &str, weekly_cron: &str) -> anyhow::Result<()> {
        let mut count = 0;
        for (trigger, cron) in [(Trigger::Daily, daily_cron), (Trigger::Weekly, weekly_cron)] {
            if cron.trim().is_empty() {
                continue;
            }
            if let Err(e) = self.schedule(trigger, cron).await {
                tracing::error!(%trigger, cron = %cron, error = %e, "[Scheduler] Failed to schedule backup");
            } else {
                count += 1;
            }
        }

        tracing::info!(count, "[Scheduler] Cron schedules initialized");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}
