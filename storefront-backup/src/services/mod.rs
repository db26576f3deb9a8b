pub mod backup;
pub mod backup_scheduler;
