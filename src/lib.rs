//! backupd - Schedules backup jobs and runs them as tracked shell tasks.

pub mod backup;
pub mod build_info;
pub mod config;
pub mod scheduler;
pub mod store;
pub mod tasks;
