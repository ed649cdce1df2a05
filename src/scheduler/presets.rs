//! Built-in job templates.

use super::error::{Result, SchedulerError};
use super::job::{NewJob, Recurrence};
use crate::backup::BackupType;

/// Identifiers of every built-in preset, in display order.
pub const PRESET_IDS: [&str; 5] = [
    "daily_night",
    "weekdays_morning",
    "weekly_full",
    "monthly_archive",
    "every_6_hours",
];

/// Build the creation request for preset `id`.
pub fn build(id: &str) -> Result<NewJob> {
    let new = match id {
        "daily_night" => NewJob::new(
            "Nightly full backup",
            vec![BackupType::Global],
            Recurrence::Daily {
                time: "02:00".parse()?,
            },
        )
        .with_description("Full backup every day at 02:00"),
        "weekdays_morning" => NewJob::new(
            "Weekday database backup",
            vec![BackupType::Mongodb, BackupType::Postgres],
            Recurrence::Weekly {
                time: "06:00".parse()?,
                days_of_week: vec![0, 1, 2, 3, 4],
            },
        )
        .with_description("MongoDB and PostgreSQL, Monday to Friday at 06:00"),
        "weekly_full" => NewJob::new(
            "Weekly full backup",
            vec![BackupType::Global],
            Recurrence::Weekly {
                time: "03:00".parse()?,
                days_of_week: vec![6],
            },
        )
        .with_description("Full backup every Sunday at 03:00"),
        "monthly_archive" => NewJob::new(
            "Monthly archive",
            vec![BackupType::Global],
            Recurrence::Monthly {
                time: "04:00".parse()?,
                days_of_month: vec![1],
            },
        )
        .with_description("Full backup on the first day of each month at 04:00"),
        "every_6_hours" => NewJob::new(
            "MongoDB every 6 hours",
            vec![BackupType::Mongodb],
            Recurrence::Interval { minutes: 360 },
        )
        .with_description("MongoDB backup every six hours"),
        other => return Err(SchedulerError::UnknownPreset(other.to_string())),
    };
    Ok(new)
}

/// Every preset with its id.
pub fn all() -> Result<Vec<(&'static str, NewJob)>> {
    PRESET_IDS
        .iter()
        .map(|id| build(id).map(|job| (*id, job)))
        .collect()
}
