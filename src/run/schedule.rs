//! Calendar gating for backup jobs
//!
//! A schedule is a pure predicate over the current date, evaluated once at
//! run start. Cadence comes from an external scheduler; snapkeep only
//! decides whether a given invocation is due.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Day of week, serialized lowercase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl From<chrono::Weekday> for DayOfWeek {
    fn from(weekday: chrono::Weekday) -> Self {
        match weekday {
            chrono::Weekday::Mon => DayOfWeek::Monday,
            chrono::Weekday::Tue => DayOfWeek::Tuesday,
            chrono::Weekday::Wed => DayOfWeek::Wednesday,
            chrono::Weekday::Thu => DayOfWeek::Thursday,
            chrono::Weekday::Fri => DayOfWeek::Friday,
            chrono::Weekday::Sat => DayOfWeek::Saturday,
            chrono::Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

/// When a job is due
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Due on every invocation
    #[default]
    Always,
    /// Due on the given days of the month (1-31)
    DayOfMonth { days: Vec<u32> },
    /// Due on the given weekdays
    Weekday { days: Vec<DayOfWeek> },
}

impl Schedule {
    /// Whether a run on `date` is due
    pub fn is_due(&self, date: NaiveDate) -> bool {
        match self {
            Schedule::Always => true,
            Schedule::DayOfMonth { days } => days.contains(&date.day()),
            Schedule::Weekday { days } => days.contains(&DayOfWeek::from(date.weekday())),
        }
    }

    /// Reject schedules that could never fire
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Schedule::Always => Ok(()),
            Schedule::DayOfMonth { days } => {
                if days.is_empty() {
                    return Err("day_of_month schedule lists no days".into());
                }
                for day in days {
                    if !(1..=31).contains(day) {
                        return Err(format!("day {} is outside 1-31", day));
                    }
                }
                Ok(())
            }
            Schedule::Weekday { days } => {
                if days.is_empty() {
                    return Err("weekday schedule lists no days".into());
                }
                Ok(())
            }
        }
    }
}
