pub mod export;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A health data category, the unit of incremental synchronization.
/// Anchors are stored per category, and the category determines how
/// records are reduced into daily aggregates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum HealthCategory {
    // Body measurements
    BodyMass,
    BodyFatPercentage,
    LeanBodyMass,
    // Activity
    StepCount,
    ActiveCalories,
    ExerciseMinutes,
    RestingHeartRate,
    HeartRateVariability,
    // Sleep stages
    SleepInBed,
    SleepAsleep,
    #[serde(rename = "sleepREM")]
    SleepRem,
    SleepDeep,
    SleepCore,
    SleepAwake,
    // Workouts
    WorkoutDuration,
    WorkoutCalories,
}

impl HealthCategory {
    /// Stable identifier used for anchor keys and record rows.
    pub fn key(&self) -> &'static str {
        match self {
            Self::BodyMass => "bodyMass",
            Self::BodyFatPercentage => "bodyFatPercentage",
            Self::LeanBodyMass => "leanBodyMass",
            Self::StepCount => "stepCount",
            Self::ActiveCalories => "activeCalories",
            Self::ExerciseMinutes => "exerciseMinutes",
            Self::RestingHeartRate => "restingHeartRate",
            Self::HeartRateVariability => "heartRateVariability",
            Self::SleepInBed => "sleepInBed",
            Self::SleepAsleep => "sleepAsleep",
            Self::SleepRem => "sleepREM",
            Self::SleepDeep => "sleepDeep",
            Self::SleepCore => "sleepCore",
            Self::SleepAwake => "sleepAwake",
            Self::WorkoutDuration => "workoutDuration",
            Self::WorkoutCalories => "workoutCalories",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Domain::ALL
            .iter()
            .flat_map(|d| d.categories().iter().copied())
            .find(|c| c.key() == key)
    }

    pub fn default_unit(&self) -> &'static str {
        match self {
            Self::BodyMass | Self::LeanBodyMass => "kg",
            Self::BodyFatPercentage => "%",
            Self::StepCount => "count",
            Self::ActiveCalories | Self::WorkoutCalories => "kcal",
            Self::ExerciseMinutes | Self::WorkoutDuration => "min",
            Self::RestingHeartRate => "bpm",
            Self::HeartRateVariability => "ms",
            Self::SleepInBed
            | Self::SleepAsleep
            | Self::SleepRem
            | Self::SleepDeep
            | Self::SleepCore
            | Self::SleepAwake => "hr",
        }
    }

    pub fn domain(&self) -> Domain {
        match self {
            Self::BodyMass | Self::BodyFatPercentage | Self::LeanBodyMass => Domain::BodyMass,
            Self::StepCount
            | Self::ActiveCalories
            | Self::ExerciseMinutes
            | Self::RestingHeartRate
            | Self::HeartRateVariability => Domain::Activity,
            Self::SleepInBed
            | Self::SleepAsleep
            | Self::SleepRem
            | Self::SleepDeep
            | Self::SleepCore
            | Self::SleepAwake => Domain::Sleep,
            Self::WorkoutDuration | Self::WorkoutCalories => Domain::Workout,
        }
    }
}

impl fmt::Display for HealthCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A sync domain: an independent fetch-aggregate-persist pipeline with
/// its own anchors, warehouse rows, and summary directory.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    BodyMass,
    Sleep,
    Activity,
    Workout,
}

impl Domain {
    pub const ALL: [Domain; 4] = [
        Domain::BodyMass,
        Domain::Sleep,
        Domain::Activity,
        Domain::Workout,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::BodyMass => "body_mass",
            Self::Sleep => "sleep",
            Self::Activity => "activity",
            Self::Workout => "workout",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "body_mass" | "body-mass" | "mass" => Some(Self::BodyMass),
            "sleep" => Some(Self::Sleep),
            "activity" => Some(Self::Activity),
            "workout" | "workouts" => Some(Self::Workout),
            _ => None,
        }
    }

    /// Directory name for this domain's per-day summary files.
    pub fn summary_dir(&self) -> &'static str {
        match self {
            Self::BodyMass => "HealthSummaries",
            Self::Sleep => "SleepSummaries",
            Self::Activity => "ActivitySummaries",
            Self::Workout => "WorkoutSummaries",
        }
    }

    pub fn categories(&self) -> &'static [HealthCategory] {
        match self {
            Self::BodyMass => &[
                HealthCategory::BodyMass,
                HealthCategory::BodyFatPercentage,
                HealthCategory::LeanBodyMass,
            ],
            Self::Activity => &[
                HealthCategory::StepCount,
                HealthCategory::ActiveCalories,
                HealthCategory::ExerciseMinutes,
                HealthCategory::RestingHeartRate,
                HealthCategory::HeartRateVariability,
            ],
            Self::Sleep => &[
                HealthCategory::SleepInBed,
                HealthCategory::SleepAsleep,
                HealthCategory::SleepRem,
                HealthCategory::SleepDeep,
                HealthCategory::SleepCore,
                HealthCategory::SleepAwake,
            ],
            Self::Workout => &[
                HealthCategory::WorkoutDuration,
                HealthCategory::WorkoutCalories,
            ],
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One sample from the health data source. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub category: HealthCategory,
    pub value: f64,
    pub unit: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: String,
}

impl HealthRecord {
    /// The timestamp used for logical-day attribution: the end time when
    /// present (interval samples like sleep), otherwise the start time.
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.end_time.unwrap_or(self.start_time)
    }

    pub fn dedup_key(&self) -> RecordKey {
        RecordKey {
            category: self.category,
            start_time: self.start_time,
            value: self.value,
        }
    }
}

/// Deduplication key for warehouse rows. Re-fetching the same sample
/// must never double-count it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordKey {
    pub category: HealthCategory,
    pub start_time: DateTime<Utc>,
    pub value: f64,
}

/// Closed time interval queried when no anchor exists for a category.
#[derive(Debug, Clone, Copy)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    pub fn lookback(days: u32, now: DateTime<Utc>) -> Self {
        Self {
            start: now - chrono::Duration::days(days as i64),
            end: now,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Changes reported by the source since a given anchor (or within the
/// lookback window when no anchor was supplied). The returned anchor is
/// opaque to everything but the source that produced it.
#[derive(Debug, Clone)]
pub struct SourceDelta {
    pub records: Vec<HealthRecord>,
    pub deleted: Vec<RecordKey>,
    pub anchor: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("health data is not available")]
    NotAvailable,

    #[error("read authorization denied for {0}")]
    AuthorizationDenied(String),

    #[error("health source I/O error: {0}")]
    Io(String),
}

/// External health data source. Implementations own the meaning of their
/// anchor bytes; an anchor they cannot decode must be treated as absent
/// (full-window fetch), never as an error.
#[allow(async_fn_in_trait)]
pub trait HealthSource {
    /// Request read access for the given categories. Denial is surfaced
    /// to the user as a message, never a crash.
    async fn request_authorization(
        &self,
        categories: &[HealthCategory],
    ) -> std::result::Result<(), SourceError>;

    /// Fetch changes for one category. `anchor = None` means "no prior
    /// sync": query the full window instead.
    async fn fetch_changes(
        &self,
        category: HealthCategory,
        anchor: Option<&[u8]>,
        window: FetchWindow,
    ) -> std::result::Result<SourceDelta, SourceError>;
}
