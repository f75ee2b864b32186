//! Groups health records by logical day and reduces each domain's
//! categories into its daily summary. Reductions accumulate over values
//! sorted into a canonical order first, so the output is identical for
//! any input ordering.

use std::collections::BTreeMap;

use chrono::{NaiveDate, SecondsFormat, TimeZone};
use serde::{Deserialize, Serialize};

use crate::date_util::{date_key, logical_day_in};
use crate::source::{Domain, HealthCategory, HealthRecord};

/// One contributing record inside a daily summary file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryEntry {
    pub category: HealthCategory,
    pub value: f64,
    pub unit: String,
    /// ISO 8601 start time of the sample.
    pub timestamp: String,
    #[serde(default)]
    pub source: String,
}

// deny_unknown_fields keeps the untagged DaySummary variants from
// matching each other's files: the all-optional body-mass shape would
// otherwise absorb anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BodyMassSummary {
    pub date: String,
    pub body_mass_avg: Option<f64>,
    pub body_mass_min: Option<f64>,
    pub body_mass_max: Option<f64>,
    pub body_fat_pct_avg: Option<f64>,
    pub lean_body_mass_avg: Option<f64>,
    pub entries: Vec<SummaryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SleepSummary {
    pub date: String,
    /// Asleep plus every tracked sleep stage.
    pub total_sleep_hours: f64,
    pub in_bed_hours: f64,
    pub rem_hours: f64,
    pub deep_hours: f64,
    pub core_hours: f64,
    pub awake_hours: f64,
    pub entries: Vec<SummaryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ActivitySummary {
    pub date: String,
    pub steps: f64,
    pub active_calories: f64,
    pub exercise_minutes: f64,
    pub resting_heart_rate_avg: Option<f64>,
    pub heart_rate_variability_avg: Option<f64>,
    pub entries: Vec<SummaryEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WorkoutSummary {
    pub date: String,
    pub total_duration_minutes: f64,
    pub total_calories: f64,
    pub entries: Vec<SummaryEntry>,
}

/// Daily aggregate for one domain. Serialized untagged: each summary
/// file holds the plain domain object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DaySummary {
    BodyMass(BodyMassSummary),
    Sleep(SleepSummary),
    Activity(ActivitySummary),
    Workout(WorkoutSummary),
}

impl DaySummary {
    pub fn date(&self) -> &str {
        match self {
            Self::BodyMass(s) => &s.date,
            Self::Sleep(s) => &s.date,
            Self::Activity(s) => &s.date,
            Self::Workout(s) => &s.date,
        }
    }
}

/// Per-day accumulator. Values are collected per category and sorted
/// before reduction so that float sums don't depend on arrival order.
#[derive(Default)]
struct DayAcc {
    values: BTreeMap<HealthCategory, Vec<f64>>,
    entries: Vec<SummaryEntry>,
}

impl DayAcc {
    fn push(&mut self, record: &HealthRecord) {
        self.values
            .entry(record.category)
            .or_default()
            .push(record.value);
        self.entries.push(SummaryEntry {
            category: record.category,
            value: record.value,
            unit: record.unit.clone(),
            timestamp: record
                .start_time
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            source: record.source.clone(),
        });
    }

    fn sorted(&self, category: HealthCategory) -> Vec<f64> {
        let mut values = self.values.get(&category).cloned().unwrap_or_default();
        values.sort_by(f64::total_cmp);
        values
    }

    fn sum(&self, category: HealthCategory) -> f64 {
        self.sorted(category).iter().sum()
    }

    fn avg(&self, category: HealthCategory) -> Option<f64> {
        let values = self.sorted(category);
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    fn min(&self, category: HealthCategory) -> Option<f64> {
        self.sorted(category).first().copied()
    }

    fn max(&self, category: HealthCategory) -> Option<f64> {
        self.sorted(category).last().copied()
    }

    fn finish_entries(mut self) -> Vec<SummaryEntry> {
        self.entries.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.category.cmp(&b.category))
                .then_with(|| a.value.total_cmp(&b.value))
        });
        self.entries
    }
}

/// Aggregate a domain's records into one summary per logical day.
/// The logical day is determined by the record's end-time-preferred
/// timestamp observed in `tz`, with the given cutoff hour.
pub fn aggregate_domain<Tz: TimeZone>(
    domain: Domain,
    records: &[HealthRecord],
    cutoff_hour: u32,
    tz: &Tz,
) -> BTreeMap<NaiveDate, DaySummary> {
    let mut days: BTreeMap<NaiveDate, DayAcc> = BTreeMap::new();

    for record in records {
        if record.category.domain() != domain {
            continue;
        }
        let day = logical_day_in(record.effective_time(), cutoff_hour, tz);
        days.entry(day).or_default().push(record);
    }

    days.into_iter()
        .map(|(day, acc)| (day, finalize(domain, day, acc)))
        .collect()
}

fn finalize(domain: Domain, day: NaiveDate, acc: DayAcc) -> DaySummary {
    let date = date_key(day);
    match domain {
        Domain::BodyMass => DaySummary::BodyMass(BodyMassSummary {
            date,
            body_mass_avg: acc.avg(HealthCategory::BodyMass),
            body_mass_min: acc.min(HealthCategory::BodyMass),
            body_mass_max: acc.max(HealthCategory::BodyMass),
            body_fat_pct_avg: acc.avg(HealthCategory::BodyFatPercentage),
            lean_body_mass_avg: acc.avg(HealthCategory::LeanBodyMass),
            entries: acc.finish_entries(),
        }),
        Domain::Sleep => {
            let asleep = acc.sum(HealthCategory::SleepAsleep);
            let rem = acc.sum(HealthCategory::SleepRem);
            let deep = acc.sum(HealthCategory::SleepDeep);
            let core = acc.sum(HealthCategory::SleepCore);
            DaySummary::Sleep(SleepSummary {
                date,
                total_sleep_hours: asleep + rem + deep + core,
                in_bed_hours: acc.sum(HealthCategory::SleepInBed),
                rem_hours: rem,
                deep_hours: deep,
                core_hours: core,
                awake_hours: acc.sum(HealthCategory::SleepAwake),
                entries: acc.finish_entries(),
            })
        }
        Domain::Activity => DaySummary::Activity(ActivitySummary {
            date,
            steps: acc.sum(HealthCategory::StepCount),
            active_calories: acc.sum(HealthCategory::ActiveCalories),
            exercise_minutes: acc.sum(HealthCategory::ExerciseMinutes),
            resting_heart_rate_avg: acc.avg(HealthCategory::RestingHeartRate),
            heart_rate_variability_avg: acc.avg(HealthCategory::HeartRateVariability),
            entries: acc.finish_entries(),
        }),
        Domain::Workout => DaySummary::Workout(WorkoutSummary {
            date,
            total_duration_minutes: acc.sum(HealthCategory::WorkoutDuration),
            total_calories: acc.sum(HealthCategory::WorkoutCalories),
            entries: acc.finish_entries(),
        }),
    }
}
