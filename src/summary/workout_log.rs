//! Strength-training day records, stored one JSON file per day under
//! `WorkoutRecords/`. Separate from the workout summaries, which only
//! carry duration and calorie aggregates.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::date_util::{date_key, parse_date_key};
use crate::error::Result;

const RECORDS_DIR: &str = "WorkoutRecords";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRecord {
    pub weight_kg: f64,
    pub reps: u32,
    #[serde(default)]
    pub memo: String,
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseRecord {
    pub exercise_name: String,
    pub timestamp: DateTime<Utc>,
    pub sets: Vec<SetRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutDayRecord {
    /// Logical day key, `YYYY-MM-DD`.
    pub date: String,
    pub exercises: Vec<ExerciseRecord>,
}

#[derive(Debug, Clone)]
pub struct WorkoutLog {
    dir: PathBuf,
}

impl WorkoutLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        WorkoutLog {
            dir: root.into().join(RECORDS_DIR),
        }
    }

    fn file_path(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", date_key(day)))
    }

    pub fn save(&self, record: &WorkoutDayRecord) -> Result<()> {
        let Some(day) = parse_date_key(&record.date) else {
            return Err(crate::error::Error::Validation(format!(
                "invalid workout record date {:?}",
                record.date
            )));
        };
        fs::create_dir_all(&self.dir)?;
        let value = serde_json::to_value(record)?;
        fs::write(self.file_path(day), serde_json::to_string_pretty(&value)?)?;
        Ok(())
    }

    pub fn load(&self, day: NaiveDate) -> Result<Option<WorkoutDayRecord>> {
        let path = self.file_path(day);
        let body = match fs::read_to_string(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&body) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Skipping unreadable workout record {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// All records whose date falls in the given calendar month,
    /// ascending by date.
    pub fn load_month(&self, year: i32, month: u32) -> Result<Vec<WorkoutDayRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut days = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Some(day) = parse_date_key(stem) {
                if day.year() == year && day.month() == month {
                    days.push(day);
                }
            }
        }
        days.sort();
        let mut records = Vec::new();
        for day in days {
            if let Some(record) = self.load(day)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub fn delete(&self, day: NaiveDate) -> Result<bool> {
        match fs::remove_file(self.file_path(day)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Short code for an exercise name, used in the compressed history
/// handed to the language model.
fn abbreviate(name: &str) -> String {
    match name {
        "ベンチプレス" => "BP".into(),
        "スクワット" => "SQ".into(),
        "デッドリフト" => "DL".into(),
        "ショルダープレス" => "SP".into(),
        "ラットプルダウン" => "LP".into(),
        "レッグプレス" => "LGP".into(),
        "ダンベルカール" => "DC".into(),
        "トライセプスエクステンション" => "TE".into(),
        other => other.chars().take(3).collect(),
    }
}

/// One line per day: `20240105:BP-60x5,BP-60x5;SQ-80x3`. Only
/// completed sets count, and days with none are dropped.
pub fn compressed_for_llm(records: &[WorkoutDayRecord]) -> String {
    let mut lines = Vec::new();
    for record in records {
        let mut parts = Vec::new();
        for exercise in &record.exercises {
            let abbr = abbreviate(&exercise.exercise_name);
            let sets: Vec<String> = exercise
                .sets
                .iter()
                .filter(|s| s.completed)
                .map(|s| format!("{}-{}x{}", abbr, s.weight_kg, s.reps))
                .collect();
            if !sets.is_empty() {
                parts.push(sets.join(","));
            }
        }
        if !parts.is_empty() {
            lines.push(format!("{}:{}", record.date.replace('-', ""), parts.join(";")));
        }
    }
    lines.join("\n")
}
