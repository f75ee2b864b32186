//! Writes daily summaries to per-domain JSON directories and reads
//! them back. Files are named `<YYYY-MM-DD>.json` and rewritten whole
//! on every persist, so re-running a sync converges on the same bytes.

pub mod workout_log;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::warn;

use crate::aggregate::DaySummary;
use crate::date_util::{date_key, parse_date_key};
use crate::error::{Error, Result};
use crate::source::Domain;
use crate::storage::default_data_dir;

#[derive(Debug, Clone)]
pub struct SummaryStore {
    root: PathBuf,
}

impl SummaryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SummaryStore { root: root.into() }
    }

    /// Store rooted at the default data directory.
    pub fn open_default() -> Result<Self> {
        Ok(SummaryStore::new(default_data_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn domain_dir(&self, domain: Domain) -> PathBuf {
        self.root.join(domain.summary_dir())
    }

    pub fn file_path(&self, domain: Domain, day: NaiveDate) -> PathBuf {
        self.domain_dir(domain).join(format!("{}.json", date_key(day)))
    }

    /// Write one day's summary, replacing any previous file. Keys are
    /// emitted in sorted order so identical summaries produce
    /// identical files.
    pub fn persist(&self, domain: Domain, day: NaiveDate, summary: &DaySummary) -> Result<()> {
        if summary.date() != date_key(day) {
            return Err(Error::Summary(format!(
                "summary dated {} cannot be written as {}",
                summary.date(),
                date_key(day)
            )));
        }
        let dir = self.domain_dir(domain);
        fs::create_dir_all(&dir)?;
        let value = serde_json::to_value(summary)?;
        let body = serde_json::to_string_pretty(&value)?;
        fs::write(self.file_path(domain, day), body)
            .map_err(|e| Error::Summary(format!("writing {} summary: {}", date_key(day), e)))
    }

    /// Read one day's summary. Missing files are `Ok(None)`; a file
    /// that no longer parses is logged and treated as absent.
    pub fn load(&self, domain: Domain, day: NaiveDate) -> Result<Option<DaySummary>> {
        let path = self.file_path(domain, day);
        let body = match fs::read_to_string(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&body) {
            Ok(summary) => Ok(Some(summary)),
            Err(e) => {
                warn!("Skipping unreadable summary {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// Days with a summary file for the domain, ascending.
    pub fn list_days(&self, domain: Domain) -> Result<Vec<NaiveDate>> {
        let dir = self.domain_dir(domain);
        let entries = match fs::read_dir(&dir) {
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
                days.push(day);
            }
        }
        days.sort();
        Ok(days)
    }

    /// Remove one day's summary file. Returns whether a file existed.
    pub fn delete_day(&self, domain: Domain, day: NaiveDate) -> Result<bool> {
        match fs::remove_file(self.file_path(domain, day)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every summary file for the domain.
    pub fn delete_domain(&self, domain: Domain) -> Result<usize> {
        let mut removed = 0;
        for day in self.list_days(domain)? {
            fs::remove_file(self.file_path(domain, day))?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::ActivitySummary;

    fn day(s: &str) -> NaiveDate {
        parse_date_key(s).unwrap()
    }

    fn activity(date: &str, steps: f64) -> DaySummary {
        DaySummary::Activity(ActivitySummary {
            date: date.to_string(),
            steps,
            active_calories: 0.0,
            exercise_minutes: 0.0,
            resting_heart_rate_avg: None,
            heart_rate_variability_avg: None,
            entries: Vec::new(),
        })
    }

    #[test]
    fn test_persist_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SummaryStore::new(dir.path());

        let summary = activity("2024-01-05", 8000.0);
        store
            .persist(Domain::Activity, day("2024-01-05"), &summary)
            .unwrap();

        let loaded = store.load(Domain::Activity, day("2024-01-05")).unwrap();
        assert_eq!(loaded, Some(summary));

        let path = store.file_path(Domain::Activity, day("2024-01-05"));
        assert!(path.starts_with(dir.path().join("ActivitySummaries")));
    }

    #[test]
    fn test_persist_is_deterministic_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = SummaryStore::new(dir.path());
        let d = day("2024-01-05");

        store.persist(Domain::Activity, d, &activity("2024-01-05", 100.0)).unwrap();
        let first = fs::read_to_string(store.file_path(Domain::Activity, d)).unwrap();

        store.persist(Domain::Activity, d, &activity("2024-01-05", 100.0)).unwrap();
        let second = fs::read_to_string(store.file_path(Domain::Activity, d)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_and_corrupt_files_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SummaryStore::new(dir.path());
        let d = day("2024-02-01");

        assert_eq!(store.load(Domain::Sleep, d).unwrap(), None);

        fs::create_dir_all(store.domain_dir(Domain::Sleep)).unwrap();
        fs::write(store.file_path(Domain::Sleep, d), "{not json").unwrap();
        assert_eq!(store.load(Domain::Sleep, d).unwrap(), None);
    }

    #[test]
    fn test_list_and_delete_domain() {
        let dir = tempfile::tempdir().unwrap();
        let store = SummaryStore::new(dir.path());

        for date in ["2024-01-02", "2024-01-01", "2024-01-03"] {
            store
                .persist(Domain::Activity, day(date), &activity(date, 1.0))
                .unwrap();
        }
        store
            .persist(Domain::BodyMass, day("2024-01-01"), &activity("2024-01-01", 0.0))
            .unwrap();

        let days = store.list_days(Domain::Activity).unwrap();
        assert_eq!(
            days,
            vec![day("2024-01-01"), day("2024-01-02"), day("2024-01-03")]
        );

        assert_eq!(store.delete_domain(Domain::Activity).unwrap(), 3);
        assert!(store.list_days(Domain::Activity).unwrap().is_empty());
        assert_eq!(store.list_days(Domain::BodyMass).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_day_removes_only_that_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SummaryStore::new(dir.path());

        store
            .persist(Domain::Activity, day("2024-01-01"), &activity("2024-01-01", 1.0))
            .unwrap();
        store
            .persist(Domain::Activity, day("2024-01-02"), &activity("2024-01-02", 2.0))
            .unwrap();

        assert!(store.delete_day(Domain::Activity, day("2024-01-01")).unwrap());
        assert_eq!(store.list_days(Domain::Activity).unwrap(), vec![day("2024-01-02")]);

        // Deleting again is a no-op.
        assert!(!store.delete_day(Domain::Activity, day("2024-01-01")).unwrap());
    }

    #[test]
    fn test_persist_rejects_mismatched_date() {
        let dir = tempfile::tempdir().unwrap();
        let store = SummaryStore::new(dir.path());

        let err = store
            .persist(Domain::Activity, day("2024-01-02"), &activity("2024-01-01", 1.0))
            .unwrap_err();
        assert!(matches!(err, Error::Summary(_)));
        assert_eq!(store.load(Domain::Activity, day("2024-01-02")).unwrap(), None);
    }
}
