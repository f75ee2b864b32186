use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{FetchWindow, HealthCategory, HealthRecord, HealthSource, RecordKey, SourceDelta, SourceError};

/// Health data source backed by a JSON export file.
///
/// The export is an append-only change log: every entry carries a
/// monotonically increasing `seq`, and entries with `deleted: true` are
/// tombstones for a previously exported sample. The anchor for a
/// category is the highest `seq` this source has handed out for it,
/// encoded as 8 little-endian bytes. Anchor bytes of any other shape
/// decode to "no anchor" and force a full-window fetch.
pub struct ExportSource {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportEntry {
    seq: u64,
    category: HealthCategory,
    value: f64,
    unit: Option<String>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    source: String,
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Deserialize)]
struct ExportFile {
    records: Vec<ExportEntry>,
}

impl ExportSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn encode_anchor(seq: u64) -> Vec<u8> {
        seq.to_le_bytes().to_vec()
    }

    pub fn decode_anchor(bytes: &[u8]) -> Option<u64> {
        <[u8; 8]>::try_from(bytes).ok().map(u64::from_le_bytes)
    }

    fn load(&self) -> Result<ExportFile, SourceError> {
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SourceError::NotAvailable
            } else {
                SourceError::Io(e.to_string())
            }
        })?;
        serde_json::from_str(&data)
            .map_err(|e| SourceError::Io(format!("malformed export {}: {e}", self.path.display())))
    }
}

impl HealthSource for ExportSource {
    async fn request_authorization(
        &self,
        _categories: &[HealthCategory],
    ) -> Result<(), SourceError> {
        if self.path.exists() {
            Ok(())
        } else {
            Err(SourceError::NotAvailable)
        }
    }

    async fn fetch_changes(
        &self,
        category: HealthCategory,
        anchor: Option<&[u8]>,
        window: FetchWindow,
    ) -> Result<SourceDelta, SourceError> {
        let export = self.load()?;
        let since = anchor.and_then(Self::decode_anchor);
        if anchor.is_some() && since.is_none() {
            log::warn!("undecodable anchor for {category}, falling back to full fetch");
        }

        let mut last_seq = since.unwrap_or(0);
        let entries: Vec<ExportEntry> = export
            .records
            .into_iter()
            .filter(|e| e.category == category)
            .inspect(|e| last_seq = last_seq.max(e.seq))
            .collect();

        // A tombstone supersedes every earlier live entry with the same
        // key, so a full fetch must not resurrect samples that were
        // exported and later deleted. Tombstones are still reported so
        // that local rows (left behind by a corrupt anchor, say) get
        // cleaned up, unless a later re-export brought the sample back.
        let keyed: Vec<(u64, bool, DateTime<Utc>, f64)> = entries
            .iter()
            .map(|e| (e.seq, e.deleted, e.start_time, e.value))
            .collect();
        let outranked = |seq: u64, deleted: bool, start: DateTime<Utc>, value: f64| {
            keyed.iter().any(|&(other_seq, other_deleted, other_start, other_value)| {
                other_seq > seq
                    && other_deleted != deleted
                    && other_start == start
                    && other_value == value
            })
        };

        let mut records = Vec::new();
        let mut deleted = Vec::new();

        for entry in entries {
            match since {
                // Incremental: only entries past the anchor.
                Some(s) => {
                    if entry.seq <= s {
                        continue;
                    }
                }
                // Full fetch: live samples inside the window that no
                // later tombstone has deleted, and tombstones that no
                // later re-export has revived.
                None => {
                    if !entry.deleted {
                        let effective = entry.end_time.unwrap_or(entry.start_time);
                        if !window.contains(effective) {
                            continue;
                        }
                    }
                    if outranked(entry.seq, entry.deleted, entry.start_time, entry.value) {
                        continue;
                    }
                }
            }

            if entry.deleted {
                deleted.push(RecordKey {
                    category: entry.category,
                    start_time: entry.start_time,
                    value: entry.value,
                });
            } else {
                records.push(HealthRecord {
                    category: entry.category,
                    value: entry.value,
                    unit: entry
                        .unit
                        .unwrap_or_else(|| category.default_unit().to_string()),
                    start_time: entry.start_time,
                    end_time: entry.end_time,
                    source: entry.source,
                });
            }
        }

        Ok(SourceDelta {
            records,
            deleted,
            anchor: Self::encode_anchor(last_seq),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::TimeZone;

    use super::*;

    fn write_export(entries: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"records": [{entries}]}}"#).unwrap();
        file
    }

    fn window_around_2024() -> FetchWindow {
        FetchWindow {
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn full_fetch_respects_window() {
        let file = write_export(
            r#"{"seq": 1, "category": "stepCount", "value": 1000.0, "startTime": "2024-03-01T10:00:00Z"},
               {"seq": 2, "category": "stepCount", "value": 500.0, "startTime": "2023-03-01T10:00:00Z"}"#,
        );
        let source = ExportSource::new(file.path());

        let delta = source
            .fetch_changes(HealthCategory::StepCount, None, window_around_2024())
            .await
            .unwrap();

        assert_eq!(delta.records.len(), 1);
        assert_eq!(delta.records[0].value, 1000.0);
        // Anchor still covers everything seen, including out-of-window rows.
        assert_eq!(ExportSource::decode_anchor(&delta.anchor), Some(2));
    }

    #[tokio::test]
    async fn incremental_fetch_skips_already_seen_seqs() {
        let file = write_export(
            r#"{"seq": 1, "category": "bodyMass", "value": 70.0, "startTime": "2024-03-01T08:00:00Z"},
               {"seq": 2, "category": "bodyMass", "value": 69.5, "startTime": "2024-03-02T08:00:00Z"}"#,
        );
        let source = ExportSource::new(file.path());

        let anchor = ExportSource::encode_anchor(1);
        let delta = source
            .fetch_changes(
                HealthCategory::BodyMass,
                Some(&anchor),
                window_around_2024(),
            )
            .await
            .unwrap();

        assert_eq!(delta.records.len(), 1);
        assert_eq!(delta.records[0].value, 69.5);
        assert_eq!(ExportSource::decode_anchor(&delta.anchor), Some(2));
    }

    #[tokio::test]
    async fn corrupt_anchor_falls_back_to_full_window() {
        let file = write_export(
            r#"{"seq": 7, "category": "bodyMass", "value": 70.0, "startTime": "2024-03-01T08:00:00Z"}"#,
        );
        let source = ExportSource::new(file.path());

        let delta = source
            .fetch_changes(
                HealthCategory::BodyMass,
                Some(b"not-a-seq"),
                window_around_2024(),
            )
            .await
            .unwrap();

        assert_eq!(delta.records.len(), 1);
        assert_eq!(ExportSource::decode_anchor(&delta.anchor), Some(7));
    }

    #[tokio::test]
    async fn full_fetch_does_not_resurrect_deleted_samples() {
        let file = write_export(
            r#"{"seq": 1, "category": "bodyMass", "value": 70.0, "startTime": "2024-03-01T08:00:00Z"},
               {"seq": 2, "category": "bodyMass", "value": 70.0, "startTime": "2024-03-01T08:00:00Z", "deleted": true}"#,
        );
        let source = ExportSource::new(file.path());

        let full = source
            .fetch_changes(HealthCategory::BodyMass, None, window_around_2024())
            .await
            .unwrap();
        assert!(full.records.is_empty());
        // The tombstone still comes through so stale local rows get removed.
        assert_eq!(full.deleted.len(), 1);
        assert_eq!(full.deleted[0].value, 70.0);

        let anchor = ExportSource::encode_anchor(1);
        let incremental = source
            .fetch_changes(
                HealthCategory::BodyMass,
                Some(&anchor),
                window_around_2024(),
            )
            .await
            .unwrap();
        assert_eq!(incremental.deleted.len(), 1);
        assert_eq!(incremental.deleted[0].value, 70.0);
    }

    #[tokio::test]
    async fn sample_readded_after_tombstone_survives_full_fetch() {
        let file = write_export(
            r#"{"seq": 1, "category": "bodyMass", "value": 70.0, "startTime": "2024-03-01T08:00:00Z"},
               {"seq": 2, "category": "bodyMass", "value": 70.0, "startTime": "2024-03-01T08:00:00Z", "deleted": true},
               {"seq": 3, "category": "bodyMass", "value": 70.0, "startTime": "2024-03-01T08:00:00Z"}"#,
        );
        let source = ExportSource::new(file.path());

        let full = source
            .fetch_changes(HealthCategory::BodyMass, None, window_around_2024())
            .await
            .unwrap();

        // Only the tombstone at seq 2 is outranked; the re-export at seq 3 is live.
        assert_eq!(full.records.len(), 1);
        assert_eq!(ExportSource::decode_anchor(&full.anchor), Some(3));
    }

    #[tokio::test]
    async fn missing_file_is_not_available() {
        let source = ExportSource::new("/nonexistent/export.json");
        let err = source
            .fetch_changes(HealthCategory::StepCount, None, window_around_2024())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NotAvailable));
    }
}
