use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::source::{Domain, HealthCategory, HealthRecord, RecordKey};

/// Canonical timestamp encoding for warehouse rows: UTC RFC 3339 at
/// second precision. Lexicographic order matches chronological order,
/// and the encoding is stable enough to serve in the dedup key.
pub fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

/// Configured day cutoff hour, or the default when unset or unparseable.
pub fn get_cutoff_hour(conn: &Connection) -> Result<u32, rusqlite::Error> {
    let value = get_config(conn, "day_cutoff_hour")?;
    Ok(crate::date_util::cutoff_from_config(value))
}

// ── Sync anchors ───────────────────────────────────────────────────

pub fn get_anchor(conn: &Connection, category_key: &str) -> Result<Option<Vec<u8>>, rusqlite::Error> {
    conn.query_row(
        "SELECT anchor FROM sync_anchors WHERE category_key = ?1",
        params![category_key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_anchor(
    conn: &Connection,
    category_key: &str,
    anchor: &[u8],
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO sync_anchors (category_key, anchor, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(category_key) DO UPDATE SET
           anchor = excluded.anchor, updated_at = excluded.updated_at",
        params![category_key, anchor],
    )?;
    Ok(())
}

pub fn delete_anchor(conn: &Connection, category_key: &str) -> Result<bool, rusqlite::Error> {
    let changed = conn.execute(
        "DELETE FROM sync_anchors WHERE category_key = ?1",
        params![category_key],
    )?;
    Ok(changed > 0)
}

pub fn delete_all_anchors(conn: &Connection) -> Result<usize, rusqlite::Error> {
    conn.execute("DELETE FROM sync_anchors", [])
}

pub fn delete_domain_anchors(conn: &Connection, domain: Domain) -> Result<usize, rusqlite::Error> {
    let mut deleted = 0;
    for category in domain.categories() {
        if delete_anchor(conn, category.key())? {
            deleted += 1;
        }
    }
    Ok(deleted)
}

pub fn count_anchors(conn: &Connection) -> Result<i64, rusqlite::Error> {
    conn.query_row("SELECT COUNT(*) FROM sync_anchors", [], |row| row.get(0))
}

// ── Health records ─────────────────────────────────────────────────

/// Insert a record unless its dedup key is already present.
/// Returns true when a row was actually added.
pub fn insert_record_ignore(
    conn: &Connection,
    record: &HealthRecord,
) -> Result<bool, rusqlite::Error> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO health_records
           (category, value, unit, start_time, end_time, source)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.category.key(),
            record.value,
            record.unit,
            fmt_ts(&record.start_time),
            record.end_time.as_ref().map(fmt_ts),
            record.source,
        ],
    )?;
    Ok(changed > 0)
}

/// Remove the row matching a source-reported tombstone.
pub fn delete_record_by_key(conn: &Connection, key: &RecordKey) -> Result<bool, rusqlite::Error> {
    let changed = conn.execute(
        "DELETE FROM health_records
         WHERE category = ?1 AND start_time = ?2 AND value = ?3",
        params![key.category.key(), fmt_ts(&key.start_time), key.value],
    )?;
    Ok(changed > 0)
}

fn record_from_row(row: &rusqlite::Row<'_>) -> Result<Option<HealthRecord>, rusqlite::Error> {
    let category_key: String = row.get(0)?;
    let start_time: String = row.get(3)?;
    let end_time: Option<String> = row.get(4)?;

    let category = match HealthCategory::from_key(&category_key) {
        Some(c) => c,
        None => return Ok(None),
    };
    let start_time = match parse_ts(&start_time) {
        Some(ts) => ts,
        None => return Ok(None),
    };

    Ok(Some(HealthRecord {
        category,
        value: row.get(1)?,
        unit: row.get(2)?,
        start_time,
        end_time: end_time.as_deref().and_then(parse_ts),
        source: row.get(5)?,
    }))
}

/// All stored records for a domain's categories, oldest first.
/// Rows that no longer decode (unknown category, mangled timestamp) are
/// skipped with a warning rather than failing the sync.
pub fn list_domain_records(
    conn: &Connection,
    domain: Domain,
) -> Result<Vec<HealthRecord>, rusqlite::Error> {
    let keys: Vec<&str> = domain.categories().iter().map(|c| c.key()).collect();
    let placeholders = vec!["?"; keys.len()].join(", ");
    let sql = format!(
        "SELECT category, value, unit, start_time, end_time, source
         FROM health_records
         WHERE category IN ({placeholders})
         ORDER BY start_time, category, value"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(keys), record_from_row)?;

    let mut records = Vec::new();
    for row in rows {
        match row? {
            Some(record) => records.push(record),
            None => log::warn!("skipping undecodable health record row"),
        }
    }
    Ok(records)
}

pub fn delete_domain_records(conn: &Connection, domain: Domain) -> Result<usize, rusqlite::Error> {
    let keys: Vec<&str> = domain.categories().iter().map(|c| c.key()).collect();
    let placeholders = vec!["?"; keys.len()].join(", ");
    let sql = format!("DELETE FROM health_records WHERE category IN ({placeholders})");
    conn.execute(&sql, rusqlite::params_from_iter(keys))
}

pub fn count_domain_records(conn: &Connection, domain: Domain) -> Result<i64, rusqlite::Error> {
    let keys: Vec<&str> = domain.categories().iter().map(|c| c.key()).collect();
    let placeholders = vec!["?"; keys.len()].join(", ");
    let sql = format!(
        "SELECT COUNT(*) FROM health_records WHERE category IN ({placeholders})"
    );
    conn.query_row(&sql, rusqlite::params_from_iter(keys), |row| row.get(0))
}

// ── Food entries ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodEntry {
    pub id: i64,
    pub food_name: String,
    pub protein: f64,
    pub fat: f64,
    pub carbs: f64,
    pub calories: f64,
    pub consumed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFoodEntry {
    pub food_name: String,
    pub protein: f64,
    pub fat: f64,
    pub carbs: f64,
    pub calories: f64,
    pub consumed_at: DateTime<Utc>,
}

impl NewFoodEntry {
    /// Name must be present; every numeric field must be non-negative.
    pub fn validate(&self) -> Result<(), String> {
        if self.food_name.trim().is_empty() {
            return Err("food_name must not be empty".into());
        }
        for (field, value) in [
            ("protein", self.protein),
            ("fat", self.fat),
            ("carbs", self.carbs),
            ("calories", self.calories),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{field} must be a non-negative number"));
            }
        }
        Ok(())
    }
}

pub fn insert_food_entry(
    conn: &Connection,
    entry: &NewFoodEntry,
) -> Result<FoodEntry, rusqlite::Error> {
    conn.execute(
        "INSERT INTO food_entries (food_name, protein, fat, carbs, calories, consumed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.food_name,
            entry.protein,
            entry.fat,
            entry.carbs,
            entry.calories,
            fmt_ts(&entry.consumed_at),
        ],
    )?;
    Ok(FoodEntry {
        id: conn.last_insert_rowid(),
        food_name: entry.food_name.clone(),
        protein: entry.protein,
        fat: entry.fat,
        carbs: entry.carbs,
        calories: entry.calories,
        consumed_at: entry.consumed_at,
    })
}

/// Food entries with `start <= consumed_at < end`, oldest first.
pub fn list_food_entries_between(
    conn: &Connection,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
) -> Result<Vec<FoodEntry>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, food_name, protein, fat, carbs, calories, consumed_at
         FROM food_entries
         WHERE consumed_at >= ?1 AND consumed_at < ?2
         ORDER BY consumed_at, id",
    )?;
    let rows = stmt.query_map(params![fmt_ts(start), fmt_ts(end)], |row| {
        let consumed_at: String = row.get(6)?;
        Ok((
            FoodEntry {
                id: row.get(0)?,
                food_name: row.get(1)?,
                protein: row.get(2)?,
                fat: row.get(3)?,
                carbs: row.get(4)?,
                calories: row.get(5)?,
                consumed_at: DateTime::<Utc>::MIN_UTC,
            },
            consumed_at,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (mut entry, consumed_at) = row?;
        match parse_ts(&consumed_at) {
            Some(ts) => {
                entry.consumed_at = ts;
                entries.push(entry);
            }
            None => log::warn!("skipping food entry {} with bad timestamp", entry.id),
        }
    }
    Ok(entries)
}

pub fn count_food_entries(conn: &Connection) -> Result<i64, rusqlite::Error> {
    conn.query_row("SELECT COUNT(*) FROM food_entries", [], |row| row.get(0))
}

// ── Sync jobs ──────────────────────────────────────────────────────

pub fn insert_sync_job(conn: &Connection, domain: Domain) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO sync_jobs (domain) VALUES (?1)",
        params![domain.key()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_sync_job(
    conn: &Connection,
    job_id: i64,
    status: &str,
    records_merged: u64,
    records_deleted: u64,
    error: Option<&str>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE sync_jobs
         SET status = ?2, records_merged = ?3, records_deleted = ?4,
             completed_at = datetime('now'), error = ?5
         WHERE id = ?1",
        params![job_id, status, records_merged, records_deleted, error],
    )?;
    Ok(())
}

pub fn last_completed_sync(conn: &Connection) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT MAX(completed_at) FROM sync_jobs WHERE status = 'completed'",
        [],
        |row| row.get(0),
    )
    .optional()
    .map(|opt: Option<Option<String>>| opt.flatten())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::storage::Database;

    fn record(category: HealthCategory, value: f64, start: &str) -> HealthRecord {
        HealthRecord {
            category,
            value,
            unit: category.default_unit().to_string(),
            start_time: parse_ts(start).unwrap(),
            end_time: None,
            source: "test".into(),
        }
    }

    #[tokio::test]
    async fn test_anchor_roundtrip() {
        let db = Database::open_memory().await.unwrap();

        let (before, after_set, after_overwrite, deleted, after_delete) = db
            .writer()
            .call(|conn| {
                let before = get_anchor(conn, "bodyMass")?;
                set_anchor(conn, "bodyMass", &[1, 2, 3])?;
                let after_set = get_anchor(conn, "bodyMass")?;
                // Overwritten on each successful fetch.
                set_anchor(conn, "bodyMass", &[9])?;
                let after_overwrite = get_anchor(conn, "bodyMass")?;
                let deleted = delete_anchor(conn, "bodyMass")?;
                let after_delete = get_anchor(conn, "bodyMass")?;
                Ok::<_, rusqlite::Error>((before, after_set, after_overwrite, deleted, after_delete))
            })
            .await
            .unwrap();

        assert_eq!(before, None);
        assert_eq!(after_set, Some(vec![1, 2, 3]));
        assert_eq!(after_overwrite, Some(vec![9]));
        assert!(deleted);
        assert_eq!(after_delete, None);
    }

    #[tokio::test]
    async fn test_delete_all_anchors() {
        let db = Database::open_memory().await.unwrap();

        let (removed, remaining) = db
            .writer()
            .call(|conn| {
                set_anchor(conn, "bodyMass", &[1])?;
                set_anchor(conn, "stepCount", &[2])?;
                set_anchor(conn, "sleepAsleep", &[3])?;
                let removed = delete_all_anchors(conn)?;
                let remaining = count_anchors(conn)?;
                Ok::<_, rusqlite::Error>((removed, remaining))
            })
            .await
            .unwrap();

        assert_eq!(removed, 3);
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_anchor_durability_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("healthdw.db");

        {
            let db = Database::open_at(&path).await.unwrap();
            db.writer()
                .call(|conn| set_anchor(conn, "stepCount", &[7, 7, 7]))
                .await
                .unwrap();
        }

        let db = Database::open_at(&path).await.unwrap();
        let anchor = db
            .reader()
            .call(|conn| get_anchor(conn, "stepCount"))
            .await
            .unwrap();
        assert_eq!(anchor, Some(vec![7, 7, 7]));
    }

    #[tokio::test]
    async fn test_insert_record_dedup() {
        let db = Database::open_memory().await.unwrap();

        let (first, second, third, total) = db
            .writer()
            .call(|conn| {
                let rec = record(HealthCategory::BodyMass, 70.5, "2024-01-01T08:00:00Z");
                let first = insert_record_ignore(conn, &rec)?;
                // Same dedup key: silently discarded.
                let second = insert_record_ignore(conn, &rec)?;
                // Same instant, different value: a distinct reading.
                let other = record(HealthCategory::BodyMass, 70.6, "2024-01-01T08:00:00Z");
                let third = insert_record_ignore(conn, &other)?;
                let total = count_domain_records(conn, Domain::BodyMass)?;
                Ok::<_, rusqlite::Error>((first, second, third, total))
            })
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        assert!(third);
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn test_delete_record_by_key() {
        let db = Database::open_memory().await.unwrap();

        let (first_delete, second_delete, remaining) = db
            .writer()
            .call(|conn| {
                let rec = record(HealthCategory::StepCount, 1200.0, "2024-01-01T10:00:00Z");
                insert_record_ignore(conn, &rec)?;
                let first = delete_record_by_key(conn, &rec.dedup_key())?;
                let second = delete_record_by_key(conn, &rec.dedup_key())?;
                let remaining = count_domain_records(conn, Domain::Activity)?;
                Ok::<_, rusqlite::Error>((first, second, remaining))
            })
            .await
            .unwrap();

        assert!(first_delete);
        assert!(!second_delete);
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_list_domain_records_scoped() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                insert_record_ignore(
                    conn,
                    &record(HealthCategory::BodyMass, 70.0, "2024-01-02T08:00:00Z"),
                )?;
                insert_record_ignore(
                    conn,
                    &record(HealthCategory::StepCount, 4000.0, "2024-01-01T10:00:00Z"),
                )?;
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();

        let mass = db
            .reader()
            .call(|conn| list_domain_records(conn, Domain::BodyMass))
            .await
            .unwrap();
        assert_eq!(mass.len(), 1);
        assert_eq!(mass[0].category, HealthCategory::BodyMass);
    }

    #[tokio::test]
    async fn test_food_entry_roundtrip_and_range() {
        let db = Database::open_memory().await.unwrap();

        let entry = NewFoodEntry {
            food_name: "鶏むね肉".into(),
            protein: 31.0,
            fat: 2.0,
            carbs: 0.0,
            calories: 150.0,
            consumed_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        };
        assert!(entry.validate().is_ok());

        let stored = db
            .writer()
            .call({
                let entry = entry.clone();
                move |conn| insert_food_entry(conn, &entry)
            })
            .await
            .unwrap();
        assert!(stored.id > 0);

        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let listed = db
            .reader()
            .call(move |conn| list_food_entries_between(conn, &start, &end))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].food_name, "鶏むね肉");
        assert_eq!(listed[0].consumed_at, entry.consumed_at);

        let later = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let much_later = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let empty = db
            .reader()
            .call(move |conn| list_food_entries_between(conn, &later, &much_later))
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_new_food_entry_validation() {
        let mut entry = NewFoodEntry {
            food_name: "rice".into(),
            protein: 2.5,
            fat: 0.3,
            carbs: 37.0,
            calories: 168.0,
            consumed_at: Utc::now(),
        };
        assert!(entry.validate().is_ok());

        entry.protein = -1.0;
        assert!(entry.validate().is_err());

        entry.protein = 2.5;
        entry.food_name = "  ".into();
        assert!(entry.validate().is_err());
    }
}
