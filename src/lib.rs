pub mod aggregate;
pub mod analysis;
pub mod date_util;
pub mod error;
pub mod server;
pub mod source;
pub mod storage;
pub mod summary;
pub mod sync;

pub use error::{Error, Result};
pub use source::{Domain, FetchWindow, HealthCategory, HealthRecord, HealthSource, SourceDelta};
pub use storage::Database;
pub use summary::SummaryStore;
pub use sync::{NoopProgress, SyncOptions, SyncProgress, SyncReport, SyncStatus};

// Re-export repository types needed by the binary crates, but not the module itself
pub use storage::repository::{FoodEntry, NewFoodEntry};

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::Local;

use storage::repository;
use sync::syncer;

/// Main entry point for the health data warehouse.
pub struct HealthDW<S> {
    db: Database,
    source: S,
    summaries: SummaryStore,
    in_flight: Mutex<HashSet<Domain>>,
}

/// Releases a domain's in-flight slot when the sync future settles,
/// including on early return.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<Domain>>,
    domain: Domain,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.domain);
        }
    }
}

impl<S: HealthSource> HealthDW<S> {
    pub fn new(db: Database, source: S, summaries: SummaryStore) -> Self {
        Self {
            db,
            source,
            summaries,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn summaries(&self) -> &SummaryStore {
        &self.summaries
    }

    fn acquire(&self, domain: Domain) -> Result<InFlightGuard<'_>> {
        let mut set = self
            .in_flight
            .lock()
            .map_err(|_| Error::Other("in-flight lock poisoned".into()))?;
        if !set.insert(domain) {
            return Err(Error::SyncInProgress(domain));
        }
        Ok(InFlightGuard {
            in_flight: &self.in_flight,
            domain,
        })
    }

    /// Sync one domain. A second sync of the same domain while this one
    /// runs is rejected with `Error::SyncInProgress`; other domains are
    /// unaffected.
    pub async fn sync_domain(
        &self,
        domain: Domain,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
    ) -> Result<SyncReport> {
        let _guard = self.acquire(domain)?;
        syncer::sync_domain(&self.db, &self.source, &self.summaries, domain, options, progress)
            .await
    }

    /// Sync every domain in order. A domain that fails outright still
    /// produces a report so the caller sees the whole picture.
    pub async fn sync_all(
        &self,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
    ) -> Result<Vec<SyncReport>> {
        let mut reports = Vec::with_capacity(Domain::ALL.len());
        for &domain in &Domain::ALL {
            match self.sync_domain(domain, options, progress).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    log::warn!("Sync failed for {}: {e}", domain.key());
                    reports.push(SyncReport::failed(domain, e.to_string()));
                }
            }
        }
        Ok(reports)
    }

    /// Drop a domain's anchors, rows, and summaries, then sync it from
    /// scratch.
    pub async fn resync_domain(
        &self,
        domain: Domain,
        options: &SyncOptions,
        progress: &dyn SyncProgress,
    ) -> Result<SyncReport> {
        let _guard = self.acquire(domain)?;
        syncer::resync_domain(&self.db, &self.source, &self.summaries, domain, options, progress)
            .await
    }

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        Ok(self
            .db
            .reader()
            .call(move |conn| repository::get_config(conn, &key))
            .await?)
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        Ok(self
            .db
            .writer()
            .call(move |conn| repository::set_config(conn, &key, &value))
            .await?)
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await?)
    }

    pub async fn add_food_entry(&self, entry: NewFoodEntry) -> Result<FoodEntry> {
        entry.validate().map_err(Error::Validation)?;
        Ok(self
            .db
            .writer()
            .call(move |conn| repository::insert_food_entry(conn, &entry))
            .await?)
    }

    /// Food logged during the current logical day.
    pub async fn today_food_entries(&self) -> Result<Vec<FoodEntry>> {
        analysis::today_food_entries(&self.db).await
    }

    /// The logical date "today" resolves to under the configured cutoff.
    pub async fn today(&self) -> Result<chrono::NaiveDate> {
        let cutoff = self
            .db
            .reader()
            .call(|conn| repository::get_cutoff_hour(conn))
            .await?;
        Ok(date_util::today_logical(cutoff, &Local))
    }
}
