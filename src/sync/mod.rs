pub mod syncer;

use serde::Serialize;

use crate::source::Domain;

/// Options controlling a sync operation.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// How far back the fetch window reaches when no anchor constrains
    /// the source.
    pub lookback_days: u32,
    /// Ignore stored anchors and fetch the whole window again.
    pub full: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            lookback_days: 30,
            full: false,
        }
    }
}

/// Report returned after a domain sync completes.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub domain: Domain,
    pub status: SyncStatus,
    pub records_merged: u64,
    pub records_deleted: u64,
    pub categories_failed: u32,
    pub days_written: u32,
    pub error: Option<String>,
}

impl SyncReport {
    /// Create a SyncReport with the appropriate status derived from counts.
    pub fn from_counts(
        domain: Domain,
        records_merged: u64,
        records_deleted: u64,
        categories_failed: u32,
        days_written: u32,
    ) -> Self {
        let status = if categories_failed == 0 {
            SyncStatus::Success
        } else if records_merged > 0 || records_deleted > 0 || days_written > 0 {
            SyncStatus::PartialFailure
        } else {
            SyncStatus::Failed
        };
        let error = if categories_failed > 0 {
            Some(format!("{categories_failed} categories failed"))
        } else {
            None
        };
        Self {
            domain,
            status,
            records_merged,
            records_deleted,
            categories_failed,
            days_written,
            error,
        }
    }

    pub fn failed(domain: Domain, error: String) -> Self {
        Self {
            domain,
            status: SyncStatus::Failed,
            records_merged: 0,
            records_deleted: 0,
            categories_failed: 0,
            days_written: 0,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    Success,
    PartialFailure,
    Failed,
}

/// Callbacks for reporting sync progress to a UI. Progress reporters
/// are shared across tasks, so implementations must be thread-safe.
pub trait SyncProgress: Send + Sync {
    fn on_domain_start(&self, _domain: Domain) {}
    fn on_category_fetched(&self, _domain: Domain, _category_key: &str, _records: usize) {}
    fn on_summaries_written(&self, _domain: Domain, _days: usize) {}
    fn on_domain_complete(&self, _report: &SyncReport) {}
}

/// Progress reporter that does nothing.
pub struct NoopProgress;

impl SyncProgress for NoopProgress {}
