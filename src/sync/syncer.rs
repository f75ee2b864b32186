use chrono::{Local, Utc};

use crate::aggregate;
use crate::error::Result;
use crate::source::{Domain, FetchWindow, HealthSource};
use crate::storage::repository;
use crate::storage::Database;
use crate::summary::SummaryStore;
use crate::sync::{SyncOptions, SyncProgress, SyncReport, SyncStatus};

/// Sync one domain: fetch per-category changes from the source, merge
/// them into the warehouse, and rewrite the affected daily summaries.
///
/// Each category advances independently. A category whose fetch fails
/// is skipped with its anchor untouched, so the next sync retries the
/// same change range; the other categories still land. Merged rows,
/// applied deletions, and the new anchor commit in a single
/// transaction per category, with the anchor written last.
pub async fn sync_domain<S: HealthSource>(
    db: &Database,
    source: &S,
    summaries: &SummaryStore,
    domain: Domain,
    options: &SyncOptions,
    progress: &dyn SyncProgress,
) -> Result<SyncReport> {
    progress.on_domain_start(domain);
    source.request_authorization(domain.categories()).await?;

    let cutoff_hour = db
        .reader()
        .call(|conn| repository::get_cutoff_hour(conn))
        .await?;
    let job_id = db
        .writer()
        .call(move |conn| repository::insert_sync_job(conn, domain))
        .await?;

    let mut records_merged: u64 = 0;
    let mut records_deleted: u64 = 0;
    let mut categories_failed: u32 = 0;

    for &category in domain.categories() {
        let anchor: Option<Vec<u8>> = if options.full {
            None
        } else {
            db.reader()
                .call(move |conn| repository::get_anchor(conn, category.key()))
                .await?
        };

        let window = FetchWindow::lookback(options.lookback_days, Utc::now());
        let delta = match source.fetch_changes(category, anchor.as_deref(), window).await {
            Ok(delta) => delta,
            Err(e) => {
                log::warn!("Fetch failed for {}, keeping anchor: {e}", category.key());
                categories_failed += 1;
                continue;
            }
        };
        progress.on_category_fetched(domain, category.key(), delta.records.len());

        let (merged, deleted) = db
            .writer()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut merged: u64 = 0;
                let mut deleted: u64 = 0;
                for record in &delta.records {
                    if repository::insert_record_ignore(&tx, record)? {
                        merged += 1;
                    }
                }
                for key in &delta.deleted {
                    if repository::delete_record_by_key(&tx, key)? {
                        deleted += 1;
                    }
                }
                repository::set_anchor(&tx, category.key(), &delta.anchor)?;
                tx.commit()?;
                Ok::<_, rusqlite::Error>((merged, deleted))
            })
            .await?;
        records_merged += merged;
        records_deleted += deleted;
    }

    // Rebuild summaries from the merged state, even for days whose
    // records arrived in an earlier sync.
    let records = db
        .reader()
        .call(move |conn| repository::list_domain_records(conn, domain))
        .await?;
    let days = aggregate::aggregate_domain(domain, &records, cutoff_hour, &Local);

    let mut days_written: u32 = 0;
    for (day, summary) in &days {
        match summaries.persist(domain, *day, summary) {
            Ok(()) => days_written += 1,
            Err(e) => log::warn!("Could not write {} summary for {day}: {e}", domain.key()),
        }
    }
    progress.on_summaries_written(domain, days_written as usize);

    // Tombstones can empty out a day entirely; its summary file has to
    // go too, or readers keep seeing data the source deleted.
    match summaries.list_days(domain) {
        Ok(existing) => {
            for day in existing.into_iter().filter(|d| !days.contains_key(d)) {
                if let Err(e) = summaries.delete_day(domain, day) {
                    log::warn!("Could not remove stale {} summary for {day}: {e}", domain.key());
                }
            }
        }
        Err(e) => log::warn!("Could not list {} summaries: {e}", domain.key()),
    }

    let report = SyncReport::from_counts(
        domain,
        records_merged,
        records_deleted,
        categories_failed,
        days_written,
    );

    let status = match report.status {
        SyncStatus::Success => "completed",
        SyncStatus::PartialFailure => "partial",
        SyncStatus::Failed => "failed",
    };
    let job_error = report.error.clone();
    db.writer()
        .call(move |conn| {
            repository::update_sync_job(
                conn,
                job_id,
                status,
                records_merged,
                records_deleted,
                job_error.as_deref(),
            )
        })
        .await?;

    progress.on_domain_complete(&report);
    Ok(report)
}

/// Drop everything the domain has accumulated, then sync from scratch.
/// Anchors and rows go first so the source is queried by window again.
pub async fn resync_domain<S: HealthSource>(
    db: &Database,
    source: &S,
    summaries: &SummaryStore,
    domain: Domain,
    options: &SyncOptions,
    progress: &dyn SyncProgress,
) -> Result<SyncReport> {
    db.writer()
        .call(move |conn| {
            repository::delete_domain_anchors(conn, domain)?;
            repository::delete_domain_records(conn, domain)?;
            Ok::<(), rusqlite::Error>(())
        })
        .await?;
    if let Err(e) = summaries.delete_domain(domain) {
        log::warn!("Could not clear {} summaries: {e}", domain.key());
    }
    sync_domain(db, source, summaries, domain, options, progress).await
}
