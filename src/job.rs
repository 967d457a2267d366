use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::config::SyncConfig;
use crate::db::globe_at_night::normalize::{normalize, NormalizeStats, Normalized};
use crate::db::globe_at_night::reading::Reading;
use crate::db::lib_download::{fetch_csv, http_client};
use crate::db::lib_postgrest::{upload_in_batches, ReadingStore};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub stats: NormalizeStats,
    pub upserted: usize,
    /// Only filled in for a dry run
    pub preview: Vec<Reading>,
}

/// Download the export, normalize it and upsert the rows.
pub fn run<S: ReadingStore + ?Sized>(
    config: &SyncConfig,
    store: &mut S,
    dry_run: bool,
) -> Result<SyncReport> {
    let client = http_client(config.fetch_timeout)?;
    let text = fetch_csv(&client, &config.source_url)?;
    run_with_text(&text, config, store, dry_run)
}

/// Same as [run] but with a local copy of the export.
pub fn run_with_file<S: ReadingStore + ?Sized>(
    path: &Path,
    config: &SyncConfig,
    store: &mut S,
    dry_run: bool,
) -> Result<SyncReport> {
    info!("Reading {}", path.display());
    let text = fs::read_to_string(path)?;
    run_with_text(&text, config, store, dry_run)
}

/// Same as [run] but starting from CSV text already in memory.
pub fn run_with_text<S: ReadingStore + ?Sized>(
    csv_text: &str,
    config: &SyncConfig,
    store: &mut S,
    dry_run: bool,
) -> Result<SyncReport> {
    config.validate()?;
    let Normalized { readings, stats } = normalize(csv_text, &config.normalize)?;
    info!(
        "Read {} rows, kept {}, dropped {} with missing essentials and {} out of range",
        stats.rows_read, stats.kept, stats.missing_essentials, stats.out_of_range
    );
    if readings.is_empty() {
        warn!("Nothing to upload");
    }

    if dry_run {
        info!("Dry run, skipping the upload of {} rows", readings.len());
        return Ok(SyncReport {
            stats,
            upserted: 0,
            preview: readings,
        });
    }

    let upserted = upload_in_batches(store, &readings, config.batch_size)?;
    info!("Done. Upserted {} rows into {}", upserted, config.storage.table);
    Ok(SyncReport {
        stats,
        upserted,
        preview: Vec::new(),
    })
}
