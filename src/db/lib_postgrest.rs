use log::info;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};

use crate::config::StorageConfig;
use crate::db::globe_at_night::reading::{Reading, NATURAL_KEY_COLUMNS};
use crate::error::{Result, SyncError};

/// Somewhere readings can be upserted to.  Rows matching an existing
/// natural key are merged, not duplicated.
pub trait ReadingStore {
    /// Upsert one batch, return the number of rows written.
    fn upsert(&mut self, batch: &[Reading]) -> Result<usize>;
}

/// A table behind a PostgREST endpoint (e.g. Supabase).
pub struct RestTable {
    client: Client,
    config: StorageConfig,
}

impl RestTable {
    pub fn new(client: Client, config: StorageConfig) -> RestTable {
        RestTable { client, config }
    }

    pub fn url(&self) -> String {
        format!("{}/rest/v1/{}", self.config.base_url, self.config.table)
    }
}

impl ReadingStore for RestTable {
    fn upsert(&mut self, batch: &[Reading]) -> Result<usize> {
        let body = serde_json::to_string(batch)?;
        let response = self
            .client
            .post(self.url())
            .query(&[("on_conflict", NATURAL_KEY_COLUMNS.join(","))])
            .header("apikey", &self.config.api_key)
            .header(AUTHORIZATION, format!("Bearer {}", self.config.api_key))
            .header(CONTENT_TYPE, "application/json")
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .body(body)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(SyncError::Rejected { status, body });
        }
        Ok(batch.len())
    }
}

/// Upsert the readings in chunks of `batch_size`, one request per chunk.
/// Stops at the first failure, chunks already sent stay in the table.
pub fn upload_in_batches<S: ReadingStore + ?Sized>(
    store: &mut S,
    readings: &[Reading],
    batch_size: usize,
) -> Result<usize> {
    if batch_size == 0 {
        return Err(SyncError::InvalidConfig(
            "batch size must be positive".to_string(),
        ));
    }
    let mut total = 0;
    for chunk in readings.chunks(batch_size) {
        total += store.upsert(chunk)?;
        info!("Upserted {}/{} rows", total, readings.len());
    }
    Ok(total)
}
