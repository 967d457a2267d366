use std::time::Duration;

use log::info;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, USER_AGENT};

use crate::error::{Result, SyncError};

/// A blocking client with a per-request timeout.  The annual exports are
/// large, so give it minutes rather than seconds.
pub fn http_client(timeout: Duration) -> Result<Client> {
    let client = Client::builder().timeout(timeout).build()?;
    Ok(client)
}

/// Download a CSV file and return the body as text.  One attempt only,
/// a non 2XX status is an error.
pub fn fetch_csv(client: &Client, url: &str) -> Result<String> {
    info!("Downloading {}", url);
    let response = client
        .get(url)
        .header(
            USER_AGENT,
            concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")),
        )
        .header(ACCEPT, "text/csv, */*")
        .send()?;
    let status = response.status();
    if !status.is_success() {
        return Err(SyncError::HttpStatus {
            url: url.to_string(),
            status,
        });
    }
    let body = response.text()?;
    info!("Downloaded {} bytes", body.len());
    Ok(body)
}
