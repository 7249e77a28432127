mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result, bail};
use tracing::debug;

/// Issues a GET and returns the body. Non-2xx responses are errors.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client
        .execute(req)
        .await
        .with_context(|| format!("request to {url} failed"))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("{url} returned status {status}: {body}");
    }

    Ok(resp.bytes().await?.to_vec())
}

/// Returns `true` when `location` should be fetched over HTTP rather than
/// read from disk.
pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Loads data from a local file path or fetches it over HTTP.
#[tracing::instrument(skip(client), fields(source = %location))]
pub async fn fetch_location<C: HttpClient + ?Sized>(client: &C, location: &str) -> Result<Vec<u8>> {
    let bytes = if is_remote(location) {
        fetch_bytes(client, location).await?
    } else {
        tokio::fs::read(location)
            .await
            .with_context(|| format!("failed to read {location}"))?
    };
    debug!(bytes = bytes.len(), "Source bytes received");
    Ok(bytes)
}
