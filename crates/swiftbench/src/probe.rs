use anyhow::{Context, Result};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::info;

/// Pre-flight reachability check. Any intact HTTP response means the target
/// is reachable; only transport failures abort the run. HEAD is tried first
/// so the probe stays cheap, with a GET fallback for servers that reject it.
pub async fn check_reachable(url: &str, timeout: Duration) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .context("failed to build probe client")?;

    let response = client
        .head(url)
        .send()
        .await
        .with_context(|| format!("target {url} is unreachable"))?;

    let status = if response.status() == StatusCode::METHOD_NOT_ALLOWED {
        client
            .get(url)
            .send()
            .await
            .with_context(|| format!("target {url} is unreachable"))?
            .status()
    } else {
        response.status()
    };

    info!(%url, status = status.as_u16(), "target reachable");
    Ok(())
}
