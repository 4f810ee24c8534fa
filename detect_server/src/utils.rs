//! Utility functions
//!
use std::{
    fs::File,
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use reqwest::Client;

/// Subdirectory of the user cache directory holding downloaded model assets.
const CACHE_SUBDIR: &str = "detectcam";

/// Download a file from a URL to a given filepath.
pub async fn download_file(client: &Client, url: &str, filepath: impl AsRef<Path>) -> Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;

    let mut file = File::create(filepath)?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;

    Ok(())
}

/// Turn an asset locator into a local path.
///
/// URLs are downloaded into the cache directory on first use. Anything else is
/// taken as a local path and returned unchanged.
pub async fn resolve_asset(locator: &str) -> Result<PathBuf> {
    if !is_remote(locator) {
        return Ok(PathBuf::from(locator));
    }

    let cache_dir = dirs::cache_dir()
        .context("no cache directory on this platform")?
        .join(CACHE_SUBDIR);
    std::fs::create_dir_all(&cache_dir)?;

    let filepath = cache_dir.join(cached_file_name(locator)?);
    if filepath.exists() {
        log::debug!("Using cached asset {}", filepath.display());
        return Ok(filepath);
    }

    log::info!("Downloading {} to {}", locator, filepath.display());
    let partial = filepath.with_extension("part");
    download_file(&Client::new(), locator, &partial)
        .await
        .with_context(|| format!("failed to download {locator}"))?;
    std::fs::rename(&partial, &filepath)?;

    Ok(filepath)
}

fn is_remote(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}

/// Flatten the URL path so that assets with equal file names do not collide.
fn cached_file_name(url: &str) -> Result<String> {
    let path = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url)
        .split(['?', '#'])
        .next()
        .unwrap_or_default();

    let name: String = path
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();

    if name.trim_matches('_').is_empty() {
        bail!("cannot derive a file name from {url}");
    }
    Ok(name)
}
