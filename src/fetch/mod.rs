// src/fetch/mod.rs

use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;
use url::Url;

use crate::error::{PipelineError, PipelineResult};

pub mod datasets;

/// Download `url_str` into `dest_dir`, naming the file after the last URL
/// path segment. A file that already exists is kept as-is, so re-running a
/// flow never downloads twice. The body lands in a temp file first and is
/// renamed into place once complete.
pub async fn download_file(
    client: &Client,
    url_str: &str,
    dest_dir: impl AsRef<Path>,
) -> PipelineResult<PathBuf> {
    let dest_dir = dest_dir.as_ref();
    let url = Url::parse(url_str)
        .map_err(|e| PipelineError::Acquisition(format!("{}: {}", url_str, e)))?;
    let filename = url
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            PipelineError::Acquisition(format!("{}: no filename in URL path", url_str))
        })?
        .to_string();
    let dest_path = dest_dir.join(&filename);

    if path_exists(&dest_path).await? {
        info!(file = %dest_path.display(), "already downloaded, skipping");
        return Ok(dest_path);
    }

    fs::create_dir_all(dest_dir).await.map_err(|e| {
        PipelineError::Acquisition(format!("creating {}: {}", dest_dir.display(), e))
    })?;

    let resp = client.get(url.as_str()).send().await?.error_for_status()?;
    let bytes = resp.bytes().await?;

    let temp_path = dest_path.with_extension("tmp");
    fs::write(&temp_path, &bytes).await.map_err(|e| {
        PipelineError::Acquisition(format!("writing {}: {}", temp_path.display(), e))
    })?;
    fs::rename(&temp_path, &dest_path).await.map_err(|e| {
        PipelineError::Acquisition(format!("renaming {}: {}", temp_path.display(), e))
    })?;

    info!(file = %dest_path.display(), bytes = bytes.len(), "downloaded");
    Ok(dest_path)
}

async fn path_exists(path: &Path) -> PipelineResult<bool> {
    fs::try_exists(path)
        .await
        .map_err(|e| PipelineError::Acquisition(format!("checking {}: {}", path.display(), e)))
}
