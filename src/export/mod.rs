use anyhow::{Context, Result};
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel};
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::ingest::reader::Page;

/// Write `page` as a gzip-compressed parquet file at `data_dir/rel_path`,
/// creating parent directories as needed. The file is written to a temp
/// path first and renamed into place.
pub fn write_snapshot(page: &Page, data_dir: &Path, rel_path: &Path) -> Result<PathBuf> {
    let out_path = data_dir.join(rel_path);
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let temp_path = out_path.with_extension("tmp");

    let props = WriterProperties::builder()
        .set_compression(Compression::GZIP(GzipLevel::default()))
        .build();
    let file = File::create(&temp_path)
        .with_context(|| format!("creating {}", temp_path.display()))?;
    let mut writer = ArrowWriter::try_new(file, page.batch.schema(), Some(props))
        .context("opening parquet writer")?;
    writer.write(&page.batch).context("writing batch to parquet")?;
    writer.close().context("closing parquet writer")?;

    fs::rename(&temp_path, &out_path)
        .with_context(|| format!("renaming {}", temp_path.display()))?;

    info!(file = %out_path.display(), rows = page.num_rows(), "wrote snapshot");
    Ok(out_path)
}

/// Bucket object key for a snapshot: the local path relative to the data
/// directory, under the optional prefix.
pub fn snapshot_object_name(prefix: Option<&str>, rel_path: &Path) -> String {
    match prefix {
        Some(pref) if !pref.is_empty() => {
            format!("{}/{}", pref.trim_end_matches('/'), rel_path.display())
        }
        _ => rel_path.display().to_string(),
    }
}

/// Upload `local_path` to `gs://bucket/...` at the object key mirroring its
/// location under `data_dir`. Objects already in the bucket are left alone,
/// so re-running an export never overwrites.
pub async fn upload_snapshot(
    bucket: &str,
    prefix: Option<&str>,
    data_dir: &Path,
    local_path: &Path,
) -> Result<String> {
    let rel = local_path.strip_prefix(data_dir).with_context(|| {
        format!(
            "path {} is not under {}",
            local_path.display(),
            data_dir.display()
        )
    })?;
    let object_name = snapshot_object_name(prefix, rel);

    let cfg = ClientConfig::default()
        .with_auth()
        .await
        .context("authenticating to GCS")?;
    let client = Client::new(cfg);

    // existence check via 0-byte download to avoid list/prefix errors
    let head_req = GetObjectRequest {
        bucket: bucket.to_string(),
        object: object_name.clone(),
        ..Default::default()
    };
    let exists = client
        .download_object(&head_req, &Range(Some(0), Some(0)))
        .await
        .is_ok();
    if exists {
        debug!(object = %object_name, "already in GCS, skipping");
        return Ok(object_name);
    }

    let data = tokio::fs::read(local_path)
        .await
        .with_context(|| format!("reading {}", local_path.display()))?;
    let bytes = data.len();

    let upload_req = UploadObjectRequest {
        bucket: bucket.to_string(),
        ..Default::default()
    };
    client
        .upload_object(
            &upload_req,
            data,
            &UploadType::Simple(Media::new(object_name.clone())),
        )
        .await
        .with_context(|| format!("uploading {}", object_name))?;

    info!(object = %object_name, bytes, "uploaded to GCS");
    Ok(object_name)
}
