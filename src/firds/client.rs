// 📦 Reference-Data Client - index queries, archive download, unpacking
//
// Archives are cached in the data directory and reused on later runs:
//   <data_dir>/FULINS_D_20200301_01of02.zip   downloaded archive
//   <data_dir>/FULINS_D_20200301_01of02.xml   its single unpacked document
// Both are written to a `.part` file first and renamed into place.

use super::index::{self, DocumentLocation, IndexPage, PAGE_SIZE};
use super::{LocalDocument, ReferenceDataSource};
use crate::config::Settings;
use crate::error::FetchError;
use crate::http::{self, CancelToken, RetryPolicy};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub struct FirdsClient {
    client: reqwest::Client,
    index_base: String,
    data_dir: PathBuf,
    policy: RetryPolicy,
    cancel: CancelToken,
}

impl FirdsClient {
    pub fn new(settings: &Settings, cancel: CancelToken) -> Result<Self, FetchError> {
        Ok(FirdsClient {
            client: http::build_client(settings.http_timeout())?,
            index_base: settings.firds_index_url.clone(),
            data_dir: settings.data_dir.clone(),
            policy: settings.retry_policy(),
            cancel,
        })
    }

    async fn index_page(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        start: usize,
    ) -> Result<IndexPage, FetchError> {
        let url = index::query_url(&self.index_base, from, to, start, PAGE_SIZE);
        http::with_retry("reference-data index", self.policy, &self.cancel, || async {
            let response = http::get(&self.client, &url).await?;
            let body = response
                .text()
                .await
                .map_err(|e| FetchError::from_reqwest(&url, e))?;
            index::parse_index(&body, &url)
        })
        .await
    }

    /// Stream an archive to disk unless it is already cached
    async fn download(&self, location: &DocumentLocation) -> Result<PathBuf, FetchError> {
        let target = self.data_dir.join(&location.file_name);
        if tokio::fs::try_exists(&target).await? {
            debug!("Using cached archive {}", target.display());
            return Ok(target);
        }

        tokio::fs::create_dir_all(&self.data_dir).await?;
        let part = target.with_extension("zip.part");

        http::with_retry(&location.file_name, self.policy, &self.cancel, || async {
            let mut response = http::get(&self.client, &location.url).await?;
            let mut file = tokio::fs::File::create(&part).await?;
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| FetchError::from_reqwest(&location.url, e))?
            {
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok(())
        })
        .await?;

        tokio::fs::rename(&part, &target).await?;
        info!("Downloaded {}", location.file_name);
        Ok(target)
    }
}

#[async_trait]
impl ReferenceDataSource for FirdsClient {
    async fn list_documents(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DocumentLocation>, FetchError> {
        let mut all = Vec::new();
        let mut start = 0;
        loop {
            let page = self.index_page(from, to, start).await?;
            let received = page.documents.len();
            all.extend(page.documents);
            start += received;
            if received == 0 || start >= page.num_found {
                break;
            }
        }

        let documents = index::recognized(all);
        info!(
            "Reference-data index lists {} documents for {} to {}",
            documents.len(),
            from,
            to
        );
        Ok(documents)
    }

    async fn fetch_document(&self, location: &DocumentLocation) -> Result<LocalDocument, FetchError> {
        let archive = self.download(location).await?;
        let dir = self.data_dir.clone();
        let name = location.file_name.clone();

        let xml = tokio::task::spawn_blocking(move || unpack_cached(&archive, &dir, &name))
            .await
            .map_err(|e| FetchError::Io(std::io::Error::other(e)))??;
        Ok(LocalDocument::File(xml))
    }
}

// ============================================================================
// UNPACKING
// ============================================================================

fn malformed(name: &str, message: impl std::fmt::Display) -> FetchError {
    FetchError::MalformedArchive {
        name: name.to_string(),
        message: message.to_string(),
    }
}

/// Unpacked path for an archive, extracting on first use.
/// A malformed archive is evicted from the cache so the next run downloads it again.
fn unpack_cached(archive: &Path, dir: &Path, name: &str) -> Result<PathBuf, FetchError> {
    let target = dir.join(Path::new(name).with_extension("xml"));
    if target.exists() {
        return Ok(target);
    }
    let file = std::fs::File::open(archive)?;
    let part = target.with_extension("xml.part");
    let extracted = std::fs::File::create(&part)
        .map_err(FetchError::from)
        .and_then(|mut out| extract_first(file, name, &mut out));

    if let Err(e) = extracted {
        let _ = std::fs::remove_file(&part);
        if matches!(e, FetchError::MalformedArchive { .. }) {
            warn!("Evicting malformed archive {}", archive.display());
            let _ = std::fs::remove_file(archive);
        }
        return Err(e);
    }

    std::fs::rename(&part, &target)?;
    Ok(target)
}

/// Copy the first entry of a zip archive into `out`.
/// Each archive carries exactly one document; anything else is malformed.
pub fn extract_first<R, W>(archive: R, name: &str, out: &mut W) -> Result<u64, FetchError>
where
    R: Read + Seek,
    W: std::io::Write,
{
    let mut zip = zip::ZipArchive::new(archive).map_err(|e| malformed(name, e))?;
    if zip.is_empty() {
        return Err(malformed(name, "archive has no entries"));
    }
    let mut entry = zip.by_index(0).map_err(|e| malformed(name, e))?;
    if entry.is_dir() {
        return Err(malformed(name, "first entry is a directory"));
    }
    std::io::copy(&mut entry, out).map_err(|e| malformed(name, e))
}

// ============================================================================
// TESTS
// ============================================================================
