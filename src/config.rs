// ⚙️ Settings - explicit per-run configuration
//
// Built once (defaults, optionally a JSON file, then CLI overrides) and passed
// to every component that needs it. Nothing is read from global state.

use crate::gleif;
use crate::http::RetryPolicy;
use anyhow::{bail, Context, Result};
use chrono::{Duration as Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_FIRDS_INDEX_URL: &str =
    "https://registers.esma.europa.eu/solr/esma_registers_firds_files";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub firds_index_url: String,
    pub gleif_url: String,
    pub companies_house_url: String,

    /// Company-name search runs only when a key is configured
    pub companies_house_key: Option<String>,

    pub http_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,

    /// Reference-data documents downloaded at the same time
    pub download_concurrency: usize,
    /// LEIs per registry request (at most 200)
    pub lei_batch_size: usize,
    /// Registry requests in flight at the same time
    pub lookup_concurrency: usize,

    /// Archive cache for reference-data documents
    pub data_dir: PathBuf,

    /// Publication-date range of reference-data documents to search
    pub reference_from: Option<NaiveDate>,
    pub reference_to: Option<NaiveDate>,

    pub corrections_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            firds_index_url: DEFAULT_FIRDS_INDEX_URL.to_string(),
            gleif_url: gleif::DEFAULT_BASE_URL.to_string(),
            companies_house_url: crate::companies_house::DEFAULT_BASE_URL.to_string(),
            companies_house_key: None,
            http_timeout_secs: 60,
            retry_attempts: 3,
            retry_backoff_ms: 200,
            download_concurrency: 2,
            lei_batch_size: gleif::MAX_BATCH,
            lookup_concurrency: 4,
            data_dir: PathBuf::from("data"),
            reference_from: None,
            reference_to: None,
            corrections_path: None,
        }
    }
}

impl Settings {
    /// Load from JSON; missing keys keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read settings file: {:?}", path.as_ref()))?;
        let settings: Settings =
            serde_json::from_str(&content).context("Failed to parse settings JSON")?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lei_batch_size == 0 || self.lei_batch_size > gleif::MAX_BATCH {
            bail!(
                "LEI batch size must be between 1 and {}, got {}",
                gleif::MAX_BATCH,
                self.lei_batch_size
            );
        }
        if self.download_concurrency == 0 || self.lookup_concurrency == 0 {
            bail!("concurrency limits must be at least 1");
        }
        if self.http_timeout_secs == 0 {
            bail!("HTTP timeout must be at least one second");
        }
        if self.retry_attempts == 0 {
            bail!("retry attempts must be at least 1");
        }
        let (from, to) = self.reference_range();
        if from > to {
            bail!("reference-data range is inverted: {} > {}", from, to);
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }

    /// Closed publication-date range. Full files come out weekly, so the
    /// default covers the last seven days.
    pub fn reference_range(&self) -> (NaiveDate, NaiveDate) {
        let to = self.reference_to.unwrap_or_else(|| Utc::now().date_naive());
        let from = self.reference_from.unwrap_or(to - Days::days(6));
        (from, to)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.lei_batch_size, 200);
        assert_eq!(settings.retry_policy().max_attempts, 3);
    }

    #[test]
    fn test_rejects_nonsense() {
        let mut settings = Settings::default();
        settings.lei_batch_size = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.lei_batch_size = 500;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.reference_from = NaiveDate::from_ymd_opt(2020, 3, 2);
        settings.reference_to = NaiveDate::from_ymd_opt(2020, 3, 1);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_reference_range_defaults() {
        let mut settings = Settings::default();
        settings.reference_to = NaiveDate::from_ymd_opt(2020, 3, 8);
        let (from, to) = settings.reference_range();
        assert_eq!(from, NaiveDate::from_ymd_opt(2020, 3, 2).unwrap());
        assert_eq!(to, NaiveDate::from_ymd_opt(2020, 3, 8).unwrap());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"lookup_concurrency": 8, "data_dir": "/tmp/firds"}}"#).unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.lookup_concurrency, 8);
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/firds"));
        assert_eq!(settings.firds_index_url, DEFAULT_FIRDS_INDEX_URL);
    }
}
