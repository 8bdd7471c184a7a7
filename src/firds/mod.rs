// 🔎 Streaming Reference-Data Searcher
//
// search(targets, documents) → found + still_missing + per-document failures
//
// Documents are fetched with bounded concurrency but scanned strictly in
// order. Each scan shrinks the still-missing set; once it is empty no further
// document is opened. Every target ends up in exactly one of `found` or
// `still_missing`.

pub mod client;
pub mod document;
pub mod index;

pub use client::FirdsClient;
pub use document::{EntryReader, ReferenceDataEntry};
pub use index::DocumentLocation;

use crate::error::{DocumentError, FetchError};
use crate::http::CancelToken;
use crate::isin;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

// ============================================================================
// SOURCE TRAIT
// ============================================================================

/// A fetched document, ready to be streamed
#[derive(Debug, Clone)]
pub enum LocalDocument {
    File(PathBuf),
    Memory(Vec<u8>),
}

impl LocalDocument {
    pub fn open(&self) -> std::io::Result<Box<dyn BufRead + Send>> {
        Ok(match self {
            LocalDocument::File(path) => Box::new(BufReader::new(std::fs::File::open(path)?)),
            LocalDocument::Memory(bytes) => Box::new(std::io::Cursor::new(bytes.clone())),
        })
    }
}

/// Where reference-data documents come from
#[async_trait]
pub trait ReferenceDataSource: Send + Sync {
    /// Recognized documents published in `[from, to]`, in index order.
    /// A failure here is fatal for the run.
    async fn list_documents(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DocumentLocation>, FetchError>;

    /// Download and unpack one document
    async fn fetch_document(&self, location: &DocumentLocation) -> Result<LocalDocument, FetchError>;
}

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub document: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub found: BTreeMap<String, ReferenceDataEntry>,
    pub still_missing: BTreeSet<String>,
    pub failures: Vec<DocumentFailure>,
}

impl SearchOutcome {
    fn start(targets: BTreeSet<String>) -> (Self, BTreeSet<String>) {
        let mut outcome = SearchOutcome::default();
        let mut missing = BTreeSet::new();
        for target in targets {
            // Malformed identifiers cannot appear in any document
            if isin::validate(&target) {
                missing.insert(target);
            } else {
                outcome.still_missing.insert(target);
            }
        }
        (outcome, missing)
    }

    fn fail(&mut self, document: &str, err: &dyn std::fmt::Display) {
        warn!("Reference-data document {} failed: {}", document, err);
        self.failures.push(DocumentFailure {
            document: document.to_string(),
            message: err.to_string(),
        });
    }
}

// ============================================================================
// SYNCHRONOUS CORE
// ============================================================================

/// Scan one document's entries, moving hits from `missing` into `found`.
/// Stops as soon as nothing is missing. Returns the document error, if any;
/// hits before the error are kept.
pub fn scan<I>(
    entries: I,
    missing: &mut BTreeSet<String>,
    found: &mut BTreeMap<String, ReferenceDataEntry>,
) -> Option<DocumentError>
where
    I: IntoIterator<Item = Result<ReferenceDataEntry, DocumentError>>,
{
    for entry in entries {
        if missing.is_empty() {
            return None;
        }
        match entry {
            Ok(entry) => {
                if missing.remove(&entry.isin) {
                    found.insert(entry.isin.clone(), entry);
                }
            }
            Err(e) => return Some(e),
        }
    }
    None
}

/// Search already-opened documents in order
pub fn search_documents<D, I>(targets: BTreeSet<String>, documents: D) -> SearchOutcome
where
    D: IntoIterator<Item = (String, Result<I, DocumentError>)>,
    I: IntoIterator<Item = Result<ReferenceDataEntry, DocumentError>>,
{
    let (mut outcome, mut missing) = SearchOutcome::start(targets);

    for (name, document) in documents {
        if missing.is_empty() {
            break;
        }
        match document {
            Ok(entries) => {
                if let Some(e) = scan(entries, &mut missing, &mut outcome.found) {
                    outcome.fail(&name, &e);
                }
            }
            Err(e) => outcome.fail(&name, &e),
        }
    }

    outcome.still_missing.extend(missing);
    outcome
}

/// Scan a fetched document on the current thread
fn scan_local(
    name: &str,
    document: &LocalDocument,
    mut missing: BTreeSet<String>,
) -> (BTreeMap<String, ReferenceDataEntry>, Option<DocumentError>) {
    let mut found = BTreeMap::new();
    let error = match document.open() {
        Ok(reader) => scan(EntryReader::new(name, reader), &mut missing, &mut found),
        Err(e) => Some(DocumentError::Fetch(FetchError::Io(e))),
    };
    (found, error)
}

// ============================================================================
// ASYNC SEARCHER
// ============================================================================

pub struct ReferenceSearcher<S: ReferenceDataSource + ?Sized> {
    source: Arc<S>,
    concurrency: usize,
    cancel: CancelToken,
}

impl<S: ReferenceDataSource + ?Sized + 'static> ReferenceSearcher<S> {
    pub fn new(source: Arc<S>, concurrency: usize, cancel: CancelToken) -> Self {
        ReferenceSearcher {
            source,
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    /// Query the index for `[from, to]`, then search the listed documents
    pub async fn search_range(
        &self,
        targets: BTreeSet<String>,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<SearchOutcome, FetchError> {
        if targets.is_empty() {
            return Ok(SearchOutcome::default());
        }
        let documents = self
            .cancel
            .run(self.source.list_documents(from, to))
            .await?;
        self.search(targets, documents).await
    }

    /// Fetch documents (up to `concurrency` at a time, order preserved) and
    /// scan them in order. Only cancellation makes this fail.
    pub async fn search(
        &self,
        targets: BTreeSet<String>,
        documents: Vec<DocumentLocation>,
    ) -> Result<SearchOutcome, FetchError> {
        let (mut outcome, mut missing) = SearchOutcome::start(targets);

        let mut fetches = stream::iter(documents)
            .map(|location| {
                let source = Arc::clone(&self.source);
                async move {
                    let fetched = source.fetch_document(&location).await;
                    (location, fetched)
                }
            })
            .buffered(self.concurrency);

        while !missing.is_empty() {
            let next = self.cancel.run(async { Ok(fetches.next().await) }).await?;
            let Some((location, fetched)) = next else {
                break;
            };

            let document = match fetched {
                Ok(document) => document,
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(e) => {
                    outcome.fail(&location.file_name, &e);
                    continue;
                }
            };

            let name = location.file_name.clone();
            let wanted = missing.clone();
            let (found, error) =
                tokio::task::spawn_blocking(move || scan_local(&name, &document, wanted))
                    .await
                    .map_err(|e| FetchError::Io(std::io::Error::other(e)))?;

            info!(
                "{}: {} of {} identifiers found",
                location.file_name,
                found.len(),
                missing.len()
            );
            for isin in found.keys() {
                missing.remove(isin);
            }
            outcome.found.extend(found);
            if let Some(e) = error {
                outcome.fail(&location.file_name, &e);
            }
        }

        outcome.still_missing.extend(missing);
        Ok(outcome)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const A: &str = "US0378331005";
    const B: &str = "IE00B4L5Y983";
    const C: &str = "DE000A289QR9";
    const D: &str = "FR0013508512";

    fn entry(isin: &str, lei: &str) -> ReferenceDataEntry {
        ReferenceDataEntry::new(isin, Some(lei))
    }

    fn xml(entries: &[(&str, &str)]) -> Vec<u8> {
        let body: String = entries
            .iter()
            .map(|(isin, lei)| {
                format!(
                    "<RefData><FinInstrmGnlAttrbts><Id>{}</Id></FinInstrmGnlAttrbts><Issr>{}</Issr></RefData>",
                    isin, lei
                )
            })
            .collect();
        format!("<Document><FinInstrmRptgRefDataRpt>{}</FinInstrmRptgRefDataRpt></Document>", body)
            .into_bytes()
    }

    fn targets(isins: &[&str]) -> BTreeSet<String> {
        isins.iter().map(|s| s.to_string()).collect()
    }

    fn location(name: &str) -> DocumentLocation {
        DocumentLocation {
            file_name: name.to_string(),
            url: format!("mem://{}", name),
            publication_date: None,
        }
    }

    /// In-memory source: document name → XML bytes or an error status
    struct FakeSource {
        documents: HashMap<String, Result<Vec<u8>, u16>>,
        listing: Vec<DocumentLocation>,
        fetched: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn new(docs: Vec<(&str, Result<Vec<u8>, u16>)>) -> Self {
            FakeSource {
                listing: docs.iter().map(|(n, _)| location(n)).collect(),
                documents: docs.into_iter().map(|(n, d)| (n.to_string(), d)).collect(),
                fetched: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReferenceDataSource for FakeSource {
        async fn list_documents(
            &self,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> Result<Vec<DocumentLocation>, FetchError> {
            Ok(self.listing.clone())
        }

        async fn fetch_document(
            &self,
            location: &DocumentLocation,
        ) -> Result<LocalDocument, FetchError> {
            self.fetched.lock().unwrap().push(location.file_name.clone());
            match self.documents.get(&location.file_name) {
                Some(Ok(bytes)) => Ok(LocalDocument::Memory(bytes.clone())),
                Some(Err(status)) => Err(FetchError::Status {
                    endpoint: location.url.clone(),
                    status: *status,
                }),
                None => Err(FetchError::Status {
                    endpoint: location.url.clone(),
                    status: 404,
                }),
            }
        }
    }

    fn assert_partition(outcome: &SearchOutcome, input: &BTreeSet<String>) {
        for isin in input {
            let in_found = outcome.found.contains_key(isin);
            let in_missing = outcome.still_missing.contains(isin);
            assert!(in_found ^ in_missing, "{} must be in exactly one set", isin);
        }
        assert_eq!(outcome.found.len() + outcome.still_missing.len(), input.len());
    }

    #[test]
    fn test_search_documents_partitions_targets() {
        let input = targets(&[A, B, C, "XS2100000000", "short"]);
        let docs = vec![
            ("d1".to_string(), Ok(vec![Ok(entry(A, "LEI-A")), Ok(entry(D, "LEI-D"))])),
            (
                "d2".to_string(),
                Err(DocumentError::Xml {
                    name: "d2".to_string(),
                    message: "bad".to_string(),
                }),
            ),
            ("d3".to_string(), Ok(vec![Ok(entry(B, "LEI-B"))])),
        ];

        let outcome = search_documents(input.clone(), docs);
        assert_partition(&outcome, &input);
        assert_eq!(outcome.found[A].issuer_lei.as_deref(), Some("LEI-A"));
        assert!(outcome.found.contains_key(B));
        assert!(!outcome.found.contains_key(D));
        assert!(outcome.still_missing.contains(C));
        assert!(outcome.still_missing.contains("XS2100000000"));
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].document, "d2");
    }

    #[test]
    fn test_scan_stops_once_nothing_missing() {
        let mut missing = targets(&[A]);
        let mut found = BTreeMap::new();
        let entries = vec![
            Ok(entry(A, "LEI-A")),
            Err(DocumentError::Xml {
                name: "d".to_string(),
                message: "never reached".to_string(),
            }),
        ];

        assert!(scan(entries, &mut missing, &mut found).is_none());
        assert!(missing.is_empty());
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_first_document_wins() {
        let docs = vec![
            ("new".to_string(), Ok(vec![Ok(entry(A, "LEI-NEW"))])),
            ("old".to_string(), Ok(vec![Ok(entry(A, "LEI-OLD"))])),
        ];
        let outcome = search_documents::<_, Vec<_>>(targets(&[A]), docs);
        assert_eq!(outcome.found[A].issuer_lei.as_deref(), Some("LEI-NEW"));
    }

    #[tokio::test]
    async fn test_async_search_survives_document_failure() {
        let source = Arc::new(FakeSource::new(vec![
            ("FULINS_D_1.zip", Ok(xml(&[(A, "LEI-A")]))),
            ("FULINS_D_2.zip", Err(503)),
            ("FULINS_D_3.zip", Ok(b"<RefData><FinInstrmGnlAttrbts><Id>".to_vec())),
            ("FULINS_D_4.zip", Ok(xml(&[(B, "LEI-B"), (C, "LEI-C")]))),
        ]));
        let searcher = ReferenceSearcher::new(source.clone(), 2, CancelToken::new());
        let input = targets(&[A, B, C, D]);

        let outcome = searcher
            .search_range(
                input.clone(),
                NaiveDate::from_ymd_opt(2020, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2020, 3, 1).unwrap(),
            )
            .await
            .unwrap();

        assert_partition(&outcome, &input);
        assert_eq!(outcome.found.len(), 3);
        assert_eq!(outcome.still_missing, targets(&[D]));
        let failed: Vec<_> = outcome.failures.iter().map(|f| f.document.as_str()).collect();
        assert_eq!(failed, vec!["FULINS_D_2.zip", "FULINS_D_3.zip"]);
    }

    #[tokio::test]
    async fn test_async_search_stops_when_all_found() {
        let source = Arc::new(FakeSource::new(vec![
            ("FULINS_D_1.zip", Ok(xml(&[(A, "LEI-A")]))),
            ("FULINS_D_2.zip", Ok(xml(&[(B, "LEI-B")]))),
            ("FULINS_D_3.zip", Ok(xml(&[(C, "LEI-C")]))),
        ]));
        let searcher = ReferenceSearcher::new(source.clone(), 1, CancelToken::new());

        let outcome = searcher
            .search(targets(&[A]), source.listing.clone())
            .await
            .unwrap();

        assert!(outcome.still_missing.is_empty());
        // With one fetch in flight, at most one document past the hit is requested
        assert!(source.fetched.lock().unwrap().len() <= 2);
    }

    #[tokio::test]
    async fn test_cancelled_search() {
        let source = Arc::new(FakeSource::new(vec![("FULINS_D_1.zip", Ok(xml(&[])))]));
        let cancel = CancelToken::new();
        cancel.cancel();
        let searcher = ReferenceSearcher::new(source.clone(), 1, cancel);

        let result = searcher.search(targets(&[A]), source.listing.clone()).await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_empty_targets_skip_index() {
        let source = Arc::new(FakeSource::new(vec![]));
        let searcher = ReferenceSearcher::new(source, 1, CancelToken::new());
        let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let outcome = searcher.search_range(BTreeSet::new(), day, day).await.unwrap();
        assert_eq!(outcome, SearchOutcome::default());
    }
}
