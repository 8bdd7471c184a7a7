// 🏛️ Issuer Enrichment - ISIN → issuer LEI → legal name / jurisdiction
//
// Three stages:
//   1. `issuer_leis`: reference-data hits + the ISIN override table
//      (overrides supersede search results)
//   2. `IssuerEnricher::resolve`: batched LEI registry lookups, then the
//      issuer override table, then jurisdiction truncation
//   3. `apply_issuers`: join back onto records, one atomic assignment each
// Nothing touches a record until stage 3, so a cancelled run leaves every
// record exactly as it was.

use crate::audit::{AuditKind, AuditLog};
use crate::combo::Cell;
use crate::corrections::Corrections;
use crate::error::FetchError;
use crate::firds::ReferenceDataEntry;
use crate::gleif::{IssuerRecord, LeiRegistry, MAX_BATCH};
use crate::http::CancelToken;
use crate::record::{IssuerFields, Record, VehicleMatch};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

// ============================================================================
// STAGE 1: ISIN → LEI
// ============================================================================

/// Whether a record's identifiers still need the reference-data search.
/// Exact register matches and private records are settled already.
pub fn needs_search(record: &Record) -> bool {
    !matches!(record.vehicle_match, VehicleMatch::Exact | VehicleMatch::Exempt)
}

/// ISINs still worth searching for: on a record the vehicle register did not
/// resolve by identifier, not covered by an override
pub fn search_targets(records: &[Record], corrections: &Corrections) -> BTreeSet<String> {
    records
        .iter()
        .filter(|r| needs_search(r))
        .flat_map(|r| r.isins())
        .filter(|isin| corrections.isin_override(isin).is_none())
        .map(str::to_string)
        .collect()
}

pub fn issuer_leis(
    found: &BTreeMap<String, ReferenceDataEntry>,
    corrections: &Corrections,
) -> BTreeMap<String, String> {
    let mut leis: BTreeMap<String, String> = found
        .iter()
        .filter_map(|(isin, entry)| entry.issuer_lei.clone().map(|lei| (isin.clone(), lei)))
        .collect();

    for o in &corrections.isin_overrides {
        leis.insert(o.isin.clone(), o.issuer_lei.clone());
    }
    leis
}

// ============================================================================
// STAGE 2: LEI → ISSUER
// ============================================================================

/// Everything needed to enrich records, resolved up front
#[derive(Debug, Clone, Default)]
pub struct IssuerTable {
    pub isin_lei: BTreeMap<String, String>,
    pub issuers: BTreeMap<String, IssuerRecord>,
}

pub struct IssuerEnricher<R: LeiRegistry + ?Sized> {
    registry: Arc<R>,
    batch_size: usize,
    concurrency: usize,
    cancel: CancelToken,
}

impl<R: LeiRegistry + ?Sized + 'static> IssuerEnricher<R> {
    pub fn new(registry: Arc<R>, batch_size: usize, concurrency: usize, cancel: CancelToken) -> Self {
        IssuerEnricher {
            registry,
            batch_size: batch_size.clamp(1, MAX_BATCH),
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    /// Look up every distinct LEI in `isin_lei`. A failed batch is audited and
    /// skipped; only cancellation fails the whole call.
    pub async fn resolve(
        &self,
        isin_lei: BTreeMap<String, String>,
        corrections: &Corrections,
        audit: &mut AuditLog,
    ) -> Result<IssuerTable, FetchError> {
        let distinct: Vec<String> = isin_lei
            .values()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let batches: Vec<Vec<String>> = distinct
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        info!(
            "Resolving {} LEIs in {} batches",
            distinct.len(),
            batches.len()
        );

        let results: Vec<(usize, Result<Vec<IssuerRecord>, FetchError>)> = stream::iter(batches)
            .map(|batch| {
                let registry = Arc::clone(&self.registry);
                let cancel = self.cancel.clone();
                async move {
                    let size = batch.len();
                    let result = cancel.run(registry.lookup(&batch)).await;
                    (size, result)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut issuers = BTreeMap::new();
        for (size, result) in results {
            match result {
                Ok(records) => {
                    for record in records {
                        issuers.insert(record.lei.clone(), record);
                    }
                }
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(e) => audit.record(
                    None,
                    AuditKind::BatchFailed {
                        leis: size,
                        message: e.to_string(),
                    },
                ),
            }
        }

        for lei in &distinct {
            if let Some(o) = corrections.issuer_override(lei) {
                issuers.insert(
                    lei.clone(),
                    IssuerRecord {
                        lei: lei.clone(),
                        legal_name: o.legal_name.clone(),
                        jurisdiction: o.jurisdiction.clone(),
                    },
                );
            }
        }

        for issuer in issuers.values_mut() {
            truncate_jurisdiction(issuer, audit);
        }

        Ok(IssuerTable { isin_lei, issuers })
    }
}

/// Registry jurisdictions can carry a subdivision ("US-DE"); keep the country
fn truncate_jurisdiction(issuer: &mut IssuerRecord, audit: &mut AuditLog) {
    let Some(original) = issuer.jurisdiction.as_deref() else {
        return;
    };
    if original.chars().count() <= 2 {
        return;
    }
    let truncated: String = original.chars().take(2).collect();
    audit.record(
        None,
        AuditKind::JurisdictionTruncated {
            lei: issuer.lei.clone(),
            original: original.to_string(),
            truncated: truncated.clone(),
        },
    );
    issuer.jurisdiction = Some(truncated);
}

// ============================================================================
// STAGE 3: JOIN
// ============================================================================

impl IssuerTable {
    /// Issuer fields for a set of ISINs, merged across ISINs. ISINs without an
    /// LEI are skipped. Returns the LEIs the registry did not return.
    pub fn fields_for(&self, isins: &[&str]) -> (IssuerFields, Vec<String>) {
        let mut leis = Vec::new();
        let mut names = Vec::new();
        let mut jurisdictions = Vec::new();
        let mut missing = Vec::new();

        for isin in isins {
            let Some(lei) = self.isin_lei.get(*isin) else {
                continue;
            };
            leis.push(lei.clone());
            match self.issuers.get(lei) {
                Some(issuer) => {
                    names.extend(issuer.legal_name.clone());
                    jurisdictions.extend(issuer.jurisdiction.clone());
                }
                None if !missing.contains(lei) => missing.push(lei.clone()),
                None => {}
            }
        }

        let fields = IssuerFields {
            lei: Cell::from_values(leis),
            legal_name: Cell::from_values(names),
            jurisdiction: Cell::from_values(jurisdictions),
        };
        (fields, missing)
    }
}

pub fn apply_issuers(records: Vec<Record>, table: &IssuerTable, audit: &mut AuditLog) -> Vec<Record> {
    records
        .into_iter()
        .map(|mut record| {
            let (fields, missing) = table.fields_for(&record.isins());
            for lei in missing {
                audit.record(record.usi(), AuditKind::MissingIssuer { lei });
            }
            if fields.lei.is_some() {
                record.issuer = fields;
            }
            record
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corrections::IssuerOverride;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeRegistry {
        known: HashMap<String, IssuerRecord>,
        batches: Mutex<Vec<usize>>,
        fail_containing: Option<String>,
    }

    impl FakeRegistry {
        fn new(records: Vec<IssuerRecord>) -> Self {
            FakeRegistry {
                known: records.into_iter().map(|r| (r.lei.clone(), r)).collect(),
                batches: Mutex::new(Vec::new()),
                fail_containing: None,
            }
        }
    }

    #[async_trait]
    impl LeiRegistry for FakeRegistry {
        async fn lookup(&self, leis: &[String]) -> Result<Vec<IssuerRecord>, FetchError> {
            self.batches.lock().unwrap().push(leis.len());
            if let Some(bad) = &self.fail_containing {
                if leis.contains(bad) {
                    return Err(FetchError::Status {
                        endpoint: "lei-records".to_string(),
                        status: 400,
                    });
                }
            }
            Ok(leis.iter().filter_map(|l| self.known.get(l).cloned()).collect())
        }
    }

    fn record(usi: &str, isins: &[&str]) -> Record {
        Record {
            usi: Some(usi.to_string()),
            isin: Cell::from_values(isins.iter().copied()),
            ..Default::default()
        }
    }

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn test_overrides_supersede_search_results() {
        let mut found = BTreeMap::new();
        found.insert(
            "XS2104129486".to_string(),
            ReferenceDataEntry::new("XS2104129486", Some("WRONG")),
        );
        found.insert(
            "US0378331005".to_string(),
            ReferenceDataEntry::new("US0378331005", Some("LEI-APPLE")),
        );
        found.insert("IE00B4L5Y983".to_string(), ReferenceDataEntry::new("IE00B4L5Y983", None));

        let leis = issuer_leis(&found, &Corrections::builtin());
        assert_eq!(leis["XS2104129486"], "6354003OBLBBE5CKB866");
        assert_eq!(leis["XS2104129569"], "6354003OBLBBE5CKB866");
        assert_eq!(leis["US0378331005"], "LEI-APPLE");
        assert!(!leis.contains_key("IE00B4L5Y983"));
    }

    #[test]
    fn test_search_targets_skip_overrides() {
        let records = vec![record("A", &["XS2104129486", "US0378331005"])];
        let targets = search_targets(&records, &Corrections::builtin());
        assert_eq!(targets.into_iter().collect::<Vec<_>>(), vec!["US0378331005"]);
    }

    #[test]
    fn test_search_targets_skip_settled_records() {
        let mut exact = record("A", &["XS1234567890"]);
        exact.vehicle_match = VehicleMatch::Exact;
        let mut exempt = record("B", &["IE00B4L5Y983"]);
        exempt.vehicle_match = VehicleMatch::Exempt;
        let mut approximate = record("C", &["US0378331005"]);
        approximate.vehicle_match = VehicleMatch::Approximate;
        let mut ambiguous = record("D", &["DE000A289QR9"]);
        ambiguous.vehicle_match = VehicleMatch::Ambiguous;

        let targets = search_targets(&[exact, exempt, approximate, ambiguous], &Corrections::none());
        assert_eq!(
            targets.into_iter().collect::<Vec<_>>(),
            vec!["DE000A289QR9", "US0378331005"]
        );
    }

    #[tokio::test]
    async fn test_batches_are_bounded() {
        let leis: Vec<(String, String)> = (0..450)
            .map(|i| (format!("ISIN{:08}", i), format!("LEI{:017}", i)))
            .collect();
        let isin_lei: BTreeMap<_, _> = leis.into_iter().collect();

        let registry = Arc::new(FakeRegistry::new(vec![]));
        let enricher = IssuerEnricher::new(registry.clone(), 1000, 4, CancelToken::new());
        let mut audit = AuditLog::new();
        enricher
            .resolve(isin_lei, &Corrections::none(), &mut audit)
            .await
            .unwrap();

        let mut sizes = registry.batches.lock().unwrap().clone();
        sizes.sort();
        assert_eq!(sizes, vec![50, 200, 200]);
    }

    #[tokio::test]
    async fn test_failed_batch_is_audited_not_fatal() {
        let mut registry = FakeRegistry::new(vec![IssuerRecord::new("L2", "Two Ltd", "GB")]);
        registry.fail_containing = Some("L1".to_string());
        let enricher = IssuerEnricher::new(Arc::new(registry), 1, 2, CancelToken::new());

        let mut audit = AuditLog::new();
        let table = enricher
            .resolve(map(&[("I1", "L1"), ("I2", "L2")]), &Corrections::none(), &mut audit)
            .await
            .unwrap();

        assert!(table.issuers.contains_key("L2"));
        assert!(!table.issuers.contains_key("L1"));
        assert_eq!(audit.counts()["batch_failed"], 1);
    }

    #[tokio::test]
    async fn test_jurisdiction_truncated_and_override_applied() {
        let registry = FakeRegistry::new(vec![
            IssuerRecord::new("L1", "Delaware Trust", "US-DE"),
            IssuerRecord::new("L2", "Wrong Name", "XX"),
        ]);
        let mut corrections = Corrections::none();
        corrections.issuer_overrides.push(IssuerOverride {
            lei: "L2".to_string(),
            legal_name: Some("Right Name DAC".to_string()),
            jurisdiction: Some("IE".to_string()),
            reason: None,
        });

        let enricher = IssuerEnricher::new(Arc::new(registry), 200, 1, CancelToken::new());
        let mut audit = AuditLog::new();
        let table = enricher
            .resolve(map(&[("I1", "L1"), ("I2", "L2")]), &corrections, &mut audit)
            .await
            .unwrap();

        assert_eq!(table.issuers["L1"].jurisdiction.as_deref(), Some("US"));
        assert_eq!(table.issuers["L2"].legal_name.as_deref(), Some("Right Name DAC"));
        assert_eq!(audit.counts()["jurisdiction_truncated"], 1);
    }

    #[test]
    fn test_apply_merges_across_isins() {
        let table = IssuerTable {
            isin_lei: map(&[("I1", "L1"), ("I2", "L2"), ("I3", "L1")]),
            issuers: [
                ("L1".to_string(), IssuerRecord::new("L1", "One DAC", "IE")),
                ("L2".to_string(), IssuerRecord::new("L2", "Two B.V.", "NL")),
            ]
            .into_iter()
            .collect(),
        };
        let mut audit = AuditLog::new();
        let records = apply_issuers(
            vec![
                record("agree", &["I1", "I3"]),
                record("disagree", &["I1", "I2"]),
                record("partial", &["I2", "UNKNOWN"]),
                record("none", &["UNKNOWN"]),
            ],
            &table,
            &mut audit,
        );

        assert_eq!(records[0].issuer.lei, Some(Cell::scalar("L1")));
        assert_eq!(records[1].issuer.jurisdiction, Cell::from_values(["IE", "NL"]));
        assert_eq!(records[2].issuer.legal_name, Some(Cell::scalar("Two B.V.")));
        assert_eq!(records[3].issuer, IssuerFields::default());
        assert!(audit.is_empty());
    }

    #[test]
    fn test_missing_issuer_keeps_lei_and_audits() {
        let table = IssuerTable {
            isin_lei: map(&[("I1", "L9")]),
            issuers: BTreeMap::new(),
        };
        let mut audit = AuditLog::new();
        let records = apply_issuers(vec![record("A", &["I1"])], &table, &mut audit);

        assert_eq!(records[0].issuer.lei, Some(Cell::scalar("L9")));
        assert_eq!(records[0].issuer.legal_name, None);
        assert_eq!(audit.counts()["missing_issuer"], 1);
        assert_eq!(audit.for_record("A").count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_resolve_fails_whole_call() {
        let registry = Arc::new(FakeRegistry::new(vec![IssuerRecord::new("L1", "One", "IE")]));
        let cancel = CancelToken::new();
        cancel.cancel();
        let enricher = IssuerEnricher::new(registry, 200, 1, cancel);

        let mut audit = AuditLog::new();
        let result = enricher
            .resolve(map(&[("I1", "L1")]), &Corrections::none(), &mut audit)
            .await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
        assert!(audit.is_empty());
    }
}
