// 🔁 Reconciliation Run - the fixed pipeline over one primary register
//
//   cleaned records
//     → vehicle matching (ISIN first, normalized name as fallback)
//     → reference-data search for ISINs the vehicle register left unresolved
//       (override ISINs excluded)
//     → ISIN → LEI (overrides win) → LEI registry in batches
//     → issuer fields joined onto records
//     → optional UK residence inference
//
// Everything network-facing sits behind a trait so a run can be driven
// entirely from memory. The audit log collects every validation failure,
// ambiguity and unresolved lookup along the way.

use crate::audit::{AuditKind, AuditLog};
use crate::companies_house::{self, CompaniesHouseClient, CompanyRegistry};
use crate::config::Settings;
use crate::corrections::Corrections;
use crate::enrich::{self, IssuerEnricher};
use crate::firds::{FirdsClient, ReferenceDataSource, ReferenceSearcher, SearchOutcome};
use crate::gleif::{GleifClient, LeiRegistry};
use crate::http::{self, CancelToken};
use crate::matcher;
use crate::record::Record;
use crate::register::RecordStore;
use crate::vehicle::VehicleRegister;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

// ============================================================================
// RUN OUTPUT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub records: usize,
    /// Records per vehicle-match kind
    pub matches: BTreeMap<String, usize>,
    pub isins_searched: usize,
    pub isins_found: usize,
    pub isins_still_missing: usize,
    pub document_failures: usize,
    pub issuers_resolved: usize,
    pub residence_inferred: usize,
    /// Audit events per kind
    pub audit: BTreeMap<String, usize>,
}

impl RunSummary {
    pub fn build(records: &[Record], search: &SearchOutcome, issuers: usize, audit: &AuditLog) -> Self {
        let mut matches = BTreeMap::new();
        for record in records {
            *matches
                .entry(record.vehicle_match.as_str().to_string())
                .or_insert(0) += 1;
        }

        RunSummary {
            records: records.len(),
            matches,
            isins_searched: search.found.len() + search.still_missing.len(),
            isins_found: search.found.len(),
            isins_still_missing: search.still_missing.len(),
            document_failures: search.failures.len(),
            issuers_resolved: issuers,
            residence_inferred: records.iter().filter(|r| r.residence_inferred).count(),
            audit: audit
                .counts()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }

    pub fn log(&self) {
        info!("Reconciled {} records", self.records);
        for (kind, count) in &self.matches {
            info!("  vehicle match {}: {}", kind, count);
        }
        info!(
            "  reference data: {} searched, {} found, {} still missing, {} documents failed",
            self.isins_searched, self.isins_found, self.isins_still_missing, self.document_failures
        );
        info!("  issuers resolved: {}", self.issuers_resolved);
        info!("  residence inferred: {}", self.residence_inferred);
        for (kind, count) in &self.audit {
            info!("  audit {}: {}", kind, count);
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub records: Vec<Record>,
    pub audit: AuditLog,
    pub search: SearchOutcome,
    pub summary: RunSummary,
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct Reconciler {
    settings: Settings,
    corrections: Corrections,
    reference: Arc<dyn ReferenceDataSource>,
    registry: Arc<dyn LeiRegistry>,
    companies: Option<Arc<dyn CompanyRegistry>>,
    cancel: CancelToken,
}

impl Reconciler {
    pub fn new(
        settings: Settings,
        corrections: Corrections,
        reference: Arc<dyn ReferenceDataSource>,
        registry: Arc<dyn LeiRegistry>,
        cancel: CancelToken,
    ) -> Self {
        Reconciler {
            settings,
            corrections,
            reference,
            registry,
            companies: None,
            cancel,
        }
    }

    pub fn with_company_registry(mut self, companies: Arc<dyn CompanyRegistry>) -> Self {
        self.companies = Some(companies);
        self
    }

    /// Wire up the live HTTP clients. Company search is enabled only when an
    /// API key is configured.
    pub fn from_settings(settings: Settings, corrections: Corrections, cancel: CancelToken) -> Result<Self> {
        settings.validate()?;

        let client = http::build_client(settings.http_timeout())
            .context("Failed to build HTTP client")?;
        let reference = FirdsClient::new(&settings, cancel.clone())
            .context("Failed to build reference-data client")?;
        let registry = GleifClient::new(
            client.clone(),
            &settings.gleif_url,
            settings.retry_policy(),
            cancel.clone(),
        );
        let companies = settings.companies_house_key.as_deref().map(|key| {
            CompaniesHouseClient::new(
                client.clone(),
                &settings.companies_house_url,
                key,
                settings.retry_policy(),
                cancel.clone(),
            )
        });

        let mut reconciler = Reconciler::new(
            settings,
            corrections,
            Arc::new(reference),
            Arc::new(registry),
            cancel,
        );
        if let Some(companies) = companies {
            reconciler = reconciler.with_company_registry(Arc::new(companies));
        }
        Ok(reconciler)
    }

    pub fn corrections(&self) -> &Corrections {
        &self.corrections
    }

    /// Run the whole pipeline. `audit` carries events from loading.
    ///
    /// Fails only if the reference-data index cannot be queried or the run is
    /// cancelled; in both cases no enriched record is returned.
    pub async fn run(
        &self,
        store: RecordStore,
        vehicles: &VehicleRegister,
        mut audit: AuditLog,
    ) -> Result<RunOutput> {
        info!("🔁 Reconciling {} records (run {})", store.len(), audit.run_id);

        // 1. Vehicle register
        let records = matcher::match_all(store.into_records(), vehicles, &mut audit);

        // 2. Reference data
        let targets = enrich::search_targets(&records, &self.corrections);
        let (from, to) = self.settings.reference_range();
        info!(
            "Searching reference data published {}..{} for {} ISINs",
            from,
            to,
            targets.len()
        );
        let searcher = ReferenceSearcher::new(
            Arc::clone(&self.reference),
            self.settings.download_concurrency,
            self.cancel.clone(),
        );
        let search = searcher
            .search_range(targets, from, to)
            .await
            .context("Reference-data search failed")?;

        for failure in &search.failures {
            audit.record(
                None,
                AuditKind::DocumentFailed {
                    document: failure.document.clone(),
                    message: failure.message.clone(),
                },
            );
        }
        for record in &records {
            for isin in record.isins() {
                if search.still_missing.contains(isin) {
                    audit.record(
                        record.usi(),
                        AuditKind::UnresolvedIdentifier {
                            isin: isin.to_string(),
                        },
                    );
                }
            }
        }

        // 3. Issuers
        let isin_lei = enrich::issuer_leis(&search.found, &self.corrections);
        let enricher = IssuerEnricher::new(
            Arc::clone(&self.registry),
            self.settings.lei_batch_size,
            self.settings.lookup_concurrency,
            self.cancel.clone(),
        );
        let table = enricher
            .resolve(isin_lei, &self.corrections, &mut audit)
            .await
            .context("Issuer lookup failed")?;
        let issuers = table.issuers.len();
        let mut records = enrich::apply_issuers(records, &table, &mut audit);

        // 4. UK residence
        if let Some(companies) = &self.companies {
            records = companies_house::infer_uk_residence(companies.as_ref(), records, &mut audit)
                .await
                .context("Company search failed")?;
        }

        let summary = RunSummary::build(&records, &search, issuers, &audit);
        summary.log();

        Ok(RunOutput {
            records,
            audit,
            search,
            summary,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
