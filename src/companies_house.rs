// 🇬🇧 UK Residence Inference - company-name search against Companies House
//
// For public records that still have no country of residence after matching,
// search the securitisation name with both forms of each UK legal suffix
// ("ltd"/"limited", "plc"/"public limited company"). A first-page result whose
// title starts with the queried name marks the record as UK-resident. The
// result is a name heuristic, so the record is flagged `residence_inferred`.

use crate::audit::{AuditKind, AuditLog};
use crate::combo::Cell;
use crate::error::FetchError;
use crate::http::{self, CancelToken, RetryPolicy};
use crate::record::{Record, VehicleMatch};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://api.company-information.service.gov.uk";

/// (short, long) forms of UK legal suffixes, tried in this order
pub const UK_SUFFIXES: [(&str, &str); 2] = [("ltd", "limited"), ("plc", "public limited company")];

#[async_trait]
pub trait CompanyRegistry: Send + Sync {
    /// Titles on the first page of results for `query`
    async fn search_titles(&self, query: &str) -> Result<Vec<String>, FetchError>;
}

// ============================================================================
// API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: String,
}

pub fn parse_search(body: &str, endpoint: &str) -> Result<Vec<String>, FetchError> {
    let response: SearchResponse = serde_json::from_str(body).map_err(|e| FetchError::Parse {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })?;
    Ok(response.items.into_iter().map(|i| i.title).collect())
}

// ============================================================================
// CLIENT
// ============================================================================

pub struct CompaniesHouseClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    policy: RetryPolicy,
    cancel: CancelToken,
}

impl CompaniesHouseClient {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: &str,
        policy: RetryPolicy,
        cancel: CancelToken,
    ) -> Self {
        CompaniesHouseClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            policy,
            cancel,
        }
    }
}

#[async_trait]
impl CompanyRegistry for CompaniesHouseClient {
    async fn search_titles(&self, query: &str) -> Result<Vec<String>, FetchError> {
        let url = format!(
            "{}/search/companies?q={}",
            self.base_url,
            urlencoding::encode(query)
        );

        http::with_retry("company search", self.policy, &self.cancel, || async {
            let response = self
                .client
                .get(&url)
                .basic_auth(&self.api_key, Some(""))
                .send()
                .await
                .map_err(|e| FetchError::from_reqwest(&url, e))?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    endpoint: url.clone(),
                    status: status.as_u16(),
                });
            }
            let body = response
                .text()
                .await
                .map_err(|e| FetchError::from_reqwest(&url, e))?;
            parse_search(&body, &url)
        })
        .await
    }
}

// ============================================================================
// INFERENCE
// ============================================================================

/// Queries to try for one suffix: name cut before the suffix, then each form
/// appended. A name without the suffix gets it appended as-is.
pub fn candidate_queries(name: &str, short: &str, long: &str) -> Vec<String> {
    let lower = name.to_lowercase();
    let stem = [short, long]
        .iter()
        .find_map(|suffix| lower.find(suffix).map(|i| lower[..i].to_string()))
        .unwrap_or(lower);

    vec![format!("{}{}", stem, short), format!("{}{}", stem, long)]
}

fn title_matches(titles: &[String], query: &str) -> bool {
    let query = query.to_lowercase();
    titles.iter().any(|t| t.to_lowercase().starts_with(&query))
}

/// Whether a company with this name shows up on the first page of results
pub async fn is_uk_company<C: CompanyRegistry + ?Sized>(
    registry: &C,
    name: &str,
) -> Result<bool, FetchError> {
    for (short, long) in UK_SUFFIXES {
        for query in candidate_queries(name, short, long) {
            let titles = registry.search_titles(&query).await?;
            if title_matches(&titles, &query) {
                debug!("{:?} found as {:?}", name, query);
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Records that would be checked. Ambiguous register matches keep their
/// outcome and are left alone.
pub fn needs_residence(record: &Record) -> bool {
    !record.is_private()
        && record.vehicle_match != VehicleMatch::Ambiguous
        && record.vehicle.country_of_residence.is_none()
        && record.name.as_deref().is_some_and(|n| !n.trim().is_empty())
}

/// Set country of residence to GB for records found in the company registry.
///
/// Every search runs before any record changes. A failed search is audited
/// and leaves that record alone; cancellation fails the whole pass.
pub async fn infer_uk_residence<C: CompanyRegistry + ?Sized>(
    registry: &C,
    mut records: Vec<Record>,
    audit: &mut AuditLog,
) -> Result<Vec<Record>, FetchError> {
    let mut hits = Vec::new();
    for (i, record) in records.iter().enumerate() {
        if !needs_residence(record) {
            continue;
        }
        let Some(name) = record.name.as_deref() else {
            continue;
        };
        match is_uk_company(registry, name).await {
            Ok(true) => hits.push(i),
            Ok(false) => {}
            Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
            Err(e) => audit.record(
                record.usi(),
                AuditKind::CompanySearchFailed {
                    name: name.to_string(),
                    message: e.to_string(),
                },
            ),
        }
    }

    info!("Inferred UK residence for {} records", hits.len());
    for i in hits {
        if let Some(record) = records.get_mut(i) {
            record.vehicle.country_of_residence = Some(Cell::scalar("GB"));
            record.residence_inferred = true;
            if record.vehicle_match != VehicleMatch::Exact {
                record.vehicle_match = VehicleMatch::Approximate;
            }
        }
    }
    Ok(records)
}

// ============================================================================
// TESTS
// ============================================================================
