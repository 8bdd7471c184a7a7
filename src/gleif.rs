// 🪪 LEI Registry - legal name and jurisdiction by Legal Entity Identifier
//
// Batched lookup against the GLEIF API:
//   GET {base}/lei-records?filter[lei]=LEI1,LEI2,...&page[size]=N
// A batch never exceeds MAX_BATCH identifiers.

use crate::error::FetchError;
use crate::http::{self, CancelToken, RetryPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.gleif.org/api/v1";

/// Largest batch the registry accepts per request
pub const MAX_BATCH: usize = 200;

/// Legal-entity attributes keyed by LEI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerRecord {
    pub lei: String,
    pub legal_name: Option<String>,
    pub jurisdiction: Option<String>,
}

impl IssuerRecord {
    pub fn new(lei: &str, legal_name: &str, jurisdiction: &str) -> Self {
        IssuerRecord {
            lei: lei.to_string(),
            legal_name: Some(legal_name.to_string()),
            jurisdiction: Some(jurisdiction.to_string()),
        }
    }
}

#[async_trait]
pub trait LeiRegistry: Send + Sync {
    /// Look up one batch (at most `MAX_BATCH` LEIs). LEIs the registry does
    /// not know are simply absent from the result.
    async fn lookup(&self, leis: &[String]) -> Result<Vec<IssuerRecord>, FetchError>;
}

// ============================================================================
// API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct LeiRecordsResponse {
    #[serde(default)]
    data: Vec<LeiRecordData>,
}

#[derive(Debug, Deserialize)]
struct LeiRecordData {
    attributes: LeiAttributes,
}

#[derive(Debug, Deserialize)]
struct LeiAttributes {
    lei: String,
    entity: LeiEntity,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeiEntity {
    legal_name: Option<LegalName>,
    jurisdiction: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegalName {
    name: Option<String>,
}

impl From<LeiRecordData> for IssuerRecord {
    fn from(data: LeiRecordData) -> Self {
        let attrs = data.attributes;
        IssuerRecord {
            lei: attrs.lei,
            legal_name: attrs.entity.legal_name.and_then(|n| n.name),
            jurisdiction: attrs.entity.jurisdiction,
        }
    }
}

/// Parse a `lei-records` response body
pub fn parse_lei_records(body: &str, endpoint: &str) -> Result<Vec<IssuerRecord>, FetchError> {
    let response: LeiRecordsResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Parse {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;
    Ok(response.data.into_iter().map(IssuerRecord::from).collect())
}

// ============================================================================
// CLIENT
// ============================================================================

pub struct GleifClient {
    client: reqwest::Client,
    base_url: String,
    policy: RetryPolicy,
    cancel: CancelToken,
}

impl GleifClient {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        policy: RetryPolicy,
        cancel: CancelToken,
    ) -> Self {
        GleifClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
            cancel,
        }
    }

    pub fn batch_url(&self, leis: &[String]) -> String {
        format!(
            "{}/lei-records?filter%5Blei%5D={}&page%5Bsize%5D={}",
            self.base_url,
            urlencoding::encode(&leis.join(",")),
            leis.len().min(MAX_BATCH)
        )
    }
}

#[async_trait]
impl LeiRegistry for GleifClient {
    async fn lookup(&self, leis: &[String]) -> Result<Vec<IssuerRecord>, FetchError> {
        if leis.is_empty() {
            return Ok(Vec::new());
        }
        let leis = &leis[..leis.len().min(MAX_BATCH)];
        let url = self.batch_url(leis);
        debug!("Looking up {} LEIs", leis.len());

        http::with_retry("LEI registry", self.policy, &self.cancel, || async {
            let response = http::get(&self.client, &url).await?;
            let body = response
                .text()
                .await
                .map_err(|e| FetchError::from_reqwest(&url, e))?;
            parse_lei_records(&body, &url)
        })
        .await
    }
}

// ============================================================================
// TESTS
// ============================================================================
