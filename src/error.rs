// 🧯 Error Types - typed failure modes for the reconciliation engine
//
// Validation problems are NOT errors here: they are logged and recorded in the
// audit trail. These enums cover the conditions a caller must branch on.

use thiserror::Error;

// ============================================================================
// COMBO
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComboError {
    /// A Combo needs at least two distinct members; fewer is a scalar or null
    #[error("a combo needs at least 2 distinct values, got {distinct}")]
    TooFewMembers { distinct: usize },
}

// ============================================================================
// MATCHING
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    /// More than one candidate for a key that must be unique.
    /// Distinct from "no match": the caller decides, nothing is picked silently.
    #[error("ambiguous match for {key}: {} candidates ({})", candidates.len(), candidates.join(", "))]
    Ambiguous { key: String, candidates: Vec<String> },
}

// ============================================================================
// NETWORK / DOCUMENT FETCHING
// ============================================================================

/// Errors from talking to a remote source (reference-data index, archives,
/// LEI registry, company search).
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("timeout calling {endpoint}")]
    Timeout { endpoint: String },

    #[error("connection to {endpoint} failed: {message}")]
    Connect { endpoint: String, message: String },

    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    #[error("malformed archive {name}: {message}")]
    MalformedArchive { name: String, message: String },

    #[error("could not parse response from {endpoint}: {message}")]
    Parse { endpoint: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("run cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether another attempt could succeed.
    ///
    /// Timeouts, connection failures, HTTP 429 and 5xx are transient.
    /// Other 4xx, malformed payloads and cancellation are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Connect { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::MalformedArchive { .. }
            | FetchError::Parse { .. }
            | FetchError::Io(_)
            | FetchError::Cancelled => false,
        }
    }

    pub fn from_reqwest(endpoint: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                endpoint: endpoint.to_string(),
            }
        } else if let Some(status) = err.status() {
            FetchError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            FetchError::Parse {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        } else {
            FetchError::Connect {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        }
    }
}

// ============================================================================
// REFERENCE-DATA DOCUMENTS
// ============================================================================

/// A single reference-data document could not be acquired or scanned.
/// Never fatal for the search as a whole.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("XML error in {name}: {message}")]
    Xml { name: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_statuses_retry() {
        let err = FetchError::Status {
            endpoint: "index".to_string(),
            status: 503,
        };
        assert!(err.is_retryable());

        let err = FetchError::Status {
            endpoint: "index".to_string(),
            status: 429,
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_client_errors_never_retry() {
        let err = FetchError::Status {
            endpoint: "index".to_string(),
            status: 404,
        };
        assert!(!err.is_retryable());

        let err = FetchError::MalformedArchive {
            name: "FULINS_D_20200101_01of01.zip".to_string(),
            message: "empty archive".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(!FetchError::Cancelled.is_retryable());
    }

    #[test]
    fn test_timeout_retries() {
        let err = FetchError::Timeout {
            endpoint: "lei-records".to_string(),
        };
        assert!(err.is_retryable());
        assert_eq!(format!("{}", err), "timeout calling lei-records");
    }

    #[test]
    fn test_ambiguous_display_lists_candidates() {
        let err = MatchError::Ambiguous {
            key: "tulip mortgage funding 2019-1".to_string(),
            candidates: vec!["FVC1".to_string(), "FVC2".to_string()],
        };
        assert_eq!(
            format!("{}", err),
            "ambiguous match for tulip mortgage funding 2019-1: 2 candidates (FVC1, FVC2)"
        );
    }
}
