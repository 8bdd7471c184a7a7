// 📜 Audit Trail - every invalid identifier, ambiguous match and unresolved
// lookup of a run, as first-class output next to the reconciled records.
//
// Each event is logged at WARN when recorded and kept for export/persistence.

use crate::isin::IsinStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

// ============================================================================
// EVENT KINDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditKind {
    /// ISIN failed format or check-digit validation (kept, flagged)
    InvalidIsin { isin: String, status: IsinStatus },

    /// Identifier token too short to be an ISIN; treated as absent
    DiscardedIdentifier { token: String },

    /// Country token that is not a two-letter code after exceptions
    UnrecognizedCountry { token: String },

    /// Notification date that could not be parsed or corrected
    UnparseableDate { raw: String },

    /// A later row with an already-seen natural key was dropped
    DuplicateSuppressed { line: usize },

    /// More than one candidate where exactly one was required
    AmbiguousMatch { key: String, candidates: Vec<String> },

    /// Some ISINs of a multi-ISIN record did not resolve in the vehicle register
    PartialVehicleMatch { unresolved: Vec<String> },

    /// A reference-data document could not be fetched, unpacked or parsed
    DocumentFailed { document: String, message: String },

    /// ISIN not found after exhausting all reference-data documents
    UnresolvedIdentifier { isin: String },

    /// Issuer LEI requested from the registry but not returned
    MissingIssuer { lei: String },

    /// A whole LEI batch failed after retries
    BatchFailed { leis: usize, message: String },

    /// Company-name search for UK residence failed after retries
    CompanySearchFailed { name: String, message: String },

    /// Registry jurisdiction longer than two characters was cut down
    JurisdictionTruncated {
        lei: String,
        original: String,
        truncated: String,
    },
}

impl AuditKind {
    pub fn name(&self) -> &'static str {
        match self {
            AuditKind::InvalidIsin { .. } => "invalid_isin",
            AuditKind::DiscardedIdentifier { .. } => "discarded_identifier",
            AuditKind::UnrecognizedCountry { .. } => "unrecognized_country",
            AuditKind::UnparseableDate { .. } => "unparseable_date",
            AuditKind::DuplicateSuppressed { .. } => "duplicate_suppressed",
            AuditKind::AmbiguousMatch { .. } => "ambiguous_match",
            AuditKind::PartialVehicleMatch { .. } => "partial_vehicle_match",
            AuditKind::DocumentFailed { .. } => "document_failed",
            AuditKind::UnresolvedIdentifier { .. } => "unresolved_identifier",
            AuditKind::MissingIssuer { .. } => "missing_issuer",
            AuditKind::BatchFailed { .. } => "batch_failed",
            AuditKind::CompanySearchFailed { .. } => "company_search_failed",
            AuditKind::JurisdictionTruncated { .. } => "jurisdiction_truncated",
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditKind::InvalidIsin { isin, status } => {
                write!(f, "invalid ISIN {} ({:?})", isin, status)
            }
            AuditKind::DiscardedIdentifier { token } => {
                write!(f, "discarded identifier token {:?}", token)
            }
            AuditKind::UnrecognizedCountry { token } => {
                write!(f, "unrecognized country {:?}", token)
            }
            AuditKind::UnparseableDate { raw } => write!(f, "unparseable date {:?}", raw),
            AuditKind::DuplicateSuppressed { line } => {
                write!(f, "duplicate natural key on line {} dropped", line)
            }
            AuditKind::AmbiguousMatch { key, candidates } => write!(
                f,
                "ambiguous match for {}: {}",
                key,
                candidates.join(", ")
            ),
            AuditKind::PartialVehicleMatch { unresolved } => write!(
                f,
                "vehicle fields left unset, unresolved ISINs: {}",
                unresolved.join(", ")
            ),
            AuditKind::DocumentFailed { document, message } => {
                write!(f, "document {} failed: {}", document, message)
            }
            AuditKind::UnresolvedIdentifier { isin } => {
                write!(f, "{} not found in any reference-data document", isin)
            }
            AuditKind::MissingIssuer { lei } => write!(f, "LEI {} not found in registry", lei),
            AuditKind::BatchFailed { leis, message } => {
                write!(f, "LEI batch of {} failed: {}", leis, message)
            }
            AuditKind::CompanySearchFailed { name, message } => {
                write!(f, "company search for {:?} failed: {}", name, message)
            }
            AuditKind::JurisdictionTruncated {
                lei,
                original,
                truncated,
            } => write!(
                f,
                "jurisdiction {:?} for {} truncated to {:?}",
                original, lei, truncated
            ),
        }
    }
}

// ============================================================================
// EVENT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,

    /// Natural key of the record concerned, if any
    pub usi: Option<String>,

    #[serde(flatten)]
    pub kind: AuditKind,
}

impl AuditEvent {
    pub fn new(usi: Option<&str>, kind: AuditKind) -> Self {
        AuditEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            usi: usi.map(str::to_string),
            kind,
        }
    }
}

// ============================================================================
// AUDIT LOG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub run_id: String,
    events: Vec<AuditEvent>,
}

impl AuditLog {
    pub fn new() -> Self {
        AuditLog {
            run_id: uuid::Uuid::new_v4().to_string(),
            events: Vec::new(),
        }
    }

    /// Log at WARN and keep the event
    pub fn record(&mut self, usi: Option<&str>, kind: AuditKind) {
        warn!(
            run_id = %self.run_id,
            usi = usi.unwrap_or("-"),
            event = kind.name(),
            "{}",
            kind
        );
        self.events.push(AuditEvent::new(usi, kind));
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn for_record<'a>(&'a self, usi: &'a str) -> impl Iterator<Item = &'a AuditEvent> + 'a {
        self.events
            .iter()
            .filter(move |e| e.usi.as_deref() == Some(usi))
    }

    /// Event counts keyed by kind name
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for event in &self.events {
            *counts.entry(event.kind.name()).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_count() {
        let mut log = AuditLog::new();
        log.record(
            Some("USI-1"),
            AuditKind::InvalidIsin {
                isin: "XS2100000000".to_string(),
                status: IsinStatus::BadCheckDigit,
            },
        );
        log.record(
            Some("USI-2"),
            AuditKind::UnresolvedIdentifier {
                isin: "XS2100000004".to_string(),
            },
        );
        log.record(
            Some("USI-1"),
            AuditKind::UnrecognizedCountry {
                token: "Atlantis".to_string(),
            },
        );

        assert_eq!(log.len(), 3);
        assert_eq!(log.counts()["invalid_isin"], 1);
        assert_eq!(log.for_record("USI-1").count(), 2);
    }

    #[test]
    fn test_event_serializes_flat() {
        let event = AuditEvent::new(
            None,
            AuditKind::DocumentFailed {
                document: "FULINS_D_20200301_01of03.zip".to_string(),
                message: "HTTP 404".to_string(),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "document_failed");
        assert_eq!(json["document"], "FULINS_D_20200301_01of03.zip");
        assert!(json["usi"].is_null());
    }

    #[test]
    fn test_display() {
        let kind = AuditKind::JurisdictionTruncated {
            lei: "635400ABCDEFGHIJKL12".to_string(),
            original: "US-DE".to_string(),
            truncated: "US".to_string(),
        };
        assert_eq!(
            kind.to_string(),
            "jurisdiction \"US-DE\" for 635400ABCDEFGHIJKL12 truncated to \"US\""
        );
    }
}
