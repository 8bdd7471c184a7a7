// 📥 Source Record Store - primary register after field-level cleanup
//
// Cleanup runs once at load time, in a fixed order:
//   1. dedupe by natural key (first occurrence wins, source is newest-first)
//   2. trim + explicit typo tables for categorical fields
//   3. originator countries → code / Combo of codes
//   4. ISIN cells → scalar / Combo, invalid ones flagged
// Each step is a plain function from raw values to cleaned values.

use crate::audit::{AuditKind, AuditLog};
use crate::combo::Cell;
use crate::corrections::Corrections;
use crate::isin::{self, IsinStatus, ISIN_LEN};
use crate::normalize::NameNormalizer;
use crate::record::{Placement, RawRecord, Record};
use crate::view;
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

const DATE_FORMATS: [&str; 4] = ["%d/%m/%Y", "%Y-%m-%d", "%d.%m.%Y", "%d-%m-%Y"];
const ISIN_NOISE: [char; 4] = [';', ',', '\t', '\n'];

// ============================================================================
// RECORD STORE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Vec<Record>,
}

impl RecordStore {
    /// Read the primary register from CSV. Unreadable input is fatal.
    pub fn load_csv(path: &Path, corrections: &Corrections, audit: &mut AuditLog) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open primary register: {}", path.display()))?;
        let store = Self::from_reader(file, corrections, audit)
            .with_context(|| format!("Failed to parse primary register: {}", path.display()))?;
        info!("Loaded {} records from {}", store.len(), path.display());
        Ok(store)
    }

    pub fn from_reader<R: Read>(
        reader: R,
        corrections: &Corrections,
        audit: &mut AuditLog,
    ) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let mut rows = Vec::new();
        for (i, result) in rdr.deserialize::<RawRecord>().enumerate() {
            let row = result.with_context(|| format!("Failed to parse CSV line {}", i + 2))?;
            rows.push(row);
        }

        Ok(Self::from_raw(rows, corrections, audit))
    }

    /// Run the cleanup pipeline over already-read rows
    pub fn from_raw(rows: Vec<RawRecord>, corrections: &Corrections, audit: &mut AuditLog) -> Self {
        let normalizer = NameNormalizer::new();

        let records = dedupe(rows, audit)
            .into_iter()
            .map(|(line, raw)| clean_row(raw, line, corrections, &normalizer, audit))
            .collect();

        RecordStore { records }
    }

    pub fn from_records(records: Vec<Record>) -> Self {
        RecordStore { records }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, usi: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.usi() == Some(usi))
    }

    /// ISINs recorded for a natural key; None if the key is unknown or has none
    pub fn isins_for(&self, usi: &str) -> Option<Vec<&str>> {
        self.get(usi)
            .map(|r| r.isins())
            .filter(|isins| !isins.is_empty())
    }

    /// Inclusive notification-date slice (see `view::between`)
    pub fn between(&self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Vec<Record> {
        view::between(&self.records, from, to)
    }
}

// ============================================================================
// STEP 1: DEDUPLICATION
// ============================================================================

/// Keep the first row per natural key. Rows without a key are kept as-is.
/// Returns (source line, row) pairs.
fn dedupe(rows: Vec<RawRecord>, audit: &mut AuditLog) -> Vec<(usize, RawRecord)> {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(rows.len());

    for (i, row) in rows.into_iter().enumerate() {
        let line = i + 2;
        let key = row.usi.trim().to_string();

        if !key.is_empty() && !seen.insert(key.clone()) {
            audit.record(Some(&key), AuditKind::DuplicateSuppressed { line });
            continue;
        }
        kept.push((line, row));
    }

    kept
}

// ============================================================================
// STEP 2-4: PER-ROW CLEANUP
// ============================================================================

fn clean_row(
    raw: RawRecord,
    line: usize,
    corrections: &Corrections,
    normalizer: &NameNormalizer,
    audit: &mut AuditLog,
) -> Record {
    let usi = non_empty(&raw.usi).map(str::to_string);
    let key = usi.as_deref();

    let name = non_empty(&raw.name).map(|n| corrections.fix_securitisation_name(n));
    let normalized_name = name.as_deref().map(|n| normalizer.normalize(n));

    let placement = non_empty(&raw.placement)
        .map(|p| corrections.fix_placement(p))
        .and_then(|p| Placement::parse(&p));

    let underlying_assets = non_empty(&raw.underlying_assets).map(|a| corrections.fix_asset_class(a));

    let notification_date = non_empty(&raw.notification_date).and_then(|d| {
        let parsed = parse_date(d, corrections);
        if parsed.is_none() {
            audit.record(key, AuditKind::UnparseableDate { raw: d.to_string() });
        }
        parsed
    });

    let originator_country = fix_originator_country(&raw.originator_country, corrections, key, audit);
    let (isin, invalid_isins) = fix_isins(&raw.isin, key, audit);

    debug!(usi = key.unwrap_or("-"), line, "cleaned register row");

    Record {
        usi,
        notification_date,
        placement,
        name,
        normalized_name,
        underlying_assets,
        originator_country,
        isin,
        invalid_isins,
        source_line: line,
        ..Default::default()
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(trimmed)
    }
}

/// Correction table first, then the usual register formats
pub fn parse_date(raw: &str, corrections: &Corrections) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Some(date) = corrections.fix_date(raw) {
        return Some(date);
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }

    // Spreadsheet exports sometimes carry a time part
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.date())
}

/// Normalize an originator-country cell.
///
/// "IT" → "IT", "Italy" → "IT", "FR; DE" → Combo(FR, DE).
/// Multi-country cells are split on the first delimiter present (`;`, `,`,
/// newline) and each token's trailing two characters are taken as the code.
pub fn fix_originator_country(
    raw: &str,
    corrections: &Corrections,
    usi: Option<&str>,
    audit: &mut AuditLog,
) -> Option<Cell> {
    let cell = non_empty(raw)?;
    let whole = corrections.fix_country(cell);

    let codes: Vec<String> = if whole.chars().count() <= 2 {
        vec![whole.to_string()]
    } else {
        let delimiter = [';', ',', '\n']
            .into_iter()
            .find(|d| whole.contains(*d))
            .unwrap_or('\n');

        whole
            .split(delimiter)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|token| country_code(token, corrections))
            .collect()
    };

    for code in &codes {
        if !is_country_code(code) {
            audit.record(usi, AuditKind::UnrecognizedCountry { token: code.clone() });
        }
    }

    Cell::from_values(codes)
}

fn country_code(token: &str, corrections: &Corrections) -> String {
    let token = corrections.fix_country(token);
    let token = token.trim_end_matches(|c: char| !c.is_alphanumeric());
    let chars: Vec<char> = token.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(2)..].iter().collect();
    corrections.fix_country(&tail).to_string()
}

fn is_country_code(code: &str) -> bool {
    code.len() == 2 && code.chars().all(|c| c.is_ascii_uppercase())
}

/// Split an identifier cell into ISINs.
///
/// Delimiter noise is stripped, empty tokens dropped. Tokens shorter than an
/// ISIN are discarded (logged). Longer-or-equal tokens are kept even when they
/// fail validation, but listed in the returned invalid set.
pub fn fix_isins(raw: &str, usi: Option<&str>, audit: &mut AuditLog) -> (Option<Cell>, Vec<String>) {
    let Some(cell) = non_empty(raw) else {
        return (None, Vec::new());
    };

    let mut kept = Vec::new();
    let mut invalid = Vec::new();

    for token in cell
        .split(|c: char| c.is_whitespace() || ISIN_NOISE.contains(&c))
        .map(|t| t.trim_matches(|c: char| ISIN_NOISE.contains(&c) || c.is_whitespace()))
        .filter(|t| !t.is_empty())
    {
        if token.chars().count() < ISIN_LEN {
            audit.record(usi, AuditKind::DiscardedIdentifier { token: token.to_string() });
            continue;
        }

        let status = isin::classify(token);
        if status != IsinStatus::Valid {
            audit.record(
                usi,
                AuditKind::InvalidIsin {
                    isin: token.to_string(),
                    status,
                },
            );
            if !invalid.iter().any(|i: &String| i == token) {
                invalid.push(token.to_string());
            }
        }
        kept.push(token.to_string());
    }

    (Cell::from_values(kept), invalid)
}

// ============================================================================
// TESTS
// ============================================================================
