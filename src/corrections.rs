// 🏷️ Correction Tables - Rules as Data
// Explicit lookup tables of known-bad values → corrected values.
// No heuristic correction: a value is fixed only if it is listed here.

use anyhow::{Context as AnyhowContext, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

// ============================================================================
// OVERRIDE ENTRIES
// ============================================================================

/// Manual ISIN → issuer LEI mapping for identifiers missing from (or wrong in)
/// the reference-data feed. Supersedes search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsinOverride {
    pub isin: String,
    pub issuer_lei: String,

    /// Why this entry exists
    #[serde(default)]
    pub reason: Option<String>,
}

/// Manual LEI → legal name / jurisdiction for entries the LEI registry lacks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuerOverride {
    pub lei: String,
    pub legal_name: Option<String>,
    pub jurisdiction: Option<String>,

    #[serde(default)]
    pub reason: Option<String>,
}

// ============================================================================
// CORRECTIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Corrections {
    /// Underlying-asset labels, keyed by the lower-cased, trimmed bad value
    pub asset_class: BTreeMap<String, String>,

    /// Public/private flag typos
    pub placement: BTreeMap<String, String>,

    /// Unparseable notification-date strings
    pub notification_date: BTreeMap<String, NaiveDate>,

    /// Country names / non-ISO codes → ISO 3166-1 alpha-2
    pub country: BTreeMap<String, String>,

    /// Misspelled securitisation names in the primary register
    pub securitisation_name: BTreeMap<String, String>,

    /// Misspelled vehicle names in the vehicle register
    pub vehicle_name: BTreeMap<String, String>,

    pub isin_overrides: Vec<IsinOverride>,
    pub issuer_overrides: Vec<IssuerOverride>,
}

impl Corrections {
    /// Built-in tables for the known data-quality problems
    pub fn builtin() -> Self {
        let asset_class = [
            "auto loans /leases",
            "auto loans/leases",
            "auto  loans/leases",
            "auto loans/ leases",
            "auto loans",
        ]
        .into_iter()
        .map(|bad| (bad.to_string(), "auto loans / leases".to_string()))
        .collect();

        let placement = [("Publc", "Public")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut notification_date = BTreeMap::new();
        if let Some(date) = NaiveDate::from_ymd_opt(2019, 10, 31) {
            notification_date.insert("31/1012019".to_string(), date);
        }

        let country = [("Italy", "IT"), ("UK", "GB")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let securitisation_name = [
            ("Brass No. 8 PLC", "Brass No.8 PLC"),
            ("Bumper UK 2019-1", "Bumper UK 2019-1 Finance"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let vehicle_name = [
            (
                "Tulip Mortgage Funding 2019-I B.V.",
                "Tulip Mortgage Funding 2019-1 B.V.",
            ),
            (
                "MASTER CREDIT CARDS PASS COMPARTIMENT FRANCE",
                "MASTER CREDIT CARDS PASS COMPARTMENT FRANCE",
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let isin_overrides = ["XS2104129486", "XS2104129569"]
            .into_iter()
            .map(|isin| IsinOverride {
                isin: isin.to_string(),
                issuer_lei: "6354003OBLBBE5CKB866".to_string(),
                reason: Some("absent from reference-data files".to_string()),
            })
            .collect();

        Corrections {
            asset_class,
            placement,
            notification_date,
            country,
            securitisation_name,
            vehicle_name,
            isin_overrides,
            issuer_overrides: Vec::new(),
        }
    }

    /// Empty tables: nothing gets corrected
    pub fn none() -> Self {
        Corrections {
            asset_class: BTreeMap::new(),
            placement: BTreeMap::new(),
            notification_date: BTreeMap::new(),
            country: BTreeMap::new(),
            securitisation_name: BTreeMap::new(),
            vehicle_name: BTreeMap::new(),
            isin_overrides: Vec::new(),
            issuer_overrides: Vec::new(),
        }
    }

    /// Load tables from JSON. Sections missing from the file keep the built-in values.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read corrections file: {:?}", path.as_ref()))?;

        let corrections: Corrections =
            serde_json::from_str(&content).context("Failed to parse corrections JSON")?;

        Ok(corrections)
    }

    /// Lower-case + trim, then apply the asset-class table
    pub fn fix_asset_class(&self, raw: &str) -> String {
        let cleaned = raw.trim().to_lowercase();
        self.asset_class.get(&cleaned).cloned().unwrap_or(cleaned)
    }

    pub fn fix_placement(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        self.placement
            .get(trimmed)
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }

    pub fn fix_date(&self, raw: &str) -> Option<NaiveDate> {
        self.notification_date.get(raw.trim()).copied()
    }

    pub fn fix_country<'a>(&'a self, token: &'a str) -> &'a str {
        self.country.get(token).map(String::as_str).unwrap_or(token)
    }

    pub fn fix_securitisation_name(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        self.securitisation_name
            .get(trimmed)
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }

    pub fn fix_vehicle_name(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        self.vehicle_name
            .get(trimmed)
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }

    pub fn isin_override(&self, isin: &str) -> Option<&IsinOverride> {
        self.isin_overrides.iter().find(|o| o.isin == isin)
    }

    pub fn issuer_override(&self, lei: &str) -> Option<&IssuerOverride> {
        self.issuer_overrides.iter().find(|o| o.lei == lei)
    }
}

impl Default for Corrections {
    fn default() -> Self {
        Self::builtin()
    }
}

// ============================================================================
// TESTS
// ============================================================================
