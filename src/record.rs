// 🗂️ Record Model - one securitisation notification
//
// Raw rows come in as `RawRecord` (strings straight from the register).
// Cleanup turns them into `Record`: typed dates, a Placement flag, and `Cell`
// values wherever a column can hold more than one value.

use crate::combo::Cell;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// RAW ROW (primary register, as read)
// ============================================================================

/// One row of the primary register. Unknown columns are ignored.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawRecord {
    #[serde(rename = "Unique Securitisation Identifier")]
    pub usi: String,

    #[serde(rename = "Notification date to ESMA", default)]
    pub notification_date: String,

    #[serde(rename = "Private or Public", default)]
    pub placement: String,

    #[serde(rename = "Securitisation Name", default)]
    pub name: String,

    #[serde(rename = "Underlying assets", default)]
    pub underlying_assets: String,

    #[serde(rename = "Originator Country", default)]
    pub originator_country: String,

    #[serde(rename = "ISIN code", default)]
    pub isin: String,
}

// ============================================================================
// PLACEMENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Placement {
    Public,
    Private,
    /// Anything the correction table did not map to Public/Private
    Other(String),
}

impl Placement {
    pub fn parse(raw: &str) -> Option<Placement> {
        match raw.trim() {
            "" => None,
            "Public" => Some(Placement::Public),
            "Private" => Some(Placement::Private),
            other => Some(Placement::Other(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Placement::Public => "Public",
            Placement::Private => "Private",
            Placement::Other(s) => s,
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MATCH PROVENANCE
// ============================================================================

/// How the vehicle fields of a record were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VehicleMatch {
    /// Matching has not run on this record
    #[default]
    NotAttempted,
    /// Private securitisations are never cross-referenced
    Exempt,
    /// Resolved through ISIN → vehicle ID
    Exact,
    /// Resolved through the normalized-name key (best effort)
    Approximate,
    /// Several vehicles shared the normalized name; nothing copied
    Ambiguous,
    /// Nothing matched
    Unmatched,
}

impl VehicleMatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleMatch::NotAttempted => "not_attempted",
            VehicleMatch::Exempt => "exempt",
            VehicleMatch::Exact => "exact",
            VehicleMatch::Approximate => "approximate",
            VehicleMatch::Ambiguous => "ambiguous",
            VehicleMatch::Unmatched => "unmatched",
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, VehicleMatch::Exact | VehicleMatch::Approximate)
    }
}

// ============================================================================
// FIELD GROUPS
// ============================================================================

/// Vehicle (FVC) attributes copied from the vehicle register
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleFields {
    pub country_of_residence: Option<Cell>,
    pub lei: Option<Cell>,
    pub name: Option<Cell>,
    pub address: Option<Cell>,
    pub nature_of_securitisation: Option<Cell>,
    pub management_country: Option<Cell>,
    pub management_lei: Option<Cell>,
    pub management_name: Option<Cell>,
}

impl VehicleFields {
    pub fn is_empty(&self) -> bool {
        *self == VehicleFields::default()
    }
}

/// Issuer attributes joined from reference data + the LEI registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssuerFields {
    pub lei: Option<Cell>,
    pub legal_name: Option<Cell>,
    pub jurisdiction: Option<Cell>,
}

// ============================================================================
// RECORD
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Natural key. Cleared on copies produced by flattening.
    pub usi: Option<String>,
    pub notification_date: Option<NaiveDate>,
    pub placement: Option<Placement>,
    pub name: Option<String>,
    pub normalized_name: Option<String>,
    pub underlying_assets: Option<String>,
    pub originator_country: Option<Cell>,
    pub isin: Option<Cell>,

    /// ISINs that failed validation (still present in `isin`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invalid_isins: Vec<String>,

    pub vehicle: VehicleFields,
    pub vehicle_match: VehicleMatch,
    pub issuer: IssuerFields,

    /// Country of residence came from a company-name search, not a register
    #[serde(default)]
    pub residence_inferred: bool,

    /// Line in the source file (1-based, header excluded)
    pub source_line: usize,
}

impl Record {
    pub fn is_private(&self) -> bool {
        matches!(self.placement, Some(Placement::Private))
    }

    pub fn usi(&self) -> Option<&str> {
        self.usi.as_deref()
    }

    /// All ISINs on the record, in stable order
    pub fn isins(&self) -> Vec<&str> {
        self.isin.as_ref().map(|c| c.iter().collect()).unwrap_or_default()
    }

    pub fn cell(&self, column: Column) -> Option<&Cell> {
        match column {
            Column::OriginatorCountry => self.originator_country.as_ref(),
            Column::Isin => self.isin.as_ref(),
            Column::CountryOfResidence => self.vehicle.country_of_residence.as_ref(),
            Column::VehicleLei => self.vehicle.lei.as_ref(),
            Column::VehicleName => self.vehicle.name.as_ref(),
            Column::ManagementCountry => self.vehicle.management_country.as_ref(),
            Column::IssuerLei => self.issuer.lei.as_ref(),
            Column::IssuerName => self.issuer.legal_name.as_ref(),
            Column::IssuerJurisdiction => self.issuer.jurisdiction.as_ref(),
        }
    }

    pub fn set_cell(&mut self, column: Column, value: Option<Cell>) {
        let slot = match column {
            Column::OriginatorCountry => &mut self.originator_country,
            Column::Isin => &mut self.isin,
            Column::CountryOfResidence => &mut self.vehicle.country_of_residence,
            Column::VehicleLei => &mut self.vehicle.lei,
            Column::VehicleName => &mut self.vehicle.name,
            Column::ManagementCountry => &mut self.vehicle.management_country,
            Column::IssuerLei => &mut self.issuer.lei,
            Column::IssuerName => &mut self.issuer.legal_name,
            Column::IssuerJurisdiction => &mut self.issuer.jurisdiction,
        };
        *slot = value;
    }
}

// ============================================================================
// COLUMNS (Cell-valued fields addressable by name)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    OriginatorCountry,
    Isin,
    CountryOfResidence,
    VehicleLei,
    VehicleName,
    ManagementCountry,
    IssuerLei,
    IssuerName,
    IssuerJurisdiction,
}

impl Column {
    pub const ALL: [Column; 9] = [
        Column::OriginatorCountry,
        Column::Isin,
        Column::CountryOfResidence,
        Column::VehicleLei,
        Column::VehicleName,
        Column::ManagementCountry,
        Column::IssuerLei,
        Column::IssuerName,
        Column::IssuerJurisdiction,
    ];

    /// Header used by the primary register / exports
    pub fn header(&self) -> &'static str {
        match self {
            Column::OriginatorCountry => "Originator Country",
            Column::Isin => "ISIN code",
            Column::CountryOfResidence => "Country of residence",
            Column::VehicleLei => "LEI",
            Column::VehicleName => "Name",
            Column::ManagementCountry => "Management company country of residence",
            Column::IssuerLei => "Issuer LEI",
            Column::IssuerName => "Issuer name",
            Column::IssuerJurisdiction => "Issuer jurisdiction",
        }
    }

    /// Accepts the header or a snake_case name (for the CLI)
    pub fn parse(name: &str) -> Option<Column> {
        let wanted = name.trim().to_lowercase().replace(['_', '-'], " ");
        let compact = wanted.replace(' ', "");
        Column::ALL.into_iter().find(|c| {
            c.header().to_lowercase() == wanted || format!("{:?}", c).to_lowercase() == compact
        })
    }
}
