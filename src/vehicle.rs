// 🏦 Vehicle Register - financial vehicle corporations (FVCs)
//
// Two related tables: vehicle attributes keyed by internal ID, and an
// ISIN → vehicle ID mapping. Built once per run, then shared read-only.
//
// Any lookup that must be unique but finds several candidates returns
// `MatchError::Ambiguous`; "not found" is `Ok(None)`.

use crate::corrections::Corrections;
use crate::error::MatchError;
use crate::normalize::NameNormalizer;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::info;

// ============================================================================
// VEHICLE ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleEntity {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Country of residence", default)]
    pub country_of_residence: Option<String>,

    #[serde(rename = "LEI", default)]
    pub lei: Option<String>,

    #[serde(rename = "Name", default)]
    pub name: Option<String>,

    #[serde(rename = "Address", default)]
    pub address: Option<String>,

    #[serde(rename = "Nature of securitisation", default)]
    pub nature_of_securitisation: Option<String>,

    #[serde(rename = "Management company country of residence", default)]
    pub management_country: Option<String>,

    #[serde(rename = "Management company LEI", default)]
    pub management_lei: Option<String>,

    #[serde(rename = "Management company name", default)]
    pub management_name: Option<String>,

    /// Derived from `name` after the vehicle-name correction table
    #[serde(skip)]
    pub normalized_name: Option<String>,
}

impl VehicleEntity {
    pub fn new(id: &str, name: &str) -> Self {
        VehicleEntity {
            id: id.to_string(),
            country_of_residence: None,
            lei: None,
            name: Some(name.to_string()),
            address: None,
            nature_of_securitisation: None,
            management_country: None,
            management_lei: None,
            management_name: None,
            normalized_name: None,
        }
    }

    /// Trim every text field; blank becomes None
    fn tidy(mut self) -> Self {
        for field in [
            &mut self.country_of_residence,
            &mut self.lei,
            &mut self.name,
            &mut self.address,
            &mut self.nature_of_securitisation,
            &mut self.management_country,
            &mut self.management_lei,
            &mut self.management_name,
        ] {
            *field = field
                .take()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
        }
        self.id = self.id.trim().to_string();
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
struct IsinRow {
    #[serde(rename = "ISIN")]
    isin: String,

    #[serde(rename = "ID")]
    id: String,
}

// ============================================================================
// VEHICLE REGISTER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct VehicleRegister {
    vehicles: Vec<VehicleEntity>,
    by_id: HashMap<String, Vec<usize>>,
    by_name: HashMap<String, Vec<usize>>,
    /// ISIN → distinct vehicle IDs
    isin_ids: HashMap<String, Vec<String>>,
}

impl VehicleRegister {
    /// Load both tables from CSV
    pub fn load_csv(vehicles: &Path, isins: &Path, corrections: &Corrections) -> Result<Self> {
        let vehicle_file = std::fs::File::open(vehicles)
            .with_context(|| format!("Failed to open vehicle table: {}", vehicles.display()))?;
        let isin_file = std::fs::File::open(isins)
            .with_context(|| format!("Failed to open ISIN table: {}", isins.display()))?;

        let register = Self::from_readers(vehicle_file, isin_file, corrections)?;
        info!(
            "Loaded {} vehicles and {} ISIN mappings",
            register.vehicles.len(),
            register.isin_ids.len()
        );
        Ok(register)
    }

    pub fn from_readers<V: Read, I: Read>(
        vehicles: V,
        isins: I,
        corrections: &Corrections,
    ) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .flexible(true)
            .from_reader(vehicles);
        let mut entities = Vec::new();
        for (i, result) in rdr.deserialize::<VehicleEntity>().enumerate() {
            let entity =
                result.with_context(|| format!("Failed to parse vehicle table line {}", i + 2))?;
            entities.push(entity);
        }

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(isins);
        let mut mapping = Vec::new();
        for (i, result) in rdr.deserialize::<IsinRow>().enumerate() {
            let row = result.with_context(|| format!("Failed to parse ISIN table line {}", i + 2))?;
            mapping.push((row.isin, row.id));
        }

        Ok(Self::from_parts(entities, mapping, corrections))
    }

    /// Build from in-memory tables; applies vehicle-name corrections and
    /// computes normalized names.
    pub fn from_parts(
        entities: Vec<VehicleEntity>,
        isin_to_id: Vec<(String, String)>,
        corrections: &Corrections,
    ) -> Self {
        let normalizer = NameNormalizer::new();
        let mut register = VehicleRegister::default();

        for entity in entities {
            let mut entity = entity.tidy();
            entity.name = entity.name.map(|n| corrections.fix_vehicle_name(&n));
            entity.normalized_name = entity.name.as_deref().map(|n| normalizer.normalize(n));

            let index = register.vehicles.len();
            register
                .by_id
                .entry(entity.id.clone())
                .or_default()
                .push(index);
            if let Some(key) = &entity.normalized_name {
                register.by_name.entry(key.clone()).or_default().push(index);
            }
            register.vehicles.push(entity);
        }

        for (isin, id) in isin_to_id {
            let ids = register.isin_ids.entry(isin.trim().to_string()).or_default();
            let id = id.trim().to_string();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        register
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    pub fn vehicles(&self) -> &[VehicleEntity] {
        &self.vehicles
    }

    /// Vehicle ID for an ISIN. Several distinct IDs is ambiguous.
    pub fn id_for_isin(&self, isin: &str) -> Result<Option<&str>, MatchError> {
        match self.isin_ids.get(isin).map(Vec::as_slice) {
            None | Some([]) => Ok(None),
            Some([id]) => Ok(Some(id.as_str())),
            Some(ids) => Err(MatchError::Ambiguous {
                key: isin.to_string(),
                candidates: ids.to_vec(),
            }),
        }
    }

    pub fn by_id(&self, id: &str) -> Result<Option<&VehicleEntity>, MatchError> {
        self.unique(id, self.by_id.get(id))
    }

    pub fn by_isin(&self, isin: &str) -> Result<Option<&VehicleEntity>, MatchError> {
        match self.id_for_isin(isin)? {
            Some(id) => self.by_id(id),
            None => Ok(None),
        }
    }

    /// Approximate lookup through the normalized-name key
    pub fn by_normalized_name(&self, key: &str) -> Result<Option<&VehicleEntity>, MatchError> {
        self.unique(key, self.by_name.get(key))
    }

    fn unique(
        &self,
        key: &str,
        hits: Option<&Vec<usize>>,
    ) -> Result<Option<&VehicleEntity>, MatchError> {
        match hits.map(Vec::as_slice) {
            None | Some([]) => Ok(None),
            Some([i]) => Ok(self.vehicles.get(*i)),
            Some(many) => Err(MatchError::Ambiguous {
                key: key.to_string(),
                candidates: many
                    .iter()
                    .filter_map(|i| self.vehicles.get(*i))
                    .map(|v| v.id.clone())
                    .collect(),
            }),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
