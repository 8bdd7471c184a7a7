// 🔗 Cross-Reference Matcher - copy vehicle (FVC) fields onto records
//
// Strategies, tried in order:
//   1. Exact: every ISIN on the record resolves through ISIN → vehicle ID
//   2. Approximate: unique hit on the normalized-name key
// Private securitisations are exempt. When a multi-ISIN record resolves only
// partly, nothing is copied: missing data is preferred over a guess.

use crate::audit::{AuditKind, AuditLog};
use crate::combo::Cell;
use crate::error::MatchError;
use crate::record::{Record, VehicleFields, VehicleMatch};
use crate::vehicle::{VehicleEntity, VehicleRegister};
use tracing::debug;

/// Result of looking up every ISIN of one record
#[derive(Debug, Default)]
pub struct IsinLookup<'a> {
    pub resolved: Vec<&'a VehicleEntity>,
    pub unresolved: Vec<String>,
    pub ambiguous: Vec<MatchError>,
}

impl IsinLookup<'_> {
    pub fn all_resolved(&self) -> bool {
        !self.resolved.is_empty() && self.unresolved.is_empty() && self.ambiguous.is_empty()
    }

    pub fn none_resolved(&self) -> bool {
        self.resolved.is_empty()
    }
}

pub fn lookup_isins<'a>(isins: &[&str], register: &'a VehicleRegister) -> IsinLookup<'a> {
    let mut lookup = IsinLookup::default();
    for isin in isins {
        match register.by_isin(isin) {
            Ok(Some(vehicle)) => lookup.resolved.push(vehicle),
            Ok(None) => lookup.unresolved.push(isin.to_string()),
            Err(e) => lookup.ambiguous.push(e),
        }
    }
    lookup
}

/// Per-field merge: agreeing values stay scalar, disagreement becomes a Combo
pub fn merge_fields(vehicles: &[&VehicleEntity]) -> VehicleFields {
    fn field<F>(vehicles: &[&VehicleEntity], get: F) -> Option<Cell>
    where
        F: Fn(&VehicleEntity) -> Option<&String>,
    {
        Cell::from_values(vehicles.iter().filter_map(|v| get(v).cloned()))
    }

    VehicleFields {
        country_of_residence: field(vehicles, |v| v.country_of_residence.as_ref()),
        lei: field(vehicles, |v| v.lei.as_ref()),
        name: field(vehicles, |v| v.name.as_ref()),
        address: field(vehicles, |v| v.address.as_ref()),
        nature_of_securitisation: field(vehicles, |v| v.nature_of_securitisation.as_ref()),
        management_country: field(vehicles, |v| v.management_country.as_ref()),
        management_lei: field(vehicles, |v| v.management_lei.as_ref()),
        management_name: field(vehicles, |v| v.management_name.as_ref()),
    }
}

/// Match one record against the vehicle register
pub fn match_record(mut record: Record, register: &VehicleRegister, audit: &mut AuditLog) -> Record {
    if record.is_private() {
        record.vehicle = VehicleFields::default();
        record.vehicle_match = VehicleMatch::Exempt;
        return record;
    }

    let isins = record.isins();
    let lookup = lookup_isins(&isins, register);

    for err in &lookup.ambiguous {
        let MatchError::Ambiguous { key, candidates } = err;
        audit.record(
            record.usi(),
            AuditKind::AmbiguousMatch {
                key: key.clone(),
                candidates: candidates.clone(),
            },
        );
    }

    let (vehicle, how) = if lookup.all_resolved() {
        (merge_fields(&lookup.resolved), VehicleMatch::Exact)
    } else if !lookup.none_resolved() {
        let mut unresolved = lookup.unresolved.clone();
        unresolved.extend(lookup.ambiguous.iter().map(|MatchError::Ambiguous { key, .. }| key.clone()));
        audit.record(record.usi(), AuditKind::PartialVehicleMatch { unresolved });
        (VehicleFields::default(), VehicleMatch::Unmatched)
    } else if !lookup.ambiguous.is_empty() {
        // An ISIN pointing at several vehicles is not retried by name
        (VehicleFields::default(), VehicleMatch::Ambiguous)
    } else {
        match_by_name(&record, register, audit)
    };

    debug!(usi = record.usi().unwrap_or("-"), outcome = how.as_str(), "vehicle match");
    record.vehicle = vehicle;
    record.vehicle_match = how;
    record
}

fn match_by_name(
    record: &Record,
    register: &VehicleRegister,
    audit: &mut AuditLog,
) -> (VehicleFields, VehicleMatch) {
    let Some(key) = record.normalized_name.as_deref().filter(|k| !k.is_empty()) else {
        return (VehicleFields::default(), VehicleMatch::Unmatched);
    };

    match register.by_normalized_name(key) {
        Ok(Some(vehicle)) => (merge_fields(&[vehicle]), VehicleMatch::Approximate),
        Ok(None) => (VehicleFields::default(), VehicleMatch::Unmatched),
        Err(MatchError::Ambiguous { key, candidates }) => {
            audit.record(record.usi(), AuditKind::AmbiguousMatch { key, candidates });
            (VehicleFields::default(), VehicleMatch::Ambiguous)
        }
    }
}

pub fn match_all(records: Vec<Record>, register: &VehicleRegister, audit: &mut AuditLog) -> Vec<Record> {
    records
        .into_iter()
        .map(|r| match_record(r, register, audit))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corrections::Corrections;
    use crate::record::Placement;

    fn vehicle(id: &str, name: &str, country: &str, lei: &str) -> VehicleEntity {
        let mut v = VehicleEntity::new(id, name);
        v.country_of_residence = Some(country.to_string());
        v.lei = Some(lei.to_string());
        v
    }

    fn register() -> VehicleRegister {
        VehicleRegister::from_parts(
            vec![
                vehicle("A", "Alpha Funding DAC", "IE", "LEI-A"),
                vehicle("B", "Beta Finance B.V.", "NL", "LEI-B"),
                vehicle("C", "Gamma Auto S.A.", "IE", "LEI-C"),
                vehicle("D", "Gamma Auto S.r.l.", "IT", "LEI-D"),
            ],
            vec![
                ("XS0000000001".to_string(), "A".to_string()),
                ("XS0000000002".to_string(), "B".to_string()),
                ("XS0000000003".to_string(), "A".to_string()),
                ("XS0000000009".to_string(), "A".to_string()),
                ("XS0000000009".to_string(), "B".to_string()),
            ],
            &Corrections::none(),
        )
    }

    fn public_record(isins: &[&str], normalized_name: Option<&str>) -> Record {
        Record {
            usi: Some("USI-1".to_string()),
            placement: Some(Placement::Public),
            isin: Cell::from_values(isins.iter().copied()),
            normalized_name: normalized_name.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_isin_exact() {
        let mut audit = AuditLog::new();
        let r = match_record(public_record(&["XS0000000002"], None), &register(), &mut audit);

        assert_eq!(r.vehicle_match, VehicleMatch::Exact);
        assert_eq!(r.vehicle.country_of_residence, Some(Cell::scalar("NL")));
        assert_eq!(r.vehicle.lei, Some(Cell::scalar("LEI-B")));
        assert_eq!(r.vehicle.address, None);
        assert!(audit.is_empty());
    }

    #[test]
    fn test_multi_isin_disagreement_becomes_combo() {
        let mut audit = AuditLog::new();
        let r = match_record(
            public_record(&["XS0000000001", "XS0000000002"], None),
            &register(),
            &mut audit,
        );

        assert_eq!(r.vehicle_match, VehicleMatch::Exact);
        assert_eq!(r.vehicle.country_of_residence, Cell::from_values(["IE", "NL"]));
        assert!(r.vehicle.lei.as_ref().unwrap().is_multi());
    }

    #[test]
    fn test_multi_isin_agreement_stays_scalar() {
        let mut audit = AuditLog::new();
        let r = match_record(
            public_record(&["XS0000000001", "XS0000000003"], None),
            &register(),
            &mut audit,
        );
        assert_eq!(r.vehicle.lei, Some(Cell::scalar("LEI-A")));
    }

    #[test]
    fn test_partial_resolution_leaves_fields_unset() {
        let mut audit = AuditLog::new();
        let r = match_record(
            public_record(&["XS0000000001", "XS9999999999"], Some("beta finance")),
            &register(),
            &mut audit,
        );

        assert!(r.vehicle.is_empty());
        assert_eq!(r.vehicle_match, VehicleMatch::Unmatched);
        assert_eq!(audit.counts()["partial_vehicle_match"], 1);
    }

    #[test]
    fn test_name_fallback_is_approximate() {
        let mut audit = AuditLog::new();
        let r = match_record(
            public_record(&["XS9999999999"], Some("beta finance")),
            &register(),
            &mut audit,
        );

        assert_eq!(r.vehicle_match, VehicleMatch::Approximate);
        assert_eq!(r.vehicle.name, Some(Cell::scalar("Beta Finance B.V.")));
    }

    #[test]
    fn test_ambiguous_name_is_distinct_from_no_match() {
        let reg = register();
        let mut audit = AuditLog::new();

        let ambiguous = match_record(public_record(&[], Some("gamma auto")), &reg, &mut audit);
        assert_eq!(ambiguous.vehicle_match, VehicleMatch::Ambiguous);
        assert!(ambiguous.vehicle.is_empty());
        assert_eq!(audit.counts()["ambiguous_match"], 1);

        let none = match_record(public_record(&[], Some("delta")), &reg, &mut audit);
        assert_eq!(none.vehicle_match, VehicleMatch::Unmatched);
        assert_eq!(audit.len(), 1);
    }

    #[test]
    fn test_isin_mapped_to_two_vehicles_is_ambiguous() {
        let mut audit = AuditLog::new();
        let r = match_record(
            public_record(&["XS0000000009"], Some("beta finance")),
            &register(),
            &mut audit,
        );

        assert_eq!(r.vehicle_match, VehicleMatch::Ambiguous);
        assert!(r.vehicle.is_empty());
        assert_eq!(audit.counts()["ambiguous_match"], 1);
    }

    #[test]
    fn test_private_records_exempt() {
        let mut record = public_record(&["XS0000000001"], Some("alpha funding"));
        record.placement = Some(Placement::Private);

        let mut audit = AuditLog::new();
        let r = match_record(record, &register(), &mut audit);
        assert_eq!(r.vehicle_match, VehicleMatch::Exempt);
        assert!(r.vehicle.is_empty());
    }
}
