// 📤 Export - reconciled records to CSV, audit trail to JSON
//
// Combo cells are rendered "A / B" (members in stable order). Match provenance
// and the inferred-residence flag travel with every row so downstream counts
// can tell exact matches from heuristic ones.

use crate::audit::AuditLog;
use crate::combo::Cell;
use crate::record::{Column, Record};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

const LEADING_HEADERS: [&str; 5] = [
    "Unique Securitisation Identifier",
    "Notification date to ESMA",
    "Private or Public",
    "Securitisation Name",
    "Underlying assets",
];

const TRAILING_HEADERS: [&str; 9] = [
    "Address",
    "Nature of securitisation",
    "Management company LEI",
    "Management company name",
    "Normalized name",
    "Invalid ISINs",
    "Vehicle match",
    "Residence inferred",
    "Source line",
];

pub fn headers() -> Vec<&'static str> {
    LEADING_HEADERS
        .iter()
        .copied()
        .chain(Column::ALL.iter().map(Column::header))
        .chain(TRAILING_HEADERS.iter().copied())
        .collect()
}

fn render(cell: Option<&Cell>) -> String {
    cell.map(|c| c.to_string()).unwrap_or_default()
}

fn row(record: &Record) -> Vec<String> {
    let mut fields = vec![
        record.usi.clone().unwrap_or_default(),
        record
            .notification_date
            .map(|d| d.to_string())
            .unwrap_or_default(),
        record
            .placement
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_default(),
        record.name.clone().unwrap_or_default(),
        record.underlying_assets.clone().unwrap_or_default(),
    ];

    fields.extend(Column::ALL.iter().map(|c| render(record.cell(*c))));

    fields.extend([
        render(record.vehicle.address.as_ref()),
        render(record.vehicle.nature_of_securitisation.as_ref()),
        render(record.vehicle.management_lei.as_ref()),
        render(record.vehicle.management_name.as_ref()),
        record.normalized_name.clone().unwrap_or_default(),
        record.invalid_isins.join(" "),
        record.vehicle_match.as_str().to_string(),
        record.residence_inferred.to_string(),
        record.source_line.to_string(),
    ]);

    fields
}

pub fn write_records_to<W: Write>(writer: W, records: &[Record]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(headers())?;
    for record in records {
        wtr.write_record(row(record))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_records(path: &Path, records: &[Record]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create export file: {}", path.display()))?;
    write_records_to(BufWriter::new(file), records)
        .with_context(|| format!("Failed to write records to {}", path.display()))?;
    info!("Exported {} records to {}", records.len(), path.display());
    Ok(())
}

pub fn write_audit(path: &Path, log: &AuditLog) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create audit file: {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), log)
        .with_context(|| format!("Failed to write audit log to {}", path.display()))?;
    info!("Exported {} audit events to {}", log.len(), path.display());
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
