// 🗄️ Persistence - reconciled records and the audit trail in SQLite (WAL)
//
// Records are keyed by USI: a record whose content changed since the last run
// replaces the stored row, an unchanged one is left alone. Records without a
// USI fall back to a content fingerprint. Each record is stored whole as JSON,
// with a few columns pulled out for querying.

use crate::audit::{AuditEvent, AuditLog};
use crate::record::Record;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::info;

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Records Table
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fingerprint TEXT NOT NULL,
            usi TEXT UNIQUE,
            notification_date TEXT,
            placement TEXT,
            name TEXT,
            vehicle_match TEXT NOT NULL,
            data TEXT NOT NULL,
            run_id TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Audit Events Table
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            run_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            usi TEXT,
            kind TEXT NOT NULL,
            data TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_records_fingerprint
         ON records(fingerprint) WHERE usi IS NULL",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_records_date ON records(notification_date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_run ON audit_events(run_id, kind)",
        [],
    )?;

    Ok(())
}

/// SHA-256 over the record's JSON form
pub fn record_fingerprint(record: &Record) -> Result<String> {
    let json = serde_json::to_string(record).context("Failed to serialize record")?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Outcome of storing one batch of records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Store records, one row per USI. A changed record replaces its stored row.
pub fn insert_records(conn: &Connection, records: &[Record], run_id: &str) -> Result<StoreCounts> {
    let mut counts = StoreCounts::default();

    for record in records {
        let fingerprint = record_fingerprint(record)?;
        let data = serde_json::to_string(record)?;
        let date = record.notification_date.map(|d| d.to_string());
        let placement = record.placement.as_ref().map(|p| p.as_str().to_string());

        if let Some(usi) = &record.usi {
            let stored: Option<String> = conn
                .query_row(
                    "SELECT fingerprint FROM records WHERE usi = ?1",
                    params![usi],
                    |row| row.get(0),
                )
                .optional()?;

            match stored {
                Some(existing) if existing == fingerprint => counts.unchanged += 1,
                Some(_) => {
                    conn.execute(
                        "UPDATE records
                         SET fingerprint = ?1, notification_date = ?2, placement = ?3, name = ?4,
                             vehicle_match = ?5, data = ?6, run_id = ?7
                         WHERE usi = ?8",
                        params![
                            fingerprint,
                            date,
                            placement,
                            record.name,
                            record.vehicle_match.as_str(),
                            data,
                            run_id,
                            usi,
                        ],
                    )?;
                    counts.updated += 1;
                }
                None => {
                    conn.execute(
                        "INSERT INTO records (
                            fingerprint, usi, notification_date, placement, name, vehicle_match, data, run_id
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            fingerprint,
                            usi,
                            date,
                            placement,
                            record.name,
                            record.vehicle_match.as_str(),
                            data,
                            run_id,
                        ],
                    )?;
                    counts.inserted += 1;
                }
            }
            continue;
        }

        let result = conn.execute(
            "INSERT INTO records (
                fingerprint, usi, notification_date, placement, name, vehicle_match, data, run_id
            ) VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                fingerprint,
                date,
                placement,
                record.name,
                record.vehicle_match.as_str(),
                data,
                run_id,
            ],
        );

        match result {
            Ok(_) => counts.inserted += 1,
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                counts.unchanged += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        "Inserted {} records, updated {}, {} unchanged",
        counts.inserted, counts.updated, counts.unchanged
    );
    Ok(counts)
}

pub fn insert_audit_log(conn: &Connection, log: &AuditLog) -> Result<usize> {
    let mut inserted = 0;
    for event in log.events() {
        insert_audit_event(conn, &log.run_id, event)?;
        inserted += 1;
    }
    Ok(inserted)
}

pub fn insert_audit_event(conn: &Connection, run_id: &str, event: &AuditEvent) -> Result<()> {
    let data = serde_json::to_string(&event.kind)?;

    conn.execute(
        "INSERT INTO audit_events (
            event_id, run_id, timestamp, usi, kind, data
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.event_id,
            run_id,
            event.timestamp.to_rfc3339(),
            event.usi,
            event.kind.name(),
            data,
        ],
    )?;

    Ok(())
}

pub fn get_all_records(conn: &Connection) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare("SELECT data FROM records ORDER BY notification_date, id")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    rows.iter()
        .map(|json| serde_json::from_str(json).context("Corrupt record JSON in database"))
        .collect()
}

/// Audit events of one run, oldest first
pub fn get_audit_events(conn: &Connection, run_id: &str) -> Result<Vec<AuditEvent>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, usi, data
         FROM audit_events
         WHERE run_id = ?1
         ORDER BY id",
    )?;

    let rows = stmt
        .query_map(params![run_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(event_id, timestamp, usi, data)| {
            Ok(AuditEvent {
                event_id,
                timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp)
                    .context("Corrupt audit timestamp")?
                    .with_timezone(&chrono::Utc),
                usi,
                kind: serde_json::from_str(&data).context("Corrupt audit event JSON")?,
            })
        })
        .collect()
}

pub fn count_records(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditKind;
    use crate::combo::Cell;
    use crate::flatten::count_by;
    use crate::record::{Column, Placement, VehicleMatch};
    use chrono::NaiveDate;

    /// Helper function to create test records
    fn create_test_record(usi: &str, isins: &[&str]) -> Record {
        Record {
            usi: Some(usi.to_string()),
            notification_date: NaiveDate::from_ymd_opt(2020, 3, 1),
            placement: Some(Placement::Public),
            name: Some("Test Securitisation DAC".to_string()),
            isin: Cell::from_values(isins.iter().copied()),
            vehicle_match: VehicleMatch::Exact,
            ..Default::default()
        }
    }

    #[test]
    fn test_idempotent_insert() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let records = vec![
            create_test_record("USI-1", &["XS2104129486", "XS2104129569"]),
            create_test_record("USI-2", &["US0378331005"]),
        ];

        assert_eq!(insert_records(&conn, &records, "run-1").unwrap().inserted, 2);
        let again = insert_records(&conn, &records, "run-2").unwrap();
        assert_eq!(again, StoreCounts { inserted: 0, updated: 0, unchanged: 2 });
        assert_eq!(count_records(&conn).unwrap(), 2);
    }

    #[test]
    fn test_changed_record_replaces_stored_row() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut record = create_test_record("USI-1", &["XS2104129486"]);
        record.originator_country = Some(Cell::scalar("IE"));
        insert_records(&conn, &[record.clone()], "run-1").unwrap();

        record.issuer.lei = Some(Cell::scalar("635400ABCDEFGHIJKL12"));
        let counts = insert_records(&conn, &[record.clone()], "run-2").unwrap();
        assert_eq!(counts, StoreCounts { inserted: 0, updated: 1, unchanged: 0 });
        assert_eq!(count_records(&conn).unwrap(), 1);

        let stored = get_all_records(&conn).unwrap();
        assert_eq!(count_by(&stored, Column::OriginatorCountry)["IE"], 1);
        assert_eq!(stored, vec![record]);
    }

    #[test]
    fn test_records_without_usi_deduplicated_by_content() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut record = create_test_record("USI-1", &["XS2104129486"]);
        record.usi = None;
        let mut other = record.clone();
        other.name = Some("Other Securitisation DAC".to_string());

        assert_eq!(insert_records(&conn, &[record.clone()], "run-1").unwrap().inserted, 1);
        let counts = insert_records(&conn, &[record, other], "run-2").unwrap();
        assert_eq!(counts, StoreCounts { inserted: 1, updated: 0, unchanged: 1 });
        assert_eq!(count_records(&conn).unwrap(), 2);
    }

    #[test]
    fn test_records_roundtrip_with_combo() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut record = create_test_record("USI-1", &["XS2104129486", "XS2104129569"]);
        record.placement = Some(Placement::Other("Semi".to_string()));
        insert_records(&conn, &[record.clone()], "run").unwrap();

        let stored = get_all_records(&conn).unwrap();
        assert_eq!(stored, vec![record]);
        assert!(stored[0].isin.as_ref().unwrap().is_multi());
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = create_test_record("USI-1", &["XS2104129486"]);
        let mut b = a.clone();
        assert_eq!(record_fingerprint(&a).unwrap(), record_fingerprint(&b).unwrap());
        b.originator_country = Some(Cell::scalar("IE"));
        assert_ne!(record_fingerprint(&a).unwrap(), record_fingerprint(&b).unwrap());
    }

    #[test]
    fn test_audit_log_persisted() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut log = AuditLog::new();
        log.record(
            Some("USI-1"),
            AuditKind::AmbiguousMatch {
                key: "gamma auto".to_string(),
                candidates: vec!["C".to_string(), "D".to_string()],
            },
        );
        log.record(None, AuditKind::UnresolvedIdentifier { isin: "DE000A289QR9".to_string() });

        assert_eq!(insert_audit_log(&conn, &log).unwrap(), 2);
        let events = get_audit_events(&conn, &log.run_id).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].usi.as_deref(), Some("USI-1"));
        assert_eq!(events[0].kind, log.events()[0].kind);
        assert_eq!(events[1].kind.name(), "unresolved_identifier");

        assert!(get_audit_events(&conn, "other-run").unwrap().is_empty());
    }

    #[test]
    fn test_on_disk_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sts.db");
        {
            let conn = Connection::open(&path).unwrap();
            setup_database(&conn).unwrap();
            insert_records(&conn, &[create_test_record("USI-1", &[])], "run").unwrap();
        }
        let conn = Connection::open(&path).unwrap();
        setup_database(&conn).unwrap();
        assert_eq!(count_records(&conn).unwrap(), 1);
    }
}
