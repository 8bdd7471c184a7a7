// 🪗 Denormalizer - one row per value of a Combo-valued column
//
// Counting by a column that can hold a Combo must flatten first, otherwise
// "FR / DE" counts as its own country and neither FR nor DE is counted.
//
//   flatten([{usi: A, oc: FR / DE}], OriginatorCountry)
//     → [{usi: None, oc: DE}, {usi: None, oc: FR}]
//
// Expanded copies lose the natural key: they exist for counting only.

use crate::combo::Cell;
use crate::record::{Column, Record};
use std::collections::BTreeMap;

/// Replace every record holding a Combo in `column` by one record per member.
/// Records with a scalar or null in `column` pass through untouched. Output is
/// stable-sorted by notification date (undated records last).
pub fn flatten(records: Vec<Record>, column: Column) -> Vec<Record> {
    let mut out = Vec::with_capacity(records.len());

    for record in records {
        match record.cell(column) {
            Some(Cell::Multi(combo)) => {
                let values: Vec<String> = combo.iter().map(str::to_string).collect();
                for value in values {
                    let mut copy = record.clone();
                    copy.usi = None;
                    copy.set_cell(column, Some(Cell::Scalar(value)));
                    out.push(copy);
                }
            }
            _ => out.push(record),
        }
    }

    out.sort_by_key(|r| (r.notification_date.is_none(), r.notification_date));
    out
}

/// Count records per distinct value in `column`. Combo cells count once per
/// member, so this equals counting over `flatten(records, column)`.
pub fn count_by(records: &[Record], column: Column) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        if let Some(cell) = record.cell(column) {
            for value in cell.iter() {
                *counts.entry(value.to_string()).or_insert(0) += 1;
            }
        }
    }
    counts
}

// ============================================================================
// TESTS
// ============================================================================
