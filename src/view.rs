// 📅 Range View - slice reconciled records by notification date

use crate::record::Record;
use chrono::{NaiveDate, Utc};

/// Day before the STS regime started applying (1 January 2019)
pub fn regime_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2018, 12, 31).unwrap_or(NaiveDate::MIN)
}

/// Records notified in `[from, to]`, both ends inclusive.
///
/// `from` defaults to the regime start, `to` to today. Records without a
/// notification date never fall inside a range. Input is not modified.
pub fn between(records: &[Record], from: Option<NaiveDate>, to: Option<NaiveDate>) -> Vec<Record> {
    let from = from.unwrap_or_else(regime_start);
    let to = to.unwrap_or_else(|| Utc::now().date_naive());

    records
        .iter()
        .filter(|r| matches!(r.notification_date, Some(d) if d >= from && d <= to))
        .cloned()
        .collect()
}
