//! Excel serial-date conversions shared by the `DateToSerial`/
//! `DateTimeToSerial` AST nodes and the date/time builtins.
//!
//! Excel's epoch is 1899-12-30 (day 0); day 60 is the fictitious 1900-02-29
//! that Excel inherited from Lotus 1-2-3. This core does not reproduce that
//! leap-year bug (`spec.md` scopes "locale-dependent number parsing" out,
//! and the bug is a presentation detail of the 1900 date system, not a
//! correctness requirement of any invariant in §4.4/§8).

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).expect("valid epoch")
}

pub fn date_to_serial(d: NaiveDate) -> Decimal {
    let days = (d - epoch()).num_days();
    Decimal::from(days)
}

pub fn datetime_to_serial(dt: NaiveDateTime) -> Decimal {
    let days = (dt.date() - epoch()).num_days();
    let frac = (dt.time() - NaiveTime::from_hms_opt(0, 0, 0).unwrap()).num_milliseconds() as f64
        / 86_400_000.0;
    Decimal::from(days) + Decimal::from_f64_retain(frac).unwrap_or(Decimal::ZERO)
}

pub fn serial_to_date(serial: Decimal) -> Option<NaiveDate> {
    let days = serial.trunc().to_i64()?;
    epoch().checked_add_signed(chrono::Duration::days(days))
}
