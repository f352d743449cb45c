pub mod bookings;
pub mod carts;
pub mod catalog;
pub mod coupons;
pub mod migrations;
pub mod orders;
pub mod payments;
pub mod therapists;

use std::str::FromStr;

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{Connection, ErrorCode};
use rust_decimal::Decimal;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

pub fn init_db(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path).context("failed to open database")?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .context("failed to set database pragmas")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// True when `err` came from a UNIQUE/CHECK constraint rejecting the write.
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// `prefix` followed by `len` uppercase hex characters.
pub fn new_token(prefix: &str, len: usize) -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    format!("{prefix}{}", &raw[..len.min(raw.len())])
}

pub fn fmt_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn fmt_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub(crate) fn parse_timestamp(s: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .with_context(|| format!("bad timestamp in database: {s}"))
}

pub(crate) fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).with_context(|| format!("bad date in database: {s}"))
}

pub(crate) fn parse_time(s: &str) -> anyhow::Result<NaiveTime> {
    crate::models::parse_time(s)
}

pub(crate) fn parse_decimal(s: &str) -> anyhow::Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("bad amount in database: {s}"))
}
