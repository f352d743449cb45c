use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{fmt_date, fmt_time, parse_date, parse_decimal, parse_time, parse_timestamp};
use crate::models::{
    Booking, BookingAddon, BookingCancellation, BookingReschedule, BookingStatus,
    CancellationReason, TimeSlot,
};

// ── Bookings ──

pub struct NewBooking<'a> {
    pub user_id: &'a str,
    pub service_id: i64,
    pub therapist_id: i64,
    pub booking_date: NaiveDate,
    pub booking_time: NaiveTime,
    pub end_time: NaiveTime,
    pub total_amount: Decimal,
    pub notes: &'a str,
}

const BOOKING_COLUMNS: &str = "id, user_id, service_id, therapist_id, booking_date, booking_time, \
     end_time, status, total_amount, notes, created_at, updated_at";

/// Inserts a pending booking. A taken (therapist, date, time) surfaces as a
/// constraint violation from the unique index.
pub fn insert_booking(conn: &Connection, new: &NewBooking) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO bookings (user_id, service_id, therapist_id, booking_date, booking_time, end_time, total_amount, notes) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            new.user_id,
            new.service_id,
            new.therapist_id,
            fmt_date(new.booking_date),
            fmt_time(new.booking_time),
            fmt_time(new.end_time),
            new.total_amount.to_string(),
            new.notes,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_booking(conn: &Connection, id: i64) -> anyhow::Result<Option<Booking>> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1");
    let result = conn
        .query_row(&sql, params![id], |row| Ok(parse_booking_row(row)))
        .optional()?;
    result.transpose()
}

pub fn list_user_bookings(conn: &Connection, user_id: &str) -> anyhow::Result<Vec<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE user_id = ?1 \
         ORDER BY booking_date DESC, booking_time DESC"
    );
    collect_bookings(conn, &sql, params![user_id])
}

/// Bookings still holding a slot (pending or confirmed) for one therapist/day.
pub fn active_bookings_on(
    conn: &Connection,
    therapist_id: i64,
    date: NaiveDate,
) -> anyhow::Result<Vec<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings \
         WHERE therapist_id = ?1 AND booking_date = ?2 AND status IN ('pending', 'confirmed') \
         ORDER BY booking_time"
    );
    collect_bookings(conn, &sql, params![therapist_id, fmt_date(date)])
}

/// Active bookings for a therapist between two dates, inclusive.
pub fn therapist_schedule(
    conn: &Connection,
    therapist_id: i64,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<Vec<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings \
         WHERE therapist_id = ?1 AND booking_date BETWEEN ?2 AND ?3 \
         AND status IN ('pending', 'confirmed') \
         ORDER BY booking_date, booking_time"
    );
    collect_bookings(
        conn,
        &sql,
        params![therapist_id, fmt_date(start), fmt_date(end)],
    )
}

/// Moves a booking from `from` to `to` only if it is still in `from`.
pub fn transition_booking(
    conn: &Connection,
    id: i64,
    from: BookingStatus,
    to: BookingStatus,
) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE bookings SET status = ?1, updated_at = datetime('now') WHERE id = ?2 AND status = ?3",
        params![to.as_str(), id, from.as_str()],
    )?;
    Ok(changed > 0)
}

fn collect_bookings(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, |row| Ok(parse_booking_row(row)))?;

    let mut bookings = Vec::new();
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let booking_date: String = row.get(4)?;
    let booking_time: String = row.get(5)?;
    let end_time: String = row.get(6)?;
    let status: String = row.get(7)?;
    let total_amount: String = row.get(8)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(Booking {
        id: row.get(0)?,
        user_id: row.get(1)?,
        service_id: row.get(2)?,
        therapist_id: row.get(3)?,
        booking_date: parse_date(&booking_date)?,
        booking_time: parse_time(&booking_time)?,
        end_time: parse_time(&end_time)?,
        status: BookingStatus::parse(&status),
        total_amount: parse_decimal(&total_amount)?,
        notes: row.get(9)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

// ── Booking add-ons ──

pub fn insert_booking_addon(
    conn: &Connection,
    booking_id: i64,
    addon: &BookingAddon,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO booking_addons (booking_id, addon_id, quantity, price) VALUES (?1, ?2, ?3, ?4)",
        params![booking_id, addon.addon_id, addon.quantity, addon.price.to_string()],
    )?;
    Ok(())
}

pub fn list_booking_addons(conn: &Connection, booking_id: i64) -> anyhow::Result<Vec<BookingAddon>> {
    let mut stmt = conn.prepare(
        "SELECT ba.addon_id, sa.name, ba.quantity, ba.price \
         FROM booking_addons ba JOIN service_addons sa ON sa.id = ba.addon_id \
         WHERE ba.booking_id = ?1 ORDER BY ba.id",
    )?;
    let rows = stmt.query_map(params![booking_id], |row| Ok(parse_booking_addon_row(row)))?;

    let mut addons = Vec::new();
    for row in rows {
        addons.push(row??);
    }
    Ok(addons)
}

fn parse_booking_addon_row(row: &rusqlite::Row) -> anyhow::Result<BookingAddon> {
    let price: String = row.get(3)?;
    Ok(BookingAddon {
        addon_id: row.get(0)?,
        name: row.get(1)?,
        quantity: row.get(2)?,
        price: parse_decimal(&price)?,
    })
}

// ── Manual time slots ──

pub fn insert_time_slot(
    conn: &Connection,
    therapist_id: i64,
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    is_blocked: bool,
) -> anyhow::Result<TimeSlot> {
    conn.execute(
        "INSERT INTO time_slots (therapist_id, date, start_time, end_time, is_available, is_blocked) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(therapist_id, date, start_time) DO UPDATE SET \
           end_time = excluded.end_time, is_available = excluded.is_available, is_blocked = excluded.is_blocked",
        params![
            therapist_id,
            fmt_date(date),
            fmt_time(start_time),
            fmt_time(end_time),
            !is_blocked,
            is_blocked,
        ],
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM time_slots WHERE therapist_id = ?1 AND date = ?2 AND start_time = ?3",
        params![therapist_id, fmt_date(date), fmt_time(start_time)],
        |row| row.get(0),
    )?;
    Ok(TimeSlot {
        id,
        therapist_id,
        date,
        start_time,
        end_time,
        is_available: !is_blocked,
        is_blocked,
    })
}

pub fn blocked_slots_on(
    conn: &Connection,
    therapist_id: i64,
    date: NaiveDate,
) -> anyhow::Result<Vec<TimeSlot>> {
    let mut stmt = conn.prepare(
        "SELECT id, therapist_id, date, start_time, end_time, is_available, is_blocked \
         FROM time_slots WHERE therapist_id = ?1 AND date = ?2 AND is_blocked = 1 \
         ORDER BY start_time",
    )?;
    let rows = stmt.query_map(params![therapist_id, fmt_date(date)], |row| {
        Ok(parse_time_slot_row(row))
    })?;

    let mut slots = Vec::new();
    for row in rows {
        slots.push(row??);
    }
    Ok(slots)
}

fn parse_time_slot_row(row: &rusqlite::Row) -> anyhow::Result<TimeSlot> {
    let date: String = row.get(2)?;
    let start: String = row.get(3)?;
    let end: String = row.get(4)?;
    Ok(TimeSlot {
        id: row.get(0)?,
        therapist_id: row.get(1)?,
        date: parse_date(&date)?,
        start_time: parse_time(&start)?,
        end_time: parse_time(&end)?,
        is_available: row.get(5)?,
        is_blocked: row.get(6)?,
    })
}

// ── Cancellations & reschedules ──

pub fn insert_cancellation(
    conn: &Connection,
    booking_id: i64,
    reason: CancellationReason,
    description: &str,
    cancelled_by: &str,
    refund_amount: Decimal,
) -> anyhow::Result<BookingCancellation> {
    conn.execute(
        "INSERT INTO booking_cancellations (booking_id, reason, description, cancelled_by, refund_amount) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            booking_id,
            reason.as_str(),
            description,
            cancelled_by,
            refund_amount.to_string(),
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_cancellation(conn, booking_id)?
        .ok_or_else(|| anyhow::anyhow!("cancellation {id} vanished after insert"))
}

pub fn get_cancellation(
    conn: &Connection,
    booking_id: i64,
) -> anyhow::Result<Option<BookingCancellation>> {
    let result = conn
        .query_row(
            "SELECT id, booking_id, reason, description, cancelled_by, refund_amount, refund_processed, created_at \
             FROM booking_cancellations WHERE booking_id = ?1",
            params![booking_id],
            |row| Ok(parse_cancellation_row(row)),
        )
        .optional()?;
    result.transpose()
}

fn parse_cancellation_row(row: &rusqlite::Row) -> anyhow::Result<BookingCancellation> {
    let reason: String = row.get(2)?;
    let refund_amount: String = row.get(5)?;
    let created_at: String = row.get(7)?;
    Ok(BookingCancellation {
        id: row.get(0)?,
        booking_id: row.get(1)?,
        reason: CancellationReason::parse(&reason),
        description: row.get(3)?,
        cancelled_by: row.get(4)?,
        refund_amount: parse_decimal(&refund_amount)?,
        refund_processed: row.get(6)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

pub fn insert_reschedule(
    conn: &Connection,
    booking_id: i64,
    new_date: NaiveDate,
    new_time: NaiveTime,
    new_therapist_id: Option<i64>,
    reason: &str,
    requested_by: &str,
) -> anyhow::Result<BookingReschedule> {
    conn.execute(
        "INSERT INTO booking_reschedules (booking_id, new_date, new_time, new_therapist_id, reason, requested_by) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            booking_id,
            fmt_date(new_date),
            fmt_time(new_time),
            new_therapist_id,
            reason,
            requested_by,
        ],
    )?;
    let id = conn.last_insert_rowid();
    let created_at: String = conn.query_row(
        "SELECT created_at FROM booking_reschedules WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(BookingReschedule {
        id,
        booking_id,
        new_date,
        new_time,
        new_therapist_id,
        reason: reason.to_string(),
        requested_by: requested_by.to_string(),
        is_approved: false,
        created_at: parse_timestamp(&created_at)?,
    })
}

pub fn count_reschedules(conn: &Connection, booking_id: i64) -> anyhow::Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM booking_reschedules WHERE booking_id = ?1",
        params![booking_id],
        |row| row.get(0),
    )?)
}

// ── Stats ──

#[derive(Debug, Default, Serialize)]
pub struct BookingStats {
    pub total_bookings: i64,
    pub by_status: BTreeMap<String, i64>,
    pub total_spent: Decimal,
}

/// Counts per status and money spent on completed bookings. `None` covers every user.
pub fn booking_stats(conn: &Connection, user_id: Option<&str>) -> anyhow::Result<BookingStats> {
    let mut stmt = conn.prepare(
        "SELECT status, total_amount FROM bookings WHERE ?1 IS NULL OR user_id = ?1",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut stats = BookingStats::default();
    for row in rows {
        let (status, amount) = row?;
        stats.total_bookings += 1;
        if BookingStatus::parse(&status) == BookingStatus::Completed {
            stats.total_spent += parse_decimal(&amount)?;
        }
        *stats.by_status.entry(status).or_insert(0) += 1;
    }
    Ok(stats)
}
