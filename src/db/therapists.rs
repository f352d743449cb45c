use chrono::{NaiveTime, Weekday};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

use super::{fmt_time, parse_decimal, parse_time};
use crate::models::availability::weekday_from_index;
use crate::models::{Service, ServiceAddon, Therapist, TherapistAvailability};

// ── Services ──

pub fn insert_service(
    conn: &Connection,
    name: &str,
    description: &str,
    price: Decimal,
    duration_minutes: i64,
) -> anyhow::Result<Service> {
    conn.execute(
        "INSERT INTO services (name, description, price, duration_minutes) VALUES (?1, ?2, ?3, ?4)",
        params![name, description, price.to_string(), duration_minutes],
    )?;
    Ok(Service {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        description: description.to_string(),
        price,
        duration_minutes,
        is_active: true,
    })
}

pub fn get_service(conn: &Connection, id: i64) -> anyhow::Result<Option<Service>> {
    let result = conn
        .query_row(
            "SELECT id, name, description, price, duration_minutes, is_active FROM services WHERE id = ?1",
            params![id],
            |row| Ok(parse_service_row(row)),
        )
        .optional()?;
    result.transpose()
}

pub fn list_services(conn: &Connection) -> anyhow::Result<Vec<Service>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description, price, duration_minutes, is_active FROM services \
         WHERE is_active = 1 ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| Ok(parse_service_row(row)))?;

    let mut services = Vec::new();
    for row in rows {
        services.push(row??);
    }
    Ok(services)
}

fn parse_service_row(row: &rusqlite::Row) -> anyhow::Result<Service> {
    let price: String = row.get(3)?;
    Ok(Service {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        price: parse_decimal(&price)?,
        duration_minutes: row.get(4)?,
        is_active: row.get(5)?,
    })
}

// ── Add-ons ──

pub fn insert_addon(
    conn: &Connection,
    name: &str,
    description: &str,
    price: Decimal,
    duration_minutes: i64,
) -> anyhow::Result<ServiceAddon> {
    conn.execute(
        "INSERT INTO service_addons (name, description, price, duration_minutes) VALUES (?1, ?2, ?3, ?4)",
        params![name, description, price.to_string(), duration_minutes],
    )?;
    Ok(ServiceAddon {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        description: description.to_string(),
        price,
        duration_minutes,
        is_active: true,
    })
}

pub fn get_addon(conn: &Connection, id: i64) -> anyhow::Result<Option<ServiceAddon>> {
    let result = conn
        .query_row(
            "SELECT id, name, description, price, duration_minutes, is_active FROM service_addons WHERE id = ?1",
            params![id],
            |row| Ok(parse_addon_row(row)),
        )
        .optional()?;
    result.transpose()
}

pub fn list_addons(conn: &Connection) -> anyhow::Result<Vec<ServiceAddon>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description, price, duration_minutes, is_active FROM service_addons \
         WHERE is_active = 1 ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| Ok(parse_addon_row(row)))?;

    let mut addons = Vec::new();
    for row in rows {
        addons.push(row??);
    }
    Ok(addons)
}

fn parse_addon_row(row: &rusqlite::Row) -> anyhow::Result<ServiceAddon> {
    let price: String = row.get(3)?;
    Ok(ServiceAddon {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        price: parse_decimal(&price)?,
        duration_minutes: row.get(4)?,
        is_active: row.get(5)?,
    })
}

// ── Therapists ──

pub fn insert_therapist(conn: &Connection, name: &str, bio: &str) -> anyhow::Result<Therapist> {
    conn.execute(
        "INSERT INTO therapists (name, bio) VALUES (?1, ?2)",
        params![name, bio],
    )?;
    Ok(Therapist {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        bio: bio.to_string(),
        is_available: true,
    })
}

pub fn get_therapist(conn: &Connection, id: i64) -> anyhow::Result<Option<Therapist>> {
    Ok(conn
        .query_row(
            "SELECT id, name, bio, is_available FROM therapists WHERE id = ?1",
            params![id],
            |row| {
                Ok(Therapist {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    bio: row.get(2)?,
                    is_available: row.get(3)?,
                })
            },
        )
        .optional()?)
}

pub fn list_therapists(conn: &Connection) -> anyhow::Result<Vec<Therapist>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, bio, is_available FROM therapists WHERE is_available = 1 ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(Therapist {
            id: row.get(0)?,
            name: row.get(1)?,
            bio: row.get(2)?,
            is_available: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ── Weekly availability ──

pub fn insert_availability(
    conn: &Connection,
    therapist_id: i64,
    day_of_week: Weekday,
    start_time: NaiveTime,
    end_time: NaiveTime,
) -> anyhow::Result<TherapistAvailability> {
    conn.execute(
        "INSERT INTO therapist_availability (therapist_id, day_of_week, start_time, end_time) \
         VALUES (?1, ?2, ?3, ?4)",
        params![
            therapist_id,
            day_of_week.num_days_from_monday(),
            fmt_time(start_time),
            fmt_time(end_time),
        ],
    )?;
    Ok(TherapistAvailability {
        id: conn.last_insert_rowid(),
        therapist_id,
        day_of_week,
        start_time,
        end_time,
        is_active: true,
    })
}

/// All windows for a therapist, active or not.
pub fn list_availability(
    conn: &Connection,
    therapist_id: i64,
) -> anyhow::Result<Vec<TherapistAvailability>> {
    let mut stmt = conn.prepare(
        "SELECT id, therapist_id, day_of_week, start_time, end_time, is_active \
         FROM therapist_availability WHERE therapist_id = ?1 \
         ORDER BY day_of_week, start_time",
    )?;
    let rows = stmt.query_map(params![therapist_id], |row| Ok(parse_availability_row(row)))?;

    let mut windows = Vec::new();
    for row in rows {
        windows.push(row??);
    }
    Ok(windows)
}

fn parse_availability_row(row: &rusqlite::Row) -> anyhow::Result<TherapistAvailability> {
    let day: i64 = row.get(2)?;
    let start: String = row.get(3)?;
    let end: String = row.get(4)?;
    Ok(TherapistAvailability {
        id: row.get(0)?,
        therapist_id: row.get(1)?,
        day_of_week: weekday_from_index(day)?,
        start_time: parse_time(&start)?,
        end_time: parse_time(&end)?,
        is_active: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rust_decimal_macros::dec;

    #[test]
    fn test_availability_roundtrip() {
        let conn = db::init_db(":memory:").unwrap();
        let therapist = insert_therapist(&conn, "Amina", "").unwrap();
        insert_availability(
            &conn,
            therapist.id,
            Weekday::Fri,
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        )
        .unwrap();
        insert_availability(
            &conn,
            therapist.id,
            Weekday::Mon,
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        )
        .unwrap();

        let windows = list_availability(&conn, therapist.id).unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].day_of_week, Weekday::Mon);
        assert_eq!(windows[1].end_time, NaiveTime::from_hms_opt(16, 0, 0).unwrap());
    }

    #[test]
    fn test_duplicate_window_start_rejected() {
        let conn = db::init_db(":memory:").unwrap();
        let therapist = insert_therapist(&conn, "Amina", "").unwrap();
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        insert_availability(&conn, therapist.id, Weekday::Mon, nine, noon).unwrap();
        assert!(insert_availability(&conn, therapist.id, Weekday::Mon, nine, noon).is_err());
    }

    #[test]
    fn test_service_price_survives_storage() {
        let conn = db::init_db(":memory:").unwrap();
        let service = insert_service(&conn, "Deep Tissue", "", dec!(4500.00), 90).unwrap();
        let fetched = get_service(&conn, service.id).unwrap().unwrap();
        assert_eq!(fetched.price, dec!(4500.00));
        assert_eq!(fetched.duration_minutes, 90);
    }
}
