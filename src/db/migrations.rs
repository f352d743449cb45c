use anyhow::Context;
use rusqlite::{params, Connection};

/// Schema files, applied in order and recorded by name in `_migrations`.
pub const MIGRATIONS: &[(&str, &str)] = &[
    ("001_catalog.sql", include_str!("../../migrations/001_catalog.sql")),
    ("002_services.sql", include_str!("../../migrations/002_services.sql")),
    ("003_bookings.sql", include_str!("../../migrations/003_bookings.sql")),
    ("004_cart_orders.sql", include_str!("../../migrations/004_cart_orders.sql")),
    ("005_payments.sql", include_str!("../../migrations/005_payments.sql")),
];

pub fn run_migrations(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .context("failed to create migrations table")?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .context("failed to check migration status")?;

        if already_applied {
            continue;
        }

        conn.execute_batch(sql)
            .with_context(|| format!("failed to apply migration: {name}"))?;

        conn.execute("INSERT INTO _migrations (name) VALUES (?1)", params![name])
            .with_context(|| format!("failed to record migration: {name}"))?;

        tracing::info!("applied migration: {name}");
    }

    Ok(())
}
