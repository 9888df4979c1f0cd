use anyhow::Context;
use rusqlite::Connection;

/// Migrations ship embedded so in-memory databases get the full schema.
/// Applied in order, tracked by name in `_migrations`.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_bookings",
        "CREATE TABLE IF NOT EXISTS bookings (
            id TEXT PRIMARY KEY,
            community_id TEXT NOT NULL,
            amenity_id TEXT NOT NULL,
            amenity_name TEXT NOT NULL,
            amenity_type TEXT NOT NULL,
            user_id TEXT NOT NULL,
            user_email TEXT NOT NULL,
            user_name TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            attendees TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'confirmed',
            notes TEXT,
            qr_code_id TEXT,
            qr_generated INTEGER NOT NULL DEFAULT 0,
            qr_generated_at TEXT,
            check_in_time TEXT,
            check_out_time TEXT,
            cancelled_at TEXT,
            cancelled_by TEXT,
            admin_cancellation INTEGER NOT NULL DEFAULT 0,
            cancellation_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
    ),
    (
        "0002_bookings_scope_index",
        "CREATE INDEX IF NOT EXISTS idx_bookings_scope_start
             ON bookings (community_id, user_id, start_time);",
    ),
    (
        "0003_access_passes",
        "CREATE TABLE IF NOT EXISTS access_passes (
            id TEXT PRIMARY KEY,
            booking_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            user_email TEXT NOT NULL,
            user_name TEXT NOT NULL,
            community_id TEXT NOT NULL,
            amenity_id TEXT NOT NULL,
            amenity_name TEXT NOT NULL,
            amenity_type TEXT NOT NULL,
            amenity_location TEXT NOT NULL,
            amenity_description TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            scan_count INTEGER NOT NULL DEFAULT 0,
            last_scanned_at TEXT,
            last_scanned_by TEXT,
            check_in_time TEXT,
            check_out_time TEXT,
            payload TEXT NOT NULL,
            security_hash TEXT NOT NULL,
            booking_details TEXT NOT NULL,
            amenity_day_bookings TEXT NOT NULL DEFAULT '[]',
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_access_passes_booking
            ON access_passes (booking_id);",
    ),
    (
        "0004_amenities",
        "CREATE TABLE IF NOT EXISTS amenities (
            id TEXT PRIMARY KEY,
            community_id TEXT NOT NULL,
            name TEXT NOT NULL,
            amenity_type TEXT NOT NULL,
            location TEXT NOT NULL,
            description TEXT NOT NULL
        );",
    ),
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
                [name],
                |row| row.get(0),
            )
            .context("failed to check migration status")?;

        if already_applied {
            continue;
        }

        conn.execute_batch(sql)
            .with_context(|| format!("failed to apply migration: {name}"))?;

        conn.execute("INSERT INTO _migrations (name) VALUES (?1)", [name])
            .with_context(|| format!("failed to record migration: {name}"))?;

        tracing::info!("applied migration: {name}");
    }

    Ok(())
}
