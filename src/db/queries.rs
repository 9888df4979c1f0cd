use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection};

use crate::models::{
    AccessPass, AmenityInfo, Booking, BookingDetails, BookingStatus, DayBookingContext, PassStatus,
};

pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_ts(dt: &NaiveDateTime) -> String {
    dt.format(TS_FORMAT).to_string()
}

pub fn parse_ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .unwrap_or_else(|_| chrono::Utc::now().naive_utc())
}

fn parse_opt_ts(s: Option<String>) -> Option<NaiveDateTime> {
    s.map(|v| parse_ts(&v))
}

// ── Bookings ──

pub fn insert_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO bookings (id, community_id, amenity_id, amenity_name, amenity_type,
            user_id, user_email, user_name, start_time, end_time, attendees, status, notes,
            qr_code_id, qr_generated, qr_generated_at, check_in_time, check_out_time,
            cancelled_at, cancelled_by, admin_cancellation, cancellation_reason,
            created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
            ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
        params![
            booking.id,
            booking.community_id,
            booking.amenity_id,
            booking.amenity_name,
            booking.amenity_type,
            booking.user_id,
            booking.user_email,
            booking.user_name,
            format_ts(&booking.start_time),
            format_ts(&booking.end_time),
            serde_json::to_string(&booking.attendees)?,
            booking.status.as_str(),
            booking.notes,
            booking.qr_code_id,
            booking.qr_generated as i32,
            booking.qr_generated_at.as_ref().map(format_ts),
            booking.check_in_time.as_ref().map(format_ts),
            booking.check_out_time.as_ref().map(format_ts),
            booking.cancelled_at.as_ref().map(format_ts),
            booking.cancelled_by,
            booking.admin_cancellation as i32,
            booking.cancellation_reason,
            format_ts(&booking.created_at),
            format_ts(&booking.updated_at),
        ],
    )?;
    Ok(())
}

const BOOKING_COLUMNS: &str = "id, community_id, amenity_id, amenity_name, amenity_type, \
    user_id, user_email, user_name, start_time, end_time, attendees, status, notes, \
    qr_code_id, qr_generated, qr_generated_at, check_in_time, check_out_time, \
    cancelled_at, cancelled_by, admin_cancellation, cancellation_reason, created_at, updated_at";

pub fn get_booking(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let result = conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        |row| Ok(parse_booking_row(row)),
    );

    match result {
        Ok(booking) => Ok(Some(booking?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Primary scoped listing, pinned to the composite scope index so the
/// database orders the result. Errors if the index is missing; callers fall
/// back to `list_bookings_fallback`.
pub fn list_bookings_scoped(
    conn: &Connection,
    community_id: &str,
    user_id: Option<&str>,
) -> anyhow::Result<Vec<Booking>> {
    let mut bookings = vec![];

    match user_id {
        Some(uid) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings INDEXED BY idx_bookings_scope_start
                 WHERE community_id = ?1 AND user_id = ?2
                 ORDER BY start_time DESC"
            ))?;
            let rows = stmt.query_map(params![community_id, uid], |row| {
                Ok(parse_booking_row(row))
            })?;
            for row in rows {
                bookings.push(row??);
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings INDEXED BY idx_bookings_scope_start
                 WHERE community_id = ?1
                 ORDER BY start_time DESC"
            ))?;
            let rows = stmt.query_map(params![community_id], |row| Ok(parse_booking_row(row)))?;
            for row in rows {
                bookings.push(row??);
            }
        }
    }

    Ok(bookings)
}

/// Degraded-mode listing: minimal predicate, no index hint, no ordering.
/// Requester filtering and sort order happen in memory at the caller.
pub fn list_bookings_fallback(
    conn: &Connection,
    community_id: &str,
) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE community_id = ?1"
    ))?;
    let rows = stmt.query_map(params![community_id], |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

/// Same-day bookings for one amenity, newest first, cancelled excluded.
/// Context snapshot for pass issuance; not admission control.
pub fn list_amenity_day_bookings(
    conn: &Connection,
    community_id: &str,
    amenity_id: &str,
    day: NaiveDate,
) -> anyhow::Result<Vec<Booking>> {
    let day_start = day.and_hms_opt(0, 0, 0).map(|dt| format_ts(&dt)).unwrap_or_default();
    let day_end = day.and_hms_opt(23, 59, 59).map(|dt| format_ts(&dt)).unwrap_or_default();

    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE community_id = ?1 AND amenity_id = ?2
           AND start_time >= ?3 AND start_time <= ?4 AND status != 'cancelled'
         ORDER BY start_time ASC"
    ))?;
    let rows = stmt.query_map(params![community_id, amenity_id, day_start, day_end], |row| {
        Ok(parse_booking_row(row))
    })?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

// Lifecycle transitions. Every one is a single conditional UPDATE keyed on
// the current status, so concurrent commands cannot double-apply.

pub fn cancel_booking_if_confirmed(
    conn: &Connection,
    id: &str,
    cancelled_by: &str,
    admin_cancellation: bool,
    reason: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let ts = format_ts(now);
    let count = conn.execute(
        "UPDATE bookings SET status = 'cancelled', cancelled_at = ?1, cancelled_by = ?2,
            admin_cancellation = ?3, cancellation_reason = ?4, updated_at = ?1
         WHERE id = ?5 AND status = 'confirmed'",
        params![ts, cancelled_by, admin_cancellation as i32, reason, id],
    )?;
    Ok(count > 0)
}

pub fn check_in_booking_if_confirmed(
    conn: &Connection,
    id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let ts = format_ts(now);
    let count = conn.execute(
        "UPDATE bookings SET status = 'in-progress', check_in_time = ?1, updated_at = ?1
         WHERE id = ?2 AND status = 'confirmed'",
        params![ts, id],
    )?;
    Ok(count > 0)
}

pub fn complete_booking_if_active(
    conn: &Connection,
    id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let ts = format_ts(now);
    let count = conn.execute(
        "UPDATE bookings SET status = 'completed', check_out_time = ?1, updated_at = ?1
         WHERE id = ?2 AND status IN ('in-progress', 'confirmed')",
        params![ts, id],
    )?;
    Ok(count > 0)
}

pub fn delete_booking_if_cancelled(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count = conn.execute(
        "DELETE FROM bookings WHERE id = ?1 AND status = 'cancelled'",
        params![id],
    )?;
    Ok(count > 0)
}

/// Atomic issuance claim: flips qr_generated exactly once per booking.
/// Returns false when a pass was already issued (regeneration unsupported).
pub fn claim_pass_slot(
    conn: &Connection,
    booking_id: &str,
    pass_id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let ts = format_ts(now);
    let count = conn.execute(
        "UPDATE bookings SET qr_code_id = ?1, qr_generated = 1, qr_generated_at = ?2,
            updated_at = ?2
         WHERE id = ?3 AND qr_generated = 0 AND status = 'confirmed'",
        params![pass_id, ts, booking_id],
    )?;
    Ok(count > 0)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let attendees_json: String = row.get(10)?;
    let status_str: String = row.get(11)?;
    let start_time: String = row.get(8)?;
    let end_time: String = row.get(9)?;
    let created_at: String = row.get(22)?;
    let updated_at: String = row.get(23)?;

    Ok(Booking {
        id: row.get(0)?,
        community_id: row.get(1)?,
        amenity_id: row.get(2)?,
        amenity_name: row.get(3)?,
        amenity_type: row.get(4)?,
        user_id: row.get(5)?,
        user_email: row.get(6)?,
        user_name: row.get(7)?,
        start_time: parse_ts(&start_time),
        end_time: parse_ts(&end_time),
        attendees: serde_json::from_str(&attendees_json).unwrap_or_default(),
        status: BookingStatus::parse(&status_str),
        notes: row.get(12)?,
        qr_code_id: row.get(13)?,
        qr_generated: row.get::<_, i32>(14)? != 0,
        qr_generated_at: parse_opt_ts(row.get(15)?),
        check_in_time: parse_opt_ts(row.get(16)?),
        check_out_time: parse_opt_ts(row.get(17)?),
        cancelled_at: parse_opt_ts(row.get(18)?),
        cancelled_by: row.get(19)?,
        admin_cancellation: row.get::<_, i32>(20)? != 0,
        cancellation_reason: row.get(21)?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

// ── Access passes ──

pub fn insert_pass(conn: &Connection, pass: &AccessPass) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO access_passes (id, booking_id, user_id, user_email, user_name,
            community_id, amenity_id, amenity_name, amenity_type, amenity_location,
            amenity_description, start_time, end_time, status, scan_count, last_scanned_at,
            last_scanned_by, check_in_time, check_out_time, payload, security_hash,
            booking_details, amenity_day_bookings, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
            ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
        params![
            pass.id,
            pass.booking_id,
            pass.user_id,
            pass.user_email,
            pass.user_name,
            pass.community_id,
            pass.amenity_id,
            pass.amenity_name,
            pass.amenity_type,
            pass.amenity_location,
            pass.amenity_description,
            format_ts(&pass.start_time),
            format_ts(&pass.end_time),
            pass.status.as_str(),
            pass.scan_count,
            pass.last_scanned_at.as_ref().map(format_ts),
            pass.last_scanned_by,
            pass.check_in_time.as_ref().map(format_ts),
            pass.check_out_time.as_ref().map(format_ts),
            pass.payload,
            pass.security_hash,
            serde_json::to_string(&pass.booking_details)?,
            serde_json::to_string(&pass.amenity_day_bookings)?,
            format_ts(&pass.expires_at),
            format_ts(&pass.created_at),
        ],
    )?;
    Ok(())
}

const PASS_COLUMNS: &str = "id, booking_id, user_id, user_email, user_name, community_id, \
    amenity_id, amenity_name, amenity_type, amenity_location, amenity_description, \
    start_time, end_time, status, scan_count, last_scanned_at, last_scanned_by, \
    check_in_time, check_out_time, payload, security_hash, booking_details, \
    amenity_day_bookings, expires_at, created_at";

pub fn get_pass_by_booking(
    conn: &Connection,
    booking_id: &str,
) -> anyhow::Result<Option<AccessPass>> {
    let result = conn.query_row(
        &format!("SELECT {PASS_COLUMNS} FROM access_passes WHERE booking_id = ?1"),
        params![booking_id],
        |row| Ok(parse_pass_row(row)),
    );

    match result {
        Ok(pass) => Ok(Some(pass?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Observability side effect for every acknowledged scan, lifecycle change
/// or not.
pub fn record_scan(
    conn: &Connection,
    pass_id: &str,
    scanned_by: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE access_passes SET scan_count = scan_count + 1, last_scanned_at = ?1,
            last_scanned_by = ?2
         WHERE id = ?3",
        params![format_ts(now), scanned_by, pass_id],
    )?;
    Ok(())
}

/// Records the holder's check-in on the pass. Conditional on no prior
/// check-in, so a raced double scan sets check_in_time exactly once.
pub fn check_in_pass(conn: &Connection, pass_id: &str, now: &NaiveDateTime) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE access_passes SET check_in_time = ?1
         WHERE id = ?2 AND status = 'active' AND check_in_time IS NULL",
        params![format_ts(now), pass_id],
    )?;
    Ok(count > 0)
}

pub fn complete_pass_if_active(
    conn: &Connection,
    pass_id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE access_passes SET status = 'used', check_out_time = ?1
         WHERE id = ?2 AND status = 'active'",
        params![format_ts(now), pass_id],
    )?;
    Ok(count > 0)
}

pub fn cancel_passes_for_booking(conn: &Connection, booking_id: &str) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE access_passes SET status = 'cancelled'
         WHERE booking_id = ?1 AND status = 'active'",
        params![booking_id],
    )?;
    Ok(count)
}

pub fn delete_passes_for_booking(conn: &Connection, booking_id: &str) -> anyhow::Result<usize> {
    let count = conn.execute(
        "DELETE FROM access_passes WHERE booking_id = ?1",
        params![booking_id],
    )?;
    Ok(count)
}

fn parse_pass_row(row: &rusqlite::Row) -> anyhow::Result<AccessPass> {
    let start_time: String = row.get(11)?;
    let end_time: String = row.get(12)?;
    let status_str: String = row.get(13)?;
    let details_json: String = row.get(21)?;
    let day_bookings_json: String = row.get(22)?;
    let expires_at: String = row.get(23)?;
    let created_at: String = row.get(24)?;

    let booking_details: BookingDetails =
        serde_json::from_str(&details_json).unwrap_or(BookingDetails {
            duration_minutes: 0,
            attendees: vec![],
            notes: None,
        });
    let amenity_day_bookings: Vec<DayBookingContext> =
        serde_json::from_str(&day_bookings_json).unwrap_or_default();

    Ok(AccessPass {
        id: row.get(0)?,
        booking_id: row.get(1)?,
        user_id: row.get(2)?,
        user_email: row.get(3)?,
        user_name: row.get(4)?,
        community_id: row.get(5)?,
        amenity_id: row.get(6)?,
        amenity_name: row.get(7)?,
        amenity_type: row.get(8)?,
        amenity_location: row.get(9)?,
        amenity_description: row.get(10)?,
        start_time: parse_ts(&start_time),
        end_time: parse_ts(&end_time),
        status: PassStatus::parse(&status_str),
        scan_count: row.get(14)?,
        last_scanned_at: parse_opt_ts(row.get(15)?),
        last_scanned_by: row.get(16)?,
        check_in_time: parse_opt_ts(row.get(17)?),
        check_out_time: parse_opt_ts(row.get(18)?),
        payload: row.get(19)?,
        security_hash: row.get(20)?,
        booking_details,
        amenity_day_bookings,
        expires_at: parse_ts(&expires_at),
        created_at: parse_ts(&created_at),
    })
}

// ── Amenities ──

pub fn get_amenity(conn: &Connection, id: &str) -> anyhow::Result<Option<AmenityInfo>> {
    let result = conn.query_row(
        "SELECT id, community_id, name, amenity_type, location, description
         FROM amenities WHERE id = ?1",
        params![id],
        |row| {
            Ok(AmenityInfo {
                id: row.get(0)?,
                community_id: row.get(1)?,
                name: row.get(2)?,
                amenity_type: row.get(3)?,
                location: row.get(4)?,
                description: row.get(5)?,
            })
        },
    );

    match result {
        Ok(amenity) => Ok(Some(amenity)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn upsert_amenity(conn: &Connection, amenity: &AmenityInfo) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO amenities (id, community_id, name, amenity_type, location, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
           community_id = excluded.community_id,
           name = excluded.name,
           amenity_type = excluded.amenity_type,
           location = excluded.location,
           description = excluded.description",
        params![
            amenity.id,
            amenity.community_id,
            amenity.name,
            amenity.amenity_type,
            amenity.location,
            amenity.description,
        ],
    )?;
    Ok(())
}
