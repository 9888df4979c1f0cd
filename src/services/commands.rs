use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;

use crate::db::queries;
use crate::models::{Booking, BookingStatus, Requester};

/// Non-privileged callers must cancel at least this long before start.
pub const CANCEL_DEADLINE_HOURS: i64 = 24;

/// Typed result of a lifecycle command. Never an error: callers render a
/// precise message from the variant.
#[derive(Debug)]
pub enum CommandOutcome {
    Applied(Booking),
    PreconditionFailed {
        current: Option<BookingStatus>,
        message: String,
    },
    Forbidden,
    NotFound,
}

fn can_act(actor: &Requester, booking: &Booking) -> bool {
    booking.user_id == actor.user_id || actor.is_privileged()
}

/// Disambiguates a zero-row conditional update: the record is gone, or it
/// is in a state the command does not apply to.
fn rejected(conn: &Connection, id: &str, requirement: &str) -> anyhow::Result<CommandOutcome> {
    match queries::get_booking(conn, id)? {
        None => Ok(CommandOutcome::NotFound),
        Some(booking) => Ok(CommandOutcome::PreconditionFailed {
            message: format!("booking is {}; {requirement}", booking.status.as_str()),
            current: Some(booking.status),
        }),
    }
}

fn applied(conn: &Connection, id: &str) -> anyhow::Result<CommandOutcome> {
    match queries::get_booking(conn, id)? {
        Some(booking) => Ok(CommandOutcome::Applied(booking)),
        None => Ok(CommandOutcome::NotFound),
    }
}

pub fn cancel(
    conn: &Connection,
    id: &str,
    actor: &Requester,
    reason: Option<&str>,
    now: NaiveDateTime,
) -> anyhow::Result<CommandOutcome> {
    let Some(booking) = queries::get_booking(conn, id)? else {
        return Ok(CommandOutcome::NotFound);
    };
    if !can_act(actor, &booking) {
        return Ok(CommandOutcome::Forbidden);
    }

    let owner = booking.user_id == actor.user_id;
    if !actor.is_privileged()
        && booking.start_time - now < Duration::hours(CANCEL_DEADLINE_HOURS)
    {
        return Ok(CommandOutcome::PreconditionFailed {
            current: Some(booking.status),
            message: format!(
                "bookings can only be cancelled at least {CANCEL_DEADLINE_HOURS} hours before they start"
            ),
        });
    }

    let changed = queries::cancel_booking_if_confirmed(
        conn,
        id,
        &actor.user_id,
        !owner,
        reason,
        &now,
    )?;
    if !changed {
        return rejected(conn, id, "only confirmed bookings can be cancelled");
    }

    queries::cancel_passes_for_booking(conn, id)?;
    applied(conn, id)
}

pub fn check_in(
    conn: &Connection,
    id: &str,
    actor: &Requester,
    now: NaiveDateTime,
) -> anyhow::Result<CommandOutcome> {
    let Some(booking) = queries::get_booking(conn, id)? else {
        return Ok(CommandOutcome::NotFound);
    };
    if !can_act(actor, &booking) {
        return Ok(CommandOutcome::Forbidden);
    }

    if !queries::check_in_booking_if_confirmed(conn, id, &now)? {
        return rejected(conn, id, "only confirmed bookings can be checked in");
    }
    applied(conn, id)
}

pub fn check_out(
    conn: &Connection,
    id: &str,
    actor: &Requester,
    now: NaiveDateTime,
) -> anyhow::Result<CommandOutcome> {
    let Some(booking) = queries::get_booking(conn, id)? else {
        return Ok(CommandOutcome::NotFound);
    };
    if !can_act(actor, &booking) {
        return Ok(CommandOutcome::Forbidden);
    }

    if !queries::complete_booking_if_active(conn, id, &now)? {
        return rejected(conn, id, "only an in-progress or confirmed booking can be completed");
    }
    applied(conn, id)
}

/// Permanently removes a cancelled booking and its passes. Irreversible.
pub fn clear_cancelled(
    conn: &Connection,
    id: &str,
    actor: &Requester,
) -> anyhow::Result<CommandOutcome> {
    let Some(booking) = queries::get_booking(conn, id)? else {
        return Ok(CommandOutcome::NotFound);
    };
    if !can_act(actor, &booking) {
        return Ok(CommandOutcome::Forbidden);
    }

    if !queries::delete_booking_if_cancelled(conn, id)? {
        return rejected(conn, id, "only cancelled bookings can be cleared");
    }
    queries::delete_passes_for_booking(conn, id)?;
    Ok(CommandOutcome::Applied(booking))
}
