use std::sync::Arc;

use base64::Engine;
use chrono::{Duration, NaiveDateTime};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use uuid::Uuid;

use crate::db::queries;
use crate::models::{
    AccessPass, Booking, BookingDetails, DayBookingContext, PassData, PassPayload, PassStatus,
    Requester, DEFAULT_GRACE_MINUTES, PASS_TYPE, PASS_VERSION,
};
use crate::services::catalog;
use crate::state::AppState;

const WIRE_TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn wire_ts(dt: &NaiveDateTime) -> String {
    dt.format(WIRE_TS_FORMAT).to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct IssueOptions {
    #[serde(default)]
    pub auto_show: bool,
    pub emergency_contact: Option<String>,
    /// Grace window past booking end, minutes. Fixed at issuance; the
    /// stored expiry is never mutated afterwards.
    pub grace_minutes: Option<i64>,
}

#[derive(Debug)]
pub enum IssueOutcome {
    Issued(AccessPass),
    /// A pass already exists for the booking; regeneration is unsupported.
    AlreadyIssued,
    NotIssuable { message: String },
    Forbidden,
    NotFound,
}

/// HMAC-SHA1 over booking id, holder id and issuance timestamp, keyed with
/// the server-held secret. Base64 output travels in the payload as `hash`.
pub fn sign_pass(
    secret: &str,
    booking_id: &str,
    user_id: &str,
    timestamp: &str,
) -> anyhow::Result<String> {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes())
        .map_err(|_| anyhow::anyhow!("invalid pass signing key"))?;
    mac.update(booking_id.as_bytes());
    mac.update(user_id.as_bytes());
    mac.update(timestamp.as_bytes());
    let result = mac.finalize().into_bytes();
    Ok(base64::engine::general_purpose::STANDARD.encode(result))
}

pub fn verify_pass_hash(secret: &str, data: &PassData, hash: &str) -> bool {
    sign_pass(secret, &data.booking_id, &data.user_id, &data.timestamp)
        .map(|expected| expected == hash)
        .unwrap_or(false)
}

pub fn encode_payload(payload: &PassPayload) -> anyhow::Result<String> {
    let json = serde_json::to_string(payload)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(json))
}

/// Assembles the signed pass record for a booking. Pure apart from the
/// signing key; persistence and the issuance claim live in `issue`.
pub fn build_pass(
    booking: &Booking,
    amenity: &crate::models::AmenityInfo,
    day_bookings: Vec<DayBookingContext>,
    secret: &str,
    opts: &IssueOptions,
    pass_id: &str,
    now: NaiveDateTime,
) -> anyhow::Result<AccessPass> {
    let timestamp = wire_ts(&now);
    let hash = sign_pass(secret, &booking.id, &booking.user_id, &timestamp)?;
    let grace = opts.grace_minutes.unwrap_or(DEFAULT_GRACE_MINUTES).max(0);

    let details = BookingDetails {
        duration_minutes: booking.duration_minutes(),
        attendees: booking.attendees.clone(),
        notes: booking.notes.clone(),
    };

    let data = PassData {
        booking_id: booking.id.clone(),
        user_id: booking.user_id.clone(),
        amenity_id: booking.amenity_id.clone(),
        amenity_name: amenity.name.clone(),
        start_time: wire_ts(&booking.start_time),
        end_time: wire_ts(&booking.end_time),
        timestamp: timestamp.clone(),
        booking_details: details.clone(),
    };

    let payload = PassPayload {
        kind: PASS_TYPE.to_string(),
        version: PASS_VERSION.to_string(),
        data,
        hash: hash.clone(),
        generated: timestamp,
        expiry_grace: grace,
    };

    Ok(AccessPass {
        id: pass_id.to_string(),
        booking_id: booking.id.clone(),
        user_id: booking.user_id.clone(),
        user_email: booking.user_email.clone(),
        user_name: booking.user_name.clone(),
        community_id: booking.community_id.clone(),
        amenity_id: booking.amenity_id.clone(),
        amenity_name: amenity.name.clone(),
        amenity_type: amenity.amenity_type.clone(),
        amenity_location: amenity.location.clone(),
        amenity_description: amenity.description.clone(),
        start_time: booking.start_time,
        end_time: booking.end_time,
        status: PassStatus::Active,
        scan_count: 0,
        last_scanned_at: None,
        last_scanned_by: None,
        check_in_time: None,
        check_out_time: None,
        payload: encode_payload(&payload)?,
        security_hash: hash,
        booking_details: details,
        amenity_day_bookings: day_bookings,
        expires_at: booking.end_time + Duration::minutes(grace),
        created_at: now,
    })
}

pub async fn issue(
    state: &Arc<AppState>,
    booking_id: &str,
    actor: &Requester,
    opts: &IssueOptions,
    now: NaiveDateTime,
) -> anyhow::Result<IssueOutcome> {
    let booking = {
        let db = state.db.lock().unwrap();
        queries::get_booking(&db, booking_id)?
    };
    let Some(booking) = booking else {
        return Ok(IssueOutcome::NotFound);
    };

    if booking.user_id != actor.user_id && !actor.is_privileged() {
        return Ok(IssueOutcome::Forbidden);
    }
    if booking.status != crate::models::BookingStatus::Confirmed {
        return Ok(IssueOutcome::NotIssuable {
            message: format!(
                "booking is {}; passes are issued for confirmed bookings only",
                booking.status.as_str()
            ),
        });
    }

    // Atomic claim on the booking row keeps issuance at-most-once even
    // under concurrent requests.
    let pass_id = Uuid::new_v4().to_string();
    let claimed = {
        let db = state.db.lock().unwrap();
        queries::claim_pass_slot(&db, booking_id, &pass_id, &now)?
    };
    if !claimed {
        // Lost the claim: either a pass exists already or the booking
        // changed state underneath us.
        let current = {
            let db = state.db.lock().unwrap();
            queries::get_booking(&db, booking_id)?
        };
        return Ok(match current {
            None => IssueOutcome::NotFound,
            Some(b) if b.qr_generated => IssueOutcome::AlreadyIssued,
            Some(b) => IssueOutcome::NotIssuable {
                message: format!(
                    "booking is {}; passes are issued for confirmed bookings only",
                    b.status.as_str()
                ),
            },
        });
    }

    let found = match state.catalog.lookup(&booking.amenity_id).await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!(error = %e, amenity_id = %booking.amenity_id, "amenity catalog lookup failed, using booking fields");
            None
        }
    };
    let amenity = catalog::resolve_descriptor(found, &booking);

    let day_bookings = {
        let db = state.db.lock().unwrap();
        queries::list_amenity_day_bookings(
            &db,
            &booking.community_id,
            &booking.amenity_id,
            booking.start_time.date(),
        )?
    };
    let day_context: Vec<DayBookingContext> = day_bookings
        .iter()
        .map(|b| DayBookingContext {
            booking_id: b.id.clone(),
            user_name: b.user_name.clone(),
            start_time: wire_ts(&b.start_time),
            end_time: wire_ts(&b.end_time),
            status: b.status.as_str().to_string(),
        })
        .collect();

    let pass = build_pass(
        &booking,
        &amenity,
        day_context,
        &state.config.pass_secret,
        opts,
        &pass_id,
        now,
    )?;

    {
        let db = state.db.lock().unwrap();
        queries::insert_pass(&db, &pass)?;
    }

    Ok(IssueOutcome::Issued(pass))
}
