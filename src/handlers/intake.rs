use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use base64::Engine;
use chrono::{NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use uuid::Uuid;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::{Booking, BookingStatus};
use crate::services::feed;
use crate::state::AppState;

/// Booking record pushed by the reservation flow once a slot is confirmed.
#[derive(Deserialize)]
pub struct IntakeBooking {
    pub id: Option<String>,
    pub community_id: String,
    pub amenity_id: String,
    pub amenity_name: String,
    pub amenity_type: String,
    pub user_id: String,
    pub user_email: String,
    pub user_name: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub attendees: Vec<String>,
    pub notes: Option<String>,
}

fn verify_intake_signature(secret: &str, signature: &str, body: &str) -> bool {
    let mut mac = match Hmac::<Sha1>::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body.as_bytes());
    let result = mac.finalize().into_bytes();
    let expected = base64::engine::general_purpose::STANDARD.encode(result);

    expected == signature
}

fn parse_time(field: &str, value: &str) -> Result<NaiveDateTime, AppError> {
    NaiveDateTime::parse_from_str(value, queries::TS_FORMAT).map_err(|_| {
        AppError::Validation(format!(
            "{field} must be formatted as {}",
            queries::TS_FORMAT
        ))
    })
}

// POST /webhook/bookings
pub async fn booking_intake(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<serde_json::Value>, AppError> {
    // Verify the reservation flow signature (skip if secret is empty:
    // dev mode).
    if !state.config.intake_secret.is_empty() {
        let signature = headers
            .get("x-reservation-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if signature.is_empty() {
            tracing::warn!("missing x-reservation-signature header");
            return Err(AppError::Forbidden("missing reservation signature".to_string()));
        }
        if !verify_intake_signature(&state.config.intake_secret, signature, &body) {
            tracing::warn!("invalid reservation signature");
            return Err(AppError::Forbidden("invalid reservation signature".to_string()));
        }
    }

    let intake: IntakeBooking = serde_json::from_str(&body)
        .map_err(|e| AppError::Validation(format!("invalid booking payload: {e}")))?;

    let start_time = parse_time("start_time", &intake.start_time)?;
    let end_time = parse_time("end_time", &intake.end_time)?;
    if start_time >= end_time {
        return Err(AppError::Validation(
            "start_time must be before end_time".to_string(),
        ));
    }

    let now = Utc::now().naive_utc();
    let booking = Booking {
        id: intake.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        community_id: intake.community_id,
        amenity_id: intake.amenity_id,
        amenity_name: intake.amenity_name,
        amenity_type: intake.amenity_type,
        user_id: intake.user_id,
        user_email: intake.user_email,
        user_name: intake.user_name,
        start_time,
        end_time,
        attendees: intake.attendees,
        status: BookingStatus::Confirmed,
        notes: intake.notes,
        qr_code_id: None,
        qr_generated: false,
        qr_generated_at: None,
        check_in_time: None,
        check_out_time: None,
        cancelled_at: None,
        cancelled_by: None,
        admin_cancellation: false,
        cancellation_reason: None,
        created_at: now,
        updated_at: now,
    };

    {
        let db = state.db.lock().unwrap();
        queries::insert_booking(&db, &booking)?;
    }

    tracing::info!(booking_id = %booking.id, amenity = %booking.amenity_name, "booking recorded");

    // Confirmation email is fire-and-forget; a mail failure never fails
    // the booking.
    let subject = format!("Booking confirmed: {}", booking.amenity_name);
    let email_body = format!(
        "Hi {},\n\nYour booking of {} on {} from {} to {} is confirmed.\n",
        booking.user_name,
        booking.amenity_name,
        booking.start_time.format("%Y-%m-%d"),
        booking.start_time.format("%H:%M"),
        booking.end_time.format("%H:%M"),
    );
    if let Err(e) = state
        .notifier
        .send_email(&booking.user_email, &subject, &email_body)
        .await
    {
        tracing::error!(error = %e, "failed to send booking confirmation email");
    }

    feed::notify_change(&state.feed_tx);

    Ok(Json(serde_json::json!({ "ok": true, "id": booking.id })))
}
