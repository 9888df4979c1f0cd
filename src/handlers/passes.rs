use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::AccessPass;
use crate::services::feed;
use crate::services::passes::{self, IssueOptions, IssueOutcome};
use crate::services::scanner::{self, ScannerContext};
use crate::state::AppState;

use super::require_identity;

#[derive(Serialize)]
pub struct PassResponse {
    pub id: String,
    pub booking_id: String,
    pub user_name: String,
    pub amenity_id: String,
    pub amenity_name: String,
    pub amenity_type: String,
    pub amenity_location: String,
    pub amenity_description: String,
    pub start_time: String,
    pub end_time: String,
    pub status: String,
    pub scan_count: i64,
    pub expires_at: String,
    /// Base64 payload to render as a QR image.
    pub payload: String,
    pub security_hash: String,
    pub amenity_day_bookings: Vec<crate::models::DayBookingContext>,
}

impl PassResponse {
    fn from_pass(pass: &AccessPass) -> Self {
        Self {
            id: pass.id.clone(),
            booking_id: pass.booking_id.clone(),
            user_name: pass.user_name.clone(),
            amenity_id: pass.amenity_id.clone(),
            amenity_name: pass.amenity_name.clone(),
            amenity_type: pass.amenity_type.clone(),
            amenity_location: pass.amenity_location.clone(),
            amenity_description: pass.amenity_description.clone(),
            start_time: queries::format_ts(&pass.start_time),
            end_time: queries::format_ts(&pass.end_time),
            status: pass.status.as_str().to_string(),
            scan_count: pass.scan_count,
            expires_at: queries::format_ts(&pass.expires_at),
            payload: pass.payload.clone(),
            security_hash: pass.security_hash.clone(),
            amenity_day_bookings: pass.amenity_day_bookings.clone(),
        }
    }
}

// POST /api/bookings/:id/pass
pub async fn issue_pass(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<IssueOptions>>,
) -> Result<Response, AppError> {
    let requester = require_identity(&headers)?;
    let opts = body.map(|Json(o)| o).unwrap_or_default();

    let outcome = passes::issue(&state, &id, &requester, &opts, Utc::now().naive_utc()).await?;

    let response = match outcome {
        IssueOutcome::Issued(pass) => {
            feed::notify_change(&state.feed_tx);
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "ok": true,
                    "pass": PassResponse::from_pass(&pass),
                    // Passes get scanned at an angle and in poor light;
                    // render the QR at the highest correction level.
                    "error_correction": "H",
                    "auto_show": opts.auto_show,
                    "emergency_contact": opts.emergency_contact,
                })),
            )
                .into_response()
        }
        IssueOutcome::AlreadyIssued => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "error": "an access pass was already issued for this booking"
            })),
        )
            .into_response(),
        IssueOutcome::NotIssuable { message } => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": message })),
        )
            .into_response(),
        IssueOutcome::Forbidden => (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "you do not have access to this booking"})),
        )
            .into_response(),
        IssueOutcome::NotFound => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "booking not found"})),
        )
            .into_response(),
    };
    Ok(response)
}

// POST /api/passes/scan
#[derive(Deserialize)]
pub struct ScanRequest {
    pub payload: String,
}

pub async fn scan_pass(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ScanRequest>,
) -> Result<Json<scanner::ScanResult>, AppError> {
    let requester = require_identity(&headers)?;
    if body.payload.trim().is_empty() {
        return Err(AppError::Validation("payload is required".to_string()));
    }

    let context = ScannerContext {
        scanner_id: requester.user_id.clone(),
    };

    let result = {
        let db = state.db.lock().unwrap();
        scanner::scan(
            &db,
            &state.config.pass_secret,
            &body.payload,
            &context,
            Utc::now().naive_utc(),
        )?
    };

    // Scans can transition the booking; let subscribers reload either way.
    feed::notify_change(&state.feed_tx);

    Ok(Json(result))
}
