use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::Booking;
use crate::services::commands::{self, CommandOutcome};
use crate::services::feed::{self, BookingSnapshot, FeedScope, RetryBudget};
use crate::services::projector::{self, BookingView};
use crate::state::AppState;

use super::require_identity;

#[derive(Serialize)]
pub struct BookingResponse {
    pub id: String,
    pub community_id: String,
    pub amenity_id: String,
    pub amenity_name: String,
    pub amenity_type: String,
    pub user_id: String,
    pub user_email: String,
    pub user_name: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_minutes: i64,
    pub attendees: Vec<String>,
    pub status: String,
    pub display_status: String,
    pub notes: Option<String>,
    pub qr_generated: bool,
    pub qr_code_id: Option<String>,
    pub check_in_time: Option<String>,
    pub check_out_time: Option<String>,
    pub cancelled_at: Option<String>,
    pub cancelled_by: Option<String>,
    pub admin_cancellation: bool,
    pub cancellation_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl BookingResponse {
    pub fn from_booking(booking: &Booking, now: NaiveDateTime) -> Self {
        Self {
            id: booking.id.clone(),
            community_id: booking.community_id.clone(),
            amenity_id: booking.amenity_id.clone(),
            amenity_name: booking.amenity_name.clone(),
            amenity_type: booking.amenity_type.clone(),
            user_id: booking.user_id.clone(),
            user_email: booking.user_email.clone(),
            user_name: booking.user_name.clone(),
            start_time: queries::format_ts(&booking.start_time),
            end_time: queries::format_ts(&booking.end_time),
            duration_minutes: booking.duration_minutes(),
            attendees: booking.attendees.clone(),
            status: booking.status.as_str().to_string(),
            display_status: projector::display_status(booking, now).as_str().to_string(),
            notes: booking.notes.clone(),
            qr_generated: booking.qr_generated,
            qr_code_id: booking.qr_code_id.clone(),
            check_in_time: booking.check_in_time.as_ref().map(queries::format_ts),
            check_out_time: booking.check_out_time.as_ref().map(queries::format_ts),
            cancelled_at: booking.cancelled_at.as_ref().map(queries::format_ts),
            cancelled_by: booking.cancelled_by.clone(),
            admin_cancellation: booking.admin_cancellation,
            cancellation_reason: booking.cancellation_reason.clone(),
            created_at: queries::format_ts(&booking.created_at),
            updated_at: queries::format_ts(&booking.updated_at),
        }
    }
}

fn snapshot_json(snapshot: &BookingSnapshot, now: NaiveDateTime) -> serde_json::Value {
    let bookings: Vec<BookingResponse> = snapshot
        .bookings
        .iter()
        .map(|b| BookingResponse::from_booking(b, now))
        .collect();
    serde_json::json!({
        "bookings": bookings,
        "stats": snapshot.stats,
        "degraded": snapshot.degraded,
    })
}

// GET /api/bookings
#[derive(Deserialize)]
pub struct BookingsQuery {
    pub view: Option<String>,
    pub search: Option<String>,
}

pub async fn get_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let requester = require_identity(&headers)?;
    let scope = FeedScope::for_requester(&requester);
    let now = Utc::now().naive_utc();

    let snapshot = {
        let db = state.db.lock().unwrap();
        feed::load_snapshot(&db, &scope, &mut RetryBudget::new(), now)?
    };

    let view = BookingView::parse(query.view.as_deref().unwrap_or("all"));
    let search = query.search.unwrap_or_default();
    let bookings: Vec<BookingResponse> = snapshot
        .bookings
        .iter()
        .filter(|b| projector::matches_view(b, now, view))
        .filter(|b| projector::matches_search(b, &search))
        .map(|b| BookingResponse::from_booking(b, now))
        .collect();

    Ok(Json(serde_json::json!({
        "bookings": bookings,
        "stats": snapshot.stats,
        "degraded": snapshot.degraded,
    })))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let requester = require_identity(&headers)?;

    let booking = {
        let db = state.db.lock().unwrap();
        queries::get_booking(&db, &id)?
    };
    let Some(booking) = booking else {
        return Err(AppError::NotFound(format!("booking {id} not found")));
    };
    if booking.community_id != requester.community_id {
        return Err(AppError::NotFound(format!("booking {id} not found")));
    }
    if booking.user_id != requester.user_id && !requester.is_privileged() {
        return Err(AppError::Forbidden(
            "you do not have access to this booking".to_string(),
        ));
    }

    let now = Utc::now().naive_utc();
    Ok(Json(serde_json::json!({
        "booking": BookingResponse::from_booking(&booking, now),
    })))
}

// GET /api/bookings/events (SSE stream of scoped snapshots)
pub async fn events_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, AppError> {
    let requester = require_identity(&headers)?;
    let scope = FeedScope::for_requester(&requester);

    let rx = state.feed_tx.subscribe();
    let mut budget = RetryBudget::new();

    let initial = snapshot_event(&state, &scope, &mut budget);
    let initial_stream = tokio_stream::iter(std::iter::once(initial));

    let live_state = Arc::clone(&state);
    let live_scope = scope.clone();
    let live_stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(()) => Some(snapshot_event(&live_state, &live_scope, &mut budget)),
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(_)) => None,
    });

    let keepalive_stream = tokio_stream::StreamExt::map(
        tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(Duration::from_secs(30))),
        |_| Ok(Event::default().comment("keepalive")),
    );

    let combined = initial_stream.chain(live_stream);
    let merged = StreamExt::merge(combined, keepalive_stream);

    Ok(Sse::new(merged))
}

fn snapshot_event(
    state: &Arc<AppState>,
    scope: &FeedScope,
    budget: &mut RetryBudget,
) -> Result<Event, Infallible> {
    let now = Utc::now().naive_utc();
    let snapshot = {
        let db = state.db.lock().unwrap();
        feed::load_snapshot(&db, scope, budget, now)
    };

    match snapshot {
        Ok(snapshot) => {
            let data = serde_json::to_string(&snapshot_json(&snapshot, now)).unwrap_or_default();
            Ok(Event::default().data(data).event("bookings"))
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to load booking snapshot for feed");
            let data = serde_json::json!({ "error": e.to_string() }).to_string();
            Ok(Event::default().data(data).event("feed_error"))
        }
    }
}

fn command_response(state: &Arc<AppState>, outcome: CommandOutcome) -> Response {
    let now = Utc::now().naive_utc();
    match outcome {
        CommandOutcome::Applied(booking) => {
            feed::notify_change(&state.feed_tx);
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "ok": true,
                    "booking": BookingResponse::from_booking(&booking, now),
                })),
            )
                .into_response()
        }
        CommandOutcome::PreconditionFailed { current, message } => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "error": message,
                "status": current.map(|s| s.as_str()),
            })),
        )
            .into_response(),
        CommandOutcome::Forbidden => (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "you do not have access to this booking"})),
        )
            .into_response(),
        CommandOutcome::NotFound => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "booking not found"})),
        )
            .into_response(),
    }
}

// POST /api/bookings/:id/cancel
#[derive(Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<CancelRequest>>,
) -> Result<Response, AppError> {
    let requester = require_identity(&headers)?;
    let reason = body.and_then(|Json(b)| b.reason);

    let outcome = {
        let db = state.db.lock().unwrap();
        commands::cancel(
            &db,
            &id,
            &requester,
            reason.as_deref(),
            Utc::now().naive_utc(),
        )?
    };
    Ok(command_response(&state, outcome))
}

// POST /api/bookings/:id/check-in
pub async fn check_in_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let requester = require_identity(&headers)?;

    let outcome = {
        let db = state.db.lock().unwrap();
        commands::check_in(&db, &id, &requester, Utc::now().naive_utc())?
    };
    Ok(command_response(&state, outcome))
}

// POST /api/bookings/:id/check-out
pub async fn check_out_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let requester = require_identity(&headers)?;

    let outcome = {
        let db = state.db.lock().unwrap();
        commands::check_out(&db, &id, &requester, Utc::now().naive_utc())?
    };
    Ok(command_response(&state, outcome))
}

// DELETE /api/bookings/:id (permanently clear a cancelled booking)
pub async fn clear_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let requester = require_identity(&headers)?;

    let outcome = {
        let db = state.db.lock().unwrap();
        commands::clear_cancelled(&db, &id, &requester)?
    };
    Ok(command_response(&state, outcome))
}
