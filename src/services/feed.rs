use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::db::queries;
use crate::models::{Booking, Requester};
use crate::services::projector::{self, BookingStats};

/// Transient database failures are retried this many times per
/// subscription before the error surfaces to that subscriber.
pub const SNAPSHOT_RETRY_ATTEMPTS: u32 = 3;

/// Visibility scope of one subscription: privileged callers see the whole
/// community, everyone else only their own bookings.
#[derive(Debug, Clone)]
pub struct FeedScope {
    pub community_id: String,
    pub user_filter: Option<String>,
}

impl FeedScope {
    pub fn for_requester(requester: &Requester) -> Self {
        Self {
            community_id: requester.community_id.clone(),
            user_filter: if requester.is_privileged() {
                None
            } else {
                Some(requester.user_id.clone())
            },
        }
    }
}

/// Per-subscription retry allowance; a fresh subscription starts with a
/// full budget.
#[derive(Debug)]
pub struct RetryBudget {
    remaining: u32,
}

impl RetryBudget {
    pub fn new() -> Self {
        Self {
            remaining: SNAPSHOT_RETRY_ATTEMPTS,
        }
    }

    fn consume(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct BookingSnapshot {
    pub bookings: Vec<Booking>,
    pub stats: BookingStats,
    /// True when the snapshot came from the unindexed fallback query.
    pub degraded: bool,
}

enum LoadErrorKind {
    Transient,
    IndexUnavailable,
    Fatal,
}

fn classify(e: &anyhow::Error) -> LoadErrorKind {
    if let Some(sql) = e.downcast_ref::<rusqlite::Error>() {
        if let rusqlite::Error::SqliteFailure(err, msg) = sql {
            if matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) {
                return LoadErrorKind::Transient;
            }
            if msg.as_deref().is_some_and(|m| m.contains("no such index")) {
                return LoadErrorKind::IndexUnavailable;
            }
        }
    }
    LoadErrorKind::Fatal
}

/// Loads the full current snapshot for a scope. The primary indexed query
/// is preferred; if its index is missing the fallback query runs and scope
/// filtering plus ordering happen in memory, flagged as degraded rather
/// than failed.
pub fn load_snapshot(
    conn: &Connection,
    scope: &FeedScope,
    budget: &mut RetryBudget,
    now: NaiveDateTime,
) -> anyhow::Result<BookingSnapshot> {
    loop {
        match queries::list_bookings_scoped(conn, &scope.community_id, scope.user_filter.as_deref())
        {
            Ok(bookings) => {
                return Ok(BookingSnapshot {
                    stats: projector::compute_stats(&bookings, now),
                    bookings,
                    degraded: false,
                })
            }
            Err(e) => match classify(&e) {
                LoadErrorKind::IndexUnavailable => {
                    tracing::warn!(error = %e, "booking scope index unavailable, serving degraded snapshot");
                    let mut bookings =
                        queries::list_bookings_fallback(conn, &scope.community_id)?;
                    if let Some(user_id) = &scope.user_filter {
                        bookings.retain(|b| &b.user_id == user_id);
                    }
                    bookings.sort_by(|a, b| b.start_time.cmp(&a.start_time));
                    return Ok(BookingSnapshot {
                        stats: projector::compute_stats(&bookings, now),
                        bookings,
                        degraded: true,
                    });
                }
                LoadErrorKind::Transient => {
                    if !budget.consume() {
                        return Err(e.context("database unavailable after retries"));
                    }
                    tracing::warn!("database busy, retrying snapshot load");
                }
                LoadErrorKind::Fatal => return Err(e),
            },
        }
    }
}

/// Wakes every live subscription so it reloads its snapshot. Send errors
/// just mean nobody is listening.
pub fn notify_change(tx: &broadcast::Sender<()>) {
    let _ = tx.send(());
}
