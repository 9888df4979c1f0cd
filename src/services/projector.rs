use chrono::NaiveDateTime;
use serde::Serialize;

use crate::models::{Booking, BookingStatus, DisplayStatus};

/// Overlays the persisted status with the wall clock. Pure; every listing,
/// search and stats consumer goes through this one function.
pub fn display_status(booking: &Booking, now: NaiveDateTime) -> DisplayStatus {
    match booking.status {
        BookingStatus::InProgress => DisplayStatus::InProgress,
        BookingStatus::Completed => DisplayStatus::Completed,
        BookingStatus::Cancelled => DisplayStatus::Cancelled,
        BookingStatus::Expired => DisplayStatus::Expired,
        BookingStatus::Confirmed => {
            if now > booking.end_time {
                DisplayStatus::Completed
            } else if now >= booking.start_time && booking.check_in_time.is_some() {
                DisplayStatus::InProgress
            } else {
                DisplayStatus::Confirmed
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingView {
    Current,
    Past,
    All,
}

impl BookingView {
    pub fn parse(s: &str) -> Self {
        match s {
            "current" => BookingView::Current,
            "past" => BookingView::Past,
            _ => BookingView::All,
        }
    }
}

pub fn matches_view(booking: &Booking, now: NaiveDateTime, view: BookingView) -> bool {
    match view {
        BookingView::All => true,
        BookingView::Current => matches!(
            display_status(booking, now),
            DisplayStatus::Confirmed | DisplayStatus::InProgress
        ),
        BookingView::Past => matches!(
            display_status(booking, now),
            DisplayStatus::Completed | DisplayStatus::Cancelled | DisplayStatus::Expired
        ),
    }
}

pub fn matches_search(booking: &Booking, query: &str) -> bool {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return true;
    }
    booking.amenity_name.to_lowercase().contains(&q)
        || booking.user_name.to_lowercase().contains(&q)
        || booking.user_email.to_lowercase().contains(&q)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BookingStats {
    pub total: i64,
    pub confirmed: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub expired: i64,
    /// Confirmed bookings that have not started yet.
    pub upcoming: i64,
}

pub fn compute_stats(bookings: &[Booking], now: NaiveDateTime) -> BookingStats {
    let mut stats = BookingStats {
        total: bookings.len() as i64,
        confirmed: 0,
        in_progress: 0,
        completed: 0,
        cancelled: 0,
        expired: 0,
        upcoming: 0,
    };

    for booking in bookings {
        match display_status(booking, now) {
            DisplayStatus::Confirmed => {
                stats.confirmed += 1;
                if booking.start_time > now {
                    stats.upcoming += 1;
                }
            }
            DisplayStatus::InProgress => stats.in_progress += 1,
            DisplayStatus::Completed => stats.completed += 1,
            DisplayStatus::Cancelled => stats.cancelled += 1,
            DisplayStatus::Expired => stats.expired += 1,
        }
    }

    stats
}
