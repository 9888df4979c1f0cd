use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub community_id: String,
    pub amenity_id: String,
    pub amenity_name: String,
    pub amenity_type: String,
    pub user_id: String,
    pub user_email: String,
    pub user_name: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub attendees: Vec<String>,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub qr_code_id: Option<String>,
    pub qr_generated: bool,
    pub qr_generated_at: Option<NaiveDateTime>,
    pub check_in_time: Option<NaiveDateTime>,
    pub check_out_time: Option<NaiveDateTime>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub cancelled_by: Option<String>,
    pub admin_cancellation: bool,
    pub cancellation_reason: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Booking {
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

/// Persisted lifecycle status. Distinct from the display status computed
/// against the wall clock in `services::projector`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in-progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "in-progress" => BookingStatus::InProgress,
            "completed" => BookingStatus::Completed,
            "cancelled" => BookingStatus::Cancelled,
            "expired" => BookingStatus::Expired,
            _ => BookingStatus::Confirmed,
        }
    }
}

/// Status shown to residents: persisted status overlaid with the wall
/// clock. Never written to storage.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayStatus {
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    Expired,
}

impl DisplayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayStatus::Confirmed => "confirmed",
            DisplayStatus::InProgress => "in-progress",
            DisplayStatus::Completed => "completed",
            DisplayStatus::Cancelled => "cancelled",
            DisplayStatus::Expired => "expired",
        }
    }
}
