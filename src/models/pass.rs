use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const PASS_TYPE: &str = "booking-access";
pub const PASS_VERSION: &str = "2.0";
pub const DEFAULT_GRACE_MINUTES: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessPass {
    pub id: String,
    pub booking_id: String,
    pub user_id: String,
    pub user_email: String,
    pub user_name: String,
    pub community_id: String,
    pub amenity_id: String,
    pub amenity_name: String,
    pub amenity_type: String,
    pub amenity_location: String,
    pub amenity_description: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub status: PassStatus,
    pub scan_count: i64,
    pub last_scanned_at: Option<NaiveDateTime>,
    pub last_scanned_by: Option<String>,
    pub check_in_time: Option<NaiveDateTime>,
    pub check_out_time: Option<NaiveDateTime>,
    /// Base64 blob of the signed wire payload; clients render it as a QR
    /// image at error-correction level H.
    pub payload: String,
    pub security_hash: String,
    pub booking_details: BookingDetails,
    pub amenity_day_bookings: Vec<DayBookingContext>,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PassStatus {
    Active,
    Used,
    Expired,
    Cancelled,
}

impl PassStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassStatus::Active => "active",
            PassStatus::Used => "used",
            PassStatus::Expired => "expired",
            PassStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "used" => PassStatus::Used,
            "expired" => PassStatus::Expired,
            "cancelled" => PassStatus::Cancelled,
            _ => PassStatus::Active,
        }
    }
}

/// The JSON document embedded in the scannable code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    pub data: PassData,
    pub hash: String,
    pub generated: String,
    pub expiry_grace: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassData {
    pub booking_id: String,
    pub user_id: String,
    pub amenity_id: String,
    pub amenity_name: String,
    pub start_time: String,
    pub end_time: String,
    /// Issuance timestamp; part of the signed material.
    pub timestamp: String,
    pub booking_details: BookingDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingDetails {
    pub duration_minutes: i64,
    pub attendees: Vec<String>,
    pub notes: Option<String>,
}

/// Read-only snapshot of a same-day booking for the same amenity, captured
/// at issuance for context display on the pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayBookingContext {
    pub booking_id: String,
    pub user_name: String,
    pub start_time: String,
    pub end_time: String,
    pub status: String,
}
