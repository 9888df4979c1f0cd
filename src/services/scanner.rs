use base64::Engine;
use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries;
use crate::models::{PassPayload, PassStatus, PASS_TYPE};
use crate::services::passes;

/// Scans are acknowledged this long before start without checking in.
pub const CHECK_IN_LEAD_MINUTES: i64 = 15;

#[derive(Debug, Clone)]
pub struct ScannerContext {
    pub scanner_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ScanAction {
    CheckIn,
    CheckOut,
    EarlyAccess,
    ViewDetails,
    Expired,
    BookingCancelled,
    InvalidFormat,
    InvalidType,
    Corrupted,
    SecurityHashMismatch,
    NotFound,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub success: bool,
    pub action: ScanAction,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

fn rejected(action: ScanAction, message: impl Into<String>) -> ScanResult {
    ScanResult {
        success: false,
        action,
        message: message.into(),
        warnings: vec![],
    }
}

fn accepted(action: ScanAction, message: impl Into<String>) -> ScanResult {
    ScanResult {
        success: true,
        action,
        message: message.into(),
        warnings: vec![],
    }
}

/// Scanners hand over either the raw payload JSON or its base64 form.
fn parse_payload(raw: &str) -> Option<serde_json::Value> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(trimmed)
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Validates a scanned payload and applies the action the current time
/// window calls for. Rejections and terminal outcomes come back as typed
/// results, never errors.
pub fn scan(
    conn: &Connection,
    secret: &str,
    raw_payload: &str,
    scanner: &ScannerContext,
    now: NaiveDateTime,
) -> anyhow::Result<ScanResult> {
    let Some(value) = parse_payload(raw_payload) else {
        return Ok(rejected(
            ScanAction::InvalidFormat,
            "scanned code is not a readable access pass",
        ));
    };

    if value.get("type").and_then(|v| v.as_str()) != Some(PASS_TYPE) {
        return Ok(rejected(
            ScanAction::InvalidType,
            "scanned code is not an amenity access pass",
        ));
    }

    let payload: PassPayload = match serde_json::from_value(value) {
        Ok(payload) => payload,
        Err(_) => {
            return Ok(rejected(
                ScanAction::Corrupted,
                "access pass payload is incomplete or damaged",
            ))
        }
    };
    if payload.data.booking_id.is_empty()
        || payload.data.user_id.is_empty()
        || payload.data.timestamp.is_empty()
        || payload.hash.is_empty()
    {
        return Ok(rejected(
            ScanAction::Corrupted,
            "access pass payload is incomplete or damaged",
        ));
    }

    if !passes::verify_pass_hash(secret, &payload.data, &payload.hash) {
        return Ok(rejected(
            ScanAction::SecurityHashMismatch,
            "access pass failed security verification",
        ));
    }

    let Some(pass) = queries::get_pass_by_booking(conn, &payload.data.booking_id)? else {
        return Ok(rejected(
            ScanAction::NotFound,
            "no access pass on file for this booking",
        ));
    };

    if now > pass.expires_at {
        let minutes = (now - pass.expires_at).num_minutes();
        return Ok(rejected(
            ScanAction::Expired,
            format!("access pass expired {minutes} minutes ago"),
        ));
    }

    if pass.status == PassStatus::Cancelled {
        return Ok(rejected(
            ScanAction::BookingCancelled,
            "this booking was cancelled",
        ));
    }

    let check_in_opens = pass.start_time - Duration::minutes(CHECK_IN_LEAD_MINUTES);

    // Check-out: holder is inside and the session has not ended.
    if pass.check_in_time.is_some()
        && pass.check_out_time.is_none()
        && now >= pass.start_time
        && now <= pass.end_time
    {
        if queries::complete_pass_if_active(conn, &pass.id, &now)? {
            queries::complete_booking_if_active(conn, &pass.booking_id, &now)?;
            queries::record_scan(conn, &pass.id, &scanner.scanner_id, &now)?;
            return Ok(accepted(
                ScanAction::CheckOut,
                format!("{} checked out of {}", pass.user_name, pass.amenity_name),
            ));
        }
        // Raced with another scan; fall through to a plain acknowledgement.
        queries::record_scan(conn, &pass.id, &scanner.scanner_id, &now)?;
        return Ok(accepted(
            ScanAction::ViewDetails,
            format!("{} pass details displayed", pass.amenity_name),
        ));
    }

    // Check-in: window opens shortly before start and stays open to the end.
    if pass.check_in_time.is_none() && now >= check_in_opens && now <= pass.end_time {
        if queries::check_in_pass(conn, &pass.id, &now)? {
            let booking_updated =
                queries::check_in_booking_if_confirmed(conn, &pass.booking_id, &now)?;
            queries::record_scan(conn, &pass.id, &scanner.scanner_id, &now)?;
            let mut result = accepted(
                ScanAction::CheckIn,
                format!("{} checked in to {}", pass.user_name, pass.amenity_name),
            );
            if !booking_updated {
                result.warnings.push(
                    "booking record was not in a confirmed state; check-in recorded on the pass only"
                        .to_string(),
                );
            }
            return Ok(result);
        }
        // A concurrent scan won the check-in; this one is informational.
        queries::record_scan(conn, &pass.id, &scanner.scanner_id, &now)?;
        return Ok(accepted(
            ScanAction::ViewDetails,
            format!("{} is already checked in", pass.user_name),
        ));
    }

    // Early arrival: acknowledged, but the door stays shut.
    if pass.check_in_time.is_none() && now < check_in_opens {
        let minutes = (pass.start_time - now).num_minutes();
        queries::record_scan(conn, &pass.id, &scanner.scanner_id, &now)?;
        let mut result = accepted(
            ScanAction::EarlyAccess,
            format!("early arrival for {}", pass.amenity_name),
        );
        result.warnings.push(format!(
            "booking starts in {minutes} minutes; check-in opens {CHECK_IN_LEAD_MINUTES} minutes before start"
        ));
        return Ok(result);
    }

    // Ended, still inside the grace window: informational only.
    if now > pass.end_time {
        let minutes = (now - pass.end_time).num_minutes();
        queries::record_scan(conn, &pass.id, &scanner.scanner_id, &now)?;
        return Ok(accepted(
            ScanAction::Expired,
            format!("booking ended {minutes} minutes ago"),
        ));
    }

    queries::record_scan(conn, &pass.id, &scanner.scanner_id, &now)?;
    Ok(accepted(
        ScanAction::ViewDetails,
        format!("{} pass details displayed", pass.amenity_name),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{
        AccessPass, AmenityInfo, Booking, BookingStatus, PassPayload,
    };
    use crate::services::passes::{build_pass, IssueOptions};

    const SECRET: &str = "test-secret";

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn booking_fixture() -> Booking {
        let created = dt("2025-06-01 00:00");
        Booking {
            id: "bk-1".to_string(),
            community_id: "com-1".to_string(),
            amenity_id: "am-1".to_string(),
            amenity_name: "Rooftop Pool".to_string(),
            amenity_type: "pool".to_string(),
            user_id: "user-1".to_string(),
            user_email: "alice@example.com".to_string(),
            user_name: "Alice".to_string(),
            start_time: dt("2025-06-16 10:00"),
            end_time: dt("2025-06-16 12:00"),
            attendees: vec![],
            status: BookingStatus::Confirmed,
            notes: None,
            qr_code_id: None,
            qr_generated: false,
            qr_generated_at: None,
            check_in_time: None,
            check_out_time: None,
            cancelled_at: None,
            cancelled_by: None,
            admin_cancellation: false,
            cancellation_reason: None,
            created_at: created,
            updated_at: created,
        }
    }

    fn amenity_fixture() -> AmenityInfo {
        AmenityInfo {
            id: "am-1".to_string(),
            community_id: "com-1".to_string(),
            name: "Rooftop Pool".to_string(),
            amenity_type: "pool".to_string(),
            location: "Tower A roof".to_string(),
            description: "Heated 25m pool".to_string(),
        }
    }

    /// Seeds a confirmed 10:00–12:00 booking with an issued pass and
    /// returns the connection plus the scannable payload blob.
    fn setup() -> (rusqlite::Connection, AccessPass) {
        let conn = db::init_db(":memory:").unwrap();
        let booking = booking_fixture();
        queries::insert_booking(&conn, &booking).unwrap();
        let now = dt("2025-06-16 09:00");
        assert!(queries::claim_pass_slot(&conn, &booking.id, "pass-1", &now).unwrap());
        let pass = build_pass(
            &booking,
            &amenity_fixture(),
            vec![],
            SECRET,
            &IssueOptions::default(),
            "pass-1",
            now,
        )
        .unwrap();
        queries::insert_pass(&conn, &pass).unwrap();
        (conn, pass)
    }

    fn scanner() -> ScannerContext {
        ScannerContext {
            scanner_id: "gate-7".to_string(),
        }
    }

    fn scan_at(conn: &rusqlite::Connection, payload: &str, at: &str) -> ScanResult {
        scan(conn, SECRET, payload, &scanner(), dt(at)).unwrap()
    }

    #[test]
    fn test_garbage_payload_is_invalid_format() {
        let (conn, _) = setup();
        let result = scan_at(&conn, "not a pass at all", "2025-06-16 10:00");
        assert!(!result.success);
        assert_eq!(result.action, ScanAction::InvalidFormat);
    }

    #[test]
    fn test_foreign_payload_type_is_rejected() {
        let (conn, _) = setup();
        let foreign = serde_json::json!({"type": "parcel-locker", "code": "1234"}).to_string();
        let result = scan_at(&conn, &foreign, "2025-06-16 10:00");
        assert!(!result.success);
        assert_eq!(result.action, ScanAction::InvalidType);
    }

    #[test]
    fn test_blank_required_fields_are_corrupted() {
        let (conn, pass) = setup();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&pass.payload)
            .unwrap();
        let mut payload: PassPayload = serde_json::from_slice(&bytes).unwrap();
        payload.data.booking_id = String::new();
        let raw = serde_json::to_string(&payload).unwrap();
        let result = scan_at(&conn, &raw, "2025-06-16 10:00");
        assert!(!result.success);
        assert_eq!(result.action, ScanAction::Corrupted);
    }

    #[test]
    fn test_tampered_data_fails_hash_check() {
        let (conn, pass) = setup();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&pass.payload)
            .unwrap();
        let mut payload: PassPayload = serde_json::from_slice(&bytes).unwrap();
        payload.data.user_id = "intruder".to_string();
        let raw = serde_json::to_string(&payload).unwrap();
        let result = scan_at(&conn, &raw, "2025-06-16 10:00");
        assert!(!result.success);
        assert_eq!(result.action, ScanAction::SecurityHashMismatch);

        // No scan is recorded for rejected payloads.
        let stored = queries::get_pass_by_booking(&conn, "bk-1").unwrap().unwrap();
        assert_eq!(stored.scan_count, 0);
    }

    #[test]
    fn test_pass_for_cleared_booking_is_not_found() {
        let (conn, pass) = setup();
        queries::delete_passes_for_booking(&conn, "bk-1").unwrap();
        let result = scan_at(&conn, &pass.payload, "2025-06-16 10:00");
        assert!(!result.success);
        assert_eq!(result.action, ScanAction::NotFound);
    }

    #[test]
    fn test_early_scan_is_acknowledged_without_check_in() {
        let (conn, pass) = setup();
        let result = scan_at(&conn, &pass.payload, "2025-06-16 09:25");
        assert!(result.success);
        assert_eq!(result.action, ScanAction::EarlyAccess);
        assert!(result.warnings[0].contains("35 minutes"), "got: {:?}", result.warnings);

        let stored = queries::get_pass_by_booking(&conn, "bk-1").unwrap().unwrap();
        assert!(stored.check_in_time.is_none());
        assert_eq!(stored.scan_count, 1);
    }

    #[test]
    fn test_scan_inside_lead_window_checks_in() {
        let (conn, pass) = setup();
        let result = scan_at(&conn, &pass.payload, "2025-06-16 09:50");
        assert!(result.success);
        assert_eq!(result.action, ScanAction::CheckIn);

        let stored = queries::get_pass_by_booking(&conn, "bk-1").unwrap().unwrap();
        assert_eq!(stored.check_in_time, Some(dt("2025-06-16 09:50")));
        let booking = queries::get_booking(&conn, "bk-1").unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::InProgress);
    }

    #[test]
    fn test_double_scan_checks_in_exactly_once() {
        let (conn, pass) = setup();
        let first = scan_at(&conn, &pass.payload, "2025-06-16 09:50");
        assert_eq!(first.action, ScanAction::CheckIn);

        let second = scan_at(&conn, &pass.payload, "2025-06-16 09:51");
        assert!(second.success);
        assert_eq!(second.action, ScanAction::ViewDetails);

        let stored = queries::get_pass_by_booking(&conn, "bk-1").unwrap().unwrap();
        assert_eq!(stored.check_in_time, Some(dt("2025-06-16 09:50")));
        assert_eq!(stored.scan_count, 2);
    }

    #[test]
    fn test_checked_in_scan_after_start_checks_out() {
        let (conn, pass) = setup();
        scan_at(&conn, &pass.payload, "2025-06-16 09:50");

        let result = scan_at(&conn, &pass.payload, "2025-06-16 10:05");
        assert!(result.success);
        assert_eq!(result.action, ScanAction::CheckOut);

        let stored = queries::get_pass_by_booking(&conn, "bk-1").unwrap().unwrap();
        assert_eq!(stored.status, PassStatus::Used);
        assert_eq!(stored.check_out_time, Some(dt("2025-06-16 10:05")));
        let booking = queries::get_booking(&conn, "bk-1").unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Completed);
        assert_eq!(booking.check_out_time, Some(dt("2025-06-16 10:05")));
    }

    #[test]
    fn test_used_pass_scans_as_view_details() {
        let (conn, pass) = setup();
        scan_at(&conn, &pass.payload, "2025-06-16 09:50");
        scan_at(&conn, &pass.payload, "2025-06-16 10:05");

        let result = scan_at(&conn, &pass.payload, "2025-06-16 10:10");
        assert!(result.success);
        assert_eq!(result.action, ScanAction::ViewDetails);

        let stored = queries::get_pass_by_booking(&conn, "bk-1").unwrap().unwrap();
        assert_eq!(stored.scan_count, 3);
        assert_eq!(stored.last_scanned_by.as_deref(), Some("gate-7"));
        assert_eq!(stored.last_scanned_at, Some(dt("2025-06-16 10:10")));
    }

    #[test]
    fn test_scan_after_end_inside_grace_is_informational() {
        let (conn, pass) = setup();
        let result = scan_at(&conn, &pass.payload, "2025-06-16 12:12");
        assert!(result.success);
        assert_eq!(result.action, ScanAction::Expired);
        assert!(result.message.contains("ended 12 minutes ago"), "got: {}", result.message);

        // Informational only: nothing transitioned, scan still logged.
        let stored = queries::get_pass_by_booking(&conn, "bk-1").unwrap().unwrap();
        assert_eq!(stored.status, PassStatus::Active);
        assert_eq!(stored.scan_count, 1);
    }

    #[test]
    fn test_scan_past_grace_window_is_terminal_expired() {
        let (conn, pass) = setup();
        let result = scan_at(&conn, &pass.payload, "2025-06-16 12:45");
        assert!(!result.success);
        assert_eq!(result.action, ScanAction::Expired);
        assert!(result.message.contains("expired 15 minutes ago"), "got: {}", result.message);

        let stored = queries::get_pass_by_booking(&conn, "bk-1").unwrap().unwrap();
        assert_eq!(stored.scan_count, 0);
    }

    #[test]
    fn test_cancelled_pass_is_terminal() {
        let (conn, pass) = setup();
        queries::cancel_passes_for_booking(&conn, "bk-1").unwrap();
        let result = scan_at(&conn, &pass.payload, "2025-06-16 10:00");
        assert!(!result.success);
        assert_eq!(result.action, ScanAction::BookingCancelled);

        let stored = queries::get_pass_by_booking(&conn, "bk-1").unwrap().unwrap();
        assert_eq!(stored.scan_count, 0);
    }

    #[test]
    fn test_checked_in_before_start_cannot_check_out_yet() {
        let (conn, pass) = setup();
        scan_at(&conn, &pass.payload, "2025-06-16 09:50");

        let result = scan_at(&conn, &pass.payload, "2025-06-16 09:55");
        assert!(result.success);
        assert_eq!(result.action, ScanAction::ViewDetails);

        let stored = queries::get_pass_by_booking(&conn, "bk-1").unwrap().unwrap();
        assert_eq!(stored.status, PassStatus::Active);
        assert!(stored.check_out_time.is_none());
    }

    #[test]
    fn test_check_out_allowed_until_end_of_window() {
        let (conn, pass) = setup();
        scan_at(&conn, &pass.payload, "2025-06-16 10:00");

        let result = scan_at(&conn, &pass.payload, "2025-06-16 12:00");
        assert!(result.success);
        assert_eq!(result.action, ScanAction::CheckOut);
    }
}
