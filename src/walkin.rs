//! Walk-in registration: ad hoc admissions with no prior booking.
//!
//! A walk-in is created directly as `checked_in` against a free table.
//! Validation runs in a fixed order (name, count, table id) and the first
//! failure wins; an occupied table beats insufficient capacity.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::capacity::Table;
use crate::reservation::{Reservation, ReservationStatus};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkInRequest {
    pub guest_name: String,
    pub guest_count: Option<i64>,
    pub table_id: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkInResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation: Option<Reservation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WalkInResult {
    fn failed(message: impl Into<String>) -> Self {
        WalkInResult {
            success: false,
            reservation: None,
            error: Some(message.into()),
        }
    }
}

/// Register a walk-in against one of the available tables.
pub fn register_walk_in(
    event_id: &str,
    request: &WalkInRequest,
    available_tables: &[Table],
) -> WalkInResult {
    let guest_name = request.guest_name.trim();
    if guest_name.is_empty() {
        return WalkInResult::failed("guest name is required");
    }

    let guest_count = match request.guest_count {
        Some(c) if c >= 1 => match u32::try_from(c) {
            Ok(c) => c,
            // A narrowing cast here would wrap 2^32 to a zero guest count.
            Err(_) => return WalkInResult::failed(format!("guest count {c} is out of range")),
        },
        _ => return WalkInResult::failed("guest count must be at least 1"),
    };

    let table_id = request.table_id.trim();
    if table_id.is_empty() {
        return WalkInResult::failed("table is required");
    }

    let table = match available_tables.iter().find(|t| t.id == table_id) {
        Some(t) => t,
        None => return WalkInResult::failed(format!("table {table_id} not found")),
    };

    // Occupancy is checked before capacity.
    if table.has_active_reservation {
        return WalkInResult::failed(format!("table {} is occupied", table.label));
    }
    if table.capacity < guest_count {
        return WalkInResult::failed(format!(
            "table {} has insufficient capacity ({} seats for {} guests)",
            table.label, table.capacity, guest_count
        ));
    }

    let now = Utc::now();
    let reservation = Reservation {
        id: Uuid::new_v4().to_string(),
        event_id: event_id.to_string(),
        table_id: table.id.clone(),
        customer_id: None,
        guest_name: Some(guest_name.to_string()),
        guest_count,
        status: ReservationStatus::CheckedIn,
        check_in_time: Some(now),
        qr_code_hash: format!("walkin-{}", Uuid::new_v4()),
        phone: request
            .phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string),
        created_at: now,
    };

    info!(
        reservation_id = %reservation.id,
        table_id = %table.id,
        guest_count,
        "Walk-in registered"
    );

    WalkInResult {
        success: true,
        reservation: Some(reservation),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tables() -> Vec<Table> {
        vec![
            Table {
                id: "t-free".to_string(),
                label: "A1".to_string(),
                capacity: 6,
                has_active_reservation: false,
            },
            Table {
                id: "t-busy".to_string(),
                label: "A2".to_string(),
                capacity: 10,
                has_active_reservation: true,
            },
            Table {
                id: "t-small".to_string(),
                label: "A3".to_string(),
                capacity: 2,
                has_active_reservation: false,
            },
        ]
    }

    fn request(name: &str, count: Option<i64>, table_id: &str) -> WalkInRequest {
        WalkInRequest {
            guest_name: name.to_string(),
            guest_count: count,
            table_id: table_id.to_string(),
            phone: None,
        }
    }

    #[test]
    fn test_empty_or_whitespace_name_fails_with_name_message() {
        for name in ["", "   ", "\t\n"] {
            let result = register_walk_in("ev-1", &request(name, Some(2), "t-free"), &tables());
            assert!(!result.success);
            assert_eq!(result.error.as_deref(), Some("guest name is required"));
        }
    }

    #[test]
    fn test_missing_or_invalid_count_fails_with_count_message() {
        for count in [None, Some(0), Some(-2)] {
            let result = register_walk_in("ev-1", &request("Dana", count, "t-free"), &tables());
            assert!(!result.success);
            assert_eq!(
                result.error.as_deref(),
                Some("guest count must be at least 1")
            );
        }
    }

    #[test]
    fn test_count_wider_than_u32_fails_without_creating_reservation() {
        for count in [1_i64 << 32, i64::from(u32::MAX) + 1] {
            let result =
                register_walk_in("ev-1", &request("Dana", Some(count), "t-busy"), &tables());
            assert!(!result.success, "count {count} must be rejected");
            assert!(result.reservation.is_none());
            assert!(result.error.unwrap().contains("out of range"));
        }
    }

    #[test]
    fn test_empty_table_id_fails_with_table_message() {
        let result = register_walk_in("ev-1", &request("Dana", Some(2), "  "), &tables());
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("table is required"));
    }

    #[test]
    fn test_unknown_table_fails() {
        let result = register_walk_in("ev-1", &request("Dana", Some(2), "t-missing"), &tables());
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[test]
    fn test_occupied_table_fails_even_with_room() {
        // t-busy has capacity 10, more than enough; occupancy must win.
        let result = register_walk_in("ev-1", &request("Dana", Some(2), "t-busy"), &tables());
        assert!(!result.success);
        assert!(result.error.unwrap().contains("occupied"));
    }

    #[test]
    fn test_insufficient_capacity_fails() {
        let result = register_walk_in("ev-1", &request("Dana", Some(4), "t-small"), &tables());
        assert!(!result.success);
        assert!(result.error.unwrap().contains("insufficient capacity"));
    }

    #[test]
    fn test_success_creates_checked_in_reservation() {
        let before = Utc::now();
        let result = register_walk_in(
            "ev-1",
            &WalkInRequest {
                guest_name: "  Dana  ".to_string(),
                guest_count: Some(4),
                table_id: "t-free".to_string(),
                phone: Some("  555-0100 ".to_string()),
            },
            &tables(),
        );
        let after = Utc::now();

        assert!(result.success);
        let r = result.reservation.unwrap();
        assert_eq!(r.status, ReservationStatus::CheckedIn);
        assert_eq!(r.guest_name.as_deref(), Some("Dana"));
        assert_eq!(r.phone.as_deref(), Some("555-0100"));
        assert_eq!(r.guest_count, 4);
        assert_eq!(r.table_id, "t-free");
        assert_eq!(r.event_id, "ev-1");
        let t = r.check_in_time.unwrap();
        assert!(t >= before && t <= after);
    }

    #[test]
    fn test_blank_phone_stored_as_none() {
        let result = register_walk_in(
            "ev-1",
            &WalkInRequest {
                guest_name: "Dana".to_string(),
                guest_count: Some(1),
                table_id: "t-free".to_string(),
                phone: Some("   ".to_string()),
            },
            &tables(),
        );
        assert!(result.success);
        assert!(result.reservation.unwrap().phone.is_none());
    }

    #[test]
    fn test_distinct_ids_across_registrations() {
        let a = register_walk_in("ev-1", &request("Dana", Some(1), "t-free"), &tables());
        let b = register_walk_in("ev-1", &request("Dana", Some(1), "t-free"), &tables());
        assert_ne!(
            a.reservation.unwrap().id,
            b.reservation.unwrap().id,
            "each walk-in gets a fresh id"
        );
    }
}
