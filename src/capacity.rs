//! Table capacity validation for guest-count changes.
//!
//! A guest count above the table's capacity is allowed, but only as an
//! explicit soft-limit override: the first attempt comes back with
//! `requires_confirmation` and a warning naming the capacity, and the
//! change commits only when the caller retries with `confirmed = true`.

use serde::{Deserialize, Serialize};

use crate::reservation::Reservation;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: String,
    pub label: String,
    pub capacity: u32,
    pub has_active_reservation: bool,
}

/// Outcome of validating a proposed guest count against a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityCheck {
    pub valid: bool,
    pub requires_confirmation: bool,
    pub message: Option<String>,
}

/// Result returned to the caller of a guest-count update.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestCountUpdateResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub requires_confirmation: bool,
    pub new_guest_count: u32,
}

/// Validate a proposed guest count against a table.
pub fn validate(new_guest_count: i64, table: &Table) -> CapacityCheck {
    if new_guest_count < 1 {
        return CapacityCheck {
            valid: false,
            requires_confirmation: false,
            message: Some("guest count must be at least 1".to_string()),
        };
    }
    // Counts that do not fit the stored width are plain invalid, not a
    // soft-limit override; narrowing them would wrap to a small number.
    let Ok(count) = u32::try_from(new_guest_count) else {
        return CapacityCheck {
            valid: false,
            requires_confirmation: false,
            message: Some(format!("guest count {new_guest_count} is out of range")),
        };
    };
    if count > table.capacity {
        return CapacityCheck {
            valid: true,
            requires_confirmation: true,
            message: Some(format!(
                "guest count {new_guest_count} exceeds table {} capacity of {}",
                table.label, table.capacity
            )),
        };
    }
    CapacityCheck {
        valid: true,
        requires_confirmation: false,
        message: None,
    }
}

/// Apply a guest-count change to a reservation.
///
/// Invalid or unconfirmed over-capacity updates leave the reservation
/// untouched. On commit, returns the signed guest delta alongside the
/// result so the caller can recompute event stats.
pub fn apply_update(
    reservation: &mut Reservation,
    new_guest_count: i64,
    table: &Table,
    confirmed: bool,
) -> (GuestCountUpdateResult, i64) {
    let check = validate(new_guest_count, table);

    if !check.valid {
        return (
            GuestCountUpdateResult {
                success: false,
                warning: check.message,
                requires_confirmation: false,
                new_guest_count: reservation.guest_count,
            },
            0,
        );
    }

    if check.requires_confirmation && !confirmed {
        return (
            GuestCountUpdateResult {
                success: false,
                warning: check.message,
                requires_confirmation: true,
                new_guest_count: reservation.guest_count,
            },
            0,
        );
    }

    // validate() only passes counts that fit; reject rather than wrap if
    // that guarantee is ever broken.
    let Ok(count) = u32::try_from(new_guest_count) else {
        return (
            GuestCountUpdateResult {
                success: false,
                warning: check.message,
                requires_confirmation: false,
                new_guest_count: reservation.guest_count,
            },
            0,
        );
    };

    let delta = i64::from(count) - i64::from(reservation.guest_count);
    reservation.guest_count = count;
    (
        GuestCountUpdateResult {
            success: true,
            warning: None,
            requires_confirmation: false,
            new_guest_count: reservation.guest_count,
        },
        delta,
    )
}
