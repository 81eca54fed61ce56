//! Reservation model and admission state machine.
//!
//! A reservation only moves forward: `pending`/`confirmed` may become
//! `checked_in`, any non-terminal status may become `cancelled` or
//! `no_show`, and those two are terminal. Checking in an
//! already-checked-in reservation is an idempotent no-op so that replays
//! from a second terminal or a drained offline queue never double-admit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Reservation lifecycle status. Wire names match the admin dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    CheckedIn,
    Cancelled,
    NoShow,
}

impl ReservationStatus {
    /// Active reservations count toward expected attendance and guest totals.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ReservationStatus::Pending
                | ReservationStatus::Confirmed
                | ReservationStatus::CheckedIn
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReservationStatus::Cancelled | ReservationStatus::NoShow)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: String,
    pub event_id: String,
    pub table_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_name: Option<String>,
    pub guest_count: u32,
    pub status: ReservationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_in_time: Option<DateTime<Utc>>,
    pub qr_code_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What `apply_check_in` actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInTransition {
    /// Fresh admission: status moved to `checked_in` just now.
    CheckedIn,
    /// Reservation was already checked in; nothing changed.
    AlreadyCheckedIn,
}

/// Check a reservation in.
///
/// Terminal statuses are rejected; an already-checked-in reservation
/// succeeds without mutation (its original `check_in_time` is kept).
pub fn apply_check_in(reservation: &mut Reservation) -> Result<CheckInTransition, EngineError> {
    match reservation.status {
        ReservationStatus::Cancelled => Err(EngineError::state_conflict(
            "reservation is cancelled and cannot be checked in",
        )),
        ReservationStatus::NoShow => Err(EngineError::state_conflict(
            "reservation is marked no-show and cannot be checked in",
        )),
        ReservationStatus::CheckedIn => Ok(CheckInTransition::AlreadyCheckedIn),
        ReservationStatus::Pending | ReservationStatus::Confirmed => {
            reservation.status = ReservationStatus::CheckedIn;
            reservation.check_in_time = Some(Utc::now());
            Ok(CheckInTransition::CheckedIn)
        }
    }
}

/// Cancel a reservation. Fails once checked in or already terminal.
pub fn apply_cancel(reservation: &mut Reservation) -> Result<(), EngineError> {
    match reservation.status {
        ReservationStatus::Pending | ReservationStatus::Confirmed => {
            reservation.status = ReservationStatus::Cancelled;
            Ok(())
        }
        ReservationStatus::CheckedIn => Err(EngineError::state_conflict(
            "reservation is already checked in and cannot be cancelled",
        )),
        ReservationStatus::Cancelled | ReservationStatus::NoShow => Err(
            EngineError::state_conflict("reservation is already closed"),
        ),
    }
}

/// Mark a reservation as a no-show. Same guards as `apply_cancel`.
pub fn apply_no_show(reservation: &mut Reservation) -> Result<(), EngineError> {
    match reservation.status {
        ReservationStatus::Pending | ReservationStatus::Confirmed => {
            reservation.status = ReservationStatus::NoShow;
            Ok(())
        }
        ReservationStatus::CheckedIn => Err(EngineError::state_conflict(
            "reservation is already checked in and cannot be marked no-show",
        )),
        ReservationStatus::Cancelled | ReservationStatus::NoShow => Err(
            EngineError::state_conflict("reservation is already closed"),
        ),
    }
}

#[cfg(test)]
pub(crate) fn test_reservation(status: ReservationStatus, guest_count: u32) -> Reservation {
    Reservation {
        id: uuid::Uuid::new_v4().to_string(),
        event_id: "event-1".to_string(),
        table_id: "table-1".to_string(),
        customer_id: None,
        guest_name: Some("Guest".to_string()),
        guest_count,
        status,
        check_in_time: if status == ReservationStatus::CheckedIn {
            Some(Utc::now())
        } else {
            None
        },
        qr_code_hash: format!("qr-{}", uuid::Uuid::new_v4()),
        phone: None,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_in_from_pending_sets_time() {
        let mut r = test_reservation(ReservationStatus::Pending, 2);
        let before = Utc::now();
        let outcome = apply_check_in(&mut r).unwrap();
        let after = Utc::now();

        assert_eq!(outcome, CheckInTransition::CheckedIn);
        assert_eq!(r.status, ReservationStatus::CheckedIn);
        let t = r.check_in_time.expect("check_in_time set");
        assert!(t >= before && t <= after);
    }

    #[test]
    fn test_check_in_from_confirmed() {
        let mut r = test_reservation(ReservationStatus::Confirmed, 4);
        assert_eq!(apply_check_in(&mut r).unwrap(), CheckInTransition::CheckedIn);
        assert_eq!(r.status, ReservationStatus::CheckedIn);
    }

    #[test]
    fn test_check_in_idempotent_keeps_original_time() {
        let mut r = test_reservation(ReservationStatus::Pending, 2);
        apply_check_in(&mut r).unwrap();
        let first_time = r.check_in_time;

        let outcome = apply_check_in(&mut r).unwrap();
        assert_eq!(outcome, CheckInTransition::AlreadyCheckedIn);
        assert_eq!(r.check_in_time, first_time, "replay must not touch the timestamp");
        assert_eq!(r.status, ReservationStatus::CheckedIn);
    }

    #[test]
    fn test_check_in_rejected_for_terminal_statuses() {
        for status in [ReservationStatus::Cancelled, ReservationStatus::NoShow] {
            let mut r = test_reservation(status, 2);
            let err = apply_check_in(&mut r).unwrap_err();
            assert!(matches!(err, EngineError::StateConflict(_)));
            assert_eq!(r.status, status, "failed transition must not mutate");
            assert!(r.check_in_time.is_none());
        }
    }

    #[test]
    fn test_cancel_and_no_show_from_active() {
        let mut r = test_reservation(ReservationStatus::Pending, 2);
        apply_cancel(&mut r).unwrap();
        assert_eq!(r.status, ReservationStatus::Cancelled);

        let mut r = test_reservation(ReservationStatus::Confirmed, 2);
        apply_no_show(&mut r).unwrap();
        assert_eq!(r.status, ReservationStatus::NoShow);
    }

    #[test]
    fn test_cancel_rejected_after_check_in() {
        let mut r = test_reservation(ReservationStatus::CheckedIn, 2);
        assert!(matches!(
            apply_cancel(&mut r),
            Err(EngineError::StateConflict(_))
        ));
        assert!(matches!(
            apply_no_show(&mut r),
            Err(EngineError::StateConflict(_))
        ));
        assert_eq!(r.status, ReservationStatus::CheckedIn);
    }

    #[test]
    fn test_terminal_statuses_are_immutable() {
        let mut r = test_reservation(ReservationStatus::Cancelled, 2);
        assert!(apply_cancel(&mut r).is_err());
        assert!(apply_no_show(&mut r).is_err());
        assert_eq!(r.status, ReservationStatus::Cancelled);
    }
}
