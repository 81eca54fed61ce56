//! Live event statistics, derived from the current reservation set.
//!
//! Stats are never stored or mutated independently: every committing
//! mutation recomputes them from scratch with a single pass, so they can
//! also be recomputed for reconciliation after a sync drain.

use serde::Serialize;

use crate::reservation::{Reservation, ReservationStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    /// Reservations still expected or already admitted (pending, confirmed, checked_in).
    pub total_expected: u64,
    pub checked_in: u64,
    pub remaining: u64,
    pub cancelled: u64,
    pub no_show: u64,
    /// Rounded percentage in [0, 100]; 0 when nothing is expected.
    pub check_in_percentage: u64,
    /// Sum of guest counts over active reservations only.
    pub total_guest_count: u64,
}

/// Compute stats for a reservation set. Pure, O(n).
pub fn compute_event_stats(reservations: &[Reservation]) -> EventStats {
    let mut stats = EventStats::default();

    for r in reservations {
        match r.status {
            ReservationStatus::Pending | ReservationStatus::Confirmed => {
                stats.total_expected += 1;
                stats.total_guest_count += u64::from(r.guest_count);
            }
            ReservationStatus::CheckedIn => {
                stats.total_expected += 1;
                stats.checked_in += 1;
                stats.total_guest_count += u64::from(r.guest_count);
            }
            ReservationStatus::Cancelled => stats.cancelled += 1,
            ReservationStatus::NoShow => stats.no_show += 1,
        }
    }

    stats.remaining = stats.total_expected - stats.checked_in;
    stats.check_in_percentage = if stats.total_expected > 0 {
        ((stats.checked_in as f64 / stats.total_expected as f64) * 100.0).round() as u64
    } else {
        0
    };

    stats
}
