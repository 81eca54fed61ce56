//! Check-in engine facade.
//!
//! Routes admissions to the remote authority while online and into the
//! durable offline queue otherwise. A network failure mid-call is
//! absorbed, never surfaced: the caller gets a provisional success with
//! `is_offline` set and the sync engine settles the queue later. All
//! state is owned and injected — no module-level singletons — so several
//! events or tests can run isolated instances side by side.

use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::api::{CheckInClient, RemoteCheckInApi, RemoteOutcome};
use crate::capacity::{self, GuestCountUpdateResult, Table};
use crate::config::EngineConfig;
use crate::connectivity::{ConnectivitySignal, NetworkStatus};
use crate::db::{self, DbState};
use crate::error::EngineError;
use crate::queue::{self, QueueItem};
use crate::reservation::{self, Reservation};
use crate::stats::{compute_event_stats, EventStats};
use crate::sync::{self, DrainReport, SyncState};
use crate::walkin::{self, WalkInRequest, WalkInResult};

/// Result of a check-in attempt, confirmed or provisional.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Reservation as returned by the authority, when it sent one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_location: Option<String>,
    /// True when the check-in is queued locally and pending sync.
    pub is_offline: bool,
}

pub struct CheckInEngine {
    db: Arc<DbState>,
    api: Arc<dyn RemoteCheckInApi>,
    network: Arc<dyn ConnectivitySignal>,
    sync_state: Arc<SyncState>,
    sync_interval_secs: u64,
    last_stats: Mutex<Option<EventStats>>,
}

impl CheckInEngine {
    /// Build a production engine from config: opens the local database and
    /// constructs the HTTP client for the authority.
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let db = Arc::new(db::init(&config.data_dir)?);
        let client = CheckInClient::new(
            &config.base_url,
            &config.api_key,
            &config.terminal_id,
            Some(config.request_timeout()),
        )
        .map_err(EngineError::validation)?;

        Ok(Self::from_parts(
            db,
            Arc::new(client),
            Arc::new(NetworkStatus::new(true)),
            config.sync_interval_secs,
        ))
    }

    /// Assemble an engine from pre-built collaborators. This is the seam
    /// tests and embedders use to swap in fakes.
    pub fn from_parts(
        db: Arc<DbState>,
        api: Arc<dyn RemoteCheckInApi>,
        network: Arc<dyn ConnectivitySignal>,
        sync_interval_secs: u64,
    ) -> Self {
        CheckInEngine {
            db,
            api,
            network,
            sync_state: Arc::new(SyncState::new()),
            sync_interval_secs,
            last_stats: Mutex::new(None),
        }
    }

    pub fn network(&self) -> &Arc<dyn ConnectivitySignal> {
        &self.network
    }

    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    // -----------------------------------------------------------------------
    // Check-in
    // -----------------------------------------------------------------------

    /// Admit a guest by scanned QR code hash.
    ///
    /// Online: submits to the authority directly. Offline, or when the
    /// submission fails transiently: queues locally and reports a
    /// provisional success (`is_offline = true`).
    pub async fn check_in(
        &self,
        qr_code_hash: &str,
        event_id: Option<&str>,
    ) -> Result<CheckInResult, EngineError> {
        let code = qr_code_hash.trim();
        if code.is_empty() {
            return Err(EngineError::validation("QR code is required"));
        }

        if !self.network.is_online() {
            return self.enqueue_provisional(code, event_id);
        }

        match self.api.check_in(code, event_id).await {
            RemoteOutcome::Success(confirmation) => {
                self.invalidate_stats();
                info!(qr_code_hash = code, "Check-in confirmed by authority");
                Ok(CheckInResult {
                    success: true,
                    message: None,
                    reservation: confirmation.reservation,
                    table_location: confirmation.table_location,
                    is_offline: false,
                })
            }
            RemoteOutcome::Business(message) => Ok(CheckInResult {
                success: false,
                message: Some(message),
                reservation: None,
                table_location: None,
                is_offline: false,
            }),
            RemoteOutcome::Transient(message) => {
                // Flip to offline mode and absorb the failure into the queue.
                warn!(qr_code_hash = code, error = %message, "Check-in failed transiently, queueing offline");
                self.network.set_online(false);
                self.enqueue_provisional(code, event_id)
            }
        }
    }

    fn enqueue_provisional(
        &self,
        qr_code_hash: &str,
        event_id: Option<&str>,
    ) -> Result<CheckInResult, EngineError> {
        queue::enqueue(&self.db, qr_code_hash, event_id)?;
        self.invalidate_stats();
        Ok(CheckInResult {
            success: true,
            message: Some("Checked in offline; will sync when connected".to_string()),
            reservation: None,
            table_location: None,
            is_offline: true,
        })
    }

    // -----------------------------------------------------------------------
    // Local reservation mutations
    // -----------------------------------------------------------------------

    /// Register a walk-in guest directly as checked in.
    pub fn register_walk_in(
        &self,
        event_id: &str,
        request: &WalkInRequest,
        available_tables: &[Table],
    ) -> WalkInResult {
        let result = walkin::register_walk_in(event_id, request, available_tables);
        if result.success {
            self.invalidate_stats();
        }
        result
    }

    /// Change a reservation's guest count, honoring the capacity soft limit.
    pub fn update_guest_count(
        &self,
        reservation: &mut Reservation,
        new_guest_count: i64,
        table: &Table,
        confirmed: bool,
    ) -> GuestCountUpdateResult {
        let (result, delta) = capacity::apply_update(reservation, new_guest_count, table, confirmed);
        if result.success && delta != 0 {
            self.invalidate_stats();
        }
        result
    }

    /// Cancel a reservation (illegal once checked in or terminal).
    pub fn cancel_reservation(&self, reservation: &mut Reservation) -> Result<(), EngineError> {
        reservation::apply_cancel(reservation)?;
        self.invalidate_stats();
        Ok(())
    }

    /// Mark a reservation as a no-show.
    pub fn mark_no_show(&self, reservation: &mut Reservation) -> Result<(), EngineError> {
        reservation::apply_no_show(reservation)?;
        self.invalidate_stats();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    /// Recompute stats for the given reservation set and cache the result.
    pub fn get_stats(&self, reservations: &[Reservation]) -> EventStats {
        let stats = compute_event_stats(reservations);
        if let Ok(mut cached) = self.last_stats.lock() {
            *cached = Some(stats);
        }
        stats
    }

    /// Stats refresh entry point for realtime pushes from other terminals.
    /// Never authoritative for queue state — it only recomputes.
    pub fn refresh_stats(&self, reservations: &[Reservation]) -> EventStats {
        self.get_stats(reservations)
    }

    /// Most recently computed stats, if any mutation or read happened yet.
    pub fn last_stats(&self) -> Option<EventStats> {
        self.last_stats.lock().ok().and_then(|s| *s)
    }

    fn invalidate_stats(&self) {
        if let Ok(mut cached) = self.last_stats.lock() {
            *cached = None;
        }
    }

    // -----------------------------------------------------------------------
    // Queue surface
    // -----------------------------------------------------------------------

    pub fn queue_list(&self) -> Result<Vec<QueueItem>, EngineError> {
        queue::list(&self.db)
    }

    pub fn queue_count(&self) -> Result<u64, EngineError> {
        queue::count(&self.db)
    }

    pub fn failed_items(&self) -> Result<Vec<QueueItem>, EngineError> {
        queue::failed_items(&self.db)
    }

    /// Reset failed items to pending with a fresh retry budget. Any drain
    /// in flight is invalidated so it cannot clobber the reset rows.
    pub fn retry_failed(&self) -> Result<usize, EngineError> {
        self.sync_state.bump_generation();
        queue::retry_failed(&self.db)
    }

    /// Drop the entire queue. Invalidates any drain in flight.
    pub fn clear_queue(&self) -> Result<usize, EngineError> {
        self.sync_state.bump_generation();
        queue::clear(&self.db)
    }

    // -----------------------------------------------------------------------
    // Sync control
    // -----------------------------------------------------------------------

    /// Run one drain pass now.
    pub async fn drain_queue(&self) -> Result<DrainReport, EngineError> {
        sync::drain(&self.db, self.api.as_ref(), &self.sync_state).await
    }

    /// Start the background sync loop and hook reconnect-triggered drains.
    /// Must be called from within a tokio runtime.
    pub fn start_sync(&self) {
        sync::start_sync_loop(
            self.db.clone(),
            self.api.clone(),
            self.network.clone(),
            self.sync_state.clone(),
            self.sync_interval_secs,
        );

        // Offline -> online transitions kick an immediate drain instead of
        // waiting out the interval.
        let db = self.db.clone();
        let api = self.api.clone();
        let state = self.sync_state.clone();
        self.network.on_change(Box::new(move |online| {
            if !online {
                return;
            }
            let db = db.clone();
            let api = api.clone();
            let state = state.clone();
            tokio::spawn(async move {
                if let Err(e) = sync::drain(&db, api.as_ref(), &state).await {
                    warn!("Reconnect drain failed: {e}");
                }
            });
        }));
    }

    pub fn stop_sync(&self) {
        sync::stop_sync_loop(&self.sync_state);
    }

    pub fn last_sync(&self) -> Option<String> {
        self.sync_state.last_sync.lock().ok().and_then(|s| s.clone())
    }
}
