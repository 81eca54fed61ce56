//! Background sync engine for queued offline check-ins.
//!
//! Drains the durable queue against the remote authority: each item is
//! claimed (`pending` → `syncing`), submitted, and then removed on
//! success, parked as failed on a business rejection or an exhausted
//! retry budget, or returned to `pending` with an exponential-backoff
//! window after a transient fault. A drain is single-flight — a second
//! invocation while one is active is a no-op — and a drain that outlives
//! a queue reset (clear / manual retry) detects the generation change and
//! stops applying results.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::api::{RemoteCheckInApi, RemoteOutcome};
use crate::connectivity::ConnectivitySignal;
use crate::db::{self, DbState};
use crate::error::EngineError;
use crate::queue;

const DEFAULT_RETRY_DELAY_MS: i64 = 5_000;
const MAX_RETRY_DELAY_MS: i64 = 300_000;

/// Shared sync-engine state: the single-flight latch, the loop switch,
/// and the generation token that invalidates stale drains.
pub struct SyncState {
    draining: AtomicBool,
    pub is_running: Arc<AtomicBool>,
    generation: AtomicU64,
    pub last_sync: Mutex<Option<String>>,
}

impl SyncState {
    pub fn new() -> Self {
        SyncState {
            draining: AtomicBool::new(false),
            is_running: Arc::new(AtomicBool::new(false)),
            generation: AtomicU64::new(0),
            last_sync: Mutex::new(None),
        }
    }

    /// Invalidate any drain currently in flight. Called by queue resets
    /// (clear, manual retry) so late-arriving results are discarded.
    pub fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl Default for SyncState {
    fn default() -> Self {
        SyncState::new()
    }
}

/// Releases the single-flight latch even when a drain errors out early.
struct DrainGuard<'a>(&'a SyncState);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.draining.store(false, Ordering::SeqCst);
    }
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    /// Items confirmed by the authority and removed.
    pub synced: usize,
    /// Items parked as failed (business rejection or exhausted retries).
    pub failed: usize,
    /// Items pushed back to pending with a backoff window.
    pub retried: usize,
    /// Items skipped (claimed elsewhere, vanished mid-flight, or stale drain).
    pub skipped: usize,
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

fn deterministic_jitter_ms(seed: i64) -> i64 {
    let positive = if seed < 0 { -seed } else { seed };
    (positive % 700) + 50
}

fn schedule_next_retry(delay_ms: i64, seed: i64, now: DateTime<Utc>) -> String {
    let bounded = delay_ms.clamp(1_000, MAX_RETRY_DELAY_MS);
    let jitter = deterministic_jitter_ms(seed);
    (now + ChronoDuration::milliseconds(bounded + jitter)).to_rfc3339()
}

/// Exponential backoff for the given attempt number, capped.
fn backoff_delay_ms(retry_count: u32) -> i64 {
    let shifted = DEFAULT_RETRY_DELAY_MS.saturating_mul(1_i64 << retry_count.min(16));
    shifted.min(MAX_RETRY_DELAY_MS)
}

fn jitter_seed(id: &str) -> i64 {
    id.bytes().map(i64::from).sum()
}

// ---------------------------------------------------------------------------
// Drain
// ---------------------------------------------------------------------------

/// Drain every due queued check-in against the authority.
///
/// Single-flight: when a drain is already running this returns an empty
/// report immediately.
pub async fn drain(
    db: &DbState,
    api: &dyn RemoteCheckInApi,
    state: &SyncState,
) -> Result<DrainReport, EngineError> {
    drain_due_at(db, api, state, Utc::now()).await
}

/// Drain items due as of `now`. Split out so tests can step time across
/// backoff windows.
pub async fn drain_due_at(
    db: &DbState,
    api: &dyn RemoteCheckInApi,
    state: &SyncState,
    now: DateTime<Utc>,
) -> Result<DrainReport, EngineError> {
    if state
        .draining
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        debug!("Drain already in progress, skipping");
        return Ok(DrainReport::default());
    }
    let _guard = DrainGuard(state);

    let generation = state.current_generation();
    let items = queue::due_pending(db, &now.to_rfc3339())?;
    if items.is_empty() {
        return Ok(DrainReport::default());
    }

    info!(items = items.len(), "Draining offline check-in queue");
    let mut report = DrainReport::default();

    for (index, item) in items.iter().enumerate() {
        // Claim the row; losing the claim means another path got there first.
        if !queue::mark_syncing(db, &item.id)? {
            report.skipped += 1;
            continue;
        }

        let outcome = api.check_in(&item.qr_code_hash, item.event_id.as_deref()).await;

        // The queue may have been cleared or reset while the call was in
        // flight. A stale drain must not apply its result.
        if state.current_generation() != generation {
            warn!(item_id = %item.id, "Queue reset during drain, discarding result");
            let _ = queue::release_syncing(db, &item.id);
            // This item plus everything left in the snapshot goes
            // unprocessed; the report must still account for all of it.
            report.skipped += items.len() - index;
            break;
        }
        if queue::get(db, &item.id)?.is_none() {
            report.skipped += 1;
            continue;
        }

        match outcome {
            RemoteOutcome::Success(_) => {
                queue::remove(db, &item.id)?;
                report.synced += 1;
                info!(item_id = %item.id, qr_code_hash = %item.qr_code_hash, "Offline check-in synced");
            }
            RemoteOutcome::Business(message) => {
                // Not transient; retrying cannot help.
                queue::mark_failed(db, &item.id, &message)?;
                report.failed += 1;
                warn!(item_id = %item.id, error = %message, "Offline check-in rejected by authority");
            }
            RemoteOutcome::Transient(message) => {
                let attempts = item.retry_count + 1;
                if attempts >= item.max_retries {
                    let exhausted = EngineError::QueueExhausted {
                        id: item.id.clone(),
                        attempts,
                    };
                    queue::mark_failed(db, &item.id, &exhausted.to_string())?;
                    report.failed += 1;
                    warn!(item_id = %item.id, attempts, "Offline check-in retries exhausted");
                } else {
                    let next_retry_at = schedule_next_retry(
                        backoff_delay_ms(attempts),
                        jitter_seed(&item.id),
                        now,
                    );
                    queue::schedule_retry(db, &item.id, attempts, &next_retry_at, &message)?;
                    report.retried += 1;
                    debug!(
                        item_id = %item.id,
                        retry_count = attempts,
                        next_retry_at = %next_retry_at,
                        "Offline check-in deferred after transient failure"
                    );
                }
            }
        }
    }

    if let Ok(mut guard) = state.last_sync.lock() {
        *guard = Some(now.to_rfc3339());
    }
    if let Ok(conn) = db.conn.lock() {
        let _ = db::set_setting(&conn, "last_sync", &now.to_rfc3339());
    }

    Ok(report)
}

// ---------------------------------------------------------------------------
// Background sync loop
// ---------------------------------------------------------------------------

/// Start the background sync loop. Spawns a tokio task that probes
/// reachability every `interval_secs`, records connectivity transitions,
/// and drains the queue whenever the authority is reachable.
pub fn start_sync_loop(
    db: Arc<DbState>,
    api: Arc<dyn RemoteCheckInApi>,
    network: Arc<dyn ConnectivitySignal>,
    state: Arc<SyncState>,
    interval_secs: u64,
) {
    let is_running = state.is_running.clone();
    is_running.store(true, Ordering::SeqCst);

    tokio::spawn(async move {
        info!("Sync loop started (interval: {interval_secs}s)");
        let mut previous_online: Option<bool> = None;

        loop {
            if !is_running.load(Ordering::SeqCst) {
                info!("Sync loop stopped");
                break;
            }

            tokio::time::sleep(Duration::from_secs(interval_secs)).await;

            if !is_running.load(Ordering::SeqCst) {
                break;
            }

            let reachable = api.is_reachable().await;
            network.set_online(reachable);

            if !reachable {
                if previous_online != Some(false) {
                    info!("Network offline; deferring sync and keeping queue pending");
                }
                previous_online = Some(false);
                continue;
            }

            if previous_online == Some(false) {
                info!("Network restored; resuming queued sync");
            }
            previous_online = Some(true);

            match drain(&db, api.as_ref(), &state).await {
                Ok(report) => {
                    if report.synced > 0 || report.failed > 0 {
                        info!(
                            synced = report.synced,
                            failed = report.failed,
                            retried = report.retried,
                            "Sync cycle complete"
                        );
                    }
                }
                Err(e) => warn!("Sync cycle failed: {e}"),
            }
        }
    });
}

/// Stop the background loop after its current cycle.
pub fn stop_sync_loop(state: &SyncState) {
    state.is_running.store(false, Ordering::SeqCst);
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedApi;
    use super::*;
    use crate::api::CheckInConfirmation;
    use crate::db::test_db;
    use crate::queue::{self, QueueItemStatus, DEFAULT_MAX_RETRIES};

    fn success() -> RemoteOutcome {
        RemoteOutcome::Success(CheckInConfirmation {
            reservation: None,
            table_location: None,
        })
    }

    #[tokio::test]
    async fn test_successful_drain_removes_item() {
        let db = test_db();
        let state = SyncState::new();
        let api = ScriptedApi::new();

        let item = queue::enqueue(&db, "hash-ok", Some("ev-1")).unwrap();
        api.script("hash-ok", success());

        let report = drain(&db, &api, &state).await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 0);
        assert!(queue::get(&db, &item.id).unwrap().is_none());
        assert_eq!(queue::count(&db).unwrap(), 0);
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_business_error_parks_item_without_retry() {
        let db = test_db();
        let state = SyncState::new();
        let api = ScriptedApi::new();

        let item = queue::enqueue(&db, "hash-bad", None).unwrap();
        api.script("hash-bad", RemoteOutcome::Business("invalid code".to_string()));

        let report = drain(&db, &api, &state).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.retried, 0);

        let stored = queue::get(&db, &item.id).unwrap().unwrap();
        assert_eq!(stored.status, QueueItemStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("invalid code"));
        assert_eq!(stored.retry_count, 0, "business rejection burns no retry");

        // Further drains must not touch it.
        let report = drain(&db, &api, &state).await.unwrap();
        assert_eq!(report, DrainReport::default());
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_back_off_then_exhaust() {
        let db = test_db();
        let state = SyncState::new();
        let api = ScriptedApi::new();

        let item = queue::enqueue(&db, "hash-flaky", None).unwrap();
        assert_eq!(item.max_retries, DEFAULT_MAX_RETRIES);
        for _ in 0..DEFAULT_MAX_RETRIES {
            api.script("hash-flaky", RemoteOutcome::Transient("timeout".to_string()));
        }

        // First attempt: retried with retry_count == 1, still pending.
        let now = Utc::now();
        let report = drain_due_at(&db, &api, &state, now).await.unwrap();
        assert_eq!(report.retried, 1);
        let stored = queue::get(&db, &item.id).unwrap().unwrap();
        assert_eq!(stored.status, QueueItemStatus::Pending);
        assert_eq!(stored.retry_count, 1);
        assert!(stored.next_retry_at.is_some());

        // Not yet due: an immediate drain skips it entirely.
        let report = drain_due_at(&db, &api, &state, now).await.unwrap();
        assert_eq!(report, DrainReport::default());
        assert_eq!(api.call_count(), 1);

        // Step past the backoff window: second attempt, retry_count == 2.
        let later = now + ChronoDuration::seconds(3_600);
        let report = drain_due_at(&db, &api, &state, later).await.unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(queue::get(&db, &item.id).unwrap().unwrap().retry_count, 2);

        // Third transient failure hits max_retries: parked as failed.
        let much_later = later + ChronoDuration::seconds(3_600);
        let report = drain_due_at(&db, &api, &state, much_later).await.unwrap();
        assert_eq!(report.failed, 1);
        let stored = queue::get(&db, &item.id).unwrap().unwrap();
        assert_eq!(stored.status, QueueItemStatus::Failed);
        assert!(stored.last_error.unwrap().contains("3 attempts"));
        assert_eq!(queue::count(&db).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mixed_batch_processed_independently() {
        let db = test_db();
        let state = SyncState::new();
        let api = ScriptedApi::new();

        queue::enqueue(&db, "hash-a", None).unwrap();
        queue::enqueue(&db, "hash-b", None).unwrap();
        queue::enqueue(&db, "hash-c", None).unwrap();
        api.script("hash-a", success());
        api.script("hash-b", RemoteOutcome::Business("expired".to_string()));
        api.script("hash-c", RemoteOutcome::Transient("http 503".to_string()));

        let report = drain(&db, &api, &state).await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.retried, 1);
        assert_eq!(queue::count(&db).unwrap(), 1);
        assert_eq!(queue::failed_items(&db).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_generation_bump_discards_stale_result() {
        let db = test_db();
        let state = Arc::new(SyncState::new());
        let api = ScriptedApi::new();

        let item = queue::enqueue(&db, "hash-stale", None).unwrap();
        api.script("hash-stale", success());

        // The queue is reset while the remote call is in flight.
        let state_in_hook = state.clone();
        *api.on_call.lock().unwrap() = Some(Box::new(move || {
            state_in_hook.bump_generation();
        }));

        let report = drain(&db, &api, &state).await.unwrap();
        assert_eq!(report.synced, 0);
        assert_eq!(report.skipped, 1);

        // The item was released back to pending, retry budget untouched.
        let stored = queue::get(&db, &item.id).unwrap().unwrap();
        assert_eq!(stored.status, QueueItemStatus::Pending);
        assert_eq!(stored.retry_count, 0);
    }

    #[tokio::test]
    async fn test_stale_drain_accounts_for_unprocessed_remainder() {
        let db = test_db();
        let state = Arc::new(SyncState::new());
        let api = ScriptedApi::new();

        let first = queue::enqueue(&db, "hash-one", None).unwrap();
        let second = queue::enqueue(&db, "hash-two", None).unwrap();
        api.script("hash-one", success());
        api.script("hash-two", success());

        let state_in_hook = state.clone();
        *api.on_call.lock().unwrap() = Some(Box::new(move || {
            state_in_hook.bump_generation();
        }));

        let report = drain(&db, &api, &state).await.unwrap();
        assert_eq!(report.synced, 0);
        assert_eq!(
            report.skipped, 2,
            "in-flight item and untouched remainder both count as skipped"
        );
        assert_eq!(api.call_count(), 1, "remainder is never submitted");

        // Neither item lost state: both pending with untouched budgets.
        for id in [&first.id, &second.id] {
            let stored = queue::get(&db, id).unwrap().unwrap();
            assert_eq!(stored.status, QueueItemStatus::Pending);
            assert_eq!(stored.retry_count, 0);
        }
    }

    #[tokio::test]
    async fn test_single_flight_second_drain_is_noop() {
        let db = Arc::new(test_db());
        let state = Arc::new(SyncState::new());

        queue::enqueue(&db, "hash-slow", None).unwrap();

        // An api whose first call parks until released, so the outer drain
        // stays in flight while we attempt a second one.
        struct BlockingApi {
            gate: tokio::sync::Semaphore,
            entered: tokio::sync::Notify,
        }
        #[async_trait::async_trait]
        impl RemoteCheckInApi for BlockingApi {
            async fn check_in(&self, _qr: &str, _ev: Option<&str>) -> RemoteOutcome {
                self.entered.notify_one();
                let _permit = self.gate.acquire().await.unwrap();
                RemoteOutcome::Success(CheckInConfirmation {
                    reservation: None,
                    table_location: None,
                })
            }
        }

        let api = Arc::new(BlockingApi {
            gate: tokio::sync::Semaphore::new(0),
            entered: tokio::sync::Notify::new(),
        });

        let drain_db = db.clone();
        let drain_state = state.clone();
        let drain_api = api.clone();
        let first = tokio::spawn(async move {
            drain(&drain_db, drain_api.as_ref(), &drain_state).await.unwrap()
        });

        // Wait until the first drain is inside the remote call.
        api.entered.notified().await;

        let second = drain(&db, api.as_ref(), &state).await.unwrap();
        assert_eq!(second, DrainReport::default(), "concurrent drain must no-op");

        api.gate.add_permits(1);
        let first_report = first.await.unwrap();
        assert_eq!(first_report.synced, 1);
        assert_eq!(queue::count(&db).unwrap(), 0);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay_ms(0), 5_000);
        assert_eq!(backoff_delay_ms(1), 10_000);
        assert_eq!(backoff_delay_ms(2), 20_000);
        assert_eq!(backoff_delay_ms(10), MAX_RETRY_DELAY_MS);
    }

    #[test]
    fn test_jitter_is_bounded_and_deterministic() {
        for seed in [0, 1, -50, 699, 12_345] {
            let j = deterministic_jitter_ms(seed);
            assert!((50..750).contains(&j), "jitter {j} out of range");
            assert_eq!(j, deterministic_jitter_ms(seed));
        }
    }

    #[test]
    fn test_schedule_next_retry_is_in_the_future() {
        let now = Utc::now();
        let at = schedule_next_retry(5_000, 7, now);
        let parsed: DateTime<Utc> = at.parse().unwrap();
        assert!(parsed > now);
        assert!(parsed < now + ChronoDuration::milliseconds(MAX_RETRY_DELAY_MS + 1_000));
    }
}
