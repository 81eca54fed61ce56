//! Offline-capable event check-in engine.
//!
//! Admits guests at a live event by validating and transitioning
//! reservation state, derives live admission statistics, and keeps the
//! local terminal consistent with the remote authority under intermittent
//! connectivity. Check-ins taken offline land in a durable SQLite queue
//! and are drained in the background with retry and exponential backoff;
//! admission is at-most-once because both the local state machine and the
//! authority treat a duplicate submission as an idempotent replay.
//!
//! Typical wiring:
//!
//! ```no_run
//! use checkin_engine::{CheckInEngine, EngineConfig};
//!
//! # async fn run() -> Result<(), checkin_engine::EngineError> {
//! let config = EngineConfig {
//!     base_url: "https://events.example.com".into(),
//!     api_key: "key".into(),
//!     terminal_id: "door-3".into(),
//!     data_dir: "/var/lib/checkin".into(),
//!     sync_interval_secs: 30,
//!     request_timeout_secs: 10,
//! };
//! let engine = CheckInEngine::new(&config)?;
//! engine.start_sync();
//! let result = engine.check_in("scanned-qr-hash", Some("ev-42")).await?;
//! # Ok(())
//! # }
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod capacity;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod engine;
pub mod error;
pub mod queue;
pub mod reservation;
pub mod stats;
pub mod sync;
pub mod walkin;

pub use api::{CheckInClient, CheckInConfirmation, RemoteCheckInApi, RemoteOutcome};
pub use capacity::{GuestCountUpdateResult, Table};
pub use config::EngineConfig;
pub use connectivity::{ChangeCallback, ConnectivitySignal, NetworkStatus};
pub use engine::{CheckInEngine, CheckInResult};
pub use error::EngineError;
pub use queue::{QueueItem, QueueItemStatus};
pub use reservation::{Reservation, ReservationStatus};
pub use stats::{compute_event_stats, EventStats};
pub use sync::{DrainReport, SyncState};
pub use walkin::{WalkInRequest, WalkInResult};

/// Install a global tracing subscriber honoring `RUST_LOG` (defaults to
/// `info` for this crate). Call once at startup; returns quietly if a
/// subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("checkin_engine=info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}
