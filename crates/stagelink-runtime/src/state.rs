//! Shared state handed to every task of a session.
//!
//! [`Station`] lives for the whole process: drivers, executor, worker pool,
//! position and fault counters.  [`SessionState`] lives for one channel: the
//! link, the connection id, the activity watchdog and the routine slot.
//! Tasks receive an `Arc` of each at spawn time; there are no globals.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use stagelink_hal::{HardwareRig, lock};
use stagelink_kernel::{
    Activity, ActivityWatchdog, CommandExecutor, FaultCounters, SharedPosition, SilenceReport,
};
use uuid::Uuid;

use crate::config::StationConfig;
use crate::link::SessionLink;
use crate::routine::RoutineSlot;
use crate::worker_pool::WorkerPool;

/// Current instant on tokio's clock.
///
/// Equal to `std::time::Instant::now()` in production; follows paused time
/// in tests.
pub fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Session Manager phase, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Registering,
    Active,
    Draining,
    /// Shutdown requested; the manager has returned.
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Registering => "registering",
            SessionPhase::Active => "active",
            SessionPhase::Draining => "draining",
            SessionPhase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Process-lifetime station resources.
pub struct Station {
    pub config: StationConfig,
    pub rig: HardwareRig,
    pub executor: Arc<CommandExecutor>,
    pub position: SharedPosition,
    pub faults: Arc<FaultCounters>,
    pub pool: WorkerPool,
    pub started: Instant,
}

impl Station {
    pub fn new(config: StationConfig, rig: HardwareRig) -> Self {
        let position = SharedPosition::new(config.safety.reference_mm);
        let faults = Arc::new(FaultCounters::new());
        let executor = Arc::new(CommandExecutor::new(
            rig.stage().cloned(),
            position.clone(),
            Arc::clone(&faults),
            config.safety.executor_settings(),
        ));
        let pool = WorkerPool::new(config.workers);
        Self {
            config,
            rig,
            executor,
            position,
            faults,
            pool,
            started: now(),
        }
    }

    pub fn station_id(&self) -> &str {
        &self.config.station_id
    }

    pub fn uptime_secs(&self) -> f64 {
        now().saturating_duration_since(self.started).as_secs_f64()
    }
}

/// Per-session state.
pub struct SessionState {
    pub connection_id: Uuid,
    pub link: SessionLink,
    pub routine: RoutineSlot,
    watchdog: Mutex<ActivityWatchdog>,
}

impl SessionState {
    /// The watchdog starts with every activity registered and its clock at
    /// the moment of registration.
    pub fn new(
        connection_id: Uuid,
        link: SessionLink,
        watchdog: ActivityWatchdog,
    ) -> Self {
        Self {
            connection_id,
            link,
            routine: RoutineSlot::new(),
            watchdog: Mutex::new(watchdog),
        }
    }

    pub fn record(&self, activity: Activity) {
        lock(&self.watchdog).record_at(activity, now());
    }

    pub fn set_tracked(&self, activity: Activity, tracked: bool) {
        lock(&self.watchdog).set_tracked_at(activity, tracked, now());
    }

    pub fn check_silence(&self) -> SilenceReport {
        lock(&self.watchdog).check_at(now())
    }
}
