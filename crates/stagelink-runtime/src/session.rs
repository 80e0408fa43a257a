//! [`SessionManager`] – owns the channel lifecycle.
//!
//! ```text
//! idle → connecting → registering → active → draining → idle
//!            │              │
//!            └──── fail ────┴──→ backoff → idle
//! ```
//!
//! An active session runs four tasks in one `JoinSet`: the inbound loop, the
//! frame publisher, the telemetry publisher and the health monitor.  They
//! share a [`SessionLink`]; whichever hits a fatal condition first trips the
//! session token.  Draining then retires the link, waits a bounded time for
//! the tasks, aborts stragglers and closes the channel.  Nothing is sent on
//! a channel after its session has drained.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use stagelink_hal::HardwareRig;
use stagelink_kernel::{Activity, ActivityWatchdog};
use stagelink_middleware::Connector;
use stagelink_types::{LinkError, OutboundMessage};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::{FailureKind, ReconnectBackoff};
use crate::config::StationConfig;
use crate::link::{DrainReason, SessionLink};
use crate::state::{self, SessionPhase, SessionState, Station};
use crate::{frame_publisher, health_monitor, inbound, telemetry_publisher};

type TaskResult = (&'static str, Result<(), LinkError>);

/// Registration timestamps never repeat or go backwards, even if the wall
/// clock does.
fn strictly_after(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if now <= prev => prev + TimeDelta::milliseconds(1),
        _ => now,
    }
}

pub struct SessionManager {
    station: Arc<Station>,
    connector: Arc<dyn Connector>,
    backoff: ReconnectBackoff,
    phase: watch::Sender<SessionPhase>,
    last_registration: Option<DateTime<Utc>>,
    sessions: u64,
}

impl SessionManager {
    pub fn new(config: StationConfig, connector: Arc<dyn Connector>, rig: HardwareRig) -> Self {
        let backoff = ReconnectBackoff::new(config.backoff.clone());
        let (phase, _) = watch::channel(SessionPhase::Idle);
        Self {
            station: Arc::new(Station::new(config, rig)),
            connector,
            backoff,
            phase,
            last_registration: None,
            sessions: 0,
        }
    }

    /// Seed the backoff jitter (builder-style).
    pub fn with_backoff_seed(mut self, seed: u64) -> Self {
        self.backoff = self.backoff.with_seed(seed);
        self
    }

    /// Watch phase transitions.
    pub fn phases(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    pub fn station(&self) -> &Arc<Station> {
        &self.station
    }

    fn set_phase(&self, phase: SessionPhase) {
        debug!(%phase, "session phase");
        self.phase.send_replace(phase);
    }

    /// Connect, serve and reconnect until `shutdown` is cancelled, then stop
    /// and shut down the hardware.
    ///
    /// Transport and hardware failures never end this loop; they are logged
    /// and retried.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let config = &self.station.config;
        info!(
            station = %config.station_id,
            server = %config.server_url,
            workers = self.station.pool.size(),
            "session manager starting"
        );
        self.bring_up_hardware().await;

        while !shutdown.is_cancelled() {
            self.set_phase(SessionPhase::Connecting);
            let opened = tokio::select! {
                _ = shutdown.cancelled() => break,
                opened = self.connector.open(
                    &self.station.config.server_url,
                    self.station.config.session.connect_timeout(),
                ) => opened,
            };
            let channel = match opened {
                Ok(channel) => channel,
                Err(e) => {
                    let kind = match e {
                        LinkError::Refused(_) => FailureKind::Refused,
                        _ => FailureKind::ConnectFailed,
                    };
                    warn!(error = %e, "connect failed");
                    if !self.retry(kind, &shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            self.set_phase(SessionPhase::Registering);
            let token = shutdown.child_token();
            let link = SessionLink::new(channel, self.station.config.session.send_timeout(), token.clone());
            let connection_id = Uuid::new_v4();
            let timestamp = strictly_after(self.last_registration, Utc::now());
            let register = OutboundMessage::Register {
                station_id: self.station.station_id().to_string(),
                connection_id,
                timestamp,
            };
            if let Err(e) = link.send(&register).await {
                warn!(error = %e, %connection_id, "registration failed");
                link.retire();
                link.close().await;
                if !self.retry(FailureKind::ConnectFailed, &shutdown).await {
                    break;
                }
                continue;
            }
            self.last_registration = Some(timestamp);
            self.backoff.record_success();
            self.sessions += 1;
            info!(%connection_id, session = self.sessions, "registered");

            let watchdog = self.watchdog().await;
            let session = Arc::new(SessionState::new(connection_id, link, watchdog));
            self.set_phase(SessionPhase::Active);
            let tasks = self.spawn_tasks(&session);
            let tasks = self.supervise(&session, tasks).await;

            self.set_phase(SessionPhase::Draining);
            let reason = session.link.reason().unwrap_or(DrainReason::Shutdown);
            info!(%connection_id, %reason, "session draining");
            self.drain(&session, tasks).await;

            if shutdown.is_cancelled() {
                break;
            }
            if !self.retry(FailureKind::SessionLost, &shutdown).await {
                break;
            }
        }

        info!("shutdown requested; stopping hardware");
        let rig = self.station.rig.clone();
        if let Err(e) = self.station.pool.run(move || rig.shutdown()).await {
            error!(error = %e, "hardware shutdown failed");
        }
        self.set_phase(SessionPhase::Closed);
    }

    async fn bring_up_hardware(&self) {
        let rig = self.station.rig.clone();
        match self.station.pool.run(move || rig.initialize()).await {
            Ok(status) if status.is_degraded() => {
                warn!(?status, "hardware degraded; continuing without it");
            }
            Ok(status) => info!(?status, "hardware ready"),
            Err(e) => error!(error = %e, "hardware initialisation did not run"),
        }
    }

    /// Fresh watchdog for a new session.  Frame silence only counts while
    /// the camera is ready.
    async fn watchdog(&self) -> ActivityWatchdog {
        let rig = self.station.rig.clone();
        let camera_ready = matches!(
            self.station.pool.run(move || rig.status()).await,
            Ok(status) if status.camera_ready == Some(true)
        );
        let health = &self.station.config.health;
        let now = state::now();
        let mut watchdog = ActivityWatchdog::new();
        for activity in [Activity::Command, Activity::Frame, Activity::Ping] {
            watchdog.register_at(activity, health.thresholds(activity), now);
        }
        watchdog.set_tracked_at(Activity::Frame, camera_ready, now);
        watchdog
    }

    fn spawn_tasks(&self, session: &Arc<SessionState>) -> JoinSet<TaskResult> {
        let mut tasks = JoinSet::new();
        let (st, ss) = (Arc::clone(&self.station), Arc::clone(session));
        tasks.spawn(async move { ("inbound", inbound::run(st, ss).await) });
        let (st, ss) = (Arc::clone(&self.station), Arc::clone(session));
        tasks.spawn(async move { ("frames", frame_publisher::run(st, ss).await) });
        let (st, ss) = (Arc::clone(&self.station), Arc::clone(session));
        tasks.spawn(async move { ("telemetry", telemetry_publisher::run(st, ss).await) });
        let (st, ss) = (Arc::clone(&self.station), Arc::clone(session));
        tasks.spawn(async move { ("health", health_monitor::run(st, ss).await) });
        tasks
    }

    /// Wait until the session token is cancelled.  A task that fails or
    /// panics trips it.
    async fn supervise(
        &self,
        session: &SessionState,
        mut tasks: JoinSet<TaskResult>,
    ) -> JoinSet<TaskResult> {
        let token = session.link.cancel_token().clone();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                Some(joined) = tasks.join_next() => match joined {
                    Ok((task, Ok(()))) => debug!(task, "session task finished"),
                    Ok((task, Err(e))) => {
                        warn!(task, error = %e, "session task failed");
                        session.link.trip(DrainReason::Transport(e.to_string()));
                    }
                    Err(e) => {
                        error!(error = %e, "session task panicked");
                        session.link.trip(DrainReason::Transport(format!("task failed: {e}")));
                    }
                },
            }
        }
        tasks
    }

    async fn drain(&self, session: &SessionState, mut tasks: JoinSet<TaskResult>) {
        session.link.cancel_token().cancel();
        session.link.retire();
        session.routine.cancel();

        let wait = self.station.config.session.drain_wait();
        let joined = tokio::time::timeout(wait, async {
            while let Some(joined) = tasks.join_next().await {
                if let Ok((task, Err(e))) = joined {
                    debug!(task, error = %e, "task ended with error while draining");
                }
            }
        })
        .await;
        if joined.is_err() {
            warn!(
                remaining = tasks.len(),
                wait_ms = wait.as_millis() as u64,
                "session tasks did not stop in time; aborting"
            );
            tasks.shutdown().await;
        }
        session.link.close().await;
    }

    /// Back off after a failure.  Returns `false` if shutdown was requested
    /// while waiting.
    async fn retry(&mut self, kind: FailureKind, shutdown: &CancellationToken) -> bool {
        self.set_phase(SessionPhase::Idle);
        let plan = self.backoff.record_failure(kind);
        if plan.reset_hardware {
            warn!(failures = plan.failures, "repeated failures; resetting hardware");
            let rig = self.station.rig.clone();
            match self.station.pool.run(move || rig.reset()).await {
                Ok(status) => {
                    self.station.faults.reset();
                    info!(?status, "hardware reset complete");
                }
                Err(e) => error!(error = %e, "hardware reset did not run"),
            }
        }
        info!(
            ?kind,
            failures = plan.failures,
            delay_ms = plan.delay.as_millis() as u64,
            "reconnecting after delay"
        );
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(plan.delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_time_moves_forward() {
        let t0 = Utc::now();
        assert_eq!(strictly_after(None, t0), t0);
        let later = t0 + TimeDelta::seconds(1);
        assert_eq!(strictly_after(Some(t0), later), later);
    }

    #[test]
    fn registration_time_survives_clock_step_back() {
        let t0 = Utc::now();
        let earlier = t0 - TimeDelta::seconds(30);
        let next = strictly_after(Some(t0), earlier);
        assert!(next > t0);
        assert_eq!(strictly_after(Some(t0), t0), t0 + TimeDelta::milliseconds(1));
    }
}
