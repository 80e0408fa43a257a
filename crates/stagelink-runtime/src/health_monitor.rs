//! Health Monitor: liveness, health reports and hardware maintenance.
//!
//! Three jobs on three clocks:
//!
//! - **Silence check** every `interval`, or every `fast_interval` while any
//!   activity is past its extended threshold.  A critical silence trips the
//!   session so the manager reconnects even though the channel never
//!   reported an error.
//! - **Report** every `interval`: one `health` message (uptime, fault
//!   counters) followed by one `ping`.
//! - **Maintenance** every `maintenance_interval`, on a blocking worker:
//!   flush controller I/O, poll latched faults, and re-initialise the rig if
//!   a device is down.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use stagelink_hal::{FaultFlag, HardwareRig, RigStatus, lock};
use stagelink_kernel::{FaultCounters, SilenceLevel, SilenceReport};
use stagelink_types::{FaultCategory, LinkError, OutboundMessage};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::link::DrainReason;
use crate::state::{SessionState, Station};

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, PartialEq)]
pub struct MaintenanceReport {
    /// Categories of faults latched since the previous pass.
    pub new_faults: Vec<FaultCategory>,
    /// Set when a re-initialisation was attempted.
    pub reinitialized: Option<RigStatus>,
}

/// Edge-triggered fault poller.  Remembers which fault codes were latched on
/// the previous pass so a flag that will not clear is counted once.
#[derive(Debug, Default)]
pub struct FaultPoller {
    seen: HashSet<String>,
}

impl FaultPoller {
    /// One maintenance pass.  Blocking.
    pub fn maintain(&mut self, rig: &HardwareRig, faults: &FaultCounters) -> MaintenanceReport {
        let mut report = MaintenanceReport {
            new_faults: Vec::new(),
            reinitialized: None,
        };

        if rig.status().is_degraded() {
            let status = rig.initialize();
            if status.is_degraded() {
                debug!(?status, "rig still degraded after re-initialisation");
            } else {
                info!(?status, "rig recovered");
            }
            report.reinitialized = Some(status);
        }

        let Some(stage) = rig.stage() else {
            return report;
        };
        let mut stage = lock(stage);
        if !stage.is_ready() {
            return report;
        }
        if let Err(e) = stage.flush_io() {
            debug!(stage = stage.id(), error = %e, "controller I/O flush failed");
        }

        let flags = match stage.fault_status() {
            Ok(flags) => flags,
            Err(e) => {
                warn!(stage = stage.id(), error = %e, "fault status poll failed");
                return report;
            }
        };
        let fresh: Vec<FaultFlag> = flags
            .iter()
            .filter(|flag| !self.seen.contains(&flag.code))
            .cloned()
            .collect();
        report.new_faults = faults.record_flags(&fresh);
        for (flag, category) in fresh.iter().zip(&report.new_faults) {
            warn!(stage = stage.id(), code = %flag.code, ?category, "controller fault latched");
        }
        if !flags.is_empty()
            && let Err(e) = stage.clear_faults()
        {
            warn!(stage = stage.id(), error = %e, "clear faults failed");
        }
        self.seen = flags.into_iter().map(|flag| flag.code).collect();
        report
    }
}

fn describe(report: &SilenceReport) -> String {
    report
        .offenders
        .iter()
        .map(|(activity, level, silence)| format!("{activity} {level:?} for {silence:.1?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

async fn send_report(station: &Station, session: &SessionState) -> Result<(), LinkError> {
    let station_id = station.station_id().to_string();
    let health = OutboundMessage::Health {
        station_id: station_id.clone(),
        uptime_secs: station.uptime_secs(),
        fault_counters: station.faults.snapshot(),
        timestamp: Utc::now(),
    };
    session.link.send(&health).await?;
    session
        .link
        .send(&OutboundMessage::Ping {
            station_id,
            timestamp: Utc::now(),
        })
        .await
}

/// Run until the session is cancelled, the channel fails, or a critical
/// silence trips the session.
///
/// # Errors
///
/// The transport error that ended the session.
pub async fn run(station: Arc<Station>, session: Arc<SessionState>) -> Result<(), LinkError> {
    let cancel = session.link.cancel_token().clone();
    let health = &station.config.health;
    let mut poller = Some(FaultPoller::default());
    let mut level = SilenceLevel::Healthy;
    let mut last_report: Option<Instant> = None;
    let mut last_maintenance = Instant::now();

    loop {
        let now = Instant::now();
        if last_report.is_none_or(|at| now.saturating_duration_since(at) >= health.interval()) {
            match send_report(&station, &session).await {
                Ok(()) => last_report = Some(now),
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => warn!(error = %e, "health report dropped"),
            }
        }

        let report = session.check_silence();
        if report.is_critical() {
            let what = describe(&report);
            warn!(offenders = %what, "critical silence; forcing reconnect");
            session.link.trip(DrainReason::Silence(what));
            return Ok(());
        }
        if report.level != level {
            match report.level {
                SilenceLevel::Extended => info!(offenders = %describe(&report), "extended silence; checking more often"),
                _ => debug!("activity back to normal"),
            }
            level = report.level;
        }

        if now.saturating_duration_since(last_maintenance) >= health.maintenance_interval() {
            last_maintenance = now;
            if let Some(mut p) = poller.take() {
                let rig = station.rig.clone();
                let faults = Arc::clone(&station.faults);
                let pass = station.pool.run(move || {
                    let report = p.maintain(&rig, &faults);
                    (p, report)
                });
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = pass => outcome,
                };
                match outcome {
                    Ok((p, report)) => {
                        poller = Some(p);
                        if !report.new_faults.is_empty() {
                            debug!(faults = ?report.new_faults, "maintenance counted new faults");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "maintenance pass failed");
                        poller = Some(FaultPoller::default());
                    }
                }
            }
        }

        let wait = if level == SilenceLevel::Extended {
            health.fast_interval()
        } else {
            health.interval()
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    debug!("health monitor stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagelink_hal::sim::{SimEncoder, SimStage, StageCall};

    fn rig_with_stage() -> (HardwareRig, stagelink_hal::sim::SimStageHandle) {
        let stage = SimStage::new("x_stage");
        let handle = stage.handle();
        let rig = HardwareRig::new(Arc::new(SimEncoder)).with_stage(Box::new(stage));
        rig.initialize();
        (rig, handle)
    }

    #[test]
    fn latched_fault_is_counted_once_and_cleared() {
        let (rig, handle) = rig_with_stage();
        let faults = FaultCounters::new();
        let mut poller = FaultPoller::default();

        handle.inject_fault(FaultFlag::new("OVERTEMP", "motor over temperature"));
        let report = poller.maintain(&rig, &faults);
        assert_eq!(report.new_faults, vec![FaultCategory::Thermal]);
        assert_eq!(faults.get(FaultCategory::Thermal), 1);
        assert!(handle.calls().contains(&StageCall::ClearFaults));
        assert!(handle.calls().contains(&StageCall::FlushIo));

        let report = poller.maintain(&rig, &faults);
        assert!(report.new_faults.is_empty());
        assert_eq!(faults.get(FaultCategory::Thermal), 1);
    }

    #[test]
    fn degraded_rig_is_reinitialized() {
        let stage = SimStage::new("x_stage");
        let handle = stage.handle();
        handle.set_fail_initialize(true);
        let rig = HardwareRig::new(Arc::new(SimEncoder)).with_stage(Box::new(stage));
        rig.initialize();
        assert!(rig.status().is_degraded());

        handle.set_fail_initialize(false);
        let report = FaultPoller::default().maintain(&rig, &FaultCounters::new());
        assert_eq!(report.reinitialized.map(|s| s.stage_ready), Some(Some(true)));
        assert!(handle.is_ready());
    }

    #[test]
    fn healthy_rig_is_left_alone() {
        let (rig, handle) = rig_with_stage();
        let before = handle.initialize_count();
        let report = FaultPoller::default().maintain(&rig, &FaultCounters::new());
        assert_eq!(report.reinitialized, None);
        assert_eq!(handle.initialize_count(), before);
    }

    #[test]
    fn describe_lists_offenders() {
        use stagelink_kernel::Activity;
        use std::time::Duration;
        let report = SilenceReport {
            level: SilenceLevel::Critical,
            offenders: vec![(Activity::Frame, SilenceLevel::Critical, Duration::from_secs(16))],
        };
        let text = describe(&report);
        assert!(text.starts_with("frame Critical"));
    }
}
