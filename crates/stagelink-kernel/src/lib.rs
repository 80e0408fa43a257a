//! `stagelink-kernel` – Safety & Command Execution
//!
//! Everything on the hardware side of the station that must stay correct no
//! matter what the channel is doing.  Nothing here knows about sessions or
//! async; every call is synchronous and may block on controller I/O.
//!
//! # Modules
//!
//! - [`envelope`] – [`SafetyEnvelope`][envelope::SafetyEnvelope] and
//!   [`LimitPolicy`][envelope::LimitPolicy]: the position interlock every
//!   relative step and scan range is checked against.
//! - [`executor`] – [`CommandExecutor`][executor::CommandExecutor]: the single
//!   path from a decoded command to the stage, including tuning clamps,
//!   envelope checks and fault recovery.
//! - [`faults`] – [`FaultCounters`][faults::FaultCounters]: process-lifetime
//!   counters of classified hardware faults.
//! - [`position`] – [`SharedPosition`][position::SharedPosition]: the last
//!   known stage position, shared by the executor and the publishers.
//! - [`watchdog`] – [`ActivityWatchdog`][watchdog::ActivityWatchdog]:
//!   per-activity silence tracking with extended/critical thresholds.

pub mod envelope;
pub mod executor;
pub mod faults;
pub mod position;
pub mod watchdog;

pub use envelope::{LimitPolicy, SafetyEnvelope, StepDecision};
pub use executor::{CommandExecutor, ExecutorSettings, Outcome, Reply, error_result};
pub use faults::FaultCounters;
pub use position::{PositionReading, SharedPosition};
pub use watchdog::{Activity, ActivityWatchdog, SilenceLevel, SilenceReport, SilenceThresholds};
