//! `stagelink-runtime` – The Session and Streaming Multiplexer
//!
//! Owns the single channel to the remote operator, keeps it alive across
//! network and hardware failures, and runs the concurrent producers and the
//! consumer attached to it.
//!
//! # Modules
//!
//! - [`session`] – [`SessionManager`][session::SessionManager]: the
//!   connect / register / serve / drain / back-off loop, and the owner of
//!   every per-session task.
//! - [`inbound`] – the channel's only reader: decodes commands, runs them
//!   through the [`CommandExecutor`][stagelink_kernel::CommandExecutor] and
//!   replies with exactly one result each.
//! - [`frame_publisher`] – capture, encode and send camera frames, paced by
//!   [`rate_control`].
//! - [`rate_control`] – [`RateController`][rate_control::RateController]: the
//!   backlog-driven frame pacing and quality step-down.
//! - [`telemetry_publisher`] – position stream, emitted on change or at a
//!   maximum interval.
//! - [`health_monitor`] – silence escalation, health/ping reports and
//!   periodic hardware maintenance.
//! - [`routine`] – [`RoutineSlot`][routine::RoutineSlot]: at most one
//!   supervised multi-step routine per session.
//! - [`link`] – [`SessionLink`][link::SessionLink]: the shared send side of
//!   the channel, with retirement and drain reasons.
//! - [`backoff`] – [`ReconnectBackoff`][backoff::ReconnectBackoff]: jittered
//!   reconnect delays and hardware-reset scheduling.
//! - [`worker_pool`] – [`WorkerPool`][worker_pool::WorkerPool]: bounded
//!   offload for blocking driver and encode calls.
//! - [`state`] – [`Station`][state::Station] and
//!   [`SessionState`][state::SessionState], the handles every task receives.
//! - [`config`] – [`StationConfig`][config::StationConfig] and its sections.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: log
//!   formatting and optional OTLP span export.
//!
//! # Scheduling
//!
//! The manager and its tasks are written for a current-thread runtime: they
//! only yield at sends, receives, sleeps and worker hand-offs.  Anything that
//! can block an OS thread goes through the [`WorkerPool`].

pub mod backoff;
pub mod config;
pub mod frame_publisher;
pub mod health_monitor;
pub mod inbound;
pub mod link;
pub mod rate_control;
pub mod routine;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod telemetry_publisher;
pub mod worker_pool;

pub use backoff::{FailureKind, ReconnectBackoff, RetryPlan};
pub use config::{
    BackoffConfig, FrameConfig, HealthConfig, SafetyConfig, SessionConfig, StationConfig,
    TelemetryConfig,
};
pub use link::{DrainReason, SessionLink};
pub use rate_control::{RateController, RateDecision};
pub use routine::RoutineSlot;
pub use session::SessionManager;
pub use state::{SessionPhase, SessionState, Station};
pub use worker_pool::WorkerPool;
