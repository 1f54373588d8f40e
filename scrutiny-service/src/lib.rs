//! SCRUTINY Service - Payload Reconciliation and Scheduling
//!
//! The service layer of the observation data plane. Inference fragments
//! enter through the [`PayloadReconciler`], which pairs request and
//! response halves by correlation id and persists completed observations
//! through the [`DataSource`]. Registered metric jobs run against stored
//! batches on a fixed cadence via the [`ScheduleRegistry`].
//!
//! # Architecture
//!
//! ```text
//!   fragments ──> PayloadReconciler ──> DataSource ──> ObservationStore
//!                                           ^
//!   ticks ─────> ScheduleRegistry ──────────┘
//! ```

pub mod config;
pub mod constants;
pub mod datasource;
pub mod payload;
pub mod reconciler;
pub mod schedule;

pub use config::{RetentionConfig, ScheduleConfig, ServiceConfig};
pub use datasource::DataSource;
pub use payload::{PartialKind, PartialPayload, TensorPayload};
pub use reconciler::{
    orphan_sweep_task, PayloadReconciler, ReconcileOutcome, ReconcilerMetrics,
    ReconcilerMetricsSnapshot,
};
pub use schedule::{
    schedule_tick_task, MetricJob, MetricValue, ScheduleInfo, ScheduleMetrics,
    ScheduleMetricsSnapshot, ScheduleRegistry, TickOutcome,
};
