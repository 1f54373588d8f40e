//! Schedule registry: recurring metric computations over stored observations
//!
//! Callers register a metric job against a model; the executor task wakes on
//! a fixed cadence and runs every registered job exactly once per tick
//! against the model's trailing observation batch. A failing job reports its
//! error and stays registered; only an explicit removal ends a schedule.

use crate::datasource::DataSource;
use scrutiny_core::error::ScheduleError;
use scrutiny_core::{new_request_id, Dataframe, RequestId, ScrutinyResult, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

// ============================================================================
// METRIC JOBS
// ============================================================================

/// One computed metric reading.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    pub name: String,
    pub value: f64,
    pub threshold_exceeded: bool,
}

/// A metric computation that runs against a model's observation batch.
pub trait MetricJob: Send + Sync {
    fn name(&self) -> &str;

    fn compute(&self, df: &Dataframe) -> ScrutinyResult<MetricValue>;
}

// ============================================================================
// REGISTRY
// ============================================================================

#[derive(Clone)]
struct ScheduleEntry {
    request_id: RequestId,
    model_id: String,
    batch_size: usize,
    job: Arc<dyn MetricJob>,
    created_at: Timestamp,
}

/// Summary of one registered schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleInfo {
    pub request_id: RequestId,
    pub model_id: String,
    pub metric_name: String,
    pub batch_size: usize,
    pub created_at: Timestamp,
}

/// Result of running one registered job during a tick.
#[derive(Debug)]
pub struct TickOutcome {
    pub request_id: RequestId,
    pub model_id: String,
    pub result: ScrutinyResult<MetricValue>,
}

/// Counters for executor activity.
#[derive(Debug, Default)]
pub struct ScheduleMetrics {
    pub ticks_completed: AtomicU64,
    pub jobs_succeeded: AtomicU64,
    pub jobs_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleMetricsSnapshot {
    pub ticks_completed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
}

impl ScheduleMetrics {
    pub fn snapshot(&self) -> ScheduleMetricsSnapshot {
        ScheduleMetricsSnapshot {
            ticks_completed: self.ticks_completed.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
        }
    }
}

pub struct ScheduleRegistry {
    datasource: Arc<DataSource>,
    entries: RwLock<Vec<ScheduleEntry>>,
    metrics: ScheduleMetrics,
}

impl ScheduleRegistry {
    pub fn new(datasource: Arc<DataSource>) -> Self {
        ScheduleRegistry {
            datasource,
            entries: RwLock::new(Vec::new()),
            metrics: ScheduleMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &ScheduleMetrics {
        &self.metrics
    }

    /// Register a recurring job. Returns the request id used to remove it.
    pub fn register(
        &self,
        model_id: impl Into<String>,
        batch_size: usize,
        job: Arc<dyn MetricJob>,
    ) -> RequestId {
        let entry = ScheduleEntry {
            request_id: new_request_id(),
            model_id: model_id.into(),
            batch_size,
            job,
            created_at: chrono::Utc::now(),
        };
        let request_id = entry.request_id;
        tracing::info!(
            %request_id,
            model_id = %entry.model_id,
            metric = entry.job.name(),
            "Registered schedule"
        );
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.push(entry);
        request_id
    }

    /// Remove a schedule. Fails with `NotFound` when the id is unknown,
    /// including when it was already removed.
    pub fn remove(&self, request_id: RequestId) -> ScrutinyResult<()> {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = entries.len();
        entries.retain(|entry| entry.request_id != request_id);
        if entries.len() == before {
            return Err(ScheduleError::NotFound { request_id }.into());
        }
        tracing::info!(%request_id, "Removed schedule");
        Ok(())
    }

    /// Summaries of every registered schedule, in registration order.
    pub fn list(&self) -> Vec<ScheduleInfo> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries
            .iter()
            .map(|entry| ScheduleInfo {
                request_id: entry.request_id,
                model_id: entry.model_id.clone(),
                metric_name: entry.job.name().to_string(),
                batch_size: entry.batch_size,
                created_at: entry.created_at,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // EXECUTION
    // ========================================================================

    /// Run every schedule registered at the start of the tick exactly once,
    /// each against its model's trailing batch. Jobs run concurrently;
    /// registrations made while the tick is in flight wait for the next one.
    pub async fn run_tick(&self) -> Vec<TickOutcome> {
        let snapshot: Vec<ScheduleEntry> = {
            let entries = self
                .entries
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            entries.clone()
        };

        let mut handles = Vec::with_capacity(snapshot.len());
        for entry in snapshot {
            let datasource = Arc::clone(&self.datasource);
            handles.push(tokio::spawn(async move {
                let result = datasource
                    .get_dataframe_batch(&entry.model_id, entry.batch_size)
                    .and_then(|df| entry.job.compute(&df));
                TickOutcome {
                    request_id: entry.request_id,
                    model_id: entry.model_id,
                    result,
                }
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => {
                    match &outcome.result {
                        Ok(metric) => {
                            self.metrics.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
                            if metric.threshold_exceeded {
                                tracing::warn!(
                                    request_id = %outcome.request_id,
                                    model_id = %outcome.model_id,
                                    metric = %metric.name,
                                    value = metric.value,
                                    "Metric exceeded its threshold"
                                );
                            }
                        }
                        Err(e) => {
                            self.metrics.jobs_failed.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(
                                request_id = %outcome.request_id,
                                model_id = %outcome.model_id,
                                error = %e,
                                "Scheduled job failed; schedule stays registered"
                            );
                        }
                    }
                    outcomes.push(outcome);
                }
                Err(e) => {
                    self.metrics.jobs_failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(error = %e, "Scheduled job panicked");
                }
            }
        }

        self.metrics.ticks_completed.fetch_add(1, Ordering::Relaxed);
        outcomes
    }
}

// ============================================================================
// EXECUTOR TASK
// ============================================================================

/// Background task driving [`ScheduleRegistry::run_tick`] on a fixed cadence
/// until the shutdown signal flips. Missed ticks are skipped, never bursted,
/// so a slow tick cannot cause double execution.
pub async fn schedule_tick_task(
    registry: Arc<ScheduleRegistry>,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                registry.run_tick().await;
            }
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    tracing::info!("Schedule executor shutting down");
                    break;
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
