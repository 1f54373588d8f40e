//! Payload reconciler: pairs request and response fragments into rows
//!
//! Inference traffic arrives as two independent fragments per call, keyed
//! by an opaque correlation id. Whichever half arrives first is held
//! pending; when the counterpart arrives the pair is assembled into a
//! one-row dataframe and persisted through the [`DataSource`]. The pending
//! pool is bounded both by size and by fragment age, so a half whose
//! counterpart never shows up cannot pin memory forever.

use crate::config::RetentionConfig;
use crate::datasource::DataSource;
use crate::payload::{PartialKind, PartialPayload, TensorPayload};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use scrutiny_core::{ColumnRole, Dataframe, SchemaMetadata, ScrutinyResult, TAG_UNLABELED};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

// ============================================================================
// METRICS
// ============================================================================

/// Counters for reconciler activity. All atomic, safe to read while the
/// reconciler is live.
#[derive(Debug, Default)]
pub struct ReconcilerMetrics {
    pub fragments_received: AtomicU64,
    pub observations_reconciled: AtomicU64,
    pub duplicates_overwritten: AtomicU64,
    pub orphans_evicted: AtomicU64,
    pub schema_rejections: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerMetricsSnapshot {
    pub fragments_received: u64,
    pub observations_reconciled: u64,
    pub duplicates_overwritten: u64,
    pub orphans_evicted: u64,
    pub schema_rejections: u64,
}

impl ReconcilerMetrics {
    pub fn snapshot(&self) -> ReconcilerMetricsSnapshot {
        ReconcilerMetricsSnapshot {
            fragments_received: self.fragments_received.load(Ordering::Relaxed),
            observations_reconciled: self.observations_reconciled.load(Ordering::Relaxed),
            duplicates_overwritten: self.duplicates_overwritten.load(Ordering::Relaxed),
            orphans_evicted: self.orphans_evicted.load(Ordering::Relaxed),
            schema_rejections: self.schema_rejections.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

/// What happened to a submitted fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Held pending; the counterpart has not arrived yet.
    Held,
    /// Replaced an already-pending fragment of the same kind.
    Overwritten,
    /// Matched its counterpart; the observation was persisted.
    Reconciled,
}

struct HeldFragment {
    payload: PartialPayload,
    tensor: TensorPayload,
    received_at: Instant,
}

pub struct PayloadReconciler {
    datasource: Arc<DataSource>,
    pending: DashMap<String, HeldFragment>,
    retention: RetentionConfig,
    metrics: ReconcilerMetrics,
}

impl PayloadReconciler {
    pub fn new(datasource: Arc<DataSource>, retention: RetentionConfig) -> Self {
        PayloadReconciler {
            datasource,
            pending: DashMap::new(),
            retention,
            metrics: ReconcilerMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &ReconcilerMetrics {
        &self.metrics
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn contains_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Submit the request half of an inference call.
    pub fn add_unreconciled_input(
        &self,
        payload: PartialPayload,
    ) -> ScrutinyResult<ReconcileOutcome> {
        self.submit(payload, PartialKind::Request)
    }

    /// Submit the response half of an inference call.
    pub fn add_unreconciled_output(
        &self,
        payload: PartialPayload,
    ) -> ScrutinyResult<ReconcileOutcome> {
        self.submit(payload, PartialKind::Response)
    }

    fn submit(
        &self,
        payload: PartialPayload,
        expected_kind: PartialKind,
    ) -> ScrutinyResult<ReconcileOutcome> {
        self.metrics
            .fragments_received
            .fetch_add(1, Ordering::Relaxed);

        if payload.kind != expected_kind {
            self.metrics.schema_rejections.fetch_add(1, Ordering::Relaxed);
            return Err(scrutiny_core::error::PayloadError::InvalidSchema {
                kind: payload.kind.to_string(),
                id: payload.id.clone(),
                reason: format!("submitted on the {} path", expected_kind),
            }
            .into());
        }

        let tensor = match TensorPayload::decode(&payload) {
            Ok(tensor) => tensor,
            Err(e) => {
                self.metrics.schema_rejections.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(id = %payload.id, kind = %payload.kind, error = %e, "Rejecting fragment");
                return Err(e);
            }
        };

        // Fragments for an already-observed model must agree with its
        // persisted schema, so drift is caught before the pair assembles.
        if self.datasource.has_metadata(&payload.model_id) {
            let schema = self.datasource.get_metadata(&payload.model_id)?;
            let role = match payload.kind {
                PartialKind::Request => ColumnRole::Input,
                PartialKind::Response => ColumnRole::Output,
            };
            if let Err(e) = tensor.validate_against(&payload, &schema, role) {
                self.metrics.schema_rejections.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(id = %payload.id, kind = %payload.kind, error = %e, "Rejecting fragment");
                return Err(e);
            }
        }

        // The entry guard linearizes all submissions for one correlation
        // id; store I/O happens after the guard is dropped.
        let matched = match self.pending.entry(payload.id.clone()) {
            Entry::Occupied(mut occupied) => {
                // A correlation id belongs to one model; a fragment naming a
                // different one never pairs with (or replaces) the held half.
                if occupied.get().payload.model_id != payload.model_id {
                    let held_model = occupied.get().payload.model_id.clone();
                    drop(occupied);
                    self.metrics.schema_rejections.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        id = %payload.id,
                        model_id = %payload.model_id,
                        held_model = %held_model,
                        "Rejecting fragment: model id differs from held counterpart"
                    );
                    return Err(scrutiny_core::error::PayloadError::InvalidSchema {
                        kind: payload.kind.to_string(),
                        id: payload.id.clone(),
                        reason: format!(
                            "model id '{}' does not match held counterpart's '{}'",
                            payload.model_id, held_model
                        ),
                    }
                    .into());
                }
                if occupied.get().payload.kind == payload.kind {
                    self.metrics
                        .duplicates_overwritten
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(id = %payload.id, kind = %payload.kind, "Overwriting duplicate fragment");
                    occupied.insert(HeldFragment {
                        payload,
                        tensor,
                        received_at: Instant::now(),
                    });
                    return Ok(ReconcileOutcome::Overwritten);
                }
                occupied.remove()
            }
            Entry::Vacant(vacant) => {
                tracing::debug!(id = %payload.id, kind = %payload.kind, "Holding fragment");
                vacant.insert(HeldFragment {
                    payload,
                    tensor,
                    received_at: Instant::now(),
                });
                self.enforce_size_bound();
                return Ok(ReconcileOutcome::Held);
            }
        };

        let (request, response) = match payload.kind {
            PartialKind::Request => (
                (payload, tensor),
                (matched.payload, matched.tensor),
            ),
            PartialKind::Response => (
                (matched.payload, matched.tensor),
                (payload, tensor),
            ),
        };
        self.assemble_and_save(request, response)?;
        Ok(ReconcileOutcome::Reconciled)
    }

    fn assemble_and_save(
        &self,
        request: (PartialPayload, TensorPayload),
        response: (PartialPayload, TensorPayload),
    ) -> ScrutinyResult<()> {
        let (request_payload, request_tensor) = request;
        let (_, response_tensor) = response;
        let model_id = request_payload.model_id.clone();

        let schema = if self.datasource.has_metadata(&model_id) {
            self.datasource.get_metadata(&model_id)?
        } else {
            fragment_schema(&request_tensor, &response_tensor)
        };

        let df = Dataframe::from_fragments(
            schema,
            request_tensor.values,
            response_tensor.values,
            request_payload.id.clone(),
            TAG_UNLABELED,
            chrono::Utc::now(),
        )?;
        self.datasource.save_dataframe(&df, &model_id)?;

        self.metrics
            .observations_reconciled
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(id = %request_payload.id, model_id = %model_id, "Reconciled observation");
        Ok(())
    }

    // ========================================================================
    // RETENTION
    // ========================================================================

    /// Drop the single oldest pending fragment while the pool exceeds its
    /// size bound.
    fn enforce_size_bound(&self) {
        while self.pending.len() > self.retention.max_pending {
            let oldest = self
                .pending
                .iter()
                .min_by_key(|entry| entry.value().received_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(id) => {
                    if self.pending.remove(&id).is_some() {
                        self.metrics.orphans_evicted.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(id = %id, "Evicting pending fragment: pool over capacity");
                    }
                }
                None => break,
            }
        }
    }

    /// Evict every pending fragment older than the retention age bound.
    /// Returns the number evicted.
    pub fn sweep_orphans(&self) -> usize {
        let max_age = self.retention.max_age;
        let before = self.pending.len();
        self.pending
            .retain(|_, fragment| fragment.received_at.elapsed() < max_age);
        let evicted = before.saturating_sub(self.pending.len());
        if evicted > 0 {
            self.metrics
                .orphans_evicted
                .fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::warn!(evicted, "Swept orphaned fragments past age bound");
        }
        evicted
    }
}

// ============================================================================
// ORPHAN SWEEP TASK
// ============================================================================

/// Background task that sweeps orphaned fragments on a fixed cadence until
/// the shutdown signal flips.
pub async fn orphan_sweep_task(
    reconciler: Arc<PayloadReconciler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(reconciler.retention.sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                reconciler.sweep_orphans();
            }
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    tracing::info!("Orphan sweep task shutting down");
                    break;
                }
            }
        }
    }
}

/// Schema inferred from the first reconciled pair of a model: inputs in
/// request order, then outputs in response order.
fn fragment_schema(request: &TensorPayload, response: &TensorPayload) -> SchemaMetadata {
    let mut schema = SchemaMetadata::empty();
    for (name, &column_type) in request.names.iter().zip(&request.types) {
        schema.add_input(name, column_type, false, Default::default());
    }
    for (name, &column_type) in response.names.iter().zip(&response.types) {
        schema.add_output(name, column_type);
    }
    schema
}

// ============================================================================
// TESTS
// ============================================================================
