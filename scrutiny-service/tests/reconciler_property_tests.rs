//! Property-Based Tests for Payload Reconciliation Round-Trip
//!
//! **Property 1: Pair Completeness**
//!
//! For any set of inference calls delivered as request/response fragments,
//! in either per-call arrival order:
//! - Every call produces exactly one persisted row
//! - The row holds input values first, then output values
//! - The row carries the "unlabeled" tag and the call's correlation id
//! - No fragment remains pending once every pair is complete
//!
//! **Property 2: Duplicate Overwrite**
//!
//! Re-delivering a fragment of the same kind before its counterpart arrives
//! replaces the held half; the persisted row reflects the last delivery and
//! no call ever produces more than one row.

use proptest::prelude::*;
use scrutiny_core::{Value, TAG_SYNTHETIC, TAG_UNLABELED};
use scrutiny_service::{
    DataSource, PartialKind, PartialPayload, PayloadReconciler, RetentionConfig,
};
use scrutiny_storage::MemoryStore;
use std::collections::HashSet;
use std::sync::Arc;

// ============================================================================
// TEST SUPPORT
// ============================================================================

const MODEL_ID: &str = "modelA";

fn reconciler() -> (Arc<DataSource>, PayloadReconciler) {
    let store = Arc::new(MemoryStore::new("data.jsonl".to_string()));
    let datasource = Arc::new(DataSource::new(store, 1000));
    let r = PayloadReconciler::new(Arc::clone(&datasource), RetentionConfig::default());
    (datasource, r)
}

fn request_payload(id: &str, value: i64) -> PartialPayload {
    PartialPayload {
        id: id.to_string(),
        kind: PartialKind::Request,
        model_id: MODEL_ID.to_string(),
        data: format!(
            r#"{{"tensor_name":"input","names":["f"],"types":["int"],"values":[{}]}}"#,
            value
        ),
    }
}

fn response_payload(id: &str, value: i64) -> PartialPayload {
    PartialPayload {
        id: id.to_string(),
        kind: PartialKind::Response,
        model_id: MODEL_ID.to_string(),
        data: format!(
            r#"{{"tensor_name":"output","names":["y"],"types":["int"],"values":[{}]}}"#,
            value
        ),
    }
}

// ============================================================================
// PROPERTY TEST STRATEGIES
// ============================================================================

/// One inference call: input value, output value, and which half arrives
/// first.
fn call_strategy() -> impl Strategy<Value = (i64, i64, bool)> {
    (-1000i64..1000, -1000i64..1000, any::<bool>())
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_every_pair_yields_exactly_one_row(
        calls in proptest::collection::vec(call_strategy(), 1..20),
    ) {
        let (ds, r) = reconciler();

        for (i, (input, output, request_first)) in calls.iter().enumerate() {
            let id = format!("call{}", i);
            if *request_first {
                r.add_unreconciled_input(request_payload(&id, *input)).unwrap();
                r.add_unreconciled_output(response_payload(&id, *output)).unwrap();
            } else {
                r.add_unreconciled_output(response_payload(&id, *output)).unwrap();
                r.add_unreconciled_input(request_payload(&id, *input)).unwrap();
            }
        }

        prop_assert_eq!(r.pending_count(), 0);

        let df = ds.get_dataframe_batch(MODEL_ID, calls.len() * 2).unwrap();
        prop_assert_eq!(df.len(), calls.len());

        let mut seen = HashSet::new();
        for i in 0..df.len() {
            prop_assert!(seen.insert(df.ids()[i].clone()), "duplicate row id");
            prop_assert_eq!(&df.tags()[i], TAG_UNLABELED);
        }

        // Rows come back oldest first, so row i belongs to call i.
        for (i, (input, output, _)) in calls.iter().enumerate() {
            let row = df.row(i).unwrap();
            prop_assert_eq!(row, &[Value::Int(*input), Value::Int(*output)]);
        }
    }

    #[test]
    fn prop_duplicate_requests_keep_last_value(
        values in proptest::collection::vec(-1000i64..1000, 1..6),
        output in -1000i64..1000,
    ) {
        let (ds, r) = reconciler();

        for value in &values {
            r.add_unreconciled_input(request_payload("call0", *value)).unwrap();
        }
        r.add_unreconciled_output(response_payload("call0", output)).unwrap();

        prop_assert_eq!(r.pending_count(), 0);
        let df = ds.get_dataframe(MODEL_ID).unwrap();
        prop_assert_eq!(df.len(), 1);
        let last = *values.last().unwrap();
        prop_assert_eq!(df.row(0).unwrap(), &[Value::Int(last), Value::Int(output)]);
        prop_assert_eq!(
            r.metrics().snapshot().duplicates_overwritten,
            values.len() as u64 - 1
        );
    }

    #[test]
    fn prop_batch_read_is_bounded_and_trailing(
        calls in proptest::collection::vec(call_strategy(), 1..20),
        batch in 1usize..25,
    ) {
        let (ds, r) = reconciler();
        for (i, (input, output, _)) in calls.iter().enumerate() {
            let id = format!("call{}", i);
            r.add_unreconciled_input(request_payload(&id, *input)).unwrap();
            r.add_unreconciled_output(response_payload(&id, *output)).unwrap();
        }

        let df = ds.get_dataframe_batch(MODEL_ID, batch).unwrap();
        prop_assert_eq!(df.len(), batch.min(calls.len()));

        // The batch is the most recent calls, oldest first.
        let start = calls.len().saturating_sub(batch);
        for (row_index, call_index) in (start..calls.len()).enumerate() {
            prop_assert_eq!(&df.ids()[row_index], &format!("call{}", call_index));
        }
    }

    #[test]
    fn prop_tag_filtered_reads_only_requested_tags(
        calls in proptest::collection::vec(call_strategy(), 1..12),
    ) {
        let (ds, r) = reconciler();
        for (i, (input, output, _)) in calls.iter().enumerate() {
            let id = format!("call{}", i);
            r.add_unreconciled_input(request_payload(&id, *input)).unwrap();
            r.add_unreconciled_output(response_payload(&id, *output)).unwrap();
        }

        let unlabeled: HashSet<String> = [TAG_UNLABELED.to_string()].into_iter().collect();
        let df = ds.get_dataframe_filtered(MODEL_ID, 1000, &unlabeled).unwrap();
        prop_assert_eq!(df.len(), calls.len());

        let synthetic: HashSet<String> = [TAG_SYNTHETIC.to_string()].into_iter().collect();
        let df = ds.get_dataframe_filtered(MODEL_ID, 1000, &synthetic).unwrap();
        prop_assert!(df.is_empty());
    }
}

// ============================================================================
// SCENARIO TESTS
// ============================================================================

#[test]
fn test_interleaved_calls_do_not_cross_pair() {
    let (ds, r) = reconciler();

    // Two calls in flight at once; responses arrive in reverse order.
    r.add_unreconciled_input(request_payload("a", 1)).unwrap();
    r.add_unreconciled_input(request_payload("b", 2)).unwrap();
    r.add_unreconciled_output(response_payload("b", 20)).unwrap();
    r.add_unreconciled_output(response_payload("a", 10)).unwrap();

    let df = ds.get_dataframe(MODEL_ID).unwrap();
    assert_eq!(df.len(), 2);
    for i in 0..df.len() {
        match df.ids()[i].as_str() {
            "a" => assert_eq!(df.row(i).unwrap(), &[Value::Int(1), Value::Int(10)]),
            "b" => assert_eq!(df.row(i).unwrap(), &[Value::Int(2), Value::Int(20)]),
            other => panic!("unexpected row id: {}", other),
        }
    }
}

#[test]
fn test_concurrent_submissions_reconcile_every_pair() {
    let (ds, r) = reconciler();
    let r = Arc::new(r);

    let mut handles = Vec::new();
    for worker in 0..4 {
        let r = Arc::clone(&r);
        handles.push(std::thread::spawn(move || {
            for i in 0..25 {
                let id = format!("w{}c{}", worker, i);
                if worker % 2 == 0 {
                    r.add_unreconciled_input(request_payload(&id, i)).unwrap();
                    r.add_unreconciled_output(response_payload(&id, i * 10)).unwrap();
                } else {
                    r.add_unreconciled_output(response_payload(&id, i * 10)).unwrap();
                    r.add_unreconciled_input(request_payload(&id, i)).unwrap();
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(r.pending_count(), 0);
    let df = ds.get_dataframe_batch(MODEL_ID, 1000).unwrap();
    assert_eq!(df.len(), 100);
    assert_eq!(r.metrics().snapshot().observations_reconciled, 100);
}
