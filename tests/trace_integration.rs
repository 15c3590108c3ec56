//! Integration tests for engine-fed traces

mod common;

use common::{secs, test_engine};
use pvengine_rs::trace::{HistoricalDataProvider, HistorySample, UpdateMode, XSource};
use pvengine_rs::{RingBuffer, TraceConfig, TraceSpec};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn ys(points: &[pvengine_rs::trace::TracePoint]) -> Vec<f64> {
    points.iter().map(|p| p.y).collect()
}

#[test]
fn test_trace_keeps_latest_samples() {
    let mut engine = test_engine();
    let id = engine
        .create_trace(TraceSpec::new("sim://ramp(0,100,1,1)", TraceConfig::with_capacity(4)))
        .unwrap();
    for t in 0..10 {
        engine.step(secs(t as f64));
    }
    let trace = engine.trace(id).unwrap();
    assert!(trace.is_full());
    assert_eq!(ys(&trace.points()), vec![6.0, 7.0, 8.0, 9.0]);
    let xs: Vec<f64> = trace.points().iter().map(|p| p.x).collect();
    assert_eq!(xs, vec![6.0, 7.0, 8.0, 9.0]);
}

#[test]
fn test_trace_with_x_pv_requires_both() {
    let mut engine = test_engine();
    let config = TraceConfig {
        capacity: 10,
        mode: UpdateMode::XAndY,
        x_source: XSource::Pv,
        sort_by_x: true,
    };
    let id = engine
        .create_trace(TraceSpec::new("loc://y(0)", config).with_x("loc://x(0)"))
        .unwrap();
    engine.step(secs(0.0));
    assert_eq!(engine.trace(id).unwrap().len(), 1);

    // y alone does not commit in XAndY mode
    engine.set_value("loc://y", 5.0).unwrap();
    engine.step(secs(1.0));
    assert_eq!(engine.trace(id).unwrap().len(), 1);

    engine.set_value("loc://x", -3.0).unwrap();
    engine.step(secs(2.0));
    let snapshot = engine.trace(id).unwrap().snapshot();
    assert_eq!(snapshot.len(), 2);
    // sorted by x
    assert_eq!(snapshot[0].x, -3.0);
    assert_eq!(snapshot[0].y, 5.0);
}

#[test]
fn test_x_and_y_changed_together_commit_one_point() {
    let mut engine = test_engine();
    let config = TraceConfig {
        capacity: 10,
        mode: UpdateMode::XOrY,
        x_source: XSource::Pv,
        sort_by_x: false,
    };
    let id = engine
        .create_trace(TraceSpec::new("loc://y(0)", config).with_x("loc://x(0)"))
        .unwrap();
    engine.step(secs(0.0));

    engine.set_value("loc://x", 1.0).unwrap();
    engine.set_value("loc://y", 10.0).unwrap();
    engine.step(secs(1.0));

    let points: Vec<(f64, f64)> = engine
        .trace(id)
        .unwrap()
        .points()
        .iter()
        .map(|p| (p.x, p.y))
        .collect();
    assert_eq!(points, vec![(0.0, 0.0), (1.0, 10.0)]);
}

#[test]
fn test_array_pv_replaces_contents() {
    let mut engine = test_engine();
    let id = engine
        .create_trace(TraceSpec::new("loc://wave", TraceConfig::with_capacity(3)))
        .unwrap();
    engine.set_value("loc://wave", vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    engine.step(secs(0.0));
    let points = engine.trace(id).unwrap().points();
    assert_eq!(ys(&points), vec![1.0, 2.0, 3.0]);
    assert_eq!(points[2].x, 2.0);
}

/// Fixed history that counts disconnects
struct FixedHistory {
    samples: Vec<HistorySample>,
    disconnects: Arc<AtomicUsize>,
}

impl HistoricalDataProvider for FixedHistory {
    fn get_samples(&self) -> Vec<HistorySample> {
        self.samples.clone()
    }

    fn disconnect(&mut self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_history_precedes_live_points_and_disconnects_on_reset() {
    let mut engine = test_engine();
    let disconnects = Arc::new(AtomicUsize::new(0));
    let id = engine
        .create_trace(TraceSpec::new("loc://p(10)", TraceConfig::with_capacity(8)))
        .unwrap();
    engine.trace_mut(id).unwrap().attach_history(Box::new(FixedHistory {
        samples: vec![
            HistorySample { x: Some(-2.0), y: 1.0 },
            HistorySample { x: Some(-1.0), y: 2.0 },
        ],
        disconnects: disconnects.clone(),
    }));
    engine.step(secs(0.0));

    let snapshot = engine.trace(id).unwrap().snapshot();
    assert_eq!(ys(&snapshot), vec![1.0, 2.0, 10.0]);

    engine.reset();
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    assert!(engine.trace(id).is_none());
}

proptest! {
    #[test]
    fn test_ring_buffer_is_fifo(
        capacity in 1usize..32,
        values in prop::collection::vec(any::<i32>(), 0..128)
    ) {
        let mut ring = RingBuffer::new(capacity);
        for &v in &values {
            let was_full = ring.is_full();
            let evicted = ring.push(v);
            prop_assert_eq!(was_full, evicted.is_some());
        }
        let expected: Vec<i32> = values.iter().rev().take(capacity).rev().copied().collect();
        prop_assert_eq!(ring.snapshot(), expected);
        prop_assert_eq!(ring.len(), values.len().min(capacity));
    }
}
