//! Integration tests for bounded reads against a fake device.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

mod common;

use std::time::{Duration, Instant};

use common::{FakeDevice, TEST_GUARD};
use ocp_core::{GroupId, ProbeOutcome, ReadOutcome};
use tokio::time::timeout;

// ============================================================================
// Timeout Behavior
// ============================================================================

#[tokio::test]
async fn test_stuck_read_times_out_within_ceiling() {
    let device = FakeDevice::minimal();
    device.make_stuck("clock_source");
    let engine = device.engine(200);

    let started = Instant::now();
    let result = timeout(TEST_GUARD, engine.reader().read_str("clock_source"))
        .await
        .expect("read must not hang")
        .unwrap();

    assert_eq!(result.outcome, ReadOutcome::TimedOut);
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "took {:?}",
        started.elapsed()
    );
    assert_eq!(engine.reader().stalled_count(), 1);
}

#[tokio::test]
async fn test_quarantined_path_fails_fast() {
    let device = FakeDevice::minimal();
    device.make_stuck("clock_source");
    let engine = device.engine(200);
    let reader = engine.reader();

    let first = reader.read_str("clock_source").await.unwrap();
    assert_eq!(first.outcome, ReadOutcome::TimedOut);

    let started = Instant::now();
    let second = reader.read_str("clock_source").await.unwrap();
    assert_eq!(second.outcome, ReadOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_millis(100));
    // No second thread was parked on the same path.
    assert_eq!(reader.stalled_count(), 1);
}

#[tokio::test]
async fn test_stuck_attribute_does_not_affect_others() {
    let device = FakeDevice::minimal();
    device.make_stuck("clock_source");
    let engine = device.engine(200);
    let reader = engine.reader();

    let _ = reader.read_str("clock_source").await.unwrap();

    let started = Instant::now();
    let serial = reader.read_str("serial_number").await.unwrap();
    assert_eq!(serial.value(), Some("OCP-TEST-0001"));
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn test_probe_of_stuck_leaf_does_not_block() {
    let device = FakeDevice::minimal();
    device.make_stuck("tod_protocol");
    let engine = device.engine(200);

    // Existence checks never open the leaf.
    let outcome = engine.reader().probe_leaf("tod_protocol").await.unwrap();
    assert_eq!(outcome, ProbeOutcome::Present);

    let caps = timeout(TEST_GUARD, engine.discover_capabilities())
        .await
        .unwrap();
    assert!(caps.is_available(GroupId::Tod));
}

// ============================================================================
// Snapshot With Stuck Attributes
// ============================================================================

#[tokio::test]
async fn test_snapshot_completes_with_stuck_attribute() {
    let device = FakeDevice::full();
    device.make_stuck("gen2/duty");
    let engine = device.engine(200);

    let started = Instant::now();
    let snapshot = timeout(TEST_GUARD, engine.read_snapshot())
        .await
        .expect("snapshot must not hang")
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    let generators = snapshot.generators.unwrap();
    assert_eq!(generators.get(&2).unwrap().duty, None);
    assert_eq!(generators.get(&2).unwrap().period, Some(1_000_000_000));
    assert_eq!(generators.get(&1).unwrap().duty, Some(50));
}

// ============================================================================
// Outcome Mapping
// ============================================================================

#[tokio::test]
async fn test_not_found_is_fast() {
    let device = FakeDevice::minimal();
    let engine = device.engine(3000);

    let result = engine.reader().read_str("irig.mode").await.unwrap();
    assert_eq!(result.outcome, ReadOutcome::NotFound);
    assert!(result.elapsed < Duration::from_millis(500));
}

#[tokio::test]
async fn test_resolve_errors_are_not_device_errors() {
    let device = FakeDevice::minimal();
    let engine = device.engine(200);
    let reader = engine.reader();

    assert!(reader.read_leaf("../ocp1/serialnum").await.is_err());
    assert!(reader.read_str("generator[9].duty").await.is_err());
    assert!(reader.read_str("generator.duty").await.is_err());
}
