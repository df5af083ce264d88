//! Device Lifecycle Tests
//!
//! Tests for:
//! - Probing: candidate order, feature-level fallback, exhaustion
//! - Release: force-release of owned buffers in creation order, idempotence,
//!   release on drop
//! - Operations on a released device
//! - Wait: fence polling, fence creation failure

use ember::backend::host::{HostBackend, HostConnector, HostEvent};
use ember::device::probe::{self, AdapterCandidate, DriverClass, FeatureLevel};
use ember::{ComputeError, Device};

fn host_device() -> Device<HostBackend> {
    Device::connect_with(&HostConnector::default(), &probe::default_candidates()).unwrap()
}

fn kernel_path(name: &str) -> String {
    format!("{}/tests/kernels/{name}", env!("CARGO_MANIFEST_DIR"))
}

// ============================================================================
// Probing Tests
// ============================================================================

#[test]
fn connect_picks_highest_feature_level() {
    let device = host_device();
    assert_eq!(device.feature_level(), FeatureLevel::Level11_0);
    assert_eq!(device.driver_class(), DriverClass::Hardware);
    assert!(!device.is_released());
    assert_eq!(device.buffer_count(), 0);
}

#[test]
fn connect_falls_back_to_lower_feature_level() {
    let connector = HostConnector::with_level(FeatureLevel::Level10_1);
    let device = Device::connect_with(&connector, &probe::default_candidates()).unwrap();
    assert_eq!(device.feature_level(), FeatureLevel::Level10_1);
}

#[test]
fn connect_fails_when_no_candidate_opens() {
    let result = Device::connect_with(&HostConnector::unavailable(), &probe::default_candidates());
    assert!(matches!(result, Err(ComputeError::DeviceUnavailable)));
}

#[test]
fn connect_with_empty_candidate_list_fails() {
    let result = Device::connect_with(&HostConnector::default(), &[]);
    assert!(matches!(result, Err(ComputeError::DeviceUnavailable)));
}

#[test]
fn software_driver_is_not_tried_by_default() {
    let connector = HostConnector {
        driver: DriverClass::Software,
        ..Default::default()
    };
    let result = Device::connect_with(&connector, &probe::default_candidates());
    assert!(matches!(result, Err(ComputeError::DeviceUnavailable)));

    let candidates = [AdapterCandidate::new(DriverClass::Software, FeatureLevel::Level11_0)];
    let device = Device::connect_with(&connector, &candidates).unwrap();
    assert_eq!(device.driver_class(), DriverClass::Software);
}

// ============================================================================
// Release Tests
// ============================================================================

#[test]
fn release_force_releases_every_buffer() {
    let mut device = host_device();
    let stats = device.backend().unwrap().stats_handle();

    let a = device.create_buffer(8, 4, false).unwrap();
    let _b = device.create_buffer(8, 4, true).unwrap();
    let _c = device.create_constant_buffer(12).unwrap();
    assert_eq!(device.buffer_count(), 3);
    assert_eq!(stats.get().live_memory, 3);

    device.release();

    let after = stats.get();
    assert_eq!(after.live_memory, 0);
    assert_eq!(after.live_staging, 0);
    assert_eq!(after.live_views, 0);
    assert_eq!(after.shutdowns, 1);
    assert_eq!(device.buffer_count(), 0);
    assert!(device.is_released());
    assert!(!device.contains(&a));
}

#[test]
fn release_tears_down_in_creation_order_then_shuts_down() {
    let mut device = host_device();
    let stats = device.backend().unwrap().stats_handle();

    // Allocations are numbered: a = memory 0 + staging 1, b = 2 + 3, c = 4.
    let _a = device.create_buffer(8, 4, false).unwrap();
    let _b = device.create_buffer(8, 4, true).unwrap();
    let _c = device.create_constant_buffer(12).unwrap();

    device.release();

    assert_eq!(
        stats.events(),
        [
            HostEvent::ReleaseMemory(0),
            HostEvent::ReleaseView(0),
            HostEvent::ReleaseStaging(1),
            HostEvent::ReleaseMemory(2),
            HostEvent::ReleaseView(2),
            HostEvent::ReleaseStaging(3),
            HostEvent::ReleaseMemory(4),
            HostEvent::Shutdown,
        ]
    );
}

#[test]
fn explicitly_released_buffers_are_skipped_at_teardown() {
    let mut device = host_device();
    let stats = device.backend().unwrap().stats_handle();

    let a = device.create_buffer(4, 4, false).unwrap();
    let _b = device.create_constant_buffer(16).unwrap();
    device.release_buffer(&a);
    device.release();

    assert_eq!(
        stats.events(),
        [
            HostEvent::ReleaseMemory(0),
            HostEvent::ReleaseView(0),
            HostEvent::ReleaseStaging(1),
            HostEvent::ReleaseMemory(2),
            HostEvent::Shutdown,
        ]
    );
}

#[test]
fn release_twice_is_a_no_op() {
    let mut device = host_device();
    let stats = device.backend().unwrap().stats_handle();
    device.create_buffer(4, 4, false).unwrap();

    device.release();
    device.release();

    assert_eq!(stats.get().shutdowns, 1);
    assert!(device.backend().is_none());
}

#[test]
fn drop_releases_device() {
    let mut device = host_device();
    let stats = device.backend().unwrap().stats_handle();
    device.create_buffer(4, 4, true).unwrap();

    drop(device);

    assert_eq!(stats.get().shutdowns, 1);
    assert_eq!(stats.get().live_memory, 0);
}

#[test]
fn operations_after_release_are_rejected() {
    let mut device = host_device();
    let buffer = device.create_buffer(4, 4, true).unwrap();
    let mut kernel = device
        .compile_kernel(kernel_path("scale.wgsl"), "main", None, None)
        .unwrap();
    device.release();

    assert!(device.create_buffer(4, 4, false).is_none());
    assert!(matches!(
        device.create_constant_buffer(16),
        Err(ComputeError::DeviceReleased)
    ));
    assert!(matches!(
        device.write_all(&buffer, &[1.0f32; 4]),
        Err(ComputeError::DeviceReleased)
    ));
    assert!(matches!(
        device.read_all(&buffer, &mut [0.0f32; 4]),
        Err(ComputeError::DeviceReleased)
    ));
    assert!(matches!(device.clear(&buffer, 0, 4), Err(ComputeError::DeviceReleased)));
    assert!(matches!(device.wait(), Err(ComputeError::DeviceReleased)));
    assert!(matches!(
        device.dispatch(&mut kernel),
        Err(ComputeError::DeviceReleased)
    ));
    assert!(
        device
            .compile_kernel(kernel_path("scale.wgsl"), "main", None, None)
            .is_none()
    );

    // Releasing a stale buffer on a released device is harmless.
    device.release_buffer(&buffer);
}

// ============================================================================
// Wait Tests
// ============================================================================

#[test]
fn wait_polls_until_fence_completes() {
    let mut device = host_device();
    device.backend_mut().unwrap().faults.fence_latency = 5;

    device.wait().unwrap();

    let stats = device.backend().unwrap().stats();
    assert_eq!(stats.fences_issued, 1);
    assert_eq!(stats.fence_polls, 6);
}

#[test]
fn wait_returns_immediately_without_fence() {
    let mut device = host_device();
    device.backend_mut().unwrap().faults.fail_fences = true;

    device.wait().unwrap();

    let stats = device.backend().unwrap().stats();
    assert_eq!(stats.fences_issued, 0);
    assert_eq!(stats.fence_polls, 0);
}
