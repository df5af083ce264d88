//! Buffer Tests
//!
//! Tests for:
//! - Classification: resource / random-access / constant kinds and their handles
//! - View selection: structured vs raw, rejected layouts
//! - Failure paths: no partial buffer left registered
//! - Constant buffers: 16-byte rounding, status codes on failure
//! - Release: memory, view, staging order, idempotence, owned-count bookkeeping
//! - Ownership: handles from another device are rejected

use ember::backend::host::{HostBackend, HostConnector, HostEvent, HostFaults};
use ember::buffer::constant_buffer_width;
use ember::device::probe;
use ember::{BufferKind, ComputeError, Device, ElementLayout, ViewKind};

fn host_device() -> Device<HostBackend> {
    Device::connect_with(&HostConnector::default(), &probe::default_candidates()).unwrap()
}

fn host_device_with(faults: HostFaults) -> Device<HostBackend> {
    let connector = HostConnector {
        faults,
        ..Default::default()
    };
    Device::connect_with(&connector, &probe::default_candidates()).unwrap()
}

// ============================================================================
// Classification Tests
// ============================================================================

#[test]
fn read_only_buffer_is_resource() {
    let mut device = host_device();
    let buffer = device.create_buffer(16, 4, false).unwrap();

    assert_eq!(buffer.kind(), BufferKind::Resource);
    assert_eq!(buffer.length(), 16);
    assert_eq!(buffer.element_size(), 4);
    assert_eq!(buffer.byte_capacity(), 64);
    assert_eq!(buffer.view_kind(), Some(ViewKind::Structured));
    assert_eq!(device.buffer_count(), 1);
    assert!(device.contains(&buffer));
}

#[test]
fn read_write_buffer_is_random_access() {
    let mut device = host_device();
    let buffer = device.create_buffer(3, 12, true).unwrap();

    assert_eq!(buffer.kind(), BufferKind::RandomAccess);
    assert_eq!(buffer.byte_capacity(), 36);
}

#[test]
fn view_backed_buffers_own_memory_staging_and_view() {
    let mut device = host_device();
    device.create_buffer(8, 4, false).unwrap();
    device.create_buffer(8, 4, true).unwrap();

    let stats = device.backend().unwrap().stats();
    assert_eq!(stats.live_memory, 2);
    assert_eq!(stats.live_staging, 2);
    assert_eq!(stats.live_views, 2);
}

#[test]
fn constant_buffer_has_no_staging_or_view() {
    let mut device = host_device();
    let buffer = device.create_constant_buffer(20).unwrap();

    assert_eq!(buffer.kind(), BufferKind::Constant);
    assert_eq!(buffer.length(), 1);
    assert_eq!(buffer.element_size(), 32);
    assert_eq!(buffer.view_kind(), None);

    let stats = device.backend().unwrap().stats();
    assert_eq!(stats.live_memory, 1);
    assert_eq!(stats.live_staging, 0);
    assert_eq!(stats.live_views, 0);
}

#[test]
fn constant_width_is_rounded_to_sixteen() {
    let mut device = host_device();
    for (requested, width) in [(1, 16), (16, 16), (17, 32), (48, 48)] {
        let buffer = device.create_constant_buffer(requested).unwrap();
        assert_eq!(buffer.element_size(), width);
        assert_eq!(constant_buffer_width(requested), width);
    }
}

// ============================================================================
// View Selection Tests
// ============================================================================

#[test]
fn raw_layout_creates_raw_view() {
    let mut device = host_device();
    let buffer = device
        .create_buffer_with_layout(10, ElementLayout::raw(2), false)
        .unwrap();

    assert_eq!(buffer.view_kind(), Some(ViewKind::Raw));
    assert_eq!(buffer.byte_capacity(), 20);
}

#[test]
fn raw_layout_with_unaligned_width_fails_cleanly() {
    let mut device = host_device();
    let buffer = device.create_buffer_with_layout(3, ElementLayout::raw(2), true);

    assert!(buffer.is_none());
    assert_eq!(device.buffer_count(), 0);
    let stats = device.backend().unwrap().stats();
    assert_eq!(stats.live_memory, 0);
    assert_eq!(stats.live_staging, 0);
    assert_eq!(stats.live_views, 0);
}

// ============================================================================
// Failure Path Tests
// ============================================================================

#[test]
fn zero_length_buffer_is_rejected() {
    let mut device = host_device();
    assert!(device.create_buffer(0, 4, false).is_none());
    assert!(device.create_buffer(4, 0, false).is_none());
    assert_eq!(device.buffer_count(), 0);
}

#[test]
fn allocation_failure_returns_none() {
    let mut device = host_device_with(HostFaults {
        max_allocation: Some(64),
        ..Default::default()
    });

    assert!(device.create_buffer(32, 4, true).is_none());
    assert!(device.create_buffer(16, 4, true).is_some());
    assert_eq!(device.buffer_count(), 1);
    assert_eq!(device.backend().unwrap().stats().live_memory, 1);
}

#[test]
fn view_failure_releases_memory_and_staging() {
    let mut device = host_device_with(HostFaults {
        fail_views: true,
        ..Default::default()
    });

    assert!(device.create_buffer(8, 4, false).is_none());

    let stats = device.backend().unwrap().stats();
    assert_eq!(stats.live_memory, 0);
    assert_eq!(stats.live_staging, 0);
    assert_eq!(device.buffer_count(), 0);
}

#[test]
fn constant_allocation_failure_carries_status_code() {
    let mut device = host_device_with(HostFaults {
        max_allocation: Some(16),
        ..Default::default()
    });

    let err = device.create_constant_buffer(17).unwrap_err();
    assert!(matches!(err, ComputeError::ShaderBufferCreationFailed { code: 1 }));
    assert_eq!(device.buffer_count(), 0);
}

#[test]
fn empty_constant_buffer_is_rejected() {
    let mut device = host_device();
    let err = device.create_constant_buffer(0).unwrap_err();
    assert!(matches!(err, ComputeError::ShaderBufferCreationFailed { code: 2 }));
}

// ============================================================================
// Release Tests
// ============================================================================

#[test]
fn create_then_release_leaves_count_unchanged() {
    let mut device = host_device();
    let keep = device.create_buffer(4, 4, false).unwrap();
    let before = device.buffer_count();

    let buffer = device.create_buffer(4, 4, true).unwrap();
    device.release_buffer(&buffer);

    assert_eq!(device.buffer_count(), before);
    assert!(device.contains(&keep));
    assert!(!device.contains(&buffer));

    let stats = device.backend().unwrap().stats();
    assert_eq!(stats.live_memory, 1);
    assert_eq!(stats.live_staging, 1);
    assert_eq!(stats.live_views, 1);
}

#[test]
fn release_buffer_frees_memory_then_view_then_staging() {
    let mut device = host_device();
    let buffer = device.create_buffer(4, 4, true).unwrap();

    device.release_buffer(&buffer);

    assert_eq!(
        device.backend().unwrap().events(),
        [
            HostEvent::ReleaseMemory(0),
            HostEvent::ReleaseView(0),
            HostEvent::ReleaseStaging(1),
        ]
    );
}

#[test]
fn release_buffer_twice_is_ignored() {
    let mut device = host_device();
    let buffer = device.create_constant_buffer(16).unwrap();

    device.release_buffer(&buffer);
    device.release_buffer(&buffer);

    assert_eq!(device.buffer_count(), 0);
    assert_eq!(device.backend().unwrap().stats().live_memory, 0);
}

#[test]
fn stale_handle_is_not_confused_with_new_buffer() {
    let mut device = host_device();
    let old = device.create_buffer(4, 4, false).unwrap();
    device.release_buffer(&old);
    let new = device.create_buffer(4, 4, false).unwrap();

    assert_ne!(old.id(), new.id());
    assert!(matches!(
        device.write_all(&old, &[0u32; 4]),
        Err(ComputeError::BufferReleased)
    ));
    device.write_all(&new, &[0u32; 4]).unwrap();
}

// ============================================================================
// Ownership Tests
// ============================================================================

#[test]
fn handle_from_another_device_is_rejected() {
    let mut a = host_device();
    let mut b = host_device();
    let on_a = a.create_buffer(4, 4, true).unwrap();
    let on_b = b.create_buffer(4, 4, true).unwrap();
    // Fresh slot maps hand out the same first key.
    assert_eq!(on_a.id(), on_b.id());

    assert!(!b.contains(&on_a));
    assert!(matches!(
        b.write_all(&on_a, &[1u32; 4]),
        Err(ComputeError::ForeignBuffer)
    ));
    let mut out = [0u32; 4];
    assert!(matches!(
        b.read_all(&on_a, &mut out),
        Err(ComputeError::ForeignBuffer)
    ));
    assert!(matches!(b.clear(&on_a, 0, 4), Err(ComputeError::ForeignBuffer)));
    assert_eq!(b.backend().unwrap().stats().copies_to_memory, 0);
}

#[test]
fn releasing_a_foreign_handle_leaves_both_devices_intact() {
    let mut a = host_device();
    let mut b = host_device();
    let on_a = a.create_buffer(4, 4, false).unwrap();
    let on_b = b.create_buffer(4, 4, false).unwrap();

    b.release_buffer(&on_a);

    assert!(a.contains(&on_a));
    assert!(b.contains(&on_b));
    assert_eq!(b.buffer_count(), 1);
    assert!(b.backend().unwrap().events().is_empty());
}
