//! Kernel Tests
//!
//! Tests for:
//! - CompileKernel: success, missing files, invalid sources, entry points,
//!   device capabilities
//! - Preprocessor definitions: complete, partial, mismatched lists
//! - AddBuffer: role classification and slot order
//! - RemoveAllBuffers / release: bindings cleared, buffers untouched

use ember::backend::host::{HostBackend, HostConnector};
use naga::valid::Capabilities;
use ember::device::probe;
use ember::{BufferKind, Device, KernelDefines};

fn host_device() -> Device<HostBackend> {
    Device::connect_with(&HostConnector::default(), &probe::default_candidates()).unwrap()
}

fn kernel_path(name: &str) -> String {
    format!("{}/tests/kernels/{name}", env!("CARGO_MANIFEST_DIR"))
}

// ============================================================================
// Compile Tests
// ============================================================================

#[test]
fn compile_produces_empty_kernel() {
    let mut device = host_device();
    let kernel = device
        .compile_kernel(kernel_path("scale.wgsl"), "main", None, None)
        .unwrap();

    assert_eq!(kernel.entry_point(), "main");
    assert_eq!(kernel.declared_group_size(), [64, 1, 1]);
    assert_eq!(kernel.role_counts(), (0, 0, 0));
    assert!(kernel.buffers().is_empty());
    assert_eq!((kernel.threads_x, kernel.threads_y), (1, 1));
    assert_eq!((kernel.group_size_x, kernel.group_size_y), (0, 0));
    assert!(!kernel.is_released());
    assert_eq!(device.backend().unwrap().stats().programs_compiled, 1);
}

#[test]
fn missing_file_returns_none() {
    let mut device = host_device();
    assert!(
        device
            .compile_kernel(kernel_path("does_not_exist.wgsl"), "main", None, None)
            .is_none()
    );
}

#[test]
fn invalid_source_returns_none() {
    let mut device = host_device();
    assert!(
        device
            .compile_kernel(kernel_path("broken.wgsl"), "main", None, None)
            .is_none()
    );
}

#[test]
fn unknown_entry_point_returns_none() {
    let mut device = host_device();
    assert!(
        device
            .compile_kernel(kernel_path("scale.wgsl"), "scale", None, None)
            .is_none()
    );
}

#[test]
fn non_compute_entry_point_returns_none() {
    let mut device = host_device();
    assert!(
        device
            .compile_kernel(kernel_path("vertex.wgsl"), "main", None, None)
            .is_none()
    );
}

#[test]
fn backend_compile_failure_returns_none() {
    let mut device = host_device();
    device.backend_mut().unwrap().faults.fail_compile = true;
    assert!(
        device
            .compile_kernel(kernel_path("scale.wgsl"), "main", None, None)
            .is_none()
    );
}

#[test]
fn kernel_needing_missing_capability_returns_none() {
    let connector = HostConnector {
        capabilities: Capabilities::empty(),
        ..Default::default()
    };
    let mut limited = Device::connect_with(&connector, &probe::default_candidates()).unwrap();
    assert!(
        limited
            .compile_kernel(kernel_path("double.wgsl"), "main", None, None)
            .is_none()
    );
    assert_eq!(limited.backend().unwrap().stats().programs_compiled, 0);

    let mut full = host_device();
    assert!(
        full.compile_kernel(kernel_path("double.wgsl"), "main", None, None)
            .is_some()
    );
}

// ============================================================================
// Definition Tests
// ============================================================================

#[test]
fn definitions_are_expanded() {
    let mut device = host_device();
    let names = ["GROUP", "VALUE"];
    let values = ["32", "7"];

    let kernel = device
        .compile_kernel(kernel_path("fill.wgsl"), "fill", Some(&names[..]), Some(&values[..]))
        .unwrap();
    assert_eq!(kernel.declared_group_size(), [32, 1, 1]);
}

#[test]
fn definitions_select_conditional_blocks() {
    let mut device = host_device();
    let names = ["GROUP", "USE_INDEX"];
    let values = ["16", "1"];

    // VALUE is only referenced in the branch that is not taken.
    let kernel = device
        .compile_kernel(kernel_path("fill.wgsl"), "fill", Some(&names[..]), Some(&values[..]))
        .unwrap();
    assert_eq!(kernel.declared_group_size(), [16, 1, 1]);
}

#[test]
fn partial_definitions_are_ignored() {
    let mut device = host_device();
    let names = ["GROUP", "VALUE"];

    // Without definitions the template references undefined names.
    assert!(
        device
            .compile_kernel(kernel_path("fill.wgsl"), "fill", Some(&names[..]), None)
            .is_none()
    );
}

#[test]
fn mismatched_definitions_are_ignored() {
    let mut device = host_device();
    let names = ["GROUP", "VALUE"];
    let values = ["32"];

    assert!(
        device
            .compile_kernel(kernel_path("fill.wgsl"), "fill", Some(&names[..]), Some(&values[..]))
            .is_none()
    );
}

#[test]
fn prebuilt_definitions_compile() {
    let mut device = host_device();
    let mut defines = KernelDefines::new();
    defines.set("GROUP", "8");
    defines.set("VALUE", "3");
    defines.set("GROUP", "4");

    let kernel = device
        .compile_kernel_with(kernel_path("fill.wgsl"), "fill", &defines)
        .unwrap();
    assert_eq!(kernel.declared_group_size(), [4, 1, 1]);
}

// ============================================================================
// AddBuffer Tests
// ============================================================================

#[test]
fn add_buffer_partitions_by_role() {
    let mut device = host_device();
    let constant = device.create_constant_buffer(16).unwrap();
    let resource = device.create_buffer(4, 4, false).unwrap();
    let random_access = device.create_buffer(4, 4, true).unwrap();
    let mut kernel = device
        .compile_kernel(kernel_path("saxpy.wgsl"), "saxpy", None, None)
        .unwrap();

    assert_eq!(kernel.add_buffer(&constant), 0);
    assert_eq!(kernel.role_counts(), (1, 0, 0));

    assert_eq!(kernel.add_buffer(&resource), 1);
    assert_eq!(kernel.role_counts(), (1, 1, 0));

    assert_eq!(kernel.add_buffer(&random_access), 2);
    assert_eq!(kernel.role_counts(), (1, 1, 1));

    assert_eq!(kernel.constant_slots(), &[0]);
    assert_eq!(kernel.resource_slots(), &[1]);
    assert_eq!(kernel.random_access_slots(), &[2]);
}

#[test]
fn role_lists_keep_insertion_order() {
    let mut device = host_device();
    let a = device.create_buffer(1, 4, false).unwrap();
    let b = device.create_buffer(1, 4, true).unwrap();
    let c = device.create_buffer(1, 4, false).unwrap();
    let d = device.create_constant_buffer(4).unwrap();
    let mut kernel = device
        .compile_kernel(kernel_path("saxpy.wgsl"), "saxpy", None, None)
        .unwrap();

    for buffer in [&a, &b, &c, &d] {
        kernel.add_buffer(buffer);
    }

    assert_eq!(kernel.slots(BufferKind::Resource), &[0, 2]);
    assert_eq!(kernel.slots(BufferKind::RandomAccess), &[1]);
    assert_eq!(kernel.slots(BufferKind::Constant), &[3]);
    assert_eq!(kernel.buffers()[2], c);
}

#[test]
fn remove_all_buffers_keeps_buffers_alive() {
    let mut device = host_device();
    let buffer = device.create_buffer(4, 4, true).unwrap();
    let mut kernel = device
        .compile_kernel(kernel_path("scale.wgsl"), "main", None, None)
        .unwrap();
    kernel.add_buffer(&buffer);

    kernel.remove_all_buffers();

    assert_eq!(kernel.role_counts(), (0, 0, 0));
    assert!(kernel.buffers().is_empty());
    assert!(device.contains(&buffer));
    assert_eq!(device.buffer_count(), 1);
}

#[test]
fn release_drops_program_and_bindings() {
    let mut device = host_device();
    let buffer = device.create_buffer(4, 4, true).unwrap();
    let mut kernel = device
        .compile_kernel(kernel_path("scale.wgsl"), "main", None, None)
        .unwrap();
    kernel.add_buffer(&buffer);

    kernel.release();
    kernel.release();

    assert!(kernel.is_released());
    assert!(kernel.buffers().is_empty());
    assert!(device.contains(&buffer));
}
