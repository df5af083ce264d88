//! Compute Backends
//!
//! A backend is the device driver seen from the resource manager: it creates
//! and releases allocations, maps them for the host, copies between staging
//! and device memory, builds programs, runs dispatches and answers fences.
//! The [`Device`](crate::Device) layers buffer classification, bounds
//! checking, binding bookkeeping and grid sizing on top.
//!
//! Handles are associated types owned by whoever holds them and are only ever
//! given back to the backend that created them, through the `release_*`
//! methods.
//!
//! Two backends ship with the crate:
//! - [`WgpuBackend`](wgpu_backend::WgpuBackend): a hardware device through wgpu.
//! - [`HostBackend`](host::HostBackend): an in-process software device with
//!   command statistics and failure injection.

pub mod host;
pub mod wgpu_backend;

use smallvec::SmallVec;
use thiserror::Error;

use crate::device::probe::AdapterCandidate;
use crate::dispatch::Launch;
use crate::kernel::source::PreparedKernel;
use crate::view::ViewDesc;

/// Failure reported by a backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The allocation does not fit the device.
    #[error("Out of device memory ({requested} bytes requested)")]
    OutOfMemory {
        /// Requested size in bytes
        requested: u64,
    },

    /// A descriptor was rejected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Mapping an allocation for host access failed.
    #[error("Map failed: {0}")]
    MapFailed(String),

    /// The candidate or operation is not supported.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The device stopped responding.
    #[error("Device lost: {0}")]
    DeviceLost(String),
}

impl BackendError {
    /// Stable numeric status code, reported in
    /// [`ComputeError::ShaderBufferCreationFailed`](crate::ComputeError::ShaderBufferCreationFailed).
    #[must_use]
    pub fn status(&self) -> u32 {
        match self {
            Self::OutOfMemory { .. } => 0x0000_0001,
            Self::InvalidArgument(_) => 0x0000_0002,
            Self::MapFailed(_) => 0x0000_0003,
            Self::Unsupported(_) => 0x0000_0004,
            Self::DeviceLost(_) => 0x0000_0005,
        }
    }
}

/// How an allocation is mapped for host access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapAccess {
    /// Overwrite; prior contents may be invalidated.
    WriteDiscard,
    /// Overwrite a range; the rest is preserved.
    Write,
    Read,
}

/// Device memory request for a view-backed buffer.
#[derive(Debug, Clone, Copy)]
pub struct MemoryDesc<'a> {
    pub label: Option<&'a str>,
    pub byte_width: usize,
    pub element_size: usize,
    /// Kernel-writable (random access) in addition to bindable.
    pub read_write: bool,
    /// The element layout asked for a raw view.
    pub allow_raw_views: bool,
}

/// Handles bound for one dispatch, per role, in slot order.
pub struct StageBindings<'a, B: ComputeBackend + ?Sized> {
    /// Device memory of constant buffers (slot 0, 1, …).
    pub constants: SmallVec<[&'a B::Memory; 8]>,
    /// Views of resource buffers.
    pub resources: SmallVec<[&'a B::View; 8]>,
    /// Views of random-access buffers.
    pub random_access: SmallVec<[&'a B::View; 8]>,
}

impl<B: ComputeBackend + ?Sized> StageBindings<'_, B> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            constants: SmallVec::new(),
            resources: SmallVec::new(),
            random_access: SmallVec::new(),
        }
    }

    /// Slot counts as `[constants, resources, random_access]`.
    #[must_use]
    pub fn counts(&self) -> [usize; 3] {
        [
            self.constants.len(),
            self.resources.len(),
            self.random_access.len(),
        ]
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts() == [0, 0, 0]
    }
}

impl<B: ComputeBackend + ?Sized> Default for StageBindings<'_, B> {
    fn default() -> Self {
        Self::new()
    }
}

/// A device driver.
///
/// All calls come from the single thread that owns the
/// [`Device`](crate::Device); implementations do no locking of their own.
pub trait ComputeBackend {
    /// Device memory allocation.
    type Memory;
    /// Host-visible staging allocation.
    type Staging;
    /// Binding view over device memory.
    type View;
    /// Compiled compute program.
    type Program;
    /// Completion marker in the command stream.
    type Fence;

    /// Human-readable adapter description for logs.
    fn describe(&self) -> String;

    // === Allocation ===

    fn create_memory(&mut self, desc: &MemoryDesc<'_>) -> Result<Self::Memory, BackendError>;

    /// Host-writable memory bound in constant slots; `byte_width` is already
    /// a multiple of 16.
    fn create_constant_memory(
        &mut self,
        label: Option<&str>,
        byte_width: usize,
    ) -> Result<Self::Memory, BackendError>;

    fn create_staging(
        &mut self,
        label: Option<&str>,
        byte_width: usize,
    ) -> Result<Self::Staging, BackendError>;

    fn create_view(
        &mut self,
        memory: &Self::Memory,
        desc: &ViewDesc,
    ) -> Result<Self::View, BackendError>;

    fn release_memory(&mut self, memory: Self::Memory);
    fn release_view(&mut self, view: Self::View);
    fn release_staging(&mut self, staging: Self::Staging);

    // === Transfer ===

    /// Maps device memory directly. Only constant memory supports this.
    fn map_memory(
        &mut self,
        memory: &Self::Memory,
        access: MapAccess,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> Result<(), BackendError>;

    fn map_staging(
        &mut self,
        staging: &mut Self::Staging,
        access: MapAccess,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> Result<(), BackendError>;

    /// Whole-resource copy from staging into device memory.
    fn copy_staging_to_memory(&mut self, staging: &Self::Staging, memory: &Self::Memory);

    /// Whole-resource copy from device memory into staging.
    ///
    /// Completes before returning: afterwards the staging contents reflect
    /// every command issued before the call.
    fn copy_memory_to_staging(
        &mut self,
        memory: &Self::Memory,
        staging: &mut Self::Staging,
    ) -> Result<(), BackendError>;

    // === Programs ===

    /// Shader capabilities kernels are validated against before `compile`.
    fn kernel_capabilities(&self) -> naga::valid::Capabilities;

    fn compile(&mut self, kernel: &PreparedKernel) -> Result<Self::Program, BackendError>;

    /// Binds `program` and `bindings` (each role from slot 0) and runs
    /// `launch.grid` once.
    fn dispatch(
        &mut self,
        program: &mut Self::Program,
        bindings: &StageBindings<'_, Self>,
        launch: &Launch,
    ) -> Result<(), BackendError>;

    // === Synchronization ===

    /// Inserts a completion marker after all issued work. `None` when the
    /// marker could not be created.
    fn issue_fence(&mut self) -> Option<Self::Fence>;

    /// Non-blocking completion query.
    fn fence_signaled(&mut self, fence: &Self::Fence) -> bool;

    /// Releases the command context and the device.
    fn shutdown(&mut self);
}

/// Opens backends for probe candidates.
pub trait BackendConnector {
    type Backend: ComputeBackend;

    /// One connection attempt. `BackendError::Unsupported` means the
    /// candidate is simply not available and the next one should be tried.
    fn open(&self, candidate: &AdapterCandidate) -> Result<Self::Backend, BackendError>;
}
