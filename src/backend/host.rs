//! In-Process Host Backend
//!
//! A software device that keeps every allocation in host memory. Kernels are
//! host routines registered per entry point; dispatching a program runs its
//! routine once with the bound slots. The backend records every command it
//! receives in [`HostStats`] and [`DispatchRecord`]s and can be told to fail
//! through [`HostFaults`], so the full transfer protocol can be observed
//! without hardware.
//!
//! ```rust,ignore
//! let connector = HostConnector::default();
//! let mut device = Device::connect_with(&connector, &probe::default_candidates())?;
//! device.backend_mut().unwrap().register_routine("main", |inv| {
//!     let mut data: Vec<f32> = inv.random_access(0);
//!     data.iter_mut().for_each(|v| *v *= 2.0);
//!     inv.store_random_access(0, &data);
//! });
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bytemuck::Pod;
use naga::valid::Capabilities;
use rustc_hash::FxHashMap;

use super::{BackendConnector, BackendError, ComputeBackend, MapAccess, MemoryDesc, StageBindings};
use crate::device::probe::{AdapterCandidate, DriverClass, FeatureLevel};
use crate::dispatch::{DispatchGrid, Launch};
use crate::kernel::source::PreparedKernel;
use crate::view::ViewDesc;

type Bytes = Rc<RefCell<Vec<u8>>>;

/// Host routine standing in for a compiled kernel.
pub type HostRoutine = Rc<dyn Fn(&mut HostInvocation<'_>)>;

/// Failure injection switches.
#[derive(Debug, Clone, Default)]
pub struct HostFaults {
    /// Allocations larger than this many bytes fail with `OutOfMemory`.
    pub max_allocation: Option<usize>,
    /// View creation fails.
    pub fail_views: bool,
    /// Every map (device memory or staging) fails.
    pub fail_maps: bool,
    /// Device → staging copies fail.
    pub fail_readback: bool,
    /// Fence creation fails.
    pub fail_fences: bool,
    /// Program creation fails.
    pub fail_compile: bool,
    /// Dispatches fail.
    pub fail_dispatch: bool,
    /// Polls a fence needs before it reports completion.
    pub fence_latency: u32,
}

/// Command counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub live_memory: usize,
    pub live_staging: usize,
    pub live_views: usize,
    pub programs_compiled: usize,
    pub memory_maps: usize,
    pub staging_maps: usize,
    pub copies_to_memory: usize,
    pub copies_to_staging: usize,
    pub fences_issued: usize,
    pub fence_polls: usize,
    pub shutdowns: usize,
}

/// Release and teardown commands in the order they reached the backend.
///
/// Allocations are numbered from 0 in creation order; a view carries the
/// number of the memory it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    ReleaseMemory(u64),
    ReleaseView(u64),
    ReleaseStaging(u64),
    Shutdown,
}

/// Shared handle to a backend's [`HostStats`] and [`HostEvent`] log.
#[derive(Debug, Clone)]
pub struct HostStatsHandle {
    stats: Rc<Cell<HostStats>>,
    events: Rc<RefCell<Vec<HostEvent>>>,
}

impl HostStatsHandle {
    #[must_use]
    pub fn get(&self) -> HostStats {
        self.stats.get()
    }

    #[must_use]
    pub fn events(&self) -> Vec<HostEvent> {
        self.events.borrow().clone()
    }
}

/// What one dispatch bound and launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    pub entry_point: String,
    pub launch: Launch,
    /// Contents of each constant slot at dispatch time.
    pub constants: Vec<Vec<u8>>,
    /// Element counts of the resource views, per slot.
    pub resources: Vec<usize>,
    /// Element counts of the random-access views, per slot.
    pub random_access: Vec<usize>,
}

impl DispatchRecord {
    /// Decodes the constant bound at `slot`.
    #[must_use]
    pub fn constant<T: Pod>(&self, slot: usize) -> Option<T> {
        let bytes = self.constants.get(slot)?;
        let size = std::mem::size_of::<T>();
        (bytes.len() >= size).then(|| bytemuck::pod_read_unaligned(&bytes[..size]))
    }
}

pub struct HostMemory {
    serial: u64,
    bytes: Bytes,
    constant: bool,
}

impl HostMemory {
    /// Allocation number, see [`HostEvent`].
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct HostStaging {
    serial: u64,
    bytes: Vec<u8>,
}

pub struct HostView {
    serial: u64,
    bytes: Bytes,
    desc: ViewDesc,
}

pub struct HostProgram {
    entry_point: String,
    workgroup_size: [u32; 3],
    routine: Option<HostRoutine>,
}

impl HostProgram {
    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    #[must_use]
    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }
}

pub struct HostFence {
    remaining: Cell<u32>,
}

/// Slots handed to a routine during one dispatch.
pub struct HostInvocation<'a> {
    launch: &'a Launch,
    constants: Vec<Bytes>,
    resources: Vec<Bytes>,
    random_access: Vec<Bytes>,
}

fn decode<T: Pod>(bytes: &[u8]) -> Vec<T> {
    let size = std::mem::size_of::<T>();
    if size == 0 {
        return Vec::new();
    }
    let count = bytes.len() / size;
    let mut out = vec![T::zeroed(); count];
    bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&bytes[..count * size]);
    out
}

impl HostInvocation<'_> {
    #[must_use]
    pub fn launch(&self) -> &Launch {
        self.launch
    }

    #[must_use]
    pub fn grid(&self) -> DispatchGrid {
        self.launch.grid
    }

    /// Constant slot contents as `T` values; empty for an unbound slot.
    #[must_use]
    pub fn constants<T: Pod>(&self, slot: usize) -> Vec<T> {
        self.constants
            .get(slot)
            .map_or_else(Vec::new, |b| decode(&b.borrow()))
    }

    #[must_use]
    pub fn resource<T: Pod>(&self, slot: usize) -> Vec<T> {
        self.resources
            .get(slot)
            .map_or_else(Vec::new, |b| decode(&b.borrow()))
    }

    #[must_use]
    pub fn random_access<T: Pod>(&self, slot: usize) -> Vec<T> {
        self.random_access
            .get(slot)
            .map_or_else(Vec::new, |b| decode(&b.borrow()))
    }

    /// Overwrites the start of a random-access slot. Data past the end of
    /// the allocation is dropped.
    pub fn store_random_access<T: Pod>(&mut self, slot: usize, data: &[T]) {
        let Some(target) = self.random_access.get(slot) else {
            return;
        };
        let src: &[u8] = bytemuck::cast_slice(data);
        let mut dst = target.borrow_mut();
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
    }
}

/// The software device.
pub struct HostBackend {
    candidate: AdapterCandidate,
    routines: FxHashMap<String, HostRoutine>,
    pub faults: HostFaults,
    /// Capabilities kernels are validated against.
    pub capabilities: Capabilities,
    stats: Rc<Cell<HostStats>>,
    events: Rc<RefCell<Vec<HostEvent>>>,
    next_serial: u64,
    dispatches: Vec<DispatchRecord>,
    shut_down: bool,
}

impl HostBackend {
    #[must_use]
    pub fn new(candidate: AdapterCandidate) -> Self {
        Self {
            candidate,
            routines: FxHashMap::default(),
            faults: HostFaults::default(),
            capabilities: Capabilities::all(),
            stats: Rc::default(),
            events: Rc::default(),
            next_serial: 0,
            dispatches: Vec::new(),
            shut_down: false,
        }
    }

    /// Registers the routine run for programs compiled with `entry_point`.
    /// Programs capture their routine at compile time.
    pub fn register_routine<F>(&mut self, entry_point: &str, routine: F)
    where
        F: Fn(&mut HostInvocation<'_>) + 'static,
    {
        self.routines
            .insert(entry_point.to_string(), Rc::new(routine));
    }

    #[must_use]
    pub fn candidate(&self) -> AdapterCandidate {
        self.candidate
    }

    #[must_use]
    pub fn stats(&self) -> HostStats {
        self.stats.get()
    }

    /// Shared view of the counters that outlives the backend, for observing
    /// teardown.
    #[must_use]
    pub fn stats_handle(&self) -> HostStatsHandle {
        HostStatsHandle {
            stats: Rc::clone(&self.stats),
            events: Rc::clone(&self.events),
        }
    }

    /// Release and shutdown commands received so far.
    #[must_use]
    pub fn events(&self) -> Vec<HostEvent> {
        self.events.borrow().clone()
    }

    fn record(&self, event: HostEvent) {
        self.events.borrow_mut().push(event);
    }

    fn bump(&self, f: impl FnOnce(&mut HostStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    #[must_use]
    pub fn dispatches(&self) -> &[DispatchRecord] {
        &self.dispatches
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn allocate(&mut self, byte_width: usize) -> Result<(u64, Vec<u8>), BackendError> {
        if byte_width == 0 {
            return Err(BackendError::InvalidArgument(
                "zero-sized allocation".to_string(),
            ));
        }
        if let Some(max) = self.faults.max_allocation
            && byte_width > max
        {
            return Err(BackendError::OutOfMemory {
                requested: byte_width as u64,
            });
        }
        let serial = self.next_serial;
        self.next_serial += 1;
        Ok((serial, vec![0; byte_width]))
    }

    fn check_map(&self) -> Result<(), BackendError> {
        if self.faults.fail_maps {
            Err(BackendError::MapFailed("injected map failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl ComputeBackend for HostBackend {
    type Memory = HostMemory;
    type Staging = HostStaging;
    type View = HostView;
    type Program = HostProgram;
    type Fence = HostFence;

    fn describe(&self) -> String {
        format!(
            "host ({:?}, feature level {})",
            self.candidate.driver, self.candidate.level
        )
    }

    fn create_memory(&mut self, desc: &MemoryDesc<'_>) -> Result<HostMemory, BackendError> {
        let (serial, bytes) = self.allocate(desc.byte_width)?;
        self.bump(|s| s.live_memory += 1);
        Ok(HostMemory {
            serial,
            bytes: Rc::new(RefCell::new(bytes)),
            constant: false,
        })
    }

    fn create_constant_memory(
        &mut self,
        _label: Option<&str>,
        byte_width: usize,
    ) -> Result<HostMemory, BackendError> {
        let (serial, bytes) = self.allocate(byte_width)?;
        self.bump(|s| s.live_memory += 1);
        Ok(HostMemory {
            serial,
            bytes: Rc::new(RefCell::new(bytes)),
            constant: true,
        })
    }

    fn create_staging(
        &mut self,
        _label: Option<&str>,
        byte_width: usize,
    ) -> Result<HostStaging, BackendError> {
        let (serial, bytes) = self.allocate(byte_width)?;
        self.bump(|s| s.live_staging += 1);
        Ok(HostStaging { serial, bytes })
    }

    fn create_view(&mut self, memory: &HostMemory, desc: &ViewDesc) -> Result<HostView, BackendError> {
        if self.faults.fail_views {
            return Err(BackendError::InvalidArgument(
                "injected view failure".to_string(),
            ));
        }
        if desc.byte_len() > memory.len() {
            return Err(BackendError::InvalidArgument(format!(
                "view covers {} bytes of a {} byte allocation",
                desc.byte_len(),
                memory.len()
            )));
        }
        self.bump(|s| s.live_views += 1);
        Ok(HostView {
            serial: memory.serial,
            bytes: Rc::clone(&memory.bytes),
            desc: *desc,
        })
    }

    fn release_memory(&mut self, memory: HostMemory) {
        self.bump(|s| s.live_memory -= 1);
        self.record(HostEvent::ReleaseMemory(memory.serial));
    }

    fn release_view(&mut self, view: HostView) {
        self.bump(|s| s.live_views -= 1);
        self.record(HostEvent::ReleaseView(view.serial));
    }

    fn release_staging(&mut self, staging: HostStaging) {
        self.bump(|s| s.live_staging -= 1);
        self.record(HostEvent::ReleaseStaging(staging.serial));
    }

    fn map_memory(
        &mut self,
        memory: &HostMemory,
        access: MapAccess,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> Result<(), BackendError> {
        if !memory.constant {
            return Err(BackendError::InvalidArgument(
                "only constant memory can be mapped directly".to_string(),
            ));
        }
        self.check_map()?;
        self.bump(|s| s.memory_maps += 1);

        let mut bytes = memory.bytes.borrow_mut();
        match access {
            MapAccess::WriteDiscard => {
                bytes.fill(0);
                f(bytes.as_mut_slice());
            }
            MapAccess::Write => f(bytes.as_mut_slice()),
            MapAccess::Read => {
                let mut copy = bytes.clone();
                f(&mut copy);
            }
        }
        Ok(())
    }

    fn map_staging(
        &mut self,
        staging: &mut HostStaging,
        access: MapAccess,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> Result<(), BackendError> {
        self.check_map()?;
        self.bump(|s| s.staging_maps += 1);

        if access == MapAccess::Read {
            let mut copy = staging.bytes.clone();
            f(&mut copy);
        } else {
            f(&mut staging.bytes);
        }
        Ok(())
    }

    fn copy_staging_to_memory(&mut self, staging: &HostStaging, memory: &HostMemory) {
        self.bump(|s| s.copies_to_memory += 1);
        let mut dst = memory.bytes.borrow_mut();
        let n = dst.len().min(staging.bytes.len());
        dst[..n].copy_from_slice(&staging.bytes[..n]);
    }

    fn copy_memory_to_staging(
        &mut self,
        memory: &HostMemory,
        staging: &mut HostStaging,
    ) -> Result<(), BackendError> {
        if self.faults.fail_readback {
            return Err(BackendError::MapFailed(
                "injected readback failure".to_string(),
            ));
        }
        self.bump(|s| s.copies_to_staging += 1);
        let src = memory.bytes.borrow();
        let n = src.len().min(staging.bytes.len());
        staging.bytes[..n].copy_from_slice(&src[..n]);
        Ok(())
    }

    fn kernel_capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn compile(&mut self, kernel: &PreparedKernel) -> Result<HostProgram, BackendError> {
        if self.faults.fail_compile {
            return Err(BackendError::InvalidArgument(format!(
                "injected compile failure for {}",
                kernel.label()
            )));
        }
        let routine = self.routines.get(&kernel.entry_point).cloned();
        if routine.is_none() {
            log::debug!(
                "No host routine registered for '{}'; dispatches will only be recorded",
                kernel.entry_point
            );
        }
        self.bump(|s| s.programs_compiled += 1);
        Ok(HostProgram {
            entry_point: kernel.entry_point.clone(),
            workgroup_size: kernel.workgroup_size,
            routine,
        })
    }

    fn dispatch(
        &mut self,
        program: &mut HostProgram,
        bindings: &StageBindings<'_, Self>,
        launch: &Launch,
    ) -> Result<(), BackendError> {
        if self.faults.fail_dispatch {
            return Err(BackendError::DeviceLost(
                "injected dispatch failure".to_string(),
            ));
        }

        self.dispatches.push(DispatchRecord {
            entry_point: program.entry_point.clone(),
            launch: *launch,
            constants: bindings
                .constants
                .iter()
                .map(|m| m.bytes.borrow().clone())
                .collect(),
            resources: bindings
                .resources
                .iter()
                .map(|v| v.desc.element_count)
                .collect(),
            random_access: bindings
                .random_access
                .iter()
                .map(|v| v.desc.element_count)
                .collect(),
        });

        if let Some(routine) = &program.routine {
            let mut invocation = HostInvocation {
                launch,
                constants: bindings.constants.iter().map(|m| Rc::clone(&m.bytes)).collect(),
                resources: bindings.resources.iter().map(|v| Rc::clone(&v.bytes)).collect(),
                random_access: bindings
                    .random_access
                    .iter()
                    .map(|v| Rc::clone(&v.bytes))
                    .collect(),
            };
            routine(&mut invocation);
        }
        Ok(())
    }

    fn issue_fence(&mut self) -> Option<HostFence> {
        if self.faults.fail_fences {
            return None;
        }
        self.bump(|s| s.fences_issued += 1);
        Some(HostFence {
            remaining: Cell::new(self.faults.fence_latency),
        })
    }

    fn fence_signaled(&mut self, fence: &HostFence) -> bool {
        self.bump(|s| s.fence_polls += 1);
        match fence.remaining.get() {
            0 => true,
            n => {
                fence.remaining.set(n - 1);
                false
            }
        }
    }

    fn shutdown(&mut self) {
        self.bump(|s| s.shutdowns += 1);
        self.record(HostEvent::Shutdown);
        self.shut_down = true;
        self.routines.clear();
    }
}

/// Opens [`HostBackend`]s for the candidates it supports.
#[derive(Debug, Clone)]
pub struct HostConnector {
    pub driver: DriverClass,
    pub supported_levels: Vec<FeatureLevel>,
    /// Faults installed on every backend this connector opens.
    pub faults: HostFaults,
    /// Kernel capabilities of every backend this connector opens.
    pub capabilities: Capabilities,
}

impl Default for HostConnector {
    fn default() -> Self {
        Self {
            driver: DriverClass::Hardware,
            supported_levels: vec![FeatureLevel::Level11_0, FeatureLevel::Level10_1],
            faults: HostFaults::default(),
            capabilities: Capabilities::all(),
        }
    }
}

impl HostConnector {
    /// A connector that only opens `level` on hardware.
    #[must_use]
    pub fn with_level(level: FeatureLevel) -> Self {
        Self {
            supported_levels: vec![level],
            ..Default::default()
        }
    }

    /// A connector that opens nothing.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            supported_levels: Vec::new(),
            ..Default::default()
        }
    }
}

impl BackendConnector for HostConnector {
    type Backend = HostBackend;

    fn open(&self, candidate: &AdapterCandidate) -> Result<HostBackend, BackendError> {
        if candidate.driver != self.driver || !self.supported_levels.contains(&candidate.level) {
            return Err(BackendError::Unsupported(format!(
                "host device does not offer {:?} / {}",
                candidate.driver, candidate.level
            )));
        }
        let mut backend = HostBackend::new(*candidate);
        backend.faults = self.faults.clone();
        backend.capabilities = self.capabilities;
        Ok(backend)
    }
}
