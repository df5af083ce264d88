//! Kernels
//!
//! A [`Kernel`] is a compiled program plus the buffers attached to it. Each
//! attached buffer gets an index (its position in attachment order) and that
//! index is appended to exactly one role list, chosen by the buffer's kind.
//! Role-list order is binding-slot order: the first constant buffer added
//! binds at constant slot 0, the second at slot 1, and so on, independently
//! for each role.
//!
//! Kernels do not own their buffers. Removing or releasing a kernel leaves
//! the buffers untouched; releasing a buffer while it is attached makes the
//! next dispatch fail with [`BufferReleased`](crate::ComputeError::BufferReleased).

pub mod source;

use smallvec::SmallVec;

use crate::backend::ComputeBackend;
use crate::backend::wgpu_backend::WgpuBackend;
use crate::buffer::{BufferHandle, BufferKind};
use crate::dispatch::{Launch, resolve_group_size};

use source::PreparedKernel;

/// Slot list of one binding role: indices into the attached buffers.
pub type SlotList = SmallVec<[usize; 8]>;

/// A compiled compute program and its role-partitioned bindings.
pub struct Kernel<B: ComputeBackend = WgpuBackend> {
    pub(crate) program: Option<B::Program>,
    /// Id of the compiling device.
    pub(crate) device: u64,
    entry_point: String,
    declared_group_size: [u32; 3],

    pub(crate) buffers: Vec<BufferHandle>,
    pub(crate) constant_slots: SlotList,
    pub(crate) resource_slots: SlotList,
    pub(crate) random_access_slots: SlotList,

    /// Logical threads along X.
    pub threads_x: u32,
    /// Logical threads along Y.
    pub threads_y: u32,
    /// Thread-group width; `0` is resolved at the next dispatch.
    pub group_size_x: u32,
    /// Thread-group height; `0` is resolved at the next dispatch.
    pub group_size_y: u32,
}

impl<B: ComputeBackend> Kernel<B> {
    pub(crate) fn new(program: B::Program, prepared: &PreparedKernel, device: u64) -> Self {
        Self {
            program: Some(program),
            device,
            entry_point: prepared.entry_point.clone(),
            declared_group_size: prepared.workgroup_size,
            buffers: Vec::new(),
            constant_slots: SlotList::new(),
            resource_slots: SlotList::new(),
            random_access_slots: SlotList::new(),
            threads_x: 1,
            threads_y: 1,
            group_size_x: 0,
            group_size_y: 0,
        }
    }

    /// Attaches a buffer and returns its index.
    pub fn add_buffer(&mut self, buffer: &BufferHandle) -> usize {
        let index = self.buffers.len();
        self.buffers.push(*buffer);
        match buffer.kind() {
            BufferKind::Constant => self.constant_slots.push(index),
            BufferKind::Resource => self.resource_slots.push(index),
            BufferKind::RandomAccess => self.random_access_slots.push(index),
        }
        index
    }

    /// Detaches every buffer. The buffers themselves stay alive.
    pub fn remove_all_buffers(&mut self) {
        self.buffers.clear();
        self.constant_slots.clear();
        self.resource_slots.clear();
        self.random_access_slots.clear();
    }

    /// Releases the compiled program and detaches every buffer.
    pub fn release(&mut self) {
        if self.program.take().is_some() {
            log::debug!("Released kernel '{}'", self.entry_point);
        }
        self.remove_all_buffers();
    }

    #[inline]
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.program.is_none()
    }

    /// Sets the logical thread counts.
    pub fn set_threads(&mut self, x: u32, y: u32) {
        self.threads_x = x;
        self.threads_y = y;
    }

    /// Sets the group sizes; `0` leaves a dimension to the default.
    pub fn set_group_size(&mut self, x: u32, y: u32) {
        self.group_size_x = x;
        self.group_size_y = y;
    }

    /// Adopts the `@workgroup_size` the entry point declares.
    pub fn use_declared_group_size(&mut self) {
        self.group_size_x = self.declared_group_size[0];
        self.group_size_y = self.declared_group_size[1];
    }

    /// Resolves unset group sizes in place and returns the launch shape.
    pub fn resolve_launch(&mut self) -> Launch {
        self.group_size_x = resolve_group_size(self.group_size_x, self.threads_x);
        self.group_size_y = resolve_group_size(self.group_size_y, self.threads_y);
        Launch::new(
            [self.threads_x, self.threads_y],
            [self.group_size_x, self.group_size_y],
        )
    }

    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// `@workgroup_size` declared by the entry point.
    #[must_use]
    pub fn declared_group_size(&self) -> [u32; 3] {
        self.declared_group_size
    }

    /// Attached buffers in attachment order.
    #[must_use]
    pub fn buffers(&self) -> &[BufferHandle] {
        &self.buffers
    }

    #[must_use]
    pub fn constant_slots(&self) -> &[usize] {
        &self.constant_slots
    }

    #[must_use]
    pub fn resource_slots(&self) -> &[usize] {
        &self.resource_slots
    }

    #[must_use]
    pub fn random_access_slots(&self) -> &[usize] {
        &self.random_access_slots
    }

    /// Slot list of `role`.
    #[must_use]
    pub fn slots(&self, role: BufferKind) -> &[usize] {
        match role {
            BufferKind::Constant => &self.constant_slots,
            BufferKind::Resource => &self.resource_slots,
            BufferKind::RandomAccess => &self.random_access_slots,
        }
    }

    /// Slot counts as `(constants, resources, random_access)`.
    #[must_use]
    pub fn role_counts(&self) -> (usize, usize, usize) {
        (
            self.constant_slots.len(),
            self.resource_slots.len(),
            self.random_access_slots.len(),
        )
    }
}

impl<B: ComputeBackend> std::fmt::Debug for Kernel<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("entry_point", &self.entry_point)
            .field("released", &self.is_released())
            .field("buffers", &self.buffers.len())
            .field("roles", &self.role_counts())
            .field("threads", &(self.threads_x, self.threads_y))
            .field("group_size", &(self.group_size_x, self.group_size_y))
            .finish()
    }
}
