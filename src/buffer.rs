//! Device Buffers
//!
//! A buffer is a classified allocation of device memory. Its kind decides
//! how bytes reach it and where it binds in a dispatch:
//!
//! | Kind           | Staging | View         | Write path                   | Bind point        |
//! |----------------|---------|--------------|------------------------------|-------------------|
//! | `Constant`     | never   | never        | discard-map device memory    | constant slots    |
//! | `Resource`     | always  | exactly one  | staging, then whole copy     | resource slots    |
//! | `RandomAccess` | always  | exactly one  | staging, then whole copy     | random-access slots|
//!
//! Buffers live inside the owning [`Device`](crate::Device); applications
//! hold a [`BufferHandle`], a copyable description keyed by a stable
//! [`BufferId`]. A handle whose buffer was released (explicitly or by device
//! teardown) is rejected with [`ComputeError::BufferReleased`](crate::ComputeError::BufferReleased).

use slotmap::new_key_type;

use crate::backend::ComputeBackend;
use crate::view::ViewKind;

new_key_type! {
    /// Stable key of a buffer inside its device's arena.
    pub struct BufferId;
}

/// Classification of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Small parameter block written directly by the host.
    Constant,
    /// Read-only input to a kernel.
    Resource,
    /// Read-write storage for a kernel.
    RandomAccess,
}

impl BufferKind {
    /// Kind of a view-backed buffer created with the given access.
    #[inline]
    #[must_use]
    pub fn for_access(read_write: bool) -> Self {
        if read_write {
            Self::RandomAccess
        } else {
            Self::Resource
        }
    }

    #[inline]
    #[must_use]
    pub fn has_staging(self) -> bool {
        !matches!(self, Self::Constant)
    }
}

impl std::fmt::Display for BufferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constant => f.write_str("constant"),
            Self::Resource => f.write_str("resource"),
            Self::RandomAccess => f.write_str("random-access"),
        }
    }
}

/// Element layout requested for a view-backed buffer.
///
/// `raw_view` asks for a byte-addressed view instead of the default
/// element-addressed (structured) one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementLayout {
    /// Size of one element in bytes.
    pub size: usize,
    /// Request a raw (byte-addressed) view.
    pub raw_view: bool,
}

impl ElementLayout {
    #[inline]
    #[must_use]
    pub const fn structured(size: usize) -> Self {
        Self {
            size,
            raw_view: false,
        }
    }

    #[inline]
    #[must_use]
    pub const fn raw(size: usize) -> Self {
        Self {
            size,
            raw_view: true,
        }
    }
}

/// Application-side description of a device buffer.
///
/// Cheap to copy; all operations go through the owning device, which
/// validates the id on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    pub(crate) id: BufferId,
    /// Id of the issuing device; ids from other devices never resolve.
    pub(crate) device: u64,
    pub(crate) kind: BufferKind,
    pub(crate) length: usize,
    pub(crate) element_size: usize,
    pub(crate) view: Option<ViewKind>,
}

impl BufferHandle {
    #[inline]
    #[must_use]
    pub fn id(&self) -> BufferId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Logical element count.
    #[inline]
    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    #[inline]
    #[must_use]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Total capacity in bytes (`length * element_size`).
    #[inline]
    #[must_use]
    pub fn byte_capacity(&self) -> usize {
        self.length * self.element_size
    }

    /// View kind, `None` for constant buffers.
    #[inline]
    #[must_use]
    pub fn view_kind(&self) -> Option<ViewKind> {
        self.view
    }
}

/// Device-side state of a buffer: the handles it exclusively owns.
pub(crate) struct Buffer<B: ComputeBackend> {
    pub(crate) handle: BufferHandle,
    pub(crate) memory: Option<B::Memory>,
    pub(crate) view: Option<B::View>,
    pub(crate) staging: Option<B::Staging>,
}

impl<B: ComputeBackend> Buffer<B> {
    #[inline]
    pub(crate) fn kind(&self) -> BufferKind {
        self.handle.kind
    }

    #[inline]
    pub(crate) fn byte_capacity(&self) -> usize {
        self.handle.byte_capacity()
    }

    /// Releases memory, view and staging in that order. Absent handles are skipped.
    pub(crate) fn release(&mut self, backend: &mut B) {
        if let Some(memory) = self.memory.take() {
            backend.release_memory(memory);
        }
        if let Some(view) = self.view.take() {
            backend.release_view(view);
        }
        if let Some(staging) = self.staging.take() {
            backend.release_staging(staging);
        }
    }
}

/// Rounds a constant buffer width up to the next multiple of 16 bytes.
#[inline]
#[must_use]
pub fn constant_buffer_width(byte_len: usize) -> usize {
    byte_len.next_multiple_of(16)
}
