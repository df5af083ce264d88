//! Buffer creation and release.

use super::Device;
use crate::backend::{ComputeBackend, MemoryDesc};
use crate::buffer::{Buffer, BufferHandle, BufferKind, ElementLayout, constant_buffer_width};
use crate::errors::{ComputeError, Result};
use crate::view::ViewDesc;

impl<B: ComputeBackend> Device<B> {
    /// Allocates a resource (`read_write == false`) or random-access buffer
    /// of `length` elements of `element_size` bytes with a structured view.
    ///
    /// Returns `None` if any allocation or the view fails; nothing is left
    /// registered in that case.
    pub fn create_buffer(
        &mut self,
        length: usize,
        element_size: usize,
        read_write: bool,
    ) -> Option<BufferHandle> {
        self.create_buffer_with_layout(length, ElementLayout::structured(element_size), read_write)
    }

    /// Like [`create_buffer`](Self::create_buffer), with the view kind taken
    /// from `layout`.
    pub fn create_buffer_with_layout(
        &mut self,
        length: usize,
        layout: ElementLayout,
        read_write: bool,
    ) -> Option<BufferHandle> {
        let backend = self.backend.as_mut()?;
        let kind = BufferKind::for_access(read_write);

        let Some(byte_width) = length.checked_mul(layout.size) else {
            log::warn!("Buffer of {length} x {} bytes overflows", layout.size);
            return None;
        };

        let memory = match backend.create_memory(&MemoryDesc {
            label: None,
            byte_width,
            element_size: layout.size,
            read_write,
            allow_raw_views: layout.raw_view,
        }) {
            Ok(memory) => memory,
            Err(e) => {
                log::warn!("Failed to allocate {kind} buffer ({byte_width} bytes): {e}");
                return None;
            }
        };

        let staging = match backend.create_staging(None, byte_width) {
            Ok(staging) => staging,
            Err(e) => {
                log::warn!("Failed to allocate staging for {kind} buffer: {e}");
                backend.release_memory(memory);
                return None;
            }
        };

        let view = ViewDesc::derive(byte_width, &layout, read_write)
            .ok_or_else(|| format!("layout {layout:?} cannot view {byte_width} bytes"))
            .and_then(|desc| {
                backend
                    .create_view(&memory, &desc)
                    .map(|view| (view, desc.kind))
                    .map_err(|e| e.to_string())
            });
        let (view, view_kind) = match view {
            Ok(view) => view,
            Err(reason) => {
                log::warn!("Failed to create view for {kind} buffer: {reason}");
                backend.release_memory(memory);
                backend.release_staging(staging);
                return None;
            }
        };

        let id = self.buffers.insert_with_key(|id| Buffer {
            handle: BufferHandle {
                id,
                device: self.id,
                kind,
                length,
                element_size: layout.size,
                view: Some(view_kind),
            },
            memory: Some(memory),
            view: Some(view),
            staging: Some(staging),
        });
        self.order.push(id);

        log::debug!("Created {kind} buffer: {length} x {} bytes", layout.size);
        self.buffers.get(id).map(|buffer| buffer.handle)
    }

    /// Allocates a constant buffer of at least `byte_len` bytes.
    ///
    /// The width is rounded up to a multiple of 16; the buffer holds one
    /// element of that width.
    pub fn create_constant_buffer(&mut self, byte_len: usize) -> Result<BufferHandle> {
        let backend = self.backend_or_released()?;
        let width = constant_buffer_width(byte_len);

        let memory = backend
            .create_constant_memory(None, width)
            .map_err(|e| {
                log::warn!("Failed to allocate constant buffer ({width} bytes): {e}");
                ComputeError::ShaderBufferCreationFailed { code: e.status() }
            })?;

        let id = self.buffers.insert_with_key(|id| Buffer {
            handle: BufferHandle {
                id,
                device: self.id,
                kind: BufferKind::Constant,
                length: 1,
                element_size: width,
                view: None,
            },
            memory: Some(memory),
            view: None,
            staging: None,
        });
        self.order.push(id);

        log::debug!("Created constant buffer: {width} bytes");
        self.buffers
            .get(id)
            .map(|buffer| buffer.handle)
            .ok_or(ComputeError::BufferReleased)
    }

    /// Releases a buffer's memory, view and staging and forgets it.
    ///
    /// A handle that was already released is ignored.
    pub fn release_buffer(&mut self, handle: &BufferHandle) {
        if handle.device != self.id {
            log::warn!("Ignoring release of a buffer owned by another device");
            return;
        }
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        let Some(mut buffer) = self.buffers.remove(handle.id) else {
            return;
        };
        buffer.release(backend);
        self.order.retain(|&id| id != handle.id);
        log::debug!("Released {} buffer", buffer.kind());
    }
}
