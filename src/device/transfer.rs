//! Host ↔ Device Transfers
//!
//! Constant buffers are written by mapping their device memory for a discard
//! write. Every other buffer goes through its staging allocation: the host
//! range is written into staging, then the whole staging allocation is
//! copied into device memory. Reads copy the whole device allocation into
//! staging first, then copy the requested range out.
//!
//! Indices and lengths count host elements (`T`). Bounds are checked before
//! the device is touched; the buffer-side check runs first.
//!
//! ```rust,ignore
//! let buffer = device.create_buffer(4, 4, true).unwrap();
//! device.write(&buffer, &[1.0f32, 2.0, 3.0, 4.0], 1, 0, 3)?; // [2, 3, 4, 0]
//!
//! let mut out = [0.0f32; 2];
//! device.read(&buffer, &mut out, 0, 0, 2)?; // [2, 3]
//! ```

use std::ops::Range;

use bytemuck::Pod;

use super::Device;
use crate::backend::{ComputeBackend, MapAccess};
use crate::buffer::{BufferHandle, BufferKind};
use crate::errors::{ComputeError, MapTarget, Result};

/// Element range of one transfer.
#[derive(Debug, Clone, Copy)]
struct Span {
    src_index: usize,
    dest_index: usize,
    length: usize,
    element_size: usize,
}

impl Span {
    /// Bytes needed to reach `index + length` elements; `usize::MAX` on overflow.
    fn bytes_to(&self, index: usize) -> usize {
        self.length
            .checked_add(index)
            .and_then(|n| n.checked_mul(self.element_size))
            .unwrap_or(usize::MAX)
    }

    fn elements_to(&self, index: usize) -> usize {
        self.length.checked_add(index).unwrap_or(usize::MAX)
    }

    fn byte_range(&self, index: usize) -> Range<usize> {
        let start = index * self.element_size;
        start..start + self.length * self.element_size
    }
}

fn check_fits(required: usize, available: usize, err: fn(usize, usize) -> ComputeError) -> Result<()> {
    if required > available {
        Err(err(required, available))
    } else {
        Ok(())
    }
}

fn destination_too_small(required: usize, available: usize) -> ComputeError {
    ComputeError::DestinationTooSmall {
        required,
        available,
    }
}

fn source_too_small(required: usize, available: usize) -> ComputeError {
    ComputeError::SourceTooSmall {
        required,
        available,
    }
}

fn copy_into(dst: &mut [u8], range: Range<usize>, src: &[u8]) {
    if let Some(dst) = dst.get_mut(range) {
        dst.copy_from_slice(src);
    }
}

impl<B: ComputeBackend> Device<B> {
    /// Writes `length` elements of `data`, starting at `src_index`, into the
    /// buffer starting at element `dest_index`.
    pub fn write<T: Pod>(
        &mut self,
        buffer: &BufferHandle,
        data: &[T],
        src_index: usize,
        dest_index: usize,
        length: usize,
    ) -> Result<()> {
        let span = Span {
            src_index,
            dest_index,
            length,
            element_size: std::mem::size_of::<T>(),
        };
        let bytes: &[u8] = if span.element_size == 0 {
            &[]
        } else {
            bytemuck::cast_slice(data)
        };
        self.write_bytes(buffer, bytes, data.len(), span)
    }

    /// Writes all of `data` to the start of the buffer.
    pub fn write_all<T: Pod>(&mut self, buffer: &BufferHandle, data: &[T]) -> Result<()> {
        self.write(buffer, data, 0, 0, data.len())
    }

    /// Reads `length` elements starting at buffer element `src_index` into
    /// `out` starting at `dest_index`.
    ///
    /// Constant buffers cannot be read.
    pub fn read<T: Pod>(
        &mut self,
        buffer: &BufferHandle,
        out: &mut [T],
        src_index: usize,
        dest_index: usize,
        length: usize,
    ) -> Result<()> {
        let span = Span {
            src_index,
            dest_index,
            length,
            element_size: std::mem::size_of::<T>(),
        };
        let host_len = out.len();
        let bytes: &mut [u8] = if span.element_size == 0 {
            &mut []
        } else {
            bytemuck::cast_slice_mut(out)
        };
        self.read_bytes(buffer, bytes, host_len, span)
    }

    /// Fills all of `out` from the start of the buffer.
    pub fn read_all<T: Pod>(&mut self, buffer: &BufferHandle, out: &mut [T]) -> Result<()> {
        let length = out.len();
        self.read(buffer, out, 0, 0, length)
    }

    /// Zero-fills buffer elements `start..end`.
    pub fn clear(&mut self, buffer: &BufferHandle, start: usize, end: usize) -> Result<()> {
        let (backend, buffer) = self.parts(buffer)?;
        let element_size = buffer.handle.element_size;

        let byte_end = end.checked_mul(element_size);
        if end < start || byte_end.is_none_or(|b| b > buffer.byte_capacity()) {
            return Err(ComputeError::InvalidRange { start, end });
        }
        let range = start * element_size..end * element_size;
        let mut zero = |mapped: &mut [u8]| {
            if let Some(dst) = mapped.get_mut(range.clone()) {
                dst.fill(0);
            }
        };

        match buffer.kind() {
            BufferKind::Constant => {
                let memory = buffer.memory.as_ref().ok_or(ComputeError::BufferReleased)?;
                backend
                    .map_memory(memory, MapAccess::WriteDiscard, &mut zero)
                    .map_err(|source| ComputeError::MapFailed {
                        target: MapTarget::DeviceMemory,
                        source,
                    })
            }
            BufferKind::Resource | BufferKind::RandomAccess => {
                let (Some(memory), Some(staging)) = (buffer.memory.as_ref(), buffer.staging.as_mut())
                else {
                    return Err(ComputeError::BufferReleased);
                };
                backend
                    .map_staging(staging, MapAccess::Write, &mut zero)
                    .map_err(|source| ComputeError::MapFailed {
                        target: MapTarget::Staging,
                        source,
                    })?;
                backend.copy_staging_to_memory(staging, memory);
                Ok(())
            }
        }
    }

    fn write_bytes(
        &mut self,
        buffer: &BufferHandle,
        bytes: &[u8],
        host_len: usize,
        span: Span,
    ) -> Result<()> {
        let (backend, buffer) = self.parts(buffer)?;

        check_fits(
            span.bytes_to(span.dest_index),
            buffer.byte_capacity(),
            destination_too_small,
        )?;
        check_fits(span.elements_to(span.src_index), host_len, source_too_small)?;

        let src = &bytes[span.byte_range(span.src_index)];
        let dest = span.byte_range(span.dest_index);
        let mut fill = |mapped: &mut [u8]| copy_into(mapped, dest.clone(), src);

        match buffer.kind() {
            BufferKind::Constant => {
                let memory = buffer.memory.as_ref().ok_or(ComputeError::BufferReleased)?;
                backend
                    .map_memory(memory, MapAccess::WriteDiscard, &mut fill)
                    .map_err(|source| ComputeError::MapFailed {
                        target: MapTarget::DeviceMemory,
                        source,
                    })
            }
            BufferKind::Resource | BufferKind::RandomAccess => {
                let (Some(memory), Some(staging)) = (buffer.memory.as_ref(), buffer.staging.as_mut())
                else {
                    return Err(ComputeError::BufferReleased);
                };
                backend
                    .map_staging(staging, MapAccess::Write, &mut fill)
                    .map_err(|source| ComputeError::MapFailed {
                        target: MapTarget::Staging,
                        source,
                    })?;
                backend.copy_staging_to_memory(staging, memory);
                Ok(())
            }
        }
    }

    fn read_bytes(
        &mut self,
        buffer: &BufferHandle,
        out: &mut [u8],
        host_len: usize,
        span: Span,
    ) -> Result<()> {
        let (backend, buffer) = self.parts(buffer)?;

        if buffer.kind() == BufferKind::Constant {
            return Err(ComputeError::ReadFromConstant);
        }

        check_fits(
            span.bytes_to(span.src_index),
            buffer.byte_capacity(),
            source_too_small,
        )?;
        check_fits(span.elements_to(span.dest_index), host_len, destination_too_small)?;

        let (Some(memory), Some(staging)) = (buffer.memory.as_ref(), buffer.staging.as_mut()) else {
            return Err(ComputeError::BufferReleased);
        };

        backend
            .copy_memory_to_staging(memory, staging)
            .map_err(|source| ComputeError::MapFailed {
                target: MapTarget::Staging,
                source,
            })?;

        let src_range = span.byte_range(span.src_index);
        let dest = &mut out[span.byte_range(span.dest_index)];
        backend
            .map_staging(staging, MapAccess::Read, &mut |mapped: &mut [u8]| {
                if let Some(src) = mapped.get(src_range.clone()) {
                    dest.copy_from_slice(src);
                }
            })
            .map_err(|source| ComputeError::MapFailed {
                target: MapTarget::Staging,
                source,
            })
    }
}
