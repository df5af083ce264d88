//! Error Types
//!
//! This module defines the error types used throughout the crate.
//!
//! # Overview
//!
//! The main error type [`ComputeError`] covers the failures a caller has to
//! react to:
//! - Device connection failures (fatal at construction)
//! - Constant buffer allocation failures (with the backend status code)
//! - Transfer bounds violations, one kind per overflowing side
//! - Map failures during a transfer
//! - Use of released devices, buffers or kernels
//! - Buffers or kernels used with a device other than the one that created them
//!
//! Buffer creation, view creation and kernel compilation do not raise
//! errors; they return `None` and log the cause. [`CompileError`] carries the
//! detailed reason for callers that prepare kernel sources themselves.
//!
//! # Usage
//!
//! All fallible APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, ComputeError>`.
//!
//! ```rust,ignore
//! use ember::errors::{ComputeError, Result};
//!
//! fn upload(device: &mut ember::Device, buffer: &ember::BufferHandle) -> Result<()> {
//!     device.write_all(buffer, &[1.0f32, 2.0, 3.0])
//! }
//! ```

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;
use crate::buffer::BufferKind;

/// Which side of a transfer was being mapped when a map failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapTarget {
    /// The buffer's device memory (constant buffers only).
    DeviceMemory,
    /// The buffer's host-visible staging allocation.
    Staging,
}

impl std::fmt::Display for MapTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceMemory => f.write_str("device memory"),
            Self::Staging => f.write_str("staging memory"),
        }
    }
}

/// The main error type for the crate.
#[derive(Error, Debug)]
pub enum ComputeError {
    // ========================================================================
    // Device Errors
    // ========================================================================
    /// No candidate (driver class, feature level) pair could be opened.
    #[error(
        "Unable to initialize a connection to the compute device; \
         a hardware adapter supporting one of the requested feature levels is required"
    )]
    DeviceUnavailable,

    /// The device has already been released.
    #[error("The compute device has already been released")]
    DeviceReleased,

    // ========================================================================
    // Buffer Errors
    // ========================================================================
    /// Allocating a constant buffer failed.
    #[error("Failed to create a constant buffer (error code: {code})")]
    ShaderBufferCreationFailed {
        /// Backend status code
        code: u32,
    },

    /// The buffer handle refers to a buffer that was released.
    #[error("The buffer has already been released")]
    BufferReleased,

    /// The buffer handle was issued by a different device.
    #[error("The buffer belongs to a different device")]
    ForeignBuffer,

    /// The destination of a transfer cannot hold the requested range.
    #[error("The destination was not large enough for this operation (required {required}, available {available})")]
    DestinationTooSmall {
        /// Bytes (or elements, for host arrays) the transfer needs
        required: usize,
        /// Bytes (or elements, for host arrays) the destination has
        available: usize,
    },

    /// The source of a transfer cannot supply the requested range.
    #[error("The source was not large enough for this operation (required {required}, available {available})")]
    SourceTooSmall {
        /// Bytes (or elements, for host arrays) the transfer needs
        required: usize,
        /// Bytes (or elements, for host arrays) the source has
        available: usize,
    },

    /// A clear range is inverted or runs past the buffer.
    #[error("Invalid element range {start}..{end} for this buffer")]
    InvalidRange {
        /// First element to clear
        start: usize,
        /// One past the last element to clear
        end: usize,
    },

    /// Constant buffers have no staging memory and cannot be read back.
    #[error("Constant buffers cannot be read back to the host")]
    ReadFromConstant,

    /// Mapping memory for a transfer failed.
    #[error("Failed to map {target} for transfer: {source}")]
    MapFailed {
        /// The allocation that was being mapped
        target: MapTarget,
        /// Backend failure
        source: BackendError,
    },

    // ========================================================================
    // Kernel Errors
    // ========================================================================
    /// The kernel's compiled program has been released.
    #[error("The kernel has already been released")]
    KernelReleased,

    /// The kernel was compiled by a different device.
    #[error("The kernel belongs to a different device")]
    ForeignKernel,

    /// More buffers are attached to one role than can be bound in a dispatch.
    #[error("Too many {role} bindings for one dispatch: {count} (maximum {max})")]
    TooManyBindings {
        /// Binding role that overflowed
        role: BufferKind,
        /// Buffers attached under that role
        count: usize,
        /// Slot capacity per role
        max: usize,
    },

    /// The backend rejected a dispatch.
    #[error("Dispatch failed: {0}")]
    DispatchFailed(BackendError),
}

/// Why a kernel source could not be turned into a program.
#[derive(Error, Debug)]
pub enum CompileError {
    /// The kernel file could not be read.
    #[error("Failed to read kernel source {}: {}", .path.display(), .source)]
    Io {
        /// Path of the kernel file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Expanding preprocessor definitions failed.
    #[error("Failed to expand definitions in {}: {}", .path.display(), .message)]
    Preprocess {
        /// Path of the kernel file
        path: PathBuf,
        /// Template engine diagnostic
        message: String,
    },

    /// The expanded source is not valid WGSL.
    #[error("Failed to parse {}:\n{}", .path.display(), .message)]
    Parse {
        /// Path of the kernel file
        path: PathBuf,
        /// Front-end diagnostic
        message: String,
    },

    /// The parsed module failed validation.
    #[error("Validation of {} failed: {}", .path.display(), .message)]
    Validation {
        /// Path of the kernel file
        path: PathBuf,
        /// Validator diagnostic
        message: String,
    },

    /// No compute entry point with the requested name exists.
    #[error("No compute entry point named `{}` in {}", .entry_point, .path.display())]
    EntryPointNotFound {
        /// Path of the kernel file
        path: PathBuf,
        /// Requested entry point
        entry_point: String,
    },

    /// The backend refused the validated program.
    #[error("Backend rejected the kernel: {0}")]
    Backend(#[from] BackendError),
}

/// Alias for `Result<T, ComputeError>`.
pub type Result<T> = std::result::Result<T, ComputeError>;
