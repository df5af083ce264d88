//! Compute Device
//!
//! [`Device`] owns one backend connection and every buffer allocated through
//! it. Operations are split across submodules the way they group naturally:
//!
//! - [`buffers`]: buffer creation and release
//! - [`transfer`]: host ↔ device transfers (`write`, `read`, `clear`)
//! - [`kernels`]: kernel compilation and dispatch
//!
//! # Lifecycle
//!
//! A device is released exactly once, explicitly via [`Device::release`] or
//! implicitly on drop. Release force-releases every remaining buffer in
//! creation order, then shuts the backend down. Afterwards every operation
//! fails with [`ComputeError::DeviceReleased`] (or returns `None`), and every
//! handle the application still holds is stale.

pub mod buffers;
pub mod kernels;
pub mod probe;
pub mod transfer;

use std::sync::atomic::{AtomicU64, Ordering};

use slotmap::SlotMap;

use crate::backend::wgpu_backend::{WgpuBackend, WgpuConnector};
use crate::backend::{BackendConnector, ComputeBackend};
use crate::buffer::{Buffer, BufferHandle, BufferId};
use crate::errors::{ComputeError, Result};
use crate::settings::DeviceSettings;

use probe::{AdapterCandidate, DriverClass, FeatureLevel};

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(0);

/// A connection to a compute device and the buffers allocated on it.
///
/// All operations must come from one thread.
pub struct Device<B: ComputeBackend = WgpuBackend> {
    /// Process-unique; stamped on every handle and kernel this device issues.
    id: u64,
    backend: Option<B>,
    candidate: AdapterCandidate,
    buffers: SlotMap<BufferId, Buffer<B>>,
    /// Creation order; teardown releases from the front.
    order: Vec<BufferId>,
}

impl Device<WgpuBackend> {
    /// Connects to a hardware device through wgpu.
    ///
    /// Tries every candidate in `settings.candidates` in order.
    pub fn connect(settings: &DeviceSettings) -> Result<Self> {
        Self::connect_with(&WgpuConnector::new(settings), &settings.candidates)
    }
}

impl<B: ComputeBackend> Device<B> {
    /// Connects through `connector`, keeping the first candidate that opens.
    pub fn connect_with<C>(connector: &C, candidates: &[AdapterCandidate]) -> Result<Self>
    where
        C: BackendConnector<Backend = B>,
    {
        let Some((backend, candidate)) = probe::probe(connector, candidates) else {
            log::error!(
                "No compute device could be opened ({} candidates tried)",
                candidates.len()
            );
            return Err(ComputeError::DeviceUnavailable);
        };

        log::info!(
            "Connected to {} at feature level {}",
            backend.describe(),
            candidate.level
        );

        Ok(Self {
            id: NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed),
            backend: Some(backend),
            candidate,
            buffers: SlotMap::with_key(),
            order: Vec::new(),
        })
    }

    /// Feature level the device was opened at.
    #[inline]
    #[must_use]
    pub fn feature_level(&self) -> FeatureLevel {
        self.candidate.level
    }

    #[inline]
    #[must_use]
    pub fn driver_class(&self) -> DriverClass {
        self.candidate.driver
    }

    /// Number of buffers currently owned by the device.
    #[inline]
    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.order.len()
    }

    /// Whether `handle` still refers to a live buffer of this device.
    #[must_use]
    pub fn contains(&self, handle: &BufferHandle) -> bool {
        handle.device == self.id && self.buffers.contains_key(handle.id)
    }

    #[inline]
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.backend.is_none()
    }

    /// The backend, for backend-specific introspection. `None` once released.
    #[must_use]
    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    #[must_use]
    pub fn backend_mut(&mut self) -> Option<&mut B> {
        self.backend.as_mut()
    }

    /// Blocks until all previously issued work has completed.
    ///
    /// If the completion marker cannot be created the call returns
    /// immediately. There is no timeout.
    pub fn wait(&mut self) -> Result<()> {
        let backend = self.backend.as_mut().ok_or(ComputeError::DeviceReleased)?;

        let Some(fence) = backend.issue_fence() else {
            log::warn!("Failed to create a completion fence; not waiting");
            return Ok(());
        };

        while !backend.fence_signaled(&fence) {
            std::hint::spin_loop();
        }
        Ok(())
    }

    /// Releases every remaining buffer, then the backend.
    ///
    /// Calling this more than once is a no-op.
    pub fn release(&mut self) {
        let Some(mut backend) = self.backend.take() else {
            return;
        };

        let outstanding = self.order.len();
        while let Some(&id) = self.order.first() {
            self.order.remove(0);
            if let Some(mut buffer) = self.buffers.remove(id) {
                buffer.release(&mut backend);
            }
        }
        if outstanding > 0 {
            log::debug!("Force-released {outstanding} buffers at device teardown");
        }

        backend.shutdown();
        log::info!("Compute device released");
    }

    pub(crate) fn backend_or_released(&mut self) -> Result<&mut B> {
        self.backend.as_mut().ok_or(ComputeError::DeviceReleased)
    }

    /// Looks up a live buffer and the backend together.
    pub(crate) fn parts(&mut self, handle: &BufferHandle) -> Result<(&mut B, &mut Buffer<B>)> {
        let backend = self.backend.as_mut().ok_or(ComputeError::DeviceReleased)?;
        if handle.device != self.id {
            return Err(ComputeError::ForeignBuffer);
        }
        let buffer = self
            .buffers
            .get_mut(handle.id)
            .ok_or(ComputeError::BufferReleased)?;
        Ok((backend, buffer))
    }
}

impl<B: ComputeBackend> Drop for Device<B> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<B: ComputeBackend> std::fmt::Debug for Device<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("driver", &self.candidate.driver)
            .field("feature_level", &self.candidate.level)
            .field("buffers", &self.order.len())
            .field("released", &self.is_released())
            .finish()
    }
}
