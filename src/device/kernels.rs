//! Kernel compilation and dispatch.

use std::path::Path;

use super::Device;
use crate::backend::{ComputeBackend, StageBindings};
use crate::buffer::BufferKind;
use crate::dispatch::{DispatchGrid, MAX_SLOTS_PER_ROLE};
use crate::errors::{CompileError, ComputeError, Result};
use crate::kernel::Kernel;
use crate::kernel::source::{KernelDefines, PreparedKernel};

impl<B: ComputeBackend> Device<B> {
    /// Compiles the compute entry point `entry_point` of the kernel at `path`.
    ///
    /// `define_names` and `define_values` are parallel lists of
    /// preprocessor definitions; unless both are given with equal lengths
    /// they are ignored. Returns `None` (after logging the cause) when the
    /// kernel does not compile.
    pub fn compile_kernel(
        &mut self,
        path: impl AsRef<Path>,
        entry_point: &str,
        define_names: Option<&[&str]>,
        define_values: Option<&[&str]>,
    ) -> Option<Kernel<B>> {
        let defines = KernelDefines::from_parallel(define_names, define_values);
        self.compile_kernel_with(path, entry_point, &defines)
    }

    /// [`compile_kernel`](Self::compile_kernel) with prebuilt definitions.
    pub fn compile_kernel_with(
        &mut self,
        path: impl AsRef<Path>,
        entry_point: &str,
        defines: &KernelDefines,
    ) -> Option<Kernel<B>> {
        let backend = self.backend.as_mut()?;

        let capabilities = backend.kernel_capabilities();
        let compiled =
            PreparedKernel::load(path, entry_point, defines, capabilities).and_then(|prepared| {
                backend
                    .compile(&prepared)
                    .map(|program| (prepared, program))
                    .map_err(CompileError::from)
            });

        match compiled {
            Ok((prepared, program)) => {
                log::debug!(
                    "Compiled kernel {} (workgroup size {:?})",
                    prepared.label(),
                    prepared.workgroup_size
                );
                Some(Kernel::new(program, &prepared, self.id))
            }
            Err(e) => {
                log::warn!("Kernel compilation failed: {e}");
                None
            }
        }
    }

    /// Binds the kernel's buffers and runs it over its thread grid.
    ///
    /// Unset group sizes are resolved and written back into the kernel once
    /// every attached buffer is known to be live. Returns the grid that was
    /// launched.
    pub fn dispatch(&mut self, kernel: &mut Kernel<B>) -> Result<DispatchGrid> {
        let backend = self.backend.as_mut().ok_or(ComputeError::DeviceReleased)?;
        if kernel.is_released() {
            return Err(ComputeError::KernelReleased);
        }
        if kernel.device != self.id {
            return Err(ComputeError::ForeignKernel);
        }
        if kernel.buffers.iter().any(|handle| handle.device != self.id) {
            return Err(ComputeError::ForeignBuffer);
        }

        for role in [
            BufferKind::Constant,
            BufferKind::Resource,
            BufferKind::RandomAccess,
        ] {
            let count = kernel.slots(role).len();
            if count > MAX_SLOTS_PER_ROLE {
                return Err(ComputeError::TooManyBindings {
                    role,
                    count,
                    max: MAX_SLOTS_PER_ROLE,
                });
            }
        }

        let mut bindings = StageBindings::<B>::new();
        for &index in &kernel.constant_slots {
            let buffer = self
                .buffers
                .get(kernel.buffers[index].id)
                .ok_or(ComputeError::BufferReleased)?;
            bindings
                .constants
                .push(buffer.memory.as_ref().ok_or(ComputeError::BufferReleased)?);
        }
        for (slots, views) in [
            (&kernel.resource_slots, &mut bindings.resources),
            (&kernel.random_access_slots, &mut bindings.random_access),
        ] {
            for &index in slots {
                let buffer = self
                    .buffers
                    .get(kernel.buffers[index].id)
                    .ok_or(ComputeError::BufferReleased)?;
                views.push(buffer.view.as_ref().ok_or(ComputeError::BufferReleased)?);
            }
        }

        let launch = kernel.resolve_launch();
        let Some(program) = kernel.program.as_mut() else {
            return Err(ComputeError::KernelReleased);
        };
        backend
            .dispatch(program, &bindings, &launch)
            .map_err(ComputeError::DispatchFailed)?;

        log::debug!(
            "Dispatched '{}': {}x{} threads in {}x{}x{} groups",
            kernel.entry_point(),
            launch.threads[0],
            launch.threads[1],
            launch.grid.x,
            launch.grid.y,
            launch.grid.z
        );
        Ok(launch.grid)
    }
}
