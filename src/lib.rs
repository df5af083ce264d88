#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! GPU compute resource manager.
//!
//! Connect a [`Device`], allocate classified buffers on it, move data with
//! [`Device::write`] / [`Device::read`], compile WGSL kernels, attach buffers
//! and [`Device::dispatch`]:
//!
//! ```rust,ignore
//! use ember::{Device, DeviceSettings};
//!
//! let mut device = Device::connect(&DeviceSettings::default())?;
//! let data = device.create_buffer(1024, 4, true).unwrap();
//! device.write_all(&data, &vec![1.0f32; 1024])?;
//!
//! let mut kernel = device.compile_kernel("scale.wgsl", "main", None, None).unwrap();
//! kernel.add_buffer(&data);
//! kernel.threads_x = 1024;
//! device.dispatch(&mut kernel)?;
//! device.wait()?;
//! ```

pub mod backend;
pub mod buffer;
pub mod device;
pub mod dispatch;
pub mod errors;
pub mod kernel;
pub mod settings;
pub mod view;

pub use backend::host::{HostBackend, HostConnector, HostFaults};
pub use backend::wgpu_backend::{WgpuBackend, WgpuConnector};
pub use backend::{BackendConnector, BackendError, ComputeBackend};
pub use buffer::{BufferHandle, BufferId, BufferKind, ElementLayout};
pub use device::Device;
pub use device::probe::{AdapterCandidate, DriverClass, FeatureLevel};
pub use dispatch::DispatchGrid;
pub use errors::{CompileError, ComputeError, Result};
pub use kernel::Kernel;
pub use kernel::source::KernelDefines;
pub use settings::DeviceSettings;
pub use view::ViewKind;
