//! wgpu Backend
//!
//! Maps the buffer model onto wgpu:
//!
//! | Model object        | wgpu object                                                  |
//! |---------------------|--------------------------------------------------------------|
//! | device memory       | `STORAGE | COPY_SRC | COPY_DST` buffer (4-byte padded)        |
//! | constant memory     | `UNIFORM | COPY_DST` buffer                                   |
//! | staging memory      | host shadow + `MAP_READ | COPY_DST` readback buffer          |
//! | view                | storage buffer binding over the device memory                |
//! | program             | cached `ShaderModule` + pipelines per binding shape          |
//! | fence               | `Queue::on_submitted_work_done` flag                         |
//!
//! Binding roles map to bind groups: constants → group 0, resources →
//! group 1, random access → group 2. Within a group the binding index is the
//! slot. Every group is bound on every dispatch, empty or not. Bindings the
//! kernel declares beyond the attached buffers are filled with zeroed
//! placeholder buffers created at compile time.
//!
//! Object creation runs inside a validation error scope, so a rejected
//! module, layout, pipeline or bind group comes back as
//! [`BackendError::InvalidArgument`] instead of reaching the device's
//! uncaptured error handler.

use std::borrow::Cow;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use rustc_hash::FxHashMap;

use super::{BackendConnector, BackendError, ComputeBackend, MapAccess, MemoryDesc, StageBindings};
use crate::device::probe::{AdapterCandidate, DriverClass, FeatureLevel};
use crate::dispatch::Launch;
use crate::kernel::source::PreparedKernel;
use crate::settings::DeviceSettings;
use crate::view::{ViewAccess, ViewDesc};

/// Bind group index of each role, in `[constants, resources, random_access]` order.
pub const ROLE_GROUPS: [u32; 3] = [0, 1, 2];

#[inline]
fn padded(byte_width: usize) -> u64 {
    (byte_width as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
}

pub struct WgpuMemory {
    buffer: wgpu::Buffer,
    byte_width: usize,
}

impl WgpuMemory {
    #[must_use]
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

pub struct WgpuStaging {
    /// Host-visible contents; `byte_width` meaningful bytes, zero padded.
    shadow: Vec<u8>,
    byte_width: usize,
    readback: wgpu::Buffer,
}

pub struct WgpuView {
    buffer: wgpu::Buffer,
    size: NonZeroU64,
    access: ViewAccess,
}

pub struct WgpuProgram {
    module: wgpu::ShaderModule,
    entry_point: String,
    label: String,
    /// Bindings the kernel declares per group (highest index + 1).
    declared: [usize; 3],
    /// `(group, binding)` → zeroed buffer bound when no slot covers it.
    placeholders: FxHashMap<(u32, u32), wgpu::Buffer>,
    /// One pipeline per `[constants, resources, random_access]` entry count.
    pipelines: FxHashMap<[usize; 3], wgpu::ComputePipeline>,
}

pub struct WgpuFence {
    done: Arc<AtomicBool>,
}

/// Hardware device opened through wgpu.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: wgpu::AdapterInfo,
    downlevel: wgpu::DownlevelFlags,
    /// xxh3-128 of expanded source → compiled module.
    module_cache: FxHashMap<u128, wgpu::ShaderModule>,
    /// `(group, slot count)` → layout.
    layout_cache: FxHashMap<(u32, usize), wgpu::BindGroupLayout>,
}

impl WgpuBackend {
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    #[must_use]
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.info
    }

    /// Number of distinct shader modules compiled so far.
    #[must_use]
    pub fn cached_modules(&self) -> usize {
        self.module_cache.len()
    }

    fn poll(&self) {
        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            log::warn!("Device poll failed: {e}");
        }
    }

    fn check_size(&self, byte_width: usize, limit: u64) -> Result<(), BackendError> {
        if byte_width == 0 {
            return Err(BackendError::InvalidArgument(
                "zero-sized allocation".to_string(),
            ));
        }
        if padded(byte_width) > limit {
            return Err(BackendError::OutOfMemory {
                requested: byte_width as u64,
            });
        }
        Ok(())
    }

    /// Runs `f` inside a validation error scope and reports what it caught.
    fn scoped<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, BackendError> {
        let scope = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        match pollster::block_on(scope.pop()) {
            Some(e) => Err(BackendError::InvalidArgument(e.to_string())),
            None => Ok(value),
        }
    }

    /// Rejects binding shapes the device cannot hold in one stage.
    fn check_stage_limits(&self, entries: [usize; 3]) -> Result<(), BackendError> {
        let limits = self.device.limits();
        let uniform = limits.max_uniform_buffers_per_shader_stage as usize;
        let storage = limits.max_storage_buffers_per_shader_stage as usize;
        if entries[0] > uniform {
            return Err(BackendError::InvalidArgument(format!(
                "{} constant bindings exceed {uniform} uniform buffers per stage",
                entries[0]
            )));
        }
        if entries[1] + entries[2] > storage {
            return Err(BackendError::InvalidArgument(format!(
                "{} resource and random-access bindings exceed {storage} storage buffers per stage",
                entries[1] + entries[2]
            )));
        }
        Ok(())
    }

    fn group_layout(&mut self, group: u32, count: usize) -> Result<wgpu::BindGroupLayout, BackendError> {
        if let Some(layout) = self.layout_cache.get(&(group, count)) {
            return Ok(layout.clone());
        }

        let ty = match group {
            0 => wgpu::BufferBindingType::Uniform,
            1 => wgpu::BufferBindingType::Storage { read_only: true },
            _ => wgpu::BufferBindingType::Storage { read_only: false },
        };
        let entries: Vec<wgpu::BindGroupLayoutEntry> = (0..count as u32)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        let layout = self.scoped(|device| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("Kernel Group {group} ({count} slots)")),
                entries: &entries,
            })
        })?;
        self.layout_cache.insert((group, count), layout.clone());
        Ok(layout)
    }
}

fn bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    group: u32,
    resources: &[wgpu::BindingResource<'_>],
) -> wgpu::BindGroup {
    let entries: Vec<wgpu::BindGroupEntry<'_>> = resources
        .iter()
        .enumerate()
        .map(|(slot, resource)| wgpu::BindGroupEntry {
            binding: slot as u32,
            resource: resource.clone(),
        })
        .collect();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&format!("Kernel Group {group}")),
        layout,
        entries: &entries,
    })
}

/// Zeroed buffers for every binding index up to the highest one the kernel
/// declares in each role group. Gaps get a minimal buffer.
fn create_placeholders(
    device: &wgpu::Device,
    kernel: &PreparedKernel,
    declared: [usize; 3],
) -> FxHashMap<(u32, u32), wgpu::Buffer> {
    let mut placeholders = FxHashMap::default();
    for (&group, count) in ROLE_GROUPS.iter().zip(declared) {
        let usage = if group == 0 {
            wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST
        } else {
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST
        };
        for binding in 0..count as u32 {
            let min_size = kernel
                .bindings
                .iter()
                .find(|b| b.group == group && b.binding == binding)
                .map_or(0, |b| b.min_size);
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("{} Placeholder {group}.{binding}", kernel.entry_point)),
                size: min_size.max(4).next_multiple_of(16),
                usage,
                mapped_at_creation: false,
            });
            placeholders.insert((group, binding), buffer);
        }
    }
    placeholders
}

fn view_binding(view: &WgpuView) -> wgpu::BindingResource<'_> {
    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
        buffer: &view.buffer,
        offset: 0,
        size: Some(view.size),
    })
}

impl ComputeBackend for WgpuBackend {
    type Memory = WgpuMemory;
    type Staging = WgpuStaging;
    type View = WgpuView;
    type Program = WgpuProgram;
    type Fence = WgpuFence;

    fn describe(&self) -> String {
        format!(
            "{} ({:?}, {:?})",
            self.info.name, self.info.device_type, self.info.backend
        )
    }

    fn create_memory(&mut self, desc: &MemoryDesc<'_>) -> Result<WgpuMemory, BackendError> {
        let limits = self.device.limits();
        self.check_size(
            desc.byte_width,
            limits
                .max_buffer_size
                .min(u64::from(limits.max_storage_buffer_binding_size)),
        )?;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label,
            size: padded(desc.byte_width),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(WgpuMemory {
            buffer,
            byte_width: desc.byte_width,
        })
    }

    fn create_constant_memory(
        &mut self,
        label: Option<&str>,
        byte_width: usize,
    ) -> Result<WgpuMemory, BackendError> {
        let limit = u64::from(self.device.limits().max_uniform_buffer_binding_size);
        self.check_size(byte_width, limit)?;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label,
            size: padded(byte_width),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(WgpuMemory { buffer, byte_width })
    }

    fn create_staging(
        &mut self,
        label: Option<&str>,
        byte_width: usize,
    ) -> Result<WgpuStaging, BackendError> {
        self.check_size(byte_width, self.device.limits().max_buffer_size)?;

        let size = padded(byte_width);
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label,
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(WgpuStaging {
            shadow: vec![0; size as usize],
            byte_width,
            readback,
        })
    }

    fn create_view(
        &mut self,
        memory: &WgpuMemory,
        desc: &ViewDesc,
    ) -> Result<WgpuView, BackendError> {
        // Storage bindings must cover whole 32-bit words.
        let size = padded(desc.byte_len()).min(memory.buffer.size());
        let size = NonZeroU64::new(size)
            .ok_or_else(|| BackendError::InvalidArgument("empty view".to_string()))?;
        if desc.first_element != 0 {
            return Err(BackendError::InvalidArgument(
                "views start at the first element".to_string(),
            ));
        }
        Ok(WgpuView {
            buffer: memory.buffer.clone(),
            size,
            access: desc.access,
        })
    }

    fn release_memory(&mut self, memory: WgpuMemory) {
        memory.buffer.destroy();
    }

    fn release_view(&mut self, _view: WgpuView) {}

    fn release_staging(&mut self, staging: WgpuStaging) {
        staging.readback.destroy();
    }

    fn map_memory(
        &mut self,
        memory: &WgpuMemory,
        access: MapAccess,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> Result<(), BackendError> {
        if access != MapAccess::WriteDiscard {
            return Err(BackendError::InvalidArgument(format!(
                "device memory supports discard writes only, not {access:?}"
            )));
        }
        let mut scratch = vec![0u8; memory.buffer.size() as usize];
        f(&mut scratch[..memory.byte_width]);
        self.queue.write_buffer(&memory.buffer, 0, &scratch);
        Ok(())
    }

    fn map_staging(
        &mut self,
        staging: &mut WgpuStaging,
        access: MapAccess,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> Result<(), BackendError> {
        if access == MapAccess::WriteDiscard {
            staging.shadow.fill(0);
        }
        f(&mut staging.shadow[..staging.byte_width]);
        Ok(())
    }

    fn copy_staging_to_memory(&mut self, staging: &WgpuStaging, memory: &WgpuMemory) {
        let len = staging.shadow.len().min(memory.buffer.size() as usize);
        self.queue
            .write_buffer(&memory.buffer, 0, &staging.shadow[..len]);
    }

    fn copy_memory_to_staging(
        &mut self,
        memory: &WgpuMemory,
        staging: &mut WgpuStaging,
    ) -> Result<(), BackendError> {
        let size = memory.buffer.size().min(staging.readback.size());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&memory.buffer, 0, &staging.readback, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.readback.slice(..size);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        let mapped = loop {
            self.poll();
            match rx.try_recv() {
                Ok(result) => break result,
                Err(mpsc::TryRecvError::Empty) => std::hint::spin_loop(),
                Err(mpsc::TryRecvError::Disconnected) => {
                    return Err(BackendError::DeviceLost(
                        "readback callback dropped".to_string(),
                    ));
                }
            }
        };
        mapped.map_err(|e| BackendError::MapFailed(e.to_string()))?;

        {
            let view = slice.get_mapped_range();
            let n = view.len().min(staging.shadow.len());
            staging.shadow[..n].copy_from_slice(&view[..n]);
        }
        staging.readback.unmap();
        Ok(())
    }

    fn kernel_capabilities(&self) -> naga::valid::Capabilities {
        wgpu_naga_bridge::features_to_naga_capabilities(self.device.features(), self.downlevel)
    }

    fn compile(&mut self, kernel: &PreparedKernel) -> Result<WgpuProgram, BackendError> {
        let label = kernel.label();
        let module = match self.module_cache.get(&kernel.source_hash) {
            Some(module) => module.clone(),
            None => {
                log::debug!("Compiling shader module for {label}");
                let module = self.scoped(|device| {
                    device.create_shader_module(wgpu::ShaderModuleDescriptor {
                        label: Some(&label),
                        source: wgpu::ShaderSource::Wgsl(Cow::Owned(kernel.source.clone())),
                    })
                })?;
                self.module_cache.insert(kernel.source_hash, module.clone());
                module
            }
        };

        let mut declared = [0usize; 3];
        for binding in &kernel.bindings {
            if let Some(count) = declared.get_mut(binding.group as usize) {
                *count = (*count).max(binding.binding as usize + 1);
            }
        }
        let placeholders = self.scoped(|device| create_placeholders(device, kernel, declared))?;

        Ok(WgpuProgram {
            module,
            entry_point: kernel.entry_point.clone(),
            label,
            declared,
            placeholders,
            pipelines: FxHashMap::default(),
        })
    }

    fn dispatch(
        &mut self,
        program: &mut WgpuProgram,
        bindings: &StageBindings<'_, Self>,
        launch: &Launch,
    ) -> Result<(), BackendError> {
        let max = self.device.limits().max_compute_workgroups_per_dimension;
        let grid = launch.grid;
        if grid.x > max || grid.y > max || grid.z > max {
            return Err(BackendError::InvalidArgument(format!(
                "grid {}x{}x{} exceeds {max} groups per dimension",
                grid.x, grid.y, grid.z
            )));
        }

        let counts = bindings.counts();
        let entries: [usize; 3] = std::array::from_fn(|i| counts[i].max(program.declared[i]));
        self.check_stage_limits(entries)?;

        let layouts = ROLE_GROUPS
            .iter()
            .zip(entries)
            .map(|(&group, count)| self.group_layout(group, count))
            .collect::<Result<Vec<_>, _>>()?;

        if !program.pipelines.contains_key(&entries) {
            let layout_refs: Vec<Option<&wgpu::BindGroupLayout>> =
                layouts.iter().map(Some).collect();
            let pipeline = self.scoped(|device| {
                let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(&format!("{} Layout", program.label)),
                    bind_group_layouts: &layout_refs,
                    immediate_size: 0,
                });
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(&program.label),
                    layout: Some(&pipeline_layout),
                    module: &program.module,
                    entry_point: Some(&program.entry_point),
                    compilation_options: Default::default(),
                    cache: None,
                })
            })?;
            program.pipelines.insert(entries, pipeline);
        }
        let Some(pipeline) = program.pipelines.get(&entries) else {
            return Err(BackendError::InvalidArgument(
                "pipeline missing after creation".to_string(),
            ));
        };

        for view in &bindings.random_access {
            debug_assert_eq!(view.access, ViewAccess::ReadWrite);
        }

        let mut resources: [Vec<wgpu::BindingResource<'_>>; 3] = [
            bindings
                .constants
                .iter()
                .map(|m| m.buffer.as_entire_binding())
                .collect(),
            bindings.resources.iter().map(|v| view_binding(v)).collect(),
            bindings
                .random_access
                .iter()
                .map(|v| view_binding(v))
                .collect(),
        ];
        for ((&group, list), count) in ROLE_GROUPS.iter().zip(&mut resources).zip(entries) {
            for binding in list.len() as u32..count as u32 {
                let placeholder = program.placeholders.get(&(group, binding)).ok_or_else(|| {
                    BackendError::InvalidArgument(format!(
                        "no buffer for binding {binding} of group {group}"
                    ))
                })?;
                list.push(placeholder.as_entire_binding());
            }
        }

        let commands = self.scoped(|device| {
            let groups: Vec<wgpu::BindGroup> = ROLE_GROUPS
                .iter()
                .zip(&layouts)
                .zip(&resources)
                .map(|((&group, layout), list)| bind_group(device, layout, group, list))
                .collect();

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Dispatch Encoder"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(&program.label),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                for (group, bind_group) in ROLE_GROUPS.iter().zip(&groups) {
                    pass.set_bind_group(*group, bind_group, &[]);
                }
                pass.dispatch_workgroups(grid.x, grid.y, grid.z);
            }
            encoder.finish()
        })?;
        self.queue.submit(Some(commands));
        Ok(())
    }

    fn issue_fence(&mut self) -> Option<WgpuFence> {
        // Flush pending buffer writes so the marker lands after them.
        self.queue.submit(std::iter::empty());

        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        self.queue.on_submitted_work_done(move || {
            flag.store(true, Ordering::Release);
        });
        Some(WgpuFence { done })
    }

    fn fence_signaled(&mut self, fence: &WgpuFence) -> bool {
        self.poll();
        fence.done.load(Ordering::Acquire)
    }

    fn shutdown(&mut self) {
        self.module_cache.clear();
        self.layout_cache.clear();
        self.device.destroy();
    }
}

/// Opens wgpu adapters for probe candidates.
#[derive(Debug, Clone)]
pub struct WgpuConnector {
    pub power_preference: wgpu::PowerPreference,
    pub required_features: wgpu::Features,
    pub label: Option<String>,
}

impl WgpuConnector {
    #[must_use]
    pub fn new(settings: &DeviceSettings) -> Self {
        Self {
            power_preference: settings.power_preference,
            required_features: settings.required_features,
            label: settings.label.clone(),
        }
    }

    fn limits_for(level: FeatureLevel) -> wgpu::Limits {
        match level {
            FeatureLevel::Level11_0 => wgpu::Limits::default(),
            FeatureLevel::Level10_1 => wgpu::Limits::downlevel_defaults(),
        }
    }

    async fn open_async(&self, candidate: &AdapterCandidate) -> Result<WgpuBackend, BackendError> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: self.power_preference,
                compatible_surface: None,
                force_fallback_adapter: candidate.driver == DriverClass::Software,
            })
            .await
            .map_err(|e| BackendError::Unsupported(e.to_string()))?;

        let info = adapter.get_info();
        if candidate.driver == DriverClass::Hardware && info.device_type == wgpu::DeviceType::Cpu {
            return Err(BackendError::Unsupported(format!(
                "{} is a software adapter",
                info.name
            )));
        }

        let downlevel = adapter.get_downlevel_capabilities();
        if !downlevel
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            return Err(BackendError::Unsupported(format!(
                "{} cannot run compute shaders",
                info.name
            )));
        }

        let required_limits = Self::limits_for(candidate.level);
        if !required_limits.check_limits(&adapter.limits()) {
            return Err(BackendError::Unsupported(format!(
                "{} does not meet feature level {} limits",
                info.name, candidate.level
            )));
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: self.label.as_deref(),
                required_features: self.required_features,
                required_limits,
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await
            .map_err(|e| BackendError::Unsupported(e.to_string()))?;

        Ok(WgpuBackend {
            device,
            queue,
            info,
            downlevel: downlevel.flags,
            module_cache: FxHashMap::default(),
            layout_cache: FxHashMap::default(),
        })
    }
}

impl Default for WgpuConnector {
    fn default() -> Self {
        Self::new(&DeviceSettings::default())
    }
}

impl BackendConnector for WgpuConnector {
    type Backend = WgpuBackend;

    fn open(&self, candidate: &AdapterCandidate) -> Result<WgpuBackend, BackendError> {
        pollster::block_on(self.open_async(candidate))
    }
}
