//! Device Settings
//!
//! [`DeviceSettings`] is consumed once by [`Device::connect`](crate::Device::connect)
//! to pick an adapter and open the device.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use ember::{Device, DeviceSettings};
//!
//! // Defaults: hardware adapter, feature level 11_0 then 10_1.
//! let device = Device::connect(&DeviceSettings::default())?;
//!
//! // Prefer the integrated GPU and name the device for debugging tools.
//! let settings = DeviceSettings {
//!     power_preference: wgpu::PowerPreference::LowPower,
//!     label: Some("solver".into()),
//!     ..Default::default()
//! };
//! ```

use crate::device::probe::{self, AdapterCandidate};

/// Configuration for connecting to a compute device.
///
/// | Field               | Description                                  | Default                          |
/// |---------------------|----------------------------------------------|----------------------------------|
/// | `candidates`        | Ordered `(driver class, feature level)` list | hardware × {11_0, 10_1}          |
/// | `power_preference`  | Adapter selection strategy                   | `HighPerformance`                |
/// | `required_features` | wgpu features the device must expose         | Empty                            |
/// | `label`             | Debug label of the device                    | `None`                           |
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    /// Candidates tried in order when connecting; first success wins.
    pub candidates: Vec<AdapterCandidate>,

    /// GPU adapter selection preference.
    ///
    /// - `HighPerformance`: Prefer discrete / dedicated GPU
    /// - `LowPower`: Prefer integrated GPU
    pub power_preference: wgpu::PowerPreference,

    /// Required wgpu features that must be supported by the adapter.
    pub required_features: wgpu::Features,

    /// Debug label attached to the device.
    pub label: Option<String>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            candidates: probe::default_candidates(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            required_features: wgpu::Features::empty(),
            label: None,
        }
    }
}
