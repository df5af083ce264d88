//! SAXPY on the first hardware compute device: `y = a * x + y`.
//!
//! ```text
//! cargo run --example saxpy -- 4096 2.5
//! ```

use anyhow::{Context, Result};
use ember::{Device, DeviceSettings};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let n: usize = args.next().map_or(Ok(1 << 16), |s| s.parse())?;
    let a: f32 = args.next().map_or(Ok(2.0), |s| s.parse())?;

    let mut device = Device::connect(&DeviceSettings::default())?;
    log::info!("Running SAXPY over {n} elements at feature level {}", device.feature_level());

    let x: Vec<f32> = (0..n).map(|i| i as f32).collect();
    let y = vec![1.0f32; n];

    let params = device.create_constant_buffer(8)?;
    let x_buf = device
        .create_buffer(n, size_of::<f32>(), false)
        .context("allocating x")?;
    let y_buf = device
        .create_buffer(n, size_of::<f32>(), true)
        .context("allocating y")?;

    device.write_all(&params, &[a.to_bits(), u32::try_from(n)?])?;
    device.write_all(&x_buf, &x)?;
    device.write_all(&y_buf, &y)?;

    let kernel_path = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/kernels/saxpy.wgsl");
    let mut kernel = device
        .compile_kernel(kernel_path, "saxpy", None, None)
        .context("compiling saxpy.wgsl")?;
    kernel.add_buffer(&params);
    kernel.add_buffer(&x_buf);
    kernel.add_buffer(&y_buf);
    kernel.threads_x = u32::try_from(n)?;

    let start = std::time::Instant::now();
    let grid = device.dispatch(&mut kernel)?;
    device.wait()?;
    log::info!("Dispatched {}x{}x{} groups in {:?}", grid.x, grid.y, grid.z, start.elapsed());

    let mut out = vec![0.0f32; n];
    device.read_all(&y_buf, &mut out)?;

    let mismatches = out
        .iter()
        .enumerate()
        .filter(|&(i, &v)| (v - (a * i as f32 + 1.0)).abs() > 1e-3 * (1.0 + v.abs()))
        .count();
    log::info!("y[0..4] = {:?}, {mismatches} mismatches", &out[..out.len().min(4)]);

    kernel.release();
    device.release();
    Ok(())
}
