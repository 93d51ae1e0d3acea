//! Frame production: drives the bytecode VM or a native shader into the
//! LED output pipeline.
//!
//! The render loop runs on its own thread at a fixed cadence. Each tick
//! takes the server mutex, produces at most one frame, and releases it;
//! protocol handling happens between ticks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ledgrid_hal::StripDriver;

use crate::layout::LayoutError;
use crate::output::{OutputError, PixelFormat};
use crate::server::{ServerState, ShaderSource};
use crate::vm::{Rgba, VmError};

/// Render cadence of the shader task.
pub const FRAME_INTERVAL_MS: u64 = 25;
/// A frame slower than this is counted and reported by the query command.
pub const SLOW_FRAME_THRESHOLD_MS: u128 = 200;

#[derive(Debug)]
enum RenderError<E> {
    Vm(VmError),
    Layout(LayoutError),
    Output(OutputError<E>),
    /// Shader marked active without a loaded program or selected function.
    MissingShader,
}

impl<E> From<VmError> for RenderError<E> {
    fn from(e: VmError) -> Self {
        RenderError::Vm(e)
    }
}

impl<E> From<LayoutError> for RenderError<E> {
    fn from(e: LayoutError) -> Self {
        RenderError::Layout(e)
    }
}

impl<E> From<OutputError<E>> for RenderError<E> {
    fn from(e: OutputError<E>) -> Self {
        RenderError::Output(e)
    }
}

/// Produce one frame if a shader is active. Called with the server mutex
/// held; deactivates the shader on any VM or output failure.
pub(crate) fn render_tick<D: StripDriver>(state: &mut ServerState<D>, time_seconds: f32) {
    if !state.shader_active {
        return;
    }

    let started = Instant::now();
    let frame = state.frame_count;
    let result = match state.shader_source {
        ShaderSource::Bytecode => render_bytecode_frame(state, time_seconds, frame),
        ShaderSource::Native => render_native_frame(state, time_seconds, frame),
        ShaderSource::None => Ok(()),
    };

    match result {
        Ok(()) => state.frame_count = state.frame_count.wrapping_add(1),
        Err(err) => {
            log::warn!("shader frame failed ({err:?}), deactivating");
            state.deactivate_shader();
        }
    }

    let elapsed_ms = started.elapsed().as_millis();
    if elapsed_ms > SLOW_FRAME_THRESHOLD_MS {
        state.slow_frames = state.slow_frames.saturating_add(1);
        state.last_slow_ms = elapsed_ms.min(u128::from(u32::MAX)) as u32;
        log::warn!("slow frame: {elapsed_ms} ms");
    }
}

/// Drive `render_tick` on the fixed cadence until `running` clears.
pub(crate) fn run_render_loop<D: StripDriver>(
    shared: Arc<Mutex<ServerState<D>>>,
    running: Arc<AtomicBool>,
) {
    let epoch = Instant::now();
    while running.load(Ordering::Relaxed) {
        {
            let mut state = match shared.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            render_tick(&mut state, epoch.elapsed().as_secs_f32());
        }
        thread::sleep(Duration::from_millis(FRAME_INTERVAL_MS));
    }
}

fn render_bytecode_frame<D: StripDriver>(
    state: &mut ServerState<D>,
    time_seconds: f32,
    frame: u32,
) -> Result<(), RenderError<D::Error>> {
    let ServerState {
        layout,
        frame_buffer,
        program,
        runtime,
        output,
        last_uniform,
        ..
    } = state;
    let (Some(program), Some(runtime)) = (program.as_ref(), runtime.as_mut()) else {
        return Err(RenderError::MissingShader);
    };

    runtime.begin_frame(program, time_seconds, frame)?;

    // A program whose layers never read x or y (directly or through a
    // dynamic parameter) produces one color for the whole panel.
    if !program.pixel_depends_xy() && !runtime.has_dynamic_params() {
        let rgb = quantize(runtime.eval_pixel(program, 0.0, 0.0)?);
        if *last_uniform != Some(rgb) {
            output.push_uniform_rgb(rgb[0], rgb[1], rgb[2])?;
            *last_uniform = Some(rgb);
        }
        return Ok(());
    }

    for y in 0..layout.height {
        for x in 0..layout.width {
            let color = runtime.eval_pixel(program, f32::from(x), f32::from(y))?;
            write_pixel(layout, frame_buffer, x, y, quantize(color))?;
        }
    }

    let used = layout.total_leds() as usize * 3;
    output.push_frame(&frame_buffer[..used], PixelFormat::Rgb, 3)?;
    *last_uniform = None;
    Ok(())
}

fn render_native_frame<D: StripDriver>(
    state: &mut ServerState<D>,
    time_seconds: f32,
    frame: u32,
) -> Result<(), RenderError<D::Error>> {
    let ServerState {
        layout,
        frame_buffer,
        selected_native,
        output,
        last_uniform,
        ..
    } = state;
    let Some(shader) = selected_native else {
        return Err(RenderError::MissingShader);
    };

    let mut args = crate::native::NativePixelArgs {
        time_seconds,
        frame_counter: frame as f32,
        x: 0.0,
        y: 0.0,
        width: f32::from(layout.width),
        height: f32::from(layout.height),
    };
    for y in 0..layout.height {
        for x in 0..layout.width {
            args.x = f32::from(x);
            args.y = f32::from(y);
            let color = (shader.eval)(&args);
            write_pixel(layout, frame_buffer, x, y, quantize(color))?;
        }
    }

    let used = layout.total_leds() as usize * 3;
    output.push_frame(&frame_buffer[..used], PixelFormat::Rgb, 3)?;
    *last_uniform = None;
    Ok(())
}

fn write_pixel(
    layout: &crate::layout::Layout,
    frame_buffer: &mut [u8],
    x: u16,
    y: u16,
    rgb: [u8; 3],
) -> Result<(), LayoutError> {
    let physical = layout.map_logical_xy(x, y)?;
    let offset = physical.global as usize * 3;
    frame_buffer[offset..offset + 3].copy_from_slice(&rgb);
    Ok(())
}

/// `round(clamp01(v) * 255)` per channel.
fn quantize(color: Rgba) -> [u8; 3] {
    let c = color.clamped();
    [
        libm::roundf(c.r * 255.0) as u8,
        libm::roundf(c.g * 255.0) as u8,
        libm::roundf(c.b * 255.0) as u8,
    ]
}
