//! Platform-agnostic core of a networked multi-segment LED grid controller.
//!
//! A host streams pixel frames or uploads shader bytecode over TCP; the
//! controller renders, gamma-corrects, remaps, and drives per-pixel color
//! data onto several serial LED chains through a [`ledgrid_hal::StripDriver`].
//! Persistence and firmware self-update go through the other
//! `ledgrid-hal` traits so the same core runs against real hardware or a
//! simulated backend.

pub mod console;
pub mod layout;
pub mod native;
pub mod output;
pub mod render;
pub mod server;
pub mod vm;

pub use layout::{Layout, LayoutError, PhysicalIndex, Segment};
pub use native::{NativePixelArgs, NativeShader};
pub use output::{LedOutput, OutputError, PixelFormat};
pub use server::{start, ServerConfig, ServerHandle, StartError};
