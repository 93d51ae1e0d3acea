//! Compiled-in ("native") shader functions.
//!
//! A native shader is an ordinary Rust function evaluated once per pixel,
//! registered under a stable name so the control protocol and the console
//! can activate it without any bytecode upload.

use crate::vm::Rgba;

/// Inputs handed to a native shader for one pixel.
#[derive(Debug, Clone, Copy)]
pub struct NativePixelArgs {
    pub time_seconds: f32,
    pub frame_counter: f32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Per-pixel evaluation function of a native shader.
pub type NativePixelFn = fn(&NativePixelArgs) -> Rgba;

/// A compiled-in shader selectable by name.
#[derive(Debug, Clone, Copy)]
pub struct NativeShader {
    pub name: &'static str,
    pub eval: NativePixelFn,
}
