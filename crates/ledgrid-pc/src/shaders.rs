//! Demo native shaders compiled into the PC host.

use ledgrid_core::vm::Rgba;
use ledgrid_core::{NativePixelArgs, NativeShader};

pub static NATIVE_SHADERS: [NativeShader; 2] = [
    NativeShader {
        name: "aurora",
        eval: aurora,
    },
    NativeShader {
        name: "ember",
        eval: ember,
    },
];

/// Slow vertical color wash drifting upward over time.
fn aurora(args: &NativePixelArgs) -> Rgba {
    let phase = args.y / args.height * 6.2831855 + args.time_seconds * 0.6;
    let r = (phase.sin() * 0.5 + 0.5) * 0.2;
    let g = ((phase + 2.094).sin() * 0.5 + 0.5) * 0.8;
    let b = ((phase + 4.188).sin() * 0.5 + 0.5) * 0.9;
    Rgba::new(r, g, b, 1.0)
}

/// Warm glow pulsing from the bottom of the panel.
fn ember(args: &NativePixelArgs) -> Rgba {
    let height_factor = 1.0 - args.y / args.height;
    let flicker = (args.time_seconds * 3.0 + args.x * 0.7).sin() * 0.15 + 0.85;
    let heat = (height_factor * flicker).clamp(0.0, 1.0);
    Rgba::new(heat, heat * 0.35, heat * 0.05, 1.0)
}
