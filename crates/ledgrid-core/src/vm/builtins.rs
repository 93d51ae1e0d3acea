//! Builtin function table of the shader VM.
//!
//! Ids are wire-stable. Every builtin takes a fixed argument count and
//! dispatches on value tags: a wrong count is a `format` error, a wrong
//! tag is `type_mismatch`.

use glam::Vec2;

use super::value::{clamp01, Rgba, Value};
use super::VmError;

pub(crate) const BUILTIN_COUNT: u8 = 20;
pub(crate) const MAX_CALL_ARGS: usize = 8;

const SIN: u8 = 0;
const COS: u8 = 1;
const SQRT: u8 = 2;
const LN: u8 = 3;
const LOG10: u8 = 4;
const ABS: u8 = 5;
const FLOOR: u8 = 6;
const FRACT: u8 = 7;
const MIN: u8 = 8;
const MAX: u8 = 9;
const CLAMP: u8 = 10;
const SMOOTHSTEP: u8 = 11;
const CIRCLE: u8 = 12;
const BOX: u8 = 13;
const WRAPDX: u8 = 14;
const HASH01: u8 = 15;
const HASH_SIGNED: u8 = 16;
const HASH_COORDS01: u8 = 17;
const VEC2: u8 = 18;
const RGBA: u8 = 19;

/// Evaluate builtin `id` over `args`, already popped from the value stack.
pub(crate) fn eval_builtin(id: u8, args: &[Value]) -> Result<Value, VmError> {
    if id >= BUILTIN_COUNT {
        return Err(VmError::InvalidBuiltin);
    }

    match id {
        SIN => Ok(Value::Scalar(libm::sinf(scalar1(args)?))),
        COS => Ok(Value::Scalar(libm::cosf(scalar1(args)?))),
        SQRT => Ok(Value::Scalar(libm::sqrtf(scalar1(args)?))),
        LN => Ok(Value::Scalar(libm::logf(scalar1(args)?))),
        LOG10 => Ok(Value::Scalar(libm::log10f(scalar1(args)?))),
        ABS => Ok(Value::Scalar(libm::fabsf(scalar1(args)?))),
        FLOOR => Ok(Value::Scalar(libm::floorf(scalar1(args)?))),
        FRACT => {
            let v = scalar1(args)?;
            Ok(Value::Scalar(v - libm::floorf(v)))
        }
        MIN => {
            let (a, b) = scalar2(args)?;
            Ok(Value::Scalar(if a < b { a } else { b }))
        }
        MAX => {
            let (a, b) = scalar2(args)?;
            Ok(Value::Scalar(if a > b { a } else { b }))
        }
        CLAMP => {
            let (x, lo, hi) = scalar3(args)?;
            let clamped = if x < lo {
                lo
            } else if x > hi {
                hi
            } else {
                x
            };
            Ok(Value::Scalar(clamped))
        }
        SMOOTHSTEP => {
            let (edge0, edge1, x) = scalar3(args)?;
            Ok(Value::Scalar(smoothstep(edge0, edge1, x)))
        }
        CIRCLE => {
            expect_args(args, 2)?;
            let p = args[0].as_vec2()?;
            let radius = args[1].as_scalar()?;
            Ok(Value::Scalar(p.length() - radius))
        }
        BOX => {
            expect_args(args, 2)?;
            let p = args[0].as_vec2()?;
            let half_extent = args[1].as_vec2()?;
            Ok(Value::Scalar(box_sdf(p, half_extent)))
        }
        WRAPDX => {
            let (px, center_x, width) = scalar3(args)?;
            Ok(Value::Scalar(wrapped_delta_x(px, center_x, width)))
        }
        HASH01 => Ok(Value::Scalar(hash01(scalar_bits(scalar1(args)?)))),
        HASH_SIGNED => Ok(Value::Scalar(
            hash01(scalar_bits(scalar1(args)?)) * 2.0 - 1.0,
        )),
        HASH_COORDS01 => {
            let (x, y, seed) = scalar3(args)?;
            Ok(Value::Scalar(hash_coords01(
                scalar_to_i32(x),
                scalar_to_i32(y),
                scalar_bits(seed),
            )))
        }
        VEC2 => {
            let (x, y) = scalar2(args)?;
            Ok(Value::Vec2(Vec2::new(x, y)))
        }
        RGBA => {
            expect_args(args, 4)?;
            let r = args[0].as_scalar()?;
            let g = args[1].as_scalar()?;
            let b = args[2].as_scalar()?;
            let a = args[3].as_scalar()?;
            Ok(Value::Rgba(Rgba::new(r, g, b, a)))
        }
        _ => Err(VmError::InvalidBuiltin),
    }
}

fn expect_args(args: &[Value], count: usize) -> Result<(), VmError> {
    if args.len() != count {
        return Err(VmError::Format);
    }
    Ok(())
}

fn scalar1(args: &[Value]) -> Result<f32, VmError> {
    expect_args(args, 1)?;
    args[0].as_scalar()
}

fn scalar2(args: &[Value]) -> Result<(f32, f32), VmError> {
    expect_args(args, 2)?;
    Ok((args[0].as_scalar()?, args[1].as_scalar()?))
}

fn scalar3(args: &[Value]) -> Result<(f32, f32, f32), VmError> {
    expect_args(args, 3)?;
    Ok((
        args[0].as_scalar()?,
        args[1].as_scalar()?,
        args[2].as_scalar()?,
    ))
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = if edge0 == edge1 {
        if x < edge0 {
            0.0
        } else {
            1.0
        }
    } else {
        clamp01((x - edge0) / (edge1 - edge0))
    };
    t * t * (3.0 - 2.0 * t)
}

/// Signed distance from `p` to an axis-aligned box of half-extent `b`
/// centered at the origin.
fn box_sdf(p: Vec2, b: Vec2) -> f32 {
    let q = p.abs() - b;
    let outside = q.max(Vec2::ZERO).length();
    let inside = q.max_element().min(0.0);
    outside + inside
}

/// Wrap the signed horizontal delta `px - center_x` into `(-w/2, w/2]`.
fn wrapped_delta_x(px: f32, center_x: f32, width: f32) -> f32 {
    let mut dx = px - center_x;
    let half_width = width * 0.5;
    if dx > half_width {
        dx -= width;
    }
    if dx < -half_width {
        dx += width;
    }
    dx
}

/// Truncate a scalar to i32 (saturating at the type bounds).
fn scalar_to_i32(value: f32) -> i32 {
    value as i32
}

/// Two's-complement bit pattern of the truncated scalar.
fn scalar_bits(value: f32) -> u32 {
    scalar_to_i32(value) as u32
}

/// Fixed 32-bit avalanche hash shared by all hash builtins; the constants
/// are wire-stable so hosts can reproduce shader randomness.
fn hash_u32(value: u32) -> u32 {
    let mut x = value;
    x ^= x >> 16;
    x = x.wrapping_mul(0x7feb_352d);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846c_a68b);
    x ^= x >> 16;
    x
}

fn hash01(value: u32) -> f32 {
    let hashed = hash_u32(value) & 0x00ff_ffff;
    hashed as f32 / 16_777_215.0
}

fn hash_coords01(x: i32, y: i32, seed: u32) -> f32 {
    let ux = (x as u32).wrapping_mul(0x1f12_3bb5);
    let uy = (y as u32).wrapping_mul(0x5f35_6495);
    hash01(ux ^ uy ^ seed)
}
