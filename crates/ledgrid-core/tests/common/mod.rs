//! Shared bytecode assembly helpers.
//!
//! Tests build wire-format blobs with these builders instead of hand
//! writing byte arrays; the encoding mirrors the container format the
//! loader accepts (little-endian integers, `"DSLB"` magic, version 3).

#![allow(dead_code)]

/// Wire ids of the VM builtins.
pub mod builtin {
    pub const SIN: u8 = 0;
    pub const COS: u8 = 1;
    pub const SQRT: u8 = 2;
    pub const LN: u8 = 3;
    pub const LOG10: u8 = 4;
    pub const ABS: u8 = 5;
    pub const FLOOR: u8 = 6;
    pub const FRACT: u8 = 7;
    pub const MIN: u8 = 8;
    pub const MAX: u8 = 9;
    pub const CLAMP: u8 = 10;
    pub const SMOOTHSTEP: u8 = 11;
    pub const CIRCLE: u8 = 12;
    pub const BOX: u8 = 13;
    pub const WRAPDX: u8 = 14;
    pub const HASH01: u8 = 15;
    pub const HASH_SIGNED: u8 = 16;
    pub const HASH_COORDS01: u8 = 17;
    pub const VEC2: u8 = 18;
    pub const RGBA: u8 = 19;
}

/// Input slot indices for `push_input`.
pub mod input {
    pub const TIME: u8 = 0;
    pub const FRAME: u8 = 1;
    pub const X: u8 = 2;
    pub const Y: u8 = 3;
    pub const WIDTH: u8 = 4;
    pub const HEIGHT: u8 = 5;
}

/// One expression under construction.
#[derive(Clone, Default)]
pub struct Expr {
    instructions: Vec<u8>,
    count: u32,
}

impl Expr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_literal_scalar(mut self, value: f32) -> Self {
        self.instructions.push(1);
        self.instructions.push(1);
        self.instructions.extend_from_slice(&value.to_bits().to_le_bytes());
        self.count += 1;
        self
    }

    pub fn push_literal_vec2(mut self, x: f32, y: f32) -> Self {
        self.instructions.push(1);
        self.instructions.push(2);
        self.instructions.extend_from_slice(&x.to_bits().to_le_bytes());
        self.instructions.extend_from_slice(&y.to_bits().to_le_bytes());
        self.count += 1;
        self
    }

    pub fn push_literal_rgba(mut self, r: f32, g: f32, b: f32, a: f32) -> Self {
        self.instructions.push(1);
        self.instructions.push(3);
        for channel in [r, g, b, a] {
            self.instructions
                .extend_from_slice(&channel.to_bits().to_le_bytes());
        }
        self.count += 1;
        self
    }

    pub fn push_input(mut self, index: u8) -> Self {
        self.instructions.extend_from_slice(&[2, 1, index]);
        self.count += 1;
        self
    }

    pub fn push_param(self, index: u32) -> Self {
        self.push_slot(2, index)
    }

    pub fn push_frame_let(self, index: u32) -> Self {
        self.push_slot(3, index)
    }

    pub fn push_let(self, index: u32) -> Self {
        self.push_slot(4, index)
    }

    fn push_slot(mut self, tag: u8, index: u32) -> Self {
        self.instructions.extend_from_slice(&[2, tag]);
        self.instructions.extend_from_slice(&index.to_le_bytes());
        self.count += 1;
        self
    }

    pub fn negate(self) -> Self {
        self.op(3)
    }

    pub fn add(self) -> Self {
        self.op(4)
    }

    pub fn sub(self) -> Self {
        self.op(5)
    }

    pub fn mul(self) -> Self {
        self.op(6)
    }

    pub fn div(self) -> Self {
        self.op(7)
    }

    fn op(mut self, opcode: u8) -> Self {
        self.instructions.push(opcode);
        self.count += 1;
        self
    }

    pub fn call(mut self, builtin: u8, arg_count: u8) -> Self {
        self.instructions.extend_from_slice(&[8, builtin, arg_count]);
        self.count += 1;
        self
    }

    /// Append raw instruction bytes counted as `count` instructions.
    pub fn raw(mut self, bytes: &[u8], count: u32) -> Self {
        self.instructions.extend_from_slice(bytes);
        self.count += count;
        self
    }

    /// Encode with an explicit declared stack bound.
    pub fn encode_with_stack(self, max_stack: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&max_stack.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.instructions);
        out
    }

    /// Encode with a generous declared stack bound.
    pub fn encode(self) -> Vec<u8> {
        self.encode_with_stack(16)
    }
}

/// One literal scalar as a whole expression.
pub fn scalar_expr(value: f32) -> Vec<u8> {
    Expr::new().push_literal_scalar(value).encode_with_stack(1)
}

/// One statement block under construction.
#[derive(Clone, Default)]
pub struct Block {
    statements: Vec<u8>,
    count: u32,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn let_stmt(mut self, slot: u32, expr: Vec<u8>) -> Self {
        self.statements.push(1);
        self.statements.extend_from_slice(&slot.to_le_bytes());
        self.statements.extend_from_slice(&expr);
        self.count += 1;
        self
    }

    pub fn blend(mut self, expr: Vec<u8>) -> Self {
        self.statements.push(2);
        self.statements.extend_from_slice(&expr);
        self.count += 1;
        self
    }

    pub fn if_stmt(mut self, cond: Vec<u8>, then_block: Block, else_block: Block) -> Self {
        self.statements.push(3);
        self.statements.extend_from_slice(&cond);
        self.statements.extend_from_slice(&then_block.encode());
        self.statements.extend_from_slice(&else_block.encode());
        self.count += 1;
        self
    }

    pub fn for_stmt(mut self, index_slot: u32, start: u32, end: u32, body: Block) -> Self {
        self.statements.push(4);
        self.statements.extend_from_slice(&index_slot.to_le_bytes());
        self.statements.extend_from_slice(&start.to_le_bytes());
        self.statements.extend_from_slice(&end.to_le_bytes());
        self.statements.extend_from_slice(&body.encode());
        self.count += 1;
        self
    }

    pub fn encode(self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.statements);
        out
    }
}

/// Assemble a full program blob: header, parameter table, frame block,
/// and layer blocks.
pub fn program(params: &[(bool, Vec<u8>)], frame: Block, layers: Vec<Block>) -> Vec<u8> {
    let mut out = header();
    out.extend_from_slice(&(params.len() as u32).to_le_bytes());
    for (depends_on_xy, expr) in params {
        out.push(u8::from(*depends_on_xy));
        out.extend_from_slice(expr);
    }
    out.extend_from_slice(&frame.encode());
    out.extend_from_slice(&(layers.len() as u32).to_le_bytes());
    for layer in layers {
        out.extend_from_slice(&layer.encode());
    }
    out
}

/// Standard container header: magic, version 3, reserved flags.
pub fn header() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"DSLB");
    out.extend_from_slice(&3u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// The smallest valid program: no parameters, empty frame block, no
/// layers.
pub fn empty_program() -> Vec<u8> {
    program(&[], Block::new(), Vec::new())
}

/// Uniform red-channel program: one static parameter, one layer blending
/// `rgba(p0, 0, 0, 1)`.
pub fn uniform_program(level: f32) -> Vec<u8> {
    let blend_expr = Expr::new()
        .push_param(0)
        .push_literal_scalar(0.0)
        .push_literal_scalar(0.0)
        .push_literal_scalar(1.0)
        .call(builtin::RGBA, 4)
        .encode_with_stack(4);
    program(
        &[(false, scalar_expr(level))],
        Block::new(),
        vec![Block::new().blend(blend_expr)],
    )
}
