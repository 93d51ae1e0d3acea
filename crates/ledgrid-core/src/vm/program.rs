//! Bytecode container parsing and static validation.
//!
//! `Program::load` walks the blob exactly once with a bounds-checked
//! cursor, interning expression and statement views that index back into
//! the blob. Expressions are validated by simulating the value stack;
//! slot references are range-checked against the parameter table and the
//! let-slot namespaces. The blob is owned by the parsed program, so view
//! offsets stay valid for its whole lifetime.

use super::builtins::{BUILTIN_COUNT, MAX_CALL_ARGS};
use super::value::{Rgba, Value};
use super::{
    VmError, BYTECODE_VERSION, MAX_EXPRESSIONS, MAX_EXPR_INSTRUCTIONS, MAX_EXPR_STACK, MAX_LAYERS,
    MAX_LET_SLOTS, MAX_PARAMS, MAX_STATEMENTS, MAX_STATEMENT_DEPTH,
};

pub(crate) const OP_PUSH_LITERAL: u8 = 1;
pub(crate) const OP_PUSH_SLOT: u8 = 2;
pub(crate) const OP_NEGATE: u8 = 3;
pub(crate) const OP_ADD: u8 = 4;
pub(crate) const OP_SUB: u8 = 5;
pub(crate) const OP_MUL: u8 = 6;
pub(crate) const OP_DIV: u8 = 7;
pub(crate) const OP_CALL_BUILTIN: u8 = 8;

const VALUE_TAG_SCALAR: u8 = 1;
const VALUE_TAG_VEC2: u8 = 2;
const VALUE_TAG_RGBA: u8 = 3;

const SLOT_TAG_INPUT: u8 = 1;
const SLOT_TAG_PARAM: u8 = 2;
const SLOT_TAG_FRAME_LET: u8 = 3;
const SLOT_TAG_LET: u8 = 4;

const STMT_LET: u8 = 1;
const STMT_BLEND: u8 = 2;
const STMT_IF: u8 = 3;
const STMT_FOR: u8 = 4;

const MAGIC: [u8; 4] = *b"DSLB";

/// Fixed per-pixel/per-frame inputs addressable by `PUSH_SLOT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputSlot {
    Time,
    Frame,
    X,
    Y,
    Width,
    Height,
}

impl InputSlot {
    fn from_index(index: u8) -> Result<Self, VmError> {
        match index {
            0 => Ok(Self::Time),
            1 => Ok(Self::Frame),
            2 => Ok(Self::X),
            3 => Ok(Self::Y),
            4 => Ok(Self::Width),
            5 => Ok(Self::Height),
            _ => Err(VmError::InvalidSlot),
        }
    }
}

/// A decoded `PUSH_SLOT` operand.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SlotRef {
    Input(InputSlot),
    Param(u32),
    FrameLet(u32),
    Let(u32),
}

/// Location and stack bound of one interned expression.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExprView {
    pub byte_offset: u32,
    pub instruction_count: u16,
    pub max_stack_depth: u16,
}

/// One interned statement; nested blocks are `(start, count)` ranges into
/// the shared statement table.
#[derive(Debug, Clone, Copy)]
pub(crate) enum StmtView {
    Let {
        slot: u16,
        expr: u16,
    },
    Blend {
        expr: u16,
    },
    If {
        cond: u16,
        then_start: u16,
        then_count: u16,
        else_start: u16,
        else_count: u16,
    },
    For {
        index_slot: u16,
        start_inclusive: u32,
        end_exclusive: u32,
        body_start: u16,
        body_count: u16,
    },
}

/// Range of one statement block plus the let slots it writes.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BlockInfo {
    pub start: u16,
    pub count: u16,
    /// Highest written let-slot index plus one; sizes zero-initialization.
    pub let_count: u16,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ParamView {
    pub depends_on_xy: bool,
    pub expr: u16,
}

/// Bounds-checked little-endian reader over the blob.
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn with_offset(bytes: &'a [u8], offset: usize) -> Self {
        Self { bytes, pos: offset }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8, VmError> {
        let byte = *self.bytes.get(self.pos).ok_or(VmError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> Result<u16, VmError> {
        if self.remaining() < 2 {
            return Err(VmError::Truncated);
        }
        let value = u16::from_le_bytes([self.bytes[self.pos], self.bytes[self.pos + 1]]);
        self.pos += 2;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> Result<u32, VmError> {
        if self.remaining() < 4 {
            return Err(VmError::Truncated);
        }
        let value = u32::from_le_bytes([
            self.bytes[self.pos],
            self.bytes[self.pos + 1],
            self.bytes[self.pos + 2],
            self.bytes[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(value)
    }

    pub fn read_f32(&mut self) -> Result<f32, VmError> {
        Ok(f32::from_bits(self.read_u32()?))
    }
}

/// Decode one tagged runtime value.
pub(crate) fn parse_value(cursor: &mut Cursor<'_>) -> Result<Value, VmError> {
    match cursor.read_u8()? {
        VALUE_TAG_SCALAR => Ok(Value::Scalar(cursor.read_f32()?)),
        VALUE_TAG_VEC2 => {
            let x = cursor.read_f32()?;
            let y = cursor.read_f32()?;
            Ok(Value::Vec2(glam::Vec2::new(x, y)))
        }
        VALUE_TAG_RGBA => {
            let r = cursor.read_f32()?;
            let g = cursor.read_f32()?;
            let b = cursor.read_f32()?;
            let a = cursor.read_f32()?;
            Ok(Value::Rgba(Rgba::new(r, g, b, a)))
        }
        _ => Err(VmError::InvalidTag),
    }
}

/// Decode one slot reference.
pub(crate) fn parse_slot_ref(cursor: &mut Cursor<'_>) -> Result<SlotRef, VmError> {
    match cursor.read_u8()? {
        SLOT_TAG_INPUT => Ok(SlotRef::Input(InputSlot::from_index(cursor.read_u8()?)?)),
        SLOT_TAG_PARAM => Ok(SlotRef::Param(cursor.read_u32()?)),
        SLOT_TAG_FRAME_LET => Ok(SlotRef::FrameLet(cursor.read_u32()?)),
        SLOT_TAG_LET => Ok(SlotRef::Let(cursor.read_u32()?)),
        _ => Err(VmError::InvalidTag),
    }
}

/// A validated, immutable shader program. Owns its bytecode blob.
#[derive(Debug)]
pub struct Program {
    blob: Box<[u8]>,
    params: Vec<ParamView>,
    frame_block: BlockInfo,
    layers: Vec<BlockInfo>,
    exprs: Vec<ExprView>,
    stmts: Vec<StmtView>,
    pixel_depends_xy: bool,
}

impl Program {
    /// Parse and statically validate one bytecode blob.
    ///
    /// On success the returned program holds a copy of the blob plus the
    /// intern tables; evaluation re-reads instruction bytes through the
    /// recorded offsets.
    pub fn load(blob: &[u8]) -> Result<Program, VmError> {
        if blob.len() < 8 {
            return Err(VmError::InvalidArg);
        }

        let mut parser = Parser {
            cursor: Cursor::new(blob),
            exprs: Vec::new(),
            stmts: Vec::new(),
            param_count: 0,
            in_layer: false,
            pixel_depends_xy: false,
        };

        if blob[..4] != MAGIC {
            return Err(VmError::BadMagic);
        }
        parser.cursor.pos = 4;
        if parser.cursor.read_u16()? != BYTECODE_VERSION {
            return Err(VmError::UnsupportedVersion);
        }
        // Reserved flags, kept for forward-compatible container revisions.
        let _reserved = parser.cursor.read_u16()?;

        let param_count = parser.cursor.read_u32()?;
        if param_count as usize > MAX_PARAMS {
            return Err(VmError::Limit);
        }
        parser.param_count = param_count;

        let mut params = Vec::with_capacity(param_count as usize);
        for _ in 0..param_count {
            let depends_on_xy = match parser.cursor.read_u8()? {
                0 => false,
                1 => true,
                _ => return Err(VmError::Format),
            };
            let expr = parser.parse_expression()?;
            params.push(ParamView {
                depends_on_xy,
                expr,
            });
        }

        let frame_block = parser.parse_statement_block(0)?;

        let layer_count = parser.cursor.read_u32()?;
        if layer_count as usize > MAX_LAYERS {
            return Err(VmError::Limit);
        }
        parser.in_layer = true;
        let mut layers = Vec::with_capacity(layer_count as usize);
        for _ in 0..layer_count {
            layers.push(parser.parse_statement_block(0)?);
        }

        if parser.cursor.remaining() != 0 {
            return Err(VmError::Format);
        }

        Ok(Program {
            blob: blob.into(),
            params,
            frame_block,
            layers,
            exprs: parser.exprs,
            stmts: parser.stmts,
            pixel_depends_xy: parser.pixel_depends_xy,
        })
    }

    /// The raw bytecode this program was loaded from.
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Let slots written by the frame block.
    pub fn frame_let_count(&self) -> u16 {
        self.frame_block.let_count
    }

    /// Let slots written by layer `index`.
    pub fn layer_let_count(&self, index: usize) -> Option<u16> {
        self.layers.get(index).map(|layer| layer.let_count)
    }

    /// True when any layer expression reads the x or y input, i.e. the
    /// pixel color can vary across the panel.
    pub fn pixel_depends_xy(&self) -> bool {
        self.pixel_depends_xy
    }

    pub(crate) fn params(&self) -> &[ParamView] {
        &self.params
    }

    pub(crate) fn frame_block(&self) -> BlockInfo {
        self.frame_block
    }

    pub(crate) fn layers(&self) -> &[BlockInfo] {
        &self.layers
    }

    pub(crate) fn expr(&self, index: u16) -> Result<ExprView, VmError> {
        self.exprs
            .get(usize::from(index))
            .copied()
            .ok_or(VmError::Format)
    }

    pub(crate) fn stmts(&self) -> &[StmtView] {
        &self.stmts
    }
}

struct Parser<'a> {
    cursor: Cursor<'a>,
    exprs: Vec<ExprView>,
    stmts: Vec<StmtView>,
    param_count: u32,
    /// Set while parsing layer blocks so x/y input references mark the
    /// program as pixel-dependent.
    in_layer: bool,
    pixel_depends_xy: bool,
}

impl Parser<'_> {
    /// Parse one expression, simulating the value stack as it goes.
    ///
    /// Checks: declared stack bound and instruction count limits, operand
    /// decoding, slot-index ranges, underflow before every consumer,
    /// observed depth against the declared bound, and a terminal depth of
    /// exactly one.
    fn parse_expression(&mut self) -> Result<u16, VmError> {
        let declared_max_stack = self.cursor.read_u32()?;
        let instruction_count = self.cursor.read_u32()?;

        if declared_max_stack == 0 || declared_max_stack as usize > MAX_EXPR_STACK {
            return Err(VmError::Limit);
        }
        if instruction_count == 0 || instruction_count as usize > MAX_EXPR_INSTRUCTIONS {
            return Err(VmError::Limit);
        }
        if self.exprs.len() >= MAX_EXPRESSIONS {
            return Err(VmError::Limit);
        }

        let expr_index = self.exprs.len() as u16;
        self.exprs.push(ExprView {
            byte_offset: self.cursor.offset() as u32,
            instruction_count: instruction_count as u16,
            max_stack_depth: declared_max_stack as u16,
        });

        let mut depth: i32 = 0;
        for _ in 0..instruction_count {
            match self.cursor.read_u8()? {
                OP_PUSH_LITERAL => {
                    parse_value(&mut self.cursor)?;
                    depth += 1;
                }
                OP_PUSH_SLOT => {
                    match parse_slot_ref(&mut self.cursor)? {
                        SlotRef::Param(index) => {
                            if index >= self.param_count {
                                return Err(VmError::InvalidSlot);
                            }
                        }
                        SlotRef::FrameLet(index) | SlotRef::Let(index) => {
                            if index as usize >= MAX_LET_SLOTS {
                                return Err(VmError::InvalidSlot);
                            }
                        }
                        SlotRef::Input(slot) => {
                            if self.in_layer && (slot == InputSlot::X || slot == InputSlot::Y) {
                                self.pixel_depends_xy = true;
                            }
                        }
                    }
                    depth += 1;
                }
                OP_NEGATE => {
                    if depth < 1 {
                        return Err(VmError::StackUnderflow);
                    }
                }
                OP_ADD | OP_SUB | OP_MUL | OP_DIV => {
                    if depth < 2 {
                        return Err(VmError::StackUnderflow);
                    }
                    depth -= 1;
                }
                OP_CALL_BUILTIN => {
                    let builtin = self.cursor.read_u8()?;
                    let arg_count = self.cursor.read_u8()?;
                    if builtin >= BUILTIN_COUNT {
                        return Err(VmError::InvalidBuiltin);
                    }
                    if arg_count == 0 || usize::from(arg_count) > MAX_CALL_ARGS {
                        return Err(VmError::Format);
                    }
                    if depth < i32::from(arg_count) {
                        return Err(VmError::StackUnderflow);
                    }
                    depth = depth - i32::from(arg_count) + 1;
                }
                _ => return Err(VmError::InvalidOpcode),
            }

            if depth as u32 > declared_max_stack || depth as usize > MAX_EXPR_STACK {
                return Err(VmError::StackOverflow);
            }
        }

        if depth != 1 {
            return Err(VmError::Format);
        }
        Ok(expr_index)
    }

    /// Parse one length-prefixed statement block, recursing into IF/FOR
    /// child blocks.
    ///
    /// The block's own statements occupy a contiguous reserved range of the
    /// statement table; child blocks intern after the reservation so
    /// `(start, count)` ranges always address the right statements.
    fn parse_statement_block(&mut self, depth: u32) -> Result<BlockInfo, VmError> {
        if depth > MAX_STATEMENT_DEPTH {
            return Err(VmError::Limit);
        }

        let statement_count = self.cursor.read_u32()?;
        if statement_count > u32::from(u16::MAX) {
            return Err(VmError::Limit);
        }
        let count = statement_count as usize;
        if self.stmts.len() + count > MAX_STATEMENTS {
            return Err(VmError::Limit);
        }

        let start = self.stmts.len();
        self.stmts
            .resize(start + count, StmtView::Let { slot: 0, expr: 0 });

        let mut let_count: u16 = 0;
        for i in 0..count {
            let stmt = match self.cursor.read_u8()? {
                STMT_LET => {
                    let slot = self.cursor.read_u32()?;
                    if slot as usize >= MAX_LET_SLOTS {
                        return Err(VmError::InvalidSlot);
                    }
                    let expr = self.parse_expression()?;
                    let_count = let_count.max(slot as u16 + 1);
                    StmtView::Let {
                        slot: slot as u16,
                        expr,
                    }
                }
                STMT_BLEND => StmtView::Blend {
                    expr: self.parse_expression()?,
                },
                STMT_IF => {
                    let cond = self.parse_expression()?;
                    let then_block = self.parse_statement_block(depth + 1)?;
                    let else_block = self.parse_statement_block(depth + 1)?;
                    let_count = let_count.max(then_block.let_count).max(else_block.let_count);
                    StmtView::If {
                        cond,
                        then_start: then_block.start,
                        then_count: then_block.count,
                        else_start: else_block.start,
                        else_count: else_block.count,
                    }
                }
                STMT_FOR => {
                    let index_slot = self.cursor.read_u32()?;
                    let start_inclusive = self.cursor.read_u32()?;
                    let end_exclusive = self.cursor.read_u32()?;
                    if index_slot as usize >= MAX_LET_SLOTS {
                        return Err(VmError::InvalidSlot);
                    }
                    if end_exclusive < start_inclusive {
                        return Err(VmError::Format);
                    }
                    let body = self.parse_statement_block(depth + 1)?;
                    let_count = let_count.max(index_slot as u16 + 1).max(body.let_count);
                    StmtView::For {
                        index_slot: index_slot as u16,
                        start_inclusive,
                        end_exclusive,
                        body_start: body.start,
                        body_count: body.count,
                    }
                }
                _ => return Err(VmError::InvalidOpcode),
            };
            self.stmts[start + i] = stmt;
        }

        Ok(BlockInfo {
            start: start as u16,
            count: count as u16,
            let_count,
        })
    }
}
