//! Shader program evaluation.
//!
//! One `Runtime` holds the mutable evaluation state for one program:
//! cached parameter scalars, the frame-scoped slot snapshot, and the
//! per-pixel let slots. It never suspends or blocks; callers drive it
//! under the server mutex.

use heapless::Vec as BoundedVec;

use super::builtins::{eval_builtin, MAX_CALL_ARGS};
use super::program::{
    parse_slot_ref, parse_value, BlockInfo, Cursor, InputSlot, Program, SlotRef, StmtView,
    OP_ADD, OP_CALL_BUILTIN, OP_DIV, OP_MUL, OP_NEGATE, OP_PUSH_LITERAL, OP_PUSH_SLOT, OP_SUB,
};
use super::value::{blend_over, Rgba, Value};
use super::{
    VmError, DEFAULT_STATEMENT_BUDGET, MAX_EXPR_STACK, MAX_LET_SLOTS, MAX_LOOP_ITERATIONS,
    MAX_PARAMS, MAX_STATEMENT_DEPTH,
};

/// Inputs fixed for the duration of one expression evaluation.
#[derive(Debug, Clone, Copy)]
struct Inputs {
    time: f32,
    frame: f32,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamPass {
    /// Parameters whose expressions do not depend on (x, y).
    StaticOnly,
    /// Parameters flagged `depends_on_xy`, refreshed per pixel.
    DynamicOnly,
}

/// Mutable evaluation state for one loaded program.
pub struct Runtime {
    width: f32,
    height: f32,
    time_seconds: f32,
    frame_counter: f32,
    has_dynamic_params: bool,
    param_values: [f32; MAX_PARAMS],
    frame_values: [Value; MAX_LET_SLOTS],
    let_values: [Value; MAX_LET_SLOTS],
}

impl Runtime {
    /// Initialize evaluation state for `program` on a `width x height`
    /// panel. Re-run on every activation.
    pub fn new(program: &Program, width: u16, height: u16) -> Result<Self, VmError> {
        if width == 0 || height == 0 {
            return Err(VmError::InvalidArg);
        }

        Ok(Self {
            width: f32::from(width),
            height: f32::from(height),
            time_seconds: 0.0,
            frame_counter: 0.0,
            has_dynamic_params: program.params().iter().any(|param| param.depends_on_xy),
            param_values: [0.0; MAX_PARAMS],
            frame_values: [Value::ZERO; MAX_LET_SLOTS],
            let_values: [Value::ZERO; MAX_LET_SLOTS],
        })
    }

    /// True when any parameter must be re-evaluated per pixel.
    pub fn has_dynamic_params(&self) -> bool {
        self.has_dynamic_params
    }

    /// Start one frame: reset both slot namespaces, evaluate the static
    /// parameters, and run the frame statement block.
    pub fn begin_frame(
        &mut self,
        program: &Program,
        time_seconds: f32,
        frame_counter: u32,
    ) -> Result<(), VmError> {
        self.time_seconds = time_seconds;
        self.frame_counter = frame_counter as f32;
        self.frame_values = [Value::ZERO; MAX_LET_SLOTS];
        self.let_values = [Value::ZERO; MAX_LET_SLOTS];

        let inputs = Inputs {
            time: self.time_seconds,
            frame: self.frame_counter,
            x: 0.0,
            y: 0.0,
            width: self.width,
            height: self.height,
        };

        self.eval_params(program, &inputs, ParamPass::StaticOnly)?;

        let frame_block = program.frame_block();
        let mut budget = DEFAULT_STATEMENT_BUDGET;
        // BLEND is rejected in frame mode, so the accumulator is inert.
        let mut sink = Rgba::OPAQUE_BLACK;
        self.exec_block(
            program,
            frame_block,
            true,
            frame_block.let_count,
            &inputs,
            &mut sink,
            0,
            &mut budget,
        )
    }

    /// Evaluate one pixel: refresh dynamic parameters, then run every
    /// layer left-to-right over a source-over accumulator that starts at
    /// opaque black. Per-pixel let slots are reseeded from the frame
    /// snapshot before each layer.
    pub fn eval_pixel(&mut self, program: &Program, x: f32, y: f32) -> Result<Rgba, VmError> {
        let inputs = Inputs {
            time: self.time_seconds,
            frame: self.frame_counter,
            x,
            y,
            width: self.width,
            height: self.height,
        };

        if self.has_dynamic_params {
            self.eval_params(program, &inputs, ParamPass::DynamicOnly)?;
        }

        let mut color = Rgba::OPAQUE_BLACK;
        let mut budget = DEFAULT_STATEMENT_BUDGET;
        for layer_index in 0..program.layers().len() {
            let layer = program.layers()[layer_index];
            // Frame slots above frame_let_count are scalar(0), so this both
            // clears the pixel namespace and seeds it from the snapshot.
            self.let_values = self.frame_values;
            self.exec_block(
                program,
                layer,
                false,
                layer.let_count,
                &inputs,
                &mut color,
                0,
                &mut budget,
            )?;
        }

        Ok(color)
    }

    fn eval_params(
        &mut self,
        program: &Program,
        inputs: &Inputs,
        pass: ParamPass,
    ) -> Result<(), VmError> {
        for (index, param) in program.params().iter().enumerate() {
            let wanted = match pass {
                ParamPass::StaticOnly => !param.depends_on_xy,
                ParamPass::DynamicOnly => param.depends_on_xy,
            };
            if !wanted {
                continue;
            }

            let value = self.eval_expression(program, param.expr, inputs, 0)?;
            self.param_values[index] = value.as_scalar()?;
        }
        Ok(())
    }

    fn load_slot(
        &self,
        program: &Program,
        inputs: &Inputs,
        slot: SlotRef,
        let_limit: u16,
    ) -> Result<Value, VmError> {
        match slot {
            SlotRef::Input(input) => Ok(Value::Scalar(match input {
                InputSlot::Time => inputs.time,
                InputSlot::Frame => inputs.frame,
                InputSlot::X => inputs.x,
                InputSlot::Y => inputs.y,
                InputSlot::Width => inputs.width,
                InputSlot::Height => inputs.height,
            })),
            SlotRef::Param(index) => {
                if index as usize >= program.param_count() {
                    return Err(VmError::InvalidSlot);
                }
                Ok(Value::Scalar(self.param_values[index as usize]))
            }
            SlotRef::FrameLet(index) => {
                if index >= u32::from(program.frame_let_count()) {
                    return Err(VmError::InvalidSlot);
                }
                Ok(self.frame_values[index as usize])
            }
            SlotRef::Let(index) => {
                if index >= u32::from(let_limit) {
                    return Err(VmError::InvalidSlot);
                }
                Ok(self.let_values[index as usize])
            }
        }
    }

    /// Re-walk one interned expression from the blob and reduce it to a
    /// single value.
    fn eval_expression(
        &mut self,
        program: &Program,
        expr_index: u16,
        inputs: &Inputs,
        let_limit: u16,
    ) -> Result<Value, VmError> {
        let view = program.expr(expr_index)?;
        if usize::from(view.max_stack_depth) > MAX_EXPR_STACK {
            return Err(VmError::Limit);
        }
        if view.byte_offset as usize >= program.blob().len() {
            return Err(VmError::Truncated);
        }

        let mut cursor = Cursor::with_offset(program.blob(), view.byte_offset as usize);
        let mut stack: BoundedVec<Value, MAX_EXPR_STACK> = BoundedVec::new();

        for _ in 0..view.instruction_count {
            match cursor.read_u8()? {
                OP_PUSH_LITERAL => {
                    let value = parse_value(&mut cursor)?;
                    push_checked(&mut stack, view.max_stack_depth, value)?;
                }
                OP_PUSH_SLOT => {
                    let slot = parse_slot_ref(&mut cursor)?;
                    let value = self.load_slot(program, inputs, slot, let_limit)?;
                    push_checked(&mut stack, view.max_stack_depth, value)?;
                }
                OP_NEGATE => {
                    let top = stack.last_mut().ok_or(VmError::StackUnderflow)?;
                    *top = Value::Scalar(-top.as_scalar()?);
                }
                opcode @ (OP_ADD | OP_SUB | OP_MUL | OP_DIV) => {
                    if stack.len() < 2 {
                        return Err(VmError::StackUnderflow);
                    }
                    let rhs = stack[stack.len() - 1].as_scalar()?;
                    let lhs = stack[stack.len() - 2].as_scalar()?;
                    let _ = stack.pop();
                    let result = match opcode {
                        OP_ADD => lhs + rhs,
                        OP_SUB => lhs - rhs,
                        OP_MUL => lhs * rhs,
                        // IEEE-754 semantics; division by zero is not an error.
                        _ => lhs / rhs,
                    };
                    let top = stack.len() - 1;
                    stack[top] = Value::Scalar(result);
                }
                OP_CALL_BUILTIN => {
                    let builtin = cursor.read_u8()?;
                    let arg_count = usize::from(cursor.read_u8()?);
                    if arg_count == 0 || arg_count > MAX_CALL_ARGS {
                        return Err(VmError::Format);
                    }
                    if stack.len() < arg_count {
                        return Err(VmError::StackUnderflow);
                    }
                    let args_start = stack.len() - arg_count;
                    let result = eval_builtin(builtin, &stack[args_start..])?;
                    stack.truncate(args_start);
                    push_checked(&mut stack, view.max_stack_depth, result)?;
                }
                _ => return Err(VmError::InvalidOpcode),
            }
        }

        if stack.len() != 1 {
            return Err(VmError::Format);
        }
        Ok(stack[0])
    }

    /// Execute one statement range. `let_limit` bounds the writable let
    /// slots; `budget` is shared across the whole `begin_frame` or
    /// `eval_pixel` call and each executed statement costs one.
    #[allow(clippy::too_many_arguments)]
    fn exec_block(
        &mut self,
        program: &Program,
        block: BlockInfo,
        frame_mode: bool,
        let_limit: u16,
        inputs: &Inputs,
        color: &mut Rgba,
        depth: u32,
        budget: &mut u32,
    ) -> Result<(), VmError> {
        if depth > MAX_STATEMENT_DEPTH {
            return Err(VmError::Limit);
        }
        let start = usize::from(block.start);
        let count = usize::from(block.count);
        if start + count > program.stmts().len() {
            return Err(VmError::Format);
        }

        for index in start..start + count {
            if *budget == 0 {
                return Err(VmError::ExecBudget);
            }
            *budget -= 1;

            match program.stmts()[index] {
                StmtView::Let { slot, expr } => {
                    if slot >= let_limit {
                        return Err(VmError::InvalidSlot);
                    }
                    let value = self.eval_expression(program, expr, inputs, let_limit)?;
                    self.let_values[usize::from(slot)] = value;
                    if frame_mode {
                        self.frame_values[usize::from(slot)] = value;
                    }
                }
                StmtView::Blend { expr } => {
                    if frame_mode {
                        return Err(VmError::Format);
                    }
                    let value = self.eval_expression(program, expr, inputs, let_limit)?;
                    *color = blend_over(value.as_rgba()?, *color);
                }
                StmtView::If {
                    cond,
                    then_start,
                    then_count,
                    else_start,
                    else_count,
                } => {
                    let condition = self
                        .eval_expression(program, cond, inputs, let_limit)?
                        .as_scalar()?;
                    let (branch_start, branch_count) = if condition > 0.0 {
                        (then_start, then_count)
                    } else {
                        (else_start, else_count)
                    };
                    self.exec_block(
                        program,
                        BlockInfo {
                            start: branch_start,
                            count: branch_count,
                            let_count: 0,
                        },
                        frame_mode,
                        let_limit,
                        inputs,
                        color,
                        depth + 1,
                        budget,
                    )?;
                }
                StmtView::For {
                    index_slot,
                    start_inclusive,
                    end_exclusive,
                    body_start,
                    body_count,
                } => {
                    if index_slot >= let_limit {
                        return Err(VmError::InvalidSlot);
                    }
                    if end_exclusive < start_inclusive {
                        return Err(VmError::Format);
                    }
                    if end_exclusive - start_inclusive > MAX_LOOP_ITERATIONS {
                        return Err(VmError::LoopLimit);
                    }

                    for iteration in start_inclusive..end_exclusive {
                        let index_value = Value::Scalar(iteration as f32);
                        self.let_values[usize::from(index_slot)] = index_value;
                        if frame_mode {
                            self.frame_values[usize::from(index_slot)] = index_value;
                        }
                        self.exec_block(
                            program,
                            BlockInfo {
                                start: body_start,
                                count: body_count,
                                let_count: 0,
                            },
                            frame_mode,
                            let_limit,
                            inputs,
                            color,
                            depth + 1,
                            budget,
                        )?;
                    }
                }
            }
        }

        Ok(())
    }
}

fn push_checked(
    stack: &mut BoundedVec<Value, MAX_EXPR_STACK>,
    declared_max: u16,
    value: Value,
) -> Result<(), VmError> {
    if stack.len() >= usize::from(declared_max) {
        return Err(VmError::StackOverflow);
    }
    stack.push(value).map_err(|_| VmError::StackOverflow)
}
