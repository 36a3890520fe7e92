use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{LaneStatus, StackFrame, StepContext, StepOutcome};
use crate::debugger::{GlobalState, ShaderVariableChange, StepFlags};
use crate::id::{Id, IdMap};
use crate::program::{Instruction, Op, ProgramIndex};
use crate::util::{FastHashMap, fast_hash_map_new};
use crate::val::{Pointer, ShaderVariable};

/// How a source-level variable is tied to the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceBinding {
    /// The variable lives in memory behind this pointer value.
    Declared(Id),
    /// The variable currently holds this value.
    Value(Id),
}

/// One lane: register file, lane-owned globals, call stack and control state.
#[derive(Debug, Clone)]
pub struct ThreadState {
    lane: u32,
    pub(crate) status: LaneStatus,
    pub(crate) helper: bool,
    pub(crate) pc: usize,
    pub(crate) last_block: Option<Id>,
    pub(crate) cur_block: Option<Id>,
    /// Authoritative value of every id this lane has produced.
    pub(crate) ids: IdMap<ShaderVariable>,
    /// How many times each id has been written. Lets quad neighbours tell a
    /// value from this loop iteration from one left over from an earlier one.
    writes: FastHashMap<Id, u32>,
    /// Ids currently in scope, in definition order. Display only.
    pub(crate) live: Vec<Id>,
    /// Input, output and private variables.
    pub(crate) private: IdMap<ShaderVariable>,
    pub(crate) call_stack: Vec<StackFrame>,
    /// Merge blocks of the selections and loops the lane is inside.
    pub(crate) merge_stack: Vec<Id>,
    /// Values the phis of the block just entered read on the incoming edge.
    pub(crate) pending_phis: FastHashMap<Id, ShaderVariable>,
    pub(crate) source_bindings: FastHashMap<Id, SourceBinding>,
    next_serial: u32,
    pub(crate) changes: Vec<ShaderVariableChange>,
    pub(crate) flags: StepFlags,
}

impl ThreadState {
    /// A lane parked at the first instruction of `entry`, with every global
    /// bound to a pointer and lane-owned globals initialized.
    pub fn new(lane: u32, program: &ProgramIndex, global: &GlobalState, entry: Id) -> Result<Self> {
        let function = program.function(entry)?;
        let mut ids = IdMap::with_bound(program.id_bound());
        let mut private = IdMap::new();
        for var in program.globals() {
            ids.insert(var.id, global.pointer_variable(program, var)?);
            if GlobalState::is_lane_owned(var.storage) {
                let (_, pointee) = program.pointee(var.ty)?;
                let name = program.debug_name(var.id);
                let storage = match var.initializer.and_then(|init| program.constant(init)) {
                    Some(init) => init.clone().with_name(name),
                    None => program.make_variable(pointee, &name)?,
                };
                private.insert(var.id, storage);
            }
        }
        Ok(Self {
            lane,
            status: LaneStatus::Entering,
            helper: false,
            pc: function.start,
            last_block: None,
            cur_block: Some(function.entry_block),
            ids,
            writes: fast_hash_map_new(),
            live: Vec::new(),
            private,
            call_stack: vec![StackFrame::entry(entry, 0)],
            merge_stack: Vec::new(),
            pending_phis: fast_hash_map_new(),
            source_bindings: fast_hash_map_new(),
            next_serial: 1,
            changes: Vec::new(),
            flags: StepFlags::default(),
        })
    }

    pub fn lane(&self) -> u32 {
        self.lane
    }

    pub fn status(&self) -> LaneStatus {
        self.status
    }

    pub fn set_status(&mut self, status: LaneStatus) {
        self.status = status;
    }

    pub fn is_helper(&self) -> bool {
        self.helper
    }

    pub fn set_helper(&mut self, helper: bool) {
        self.helper = helper;
    }

    /// Next instruction to execute.
    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn current_block(&self) -> Option<Id> {
        self.cur_block
    }

    pub fn value(&self, id: Id) -> Option<&ShaderVariable> {
        self.ids.get(id)
    }

    pub fn live(&self) -> &[Id] {
        &self.live
    }

    pub fn live_values(&self) -> impl Iterator<Item = (Id, &ShaderVariable)> {
        self.live.iter().filter_map(|id| self.ids.get(*id).map(|v| (*id, v)))
    }

    pub fn private_value(&self, id: Id) -> Option<&ShaderVariable> {
        self.private.get(id)
    }

    /// Overwrite lane-owned storage, used to seed stage inputs.
    pub fn set_private(&mut self, id: Id, value: ShaderVariable) {
        self.private.insert(id, value);
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.call_stack
    }

    pub fn merge_stack(&self) -> &[Id] {
        &self.merge_stack
    }

    pub fn source_binding(&self, variable: Id) -> Option<SourceBinding> {
        self.source_bindings.get(&variable).copied()
    }

    pub fn take_changes(&mut self) -> Vec<ShaderVariableChange> {
        std::mem::take(&mut self.changes)
    }

    pub fn take_flags(&mut self) -> StepFlags {
        std::mem::take(&mut self.flags)
    }

    /// Function names of the call stack, outermost first.
    pub fn callstack(&self, program: &ProgramIndex) -> Vec<String> {
        self.call_stack
            .iter()
            .map(|frame| match program.function(frame.function) {
                Ok(info) => info.name.clone(),
                Err(_) => program.debug_name(frame.function),
            })
            .collect()
    }

    pub(crate) fn lookup<'p>(&'p self, program: &'p ProgramIndex, id: Id) -> Option<&'p ShaderVariable> {
        self.ids.get(id).or_else(|| program.constant(id))
    }

    pub(crate) fn operand<'p>(&'p self, program: &'p ProgramIndex, id: Id) -> Result<&'p ShaderVariable> {
        self.lookup(program, id)
            .ok_or_else(|| anyhow!("{id} has no value on lane {}", self.lane))
    }

    pub(crate) fn operands(&self, program: &ProgramIndex, ids: &[Id]) -> Result<Vec<ShaderVariable>> {
        ids.iter().map(|id| self.operand(program, *id).cloned()).collect()
    }

    pub(crate) fn pointer_operand(&self, program: &ProgramIndex, id: Id) -> Result<Pointer> {
        self.operand(program, id)?
            .pointer()
            .cloned()
            .ok_or_else(|| anyhow!("{id} is not a pointer"))
    }

    /// Integer operand used as an index, sign-aware.
    pub(crate) fn index_operand(&self, program: &ProgramIndex, id: Id) -> Result<i64> {
        let v = self.operand(program, id)?;
        if v.ty.is_signed_int() {
            Ok(v.int(0))
        } else if v.ty.is_integer() {
            Ok(v.uint(0) as i64)
        } else {
            bail!("{id} is a {} value, not an integer index", v.ty.name())
        }
    }

    /// Zeroed value of the instruction's result type.
    pub(crate) fn template(&self, program: &ProgramIndex, inst: &Instruction) -> Result<ShaderVariable> {
        let ty = inst
            .result_type
            .ok_or_else(|| anyhow!("{} has no result type", inst.op.name()))?;
        let name = inst.result.map(|id| program.debug_name(id)).unwrap_or_default();
        program.make_variable(ty, &name)
    }

    /// Write a result id and record the change.
    pub(crate) fn write_count(&self, id: Id) -> u32 {
        self.writes.get(&id).copied().unwrap_or(0)
    }

    pub(crate) fn set_dst(&mut self, ctx: &StepContext<'_>, pc: usize, id: Id, mut value: ShaderVariable) {
        value.name = ctx.program.debug_name(id);
        if ctx.config.report_nan_inf && value.has_nan_or_inf() {
            self.flags.generated_nan_or_inf = true;
        }
        *self.writes.entry(id).or_default() += 1;
        let before = self.ids.insert(id, value.clone());
        if before.is_none()
            && let Some(frame) = self.call_stack.last_mut()
        {
            frame.created.push(id);
        }
        if !self.live.contains(&id) {
            self.live.push(id);
        }
        self.changes.push(ShaderVariableChange {
            lane: self.lane,
            instruction: pc,
            id,
            memory: false,
            before,
            after: Some(value),
        });
    }

    pub(crate) fn record_memory_change(
        &mut self,
        pc: usize,
        id: Id,
        before: Option<ShaderVariable>,
        after: Option<ShaderVariable>,
    ) {
        self.changes.push(ShaderVariableChange { lane: self.lane, instruction: pc, id, memory: true, before, after });
    }

    fn merge_base(&self) -> usize {
        self.call_stack.last().map_or(0, |f| f.merge_base)
    }

    /// Enter the construct headed by the current block, if it declares one.
    pub(crate) fn push_merge(&mut self, program: &ProgramIndex) {
        let Some(merge) = self.cur_block.and_then(|b| program.block_merge(b)) else {
            return;
        };
        let target = merge.merge_block();
        let base = self.merge_base();
        if !self.merge_stack[base..].contains(&target) {
            self.merge_stack.push(target);
        }
    }

    /// Transfer control to the start of `target`.
    pub(crate) fn jump(&mut self, ctx: &StepContext<'_>, pc: usize, target: Id) -> Result<()> {
        let start = ctx.program.block_start(target)?;
        let base = self.merge_base();
        if let Some(pos) = self.merge_stack[base..].iter().rposition(|m| *m == target) {
            self.merge_stack.truncate(base + pos);
            if ctx.converge() {
                self.status = LaneStatus::BlockedAtMerge(target);
            }
        }
        self.latch_phis(ctx.program, start);
        self.last_block = self.cur_block;
        self.cur_block = Some(target);
        self.prune_live(ctx.program, pc, start);
        self.pc = start;
        Ok(())
    }

    /// Read the incoming value of every phi heading the block at `start`
    /// before any of them executes, so phis of one block see each other's
    /// old values.
    fn latch_phis(&mut self, program: &ProgramIndex, start: usize) {
        self.pending_phis.clear();
        let Some(from) = self.cur_block else {
            return;
        };
        let mut pc = start;
        while let Some(flat) = program.instruction(pc)
            && let Op::Phi { incoming } = &flat.inst.op
        {
            let value = incoming
                .iter()
                .find(|src| src.parent == from)
                .and_then(|src| self.lookup(program, src.value))
                .cloned();
            if let (Some(result), Some(value)) = (flat.inst.result, value) {
                self.pending_phis.insert(result, value);
            }
            pc += 1;
        }
    }

    /// Drop ids of the current function whose last reader lies before `start`.
    fn prune_live(&mut self, program: &ProgramIndex, pc: usize, start: usize) {
        let function = self.call_stack.last().map(|f| f.function);
        let mut dead = Vec::new();
        self.live.retain(|id| {
            let dies = program.defining_function(*id) == function
                && program.death_offset(*id).is_some_and(|death| death < start);
            if dies {
                dead.push(*id);
            }
            !dies
        });
        for id in dead {
            let before = self.ids.get(id).cloned();
            trace!(target: "shdbg::exec", lane = self.lane, %id, "out of scope");
            self.changes.push(ShaderVariableChange {
                lane: self.lane,
                instruction: pc,
                id,
                memory: false,
                before,
                after: None,
            });
        }
    }

    pub(crate) fn call(
        &mut self,
        ctx: &StepContext<'_>,
        pc: usize,
        function: Id,
        args: Vec<ShaderVariable>,
        result: Option<Id>,
    ) -> Result<()> {
        let program = ctx.program;
        let info = program.function(function)?;
        if self.call_stack.iter().any(|f| f.function == function) {
            bail!("recursive call to {}", info.name);
        }
        if info.params.len() != args.len() {
            bail!("{} takes {} arguments, got {}", info.name, info.params.len(), args.len());
        }
        let frame = StackFrame {
            function,
            serial: self.next_serial,
            return_pc: Some(pc + 1),
            result,
            locals: IdMap::new(),
            created: Vec::new(),
            live_at_entry: std::mem::take(&mut self.live),
            saved_blocks: (self.last_block, self.cur_block),
            merge_base: self.merge_stack.len(),
        };
        self.next_serial += 1;
        self.call_stack.push(frame);
        for (param, arg) in info.params.iter().zip(args) {
            self.set_dst(ctx, pc, param.id, arg);
        }
        self.last_block = None;
        self.cur_block = Some(info.entry_block);
        self.pc = info.start;
        debug!(target: "shdbg::exec", lane = self.lane, function = %info.name, depth = self.call_stack.len(), "call");
        Ok(())
    }

    /// Pop the current frame. Returning from the entry point finishes the
    /// lane and keeps its values for inspection.
    pub(crate) fn return_from(
        &mut self,
        ctx: &StepContext<'_>,
        pc: usize,
        value: Option<ShaderVariable>,
    ) -> Result<StepOutcome> {
        let frame = self
            .call_stack
            .pop()
            .ok_or_else(|| anyhow!("return with an empty call stack"))?;
        self.flags.function_return = true;
        let Some(return_pc) = frame.return_pc else {
            self.call_stack.push(frame);
            self.status = LaneStatus::Finished;
            self.flags.finished = true;
            debug!(target: "shdbg::exec", lane = self.lane, "entry point returned");
            return Ok(StepOutcome::Finished);
        };

        for id in &frame.created {
            let removed = self.ids.remove(*id);
            if self.live.contains(id) {
                self.changes.push(ShaderVariableChange {
                    lane: self.lane,
                    instruction: pc,
                    id: *id,
                    memory: false,
                    before: removed,
                    after: None,
                });
            }
        }
        self.live = frame.live_at_entry;
        self.merge_stack.truncate(frame.merge_base);
        (self.last_block, self.cur_block) = frame.saved_blocks;
        self.pc = return_pc;
        if let (Some(result), Some(value)) = (frame.result, value) {
            self.set_dst(ctx, pc, result, value);
        }
        debug!(target: "shdbg::exec", lane = self.lane, depth = self.call_stack.len(), "return");
        Ok(StepOutcome::Returned)
    }
}
