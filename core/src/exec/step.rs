use anyhow::{Result, anyhow, bail};
use tracing::{debug, trace};

use super::image::ImageResult;
use super::thread::SourceBinding;
use super::{LaneStatus, StepContext, StepOutcome, ThreadState};
use crate::api::MessageSeverity;
use crate::extinst::ExtInstContext;
use crate::id::Id;
use crate::program::{Instruction, Op, StorageClass};
use crate::val::{Pointer, PointerBase, ShaderVariable, binary, select, unary};

fn result_id(inst: &Instruction) -> Result<Id> {
    inst.result
        .ok_or_else(|| anyhow!("{} has no result id", inst.op.name()))
}

fn result_type(inst: &Instruction) -> Result<Id> {
    inst.result_type
        .ok_or_else(|| anyhow!("{} has no result type", inst.op.name()))
}

impl ThreadState {
    /// Execute at most one instruction. Errors never escape: a malformed
    /// instruction finishes this lane with a high-severity diagnostic.
    pub fn step(&mut self, ctx: &mut StepContext<'_>) -> StepOutcome {
        match self.status {
            LaneStatus::Killed | LaneStatus::Finished | LaneStatus::Inactive => return StepOutcome::Idle,
            LaneStatus::BlockedAtMerge(_) | LaneStatus::AtBarrier => {
                self.flags.suspended = true;
                return StepOutcome::Suspended;
            }
            LaneStatus::Entering => self.status = LaneStatus::Running,
            LaneStatus::Running => {}
        }
        let pc = self.pc;
        match self.execute(ctx, pc) {
            Ok(StepOutcome::Stalled) => {
                self.flags.stalled = true;
                StepOutcome::Stalled
            }
            Ok(outcome) => outcome,
            Err(err) => {
                ctx.report(
                    MessageSeverity::High,
                    format!("lane {} stopped at instruction {pc}: {err:#}", self.lane()),
                );
                self.status = LaneStatus::Finished;
                self.flags.finished = true;
                StepOutcome::Finished
            }
        }
    }

    fn execute(&mut self, ctx: &mut StepContext<'_>, pc: usize) -> Result<StepOutcome> {
        let program = ctx.program;
        let flat = program
            .instruction(pc)
            .ok_or_else(|| anyhow!("instruction {pc} is out of range"))?;
        let inst = &flat.inst;
        trace!(target: "shdbg::exec", lane = self.lane(), pc, "{inst}");

        match &inst.op {
            Op::Nop | Op::MemoryBarrier => {}
            Op::Undef => {
                let value = self.template(program, inst)?;
                self.set_dst(ctx, pc, result_id(inst)?, value);
            }
            Op::Variable { storage, initializer } => {
                if *storage != StorageClass::Function {
                    bail!("local variable with {} storage", storage.name());
                }
                let id = result_id(inst)?;
                let (_, pointee) = program.pointee(result_type(inst)?)?;
                let name = program.debug_name(id);
                let local = match initializer {
                    Some(init) => self.operand(program, *init)?.clone().with_name(name),
                    None => program.make_variable(pointee, &name)?,
                };
                let frame = self
                    .call_stack
                    .last_mut()
                    .ok_or_else(|| anyhow!("local variable outside of any function"))?;
                frame.locals.insert(id, local);
                let base = PointerBase::Local { frame: frame.serial, variable: id };
                let pointer = Pointer::new(base, StorageClass::Function, pointee);
                self.set_dst(ctx, pc, id, ShaderVariable::from_pointer("", pointer));
            }
            Op::Load { pointer } => {
                let ptr = self.pointer_operand(program, *pointer)?;
                let value = self.load(ctx, &ptr)?;
                self.set_dst(ctx, pc, result_id(inst)?, value);
            }
            Op::Store { pointer, object } => {
                let ptr = self.pointer_operand(program, *pointer)?;
                let value = self.operand(program, *object)?.clone();
                self.store(ctx, pc, &ptr, &value)?;
            }
            Op::CopyMemory { target, source } => {
                let from = self.pointer_operand(program, *source)?;
                let to = self.pointer_operand(program, *target)?;
                let value = self.load(ctx, &from)?;
                self.store(ctx, pc, &to, &value)?;
            }
            Op::AccessChain { base, indices } => {
                let ptr = self.pointer_operand(program, *base)?;
                let indices = indices
                    .iter()
                    .map(|i| self.index_operand(program, *i))
                    .collect::<Result<Vec<_>>>()?;
                let ptr = self.access_chain(ctx, ptr, &indices)?;
                self.set_dst(ctx, pc, result_id(inst)?, ShaderVariable::from_pointer("", ptr));
            }
            Op::PtrAccessChain { base, element, indices } => {
                let ptr = self.pointer_operand(program, *base)?;
                let element = self.index_operand(program, *element)?;
                let indices = indices
                    .iter()
                    .map(|i| self.index_operand(program, *i))
                    .collect::<Result<Vec<_>>>()?;
                let ptr = self.offset_pointer(ctx, ptr, element)?;
                let ptr = self.access_chain(ctx, ptr, &indices)?;
                self.set_dst(ctx, pc, result_id(inst)?, ShaderVariable::from_pointer("", ptr));
            }
            Op::ArrayLength { structure, member } => {
                let ptr = self.pointer_operand(program, *structure)?;
                let length = self.array_length(ctx, &ptr, *member)?;
                let mut value = self.template(program, inst)?;
                value.set_raw(0, length);
                self.set_dst(ctx, pc, result_id(inst)?, value);
            }
            Op::ConvertPtrToU { pointer } => {
                let ptr = self.pointer_operand(program, *pointer)?;
                let mut value = self.template(program, inst)?;
                match ptr.address() {
                    Some(address) => value.set_raw(0, address),
                    None => ctx.report(
                        MessageSeverity::Medium,
                        format!("lane {}: {ptr} has no device address", self.lane()),
                    ),
                }
                self.set_dst(ctx, pc, result_id(inst)?, value);
            }
            Op::ConvertUToPtr { value } => {
                let address = self.operand(program, *value)?.uint(0);
                let (storage, pointee) = program.pointee(result_type(inst)?)?;
                let ptr = Pointer::new(PointerBase::Address { address }, storage, pointee);
                self.set_dst(ctx, pc, result_id(inst)?, ShaderVariable::from_pointer("", ptr));
            }
            Op::PtrEqual { lhs, rhs } | Op::PtrNotEqual { lhs, rhs } => {
                let equal = self.pointer_operand(program, *lhs)? == self.pointer_operand(program, *rhs)?;
                let want = matches!(inst.op, Op::PtrEqual { .. });
                self.set_dst(ctx, pc, result_id(inst)?, ShaderVariable::scalar_bool("", equal == want));
            }

            Op::CompositeConstruct { constituents } => {
                let parts = self.operands(program, constituents)?;
                let mut value = self.template(program, inst)?;
                value.compose(&parts)?;
                self.set_dst(ctx, pc, result_id(inst)?, value);
            }
            Op::CompositeExtract { composite, indices } => {
                let value = super::read_path(self.operand(program, *composite)?, indices)?;
                self.set_dst(ctx, pc, result_id(inst)?, value);
            }
            Op::CompositeInsert { object, composite, indices } => {
                let mut value = self.operand(program, *composite)?.clone();
                super::write_path(&mut value, indices, self.operand(program, *object)?)?;
                self.set_dst(ctx, pc, result_id(inst)?, value);
            }
            Op::VectorExtractDynamic { vector, index } => {
                let source = self.operand(program, *vector)?.clone();
                let index = self.index_operand(program, *index)?;
                let mut value = self.template(program, inst)?;
                if let Some(i) = self.checked_index(ctx, index, source.component_count() as u64, "a vector") {
                    value.set_raw(0, source.raw(i));
                }
                self.set_dst(ctx, pc, result_id(inst)?, value);
            }
            Op::VectorInsertDynamic { vector, component, index } => {
                let mut value = self.operand(program, *vector)?.clone();
                let component = self.operand(program, *component)?.raw(0);
                let index = self.index_operand(program, *index)?;
                if let Some(i) = self.checked_index(ctx, index, value.component_count() as u64, "a vector") {
                    value.set_raw(i, component);
                }
                self.set_dst(ctx, pc, result_id(inst)?, value);
            }
            Op::VectorShuffle { first, second, components } => {
                let a = self.operand(program, *first)?;
                let b = self.operand(program, *second)?;
                let n = a.component_count();
                let mut value = self.template(program, inst)?;
                for (i, &c) in components.iter().enumerate() {
                    // 0xFFFFFFFF selects an undefined component
                    if c == u32::MAX {
                        continue;
                    }
                    let c = c as usize;
                    value.set_raw(i, if c < n { a.raw(c) } else { b.raw(c - n) });
                }
                self.set_dst(ctx, pc, result_id(inst)?, value);
            }
            Op::CopyObject { operand } => {
                let value = self.operand(program, *operand)?.clone();
                self.set_dst(ctx, pc, result_id(inst)?, value);
            }
            Op::Transpose { matrix } => {
                let m = self.operand(program, *matrix)?;
                let mut value = self.template(program, inst)?;
                let (rows, cols) = (m.rows as usize, m.columns as usize);
                for r in 0..rows {
                    for c in 0..cols {
                        value.set_raw(c * rows + r, m.raw(r * cols + c));
                    }
                }
                self.set_dst(ctx, pc, result_id(inst)?, value);
            }

            Op::Unary { kind, operand } => {
                let out = self.template(program, inst)?;
                let value = unary(*kind, self.operand(program, *operand)?, out)?;
                self.set_dst(ctx, pc, result_id(inst)?, value);
            }
            Op::Binary { kind, lhs, rhs } => {
                let out = self.template(program, inst)?;
                let value = binary(*kind, self.operand(program, *lhs)?, self.operand(program, *rhs)?, out)?;
                self.set_dst(ctx, pc, result_id(inst)?, value);
            }
            Op::Select { condition, accept, reject } => {
                let value = select(
                    self.operand(program, *condition)?,
                    self.operand(program, *accept)?,
                    self.operand(program, *reject)?,
                );
                self.set_dst(ctx, pc, result_id(inst)?, value);
            }
            Op::Derivative { kind, operand } => {
                let Some(value) = self.derivative(ctx, *kind, *operand)? else {
                    return Ok(StepOutcome::Stalled);
                };
                self.set_dst(ctx, pc, result_id(inst)?, value);
            }
            Op::ExtInst { set, instruction, operands } => {
                let template = self.template(program, inst)?;
                let args = self.operands(program, operands)?;
                let value = self.ext_inst(ctx, pc, *set, *instruction, &template, &args)?;
                self.set_dst(ctx, pc, result_id(inst)?, value);
            }

            Op::SampledImage { .. }
            | Op::Image { .. }
            | Op::ImageSample { .. }
            | Op::ImageFetch { .. }
            | Op::ImageGather { .. }
            | Op::ImageRead { .. }
            | Op::ImageWrite { .. }
            | Op::ImageQuery { .. } => match self.image_op(ctx, inst)? {
                ImageResult::Value(value) => self.set_dst(ctx, pc, result_id(inst)?, value),
                ImageResult::Done => {}
                ImageResult::Stalled => return Ok(StepOutcome::Stalled),
            },

            Op::Phi { incoming } => {
                let result = result_id(inst)?;
                let value = match self.pending_phis.remove(&result) {
                    Some(value) => value,
                    None => {
                        let from = self
                            .last_block
                            .ok_or_else(|| anyhow!("phi executed without a predecessor block"))?;
                        let source = incoming
                            .iter()
                            .find(|src| src.parent == from)
                            .ok_or_else(|| anyhow!("phi has no incoming value for {from}"))?;
                        self.operand(program, source.value)?.clone()
                    }
                };
                self.set_dst(ctx, pc, result, value);
            }
            Op::Branch { target } => {
                self.push_merge(program);
                self.jump(ctx, pc, *target)?;
                return Ok(StepOutcome::Executed);
            }
            Op::BranchConditional { condition, true_label, false_label } => {
                let taken = self.operand(program, *condition)?.truthy(0);
                self.push_merge(program);
                self.jump(ctx, pc, if taken { *true_label } else { *false_label })?;
                return Ok(StepOutcome::Executed);
            }
            Op::Switch { selector, default, targets } => {
                let selector = self.operand(program, *selector)?;
                let mask = selector.ty.bit_mask();
                let value = selector.uint(0);
                let target = targets
                    .iter()
                    .find(|t| t.literal & mask == value)
                    .map_or(*default, |t| t.label);
                self.push_merge(program);
                self.jump(ctx, pc, target)?;
                return Ok(StepOutcome::Executed);
            }
            Op::FunctionCall { function, arguments } => {
                let args = self.operands(program, arguments)?;
                self.call(ctx, pc, *function, args, inst.result)?;
                return Ok(StepOutcome::Executed);
            }
            Op::Return => return self.return_from(ctx, pc, None),
            Op::ReturnValue { value } => {
                let value = self.operand(program, *value)?.clone();
                return self.return_from(ctx, pc, Some(value));
            }
            Op::Kill => {
                debug!(target: "shdbg::exec", lane = self.lane(), pc, "killed");
                self.status = LaneStatus::Killed;
                self.flags.killed = true;
                return Ok(StepOutcome::Killed);
            }
            Op::DemoteToHelperInvocation => self.helper = true,
            Op::IsHelperInvocation => {
                let value = ShaderVariable::scalar_bool("", self.helper);
                self.set_dst(ctx, pc, result_id(inst)?, value);
            }
            Op::Unreachable => bail!("executed an unreachable instruction"),
            Op::ControlBarrier => {
                self.pc = pc + 1;
                if ctx.converge() {
                    self.status = LaneStatus::AtBarrier;
                }
                return Ok(StepOutcome::Executed);
            }
            Op::DebugDeclare { variable, pointer } => {
                self.source_bindings.insert(*variable, SourceBinding::Declared(*pointer));
            }
            Op::DebugValue { variable, value } => {
                self.source_bindings.insert(*variable, SourceBinding::Value(*value));
            }
        }
        self.pc = pc + 1;
        Ok(StepOutcome::Executed)
    }

    /// Dispatch an extended instruction. Unknown instructions and library
    /// failures are diagnostics with a zero result.
    fn ext_inst(
        &mut self,
        ctx: &mut StepContext<'_>,
        pc: usize,
        set: Id,
        opcode: u32,
        template: &ShaderVariable,
        args: &[ShaderVariable],
    ) -> Result<ShaderVariable> {
        let program = ctx.program;
        let registry = ctx.extinst;
        let set_name = program
            .ext_set_name(set)
            .ok_or_else(|| anyhow!("{set} is not an extended instruction set import"))?;
        let Some(entry) = registry.lookup(set_name, opcode) else {
            ctx.report(
                MessageSeverity::Medium,
                format!("lane {}: {set_name} instruction {opcode} is not supported", self.lane()),
            );
            return Ok(template.zeroed());
        };
        let mut pointees = Vec::with_capacity(args.len());
        for arg in args {
            pointees.push(match arg.pointer() {
                Some(ptr) if ptr.storage == StorageClass::Input => Some(self.load(ctx, &ptr.clone())?),
                _ => None,
            });
        }
        let (result, stores) = {
            let mut ext = ExtInstContext::new(opcode, template, &mut *ctx.api).with_pointees(pointees);
            let result = (entry.func)(&mut ext, args);
            (result, ext.take_stores())
        };
        match result {
            Ok(value) => {
                for (target, stored) in stores {
                    if let Some(ptr) = target.pointer() {
                        let ptr = ptr.clone();
                        self.store(ctx, pc, &ptr, &stored)?;
                    }
                }
                Ok(value)
            }
            Err(err) => {
                ctx.report(
                    MessageSeverity::Medium,
                    format!("lane {}: {set_name} {} failed: {err:#}", self.lane(), entry.name),
                );
                Ok(template.zeroed())
            }
        }
    }
}
