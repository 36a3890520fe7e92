//! The orchestrator: owns the lanes of one invocation group and steps them
//! together, one instruction per lane per round.
//!
//! A pixel session steps a 2x2 quad so derivatives can be taken across
//! lanes; a compute session steps the whole workgroup so barriers and
//! workgroup memory behave. Only the active lane is what the caller is
//! debugging; the others exist to feed it.

mod config;
mod global;
mod quad;
mod scope;
mod trace;

#[cfg(test)]
mod debugger_test;

pub use config::{DebugConfig, DerivativePolicy};
pub use global::{GlobalState, ResourceDescriptor, ResourceKind};
pub use quad::{derive_quad_input, frag_coord_deltas};
pub use scope::{ScopeData, ScopeTree};
pub use trace::{
    InstructionSourceInfo, ShaderDebugState, ShaderDebugTrace, ShaderVariableChange, SourceVariableMapping,
    SourceVariableValue, StepFlags,
};

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::api::{DebugApiWrapper, DebugMessage, InputSlot, MessageSeverity, ShaderBuiltin};
use crate::exec::{LaneStatus, QuadView, SourceBinding, StepContext, StepOutcome, ThreadState, write_path};
use crate::extinst::ExtInstRegistry;
use crate::id::Id;
use crate::program::{Decorations, EntryPoint, Program, ProgramIndex, ShaderStage, SpecConstant, StorageClass, Type};
use crate::val::ShaderVariable;

/// Which invocation to debug and how its group is shaped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSetup {
    /// Entry point name; the first entry point when unset.
    pub entry_point: Option<String>,
    /// Lane whose execution is being inspected.
    pub active_lane: u32,
    /// Lanes of the group that were not running on the GPU.
    pub inactive_lanes: Vec<u32>,
    /// Overrides the entry point's declared workgroup size.
    pub workgroup_size: Option<[u32; 3]>,
    pub workgroup_id: [u32; 3],
    pub specialization: Vec<SpecConstant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Breakpoint {
    Instruction(usize),
    /// Any instruction attributed to this source line.
    Line(u32),
}

#[derive(Debug, Clone, Copy)]
struct LaneGeometry {
    stage: ShaderStage,
    count: u32,
    active: u32,
    workgroup_size: [u32; 3],
    workgroup_id: [u32; 3],
}

impl LaneGeometry {
    fn local_id(&self, lane: u32) -> [u32; 3] {
        let [sx, sy, _] = self.workgroup_size;
        [lane % sx, (lane / sx) % sy, lane / (sx * sy)]
    }

    /// Built-ins that follow from the lane's position in the group.
    fn builtin(&self, slot: InputSlot, lane: u32, template: &ShaderVariable) -> Option<ShaderVariable> {
        let InputSlot::BuiltIn(builtin) = slot else {
            return None;
        };
        let compute = self.stage == ShaderStage::Compute;
        let words: Vec<u64> = match builtin {
            ShaderBuiltin::LocalInvocationId if compute => self.local_id(lane).map(u64::from).to_vec(),
            ShaderBuiltin::LocalInvocationIndex if compute => vec![lane as u64],
            ShaderBuiltin::WorkgroupId if compute => self.workgroup_id.map(u64::from).to_vec(),
            ShaderBuiltin::WorkgroupSize if compute => self.workgroup_size.map(u64::from).to_vec(),
            ShaderBuiltin::GlobalInvocationId if compute => {
                let local = self.local_id(lane);
                (0..3)
                    .map(|i| self.workgroup_id[i] as u64 * self.workgroup_size[i] as u64 + local[i] as u64)
                    .collect()
            }
            ShaderBuiltin::SubgroupSize => vec![self.count as u64],
            ShaderBuiltin::SubgroupLocalInvocationId => vec![lane as u64],
            ShaderBuiltin::HelperInvocation if self.stage == ShaderStage::Pixel => vec![(lane != self.active) as u64],
            _ => return None,
        };
        let mut out = template.zeroed();
        for (i, w) in words.iter().enumerate().take(out.component_count()) {
            out.set_raw(i, *w);
        }
        Some(out)
    }
}

fn slot_of(decorations: Decorations) -> Option<InputSlot> {
    match (decorations.builtin, decorations.location) {
        (Some(builtin), _) => Some(InputSlot::BuiltIn(builtin)),
        (None, Some(location)) => Some(InputSlot::Location { location, component: decorations.component.unwrap_or(0) }),
        _ => None,
    }
}

/// Capture slots feeding an input variable: the variable itself, or each
/// member of an interface block. Each comes with its member index and
/// whether it is flat-interpolated.
fn input_slots(index: &ProgramIndex, var: Id, pointee: Id) -> Result<Vec<(Option<usize>, InputSlot, bool)>> {
    let decorations = index.decorations(var);
    if let Some(slot) = slot_of(decorations) {
        return Ok(vec![(None, slot, decorations.flat)]);
    }
    let Type::Struct { members } = index.ty(pointee)? else {
        return Ok(Vec::new());
    };
    Ok((0..members.len())
        .filter_map(|m| {
            let member = index.member_decorations(pointee, m as u32);
            slot_of(member).map(|slot| (Some(m), slot, member.flat || decorations.flat))
        })
        .collect())
}

fn lane_callstack(index: &ProgramIndex, scopes: &ScopeTree, lane: &ThreadState) -> Vec<String> {
    let mut stack = lane.callstack(index);
    if let Some(scope) = index.instruction(lane.pc()).and_then(|flat| flat.inst.scope) {
        stack.extend(scopes.inline_chain(scope));
    }
    stack
}

fn input_values(index: &ProgramIndex, lane: &ThreadState) -> Vec<(Id, ShaderVariable)> {
    index
        .globals()
        .iter()
        .filter(|var| var.storage == StorageClass::Input)
        .filter_map(|var| lane.private_value(var.id).map(|v| (var.id, v.clone())))
        .collect()
}

/// A debugging session over one invocation group.
pub struct Debugger<A: DebugApiWrapper> {
    index: ProgramIndex,
    setup: DebugSetup,
    config: DebugConfig,
    extinst: Arc<ExtInstRegistry>,
    api: A,
    entry: EntryPoint,
    geometry: LaneGeometry,
    scopes: ScopeTree,
    global: GlobalState,
    lanes: Vec<ThreadState>,
    trace: ShaderDebugTrace,
    rounds: u64,
    force_derivatives: bool,
    finished: bool,
}

impl<A: DebugApiWrapper> Debugger<A> {
    /// Validate and index `program`, read the global state through `api`
    /// and park every lane at the entry point. Structural problems with the
    /// program or the setup are errors; nothing is executed yet.
    pub fn begin_debug(
        program: &Program,
        setup: DebugSetup,
        mut api: A,
        extinst: Arc<ExtInstRegistry>,
        config: DebugConfig,
    ) -> Result<Self> {
        let index = ProgramIndex::build(program, &setup.specialization)?;
        let entry = index
            .entry_point(setup.entry_point.as_deref())
            .cloned()
            .ok_or_else(|| match &setup.entry_point {
                Some(name) => anyhow!("program has no entry point named {name}"),
                None => anyhow!("program has no entry points"),
            })?;
        let workgroup_size = setup.workgroup_size.unwrap_or(entry.workgroup_size);
        let count = match entry.stage {
            ShaderStage::Pixel => 4,
            ShaderStage::Compute => workgroup_size.iter().product(),
            _ => 1,
        };
        if count == 0 {
            bail!("workgroup size {workgroup_size:?} has no lanes");
        }
        if setup.active_lane >= count {
            bail!("active lane {} is outside a group of {count} lanes", setup.active_lane);
        }
        if setup.inactive_lanes.contains(&setup.active_lane) {
            bail!("active lane {} is marked inactive", setup.active_lane);
        }
        let geometry = LaneGeometry {
            stage: entry.stage,
            count,
            active: setup.active_lane,
            workgroup_size,
            workgroup_id: setup.workgroup_id,
        };
        let scopes = ScopeTree::build(index.debug_info());
        let (global, lanes) = Self::spawn(&index, &setup, &mut api, &entry, geometry)?;
        let trace = Self::build_trace(&index, &entry, geometry, &global, &lanes, &scopes, &config);
        info!(
            target: "shdbg::debugger",
            entry = %entry.name,
            stage = entry.stage.name(),
            lanes = count,
            active = setup.active_lane,
            "debug session started"
        );
        Ok(Self {
            index,
            setup,
            config,
            extinst,
            api,
            entry,
            geometry,
            scopes,
            global,
            lanes,
            trace,
            rounds: 0,
            force_derivatives: false,
            finished: false,
        })
    }

    fn spawn(
        index: &ProgramIndex,
        setup: &DebugSetup,
        api: &mut A,
        entry: &EntryPoint,
        geometry: LaneGeometry,
    ) -> Result<(GlobalState, Vec<ThreadState>)> {
        let global = GlobalState::build(index, api)?;
        let mut lanes = (0..geometry.count)
            .map(|lane| ThreadState::new(lane, index, &global, entry.function))
            .collect::<Result<Vec<_>>>()?;
        for lane in &mut lanes {
            if lane.lane() == geometry.active {
                continue;
            }
            if setup.inactive_lanes.contains(&lane.lane()) {
                lane.set_status(LaneStatus::Inactive);
            }
            if geometry.stage == ShaderStage::Pixel {
                lane.set_helper(true);
            }
        }
        Self::seed_inputs(index, api, geometry, &mut lanes)?;
        Ok((global, lanes))
    }

    /// Fill every lane's input variables. The active lane reads its
    /// captured values; pixel helpers are derived from them through the
    /// input's quad deltas, other lanes read their own captured value or
    /// the built-in their position implies.
    fn seed_inputs(index: &ProgramIndex, api: &mut A, geometry: LaneGeometry, lanes: &mut [ThreadState]) -> Result<()> {
        let active = geometry.active;
        for var in index.globals().iter().filter(|v| v.storage == StorageClass::Input) {
            let (_, pointee) = index.pointee(var.ty)?;
            let Some(root) = lanes.get(active as usize).and_then(|l| l.private_value(var.id)).cloned() else {
                continue;
            };
            for (member, slot, flat) in input_slots(index, var.id, pointee)? {
                let template = match member {
                    Some(m) => match root.members.get(m) {
                        Some(t) => t.clone(),
                        None => continue,
                    },
                    None => root.clone(),
                };
                let captured = api
                    .input_value(slot, active, &template)
                    .or_else(|| geometry.builtin(slot, active, &template));
                let Some(active_value) = captured else {
                    api.add_debug_message(DebugMessage::new(
                        MessageSeverity::Medium,
                        format!("no captured value for input {} ({slot})", index.debug_name(var.id)),
                    ));
                    continue;
                };
                let deltas = match slot {
                    _ if geometry.stage != ShaderStage::Pixel || flat => None,
                    InputSlot::BuiltIn(ShaderBuiltin::FragCoord) => {
                        Some(api.input_derivatives(slot).unwrap_or_else(frag_coord_deltas))
                    }
                    _ => api.input_derivatives(slot),
                };
                for lane in lanes.iter_mut() {
                    let n = lane.lane();
                    let value = if n == active {
                        active_value.clone()
                    } else if let Some(deltas) = &deltas {
                        derive_quad_input(&active_value, active as usize % 4, n as usize % 4, deltas)
                    } else {
                        geometry
                            .builtin(slot, n, &template)
                            .or_else(|| api.input_value(slot, n, &template))
                            .unwrap_or_else(|| active_value.clone())
                    };
                    let value = value.with_name(template.name.clone());
                    match member {
                        Some(m) => {
                            let mut block = lane.private_value(var.id).cloned().unwrap_or_else(|| root.clone());
                            write_path(&mut block, &[m as u32], &value)?;
                            lane.set_private(var.id, block);
                        }
                        None => lane.set_private(var.id, value),
                    }
                }
                trace!(target: "shdbg::debugger", input = %var.id, %slot, "seeded");
            }
        }
        Ok(())
    }

    fn build_trace(
        index: &ProgramIndex,
        entry: &EntryPoint,
        geometry: LaneGeometry,
        global: &GlobalState,
        lanes: &[ThreadState],
        scopes: &ScopeTree,
        config: &DebugConfig,
    ) -> ShaderDebugTrace {
        let instructions = index
            .instructions()
            .iter()
            .enumerate()
            .map(|(pc, flat)| InstructionSourceInfo {
                instruction: pc,
                function: index
                    .function(flat.function)
                    .map(|f| f.name.clone())
                    .unwrap_or_default(),
                text: flat.inst.to_string(),
                line: flat.inst.line,
                scope: flat.inst.scope,
            })
            .collect();
        let source_vars = index
            .debug_info()
            .variables
            .iter()
            .map(|v| SourceVariableMapping { id: v.id, name: v.name.clone(), scope: v.scope, line: v.line })
            .collect();

        let active = &lanes[geometry.active as usize];
        let mut changes = Vec::new();
        for lane in lanes {
            if lane.lane() != geometry.active && !config.record_all_lanes {
                continue;
            }
            for (id, value) in input_values(index, lane) {
                changes.push(ShaderVariableChange {
                    lane: lane.lane(),
                    instruction: lane.pc(),
                    id,
                    memory: true,
                    before: None,
                    after: Some(value),
                });
            }
        }
        ShaderDebugTrace {
            stage: entry.stage,
            entry_point: entry.name.clone(),
            lane_count: geometry.count,
            active_lane: geometry.active,
            instructions,
            source_vars,
            inputs: input_values(index, active).into_iter().map(|(_, v)| v).collect(),
            constant_blocks: global.constant_blocks().map(|(_, v)| v.clone()).collect(),
            resources: global.descriptors().to_vec(),
            initial_state: ShaderDebugState {
                step_index: 0,
                next_instruction: active.pc(),
                executed: vec![None; lanes.len()],
                flags: StepFlags::default(),
                changes,
                callstack: lane_callstack(index, scopes, active),
                lanes: lanes.iter().map(ThreadState::status).collect(),
            },
        }
    }

    /// Drop all execution state and start over from the entry point with
    /// the same setup. Writes already made through the API wrapper stay.
    pub fn restart(&mut self) -> Result<()> {
        let (global, lanes) = Self::spawn(&self.index, &self.setup, &mut self.api, &self.entry, self.geometry)?;
        self.trace = Self::build_trace(
            &self.index,
            &self.entry,
            self.geometry,
            &global,
            &lanes,
            &self.scopes,
            &self.config,
        );
        self.global = global;
        self.lanes = lanes;
        self.rounds = 0;
        self.force_derivatives = false;
        self.finished = false;
        debug!(target: "shdbg::debugger", "session restarted");
        Ok(())
    }

    pub fn trace(&self) -> &ShaderDebugTrace {
        &self.trace
    }

    pub fn program(&self) -> &ProgramIndex {
        &self.index
    }

    pub fn config(&self) -> &DebugConfig {
        &self.config
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    pub fn global(&self) -> &GlobalState {
        &self.global
    }

    pub fn lanes(&self) -> &[ThreadState] {
        &self.lanes
    }

    pub fn active_lane(&self) -> &ThreadState {
        &self.lanes[self.geometry.active as usize]
    }

    /// Rounds executed since the session (re)started.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Active lane call stack, outermost first, inlined functions included.
    pub fn callstack(&self) -> Vec<String> {
        lane_callstack(&self.index, &self.scopes, self.active_lane())
    }

    /// Release lanes suspended at a merge block once no sibling can still
    /// arrive there, and lanes at a barrier once the whole group is there.
    fn release_waiting(&mut self) {
        let mut release = Vec::new();
        for (i, lane) in self.lanes.iter().enumerate() {
            let LaneStatus::BlockedAtMerge(merge) = lane.status() else {
                continue;
            };
            let pending = self.lanes.iter().any(|other| {
                let status = other.status();
                !status.is_terminated()
                    && status != LaneStatus::BlockedAtMerge(merge)
                    && other.merge_stack().contains(&merge)
            });
            if !pending {
                release.push(i);
            }
        }
        for i in release {
            trace!(target: "shdbg::debugger", lane = i, "reconverged");
            self.lanes[i].set_status(LaneStatus::Running);
        }

        let mut running = self.lanes.iter().filter(|l| !l.status().is_terminated()).peekable();
        if running.peek().is_some() && running.all(|l| l.status() == LaneStatus::AtBarrier) {
            trace!(target: "shdbg::debugger", "barrier released");
            for lane in &mut self.lanes {
                if lane.status() == LaneStatus::AtBarrier {
                    lane.set_status(LaneStatus::Running);
                }
            }
        }
    }

    /// Nothing moved this round: stop waiting for derivative operands
    /// first, then give up on reconvergence.
    fn break_deadlock(&mut self, outcomes: &[StepOutcome]) {
        if outcomes.contains(&StepOutcome::Stalled) {
            debug!(target: "shdbg::debugger", "derivative operands unavailable; forcing");
            self.force_derivatives = true;
            return;
        }
        let mut released = false;
        for lane in &mut self.lanes {
            if matches!(lane.status(), LaneStatus::BlockedAtMerge(_) | LaneStatus::AtBarrier) {
                lane.set_status(LaneStatus::Running);
                released = true;
            }
        }
        if released {
            warn!(target: "shdbg::debugger", round = self.rounds, "lanes cannot reconverge; releasing them");
        }
    }

    fn stop_runaway(&mut self) {
        let text = format!("stopped after {} steps; the shader may not terminate", self.rounds);
        warn!(target: "shdbg::debugger", "{text}");
        self.api.add_debug_message(DebugMessage::new(MessageSeverity::High, text));
        for lane in &mut self.lanes {
            if !lane.status().is_terminated() {
                lane.set_status(LaneStatus::Finished);
            }
        }
    }

    /// Run one lock-step round: every lane executes at most one
    /// instruction. `None` once every lane has terminated.
    pub fn step(&mut self) -> Option<ShaderDebugState> {
        if self.finished {
            return None;
        }
        if self.lanes.iter().all(|l| l.status().is_terminated()) {
            self.finished = true;
            return None;
        }
        self.release_waiting();

        let count = self.lanes.len();
        let active = self.geometry.active as usize;
        let force_derivatives = std::mem::take(&mut self.force_derivatives);
        let mut executed = vec![None; count];
        let mut outcomes = Vec::with_capacity(count);
        let mut changes = Vec::new();
        let mut flags = StepFlags::default();
        for i in 0..count {
            let Some((lane, quad)) = QuadView::split(&mut self.lanes, i) else {
                break;
            };
            let pc = lane.pc();
            let mut ctx = StepContext {
                program: &self.index,
                global: &mut self.global,
                api: &mut self.api,
                extinst: self.extinst.as_ref(),
                config: &self.config,
                stage: self.geometry.stage,
                quad,
                force_derivatives,
                group_size: count,
            };
            let outcome = lane.step(&mut ctx);
            if outcome.progressed() {
                executed[i] = Some(pc);
            }
            let lane_changes = lane.take_changes();
            let lane_flags = lane.take_flags();
            if i == active {
                flags.merge(lane_flags);
            }
            if i == active || self.config.record_all_lanes {
                changes.extend(lane_changes);
            }
            outcomes.push(outcome);
        }

        if !outcomes.iter().any(|o| o.progressed()) {
            self.break_deadlock(&outcomes);
        }
        self.rounds += 1;
        if self.rounds >= self.config.max_steps {
            self.stop_runaway();
            flags.finished = true;
        }
        if self.lanes.iter().all(|l| l.status().is_terminated()) {
            self.finished = true;
        }

        let lane = &self.lanes[active];
        Some(ShaderDebugState {
            step_index: self.rounds,
            next_instruction: lane.pc(),
            executed,
            flags,
            changes,
            callstack: lane_callstack(&self.index, &self.scopes, lane),
            lanes: self.lanes.iter().map(ThreadState::status).collect(),
        })
    }

    /// Lazily step the session to completion.
    pub fn steps(&mut self) -> impl Iterator<Item = ShaderDebugState> + '_ {
        std::iter::from_fn(move || self.step())
    }

    /// Run every remaining round.
    pub fn continue_debug(&mut self) -> Vec<ShaderDebugState> {
        self.steps().collect()
    }

    fn line_at(&self, pc: usize) -> Option<u32> {
        self.index.instruction(pc).and_then(|f| f.inst.line).map(|l| l.line)
    }

    fn hits(&self, breakpoints: &[Breakpoint], from: usize, pc: usize) -> bool {
        breakpoints.iter().any(|bp| match *bp {
            Breakpoint::Instruction(target) => target == pc,
            Breakpoint::Line(line) => self.line_at(pc) == Some(line) && self.line_at(from) != Some(line),
        })
    }

    /// Step until the active lane is about to execute a breakpoint, or the
    /// session ends. The breakpoint instruction itself is not executed.
    pub fn run_until(&mut self, breakpoints: &[Breakpoint]) -> Vec<ShaderDebugState> {
        let mut states = Vec::new();
        while let Some(state) = self.step() {
            let active = self.geometry.active as usize;
            let hit = state.executed[active].is_some_and(|from| self.hits(breakpoints, from, state.next_instruction));
            states.push(state);
            if hit {
                debug!(target: "shdbg::debugger", pc = self.active_lane().pc(), "breakpoint");
                break;
            }
        }
        states
    }

    /// Source-level variables in view at the active lane's next
    /// instruction, with their current values.
    pub fn source_variables(&mut self) -> Result<Vec<SourceVariableValue>> {
        let active = self.geometry.active as usize;
        let pc = self.lanes[active].pc();
        let Some(scope) = self.index.instruction(pc).and_then(|f| f.inst.scope) else {
            return Ok(Vec::new());
        };
        let visible: Vec<(Id, String)> = self
            .scopes
            .visible_variables(scope)
            .into_iter()
            .map(|v| (v.id, v.name.clone()))
            .collect();

        let mut out = Vec::new();
        for (id, name) in visible {
            let Some(binding) = self.lanes[active].source_binding(id) else {
                continue;
            };
            let value = match binding {
                SourceBinding::Value(value) => {
                    let lane = &self.lanes[active];
                    lane.value(value).or_else(|| self.index.constant(value)).cloned()
                }
                SourceBinding::Declared(pointer) => {
                    let Some(ptr) = self.lanes[active].value(pointer).and_then(|v| v.pointer()).cloned() else {
                        continue;
                    };
                    let Some((lane, quad)) = QuadView::split(&mut self.lanes, active) else {
                        continue;
                    };
                    let mut ctx = StepContext {
                        program: &self.index,
                        global: &mut self.global,
                        api: &mut self.api,
                        extinst: self.extinst.as_ref(),
                        config: &self.config,
                        stage: self.geometry.stage,
                        quad,
                        force_derivatives: false,
                        group_size: 1,
                    };
                    Some(lane.load(&mut ctx, &ptr)?)
                }
            };
            if let Some(value) = value {
                out.push(SourceVariableValue { value: value.with_name(name.clone()), name });
            }
        }
        Ok(out)
    }
}
