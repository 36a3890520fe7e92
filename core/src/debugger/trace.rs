use serde::{Deserialize, Serialize};

use super::global::ResourceDescriptor;
use crate::exec::LaneStatus;
use crate::id::Id;
use crate::program::{LineInfo, ShaderStage};
use crate::val::ShaderVariable;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepFlags {
    pub sample_load_gather: bool,
    pub generated_nan_or_inf: bool,
    pub killed: bool,
    pub function_return: bool,
    /// The lane is waiting at a merge point or barrier for its siblings.
    pub suspended: bool,
    /// The lane is waiting for quad neighbours to produce a derivative operand.
    pub stalled: bool,
    pub finished: bool,
}

impl StepFlags {
    pub fn merge(&mut self, other: StepFlags) {
        self.sample_load_gather |= other.sample_load_gather;
        self.generated_nan_or_inf |= other.generated_nan_or_inf;
        self.killed |= other.killed;
        self.function_return |= other.function_return;
        self.suspended |= other.suspended;
        self.stalled |= other.stalled;
        self.finished |= other.finished;
    }
}

/// One value that changed in a step. `before` is `None` for a newly
/// created value, `after` is `None` for a value that went out of scope.
/// Memory changes (stores through pointers) carry the pointee's value and
/// the id of the variable that owns the storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaderVariableChange {
    pub lane: u32,
    pub instruction: usize,
    pub id: Id,
    #[serde(default)]
    pub memory: bool,
    pub before: Option<ShaderVariable>,
    pub after: Option<ShaderVariable>,
}

impl ShaderVariableChange {
    pub fn name(&self) -> &str {
        self.after
            .as_ref()
            .or(self.before.as_ref())
            .map(|v| v.name.as_str())
            .unwrap_or("")
    }
}

/// The result of one lock-step round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaderDebugState {
    pub step_index: u64,
    /// Instruction the active lane executes next.
    pub next_instruction: usize,
    /// Instruction each lane executed this round, if any.
    pub executed: Vec<Option<usize>>,
    pub flags: StepFlags,
    pub changes: Vec<ShaderVariableChange>,
    /// Active lane call stack, outermost first, inlined frames included.
    pub callstack: Vec<String>,
    pub lanes: Vec<LaneStatus>,
}

impl ShaderDebugState {
    pub fn changes_for_lane(&self, lane: u32) -> impl Iterator<Item = &ShaderVariableChange> {
        self.changes.iter().filter(move |c| c.lane == lane)
    }

    /// Latest value recorded for `id` on `lane` in this step.
    pub fn value_of(&self, lane: u32, id: Id) -> Option<&ShaderVariable> {
        self.changes
            .iter()
            .rev()
            .find(|c| c.lane == lane && c.id == id && !c.memory)
            .and_then(|c| c.after.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceVariableMapping {
    pub id: Id,
    pub name: String,
    pub scope: Id,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionSourceInfo {
    pub instruction: usize,
    pub function: String,
    pub text: String,
    pub line: Option<LineInfo>,
    pub scope: Option<Id>,
}

/// A source-level variable's current value on the active lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceVariableValue {
    pub name: String,
    pub value: ShaderVariable,
}

/// Static description of a session, returned by `begin_debug`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaderDebugTrace {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub lane_count: u32,
    pub active_lane: u32,
    pub instructions: Vec<InstructionSourceInfo>,
    pub source_vars: Vec<SourceVariableMapping>,
    pub inputs: Vec<ShaderVariable>,
    pub constant_blocks: Vec<ShaderVariable>,
    pub resources: Vec<ResourceDescriptor>,
    pub initial_state: ShaderDebugState,
}
