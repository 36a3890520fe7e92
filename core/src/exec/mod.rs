//! A single lane of execution and everything it needs to advance by one
//! instruction.
//!
//! A [`ThreadState`] never drives itself: the orchestrator hands it a
//! [`StepContext`] once per round and the lane executes at most one
//! instruction, reporting what happened as a [`StepOutcome`].

mod derivative;
mod frame;
mod image;
mod memory;
mod step;
mod thread;


pub use frame::StackFrame;
pub use memory::{read_path, write_path};
pub use thread::{SourceBinding, ThreadState};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::{DebugApiWrapper, DebugMessage, MessageSeverity};
use crate::debugger::{DebugConfig, GlobalState};
use crate::extinst::ExtInstRegistry;
use crate::id::Id;
use crate::program::{ProgramIndex, ShaderStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneStatus {
    /// Created, first instruction not yet executed.
    Entering,
    Running,
    /// Arrived at a merge block that sibling lanes have not reached yet.
    BlockedAtMerge(Id),
    /// Waiting at a control barrier for the rest of the workgroup.
    AtBarrier,
    Killed,
    Finished,
    /// Not part of the captured invocation group; never executes.
    Inactive,
}

impl LaneStatus {
    pub fn is_terminated(self) -> bool {
        matches!(self, LaneStatus::Killed | LaneStatus::Finished | LaneStatus::Inactive)
    }

    pub fn is_runnable(self) -> bool {
        matches!(self, LaneStatus::Entering | LaneStatus::Running)
    }
}

/// What one call to [`ThreadState::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Executed,
    /// Returned from a called function back into its caller.
    Returned,
    /// Blocked at a merge point or barrier; nothing executed.
    Suspended,
    /// Needs a quad neighbour's value for a derivative; nothing executed.
    Stalled,
    Killed,
    Finished,
    /// Already terminated.
    Idle,
}

impl StepOutcome {
    /// Whether an instruction was executed.
    pub fn progressed(self) -> bool {
        matches!(self, StepOutcome::Executed | StepOutcome::Returned | StepOutcome::Killed | StepOutcome::Finished)
    }
}

/// Read-only view of the lanes around the one being stepped.
#[derive(Debug, Clone, Copy)]
pub struct QuadView<'a> {
    before: &'a [ThreadState],
    after: &'a [ThreadState],
    index: usize,
}

impl<'a> QuadView<'a> {
    /// Split `lanes` into the lane at `index` (mutable) and a view of the others.
    pub fn split(lanes: &'a mut [ThreadState], index: usize) -> Option<(&'a mut ThreadState, QuadView<'a>)> {
        let (before, rest) = lanes.split_at_mut(index);
        let (current, after) = rest.split_first_mut()?;
        Some((current, QuadView { before, after, index }))
    }

    /// A view with no siblings.
    pub fn solo() -> QuadView<'static> {
        QuadView { before: &[], after: &[], index: 0 }
    }

    /// Sibling lane by absolute index; `None` for the lane being stepped.
    pub fn lane(&self, index: usize) -> Option<&'a ThreadState> {
        if index < self.index {
            self.before.get(index)
        } else if index > self.index {
            self.after.get(index - self.index - 1)
        } else {
            None
        }
    }
}

/// Everything outside the lane that one step may touch.
pub struct StepContext<'a> {
    pub program: &'a ProgramIndex,
    pub global: &'a mut GlobalState,
    pub api: &'a mut dyn DebugApiWrapper,
    pub extinst: &'a ExtInstRegistry,
    pub config: &'a DebugConfig,
    pub stage: ShaderStage,
    pub quad: QuadView<'a>,
    /// Stop waiting for neighbours: missing derivative operands read as zero.
    pub force_derivatives: bool,
    /// Number of lanes stepped together; merges and barriers only suspend
    /// lanes when there is more than one.
    pub group_size: usize,
}

impl StepContext<'_> {
    pub fn converge(&self) -> bool {
        self.group_size > 1
    }

    pub fn report(&mut self, severity: MessageSeverity, text: impl Into<String>) {
        let text = text.into();
        warn!(target: "shdbg::exec", ?severity, "{text}");
        self.api.add_debug_message(DebugMessage::new(severity, text));
    }
}
