use crate::id::{Id, IdMap};
use crate::val::ShaderVariable;

/// One active function call of a lane.
#[derive(Debug, Clone, PartialEq)]
pub struct StackFrame {
    pub function: Id,
    /// Unique per lane; pointers to locals name their frame by serial so a
    /// pointer that outlives its call is detected instead of aliasing a
    /// later frame.
    pub serial: u32,
    /// Caller instruction to resume at, `None` for the entry point.
    pub return_pc: Option<usize>,
    /// Result id of the call instruction in the caller.
    pub result: Option<Id>,
    pub locals: IdMap<ShaderVariable>,
    /// Ids first defined during this call, retired on return.
    pub created: Vec<Id>,
    pub live_at_entry: Vec<Id>,
    /// Caller's (last, current) block at the call.
    pub saved_blocks: (Option<Id>, Option<Id>),
    /// Merge-stack depth at entry; merges below it belong to the caller.
    pub merge_base: usize,
}

impl StackFrame {
    pub fn entry(function: Id, serial: u32) -> Self {
        Self {
            function,
            serial,
            return_pc: None,
            result: None,
            locals: IdMap::new(),
            created: Vec::new(),
            live_at_entry: Vec::new(),
            saved_blocks: (None, None),
            merge_base: 0,
        }
    }

    pub fn is_entry(&self) -> bool {
        self.return_pc.is_none()
    }
}
