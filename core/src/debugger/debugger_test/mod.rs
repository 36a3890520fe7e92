pub(super) use std::sync::Arc;

pub(super) use crate::{
    api::{BindingSlot, DerivativeDeltas, InputSlot, MessageSeverity, ShaderBuiltin, capture::CaptureApi},
    debugger::{Breakpoint, DebugConfig, DebugSetup, Debugger, DerivativePolicy, ShaderDebugState},
    exec::LaneStatus,
    extinst::ExtInstRegistry,
    id::Id,
    program::{
        BinaryOp, Decoration, DerivativeOp, LineInfo, Merge, Op, PhiSource, Program, ProgramBuilder, ScopeKind,
        ShaderStage, StorageClass,
    },
};

pub(super) fn start(program: &Program, setup: DebugSetup, api: CaptureApi, config: DebugConfig) -> Debugger<CaptureApi> {
    Debugger::begin_debug(program, setup, api, Arc::new(ExtInstRegistry::new()), config).unwrap()
}

/// Run a single-lane session to completion.
pub(super) fn run_single(program: &Program) -> (Debugger<CaptureApi>, Vec<ShaderDebugState>) {
    let mut dbg = start(program, DebugSetup::default(), CaptureApi::new(), DebugConfig::default());
    let states = dbg.continue_debug();
    (dbg, states)
}

pub(super) fn value_f32(dbg: &Debugger<CaptureApi>, id: Id) -> f32 {
    dbg.active_lane().value(id).unwrap().f32v(0)
}

mod control;
mod memory;
mod quad;
mod session;
mod source;
