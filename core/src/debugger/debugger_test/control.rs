use super::*;

/// `v = input; if (v > 1.0) { w = v * 2.0; } return;` as a pixel shader.
/// With one-pixel deltas the right column of the quad takes the branch.
struct BranchProgram {
    program: Program,
    merge: Id,
    doubled: Id,
}

fn branch_program() -> BranchProgram {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let bool_t = b.type_bool();
    let f32t = b.type_f32();
    let one = b.constant_f32(1.0);
    let two = b.constant_f32(2.0);
    let input = b.global(StorageClass::Input, f32t, None);
    b.decorate(input, Decoration::Location(0));

    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let then_block = b.label();
    let merge = b.label();
    let v = b.load(f32t, input);
    let cond = b.binary(BinaryOp::FOrdGreaterThan, bool_t, v, one);
    b.set_merge(Merge::Selection { merge });
    b.branch_conditional(cond, then_block, merge);
    b.place_block(then_block);
    let doubled = b.binary(BinaryOp::FMul, f32t, v, two);
    b.branch(merge);
    b.place_block(merge);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Pixel, &[input]);
    BranchProgram { program: b.finish(), merge, doubled }
}

fn branch_api() -> CaptureApi {
    let slot = InputSlot::Location { location: 0, component: 0 };
    CaptureApi::new()
        .with_input(slot, 0, &[0.5])
        .with_derivatives(slot, DerivativeDeltas::uniform([1.0, 0.0, 0.0, 0.0], [0.0; 4]))
}

#[test]
fn test_divergent_lanes_wait_at_the_merge_block() {
    let BranchProgram { program, merge, doubled } = branch_program();
    let mut dbg = start(&program, DebugSetup::default(), branch_api(), DebugConfig::default());
    let states = dbg.continue_debug();
    // load, compare, branch, then-block (left column waits), branch, return
    assert_eq!(states.len(), 6);

    let waiting = &states[3];
    assert!(waiting.flags.suspended);
    assert_eq!(waiting.executed, vec![None, Some(3), None, Some(3)]);
    assert_eq!(waiting.lanes[0], LaneStatus::BlockedAtMerge(merge));
    assert_eq!(waiting.lanes[1], LaneStatus::Running);

    let last = states.last().unwrap();
    assert!(last.executed.iter().all(Option::is_some));
    assert!(last.lanes.iter().all(|l| *l == LaneStatus::Finished));
    assert!(dbg.lanes()[0].value(doubled).is_none());
    assert_eq!(dbg.lanes()[1].value(doubled).unwrap().f32v(0), 3.0);
}

#[test]
fn test_uniform_branch_does_not_suspend() {
    let BranchProgram { program, .. } = branch_program();
    let slot = InputSlot::Location { location: 0, component: 0 };
    let api = CaptureApi::new().with_input(slot, 0, &[4.0]);
    let mut dbg = start(&program, DebugSetup::default(), api, DebugConfig::default());
    let states = dbg.continue_debug();
    assert_eq!(states.len(), 6);
    assert!(states.iter().all(|s| !s.flags.suspended));
}

#[test]
fn test_killed_lane_does_not_hold_back_the_quad() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let bool_t = b.type_bool();
    let f32t = b.type_f32();
    let one = b.constant_f32(1.0);
    let input = b.global(StorageClass::Input, f32t, None);
    b.decorate(input, Decoration::Location(0));

    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let discard = b.label();
    let merge = b.label();
    let v = b.load(f32t, input);
    let cond = b.binary(BinaryOp::FOrdGreaterThan, bool_t, v, one);
    b.set_merge(Merge::Selection { merge });
    b.branch_conditional(cond, discard, merge);
    b.place_block(discard);
    b.emit_void(Op::Kill);
    b.place_block(merge);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Pixel, &[input]);
    let program = b.finish();

    let setup = DebugSetup { active_lane: 1, ..DebugSetup::default() };
    let slot = InputSlot::Location { location: 0, component: 0 };
    let api = CaptureApi::new()
        .with_input(slot, 1, &[1.5])
        .with_derivatives(slot, DerivativeDeltas::uniform([1.0, 0.0, 0.0, 0.0], [0.0; 4]));
    let mut dbg = start(&program, setup, api, DebugConfig::default());
    let states = dbg.continue_debug();
    assert!(states.iter().any(|s| s.flags.killed));
    assert_eq!(dbg.active_lane().status(), LaneStatus::Killed);
    assert_eq!(dbg.lanes()[0].status(), LaneStatus::Finished);
    assert_eq!(dbg.lanes()[2].status(), LaneStatus::Finished);
}

#[test]
fn test_runaway_loop_is_stopped() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let header = b.label();
    let body = b.label();
    let merge = b.label();
    b.branch(header);
    b.place_block(header);
    b.set_merge(Merge::Loop { merge, continue_target: body });
    b.branch(body);
    b.place_block(body);
    b.branch(header);
    b.place_block(merge);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let program = b.finish();

    let config = DebugConfig { max_steps: 10, ..DebugConfig::default() };
    let mut dbg = start(&program, DebugSetup::default(), CaptureApi::new(), config);
    let states = dbg.continue_debug();
    assert_eq!(states.len(), 10);
    assert!(states[9].flags.finished);
    assert!(!states[8].flags.finished);
    assert_eq!(dbg.active_lane().status(), LaneStatus::Finished);
    let message = &dbg.api().messages()[0];
    assert_eq!(message.severity, MessageSeverity::High);
    assert!(message.description.contains("stopped after 10 steps"), "{}", message.description);
}

#[test]
fn test_call_locals_retire_on_return() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let two = b.constant_f32(2.0);
    let x = b.constant_f32(3.5);

    let (double, params) = b.begin_function("double", f32t, &[f32t]);
    b.begin_block();
    let tmp = b.binary(BinaryOp::FMul, f32t, params[0], two);
    b.ret_value(tmp);

    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let before = b.binary(BinaryOp::FAdd, f32t, x, two);
    let result = b.call(f32t, double, &[x]);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let program = b.finish();

    let mut dbg = start(&program, DebugSetup::default(), CaptureApi::new(), DebugConfig::default());
    let states: Vec<ShaderDebugState> = dbg.steps().take(4).collect();
    // add, call, multiply, return
    assert_eq!(states[1].value_of(0, params[0]).unwrap().f32v(0), 3.5);
    assert_eq!(dbg.active_lane().live(), &[before, result]);
    assert!(dbg.active_lane().value(tmp).is_none());
    assert!(dbg.active_lane().value(params[0]).is_none());
    assert_eq!(value_f32(&dbg, result), 7.0);
    assert_eq!(dbg.callstack(), vec!["main".to_string()]);

    let retired: Vec<Id> = states[3].changes.iter().filter(|c| c.after.is_none()).map(|c| c.id).collect();
    assert_eq!(retired, vec![params[0], tmp]);
    assert!(states[3].flags.function_return);
}

#[test]
fn test_recursion_stops_the_lane() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    b.call(void, main, &[]);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let program = b.finish();

    let (dbg, states) = run_single(&program);
    assert_eq!(states.len(), 1);
    assert!(states[0].flags.finished);
    assert!(dbg.api().messages()[0].description.contains("recursive call"));
}

fn lined_program() -> Program {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let two = b.constant_f32(2.0);
    let file = b.source_file("shader.frag");
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    b.set_line(Some(LineInfo { file, line: 1, column: 0 }));
    let a = b.binary(BinaryOp::FAdd, f32t, two, two);
    b.set_line(Some(LineInfo { file, line: 2, column: 0 }));
    let m = b.binary(BinaryOp::FMul, f32t, a, two);
    b.set_line(Some(LineInfo { file, line: 3, column: 0 }));
    b.binary(BinaryOp::FSub, f32t, m, two);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    b.finish()
}

#[test]
fn test_run_until_stops_before_breakpoints() {
    let program = lined_program();
    let mut dbg = start(&program, DebugSetup::default(), CaptureApi::new(), DebugConfig::default());
    assert_eq!(dbg.trace().instructions[2].line.unwrap().line, 3);

    let states = dbg.run_until(&[Breakpoint::Line(3)]);
    assert_eq!(states.len(), 2);
    assert_eq!(dbg.active_lane().pc(), 2);

    // both instructions on line 3 are one source step
    let states = dbg.run_until(&[Breakpoint::Line(3)]);
    assert_eq!(states.len(), 2);
    assert!(dbg.is_finished());
}

#[test]
fn test_run_until_instruction() {
    let program = lined_program();
    let mut dbg = start(&program, DebugSetup::default(), CaptureApi::new(), DebugConfig::default());
    let states = dbg.run_until(&[Breakpoint::Instruction(3)]);
    assert_eq!(states.len(), 3);
    assert_eq!(states[2].next_instruction, 3);
    assert_eq!(dbg.continue_debug().len(), 1);
}
