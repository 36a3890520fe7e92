use super::*;

/// `main() { sum = 2.0 + 3.5; }` as a vertex shader.
fn add_program() -> (Program, Id) {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let two = b.constant_f32(2.0);
    let three_five = b.constant_f32(3.5);
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let sum = b.binary(BinaryOp::FAdd, f32t, two, three_five);
    b.name(sum, "sum");
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    (b.finish(), sum)
}

#[test]
fn test_add_change_is_attributed_to_lane_and_instruction() {
    let (program, sum) = add_program();
    let mut dbg = start(&program, DebugSetup::default(), CaptureApi::new(), DebugConfig::default());
    assert_eq!(dbg.trace().lane_count, 1);
    assert_eq!(dbg.trace().entry_point, "main");
    assert_eq!(dbg.trace().initial_state.next_instruction, 0);

    let state = dbg.step().unwrap();
    assert_eq!(state.step_index, 1);
    assert_eq!(state.executed, vec![Some(0)]);
    assert_eq!(state.next_instruction, 1);
    assert_eq!(state.changes.len(), 1);
    let change = &state.changes[0];
    assert_eq!((change.lane, change.instruction, change.id), (0, 0, sum));
    assert!(change.before.is_none());
    assert_eq!(change.after.as_ref().unwrap().f32v(0), 5.5);
    assert_eq!(change.name(), "sum");
    assert_eq!(state.value_of(0, sum).unwrap().f32v(0), 5.5);

    let last = dbg.step().unwrap();
    assert!(last.flags.finished);
    assert!(last.flags.function_return);
    assert_eq!(last.lanes, vec![LaneStatus::Finished]);
    assert!(dbg.is_finished());
    assert!(dbg.step().is_none());
    // values stay inspectable after the entry point returns
    assert_eq!(value_f32(&dbg, sum), 5.5);
}

#[test]
fn test_sessions_are_deterministic() {
    let (program, _) = add_program();
    let (_, first) = run_single(&program);
    let (_, second) = run_single(&program);
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

#[test]
fn test_restart_replays_from_the_entry_point() {
    let (program, sum) = add_program();
    let mut dbg = start(&program, DebugSetup::default(), CaptureApi::new(), DebugConfig::default());
    let first = dbg.continue_debug();
    dbg.restart().unwrap();
    assert!(!dbg.is_finished());
    assert_eq!(dbg.rounds(), 0);
    assert!(dbg.active_lane().value(sum).is_none());
    let second = dbg.continue_debug();
    assert_eq!(first, second);
}

#[test]
fn test_unknown_entry_point_is_rejected() {
    let (program, _) = add_program();
    let setup = DebugSetup { entry_point: Some("other".into()), ..DebugSetup::default() };
    let err = Debugger::begin_debug(
        &program,
        setup,
        CaptureApi::new(),
        Arc::new(ExtInstRegistry::new()),
        DebugConfig::default(),
    )
    .err()
    .unwrap();
    assert!(err.to_string().contains("no entry point named other"), "{err}");
}

#[test]
fn test_active_lane_outside_group_is_rejected() {
    let (program, _) = add_program();
    let setup = DebugSetup { active_lane: 1, ..DebugSetup::default() };
    let err = Debugger::begin_debug(
        &program,
        setup,
        CaptureApi::new(),
        Arc::new(ExtInstRegistry::new()),
        DebugConfig::default(),
    )
    .err()
    .unwrap();
    assert!(err.to_string().contains("outside a group of 1 lanes"), "{err}");
}

#[test]
fn test_malformed_program_is_rejected() {
    let (mut program, _) = add_program();
    program.entry_points.clear();
    let result = Debugger::begin_debug(
        &program,
        DebugSetup::default(),
        CaptureApi::new(),
        Arc::new(ExtInstRegistry::new()),
        DebugConfig::default(),
    );
    assert!(result.is_err());
}

#[test]
fn test_nan_results_are_flagged() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let zero = b.constant_f32(0.0);
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let nan = b.binary(BinaryOp::FDiv, f32t, zero, zero);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let program = b.finish();

    let (dbg, states) = run_single(&program);
    assert!(states[0].flags.generated_nan_or_inf);
    assert!(!states[1].flags.generated_nan_or_inf);
    assert!(value_f32(&dbg, nan).is_nan());
}

#[test]
fn test_unknown_ext_inst_set_reads_zero() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let x = b.constant_f32(4.0);
    let glsl = b.ext_inst_import("GLSL.std.450");
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let root = b.ext_inst(f32t, glsl, 31, &[x]);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let program = b.finish();

    let (dbg, states) = run_single(&program);
    assert_eq!(states.len(), 2);
    assert_eq!(value_f32(&dbg, root), 0.0);
    let message = dbg.api().messages().iter().find(|m| m.severity == MessageSeverity::Medium).unwrap();
    assert!(message.description.contains("not supported"), "{}", message.description);
}

#[test]
fn test_registered_ext_inst_is_dispatched() {
    fn double(ctx: &mut crate::extinst::ExtInstContext<'_>, args: &[crate::val::ShaderVariable]) -> anyhow::Result<crate::val::ShaderVariable> {
        let mut out = ctx.result();
        out.set_float(0, args[0].float(0) * 2.0);
        Ok(out)
    }

    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let x = b.constant_f32(4.0);
    let set = b.ext_inst_import("Test.double");
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let doubled = b.ext_inst(f32t, set, 1, &[x]);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let program = b.finish();

    let mut registry = ExtInstRegistry::new();
    registry.register_function("Test.double", 1, "Double", double);
    let mut dbg = Debugger::begin_debug(
        &program,
        DebugSetup::default(),
        CaptureApi::new(),
        Arc::new(registry),
        DebugConfig::default(),
    )
    .unwrap();
    dbg.continue_debug();
    assert_eq!(value_f32(&dbg, doubled), 8.0);
    assert!(dbg.api().messages().is_empty());
}
