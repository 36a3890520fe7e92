use super::*;

const SLOT: InputSlot = InputSlot::Location { location: 0, component: 0 };

struct DerivativeProgram {
    program: Program,
    value: Id,
    results: Vec<Id>,
}

/// Pixel shader loading the float input at location 0 and taking each of
/// `kinds` of it in turn.
fn derivative_program(kinds: &[DerivativeOp]) -> DerivativeProgram {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let input = b.global(StorageClass::Input, f32t, None);
    b.decorate(input, Decoration::Location(0));
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let value = b.load(f32t, input);
    let results = kinds
        .iter()
        .map(|kind| b.emit(f32t, Op::Derivative { kind: *kind, operand: value }))
        .collect();
    b.ret();
    b.entry_point(main, "main", ShaderStage::Pixel, &[input]);
    DerivativeProgram { program: b.finish(), value, results }
}

/// f(x, y) = 3x - 2y + 1 at quad position `q`.
fn affine(q: u32) -> f64 {
    let (x, y) = ((q % 2) as f64, (q / 2) as f64);
    3.0 * x - 2.0 * y + 1.0
}

fn affine_api(active: u32) -> CaptureApi {
    CaptureApi::new()
        .with_input(SLOT, active, &[affine(active)])
        .with_derivatives(SLOT, DerivativeDeltas::uniform([3.0, 0.0, 0.0, 0.0], [-2.0, 0.0, 0.0, 0.0]))
}

#[test]
fn test_affine_input_derivatives_from_any_active_lane() {
    let kinds = [
        DerivativeOp::DpdxCoarse,
        DerivativeOp::DpdyCoarse,
        DerivativeOp::DpdxFine,
        DerivativeOp::DpdyFine,
        DerivativeOp::Fwidth,
    ];
    let DerivativeProgram { program, value, results } = derivative_program(&kinds);
    for active in 0..4 {
        let setup = DebugSetup { active_lane: active, ..DebugSetup::default() };
        let mut dbg = start(&program, setup, affine_api(active), DebugConfig::default());
        assert_eq!(dbg.trace().lane_count, 4);
        assert_eq!(dbg.trace().inputs[0].f32v(0) as f64, affine(active));
        let states = dbg.continue_debug();
        assert_eq!(states.len(), kinds.len() + 2, "active {active}");

        for lane in dbg.lanes() {
            assert_eq!(lane.value(value).unwrap().f32v(0) as f64, affine(lane.lane()));
        }
        let got: Vec<f32> = results.iter().map(|id| value_f32(&dbg, *id)).collect();
        assert_eq!(got, vec![3.0, -2.0, 3.0, -2.0, 5.0], "active {active}");
        assert!(dbg.api().messages().is_empty());
    }
}

#[test]
fn test_helper_lanes_are_marked() {
    let DerivativeProgram { program, .. } = derivative_program(&[]);
    let setup = DebugSetup { active_lane: 2, ..DebugSetup::default() };
    let dbg = start(&program, setup, affine_api(2), DebugConfig::default());
    let helpers: Vec<bool> = dbg.lanes().iter().map(|l| l.is_helper()).collect();
    assert_eq!(helpers, vec![true, true, false, true]);
}

#[test]
fn test_partial_quad_derivative_is_zero_without_blocking() {
    let DerivativeProgram { program, results, .. } = derivative_program(&[DerivativeOp::DpdxFine]);
    let setup = DebugSetup { active_lane: 2, inactive_lanes: vec![3], ..DebugSetup::default() };
    let config = DebugConfig { derivative_policy: DerivativePolicy::Report, ..DebugConfig::default() };
    let mut dbg = start(&program, setup, affine_api(2), config);
    assert_eq!(dbg.lanes()[3].status(), LaneStatus::Inactive);

    let states = dbg.continue_debug();
    assert_eq!(states.len(), 3);
    assert!(states.iter().all(|s| s.executed[2].is_some() && s.executed[3].is_none()));
    assert!(states.iter().all(|s| !s.flags.stalled));
    assert_eq!(value_f32(&dbg, results[0]), 0.0);
    // lanes 0 and 1 still see a full row
    assert_eq!(dbg.lanes()[0].value(results[0]).unwrap().f32v(0), 3.0);
    let message = dbg.api().messages().iter().find(|m| m.severity == MessageSeverity::Low).unwrap();
    assert!(message.description.contains("derivative"), "{}", message.description);
}

#[test]
fn test_silent_policy_adds_no_diagnostic() {
    let DerivativeProgram { program, results, .. } = derivative_program(&[DerivativeOp::DpdyCoarse]);
    let setup = DebugSetup { active_lane: 0, inactive_lanes: vec![2], ..DebugSetup::default() };
    let mut dbg = start(&program, setup, affine_api(0), DebugConfig::default());
    dbg.continue_debug();
    assert_eq!(value_f32(&dbg, results[0]), 0.0);
    assert!(dbg.api().messages().is_empty());
}

#[test]
fn test_frag_coord_defaults_to_one_pixel_steps() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let vec4 = b.type_vector(f32t, 4);
    let coord = b.global(StorageClass::Input, vec4, None);
    b.decorate(coord, Decoration::BuiltIn(ShaderBuiltin::FragCoord));
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let loaded = b.load(vec4, coord);
    let dx = b.emit(vec4, Op::Derivative { kind: DerivativeOp::Dpdx, operand: loaded });
    b.ret();
    b.entry_point(main, "main", ShaderStage::Pixel, &[coord]);
    let program = b.finish();

    let slot = InputSlot::BuiltIn(ShaderBuiltin::FragCoord);
    let api = CaptureApi::new().with_input(slot, 3, &[10.5, 20.5, 0.25, 1.0]);
    let setup = DebugSetup { active_lane: 3, ..DebugSetup::default() };
    let mut dbg = start(&program, setup, api, DebugConfig::default());
    dbg.continue_debug();

    let top_left = dbg.lanes()[0].value(loaded).unwrap();
    assert_eq!((top_left.f32v(0), top_left.f32v(1)), (9.5, 19.5));
    let dx = dbg.active_lane().value(dx).unwrap();
    assert_eq!((dx.f32v(0), dx.f32v(1), dx.f32v(2)), (1.0, 0.0, 0.0));
}

#[test]
fn test_flat_inputs_are_not_interpolated() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let input = b.global(StorageClass::Input, f32t, None);
    b.decorate(input, Decoration::Location(0));
    b.decorate(input, Decoration::Flat);
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let value = b.load(f32t, input);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Pixel, &[input]);
    let program = b.finish();

    let mut dbg = start(&program, DebugSetup::default(), affine_api(0), DebugConfig::default());
    dbg.continue_debug();
    for lane in dbg.lanes() {
        assert_eq!(lane.value(value).unwrap().f32v(0), 1.0);
    }
}

#[test]
fn test_missing_input_is_reported() {
    let DerivativeProgram { program, .. } = derivative_program(&[]);
    let dbg = start(&program, DebugSetup::default(), CaptureApi::new(), DebugConfig::default());
    let message = &dbg.api().messages()[0];
    assert_eq!(message.severity, MessageSeverity::Medium);
    assert!(message.description.contains("location 0"), "{}", message.description);
}

#[test]
fn test_helper_lane_stores_do_not_reach_the_buffer() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let input = b.global(StorageClass::Input, f32t, None);
    b.decorate(input, Decoration::Location(0));
    let block = b.type_struct(&[f32t]);
    b.decorate(block, Decoration::Block);
    b.decorate_member(block, 0, Decoration::Offset(0));
    let buffer = b.global(StorageClass::StorageBuffer, block, None);
    b.decorate(buffer, Decoration::DescriptorSet(0));
    b.decorate(buffer, Decoration::Binding(0));
    let member_ptr = b.type_pointer(StorageClass::StorageBuffer, f32t);
    let zero = b.constant_u32(0);

    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let value = b.load(f32t, input);
    let ptr = b.access_chain(member_ptr, buffer, &[zero]);
    b.store(ptr, value);
    let loaded = b.load(f32t, ptr);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Pixel, &[input]);
    let program = b.finish();

    let slot = BindingSlot::new(0, 0);
    for active in [0, 3] {
        let api = affine_api(active).with_buffer(slot, vec![0u8; 4]);
        let setup = DebugSetup { active_lane: active, ..DebugSetup::default() };
        let mut dbg = start(&program, setup, api, DebugConfig::default());
        dbg.continue_debug();

        let expected = affine(active) as f32;
        assert_eq!(value_f32(&dbg, loaded), expected, "active {active}");
        let bytes = dbg.api().buffer(slot).unwrap();
        assert_eq!(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), expected, "active {active}");
    }
}

#[test]
fn test_only_active_lane_changes_are_recorded_on_request() {
    let DerivativeProgram { program, value, .. } = derivative_program(&[]);

    let mut dbg = start(&program, DebugSetup::default(), affine_api(0), DebugConfig::default());
    let load = dbg.step().unwrap();
    let lanes: Vec<u32> = load.changes.iter().filter(|c| c.id == value).map(|c| c.lane).collect();
    assert_eq!(lanes, vec![0, 1, 2, 3]);

    let config = DebugConfig { record_all_lanes: false, ..DebugConfig::default() };
    let setup = DebugSetup { active_lane: 1, ..DebugSetup::default() };
    let mut dbg = start(&program, setup, affine_api(1), config);
    let load = dbg.step().unwrap();
    assert!(!load.changes.is_empty());
    assert!(load.changes.iter().all(|c| c.lane == 1));
    // the other lanes still executed
    assert!(load.executed.iter().all(Option::is_some));
    assert_eq!(dbg.lanes()[3].value(value).unwrap().f32v(0) as f64, affine(3));
}

#[test]
fn test_derivative_ignores_values_from_an_earlier_iteration() {
    // acc = 0; for (n = 0; n < limit; n += 1) { acc += x; d = dFdxFine(acc); }
    // The right column runs two iterations, the left column one.
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let bool_t = b.type_bool();
    let f32t = b.type_f32();
    let zero = b.constant_f32(0.0);
    let one = b.constant_f32(1.0);
    let x_in = b.global(StorageClass::Input, f32t, None);
    b.decorate(x_in, Decoration::Location(0));
    let limit_in = b.global(StorageClass::Input, f32t, None);
    b.decorate(limit_in, Decoration::Location(1));

    let (main, _) = b.begin_function("main", void, &[]);
    let entry = b.begin_block();
    let header = b.label();
    let body = b.label();
    let latch = b.label();
    let merge = b.label();
    let x = b.load(f32t, x_in);
    let limit = b.load(f32t, limit_in);
    b.branch(header);

    b.place_block(header);
    let next_n = b.id();
    let next_acc = b.id();
    let n = b.emit(
        f32t,
        Op::Phi { incoming: vec![PhiSource { value: zero, parent: entry }, PhiSource { value: next_n, parent: latch }] },
    );
    let acc = b.emit(
        f32t,
        Op::Phi { incoming: vec![PhiSource { value: zero, parent: entry }, PhiSource { value: next_acc, parent: latch }] },
    );
    let cond = b.binary(BinaryOp::FOrdLessThan, bool_t, n, limit);
    b.set_merge(Merge::Loop { merge, continue_target: latch });
    b.branch_conditional(cond, body, merge);

    b.place_block(body);
    let sum = b.binary(BinaryOp::FAdd, f32t, acc, x);
    let d = b.emit(f32t, Op::Derivative { kind: DerivativeOp::DpdxFine, operand: sum });
    let inc = b.binary(BinaryOp::FAdd, f32t, n, one);
    b.branch(latch);

    b.place_block(latch);
    b.branch(header);

    b.place_block(merge);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Pixel, &[x_in, limit_in]);
    let mut program = b.finish();
    for block in &mut program.functions[0].blocks {
        for inst in &mut block.instructions {
            if let Op::Phi { incoming } = &mut inst.op {
                for src in incoming.iter_mut() {
                    if src.value == next_n {
                        src.value = inc;
                    } else if src.value == next_acc {
                        src.value = sum;
                    }
                }
            }
        }
    }

    let x_slot = InputSlot::Location { location: 0, component: 0 };
    let limit_slot = InputSlot::Location { location: 1, component: 0 };
    let api = CaptureApi::new()
        .with_input(x_slot, 1, &[4.0])
        .with_derivatives(x_slot, DerivativeDeltas::uniform([3.0, 0.0, 0.0, 0.0], [0.0; 4]))
        .with_input(limit_slot, 1, &[2.0])
        .with_derivatives(limit_slot, DerivativeDeltas::uniform([1.0, 0.0, 0.0, 0.0], [0.0; 4]));
    let setup = DebugSetup { active_lane: 1, ..DebugSetup::default() };
    let mut dbg = start(&program, setup, api, DebugConfig::default());

    let mut derivatives = Vec::new();
    while let Some(state) = dbg.step() {
        derivatives.extend(
            state
                .changes_for_lane(1)
                .filter(|c| c.id == d)
                .filter_map(|c| c.after.as_ref().map(|v| v.f32v(0))),
        );
    }
    // first iteration: 4 - 1; second: the left neighbour left the loop
    assert_eq!(derivatives, vec![3.0, 0.0]);
    assert_eq!(dbg.active_lane().value(sum).unwrap().f32v(0), 8.0);
    assert_eq!(dbg.lanes()[0].value(sum).unwrap().f32v(0), 1.0);
    assert!(dbg.lanes().iter().all(|l| l.status() == LaneStatus::Finished));
}
