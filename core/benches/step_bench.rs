use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use shdbg_core::api::{DerivativeDeltas, InputSlot};
use shdbg_core::program::{BinaryOp, Decoration, DerivativeOp, Merge, Op, ShaderStage, StorageClass};
use shdbg_core::{CaptureApi, DebugConfig, DebugSetup, Debugger, ExtInstRegistry, Program, ProgramBuilder};

/// `for (i = 0; i < n; i++) acc += i;` with loads and stores through locals.
fn counting_loop(n: i32) -> Program {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let int = b.type_sint();
    let bool_t = b.type_bool();
    let zero = b.constant_i32(0);
    let one = b.constant_i32(1);
    let limit = b.constant_i32(n);

    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let i = b.variable(int, Some(zero));
    let acc = b.variable(int, Some(zero));
    let header = b.label();
    let body = b.label();
    let exit = b.label();
    b.branch(header);

    b.place_block(header);
    let cur = b.load(int, i);
    let cond = b.binary(BinaryOp::SLessThan, bool_t, cur, limit);
    b.set_merge(Merge::Loop { merge: exit, continue_target: body });
    b.branch_conditional(cond, body, exit);

    b.place_block(body);
    let sum = b.load(int, acc);
    let sum = b.binary(BinaryOp::IAdd, int, sum, cur);
    b.store(acc, sum);
    let next = b.binary(BinaryOp::IAdd, int, cur, one);
    b.store(i, next);
    b.branch(header);

    b.place_block(exit);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Compute, &[]);
    b.finish()
}

/// A pixel shader taking fine and coarse derivatives of one input.
fn quad_derivatives() -> Program {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let input = b.global(StorageClass::Input, f32t, None);
    b.decorate(input, Decoration::Location(0));
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let v = b.load(f32t, input);
    for kind in [DerivativeOp::DpdxFine, DerivativeOp::DpdyFine, DerivativeOp::DpdxCoarse, DerivativeOp::Fwidth] {
        b.emit(f32t, Op::Derivative { kind, operand: v });
    }
    b.ret();
    b.entry_point(main, "main", ShaderStage::Pixel, &[input]);
    b.finish()
}

fn step_bench(c: &mut Criterion) {
    let registry = Arc::new(ExtInstRegistry::new());

    let program = counting_loop(64);
    c.bench_function("single_lane_loop_64", |b| {
        b.iter(|| {
            let mut dbg = Debugger::begin_debug(
                &program,
                DebugSetup::default(),
                CaptureApi::new(),
                registry.clone(),
                DebugConfig::default(),
            )
            .unwrap();
            black_box(dbg.continue_debug().len());
        })
    });

    let program = counting_loop(16);
    let setup = DebugSetup { workgroup_size: Some([8, 8, 1]), ..DebugSetup::default() };
    c.bench_function("workgroup_64_lanes_loop_16", |b| {
        b.iter(|| {
            let mut dbg = Debugger::begin_debug(
                &program,
                setup.clone(),
                CaptureApi::new(),
                registry.clone(),
                DebugConfig::default(),
            )
            .unwrap();
            black_box(dbg.continue_debug().len());
        })
    });

    let program = quad_derivatives();
    let slot = InputSlot::Location { location: 0, component: 0 };
    let api = CaptureApi::new()
        .with_input(slot, 0, &[1.0])
        .with_derivatives(slot, DerivativeDeltas::uniform([0.5, 0.0, 0.0, 0.0], [0.25, 0.0, 0.0, 0.0]));
    c.bench_function("pixel_quad_derivatives", |b| {
        b.iter(|| {
            let mut dbg = Debugger::begin_debug(
                &program,
                DebugSetup::default(),
                api.clone(),
                registry.clone(),
                DebugConfig::default(),
            )
            .unwrap();
            black_box(dbg.continue_debug());
        })
    });
}

criterion_group!(benches, step_bench);
criterion_main!(benches);
