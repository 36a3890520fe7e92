use super::*;

fn trivial(b: &mut ProgramBuilder) -> Id {
    let void = b.type_void();
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    b.ret();
    main
}

fn error_of(program: &Program) -> String {
    validate(program).unwrap_err().to_string()
}

#[test]
fn test_builder_allocates_from_one_and_dedups_types() {
    let mut b = ProgramBuilder::new();
    let f32t = b.type_f32();
    assert_eq!(f32t, Id(1));
    assert_eq!(b.type_f32(), f32t);
    let vec4 = b.type_vector(f32t, 4);
    assert_eq!(b.type_vector(f32t, 4), vec4);
    let one = b.constant_f32(1.0);
    assert_eq!(b.constant_f32(1.0), one);
    assert_ne!(b.constant_f32(2.0), one);
    let set = b.ext_inst_import("GLSL.std.450");
    assert_eq!(b.ext_inst_import("GLSL.std.450"), set);
    let program = b.finish();
    assert_eq!(program.types.len(), 2);
    assert_eq!(program.constants.len(), 2);
    assert_eq!(program.id_bound(), set.raw() + 1);
}

#[test]
fn test_validate_accepts_builder_output() {
    let mut b = ProgramBuilder::new();
    let main = trivial(&mut b);
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    assert_eq!(validate(&b.finish()), Ok(()));
}

#[test]
fn test_validate_requires_an_entry_point() {
    let mut b = ProgramBuilder::new();
    trivial(&mut b);
    assert_eq!(error_of(&b.finish()), "invalid program: no entry point");
}

#[test]
fn test_validate_rejects_zero_workgroup_dimension() {
    let mut b = ProgramBuilder::new();
    let main = trivial(&mut b);
    b.entry_point(main, "main", ShaderStage::Compute, &[]);
    b.set_workgroup_size(main, [8, 0, 1]);
    assert!(error_of(&b.finish()).contains("zero dimension"));
}

#[test]
fn test_validate_block_structure() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let one = b.constant_f32(1.0);
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    b.binary(BinaryOp::FAdd, f32t, one, one);
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let err = error_of(&b.finish());
    assert!(err.contains("block ends with Binary"), "{err}");

    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    b.ret();
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    assert!(error_of(&b.finish()).contains("in the middle of a block"));
}

#[test]
fn test_validate_merge_targets_stay_in_function() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let (helper, _) = b.begin_function("helper", void, &[]);
    let foreign = b.begin_block();
    b.ret();
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    b.set_merge(Merge::Selection { merge: foreign });
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let _ = helper;
    assert!(error_of(&b.finish()).contains("not in this function"));
}

#[test]
fn test_validate_call_arity_and_operands() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let (callee, _) = b.begin_function("callee", void, &[f32t, f32t]);
    b.begin_block();
    b.ret();
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let one = b.constant_f32(1.0);
    b.call(void, callee, &[one]);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    assert!(error_of(&b.finish()).contains("call passes 1 arguments to 2 parameters"));

    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    b.emit(f32t, Op::CopyObject { operand: Id(99) });
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let program = b.finish();
    let err = validate(&program).unwrap_err();
    assert_eq!(err.id, Some(Id(99)));
    assert!(err.message.contains("undefined id"));
}

#[test]
fn test_validate_local_storage_class() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let ptr = b.type_pointer(StorageClass::Private, f32t);
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    b.emit(ptr, Op::Variable { storage: StorageClass::Private, initializer: None });
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    assert!(error_of(&b.finish()).contains("must use Function storage"));
}

#[test]
fn test_index_flattens_functions_in_order() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let (helper, _) = b.begin_function("helper", void, &[]);
    b.begin_block();
    b.emit_void(Op::Nop);
    b.ret();
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    b.call(void, helper, &[]);
    let tail = b.label();
    b.branch(tail);
    b.place_block(tail);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let index = ProgramIndex::build(&b.finish(), &[]).unwrap();

    assert_eq!(index.instructions().len(), 5);
    let info = index.function(helper).unwrap();
    assert_eq!((info.start, info.end), (0, 2));
    let info = index.function(main).unwrap();
    assert_eq!((info.start, info.end, info.name.as_str()), (2, 5, "main"));
    assert_eq!(index.block_start(tail).unwrap(), 4);
    assert_eq!(index.function_at(3).unwrap().id, main);
    assert_eq!(index.instruction(4).unwrap().block, tail);
    assert_eq!(index.entry_point(None).unwrap().function, main);
    assert!(index.entry_point(Some("other")).is_none());
}

#[test]
fn test_index_materializes_constants() {
    let mut b = ProgramBuilder::new();
    let f32t = b.type_f32();
    let vec3 = b.type_vector(f32t, 3);
    let parts: Vec<Id> = [1.0, 2.0, 3.0].iter().map(|v| b.constant_f32(*v)).collect();
    let v = b.constant_composite(vec3, &parts);
    let null = b.constant_null(vec3);
    let neg = b.constant_i32(-5);
    let main = trivial(&mut b);
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let index = ProgramIndex::build(&b.finish(), &[]).unwrap();

    let v = index.constant(v).unwrap();
    assert_eq!((v.f32v(0), v.f32v(1), v.f32v(2)), (1.0, 2.0, 3.0));
    assert_eq!(index.constant(null).unwrap().f32v(2), 0.0);
    assert_eq!(index.constant(neg).unwrap().i32v(0), -5);
}

#[test]
fn test_specialization_overrides_by_spec_id() {
    let mut b = ProgramBuilder::new();
    let f32t = b.type_f32();
    let u32t = b.type_uint();
    let scale = b.spec_constant(f32t, ConstantValue::Float(1.0), 3);
    let count = b.spec_constant(u32t, ConstantValue::UInt(4), 7);
    let main = trivial(&mut b);
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let program = b.finish();

    let defaults = ProgramIndex::build(&program, &[]).unwrap();
    assert_eq!(defaults.constant(scale).unwrap().f32v(0), 1.0);
    assert_eq!(defaults.constant(count).unwrap().u32v(0), 4);

    let overrides = [SpecConstant { spec_id: 3, value: 2.5f32.to_bits() as u64 }];
    let index = ProgramIndex::build(&program, &overrides).unwrap();
    assert_eq!(index.constant(scale).unwrap().f32v(0), 2.5);
    assert_eq!(index.constant(count).unwrap().u32v(0), 4);
}

#[test]
fn test_natural_layout() {
    let mut b = ProgramBuilder::new();
    let f32t = b.type_f32();
    let vec3 = b.type_vector(f32t, 3);
    let mat3 = b.type_matrix(vec3, 3);
    let packed = b.type_struct(&[vec3, f32t]);
    let padded = b.type_struct(&[f32t, vec3]);
    let floats = b.type_array(f32t, 4);
    let main = trivial(&mut b);
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let index = ProgramIndex::build(&b.finish(), &[]).unwrap();

    assert_eq!(index.byte_size(vec3).unwrap(), 12);
    assert_eq!(index.align_of(vec3).unwrap(), 16);
    assert_eq!(index.member_offset(packed, 1).unwrap(), 12);
    assert_eq!(index.byte_size(packed).unwrap(), 16);
    assert_eq!(index.member_offset(padded, 1).unwrap(), 16);
    assert_eq!(index.byte_size(padded).unwrap(), 32);
    assert_eq!(index.array_stride(floats).unwrap(), 4);
    assert_eq!(index.byte_size(mat3).unwrap(), 48);
    assert!(index.member_offset(packed, 2).is_err());
}

#[test]
fn test_decorated_layout() {
    let mut b = ProgramBuilder::new();
    let f32t = b.type_f32();
    let vec2 = b.type_vector(f32t, 2);
    let mat2 = b.type_matrix(vec2, 2);
    let floats = b.type_array(f32t, 4);
    let block = b.type_struct(&[floats, mat2]);
    b.decorate(floats, Decoration::ArrayStride(16));
    b.decorate_member(block, 0, Decoration::Offset(0));
    b.decorate_member(block, 1, Decoration::Offset(64));
    b.decorate_member(block, 1, Decoration::MatrixStride(16));
    b.decorate_member(block, 1, Decoration::RowMajor);
    let main = trivial(&mut b);
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let index = ProgramIndex::build(&b.finish(), &[]).unwrap();

    assert_eq!(index.array_stride(floats).unwrap(), 16);
    assert_eq!(index.member_offset(block, 1).unwrap(), 64);
    assert_eq!(
        index.member_matrix_layout(block, 1).unwrap(),
        Some(MatrixLayout { stride: 16, row_major: true })
    );
    assert_eq!(index.member_matrix_layout(block, 0).unwrap(), None);
    assert_eq!(index.byte_size(block).unwrap(), 96);
}

#[test]
fn test_death_offsets() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let one = b.constant_f32(1.0);
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let a = b.binary(BinaryOp::FAdd, f32t, one, one);
    let unused = b.binary(BinaryOp::FMul, f32t, a, a);
    b.emit_void(Op::Nop);
    b.binary(BinaryOp::FSub, f32t, a, one);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let index = ProgramIndex::build(&b.finish(), &[]).unwrap();

    assert_eq!(index.death_offset(a), Some(3));
    assert_eq!(index.death_offset(unused), Some(1));
    assert_eq!(index.defining_function(a), Some(main));
}

#[test]
fn test_values_read_in_a_loop_live_until_the_back_edge() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let bool_t = b.type_bool();
    let one = b.constant_f32(1.0);
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let before = b.binary(BinaryOp::FAdd, f32t, one, one);
    let header = b.label();
    let body = b.label();
    let exit = b.label();
    b.branch(header);
    b.place_block(header);
    let cond = b.binary(BinaryOp::FOrdLessThan, bool_t, before, one);
    b.set_merge(Merge::Loop { merge: exit, continue_target: body });
    b.branch_conditional(cond, body, exit);
    b.place_block(body);
    b.emit_void(Op::Nop);
    b.branch(header);
    b.place_block(exit);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let index = ProgramIndex::build(&b.finish(), &[]).unwrap();

    // header at 2, back edge at 5
    assert_eq!(index.block_start(header).unwrap(), 2);
    assert_eq!(index.death_offset(before), Some(5));
    assert_eq!(index.block_merge(header), Some(Merge::Loop { merge: exit, continue_target: body }));
}

#[test]
fn test_program_from_json() {
    let json = r#"{
        "types": [
            { "id": 1, "kind": "void" },
            { "id": 2, "kind": "float", "width": 32 },
            { "id": 3, "kind": "vector", "component": 2, "count": 2 }
        ],
        "constants": [
            { "id": 4, "ty": 2, "value": { "float": 0.5 } },
            { "id": 5, "ty": 3, "value": { "composite": [4, 4] } }
        ],
        "names": [ { "id": 6, "name": "copy" } ],
        "functions": [ {
            "id": 7,
            "name": "main",
            "return_type": 1,
            "blocks": [ {
                "id": 8,
                "instructions": [
                    { "result": 6, "result_type": 3, "op": "copy_object", "operand": 5 },
                    { "op": "return" }
                ]
            } ]
        } ],
        "entry_points": [ { "function": 7, "name": "main", "stage": "fragment" } ]
    }"#;
    let program = Program::from_json(json).unwrap();
    assert_eq!(program.entry_points[0].stage, ShaderStage::Pixel);
    assert_eq!(program.entry_points[0].workgroup_size, [1, 1, 1]);
    let index = ProgramIndex::build(&program, &[]).unwrap();
    assert_eq!(index.debug_name(Id(6)), "copy");
    assert_eq!(index.value_type(Id(6)), Some(Id(3)));
    assert_eq!(index.constant(Id(5)).unwrap().f32v(1), 0.5);

    let err = Program::from_json("{ \"types\": 3 }").unwrap_err();
    assert!(err.to_string().contains("program JSON"));
}

#[test]
fn test_program_survives_json() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let out = b.global(StorageClass::Output, f32t, None);
    b.decorate(out, Decoration::Location(0));
    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let two = b.constant_f32(2.0);
    b.store(out, two);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Pixel, &[out]);
    let program = b.finish();

    let text = serde_json::to_string(&program).unwrap();
    assert_eq!(Program::from_json(&text).unwrap(), program);
}
