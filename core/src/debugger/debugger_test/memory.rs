use super::*;

/// A storage buffer `{ vec4 pad; uint value; }` at set 0 binding 1.
struct BufferProgram {
    program: Program,
    buffer: Id,
    loaded: Id,
}

fn buffer_program() -> BufferProgram {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let u32t = b.type_uint();
    let vec4 = b.type_vector(f32t, 4);
    let block = b.type_struct(&[vec4, u32t]);
    b.decorate(block, Decoration::Block);
    b.decorate_member(block, 0, Decoration::Offset(0));
    b.decorate_member(block, 1, Decoration::Offset(16));
    let buffer = b.global(StorageClass::StorageBuffer, block, None);
    b.decorate(buffer, Decoration::DescriptorSet(0));
    b.decorate(buffer, Decoration::Binding(1));
    b.name(buffer, "data");
    let member_ptr = b.type_pointer(StorageClass::StorageBuffer, u32t);
    let one = b.constant_u32(1);
    let seven = b.constant_u32(7);

    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let write_ptr = b.access_chain(member_ptr, buffer, &[one]);
    b.store(write_ptr, seven);
    let read_ptr = b.access_chain(member_ptr, buffer, &[one]);
    let loaded = b.load(u32t, read_ptr);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Compute, &[]);
    BufferProgram { program: b.finish(), buffer, loaded }
}

#[test]
fn test_buffer_store_is_visible_through_another_pointer() {
    let BufferProgram { program, buffer, loaded } = buffer_program();
    let slot = BindingSlot::new(0, 1);
    let api = CaptureApi::new().with_buffer(slot, vec![0u8; 32]);
    let mut dbg = start(&program, DebugSetup::default(), api, DebugConfig::default());
    assert_eq!(dbg.trace().resources.len(), 1);
    assert!(dbg.trace().resources[0].writable);

    let states = dbg.continue_debug();
    assert_eq!(&dbg.api().buffer(slot).unwrap()[16..20], &7u32.to_le_bytes());
    assert_eq!(&dbg.api().buffer(slot).unwrap()[..16], &[0u8; 16]);
    assert_eq!(dbg.active_lane().value(loaded).unwrap().u32v(0), 7);

    let store = states[1].changes.iter().find(|c| c.memory).unwrap();
    assert_eq!(store.id, buffer);
    assert_eq!(store.instruction, 1);
    assert_eq!(store.before.as_ref().unwrap().u32v(0), 0);
    assert_eq!(store.after.as_ref().unwrap().u32v(0), 7);
}

#[test]
fn test_missing_buffer_reads_zero_with_diagnostic() {
    let BufferProgram { program, loaded, .. } = buffer_program();
    let mut dbg = start(&program, DebugSetup::default(), CaptureApi::new(), DebugConfig::default());
    let states = dbg.continue_debug();
    assert_eq!(states.len(), 5);
    assert_eq!(dbg.active_lane().value(loaded).unwrap().u32v(0), 0);
    assert!(dbg.api().messages().iter().any(|m| m.severity == MessageSeverity::High));
}

/// A uniform block `{ float scale; uint count; }` at set 0 binding 0.
fn constant_block_program() -> (Program, Id, Id) {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let u32t = b.type_uint();
    let block = b.type_struct(&[f32t, u32t]);
    b.decorate(block, Decoration::Block);
    b.decorate_member(block, 0, Decoration::Offset(0));
    b.decorate_member(block, 1, Decoration::Offset(4));
    let ubo = b.global(StorageClass::Uniform, block, None);
    b.decorate(ubo, Decoration::DescriptorSet(0));
    b.decorate(ubo, Decoration::Binding(0));
    let scale_ptr = b.type_pointer(StorageClass::Uniform, f32t);
    let zero = b.constant_u32(0);
    let ten = b.constant_f32(10.0);

    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let ptr = b.access_chain(scale_ptr, ubo, &[zero]);
    let scale = b.load(f32t, ptr);
    b.store(ptr, ten);
    let again = b.load(f32t, ptr);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    (b.finish(), scale, again)
}

#[test]
fn test_constant_block_is_read_once_and_read_only() {
    let (program, scale, again) = constant_block_program();
    let mut bytes = 2.5f32.to_le_bytes().to_vec();
    bytes.extend(3u32.to_le_bytes());
    let api = CaptureApi::new().with_buffer(BindingSlot::new(0, 0), bytes);
    let mut dbg = start(&program, DebugSetup::default(), api, DebugConfig::default());

    let block = &dbg.trace().constant_blocks[0];
    assert_eq!(block.members[0].f32v(0), 2.5);
    assert_eq!(block.members[1].u32v(0), 3);

    dbg.continue_debug();
    assert_eq!(value_f32(&dbg, scale), 2.5);
    assert_eq!(value_f32(&dbg, again), 2.5);
    let message = dbg.api().messages().iter().find(|m| m.severity == MessageSeverity::Medium).unwrap();
    assert!(message.description.contains("read-only"), "{}", message.description);
}

#[test]
fn test_unbound_constant_block_is_zero() {
    let (program, scale, _) = constant_block_program();
    let mut dbg = start(&program, DebugSetup::default(), CaptureApi::new(), DebugConfig::default());
    assert!(dbg.api().messages().iter().any(|m| m.description.contains("no data bound")));
    dbg.continue_debug();
    assert_eq!(value_f32(&dbg, scale), 0.0);
}

#[test]
fn test_callee_writes_through_pointer_to_caller_local() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let local_ptr = b.type_pointer(StorageClass::Function, f32t);
    let value = b.constant_f32(4.25);

    let (set_value, params) = b.begin_function("set_value", void, &[local_ptr]);
    b.begin_block();
    b.store(params[0], value);
    b.ret();

    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let local = b.variable(f32t, None);
    b.call(void, set_value, &[local]);
    let read = b.load(f32t, local);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let program = b.finish();

    let (dbg, states) = run_single(&program);
    assert_eq!(value_f32(&dbg, read), 4.25);
    // variable, call, store, return, load, return
    assert_eq!(states.len(), 6);
    assert_eq!(states[1].callstack, vec!["main".to_string(), "set_value".to_string()]);
    let store = states[2].changes.iter().find(|c| c.memory).unwrap();
    assert_eq!(store.id, local);
    assert!(states[3].flags.function_return);
    assert!(!states[3].flags.finished);
}

#[test]
fn test_private_aliases_share_storage() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let vec4 = b.type_vector(f32t, 4);
    let global = b.global(StorageClass::Private, vec4, None);
    let component_ptr = b.type_pointer(StorageClass::Private, f32t);
    let two = b.constant_u32(2);
    let value = b.constant_f32(-1.5);

    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let a = b.access_chain(component_ptr, global, &[two]);
    let c = b.access_chain(component_ptr, global, &[two]);
    b.store(a, value);
    let read = b.load(f32t, c);
    let whole = b.load(vec4, global);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let program = b.finish();

    let (dbg, _) = run_single(&program);
    assert_eq!(value_f32(&dbg, read), -1.5);
    let whole = dbg.active_lane().value(whole).unwrap();
    assert_eq!(whole.f32v(2), -1.5);
    assert_eq!(whole.f32v(0), 0.0);
    assert_eq!(dbg.active_lane().private_value(global).unwrap().f32v(2), -1.5);
}

#[test]
fn test_out_of_range_index_is_clamped_and_reported() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let arr = b.type_array(f32t, 2);
    let one = b.constant_f32(1.0);
    let two = b.constant_f32(2.0);
    let init = b.constant_composite(arr, &[one, two]);
    let global = b.global(StorageClass::Private, arr, Some(init));
    let elem_ptr = b.type_pointer(StorageClass::Private, f32t);
    let five = b.constant_i32(5);

    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let ptr = b.access_chain(elem_ptr, global, &[five]);
    let read = b.load(f32t, ptr);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let program = b.finish();

    let (dbg, _) = run_single(&program);
    assert_eq!(value_f32(&dbg, read), 2.0);
    assert!(dbg.api().messages().iter().any(|m| m.description.contains("out of range")));

    let config = DebugConfig { clamp_indices: false, ..DebugConfig::default() };
    let mut dbg = start(&program, DebugSetup::default(), CaptureApi::new(), config);
    dbg.continue_debug();
    assert_eq!(value_f32(&dbg, read), 0.0);
}

#[test]
fn test_workgroup_memory_is_shared_across_a_barrier() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let u32t = b.type_uint();
    let arr = b.type_array(u32t, 4);
    let shared = b.global(StorageClass::Workgroup, arr, None);
    let index_var = b.global(StorageClass::Input, u32t, None);
    b.decorate(index_var, Decoration::BuiltIn(ShaderBuiltin::LocalInvocationIndex));
    let elem_ptr = b.type_pointer(StorageClass::Workgroup, u32t);
    let one = b.constant_u32(1);
    let four = b.constant_u32(4);
    let hundred = b.constant_u32(100);

    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let index = b.load(u32t, index_var);
    let mine = b.access_chain(elem_ptr, shared, &[index]);
    let stored = b.binary(BinaryOp::IAdd, u32t, index, hundred);
    b.store(mine, stored);
    b.emit_void(Op::ControlBarrier);
    let next = b.binary(BinaryOp::IAdd, u32t, index, one);
    let wrapped = b.binary(BinaryOp::UMod, u32t, next, four);
    let theirs = b.access_chain(elem_ptr, shared, &[wrapped]);
    let read = b.load(u32t, theirs);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Compute, &[index_var]);
    b.set_workgroup_size(main, [2, 2, 1]);
    let program = b.finish();

    let setup = DebugSetup { active_lane: 1, ..DebugSetup::default() };
    let mut dbg = start(&program, setup, CaptureApi::new(), DebugConfig::default());
    assert_eq!(dbg.trace().lane_count, 4);
    let states = dbg.continue_debug();
    for lane in dbg.lanes() {
        let expected = (lane.lane() + 1) % 4 + 100;
        assert_eq!(lane.value(read).unwrap().u32v(0), expected, "lane {}", lane.lane());
    }
    let barrier = states.iter().position(|s| s.lanes.iter().all(|l| *l == LaneStatus::AtBarrier)).unwrap();
    assert!(states[barrier + 1].executed.iter().all(Option::is_some));
    let shared = dbg.global().workgroup(shared).unwrap();
    assert_eq!(shared.members.iter().map(|m| m.u32v(0)).collect::<Vec<_>>(), vec![100, 101, 102, 103]);
}

#[test]
fn test_unclamped_out_of_range_store_is_dropped() {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let arr = b.type_array(f32t, 2);
    let one = b.constant_f32(1.0);
    let two = b.constant_f32(2.0);
    let nine = b.constant_f32(9.0);
    let init = b.constant_composite(arr, &[one, two]);
    let global = b.global(StorageClass::Private, arr, Some(init));
    let elem_ptr = b.type_pointer(StorageClass::Private, f32t);
    let five = b.constant_i32(5);

    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    let ptr = b.access_chain(elem_ptr, global, &[five]);
    b.store(ptr, nine);
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    let program = b.finish();

    let config = DebugConfig { clamp_indices: false, ..DebugConfig::default() };
    let mut dbg = start(&program, DebugSetup::default(), CaptureApi::new(), config);
    dbg.continue_debug();
    let stored = dbg.active_lane().private_value(global).unwrap();
    assert_eq!((stored.members[0].f32v(0), stored.members[1].f32v(0)), (1.0, 2.0));
    assert!(dbg.api().messages().iter().any(|m| m.description.contains("out of range")));

    // clamped, the same store lands in the last element
    let (dbg, _) = run_single(&program);
    let stored = dbg.active_lane().private_value(global).unwrap();
    assert_eq!((stored.members[0].f32v(0), stored.members[1].f32v(0)), (1.0, 9.0));
}
