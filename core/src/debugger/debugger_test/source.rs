use super::*;
use crate::debugger::ScopeTree;

struct ScopedProgram {
    program: Program,
    function_scope: Id,
    block_scope: Id,
    inlined_scope: Id,
}

/// ```text
/// void main() {          // function scope: x, y
///     float y = 2 + 3.5;
///     float x = y;
///     {                  // block scope: x
///         float x = y * 2;
///     }
///     helper();          // inlined, no variables
/// }
/// ```
fn scoped_program() -> ScopedProgram {
    let mut b = ProgramBuilder::new();
    let void = b.type_void();
    let f32t = b.type_f32();
    let two = b.constant_f32(2.0);
    let three_five = b.constant_f32(3.5);
    let unit = b.scope(ScopeKind::CompilationUnit, "shader.frag", None, None);
    let function_scope = b.scope(ScopeKind::Function, "main", Some(unit), None);
    let block_scope = b.scope(ScopeKind::Block, "", Some(function_scope), None);
    let site = b.inline_site(function_scope, 7);
    let inlined_scope = b.scope(ScopeKind::Function, "helper", Some(unit), Some(site));
    let outer_x = b.source_variable("x", function_scope);
    let y = b.source_variable("y", function_scope);
    let inner_x = b.source_variable("x", block_scope);

    let (main, _) = b.begin_function("main", void, &[]);
    b.begin_block();
    b.set_scope(Some(function_scope));
    let storage = b.variable(f32t, None);
    let sum = b.binary(BinaryOp::FAdd, f32t, two, three_five);
    b.store(storage, sum);
    b.emit_void(Op::DebugDeclare { variable: y, pointer: storage });
    b.emit_void(Op::DebugValue { variable: outer_x, value: sum });
    b.emit_void(Op::Nop);
    b.set_scope(Some(block_scope));
    let product = b.binary(BinaryOp::FMul, f32t, sum, two);
    b.emit_void(Op::DebugValue { variable: inner_x, value: product });
    b.emit_void(Op::Nop);
    b.set_scope(Some(inlined_scope));
    b.emit_void(Op::Nop);
    b.set_scope(Some(function_scope));
    b.ret();
    b.entry_point(main, "main", ShaderStage::Vertex, &[]);
    ScopedProgram { program: b.finish(), function_scope, block_scope, inlined_scope }
}

fn values(dbg: &mut Debugger<CaptureApi>) -> Vec<(String, f32)> {
    dbg.source_variables()
        .unwrap()
        .into_iter()
        .map(|v| (v.name, v.value.f32v(0)))
        .collect()
}

#[test]
fn test_source_variables_follow_scopes() {
    let ScopedProgram { program, .. } = scoped_program();
    let mut dbg = start(&program, DebugSetup::default(), CaptureApi::new(), DebugConfig::default());
    assert!(values(&mut dbg).is_empty());
    assert_eq!(dbg.trace().source_vars.len(), 3);

    dbg.run_until(&[Breakpoint::Instruction(5)]);
    assert_eq!(values(&mut dbg), vec![("x".to_string(), 5.5), ("y".to_string(), 5.5)]);

    // the block's x shadows the function's
    dbg.run_until(&[Breakpoint::Instruction(8)]);
    assert_eq!(values(&mut dbg), vec![("x".to_string(), 11.0), ("y".to_string(), 5.5)]);
}

#[test]
fn test_inlined_scope_extends_the_callstack() {
    let ScopedProgram { program, .. } = scoped_program();
    let mut dbg = start(&program, DebugSetup::default(), CaptureApi::new(), DebugConfig::default());
    let states = dbg.run_until(&[Breakpoint::Instruction(9)]);
    assert_eq!(states.last().unwrap().callstack, vec!["main".to_string(), "helper".to_string()]);
    assert_eq!(dbg.callstack(), vec!["main".to_string(), "helper".to_string()]);
    // the inlined body has no variables of its own and hides the caller's
    assert!(values(&mut dbg).is_empty());

    dbg.step();
    assert_eq!(dbg.callstack(), vec!["main".to_string()]);
}

#[test]
fn test_scope_tree_links() {
    let ScopedProgram { program, function_scope, block_scope, inlined_scope } = scoped_program();
    let dbg = start(&program, DebugSetup::default(), CaptureApi::new(), DebugConfig::default());
    let tree = ScopeTree::build(dbg.program().debug_info());

    let chain = tree.ancestors(block_scope);
    assert_eq!(&chain[..2], &[block_scope, function_scope]);
    assert_eq!(chain.len(), 3);
    assert_eq!(tree.ancestors(inlined_scope), vec![inlined_scope]);
    assert_eq!(tree.scope(inlined_scope).unwrap().inlined_at, Some((function_scope, 7)));
    assert_eq!(tree.inline_chain(inlined_scope), vec!["helper".to_string()]);
    assert!(tree.inline_chain(block_scope).is_empty());

    let names: Vec<&str> = tree.visible_variables(block_scope).iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["x", "y"]);
}
