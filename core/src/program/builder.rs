use super::{
    Block, ConstantDecl, ConstantValue, DebugScope, Decoration, DecorationEntry, EntryPoint, ExtInstImport, Function,
    FunctionParam, GlobalVariable, InlineSite, Instruction, LineInfo, Merge, NameEntry, Op, Program, ScopeKind,
    ShaderStage, SourceFile, SourceVariable, StorageClass, Type, TypeDecl,
};
use crate::id::Id;

/// Programmatic construction of a [`Program`]. Ids are allocated densely
/// from 1; identical types are declared once.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
    next_id: u32,
    function: Option<Function>,
    block: Option<Block>,
    scope: Option<Id>,
    line: Option<LineInfo>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self { next_id: 1, ..Self::default() }
    }

    pub fn id(&mut self) -> Id {
        let id = Id(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn declare_type(&mut self, ty: Type) -> Id {
        if let Some(existing) = self.program.types.iter().find(|t| t.ty == ty) {
            return existing.id;
        }
        let id = self.id();
        self.program.types.push(TypeDecl { id, ty });
        id
    }

    pub fn type_void(&mut self) -> Id {
        self.declare_type(Type::Void)
    }

    pub fn type_bool(&mut self) -> Id {
        self.declare_type(Type::Bool)
    }

    pub fn type_int(&mut self, width: u8, signed: bool) -> Id {
        self.declare_type(Type::Int { width, signed })
    }

    pub fn type_uint(&mut self) -> Id {
        self.type_int(32, false)
    }

    pub fn type_sint(&mut self) -> Id {
        self.type_int(32, true)
    }

    pub fn type_float(&mut self, width: u8) -> Id {
        self.declare_type(Type::Float { width })
    }

    pub fn type_f32(&mut self) -> Id {
        self.type_float(32)
    }

    pub fn type_vector(&mut self, component: Id, count: u8) -> Id {
        self.declare_type(Type::Vector { component, count })
    }

    pub fn type_matrix(&mut self, column: Id, count: u8) -> Id {
        self.declare_type(Type::Matrix { column, count })
    }

    pub fn type_array(&mut self, element: Id, length: u32) -> Id {
        self.declare_type(Type::Array { element, length })
    }

    pub fn type_runtime_array(&mut self, element: Id) -> Id {
        self.declare_type(Type::RuntimeArray { element })
    }

    /// Structs are never deduplicated: two structs with the same members
    /// may carry different decorations.
    pub fn type_struct(&mut self, members: &[Id]) -> Id {
        let id = self.id();
        self.program.types.push(TypeDecl { id, ty: Type::Struct { members: members.to_vec() } });
        id
    }

    pub fn type_pointer(&mut self, storage: StorageClass, pointee: Id) -> Id {
        self.declare_type(Type::Pointer { storage, pointee })
    }

    pub fn type_function(&mut self, return_type: Id, params: &[Id]) -> Id {
        self.declare_type(Type::Function { return_type, params: params.to_vec() })
    }

    fn constant(&mut self, ty: Id, value: ConstantValue, spec: bool) -> Id {
        if !spec
            && let Some(existing) = self.program.constants.iter().find(|c| c.ty == ty && c.value == value && !c.spec)
        {
            return existing.id;
        }
        let id = self.id();
        self.program.constants.push(ConstantDecl { id, ty, value, spec });
        id
    }

    pub fn constant_f32(&mut self, v: f32) -> Id {
        let ty = self.type_f32();
        self.constant(ty, ConstantValue::Float(v as f64), false)
    }

    pub fn constant_u32(&mut self, v: u32) -> Id {
        let ty = self.type_uint();
        self.constant(ty, ConstantValue::UInt(v as u64), false)
    }

    pub fn constant_i32(&mut self, v: i32) -> Id {
        let ty = self.type_sint();
        self.constant(ty, ConstantValue::Int(v as i64), false)
    }

    pub fn constant_bool(&mut self, v: bool) -> Id {
        let ty = self.type_bool();
        self.constant(ty, ConstantValue::Bool(v), false)
    }

    pub fn constant_composite(&mut self, ty: Id, parts: &[Id]) -> Id {
        self.constant(ty, ConstantValue::Composite(parts.to_vec()), false)
    }

    pub fn constant_null(&mut self, ty: Id) -> Id {
        self.constant(ty, ConstantValue::Null, false)
    }

    /// A specialization constant with a default value and a `SpecId`.
    pub fn spec_constant(&mut self, ty: Id, value: ConstantValue, spec_id: u32) -> Id {
        let id = self.constant(ty, value, true);
        self.decorate(id, Decoration::SpecId(spec_id));
        id
    }

    /// Declare a global variable of `pointee` type in `storage`.
    pub fn global(&mut self, storage: StorageClass, pointee: Id, initializer: Option<Id>) -> Id {
        let ty = self.type_pointer(storage, pointee);
        let id = self.id();
        self.program.globals.push(GlobalVariable { id, ty, storage, initializer });
        id
    }

    pub fn decorate(&mut self, target: Id, decoration: Decoration) {
        self.program.decorations.push(DecorationEntry { target, member: None, decoration });
    }

    pub fn decorate_member(&mut self, target: Id, member: u32, decoration: Decoration) {
        self.program.decorations.push(DecorationEntry { target, member: Some(member), decoration });
    }

    pub fn name(&mut self, id: Id, name: &str) {
        self.program.names.push(NameEntry { id, name: name.to_string(), member: None });
    }

    pub fn member_name(&mut self, id: Id, member: u32, name: &str) {
        self.program.names.push(NameEntry { id, name: name.to_string(), member: Some(member) });
    }

    pub fn ext_inst_import(&mut self, name: &str) -> Id {
        if let Some(existing) = self.program.ext_inst_imports.iter().find(|e| e.name == name) {
            return existing.id;
        }
        let id = self.id();
        self.program.ext_inst_imports.push(ExtInstImport { id, name: name.to_string() });
        id
    }

    pub fn source_file(&mut self, path: &str) -> Id {
        let id = self.id();
        self.program.debug.files.push(SourceFile { id, path: path.to_string(), contents: None });
        id
    }

    pub fn scope(&mut self, kind: ScopeKind, name: &str, parent: Option<Id>, inlined_at: Option<Id>) -> Id {
        let id = self.id();
        self.program.debug.scopes.push(DebugScope {
            id,
            kind,
            name: name.to_string(),
            parent,
            file: None,
            line: 0,
            inlined_at,
        });
        id
    }

    pub fn inline_site(&mut self, scope: Id, line: u32) -> Id {
        let id = self.id();
        self.program.debug.inline_sites.push(InlineSite { id, scope, line });
        id
    }

    pub fn source_variable(&mut self, name: &str, scope: Id) -> Id {
        let id = self.id();
        self.program.debug.variables.push(SourceVariable { id, name: name.to_string(), scope, ty: None, line: 0 });
        id
    }

    /// Scope attached to every instruction emitted from now on.
    pub fn set_scope(&mut self, scope: Option<Id>) {
        self.scope = scope;
    }

    pub fn set_line(&mut self, line: Option<LineInfo>) {
        self.line = line;
    }

    /// Start a function; returns its id and the ids of its parameters.
    pub fn begin_function(&mut self, name: &str, return_type: Id, params: &[Id]) -> (Id, Vec<Id>) {
        self.end_function();
        let id = self.id();
        let params: Vec<FunctionParam> = params.iter().map(|ty| FunctionParam { id: self.id(), ty: *ty }).collect();
        let param_ids = params.iter().map(|p| p.id).collect();
        self.function = Some(Function { id, name: name.to_string(), return_type, params, blocks: Vec::new() });
        (id, param_ids)
    }

    pub fn end_function(&mut self) {
        self.end_block();
        if let Some(function) = self.function.take() {
            self.program.functions.push(function);
        }
    }

    /// Reserve a label for a block placed later.
    pub fn label(&mut self) -> Id {
        self.id()
    }

    /// Start a block with a fresh label.
    pub fn begin_block(&mut self) -> Id {
        let label = self.label();
        self.place_block(label);
        label
    }

    /// Start the block for a previously reserved label.
    pub fn place_block(&mut self, label: Id) {
        self.end_block();
        self.block = Some(Block { id: label, merge: None, instructions: Vec::new() });
    }

    pub fn set_merge(&mut self, merge: Merge) {
        if let Some(block) = self.block.as_mut() {
            block.merge = Some(merge);
        }
    }

    fn end_block(&mut self) {
        if let Some(block) = self.block.take()
            && let Some(function) = self.function.as_mut()
        {
            function.blocks.push(block);
        }
    }

    fn push(&mut self, result: Option<Id>, result_type: Option<Id>, op: Op) {
        let mut inst = Instruction::new(result, result_type, op);
        inst.scope = self.scope;
        inst.line = self.line;
        if let Some(block) = self.block.as_mut() {
            block.instructions.push(inst);
        }
    }

    /// Emit a value-producing instruction; returns the new result id.
    pub fn emit(&mut self, result_type: Id, op: Op) -> Id {
        let id = self.id();
        self.push(Some(id), Some(result_type), op);
        id
    }

    /// Emit an instruction without a result.
    pub fn emit_void(&mut self, op: Op) {
        self.push(None, None, op);
    }

    pub fn variable(&mut self, pointee: Id, initializer: Option<Id>) -> Id {
        let ty = self.type_pointer(StorageClass::Function, pointee);
        self.emit(ty, Op::Variable { storage: StorageClass::Function, initializer })
    }

    pub fn load(&mut self, ty: Id, pointer: Id) -> Id {
        self.emit(ty, Op::Load { pointer })
    }

    pub fn store(&mut self, pointer: Id, object: Id) {
        self.emit_void(Op::Store { pointer, object });
    }

    pub fn access_chain(&mut self, pointer_ty: Id, base: Id, indices: &[Id]) -> Id {
        self.emit(pointer_ty, Op::AccessChain { base, indices: indices.to_vec() })
    }

    pub fn binary(&mut self, kind: super::BinaryOp, ty: Id, lhs: Id, rhs: Id) -> Id {
        self.emit(ty, Op::Binary { kind, lhs, rhs })
    }

    pub fn unary(&mut self, kind: super::UnaryOp, ty: Id, operand: Id) -> Id {
        self.emit(ty, Op::Unary { kind, operand })
    }

    pub fn ext_inst(&mut self, ty: Id, set: Id, instruction: u32, operands: &[Id]) -> Id {
        self.emit(ty, Op::ExtInst { set, instruction, operands: operands.to_vec() })
    }

    pub fn call(&mut self, ty: Id, function: Id, arguments: &[Id]) -> Id {
        self.emit(ty, Op::FunctionCall { function, arguments: arguments.to_vec() })
    }

    pub fn branch(&mut self, target: Id) {
        self.emit_void(Op::Branch { target });
    }

    pub fn branch_conditional(&mut self, condition: Id, true_label: Id, false_label: Id) {
        self.emit_void(Op::BranchConditional { condition, true_label, false_label });
    }

    pub fn ret(&mut self) {
        self.emit_void(Op::Return);
    }

    pub fn ret_value(&mut self, value: Id) {
        self.emit_void(Op::ReturnValue { value });
    }

    pub fn entry_point(&mut self, function: Id, name: &str, stage: ShaderStage, interface: &[Id]) {
        self.program.entry_points.push(EntryPoint {
            function,
            name: name.to_string(),
            stage,
            interface: interface.to_vec(),
            workgroup_size: [1, 1, 1],
        });
    }

    pub fn set_workgroup_size(&mut self, function: Id, size: [u32; 3]) {
        if let Some(ep) = self.program.entry_points.iter_mut().find(|e| e.function == function) {
            ep.workgroup_size = size;
        }
    }

    pub fn finish(mut self) -> Program {
        self.end_function();
        self.program
    }
}
