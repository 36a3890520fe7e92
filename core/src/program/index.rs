use anyhow::{Context, Result, anyhow, bail};
use tracing::debug;

use super::{
    ConstantDecl, ConstantValue, DebugInfo, Decorations, EntryPoint, FunctionParam, GlobalVariable, Instruction,
    Merge, Op, Program, SourceVariable, SpecConstant, StorageClass, Type, validate,
};
use crate::id::{Id, IdMap};
use crate::util::{FastHashMap, fast_hash_map_new};
use crate::val::{ShaderVariable, VarType};

/// One instruction of the flattened program, tagged with its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatInstruction {
    pub inst: Instruction,
    pub function: Id,
    pub block: Id,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionInfo {
    pub id: Id,
    pub name: String,
    pub return_type: Id,
    pub params: Vec<FunctionParam>,
    pub entry_block: Id,
    /// First instruction index of the function.
    pub start: usize,
    /// One past the last instruction index.
    pub end: usize,
}

/// Immutable, Id-indexed view of a program built once per session.
///
/// Instructions of every function are flattened into one list so a lane's
/// program counter is a plain index. Constants are materialized as
/// [`ShaderVariable`]s with specialization overrides applied.
#[derive(Debug, Clone)]
pub struct ProgramIndex {
    types: IdMap<Type>,
    names: IdMap<String>,
    member_names: FastHashMap<(Id, u32), String>,
    decorations: IdMap<Decorations>,
    member_decorations: FastHashMap<(Id, u32), Decorations>,
    constants: IdMap<ShaderVariable>,
    globals: Vec<GlobalVariable>,
    global_slots: IdMap<usize>,
    functions: IdMap<FunctionInfo>,
    instructions: Vec<FlatInstruction>,
    block_starts: IdMap<usize>,
    block_merges: IdMap<Merge>,
    result_pcs: IdMap<usize>,
    value_types: IdMap<Id>,
    defining_function: IdMap<Id>,
    death: IdMap<usize>,
    ext_sets: IdMap<String>,
    source_vars: IdMap<SourceVariable>,
    debug: DebugInfo,
    entry_points: Vec<EntryPoint>,
    id_bound: u32,
}

impl ProgramIndex {
    /// Validate `program` and build the index. Any structural problem is
    /// returned as an error and no session can start from it.
    pub fn build(program: &Program, specialization: &[SpecConstant]) -> Result<Self> {
        validate(program)?;
        let bound = program.id_bound();

        let mut index = Self {
            types: IdMap::with_bound(bound),
            names: IdMap::new(),
            member_names: fast_hash_map_new(),
            decorations: IdMap::new(),
            member_decorations: fast_hash_map_new(),
            constants: IdMap::new(),
            globals: program.globals.clone(),
            global_slots: IdMap::new(),
            functions: IdMap::new(),
            instructions: Vec::new(),
            block_starts: IdMap::new(),
            block_merges: IdMap::new(),
            result_pcs: IdMap::with_bound(bound),
            value_types: IdMap::with_bound(bound),
            defining_function: IdMap::with_bound(bound),
            death: IdMap::with_bound(bound),
            ext_sets: IdMap::new(),
            source_vars: IdMap::new(),
            debug: program.debug.clone(),
            entry_points: program.entry_points.clone(),
            id_bound: bound,
        };

        for decl in &program.types {
            index.types.insert(decl.id, decl.ty.clone());
        }
        for entry in &program.names {
            match entry.member {
                Some(m) => {
                    index.member_names.insert((entry.id, m), entry.name.clone());
                }
                None => {
                    index.names.insert(entry.id, entry.name.clone());
                }
            }
        }
        for entry in &program.decorations {
            match entry.member {
                Some(m) => index
                    .member_decorations
                    .entry((entry.target, m))
                    .or_default()
                    .apply(&entry.decoration),
                None => index
                    .decorations
                    .get_or_insert_with(entry.target, Decorations::default)
                    .apply(&entry.decoration),
            }
        }
        for import in &program.ext_inst_imports {
            index.ext_sets.insert(import.id, import.name.clone());
        }
        for (slot, global) in program.globals.iter().enumerate() {
            index.global_slots.insert(global.id, slot);
            index.value_types.insert(global.id, global.ty);
        }
        for constant in &program.constants {
            index.value_types.insert(constant.id, constant.ty);
        }
        for var in &program.debug.variables {
            index.source_vars.insert(var.id, var.clone());
        }

        for function in &program.functions {
            let start = index.instructions.len();
            for param in &function.params {
                index.defining_function.insert(param.id, function.id);
                index.result_pcs.insert(param.id, start);
                index.value_types.insert(param.id, param.ty);
            }
            for block in &function.blocks {
                index.block_starts.insert(block.id, index.instructions.len());
                if let Some(merge) = block.merge {
                    index.block_merges.insert(block.id, merge);
                }
                for inst in &block.instructions {
                    if let Some(result) = inst.result {
                        index.result_pcs.insert(result, index.instructions.len());
                        index.defining_function.insert(result, function.id);
                        if let Some(ty) = inst.result_type {
                            index.value_types.insert(result, ty);
                        }
                    }
                    index.instructions.push(FlatInstruction {
                        inst: inst.clone(),
                        function: function.id,
                        block: block.id,
                    });
                }
            }
            let entry_block = function
                .blocks
                .first()
                .map(|b| b.id)
                .ok_or_else(|| anyhow!("function {} has no blocks", function.id))?;
            let name = if function.name.is_empty() {
                index.debug_name(function.id)
            } else {
                function.name.clone()
            };
            index.functions.insert(
                function.id,
                FunctionInfo {
                    id: function.id,
                    name,
                    return_type: function.return_type,
                    params: function.params.clone(),
                    entry_block,
                    start,
                    end: index.instructions.len(),
                },
            );
        }

        index.constants = index.materialize_constants(&program.constants, specialization)?;
        index.compute_death_offsets(program);
        debug!(
            target: "shdbg::debugger",
            instructions = index.instructions.len(),
            functions = index.functions.len(),
            constants = index.constants.len(),
            "program index built"
        );
        Ok(index)
    }

    fn materialize_constants(
        &self,
        decls: &[ConstantDecl],
        specialization: &[SpecConstant],
    ) -> Result<IdMap<ShaderVariable>> {
        let by_id: IdMap<&ConstantDecl> = decls.iter().map(|d| (d.id, d)).collect();
        let overrides: FastHashMap<u32, u64> = specialization.iter().map(|s| (s.spec_id, s.value)).collect();
        let mut out = IdMap::with_bound(self.id_bound);
        for decl in decls {
            self.materialize(&by_id, &overrides, decl.id, &mut out, 0)?;
        }
        Ok(out)
    }

    fn materialize(
        &self,
        decls: &IdMap<&ConstantDecl>,
        overrides: &FastHashMap<u32, u64>,
        id: Id,
        out: &mut IdMap<ShaderVariable>,
        depth: usize,
    ) -> Result<ShaderVariable> {
        if let Some(existing) = out.get(id) {
            return Ok(existing.clone());
        }
        if depth > 64 {
            bail!("constant {id} is nested too deeply");
        }
        let decl = decls.get(id).ok_or_else(|| anyhow!("constant {id} is not declared"))?;
        let mut var = self
            .make_variable(decl.ty, &self.debug_name(id))
            .with_context(|| format!("constant {id}"))?;

        let spec_override = if decl.spec {
            self.decorations(id).spec_id.and_then(|spec_id| overrides.get(&spec_id).copied())
        } else {
            None
        };

        match (&decl.value, spec_override) {
            (ConstantValue::Composite(_), _) | (ConstantValue::Null, _) => {}
            (_, Some(bits)) => {
                debug!(target: "shdbg::debugger", %id, bits, "specialization override");
                var.set_raw(0, bits);
            }
            (ConstantValue::Bool(b), None) => var.set_raw(0, *b as u64),
            (ConstantValue::Int(i), None) => var.set_int(0, *i),
            (ConstantValue::UInt(u), None) => var.set_raw(0, *u),
            (ConstantValue::Float(f), None) => var.set_float(0, *f),
        }
        if let ConstantValue::Composite(parts) = &decl.value {
            let mut values = Vec::with_capacity(parts.len());
            for part in parts {
                values.push(self.materialize(decls, overrides, *part, out, depth + 1)?);
            }
            var.compose(&values).with_context(|| format!("constant {id}"))?;
        }
        out.insert(id, var.clone());
        Ok(var)
    }

    /// For every function-local value, the index of the last instruction
    /// that reads it. Phi reads count at the end of the incoming block, and
    /// values defined before a loop but read inside it stay alive until the
    /// loop's back edge.
    fn compute_death_offsets(&mut self, program: &Program) {
        let mut death: IdMap<usize> = IdMap::with_bound(self.id_bound);
        for (id, pc) in self.result_pcs.iter() {
            death.insert(id, *pc);
        }

        for (pc, flat) in self.instructions.iter().enumerate() {
            if let Op::Phi { incoming } = &flat.inst.op {
                for src in incoming {
                    let use_pc = self.block_end(src.parent).unwrap_or(pc);
                    bump(&mut death, src.value, use_pc);
                }
                continue;
            }
            for id in flat.inst.op.value_operands() {
                bump(&mut death, id, pc);
            }
        }

        // Loop ranges: header start up to the last branch back to the header.
        let mut loops = Vec::new();
        for function in &program.functions {
            for block in &function.blocks {
                if let Some(Merge::Loop { .. }) = block.merge
                    && let Some(header_pc) = self.block_starts.get(block.id).copied()
                {
                    let back_edge = self
                        .instructions
                        .iter()
                        .enumerate()
                        .skip(header_pc)
                        .filter(|(_, f)| f.function == function.id && f.inst.op.label_operands().contains(&block.id))
                        .map(|(pc, _)| pc)
                        .max();
                    if let Some(end) = back_edge {
                        loops.push((header_pc, end));
                    }
                }
            }
        }
        // Nested loops may extend each other; a couple of passes settle it.
        for _ in 0..loops.len().max(1) {
            let mut changed = false;
            for &(start, end) in &loops {
                for (id, def_pc) in self.result_pcs.iter() {
                    let Some(d) = death.get_mut(id) else { continue };
                    if *def_pc < start && *d >= start && *d < end {
                        *d = end;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        self.death = death;
    }

    fn block_end(&self, label: Id) -> Option<usize> {
        let start = *self.block_starts.get(label)?;
        let block = self.instructions.get(start)?.block;
        let mut pc = start;
        while self.instructions.get(pc + 1).is_some_and(|f| f.block == block) {
            pc += 1;
        }
        Some(pc)
    }

    pub fn id_bound(&self) -> u32 {
        self.id_bound
    }

    pub fn ty(&self, id: Id) -> Result<&Type> {
        self.types.get(id).ok_or_else(|| anyhow!("{id} is not a type"))
    }

    pub fn try_ty(&self, id: Id) -> Option<&Type> {
        self.types.get(id)
    }

    /// Storage class and pointee of a pointer type.
    pub fn pointee(&self, pointer_ty: Id) -> Result<(StorageClass, Id)> {
        match self.ty(pointer_ty)? {
            Type::Pointer { storage, pointee } => Ok((*storage, *pointee)),
            other => bail!("{pointer_ty} is a {} type, not a pointer", other.kind_name()),
        }
    }

    /// Declared type of a value: instruction result, parameter, constant or
    /// global (whose type is a pointer type).
    pub fn value_type(&self, id: Id) -> Option<Id> {
        self.value_types.get(id).copied()
    }

    pub fn name(&self, id: Id) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    /// Declared name, or `_N` for unnamed ids.
    pub fn debug_name(&self, id: Id) -> String {
        match self.name(id) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("_{}", id.raw()),
        }
    }

    pub fn member_name(&self, ty: Id, member: u32) -> Option<&str> {
        self.member_names.get(&(ty, member)).map(String::as_str)
    }

    pub fn decorations(&self, id: Id) -> Decorations {
        self.decorations.get(id).copied().unwrap_or_default()
    }

    pub fn member_decorations(&self, ty: Id, member: u32) -> Decorations {
        self.member_decorations.get(&(ty, member)).copied().unwrap_or_default()
    }

    pub fn constant(&self, id: Id) -> Option<&ShaderVariable> {
        self.constants.get(id)
    }

    pub fn globals(&self) -> &[GlobalVariable] {
        &self.globals
    }

    pub fn global(&self, id: Id) -> Option<&GlobalVariable> {
        self.global_slots.get(id).and_then(|slot| self.globals.get(*slot))
    }

    pub fn function(&self, id: Id) -> Result<&FunctionInfo> {
        self.functions.get(id).ok_or_else(|| anyhow!("{id} is not a function"))
    }

    pub fn function_at(&self, pc: usize) -> Option<&FunctionInfo> {
        self.functions.get(self.instructions.get(pc)?.function)
    }

    pub fn instruction(&self, pc: usize) -> Option<&FlatInstruction> {
        self.instructions.get(pc)
    }

    pub fn instructions(&self) -> &[FlatInstruction] {
        &self.instructions
    }

    pub fn block_start(&self, label: Id) -> Result<usize> {
        self.block_starts
            .get(label)
            .copied()
            .ok_or_else(|| anyhow!("{label} is not a block label"))
    }

    pub fn block_merge(&self, label: Id) -> Option<Merge> {
        self.block_merges.get(label).copied()
    }

    pub fn ext_set_name(&self, id: Id) -> Option<&str> {
        self.ext_sets.get(id).map(String::as_str)
    }

    /// Index of the last instruction reading `id`, for function-local values.
    pub fn death_offset(&self, id: Id) -> Option<usize> {
        self.death.get(id).copied()
    }

    pub fn defining_function(&self, id: Id) -> Option<Id> {
        self.defining_function.get(id).copied()
    }

    pub fn source_variable(&self, id: Id) -> Option<&SourceVariable> {
        self.source_vars.get(id)
    }

    pub fn debug_info(&self) -> &DebugInfo {
        &self.debug
    }

    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.entry_points
    }

    pub fn entry_point(&self, name: Option<&str>) -> Option<&EntryPoint> {
        match name {
            Some(name) => self.entry_points.iter().find(|e| e.name == name),
            None => self.entry_points.first(),
        }
    }

    /// Zero-initialized storage shaped for `ty`.
    pub fn make_variable(&self, ty: Id, name: &str) -> Result<ShaderVariable> {
        Ok(match self.ty(ty)? {
            Type::Bool => ShaderVariable::new(name, VarType::Bool, 1, 1),
            Type::Int { width, signed } => ShaderVariable::new(name, VarType::int(*width, *signed)?, 1, 1),
            Type::Float { width } => ShaderVariable::new(name, VarType::float(*width)?, 1, 1),
            Type::Vector { component, count } => {
                let mut var = self.make_variable(*component, name)?;
                var.columns = *count;
                var
            }
            Type::Matrix { column, count } => {
                let col = self.make_variable(*column, name)?;
                ShaderVariable::new(name, col.ty, col.columns, *count)
            }
            Type::Array { element, length } => {
                let elements = (0..*length)
                    .map(|i| self.make_variable(*element, &format!("[{i}]")))
                    .collect::<Result<Vec<_>>>()?;
                ShaderVariable::array(name, elements)
            }
            Type::RuntimeArray { .. } => ShaderVariable::array(name, Vec::new()),
            Type::Struct { members } => {
                let mut out = Vec::with_capacity(members.len());
                for (i, member) in members.iter().enumerate() {
                    let member_name = match self.member_name(ty, i as u32) {
                        Some(n) if !n.is_empty() => n.to_string(),
                        _ => format!("_child{i}"),
                    };
                    out.push(self.make_variable(*member, &member_name)?);
                }
                ShaderVariable::structure(name, out)
            }
            Type::Pointer { .. } => ShaderVariable::new(name, VarType::Pointer, 1, 1),
            Type::Image { storage: true, .. } => ShaderVariable::new(name, VarType::ReadWriteResource, 1, 1),
            Type::Image { .. } | Type::SampledImage { .. } => {
                ShaderVariable::new(name, VarType::ReadOnlyResource, 1, 1)
            }
            Type::Sampler => ShaderVariable::new(name, VarType::Sampler, 1, 1),
            Type::Void | Type::Function { .. } => bail!("type {ty} has no storage"),
        })
    }
}

fn bump(death: &mut IdMap<usize>, id: Id, pc: usize) {
    if let Some(d) = death.get_mut(id)
        && pc > *d
    {
        *d = pc;
    }
}
