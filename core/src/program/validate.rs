use std::fmt;

use super::{ConstantValue, Op, Program, StorageClass, Type};
use crate::id::Id;
use crate::util::{FastHashMap, FastHashSet, fast_hash_map_new};

/// A structural defect in a decoded program. Fatal: no session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub id: Option<Id>,
    pub message: String,
}

impl ValidationError {
    fn at(id: Id, message: impl Into<String>) -> Self {
        Self { id: Some(id), message: message.into() }
    }

    fn global(message: impl Into<String>) -> Self {
        Self { id: None, message: message.into() }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "invalid program at {id}: {}", self.message),
            None => write!(f, "invalid program: {}", self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Def {
    Type,
    Constant,
    Global,
    Function,
    Param,
    Label,
    Value,
    ExtSet,
    Scope,
    InlineSite,
    SourceVar,
    File,
}

struct Defs {
    kinds: FastHashMap<Id, Def>,
}

impl Defs {
    fn define(&mut self, id: Id, kind: Def) -> Result<(), ValidationError> {
        if !id.is_valid() {
            return Err(ValidationError::global(format!("{kind:?} uses the reserved id 0")));
        }
        if let Some(prev) = self.kinds.insert(id, kind) {
            return Err(ValidationError::at(id, format!("defined twice ({prev:?} and {kind:?})")));
        }
        Ok(())
    }

    fn kind(&self, id: Id) -> Option<Def> {
        self.kinds.get(&id).copied()
    }

    fn expect(&self, id: Id, want: &[Def], what: &str) -> Result<(), ValidationError> {
        match self.kind(id) {
            Some(kind) if want.contains(&kind) => Ok(()),
            Some(kind) => Err(ValidationError::at(id, format!("{what} refers to a {kind:?}"))),
            None => Err(ValidationError::at(id, format!("{what} refers to an undefined id"))),
        }
    }
}

const VALUE_DEFS: &[Def] = &[Def::Constant, Def::Global, Def::Param, Def::Value, Def::ExtSet];

/// Check that every referenced Id exists with the right kind and that the
/// block structure is well formed.
pub fn validate(program: &Program) -> Result<(), ValidationError> {
    let mut defs = Defs { kinds: fast_hash_map_new() };

    for t in &program.types {
        defs.define(t.id, Def::Type)?;
    }
    for c in &program.constants {
        defs.define(c.id, Def::Constant)?;
    }
    for g in &program.globals {
        defs.define(g.id, Def::Global)?;
    }
    for e in &program.ext_inst_imports {
        defs.define(e.id, Def::ExtSet)?;
    }
    for f in &program.debug.files {
        defs.define(f.id, Def::File)?;
    }
    for s in &program.debug.scopes {
        defs.define(s.id, Def::Scope)?;
    }
    for s in &program.debug.inline_sites {
        defs.define(s.id, Def::InlineSite)?;
    }
    for v in &program.debug.variables {
        defs.define(v.id, Def::SourceVar)?;
    }
    for f in &program.functions {
        defs.define(f.id, Def::Function)?;
        for p in &f.params {
            defs.define(p.id, Def::Param)?;
        }
        for b in &f.blocks {
            defs.define(b.id, Def::Label)?;
            for inst in &b.instructions {
                if let Some(result) = inst.result {
                    defs.define(result, Def::Value)?;
                }
            }
        }
    }

    check_types(program, &defs)?;
    check_constants(program, &defs)?;

    for g in &program.globals {
        defs.expect(g.ty, &[Def::Type], "global type")?;
        match program.types.iter().find(|t| t.id == g.ty).map(|t| &t.ty) {
            Some(Type::Pointer { storage, .. }) if *storage == g.storage => {}
            Some(Type::Pointer { storage, .. }) => {
                return Err(ValidationError::at(
                    g.id,
                    format!("declared {} but typed as a {} pointer", g.storage.name(), storage.name()),
                ));
            }
            _ => return Err(ValidationError::at(g.id, "global variable must have a pointer type")),
        }
        if g.storage == StorageClass::Function {
            return Err(ValidationError::at(g.id, "global variable cannot use Function storage"));
        }
        if let Some(init) = g.initializer {
            defs.expect(init, &[Def::Constant], "global initializer")?;
        }
    }

    for f in &program.functions {
        check_function(program, f, &defs)?;
    }

    for s in &program.debug.scopes {
        if let Some(parent) = s.parent {
            defs.expect(parent, &[Def::Scope], "scope parent")?;
        }
        if let Some(site) = s.inlined_at {
            defs.expect(site, &[Def::InlineSite], "inlined_at")?;
        }
    }
    for site in &program.debug.inline_sites {
        defs.expect(site.scope, &[Def::Scope], "inline site scope")?;
    }
    for v in &program.debug.variables {
        defs.expect(v.scope, &[Def::Scope], "source variable scope")?;
    }

    if program.entry_points.is_empty() {
        return Err(ValidationError::global("no entry point"));
    }
    for ep in &program.entry_points {
        defs.expect(ep.function, &[Def::Function], "entry point")?;
        for id in &ep.interface {
            defs.expect(*id, &[Def::Global], "entry point interface")?;
        }
        if ep.workgroup_size.contains(&0) {
            return Err(ValidationError::at(ep.function, "workgroup size has a zero dimension"));
        }
    }
    Ok(())
}

fn check_types(program: &Program, defs: &Defs) -> Result<(), ValidationError> {
    let by_id: FastHashMap<Id, &Type> = program.types.iter().map(|t| (t.id, &t.ty)).collect();
    for decl in &program.types {
        for referenced in decl.ty.referenced_types() {
            defs.expect(referenced, &[Def::Type], "type operand")?;
        }
        match &decl.ty {
            Type::Int { width, .. } if ![8, 16, 32, 64].contains(width) => {
                return Err(ValidationError::at(decl.id, format!("integer width {width}")));
            }
            Type::Float { width } if ![16, 32, 64].contains(width) => {
                return Err(ValidationError::at(decl.id, format!("float width {width}")));
            }
            Type::Vector { component, count } => {
                if !(2..=16).contains(count) {
                    return Err(ValidationError::at(decl.id, format!("vector of {count} components")));
                }
                if !by_id.get(component).is_some_and(|t| t.is_scalar()) {
                    return Err(ValidationError::at(decl.id, "vector component must be a scalar"));
                }
            }
            Type::Matrix { column, count } => {
                let Some(Type::Vector { count: rows, component }) = by_id.get(column) else {
                    return Err(ValidationError::at(decl.id, "matrix column must be a vector"));
                };
                if !(2..=4).contains(count) || *rows > 4 {
                    return Err(ValidationError::at(decl.id, format!("{rows}x{count} matrix")));
                }
                if !matches!(by_id.get(component), Some(Type::Float { .. })) {
                    return Err(ValidationError::at(decl.id, "matrix components must be floats"));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_constants(program: &Program, defs: &Defs) -> Result<(), ValidationError> {
    for c in &program.constants {
        defs.expect(c.ty, &[Def::Type], "constant type")?;
        if let ConstantValue::Composite(parts) = &c.value {
            for part in parts {
                defs.expect(*part, &[Def::Constant], "constant constituent")?;
                if *part == c.id {
                    return Err(ValidationError::at(c.id, "constant contains itself"));
                }
            }
        }
    }
    Ok(())
}

fn check_function(program: &Program, f: &super::Function, defs: &Defs) -> Result<(), ValidationError> {
    defs.expect(f.return_type, &[Def::Type], "function return type")?;
    if f.blocks.is_empty() {
        return Err(ValidationError::at(f.id, "function has no blocks"));
    }
    let labels: FastHashSet<Id> = f.blocks.iter().map(|b| b.id).collect();
    for p in &f.params {
        defs.expect(p.ty, &[Def::Type], "parameter type")?;
    }
    for b in &f.blocks {
        let Some((last, body)) = b.instructions.split_last() else {
            return Err(ValidationError::at(b.id, "empty block"));
        };
        if !last.op.is_terminator() {
            return Err(ValidationError::at(b.id, format!("block ends with {}", last.op.name())));
        }
        if let Some(inst) = body.iter().find(|i| i.op.is_terminator()) {
            return Err(ValidationError::at(
                b.id,
                format!("{} in the middle of a block", inst.op.name()),
            ));
        }
        if let Some(merge) = b.merge {
            let target = merge.merge_block();
            if !labels.contains(&target) {
                return Err(ValidationError::at(b.id, format!("merge target {target} is not in this function")));
            }
            if let super::Merge::Loop { continue_target, .. } = merge
                && !labels.contains(&continue_target)
            {
                return Err(ValidationError::at(
                    b.id,
                    format!("continue target {continue_target} is not in this function"),
                ));
            }
        }
        for inst in &b.instructions {
            let at = inst.result.unwrap_or(b.id);
            if let Some(ty) = inst.result_type {
                defs.expect(ty, &[Def::Type], "result type")?;
            }
            if inst.result.is_some() && inst.result_type.is_none() {
                return Err(ValidationError::at(at, format!("{} result has no type", inst.op.name())));
            }
            for id in inst.op.value_operands() {
                defs.expect(id, VALUE_DEFS, inst.op.name())?;
            }
            for label in inst.op.label_operands() {
                if !labels.contains(&label) {
                    return Err(ValidationError::at(at, format!("{label} is not a block of this function")));
                }
            }
            if let Some(scope) = inst.scope {
                defs.expect(scope, &[Def::Scope], "instruction scope")?;
            }
            match &inst.op {
                Op::FunctionCall { function, arguments } => {
                    defs.expect(*function, &[Def::Function], "call")?;
                    if let Some(callee) = program.functions.iter().find(|c| c.id == *function)
                        && callee.params.len() != arguments.len()
                    {
                        return Err(ValidationError::at(
                            at,
                            format!("call passes {} arguments to {} parameters", arguments.len(), callee.params.len()),
                        ));
                    }
                }
                Op::ExtInst { set, .. } => defs.expect(*set, &[Def::ExtSet], "extended instruction set")?,
                Op::DebugDeclare { variable, .. } | Op::DebugValue { variable, .. } => {
                    defs.expect(*variable, &[Def::SourceVar], "debug variable")?;
                }
                Op::Variable { storage, .. } if *storage != StorageClass::Function => {
                    return Err(ValidationError::at(at, "local variable must use Function storage"));
                }
                _ => {}
            }
        }
    }
    Ok(())
}
