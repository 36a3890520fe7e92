//! The decoded shader program consumed by the debugger.
//!
//! A [`Program`] is plain data: it deserializes from JSON (or any serde
//! format) and is turned into an immutable [`ProgramIndex`] once per session.

mod builder;
mod debug_info;
mod decoration;
mod index;
mod instruction;
mod layout;
mod types;
mod validate;

#[cfg(test)]
mod program_test;

pub use builder::ProgramBuilder;
pub use debug_info::{DebugInfo, DebugScope, InlineSite, LineInfo, ScopeKind, SourceFile, SourceVariable};
pub use decoration::{Decoration, DecorationEntry, Decorations, ShaderBuiltin};
pub use index::{FlatInstruction, FunctionInfo, ProgramIndex};
pub use instruction::{
    BinaryOp, DerivativeAxis, DerivativeOp, ImageOperands, ImageQueryKind, Instruction, Op, PhiSource, SwitchTarget,
    UnaryOp,
};
pub use layout::MatrixLayout;
pub use types::{Dim, StorageClass, Type, TypeDecl};
pub use validate::{ValidationError, validate};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::id::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderStage {
    Vertex,
    TessControl,
    TessEval,
    Geometry,
    #[serde(alias = "fragment")]
    Pixel,
    Compute,
}

impl ShaderStage {
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::TessControl => "tess_control",
            ShaderStage::TessEval => "tess_eval",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Pixel => "pixel",
            ShaderStage::Compute => "compute",
        }
    }
}

fn default_workgroup_size() -> [u32; 3] {
    [1, 1, 1]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub function: Id,
    pub name: String,
    pub stage: ShaderStage,
    #[serde(default)]
    pub interface: Vec<Id>,
    #[serde(default = "default_workgroup_size")]
    pub workgroup_size: [u32; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstantValue {
    Bool(bool),
    Int(i64),
    #[serde(rename = "uint")]
    UInt(u64),
    Float(f64),
    Composite(Vec<Id>),
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantDecl {
    pub id: Id,
    pub ty: Id,
    pub value: ConstantValue,
    /// Specialization constant; overridable through its `SpecId` decoration.
    #[serde(default)]
    pub spec: bool,
}

/// Session-level override for a specialization constant, by `SpecId`.
/// `value` holds the raw bits: floats are passed as their IEEE bit pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecConstant {
    pub spec_id: u32,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub id: Id,
    /// Pointer type of the variable.
    pub ty: Id,
    pub storage: StorageClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializer: Option<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionParam {
    pub id: Id,
    pub ty: Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Merge {
    Selection { merge: Id },
    Loop { merge: Id, continue_target: Id },
}

impl Merge {
    pub fn merge_block(self) -> Id {
        match self {
            Merge::Selection { merge } | Merge::Loop { merge, .. } => merge,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<Merge>,
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub id: Id,
    #[serde(default)]
    pub name: String,
    pub return_type: Id,
    #[serde(default)]
    pub params: Vec<FunctionParam>,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtInstImport {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameEntry {
    pub id: Id,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Program {
    pub types: Vec<TypeDecl>,
    pub constants: Vec<ConstantDecl>,
    pub globals: Vec<GlobalVariable>,
    pub functions: Vec<Function>,
    pub ext_inst_imports: Vec<ExtInstImport>,
    pub names: Vec<NameEntry>,
    pub decorations: Vec<DecorationEntry>,
    pub debug: DebugInfo,
    pub entry_points: Vec<EntryPoint>,
}

impl Program {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("failed to decode program JSON")
    }

    /// One past the largest Id mentioned anywhere in the program.
    pub fn id_bound(&self) -> u32 {
        let mut max = 0u32;
        let mut see = |id: Id| max = max.max(id.raw());
        self.types.iter().for_each(|t| see(t.id));
        self.constants.iter().for_each(|c| see(c.id));
        self.globals.iter().for_each(|g| see(g.id));
        self.ext_inst_imports.iter().for_each(|e| see(e.id));
        self.debug.files.iter().for_each(|f| see(f.id));
        self.debug.scopes.iter().for_each(|s| see(s.id));
        self.debug.inline_sites.iter().for_each(|s| see(s.id));
        self.debug.variables.iter().for_each(|v| see(v.id));
        for function in &self.functions {
            see(function.id);
            function.params.iter().for_each(|p| see(p.id));
            for block in &function.blocks {
                see(block.id);
                for inst in &block.instructions {
                    if let Some(result) = inst.result {
                        see(result);
                    }
                }
            }
        }
        max + 1
    }

    pub fn entry_point(&self, name: Option<&str>) -> Option<&EntryPoint> {
        match name {
            Some(name) => self.entry_points.iter().find(|e| e.name == name),
            None => self.entry_points.first(),
        }
    }
}
