use std::fmt;

use serde::{Deserialize, Serialize};

use super::debug_info::LineInfo;
use super::types::StorageClass;
use crate::id::Id;

/// One decoded instruction. `scope` and `line` carry the debug-info context
/// active at this instruction, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_type: Option<Id>,
    #[serde(flatten)]
    pub op: Op,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<LineInfo>,
}

impl Instruction {
    pub fn new(result: Option<Id>, result_type: Option<Id>, op: Op) -> Self {
        Self { result, result_type, op, scope: None, line: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    SNegate,
    FNegate,
    Not,
    LogicalNot,
    ConvertFToU,
    ConvertFToS,
    ConvertSToF,
    ConvertUToF,
    UConvert,
    SConvert,
    FConvert,
    Bitcast,
    QuantizeToF16,
    BitCount,
    BitReverse,
    IsNan,
    IsInf,
    Any,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    IAdd,
    FAdd,
    ISub,
    FSub,
    IMul,
    FMul,
    UDiv,
    SDiv,
    FDiv,
    UMod,
    SRem,
    SMod,
    FRem,
    FMod,
    ShiftRightLogical,
    ShiftRightArithmetic,
    ShiftLeftLogical,
    BitwiseOr,
    BitwiseXor,
    BitwiseAnd,
    LogicalEqual,
    LogicalNotEqual,
    LogicalOr,
    LogicalAnd,
    IEqual,
    INotEqual,
    UGreaterThan,
    SGreaterThan,
    UGreaterThanEqual,
    SGreaterThanEqual,
    ULessThan,
    SLessThan,
    ULessThanEqual,
    SLessThanEqual,
    FOrdEqual,
    FUnordEqual,
    FOrdNotEqual,
    FUnordNotEqual,
    FOrdLessThan,
    FUnordLessThan,
    FOrdGreaterThan,
    FUnordGreaterThan,
    FOrdLessThanEqual,
    FUnordLessThanEqual,
    FOrdGreaterThanEqual,
    FUnordGreaterThanEqual,
    Dot,
    VectorTimesScalar,
    MatrixTimesScalar,
    VectorTimesMatrix,
    MatrixTimesVector,
    MatrixTimesMatrix,
    OuterProduct,
}

impl BinaryOp {
    /// Comparison and logical ops produce booleans regardless of operand type.
    pub fn is_comparison(self) -> bool {
        use BinaryOp::*;
        matches!(
            self,
            LogicalEqual
                | LogicalNotEqual
                | LogicalOr
                | LogicalAnd
                | IEqual
                | INotEqual
                | UGreaterThan
                | SGreaterThan
                | UGreaterThanEqual
                | SGreaterThanEqual
                | ULessThan
                | SLessThan
                | ULessThanEqual
                | SLessThanEqual
                | FOrdEqual
                | FUnordEqual
                | FOrdNotEqual
                | FUnordNotEqual
                | FOrdLessThan
                | FUnordLessThan
                | FOrdGreaterThan
                | FUnordGreaterThan
                | FOrdLessThanEqual
                | FUnordLessThanEqual
                | FOrdGreaterThanEqual
                | FUnordGreaterThanEqual
        )
    }
}

/// Screen-space derivative flavours. The unqualified forms are evaluated as coarse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivativeOp {
    Dpdx,
    Dpdy,
    Fwidth,
    DpdxFine,
    DpdyFine,
    FwidthFine,
    DpdxCoarse,
    DpdyCoarse,
    FwidthCoarse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivativeAxis {
    X,
    Y,
    Both,
}

impl DerivativeOp {
    pub fn axis(self) -> DerivativeAxis {
        match self {
            DerivativeOp::Dpdx | DerivativeOp::DpdxFine | DerivativeOp::DpdxCoarse => DerivativeAxis::X,
            DerivativeOp::Dpdy | DerivativeOp::DpdyFine | DerivativeOp::DpdyCoarse => DerivativeAxis::Y,
            DerivativeOp::Fwidth | DerivativeOp::FwidthFine | DerivativeOp::FwidthCoarse => DerivativeAxis::Both,
        }
    }

    pub fn is_fine(self) -> bool {
        matches!(self, DerivativeOp::DpdxFine | DerivativeOp::DpdyFine | DerivativeOp::FwidthFine)
    }
}

/// Optional image operands. Every field names a value Id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageOperands {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bias: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lod: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grad_x: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grad_y: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_lod: Option<Id>,
}

impl ImageOperands {
    fn ids(&self) -> impl Iterator<Item = Id> {
        [self.bias, self.lod, self.grad_x, self.grad_y, self.offset, self.sample, self.min_lod]
            .into_iter()
            .flatten()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageQueryKind {
    Size,
    SizeLod,
    Levels,
    Samples,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhiSource {
    pub value: Id,
    pub parent: Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchTarget {
    pub literal: u64,
    pub label: Id,
}

/// The closed set of core operations the lane interpreter executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Nop,
    Undef,
    Variable {
        storage: StorageClass,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initializer: Option<Id>,
    },
    Load {
        pointer: Id,
    },
    Store {
        pointer: Id,
        object: Id,
    },
    CopyMemory {
        target: Id,
        source: Id,
    },
    AccessChain {
        base: Id,
        #[serde(default)]
        indices: Vec<Id>,
    },
    PtrAccessChain {
        base: Id,
        element: Id,
        #[serde(default)]
        indices: Vec<Id>,
    },
    ArrayLength {
        structure: Id,
        member: u32,
    },
    ConvertPtrToU {
        pointer: Id,
    },
    ConvertUToPtr {
        value: Id,
    },
    PtrEqual {
        lhs: Id,
        rhs: Id,
    },
    PtrNotEqual {
        lhs: Id,
        rhs: Id,
    },
    CompositeConstruct {
        constituents: Vec<Id>,
    },
    CompositeExtract {
        composite: Id,
        indices: Vec<u32>,
    },
    CompositeInsert {
        object: Id,
        composite: Id,
        indices: Vec<u32>,
    },
    VectorExtractDynamic {
        vector: Id,
        index: Id,
    },
    VectorInsertDynamic {
        vector: Id,
        component: Id,
        index: Id,
    },
    VectorShuffle {
        first: Id,
        second: Id,
        components: Vec<u32>,
    },
    CopyObject {
        operand: Id,
    },
    Transpose {
        matrix: Id,
    },
    Unary {
        kind: UnaryOp,
        operand: Id,
    },
    Binary {
        kind: BinaryOp,
        lhs: Id,
        rhs: Id,
    },
    Select {
        condition: Id,
        accept: Id,
        reject: Id,
    },
    Derivative {
        kind: DerivativeOp,
        operand: Id,
    },
    ExtInst {
        set: Id,
        instruction: u32,
        #[serde(default)]
        operands: Vec<Id>,
    },
    SampledImage {
        image: Id,
        sampler: Id,
    },
    Image {
        sampled_image: Id,
    },
    ImageSample {
        sampled_image: Id,
        coordinate: Id,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dref: Option<Id>,
        #[serde(default)]
        projective: bool,
        #[serde(default)]
        operands: ImageOperands,
    },
    ImageFetch {
        image: Id,
        coordinate: Id,
        #[serde(default)]
        operands: ImageOperands,
    },
    ImageGather {
        sampled_image: Id,
        coordinate: Id,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        component: Option<Id>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dref: Option<Id>,
        #[serde(default)]
        operands: ImageOperands,
    },
    ImageRead {
        image: Id,
        coordinate: Id,
        #[serde(default)]
        operands: ImageOperands,
    },
    ImageWrite {
        image: Id,
        coordinate: Id,
        texel: Id,
        #[serde(default)]
        operands: ImageOperands,
    },
    ImageQuery {
        kind: ImageQueryKind,
        image: Id,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lod: Option<Id>,
    },
    Phi {
        incoming: Vec<PhiSource>,
    },
    Branch {
        target: Id,
    },
    BranchConditional {
        condition: Id,
        true_label: Id,
        false_label: Id,
    },
    Switch {
        selector: Id,
        default: Id,
        #[serde(default)]
        targets: Vec<SwitchTarget>,
    },
    FunctionCall {
        function: Id,
        #[serde(default)]
        arguments: Vec<Id>,
    },
    Return,
    ReturnValue {
        value: Id,
    },
    Kill,
    DemoteToHelperInvocation,
    IsHelperInvocation,
    Unreachable,
    ControlBarrier,
    MemoryBarrier,
    DebugDeclare {
        variable: Id,
        pointer: Id,
    },
    DebugValue {
        variable: Id,
        value: Id,
    },
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Nop => "Nop",
            Op::Undef => "Undef",
            Op::Variable { .. } => "Variable",
            Op::Load { .. } => "Load",
            Op::Store { .. } => "Store",
            Op::CopyMemory { .. } => "CopyMemory",
            Op::AccessChain { .. } => "AccessChain",
            Op::PtrAccessChain { .. } => "PtrAccessChain",
            Op::ArrayLength { .. } => "ArrayLength",
            Op::ConvertPtrToU { .. } => "ConvertPtrToU",
            Op::ConvertUToPtr { .. } => "ConvertUToPtr",
            Op::PtrEqual { .. } => "PtrEqual",
            Op::PtrNotEqual { .. } => "PtrNotEqual",
            Op::CompositeConstruct { .. } => "CompositeConstruct",
            Op::CompositeExtract { .. } => "CompositeExtract",
            Op::CompositeInsert { .. } => "CompositeInsert",
            Op::VectorExtractDynamic { .. } => "VectorExtractDynamic",
            Op::VectorInsertDynamic { .. } => "VectorInsertDynamic",
            Op::VectorShuffle { .. } => "VectorShuffle",
            Op::CopyObject { .. } => "CopyObject",
            Op::Transpose { .. } => "Transpose",
            Op::Unary { .. } => "Unary",
            Op::Binary { .. } => "Binary",
            Op::Select { .. } => "Select",
            Op::Derivative { .. } => "Derivative",
            Op::ExtInst { .. } => "ExtInst",
            Op::SampledImage { .. } => "SampledImage",
            Op::Image { .. } => "Image",
            Op::ImageSample { .. } => "ImageSample",
            Op::ImageFetch { .. } => "ImageFetch",
            Op::ImageGather { .. } => "ImageGather",
            Op::ImageRead { .. } => "ImageRead",
            Op::ImageWrite { .. } => "ImageWrite",
            Op::ImageQuery { .. } => "ImageQuery",
            Op::Phi { .. } => "Phi",
            Op::Branch { .. } => "Branch",
            Op::BranchConditional { .. } => "BranchConditional",
            Op::Switch { .. } => "Switch",
            Op::FunctionCall { .. } => "FunctionCall",
            Op::Return => "Return",
            Op::ReturnValue { .. } => "ReturnValue",
            Op::Kill => "Kill",
            Op::DemoteToHelperInvocation => "DemoteToHelperInvocation",
            Op::IsHelperInvocation => "IsHelperInvocation",
            Op::Unreachable => "Unreachable",
            Op::ControlBarrier => "ControlBarrier",
            Op::MemoryBarrier => "MemoryBarrier",
            Op::DebugDeclare { .. } => "DebugDeclare",
            Op::DebugValue { .. } => "DebugValue",
        }
    }

    /// Block terminators: every block ends with exactly one of these.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Op::Branch { .. }
                | Op::BranchConditional { .. }
                | Op::Switch { .. }
                | Op::Return
                | Op::ReturnValue { .. }
                | Op::Kill
                | Op::Unreachable
        )
    }

    /// Ids read as values (including pointers, sampled images and ext sets).
    /// Branch targets and phi parents are reported by [`Op::label_operands`];
    /// the callee of a call and debug-variable ids are not values.
    pub fn value_operands(&self) -> Vec<Id> {
        match self {
            Op::Nop
            | Op::Undef
            | Op::Return
            | Op::Kill
            | Op::DemoteToHelperInvocation
            | Op::IsHelperInvocation
            | Op::Unreachable
            | Op::ControlBarrier
            | Op::MemoryBarrier
            | Op::Branch { .. } => Vec::new(),
            Op::Variable { initializer, .. } => initializer.iter().copied().collect(),
            Op::Load { pointer } | Op::ConvertPtrToU { pointer } => vec![*pointer],
            Op::Store { pointer, object } => vec![*pointer, *object],
            Op::CopyMemory { target, source } => vec![*target, *source],
            Op::AccessChain { base, indices } => std::iter::once(*base).chain(indices.iter().copied()).collect(),
            Op::PtrAccessChain { base, element, indices } => [*base, *element]
                .into_iter()
                .chain(indices.iter().copied())
                .collect(),
            Op::ArrayLength { structure, .. } => vec![*structure],
            Op::ConvertUToPtr { value } => vec![*value],
            Op::PtrEqual { lhs, rhs } | Op::PtrNotEqual { lhs, rhs } | Op::Binary { lhs, rhs, .. } => {
                vec![*lhs, *rhs]
            }
            Op::CompositeConstruct { constituents } => constituents.clone(),
            Op::CompositeExtract { composite, .. } => vec![*composite],
            Op::CompositeInsert { object, composite, .. } => vec![*object, *composite],
            Op::VectorExtractDynamic { vector, index } => vec![*vector, *index],
            Op::VectorInsertDynamic { vector, component, index } => vec![*vector, *component, *index],
            Op::VectorShuffle { first, second, .. } => vec![*first, *second],
            Op::CopyObject { operand } | Op::Unary { operand, .. } | Op::Derivative { operand, .. } => {
                vec![*operand]
            }
            Op::Transpose { matrix } => vec![*matrix],
            Op::Select { condition, accept, reject } => vec![*condition, *accept, *reject],
            Op::ExtInst { set, operands, .. } => std::iter::once(*set).chain(operands.iter().copied()).collect(),
            Op::SampledImage { image, sampler } => vec![*image, *sampler],
            Op::Image { sampled_image } => vec![*sampled_image],
            Op::ImageSample { sampled_image, coordinate, dref, operands, .. } => [*sampled_image, *coordinate]
                .into_iter()
                .chain(dref.iter().copied())
                .chain(operands.ids())
                .collect(),
            Op::ImageFetch { image, coordinate, operands } | Op::ImageRead { image, coordinate, operands } => {
                [*image, *coordinate].into_iter().chain(operands.ids()).collect()
            }
            Op::ImageGather { sampled_image, coordinate, component, dref, operands } => {
                [*sampled_image, *coordinate]
                    .into_iter()
                    .chain(component.iter().copied())
                    .chain(dref.iter().copied())
                    .chain(operands.ids())
                    .collect()
            }
            Op::ImageWrite { image, coordinate, texel, operands } => {
                [*image, *coordinate, *texel].into_iter().chain(operands.ids()).collect()
            }
            Op::ImageQuery { image, lod, .. } => std::iter::once(*image).chain(lod.iter().copied()).collect(),
            Op::Phi { incoming } => incoming.iter().map(|src| src.value).collect(),
            Op::BranchConditional { condition, .. } => vec![*condition],
            Op::Switch { selector, .. } => vec![*selector],
            Op::FunctionCall { arguments, .. } => arguments.clone(),
            Op::ReturnValue { value } => vec![*value],
            Op::DebugDeclare { pointer, .. } => vec![*pointer],
            Op::DebugValue { value, .. } => vec![*value],
        }
    }

    /// Block labels this instruction refers to.
    pub fn label_operands(&self) -> Vec<Id> {
        match self {
            Op::Branch { target } => vec![*target],
            Op::BranchConditional { true_label, false_label, .. } => vec![*true_label, *false_label],
            Op::Switch { default, targets, .. } => std::iter::once(*default)
                .chain(targets.iter().map(|t| t.label))
                .collect(),
            Op::Phi { incoming } => incoming.iter().map(|src| src.parent).collect(),
            _ => Vec::new(),
        }
    }

    fn detail(&self) -> String {
        match self {
            Op::Variable { storage, .. } => storage.name().to_string(),
            Op::Unary { kind, .. } => format!("{kind:?}"),
            Op::Binary { kind, .. } => format!("{kind:?}"),
            Op::Derivative { kind, .. } => format!("{kind:?}"),
            Op::ImageQuery { kind, .. } => format!("{kind:?}"),
            Op::ExtInst { instruction, .. } => format!("#{instruction}"),
            Op::CompositeExtract { indices, .. } | Op::CompositeInsert { indices, .. } => indices
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(" "),
            Op::VectorShuffle { components, .. } => components
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(" "),
            Op::ArrayLength { member, .. } => member.to_string(),
            Op::FunctionCall { function, .. } => function.to_string(),
            Op::DebugDeclare { variable, .. } | Op::DebugValue { variable, .. } => variable.to_string(),
            _ => String::new(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(result) = self.result {
            write!(f, "{result} = ")?;
        }
        write!(f, "{}", self.op.name())?;
        let detail = self.op.detail();
        if !detail.is_empty() {
            write!(f, " {detail}")?;
        }
        for id in self.op.value_operands() {
            write!(f, " {id}")?;
        }
        for label in self.op.label_operands() {
            write!(f, " ->{label}")?;
        }
        if let Some(ty) = self.result_type {
            write!(f, " : {ty}")?;
        }
        Ok(())
    }
}
