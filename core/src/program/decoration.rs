use serde::{Deserialize, Serialize};

use crate::id::Id;

/// Built-in variables the debugger knows how to source or synthesize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderBuiltin {
    Position,
    PointSize,
    ClipDistance,
    CullDistance,
    VertexIndex,
    InstanceIndex,
    BaseVertex,
    BaseInstance,
    DrawIndex,
    PrimitiveId,
    Layer,
    ViewportIndex,
    ViewIndex,
    FragCoord,
    FrontFacing,
    PointCoord,
    SampleId,
    SamplePosition,
    SampleMask,
    FragDepth,
    HelperInvocation,
    NumWorkgroups,
    WorkgroupSize,
    WorkgroupId,
    LocalInvocationId,
    GlobalInvocationId,
    LocalInvocationIndex,
    SubgroupSize,
    SubgroupLocalInvocationId,
}

impl ShaderBuiltin {
    pub fn name(self) -> &'static str {
        match self {
            ShaderBuiltin::Position => "Position",
            ShaderBuiltin::PointSize => "PointSize",
            ShaderBuiltin::ClipDistance => "ClipDistance",
            ShaderBuiltin::CullDistance => "CullDistance",
            ShaderBuiltin::VertexIndex => "VertexIndex",
            ShaderBuiltin::InstanceIndex => "InstanceIndex",
            ShaderBuiltin::BaseVertex => "BaseVertex",
            ShaderBuiltin::BaseInstance => "BaseInstance",
            ShaderBuiltin::DrawIndex => "DrawIndex",
            ShaderBuiltin::PrimitiveId => "PrimitiveId",
            ShaderBuiltin::Layer => "Layer",
            ShaderBuiltin::ViewportIndex => "ViewportIndex",
            ShaderBuiltin::ViewIndex => "ViewIndex",
            ShaderBuiltin::FragCoord => "FragCoord",
            ShaderBuiltin::FrontFacing => "FrontFacing",
            ShaderBuiltin::PointCoord => "PointCoord",
            ShaderBuiltin::SampleId => "SampleId",
            ShaderBuiltin::SamplePosition => "SamplePosition",
            ShaderBuiltin::SampleMask => "SampleMask",
            ShaderBuiltin::FragDepth => "FragDepth",
            ShaderBuiltin::HelperInvocation => "HelperInvocation",
            ShaderBuiltin::NumWorkgroups => "NumWorkgroups",
            ShaderBuiltin::WorkgroupSize => "WorkgroupSize",
            ShaderBuiltin::WorkgroupId => "WorkgroupId",
            ShaderBuiltin::LocalInvocationId => "LocalInvocationId",
            ShaderBuiltin::GlobalInvocationId => "GlobalInvocationId",
            ShaderBuiltin::LocalInvocationIndex => "LocalInvocationIndex",
            ShaderBuiltin::SubgroupSize => "SubgroupSize",
            ShaderBuiltin::SubgroupLocalInvocationId => "SubgroupLocalInvocationId",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decoration {
    BuiltIn(ShaderBuiltin),
    Location(u32),
    Component(u32),
    Binding(u32),
    DescriptorSet(u32),
    Offset(u32),
    ArrayStride(u32),
    MatrixStride(u32),
    RowMajor,
    ColMajor,
    Flat,
    NoPerspective,
    Centroid,
    NonWritable,
    NonReadable,
    Block,
    BufferBlock,
    SpecId(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecorationEntry {
    pub target: Id,
    /// Set for struct member decorations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<u32>,
    pub decoration: Decoration,
}

/// Folded decorations of one Id (or one struct member).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Decorations {
    pub builtin: Option<ShaderBuiltin>,
    pub location: Option<u32>,
    pub component: Option<u32>,
    pub binding: Option<u32>,
    pub set: Option<u32>,
    pub offset: Option<u32>,
    pub array_stride: Option<u32>,
    pub matrix_stride: Option<u32>,
    pub row_major: bool,
    pub flat: bool,
    pub non_writable: bool,
    pub non_readable: bool,
    pub block: bool,
    pub buffer_block: bool,
    pub spec_id: Option<u32>,
}

impl Decorations {
    pub fn apply(&mut self, decoration: &Decoration) {
        match *decoration {
            Decoration::BuiltIn(b) => self.builtin = Some(b),
            Decoration::Location(l) => self.location = Some(l),
            Decoration::Component(c) => self.component = Some(c),
            Decoration::Binding(b) => self.binding = Some(b),
            Decoration::DescriptorSet(s) => self.set = Some(s),
            Decoration::Offset(o) => self.offset = Some(o),
            Decoration::ArrayStride(s) => self.array_stride = Some(s),
            Decoration::MatrixStride(s) => self.matrix_stride = Some(s),
            Decoration::RowMajor => self.row_major = true,
            Decoration::ColMajor => self.row_major = false,
            Decoration::Flat => self.flat = true,
            Decoration::NoPerspective | Decoration::Centroid => {}
            Decoration::NonWritable => self.non_writable = true,
            Decoration::NonReadable => self.non_readable = true,
            Decoration::Block => self.block = true,
            Decoration::BufferBlock => self.buffer_block = true,
            Decoration::SpecId(id) => self.spec_id = Some(id),
        }
    }
}
