use serde::{Deserialize, Serialize};

use crate::id::Id;

/// Where a variable's storage lives. Mirrors the storage classes the decoded
/// program can carry; the debugger maps each one onto a pointer base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    UniformConstant,
    Input,
    Uniform,
    Output,
    Workgroup,
    Private,
    Function,
    PushConstant,
    Image,
    StorageBuffer,
    PhysicalStorageBuffer,
}

impl StorageClass {
    /// Storage that is backed by a GPU buffer and therefore read or written
    /// through the API wrapper rather than held in a lane.
    pub fn is_buffer_backed(self) -> bool {
        matches!(self, StorageClass::StorageBuffer | StorageClass::PhysicalStorageBuffer)
    }

    pub fn name(self) -> &'static str {
        match self {
            StorageClass::UniformConstant => "UniformConstant",
            StorageClass::Input => "Input",
            StorageClass::Uniform => "Uniform",
            StorageClass::Output => "Output",
            StorageClass::Workgroup => "Workgroup",
            StorageClass::Private => "Private",
            StorageClass::Function => "Function",
            StorageClass::PushConstant => "PushConstant",
            StorageClass::Image => "Image",
            StorageClass::StorageBuffer => "StorageBuffer",
            StorageClass::PhysicalStorageBuffer => "PhysicalStorageBuffer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim {
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "2d")]
    D2,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "cube")]
    Cube,
    #[serde(rename = "rect")]
    Rect,
    #[serde(rename = "buffer")]
    Buffer,
    #[serde(rename = "subpass")]
    SubpassData,
}

impl Dim {
    /// Number of coordinate components addressing a texel, excluding the array layer.
    pub fn coordinate_count(self) -> usize {
        match self {
            Dim::D1 | Dim::Buffer => 1,
            Dim::D2 | Dim::Rect | Dim::SubpassData => 2,
            Dim::D3 | Dim::Cube => 3,
        }
    }
}

/// A decoded type declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Type {
    Void,
    Bool,
    Int {
        width: u8,
        signed: bool,
    },
    Float {
        width: u8,
    },
    Vector {
        component: Id,
        count: u8,
    },
    /// `count` columns, each of type `column` (a vector).
    Matrix {
        column: Id,
        count: u8,
    },
    Array {
        element: Id,
        length: u32,
    },
    RuntimeArray {
        element: Id,
    },
    Struct {
        members: Vec<Id>,
    },
    Pointer {
        storage: StorageClass,
        pointee: Id,
    },
    Image {
        sampled_type: Id,
        dim: Dim,
        #[serde(default)]
        depth: bool,
        #[serde(default)]
        arrayed: bool,
        #[serde(default)]
        multisampled: bool,
        /// Storage images are read/written texel by texel; sampled images go through samplers.
        #[serde(default)]
        storage: bool,
    },
    Sampler,
    SampledImage {
        image: Id,
    },
    Function {
        return_type: Id,
        #[serde(default)]
        params: Vec<Id>,
    },
}

impl Type {
    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Bool | Type::Int { .. } | Type::Float { .. })
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Type::Array { .. } | Type::RuntimeArray { .. } | Type::Struct { .. })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Type::Void => "void",
            Type::Bool => "bool",
            Type::Int { .. } => "int",
            Type::Float { .. } => "float",
            Type::Vector { .. } => "vector",
            Type::Matrix { .. } => "matrix",
            Type::Array { .. } => "array",
            Type::RuntimeArray { .. } => "runtime_array",
            Type::Struct { .. } => "struct",
            Type::Pointer { .. } => "pointer",
            Type::Image { .. } => "image",
            Type::Sampler => "sampler",
            Type::SampledImage { .. } => "sampled_image",
            Type::Function { .. } => "function",
        }
    }

    /// Ids this type refers to.
    pub fn referenced_types(&self) -> Vec<Id> {
        match self {
            Type::Vector { component, .. } => vec![*component],
            Type::Matrix { column, .. } => vec![*column],
            Type::Array { element, .. } | Type::RuntimeArray { element } => vec![*element],
            Type::Struct { members } => members.clone(),
            Type::Pointer { pointee, .. } => vec![*pointee],
            Type::Image { sampled_type, .. } => vec![*sampled_type],
            Type::SampledImage { image } => vec![*image],
            Type::Function { return_type, params } => {
                let mut out = Vec::with_capacity(params.len() + 1);
                out.push(*return_type);
                out.extend(params.iter().copied());
                out
            }
            Type::Void | Type::Bool | Type::Int { .. } | Type::Float { .. } | Type::Sampler => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub id: Id,
    #[serde(flatten)]
    pub ty: Type,
}
