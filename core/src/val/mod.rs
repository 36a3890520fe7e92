//! Typed values flowing through the interpreter.

mod convert;
mod ops;
mod pointer;


pub use convert::{ValueLayout, decode_value, encode_value};
pub use ops::{binary, select, unary};
pub use pointer::{Pointer, PointerBase};

use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::api::BindingSlot;

/// Maximum number of scalar components held inline (a 4x4 matrix).
pub const MAX_COMPONENTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarType {
    Float,
    Double,
    Half,
    SInt,
    UInt,
    SShort,
    UShort,
    SLong,
    ULong,
    SByte,
    UByte,
    Bool,
    Struct,
    Array,
    Pointer,
    ReadOnlyResource,
    ReadWriteResource,
    Sampler,
    Unknown,
}

impl VarType {
    /// Size of one component in bytes; 0 for non-scalar kinds.
    pub fn byte_width(self) -> u32 {
        match self {
            VarType::SByte | VarType::UByte => 1,
            VarType::Half | VarType::SShort | VarType::UShort => 2,
            VarType::Float | VarType::SInt | VarType::UInt | VarType::Bool => 4,
            VarType::Double | VarType::SLong | VarType::ULong | VarType::Pointer => 8,
            _ => 0,
        }
    }

    pub fn bit_mask(self) -> u64 {
        match self.byte_width() {
            0 | 8 => u64::MAX,
            w => (1u64 << (w * 8)) - 1,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, VarType::Float | VarType::Double | VarType::Half)
    }

    pub fn is_signed_int(self) -> bool {
        matches!(self, VarType::SInt | VarType::SShort | VarType::SLong | VarType::SByte)
    }

    pub fn is_unsigned_int(self) -> bool {
        matches!(self, VarType::UInt | VarType::UShort | VarType::ULong | VarType::UByte)
    }

    pub fn is_integer(self) -> bool {
        self.is_signed_int() || self.is_unsigned_int()
    }

    pub fn is_resource(self) -> bool {
        matches!(self, VarType::ReadOnlyResource | VarType::ReadWriteResource | VarType::Sampler)
    }

    pub fn name(self) -> &'static str {
        match self {
            VarType::Float => "float",
            VarType::Double => "double",
            VarType::Half => "half",
            VarType::SInt => "int",
            VarType::UInt => "uint",
            VarType::SShort => "short",
            VarType::UShort => "ushort",
            VarType::SLong => "long",
            VarType::ULong => "ulong",
            VarType::SByte => "byte",
            VarType::UByte => "ubyte",
            VarType::Bool => "bool",
            VarType::Struct => "struct",
            VarType::Array => "array",
            VarType::Pointer => "pointer",
            VarType::ReadOnlyResource => "resource",
            VarType::ReadWriteResource => "rw_resource",
            VarType::Sampler => "sampler",
            VarType::Unknown => "unknown",
        }
    }

    pub fn int(width: u8, signed: bool) -> Result<Self> {
        Ok(match (width, signed) {
            (8, true) => VarType::SByte,
            (8, false) => VarType::UByte,
            (16, true) => VarType::SShort,
            (16, false) => VarType::UShort,
            (32, true) => VarType::SInt,
            (32, false) => VarType::UInt,
            (64, true) => VarType::SLong,
            (64, false) => VarType::ULong,
            _ => bail!("unsupported integer width {width}"),
        })
    }

    pub fn float(width: u8) -> Result<Self> {
        Ok(match width {
            16 => VarType::Half,
            32 => VarType::Float,
            64 => VarType::Double,
            _ => bail!("unsupported float width {width}"),
        })
    }
}

/// A typed value: scalar, vector or matrix components stored inline as raw
/// bits in row-major order (`row * columns + column`), or ordered members
/// for structs and arrays. Pointers and resource handles carry their
/// descriptor alongside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaderVariable {
    pub name: String,
    pub ty: VarType,
    pub rows: u8,
    pub columns: u8,
    pub value: [u64; MAX_COMPONENTS],
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<ShaderVariable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<Box<Pointer>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<BindingSlot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampler: Option<BindingSlot>,
}

impl ShaderVariable {
    pub fn new(name: impl Into<String>, ty: VarType, rows: u8, columns: u8) -> Self {
        Self {
            name: name.into(),
            ty,
            rows,
            columns,
            value: [0; MAX_COMPONENTS],
            members: Vec::new(),
            pointer: None,
            binding: None,
            sampler: None,
        }
    }

    pub fn scalar_f32(name: impl Into<String>, v: f32) -> Self {
        Self::vector_f32(name, &[v])
    }

    pub fn vector_f32(name: impl Into<String>, values: &[f32]) -> Self {
        let mut var = Self::new(name, VarType::Float, 1, values.len() as u8);
        for (i, v) in values.iter().enumerate().take(MAX_COMPONENTS) {
            var.value[i] = v.to_bits() as u64;
        }
        var
    }

    pub fn scalar_u32(name: impl Into<String>, v: u32) -> Self {
        Self::vector_u32(name, &[v])
    }

    pub fn vector_u32(name: impl Into<String>, values: &[u32]) -> Self {
        let mut var = Self::new(name, VarType::UInt, 1, values.len() as u8);
        for (i, v) in values.iter().enumerate().take(MAX_COMPONENTS) {
            var.value[i] = *v as u64;
        }
        var
    }

    pub fn scalar_i32(name: impl Into<String>, v: i32) -> Self {
        Self::vector_i32(name, &[v])
    }

    pub fn vector_i32(name: impl Into<String>, values: &[i32]) -> Self {
        let mut var = Self::new(name, VarType::SInt, 1, values.len() as u8);
        for (i, v) in values.iter().enumerate().take(MAX_COMPONENTS) {
            var.value[i] = *v as u32 as u64;
        }
        var
    }

    pub fn scalar_bool(name: impl Into<String>, v: bool) -> Self {
        let mut var = Self::new(name, VarType::Bool, 1, 1);
        var.value[0] = v as u64;
        var
    }

    pub fn structure(name: impl Into<String>, members: Vec<ShaderVariable>) -> Self {
        let mut var = Self::new(name, VarType::Struct, 0, 0);
        var.members = members;
        var
    }

    pub fn array(name: impl Into<String>, elements: Vec<ShaderVariable>) -> Self {
        let mut var = Self::new(name, VarType::Array, 0, 0);
        var.members = elements;
        var
    }

    pub fn from_pointer(name: impl Into<String>, pointer: Pointer) -> Self {
        let mut var = Self::new(name, VarType::Pointer, 1, 1);
        var.pointer = Some(Box::new(pointer));
        var
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[inline]
    pub fn component_count(&self) -> usize {
        (self.rows as usize * self.columns as usize).min(MAX_COMPONENTS)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.ty, VarType::Struct | VarType::Array)
    }

    pub fn is_scalar(&self) -> bool {
        !self.is_aggregate() && self.rows == 1 && self.columns == 1
    }

    pub fn is_vector(&self) -> bool {
        !self.is_aggregate() && self.rows == 1 && self.columns > 1
    }

    pub fn is_matrix(&self) -> bool {
        !self.is_aggregate() && self.rows > 1
    }

    pub fn is_pointer(&self) -> bool {
        self.ty == VarType::Pointer
    }

    pub fn pointer(&self) -> Option<&Pointer> {
        self.pointer.as_deref()
    }

    #[inline]
    pub fn raw(&self, i: usize) -> u64 {
        self.value.get(i).copied().unwrap_or(0) & self.ty.bit_mask()
    }

    #[inline]
    pub fn set_raw(&mut self, i: usize, bits: u64) {
        let mask = self.ty.bit_mask();
        if let Some(slot) = self.value.get_mut(i) {
            *slot = if self.ty == VarType::Bool { (bits != 0) as u64 } else { bits & mask };
        }
    }

    pub fn f32v(&self, i: usize) -> f32 {
        f32::from_bits(self.raw(i) as u32)
    }

    pub fn f64v(&self, i: usize) -> f64 {
        f64::from_bits(self.raw(i))
    }

    pub fn u32v(&self, i: usize) -> u32 {
        self.raw(i) as u32
    }

    pub fn i32v(&self, i: usize) -> i32 {
        self.raw(i) as u32 as i32
    }

    pub fn u64v(&self, i: usize) -> u64 {
        self.raw(i)
    }

    pub fn truthy(&self, i: usize) -> bool {
        self.raw(i) != 0
    }

    /// Component `i` as f64, converting from whatever numeric type is stored.
    pub fn float(&self, i: usize) -> f64 {
        let bits = self.raw(i);
        match self.ty {
            VarType::Float => f32::from_bits(bits as u32) as f64,
            VarType::Double => f64::from_bits(bits),
            VarType::Half => half::f16::from_bits(bits as u16).to_f64(),
            VarType::Bool => bits as f64,
            t if t.is_signed_int() => self.int(i) as f64,
            _ => bits as f64,
        }
    }

    /// Store `v` into component `i`, rounding to the stored float width.
    /// Integer-typed values receive the truncated value.
    pub fn set_float(&mut self, i: usize, v: f64) {
        let bits = match self.ty {
            VarType::Float => (v as f32).to_bits() as u64,
            VarType::Double => v.to_bits(),
            VarType::Half => half::f16::from_f64(v).to_bits() as u64,
            VarType::Bool => (v != 0.0) as u64,
            t if t.is_signed_int() => v as i64 as u64,
            _ => v as u64,
        };
        self.set_raw(i, bits);
    }

    /// Component `i` sign-extended from the stored width.
    pub fn int(&self, i: usize) -> i64 {
        let bits = self.raw(i);
        match self.ty.byte_width() {
            1 => bits as u8 as i8 as i64,
            2 => bits as u16 as i16 as i64,
            4 => bits as u32 as i32 as i64,
            _ => bits as i64,
        }
    }

    /// Component `i` zero-extended from the stored width.
    pub fn uint(&self, i: usize) -> u64 {
        self.raw(i)
    }

    pub fn set_int(&mut self, i: usize, v: i64) {
        self.set_raw(i, v as u64);
    }

    /// Scalar holding component `i`.
    pub fn component(&self, i: usize) -> ShaderVariable {
        let mut out = ShaderVariable::new(self.name.clone(), self.ty, 1, 1);
        out.value[0] = self.raw(i);
        out
    }

    pub fn column(&self, c: usize) -> Option<ShaderVariable> {
        if c >= self.columns as usize {
            return None;
        }
        let mut out = ShaderVariable::new(self.name.clone(), self.ty, 1, self.rows);
        for r in 0..self.rows as usize {
            out.value[r] = self.raw(r * self.columns as usize + c);
        }
        Some(out)
    }

    pub fn set_column(&mut self, c: usize, col: &ShaderVariable) -> bool {
        if c >= self.columns as usize {
            return false;
        }
        let columns = self.columns as usize;
        for r in 0..(self.rows as usize).min(col.component_count()) {
            self.set_raw(r * columns + c, col.raw(r));
        }
        true
    }

    /// Same shape, every component and member zeroed, descriptors dropped.
    pub fn zeroed(&self) -> ShaderVariable {
        let mut out = ShaderVariable::new(self.name.clone(), self.ty, self.rows, self.columns);
        out.members = self.members.iter().map(ShaderVariable::zeroed).collect();
        out
    }

    pub fn has_nan_or_inf(&self) -> bool {
        if self.is_aggregate() {
            return self.members.iter().any(ShaderVariable::has_nan_or_inf);
        }
        self.ty.is_float() && (0..self.component_count()).any(|i| !self.float(i).is_finite())
    }

    /// Fill components (or members) from a list of parts, as composite
    /// construction does: aggregates take one part per member, matrices one
    /// column per part, vectors the flattened components of every part.
    pub fn compose(&mut self, parts: &[ShaderVariable]) -> Result<()> {
        if self.is_aggregate() {
            if parts.len() != self.members.len() {
                bail!("composite expects {} constituents, got {}", self.members.len(), parts.len());
            }
            for (member, part) in self.members.iter_mut().zip(parts) {
                let name = std::mem::take(&mut member.name);
                *member = part.clone().with_name(name);
            }
            return Ok(());
        }
        if self.is_matrix() {
            for (c, part) in parts.iter().enumerate() {
                if !self.set_column(c, part) {
                    bail!("too many columns for {}x{} matrix", self.rows, self.columns);
                }
            }
            return Ok(());
        }
        let mut k = 0;
        for part in parts {
            for j in 0..part.component_count() {
                if k >= self.component_count() {
                    bail!("too many components for a {}-wide vector", self.component_count());
                }
                self.set_raw(k, part.raw(j));
                k += 1;
            }
        }
        Ok(())
    }

    /// Copy components from `other`, converting numerically when the
    /// component types differ.
    pub fn assign_converted(&mut self, other: &ShaderVariable) {
        let n = self.component_count().min(other.component_count());
        for i in 0..n {
            if self.ty == other.ty {
                self.set_raw(i, other.raw(i));
            } else if self.ty.is_float() {
                self.set_float(i, other.float(i));
            } else if other.ty.is_float() {
                self.set_float(i, other.float(i));
            } else if other.ty.is_signed_int() {
                self.set_int(i, other.int(i));
            } else {
                self.set_raw(i, other.uint(i));
            }
        }
    }

    fn component_string(&self, i: usize) -> String {
        match self.ty {
            VarType::Bool => self.truthy(i).to_string(),
            t if t.is_float() => format!("{}", self.float(i)),
            t if t.is_signed_int() => self.int(i).to_string(),
            _ => self.uint(i).to_string(),
        }
    }

    /// Human-readable value, without the name.
    pub fn value_string(&self) -> String {
        if self.is_aggregate() {
            let inner: Vec<String> = self
                .members
                .iter()
                .map(|m| format!("{} = {}", m.name, m.value_string()))
                .collect();
            return format!("{{ {} }}", inner.join(", "));
        }
        if let Some(ptr) = &self.pointer {
            return ptr.to_string();
        }
        if self.ty.is_resource() {
            return match (self.binding, self.sampler) {
                (Some(b), Some(s)) => format!("{}({b}, sampler {s})", self.ty.name()),
                (Some(b), None) => format!("{}({b})", self.ty.name()),
                _ => format!("{}(unbound)", self.ty.name()),
            };
        }
        if self.is_scalar() {
            return self.component_string(0);
        }
        let columns = self.columns as usize;
        let rows: Vec<String> = (0..self.rows as usize)
            .map(|r| {
                let comps: Vec<String> = (0..columns).map(|c| self.component_string(r * columns + c)).collect();
                format!("{{{}}}", comps.join(", "))
            })
            .collect();
        if rows.len() == 1 { rows[0].clone() } else { format!("{{{}}}", rows.join(", ")) }
    }
}

impl fmt::Display for ShaderVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} = {}", self.name, self.ty.name(), self.value_string())
    }
}
