//! Byte layout of types in buffer-backed memory.
//!
//! Natural layout follows std430-like rules (vec3 aligned as vec4, array
//! stride rounded to element alignment). `Offset`, `ArrayStride`,
//! `MatrixStride` and `RowMajor` decorations override it.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use super::{ProgramIndex, Type};
use crate::id::Id;
use crate::util::round_up;

/// How a matrix is laid out in memory: the distance between consecutive
/// columns (or rows when `row_major`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatrixLayout {
    pub stride: u32,
    pub row_major: bool,
}

impl ProgramIndex {
    /// Size in bytes of one scalar component of `ty` (which may be a
    /// scalar, vector or matrix).
    pub fn scalar_size(&self, ty: Id) -> Result<u64> {
        match self.ty(ty)? {
            Type::Bool => Ok(4),
            Type::Int { width, .. } | Type::Float { width } => Ok(*width as u64 / 8),
            Type::Vector { component, .. } => self.scalar_size(*component),
            Type::Matrix { column, .. } => self.scalar_size(*column),
            Type::Pointer { .. } => Ok(8),
            other => bail!("{ty} ({}) has no scalar component", other.kind_name()),
        }
    }

    fn vector_align(&self, component: Id, count: u8) -> Result<u64> {
        let s = self.scalar_size(component)?;
        Ok(match count {
            2 => 2 * s,
            _ => 4 * s,
        })
    }

    pub fn align_of(&self, ty: Id) -> Result<u64> {
        match self.ty(ty)? {
            Type::Bool | Type::Int { .. } | Type::Float { .. } | Type::Pointer { .. } => self.scalar_size(ty),
            Type::Vector { component, count } => self.vector_align(*component, *count),
            Type::Matrix { column, .. } => self.align_of(*column),
            Type::Array { element, .. } | Type::RuntimeArray { element } => self.align_of(*element),
            Type::Struct { members } => {
                let mut align = 1;
                for m in members {
                    align = align.max(self.align_of(*m)?);
                }
                Ok(align)
            }
            other => bail!("{ty} ({}) has no memory layout", other.kind_name()),
        }
    }

    /// Size in bytes. Runtime arrays count as empty.
    pub fn byte_size(&self, ty: Id) -> Result<u64> {
        match self.ty(ty)? {
            Type::Bool | Type::Int { .. } | Type::Float { .. } | Type::Pointer { .. } => self.scalar_size(ty),
            Type::Vector { component, count } => Ok(self.scalar_size(*component)? * *count as u64),
            Type::Matrix { count, .. } => {
                let layout = self.default_matrix_layout(ty)?;
                Ok(layout.stride as u64 * *count as u64)
            }
            Type::Array { length, .. } => Ok(self.array_stride(ty)? * *length as u64),
            Type::RuntimeArray { .. } => Ok(0),
            Type::Struct { members } => {
                let mut end = 0;
                for (i, m) in members.iter().enumerate() {
                    let offset = self.member_offset(ty, i as u32)?;
                    let size = match self.member_matrix_layout(ty, i as u32)? {
                        Some(layout) => self.matrix_size_with(*m, layout)?,
                        None => self.byte_size(*m)?,
                    };
                    end = end.max(offset + size);
                }
                Ok(round_up(end, self.align_of(ty)?))
            }
            other => bail!("{ty} ({}) has no memory layout", other.kind_name()),
        }
    }

    fn matrix_size_with(&self, ty: Id, layout: MatrixLayout) -> Result<u64> {
        match self.ty(ty)? {
            Type::Matrix { column, count } => {
                let lines = if layout.row_major {
                    match self.ty(*column)? {
                        Type::Vector { count: rows, .. } => *rows as u64,
                        _ => 1,
                    }
                } else {
                    *count as u64
                };
                Ok(layout.stride as u64 * lines)
            }
            Type::Array { length, .. } => Ok(self.array_stride(ty)? * *length as u64),
            _ => self.byte_size(ty),
        }
    }

    pub fn array_stride(&self, ty: Id) -> Result<u64> {
        if let Some(stride) = self.decorations(ty).array_stride {
            return Ok(stride as u64);
        }
        match self.ty(ty)? {
            Type::Array { element, .. } | Type::RuntimeArray { element } => {
                let size = self.byte_size(*element)?;
                Ok(round_up(size, self.align_of(*element)?))
            }
            Type::Pointer { pointee, .. } => {
                let size = self.byte_size(*pointee)?;
                Ok(round_up(size, self.align_of(*pointee)?))
            }
            other => bail!("{ty} ({}) has no array stride", other.kind_name()),
        }
    }

    pub fn member_offset(&self, struct_ty: Id, member: u32) -> Result<u64> {
        if let Some(offset) = self.member_decorations(struct_ty, member).offset {
            return Ok(offset as u64);
        }
        let Type::Struct { members } = self.ty(struct_ty)? else {
            bail!("{struct_ty} is not a struct");
        };
        let mut offset = 0;
        for (i, m) in members.iter().enumerate() {
            let aligned = round_up(offset, self.align_of(*m)?);
            if i as u32 == member {
                return Ok(aligned);
            }
            offset = aligned + self.byte_size(*m)?;
        }
        bail!("{struct_ty} has no member {member}")
    }

    /// Column-major layout with the natural column stride.
    pub fn default_matrix_layout(&self, ty: Id) -> Result<MatrixLayout> {
        let Type::Matrix { column, .. } = self.ty(ty)? else {
            bail!("{ty} is not a matrix");
        };
        let Type::Vector { component, count } = self.ty(*column)? else {
            bail!("matrix {ty} column is not a vector");
        };
        let size = self.scalar_size(*component)? * *count as u64;
        let stride = round_up(size, self.vector_align(*component, *count)?);
        Ok(MatrixLayout { stride: stride as u32, row_major: false })
    }

    /// Matrix layout of a struct member whose type is a matrix (or an
    /// array of matrices) when decorations make it differ from the natural one.
    pub fn member_matrix_layout(&self, struct_ty: Id, member: u32) -> Result<Option<MatrixLayout>> {
        let decorations = self.member_decorations(struct_ty, member);
        if decorations.matrix_stride.is_none() && !decorations.row_major {
            return Ok(None);
        }
        let Type::Struct { members } = self.ty(struct_ty)? else {
            bail!("{struct_ty} is not a struct");
        };
        let Some(mut ty) = members.get(member as usize).copied() else {
            bail!("{struct_ty} has no member {member}");
        };
        while let Type::Array { element, .. } | Type::RuntimeArray { element } = self.ty(ty)? {
            ty = *element;
        }
        let Type::Matrix { column, count } = self.ty(ty)? else {
            return Ok(None);
        };
        let natural = if decorations.row_major {
            // rows are vectors of `count` components
            let Type::Vector { component, .. } = self.ty(*column)? else {
                bail!("matrix {ty} column is not a vector");
            };
            let size = self.scalar_size(*component)? * *count as u64;
            round_up(size, self.vector_align(*component, *count)?) as u32
        } else {
            self.default_matrix_layout(ty)?.stride
        };
        Ok(Some(MatrixLayout {
            stride: decorations.matrix_stride.unwrap_or(natural),
            row_major: decorations.row_major,
        }))
    }
}
