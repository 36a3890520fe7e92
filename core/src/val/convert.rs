//! Conversion between [`ShaderVariable`]s and buffer bytes.

use anyhow::{Result, bail};

use super::{Pointer, PointerBase, ShaderVariable};
use crate::id::Id;
use crate::program::{MatrixLayout, ProgramIndex, StorageClass, Type};

/// Layout overrides inherited from the enclosing struct member or from the
/// pointer used for the access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueLayout {
    pub matrix: Option<MatrixLayout>,
    pub element_stride: Option<u32>,
}

fn read_word(bytes: &[u8], offset: u64, width: usize) -> u64 {
    let mut word = [0u8; 8];
    let start = offset as usize;
    for (i, b) in word.iter_mut().enumerate().take(width) {
        *b = bytes.get(start + i).copied().unwrap_or(0);
    }
    u64::from_le_bytes(word)
}

fn write_word(bytes: &mut [u8], offset: u64, width: usize, value: u64) {
    let start = offset as usize;
    for (i, b) in value.to_le_bytes().iter().enumerate().take(width) {
        if let Some(slot) = bytes.get_mut(start + i) {
            *slot = *b;
        }
    }
}

/// Decode a value of type `ty` from `bytes` (positioned at the value's start).
/// Bytes past the end of the slice read as zero.
pub fn decode_value(index: &ProgramIndex, ty: Id, bytes: &[u8], layout: ValueLayout) -> Result<ShaderVariable> {
    let mut var = index.make_variable(ty, "")?;
    fill(index, ty, &mut var, bytes, 0, layout)?;
    Ok(var)
}

fn fill(
    index: &ProgramIndex,
    ty: Id,
    var: &mut ShaderVariable,
    bytes: &[u8],
    base: u64,
    layout: ValueLayout,
) -> Result<()> {
    match index.ty(ty)? {
        Type::Bool | Type::Int { .. } | Type::Float { .. } | Type::Vector { .. } => {
            let width = index.scalar_size(ty)?;
            let stride = layout.element_stride.map(u64::from).unwrap_or(width);
            for i in 0..var.component_count() {
                var.set_raw(i, read_word(bytes, base + i as u64 * stride, width as usize));
            }
        }
        Type::Matrix { .. } => {
            let ml = match layout.matrix {
                Some(ml) => ml,
                None => index.default_matrix_layout(ty)?,
            };
            let s = index.scalar_size(ty)?;
            let (rows, cols) = (var.rows as u64, var.columns as u64);
            for c in 0..cols {
                for r in 0..rows {
                    let off = if ml.row_major { r * ml.stride as u64 + c * s } else { c * ml.stride as u64 + r * s };
                    var.set_raw((r * cols + c) as usize, read_word(bytes, base + off, s as usize));
                }
            }
        }
        Type::Array { element, .. } | Type::RuntimeArray { element } => {
            let stride = index.array_stride(ty)?;
            let inner = ValueLayout { matrix: layout.matrix, element_stride: None };
            for (i, member) in var.members.iter_mut().enumerate() {
                fill(index, *element, member, bytes, base + i as u64 * stride, inner)?;
            }
        }
        Type::Struct { members } => {
            for (i, (member_ty, member)) in members.iter().zip(var.members.iter_mut()).enumerate() {
                let offset = index.member_offset(ty, i as u32)?;
                let inner = ValueLayout { matrix: index.member_matrix_layout(ty, i as u32)?, element_stride: None };
                fill(index, *member_ty, member, bytes, base + offset, inner)?;
            }
        }
        Type::Pointer { storage: StorageClass::PhysicalStorageBuffer, pointee } => {
            let address = read_word(bytes, base, 8);
            var.pointer = Some(Box::new(Pointer::new(
                PointerBase::Address { address },
                StorageClass::PhysicalStorageBuffer,
                *pointee,
            )));
        }
        other => bail!("{} values cannot be read from memory", other.kind_name()),
    }
    Ok(())
}

/// Encode `value` as type `ty` into `bytes` (positioned at the value's start).
/// Writes past the end of the slice are dropped.
pub fn encode_value(
    index: &ProgramIndex,
    ty: Id,
    value: &ShaderVariable,
    bytes: &mut [u8],
    layout: ValueLayout,
) -> Result<()> {
    store(index, ty, value, bytes, 0, layout)
}

fn store(
    index: &ProgramIndex,
    ty: Id,
    var: &ShaderVariable,
    bytes: &mut [u8],
    base: u64,
    layout: ValueLayout,
) -> Result<()> {
    match index.ty(ty)? {
        Type::Bool | Type::Int { .. } | Type::Float { .. } | Type::Vector { .. } => {
            let width = index.scalar_size(ty)?;
            let stride = layout.element_stride.map(u64::from).unwrap_or(width);
            for i in 0..var.component_count() {
                write_word(bytes, base + i as u64 * stride, width as usize, var.raw(i));
            }
        }
        Type::Matrix { .. } => {
            let ml = match layout.matrix {
                Some(ml) => ml,
                None => index.default_matrix_layout(ty)?,
            };
            let s = index.scalar_size(ty)?;
            let (rows, cols) = (var.rows as u64, var.columns as u64);
            for c in 0..cols {
                for r in 0..rows {
                    let off = if ml.row_major { r * ml.stride as u64 + c * s } else { c * ml.stride as u64 + r * s };
                    write_word(bytes, base + off, s as usize, var.raw((r * cols + c) as usize));
                }
            }
        }
        Type::Array { element, .. } | Type::RuntimeArray { element } => {
            let stride = index.array_stride(ty)?;
            let inner = ValueLayout { matrix: layout.matrix, element_stride: None };
            for (i, member) in var.members.iter().enumerate() {
                store(index, *element, member, bytes, base + i as u64 * stride, inner)?;
            }
        }
        Type::Struct { members } => {
            for (i, (member_ty, member)) in members.iter().zip(var.members.iter()).enumerate() {
                let offset = index.member_offset(ty, i as u32)?;
                let inner = ValueLayout { matrix: index.member_matrix_layout(ty, i as u32)?, element_stride: None };
                store(index, *member_ty, member, bytes, base + offset, inner)?;
            }
        }
        Type::Pointer { storage: StorageClass::PhysicalStorageBuffer, .. } => {
            let address = var.pointer().and_then(Pointer::address).unwrap_or(0);
            write_word(bytes, base, 8, address);
        }
        other => bail!("{} values cannot be written to memory", other.kind_name()),
    }
    Ok(())
}
