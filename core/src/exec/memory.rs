//! Pointer resolution, loads and stores.
//!
//! In-lane storage (private, local, workgroup, constant blocks) is a tree of
//! [`ShaderVariable`]s walked by the pointer's access chain. Buffer and
//! address storage is reached through the API wrapper using the pointer's
//! byte offset and the pointee's layout.

use anyhow::{Result, anyhow, bail};
use tracing::trace;

use super::{StepContext, ThreadState};
use crate::api::{BindingSlot, MessageSeverity};
use crate::id::Id;
use crate::program::{ProgramIndex, Type};
use crate::util::round_up;
use crate::val::{Pointer, PointerBase, ShaderVariable, ValueLayout, decode_value, encode_value};

/// Value at `chain` below `root`: members for structs and arrays, columns
/// for matrices, components for vectors.
pub fn read_path(root: &ShaderVariable, chain: &[u32]) -> Result<ShaderVariable> {
    let Some((&first, rest)) = chain.split_first() else {
        return Ok(root.clone());
    };
    let index = first as usize;
    if root.is_aggregate() {
        let member = root
            .members
            .get(index)
            .ok_or_else(|| anyhow!("index {index} out of range for {} members", root.members.len()))?;
        return read_path(member, rest);
    }
    if root.is_matrix() {
        let column = root
            .column(index)
            .ok_or_else(|| anyhow!("column {index} out of range for {} columns", root.columns))?;
        return read_path(&column, rest);
    }
    if !rest.is_empty() {
        bail!("cannot index into a scalar");
    }
    if index >= root.component_count() {
        bail!("component {index} out of range for {} components", root.component_count());
    }
    Ok(root.component(index))
}

/// Replace the value at `chain` below `root` with `value`, keeping names.
pub fn write_path(root: &mut ShaderVariable, chain: &[u32], value: &ShaderVariable) -> Result<()> {
    let Some((&first, rest)) = chain.split_first() else {
        let name = std::mem::take(&mut root.name);
        *root = value.clone().with_name(name);
        return Ok(());
    };
    let index = first as usize;
    if root.is_aggregate() {
        let count = root.members.len();
        let member = root
            .members
            .get_mut(index)
            .ok_or_else(|| anyhow!("index {index} out of range for {count} members"))?;
        return write_path(member, rest, value);
    }
    if root.is_matrix() {
        let mut column = root
            .column(index)
            .ok_or_else(|| anyhow!("column {index} out of range for {} columns", root.columns))?;
        write_path(&mut column, rest, value)?;
        root.set_column(index, &column);
        return Ok(());
    }
    if !rest.is_empty() {
        bail!("cannot index into a scalar");
    }
    if index >= root.component_count() {
        bail!("component {index} out of range for {} components", root.component_count());
    }
    root.set_raw(index, value.raw(0));
    Ok(())
}

/// Bytes spanned by a value of `ty` under `layout`; strided vectors and
/// matrices with an explicit stride may not be contiguous.
fn value_extent(program: &ProgramIndex, ty: Id, layout: ValueLayout) -> Result<u64> {
    match (program.ty(ty)?, layout.element_stride, layout.matrix) {
        (Type::Vector { count, .. }, Some(stride), _) => {
            Ok((*count as u64 - 1) * stride as u64 + program.scalar_size(ty)?)
        }
        (Type::Matrix { column, count }, _, Some(ml)) => {
            let rows = match program.ty(*column)? {
                Type::Vector { count, .. } => *count as u64,
                _ => 1,
            };
            let s = program.scalar_size(ty)?;
            let stride = ml.stride as u64;
            Ok(if ml.row_major {
                (rows - 1) * stride + *count as u64 * s
            } else {
                (*count as u64 - 1) * stride + rows * s
            })
        }
        _ => program.byte_size(ty),
    }
}

fn element_stride_of(program: &ProgramIndex, ty: Id) -> Result<u64> {
    Ok(round_up(program.byte_size(ty)?, program.align_of(ty)?))
}

/// Element type and length of an array of buffer blocks (a descriptor array).
fn block_array(program: &ProgramIndex, ty: Id) -> Option<(Id, Option<u64>)> {
    let (element, length) = match program.try_ty(ty)? {
        Type::Array { element, length } => (*element, Some(*length as u64)),
        Type::RuntimeArray { element } => (*element, None),
        _ => return None,
    };
    let decorations = program.decorations(element);
    (decorations.block || decorations.buffer_block).then_some((element, length))
}

impl ThreadState {
    /// Check a dynamic index. Out-of-range indices are reported; they are
    /// clamped when the session clamps, otherwise `None`.
    pub(crate) fn checked_index(&self, ctx: &mut StepContext<'_>, index: i64, len: u64, what: &str) -> Option<usize> {
        if index >= 0 && (index as u64) < len {
            return Some(index as usize);
        }
        ctx.report(
            MessageSeverity::Medium,
            format!("lane {}: index {index} is out of range for {what} of {len} elements", self.lane()),
        );
        if ctx.config.clamp_indices && len > 0 {
            Some(index.clamp(0, len as i64 - 1) as usize)
        } else {
            None
        }
    }

    /// Range check for pointer walks: unlike [`Self::checked_index`], an
    /// unclamped index is kept so the later access reads as zero.
    fn chain_index(&self, ctx: &mut StepContext<'_>, index: i64, len: Option<u64>, what: &str) -> i64 {
        let in_range = index >= 0 && len.is_none_or(|len| (index as u64) < len);
        if in_range {
            return index;
        }
        ctx.report(
            MessageSeverity::Medium,
            format!("lane {}: index {index} is out of range for {what}", self.lane()),
        );
        if !ctx.config.clamp_indices {
            return index;
        }
        match len {
            Some(len) if len > 0 => index.clamp(0, len as i64 - 1),
            _ => index.max(0),
        }
    }

    /// Walk `indices` down from `ptr`, tracking the pointee type and the
    /// byte offset the position has in the pointee's layout.
    pub(crate) fn access_chain(&self, ctx: &mut StepContext<'_>, mut ptr: Pointer, indices: &[i64]) -> Result<Pointer> {
        let program = ctx.program;
        for &raw in indices {
            if let PointerBase::Resource { .. } = ptr.base {
                let Type::Array { element, length } = program.ty(ptr.pointee)? else {
                    bail!("cannot index into a {} resource", program.ty(ptr.pointee)?.kind_name());
                };
                let index = self.chain_index(ctx, raw, Some(*length as u64), "a resource array");
                ptr.byte_offset = ptr.byte_offset.wrapping_add(index as u64);
                ptr.chain.push(index as u32);
                ptr.pointee = *element;
                continue;
            }
            if let PointerBase::Buffer { slot, variable } = ptr.base
                && ptr.chain.is_empty()
                && let Some((element, length)) = block_array(program, ptr.pointee)
            {
                let index = self.chain_index(ctx, raw, length, "a buffer array");
                ptr.base = PointerBase::Buffer { slot: slot.with_index(index as u32), variable };
                ptr.chain.push(index as u32);
                ptr.pointee = element;
                continue;
            }

            let (next, offset, index) = match program.ty(ptr.pointee)? {
                Type::Struct { members } => {
                    let Some(member) = members.get(raw as usize).filter(|_| raw >= 0) else {
                        bail!("struct {} has no member {raw}", ptr.pointee);
                    };
                    let offset = program.member_offset(ptr.pointee, raw as u32)?;
                    let matrix = program.member_matrix_layout(ptr.pointee, raw as u32)?;
                    let next = *member;
                    ptr.matrix = matrix;
                    ptr.element_stride = None;
                    (next, offset as i64, raw)
                }
                Type::Array { element, length } => {
                    let index = self.chain_index(ctx, raw, Some(*length as u64), "an array");
                    let stride = program.array_stride(ptr.pointee)? as i64;
                    (*element, index.wrapping_mul(stride), index)
                }
                Type::RuntimeArray { element } => {
                    let index = self.chain_index(ctx, raw, None, "a runtime array");
                    let stride = program.array_stride(ptr.pointee)? as i64;
                    (*element, index.wrapping_mul(stride), index)
                }
                Type::Matrix { column, count } => {
                    let index = self.chain_index(ctx, raw, Some(*count as u64), "a matrix");
                    let layout = match ptr.matrix {
                        Some(ml) => ml,
                        None => program.default_matrix_layout(ptr.pointee)?,
                    };
                    let scalar = program.scalar_size(ptr.pointee)? as i64;
                    let offset = if layout.row_major {
                        ptr.element_stride = Some(layout.stride);
                        index.wrapping_mul(scalar)
                    } else {
                        ptr.element_stride = None;
                        index.wrapping_mul(layout.stride as i64)
                    };
                    ptr.matrix = None;
                    (*column, offset, index)
                }
                Type::Vector { component, count } => {
                    let index = self.chain_index(ctx, raw, Some(*count as u64), "a vector");
                    let stride = match ptr.element_stride {
                        Some(stride) => stride as i64,
                        None => program.scalar_size(ptr.pointee)? as i64,
                    };
                    ptr.element_stride = None;
                    (*component, index.wrapping_mul(stride), index)
                }
                other => bail!("cannot index into a {} value", other.kind_name()),
            };
            ptr.byte_offset = ptr.byte_offset.wrapping_add(offset as u64);
            ptr.chain.push(index as u32);
            ptr.pointee = next;
        }
        trace!(target: "shdbg::memory", lane = self.lane(), pointer = %ptr, "access chain");
        Ok(ptr)
    }

    /// Treat `ptr` as pointing into an array and step `element` elements.
    pub(crate) fn offset_pointer(&self, ctx: &mut StepContext<'_>, mut ptr: Pointer, element: i64) -> Result<Pointer> {
        if element == 0 {
            return Ok(ptr);
        }
        let stride = element_stride_of(ctx.program, ptr.pointee)? as i64;
        ptr.byte_offset = ptr.byte_offset.wrapping_add(element.wrapping_mul(stride) as u64);
        match ptr.base {
            PointerBase::Address { .. } | PointerBase::Buffer { .. } => {}
            _ => {
                let Some(last) = ptr.chain.last_mut() else {
                    bail!("pointer {ptr} does not point into an array");
                };
                *last = (*last as i64).wrapping_add(element) as u32;
            }
        }
        Ok(ptr)
    }

    fn zero_of(program: &ProgramIndex, ty: Id) -> Result<ShaderVariable> {
        program.make_variable(ty, "")
    }

    /// Finish a tree read: `found` is `None` when the storage is missing.
    fn read_tree(
        &self,
        ctx: &mut StepContext<'_>,
        found: Option<Result<ShaderVariable>>,
        ptr: &Pointer,
    ) -> Result<ShaderVariable> {
        let Some(read) = found else {
            ctx.report(MessageSeverity::High, format!("lane {}: no storage behind {ptr}", self.lane()));
            return Self::zero_of(ctx.program, ptr.pointee);
        };
        match read {
            Ok(v) => Ok(v),
            Err(err) => {
                ctx.report(MessageSeverity::Medium, format!("lane {}: read through {ptr}: {err:#}", self.lane()));
                Self::zero_of(ctx.program, ptr.pointee)
            }
        }
    }

    fn read_bytes(&self, ctx: &mut StepContext<'_>, ptr: &Pointer, slot: Option<BindingSlot>) -> Result<Option<Vec<u8>>> {
        let program = ctx.program;
        if let Type::RuntimeArray { .. } = program.ty(ptr.pointee)? {
            bail!("cannot load a runtime array as a whole");
        }
        let layout = ValueLayout { matrix: ptr.matrix, element_stride: ptr.element_stride };
        let mut bytes = vec![0u8; value_extent(program, ptr.pointee, layout)? as usize];
        let ok = match (slot, ptr.address()) {
            (Some(slot), _) => ctx.api.read_buffer_value(slot, ptr.byte_offset, &mut bytes),
            (None, Some(address)) => ctx.api.read_address(address, &mut bytes),
            (None, None) => false,
        };
        Ok(ok.then_some(bytes))
    }

    /// Read the pointee of `ptr`.
    pub(crate) fn load(&mut self, ctx: &mut StepContext<'_>, ptr: &Pointer) -> Result<ShaderVariable> {
        let program = ctx.program;
        match ptr.base {
            PointerBase::Private { variable } => {
                let found = self.private.get(variable).map(|root| read_path(root, &ptr.chain));
                self.read_tree(ctx, found, ptr)
            }
            PointerBase::Local { frame, variable } => {
                let Some(root) = self
                    .call_stack
                    .iter()
                    .find(|f| f.serial == frame)
                    .and_then(|f| f.locals.get(variable))
                else {
                    ctx.report(
                        MessageSeverity::High,
                        format!("lane {}: {ptr} refers to a function that has returned", self.lane()),
                    );
                    return Self::zero_of(program, ptr.pointee);
                };
                let found = read_path(root, &ptr.chain);
                self.read_tree(ctx, Some(found), ptr)
            }
            PointerBase::Workgroup { variable } => {
                let found = ctx.global.workgroup(variable).map(|root| read_path(root, &ptr.chain));
                self.read_tree(ctx, found, ptr)
            }
            PointerBase::Constant { variable } => {
                let found = ctx.global.constant_block(variable).map(|root| read_path(root, &ptr.chain));
                self.read_tree(ctx, found, ptr)
            }
            PointerBase::Buffer { slot, .. } => self.load_bytes(ctx, ptr, Some(slot)),
            PointerBase::Address { .. } => self.load_bytes(ctx, ptr, None),
            PointerBase::Resource { variable } => {
                let mut value = program.make_variable(ptr.pointee, &program.debug_name(variable))?;
                let Some(descriptor) = ctx.global.descriptor(variable) else {
                    ctx.report(MessageSeverity::High, format!("lane {}: {variable} has no descriptor", self.lane()));
                    return Ok(value);
                };
                let slot = descriptor.slot.with_index(ptr.chain.first().copied().unwrap_or(0));
                value.binding = Some(slot);
                if descriptor.kind.is_combined() {
                    value.sampler = Some(slot);
                }
                Ok(value)
            }
        }
    }

    fn load_bytes(&mut self, ctx: &mut StepContext<'_>, ptr: &Pointer, slot: Option<BindingSlot>) -> Result<ShaderVariable> {
        let program = ctx.program;
        let layout = ValueLayout { matrix: ptr.matrix, element_stride: ptr.element_stride };
        match self.read_bytes(ctx, ptr, slot)? {
            Some(bytes) => decode_value(program, ptr.pointee, &bytes, layout),
            None => {
                ctx.report(MessageSeverity::High, format!("lane {}: could not read memory at {ptr}", self.lane()));
                Self::zero_of(program, ptr.pointee)
            }
        }
    }

    /// Write `value` to the pointee of `ptr` and record the memory change
    /// against the variable owning the storage.
    pub(crate) fn store(&mut self, ctx: &mut StepContext<'_>, pc: usize, ptr: &Pointer, value: &ShaderVariable) -> Result<()> {
        let lane = self.lane();
        match ptr.base {
            PointerBase::Private { variable } => {
                let Some(root) = self.private.get_mut(variable) else {
                    ctx.report(MessageSeverity::High, format!("lane {lane}: no storage behind {ptr}"));
                    return Ok(());
                };
                let before = root.clone();
                match write_path(root, &ptr.chain, value) {
                    Ok(()) => {
                        let after = root.clone();
                        self.record_memory_change(pc, variable, Some(before), Some(after));
                    }
                    Err(err) => ctx.report(MessageSeverity::Medium, format!("lane {lane}: write through {ptr}: {err:#}")),
                }
            }
            PointerBase::Local { frame, variable } => {
                let Some(root) = self
                    .call_stack
                    .iter_mut()
                    .find(|f| f.serial == frame)
                    .and_then(|f| f.locals.get_mut(variable))
                else {
                    ctx.report(
                        MessageSeverity::High,
                        format!("lane {lane}: {ptr} refers to a function that has returned; write dropped"),
                    );
                    return Ok(());
                };
                let before = root.clone();
                match write_path(root, &ptr.chain, value) {
                    Ok(()) => {
                        let after = root.clone();
                        self.record_memory_change(pc, variable, Some(before), Some(after));
                    }
                    Err(err) => ctx.report(MessageSeverity::Medium, format!("lane {lane}: write through {ptr}: {err:#}")),
                }
            }
            PointerBase::Workgroup { variable } => {
                let result = match ctx.global.workgroup_mut(variable) {
                    Some(root) => {
                        let before = root.clone();
                        write_path(root, &ptr.chain, value).map(|()| Some((before, root.clone())))
                    }
                    None => Ok(None),
                };
                match result {
                    Ok(Some((before, after))) => self.record_memory_change(pc, variable, Some(before), Some(after)),
                    Ok(None) => ctx.report(MessageSeverity::High, format!("lane {lane}: no storage behind {ptr}")),
                    Err(err) => ctx.report(MessageSeverity::Medium, format!("lane {lane}: write through {ptr}: {err:#}")),
                }
            }
            PointerBase::Constant { .. } => {
                ctx.report(
                    MessageSeverity::Medium,
                    format!("lane {lane}: write to read-only constant block through {ptr} ignored"),
                );
            }
            PointerBase::Buffer { slot, variable } => self.store_bytes(ctx, pc, ptr, Some(slot), variable, value)?,
            PointerBase::Address { .. } => self.store_bytes(ctx, pc, ptr, None, Id::NONE, value)?,
            PointerBase::Resource { .. } => bail!("cannot store through resource pointer {ptr}"),
        }
        Ok(())
    }

    fn store_bytes(
        &mut self,
        ctx: &mut StepContext<'_>,
        pc: usize,
        ptr: &Pointer,
        slot: Option<BindingSlot>,
        owner: Id,
        value: &ShaderVariable,
    ) -> Result<()> {
        if self.helper {
            trace!(target: "shdbg::memory", lane = self.lane(), %ptr, "helper store discarded");
            return Ok(());
        }
        let program = ctx.program;
        let layout = ValueLayout { matrix: ptr.matrix, element_stride: ptr.element_stride };
        // Read first so strided writes keep the bytes between elements.
        let mut bytes = match self.read_bytes(ctx, ptr, slot)? {
            Some(bytes) => bytes,
            None => vec![0u8; value_extent(program, ptr.pointee, layout)? as usize],
        };
        let before = decode_value(program, ptr.pointee, &bytes, layout)?;
        encode_value(program, ptr.pointee, value, &mut bytes, layout)?;
        let ok = match (slot, ptr.address()) {
            (Some(slot), _) => ctx.api.write_buffer_value(slot, ptr.byte_offset, &bytes),
            (None, Some(address)) => ctx.api.write_address(address, &bytes),
            (None, None) => false,
        };
        if !ok {
            ctx.report(MessageSeverity::High, format!("lane {}: could not write memory at {ptr}", self.lane()));
            return Ok(());
        }
        let after = decode_value(program, ptr.pointee, &bytes, layout)?;
        self.record_memory_change(pc, owner, Some(before), Some(after));
        Ok(())
    }

    /// Element count of the runtime array that is member `member` of the
    /// buffer block behind `ptr`.
    pub(crate) fn array_length(&self, ctx: &mut StepContext<'_>, ptr: &Pointer, member: u32) -> Result<u64> {
        let program = ctx.program;
        let PointerBase::Buffer { slot, .. } = ptr.base else {
            bail!("array length of non-buffer pointer {ptr}");
        };
        let Type::Struct { members } = program.ty(ptr.pointee)? else {
            bail!("array length of a non-struct pointee");
        };
        let array_ty = *members
            .get(member as usize)
            .ok_or_else(|| anyhow!("struct {} has no member {member}", ptr.pointee))?;
        let offset = ptr.byte_offset + program.member_offset(ptr.pointee, member)?;
        let stride = program.array_stride(array_ty)?.max(1);
        match ctx.api.buffer_size(slot) {
            Some(size) => Ok(size.saturating_sub(offset) / stride),
            None => {
                ctx.report(MessageSeverity::Medium, format!("lane {}: size of buffer {slot} is unknown", self.lane()));
                Ok(0)
            }
        }
    }
}
