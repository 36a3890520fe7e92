use std::fmt;

use serde::{Deserialize, Serialize};

use crate::api::BindingSlot;
use crate::id::Id;
use crate::program::{MatrixLayout, StorageClass};

/// What a pointer ultimately refers to. Never a host address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PointerBase {
    /// Lane-owned global storage (private, input and output variables).
    Private { variable: Id },
    /// A function-local variable of the stack frame with the given serial.
    Local { frame: u32, variable: Id },
    Workgroup { variable: Id },
    /// Read-only constant block or push constants captured at session start.
    Constant { variable: Id },
    /// GPU buffer reached through the API wrapper.
    Buffer { slot: BindingSlot, variable: Id },
    /// Simulated device address (physical storage buffer).
    Address { address: u64 },
    /// Opaque image/sampler descriptor variable.
    Resource { variable: Id },
}

/// A pointer value: base plus the access chain walked from it. The chain
/// indexes the in-memory value tree; `byte_offset` is the same position in
/// the pointee's layout and is what equality and buffer access use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pointer {
    pub base: PointerBase,
    pub storage: StorageClass,
    /// Type the pointer currently points at.
    pub pointee: Id,
    #[serde(default)]
    pub chain: Vec<u32>,
    #[serde(default)]
    pub byte_offset: u64,
    /// Layout of the matrix this pointer sits in or points at, when it
    /// differs from the natural one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<MatrixLayout>,
    /// Distance between vector components, set for a column of a row-major matrix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_stride: Option<u32>,
}

impl Pointer {
    pub fn new(base: PointerBase, storage: StorageClass, pointee: Id) -> Self {
        Self { base, storage, pointee, chain: Vec::new(), byte_offset: 0, matrix: None, element_stride: None }
    }

    /// Absolute simulated address for address-based pointers.
    pub fn address(&self) -> Option<u64> {
        match self.base {
            PointerBase::Address { address } => Some(address.wrapping_add(self.byte_offset)),
            _ => None,
        }
    }

    pub fn base_variable(&self) -> Option<Id> {
        match self.base {
            PointerBase::Private { variable }
            | PointerBase::Local { variable, .. }
            | PointerBase::Workgroup { variable }
            | PointerBase::Constant { variable }
            | PointerBase::Buffer { variable, .. }
            | PointerBase::Resource { variable } => Some(variable),
            PointerBase::Address { .. } => None,
        }
    }
}

impl PointerBase {
    /// Whether both bases name the same storage. Buffer variables bound to
    /// one slot share it.
    pub fn aliases(&self, other: &PointerBase) -> bool {
        match (self, other) {
            (PointerBase::Buffer { slot: a, .. }, PointerBase::Buffer { slot: b, .. }) => a == b,
            _ => self == other,
        }
    }
}

impl PartialEq for Pointer {
    fn eq(&self, other: &Self) -> bool {
        match (self.address(), other.address()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.base.aliases(&other.base) && self.byte_offset == other.byte_offset,
            _ => false,
        }
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.base {
            PointerBase::Private { variable } => write!(f, "&{variable}")?,
            PointerBase::Local { frame, variable } => write!(f, "&{variable}@frame{frame}")?,
            PointerBase::Workgroup { variable } => write!(f, "&workgroup {variable}")?,
            PointerBase::Constant { variable } => write!(f, "&constant {variable}")?,
            PointerBase::Buffer { slot, .. } => write!(f, "&buffer({slot})")?,
            PointerBase::Address { address } => return write!(f, "0x{:x}", address.wrapping_add(self.byte_offset)),
            PointerBase::Resource { variable } => write!(f, "&resource {variable}")?,
        }
        for idx in &self.chain {
            write!(f, "[{idx}]")?;
        }
        if self.byte_offset != 0 {
            write!(f, " +{}", self.byte_offset)?;
        }
        Ok(())
    }
}
