use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::{BindingSlot, DebugApiWrapper, DebugMessage, MessageCategory, MessageSeverity};
use crate::id::{Id, IdMap};
use crate::program::{GlobalVariable, ProgramIndex, StorageClass, Type};
use crate::val::{Pointer, PointerBase, ShaderVariable, ValueLayout, decode_value};

/// What a descriptor-backed global refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ConstantBlock,
    PushConstants,
    StorageBuffer,
    Image,
    StorageImage,
    Sampler,
    SampledImage,
}

impl ResourceKind {
    /// Image and sampler bound together in one descriptor.
    pub fn is_combined(self) -> bool {
        self == ResourceKind::SampledImage
    }

    pub fn is_read_write(self) -> bool {
        matches!(self, ResourceKind::StorageBuffer | ResourceKind::StorageImage)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub variable: Id,
    pub name: String,
    pub storage: StorageClass,
    pub slot: BindingSlot,
    pub kind: ResourceKind,
    /// Writes through this descriptor reach the backing resource.
    pub writable: bool,
}

/// State shared by every lane of a session: constant blocks captured once
/// at the start, workgroup-shared storage and the descriptor table.
#[derive(Debug, Clone, Default)]
pub struct GlobalState {
    constant_blocks: IdMap<ShaderVariable>,
    workgroup: IdMap<ShaderVariable>,
    descriptors: Vec<ResourceDescriptor>,
}

/// Strip arrays of descriptors down to the element type.
fn descriptor_element(program: &ProgramIndex, mut ty: Id) -> Result<Id> {
    loop {
        match program.ty(ty)? {
            Type::Array { element, .. } | Type::RuntimeArray { element } => ty = *element,
            _ => return Ok(ty),
        }
    }
}

fn resource_kind(program: &ProgramIndex, var: &GlobalVariable, pointee: Id) -> Result<Option<ResourceKind>> {
    let element = descriptor_element(program, pointee)?;
    let block = program.decorations(element);
    Ok(match var.storage {
        StorageClass::PushConstant => Some(ResourceKind::PushConstants),
        StorageClass::StorageBuffer => Some(ResourceKind::StorageBuffer),
        StorageClass::Uniform if block.buffer_block => Some(ResourceKind::StorageBuffer),
        StorageClass::Uniform => Some(ResourceKind::ConstantBlock),
        StorageClass::UniformConstant | StorageClass::Image => match program.ty(element)? {
            Type::Image { storage: true, .. } => Some(ResourceKind::StorageImage),
            Type::Image { .. } => Some(ResourceKind::Image),
            Type::Sampler => Some(ResourceKind::Sampler),
            Type::SampledImage { .. } => Some(ResourceKind::SampledImage),
            other => bail!("{} is a {} in UniformConstant storage", var.id, other.kind_name()),
        },
        _ => None,
    })
}

impl GlobalState {
    /// Storage owned by each lane rather than shared.
    pub fn is_lane_owned(storage: StorageClass) -> bool {
        matches!(
            storage,
            StorageClass::Input | StorageClass::Output | StorageClass::Private | StorageClass::Function
        )
    }

    /// Collect descriptors, read every constant block through `api` and
    /// allocate workgroup storage.
    pub fn build(program: &ProgramIndex, api: &mut dyn DebugApiWrapper) -> Result<Self> {
        let mut state = GlobalState::default();
        for var in program.globals() {
            let (_, pointee) = program.pointee(var.ty)?;
            let name = program.debug_name(var.id);
            if var.storage == StorageClass::Workgroup {
                let value = match var.initializer.and_then(|init| program.constant(init)) {
                    Some(init) => init.clone().with_name(name),
                    None => program.make_variable(pointee, &name)?,
                };
                state.workgroup.insert(var.id, value);
                continue;
            }
            let Some(kind) = resource_kind(program, var, pointee)? else {
                continue;
            };
            let decorations = program.decorations(var.id);
            let slot = match kind {
                ResourceKind::PushConstants => BindingSlot::PUSH_CONSTANTS,
                _ => BindingSlot::new(decorations.set.unwrap_or(0), decorations.binding.unwrap_or(0)),
            };
            if matches!(kind, ResourceKind::ConstantBlock | ResourceKind::PushConstants) {
                let block = Self::read_constant_block(program, api, pointee, slot, &name)?;
                state.constant_blocks.insert(var.id, block);
            }
            debug!(target: "shdbg::debugger", variable = %var.id, %name, ?kind, %slot, "descriptor");
            state.descriptors.push(ResourceDescriptor {
                variable: var.id,
                name,
                storage: var.storage,
                slot,
                kind,
                writable: kind.is_read_write() && !decorations.non_writable,
            });
        }
        Ok(state)
    }

    fn read_constant_block(
        program: &ProgramIndex,
        api: &mut dyn DebugApiWrapper,
        ty: Id,
        slot: BindingSlot,
        name: &str,
    ) -> Result<ShaderVariable> {
        if let Type::Array { element, length } = program.ty(ty)? {
            let elements = (0..*length)
                .map(|i| Self::read_constant_block(program, api, *element, slot.with_index(i), &format!("[{i}]")))
                .collect::<Result<Vec<_>>>()?;
            return Ok(ShaderVariable::array(name, elements));
        }
        let mut bytes = vec![0u8; program.byte_size(ty)? as usize];
        if !api.read_buffer_value(slot, 0, &mut bytes) {
            warn!(target: "shdbg::debugger", %slot, "constant block not available");
            api.add_debug_message(
                DebugMessage::new(MessageSeverity::High, format!("no data bound for constant block {name} at {slot}"))
                    .with_category(MessageCategory::Resources),
            );
            return program.make_variable(ty, name);
        }
        Ok(decode_value(program, ty, &bytes, ValueLayout::default())?.with_name(name))
    }

    /// The pointer value every lane binds to the global `var`.
    pub fn pointer_variable(&self, program: &ProgramIndex, var: &GlobalVariable) -> Result<ShaderVariable> {
        let (storage, pointee) = program.pointee(var.ty)?;
        let base = match storage {
            StorageClass::Input | StorageClass::Output | StorageClass::Private => {
                PointerBase::Private { variable: var.id }
            }
            StorageClass::Workgroup => PointerBase::Workgroup { variable: var.id },
            StorageClass::Function => bail!("global {} has function storage", var.id),
            StorageClass::PhysicalStorageBuffer => bail!("global {} has physical storage", var.id),
            _ => {
                let descriptor = self
                    .descriptor(var.id)
                    .ok_or_else(|| anyhow!("global {} has no descriptor", var.id))?;
                match descriptor.kind {
                    ResourceKind::ConstantBlock | ResourceKind::PushConstants => {
                        PointerBase::Constant { variable: var.id }
                    }
                    ResourceKind::StorageBuffer => PointerBase::Buffer { slot: descriptor.slot, variable: var.id },
                    _ => PointerBase::Resource { variable: var.id },
                }
            }
        };
        let pointer = Pointer::new(base, storage, pointee);
        Ok(ShaderVariable::from_pointer(program.debug_name(var.id), pointer))
    }

    pub fn constant_block(&self, variable: Id) -> Option<&ShaderVariable> {
        self.constant_blocks.get(variable)
    }

    pub fn constant_blocks(&self) -> impl Iterator<Item = (Id, &ShaderVariable)> {
        self.constant_blocks.iter()
    }

    pub fn workgroup(&self, variable: Id) -> Option<&ShaderVariable> {
        self.workgroup.get(variable)
    }

    pub fn workgroup_mut(&mut self, variable: Id) -> Option<&mut ShaderVariable> {
        self.workgroup.get_mut(variable)
    }

    pub fn descriptor(&self, variable: Id) -> Option<&ResourceDescriptor> {
        self.descriptors.iter().find(|d| d.variable == variable)
    }

    pub fn descriptors(&self) -> &[ResourceDescriptor] {
        &self.descriptors
    }
}
