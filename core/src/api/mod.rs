//! The boundary between the interpreter and real backing memory, textures
//! and host math. The debugger only ever consumes [`DebugApiWrapper`].

pub mod capture;


use std::fmt;

use serde::{Deserialize, Serialize};

pub use crate::program::ShaderBuiltin;
use crate::program::Dim;
use crate::val::ShaderVariable;

/// Descriptor binding of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct BindingSlot {
    pub set: u32,
    pub binding: u32,
    #[serde(default)]
    pub array_index: u32,
}

impl BindingSlot {
    /// Slot used for the push-constant block.
    pub const PUSH_CONSTANTS: BindingSlot = BindingSlot { set: u32::MAX, binding: 0, array_index: 0 };

    pub const fn new(set: u32, binding: u32) -> Self {
        Self { set, binding, array_index: 0 }
    }

    pub const fn with_index(self, array_index: u32) -> Self {
        Self { array_index, ..self }
    }
}

impl fmt::Display for BindingSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::PUSH_CONSTANTS {
            return write!(f, "push constants");
        }
        write!(f, "set {} binding {}", self.set, self.binding)?;
        if self.array_index != 0 {
            write!(f, "[{}]", self.array_index)?;
        }
        Ok(())
    }
}

/// Where a stage input comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSlot {
    BuiltIn(ShaderBuiltin),
    Location { location: u32, component: u32 },
}

impl fmt::Display for InputSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSlot::BuiltIn(b) => write!(f, "builtin {}", b.name()),
            InputSlot::Location { location, component: 0 } => write!(f, "location {location}"),
            InputSlot::Location { location, component } => write!(f, "location {location}.{component}"),
        }
    }
}

/// Per-component screen-space deltas of an interpolated input in the quad.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivativeDeltas {
    pub ddx_coarse: [f32; 4],
    pub ddy_coarse: [f32; 4],
    pub ddx_fine: [f32; 4],
    pub ddy_fine: [f32; 4],
}

impl DerivativeDeltas {
    /// Same delta for coarse and fine in both directions.
    pub fn uniform(ddx: [f32; 4], ddy: [f32; 4]) -> Self {
        Self { ddx_coarse: ddx, ddy_coarse: ddy, ddx_fine: ddx, ddy_fine: ddy }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleGatherOp {
    Sample,
    Gather,
    Fetch,
}

/// A fully resolved texture operation handed to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleGatherRequest {
    pub op: SampleGatherOp,
    pub image: BindingSlot,
    pub sampler: Option<BindingSlot>,
    pub dim: Dim,
    pub arrayed: bool,
    pub multisampled: bool,
    /// Coordinates after any projective divide. Integer texel coordinates
    /// for fetches are stored converted to float.
    pub coords: [f32; 4],
    pub ddx: [f32; 3],
    pub ddy: [f32; 3],
    pub lod: Option<f32>,
    pub bias: Option<f32>,
    pub min_lod: Option<f32>,
    pub offset: [i32; 3],
    pub sample_index: Option<u32>,
    pub compare: Option<f32>,
    pub gather_component: u32,
}

/// Library math operations the host may evaluate at higher precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MathOp {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,
    Atan2,
    Pow,
    Exp,
    Exp2,
    Log,
    Log2,
    Sqrt,
    InverseSqrt,
}

impl MathOp {
    /// Evaluate in double precision; `y` is only read by two-operand ops.
    pub fn eval(self, x: f64, y: f64) -> f64 {
        match self {
            MathOp::Sin => x.sin(),
            MathOp::Cos => x.cos(),
            MathOp::Tan => x.tan(),
            MathOp::Asin => x.asin(),
            MathOp::Acos => x.acos(),
            MathOp::Atan => x.atan(),
            MathOp::Sinh => x.sinh(),
            MathOp::Cosh => x.cosh(),
            MathOp::Tanh => x.tanh(),
            MathOp::Asinh => x.asinh(),
            MathOp::Acosh => x.acosh(),
            MathOp::Atanh => x.atanh(),
            MathOp::Atan2 => x.atan2(y),
            MathOp::Pow => x.powf(y),
            MathOp::Exp => x.exp(),
            MathOp::Exp2 => x.exp2(),
            MathOp::Log => x.ln(),
            MathOp::Log2 => x.log2(),
            MathOp::Sqrt => x.sqrt(),
            MathOp::InverseSqrt => 1.0 / x.sqrt(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Depth for 3D images, layer count for arrayed images.
    pub depth: u32,
    pub levels: u32,
    pub samples: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    Execution,
    Resources,
    Shaders,
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSeverity {
    High,
    Medium,
    Low,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    RuntimeWarning,
    UnsupportedConfiguration,
    IncorrectApiUse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugMessage {
    pub category: MessageCategory,
    pub severity: MessageSeverity,
    pub source: MessageSource,
    pub description: String,
}

impl DebugMessage {
    pub fn new(severity: MessageSeverity, description: impl Into<String>) -> Self {
        Self {
            category: MessageCategory::Execution,
            severity,
            source: MessageSource::RuntimeWarning,
            description: description.into(),
        }
    }

    pub fn with_category(mut self, category: MessageCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_source(mut self, source: MessageSource) -> Self {
        self.source = source;
        self
    }
}

impl fmt::Display for DebugMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}/{:?}] {}", self.severity, self.category, self.description)
    }
}

/// Everything the interpreter needs from the outside world.
///
/// Buffer, address and texel accessors return `false`/`None` when the
/// backing resource is missing; the interpreter turns that into a
/// diagnostic and a zero value. Optional capabilities default to "not
/// available".
pub trait DebugApiWrapper {
    fn add_debug_message(&mut self, message: DebugMessage);

    /// Fill `out` with bytes of the buffer at `slot` starting at `offset`.
    fn read_buffer_value(&mut self, slot: BindingSlot, offset: u64, out: &mut [u8]) -> bool;

    fn write_buffer_value(&mut self, slot: BindingSlot, offset: u64, bytes: &[u8]) -> bool;

    /// Size in bytes of the buffer bound at `slot`, if known.
    fn buffer_size(&mut self, slot: BindingSlot) -> Option<u64> {
        let _ = slot;
        None
    }

    fn read_address(&mut self, address: u64, out: &mut [u8]) -> bool {
        let _ = (address, out);
        false
    }

    fn write_address(&mut self, address: u64, bytes: &[u8]) -> bool {
        let _ = (address, bytes);
        false
    }

    /// Read one texel of a storage image into `template`'s shape.
    fn read_texel(
        &mut self,
        image: BindingSlot,
        coord: [i32; 3],
        sample: u32,
        template: &ShaderVariable,
    ) -> Option<ShaderVariable>;

    fn write_texel(&mut self, image: BindingSlot, coord: [i32; 3], sample: u32, value: &ShaderVariable) -> bool;

    fn calculate_sample_gather(&mut self, request: &SampleGatherRequest) -> Option<ShaderVariable>;

    /// Evaluate a library math op on the host, component-wise over `args`.
    fn calculate_math_op(&mut self, op: MathOp, args: &[ShaderVariable]) -> Option<ShaderVariable> {
        let _ = (op, args);
        None
    }

    /// Value of a stage input for `lane`, shaped like `template`.
    fn input_value(&mut self, slot: InputSlot, lane: u32, template: &ShaderVariable) -> Option<ShaderVariable>;

    fn input_derivatives(&mut self, slot: InputSlot) -> Option<DerivativeDeltas> {
        let _ = slot;
        None
    }

    fn image_info(&mut self, image: BindingSlot, lod: u32) -> Option<ImageInfo> {
        let _ = (image, lod);
        None
    }
}
