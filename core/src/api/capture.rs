//! An in-memory [`DebugApiWrapper`] backed by a serde-loadable capture file.
//!
//! Buffers and address ranges are plain byte arrays, images are RGBA32F
//! texel arrays sampled with nearest filtering and clamp-to-edge
//! addressing. Every diagnostic is kept for inspection.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    BindingSlot, DebugApiWrapper, DebugMessage, DerivativeDeltas, ImageInfo, InputSlot, MathOp, SampleGatherOp,
    SampleGatherRequest,
};
use crate::debugger::DebugSetup;
use crate::util::{FastHashMap, fast_hash_map_new};
use crate::val::ShaderVariable;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferCapture {
    pub slot: BindingSlot,
    pub bytes: Vec<u8>,
    pub words: Vec<u32>,
    pub floats: Vec<f32>,
}

impl BufferCapture {
    /// Raw bytes followed by the little-endian words and floats.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.bytes.clone();
        out.extend(self.words.iter().flat_map(|w| w.to_le_bytes()));
        out.extend(self.floats.iter().flat_map(|f| f.to_le_bytes()));
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRange {
    pub address: u64,
    pub bytes: Vec<u8>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCapture {
    pub slot: BindingSlot,
    pub width: u32,
    #[serde(default = "one")]
    pub height: u32,
    #[serde(default = "one")]
    pub depth: u32,
    /// Row-major RGBA texels, `width * height * depth` of them.
    #[serde(default)]
    pub texels: Vec<[f32; 4]>,
}

impl ImageCapture {
    fn texel(&self, x: i32, y: i32, z: i32) -> Option<[f32; 4]> {
        if x < 0 || y < 0 || z < 0 {
            return None;
        }
        let (x, y, z) = (x as u32, y as u32, z as u32);
        if x >= self.width || y >= self.height || z >= self.depth {
            return None;
        }
        let idx = ((z * self.height + y) * self.width + x) as usize;
        self.texels.get(idx).copied()
    }

    fn texel_mut(&mut self, x: i32, y: i32, z: i32) -> Option<&mut [f32; 4]> {
        if x < 0 || y < 0 || z < 0 {
            return None;
        }
        let (x, y, z) = (x as u32, y as u32, z as u32);
        if x >= self.width || y >= self.height || z >= self.depth {
            return None;
        }
        let idx = ((z * self.height + y) * self.width + x) as usize;
        self.texels.get_mut(idx)
    }

    fn clamp_coord(v: f32, size: u32) -> i32 {
        let max = size.saturating_sub(1) as i32;
        (v.floor() as i32).clamp(0, max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputCapture {
    pub slot: InputSlot,
    #[serde(default)]
    pub lane: u32,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivativeCapture {
    pub slot: InputSlot,
    #[serde(flatten)]
    pub deltas: DerivativeDeltas,
}

/// Everything a session needs besides the program itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureFile {
    pub setup: DebugSetup,
    pub buffers: Vec<BufferCapture>,
    pub memory: Vec<MemoryRange>,
    pub images: Vec<ImageCapture>,
    pub inputs: Vec<InputCapture>,
    pub derivatives: Vec<DerivativeCapture>,
}

#[derive(Debug, Clone, Default)]
pub struct CaptureApi {
    buffers: FastHashMap<BindingSlot, Vec<u8>>,
    memory: Vec<MemoryRange>,
    images: FastHashMap<BindingSlot, ImageCapture>,
    inputs: FastHashMap<(InputSlot, u32), Vec<f64>>,
    derivatives: FastHashMap<InputSlot, DerivativeDeltas>,
    messages: Vec<DebugMessage>,
}

impl CaptureApi {
    pub fn new() -> Self {
        Self {
            buffers: fast_hash_map_new(),
            memory: Vec::new(),
            images: fast_hash_map_new(),
            inputs: fast_hash_map_new(),
            derivatives: fast_hash_map_new(),
            messages: Vec::new(),
        }
    }

    pub fn from_capture(capture: &CaptureFile) -> Self {
        let mut api = Self::new();
        for buffer in &capture.buffers {
            api.buffers.insert(buffer.slot, buffer.to_bytes());
        }
        api.memory = capture.memory.clone();
        for image in &capture.images {
            api.images.insert(image.slot, image.clone());
        }
        for input in &capture.inputs {
            api.inputs.insert((input.slot, input.lane), input.values.clone());
        }
        for d in &capture.derivatives {
            api.derivatives.insert(d.slot, d.deltas);
        }
        api
    }

    pub fn with_buffer(mut self, slot: BindingSlot, bytes: Vec<u8>) -> Self {
        self.buffers.insert(slot, bytes);
        self
    }

    pub fn with_memory(mut self, address: u64, bytes: Vec<u8>) -> Self {
        self.memory.push(MemoryRange { address, bytes });
        self
    }

    pub fn with_image(mut self, image: ImageCapture) -> Self {
        self.images.insert(image.slot, image);
        self
    }

    pub fn with_input(mut self, slot: InputSlot, lane: u32, values: &[f64]) -> Self {
        self.inputs.insert((slot, lane), values.to_vec());
        self
    }

    pub fn with_derivatives(mut self, slot: InputSlot, deltas: DerivativeDeltas) -> Self {
        self.derivatives.insert(slot, deltas);
        self
    }

    pub fn buffer(&self, slot: BindingSlot) -> Option<&[u8]> {
        self.buffers.get(&slot).map(Vec::as_slice)
    }

    pub fn messages(&self) -> &[DebugMessage] {
        &self.messages
    }

    pub fn take_messages(&mut self) -> Vec<DebugMessage> {
        std::mem::take(&mut self.messages)
    }

    fn find_range(&self, address: u64, len: usize) -> Option<(usize, usize)> {
        self.memory.iter().enumerate().find_map(|(i, range)| {
            let start = address.checked_sub(range.address)? as usize;
            (start + len <= range.bytes.len()).then_some((i, start))
        })
    }
}

impl DebugApiWrapper for CaptureApi {
    fn add_debug_message(&mut self, message: DebugMessage) {
        debug!(target: "shdbg::debugger", severity = ?message.severity, "{}", message.description);
        self.messages.push(message);
    }

    fn read_buffer_value(&mut self, slot: BindingSlot, offset: u64, out: &mut [u8]) -> bool {
        let Some(data) = self.buffers.get(&slot) else {
            return false;
        };
        let start = offset as usize;
        if start > data.len() || (start == data.len() && !out.is_empty()) {
            return false;
        }
        let available = (data.len() - start).min(out.len());
        out[..available].copy_from_slice(&data[start..start + available]);
        out[available..].fill(0);
        true
    }

    fn write_buffer_value(&mut self, slot: BindingSlot, offset: u64, bytes: &[u8]) -> bool {
        let Some(data) = self.buffers.get_mut(&slot) else {
            return false;
        };
        let start = offset as usize;
        let Some(dst) = data.get_mut(start..start + bytes.len()) else {
            return false;
        };
        dst.copy_from_slice(bytes);
        true
    }

    fn buffer_size(&mut self, slot: BindingSlot) -> Option<u64> {
        self.buffers.get(&slot).map(|b| b.len() as u64)
    }

    fn read_address(&mut self, address: u64, out: &mut [u8]) -> bool {
        let Some((i, start)) = self.find_range(address, out.len()) else {
            return false;
        };
        out.copy_from_slice(&self.memory[i].bytes[start..start + out.len()]);
        true
    }

    fn write_address(&mut self, address: u64, bytes: &[u8]) -> bool {
        let Some((i, start)) = self.find_range(address, bytes.len()) else {
            return false;
        };
        self.memory[i].bytes[start..start + bytes.len()].copy_from_slice(bytes);
        true
    }

    fn read_texel(
        &mut self,
        image: BindingSlot,
        coord: [i32; 3],
        _sample: u32,
        template: &ShaderVariable,
    ) -> Option<ShaderVariable> {
        let texel = self.images.get(&image)?.texel(coord[0], coord[1], coord[2])?;
        let mut out = template.zeroed();
        for (i, v) in texel.iter().enumerate().take(out.component_count()) {
            out.set_float(i, *v as f64);
        }
        Some(out)
    }

    fn write_texel(&mut self, image: BindingSlot, coord: [i32; 3], _sample: u32, value: &ShaderVariable) -> bool {
        let Some(texel) = self
            .images
            .get_mut(&image)
            .and_then(|img| img.texel_mut(coord[0], coord[1], coord[2]))
        else {
            return false;
        };
        for (i, slot) in texel.iter_mut().enumerate().take(value.component_count()) {
            *slot = value.float(i) as f32;
        }
        true
    }

    fn calculate_sample_gather(&mut self, request: &SampleGatherRequest) -> Option<ShaderVariable> {
        let image = self.images.get(&request.image)?;
        let c = request.coords;
        let layer_z = |idx: usize| -> i32 {
            if request.arrayed { c[idx].round() as i32 } else { 0 }
        };
        let result = match request.op {
            SampleGatherOp::Fetch => {
                let z = if request.dim.coordinate_count() == 3 { c[2] as i32 } else { layer_z(request.dim.coordinate_count()) };
                image.texel(c[0] as i32 + request.offset[0], c[1] as i32 + request.offset[1], z)?
            }
            SampleGatherOp::Sample => {
                let n = request.dim.coordinate_count();
                let x = ImageCapture::clamp_coord(c[0] * image.width as f32, image.width) + request.offset[0];
                let y = if n >= 2 {
                    ImageCapture::clamp_coord(c[1] * image.height as f32, image.height) + request.offset[1]
                } else {
                    0
                };
                let z = if n == 3 {
                    ImageCapture::clamp_coord(c[2] * image.depth as f32, image.depth)
                } else {
                    layer_z(n)
                };
                let texel = image.texel(
                    x.clamp(0, image.width as i32 - 1),
                    y.clamp(0, image.height as i32 - 1),
                    z,
                )?;
                match request.compare {
                    Some(dref) => {
                        let pass = if dref <= texel[0] { 1.0 } else { 0.0 };
                        [pass, pass, pass, pass]
                    }
                    None => texel,
                }
            }
            SampleGatherOp::Gather => {
                let fx = c[0] * image.width as f32 - 0.5;
                let fy = c[1] * image.height as f32 - 0.5;
                let (x0, y0) = (ImageCapture::clamp_coord(fx, image.width), ImageCapture::clamp_coord(fy, image.height));
                let x1 = (x0 + 1).min(image.width as i32 - 1);
                let y1 = (y0 + 1).min(image.height as i32 - 1);
                let z = layer_z(2);
                let comp = request.gather_component.min(3) as usize;
                let pick = |x: i32, y: i32| -> Option<f32> {
                    let texel = image.texel(x, y, z)?;
                    Some(match request.compare {
                        Some(dref) => {
                            if dref <= texel[0] { 1.0 } else { 0.0 }
                        }
                        None => texel[comp],
                    })
                };
                [pick(x0, y1)?, pick(x1, y1)?, pick(x1, y0)?, pick(x0, y0)?]
            }
        };
        Some(ShaderVariable::vector_f32("sample", &result))
    }

    fn calculate_math_op(&mut self, op: MathOp, args: &[ShaderVariable]) -> Option<ShaderVariable> {
        let first = args.first()?;
        let mut out = first.zeroed();
        for i in 0..first.component_count() {
            let y = args.get(1).map(|a| a.float(i)).unwrap_or(0.0);
            out.set_float(i, op.eval(first.float(i), y));
        }
        Some(out)
    }

    fn input_value(&mut self, slot: InputSlot, lane: u32, template: &ShaderVariable) -> Option<ShaderVariable> {
        let values = self.inputs.get(&(slot, lane)).or_else(|| self.inputs.get(&(slot, 0)))?;
        let mut out = template.zeroed();
        for (i, v) in values.iter().enumerate().take(out.component_count()) {
            out.set_float(i, *v);
        }
        Some(out)
    }

    fn input_derivatives(&mut self, slot: InputSlot) -> Option<DerivativeDeltas> {
        self.derivatives.get(&slot).copied()
    }

    fn image_info(&mut self, image: BindingSlot, _lod: u32) -> Option<ImageInfo> {
        let img = self.images.get(&image)?;
        Some(ImageInfo { width: img.width, height: img.height, depth: img.depth, levels: 1, samples: 1 })
    }
}
