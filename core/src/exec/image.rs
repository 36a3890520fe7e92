use anyhow::{Result, anyhow, bail};

use super::{StepContext, ThreadState};
use crate::api::{MessageSeverity, SampleGatherOp, SampleGatherRequest};
use crate::id::Id;
use crate::program::{Dim, ImageOperands, ImageQueryKind, Instruction, Op, ProgramIndex, ShaderStage, Type};
use crate::val::{ShaderVariable, VarType};

pub(crate) enum ImageResult {
    Value(ShaderVariable),
    /// No result (image writes).
    Done,
    /// Implicit level of detail needs quad neighbours that are not ready.
    Stalled,
}

#[derive(Debug, Clone, Copy)]
struct ImageShape {
    dim: Dim,
    arrayed: bool,
    multisampled: bool,
}

fn image_shape(program: &ProgramIndex, id: Id) -> Result<ImageShape> {
    let ty = program
        .value_type(id)
        .ok_or_else(|| anyhow!("{id} has no declared type"))?;
    let mut ty = program.ty(ty)?;
    if let Type::SampledImage { image } = ty {
        ty = program.ty(*image)?;
    }
    match ty {
        Type::Image { dim, arrayed, multisampled, .. } => {
            Ok(ImageShape { dim: *dim, arrayed: *arrayed, multisampled: *multisampled })
        }
        other => bail!("{id} is a {} value, not an image", other.kind_name()),
    }
}

struct SampleArgs<'i> {
    op: SampleGatherOp,
    image: Id,
    coordinate: Id,
    dref: Option<Id>,
    component: Option<Id>,
    projective: bool,
    operands: &'i ImageOperands,
}

impl ThreadState {
    fn float_operand(&self, program: &ProgramIndex, id: Option<Id>) -> Result<Option<f32>> {
        id.map(|id| self.operand(program, id).map(|v| v.float(0) as f32)).transpose()
    }

    fn components<const N: usize>(&self, program: &ProgramIndex, id: Option<Id>) -> Result<[f32; N]> {
        let mut out = [0f32; N];
        if let Some(id) = id {
            let v = self.operand(program, id)?;
            for (i, slot) in out.iter_mut().enumerate().take(v.component_count()) {
                *slot = v.float(i) as f32;
            }
        }
        Ok(out)
    }

    fn texel_coord(&self, program: &ProgramIndex, id: Id) -> Result<[i32; 3]> {
        let v = self.operand(program, id)?;
        let mut out = [0i32; 3];
        for (i, slot) in out.iter_mut().enumerate().take(v.component_count()) {
            *slot = if v.ty.is_float() { v.float(i) as i32 } else { v.int(i) as i32 };
        }
        Ok(out)
    }

    /// Execute one image instruction.
    pub(crate) fn image_op(&mut self, ctx: &mut StepContext<'_>, inst: &Instruction) -> Result<ImageResult> {
        let program = ctx.program;
        match &inst.op {
            Op::SampledImage { image, sampler } => {
                let mut value = self.operand(program, *image)?.clone();
                value.sampler = self.operand(program, *sampler)?.binding;
                value.ty = VarType::ReadOnlyResource;
                Ok(ImageResult::Value(value))
            }
            Op::Image { sampled_image } => {
                let mut value = self.operand(program, *sampled_image)?.clone();
                value.sampler = None;
                Ok(ImageResult::Value(value))
            }
            Op::ImageSample { sampled_image, coordinate, dref, projective, operands } => self.sample(
                ctx,
                inst,
                SampleArgs {
                    op: SampleGatherOp::Sample,
                    image: *sampled_image,
                    coordinate: *coordinate,
                    dref: *dref,
                    component: None,
                    projective: *projective,
                    operands,
                },
            ),
            Op::ImageGather { sampled_image, coordinate, component, dref, operands } => self.sample(
                ctx,
                inst,
                SampleArgs {
                    op: SampleGatherOp::Gather,
                    image: *sampled_image,
                    coordinate: *coordinate,
                    dref: *dref,
                    component: *component,
                    projective: false,
                    operands,
                },
            ),
            Op::ImageFetch { image, coordinate, operands } => self.sample(
                ctx,
                inst,
                SampleArgs {
                    op: SampleGatherOp::Fetch,
                    image: *image,
                    coordinate: *coordinate,
                    dref: None,
                    component: None,
                    projective: false,
                    operands,
                },
            ),
            Op::ImageRead { image, coordinate, operands } => {
                let template = self.template(program, inst)?;
                let Some(slot) = self.operand(program, *image)?.binding else {
                    ctx.report(MessageSeverity::High, format!("lane {}: read from unbound image {image}", self.lane()));
                    return Ok(ImageResult::Value(template));
                };
                let coord = self.texel_coord(program, *coordinate)?;
                let sample = self.float_operand(program, operands.sample)?.unwrap_or(0.0) as u32;
                self.flags.sample_load_gather = true;
                match ctx.api.read_texel(slot, coord, sample, &template) {
                    Some(texel) => {
                        let mut out = template;
                        out.assign_converted(&texel);
                        Ok(ImageResult::Value(out))
                    }
                    None => {
                        ctx.report(
                            MessageSeverity::Medium,
                            format!("lane {}: texel {coord:?} of image {slot} could not be read", self.lane()),
                        );
                        Ok(ImageResult::Value(template))
                    }
                }
            }
            Op::ImageWrite { image, coordinate, texel, operands } => {
                let Some(slot) = self.operand(program, *image)?.binding else {
                    ctx.report(MessageSeverity::High, format!("lane {}: write to unbound image {image}", self.lane()));
                    return Ok(ImageResult::Done);
                };
                let coord = self.texel_coord(program, *coordinate)?;
                let sample = self.float_operand(program, operands.sample)?.unwrap_or(0.0) as u32;
                let value = self.operand(program, *texel)?.clone();
                if self.helper {
                    return Ok(ImageResult::Done);
                }
                if !ctx.api.write_texel(slot, coord, sample, &value) {
                    ctx.report(
                        MessageSeverity::Medium,
                        format!("lane {}: texel {coord:?} of image {slot} could not be written", self.lane()),
                    );
                }
                Ok(ImageResult::Done)
            }
            Op::ImageQuery { kind, image, lod } => {
                let shape = image_shape(program, *image)?;
                let mut out = self.template(program, inst)?;
                let Some(slot) = self.operand(program, *image)?.binding else {
                    ctx.report(MessageSeverity::High, format!("lane {}: query of unbound image {image}", self.lane()));
                    return Ok(ImageResult::Value(out));
                };
                let level = self.float_operand(program, *lod)?.unwrap_or(0.0) as u32;
                let Some(info) = ctx.api.image_info(slot, level) else {
                    ctx.report(
                        MessageSeverity::Medium,
                        format!("lane {}: no size information for image {slot}", self.lane()),
                    );
                    return Ok(ImageResult::Value(out));
                };
                match kind {
                    ImageQueryKind::Size | ImageQueryKind::SizeLod => {
                        let mut dims = match shape.dim {
                            Dim::D1 | Dim::Buffer => vec![info.width],
                            Dim::D3 => vec![info.width, info.height, info.depth],
                            _ => vec![info.width, info.height],
                        };
                        if shape.arrayed && shape.dim != Dim::D3 {
                            dims.push(info.depth);
                        }
                        for (i, d) in dims.iter().enumerate().take(out.component_count()) {
                            out.set_raw(i, *d as u64);
                        }
                    }
                    ImageQueryKind::Levels => out.set_raw(0, info.levels as u64),
                    ImageQueryKind::Samples => out.set_raw(0, info.samples as u64),
                }
                Ok(ImageResult::Value(out))
            }
            other => bail!("{} is not an image instruction", other.name()),
        }
    }

    fn sample(&mut self, ctx: &mut StepContext<'_>, inst: &Instruction, args: SampleArgs<'_>) -> Result<ImageResult> {
        let program = ctx.program;
        let shape = image_shape(program, args.image)?;
        let template = self.template(program, inst)?;
        let handle = self.operand(program, args.image)?.clone();
        let Some(image) = handle.binding else {
            ctx.report(MessageSeverity::High, format!("lane {}: sample from unbound image {}", self.lane(), args.image));
            return Ok(ImageResult::Value(template));
        };

        let mut coords: [f32; 4] = self.components(program, Some(args.coordinate))?;
        if args.projective {
            let n = shape.dim.coordinate_count();
            let q = coords[n.min(3)];
            for c in coords.iter_mut().take(n) {
                *c /= q;
            }
        }

        let operands = args.operands;
        let mut lod = self.float_operand(program, operands.lod)?;
        let mut ddx = [0f32; 3];
        let mut ddy = [0f32; 3];
        if operands.grad_x.is_some() || operands.grad_y.is_some() {
            ddx = self.components(program, operands.grad_x)?;
            ddy = self.components(program, operands.grad_y)?;
        } else if args.op == SampleGatherOp::Sample && lod.is_none() {
            if ctx.stage == ShaderStage::Pixel {
                let Some((dx, dy)) = self.coordinate_gradients(ctx, args.coordinate)? else {
                    return Ok(ImageResult::Stalled);
                };
                for i in 0..3.min(dx.component_count()) {
                    ddx[i] = dx.float(i) as f32;
                    ddy[i] = dy.float(i) as f32;
                }
            } else {
                lod = Some(0.0);
            }
        }

        let mut offset = [0i32; 3];
        if let Some(id) = operands.offset {
            let v = self.operand(program, id)?;
            for (i, slot) in offset.iter_mut().enumerate().take(v.component_count()) {
                *slot = v.int(i) as i32;
            }
        }

        let request = SampleGatherRequest {
            op: args.op,
            image,
            sampler: handle.sampler,
            dim: shape.dim,
            arrayed: shape.arrayed,
            multisampled: shape.multisampled,
            coords,
            ddx,
            ddy,
            lod,
            bias: self.float_operand(program, operands.bias)?,
            min_lod: self.float_operand(program, operands.min_lod)?,
            offset,
            sample_index: self.float_operand(program, operands.sample)?.map(|s| s as u32),
            compare: self.float_operand(program, args.dref)?,
            gather_component: self.float_operand(program, args.component)?.unwrap_or(0.0) as u32,
        };
        self.flags.sample_load_gather = true;
        match ctx.api.calculate_sample_gather(&request) {
            Some(result) => {
                let mut out = template;
                out.assign_converted(&result);
                Ok(ImageResult::Value(out))
            }
            None => {
                ctx.report(
                    MessageSeverity::Medium,
                    format!("lane {}: {:?} of image {image} failed", self.lane(), args.op),
                );
                Ok(ImageResult::Value(template))
            }
        }
    }
}
