//! `GLSL.std.450`, the extended instruction set glslang emits for GLSL
//! built-in functions.
//!
//! Arithmetic is done in f64 and rounded to the result's component type.
//! Transcendentals go to the host first ([`ExtInstContext::math_op`]) so a
//! replay can match the driver's precision, and fall back to
//! [`MathOp::eval`] when the host declines.

use anyhow::{Result, bail};
use half::f16;
use shdbg_core::api::{MathOp, MessageSeverity};
use shdbg_core::extinst::{ExtInstContext, ExtInstLibrary, ExtInstRegistry};
use shdbg_core::val::{ShaderVariable, VarType};
use tracing::debug;

pub const GLSL_STD_450: &str = "GLSL.std.450";

const INTERPOLATE_AT_CENTROID: u32 = 76;

#[derive(Debug, Default, Clone, Copy)]
pub struct Glsl450;

impl ExtInstLibrary for Glsl450 {
    fn name(&self) -> &str {
        GLSL_STD_450
    }

    fn description(&self) -> &str {
        "GLSL 4.50 built-in functions"
    }

    fn register(&self, registry: &mut ExtInstRegistry) -> Result<()> {
        macro_rules! register {
            ($($opcode:literal $name:ident => $func:ident),* $(,)?) => {
                $(registry.register_function(GLSL_STD_450, $opcode, stringify!($name), $func);)*
            };
        }
        register! {
            1 Round => round,
            2 RoundEven => round_even,
            3 Trunc => trunc,
            4 FAbs => fabs,
            5 SAbs => sabs,
            6 FSign => fsign,
            7 SSign => ssign,
            8 Floor => floor,
            9 Ceil => ceil,
            10 Fract => fract,
            11 Radians => radians,
            12 Degrees => degrees,
            13 Sin => sin,
            14 Cos => cos,
            15 Tan => tan,
            16 Asin => asin,
            17 Acos => acos,
            18 Atan => atan,
            19 Sinh => sinh,
            20 Cosh => cosh,
            21 Tanh => tanh,
            22 Asinh => asinh,
            23 Acosh => acosh,
            24 Atanh => atanh,
            25 Atan2 => atan2,
            26 Pow => pow,
            27 Exp => exp,
            28 Log => log,
            29 Exp2 => exp2,
            30 Log2 => log2,
            31 Sqrt => sqrt,
            32 InverseSqrt => inverse_sqrt,
            33 Determinant => determinant,
            34 MatrixInverse => matrix_inverse,
            35 Modf => modf,
            36 ModfStruct => modf_struct,
            37 FMin => fmin,
            38 UMin => umin,
            39 SMin => smin,
            40 FMax => fmax,
            41 UMax => umax,
            42 SMax => smax,
            43 FClamp => fclamp,
            44 UClamp => uclamp,
            45 SClamp => sclamp,
            46 FMix => fmix,
            48 Step => step,
            49 SmoothStep => smooth_step,
            50 Fma => fma,
            51 Frexp => frexp,
            52 FrexpStruct => frexp_struct,
            53 Ldexp => ldexp,
            54 PackSnorm4x8 => pack_snorm4x8,
            55 PackUnorm4x8 => pack_unorm4x8,
            56 PackSnorm2x16 => pack_snorm2x16,
            57 PackUnorm2x16 => pack_unorm2x16,
            58 PackHalf2x16 => pack_half2x16,
            59 PackDouble2x32 => pack_double2x32,
            60 UnpackSnorm2x16 => unpack_snorm2x16,
            61 UnpackUnorm2x16 => unpack_unorm2x16,
            62 UnpackHalf2x16 => unpack_half2x16,
            63 UnpackSnorm4x8 => unpack_snorm4x8,
            64 UnpackUnorm4x8 => unpack_unorm4x8,
            65 UnpackDouble2x32 => unpack_double2x32,
            66 Length => length,
            67 Distance => distance,
            68 Cross => cross,
            69 Normalize => normalize,
            70 FaceForward => face_forward,
            71 Reflect => reflect,
            72 Refract => refract,
            73 FindILsb => find_ilsb,
            74 FindSMsb => find_smsb,
            75 FindUMsb => find_umsb,
            76 InterpolateAtCentroid => interpolate,
            77 InterpolateAtSample => interpolate,
            78 InterpolateAtOffset => interpolate,
            79 NMin => nmin,
            80 NMax => nmax,
            81 NClamp => nclamp,
        }
        debug!(target: "shdbg::exec", set = GLSL_STD_450, "registered opcodes 1..=81");
        Ok(())
    }
}

fn expect_operands(args: &[ShaderVariable], count: usize) -> Result<()> {
    if args.len() != count {
        bail!("expects {count} operands, got {}", args.len());
    }
    Ok(())
}

/// Component `i`, with scalars broadcast across vector operands.
fn lane(value: &ShaderVariable, i: usize) -> f64 {
    if value.component_count() == 1 { value.float(0) } else { value.float(i) }
}

fn lane_int(value: &ShaderVariable, i: usize) -> i64 {
    if value.component_count() == 1 { value.int(0) } else { value.int(i) }
}

fn lane_uint(value: &ShaderVariable, i: usize) -> u64 {
    if value.component_count() == 1 { value.uint(0) } else { value.uint(i) }
}

fn float_map(ctx: &ExtInstContext<'_>, args: &[ShaderVariable], f: impl Fn(f64) -> f64) -> Result<ShaderVariable> {
    expect_operands(args, 1)?;
    let mut out = ctx.result();
    for i in 0..out.component_count() {
        out.set_float(i, f(args[0].float(i)));
    }
    Ok(out)
}

fn float_map2(ctx: &ExtInstContext<'_>, args: &[ShaderVariable], f: impl Fn(f64, f64) -> f64) -> Result<ShaderVariable> {
    expect_operands(args, 2)?;
    let mut out = ctx.result();
    for i in 0..out.component_count() {
        out.set_float(i, f(lane(&args[0], i), lane(&args[1], i)));
    }
    Ok(out)
}

fn float_map3(
    ctx: &ExtInstContext<'_>,
    args: &[ShaderVariable],
    f: impl Fn(f64, f64, f64) -> f64,
) -> Result<ShaderVariable> {
    expect_operands(args, 3)?;
    let mut out = ctx.result();
    for i in 0..out.component_count() {
        out.set_float(i, f(lane(&args[0], i), lane(&args[1], i), lane(&args[2], i)));
    }
    Ok(out)
}

fn sint_map(ctx: &ExtInstContext<'_>, args: &[ShaderVariable], count: usize, f: impl Fn(&[i64]) -> i64) -> Result<ShaderVariable> {
    expect_operands(args, count)?;
    let mut out = ctx.result();
    let mut lanes = vec![0i64; count];
    for i in 0..out.component_count() {
        for (slot, arg) in lanes.iter_mut().zip(args) {
            *slot = lane_int(arg, i);
        }
        out.set_int(i, f(&lanes[..]));
    }
    Ok(out)
}

fn uint_map(ctx: &ExtInstContext<'_>, args: &[ShaderVariable], count: usize, f: impl Fn(&[u64]) -> u64) -> Result<ShaderVariable> {
    expect_operands(args, count)?;
    let mut out = ctx.result();
    let mut lanes = vec![0u64; count];
    for i in 0..out.component_count() {
        for (slot, arg) in lanes.iter_mut().zip(args) {
            *slot = lane_uint(arg, i);
        }
        out.set_raw(i, f(&lanes[..]));
    }
    Ok(out)
}

macro_rules! float_unary {
    ($($name:ident => $f:expr),* $(,)?) => {
        $(fn $name(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
            float_map(ctx, args, $f)
        })*
    };
}

float_unary! {
    round => f64::round,
    round_even => f64::round_ties_even,
    trunc => f64::trunc,
    fabs => f64::abs,
    fsign => |x: f64| if x > 0.0 { 1.0 } else if x < 0.0 { -1.0 } else { x },
    floor => f64::floor,
    ceil => f64::ceil,
    fract => |x: f64| x - x.floor(),
    radians => f64::to_radians,
    degrees => f64::to_degrees,
}

fn sabs(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    sint_map(ctx, args, 1, |v| v[0].wrapping_abs())
}

fn ssign(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    sint_map(ctx, args, 1, |v| v[0].signum())
}

fn host_math(ctx: &mut ExtInstContext<'_>, op: MathOp, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    let binary = matches!(op, MathOp::Atan2 | MathOp::Pow);
    expect_operands(args, if binary { 2 } else { 1 })?;
    let mut out = ctx.result();
    if let Some(value) = ctx.math_op(op, args) {
        out.assign_converted(&value);
        return Ok(out);
    }
    for i in 0..out.component_count() {
        let y = if binary { lane(&args[1], i) } else { 0.0 };
        out.set_float(i, op.eval(args[0].float(i), y));
    }
    Ok(out)
}

macro_rules! math_op {
    ($($name:ident => $op:ident),* $(,)?) => {
        $(fn $name(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
            host_math(ctx, MathOp::$op, args)
        })*
    };
}

math_op! {
    sin => Sin,
    cos => Cos,
    tan => Tan,
    asin => Asin,
    acos => Acos,
    atan => Atan,
    sinh => Sinh,
    cosh => Cosh,
    tanh => Tanh,
    asinh => Asinh,
    acosh => Acosh,
    atanh => Atanh,
    atan2 => Atan2,
    pow => Pow,
    exp => Exp,
    log => Log,
    exp2 => Exp2,
    log2 => Log2,
    sqrt => Sqrt,
    inverse_sqrt => InverseSqrt,
}

/// Row-major elements of a square matrix.
fn square_matrix(m: &ShaderVariable) -> Result<(usize, Vec<f64>)> {
    let n = m.rows as usize;
    if !m.is_matrix() || m.columns as usize != n {
        bail!("expects a square matrix, got {}x{}", m.rows, m.columns);
    }
    Ok((n, (0..n * n).map(|i| m.float(i)).collect()))
}

fn pivot_row(a: &[f64], n: usize, col: usize) -> usize {
    (col..n)
        .max_by(|&x, &y| a[x * n + col].abs().total_cmp(&a[y * n + col].abs()))
        .unwrap_or(col)
}

fn swap_rows(a: &mut [f64], n: usize, x: usize, y: usize) {
    for k in 0..n {
        a.swap(x * n + k, y * n + k);
    }
}

fn determinant(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    expect_operands(args, 1)?;
    let (n, mut a) = square_matrix(&args[0])?;
    let mut det = 1.0;
    for col in 0..n {
        let pivot = pivot_row(&a, n, col);
        if a[pivot * n + col] == 0.0 {
            det = 0.0;
            break;
        }
        if pivot != col {
            swap_rows(&mut a, n, pivot, col);
            det = -det;
        }
        let p = a[col * n + col];
        det *= p;
        for row in col + 1..n {
            let factor = a[row * n + col] / p;
            for k in col..n {
                a[row * n + k] -= factor * a[col * n + k];
            }
        }
    }
    let mut out = ctx.result();
    out.set_float(0, det);
    Ok(out)
}

fn matrix_inverse(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    expect_operands(args, 1)?;
    let (n, mut a) = square_matrix(&args[0])?;
    let mut inv: Vec<f64> = (0..n * n).map(|i| if i / n == i % n { 1.0 } else { 0.0 }).collect();
    // Gauss-Jordan on [a | inv]
    for col in 0..n {
        let pivot = pivot_row(&a, n, col);
        if a[pivot * n + col] == 0.0 {
            bail!("matrix is singular");
        }
        swap_rows(&mut a, n, pivot, col);
        swap_rows(&mut inv, n, pivot, col);
        let p = a[col * n + col];
        for k in 0..n {
            a[col * n + k] /= p;
            inv[col * n + k] /= p;
        }
        for row in (0..n).filter(|&r| r != col) {
            let factor = a[row * n + col];
            for k in 0..n {
                a[row * n + k] -= factor * a[col * n + k];
                inv[row * n + k] -= factor * inv[col * n + k];
            }
        }
    }
    let mut out = ctx.result();
    for (i, v) in inv.into_iter().enumerate() {
        out.set_float(i, v);
    }
    Ok(out)
}

fn split_whole(x: f64) -> (f64, f64) {
    let whole = x.trunc();
    let fraction = if x.is_infinite() { 0.0_f64.copysign(x) } else { x - whole };
    (fraction, whole)
}

fn modf(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    expect_operands(args, 2)?;
    let mut fraction = ctx.result();
    let mut whole = ctx.result();
    for i in 0..fraction.component_count() {
        let (f, w) = split_whole(args[0].float(i));
        fraction.set_float(i, f);
        whole.set_float(i, w);
    }
    ctx.store(&args[1], whole)?;
    Ok(fraction)
}

fn modf_struct(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    expect_operands(args, 1)?;
    let mut out = ctx.result();
    let [fraction, whole] = out.members.as_mut_slice() else {
        bail!("result is not a two-member struct");
    };
    for i in 0..fraction.component_count() {
        let (f, w) = split_whole(args[0].float(i));
        fraction.set_float(i, f);
        whole.set_float(i, w);
    }
    Ok(out)
}

fn fmin(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    float_map2(ctx, args, |x, y| if y < x { y } else { x })
}

fn fmax(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    float_map2(ctx, args, |x, y| if x < y { y } else { x })
}

fn nmin(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    float_map2(ctx, args, f64::min)
}

fn nmax(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    float_map2(ctx, args, f64::max)
}

fn umin(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    uint_map(ctx, args, 2, |v| v[0].min(v[1]))
}

fn umax(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    uint_map(ctx, args, 2, |v| v[0].max(v[1]))
}

fn smin(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    sint_map(ctx, args, 2, |v| v[0].min(v[1]))
}

fn smax(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    sint_map(ctx, args, 2, |v| v[0].max(v[1]))
}

fn fclamp(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    float_map3(ctx, args, |x, lo, hi| {
        let raised = if x < lo { lo } else { x };
        if hi < raised { hi } else { raised }
    })
}

fn nclamp(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    float_map3(ctx, args, |x, lo, hi| x.max(lo).min(hi))
}

// min(max(x, lo), hi), so an inverted range yields hi
fn uclamp(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    uint_map(ctx, args, 3, |v| v[0].max(v[1]).min(v[2]))
}

fn sclamp(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    sint_map(ctx, args, 3, |v| v[0].max(v[1]).min(v[2]))
}

fn fmix(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    float_map3(ctx, args, |x, y, a| x * (1.0 - a) + y * a)
}

fn step(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    float_map2(ctx, args, |edge, x| if x < edge { 0.0 } else { 1.0 })
}

fn smooth_step(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    float_map3(ctx, args, |edge0, edge1, x| {
        let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
        t * t * (3.0 - 2.0 * t)
    })
}

fn fma(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    float_map3(ctx, args, f64::mul_add)
}

/// Mantissa in [0.5, 1) and exponent with `x == m * 2^e`.
fn frexp_parts(x: f64) -> (f64, i64) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let (x, bias) = if x.abs() < f64::MIN_POSITIVE { (x * 2f64.powi(54), -54) } else { (x, 0) };
    let bits = x.to_bits();
    let exponent = ((bits >> 52) & 0x7ff) as i64;
    let mantissa = f64::from_bits((bits & !(0x7ffu64 << 52)) | (1022u64 << 52));
    (mantissa, exponent - 1022 + bias)
}

fn frexp(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    expect_operands(args, 2)?;
    let mut mantissa = ctx.result();
    let count = mantissa.component_count();
    let mut exponent = ShaderVariable::new(args[1].name.clone(), VarType::SInt, 1, count as u8);
    for i in 0..count {
        let (m, e) = frexp_parts(args[0].float(i));
        mantissa.set_float(i, m);
        exponent.set_int(i, e);
    }
    ctx.store(&args[1], exponent)?;
    Ok(mantissa)
}

fn frexp_struct(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    expect_operands(args, 1)?;
    let mut out = ctx.result();
    let [mantissa, exponent] = out.members.as_mut_slice() else {
        bail!("result is not a two-member struct");
    };
    for i in 0..mantissa.component_count() {
        let (m, e) = frexp_parts(args[0].float(i));
        mantissa.set_float(i, m);
        exponent.set_int(i, e);
    }
    Ok(out)
}

fn ldexp(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    expect_operands(args, 2)?;
    let mut out = ctx.result();
    for i in 0..out.component_count() {
        // two steps so 2^e alone never leaves the f64 range
        let e = lane_int(&args[1], i).clamp(-2200, 2200) as i32;
        let half = e / 2;
        out.set_float(i, args[0].float(i) * 2f64.powi(half) * 2f64.powi(e - half));
    }
    Ok(out)
}

fn pack(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable], lanes: usize, encode: impl Fn(f64) -> u32) -> Result<ShaderVariable> {
    expect_operands(args, 1)?;
    if args[0].component_count() < lanes {
        bail!("expects a {lanes}-component vector");
    }
    let width = 32 / lanes;
    let mask = (1u64 << width) - 1;
    let mut bits = 0u64;
    for i in 0..lanes {
        bits |= (encode(args[0].float(i)) as u64 & mask) << (width * i);
    }
    let mut out = ctx.result();
    out.set_raw(0, bits);
    Ok(out)
}

fn unpack(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable], lanes: usize, decode: impl Fn(u32) -> f64) -> Result<ShaderVariable> {
    expect_operands(args, 1)?;
    let packed = args[0].uint(0) as u32;
    let width = 32 / lanes;
    let mask = ((1u64 << width) - 1) as u32;
    let mut out = ctx.result();
    for i in 0..lanes.min(out.component_count()) {
        out.set_float(i, decode((packed >> (width * i)) & mask));
    }
    Ok(out)
}

fn pack_snorm4x8(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    pack(ctx, args, 4, |c| (c.clamp(-1.0, 1.0) * 127.0).round() as i8 as u8 as u32)
}

fn pack_unorm4x8(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    pack(ctx, args, 4, |c| (c.clamp(0.0, 1.0) * 255.0).round() as u32)
}

fn pack_snorm2x16(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    pack(ctx, args, 2, |c| (c.clamp(-1.0, 1.0) * 32767.0).round() as i16 as u16 as u32)
}

fn pack_unorm2x16(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    pack(ctx, args, 2, |c| (c.clamp(0.0, 1.0) * 65535.0).round() as u32)
}

fn pack_half2x16(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    pack(ctx, args, 2, |c| f16::from_f64(c).to_bits() as u32)
}

fn unpack_snorm4x8(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    unpack(ctx, args, 4, |bits| (bits as u8 as i8 as f64 / 127.0).clamp(-1.0, 1.0))
}

fn unpack_unorm4x8(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    unpack(ctx, args, 4, |bits| bits as f64 / 255.0)
}

fn unpack_snorm2x16(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    unpack(ctx, args, 2, |bits| (bits as u16 as i16 as f64 / 32767.0).clamp(-1.0, 1.0))
}

fn unpack_unorm2x16(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    unpack(ctx, args, 2, |bits| bits as f64 / 65535.0)
}

fn unpack_half2x16(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    unpack(ctx, args, 2, |bits| f16::from_bits(bits as u16).to_f64())
}

fn pack_double2x32(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    expect_operands(args, 1)?;
    let words = &args[0];
    let mut out = ctx.result();
    out.set_raw(0, (words.uint(0) & 0xffff_ffff) | (words.uint(1) << 32));
    Ok(out)
}

fn unpack_double2x32(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    expect_operands(args, 1)?;
    let bits = args[0].raw(0);
    let mut out = ctx.result();
    out.set_raw(0, bits & 0xffff_ffff);
    out.set_raw(1, bits >> 32);
    Ok(out)
}

fn dot(a: &ShaderVariable, b: &ShaderVariable) -> f64 {
    (0..a.component_count()).map(|i| a.float(i) * b.float(i)).sum()
}

fn length(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    expect_operands(args, 1)?;
    let mut out = ctx.result();
    out.set_float(0, dot(&args[0], &args[0]).sqrt());
    Ok(out)
}

fn distance(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    expect_operands(args, 2)?;
    let (a, b) = (&args[0], &args[1]);
    let sum: f64 = (0..a.component_count()).map(|i| (a.float(i) - b.float(i)).powi(2)).sum();
    let mut out = ctx.result();
    out.set_float(0, sum.sqrt());
    Ok(out)
}

fn cross(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    expect_operands(args, 2)?;
    let (a, b) = (&args[0], &args[1]);
    if a.component_count() != 3 || b.component_count() != 3 {
        bail!("expects two 3-component vectors");
    }
    let mut out = ctx.result();
    out.set_float(0, a.float(1) * b.float(2) - b.float(1) * a.float(2));
    out.set_float(1, a.float(2) * b.float(0) - b.float(2) * a.float(0));
    out.set_float(2, a.float(0) * b.float(1) - b.float(0) * a.float(1));
    Ok(out)
}

fn normalize(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    expect_operands(args, 1)?;
    let len = dot(&args[0], &args[0]).sqrt();
    float_map(ctx, args, |x| x / len)
}

fn face_forward(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    expect_operands(args, 3)?;
    let sign = if dot(&args[2], &args[1]) < 0.0 { 1.0 } else { -1.0 };
    float_map(ctx, &args[..1], |n| sign * n)
}

fn reflect(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    expect_operands(args, 2)?;
    let d = dot(&args[1], &args[0]);
    float_map2(ctx, args, |i, n| i - 2.0 * d * n)
}

fn refract(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    expect_operands(args, 3)?;
    let (incident, normal, eta) = (&args[0], &args[1], args[2].float(0));
    let d = dot(normal, incident);
    let k = 1.0 - eta * eta * (1.0 - d * d);
    let mut out = ctx.result();
    if k < 0.0 {
        return Ok(out);
    }
    for i in 0..out.component_count() {
        out.set_float(i, eta * incident.float(i) - (eta * d + k.sqrt()) * normal.float(i));
    }
    Ok(out)
}

fn find_ilsb(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    sint_map(ctx, args, 1, |v| {
        let bits = v[0] as u32;
        if bits == 0 { -1 } else { bits.trailing_zeros() as i64 }
    })
}

fn find_smsb(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    sint_map(ctx, args, 1, |v| {
        let value = v[0] as i32;
        // negative values report their highest zero bit
        let probe = (if value < 0 { !value } else { value }) as u32;
        if probe == 0 { -1 } else { 31 - probe.leading_zeros() as i64 }
    })
}

fn find_umsb(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    sint_map(ctx, args, 1, |v| {
        let bits = v[0] as u32;
        if bits == 0 { -1 } else { 31 - bits.leading_zeros() as i64 }
    })
}

/// Interpolants are only known at the pixel centre, so every variant
/// reads the input as captured.
fn interpolate(ctx: &mut ExtInstContext<'_>, args: &[ShaderVariable]) -> Result<ShaderVariable> {
    let expected = if ctx.opcode() == INTERPOLATE_AT_CENTROID { 1 } else { 2 };
    expect_operands(args, expected)?;
    let Some(value) = ctx.pointee(0).cloned() else {
        bail!("interpolant {} is not a stage input", args[0].name);
    };
    if ctx.opcode() != INTERPOLATE_AT_CENTROID {
        ctx.report(
            MessageSeverity::Low,
            format!("{} interpolated at the pixel centre instead of the requested position", args[0].name),
        );
    }
    let mut out = ctx.result();
    out.assign_converted(&value);
    Ok(out)
}
