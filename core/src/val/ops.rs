//! Component-wise arithmetic, logic and conversion over [`ShaderVariable`]s.
//!
//! Every function receives a zeroed result template shaped from the
//! instruction's result type and fills it. Shape mismatches are malformed
//! programs and return `Err`; numeric corner cases (division by zero,
//! oversized shifts) produce a defined value instead.

use anyhow::{Result, bail};

use super::ShaderVariable;
use crate::program::{BinaryOp, UnaryOp};

#[inline]
fn lane(v: &ShaderVariable, i: usize) -> usize {
    if v.component_count() <= 1 { 0 } else { i }
}

fn width_bits(v: &ShaderVariable) -> u32 {
    match v.ty.byte_width() {
        0 => 64,
        w => w * 8,
    }
}

pub fn binary(op: BinaryOp, lhs: &ShaderVariable, rhs: &ShaderVariable, mut out: ShaderVariable) -> Result<ShaderVariable> {
    use BinaryOp::*;
    match op {
        Dot => {
            let n = lhs.component_count();
            if n != rhs.component_count() {
                bail!("dot of mismatched widths {} and {}", n, rhs.component_count());
            }
            let sum: f64 = (0..n).map(|i| lhs.float(i) * rhs.float(i)).sum();
            out.set_float(0, sum);
            return Ok(out);
        }
        VectorTimesScalar | MatrixTimesScalar => {
            let s = rhs.float(0);
            for i in 0..out.component_count() {
                out.set_float(i, lhs.float(i) * s);
            }
            return Ok(out);
        }
        MatrixTimesVector => {
            let (rows, cols) = (lhs.rows as usize, lhs.columns as usize);
            if rhs.component_count() != cols {
                bail!("matrix with {cols} columns times {}-wide vector", rhs.component_count());
            }
            for r in 0..rows {
                let sum: f64 = (0..cols).map(|c| lhs.float(r * cols + c) * rhs.float(c)).sum();
                out.set_float(r, sum);
            }
            return Ok(out);
        }
        VectorTimesMatrix => {
            let (rows, cols) = (rhs.rows as usize, rhs.columns as usize);
            if lhs.component_count() != rows {
                bail!("{}-wide vector times matrix with {rows} rows", lhs.component_count());
            }
            for c in 0..cols {
                let sum: f64 = (0..rows).map(|r| lhs.float(r) * rhs.float(r * cols + c)).sum();
                out.set_float(c, sum);
            }
            return Ok(out);
        }
        MatrixTimesMatrix => {
            let (rows, inner, cols) = (lhs.rows as usize, lhs.columns as usize, rhs.columns as usize);
            if rhs.rows as usize != inner {
                bail!("matrix product of {rows}x{inner} and {}x{cols}", rhs.rows);
            }
            for r in 0..rows {
                for c in 0..cols {
                    let sum: f64 = (0..inner).map(|k| lhs.float(r * inner + k) * rhs.float(k * cols + c)).sum();
                    out.set_float(r * cols + c, sum);
                }
            }
            return Ok(out);
        }
        OuterProduct => {
            let cols = rhs.component_count();
            for r in 0..lhs.component_count() {
                for c in 0..cols {
                    out.set_float(r * cols + c, lhs.float(r) * rhs.float(c));
                }
            }
            return Ok(out);
        }
        _ => {}
    }

    let n = out.component_count();
    if lhs.component_count() > 1 && rhs.component_count() > 1 && lhs.component_count() != rhs.component_count() {
        bail!("{op:?} on mismatched widths {} and {}", lhs.component_count(), rhs.component_count());
    }
    for i in 0..n {
        let (a, b) = (lane(lhs, i), lane(rhs, i));
        match op {
            IAdd => out.set_raw(i, lhs.uint(a).wrapping_add(rhs.uint(b))),
            ISub => out.set_raw(i, lhs.uint(a).wrapping_sub(rhs.uint(b))),
            IMul => out.set_raw(i, lhs.uint(a).wrapping_mul(rhs.uint(b))),
            UDiv => out.set_raw(i, lhs.uint(a).checked_div(rhs.uint(b)).unwrap_or(0)),
            UMod => out.set_raw(i, lhs.uint(a).checked_rem(rhs.uint(b)).unwrap_or(0)),
            SDiv => {
                let d = rhs.int(b);
                out.set_int(i, if d == 0 { 0 } else { lhs.int(a).wrapping_div(d) });
            }
            SRem => {
                let d = rhs.int(b);
                out.set_int(i, if d == 0 { 0 } else { lhs.int(a).wrapping_rem(d) });
            }
            SMod => {
                let d = rhs.int(b);
                let v = if d == 0 {
                    0
                } else {
                    let r = lhs.int(a).wrapping_rem(d);
                    if r != 0 && (r < 0) != (d < 0) { r + d } else { r }
                };
                out.set_int(i, v);
            }
            FAdd => out.set_float(i, lhs.float(a) + rhs.float(b)),
            FSub => out.set_float(i, lhs.float(a) - rhs.float(b)),
            FMul => out.set_float(i, lhs.float(a) * rhs.float(b)),
            FDiv => out.set_float(i, lhs.float(a) / rhs.float(b)),
            FRem => out.set_float(i, lhs.float(a) % rhs.float(b)),
            FMod => {
                let (x, y) = (lhs.float(a), rhs.float(b));
                out.set_float(i, x - y * (x / y).floor());
            }
            ShiftLeftLogical => {
                let shift = (rhs.uint(b) % width_bits(lhs) as u64) as u32;
                out.set_raw(i, lhs.uint(a) << shift);
            }
            ShiftRightLogical => {
                let shift = (rhs.uint(b) % width_bits(lhs) as u64) as u32;
                out.set_raw(i, lhs.uint(a) >> shift);
            }
            ShiftRightArithmetic => {
                let shift = (rhs.uint(b) % width_bits(lhs) as u64) as u32;
                out.set_int(i, lhs.int(a) >> shift);
            }
            BitwiseOr => out.set_raw(i, lhs.uint(a) | rhs.uint(b)),
            BitwiseXor => out.set_raw(i, lhs.uint(a) ^ rhs.uint(b)),
            BitwiseAnd => out.set_raw(i, lhs.uint(a) & rhs.uint(b)),
            LogicalEqual => out.set_raw(i, (lhs.truthy(a) == rhs.truthy(b)) as u64),
            LogicalNotEqual => out.set_raw(i, (lhs.truthy(a) != rhs.truthy(b)) as u64),
            LogicalOr => out.set_raw(i, (lhs.truthy(a) || rhs.truthy(b)) as u64),
            LogicalAnd => out.set_raw(i, (lhs.truthy(a) && rhs.truthy(b)) as u64),
            IEqual => out.set_raw(i, (lhs.uint(a) == rhs.uint(b)) as u64),
            INotEqual => out.set_raw(i, (lhs.uint(a) != rhs.uint(b)) as u64),
            UGreaterThan => out.set_raw(i, (lhs.uint(a) > rhs.uint(b)) as u64),
            UGreaterThanEqual => out.set_raw(i, (lhs.uint(a) >= rhs.uint(b)) as u64),
            ULessThan => out.set_raw(i, (lhs.uint(a) < rhs.uint(b)) as u64),
            ULessThanEqual => out.set_raw(i, (lhs.uint(a) <= rhs.uint(b)) as u64),
            SGreaterThan => out.set_raw(i, (lhs.int(a) > rhs.int(b)) as u64),
            SGreaterThanEqual => out.set_raw(i, (lhs.int(a) >= rhs.int(b)) as u64),
            SLessThan => out.set_raw(i, (lhs.int(a) < rhs.int(b)) as u64),
            SLessThanEqual => out.set_raw(i, (lhs.int(a) <= rhs.int(b)) as u64),
            FOrdEqual | FUnordEqual | FOrdNotEqual | FUnordNotEqual | FOrdLessThan | FUnordLessThan
            | FOrdGreaterThan | FUnordGreaterThan | FOrdLessThanEqual | FUnordLessThanEqual
            | FOrdGreaterThanEqual | FUnordGreaterThanEqual => {
                let (x, y) = (lhs.float(a), rhs.float(b));
                out.set_raw(i, float_compare(op, x, y) as u64);
            }
            Dot | VectorTimesScalar | MatrixTimesScalar | VectorTimesMatrix | MatrixTimesVector
            | MatrixTimesMatrix | OuterProduct => unreachable!("handled above"),
        }
    }
    Ok(out)
}

fn float_compare(op: BinaryOp, x: f64, y: f64) -> bool {
    use BinaryOp::*;
    let unordered = x.is_nan() || y.is_nan();
    match op {
        FOrdEqual => !unordered && x == y,
        FUnordEqual => unordered || x == y,
        FOrdNotEqual => !unordered && x != y,
        FUnordNotEqual => unordered || x != y,
        FOrdLessThan => !unordered && x < y,
        FUnordLessThan => unordered || x < y,
        FOrdGreaterThan => !unordered && x > y,
        FUnordGreaterThan => unordered || x > y,
        FOrdLessThanEqual => !unordered && x <= y,
        FUnordLessThanEqual => unordered || x <= y,
        FOrdGreaterThanEqual => !unordered && x >= y,
        FUnordGreaterThanEqual => unordered || x >= y,
        _ => false,
    }
}

pub fn unary(op: UnaryOp, operand: &ShaderVariable, mut out: ShaderVariable) -> Result<ShaderVariable> {
    use UnaryOp::*;
    match op {
        Any => {
            let v = (0..operand.component_count()).any(|i| operand.truthy(i));
            out.set_raw(0, v as u64);
            return Ok(out);
        }
        All => {
            let v = (0..operand.component_count()).all(|i| operand.truthy(i));
            out.set_raw(0, v as u64);
            return Ok(out);
        }
        Bitcast => return bitcast(operand, out),
        _ => {}
    }
    if operand.component_count() != out.component_count() {
        bail!("{op:?} changes width from {} to {}", operand.component_count(), out.component_count());
    }
    for i in 0..out.component_count() {
        match op {
            SNegate => out.set_int(i, operand.int(i).wrapping_neg()),
            FNegate => out.set_float(i, -operand.float(i)),
            Not => out.set_raw(i, !operand.uint(i)),
            LogicalNot => out.set_raw(i, (!operand.truthy(i)) as u64),
            ConvertFToU => {
                let f = operand.float(i);
                let max = out.ty.bit_mask() as f64;
                out.set_raw(i, if f.is_nan() { 0 } else { f.clamp(0.0, max) as u64 });
            }
            ConvertFToS => {
                let f = operand.float(i);
                let bits = width_bits(&out) as i32;
                let max = 2f64.powi(bits - 1) - 1.0;
                let min = -(2f64.powi(bits - 1));
                out.set_int(i, if f.is_nan() { 0 } else { f.clamp(min, max) as i64 });
            }
            ConvertSToF => out.set_float(i, operand.int(i) as f64),
            ConvertUToF => out.set_float(i, operand.uint(i) as f64),
            UConvert => out.set_raw(i, operand.uint(i)),
            SConvert => out.set_int(i, operand.int(i)),
            FConvert => out.set_float(i, operand.float(i)),
            QuantizeToF16 => out.set_float(i, half::f16::from_f64(operand.float(i)).to_f64()),
            BitCount => out.set_raw(i, operand.uint(i).count_ones() as u64),
            BitReverse => {
                let bits = width_bits(operand);
                out.set_raw(i, operand.uint(i).reverse_bits() >> (64 - bits));
            }
            IsNan => out.set_raw(i, operand.float(i).is_nan() as u64),
            IsInf => out.set_raw(i, operand.float(i).is_infinite() as u64),
            Any | All | Bitcast => unreachable!("handled above"),
        }
    }
    Ok(out)
}

/// Reinterpret the little-endian bytes of `operand` as the result type.
fn bitcast(operand: &ShaderVariable, mut out: ShaderVariable) -> Result<ShaderVariable> {
    let mut bytes = Vec::with_capacity(operand.component_count() * 8);
    let src_width = operand.ty.byte_width() as usize;
    for i in 0..operand.component_count() {
        bytes.extend_from_slice(&operand.raw(i).to_le_bytes()[..src_width]);
    }
    let dst_width = out.ty.byte_width() as usize;
    if dst_width == 0 || bytes.len() != dst_width * out.component_count() {
        bail!(
            "bitcast from {} bytes to {} x {} bytes",
            bytes.len(),
            out.component_count(),
            dst_width
        );
    }
    for (i, chunk) in bytes.chunks(dst_width).enumerate() {
        let mut word = [0u8; 8];
        word[..dst_width].copy_from_slice(chunk);
        out.set_raw(i, u64::from_le_bytes(word));
    }
    Ok(out)
}

/// Component-wise select when the condition is a vector, whole-value otherwise.
pub fn select(condition: &ShaderVariable, accept: &ShaderVariable, reject: &ShaderVariable) -> ShaderVariable {
    if condition.component_count() <= 1 || accept.is_aggregate() {
        return if condition.truthy(0) { accept.clone() } else { reject.clone() };
    }
    let mut out = accept.clone();
    for i in 0..out.component_count() {
        if !condition.truthy(i) {
            out.set_raw(i, reject.raw(i));
        }
    }
    out
}

