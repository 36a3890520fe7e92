//! Screen-space derivatives across a 2x2 quad.
//!
//! Quad lanes are numbered `0 1` on the top row and `2 3` below. Coarse
//! derivatives use the top-left pair of every direction for the whole quad;
//! fine derivatives use the pair on the lane's own row or column.

use anyhow::Result;
use tracing::trace;

use super::{StepContext, ThreadState};
use crate::api::MessageSeverity;
use crate::debugger::DerivativePolicy;
use crate::id::Id;
use crate::program::{DerivativeAxis, DerivativeOp};
use crate::val::ShaderVariable;

/// Lanes (within the quad) whose difference `b - a` gives the derivative.
fn quad_pair(q: usize, axis: DerivativeAxis, fine: bool) -> (usize, usize) {
    match (axis, fine) {
        (DerivativeAxis::Y, false) => (0, 2),
        (DerivativeAxis::X, true) if q % 2 == 0 => (q, q + 1),
        (DerivativeAxis::X, true) => (q - 1, q),
        (DerivativeAxis::Y, true) if q < 2 => (q, q + 2),
        (DerivativeAxis::Y, true) => (q - 2, q),
        _ => (0, 1),
    }
}

fn difference(values: &[Option<ShaderVariable>; 4], (a, b): (usize, usize)) -> Option<ShaderVariable> {
    let (va, vb) = (values[a].as_ref()?, values[b].as_ref()?);
    let mut out = va.zeroed();
    for i in 0..out.component_count() {
        out.set_float(i, vb.float(i) - va.float(i));
    }
    Some(out)
}

impl ThreadState {
    /// Operand values of the quad lanes in `needed`. `Ok(None)` when a lane
    /// that may still produce the operand has not done so yet; lanes that
    /// never will contribute `None`.
    fn quad_operands(
        &self,
        ctx: &StepContext<'_>,
        operand: Id,
        needed: &[usize],
    ) -> Result<Option<[Option<ShaderVariable>; 4]>> {
        let program = ctx.program;
        let q = self.lane() as usize % 4;
        let base = self.lane() as usize - q;
        let own_writes = self.write_count(operand);
        let mut values: [Option<ShaderVariable>; 4] = Default::default();
        for &i in needed {
            if values[i].is_some() {
                continue;
            }
            if i == q {
                values[i] = Some(self.operand(program, operand)?.clone());
                continue;
            }
            let Some(other) = ctx.quad.lane(base + i) else {
                continue;
            };
            // a neighbour that has written the operand fewer times is still
            // behind, and any value it holds is from an earlier iteration
            let current = other.write_count(operand) >= own_writes;
            match other.lookup(program, operand) {
                Some(v) if current => values[i] = Some(v.clone()),
                _ if other.status().is_terminated() || ctx.force_derivatives => {}
                _ => {
                    trace!(target: "shdbg::derivative", lane = self.lane(), neighbour = base + i, %operand, "waiting");
                    return Ok(None);
                }
            }
        }
        Ok(Some(values))
    }

    fn report_missing(&self, ctx: &mut StepContext<'_>, operand: Id) {
        if ctx.config.derivative_policy == DerivativePolicy::Report {
            ctx.report(
                MessageSeverity::Low,
                format!("lane {}: derivative of {operand} needs a quad lane that is not executing; using 0", self.lane()),
            );
        }
    }

    /// Evaluate a derivative instruction. `Ok(None)` means the lane must
    /// wait for its quad neighbours.
    pub(crate) fn derivative(
        &self,
        ctx: &mut StepContext<'_>,
        kind: DerivativeOp,
        operand: Id,
    ) -> Result<Option<ShaderVariable>> {
        let q = self.lane() as usize % 4;
        let fine = kind.is_fine();
        let pairs: Vec<(usize, usize)> = match kind.axis() {
            DerivativeAxis::Both => vec![quad_pair(q, DerivativeAxis::X, fine), quad_pair(q, DerivativeAxis::Y, fine)],
            axis => vec![quad_pair(q, axis, fine)],
        };
        let needed: Vec<usize> = pairs.iter().flat_map(|&(a, b)| [a, b]).collect();
        let Some(values) = self.quad_operands(ctx, operand, &needed)? else {
            return Ok(None);
        };

        let mut out = self.operand(ctx.program, operand)?.zeroed();
        let mut missing = false;
        for pair in &pairs {
            let Some(delta) = difference(&values, *pair) else {
                missing = true;
                continue;
            };
            if pairs.len() == 1 {
                out = delta;
            } else {
                for i in 0..out.component_count() {
                    out.set_float(i, out.float(i) + delta.float(i).abs());
                }
            }
        }
        if missing {
            self.report_missing(ctx, operand);
        }
        Ok(Some(out))
    }

    /// Coarse (ddx, ddy) of a sampling coordinate, for implicit level of
    /// detail. Missing neighbours give zero gradients.
    pub(crate) fn coordinate_gradients(
        &self,
        ctx: &mut StepContext<'_>,
        coordinate: Id,
    ) -> Result<Option<(ShaderVariable, ShaderVariable)>> {
        let Some(values) = self.quad_operands(ctx, coordinate, &[0, 1, 2])? else {
            return Ok(None);
        };
        let zero = self.operand(ctx.program, coordinate)?.zeroed();
        let ddx = difference(&values, (0, 1));
        let ddy = difference(&values, (0, 2));
        if ddx.is_none() || ddy.is_none() {
            self.report_missing(ctx, coordinate);
        }
        Ok(Some((ddx.unwrap_or_else(|| zero.clone()), ddy.unwrap_or(zero))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_pairs() {
        for q in 0..4 {
            assert_eq!(quad_pair(q, DerivativeAxis::X, false), (0, 1));
            assert_eq!(quad_pair(q, DerivativeAxis::Y, false), (0, 2));
        }
        assert_eq!(quad_pair(0, DerivativeAxis::X, true), (0, 1));
        assert_eq!(quad_pair(1, DerivativeAxis::X, true), (0, 1));
        assert_eq!(quad_pair(2, DerivativeAxis::X, true), (2, 3));
        assert_eq!(quad_pair(3, DerivativeAxis::X, true), (2, 3));
        assert_eq!(quad_pair(1, DerivativeAxis::Y, true), (1, 3));
        assert_eq!(quad_pair(2, DerivativeAxis::Y, true), (0, 2));
    }

    #[test]
    fn test_difference_needs_both_lanes() {
        let values = [
            Some(ShaderVariable::vector_f32("v", &[1.0, 2.0])),
            Some(ShaderVariable::vector_f32("v", &[4.0, 0.5])),
            None,
            None,
        ];
        let d = difference(&values, (0, 1)).expect("both lanes present");
        assert_eq!(d.f32v(0), 3.0);
        assert_eq!(d.f32v(1), -1.5);
        assert!(difference(&values, (0, 2)).is_none());
    }
}
