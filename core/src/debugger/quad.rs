//! Inputs of the three helper lanes of a pixel quad, rebuilt from the
//! active lane's inputs and the captured screen-space deltas.
//!
//! Coarse deltas are taken relative to the top-left lane, fine deltas
//! relative to the active lane's row and column neighbours:
//!
//! ```text
//! +---+---+
//! | 0 | 1 |
//! +---+---+
//! | 2 | 3 |
//! +---+---+
//! ```

use crate::api::DerivativeDeltas;
use crate::val::ShaderVariable;

/// Multipliers of (ddx coarse, ddy coarse, ddx fine, ddy fine) that move
/// the active lane's value to another quad lane, by `[active][lane]`.
const QUAD_OFFSETS: [[[f32; 4]; 4]; 4] = [
    [[0., 0., 0., 0.], [1., 0., 0., 0.], [0., 1., 0., 0.], [1., 1., 0., 0.]],
    [[-1., 0., 0., 0.], [0., 0., 0., 0.], [-1., 1., 0., 0.], [0., 0., 0., 1.]],
    [[0., -1., 0., 0.], [1., -1., 0., 0.], [0., 0., 0., 0.], [0., 0., 1., 0.]],
    [[-1., 0., 0., -1.], [0., 0., 0., -1.], [0., 0., -1., 0.], [0., 0., 0., 0.]],
];

/// Value of an interpolated input on quad lane `lane`, given its value on
/// quad lane `active`. Only float components move; `active` and `lane`
/// are positions within the quad (0..4).
pub fn derive_quad_input(value: &ShaderVariable, active: usize, lane: usize, deltas: &DerivativeDeltas) -> ShaderVariable {
    let mut out = value.clone();
    if !value.ty.is_float() || active == lane || active > 3 || lane > 3 {
        return out;
    }
    let [dxc, dyc, dxf, dyf] = QUAD_OFFSETS[active][lane];
    for i in 0..out.component_count().min(4) {
        let delta = dxc * deltas.ddx_coarse[i]
            + dyc * deltas.ddy_coarse[i]
            + dxf * deltas.ddx_fine[i]
            + dyf * deltas.ddy_fine[i];
        out.set_float(i, value.float(i) + delta as f64);
    }
    out
}

/// Deltas of the fragment coordinate when the host supplies none: one
/// pixel per lane in each direction.
pub fn frag_coord_deltas() -> DerivativeDeltas {
    DerivativeDeltas::uniform([1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn affine(q: usize) -> f32 {
        // f(x, y) = 3x - 2y + 1 on the quad grid
        let (x, y) = ((q % 2) as f32, (q / 2) as f32);
        3.0 * x - 2.0 * y + 1.0
    }

    #[test]
    fn test_rebuilds_affine_input_from_any_lane() {
        let deltas = DerivativeDeltas::uniform([3.0, 0.0, 0.0, 0.0], [-2.0, 0.0, 0.0, 0.0]);
        for active in 0..4 {
            let value = ShaderVariable::scalar_f32("v", affine(active));
            for lane in 0..4 {
                let got = derive_quad_input(&value, active, lane, &deltas);
                assert_eq!(got.f32v(0), affine(lane), "active {active} lane {lane}");
            }
        }
    }

    #[test]
    fn test_integer_inputs_are_copied() {
        let value = ShaderVariable::scalar_u32("id", 9);
        let deltas = DerivativeDeltas::uniform([1.0; 4], [1.0; 4]);
        assert_eq!(derive_quad_input(&value, 0, 3, &deltas).u32v(0), 9);
    }
}
