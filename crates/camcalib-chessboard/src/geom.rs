use camcalib_core::Corner;
use nalgebra::Vector2;
use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

/// Compute the absolute difference between two angles (radians),
/// normalized into `[0, π]`.
pub fn angle_diff_abs(a: f32, b: f32) -> f32 {
    let two_pi = 2.0 * PI;
    // Normalize angle difference to [-π, π).
    let mut diff = (b - a).rem_euclid(two_pi);
    if diff >= PI {
        diff -= two_pi;
    }
    diff.abs()
}

/// Angle between an undirected axis (modulo π) and a directed vector angle,
/// in `[0, π/2]`.
pub fn axis_vec_diff(axis_angle: f32, vec_angle: f32) -> f32 {
    let d = angle_diff_abs(axis_angle, vec_angle);
    d.min(PI - d)
}

/// Check whether two undirected axes are approximately orthogonal within
/// `tolerance`.
pub fn is_orthogonal(reference_angle: f32, other_angle: f32, tolerance: f32) -> bool {
    (FRAC_PI_2 - axis_vec_diff(reference_angle, other_angle)).abs() <= tolerance.abs()
}

#[inline]
pub fn angle_to_unit(theta: f32) -> Vector2<f32> {
    Vector2::new(theta.cos(), theta.sin())
}

/// Global grid axes `(u, v)` from corner orientations.
///
/// Neighbouring corners carry orthogonal diagonals, so orientations are
/// averaged in quadruple-angle space where `θ` and `θ + π/2` coincide. The
/// grid axes sit at ±45° to that mean diagonal.
pub fn grid_axes_from_orientations(corners: &[Corner]) -> Option<(Vector2<f32>, Vector2<f32>)> {
    let mut sum = Vector2::<f32>::zeros();
    for c in corners {
        let w = c.strength.max(0.0);
        let four = 4.0 * c.orientation;
        sum += w * Vector2::new(four.cos(), four.sin());
    }
    if sum.norm_squared() < 1e-12 {
        return None;
    }
    let diagonal = 0.25 * sum.y.atan2(sum.x);
    Some((
        angle_to_unit(diagonal + FRAC_PI_4),
        angle_to_unit(diagonal + 3.0 * FRAC_PI_4),
    ))
}
