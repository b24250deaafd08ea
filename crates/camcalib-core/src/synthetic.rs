//! Ray-cast chessboard renderer for hermetic tests and benchmarks.
//!
//! Each output pixel is supersampled: the sample ray is undistorted through
//! the camera model, intersected with the board plane and shaded by the
//! square it lands in. The board carries one quiet-zone square around the
//! inner corners plus a white margin; everything else is background.

use nalgebra::{Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::{CameraModel, GrayImage, PatternSpec, Pose};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardStyle {
    pub dark: u8,
    pub light: u8,
    pub background: u8,
    /// White border around the outer squares, in cells.
    pub margin_cells: f64,
    /// Samples per pixel along each axis.
    pub supersample: usize,
}

impl Default for BoardStyle {
    fn default() -> Self {
        Self {
            dark: 30,
            light: 225,
            background: 110,
            margin_cells: 0.75,
            supersample: 3,
        }
    }
}

/// Pose that puts the board centre on the optical axis at `distance`,
/// rotated by the axis-angle vector `rvec`.
pub fn board_facing_pose(pattern: &PatternSpec, distance: f64, rvec: Vector3<f64>) -> Pose {
    let center = Point3::new(
        (pattern.cols - 1) as f64 * pattern.cell_size * 0.5,
        (pattern.rows - 1) as f64 * pattern.cell_size * 0.5,
        0.0,
    );
    let rotation = nalgebra::Rotation3::new(rvec);
    let translation = Vector3::new(0.0, 0.0, distance) - rotation * center.coords;
    Pose::new(rotation, translation)
}

/// Shade of the board plane at board coordinates `(x, y)`.
pub fn board_shade(pattern: &PatternSpec, style: &BoardStyle, x: f64, y: f64) -> u8 {
    let s = pattern.cell_size;
    let a = (x / s).floor() as i64 + 1;
    let b = (y / s).floor() as i64 + 1;
    if (0..=pattern.cols as i64).contains(&a) && (0..=pattern.rows as i64).contains(&b) {
        // the square diagonal from corner (0, 0) towards (1, 1) is dark
        return if (a + b) % 2 == 0 {
            style.dark
        } else {
            style.light
        };
    }
    let m = style.margin_cells * s;
    let x_range = (-s - m)..=(pattern.cols as f64 * s + m);
    let y_range = (-s - m)..=(pattern.rows as f64 * s + m);
    if x_range.contains(&x) && y_range.contains(&y) {
        style.light
    } else {
        style.background
    }
}

/// Render the board as seen by `model` from `pose`.
pub fn render_chessboard(
    pattern: &PatternSpec,
    model: &CameraModel,
    pose: &Pose,
    width: usize,
    height: usize,
    style: &BoardStyle,
) -> GrayImage {
    let n = style.supersample.max(1);
    let r_inv = pose.rotation.inverse();
    let origin = pose.camera_center();
    let mut out = GrayImage::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let mut acc = 0u32;
            for sy in 0..n {
                for sx in 0..n {
                    // pixel centres sit on integer coordinates
                    let px = x as f64 - 0.5 + (sx as f64 + 0.5) / n as f64;
                    let py = y as f64 - 0.5 + (sy as f64 + 0.5) / n as f64;
                    acc += sample_ray(pattern, model, style, &r_inv, &origin, px, py) as u32;
                }
            }
            out.set(x, y, ((acc + (n * n) as u32 / 2) / (n * n) as u32) as u8);
        }
    }
    out
}

fn sample_ray(
    pattern: &PatternSpec,
    model: &CameraModel,
    style: &BoardStyle,
    r_inv: &nalgebra::Rotation3<f64>,
    origin: &Point3<f64>,
    px: f64,
    py: f64,
) -> u8 {
    let Some(n) = model.pixel_to_normalized(&Point2::new(px, py)) else {
        return style.background;
    };
    let dir = r_inv.transform_vector(&Vector3::new(n.x, n.y, 1.0));
    if dir.z.abs() < 1e-12 {
        return style.background;
    }
    let lambda = -origin.z / dir.z;
    if lambda <= 0.0 {
        return style.background;
    }
    let hit = *origin + dir * lambda;
    board_shade(pattern, style, hit.x, hit.y)
}
