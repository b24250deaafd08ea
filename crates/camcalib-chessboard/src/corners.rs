//! ChESS corner candidates from `chess-corners`, adapted to [`Corner`].

use crate::params::CornerParams;
use camcalib_core::{Corner, GrayImageView};
use chess_corners::{find_chess_corners_u8, CornerDescriptor};
use log::{debug, warn};
use nalgebra::Point2;
use std::f32::consts::{FRAC_PI_2, PI};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Frames smaller than the ChESS ring support cannot hold a corner.
const MIN_SIDE: usize = 16;

/// Sub-pixel saddle candidates, strongest first, with near-duplicates merged.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(img, params), fields(width = img.width, height = img.height))
)]
pub fn detect_chess_corners(img: &GrayImageView<'_>, params: &CornerParams) -> Vec<Corner> {
    if img.width < MIN_SIDE || img.height < MIN_SIDE {
        return Vec::new();
    }
    let (Ok(w), Ok(h)) = (u32::try_from(img.width), u32::try_from(img.height)) else {
        return Vec::new();
    };
    let raw = match find_chess_corners_u8(img.data, w, h, &params.chess_config()) {
        Ok(raw) => raw,
        Err(err) => {
            warn!("ChESS detection failed: {err}");
            return Vec::new();
        }
    };

    let mut corners: Vec<Corner> = raw
        .iter()
        .filter(|c| c.response > 0.0 && c.x.is_finite() && c.y.is_finite())
        .map(adapt_chess_corner)
        .collect();
    corners.sort_by(|a, b| b.strength.total_cmp(&a.strength));
    let found = corners.len();
    let merged = merge_close_corners(corners, params.merge_radius);
    if merged.len() != found {
        debug!("merged {} near-duplicate corners", found - merged.len());
    }
    merged
}

/// `axes[1]` lies counter-clockwise of `axes[0]` by less than π and the arc
/// between them is one colour, so their bisector runs along a square
/// diagonal. Neighbouring corners get orthogonal diagonals.
pub fn adapt_chess_corner(c: &CornerDescriptor) -> Corner {
    let bisector = 0.5 * (c.axes[0].angle + c.axes[1].angle);
    Corner {
        position: Point2::new(c.x, c.y),
        orientation: (bisector + FRAC_PI_2).rem_euclid(PI),
        strength: c.response,
    }
}

/// Greedy merge of a strength-sorted cloud: a corner within `radius` of an
/// already kept one is dropped.
pub fn merge_close_corners(sorted: Vec<Corner>, radius: f32) -> Vec<Corner> {
    if !(radius > 0.0) {
        return sorted;
    }
    let r2 = radius * radius;
    let mut kept: Vec<Corner> = Vec::with_capacity(sorted.len());
    for c in sorted {
        if kept
            .iter()
            .all(|k| (k.position - c.position).norm_squared() > r2)
        {
            kept.push(c);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chess_corners::AxisEstimate;
    use std::f32::consts::FRAC_PI_4;

    fn corner(x: f32, y: f32, strength: f32) -> Corner {
        Corner {
            position: Point2::new(x, y),
            orientation: 0.0,
            strength,
        }
    }

    fn descriptor(a0: f32, a1: f32) -> CornerDescriptor {
        CornerDescriptor::new(
            10.0,
            20.0,
            5.0,
            100.0,
            1.0,
            [AxisEstimate::new(a0, 0.01), AxisEstimate::new(a1, 0.01)],
        )
    }

    #[test]
    fn near_duplicates_collapse_into_the_strongest() {
        let sorted = vec![
            corner(10.0, 10.0, 9.0),
            corner(30.0, 10.0, 8.0),
            corner(11.5, 10.5, 7.0),
            corner(30.0, 12.9, 1.0),
        ];
        let merged = merge_close_corners(sorted, 3.0);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].strength, 9.0);
        assert_eq!(merged[1].strength, 8.0);
    }

    #[test]
    fn zero_radius_keeps_everything() {
        let sorted = vec![corner(1.0, 1.0, 2.0), corner(1.0, 1.0, 1.0)];
        assert_eq!(merge_close_corners(sorted, 0.0).len(), 2);
    }

    #[test]
    fn adjacent_corners_get_orthogonal_diagonals() {
        // same grid lines, opposite colouring
        let a = adapt_chess_corner(&descriptor(0.0, FRAC_PI_2));
        let b = adapt_chess_corner(&descriptor(FRAC_PI_2, PI));
        assert_eq!(a.position, Point2::new(10.0, 20.0));
        assert_eq!(a.strength, 5.0);
        assert_abs_diff_eq!(a.orientation, 3.0 * FRAC_PI_4, epsilon = 1e-5);
        assert_abs_diff_eq!(b.orientation, FRAC_PI_4, epsilon = 1e-5);
    }

    #[test]
    fn tiny_and_flat_frames_have_no_corners() {
        let tiny = camcalib_core::GrayImage::filled(8, 8, 0);
        assert!(detect_chess_corners(&tiny.view(), &CornerParams::default()).is_empty());
        let flat = camcalib_core::GrayImage::filled(64, 48, 128);
        assert!(detect_chess_corners(&flat.view(), &CornerParams::default()).is_empty());
    }
}
