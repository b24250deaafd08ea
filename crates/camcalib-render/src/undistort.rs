//! Undistortion maps and bilinear remapping.
//!
//! A map stores, for every destination pixel of the rectified image, the
//! source pixel in the distorted frame: the destination pixel is lifted to a
//! normalised ray with the new intrinsics, pushed through the forward
//! distortion model and mapped back with the original intrinsics.

use camcalib_core::{
    sample_bilinear_u8, CameraModel, GrayImage, GrayImageView, IntrinsicMatrix, RgbImage,
};
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Samples per axis when probing the distorted image border.
const GRID_SAMPLES: usize = 9;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum UndistortError {
    #[error("image size {width}x{height} is empty")]
    EmptyImage { width: usize, height: usize },
    #[error("distortion cannot be inverted over the image")]
    NotInvertible,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndistortParams {
    /// 0 keeps only valid pixels (no black border), 1 keeps every source
    /// pixel; values in between interpolate.
    pub balance: f64,
}

impl Default for UndistortParams {
    fn default() -> Self {
        Self { balance: 1.0 }
    }
}

#[derive(Clone, Copy, Debug)]
struct Rect {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

/// Intrinsics for the rectified image.
///
/// A `9x9` grid of pixels spanning the frame is undistorted. The outer
/// rectangle bounds all of them; the inner one is bounded by the innermost
/// samples of each border row/column. `balance` interpolates between
/// filling the frame with the inner rectangle (0) and fitting the outer one
/// (1).
pub fn optimal_new_camera_matrix(
    model: &CameraModel,
    size: (usize, usize),
    balance: f64,
) -> Result<IntrinsicMatrix, UndistortError> {
    let (w, h) = size;
    if w == 0 || h == 0 {
        return Err(UndistortError::EmptyImage {
            width: w,
            height: h,
        });
    }
    let n = GRID_SAMPLES;
    let mut grid = Vec::with_capacity(n * n);
    for j in 0..n {
        for i in 0..n {
            let px = Point2::new(
                i as f64 * (w - 1) as f64 / (n - 1) as f64,
                j as f64 * (h - 1) as f64 / (n - 1) as f64,
            );
            let p = model
                .pixel_to_normalized(&px)
                .ok_or(UndistortError::NotInvertible)?;
            grid.push(p);
        }
    }
    let at = |i: usize, j: usize| grid[j * n + i];

    let mut outer = Rect {
        x0: f64::MAX,
        y0: f64::MAX,
        x1: f64::MIN,
        y1: f64::MIN,
    };
    for p in &grid {
        outer.x0 = outer.x0.min(p.x);
        outer.y0 = outer.y0.min(p.y);
        outer.x1 = outer.x1.max(p.x);
        outer.y1 = outer.y1.max(p.y);
    }
    let mut inner = Rect {
        x0: f64::MIN,
        y0: f64::MIN,
        x1: f64::MAX,
        y1: f64::MAX,
    };
    for k in 0..n {
        inner.x0 = inner.x0.max(at(0, k).x);
        inner.x1 = inner.x1.min(at(n - 1, k).x);
        inner.y0 = inner.y0.max(at(k, 0).y);
        inner.y1 = inner.y1.min(at(k, n - 1).y);
    }
    if inner.x1 <= inner.x0 || inner.y1 <= inner.y0 {
        return Err(UndistortError::NotInvertible);
    }

    let fit = |r: &Rect| {
        let fx = (w - 1).max(1) as f64 / (r.x1 - r.x0);
        let fy = (h - 1).max(1) as f64 / (r.y1 - r.y0);
        (fx, fy, -fx * r.x0, -fy * r.y0)
    };
    let a = balance.clamp(0.0, 1.0);
    let (fx0, fy0, cx0, cy0) = fit(&inner);
    let (fx1, fy1, cx1, cy1) = fit(&outer);
    let k = IntrinsicMatrix::new(
        fx0 * (1.0 - a) + fx1 * a,
        fy0 * (1.0 - a) + fy1 * a,
        cx0 * (1.0 - a) + cx1 * a,
        cy0 * (1.0 - a) + cy1 * a,
    );
    debug!(
        "new camera matrix (balance {a}): fx={:.2} fy={:.2} cx={:.2} cy={:.2}",
        k.fx, k.fy, k.cx, k.cy
    );
    Ok(k)
}

/// Per-pixel source coordinates for a rectified image.
#[derive(Clone, Debug, PartialEq)]
pub struct UndistortionMap {
    pub width: usize,
    pub height: usize,
    pub map_x: Vec<f32>,
    pub map_y: Vec<f32>,
    /// Intrinsics of the rectified image.
    pub new_intrinsics: IntrinsicMatrix,
}

impl UndistortionMap {
    /// Build the map for `model` rendered into `new_intrinsics`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(model, new_intrinsics), fields(width = size.0, height = size.1))
    )]
    pub fn new(
        model: &CameraModel,
        size: (usize, usize),
        new_intrinsics: IntrinsicMatrix,
    ) -> Result<Self, UndistortError> {
        let (w, h) = size;
        if w == 0 || h == 0 {
            return Err(UndistortError::EmptyImage {
                width: w,
                height: h,
            });
        }
        let mut map_x = Vec::with_capacity(w * h);
        let mut map_y = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                let n = new_intrinsics.pixel_to_normalized(&Point2::new(x as f64, y as f64));
                let src = model
                    .intrinsics
                    .normalized_to_pixel(&model.distortion.distort(&n));
                map_x.push(src.x as f32);
                map_y.push(src.y as f32);
            }
        }
        Ok(Self {
            width: w,
            height: h,
            map_x,
            map_y,
            new_intrinsics,
        })
    }

    /// Source pixel for destination `(x, y)`.
    #[inline]
    pub fn source(&self, x: usize, y: usize) -> (f32, f32) {
        let i = y * self.width + x;
        (self.map_x[i], self.map_y[i])
    }

    pub fn remap_gray(&self, src: &GrayImageView<'_>) -> GrayImage {
        let mut out = GrayImage::new(self.width, self.height);
        for (i, (&sx, &sy)) in self.map_x.iter().zip(&self.map_y).enumerate() {
            out.data[i] = sample_bilinear_u8(src, sx, sy);
        }
        out
    }

    pub fn remap_rgb(&self, src: &RgbImage) -> RgbImage {
        let mut out = RgbImage::new(self.width, self.height);
        for (i, (&sx, &sy)) in self.map_x.iter().zip(&self.map_y).enumerate() {
            let rgb = sample_rgb_bilinear(src, sx, sy);
            out.data[3 * i..3 * i + 3].copy_from_slice(&rgb);
        }
        out
    }
}

/// Bilinear RGB sample; pixels outside the frame read as black.
fn sample_rgb_bilinear(src: &RgbImage, x: f32, y: f32) -> [u8; 3] {
    if !(x > -1.0 && y > -1.0 && x < src.width as f32 && y < src.height as f32) {
        return [0; 3];
    }
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let px = |xi: i64, yi: i64| -> [f32; 3] {
        if xi < 0 || yi < 0 || xi >= src.width as i64 || yi >= src.height as i64 {
            return [0.0; 3];
        }
        let p = src.get(xi as usize, yi as usize);
        [p[0] as f32, p[1] as f32, p[2] as f32]
    };
    let (p00, p10, p01, p11) = (px(x0, y0), px(x0 + 1, y0), px(x0, y0 + 1), px(x0 + 1, y0 + 1));
    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] + (p10[c] - p00[c]) * fx;
        let bottom = p01[c] + (p11[c] - p01[c]) * fx;
        out[c] = (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Optimal new intrinsics for `params.balance`, then the map.
pub fn build_map(
    model: &CameraModel,
    size: (usize, usize),
    params: &UndistortParams,
) -> Result<UndistortionMap, UndistortError> {
    let k = optimal_new_camera_matrix(model, size, params.balance)?;
    UndistortionMap::new(model, size, k)
}

/// Undistort individual pixels into the image described by `new_intrinsics`
/// (the model's own intrinsics when `None`). `None` where the distortion
/// could not be inverted.
pub fn undistort_points(
    points: &[Point2<f64>],
    model: &CameraModel,
    new_intrinsics: Option<&IntrinsicMatrix>,
) -> Vec<Option<Point2<f64>>> {
    let k = new_intrinsics.unwrap_or(&model.intrinsics);
    points
        .iter()
        .map(|p| {
            model
                .pixel_to_normalized(p)
                .map(|n| k.normalized_to_pixel(&n))
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq)]
struct CacheKey {
    model: CameraModel,
    size: (usize, usize),
    balance: f64,
}

/// Memoised undistortion map, rebuilt only when the camera model, the image
/// size or the balance changes.
#[derive(Debug, Default)]
pub struct UndistortionCache {
    entry: Option<(CacheKey, UndistortionMap)>,
    builds: usize,
}

impl UndistortionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(
        &mut self,
        model: &CameraModel,
        size: (usize, usize),
        params: &UndistortParams,
    ) -> Result<&UndistortionMap, UndistortError> {
        let key = CacheKey {
            model: *model,
            size,
            balance: params.balance,
        };
        let stale = !matches!(&self.entry, Some((k, _)) if *k == key);
        if stale {
            debug!("building undistortion map for {}x{}", size.0, size.1);
            let map = build_map(model, size, params)?;
            self.builds += 1;
            self.entry = Some((key, map));
        }
        match &self.entry {
            Some((_, map)) => Ok(map),
            None => Err(UndistortError::NotInvertible),
        }
    }

    /// Number of maps built so far.
    pub fn builds(&self) -> usize {
        self.builds
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camcalib_core::DistortionCoeffs;

    fn model(k1: f64) -> CameraModel {
        CameraModel::new(
            IntrinsicMatrix::new(300.0, 300.0, 159.5, 119.5),
            DistortionCoeffs::from_array([k1, 0.0, 0.0, 0.0, 0.0]),
        )
        .unwrap()
    }

    #[test]
    fn zero_distortion_map_is_identity() {
        let m = model(0.0);
        let map = UndistortionMap::new(&m, (320, 240), m.intrinsics).unwrap();
        for &(x, y) in &[(0usize, 0usize), (100, 50), (319, 239)] {
            let (sx, sy) = map.source(x, y);
            assert!((sx - x as f32).abs() < 1e-3 && (sy - y as f32).abs() < 1e-3);
        }
    }

    #[test]
    fn zero_distortion_keeps_intrinsics() {
        let m = model(0.0);
        for balance in [0.0, 0.5, 1.0] {
            let k = optimal_new_camera_matrix(&m, (320, 240), balance).unwrap();
            assert!((k.fx - 300.0).abs() < 1e-6, "{k:?}");
            assert!((k.cy - 119.5).abs() < 1e-6, "{k:?}");
        }
    }

    #[test]
    fn balance_orders_focal_lengths() {
        // barrel distortion: keeping every pixel needs a wider view
        let m = model(-0.25);
        let crop = optimal_new_camera_matrix(&m, (320, 240), 0.0).unwrap();
        let full = optimal_new_camera_matrix(&m, (320, 240), 1.0).unwrap();
        assert!(full.fx < crop.fx, "full {full:?} crop {crop:?}");
    }

    #[test]
    fn cropped_map_stays_inside_the_source() {
        let m = model(-0.25);
        let map = build_map(&m, (320, 240), &UndistortParams { balance: 0.0 }).unwrap();
        for (&x, &y) in map.map_x.iter().zip(&map.map_y) {
            assert!(x > -1.0 && y > -1.0 && x < 321.0 && y < 241.0, "({x}, {y})");
        }
    }

    #[test]
    fn rgb_remap_blacks_out_unmapped_pixels() {
        let m = model(0.0);
        let mut src = RgbImage::new(8, 8);
        for y in 0..8 {
            for x in 0..8 {
                src.put(x, y, [10, 20, 30]);
            }
        }
        let mut map = UndistortionMap::new(&m, (8, 8), m.intrinsics).unwrap();
        map.map_x[0] = -50.0;
        let out = map.remap_rgb(&src);
        assert_eq!(out.get(0, 0), [0, 0, 0]);
        assert_eq!(out.get(4, 4), [10, 20, 30]);
    }

    #[test]
    fn cache_rebuilds_only_on_key_change() {
        let mut cache = UndistortionCache::new();
        let params = UndistortParams::default();
        let a = model(-0.1);
        cache.get_or_build(&a, (64, 48), &params).unwrap();
        cache.get_or_build(&a, (64, 48), &params).unwrap();
        assert_eq!(cache.builds(), 1);
        cache.get_or_build(&a, (80, 48), &params).unwrap();
        assert_eq!(cache.builds(), 2);
        cache.get_or_build(&model(-0.2), (80, 48), &params).unwrap();
        assert_eq!(cache.builds(), 3);
        let map = cache.get_or_build(&model(-0.2), (80, 48), &params).unwrap();
        assert_eq!(map.width, 80);
        assert_eq!(cache.builds(), 3);
    }

    #[test]
    fn empty_size_is_rejected() {
        let m = model(0.0);
        assert_eq!(
            build_map(&m, (0, 10), &UndistortParams::default()).unwrap_err(),
            UndistortError::EmptyImage {
                width: 0,
                height: 10
            }
        );
    }
}
