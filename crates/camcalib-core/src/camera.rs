//! Pinhole camera with Brown–Conrady lens distortion.
//!
//! Distortion acts on normalised image coordinates (`x/z`, `y/z`) before
//! the intrinsic matrix maps them to pixels. Coefficients use the common
//! `k1, k2, p1, p2, k3` ordering.

use nalgebra::{Matrix3, Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};

use crate::Pose;

/// Depth below which a camera-frame point counts as behind the camera.
pub const MIN_DEPTH: f64 = 1e-9;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("focal lengths must be positive (fx={fx}, fy={fy})")]
    NonPositiveFocal { fx: f64, fy: f64 },
    #[error("camera parameters contain non-finite values")]
    NonFinite,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum ProjectionError {
    #[error("point {index} lies behind the camera (z = {z})")]
    BehindCamera { index: usize, z: f64 },
}

/// Focal lengths, principal point and skew, all in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntrinsicMatrix {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub skew: f64,
}

impl IntrinsicMatrix {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            skew: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let all = [self.fx, self.fy, self.cx, self.cy, self.skew];
        if all.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite);
        }
        if self.fx <= 0.0 || self.fy <= 0.0 {
            return Err(ModelError::NonPositiveFocal {
                fx: self.fx,
                fy: self.fy,
            });
        }
        Ok(())
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, self.skew, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    #[inline]
    pub fn normalized_to_pixel(&self, n: &Vector2<f64>) -> Point2<f64> {
        Point2::new(
            self.fx * n.x + self.skew * n.y + self.cx,
            self.fy * n.y + self.cy,
        )
    }

    #[inline]
    pub fn pixel_to_normalized(&self, p: &Point2<f64>) -> Vector2<f64> {
        let y = (p.y - self.cy) / self.fy;
        let x = (p.x - self.cx - self.skew * y) / self.fx;
        Vector2::new(x, y)
    }
}

/// Radial (`k1, k2, k3`) and tangential (`p1, p2`) coefficients.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DistortionCoeffs {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl DistortionCoeffs {
    pub const ZERO: DistortionCoeffs = DistortionCoeffs {
        k1: 0.0,
        k2: 0.0,
        p1: 0.0,
        p2: 0.0,
        k3: 0.0,
    };

    /// Build from `[k1, k2, p1, p2, k3]`.
    pub fn from_array(c: [f64; 5]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    pub fn to_array(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn is_zero(&self) -> bool {
        self.to_array().iter().all(|&c| c == 0.0)
    }

    /// Apply the forward model to an undistorted normalised point.
    #[inline]
    pub fn distort(&self, n: &Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let xy = x * y;
        Vector2::new(
            x * radial + 2.0 * self.p1 * xy + self.p2 * (r2 + 2.0 * x * x),
            y * radial + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * xy,
        )
    }

    /// Invert [`Self::distort`] by fixed-point iteration.
    ///
    /// Returns `None` if the iteration leaves the finite range, which happens
    /// far outside the region where the polynomial is monotonic.
    pub fn undistort(&self, d: &Vector2<f64>, max_iters: usize) -> Option<Vector2<f64>> {
        if self.is_zero() {
            return Some(*d);
        }
        let mut n = *d;
        for _ in 0..max_iters {
            let (x, y) = (n.x, n.y);
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
            if radial.abs() < 1e-12 {
                return None;
            }
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            let next = Vector2::new((d.x - dx) / radial, (d.y - dy) / radial);
            if !(next.x.is_finite() && next.y.is_finite()) {
                return None;
            }
            let step = (next - n).norm();
            n = next;
            if step < 1e-14 {
                break;
            }
        }
        Some(n)
    }
}

/// Intrinsics plus distortion; one instance per calibration session.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub intrinsics: IntrinsicMatrix,
    pub distortion: DistortionCoeffs,
}

impl CameraModel {
    pub fn new(
        intrinsics: IntrinsicMatrix,
        distortion: DistortionCoeffs,
    ) -> Result<Self, ModelError> {
        intrinsics.validate()?;
        if distortion.to_array().iter().any(|c| !c.is_finite()) {
            return Err(ModelError::NonFinite);
        }
        Ok(Self {
            intrinsics,
            distortion,
        })
    }

    /// Project a point already expressed in the camera frame.
    #[inline]
    pub fn project_camera_point(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z <= MIN_DEPTH {
            return None;
        }
        let n = Vector2::new(p.x / p.z, p.y / p.z);
        Some(
            self.intrinsics
                .normalized_to_pixel(&self.distortion.distort(&n)),
        )
    }

    /// Project one board-frame point through `pose`.
    #[inline]
    pub fn project_point(&self, pose: &Pose, p: &Point3<f64>) -> Option<Point2<f64>> {
        self.project_camera_point(&pose.transform_point(p))
    }

    /// Project every point, failing on the first one behind the camera.
    pub fn project_points(
        &self,
        pose: &Pose,
        points: &[Point3<f64>],
    ) -> Result<Vec<Point2<f64>>, ProjectionError> {
        points
            .iter()
            .enumerate()
            .map(|(index, p)| {
                let pc = pose.transform_point(p);
                self.project_camera_point(&pc)
                    .ok_or(ProjectionError::BehindCamera { index, z: pc.z })
            })
            .collect()
    }

    /// Project every point, yielding `None` for points behind the camera.
    pub fn project_points_visible(
        &self,
        pose: &Pose,
        points: &[Point3<f64>],
    ) -> Vec<Option<Point2<f64>>> {
        points.iter().map(|p| self.project_point(pose, p)).collect()
    }

    /// Map a distorted pixel to its undistorted normalised coordinates.
    pub fn pixel_to_normalized(&self, p: &Point2<f64>) -> Option<Vector2<f64>> {
        let d = self.intrinsics.pixel_to_normalized(p);
        self.distortion.undistort(&d, 20)
    }

    /// Remove distortion from a pixel, keeping the same intrinsic matrix.
    pub fn undistort_pixel(&self, p: &Point2<f64>) -> Option<Point2<f64>> {
        let n = self.pixel_to_normalized(p)?;
        Some(self.intrinsics.normalized_to_pixel(&n))
    }
}

/// Projector entry point: board-frame points to distorted pixels.
pub fn project(
    points: &[Point3<f64>],
    pose: &Pose,
    model: &CameraModel,
) -> Result<Vec<Point2<f64>>, ProjectionError> {
    model.project_points(pose, points)
}
