//! Per-frame board pose with known intrinsics and distortion.

use crate::init::{pose_from_homography, symmetric_eigenvalues};
use crate::lm::{solve, LmOptions, NllsProblem};
use crate::reprojection::{pose_from_params, pose_params, reprojection_rms, write_residuals};
use camcalib_core::{estimate_homography, CameraModel, CorrespondenceSet, Pose, MIN_DEPTH};
use log::debug;
use nalgebra::{DVector, Matrix2, Matrix3, Point2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Minimum number of correspondences for a planar pose.
pub const MIN_POSE_POINTS: usize = 4;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PoseError {
    #[error("need at least 4 correspondences, got {found}")]
    TooFewPoints { found: usize },
    #[error("{which} points are nearly collinear")]
    Collinear { which: &'static str },
    #[error("degenerate geometry: {0}")]
    Degenerate(&'static str),
    #[error("pose refinement did not converge after {iterations} iterations")]
    NotConverged { iterations: usize },
    #[error("board lies behind the camera")]
    BehindCamera,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseOptions {
    pub lm: LmOptions,
    /// Smallest accepted ratio of the point scatter's eigenvalues.
    pub min_spread_ratio: f64,
}

impl Default for PoseOptions {
    fn default() -> Self {
        Self {
            lm: LmOptions {
                max_iters: 100,
                ..LmOptions::default()
            },
            min_spread_ratio: 1e-6,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    pub pose: Pose,
    /// Reprojection RMS in pixels.
    pub rms: f64,
    pub iterations: usize,
}

struct PoseProblem<'a> {
    model: &'a CameraModel,
    set: &'a CorrespondenceSet,
}

impl NllsProblem for PoseProblem<'_> {
    fn num_params(&self) -> usize {
        6
    }

    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut r = DVector::zeros(2 * self.set.len());
        write_residuals(
            self.model,
            &pose_from_params(x.as_slice()),
            self.set,
            r.as_mut_slice(),
        );
        r
    }
}

/// Pose-only refinement: homography initialisation in undistorted
/// normalised coordinates, then LM over `[rvec, t]`.
#[derive(Clone, Debug, Default)]
pub struct PoseEstimator {
    pub options: PoseOptions,
}

impl PoseEstimator {
    pub fn new(options: PoseOptions) -> Self {
        Self { options }
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(points = set.len()))
    )]
    pub fn estimate(
        &self,
        set: &CorrespondenceSet,
        model: &CameraModel,
    ) -> Result<PoseEstimate, PoseError> {
        if set.len() < MIN_POSE_POINTS {
            return Err(PoseError::TooFewPoints { found: set.len() });
        }

        let board: Vec<Point2<f64>> = set
            .board_points()
            .iter()
            .map(|p| Point2::new(p.x, p.y))
            .collect();
        if spread_ratio(&board) < self.options.min_spread_ratio {
            return Err(PoseError::Collinear { which: "board" });
        }
        if spread_ratio(set.image_points()) < self.options.min_spread_ratio {
            return Err(PoseError::Collinear { which: "image" });
        }

        let normalized = set
            .image_points()
            .iter()
            .map(|p| model.pixel_to_normalized(p).map(|n| Point2::new(n.x, n.y)))
            .collect::<Option<Vec<_>>>()
            .ok_or(PoseError::Degenerate("distortion could not be inverted"))?;
        let h = estimate_homography(&board, &normalized)
            .ok_or(PoseError::Degenerate("homography estimation failed"))?;
        let init = pose_from_homography(&Matrix3::identity(), &h.h)
            .ok_or(PoseError::Degenerate("homography decomposition failed"))?;

        let problem = PoseProblem { model, set };
        let x0 = DVector::from_row_slice(&pose_params(&init));
        let (x, report) = solve(&problem, x0, &self.options.lm);
        if !report.converged {
            return Err(PoseError::NotConverged {
                iterations: report.iterations,
            });
        }

        let pose = pose_from_params(x.as_slice());
        if set
            .board_points()
            .iter()
            .any(|p| pose.transform_point(p).z <= MIN_DEPTH)
        {
            return Err(PoseError::BehindCamera);
        }

        let rms = reprojection_rms(model, &pose, set);
        debug!(
            "pose estimated in {} iterations, rms {:.4}px",
            report.iterations, rms
        );
        Ok(PoseEstimate {
            pose,
            rms,
            iterations: report.iterations,
        })
    }
}

/// Board pose for one frame with default options.
pub fn estimate_pose(set: &CorrespondenceSet, model: &CameraModel) -> Result<Pose, PoseError> {
    Ok(PoseEstimator::default().estimate(set, model)?.pose)
}

/// `λ_min / λ_max` of the 2D scatter matrix; zero for collinear points.
fn spread_ratio(points: &[Point2<f64>]) -> f64 {
    let n = points.len() as f64;
    let mean = points.iter().fold(Point2::origin(), |acc: Point2<f64>, p| {
        acc + p.coords / n
    });
    let mut cov = Matrix2::<f64>::zeros();
    for p in points {
        let d = p - mean;
        cov += d * d.transpose();
    }
    let (lo, hi) = symmetric_eigenvalues(&cov);
    if hi <= 0.0 {
        return 0.0;
    }
    (lo / hi).max(0.0)
}
