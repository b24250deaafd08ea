//! Multi-view intrinsic calibration.
//!
//! Unknowns are the free intrinsic/distortion parameters shared by every
//! view plus one `[rvec, t]` block per view. Residuals are the pixel
//! reprojection errors of all board corners in all views.

use crate::init::{initial_intrinsics, pose_from_homography};
use crate::lm::{solve, LmOptions, NllsProblem};
use crate::reprojection::{pose_from_params, pose_params, reprojection_sq_sum, write_residuals};
use camcalib_core::{
    estimate_homography, CameraModel, CorrespondenceSet, DistortionCoeffs, ModelError, Pose,
};
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector, Point2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("no correspondence sets to calibrate from")]
    InsufficientData,
    #[error("view {view} is degenerate: {reason}")]
    DegenerateView { view: usize, reason: &'static str },
    #[error("calibration produced an invalid model: {0}")]
    Model(#[from] ModelError),
}

/// Parameters to hold fixed during refinement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationFlags {
    /// Optimise a single focal length with `fx = aspect_ratio * fy`.
    pub fix_aspect_ratio: bool,
    pub aspect_ratio: f64,
    /// Hold `p1 = p2 = 0`.
    pub zero_tangent_dist: bool,
    /// Keep the principal point at its initial value.
    pub fix_principal_point: bool,
    pub fix_k1: bool,
    pub fix_k2: bool,
    pub fix_k3: bool,
    /// Start from this model instead of the closed-form estimate. Fixed
    /// parameters keep its values.
    pub intrinsic_guess: Option<CameraModel>,
}

impl Default for CalibrationFlags {
    fn default() -> Self {
        Self {
            fix_aspect_ratio: false,
            aspect_ratio: 1.0,
            zero_tangent_dist: false,
            fix_principal_point: false,
            fix_k1: false,
            fix_k2: false,
            fix_k3: false,
            intrinsic_guess: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// `sqrt(Σ‖observed − projected‖² / total_points)` over all views.
    pub rms: f64,
    pub model: CameraModel,
    /// Board pose of each input view, in input order.
    pub poses: Vec<Pose>,
    pub per_view_rms: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    /// `fy`, with `fx` tied to it by the aspect ratio.
    Focal,
    Fx,
    Fy,
    Cx,
    Cy,
    K1,
    K2,
    P1,
    P2,
    K3,
}

/// Maps the free parameter vector to a full camera model.
struct IntrinsicLayout {
    slots: Vec<Slot>,
    base: CameraModel,
    aspect_ratio: Option<f64>,
}

impl IntrinsicLayout {
    fn new(flags: &CalibrationFlags, base: CameraModel) -> Self {
        let mut slots = Vec::with_capacity(9);
        if flags.fix_aspect_ratio {
            slots.push(Slot::Focal);
        } else {
            slots.extend([Slot::Fx, Slot::Fy]);
        }
        if !flags.fix_principal_point {
            slots.extend([Slot::Cx, Slot::Cy]);
        }
        if !flags.fix_k1 {
            slots.push(Slot::K1);
        }
        if !flags.fix_k2 {
            slots.push(Slot::K2);
        }
        if !flags.zero_tangent_dist {
            slots.extend([Slot::P1, Slot::P2]);
        }
        if !flags.fix_k3 {
            slots.push(Slot::K3);
        }

        let mut base = base;
        if flags.zero_tangent_dist {
            base.distortion.p1 = 0.0;
            base.distortion.p2 = 0.0;
        }
        let aspect_ratio = flags.fix_aspect_ratio.then_some(flags.aspect_ratio);
        if let Some(ar) = aspect_ratio {
            base.intrinsics.fx = ar * base.intrinsics.fy;
        }
        Self {
            slots,
            base,
            aspect_ratio,
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn pack(&self) -> Vec<f64> {
        let k = &self.base.intrinsics;
        let d = &self.base.distortion;
        self.slots
            .iter()
            .map(|slot| match slot {
                Slot::Focal | Slot::Fy => k.fy,
                Slot::Fx => k.fx,
                Slot::Cx => k.cx,
                Slot::Cy => k.cy,
                Slot::K1 => d.k1,
                Slot::K2 => d.k2,
                Slot::P1 => d.p1,
                Slot::P2 => d.p2,
                Slot::K3 => d.k3,
            })
            .collect()
    }

    fn unpack(&self, x: &[f64]) -> CameraModel {
        let mut m = self.base;
        for (slot, &v) in self.slots.iter().zip(x) {
            match slot {
                Slot::Focal | Slot::Fy => m.intrinsics.fy = v,
                Slot::Fx => m.intrinsics.fx = v,
                Slot::Cx => m.intrinsics.cx = v,
                Slot::Cy => m.intrinsics.cy = v,
                Slot::K1 => m.distortion.k1 = v,
                Slot::K2 => m.distortion.k2 = v,
                Slot::P1 => m.distortion.p1 = v,
                Slot::P2 => m.distortion.p2 = v,
                Slot::K3 => m.distortion.k3 = v,
            }
        }
        if let Some(ar) = self.aspect_ratio {
            m.intrinsics.fx = ar * m.intrinsics.fy;
        }
        m
    }
}

struct CalibrationProblem<'a> {
    layout: IntrinsicLayout,
    views: &'a [CorrespondenceSet],
    /// First residual row of each view.
    offsets: Vec<usize>,
    num_residuals: usize,
}

impl<'a> CalibrationProblem<'a> {
    fn new(layout: IntrinsicLayout, views: &'a [CorrespondenceSet]) -> Self {
        let mut offsets = Vec::with_capacity(views.len());
        let mut acc = 0;
        for v in views {
            offsets.push(acc);
            acc += 2 * v.len();
        }
        Self {
            layout,
            views,
            offsets,
            num_residuals: acc,
        }
    }

    fn pose_block(&self, view: usize) -> std::ops::Range<usize> {
        let start = self.layout.len() + 6 * view;
        start..start + 6
    }

    fn view_rows(&self, view: usize) -> std::ops::Range<usize> {
        self.offsets[view]..self.offsets[view] + 2 * self.views[view].len()
    }
}

impl NllsProblem for CalibrationProblem<'_> {
    fn num_params(&self) -> usize {
        self.layout.len() + 6 * self.views.len()
    }

    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let xs = x.as_slice();
        let model = self.layout.unpack(&xs[..self.layout.len()]);
        let mut r = DVector::zeros(self.num_residuals);
        for (v, set) in self.views.iter().enumerate() {
            let pose = pose_from_params(&xs[self.pose_block(v)]);
            write_residuals(&model, &pose, set, &mut r.as_mut_slice()[self.view_rows(v)]);
        }
        r
    }

    /// Central differences that only re-evaluate the affected view for pose
    /// parameters.
    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let n_int = self.layout.len();
        let mut jac = DMatrix::zeros(self.num_residuals, self.num_params());
        let mut xp = x.clone();

        for j in 0..n_int {
            let h = 1e-6 * x[j].abs().max(1.0);
            xp[j] = x[j] + h;
            let rp = self.residuals(&xp);
            xp[j] = x[j] - h;
            let rm = self.residuals(&xp);
            xp[j] = x[j];
            jac.set_column(j, &((rp - rm) / (2.0 * h)));
        }

        let model = self.layout.unpack(&x.as_slice()[..n_int]);
        for (v, set) in self.views.iter().enumerate() {
            let rows = self.view_rows(v);
            let mut rp = vec![0.0; rows.len()];
            let mut rm = vec![0.0; rows.len()];
            let mut block = [0.0; 6];
            block.copy_from_slice(&x.as_slice()[self.pose_block(v)]);
            for k in 0..6 {
                let orig = block[k];
                let h = 1e-6 * orig.abs().max(1.0);
                block[k] = orig + h;
                write_residuals(&model, &pose_from_params(&block), set, &mut rp);
                block[k] = orig - h;
                write_residuals(&model, &pose_from_params(&block), set, &mut rm);
                block[k] = orig;
                let col = self.pose_block(v).start + k;
                for (i, row) in rows.clone().enumerate() {
                    jac[(row, col)] = (rp[i] - rm[i]) / (2.0 * h);
                }
            }
        }
        jac
    }
}

/// Joint refinement of intrinsics, distortion and per-view poses.
#[derive(Clone, Debug, Default)]
pub struct IntrinsicCalibrator {
    pub flags: CalibrationFlags,
    pub lm: LmOptions,
}

impl IntrinsicCalibrator {
    pub fn new(flags: CalibrationFlags) -> Self {
        Self {
            flags,
            lm: LmOptions::default(),
        }
    }

    /// Calibrate from views of a planar board (`z = 0` in board
    /// coordinates). `image_size` is `(width, height)` in pixels.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, sets), fields(views = sets.len()))
    )]
    pub fn calibrate(
        &self,
        sets: &[CorrespondenceSet],
        image_size: (usize, usize),
    ) -> Result<CalibrationResult, CalibrationError> {
        if sets.is_empty() {
            return Err(CalibrationError::InsufficientData);
        }
        for (view, set) in sets.iter().enumerate() {
            if set.len() < 4 {
                return Err(CalibrationError::DegenerateView {
                    view,
                    reason: "fewer than 4 correspondences",
                });
            }
        }

        let flags = &self.flags;
        let base = match &flags.intrinsic_guess {
            Some(guess) => {
                guess.intrinsics.validate()?;
                *guess
            }
            None => CameraModel {
                intrinsics: initial_intrinsics(
                    sets,
                    image_size,
                    flags.fix_aspect_ratio.then_some(flags.aspect_ratio),
                ),
                distortion: DistortionCoeffs::ZERO,
            },
        };
        let layout = IntrinsicLayout::new(flags, base);
        let start = layout.base;

        let mut x0 = layout.pack();
        for (view, set) in sets.iter().enumerate() {
            let pose = initial_view_pose(&start, set).ok_or(CalibrationError::DegenerateView {
                view,
                reason: "homography decomposition failed",
            })?;
            x0.extend_from_slice(&pose_params(&pose));
        }

        let n_int = layout.len();
        let problem = CalibrationProblem::new(layout, sets);
        debug!(
            "calibrating {} views: {} intrinsic + {} pose parameters, {} residuals",
            sets.len(),
            n_int,
            6 * sets.len(),
            problem.num_residuals
        );
        let (x, report) = solve(&problem, DVector::from_vec(x0), &self.lm);
        if !report.converged {
            warn!(
                "calibration stopped without converging ({:?} after {} iterations)",
                report.termination, report.iterations
            );
        }

        let xs = x.as_slice();
        let raw = problem.layout.unpack(&xs[..n_int]);
        let model = CameraModel::new(raw.intrinsics, raw.distortion)?;
        let poses: Vec<Pose> = (0..sets.len())
            .map(|v| pose_from_params(&xs[problem.pose_block(v)]))
            .collect();

        let mut total_sq = 0.0;
        let mut total_points = 0;
        let per_view_rms: Vec<f64> = sets
            .iter()
            .zip(&poses)
            .map(|(set, pose)| {
                let sq = reprojection_sq_sum(&model, pose, set);
                total_sq += sq;
                total_points += set.len();
                (sq / set.len() as f64).sqrt()
            })
            .collect();
        let rms = (total_sq / total_points as f64).sqrt();

        info!(
            "calibration rms {:.4}px over {} views (fx={:.2} fy={:.2} cx={:.2} cy={:.2}, {} iterations)",
            rms,
            sets.len(),
            model.intrinsics.fx,
            model.intrinsics.fy,
            model.intrinsics.cx,
            model.intrinsics.cy,
            report.iterations
        );

        Ok(CalibrationResult {
            rms,
            model,
            poses,
            per_view_rms,
            iterations: report.iterations,
            converged: report.converged,
        })
    }
}

/// Calibrate with default solver settings.
pub fn calibrate(
    sets: &[CorrespondenceSet],
    image_size: (usize, usize),
    flags: &CalibrationFlags,
) -> Result<CalibrationResult, CalibrationError> {
    IntrinsicCalibrator::new(flags.clone()).calibrate(sets, image_size)
}

/// Homography pose of one view under `model`, after removing its
/// distortion from the observations.
fn initial_view_pose(model: &CameraModel, set: &CorrespondenceSet) -> Option<Pose> {
    let board: Vec<Point2<f64>> = set
        .board_points()
        .iter()
        .map(|p| Point2::new(p.x, p.y))
        .collect();
    let image: Vec<Point2<f64>> = set
        .image_points()
        .iter()
        .map(|p| model.undistort_pixel(p).unwrap_or(*p))
        .collect();
    let h = estimate_homography(&board, &image)?;
    pose_from_homography(&model.intrinsics.matrix(), &h.h)
}
