//! Nonlinear refinement for chessboard camera calibration.
//!
//! - [`lm`]: Levenberg–Marquardt from the `levenberg-marquardt` crate over
//!   [`NllsProblem`].
//! - [`init`]: closed-form starting points (focal lengths from homographies,
//!   planar pose from a homography).
//! - [`IntrinsicCalibrator`]: joint intrinsics + distortion + per-view pose
//!   refinement, honouring [`CalibrationFlags`].
//! - [`PoseEstimator`]: pose-only refinement for a known camera.
//!
//! All residuals are pixel reprojection errors.

mod calibrate;
pub mod init;
pub mod lm;
mod pose;
mod reprojection;

pub use calibrate::{
    calibrate, CalibrationError, CalibrationFlags, CalibrationResult, IntrinsicCalibrator,
};
pub use lm::{LmOptions, NllsProblem, SolveReport, Termination};
pub use pose::{
    estimate_pose, PoseError, PoseEstimate, PoseEstimator, PoseOptions, MIN_POSE_POINTS,
};
pub use reprojection::{reprojection_rms, reprojection_sq_sum};
