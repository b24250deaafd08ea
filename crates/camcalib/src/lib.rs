//! Chessboard camera calibration, undistortion and AR rendering.
//!
//! This crate ties the `camcalib-*` workspace together:
//! - stable re-exports of the underlying crates
//! - JSON configuration and the calibration record ([`io`])
//! - frame source, display sink and command source seams ([`frames`])
//! - the calibrate / rectify / AR frame loops ([`session`])
//! - (feature `image`) adapters between `image` buffers and the core
//!   image types ([`image_io`])
//!
//! ## Quickstart
//!
//! ```no_run
//! use camcalib::frames::{ImageSequence, MemoryFrames, SelectAll, NullSink};
//! use camcalib::io::PipelineConfig;
//! use camcalib::session::{calibrate_frames, select_frames};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::load_json("pipeline.json")?;
//! let mut source = ImageSequence::open("frames/")?;
//! let frames = select_frames(&mut source, &mut SelectAll, &mut NullSink)?;
//! let outcome = calibrate_frames(&frames, &config)?;
//! outcome.record().save_json("calibration.json")?;
//! # let _ = MemoryFrames::default();
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `camcalib::core`: board model, camera model, poses, homographies, images.
//! - `camcalib::chessboard`: ordered inner-corner extraction.
//! - `camcalib::optim`: intrinsic calibration and per-frame pose.
//! - `camcalib::render`: undistortion maps, the AR cylinder, overlays.

pub use camcalib_chessboard as chessboard;
pub use camcalib_core as core;
pub use camcalib_optim as optim;
pub use camcalib_render as render;

pub use camcalib_chessboard::{ChessboardParams, DetectError};
pub use camcalib_core::{
    CameraModel, CorrespondenceSet, DistortionCoeffs, IntrinsicMatrix, PatternSpec, Pose, RgbImage,
};
pub use camcalib_optim::{CalibrationError, CalibrationFlags, CalibrationResult, PoseError};
pub use camcalib_render::{CylinderSpec, UndistortParams};

pub mod frames;
pub mod io;
pub mod session;

#[cfg(feature = "image")]
pub mod image_io;
