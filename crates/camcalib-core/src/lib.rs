//! Core types for chessboard camera calibration.
//!
//! This crate is purely geometric: the board model, board/image
//! correspondences, the pinhole + Brown–Conrady camera model and its
//! projector, rigid poses, a normalised DLT homography and a small
//! grayscale image view. Detection, optimisation and rendering live in the
//! sibling crates.

mod camera;
mod corner;
mod grid_alignment;
mod homography;
mod image;
mod logger;
mod pattern;
mod pose;
pub mod synthetic;

pub use camera::{
    project, CameraModel, DistortionCoeffs, IntrinsicMatrix, ModelError, ProjectionError,
    MIN_DEPTH,
};
pub use corner::{Corner, GridCoords, LabeledCorner};
pub use grid_alignment::{GridAlignment, GridTransform, GRID_TRANSFORMS_D4};
pub use homography::{estimate_homography, Homography};
pub use image::{sample_bilinear, sample_bilinear_u8, GrayImage, GrayImageView, RgbImage};
pub use pattern::{CorrespondenceError, CorrespondenceSet, PatternError, PatternSpec};
pub use pose::Pose;

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, init_with_verbosity, level_from_verbosity};

/// Pixel coordinates.
pub type Point2D = nalgebra::Point2<f64>;
/// Board-frame or camera-frame coordinates.
pub type Point3D = nalgebra::Point3<f64>;
