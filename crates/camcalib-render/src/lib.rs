//! Per-frame rendering for a calibrated camera.
//!
//! - [`undistort`]: optimal new intrinsics, undistortion maps, bilinear
//!   remapping and a memoising [`UndistortionCache`].
//! - [`cylinder`]: an AR cylinder projected through the camera model and
//!   filled in a fixed painter's order.
//! - [`fill`]: polygon fill and corner overlays on RGB frames.

pub mod cylinder;
pub mod fill;
pub mod undistort;

pub use cylinder::{
    build_and_project, ArGeometry, CylinderError, CylinderSpec, Face, FillOp, DISK_COLOR,
    SIDE_COLOR,
};
pub use fill::{draw_circle, draw_corners, draw_line, fill_polygon};
pub use undistort::{
    build_map, optimal_new_camera_matrix, undistort_points, UndistortError, UndistortParams,
    UndistortionCache, UndistortionMap,
};
