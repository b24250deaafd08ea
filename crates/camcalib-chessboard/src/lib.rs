//! Chessboard inner-corner extraction.
//!
//! Pipeline:
//! 1. ChESS saddle candidates with sub-pixel refinement from `chess-corners`;
//!    near-duplicate candidates are merged and each keeps a square-diagonal
//!    orientation.
//! 2. Global grid axes from the orientations (quadruple-angle mean).
//! 3. Adaptive spacing window from the median nearest-neighbour distance.
//! 4. Up to 4 neighbours per corner (right/left/up/down), accepted when the
//!    diagonals are orthogonal and the edge runs at ~45° to both; only mutual
//!    edges survive.
//! 5. BFS labelling of the largest component, rejecting inconsistent paths.
//! 6. Orientation disambiguation over the 8 dihedral grid transforms.
//!
//! Detection is all-or-nothing: a frame yields `cols * rows` ordered
//! corners or a [`DetectError`].

mod corners;
mod detector;
mod geom;
mod gridgraph;
mod params;

pub use chess_corners::RefinementMethod;
pub use corners::{adapt_chess_corner, detect_chess_corners, merge_close_corners};
pub use detector::{ChessboardDetection, ChessboardDetector, DetectError};
pub use gridgraph::{
    assign_grid_coordinates, connected_components, GridAxes, GridGraph, NeighborDirection,
    NodeNeighbor,
};
pub use params::{ChessboardParams, CornerParams, GridGraphParams};

use camcalib_core::{CorrespondenceSet, GrayImageView, PatternSpec};
use nalgebra::Point2;

/// Ordered inner-corner pixels of `pattern`, row-major like
/// [`PatternSpec::canonical_corners`].
pub fn extract(
    img: &GrayImageView<'_>,
    pattern: &PatternSpec,
    params: &ChessboardParams,
) -> Result<Vec<Point2<f64>>, DetectError> {
    let detector = ChessboardDetector::new(params.clone());
    Ok(detector.detect(img, pattern)?.image_points())
}

/// [`extract`] paired with the board's canonical corners.
pub fn extract_correspondences(
    img: &GrayImageView<'_>,
    pattern: &PatternSpec,
    params: &ChessboardParams,
) -> Result<CorrespondenceSet, DetectError> {
    let points = extract(img, pattern, params)?;
    Ok(CorrespondenceSet::from_pattern(pattern, points)?)
}
