//! Calibration board description and board/image correspondences.

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PatternError {
    #[error("pattern needs at least 2x2 inner corners, got {cols}x{rows}")]
    TooSmall { cols: u32, rows: u32 },
    #[error("cell size must be positive and finite, got {0}")]
    InvalidCellSize(f64),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CorrespondenceError {
    #[error("board/image point count mismatch ({board} vs {image})")]
    LengthMismatch { board: usize, image: usize },
}

/// Chessboard geometry: inner-corner counts along x (`cols`) and y (`rows`)
/// and the physical square size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub cols: u32,
    pub rows: u32,
    pub cell_size: f64,
}

impl PatternSpec {
    pub fn new(cols: u32, rows: u32, cell_size: f64) -> Result<Self, PatternError> {
        let spec = Self {
            cols,
            rows,
            cell_size,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Re-check the invariants, e.g. after deserialization.
    pub fn validate(&self) -> Result<(), PatternError> {
        if self.cols < 2 || self.rows < 2 {
            return Err(PatternError::TooSmall {
                cols: self.cols,
                rows: self.rows,
            });
        }
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(PatternError::InvalidCellSize(self.cell_size));
        }
        Ok(())
    }

    #[inline]
    pub fn corner_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    #[inline]
    pub fn board_point(&self, c: u32, r: u32) -> Point3<f64> {
        Point3::new(
            c as f64 * self.cell_size,
            r as f64 * self.cell_size,
            0.0,
        )
    }

    /// Inner corners on the `z = 0` board plane, row-major (`c` fastest).
    pub fn canonical_corners(&self) -> Vec<Point3<f64>> {
        (0..self.rows)
            .flat_map(|r| (0..self.cols).map(move |c| (c, r)))
            .map(|(c, r)| self.board_point(c, r))
            .collect()
    }

    /// Same ordering as [`Self::canonical_corners`], dropping `z`.
    pub fn canonical_corners_2d(&self) -> Vec<Point2<f64>> {
        self.canonical_corners()
            .into_iter()
            .map(|p| Point2::new(p.x, p.y))
            .collect()
    }
}

/// Ordered board/image point pairs from one view.
#[derive(Clone, Debug, PartialEq)]
pub struct CorrespondenceSet {
    board: Vec<Point3<f64>>,
    image: Vec<Point2<f64>>,
}

impl CorrespondenceSet {
    pub fn new(
        board: Vec<Point3<f64>>,
        image: Vec<Point2<f64>>,
    ) -> Result<Self, CorrespondenceError> {
        if board.len() != image.len() {
            return Err(CorrespondenceError::LengthMismatch {
                board: board.len(),
                image: image.len(),
            });
        }
        Ok(Self { board, image })
    }

    /// Pair a full detection with the pattern's canonical corners.
    pub fn from_pattern(
        pattern: &PatternSpec,
        image: Vec<Point2<f64>>,
    ) -> Result<Self, CorrespondenceError> {
        Self::new(pattern.canonical_corners(), image)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.board.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.board.is_empty()
    }

    pub fn board_points(&self) -> &[Point3<f64>] {
        &self.board
    }

    pub fn image_points(&self) -> &[Point2<f64>] {
        &self.image
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Point3<f64>, &Point2<f64>)> {
        self.board.iter().zip(self.image.iter())
    }
}
