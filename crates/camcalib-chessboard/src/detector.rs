use crate::corners::detect_chess_corners;
use crate::geom::grid_axes_from_orientations;
use crate::gridgraph::{
    assign_grid_coordinates, connected_components, median_nearest_distance, GridAxes, GridGraph,
};
use crate::params::ChessboardParams;
use camcalib_core::{
    sample_bilinear, Corner, CorrespondenceError, GrayImageView, GridAlignment, GridCoords,
    GridTransform, LabeledCorner, PatternError, PatternSpec, GRID_TRANSFORMS_D4,
};
use log::debug;
use nalgebra::{Point2, Vector2};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DetectError {
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error(transparent)]
    Correspondence(#[from] CorrespondenceError),
    #[error("found {found} saddle corners, need {expected}")]
    NotEnoughCorners { found: usize, expected: usize },
    #[error("corner orientations do not define grid axes")]
    NoGridAxes,
    #[error("largest connected grid has {found} corners, need {expected}")]
    IncompleteGrid { found: usize, expected: usize },
    #[error("grid connectivity is inconsistent")]
    InconsistentGrid,
    #[error("grid extent {found:?} does not match {cols}x{rows}")]
    SizeMismatch {
        found: [i32; 2],
        cols: u32,
        rows: u32,
    },
    #[error("no grid orientation is consistent with an unmirrored board")]
    NoValidOrientation,
}

/// A complete, ordered board detection.
#[derive(Clone, Debug)]
pub struct ChessboardDetection {
    pub cols: u32,
    pub rows: u32,
    /// Row-major, `corners[r * cols + c]` has grid coords `(c, r)`.
    pub corners: Vec<LabeledCorner>,
    /// Every saddle candidate found before grid fitting.
    pub raw_corners: Vec<Corner>,
    /// Transform that mapped the BFS labelling onto board coordinates.
    pub transform: GridTransform,
    /// The colouring could not separate two orientations; the geometric
    /// tie-break decided.
    pub symmetric: bool,
    /// Median spacing between neighbouring corners, in pixels.
    pub spacing: f32,
}

impl ChessboardDetection {
    pub fn image_points(&self) -> Vec<Point2<f64>> {
        self.corners
            .iter()
            .map(|c| Point2::new(c.position.x as f64, c.position.y as f64))
            .collect()
    }
}

struct OrientationCandidate {
    alignment: GridAlignment,
    ordered: Vec<usize>,
    dark_first: bool,
    axis_score: f32,
}

/// Chessboard detector: ChESS corners, grid graph, labelling and ordering.
pub struct ChessboardDetector {
    pub params: ChessboardParams,
}

impl ChessboardDetector {
    pub fn new(params: ChessboardParams) -> Self {
        Self { params }
    }

    /// Refined saddle corners, strongest first.
    pub fn detect_corners(&self, img: &GrayImageView<'_>) -> Vec<Corner> {
        detect_chess_corners(img, &self.params.corners)
    }

    /// Full pipeline on one frame.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, img, pattern), fields(width = img.width, height = img.height))
    )]
    pub fn detect(
        &self,
        img: &GrayImageView<'_>,
        pattern: &PatternSpec,
    ) -> Result<ChessboardDetection, DetectError> {
        pattern.validate()?;
        let corners = self.detect_corners(img);
        debug!("found {} raw saddle corners", corners.len());
        self.detect_from_corners(img, corners, pattern.cols, pattern.rows)
    }

    /// Fit a `cols x rows` grid to a corner cloud and order it.
    pub fn detect_from_corners(
        &self,
        img: &GrayImageView<'_>,
        corners: Vec<Corner>,
        cols: u32,
        rows: u32,
    ) -> Result<ChessboardDetection, DetectError> {
        if cols < 2 || rows < 2 {
            return Err(PatternError::TooSmall { cols, rows }.into());
        }
        let expected = cols as usize * rows as usize;
        if corners.len() < expected {
            return Err(DetectError::NotEnoughCorners {
                found: corners.len(),
                expected,
            });
        }

        let (u, v) = grid_axes_from_orientations(&corners).ok_or(DetectError::NoGridAxes)?;
        let spacing = median_nearest_distance(&corners).ok_or(DetectError::NotEnoughCorners {
            found: corners.len(),
            expected,
        })?;
        let window = self.params.grid.spacing_window;
        let graph = GridGraph::new(
            &corners,
            &self.params.grid,
            [window[0] * spacing, window[1] * spacing],
            &GridAxes { u, v },
        );

        let Some(component) = connected_components(&graph)
            .into_iter()
            .max_by_key(|c| c.len())
        else {
            return Err(DetectError::IncompleteGrid { found: 0, expected });
        };
        debug!(
            "largest grid component: {} corners (spacing {:.1}px)",
            component.len(),
            spacing
        );
        if component.len() < expected {
            return Err(DetectError::IncompleteGrid {
                found: component.len(),
                expected,
            });
        }

        let labels =
            assign_grid_coordinates(&graph, &component).ok_or(DetectError::InconsistentGrid)?;
        let (candidate, symmetric) = choose_orientation(img, &corners, &labels, cols, rows)?;

        let ordered = candidate
            .ordered
            .iter()
            .enumerate()
            .map(|(k, &idx)| {
                let c = &corners[idx];
                LabeledCorner {
                    position: c.position,
                    grid: GridCoords {
                        i: (k % cols as usize) as i32,
                        j: (k / cols as usize) as i32,
                    },
                    strength: c.strength,
                }
            })
            .collect();

        Ok(ChessboardDetection {
            cols,
            rows,
            corners: ordered,
            raw_corners: corners,
            transform: candidate.alignment.transform,
            symmetric,
            spacing,
        })
    }
}

/// Pick the dihedral transform that maps the BFS labels onto the board.
///
/// Filters, in order: extent equals `cols x rows`; the board is not seen
/// mirrored; the square between corners (0,0) and (1,1) is dark. Remaining
/// ties go to the transform whose column axis points most to the right and
/// row axis most downward.
fn choose_orientation(
    img: &GrayImageView<'_>,
    corners: &[Corner],
    labels: &[(usize, GridCoords)],
    cols: u32,
    rows: u32,
) -> Result<(OrientationCandidate, bool), DetectError> {
    let expected = cols as usize * rows as usize;
    let mut candidates = Vec::new();
    let mut identity_extent = [0, 0];
    let mut extent_matched = false;

    for transform in GRID_TRANSFORMS_D4 {
        let Some((alignment, extent)) =
            GridAlignment::normalizing(transform, labels.iter().map(|(_, g)| (g.i, g.j)))
        else {
            continue;
        };
        if transform == GridTransform::IDENTITY {
            identity_extent = extent;
        }
        if extent != [cols as i32, rows as i32] || labels.len() != expected {
            continue;
        }
        extent_matched = true;

        let mut ordered = vec![usize::MAX; expected];
        for &(idx, g) in labels {
            let [c, r] = alignment.map(g.i, g.j);
            ordered[r as usize * cols as usize + c as usize] = idx;
        }
        if ordered.contains(&usize::MAX) {
            continue;
        }

        let at = |c: u32, r: u32| corners[ordered[(r * cols + c) as usize]].as_vec2();
        let mut dir_c = Vector2::<f32>::zeros();
        let mut dir_r = Vector2::<f32>::zeros();
        for r in 0..rows {
            for c in 0..cols - 1 {
                dir_c += at(c + 1, r) - at(c, r);
            }
        }
        for r in 0..rows - 1 {
            for c in 0..cols {
                dir_r += at(c, r + 1) - at(c, r);
            }
        }
        let (dir_c, dir_r) = (dir_c.normalize(), dir_r.normalize());
        // board x→right, y→down in an unmirrored view
        if dir_c.x * dir_r.y - dir_c.y * dir_r.x <= 0.0 {
            continue;
        }

        let c2 = 2.min(cols - 1);
        let first = cell_intensity(img, at(0, 0), at(1, 0), at(0, 1), at(1, 1));
        let next = cell_intensity(img, at(1, 0), at(c2, 0), at(1, 1), at(c2, 1));
        candidates.push(OrientationCandidate {
            alignment,
            ordered,
            dark_first: cols < 3 || first < next,
            axis_score: dir_c.x + dir_r.y,
        });
    }

    if candidates.is_empty() {
        return Err(if extent_matched {
            DetectError::NoValidOrientation
        } else {
            DetectError::SizeMismatch {
                found: identity_extent,
                cols,
                rows,
            }
        });
    }

    let dark_count = candidates.iter().filter(|c| c.dark_first).count();
    let symmetric = dark_count != 1;
    let best = candidates
        .into_iter()
        .max_by(|a, b| {
            a.dark_first
                .cmp(&b.dark_first)
                .then(a.axis_score.total_cmp(&b.axis_score))
        })
        .ok_or(DetectError::NoValidOrientation)?;
    debug!(
        "grid orientation {:?} (dark-first={}, symmetric={})",
        best.alignment.transform, best.dark_first, symmetric
    );
    Ok((best, symmetric))
}

/// Mean intensity near the centre of the cell spanned by four corners.
fn cell_intensity(
    img: &GrayImageView<'_>,
    a: Vector2<f32>,
    b: Vector2<f32>,
    c: Vector2<f32>,
    d: Vector2<f32>,
) -> f32 {
    let center = (a + b + c + d) * 0.25;
    let mut acc = 0.0;
    for dy in -1..=1 {
        for dx in -1..=1 {
            acc += sample_bilinear(img, center.x + dx as f32, center.y + dy as f32);
        }
    }
    acc / 9.0
}
