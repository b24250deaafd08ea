use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// X-junction candidate produced by the saddle detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Corner {
    /// Corner position in pixel coordinates.
    pub position: Point2<f32>,

    /// Direction of the square diagonal through the corner, in radians.
    ///
    /// Defined modulo π because the diagonal is undirected. The diagonal
    /// bisects same-coloured squares, so neighbouring corners carry
    /// orthogonal diagonals; the grid edges leaving the corner lie at ±45°
    /// to it.
    pub orientation: f32,

    /// Detector response at the corner.
    pub strength: f32,
}

impl Corner {
    pub fn as_vec2(&self) -> Vector2<f32> {
        Vector2::new(self.position.x, self.position.y)
    }

    pub fn position_f64(&self) -> Point2<f64> {
        Point2::new(self.position.x as f64, self.position.y as f64)
    }
}

/// Integer grid coordinates: `i` along the board columns, `j` along the rows.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct GridCoords {
    pub i: i32,
    pub j: i32,
}

/// A corner that was placed on the board grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabeledCorner {
    pub position: Point2<f32>,
    pub grid: GridCoords,
    pub strength: f32,
}
