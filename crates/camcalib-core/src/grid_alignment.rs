use serde::{Deserialize, Serialize};

/// Integer 2D grid transform (a 2×2 matrix) used to re-orient a labelled grid.
///
/// `(i', j') = (a*i + b*j, c*i + d*j)`. The 8 members of the dihedral group
/// `D4` are listed in [`GRID_TRANSFORMS_D4`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridTransform {
    pub a: i32,
    pub b: i32,
    pub c: i32,
    pub d: i32,
}

impl GridTransform {
    pub const IDENTITY: GridTransform = GridTransform::new(1, 0, 0, 1);

    pub const fn new(a: i32, b: i32, c: i32, d: i32) -> Self {
        Self { a, b, c, d }
    }

    #[inline]
    pub fn apply(&self, i: i32, j: i32) -> [i32; 2] {
        [self.a * i + self.b * j, self.c * i + self.d * j]
    }

    #[inline]
    pub fn det(&self) -> i32 {
        self.a * self.d - self.b * self.c
    }

    /// True for the two-axis swapping members (the grid appears transposed).
    #[inline]
    pub fn swaps_axes(&self) -> bool {
        self.a == 0
    }
}

/// A transform plus translation mapping labelled coordinates onto
/// `[0, cols) x [0, rows)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridAlignment {
    pub transform: GridTransform,
    pub translation: [i32; 2],
}

impl GridAlignment {
    /// Map grid coordinates `(i, j)` using this alignment.
    #[inline]
    pub fn map(&self, i: i32, j: i32) -> [i32; 2] {
        let [x, y] = self.transform.apply(i, j);
        [x + self.translation[0], y + self.translation[1]]
    }

    /// Alignment that moves the bounding box of `transform(coords)` to the origin.
    pub fn normalizing<I>(transform: GridTransform, coords: I) -> Option<(Self, [i32; 2])>
    where
        I: IntoIterator<Item = (i32, i32)>,
    {
        let mut min = [i32::MAX; 2];
        let mut max = [i32::MIN; 2];
        for (i, j) in coords {
            let p = transform.apply(i, j);
            for k in 0..2 {
                min[k] = min[k].min(p[k]);
                max[k] = max[k].max(p[k]);
            }
        }
        if min[0] > max[0] {
            return None;
        }
        let extent = [max[0] - min[0] + 1, max[1] - min[1] + 1];
        Some((
            Self {
                transform,
                translation: [-min[0], -min[1]],
            },
            extent,
        ))
    }
}

/// The 8 dihedral transforms `D4` on the integer grid.
pub const GRID_TRANSFORMS_D4: [GridTransform; 8] = [
    // rotations: 0°, 90°, 180°, 270°
    GridTransform::new(1, 0, 0, 1),
    GridTransform::new(0, 1, -1, 0),
    GridTransform::new(-1, 0, 0, -1),
    GridTransform::new(0, -1, 1, 0),
    // reflections
    GridTransform::new(-1, 0, 0, 1),
    GridTransform::new(1, 0, 0, -1),
    GridTransform::new(0, 1, 1, 0),
    GridTransform::new(0, -1, -1, 0),
];
