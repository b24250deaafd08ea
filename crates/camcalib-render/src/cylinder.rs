//! A cylinder standing on the board, drawn with a fixed painter's order.
//!
//! The cylinder is built in board coordinates, where `-z` points up out of
//! the board towards the camera. Faces are filled bottom disk first, then
//! the side quads, then the top disk. That order hides the correct faces
//! only while the camera looks down on the top disk, which is reported in
//! [`ArGeometry::viewpoint_above_top`] rather than enforced.

use crate::fill::fill_polygon;
use camcalib_core::{CameraModel, Pose, RgbImage};
use log::debug;
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

#[cfg(feature = "tracing")]
use tracing::instrument;

pub const DISK_COLOR: [u8; 3] = [200, 200, 200];
pub const SIDE_COLOR: [u8; 3] = [255, 0, 0];

/// Projected vertices further than this many pixels from the origin are
/// dropped along with those behind the camera.
pub const MAX_PROJECTED_COORD: f64 = 1e6;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CylinderError {
    #[error("a cylinder needs at least 3 segments, got {0}")]
    TooFewSegments(usize),
    #[error("radius must be positive, got {0}")]
    NonPositiveRadius(f64),
    #[error("height must be positive, got {0}")]
    NonPositiveHeight(f64),
    #[error("cell size must be positive, got {0}")]
    NonPositiveCellSize(f64),
}

/// Cylinder placement in board-cell units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CylinderSpec {
    /// Centre of the base on the board, in cells.
    pub center: [f64; 2],
    pub radius: f64,
    pub height: f64,
    pub segments: usize,
}

impl Default for CylinderSpec {
    fn default() -> Self {
        Self {
            center: [3.0, 3.0],
            radius: 0.5,
            height: 1.0,
            segments: 36,
        }
    }
}

impl CylinderSpec {
    pub fn validate(&self) -> Result<(), CylinderError> {
        if self.segments < 3 {
            return Err(CylinderError::TooFewSegments(self.segments));
        }
        if !(self.radius > 0.0) {
            return Err(CylinderError::NonPositiveRadius(self.radius));
        }
        if !(self.height > 0.0) {
            return Err(CylinderError::NonPositiveHeight(self.height));
        }
        Ok(())
    }

    /// Bottom ring (on the board) and top ring (`height` above it), in
    /// board coordinates scaled by `cell_size`.
    pub fn rings(&self, cell_size: f64) -> (Vec<Point3<f64>>, Vec<Point3<f64>>) {
        let n = self.segments;
        let ring = |z: f64| {
            (0..n)
                .map(|i| {
                    let theta = TAU * i as f64 / n as f64;
                    Point3::new(
                        (self.center[0] + self.radius * theta.cos()) * cell_size,
                        (self.center[1] + self.radius * theta.sin()) * cell_size,
                        z,
                    )
                })
                .collect::<Vec<_>>()
        };
        (ring(0.0), ring(-self.height * cell_size))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Face {
    BottomDisk,
    /// Quad between ring vertices `i` and `i + 1`.
    Side(usize),
    TopDisk,
}

/// One polygon to fill, in paint order.
#[derive(Clone, Debug, PartialEq)]
pub struct FillOp {
    pub face: Face,
    pub polygon: Vec<Point2<f64>>,
    pub color: [u8; 3],
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArGeometry {
    pub ops: Vec<FillOp>,
    /// The camera centre lies above the top disk, the condition under which
    /// the fixed paint order gives correct occlusion.
    pub viewpoint_above_top: bool,
    /// Ring vertices that projected behind the camera, to a non-finite
    /// pixel, or beyond [`MAX_PROJECTED_COORD`].
    pub dropped_vertices: usize,
}

impl ArGeometry {
    /// Paint every face in order.
    pub fn draw(&self, frame: &mut RgbImage) {
        for op in &self.ops {
            fill_polygon(frame, &op.polygon, op.color);
        }
    }
}

/// Build the cylinder for one frame and project it.
///
/// Vertices behind the camera or projecting absurdly far out are dropped
/// from the disks; a side quad with
/// a dropped vertex is skipped, as is a disk left with fewer than 3
/// vertices.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(pose, model), fields(segments = spec.segments))
)]
pub fn build_and_project(
    pose: &Pose,
    model: &CameraModel,
    spec: &CylinderSpec,
    cell_size: f64,
) -> Result<ArGeometry, CylinderError> {
    spec.validate()?;
    if !(cell_size > 0.0) {
        return Err(CylinderError::NonPositiveCellSize(cell_size));
    }
    let n = spec.segments;
    let (bottom, top) = spec.rings(cell_size);
    let project = |ring: &[Point3<f64>]| -> Vec<Option<Point2<f64>>> {
        model
            .project_points_visible(pose, ring)
            .into_iter()
            .map(|p| p.filter(within_frame_reach))
            .collect()
    };
    let bottom = project(&bottom);
    let top = project(&top);
    let dropped_vertices = bottom.iter().chain(&top).filter(|p| p.is_none()).count();
    if dropped_vertices > 0 {
        debug!("{dropped_vertices} cylinder vertices are behind the camera or out of reach");
    }

    let mut ops = Vec::with_capacity(n + 2);
    let disk = |ring: &[Option<Point2<f64>>], face: Face| {
        let polygon: Vec<Point2<f64>> = ring.iter().flatten().copied().collect();
        if polygon.len() < 3 {
            debug!("skipping {face:?}: {} visible vertices", polygon.len());
            return None;
        }
        Some(FillOp {
            face,
            polygon,
            color: DISK_COLOR,
        })
    };

    ops.extend(disk(&bottom, Face::BottomDisk));
    for i in 0..n {
        let j = (i + 1) % n;
        match (bottom[i], bottom[j], top[j], top[i]) {
            (Some(a), Some(b), Some(c), Some(d)) => ops.push(FillOp {
                face: Face::Side(i),
                polygon: vec![a, b, c, d],
                color: SIDE_COLOR,
            }),
            _ => debug!("skipping side {i}: dropped vertex"),
        }
    }
    ops.extend(disk(&top, Face::TopDisk));

    let camera = pose.camera_center();
    let viewpoint_above_top = camera.z < -spec.height * cell_size;
    if !viewpoint_above_top {
        debug!(
            "camera at z={:.3} is not above the cylinder top; paint order may be wrong",
            camera.z
        );
    }

    Ok(ArGeometry {
        ops,
        viewpoint_above_top,
        dropped_vertices,
    })
}

fn within_frame_reach(p: &Point2<f64>) -> bool {
    p.x.abs() <= MAX_PROJECTED_COORD && p.y.abs() <= MAX_PROJECTED_COORD
}

#[cfg(test)]
mod tests {
    use super::*;
    use camcalib_core::{DistortionCoeffs, IntrinsicMatrix};
    use nalgebra::Vector3;

    fn model() -> CameraModel {
        CameraModel::new(
            IntrinsicMatrix::new(500.0, 500.0, 320.0, 240.0),
            DistortionCoeffs::ZERO,
        )
        .unwrap()
    }

    /// Camera 0.5 above the board centre at (3, 3) cells, looking down
    /// with a slight tilt.
    fn pose_above() -> Pose {
        let cell = 0.025;
        let rot = Pose::from_rvec_tvec(&Vector3::new(0.2, -0.1, 0.0), &Vector3::zeros()).rotation;
        let target = Point3::new(3.0 * cell, 3.0 * cell, 0.0);
        let t = Vector3::new(0.0, 0.0, 0.5) - rot * target.coords;
        Pose::new(rot, t)
    }

    #[test]
    fn rings_are_scaled_and_stacked() {
        let spec = CylinderSpec::default();
        let (bottom, top) = spec.rings(0.025);
        assert_eq!(bottom.len(), 36);
        assert!((bottom[0].x - 3.5 * 0.025).abs() < 1e-12);
        assert!((bottom[0].y - 3.0 * 0.025).abs() < 1e-12);
        assert_eq!(bottom[0].z, 0.0);
        assert!((top[9].z + 0.025).abs() < 1e-12);
        assert!((top[9].y - 3.5 * 0.025).abs() < 1e-12);
    }

    #[test]
    fn emits_sides_between_the_disks() {
        let spec = CylinderSpec {
            segments: 12,
            ..CylinderSpec::default()
        };
        let geo = build_and_project(&pose_above(), &model(), &spec, 0.025).unwrap();
        assert_eq!(geo.ops.len(), 12 + 2);
        assert_eq!(geo.ops[0].face, Face::BottomDisk);
        assert_eq!(geo.ops[13].face, Face::TopDisk);
        for (k, op) in geo.ops[1..13].iter().enumerate() {
            assert_eq!(op.face, Face::Side(k));
            assert_eq!(op.polygon.len(), 4);
            assert_eq!(op.color, SIDE_COLOR);
        }
        assert_eq!(geo.ops[0].color, DISK_COLOR);
        assert!(geo.viewpoint_above_top);
        assert_eq!(geo.dropped_vertices, 0);
    }

    #[test]
    fn top_disk_is_drawn_last() {
        let geo =
            build_and_project(&pose_above(), &model(), &CylinderSpec::default(), 0.025).unwrap();
        let mut frame = RgbImage::new(640, 480);
        geo.draw(&mut frame);
        let top = &geo.ops.last().unwrap().polygon;
        let n = top.len() as f64;
        let c = top.iter().fold(Point2::origin(), |acc: Point2<f64>, p| acc + p.coords / n);
        assert_eq!(
            frame.get(c.x.round() as usize, c.y.round() as usize),
            DISK_COLOR
        );
    }

    #[test]
    fn vertices_behind_the_camera_are_dropped() {
        // camera sits inside the cylinder volume, below its top
        let pose = Pose::from_rvec_tvec(&Vector3::zeros(), &Vector3::new(-0.075, -0.075, 0.01));
        let geo = build_and_project(&pose, &model(), &CylinderSpec::default(), 0.025).unwrap();
        assert!(geo.dropped_vertices > 0);
        assert!(!geo.viewpoint_above_top);
        assert!(geo.ops.iter().all(|op| op.face != Face::TopDisk));
    }

    #[test]
    fn camera_grazing_the_top_rim_draws_without_panicking() {
        let model = CameraModel::new(
            IntrinsicMatrix::new(631.12372751, 626.76168609, 204.13870644, 363.15842532),
            DistortionCoeffs::from_array([0.03184266, -0.26914475, -0.00107398, 0.00244667, 0.73158658]),
        )
        .unwrap();
        let spec = CylinderSpec::default();
        let cell = 0.025;
        let top_z = -spec.height * cell;
        let rim = Point3::new(3.5 * cell, 3.0 * cell, top_z);
        let mut frame = RgbImage::new(480, 720);
        let mut dropped_any = false;
        for i in 0..20 {
            for j in 0..10 {
                // camera centre a hair above and beside the rim vertex
                let eps = 1e-3 * 0.5f64.powi(i);
                let offset = (j as f64 - 4.5) * 1e-3;
                let rvec = Vector3::new(0.02 * (j % 3) as f64, -0.01 * (i % 4) as f64, 0.0);
                let rot = Pose::from_rvec_tvec(&rvec, &Vector3::zeros()).rotation;
                let centre = Point3::new(rim.x + offset, rim.y, top_z - eps);
                let pose = Pose::new(rot, -(rot * centre.coords));
                let geo = build_and_project(&pose, &model, &spec, cell).unwrap();
                dropped_any |= geo.dropped_vertices > 0;
                for op in &geo.ops {
                    assert!(op.polygon.iter().all(within_frame_reach), "{:?}", op.face);
                }
                geo.draw(&mut frame);
            }
        }
        assert!(dropped_any);
    }

    #[test]
    fn invalid_specs_are_rejected() {
        let bad = CylinderSpec {
            segments: 2,
            ..CylinderSpec::default()
        };
        assert_eq!(
            build_and_project(&pose_above(), &model(), &bad, 0.025).unwrap_err(),
            CylinderError::TooFewSegments(2)
        );
        let flat = CylinderSpec {
            radius: 0.0,
            ..CylinderSpec::default()
        };
        assert!(matches!(flat.validate(), Err(CylinderError::NonPositiveRadius(_))));
    }
}
