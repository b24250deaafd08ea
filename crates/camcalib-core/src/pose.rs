use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Rigid transform from the board frame into the camera frame:
/// `p_cam = R * p_board + t`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "PoseRecord", into = "PoseRecord")]
pub struct Pose {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

/// Serialized form: Rodrigues rotation vector plus translation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct PoseRecord {
    rvec: [f64; 3],
    tvec: [f64; 3],
}

impl From<PoseRecord> for Pose {
    fn from(r: PoseRecord) -> Self {
        Pose::from_rvec_tvec(&Vector3::from(r.rvec), &Vector3::from(r.tvec))
    }
}

impl From<Pose> for PoseRecord {
    fn from(p: Pose) -> Self {
        let r = p.rvec();
        PoseRecord {
            rvec: [r.x, r.y, r.z],
            tvec: [p.translation.x, p.translation.y, p.translation.z],
        }
    }
}

impl Pose {
    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Rotation3::identity(), Vector3::zeros())
    }

    /// Build from an axis-angle (Rodrigues) vector and a translation.
    pub fn from_rvec_tvec(rvec: &Vector3<f64>, tvec: &Vector3<f64>) -> Self {
        Self::new(Rotation3::new(*rvec), *tvec)
    }

    /// Accept a raw 3x3 matrix only if it is a proper rotation.
    pub fn from_matrix(r: &Matrix3<f64>, t: Vector3<f64>, tol: f64) -> Option<Self> {
        let orth = (r.transpose() * r - Matrix3::identity()).abs().max();
        if orth > tol || (r.determinant() - 1.0).abs() > tol {
            return None;
        }
        Some(Self::new(Rotation3::from_matrix_unchecked(*r), t))
    }

    pub fn rvec(&self) -> Vector3<f64> {
        self.rotation.scaled_axis()
    }

    #[inline]
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        self.rotation.transform_point(p) + self.translation
    }

    /// Camera centre expressed in board coordinates (`-R^T t`).
    pub fn camera_center(&self) -> Point3<f64> {
        Point3::from(-(self.rotation.inverse() * self.translation))
    }

    /// Angle between the two rotations and distance between translations.
    pub fn distance_to(&self, other: &Pose) -> (f64, f64) {
        let dr = self.rotation.angle_to(&other.rotation);
        let dt = (self.translation - other.translation).norm();
        (dr, dt)
    }
}
