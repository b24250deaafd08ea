use camcalib_core::{CameraModel, CorrespondenceSet, Pose};
use nalgebra::Vector3;

/// Residual assigned to both coordinates of a point behind the camera.
const BEHIND_PENALTY: f64 = 1e4;

/// Pose as `[rx, ry, rz, tx, ty, tz]`.
pub(crate) fn pose_params(pose: &Pose) -> [f64; 6] {
    let r = pose.rvec();
    let t = pose.translation;
    [r.x, r.y, r.z, t.x, t.y, t.z]
}

pub(crate) fn pose_from_params(x: &[f64]) -> Pose {
    Pose::from_rvec_tvec(
        &Vector3::new(x[0], x[1], x[2]),
        &Vector3::new(x[3], x[4], x[5]),
    )
}

/// Write `projected - observed` for every correspondence into `out`
/// (`2 * set.len()` entries, x then y).
pub(crate) fn write_residuals(
    model: &CameraModel,
    pose: &Pose,
    set: &CorrespondenceSet,
    out: &mut [f64],
) {
    for (k, (board, observed)) in set.iter().enumerate() {
        let (ex, ey) = match model.project_point(pose, board) {
            Some(p) => (p.x - observed.x, p.y - observed.y),
            None => (BEHIND_PENALTY, BEHIND_PENALTY),
        };
        out[2 * k] = ex;
        out[2 * k + 1] = ey;
    }
}

/// Sum of squared reprojection distances of one view.
pub fn reprojection_sq_sum(model: &CameraModel, pose: &Pose, set: &CorrespondenceSet) -> f64 {
    let mut buf = vec![0.0; 2 * set.len()];
    write_residuals(model, pose, set, &mut buf);
    buf.iter().map(|r| r * r).sum()
}

/// Root-mean-square reprojection distance of one view, in pixels.
pub fn reprojection_rms(model: &CameraModel, pose: &Pose, set: &CorrespondenceSet) -> f64 {
    if set.is_empty() {
        return 0.0;
    }
    (reprojection_sq_sum(model, pose, set) / set.len() as f64).sqrt()
}
