//! Closed-form starting points for the nonlinear refinement.
//!
//! Both helpers assume a planar board on `z = 0` and ignore distortion.

use camcalib_core::{estimate_homography, CorrespondenceSet, Homography, IntrinsicMatrix, Pose};
use log::debug;
use nalgebra::{Matrix2, Matrix3, Point2, Rotation3, Vector2, Vector3};

const MAX_FOCAL_RATIO: f64 = 1e3;

/// Board-plane to pixel homography of one view.
pub fn view_homography(set: &CorrespondenceSet) -> Option<Homography> {
    let board: Vec<Point2<f64>> = set
        .board_points()
        .iter()
        .map(|p| Point2::new(p.x, p.y))
        .collect();
    estimate_homography(&board, set.image_points())
}

/// Focal lengths from the homographies of every view, with the principal
/// point fixed at `(cx, cy)`.
///
/// With the principal point removed, `K = diag(fx, fy, 1)` and the image of
/// the absolute conic is `diag(a, b, 1)` where `a = 1/fx²`, `b = 1/fy²`.
/// Each view contributes the two orthonormality constraints on the first two
/// homography columns. When `aspect_ratio` is given, `fx = aspect_ratio * fy`
/// and a single unknown remains. Returns `None` when the views are fronto-
/// parallel or the solution is not positive.
pub fn focal_from_homographies(
    sets: &[CorrespondenceSet],
    cx: f64,
    cy: f64,
    scale: f64,
    aspect_ratio: Option<f64>,
) -> Option<(f64, f64)> {
    let mut ata = Matrix2::<f64>::zeros();
    let mut atb = Vector2::<f64>::zeros();

    for set in sets {
        let board: Vec<Point2<f64>> = set
            .board_points()
            .iter()
            .map(|p| Point2::new(p.x, p.y))
            .collect();
        let image: Vec<Point2<f64>> = set
            .image_points()
            .iter()
            .map(|p| Point2::new((p.x - cx) / scale, (p.y - cy) / scale))
            .collect();
        let Some(hom) = estimate_homography(&board, &image) else {
            continue;
        };
        let h = hom.h;
        let (h1, h2) = (h.column(0).into_owned(), h.column(1).into_owned());
        let norm = h1.norm().max(h2.norm());
        if norm < 1e-12 {
            continue;
        }
        let (h1, h2) = (h1 / norm, h2 / norm);

        let rows = [
            (
                Vector2::new(h1.x * h2.x, h1.y * h2.y),
                -h1.z * h2.z,
            ),
            (
                Vector2::new(h1.x * h1.x - h2.x * h2.x, h1.y * h1.y - h2.y * h2.y),
                -(h1.z * h1.z - h2.z * h2.z),
            ),
        ];
        for (coeffs, rhs) in rows {
            ata += coeffs * coeffs.transpose();
            atb += coeffs * rhs;
        }
    }

    let (a, b) = match aspect_ratio {
        Some(ar) => {
            // a = b / ar², so each row collapses to (ca / ar² + cb) b = rhs
            let w = Vector2::new(1.0 / (ar * ar), 1.0);
            let denom = w.dot(&(ata * w));
            if denom.abs() < 1e-18 {
                return None;
            }
            let b = w.dot(&atb) / denom;
            (b / (ar * ar), b)
        }
        None => {
            let (lo, hi) = symmetric_eigenvalues(&ata);
            if hi <= 0.0 || lo / hi < 1e-9 {
                return None;
            }
            let sol = ata.try_inverse()? * atb;
            (sol.x, sol.y)
        }
    };

    if !(a > 0.0 && b > 0.0 && a.is_finite() && b.is_finite()) {
        debug!("focal initialisation degenerate (a={a:.3e}, b={b:.3e})");
        return None;
    }
    let (fx, fy) = (scale / a.sqrt(), scale / b.sqrt());
    // near-zero conic entries mean no perspective information
    if fx.max(fy) > MAX_FOCAL_RATIO * scale {
        return None;
    }
    Some((fx, fy))
}

/// Eigenvalues `(min, max)` of a symmetric 2x2 matrix.
pub(crate) fn symmetric_eigenvalues(m: &Matrix2<f64>) -> (f64, f64) {
    let mean = 0.5 * (m[(0, 0)] + m[(1, 1)]);
    let half_diff = 0.5 * (m[(0, 0)] - m[(1, 1)]);
    let r = (half_diff * half_diff + m[(0, 1)] * m[(1, 0)]).max(0.0).sqrt();
    (mean - r, mean + r)
}

/// Initial intrinsics: principal point at the image centre, focal lengths
/// from [`focal_from_homographies`], falling back to `max(width, height)`.
pub fn initial_intrinsics(
    sets: &[CorrespondenceSet],
    image_size: (usize, usize),
    aspect_ratio: Option<f64>,
) -> IntrinsicMatrix {
    let (w, h) = (image_size.0 as f64, image_size.1 as f64);
    let (cx, cy) = ((w - 1.0) * 0.5, (h - 1.0) * 0.5);
    let scale = w.max(h).max(1.0);
    let (fx, fy) = focal_from_homographies(sets, cx, cy, scale, aspect_ratio).unwrap_or_else(|| {
        let f = scale;
        match aspect_ratio {
            Some(ar) => (ar * f, f),
            None => (f, f),
        }
    });
    debug!("initial intrinsics: fx={fx:.2} fy={fy:.2} cx={cx:.2} cy={cy:.2}");
    IntrinsicMatrix::new(fx, fy, cx, cy)
}

/// Decompose a board-to-image homography into the board pose, given `K`.
///
/// Columns of `K⁻¹H` are `λ [r1 r2 t]`. The scale is the mean of the first
/// two column norms, the sign is chosen so the board lies in front of the
/// camera, and `[r1 r2 r1×r2]` is projected onto SO(3).
pub fn pose_from_homography(k: &Matrix3<f64>, h: &Matrix3<f64>) -> Option<Pose> {
    let k_inv = k.try_inverse()?;
    let a1: Vector3<f64> = k_inv * h.column(0);
    let a2: Vector3<f64> = k_inv * h.column(1);
    let a3: Vector3<f64> = k_inv * h.column(2);

    let denom = 0.5 * (a1.norm() + a2.norm());
    if denom <= 1e-12 {
        return None;
    }
    let mut lambda = 1.0 / denom;
    if a3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = a1 * lambda;
    let r2 = a2 * lambda;
    let t = a3 * lambda;
    let r3 = r1.cross(&r2);
    if r3.norm() <= 1e-12 {
        return None;
    }

    let r = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = r.svd(true, true);
    let mut u = svd.u?;
    let v_t = svd.v_t?;
    let mut rot = u * v_t;
    if rot.determinant() < 0.0 {
        u.column_mut(2).neg_mut();
        rot = u * v_t;
    }
    Some(Pose::new(Rotation3::from_matrix_unchecked(rot), t))
}
