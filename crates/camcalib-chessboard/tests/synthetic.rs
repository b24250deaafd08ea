use camcalib_chessboard::{extract, ChessboardDetector, ChessboardParams, DetectError};
use camcalib_core::synthetic::{board_facing_pose, render_chessboard, BoardStyle};
use camcalib_core::{CameraModel, DistortionCoeffs, GrayImage, IntrinsicMatrix, PatternSpec, Pose};
use nalgebra::{Point2, Vector3};

const W: usize = 480;
const H: usize = 360;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn camera(distortion: DistortionCoeffs) -> CameraModel {
    CameraModel::new(IntrinsicMatrix::new(450.0, 450.0, 241.0, 178.5), distortion).unwrap()
}

fn style() -> BoardStyle {
    BoardStyle {
        supersample: 2,
        ..BoardStyle::default()
    }
}

fn render(pattern: &PatternSpec, model: &CameraModel, pose: &Pose) -> GrayImage {
    render_chessboard(pattern, model, pose, W, H, &style())
}

fn assert_matches_truth(
    found: &[Point2<f64>],
    pattern: &PatternSpec,
    model: &CameraModel,
    pose: &Pose,
    tol: f64,
) {
    let truth = model
        .project_points(pose, &pattern.canonical_corners())
        .unwrap();
    assert_eq!(found.len(), truth.len());
    for (k, (f, t)) in found.iter().zip(truth.iter()).enumerate() {
        let err = (f - t).norm();
        assert!(err < tol, "corner {k}: found {f:?}, expected {t:?} ({err:.3}px)");
    }
}

#[test]
fn full_board_yields_every_corner_in_canonical_order() {
    init_logging();
    let pattern = PatternSpec::new(6, 8, 0.025).unwrap();
    let model = camera(DistortionCoeffs::ZERO);
    let pose = board_facing_pose(&pattern, 0.45, Vector3::new(0.25, -0.2, 0.1));
    let img = render(&pattern, &model, &pose);

    let points = extract(&img.view(), &pattern, &ChessboardParams::default()).expect("detected");
    assert_eq!(points.len(), 48);
    assert_matches_truth(&points, &pattern, &model, &pose, 0.35);
}

#[test]
fn distorted_view_is_detected() {
    init_logging();
    let pattern = PatternSpec::new(6, 8, 0.025).unwrap();
    let model = camera(DistortionCoeffs::from_array([-0.15, 0.03, 0.0, 0.0, 0.0]));
    let pose = board_facing_pose(&pattern, 0.4, Vector3::new(-0.2, 0.3, -0.15));
    let img = render(&pattern, &model, &pose);

    let points = extract(&img.view(), &pattern, &ChessboardParams::default()).expect("detected");
    assert_matches_truth(&points, &pattern, &model, &pose, 0.35);
}

#[test]
fn upside_down_board_keeps_canonical_order() {
    init_logging();
    // 7 + 6 is odd, so the colouring fixes the 180° ambiguity
    let pattern = PatternSpec::new(7, 6, 0.025).unwrap();
    let model = camera(DistortionCoeffs::ZERO);
    let pose = board_facing_pose(&pattern, 0.45, Vector3::new(0.0, 0.0, 3.1));
    let img = render(&pattern, &model, &pose);

    let detector = ChessboardDetector::new(ChessboardParams::default());
    let det = detector.detect(&img.view(), &pattern).expect("detected");
    assert!(!det.symmetric);
    assert_matches_truth(&det.image_points(), &pattern, &model, &pose, 0.35);
}

#[test]
fn wrong_board_size_is_rejected() {
    init_logging();
    let pattern = PatternSpec::new(7, 6, 0.025).unwrap();
    let model = camera(DistortionCoeffs::ZERO);
    let pose = board_facing_pose(&pattern, 0.45, Vector3::new(0.1, 0.1, 0.0));
    let img = render(&pattern, &model, &pose);

    let wrong = PatternSpec::new(7, 5, 0.025).unwrap();
    let err = extract(&img.view(), &wrong, &ChessboardParams::default()).unwrap_err();
    assert!(matches!(err, DetectError::SizeMismatch { .. }), "{err:?}");
}

#[test]
fn blank_image_fails_without_partial_result() {
    init_logging();
    let pattern = PatternSpec::new(6, 8, 0.025).unwrap();
    let img = GrayImage::filled(W, H, 128);
    let err = extract(&img.view(), &pattern, &ChessboardParams::default()).unwrap_err();
    assert_eq!(
        err,
        DetectError::NotEnoughCorners {
            found: 0,
            expected: 48
        }
    );
}

#[test]
fn partially_visible_board_fails() {
    init_logging();
    let pattern = PatternSpec::new(6, 8, 0.025).unwrap();
    let model = camera(DistortionCoeffs::ZERO);
    let mut pose = board_facing_pose(&pattern, 0.45, Vector3::zeros());
    // push the board half out of the frame
    pose.translation.x += 0.22;
    let img = render(&pattern, &model, &pose);

    assert!(extract(&img.view(), &pattern, &ChessboardParams::default()).is_err());
}

/// Every frame of a rotation sweep must yield the full, correctly ordered
/// grid; failures are collected so one run reports all bad poses.
fn sweep(pattern: &PatternSpec, model: &CameraModel, rvecs: &[Vector3<f64>], tol: f64) {
    let params = ChessboardParams::default();
    let mut failures = Vec::new();
    for rvec in rvecs {
        let pose = board_facing_pose(pattern, 0.5, *rvec);
        let img = render(pattern, model, &pose);
        let truth = model
            .project_points(&pose, &pattern.canonical_corners())
            .unwrap();
        match extract(&img.view(), pattern, &params) {
            Ok(found) => {
                assert_eq!(found.len(), truth.len());
                let worst = found
                    .iter()
                    .zip(&truth)
                    .map(|(f, t)| (f - t).norm())
                    .fold(0.0, f64::max);
                if worst > tol {
                    failures.push(format!("{rvec:?}: worst corner off by {worst:.3}px"));
                }
            }
            Err(err) => failures.push(format!("{rvec:?}: {err}")),
        }
    }
    assert!(failures.is_empty(), "failed poses:\n{}", failures.join("\n"));
}

fn steps(axis: Vector3<f64>) -> Vec<Vector3<f64>> {
    (-6..=6).map(|k| axis * (k as f64 * 0.1)).collect()
}

#[test]
fn yaw_sweep_detects_every_frame() {
    init_logging();
    let pattern = PatternSpec::new(6, 8, 0.025).unwrap();
    sweep(&pattern, &camera(DistortionCoeffs::ZERO), &steps(Vector3::y()), 0.35);
}

#[test]
fn yaw_sweep_with_barrel_distortion_detects_every_frame() {
    init_logging();
    let pattern = PatternSpec::new(6, 8, 0.025).unwrap();
    let model = camera(DistortionCoeffs::from_array([-0.2, 0.0, 0.0, 0.0, 0.0]));
    sweep(&pattern, &model, &steps(Vector3::y()), 0.35);
}

#[test]
fn pitch_sweep_detects_every_frame() {
    init_logging();
    let pattern = PatternSpec::new(6, 8, 0.025).unwrap();
    let model = camera(DistortionCoeffs::from_array([-0.2, 0.0, 0.0, 0.0, 0.0]));
    sweep(&pattern, &model, &steps(Vector3::x()), 0.35);
}

#[test]
fn roll_sweep_with_tilt_detects_every_frame() {
    init_logging();
    let pattern = PatternSpec::new(6, 8, 0.025).unwrap();
    let tilted: Vec<Vector3<f64>> = steps(Vector3::z())
        .into_iter()
        .map(|r| r + Vector3::new(0.25, -0.2, 0.0))
        .collect();
    sweep(&pattern, &camera(DistortionCoeffs::ZERO), &tilted, 0.35);
    let model = camera(DistortionCoeffs::from_array([-0.2, 0.05, 0.0, 0.0, 0.0]));
    sweep(&pattern, &model, &tilted, 0.35);
}
