use assert_cmd::Command;
use camcalib::core::synthetic::{board_facing_pose, render_chessboard, BoardStyle};
use camcalib::image_io::save_rgb;
use camcalib::io::{CalibrationRecord, PipelineConfig};
use camcalib::{CameraModel, DistortionCoeffs, IntrinsicMatrix, PatternSpec, RgbImage};
use nalgebra::Vector3;
use predicates::prelude::*;
use std::path::Path;

const W: usize = 480;
const H: usize = 360;

fn pattern() -> PatternSpec {
    PatternSpec::new(7, 6, 0.025).unwrap()
}

fn camera() -> CameraModel {
    CameraModel::new(
        IntrinsicMatrix::new(450.0, 445.0, 241.0, 178.5),
        DistortionCoeffs::from_array([-0.1, 0.0, 0.0, 0.0, 0.0]),
    )
    .unwrap()
}

/// Board frames plus one empty frame at index 2.
fn write_frames(dir: &Path) {
    let p = pattern();
    let rvecs = [
        (0.36, Vector3::new(0.3, -0.2, 0.1)),
        (0.34, Vector3::new(-0.25, 0.3, -0.15)),
        (0.38, Vector3::new(0.1, 0.35, 0.4)),
        (0.35, Vector3::new(-0.3, -0.25, -0.3)),
    ];
    let style = BoardStyle {
        supersample: 2,
        ..BoardStyle::default()
    };
    let mut frames: Vec<RgbImage> = rvecs
        .iter()
        .map(|(d, r)| {
            let pose = board_facing_pose(&p, *d, *r);
            let gray = render_chessboard(&p, &camera(), &pose, W, H, &style);
            RgbImage::from_gray(&gray.view())
        })
        .collect();
    frames.insert(2, RgbImage::new(W, H));
    for (k, frame) in frames.iter().enumerate() {
        save_rgb(frame, dir.join(format!("img_{k:02}.png"))).unwrap();
    }
}

fn write_config(path: &Path) {
    let mut cfg = PipelineConfig::new(pattern());
    cfg.calib_flags.fix_k3 = true;
    cfg.write_json(path).unwrap();
}

fn png_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .path()
                .extension()
                .is_some_and(|x| x == "png")
        })
        .count()
}

fn camcalib() -> Command {
    Command::cargo_bin("camcalib").unwrap()
}

#[test]
fn calibrate_rectify_and_ar_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let frames = tmp.path().join("frames");
    std::fs::create_dir(&frames).unwrap();
    write_frames(&frames);
    let config = tmp.path().join("pipeline.json");
    write_config(&config);
    let calib = tmp.path().join("calib.json");

    camcalib()
        .arg("calibrate")
        .arg("--config")
        .arg(&config)
        .arg("--frames")
        .arg(&frames)
        .arg("--out")
        .arg(&calib)
        .assert()
        .success()
        .stdout(predicate::str::contains("The number of selected images = 5"))
        .stdout(predicate::str::contains("The number of used images = 4"))
        .stdout(predicate::str::contains("RMS error ="));

    let record = CalibrationRecord::load_json(&calib).unwrap();
    assert_eq!(record.image_size, (W, H));
    assert!(record.rms < 0.5, "rms = {}", record.rms);
    assert!((record.intrinsics.fx - 450.0).abs() < 20.0);

    let rectified = tmp.path().join("rectified");
    camcalib()
        .args(["rectify", "--toggle-at", "1,3", "--balance", "0.5"])
        .arg("--calib")
        .arg(&calib)
        .arg("--frames")
        .arg(&frames)
        .arg("--out")
        .arg(&rectified)
        .assert()
        .success()
        .stdout(predicate::str::contains("rectify: 5 frames, 5 written"));
    assert_eq!(png_count(&rectified), 5);

    let ar = tmp.path().join("ar");
    camcalib()
        .arg("ar")
        .arg("--config")
        .arg(&config)
        .arg("--calib")
        .arg(&calib)
        .arg("--frames")
        .arg(&frames)
        .arg("--out")
        .arg(&ar)
        .args(["--stop-at", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("augmented 3 of 4 frames"));
    assert_eq!(png_count(&ar), 4);
}

#[test]
fn detect_reports_each_frame() {
    let tmp = tempfile::tempdir().unwrap();
    write_frames(tmp.path());
    let config = tmp.path().join("pipeline.json");
    write_config(&config);
    let previews = tmp.path().join("previews");

    camcalib()
        .arg("detect")
        .arg("--config")
        .arg(&config)
        .arg("--frames")
        .arg(tmp.path())
        .arg("--out")
        .arg(&previews)
        .assert()
        .success()
        .stdout(predicate::str::contains("frame 0: 42 corners"))
        .stdout(predicate::str::contains("frame 2: board not found"))
        .stdout(predicate::str::contains("detected the board in 4 frames"));
    assert_eq!(png_count(&previews), 5);
}

#[test]
fn calibrate_with_selection_uses_only_those_frames() {
    let tmp = tempfile::tempdir().unwrap();
    write_frames(tmp.path());
    let config = tmp.path().join("pipeline.json");
    write_config(&config);
    let calib = tmp.path().join("calib.json");

    camcalib()
        .arg("calibrate")
        .arg("--config")
        .arg(&config)
        .arg("--frames")
        .arg(tmp.path())
        .args(["--select", "0,1,3"])
        .arg("--out")
        .arg(&calib)
        .assert()
        .success()
        .stdout(predicate::str::contains("The number of selected images = 3"));
    assert!(calib.exists());
}

#[test]
fn calibrate_without_boards_fails() {
    let tmp = tempfile::tempdir().unwrap();
    save_rgb(&RgbImage::new(64, 48), tmp.path().join("blank.png")).unwrap();
    let config = tmp.path().join("pipeline.json");
    write_config(&config);

    camcalib()
        .arg("calibrate")
        .arg("--config")
        .arg(&config)
        .arg("--frames")
        .arg(tmp.path())
        .arg("--out")
        .arg(tmp.path().join("calib.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn invalid_config_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let config = tmp.path().join("bad.json");
    std::fs::write(
        &config,
        r#"{"pattern": {"cols": 1, "rows": 8, "cell_size": 0.025}}"#,
    )
    .unwrap();

    camcalib()
        .arg("detect")
        .arg("--config")
        .arg(&config)
        .arg("--frames")
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid pattern"));
}
