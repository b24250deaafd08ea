use camcalib_core::synthetic::board_facing_pose;
use camcalib_core::{CameraModel, DistortionCoeffs, IntrinsicMatrix, PatternSpec, RgbImage};
use camcalib_render::{build_and_project, build_map, CylinderSpec, UndistortParams};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nalgebra::Vector3;

fn camera() -> CameraModel {
    CameraModel::new(
        IntrinsicMatrix::new(620.0, 620.0, 319.5, 239.5),
        DistortionCoeffs::from_array([-0.25, 0.08, 0.0005, -0.0004, 0.0]),
    )
    .expect("valid camera")
}

fn bench_undistortion(c: &mut Criterion) {
    let model = camera();
    let params = UndistortParams::default();
    c.bench_function("build_map_640x480", |b| {
        b.iter(|| build_map(black_box(&model), (640, 480), &params).expect("map"))
    });

    let map = build_map(&model, (640, 480), &params).expect("map");
    let frame = RgbImage::new(640, 480);
    c.bench_function("remap_rgb_640x480", |b| {
        b.iter(|| map.remap_rgb(black_box(&frame)))
    });
}

fn bench_cylinder(c: &mut Criterion) {
    let model = camera();
    let pattern = PatternSpec::new(6, 8, 0.025).expect("pattern");
    let pose = board_facing_pose(&pattern, 0.5, Vector3::new(0.3, -0.2, 0.1));
    let spec = CylinderSpec::default();
    c.bench_function("cylinder_project_36", |b| {
        b.iter(|| build_and_project(black_box(&pose), &model, &spec, pattern.cell_size).expect("geometry"))
    });

    let geo = build_and_project(&pose, &model, &spec, pattern.cell_size).expect("geometry");
    let mut frame = RgbImage::new(640, 480);
    c.bench_function("cylinder_fill_36", |b| b.iter(|| geo.draw(black_box(&mut frame))));
}

criterion_group!(benches, bench_undistortion, bench_cylinder);
criterion_main!(benches);
