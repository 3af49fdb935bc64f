use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fiducial_map_board::{
    estimate_board_pose, project_points, Board, CameraIntrinsics, CameraModel, Distortion,
    GridBoardSpec, PnpParams,
};
use fiducial_map_core::{Marker, MarkerSet};
use nalgebra::Vector3;

fn bench_board_pose(c: &mut Criterion) {
    let board = Board::from_grid(&GridBoardSpec {
        markers_x: 3,
        markers_y: 2,
        marker_length: 0.04,
        separation_x: 0.245,
        separation_y: 0.385,
        ids: vec![2, 3, 4, 5, 6, 7],
    })
    .expect("board");
    let camera = CameraModel::with_distortion(
        CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0),
        Distortion::from_coefficients(&[-0.2, 0.05, 0.0, 0.0]).expect("coefficients"),
    );
    let rvec = Vector3::new(0.1, -0.2, 0.05);
    let tvec = Vector3::new(-0.3, -0.2, 1.5);

    let live = MarkerSet::from_markers(board.iter().map(|(id, quad)| {
        let px = project_points(quad, &rvec, &tvec, &camera).expect("visible");
        Marker::new(id, [px[0], px[1], px[2], px[3]])
    }))
    .expect("live");
    let params = PnpParams::default();

    c.bench_function("estimate_board_pose_3x2", |b| {
        b.iter(|| estimate_board_pose(black_box(&board), black_box(&live), &camera, &params))
    });
}

criterion_group!(benches, bench_board_pose);
criterion_main!(benches);
