use approx::assert_relative_eq;
use fiducial_map_board::{
    estimate_board_pose, project_points, solve_pnp, Board, CameraIntrinsics, CameraModel,
    Distortion, GridBoardSpec, PnpParams, PoseError,
};
use fiducial_map_core::{Marker, MarkerId, MarkerSet};
use nalgebra::{Point2, Point3, Rotation3, Vector3};

fn scenario_board() -> Board {
    Board::from_grid(&GridBoardSpec {
        markers_x: 3,
        markers_y: 2,
        marker_length: 0.04,
        separation_x: 0.245,
        separation_y: 0.385,
        ids: vec![2, 3, 4, 5, 6, 7],
    })
    .expect("board")
}

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0)
}

fn ground_truth() -> (Vector3<f64>, Vector3<f64>) {
    (Vector3::new(0.1, -0.2, 0.05), Vector3::new(-0.3, -0.2, 1.5))
}

fn observe(
    board: &Board,
    camera: &CameraModel,
    rvec: &Vector3<f64>,
    tvec: &Vector3<f64>,
    visible: impl Fn(MarkerId) -> bool,
) -> MarkerSet {
    let markers = board.iter().filter(|(id, _)| visible(*id)).map(|(id, quad)| {
        let px = project_points(quad, rvec, tvec, camera).expect("visible");
        Marker::new(id, [px[0], px[1], px[2], px[3]])
    });
    MarkerSet::from_markers(markers).expect("live set")
}

fn rotation_angle_between(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let ra = Rotation3::new(*a);
    let rb = Rotation3::new(*b);
    ra.rotation_to(&rb).angle()
}

#[test]
fn full_board_recovers_ground_truth_pose() {
    let board = scenario_board();
    let camera = CameraModel::pinhole(intrinsics());
    let (rvec, tvec) = ground_truth();
    let live = observe(&board, &camera, &rvec, &tvec, |_| true);

    let pose = estimate_board_pose(&board, &live, &camera, &PnpParams::default()).expect("pose");
    assert_eq!(pose.markers_used, 6);
    assert!(pose.converged);
    assert!(pose.reprojection_rmse < 1e-6);
    assert_relative_eq!(pose.rvec, rvec, epsilon = 1e-3);
    assert_relative_eq!(pose.tvec, tvec, epsilon = 1e-3);
}

#[test]
fn distorted_observations_recover_ground_truth_pose() {
    let board = scenario_board();
    let camera = CameraModel::with_distortion(
        intrinsics(),
        Distortion::from_coefficients(&[-0.21, 0.08, 0.0012, -0.0008, -0.01])
            .expect("coefficients"),
    );
    let (rvec, tvec) = ground_truth();
    let live = observe(&board, &camera, &rvec, &tvec, |_| true);

    let pose = estimate_board_pose(&board, &live, &camera, &PnpParams::default()).expect("pose");
    assert!(rotation_angle_between(&pose.rvec, &rvec) < 1e-3);
    assert_relative_eq!(pose.tvec, tvec, epsilon = 1e-3);
}

#[test]
fn partial_view_reports_overlap_count() {
    let board = scenario_board();
    let camera = CameraModel::pinhole(intrinsics());
    let (rvec, tvec) = ground_truth();

    for visible in [vec![2, 7], vec![3, 4, 6], vec![5]] {
        let live = observe(&board, &camera, &rvec, &tvec, |id| visible.contains(&id));
        let pose =
            estimate_board_pose(&board, &live, &camera, &PnpParams::default()).expect("pose");
        assert_eq!(pose.markers_used, visible.len());
        assert_relative_eq!(pose.tvec, tvec, epsilon = 1e-3);
    }
}

#[test]
fn markers_outside_the_board_are_ignored() {
    let board = scenario_board();
    let camera = CameraModel::pinhole(intrinsics());
    let (rvec, tvec) = ground_truth();
    let observed = observe(&board, &camera, &rvec, &tvec, |id| id != 4);

    let mut markers: Vec<Marker> = observed.iter().copied().collect();
    markers.push(Marker::new(
        42,
        [
            Point2::new(10.0, 10.0),
            Point2::new(30.0, 10.0),
            Point2::new(30.0, 30.0),
            Point2::new(10.0, 30.0),
        ],
    ));
    let live = MarkerSet::from_markers(markers).expect("live");

    let pose = estimate_board_pose(&board, &live, &camera, &PnpParams::default()).expect("pose");
    assert_eq!(pose.markers_used, 5);
}

#[test]
fn frame_without_board_markers_has_no_pose() {
    let board = scenario_board();
    let camera = CameraModel::pinhole(intrinsics());
    let live = MarkerSet::from_markers([Marker::new(
        0,
        [
            Point2::new(0.0, 0.0),
            Point2::new(5.0, 0.0),
            Point2::new(5.0, 5.0),
            Point2::new(0.0, 5.0),
        ],
    )])
    .expect("live");

    let err = estimate_board_pose(&board, &live, &camera, &PnpParams::default()).unwrap_err();
    assert_eq!(err, PoseError::InsufficientMarkers);

    let err =
        estimate_board_pose(&board, &MarkerSet::new(), &camera, &PnpParams::default()).unwrap_err();
    assert_eq!(err, PoseError::InsufficientMarkers);
}

#[test]
fn non_coplanar_points_use_general_solver() {
    let camera = CameraModel::pinhole(intrinsics());
    let (rvec, tvec) = ground_truth();
    let object = vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(0.3, 0.0, 0.0),
        Point3::new(0.3, 0.25, 0.0),
        Point3::new(0.0, 0.25, 0.0),
        Point3::new(0.0, 0.0, 0.2),
        Point3::new(0.3, 0.0, 0.15),
        Point3::new(0.15, 0.25, 0.1),
        Point3::new(0.1, 0.1, -0.1),
    ];
    let image = project_points(&object, &rvec, &tvec, &camera).expect("visible");

    let sol = solve_pnp(&object, &image, &camera, &PnpParams::default()).expect("solution");
    assert_relative_eq!(sol.rvec, rvec, epsilon = 1e-3);
    assert_relative_eq!(sol.tvec, tvec, epsilon = 1e-3);
}

#[test]
fn reprojection_of_solved_pose_matches_observations() {
    let board = scenario_board();
    let camera = CameraModel::pinhole(intrinsics());
    let (rvec, tvec) = ground_truth();
    let live = observe(&board, &camera, &rvec, &tvec, |_| true);
    let pose = estimate_board_pose(&board, &live, &camera, &PnpParams::default()).expect("pose");

    for (id, quad) in board.iter() {
        let px = project_points(quad, &pose.rvec, &pose.tvec, &camera).expect("visible");
        let marker = live.get(id).expect("observed");
        for (p, q) in px.iter().zip(&marker.corners) {
            assert!((p - q).norm() < 1e-4);
        }
    }
}
