//! Rigid multi-marker boards and per-frame board pose estimation.
//!
//! A [`Board`] binds marker ids to 3D object-point quads (usually generated
//! from a [`GridBoardSpec`]). Given the markers detected in one frame and a
//! calibrated [`CameraModel`], [`estimate_board_pose`] recovers the
//! board-to-camera extrinsics with a PnP solve.
//!
//! ## Quickstart
//!
//! ```
//! use fiducial_map_board::{
//!     estimate_board_pose, project_points, Board, CameraIntrinsics, CameraModel, GridBoardSpec,
//!     PnpParams,
//! };
//! use fiducial_map_core::{Marker, MarkerSet};
//! use nalgebra::Vector3;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let board = Board::from_grid(&GridBoardSpec {
//!     markers_x: 3,
//!     markers_y: 2,
//!     marker_length: 0.04,
//!     separation_x: 0.245,
//!     separation_y: 0.385,
//!     ids: vec![2, 3, 4, 5, 6, 7],
//! })?;
//! let camera = CameraModel::pinhole(CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0));
//!
//! // Synthesize a frame from a known pose.
//! let rvec = Vector3::new(0.1, -0.2, 0.05);
//! let tvec = Vector3::new(-0.3, -0.2, 1.5);
//! let mut markers = Vec::new();
//! for (id, quad) in board.iter() {
//!     let px = project_points(quad, &rvec, &tvec, &camera)?;
//!     markers.push(Marker::new(id, [px[0], px[1], px[2], px[3]]));
//! }
//! let live = MarkerSet::from_markers(markers)?;
//!
//! let pose = estimate_board_pose(&board, &live, &camera, &PnpParams::default())?;
//! assert_eq!(pose.markers_used, 6);
//! assert!((pose.tvec - tvec).norm() < 1e-6);
//! # Ok(())
//! # }
//! ```

mod board;
mod camera;
pub mod pose;

pub use board::{generate_object_points, Board, BoardError, GridBoardSpec, ObjectQuad};
pub use camera::{CameraError, CameraIntrinsics, CameraModel, Distortion};
pub use pose::{
    axis_points, board_object_and_image_points, estimate_board_pose, project_points, solve_pnp,
    BoardCorrespondence, BoardPose, LmParams, PnpParams, PnpSolution, PoseError,
};
