//! Board pose estimation (PnP).
//!
//! Pipeline per frame:
//! 1. flatten object/image corners of every board marker present in the frame,
//! 2. undistort the observations,
//! 3. closed-form initialisation (plane homography or DLT),
//! 4. Levenberg-Marquardt refinement on pixel reprojection error.
//!
//! No state is carried between frames.

mod error;
mod init;
mod refine;
mod solver;

pub use error::PoseError;
pub use refine::LmParams;
pub use solver::{
    axis_points, board_object_and_image_points, estimate_board_pose, project_points, solve_pnp,
    BoardCorrespondence, BoardPose, PnpParams, PnpSolution,
};
