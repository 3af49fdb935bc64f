use fiducial_map_core::{MarkerId, MarkerSet};
use nalgebra::{Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use super::error::PoseError;
use super::init::{dlt_init, fit_plane, planar_init};
use super::refine::{refine_pose, LmParams};
use crate::board::Board;
use crate::camera::{CameraError, CameraModel};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// PnP solver configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PnpParams {
    pub lm: LmParams,
    /// Object points whose covariance flatness (smallest / largest
    /// eigenvalue) is below this are treated as coplanar.
    pub planarity_tol: f64,
}

impl Default for PnpParams {
    fn default() -> Self {
        Self {
            lm: LmParams::default(),
            planarity_tol: 1e-8,
        }
    }
}

/// Output of [`solve_pnp`]: board-to-camera extrinsics `x_c = R(rvec) x_b + tvec`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PnpSolution {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
    /// Pixel RMSE over all point coordinates after refinement.
    pub reprojection_rmse: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Per-frame board pose.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardPose {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
    /// Number of board markers seen in the frame and used for the solve.
    pub markers_used: usize,
    pub reprojection_rmse: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl BoardPose {
    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::new(self.rvec)
    }
}

/// Index-aligned object / image points of the markers shared by a board and a frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoardCorrespondence {
    pub object: Vec<Point3<f64>>,
    pub image: Vec<Point2<f64>>,
    /// Board ids that contributed, in board order.
    pub ids: Vec<MarkerId>,
}

/// Flatten the corners of every board marker present in `live`.
///
/// Board ids are visited in board order; each contributes its 4 object
/// corners and 4 observed corners in matching corner order.
pub fn board_object_and_image_points(board: &Board, live: &MarkerSet) -> BoardCorrespondence {
    let mut out = BoardCorrespondence::default();
    for (id, quad) in board.iter() {
        let Some(marker) = live.get(id) else {
            continue;
        };
        out.object.extend_from_slice(quad);
        out.image.extend_from_slice(&marker.corners);
        out.ids.push(id);
    }
    out
}

/// Solve for camera extrinsics from 3D-2D correspondences.
///
/// Observations are undistorted first. Coplanar object points (at least 4)
/// are initialised from the plane homography, general ones (at least 6) by a
/// DLT; the estimate is then refined with LM through the full camera model.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(points = object.len()))
)]
pub fn solve_pnp(
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    camera: &CameraModel,
    params: &PnpParams,
) -> Result<PnpSolution, PoseError> {
    if object.len() != image.len() {
        return Err(PoseError::MismatchedLengths {
            object: object.len(),
            image: image.len(),
        });
    }
    if object.len() < 4 {
        return Err(PoseError::InsufficientCorrespondence {
            required: 4,
            actual: object.len(),
        });
    }

    let normalized = image
        .iter()
        .map(|&p| camera.undistort_to_normalized(p))
        .collect::<Result<Vec<_>, _>>()?;

    let plane = fit_plane(object).ok_or(PoseError::DegenerateConfiguration)?;
    let (r0, t0) = if plane.flatness <= params.planarity_tol {
        planar_init(object, &normalized, &plane)?
    } else {
        dlt_init(object, &normalized)?
    };

    let refined = refine_pose(object, image, camera, r0.scaled_axis(), t0, &params.lm);
    if !(refined.rmse.is_finite()
        && refined.rvec.iter().all(|v| v.is_finite())
        && refined.tvec.iter().all(|v| v.is_finite()))
    {
        return Err(PoseError::DegenerateConfiguration);
    }

    log::trace!(
        "pnp: {} points, rmse {:.3e} px after {} iterations",
        object.len(),
        refined.rmse,
        refined.iterations
    );

    Ok(PnpSolution {
        rvec: refined.rvec,
        tvec: refined.tvec,
        reprojection_rmse: refined.rmse,
        iterations: refined.iterations,
        converged: refined.converged,
    })
}

/// Estimate the board pose from the markers of one frame.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(live = live.len()))
)]
pub fn estimate_board_pose(
    board: &Board,
    live: &MarkerSet,
    camera: &CameraModel,
    params: &PnpParams,
) -> Result<BoardPose, PoseError> {
    let corr = board_object_and_image_points(board, live);
    if corr.ids.is_empty() {
        return Err(PoseError::InsufficientMarkers);
    }

    let sol = solve_pnp(&corr.object, &corr.image, camera, params)?;
    Ok(BoardPose {
        rvec: sol.rvec,
        tvec: sol.tvec,
        markers_used: corr.ids.len(),
        reprojection_rmse: sol.reprojection_rmse,
        iterations: sol.iterations,
        converged: sol.converged,
    })
}

/// Project object points through a pose and camera.
pub fn project_points(
    object: &[Point3<f64>],
    rvec: &Vector3<f64>,
    tvec: &Vector3<f64>,
    camera: &CameraModel,
) -> Result<Vec<Point2<f64>>, CameraError> {
    let r = Rotation3::new(*rvec);
    object
        .iter()
        .map(|p| camera.project(&Point3::from(r * p.coords + tvec)))
        .collect()
}

/// Origin followed by the tips of the X, Y and Z axes of the given length.
pub fn axis_points(length: f64) -> [Point3<f64>; 4] {
    [
        Point3::origin(),
        Point3::new(length, 0.0, 0.0),
        Point3::new(0.0, length, 0.0),
        Point3::new(0.0, 0.0, length),
    ]
}
