use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use super::FrameError;
use crate::board::{
    axis_points, estimate_board_pose, project_points, Board, BoardPose, CameraModel, PnpParams,
};
use crate::core::{
    build_correspondence, estimate_transform, CornerIndex, CorrespondenceError, MarkerCorner,
    MarkerSet,
};
use crate::io::ReferenceLayout;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Side length in pixels of the box drawn at the mapped cursor.
pub const DEFAULT_CURSOR_BOX: f64 = 10.0;
/// Length of the drawn board axes, in board units.
pub const DEFAULT_AXIS_LENGTH: f64 = 0.1;

/// Representative points for cursor transfer: top-left corners of ids 2, 4, 7, 5.
pub fn default_required_corners() -> Vec<MarkerCorner> {
    [2, 4, 7, 5]
        .into_iter()
        .map(|id| MarkerCorner::new(id, CornerIndex::TopLeft))
        .collect()
}

/// A line between two marker corners, drawn when both markers are visible.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuideLine {
    pub from: MarkerCorner,
    pub to: MarkerCorner,
}

pub fn default_guide_lines() -> Vec<GuideLine> {
    let tr7 = MarkerCorner::new(7, CornerIndex::TopRight);
    vec![
        GuideLine {
            from: tr7,
            to: MarkerCorner::new(5, CornerIndex::TopLeft),
        },
        GuideLine {
            from: tr7,
            to: MarkerCorner::new(4, CornerIndex::TopRight),
        },
    ]
}

/// Maps a reference-view cursor into live frames.
#[derive(Clone, Debug)]
pub struct CursorMapper {
    reference: MarkerSet,
    required: Vec<MarkerCorner>,
    guides: Vec<GuideLine>,
    box_size: f64,
}

impl CursorMapper {
    /// Fails with [`CorrespondenceError::MissingReferenceMarker`] when the
    /// reference layout lacks a required marker.
    pub fn new(
        reference: MarkerSet,
        required: Vec<MarkerCorner>,
    ) -> Result<Self, CorrespondenceError> {
        if let Some(missing) = required.iter().find(|r| !reference.contains(r.id)) {
            return Err(CorrespondenceError::MissingReferenceMarker(missing.id));
        }
        Ok(Self {
            reference,
            required,
            guides: default_guide_lines(),
            box_size: DEFAULT_CURSOR_BOX,
        })
    }

    pub fn from_layout(layout: ReferenceLayout) -> Result<Self, CorrespondenceError> {
        Self::new(layout.markers, layout.required)
    }

    pub fn with_guide_lines(mut self, guides: Vec<GuideLine>) -> Self {
        self.guides = guides;
        self
    }

    pub fn with_box_size(mut self, box_size: f64) -> Self {
        self.box_size = box_size;
        self
    }

    pub fn reference(&self) -> &MarkerSet {
        &self.reference
    }

    pub fn required(&self) -> &[MarkerCorner] {
        &self.required
    }

    pub fn box_size(&self) -> f64 {
        self.box_size
    }

    /// Transfer `cursor` from the reference view into the frame showing `live`.
    ///
    /// The transform is estimated fresh from this frame's correspondences.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, live), fields(live = live.len()))
    )]
    pub fn map_frame(&self, live: &MarkerSet, cursor: Point2<f64>) -> Result<Point2<f64>, FrameError> {
        let pairs = build_correspondence(&self.reference, live, &self.required)?;
        let h = estimate_transform(&pairs)?;
        Ok(h.try_apply(cursor)?)
    }

    /// Endpoints of the guide lines whose markers are both visible.
    pub fn guide_lines(&self, live: &MarkerSet) -> Vec<(Point2<f64>, Point2<f64>)> {
        self.guides
            .iter()
            .filter_map(|g| {
                Some((
                    live.corner(g.from.id, g.from.corner)?,
                    live.corner(g.to.id, g.to.corner)?,
                ))
            })
            .collect()
    }
}

/// Per-frame board pose with a fixed board and camera.
#[derive(Clone, Debug)]
pub struct BoardPoseEstimator {
    board: Board,
    camera: CameraModel,
    params: PnpParams,
    axis_length: f64,
}

impl BoardPoseEstimator {
    pub fn new(board: Board, camera: CameraModel) -> Self {
        Self {
            board,
            camera,
            params: PnpParams::default(),
            axis_length: DEFAULT_AXIS_LENGTH,
        }
    }

    pub fn with_params(mut self, params: PnpParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_axis_length(mut self, axis_length: f64) -> Self {
        self.axis_length = axis_length;
        self
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    pub fn estimate_frame(&self, live: &MarkerSet) -> Result<BoardPose, FrameError> {
        Ok(estimate_board_pose(
            &self.board,
            live,
            &self.camera,
            &self.params,
        )?)
    }

    /// Board axes projected into the image: origin, then the X, Y and Z tips.
    pub fn project_axes(&self, pose: &BoardPose) -> Option<[Point2<f64>; 4]> {
        let px = project_points(
            &axis_points(self.axis_length),
            &pose.rvec,
            &pose.tvec,
            &self.camera,
        )
        .ok()?;
        Some([px[0], px[1], px[2], px[3]])
    }
}
