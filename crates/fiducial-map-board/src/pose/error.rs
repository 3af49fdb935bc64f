use fiducial_map_core::HomographyError;

use crate::camera::CameraError;

/// Board pose / PnP failures. All of them are per-frame and recoverable.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PoseError {
    #[error("no board marker is visible in this frame")]
    InsufficientMarkers,
    #[error("need at least {required} point correspondences, got {actual}")]
    InsufficientCorrespondence { required: usize, actual: usize },
    #[error("degenerate point configuration for PnP")]
    DegenerateConfiguration,
    #[error("object and image point lists differ in length ({object} != {image})")]
    MismatchedLengths { object: usize, image: usize },
    #[error(transparent)]
    Camera(#[from] CameraError),
}

impl From<HomographyError> for PoseError {
    fn from(err: HomographyError) -> Self {
        match err {
            HomographyError::InsufficientCorrespondence { required, actual } => {
                PoseError::InsufficientCorrespondence { required, actual }
            }
            HomographyError::MismatchedLengths { src, dst } => PoseError::MismatchedLengths {
                object: src,
                image: dst,
            },
            HomographyError::DegenerateConfiguration
            | HomographyError::DegenerateProjection { .. } => PoseError::DegenerateConfiguration,
        }
    }
}
