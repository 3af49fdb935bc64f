//! JSON configuration inputs and per-frame reports.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::board::{Board, BoardError, BoardPose, CameraError, CameraIntrinsics, CameraModel};
use crate::board::{Distortion, GridBoardSpec};
use crate::core::{Marker, MarkerCorner, MarkerId, MarkerSet, MarkerSetError};
use crate::pipeline::{default_required_corners, CursorOverlay, PoseOverlay};
use nalgebra::{Matrix3, Point2};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Startup-time input failures. These are fatal for a session.
#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("cannot read {}: {source}", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed {context}: {reason}")]
    Malformed { context: String, reason: String },
    #[error("invalid calibration: {0}")]
    Calibration(#[from] CameraError),
    #[error("invalid board: {0}")]
    Board(#[from] BoardError),
    #[error("invalid reference layout: {0}")]
    Reference(#[from] MarkerSetError),
}

/// Read and deserialize a JSON file.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, SourceError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| SourceError::SourceUnavailable {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|e| SourceError::Malformed {
        context: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// One detected marker as stored in JSON: `{"id": 2, "corners": [[x, y], ..]}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub id: MarkerId,
    pub corners: [[f64; 2]; 4],
}

impl MarkerRecord {
    pub fn to_marker(&self) -> Marker {
        Marker::new(self.id, self.corners.map(|[x, y]| Point2::new(x, y)))
    }
}

impl From<&Marker> for MarkerRecord {
    fn from(m: &Marker) -> Self {
        Self {
            id: m.id,
            corners: m.corners.map(|p| [p.x, p.y]),
        }
    }
}

/// One line of a replayed detection stream:
/// `{"frame": 12, "markers": [{"id": 2, "corners": [[x, y], ..]}]}`.
///
/// `frame` is optional; missing indices continue from the previous line.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame: Option<u64>,
    #[serde(default)]
    pub markers: Vec<MarkerRecord>,
}

/// Matrix payload: nested rows, a flat row-major list, or the OpenCV
/// storage layout `{"rows", "cols", "data"}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatrixData {
    Rows(Vec<Vec<f64>>),
    Flat(Vec<f64>),
    OpenCv {
        rows: usize,
        cols: usize,
        data: Vec<f64>,
    },
}

impl Default for MatrixData {
    fn default() -> Self {
        MatrixData::Flat(Vec::new())
    }
}

impl MatrixData {
    /// Row-major values; `None` when the declared shape does not match the data.
    pub fn values(&self) -> Option<Vec<f64>> {
        match self {
            MatrixData::Flat(v) => Some(v.clone()),
            MatrixData::Rows(rows) => {
                let cols = rows.first().map_or(0, Vec::len);
                rows.iter()
                    .all(|r| r.len() == cols)
                    .then(|| rows.iter().flatten().copied().collect())
            }
            MatrixData::OpenCv { rows, cols, data } => {
                (rows * cols == data.len()).then(|| data.clone())
            }
        }
    }
}

/// Calibration file: `{"camera_matrix": .., "distortion_coefficients": ..}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    pub camera_matrix: MatrixData,
    #[serde(default)]
    pub distortion_coefficients: MatrixData,
}

impl CameraCalibration {
    pub fn from_camera(camera: &CameraModel) -> Self {
        let k = camera.intrinsics.to_matrix();
        Self {
            camera_matrix: MatrixData::Rows(
                (0..3).map(|r| (0..3).map(|c| k[(r, c)]).collect()).collect(),
            ),
            distortion_coefficients: MatrixData::Flat(camera.distortion.coefficients().to_vec()),
        }
    }

    pub fn camera_model(&self) -> Result<CameraModel, CameraError> {
        let k = self
            .camera_matrix
            .values()
            .filter(|v| v.len() == 9)
            .ok_or(CameraError::InvalidIntrinsics("camera_matrix must be 3x3"))?;
        let intrinsics = CameraIntrinsics::from_matrix(&Matrix3::from_row_slice(&k))?;
        let coeffs = self
            .distortion_coefficients
            .values()
            .ok_or(CameraError::InvalidDistortionLength(0))?;
        let distortion = Distortion::from_coefficients(&coeffs)?;
        Ok(CameraModel::with_distortion(intrinsics, distortion))
    }
}

pub fn load_calibration(path: impl AsRef<Path>) -> Result<CameraModel, SourceError> {
    let calib: CameraCalibration = load_json(path)?;
    Ok(calib.camera_model()?)
}

/// Reference layout file: the markers of the reference view, plus an
/// optional override of the required representative corners.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLayoutFile {
    pub markers: Vec<MarkerRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<MarkerCorner>>,
}

/// Validated reference layout.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceLayout {
    pub markers: MarkerSet,
    pub required: Vec<MarkerCorner>,
}

impl ReferenceLayoutFile {
    pub fn into_layout(self) -> Result<ReferenceLayout, MarkerSetError> {
        let markers = MarkerSet::from_markers(self.markers.iter().map(MarkerRecord::to_marker))?;
        Ok(ReferenceLayout {
            markers,
            required: self.required.unwrap_or_else(default_required_corners),
        })
    }
}

pub fn load_reference(path: impl AsRef<Path>) -> Result<ReferenceLayout, SourceError> {
    let file: ReferenceLayoutFile = load_json(path)?;
    Ok(file.into_layout()?)
}

/// The 3x2 board of the reference rig: 4 cm markers, ids 2..=7.
pub fn default_board_spec() -> GridBoardSpec {
    GridBoardSpec {
        markers_x: 3,
        markers_y: 2,
        marker_length: 0.04,
        separation_x: 0.245,
        separation_y: 0.385,
        ids: (2..=7).collect(),
    }
}

/// Load a board spec from `path`, or use [`default_board_spec`].
pub fn load_board_spec(path: Option<&Path>) -> Result<GridBoardSpec, SourceError> {
    match path {
        Some(p) => load_json(p),
        None => Ok(default_board_spec()),
    }
}

pub fn load_board(path: Option<&Path>) -> Result<Board, SourceError> {
    Ok(Board::from_grid(&load_board_spec(path)?)?)
}

/// One line of cursor-mode output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CursorReport {
    pub frame: u64,
    pub ids: Vec<MarkerId>,
    /// Duplicate ids replaced under the last-wins policy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overwritten_ids: Vec<MarkerId>,
    pub cursor: Option<[f64; 2]>,
    pub mapped: Option<[f64; 2]>,
    /// Top-left and bottom-right corners of the cursor box.
    pub cursor_box: Option<[[f64; 2]; 2]>,
    pub guide_lines: Vec<[[f64; 2]; 2]>,
    pub error: Option<String>,
}

impl From<&CursorOverlay> for CursorReport {
    fn from(o: &CursorOverlay) -> Self {
        let mapped = o.outcome.as_ref().ok();
        Self {
            frame: o.frame,
            ids: o.markers.ids().collect(),
            overwritten_ids: o.overwritten.clone(),
            cursor: o.cursor.map(|p| [p.x, p.y]),
            mapped: mapped.map(|p| [p.x, p.y]),
            cursor_box: o.cursor_box(),
            guide_lines: o
                .guide_lines
                .iter()
                .map(|(a, b)| [[a.x, a.y], [b.x, b.y]])
                .collect(),
            error: o.outcome.as_ref().err().map(ToString::to_string),
        }
    }
}

/// One line of pose-mode output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseReport {
    pub frame: u64,
    pub ids: Vec<MarkerId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overwritten_ids: Vec<MarkerId>,
    pub pose: Option<BoardPose>,
    /// Projected origin and X/Y/Z axis tips.
    pub axes: Option<[[f64; 2]; 4]>,
    pub error: Option<String>,
}

impl From<&PoseOverlay> for PoseReport {
    fn from(o: &PoseOverlay) -> Self {
        Self {
            frame: o.frame,
            ids: o.markers.ids().collect(),
            overwritten_ids: o.overwritten.clone(),
            pose: o.outcome.as_ref().ok().cloned(),
            axes: o.axes.map(|a| a.map(|p| [p.x, p.y])),
            error: o.outcome.as_ref().err().map(ToString::to_string),
        }
    }
}

/// Object-point dump of a board, written by the `board` subcommand.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardLayoutReport {
    pub spec: GridBoardSpec,
    pub markers: Vec<BoardMarkerRecord>,
    pub bounds: [[f64; 3]; 2],
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardMarkerRecord {
    pub id: MarkerId,
    pub corners: [[f64; 3]; 4],
}

impl BoardLayoutReport {
    pub fn new(spec: GridBoardSpec, board: &Board) -> Self {
        let (min, max) = board.bounds();
        Self {
            spec,
            markers: board
                .iter()
                .map(|(id, quad)| BoardMarkerRecord {
                    id,
                    corners: quad.map(|p| [p.x, p.y, p.z]),
                })
                .collect(),
            bounds: [[min.x, min.y, min.z], [max.x, max.y, max.z]],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_data_accepts_all_layouts() {
        let rows: MatrixData = serde_json::from_str("[[1, 2], [3, 4]]").expect("rows");
        assert_eq!(rows.values(), Some(vec![1.0, 2.0, 3.0, 4.0]));

        let flat: MatrixData = serde_json::from_str("[0.1, 0.2, 0.0, 0.0]").expect("flat");
        assert_eq!(flat.values(), Some(vec![0.1, 0.2, 0.0, 0.0]));

        let cv: MatrixData =
            serde_json::from_str(r#"{"rows": 1, "cols": 2, "data": [5, 6]}"#).expect("opencv");
        assert_eq!(cv.values(), Some(vec![5.0, 6.0]));

        let ragged = MatrixData::Rows(vec![vec![1.0], vec![1.0, 2.0]]);
        assert_eq!(ragged.values(), None);
    }

    #[test]
    fn calibration_builds_camera_model() {
        let json = r#"{
            "camera_matrix": [[800, 0, 320], [0, 810, 240], [0, 0, 1]],
            "distortion_coefficients": [-0.1, 0.01, 0.0, 0.0, 0.002]
        }"#;
        let calib: CameraCalibration = serde_json::from_str(json).expect("calibration");
        let camera = calib.camera_model().expect("camera");
        assert_eq!(camera.intrinsics.fy, 810.0);
        assert_eq!(camera.distortion.k3, 0.002);

        let back = CameraCalibration::from_camera(&camera).camera_model().expect("round trip");
        assert_eq!(back, camera);
    }

    #[test]
    fn calibration_without_distortion_is_pinhole() {
        let json = r#"{"camera_matrix": [800, 0, 320, 0, 800, 240, 0, 0, 1]}"#;
        let calib: CameraCalibration = serde_json::from_str(json).expect("calibration");
        assert!(calib.camera_model().expect("camera").distortion.is_identity());
    }

    #[test]
    fn reference_file_defaults_required_corners() {
        let json = r#"{"markers": [{"id": 2, "corners": [[0, 0], [1, 0], [1, 1], [0, 1]]}]}"#;
        let file: ReferenceLayoutFile = serde_json::from_str(json).expect("reference");
        let layout = file.into_layout().expect("layout");
        assert_eq!(layout.markers.len(), 1);
        assert_eq!(layout.required, default_required_corners());
    }

    #[test]
    fn reference_file_rejects_duplicate_ids() {
        let m = MarkerRecord {
            id: 3,
            corners: [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
        };
        let file = ReferenceLayoutFile {
            markers: vec![m.clone(), m],
            required: None,
        };
        assert_eq!(
            file.into_layout().unwrap_err(),
            MarkerSetError::DuplicateMarker { id: 3 }
        );
    }

    #[test]
    fn default_board_matches_reference_rig() {
        let board = load_board(None).expect("board");
        assert_eq!(board.ids(), &[2, 3, 4, 5, 6, 7]);
    }
}
