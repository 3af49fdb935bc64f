//! Board specification and object-point layout helpers.

use std::collections::HashMap;

use fiducial_map_core::MarkerId;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Four 3D corners of one board marker, in detector corner order (TL, TR, BR, BL).
pub type ObjectQuad = [Point3<f64>; 4];

/// Rectangular grid of equally sized markers.
///
/// `ids` are assigned in row-major order, top row first, and must contain
/// exactly `markers_x * markers_y` unique entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridBoardSpec {
    /// Number of marker columns.
    pub markers_x: u32,
    /// Number of marker rows.
    pub markers_y: u32,
    /// Marker side length (board units, usually meters).
    pub marker_length: f64,
    /// Gap between neighbouring columns.
    pub separation_x: f64,
    /// Gap between neighbouring rows.
    pub separation_y: f64,
    pub ids: Vec<MarkerId>,
}

/// Board specification validation errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BoardError {
    #[error("markers_x and markers_y must be >= 1")]
    InvalidSize,
    #[error("marker_length must be finite and > 0")]
    InvalidMarkerLength,
    #[error("marker separations must be finite and >= 0")]
    InvalidSeparation,
    #[error("board needs {needed} ids, got {got}")]
    IdCountMismatch { needed: usize, got: usize },
    #[error("marker id {0} appears more than once on the board")]
    DuplicateId(MarkerId),
    #[error("board has no markers")]
    Empty,
    #[error("object point of marker {0} is not finite")]
    NonFiniteObjectPoint(MarkerId),
}

/// Generate the object points of a `markers_x` x `markers_y` grid board.
///
/// Output is row-major, top row first. The board lies in `Z = 0` with `+Y`
/// pointing up: the top-left corner of the top-left marker sits at
/// `(0, maxY, 0)` with `maxY = markers_y * L + (markers_y - 1) * Sy`.
pub fn generate_object_points(
    markers_x: u32,
    markers_y: u32,
    marker_length: f64,
    separation_x: f64,
    separation_y: f64,
) -> Vec<ObjectQuad> {
    let l = marker_length;
    let max_y = markers_y as f64 * l + markers_y.saturating_sub(1) as f64 * separation_y;

    let mut out = Vec::with_capacity(markers_x as usize * markers_y as usize);
    for y in 0..markers_y {
        for x in 0..markers_x {
            let c0 = Point3::new(
                x as f64 * (l + separation_x),
                max_y - y as f64 * (l + separation_y),
                0.0,
            );
            out.push([
                c0,
                Point3::new(c0.x + l, c0.y, 0.0),
                Point3::new(c0.x + l, c0.y - l, 0.0),
                Point3::new(c0.x, c0.y - l, 0.0),
            ]);
        }
    }
    out
}

/// Rigid board: marker ids bound to their object-point quads.
#[derive(Clone, Debug)]
pub struct Board {
    ids: Vec<MarkerId>,
    object_points: Vec<ObjectQuad>,
    index: HashMap<MarkerId, usize>,
}

impl Board {
    /// Bind ids to arbitrary object-point quads (index-aligned).
    pub fn new(ids: Vec<MarkerId>, object_points: Vec<ObjectQuad>) -> Result<Self, BoardError> {
        if ids.is_empty() {
            return Err(BoardError::Empty);
        }
        if ids.len() != object_points.len() {
            return Err(BoardError::IdCountMismatch {
                needed: object_points.len(),
                got: ids.len(),
            });
        }

        let mut index = HashMap::with_capacity(ids.len());
        for (i, (&id, quad)) in ids.iter().zip(&object_points).enumerate() {
            if index.insert(id, i).is_some() {
                return Err(BoardError::DuplicateId(id));
            }
            if quad
                .iter()
                .any(|p| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()))
            {
                return Err(BoardError::NonFiniteObjectPoint(id));
            }
        }

        Ok(Self {
            ids,
            object_points,
            index,
        })
    }

    /// Validate a grid spec and build its board.
    pub fn from_grid(spec: &GridBoardSpec) -> Result<Self, BoardError> {
        if spec.markers_x == 0 || spec.markers_y == 0 {
            return Err(BoardError::InvalidSize);
        }
        if !spec.marker_length.is_finite() || spec.marker_length <= 0.0 {
            return Err(BoardError::InvalidMarkerLength);
        }
        if !spec.separation_x.is_finite()
            || !spec.separation_y.is_finite()
            || spec.separation_x < 0.0
            || spec.separation_y < 0.0
        {
            return Err(BoardError::InvalidSeparation);
        }
        let needed = spec.markers_x as usize * spec.markers_y as usize;
        if spec.ids.len() != needed {
            return Err(BoardError::IdCountMismatch {
                needed,
                got: spec.ids.len(),
            });
        }

        let object_points = generate_object_points(
            spec.markers_x,
            spec.markers_y,
            spec.marker_length,
            spec.separation_x,
            spec.separation_y,
        );
        Self::new(spec.ids.clone(), object_points)
    }

    /// Board ids in board order.
    #[inline]
    pub fn ids(&self) -> &[MarkerId] {
        &self.ids
    }

    #[inline]
    pub fn object_points(&self, id: MarkerId) -> Option<&ObjectQuad> {
        self.index.get(&id).map(|&i| &self.object_points[i])
    }

    #[inline]
    pub fn contains(&self, id: MarkerId) -> bool {
        self.index.contains_key(&id)
    }

    #[inline]
    pub fn marker_count(&self) -> usize {
        self.ids.len()
    }

    /// `(id, quad)` pairs in board order.
    pub fn iter(&self) -> impl Iterator<Item = (MarkerId, &ObjectQuad)> {
        self.ids.iter().copied().zip(self.object_points.iter())
    }

    /// Axis-aligned bounds `(min, max)` of all object points.
    pub fn bounds(&self) -> (Point3<f64>, Point3<f64>) {
        let mut min = Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut max = Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in self.object_points.iter().flatten() {
            min = min.inf(p);
            max = max.sup(p);
        }
        (min, max)
    }
}
