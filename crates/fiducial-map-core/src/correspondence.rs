//! Reference-to-live point correspondences built from marker ids.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::marker::{CornerIndex, MarkerId, MarkerSet};

/// One required representative point: a marker id and which of its corners to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerCorner {
    pub id: MarkerId,
    #[serde(default = "default_corner")]
    pub corner: CornerIndex,
}

fn default_corner() -> CornerIndex {
    CornerIndex::TopLeft
}

impl MarkerCorner {
    pub fn new(id: MarkerId, corner: CornerIndex) -> Self {
        Self { id, corner }
    }
}

/// Correspondence construction errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrespondenceError {
    #[error("required marker {0} is not present in the live frame")]
    MissingMarker(MarkerId),
    #[error("required marker {0} is not present in the reference layout")]
    MissingReferenceMarker(MarkerId),
    #[error("source and destination lists differ in length ({src} != {dst})")]
    LengthMismatch { src: usize, dst: usize },
}

/// Index-aligned `(source, destination)` point pairs.
///
/// `src()[i]` corresponds to `dst()[i]`; order is the order of the required-id list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Correspondence {
    src: Vec<Point2<f64>>,
    dst: Vec<Point2<f64>>,
}

impl Correspondence {
    pub fn new(src: Vec<Point2<f64>>, dst: Vec<Point2<f64>>) -> Result<Self, CorrespondenceError> {
        if src.len() != dst.len() {
            return Err(CorrespondenceError::LengthMismatch {
                src: src.len(),
                dst: dst.len(),
            });
        }
        Ok(Self { src, dst })
    }

    #[inline]
    pub fn src(&self) -> &[Point2<f64>] {
        &self.src
    }

    #[inline]
    pub fn dst(&self) -> &[Point2<f64>] {
        &self.dst
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.src.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (Point2<f64>, Point2<f64>)> + '_ {
        self.src.iter().copied().zip(self.dst.iter().copied())
    }
}

/// Pair reference points with live points, one pair per required marker, in list order.
///
/// The whole list is validated before anything is built: if any required id
/// is absent the call fails with the first missing id and no partial
/// correspondence is produced.
pub fn build_correspondence(
    reference: &MarkerSet,
    live: &MarkerSet,
    required: &[MarkerCorner],
) -> Result<Correspondence, CorrespondenceError> {
    if let Some(missing) = required.iter().find(|r| !reference.contains(r.id)) {
        return Err(CorrespondenceError::MissingReferenceMarker(missing.id));
    }
    if let Some(missing) = required.iter().find(|r| !live.contains(r.id)) {
        return Err(CorrespondenceError::MissingMarker(missing.id));
    }

    let mut src = Vec::with_capacity(required.len());
    let mut dst = Vec::with_capacity(required.len());
    for r in required {
        let (Some(s), Some(d)) = (
            reference.corner(r.id, r.corner),
            live.corner(r.id, r.corner),
        ) else {
            return Err(CorrespondenceError::MissingMarker(r.id));
        };
        src.push(s);
        dst.push(d);
    }

    Ok(Correspondence { src, dst })
}
