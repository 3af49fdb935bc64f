//! Marker quads and per-frame marker sets.

use std::collections::btree_map::{self, BTreeMap};

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Marker identifier as reported by the fiducial detector.
pub type MarkerId = u32;

/// Position of a corner inside a marker quad.
///
/// The order follows the detector convention and is preserved end-to-end:
/// corner 0 is the top-left corner of the printed marker, then clockwise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CornerIndex {
    TopLeft = 0,
    TopRight = 1,
    BottomRight = 2,
    BottomLeft = 3,
}

impl CornerIndex {
    /// All corners in detector order.
    pub const ALL: [CornerIndex; 4] = [
        CornerIndex::TopLeft,
        CornerIndex::TopRight,
        CornerIndex::BottomRight,
        CornerIndex::BottomLeft,
    ];

    /// Map a raw corner index `0..=3` to a `CornerIndex`.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// One detected marker: id plus its four image-space corners (TL, TR, BR, BL).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Marker {
    pub id: MarkerId,
    pub corners: [Point2<f64>; 4],
}

impl Marker {
    pub fn new(id: MarkerId, corners: [Point2<f64>; 4]) -> Self {
        Self { id, corners }
    }

    #[inline]
    pub fn corner(&self, corner: CornerIndex) -> Point2<f64> {
        self.corners[corner.index()]
    }

    /// Mean of the four corners.
    pub fn center(&self) -> Point2<f64> {
        let sum = self
            .corners
            .iter()
            .fold(nalgebra::Vector2::zeros(), |acc, p| acc + p.coords);
        Point2::from(sum / 4.0)
    }

    fn is_finite(&self) -> bool {
        self.corners
            .iter()
            .all(|p| p.x.is_finite() && p.y.is_finite())
    }
}

/// How a marker set treats two detections carrying the same id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail construction with [`MarkerSetError::DuplicateMarker`].
    #[default]
    Reject,
    /// Keep the last detection per id and report the overwritten ids.
    LastWins,
}

/// Marker set construction errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MarkerSetError {
    #[error("marker id {id} detected more than once")]
    DuplicateMarker { id: MarkerId },
    #[error("marker id {id} has a non-finite corner coordinate")]
    NonFiniteCorner { id: MarkerId },
}

/// Immutable mapping `marker id -> marker` for one detection call.
///
/// Ids are unique. A set is built once per frame (or once at startup for a
/// reference layout) and only read afterwards.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MarkerSet {
    markers: BTreeMap<MarkerId, Marker>,
}

impl MarkerSet {
    /// Empty set (nothing detected).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set, rejecting duplicate ids and non-finite corners.
    pub fn from_markers<I>(markers: I) -> Result<Self, MarkerSetError>
    where
        I: IntoIterator<Item = Marker>,
    {
        let mut out = BTreeMap::new();
        for marker in markers {
            if !marker.is_finite() {
                return Err(MarkerSetError::NonFiniteCorner { id: marker.id });
            }
            match out.entry(marker.id) {
                btree_map::Entry::Occupied(_) => {
                    return Err(MarkerSetError::DuplicateMarker { id: marker.id });
                }
                btree_map::Entry::Vacant(slot) => {
                    slot.insert(marker);
                }
            }
        }
        Ok(Self { markers: out })
    }

    /// Build a set where the last detection for a given id wins.
    ///
    /// Returns the set together with the ids that were overwritten (once per
    /// overwrite, in input order), so callers can surface detector anomalies.
    pub fn from_markers_last_wins<I>(markers: I) -> Result<(Self, Vec<MarkerId>), MarkerSetError>
    where
        I: IntoIterator<Item = Marker>,
    {
        let mut out = BTreeMap::new();
        let mut overwritten = Vec::new();
        for marker in markers {
            if !marker.is_finite() {
                return Err(MarkerSetError::NonFiniteCorner { id: marker.id });
            }
            if out.insert(marker.id, marker).is_some() {
                overwritten.push(marker.id);
            }
        }
        if !overwritten.is_empty() {
            log::warn!("duplicate marker ids overwritten: {overwritten:?}");
        }
        Ok((Self { markers: out }, overwritten))
    }

    /// Build a set following `policy`.
    ///
    /// The returned ids are the overwritten duplicates; always empty under
    /// [`DuplicatePolicy::Reject`].
    pub fn with_policy<I>(
        markers: I,
        policy: DuplicatePolicy,
    ) -> Result<(Self, Vec<MarkerId>), MarkerSetError>
    where
        I: IntoIterator<Item = Marker>,
    {
        match policy {
            DuplicatePolicy::Reject => Self::from_markers(markers).map(|set| (set, Vec::new())),
            DuplicatePolicy::LastWins => Self::from_markers_last_wins(markers),
        }
    }

    #[inline]
    pub fn get(&self, id: MarkerId) -> Option<&Marker> {
        self.markers.get(&id)
    }

    #[inline]
    pub fn contains(&self, id: MarkerId) -> bool {
        self.markers.contains_key(&id)
    }

    /// Single corner of a marker, if the marker is present.
    pub fn corner(&self, id: MarkerId, corner: CornerIndex) -> Option<Point2<f64>> {
        self.get(id).map(|m| m.corner(corner))
    }

    /// Marker ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = MarkerId> + '_ {
        self.markers.keys().copied()
    }

    /// Markers in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(id: MarkerId, x: f64, y: f64) -> Marker {
        Marker::new(
            id,
            [
                Point2::new(x, y),
                Point2::new(x + 4.0, y),
                Point2::new(x + 4.0, y + 4.0),
                Point2::new(x, y + 4.0),
            ],
        )
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = MarkerSet::from_markers([quad(3, 0.0, 0.0), quad(3, 10.0, 0.0)]).unwrap_err();
        assert_eq!(err, MarkerSetError::DuplicateMarker { id: 3 });
    }

    #[test]
    fn last_wins_reports_overwritten_ids() {
        let (set, overwritten) = MarkerSet::from_markers_last_wins([
            quad(3, 0.0, 0.0),
            quad(1, 5.0, 5.0),
            quad(3, 10.0, 0.0),
        ])
        .expect("set");
        assert_eq!(overwritten, vec![3]);
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.corner(3, CornerIndex::TopLeft),
            Some(Point2::new(10.0, 0.0))
        );
    }

    #[test]
    fn non_finite_corners_are_rejected() {
        let mut m = quad(9, 0.0, 0.0);
        m.corners[2].x = f64::NAN;
        assert_eq!(
            MarkerSet::from_markers([m]).unwrap_err(),
            MarkerSetError::NonFiniteCorner { id: 9 }
        );
    }

    #[test]
    fn corner_order_is_preserved() {
        let set = MarkerSet::from_markers([quad(7, 1.0, 2.0)]).expect("set");
        let m = set.get(7).expect("marker");
        for (i, c) in CornerIndex::ALL.into_iter().enumerate() {
            assert_eq!(c.index(), i);
            assert_eq!(m.corner(c), m.corners[i]);
        }
        assert_eq!(m.center(), Point2::new(3.0, 4.0));
    }

    #[test]
    fn ids_iterate_in_ascending_order() {
        let (set, overwritten) = MarkerSet::with_policy(
            [quad(5, 0.0, 0.0), quad(2, 0.0, 0.0), quad(9, 0.0, 0.0)],
            DuplicatePolicy::Reject,
        )
        .expect("set");
        assert_eq!(set.ids().collect::<Vec<_>>(), vec![2, 5, 9]);
        assert!(overwritten.is_empty());
    }

    #[test]
    fn last_wins_policy_reports_overwritten_ids() {
        let (set, overwritten) = MarkerSet::with_policy(
            [quad(4, 0.0, 0.0), quad(6, 0.0, 0.0), quad(4, 9.0, 9.0), quad(4, 5.0, 5.0)],
            DuplicatePolicy::LastWins,
        )
        .expect("set");
        assert_eq!(overwritten, vec![4, 4]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(4).expect("4").corners[0], Point2::new(5.0, 5.0));
    }
}
