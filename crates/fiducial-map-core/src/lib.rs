//! Core types and utilities for mapping points between fiducial marker views.
//!
//! This crate is intentionally small and purely geometric. It does *not*
//! depend on any concrete marker detector, image type or video source: it
//! consumes marker id -> corner quads and produces correspondences and
//! projective transforms.
//!
//! ## Quickstart
//!
//! ```
//! use fiducial_map_core::{
//!     build_correspondence, estimate_transform, CornerIndex, Marker, MarkerCorner, MarkerSet,
//! };
//! use nalgebra::Point2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! fn square(id: u32, x: f64, y: f64) -> Marker {
//!     Marker::new(
//!         id,
//!         [
//!             Point2::new(x, y),
//!             Point2::new(x + 10.0, y),
//!             Point2::new(x + 10.0, y + 10.0),
//!             Point2::new(x, y + 10.0),
//!         ],
//!     )
//! }
//!
//! let reference = MarkerSet::from_markers([
//!     square(2, 0.0, 0.0),
//!     square(4, 100.0, 0.0),
//!     square(7, 100.0, 80.0),
//!     square(5, 0.0, 80.0),
//! ])?;
//! let live = reference.clone();
//!
//! let required: Vec<MarkerCorner> = [2, 4, 7, 5]
//!     .into_iter()
//!     .map(|id| MarkerCorner::new(id, CornerIndex::TopLeft))
//!     .collect();
//! let pairs = build_correspondence(&reference, &live, &required)?;
//! let h = estimate_transform(&pairs)?;
//! let p = h.try_apply(Point2::new(50.0, 40.0))?;
//! assert!((p.x - 50.0).abs() < 1e-9 && (p.y - 40.0).abs() < 1e-9);
//! # Ok(())
//! # }
//! ```

mod correspondence;
mod cursor;
mod homography;
mod logger;
mod marker;

pub use correspondence::{build_correspondence, Correspondence, CorrespondenceError, MarkerCorner};
pub use cursor::CursorSlot;
pub use homography::{estimate_homography, estimate_transform, Homography, HomographyError};
pub use marker::{CornerIndex, DuplicatePolicy, Marker, MarkerId, MarkerSet, MarkerSetError};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
