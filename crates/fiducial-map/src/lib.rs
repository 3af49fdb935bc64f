//! High-level facade for the `fiducial-map-*` workspace.
//!
//! This crate provides:
//! - re-exports of the geometric core ([`core`]) and the board pose crate ([`board`]),
//! - JSON loaders for calibration, reference layouts, board specs and
//!   replayed detection streams ([`io`]),
//! - the per-frame pipeline driving cursor transfer and board pose ([`pipeline`]),
//! - the `fiducial-map` command-line tool (feature `cli`).
//!
//! ## Quickstart
//!
//! ```
//! use fiducial_map::core::{CursorSlot, Marker, MarkerSet};
//! use fiducial_map::pipeline::{
//!     default_required_corners, run_cursor_loop, CursorMapper, Frame, JsonLinesSink,
//!     LoopOptions, MemorySource,
//! };
//! use nalgebra::Point2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let square = |id, x: f64, y: f64| {
//!     Marker::new(
//!         id,
//!         [
//!             Point2::new(x, y),
//!             Point2::new(x + 20.0, y),
//!             Point2::new(x + 20.0, y + 20.0),
//!             Point2::new(x, y + 20.0),
//!         ],
//!     )
//! };
//! let markers = vec![
//!     square(2, 0.0, 0.0),
//!     square(4, 300.0, 0.0),
//!     square(7, 300.0, 200.0),
//!     square(5, 0.0, 200.0),
//! ];
//! let reference = MarkerSet::from_markers(markers.clone())?;
//! let mapper = CursorMapper::new(reference, default_required_corners())?;
//!
//! let mut source = MemorySource::new([Frame::new(0, markers)]);
//! let cursor = CursorSlot::with_position(Point2::new(150.0, 100.0));
//! let mut sink = JsonLinesSink::new(Vec::new());
//!
//! let summary = run_cursor_loop(&mut source, &mapper, &cursor, &mut sink, &LoopOptions::default())?;
//! assert_eq!(summary.succeeded, 1);
//! # Ok(())
//! # }
//! ```

pub use fiducial_map_board as board;
pub use fiducial_map_core as core;

pub mod io;
pub mod pipeline;

pub use fiducial_map_board::{Board, BoardPose, CameraModel, GridBoardSpec, PoseError};
pub use fiducial_map_core::{
    CursorSlot, DuplicatePolicy, Homography, Marker, MarkerCorner, MarkerId, MarkerSet,
};
pub use io::SourceError;
pub use pipeline::{FrameError, LoopSummary, PipelineError};

/// Install a `tracing` subscriber and forward `log` records into it.
///
/// `RUST_LOG` overrides `default_directive`.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, default_directive: &str) {
    let _ = tracing_log::LogTracer::init();
    fiducial_map_core::init_tracing(json, default_directive);
}
