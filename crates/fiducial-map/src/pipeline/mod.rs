//! Per-frame pipeline.
//!
//! `DetectionSource -> MarkerSet -> {CursorMapper | BoardPoseEstimator} -> OverlaySink`
//!
//! Frames are processed one at a time; every structure built for a frame is
//! dropped before the next one is pulled. Per-frame failures are caught at the
//! frame boundary, reported to the sink and counted; only source and sink
//! failures end a loop early.

mod cursor_input;
mod estimator;
mod sink;
mod source;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::board::{BoardPose, PoseError};
use crate::core::{
    CorrespondenceError, CursorSlot, DuplicatePolicy, HomographyError, MarkerId, MarkerSet,
    MarkerSetError,
};
use crate::io::SourceError;

pub use cursor_input::{parse_cursor, spawn_cursor_reader};
pub use estimator::{
    default_guide_lines, default_required_corners, BoardPoseEstimator, CursorMapper, GuideLine,
    DEFAULT_AXIS_LENGTH, DEFAULT_CURSOR_BOX,
};
pub use sink::{JsonLinesSink, OverlaySink};
pub use source::{DetectionSource, Frame, JsonLinesSource, MemorySource};

/// Recoverable, per-frame failure. The frame gets no overlay for the failed
/// computation and the loop moves on.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error(transparent)]
    Markers(#[from] MarkerSetError),
    #[error(transparent)]
    Correspondence(#[from] CorrespondenceError),
    #[error(transparent)]
    Homography(#[from] HomographyError),
    #[error(transparent)]
    Pose(#[from] PoseError),
    #[error("no cursor position has been published yet")]
    NoCursor,
}

impl FrameError {
    /// Misses that happen in normal operation (markers out of view, no cursor yet).
    pub fn is_expected_miss(&self) -> bool {
        matches!(
            self,
            FrameError::Correspondence(CorrespondenceError::MissingMarker(_))
                | FrameError::Pose(PoseError::InsufficientMarkers)
                | FrameError::NoCursor
        )
    }
}

/// Loop-ending failure.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("overlay sink failed: {0}")]
    Sink(#[from] std::io::Error),
}

/// Cursor-mode result of one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct CursorOverlay {
    pub frame: u64,
    pub markers: MarkerSet,
    /// Duplicate ids replaced under [`DuplicatePolicy::LastWins`].
    pub overwritten: Vec<MarkerId>,
    /// Reference-view cursor used for this frame.
    pub cursor: Option<Point2<f64>>,
    pub outcome: Result<Point2<f64>, FrameError>,
    pub guide_lines: Vec<(Point2<f64>, Point2<f64>)>,
    pub box_size: f64,
}

impl CursorOverlay {
    /// `[top_left, bottom_right]` of the box at the mapped cursor.
    pub fn cursor_box(&self) -> Option<[[f64; 2]; 2]> {
        let p = self.outcome.as_ref().ok()?;
        Some([[p.x, p.y], [p.x + self.box_size, p.y + self.box_size]])
    }
}

/// Pose-mode result of one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct PoseOverlay {
    pub frame: u64,
    pub markers: MarkerSet,
    pub overwritten: Vec<MarkerId>,
    pub outcome: Result<BoardPose, FrameError>,
    pub axes: Option<[Point2<f64>; 4]>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopOptions {
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
    pub duplicate_policy: DuplicatePolicy,
}

/// Frame counters of a finished loop.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSummary {
    pub frames: u64,
    pub succeeded: u64,
    /// Expected misses, see [`FrameError::is_expected_miss`].
    pub missed: u64,
    pub failed: u64,
}

impl LoopSummary {
    fn record<T>(&mut self, frame: u64, outcome: &Result<T, FrameError>) {
        match outcome {
            Ok(_) => self.succeeded += 1,
            Err(e) if e.is_expected_miss() => {
                self.missed += 1;
                log::debug!("frame {frame}: {e}");
            }
            Err(e) => {
                self.failed += 1;
                log::warn!("frame {frame}: {e}");
            }
        }
    }
}

struct FrameMarkers {
    set: MarkerSet,
    overwritten: Vec<MarkerId>,
    error: Option<FrameError>,
}

fn frame_markers(frame: &Frame, policy: DuplicatePolicy) -> FrameMarkers {
    match frame.marker_set(policy) {
        Ok((set, overwritten)) => FrameMarkers {
            set,
            overwritten,
            error: None,
        },
        Err(e) => FrameMarkers {
            set: MarkerSet::new(),
            overwritten: Vec::new(),
            error: Some(e.into()),
        },
    }
}

/// Map the latest cursor into every frame of `source`.
pub fn run_cursor_loop<S, K>(
    source: &mut S,
    mapper: &CursorMapper,
    cursor: &CursorSlot,
    sink: &mut K,
    options: &LoopOptions,
) -> Result<LoopSummary, PipelineError>
where
    S: DetectionSource + ?Sized,
    K: OverlaySink + ?Sized,
{
    let mut summary = LoopSummary::default();
    while options.max_frames.is_none_or(|max| summary.frames < max) {
        let Some(frame) = source.next_frame()? else {
            break;
        };
        summary.frames += 1;

        let position = cursor.latest();
        let markers = frame_markers(&frame, options.duplicate_policy);
        let outcome = match (markers.error, position) {
            (Some(e), _) => Err(e),
            (None, None) => Err(FrameError::NoCursor),
            (None, Some(p)) => mapper.map_frame(&markers.set, p),
        };
        summary.record(frame.index, &outcome);

        let overlay = CursorOverlay {
            frame: frame.index,
            guide_lines: mapper.guide_lines(&markers.set),
            markers: markers.set,
            overwritten: markers.overwritten,
            cursor: position,
            outcome,
            box_size: mapper.box_size(),
        };
        sink.cursor(&overlay)?;
    }

    log::info!(
        "cursor loop done: {} frames, {} mapped, {} missed, {} failed",
        summary.frames,
        summary.succeeded,
        summary.missed,
        summary.failed
    );
    Ok(summary)
}

/// Estimate the board pose in every frame of `source`.
pub fn run_pose_loop<S, K>(
    source: &mut S,
    estimator: &BoardPoseEstimator,
    sink: &mut K,
    options: &LoopOptions,
) -> Result<LoopSummary, PipelineError>
where
    S: DetectionSource + ?Sized,
    K: OverlaySink + ?Sized,
{
    let mut summary = LoopSummary::default();
    while options.max_frames.is_none_or(|max| summary.frames < max) {
        let Some(frame) = source.next_frame()? else {
            break;
        };
        summary.frames += 1;

        let markers = frame_markers(&frame, options.duplicate_policy);
        let outcome = match markers.error {
            Some(e) => Err(e),
            None => estimator.estimate_frame(&markers.set),
        };
        summary.record(frame.index, &outcome);

        let axes = outcome
            .as_ref()
            .ok()
            .and_then(|pose| estimator.project_axes(pose));
        let overlay = PoseOverlay {
            frame: frame.index,
            markers: markers.set,
            overwritten: markers.overwritten,
            outcome,
            axes,
        };
        sink.pose(&overlay)?;
    }

    log::info!(
        "pose loop done: {} frames, {} posed, {} missed, {} failed",
        summary.frames,
        summary.succeeded,
        summary.missed,
        summary.failed
    );
    Ok(summary)
}
