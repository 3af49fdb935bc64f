use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::core::{DuplicatePolicy, Marker, MarkerId, MarkerSet, MarkerSetError};
use crate::io::{FrameRecord, MarkerRecord, SourceError};

/// Raw detector output for one frame.
///
/// Detections are kept as a list so the duplicate-id policy is applied by
/// the pipeline, not by the source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    pub index: u64,
    pub detections: Vec<Marker>,
}

impl Frame {
    pub fn new(index: u64, detections: Vec<Marker>) -> Self {
        Self { index, detections }
    }

    /// Build the frame's marker set; also returns the ids overwritten
    /// under [`DuplicatePolicy::LastWins`].
    pub fn marker_set(
        &self,
        policy: DuplicatePolicy,
    ) -> Result<(MarkerSet, Vec<MarkerId>), MarkerSetError> {
        MarkerSet::with_policy(self.detections.iter().copied(), policy)
    }
}

/// Pull-based frame supply (video source + fiducial detector).
pub trait DetectionSource {
    /// Next frame, `Ok(None)` at end of stream. Blocks until a frame is available.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

/// Replays detections stored as one JSON [`FrameRecord`] per line.
pub struct JsonLinesSource<R> {
    reader: R,
    origin: PathBuf,
    line: usize,
    next_index: u64,
    buf: String,
}

impl JsonLinesSource<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| SourceError::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufReader::new(file), path))
    }
}

impl<R: BufRead> JsonLinesSource<R> {
    /// `origin` names the stream in diagnostics.
    pub fn new(reader: R, origin: impl Into<PathBuf>) -> Self {
        Self {
            reader,
            origin: origin.into(),
            line: 0,
            next_index: 0,
            buf: String::new(),
        }
    }
}

impl<R: BufRead> DetectionSource for JsonLinesSource<R> {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        loop {
            self.buf.clear();
            let n = self.reader.read_line(&mut self.buf).map_err(|source| {
                SourceError::SourceUnavailable {
                    path: self.origin.clone(),
                    source,
                }
            })?;
            if n == 0 {
                return Ok(None);
            }
            self.line += 1;

            let text = self.buf.trim();
            if text.is_empty() {
                continue;
            }
            let record: FrameRecord =
                serde_json::from_str(text).map_err(|e| SourceError::Malformed {
                    context: format!("{}:{}", self.origin.display(), self.line),
                    reason: e.to_string(),
                })?;

            let index = record.frame.unwrap_or(self.next_index);
            self.next_index = index.saturating_add(1);
            let detections = record.markers.iter().map(MarkerRecord::to_marker).collect();
            return Ok(Some(Frame::new(index, detections)));
        }
    }
}

/// Frames held in memory, handed out in order.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    frames: VecDeque<Frame>,
}

impl MemorySource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl DetectionSource for MemorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        Ok(self.frames.pop_front())
    }
}
