use std::io::{self, Write};

use serde::Serialize;

use super::{CursorOverlay, PoseOverlay};
use crate::io::{CursorReport, PoseReport};

/// Rendering collaborator. Receives one overlay per processed frame.
pub trait OverlaySink {
    fn cursor(&mut self, overlay: &CursorOverlay) -> io::Result<()>;
    fn pose(&mut self, overlay: &PoseOverlay) -> io::Result<()>;
}

/// Writes one JSON report per frame and line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, value)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

impl<W: Write> OverlaySink for JsonLinesSink<W> {
    fn cursor(&mut self, overlay: &CursorOverlay) -> io::Result<()> {
        self.write_line(&CursorReport::from(overlay))
    }

    fn pose(&mut self, overlay: &PoseOverlay) -> io::Result<()> {
        self.write_line(&PoseReport::from(overlay))
    }
}
