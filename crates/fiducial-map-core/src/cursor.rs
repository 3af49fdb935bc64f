//! Single-slot cursor handoff between an input handler and the frame loop.

use std::sync::Arc;

use nalgebra::Point2;
use parking_lot::Mutex;

/// Latest cursor position in reference-image coordinates.
///
/// Clones share the same slot. Writers overwrite, readers see the most recent
/// value; there is no queue and no waiting beyond the short critical section.
#[derive(Clone, Debug, Default)]
pub struct CursorSlot {
    inner: Arc<Mutex<Option<Point2<f64>>>>,
}

impl CursorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot pre-filled with an initial position.
    pub fn with_position(position: Point2<f64>) -> Self {
        let slot = Self::new();
        slot.publish(position);
        slot
    }

    /// Replace the stored position. Non-finite positions are ignored.
    pub fn publish(&self, position: Point2<f64>) {
        if !(position.x.is_finite() && position.y.is_finite()) {
            log::debug!("ignoring non-finite cursor position {position:?}");
            return;
        }
        *self.inner.lock() = Some(position);
    }

    /// Last published position, `None` before the first publish.
    pub fn latest(&self) -> Option<Point2<f64>> {
        *self.inner.lock()
    }

    pub fn clear(&self) {
        *self.inner.lock() = None;
    }
}
