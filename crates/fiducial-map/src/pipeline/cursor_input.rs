use std::io::BufRead;
use std::thread::{self, JoinHandle};

use nalgebra::Point2;

use crate::core::CursorSlot;

/// Parse `"x,y"` or `"x y"`.
pub fn parse_cursor(text: &str) -> Option<Point2<f64>> {
    let mut parts = text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty());
    let x = parts.next()?.parse::<f64>().ok()?;
    let y = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() || !x.is_finite() || !y.is_finite() {
        return None;
    }
    Some(Point2::new(x, y))
}

/// Publish every parseable line of `reader` into `slot` from a background thread.
///
/// The thread ends at end of input. Unparseable lines are logged and skipped.
pub fn spawn_cursor_reader<R>(reader: R, slot: CursorSlot) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        for line in reader.lines() {
            let Ok(line) = line else {
                break;
            };
            match parse_cursor(&line) {
                Some(p) => slot.publish(p),
                None if line.trim().is_empty() => {}
                None => log::warn!("ignoring cursor input {line:?}"),
            }
        }
    })
}
