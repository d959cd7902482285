use std::fmt::Write as _;

use tracing::{debug, error};
use uuid::Uuid;

use duo_types::api::CommitStrokeRequest;
use duo_types::models::{DEFAULT_STROKE_WIDTH, MAX_STROKE_WIDTH, MIN_STROKE_WIDTH, Point};

use crate::http::DuoClient;

/// Colors offered by the canvas toolbar.
pub const PALETTE: [&str; 10] = [
    "#000000", "#FF0000", "#0000FF", "#00FF00", "#FFFF00", "#FF00FF", "#00FFFF", "#FFA500",
    "#800080", "#FFFFFF",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Brush {
    color: String,
    width: f64,
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            color: PALETTE[0].to_string(),
            width: DEFAULT_STROKE_WIDTH,
        }
    }
}

impl Brush {
    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn set_color(&mut self, color: impl Into<String>) {
        self.color = color.into();
    }

    /// Clamped to the widths the canvas accepts.
    pub fn set_width(&mut self, width: f64) {
        self.width = width.clamp(MIN_STROKE_WIDTH, MAX_STROKE_WIDTH);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
}

/// Freehand gesture recorder. One finished gesture becomes one stroke write.
#[derive(Debug)]
pub struct StrokeCapture {
    state: CaptureState,
    points: Vec<Point>,
    brush: Brush,
}

impl Default for StrokeCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl StrokeCapture {
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            points: Vec::new(),
            brush: Brush::default(),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// The in-progress gesture, for local rendering.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn brush(&self) -> &Brush {
        &self.brush
    }

    pub fn brush_mut(&mut self) -> &mut Brush {
        &mut self.brush
    }

    pub fn begin(&mut self, at: Point) {
        self.state = CaptureState::Capturing;
        self.points.clear();
        self.points.push(at);
    }

    /// Movement sample; ignored unless a gesture is in progress.
    pub fn sample(&mut self, at: Point) {
        if self.state == CaptureState::Capturing {
            self.points.push(at);
        }
    }

    /// Close the gesture. Returns the stroke to write, if it has any points.
    /// The local points are cleared either way.
    pub fn finish(&mut self) -> Option<CommitStrokeRequest> {
        self.state = CaptureState::Idle;
        let points = std::mem::take(&mut self.points);
        if points.is_empty() {
            return None;
        }
        Some(CommitStrokeRequest {
            points,
            color: self.brush.color.clone(),
            width: self.brush.width,
        })
    }

    /// Close the gesture and write it. A failed write is logged and dropped;
    /// the rendered canvas only changes when the next snapshot arrives.
    pub async fn end(&mut self, client: &DuoClient, room_id: Uuid) {
        let Some(stroke) = self.finish() else {
            return;
        };
        match client.commit_stroke(room_id, &stroke).await {
            Ok(saved) => debug!("Stroke {} committed ({} points)", saved.id, saved.points.len()),
            Err(e) => error!("Stroke commit to room {} failed: {}", room_id, e),
        }
    }
}

/// SVG path data for a stroke: `M x0 y0 L x0 y0 L x1 y1 ...`.
///
/// The first point is repeated as a line so a single tap renders as a dot.
pub fn svg_path(points: &[Point]) -> String {
    let Some(first) = points.first() else {
        return String::new();
    };
    let mut path = format!("M {} {}", first.x, first.y);
    for p in points {
        let _ = write!(path, " L {} {}", p.x, p.y);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_samples_are_ignored() {
        let mut capture = StrokeCapture::new();
        capture.sample(Point::new(1.0, 1.0));
        assert!(capture.points().is_empty());
        assert!(capture.finish().is_none());
    }

    #[test]
    fn gesture_produces_one_stroke() {
        let mut capture = StrokeCapture::new();
        capture.brush_mut().set_color("#FF0000");
        capture.brush_mut().set_width(50.0);

        capture.begin(Point::new(0.0, 0.0));
        capture.sample(Point::new(1.0, 2.0));
        capture.sample(Point::new(3.0, 4.0));
        assert_eq!(capture.state(), CaptureState::Capturing);

        let stroke = capture.finish().unwrap();
        assert_eq!(stroke.points.len(), 3);
        assert_eq!(stroke.color, "#FF0000");
        assert_eq!(stroke.width, MAX_STROKE_WIDTH);
        assert_eq!(capture.state(), CaptureState::Idle);
        assert!(capture.points().is_empty());

        // Samples after the gesture ended go nowhere.
        capture.sample(Point::new(9.0, 9.0));
        assert!(capture.finish().is_none());
    }

    #[tokio::test]
    async fn failed_write_still_clears() {
        // Nothing listens on the discard port.
        let client = DuoClient::with_token("http://127.0.0.1:9", "token");
        let mut capture = StrokeCapture::new();
        capture.begin(Point::new(0.0, 0.0));
        capture.sample(Point::new(1.0, 1.0));

        capture.end(&client, Uuid::new_v4()).await;

        assert!(capture.points().is_empty());
        assert_eq!(capture.state(), CaptureState::Idle);
    }

    #[test]
    fn path_data() {
        assert_eq!(svg_path(&[]), "");
        assert_eq!(
            svg_path(&[Point::new(1.0, 2.0), Point::new(3.5, 4.0)]),
            "M 1 2 L 1 2 L 3.5 4"
        );
    }
}
