use uuid::Uuid;

pub const DEFAULT_FONT_SIZE: f64 = 24.0;
pub const MIN_FONT_SIZE: f64 = 12.0;
pub const MAX_FONT_SIZE: f64 = 64.0;

/// Step used by the +/- controls.
pub const FONT_SIZE_STEP: f64 = 2.0;

/// A text label floating over the canvas. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub id: Uuid,
    pub text: String,
    pub font_size: f64,
    pub x: f64,
    pub y: f64,
    pub selected: bool,
}

/// Client-local annotations, discarded with the overlay.
#[derive(Debug, Default)]
pub struct AnnotationOverlay {
    items: Vec<Annotation>,
}

impl AnnotationOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.items
    }

    pub fn get(&self, id: Uuid) -> Option<&Annotation> {
        self.items.iter().find(|a| a.id == id)
    }

    /// Place a new label at the origin. Blank text adds nothing.
    pub fn add(&mut self, text: &str) -> Option<Uuid> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let id = Uuid::new_v4();
        self.items.push(Annotation {
            id,
            text: text.to_string(),
            font_size: DEFAULT_FONT_SIZE,
            x: 0.0,
            y: 0.0,
            selected: false,
        });
        Some(id)
    }

    /// Select one label; every other label is deselected.
    pub fn select(&mut self, id: Uuid) {
        for item in &mut self.items {
            item.selected = item.id == id;
        }
    }

    /// Tap on the bare canvas.
    pub fn deselect_all(&mut self) {
        for item in &mut self.items {
            item.selected = false;
        }
    }

    pub fn remove(&mut self, id: Uuid) {
        self.items.retain(|a| a.id != id);
    }

    pub fn resize(&mut self, id: Uuid, delta: f64) {
        if let Some(item) = self.items.iter_mut().find(|a| a.id == id) {
            item.font_size = (item.font_size + delta).clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
        }
    }

    /// Move a label by a drag delta. Only the selected label moves.
    pub fn drag(&mut self, id: Uuid, dx: f64, dy: f64) {
        if let Some(item) = self.items.iter_mut().find(|a| a.id == id && a.selected) {
            item.x += dx;
            item.y += dy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_ignores_blank_text() {
        let mut overlay = AnnotationOverlay::new();
        assert!(overlay.add("   ").is_none());
        let id = overlay.add("  te quiero ").unwrap();
        let a = overlay.get(id).unwrap();
        assert_eq!(a.text, "te quiero");
        assert_eq!(a.font_size, DEFAULT_FONT_SIZE);
        assert!(!a.selected);
    }

    #[test]
    fn font_size_is_clamped() {
        let mut overlay = AnnotationOverlay::new();
        let id = overlay.add("hi").unwrap();
        for _ in 0..40 {
            overlay.resize(id, FONT_SIZE_STEP);
        }
        assert_eq!(overlay.get(id).unwrap().font_size, MAX_FONT_SIZE);
        for _ in 0..40 {
            overlay.resize(id, -FONT_SIZE_STEP);
        }
        assert_eq!(overlay.get(id).unwrap().font_size, MIN_FONT_SIZE);
    }

    #[test]
    fn selection_is_exclusive_and_gates_drag() {
        let mut overlay = AnnotationOverlay::new();
        let a = overlay.add("a").unwrap();
        let b = overlay.add("b").unwrap();

        overlay.drag(a, 10.0, 10.0);
        assert_eq!(overlay.get(a).unwrap().x, 0.0);

        overlay.select(a);
        overlay.select(b);
        assert!(!overlay.get(a).unwrap().selected);
        assert!(overlay.get(b).unwrap().selected);

        overlay.drag(b, 5.0, -3.0);
        let moved = overlay.get(b).unwrap();
        assert_eq!((moved.x, moved.y), (5.0, -3.0));

        overlay.deselect_all();
        assert!(overlay.annotations().iter().all(|a| !a.selected));

        overlay.remove(a);
        assert_eq!(overlay.annotations().len(), 1);
    }
}
