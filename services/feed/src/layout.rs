//! Viewport geometry for a feed of full-height items.
//!
//! Item `i` occupies `[i * h, (i + 1) * h)` where `h` is the viewport height.

/// Visible window over the feed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub height: f64,
    pub scroll_top: f64,
}

impl Viewport {
    pub fn new(height: f64) -> Self {
        Self {
            height,
            scroll_top: 0.0,
        }
    }

    pub fn content_height(&self, items: usize) -> f64 {
        items as f64 * self.height
    }

    pub fn max_scroll(&self, items: usize) -> f64 {
        (self.content_height(items) - self.height).max(0.0)
    }

    /// Scroll by `dy`, clamped to the content. Returns the distance moved.
    pub fn scroll_by(&mut self, dy: f64, items: usize) -> f64 {
        let before = self.scroll_top;
        self.scroll_top = (self.scroll_top + dy).clamp(0.0, self.max_scroll(items));
        self.scroll_top - before
    }

    /// Fraction of item `index` inside the viewport
    pub fn visible_ratio(&self, index: usize) -> f64 {
        if self.height <= 0.0 {
            return 0.0;
        }
        let top = index as f64 * self.height;
        overlap(top, top + self.height, self.scroll_top, self.scroll_top + self.height) / self.height
    }

    /// Whether item `index` touches the viewport grown by `margin` viewport
    /// heights above and below
    pub fn within_margin(&self, index: usize, margin: f64) -> bool {
        let top = index as f64 * self.height;
        let grow = margin * self.height;
        overlap(
            top,
            top + self.height,
            self.scroll_top - grow,
            self.scroll_top + self.height + grow,
        ) > 0.0
    }

    /// Within half a viewport of the end of the content
    pub fn near_bottom(&self, items: usize) -> bool {
        self.scroll_top + self.height >= self.content_height(items) - self.height / 2.0
    }
}

fn overlap(a_start: f64, a_end: f64, b_start: f64, b_end: f64) -> f64 {
    (a_end.min(b_end) - a_start.max(b_start)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visible_ratio() {
        let mut viewport = Viewport::new(100.0);
        assert_eq!(viewport.visible_ratio(0), 1.0);
        assert_eq!(viewport.visible_ratio(1), 0.0);

        viewport.scroll_top = 25.0;
        assert_eq!(viewport.visible_ratio(0), 0.75);
        assert_eq!(viewport.visible_ratio(1), 0.25);
    }

    #[test]
    fn test_margin_reaches_half_a_viewport() {
        let mut viewport = Viewport::new(100.0);
        assert!(viewport.within_margin(0, 0.5));
        assert!(viewport.within_margin(1, 0.5));
        assert!(!viewport.within_margin(2, 0.5));

        viewport.scroll_top = 300.0;
        assert!(!viewport.within_margin(1, 0.5));
        assert!(viewport.within_margin(2, 0.5));
        assert!(viewport.within_margin(4, 0.5));
        assert!(!viewport.within_margin(5, 0.5));
    }

    #[test]
    fn test_scroll_is_clamped() {
        let mut viewport = Viewport::new(100.0);
        assert_eq!(viewport.scroll_by(-100.0, 5), 0.0);
        assert_eq!(viewport.scroll_by(100.0, 5), 100.0);
        assert_eq!(viewport.scroll_by(1000.0, 5), 300.0);
        assert_eq!(viewport.scroll_top, 400.0);
    }

    #[test]
    fn test_near_bottom() {
        let mut viewport = Viewport::new(100.0);
        assert!(!viewport.near_bottom(5));
        viewport.scroll_top = 300.0;
        assert!(!viewport.near_bottom(5));
        viewport.scroll_top = 350.0;
        assert!(viewport.near_bottom(5));
    }
}
