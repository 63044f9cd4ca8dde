//! Viewport windowing
//!
//! `WindowState` decides which slice of a long list is inside the scroll
//! viewport and how much padding stands in for the items above and below it.
//! All lengths are in pixels (or any other unit the caller measures in).
//!
//! An item counts as hidden above the viewport only while its bottom edge is
//! strictly above the scroll offset. The visible window starts at the first
//! item that is not hidden and extends until the accumulated height of the
//! window reaches the viewport height, so a partially visible last item is
//! always included.

use std::ops::Range;

use crate::height::HeightModel;

/// The derived part of a `WindowState`
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WindowSnapshot {
    pub visible_index_top: usize,
    pub visible_length: usize,
    pub padding_top: f64,
    pub padding_bottom: f64,
}

#[derive(Clone, Debug, Default)]
pub struct WindowState {
    length: usize,
    viewport_height: f64,
    scroll_top: f64,
    heights: HeightModel,

    visible_index_top: usize,
    visible_length: usize,
    padding_top: f64,
    padding_bottom: f64,
}

impl WindowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor that also runs the initial full calculation
    pub fn with_dimensions(length: usize, viewport_height: f64, default_height: f64) -> Self {
        let mut state = Self {
            length,
            viewport_height: clamp_px(viewport_height),
            heights: HeightModel::new(default_height),
            ..Self::default()
        };
        state.calculate_visible_indices();
        state
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn viewport_height(&self) -> f64 {
        self.viewport_height
    }

    pub fn default_height(&self) -> f64 {
        self.heights.default_height()
    }

    pub fn scroll_top(&self) -> f64 {
        self.scroll_top
    }

    pub fn visible_index_top(&self) -> usize {
        self.visible_index_top
    }

    pub fn visible_length(&self) -> usize {
        self.visible_length
    }

    pub fn padding_top(&self) -> f64 {
        self.padding_top
    }

    pub fn padding_bottom(&self) -> f64 {
        self.padding_bottom
    }

    pub fn heights(&self) -> &HeightModel {
        &self.heights
    }

    /// Indices currently inside the window
    pub fn visible_range(&self) -> Range<usize> {
        self.visible_index_top..self.visible_index_top + self.visible_length
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            visible_index_top: self.visible_index_top,
            visible_length: self.visible_length,
            padding_top: self.padding_top,
            padding_bottom: self.padding_bottom,
        }
    }

    /// Estimated height of the whole list
    pub fn content_height(&self) -> f64 {
        self.heights.sum(0, self.length)
    }

    /// Offset of the top edge of `index` from the top of the list
    pub fn offset_of(&self, index: usize) -> f64 {
        self.heights.sum(0, index.min(self.length))
    }

    pub fn item_height(&self, index: usize) -> f64 {
        self.heights.get_height(index)
    }

    /// Change the item count and recompute from scratch. Measurements past
    /// a shrunken length are dropped.
    pub fn set_length(&mut self, length: usize) {
        if length < self.length {
            self.heights.truncate(length);
        }
        self.length = length;
        self.calculate_visible_indices();
    }

    pub fn set_viewport_height(&mut self, px: f64) {
        self.viewport_height = clamp_px(px);
        self.calculate_visible_indices();
    }

    pub fn set_default_height(&mut self, px: f64) {
        self.heights.set_default_height(px);
        self.calculate_visible_indices();
    }

    /// Drop all measurements and fall back to estimates
    pub fn reset_heights(&mut self) {
        self.heights.clear();
        self.calculate_visible_indices();
    }

    /// Full recomputation from the scroll offset, item count, viewport
    /// height and height model. O(length).
    pub fn calculate_visible_indices(&mut self) {
        let mut visible_index_top = 0;
        let mut padding_top = 0.0;
        while visible_index_top < self.length {
            let height = self.heights.get_height(visible_index_top);
            if padding_top + height < self.scroll_top {
                padding_top += height;
                visible_index_top += 1;
            } else {
                break;
            }
        }
        self.visible_index_top = visible_index_top;
        self.padding_top = padding_top;
        self.visible_length = self.fill_viewport(visible_index_top);
        self.padding_bottom = self
            .heights
            .sum(self.visible_index_top + self.visible_length, self.length);

        tracing::trace!(
            length = self.length,
            scroll_top = self.scroll_top,
            top = self.visible_index_top,
            visible = self.visible_length,
            "window recomputed"
        );
    }

    /// Move the scroll offset and adjust the window incrementally.
    ///
    /// Work is proportional to the number of items that crossed the window
    /// edges, and the result equals what `calculate_visible_indices` would
    /// produce for the same offset.
    pub fn update_scroll_position(&mut self, scroll_top: f64) {
        let scroll_top = clamp_px(scroll_top);
        if scroll_top == self.scroll_top {
            return;
        }
        self.scroll_top = scroll_top;

        let prev_end = self.visible_index_top + self.visible_length;

        // scrolled up: reveal items whose bottom edge is no longer above the offset
        while self.visible_index_top > 0 && self.padding_top >= scroll_top {
            self.visible_index_top -= 1;
            self.padding_top -= self.heights.get_height(self.visible_index_top);
        }
        if self.visible_index_top == 0 {
            self.padding_top = 0.0;
        }

        // scrolled down: hide items that moved fully above the offset
        while self.visible_index_top < self.length {
            let height = self.heights.get_height(self.visible_index_top);
            if self.padding_top + height < scroll_top {
                self.padding_top += height;
                self.visible_index_top += 1;
            } else {
                break;
            }
        }

        self.visible_length = self.fill_viewport(self.visible_index_top);

        let end = self.visible_index_top + self.visible_length;
        if end < prev_end {
            self.padding_bottom += self.heights.sum(end, prev_end);
        } else if end > prev_end {
            self.padding_bottom -= self.heights.sum(prev_end, end);
        }
        if end >= self.length {
            self.padding_bottom = 0.0;
        }
    }

    /// Record a measured height and recompute from scratch
    pub fn update_height_at_index(&mut self, index: usize, px: f64) {
        self.heights.set_height(index, px);
        self.calculate_visible_indices();
    }

    /// Number of items from `start` needed to cover the viewport
    fn fill_viewport(&self, start: usize) -> usize {
        let mut visible_length = 0;
        let mut visible_height = 0.0;
        while start + visible_length < self.length && visible_height < self.viewport_height {
            visible_height += self.heights.get_height(start + visible_length);
            visible_length += 1;
        }
        visible_length
    }
}

fn clamp_px(px: f64) -> f64 {
    debug_assert!(!px.is_nan(), "NaN length");
    if px.is_finite() && px > 0.0 { px } else { 0.0 }
}
