//! Item height bookkeeping for windowed lists
//!
//! Heights are keyed by list position. A measurement recorded for index `i`
//! stays attached to `i` even if the underlying items reorder; the next
//! measurement of that slot overwrites it.

use std::collections::BTreeMap;

/// Measured or estimated pixel heights, indexed by list position.
#[derive(Clone, Debug, Default)]
pub struct HeightModel {
    default_height: f64,
    heights: BTreeMap<usize, f64>,
}

impl HeightModel {
    pub fn new(default_height: f64) -> Self {
        Self {
            default_height: sanitize(default_height),
            heights: BTreeMap::new(),
        }
    }

    /// Estimate used for indices that were never measured
    pub fn default_height(&self) -> f64 {
        self.default_height
    }

    pub fn set_default_height(&mut self, px: f64) {
        self.default_height = sanitize(px);
    }

    /// Measured height if present, otherwise the default estimate
    pub fn get_height(&self, index: usize) -> f64 {
        self.heights
            .get(&index)
            .copied()
            .unwrap_or(self.default_height)
    }

    /// Measured height only
    pub fn measured(&self, index: usize) -> Option<f64> {
        self.heights.get(&index).copied()
    }

    /// Record (or overwrite) the measurement for `index`.
    ///
    /// Aggregates derived from heights are owned by the caller and must be
    /// recomputed after this call.
    pub fn set_height(&mut self, index: usize, px: f64) {
        self.heights.insert(index, sanitize(px));
    }

    /// Sum of heights over `start..=end_inclusive`; zero for an empty range.
    pub fn sum_range(&self, start: usize, end_inclusive: usize) -> f64 {
        if start > end_inclusive {
            return 0.0;
        }
        (start..=end_inclusive).map(|i| self.get_height(i)).sum()
    }

    /// Sum of heights over the half-open range `start..end`.
    pub fn sum(&self, start: usize, end: usize) -> f64 {
        (start..end).map(|i| self.get_height(i)).sum()
    }

    pub fn measured_count(&self) -> usize {
        self.heights.len()
    }

    /// Forget every measurement (estimates remain)
    pub fn clear(&mut self) {
        self.heights.clear();
    }

    /// Drop measurements at or past `len`
    pub fn truncate(&mut self, len: usize) {
        self.heights.split_off(&len);
    }
}

/// Steps per pixel of the grid heights are snapped to. Sums and differences
/// of grid values are exact in `f64`, so padding adjusted by deltas always
/// equals padding summed from the start of the list.
const GRID: f64 = 64.0;

/// Snap a height onto the 1/64 px grid
pub fn quantize(px: f64) -> f64 {
    (px * GRID).round() / GRID
}

fn sanitize(px: f64) -> f64 {
    debug_assert!(px.is_finite() && px >= 0.0, "invalid height: {px}");
    if px.is_finite() && px > 0.0 { quantize(px) } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_until_measured() {
        let mut model = HeightModel::new(100.0);
        assert_eq!(model.get_height(3), 100.0);
        assert_eq!(model.measured(3), None);

        model.set_height(3, 42.0);
        assert_eq!(model.get_height(3), 42.0);
        assert_eq!(model.measured(3), Some(42.0));

        model.set_height(3, 50.0);
        assert_eq!(model.get_height(3), 50.0);
        assert_eq!(model.measured_count(), 1);
    }

    #[test]
    fn test_zero_measurement_is_kept() {
        let mut model = HeightModel::new(100.0);
        model.set_height(0, 0.0);
        assert_eq!(model.get_height(0), 0.0);
    }

    #[test]
    fn test_fractional_heights_are_snapped() {
        let mut model = HeightModel::new(10.1);
        assert_eq!(model.default_height(), quantize(10.1));

        model.set_height(0, 17.4);
        model.set_height(1, 0.3);
        let sum = model.sum(0, 3);
        assert_eq!(sum, quantize(17.4) + quantize(0.3) + quantize(10.1));
        // deltas undo exactly
        assert_eq!(sum - model.get_height(0) - model.get_height(1), model.get_height(2));
    }

    #[test]
    fn test_sum_range() {
        let mut model = HeightModel::new(10.0);
        model.set_height(1, 25.0);

        assert_eq!(model.sum_range(0, 2), 45.0);
        assert_eq!(model.sum_range(1, 1), 25.0);
        assert_eq!(model.sum_range(5, 2), 0.0);
        assert_eq!(model.sum(0, 0), 0.0);
        assert_eq!(model.sum(0, 3), 45.0);
    }

    #[test]
    fn test_truncate_and_clear() {
        let mut model = HeightModel::new(10.0);
        model.set_height(1, 1.0);
        model.set_height(5, 5.0);

        model.truncate(3);
        assert_eq!(model.measured(1), Some(1.0));
        assert_eq!(model.measured(5), None);

        model.clear();
        assert_eq!(model.measured_count(), 0);
    }
}
