//! # Multi-Point Calibration Table
//!
//! Piecewise-linear mapping between raw controller readouts and true
//! antenna headings.
//!
//! Potentiometer-fed controllers drift non-linearly across their travel,
//! so a single scale factor leaves several degrees of error at some
//! headings. A table of measured `(raw, actual)` pairs fixes that: values
//! between two measured points are linearly interpolated, and values
//! outside the measured span are extrapolated along the slope of the
//! nearest edge segment.
//!
//! A table needs at least [`MIN_CALIBRATION_POINTS`] entries to define a
//! segment; below that every conversion returns `None` and callers fall
//! back to plain linear calibration.

use serde::{Deserialize, Serialize};

/// Minimum number of points needed to interpolate
pub const MIN_CALIBRATION_POINTS: usize = 2;

/// One measured correspondence between controller readout and true heading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    /// Raw value reported by the controller
    pub raw: f64,
    /// True antenna position in degrees at that readout
    pub actual: f64,
}

/// A set of calibration points, kept sorted by raw value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationTable {
    points: Vec<CalibrationPoint>,
}

impl CalibrationTable {
    /// Build a table from measured points.
    ///
    /// Points may arrive in any order; they are sorted by raw value.
    ///
    /// # Examples
    ///
    /// ```
    /// use rotor_bridge::calibration::{CalibrationPoint, CalibrationTable};
    ///
    /// let table = CalibrationTable::new(vec![
    ///     CalibrationPoint { raw: 2.0, actual: 0.0 },
    ///     CalibrationPoint { raw: 225.0, actual: 450.0 },
    /// ]);
    /// assert!(table.is_usable());
    /// ```
    #[must_use]
    pub fn new(mut points: Vec<CalibrationPoint>) -> Self {
        points.sort_by(|a, b| a.raw.total_cmp(&b.raw));
        Self { points }
    }

    /// Number of points in the table
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the table holds no points at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether the table holds enough points to interpolate
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.points.len() >= MIN_CALIBRATION_POINTS
    }

    /// Convert a raw controller readout to a true heading.
    ///
    /// # Returns
    ///
    /// * `Option<f64>` - `None` if the table has fewer than two points
    #[must_use]
    pub fn to_actual(&self, raw: f64) -> Option<f64> {
        let pts: Vec<(f64, f64)> = self.points.iter().map(|p| (p.raw, p.actual)).collect();
        interpolate_sorted(raw, &pts)
    }

    /// Convert a true heading back to the raw value to command.
    ///
    /// # Returns
    ///
    /// * `Option<f64>` - `None` if the table has fewer than two points
    #[must_use]
    pub fn to_raw(&self, actual: f64) -> Option<f64> {
        let mut pts: Vec<(f64, f64)> = self.points.iter().map(|p| (p.actual, p.raw)).collect();
        pts.sort_by(|a, b| a.0.total_cmp(&b.0));
        interpolate_sorted(actual, &pts)
    }
}

/// Piecewise-linear lookup over `(key, value)` pairs sorted by key.
///
/// Inside the span, interpolates within the bracketing segment. Outside,
/// extrapolates along the first or last segment. NaN keys find no segment
/// and yield `None`.
fn interpolate_sorted(x: f64, pts: &[(f64, f64)]) -> Option<f64> {
    if pts.len() < MIN_CALIBRATION_POINTS {
        return None;
    }

    let first = pts[0];
    let last = pts[pts.len() - 1];
    if x <= first.0 {
        return Some(project(x, first, pts[1]));
    }
    if x >= last.0 {
        return Some(project(x, pts[pts.len() - 2], last));
    }

    for window in pts.windows(2) {
        let (lo, hi) = (window[0], window[1]);
        if x >= lo.0 && x <= hi.0 {
            return Some(project(x, lo, hi));
        }
    }
    None
}

/// Value of the line through `a` and `b` at `x`.
///
/// A degenerate segment (both keys equal) answers with `a`'s value rather
/// than dividing by zero.
#[inline]
fn project(x: f64, a: (f64, f64), b: (f64, f64)) -> f64 {
    let span = b.0 - a.0;
    if span.abs() < f64::EPSILON {
        return a.1;
    }
    a.1 + (x - a.0) * (b.1 - a.1) / span
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Measured data from a real motor/potentiometer pair: the controller
    /// under-reports by roughly half, and not quite linearly.
    fn bench_table() -> CalibrationTable {
        CalibrationTable::new(vec![
            CalibrationPoint { raw: 2.0, actual: 0.0 },
            CalibrationPoint { raw: 24.0, actual: 45.0 },
            CalibrationPoint { raw: 31.0, actual: 60.0 },
            CalibrationPoint { raw: 47.0, actual: 90.0 },
            CalibrationPoint { raw: 92.0, actual: 180.0 },
            CalibrationPoint { raw: 115.0, actual: 225.0 },
            CalibrationPoint { raw: 138.0, actual: 270.0 },
            CalibrationPoint { raw: 182.0, actual: 360.0 },
            CalibrationPoint { raw: 211.0, actual: 420.0 },
            CalibrationPoint { raw: 225.0, actual: 450.0 },
        ])
    }

    #[test]
    fn test_interpolation_exact_points() {
        let table = bench_table();
        for point in [
            (2.0, 0.0),
            (24.0, 45.0),
            (31.0, 60.0),
            (47.0, 90.0),
            (92.0, 180.0),
            (115.0, 225.0),
            (138.0, 270.0),
            (182.0, 360.0),
            (211.0, 420.0),
            (225.0, 450.0),
        ] {
            let result = table.to_actual(point.0).unwrap();
            assert!(
                (result - point.1).abs() < 0.1,
                "raw={} expected={} got={}",
                point.0,
                point.1,
                result
            );
        }
    }

    #[test]
    fn test_interpolation_between_points() {
        let table = bench_table();
        // Between raw 24 (45 deg) and raw 31 (60 deg)
        let result = table.to_actual(27.5).unwrap();
        let expected = 45.0 + (27.5 - 24.0) / (31.0 - 24.0) * (60.0 - 45.0);
        assert!((result - expected).abs() < 0.1);
    }

    #[test]
    fn test_extrapolation_below_span() {
        let table = bench_table();
        // Below raw=2 the first segment's slope (45/22 per unit) continues,
        // so raw=0 lands slightly negative
        let result = table.to_actual(0.0).unwrap();
        assert!(result < 0.0);
    }

    #[test]
    fn test_extrapolation_above_span() {
        let table = bench_table();
        // Above raw=225 the last segment's slope (30/14 per unit) continues
        let result = table.to_actual(230.0).unwrap();
        assert!(result > 450.0);
    }

    #[test]
    fn test_inverse_exact_points() {
        let table = bench_table();
        for point in [(0.0, 2.0), (90.0, 47.0), (225.0, 115.0), (450.0, 225.0)] {
            let result = table.to_raw(point.0).unwrap();
            assert!(
                (result - point.1).abs() < 0.1,
                "actual={} expected={} got={}",
                point.0,
                point.1,
                result
            );
        }
    }

    #[test]
    fn test_inverse_between_points() {
        let table = bench_table();
        // Halfway between 45 and 60 degrees maps halfway between raw 24 and 31
        let result = table.to_raw(52.5).unwrap();
        let expected = 24.0 + (52.5 - 45.0) / (60.0 - 45.0) * (31.0 - 24.0);
        assert!((result - expected).abs() < 0.1);
    }

    #[test]
    fn test_round_trip() {
        let table = bench_table();
        for raw in [2.0, 24.0, 47.0, 92.0, 182.0, 225.0] {
            let actual = table.to_actual(raw).unwrap();
            let back = table.to_raw(actual).unwrap();
            assert!(
                (back - raw).abs() < 0.5,
                "round trip drifted: {} -> {} -> {}",
                raw,
                actual,
                back
            );
        }
    }

    #[test]
    fn test_insufficient_points() {
        let empty = CalibrationTable::new(vec![]);
        assert!(!empty.is_usable());
        assert!(empty.to_actual(50.0).is_none());
        assert!(empty.to_raw(50.0).is_none());

        let single = CalibrationTable::new(vec![CalibrationPoint { raw: 24.0, actual: 45.0 }]);
        assert!(!single.is_usable());
        assert!(single.to_actual(50.0).is_none());

        let pair = CalibrationTable::new(vec![
            CalibrationPoint { raw: 24.0, actual: 45.0 },
            CalibrationPoint { raw: 92.0, actual: 180.0 },
        ]);
        assert!(pair.is_usable());
        assert!(pair.to_actual(50.0).is_some());
    }

    #[test]
    fn test_points_sorted_on_construction() {
        let table = CalibrationTable::new(vec![
            CalibrationPoint { raw: 225.0, actual: 450.0 },
            CalibrationPoint { raw: 2.0, actual: 0.0 },
            CalibrationPoint { raw: 92.0, actual: 180.0 },
        ]);
        // Interpolation inside the middle segment works despite the
        // shuffled input order
        let result = table.to_actual(47.0).unwrap();
        assert!(result > 0.0 && result < 180.0);
    }

    #[test]
    fn test_readout_offset_at_span_edges() {
        let table = bench_table();
        // The known trouble spot: controller shows 47 when the antenna
        // points at 90, and the outbound command must compensate
        assert!((table.to_actual(47.0).unwrap() - 90.0).abs() < 0.5);
        assert!((table.to_raw(90.0).unwrap() - 47.0).abs() < 0.5);
    }

    #[test]
    fn test_degenerate_segment_does_not_divide_by_zero() {
        let table = CalibrationTable::new(vec![
            CalibrationPoint { raw: 10.0, actual: 20.0 },
            CalibrationPoint { raw: 10.0, actual: 40.0 },
        ]);
        let result = table.to_actual(10.0).unwrap();
        assert!(result.is_finite());
    }

    #[test]
    fn test_nan_input_yields_none() {
        let table = bench_table();
        assert!(table.to_actual(f64::NAN).is_none());
    }
}
