//! # Calibration Module
//!
//! Converts between raw controller readouts and true antenna headings.
//!
//! ## Linear calibration
//!
//! The basic correction is an offset plus scale factor per axis:
//!
//! - readout to heading: `actual = (raw + offset) / scale`
//! - heading to command: `raw = actual * scale - offset`
//!
//! A scale factor within `1e-9` of zero is treated as `1.0` on the readout
//! path so a half-edited config cannot blow a reading up to infinity.
//!
//! ## Table calibration
//!
//! Controllers with worn potentiometers drift non-linearly; for those a
//! measured multi-point table gives per-segment correction. The table is
//! only consulted when the configured mode asks for it *and* the axis has
//! enough points; otherwise the axis quietly falls back to its linear
//! parameters, so a partially entered table can never produce garbage.
//!
//! ## Usage
//!
//! ```
//! use rotor_bridge::calibration::AxisCalibration;
//!
//! // Controller reads 3 degrees low
//! let cal = AxisCalibration::linear(3.0, 1.0);
//! assert_eq!(cal.to_actual(87.0), 90.0);
//! assert_eq!(cal.to_raw(90.0), 87.0);
//! ```

pub mod table;

use serde::{Deserialize, Serialize};

pub use table::{CalibrationPoint, CalibrationTable, MIN_CALIBRATION_POINTS};

use crate::config::CalibrationConfig;

/// Scale factors closer to zero than this are treated as 1.0 on the
/// readout path
pub const SCALE_EPSILON: f64 = 1e-9;

/// Which correction strategy an axis uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationMode {
    /// Offset and scale factor only
    #[default]
    Linear,
    /// Multi-point interpolation table, falling back to linear when the
    /// table is unusable
    Table,
}

/// Calibration for a single rotation axis
#[derive(Debug, Clone, PartialEq)]
pub struct AxisCalibration {
    offset: f64,
    scale: f64,
    mode: CalibrationMode,
    table: CalibrationTable,
}

/// The identity calibration: raw values pass through unchanged
impl Default for AxisCalibration {
    fn default() -> Self {
        Self::linear(0.0, 1.0)
    }
}

impl AxisCalibration {
    /// Creates a linear calibration from offset and scale factor.
    ///
    /// # Examples
    ///
    /// ```
    /// use rotor_bridge::calibration::AxisCalibration;
    ///
    /// // Controller reports half the true angle
    /// let cal = AxisCalibration::linear(0.0, 0.5);
    /// assert_eq!(cal.to_actual(90.0), 180.0);
    /// ```
    #[must_use]
    pub fn linear(offset: f64, scale: f64) -> Self {
        Self {
            offset,
            scale,
            mode: CalibrationMode::Linear,
            table: CalibrationTable::default(),
        }
    }

    /// Creates a table calibration with linear parameters as fallback.
    #[must_use]
    pub fn with_table(offset: f64, scale: f64, table: CalibrationTable) -> Self {
        Self {
            offset,
            scale,
            mode: CalibrationMode::Table,
            table,
        }
    }

    /// Builds a single axis from its config section and the shared mode.
    #[must_use]
    pub fn from_config(mode: CalibrationMode, offset: f64, scale: f64, points: Vec<CalibrationPoint>) -> Self {
        Self {
            offset,
            scale,
            mode,
            table: CalibrationTable::new(points),
        }
    }

    /// Returns the configured offset.
    #[must_use]
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Returns the configured scale factor.
    #[must_use]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Convert a raw controller readout to a true heading in degrees.
    #[must_use]
    pub fn to_actual(&self, raw: f64) -> f64 {
        if self.mode == CalibrationMode::Table {
            if let Some(actual) = self.table.to_actual(raw) {
                return actual;
            }
        }
        (raw + self.offset) / self.effective_scale()
    }

    /// Convert a true heading in degrees to the raw value to command.
    ///
    /// The inverse deliberately uses the scale factor as configured; a zero
    /// scale collapses every heading onto `-offset`, which is visible in
    /// testing, rather than silently inventing a correction.
    #[must_use]
    pub fn to_raw(&self, actual: f64) -> f64 {
        if self.mode == CalibrationMode::Table {
            if let Some(raw) = self.table.to_raw(actual) {
                return raw;
            }
        }
        actual * self.scale - self.offset
    }

    /// Scale factor with the near-zero guard applied
    #[inline]
    fn effective_scale(&self) -> f64 {
        if self.scale.abs() < SCALE_EPSILON {
            1.0
        } else {
            self.scale
        }
    }
}

/// Calibration for both rotor axes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RotorCalibration {
    /// Azimuth axis correction
    pub azimuth: AxisCalibration,
    /// Elevation axis correction
    pub elevation: AxisCalibration,
}

impl RotorCalibration {
    /// Builds both axes from the calibration config section.
    #[must_use]
    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self {
            azimuth: AxisCalibration::from_config(
                config.mode,
                config.azimuth.offset,
                config.azimuth.scale,
                config.azimuth.points.clone(),
            ),
            elevation: AxisCalibration::from_config(
                config.mode,
                config.elevation.offset,
                config.elevation.scale,
                config.elevation.points.clone(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_by_default() {
        let cal = AxisCalibration::default();
        assert_eq!(cal.to_actual(0.0), 0.0);
        assert_eq!(cal.to_actual(123.0), 123.0);
        assert_eq!(cal.to_raw(123.0), 123.0);
    }

    #[test]
    fn test_linear_offset_shifts_readout() {
        let cal = AxisCalibration::linear(3.0, 1.0);
        assert_eq!(cal.to_actual(87.0), 90.0);
        assert_eq!(cal.to_raw(90.0), 87.0);
    }

    #[test]
    fn test_linear_scale_divides_readout() {
        // Roughly what a 2:1 geared potentiometer looks like
        let cal = AxisCalibration::linear(0.0, 0.5);
        assert_eq!(cal.to_actual(90.0), 180.0);
        assert_eq!(cal.to_raw(180.0), 90.0);
    }

    #[test]
    fn test_linear_offset_and_scale_combined() {
        let cal = AxisCalibration::linear(2.0, 0.5);
        // (88 + 2) / 0.5 = 180
        assert_eq!(cal.to_actual(88.0), 180.0);
        // 180 * 0.5 - 2 = 88
        assert_eq!(cal.to_raw(180.0), 88.0);
    }

    #[test]
    fn test_zero_scale_guard_on_readout_path() {
        let cal = AxisCalibration::linear(0.0, 0.0);
        // Would be a division by zero without the guard
        assert_eq!(cal.to_actual(45.0), 45.0);

        let cal = AxisCalibration::linear(0.0, 1e-12);
        assert_eq!(cal.to_actual(45.0), 45.0);
    }

    #[test]
    fn test_zero_scale_not_guarded_on_command_path() {
        let cal = AxisCalibration::linear(5.0, 0.0);
        // The inverse keeps the configured factor: every heading collapses
        // onto -offset, an obviously broken config rather than a hidden one
        assert_eq!(cal.to_raw(45.0), -5.0);
        assert_eq!(cal.to_raw(300.0), -5.0);
    }

    #[test]
    fn test_linear_round_trip() {
        let cal = AxisCalibration::linear(-7.5, 0.5);
        for heading in [0.0, 45.0, 180.0, 359.0] {
            let raw = cal.to_raw(heading);
            let back = cal.to_actual(raw);
            assert!((back - heading).abs() < 1e-9);
        }
    }

    #[test]
    fn test_table_mode_uses_table() {
        let table = CalibrationTable::new(vec![
            CalibrationPoint { raw: 2.0, actual: 0.0 },
            CalibrationPoint { raw: 47.0, actual: 90.0 },
            CalibrationPoint { raw: 225.0, actual: 450.0 },
        ]);
        let cal = AxisCalibration::with_table(0.0, 1.0, table);
        assert!((cal.to_actual(47.0) - 90.0).abs() < 0.5);
        assert!((cal.to_raw(90.0) - 47.0).abs() < 0.5);
    }

    #[test]
    fn test_table_mode_falls_back_when_table_too_small() {
        let table = CalibrationTable::new(vec![CalibrationPoint { raw: 47.0, actual: 90.0 }]);
        let cal = AxisCalibration::with_table(0.0, 0.5, table);
        // One point cannot interpolate, so the linear parameters apply
        assert_eq!(cal.to_actual(90.0), 180.0);
        assert_eq!(cal.to_raw(180.0), 90.0);
    }

    #[test]
    fn test_linear_mode_ignores_table_points() {
        let cal = AxisCalibration::from_config(
            CalibrationMode::Linear,
            0.0,
            1.0,
            vec![
                CalibrationPoint { raw: 2.0, actual: 0.0 },
                CalibrationPoint { raw: 225.0, actual: 450.0 },
            ],
        );
        // Points are present but the mode says linear
        assert_eq!(cal.to_actual(100.0), 100.0);
    }

    #[test]
    fn test_rotor_calibration_from_config() {
        use crate::config::{AxisCalibrationConfig, CalibrationConfig};

        let config = CalibrationConfig {
            mode: CalibrationMode::Linear,
            azimuth: AxisCalibrationConfig {
                offset: 3.0,
                scale: 1.0,
                points: vec![],
            },
            elevation: AxisCalibrationConfig {
                offset: 0.0,
                scale: 0.5,
                points: vec![],
            },
        };

        let cal = RotorCalibration::from_config(&config);
        assert_eq!(cal.azimuth.to_actual(87.0), 90.0);
        assert_eq!(cal.elevation.to_actual(30.0), 60.0);
    }
}
