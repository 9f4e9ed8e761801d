//! # Angle Math Helpers
//!
//! Pure helpers for clamping and wrap-aware angle arithmetic.
//!
//! Azimuth travel is defined over a configurable range (360 for a plain
//! rotor, 450 for overlap-capable models), so all wrap logic takes the
//! range as a parameter instead of hardcoding a full circle.

/// Clamp a value into `[min, max]`.
///
/// Unlike [`f64::clamp`], inverted bounds do not panic; the lower bound
/// wins. Soft limits come straight out of user config, and a degenerate
/// pair must not take the control loop down.
///
/// # Examples
///
/// ```
/// use rotor_bridge::motion::math::clamp;
///
/// assert_eq!(clamp(5.0, 0.0, 10.0), 5.0);
/// assert_eq!(clamp(-5.0, 0.0, 10.0), 0.0);
/// assert_eq!(clamp(15.0, 0.0, 10.0), 10.0);
/// ```
#[inline]
#[must_use]
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    min.max(value.min(max))
}

/// Wrap an azimuth value into `[0, range)`.
///
/// # Examples
///
/// ```
/// use rotor_bridge::motion::math::wrap_azimuth;
///
/// assert_eq!(wrap_azimuth(370.0, 360.0), 10.0);
/// assert_eq!(wrap_azimuth(-10.0, 360.0), 350.0);
/// assert_eq!(wrap_azimuth(460.0, 450.0), 10.0);
/// ```
#[inline]
#[must_use]
pub fn wrap_azimuth(value: f64, range_deg: f64) -> f64 {
    if range_deg <= 0.0 {
        return value;
    }
    // The double remainder folds negative values up into [0, range)
    ((value % range_deg) + range_deg) % range_deg
}

/// Shortest signed rotation from `current` to `target` over a wrap range.
///
/// Positive means clockwise. The result is folded into
/// `[-range/2, range/2]`; an exact half-turn keeps the sign of the plain
/// difference. A non-positive range disables wrapping and returns the
/// plain difference.
///
/// # Examples
///
/// ```
/// use rotor_bridge::motion::math::shortest_angular_delta;
///
/// // Crossing north is closer than going the long way around
/// assert_eq!(shortest_angular_delta(10.0, 350.0, 360.0), 20.0);
/// assert_eq!(shortest_angular_delta(350.0, 10.0, 360.0), -20.0);
/// ```
#[must_use]
pub fn shortest_angular_delta(target: f64, current: f64, range_deg: f64) -> f64 {
    if range_deg <= 0.0 {
        return target - current;
    }
    let mut delta = target - current;
    while delta > range_deg / 2.0 {
        delta -= range_deg;
    }
    while delta < -range_deg / 2.0 {
        delta += range_deg;
    }
    delta
}
