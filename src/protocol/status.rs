//! # GS-232B Status Parsing
//!
//! Parses the `AZ=xxx EL=xxx` readout lines sent by the controller in
//! response to `C2` queries.
//!
//! Controllers in the wild are sloppy about this format: some pad with
//! spaces around the `=`, some answer with only one axis, some respond in
//! lower case, and unrelated chatter shows up between readouts. Parsing is
//! therefore tolerant: each axis is extracted independently and a line
//! that matches neither pattern still counts as a (positionless) sample.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

static AZIMUTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)AZ\s*=\s*(\d+)").expect("valid azimuth pattern"));

static ELEVATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)EL\s*=\s*(\d+)").expect("valid elevation pattern"));

/// One parsed readout line from the controller
///
/// Axis values are raw controller degrees, before any calibration is
/// applied. A missing axis means the controller did not report it on this
/// line, not that it read zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSample {
    /// The raw line as received, without the line terminator
    pub raw: String,
    /// Capture time as milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Raw azimuth readout, if present on this line
    pub azimuth_raw: Option<u16>,
    /// Raw elevation readout, if present on this line
    pub elevation_raw: Option<u16>,
}

impl StatusSample {
    /// Parse a single readout line.
    ///
    /// # Arguments
    ///
    /// * `line` - One complete line from the controller, terminator stripped
    ///
    /// # Examples
    ///
    /// ```
    /// use rotor_bridge::protocol::StatusSample;
    ///
    /// let sample = StatusSample::parse("AZ=123 EL=045");
    /// assert_eq!(sample.azimuth_raw, Some(123));
    /// assert_eq!(sample.elevation_raw, Some(45));
    /// ```
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let azimuth_raw = AZIMUTH_RE
            .captures(line)
            .and_then(|caps| caps[1].parse::<u16>().ok());
        let elevation_raw = ELEVATION_RE
            .captures(line)
            .and_then(|caps| caps[1].parse::<u16>().ok());

        Self {
            raw: line.to_string(),
            timestamp_ms: Utc::now().timestamp_millis(),
            azimuth_raw,
            elevation_raw,
        }
    }

    /// Whether both axes were reported on this line.
    ///
    /// Motion planning needs a full fix; a single-axis readout is stored
    /// but cannot seed a ramp step.
    #[inline]
    #[must_use]
    pub fn has_position(&self) -> bool {
        self.azimuth_raw.is_some() && self.elevation_raw.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_both_axes() {
        let sample = StatusSample::parse("AZ=123 EL=045");
        assert_eq!(sample.azimuth_raw, Some(123));
        assert_eq!(sample.elevation_raw, Some(45));
        assert_eq!(sample.raw, "AZ=123 EL=045");
        assert!(sample.has_position());
    }

    #[test]
    fn test_parse_azimuth_only() {
        let sample = StatusSample::parse("AZ=360");
        assert_eq!(sample.azimuth_raw, Some(360));
        assert_eq!(sample.elevation_raw, None);
        assert!(!sample.has_position());
    }

    #[test]
    fn test_parse_elevation_only() {
        let sample = StatusSample::parse("EL=090");
        assert_eq!(sample.azimuth_raw, None);
        assert_eq!(sample.elevation_raw, Some(90));
        assert!(!sample.has_position());
    }

    #[test]
    fn test_parse_case_insensitive() {
        let sample = StatusSample::parse("az=010 el=020");
        assert_eq!(sample.azimuth_raw, Some(10));
        assert_eq!(sample.elevation_raw, Some(20));
    }

    #[test]
    fn test_parse_whitespace_around_equals() {
        let sample = StatusSample::parse("AZ = 270  EL =  45");
        assert_eq!(sample.azimuth_raw, Some(270));
        assert_eq!(sample.elevation_raw, Some(45));
    }

    #[test]
    fn test_parse_leading_zeros() {
        let sample = StatusSample::parse("AZ=005 EL=009");
        assert_eq!(sample.azimuth_raw, Some(5));
        assert_eq!(sample.elevation_raw, Some(9));
    }

    #[test]
    fn test_parse_unrelated_chatter() {
        // Non-readout lines still become samples, just without a position
        let sample = StatusSample::parse("ROTATOR READY");
        assert_eq!(sample.azimuth_raw, None);
        assert_eq!(sample.elevation_raw, None);
        assert_eq!(sample.raw, "ROTATOR READY");
        assert!(!sample.has_position());
    }

    #[test]
    fn test_parse_embedded_in_chatter() {
        // Some firmware prefixes readouts with identifiers
        let sample = StatusSample::parse("?>AZ=100 EL=050");
        assert_eq!(sample.azimuth_raw, Some(100));
        assert_eq!(sample.elevation_raw, Some(50));
    }

    #[test]
    fn test_parse_absurd_value_dropped() {
        // A corrupted burst of digits does not wrap into a bogus reading
        let sample = StatusSample::parse("AZ=99999999 EL=045");
        assert_eq!(sample.azimuth_raw, None);
        assert_eq!(sample.elevation_raw, Some(45));
    }

    #[test]
    fn test_parse_sets_timestamp() {
        let sample = StatusSample::parse("AZ=000 EL=000");
        assert!(sample.timestamp_ms > 0);
    }
}
