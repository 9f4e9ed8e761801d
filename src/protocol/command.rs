//! # GS-232B Command Encoding
//!
//! Builds the ASCII command strings understood by GS-232B compatible
//! rotor controllers.
//!
//! Every command is a short ASCII token terminated by a carriage return.
//! Positions are sent as zero-padded three-digit values in raw controller
//! degrees, e.g. `M090` or `W270 045`.

/// Carriage return terminating every GS-232B command
pub const COMMAND_TERMINATOR: char = '\r';

/// Largest raw value a three-digit position field can carry
const MAX_POSITION: u16 = 999;

/// Rotation direction for manual jog moves
///
/// The public control surface accepts friendly names (`"left"`, `"up"`)
/// while the wire protocol wants single letters; this enum is the bridge
/// between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Counter-clockwise azimuth rotation (`L`)
    Left,
    /// Clockwise azimuth rotation (`R`)
    Right,
    /// Elevation up (`U`)
    Up,
    /// Elevation down (`D`)
    Down,
}

impl Direction {
    /// Parse a direction from a friendly name or a protocol letter.
    ///
    /// Accepts `"left"`, `"right"`, `"up"`, `"down"` in any case, and the
    /// raw protocol letters `L`/`R`/`U`/`D` for callers that already speak
    /// the wire format.
    ///
    /// # Returns
    ///
    /// * `Option<Direction>` - `None` if the token is not a known direction
    ///
    /// # Examples
    ///
    /// ```
    /// use rotor_bridge::protocol::Direction;
    ///
    /// assert_eq!(Direction::parse("left"), Some(Direction::Left));
    /// assert_eq!(Direction::parse("R"), Some(Direction::Right));
    /// assert_eq!(Direction::parse("sideways"), None);
    /// ```
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "left" | "l" => Some(Self::Left),
            "right" | "r" => Some(Self::Right),
            "up" | "u" => Some(Self::Up),
            "down" | "d" => Some(Self::Down),
            _ => None,
        }
    }

    /// Protocol letter for this direction
    #[must_use]
    pub fn letter(&self) -> char {
        match self {
            Self::Left => 'L',
            Self::Right => 'R',
            Self::Up => 'U',
            Self::Down => 'D',
        }
    }

    /// Whether this direction moves the azimuth axis
    #[inline]
    #[must_use]
    pub fn is_azimuth(&self) -> bool {
        matches!(self, Self::Left | Self::Right)
    }

    /// Sign of travel along the axis: `+1` for Right/Up, `-1` for Left/Down
    #[inline]
    #[must_use]
    pub fn sign(&self) -> f64 {
        match self {
            Self::Right | Self::Up => 1.0,
            Self::Left | Self::Down => -1.0,
        }
    }
}

/// A single GS-232B command
///
/// Position-carrying commands hold raw controller degrees. The encoder
/// zero-pads to three digits, matching what real controllers expect;
/// values past 999 do not fit the field and saturate at encode time
/// instead of producing a malformed four-digit frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `Maaa` - rotate azimuth to an absolute raw position
    AzimuthTo(u16),
    /// `Waaa eee` - rotate both axes to absolute raw positions
    PositionTo { azimuth: u16, elevation: u16 },
    /// `L`/`R`/`U`/`D` - start rotating in a direction until stopped
    Rotate(Direction),
    /// `S` - stop all rotation
    Stop,
    /// `C2` - request the current azimuth/elevation readout
    StatusQuery,
}

impl Command {
    /// Encode the command as its bare wire string, without the trailing
    /// carriage return.
    ///
    /// The link layer appends [`COMMAND_TERMINATOR`] when writing, so
    /// encoded commands stay printable for logging.
    ///
    /// # Examples
    ///
    /// ```
    /// use rotor_bridge::protocol::{Command, Direction};
    ///
    /// assert_eq!(Command::AzimuthTo(90).encode(), "M090");
    /// assert_eq!(Command::AzimuthTo(1000).encode(), "M999");
    /// assert_eq!(Command::PositionTo { azimuth: 270, elevation: 45 }.encode(), "W270 045");
    /// assert_eq!(Command::Rotate(Direction::Left).encode(), "L");
    /// assert_eq!(Command::Stop.encode(), "S");
    /// assert_eq!(Command::StatusQuery.encode(), "C2");
    /// ```
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::AzimuthTo(az) => format!("M{:03}", (*az).min(MAX_POSITION)),
            Self::PositionTo { azimuth, elevation } => {
                format!(
                    "W{:03} {:03}",
                    (*azimuth).min(MAX_POSITION),
                    (*elevation).min(MAX_POSITION)
                )
            }
            Self::Rotate(direction) => direction.letter().to_string(),
            Self::Stop => "S".to_string(),
            Self::StatusQuery => "C2".to_string(),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_azimuth_command_zero_padded() {
        assert_eq!(Command::AzimuthTo(0).encode(), "M000");
        assert_eq!(Command::AzimuthTo(5).encode(), "M005");
        assert_eq!(Command::AzimuthTo(45).encode(), "M045");
    }

    #[test]
    fn test_azimuth_command_full_range() {
        // 450-degree controllers accept values past 360
        assert_eq!(Command::AzimuthTo(360).encode(), "M360");
        assert_eq!(Command::AzimuthTo(450).encode(), "M450");
    }

    #[test]
    fn test_position_values_saturate_at_field_width() {
        assert_eq!(Command::AzimuthTo(1000).encode(), "M999");
        let cmd = Command::PositionTo {
            azimuth: 1000,
            elevation: 1200,
        };
        assert_eq!(cmd.encode(), "W999 999");
    }

    #[test]
    fn test_position_command_both_axes() {
        let cmd = Command::PositionTo { azimuth: 270, elevation: 45 };
        assert_eq!(cmd.encode(), "W270 045");

        let cmd = Command::PositionTo { azimuth: 7, elevation: 0 };
        assert_eq!(cmd.encode(), "W007 000");
    }

    #[test]
    fn test_rotate_commands() {
        assert_eq!(Command::Rotate(Direction::Left).encode(), "L");
        assert_eq!(Command::Rotate(Direction::Right).encode(), "R");
        assert_eq!(Command::Rotate(Direction::Up).encode(), "U");
        assert_eq!(Command::Rotate(Direction::Down).encode(), "D");
    }

    #[test]
    fn test_stop_and_status_query() {
        assert_eq!(Command::Stop.encode(), "S");
        assert_eq!(Command::StatusQuery.encode(), "C2");
    }

    #[test]
    fn test_display_matches_encode() {
        let cmd = Command::PositionTo { azimuth: 123, elevation: 45 };
        assert_eq!(cmd.to_string(), cmd.encode());
    }

    #[test]
    fn test_direction_parse_friendly_names() {
        assert_eq!(Direction::parse("left"), Some(Direction::Left));
        assert_eq!(Direction::parse("right"), Some(Direction::Right));
        assert_eq!(Direction::parse("up"), Some(Direction::Up));
        assert_eq!(Direction::parse("down"), Some(Direction::Down));
    }

    #[test]
    fn test_direction_parse_case_insensitive() {
        assert_eq!(Direction::parse("LEFT"), Some(Direction::Left));
        assert_eq!(Direction::parse("Right"), Some(Direction::Right));
    }

    #[test]
    fn test_direction_parse_protocol_letters() {
        assert_eq!(Direction::parse("L"), Some(Direction::Left));
        assert_eq!(Direction::parse("R"), Some(Direction::Right));
        assert_eq!(Direction::parse("U"), Some(Direction::Up));
        assert_eq!(Direction::parse("D"), Some(Direction::Down));
    }

    #[test]
    fn test_direction_parse_unknown() {
        assert_eq!(Direction::parse("sideways"), None);
        assert_eq!(Direction::parse(""), None);
        assert_eq!(Direction::parse("LR"), None);
    }

    #[test]
    fn test_direction_axis_split() {
        assert!(Direction::Left.is_azimuth());
        assert!(Direction::Right.is_azimuth());
        assert!(!Direction::Up.is_azimuth());
        assert!(!Direction::Down.is_azimuth());
    }

    #[test]
    fn test_direction_signs() {
        assert_eq!(Direction::Right.sign(), 1.0);
        assert_eq!(Direction::Up.sign(), 1.0);
        assert_eq!(Direction::Left.sign(), -1.0);
        assert_eq!(Direction::Down.sign(), -1.0);
    }

    #[test]
    fn test_terminator_is_carriage_return() {
        assert_eq!(COMMAND_TERMINATOR, '\r');
    }
}
