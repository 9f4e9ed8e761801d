//! # GS-232B Protocol Module
//!
//! Implementation of the GS-232B ASCII serial protocol spoken by Yaesu
//! rotor controllers and their many clones.
//!
//! This module handles:
//! - Command encoding (`M`, `W`, `L`/`R`/`U`/`D`, `S`, `C2`)
//! - Status line parsing (`AZ=xxx EL=xxx` responses)
//! - Carriage-return framing

pub mod command;
pub mod status;

pub use command::{Command, Direction, COMMAND_TERMINATOR};
pub use status::StatusSample;
