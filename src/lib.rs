//! # Rotor Bridge Library
//!
//! Drive GS-232B compatible antenna rotor controllers over a supervised
//! serial link.
//!
//! This library provides the building blocks of the bridge: the GS-232B
//! wire protocol, a self-healing serial link with health monitoring and
//! automatic reconnection, a calibrated motion controller with software
//! ramping, and JSONL event logging.

pub mod config;
pub mod error;
pub mod protocol;
pub mod calibration;
pub mod link;
pub mod motion;
pub mod telemetry;
