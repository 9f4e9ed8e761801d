//! # Motion Control
//!
//! Turns position requests into GS-232B commands, with optional
//! software ramping.
//!
//! ## Features
//!
//! - Calibrated targeting: degrees in, raw three-digit commands out
//! - Smart azimuth selection on 450° rotors (picks the overlap-zone
//!   candidate closest to the current heading)
//! - Soft-start ramping for manual jogs and speed-limited stepping
//!   toward targets, driven by a periodic control loop
//! - Soft stop that lets motion settle before the stop command
//! - Raw pass-through targeting for calibration work
//!
//! ## Modes
//!
//! With ramping disabled every request maps to a single controller
//! command sent immediately. With ramping enabled, requests only record
//! intent; the control loop compares the reported position against it on
//! every tick and emits the next bounded step.

pub mod math;

pub use math::{clamp, shortest_angular_delta, wrap_azimuth};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::calibration::RotorCalibration;
use crate::config::MotionConfig;
use crate::error::Result;
use crate::link::RotorLink;
use crate::protocol::{Command, Direction};

/// Degrees within which a ramped target counts as reached
const ARRIVAL_THRESHOLD_DEG: f64 = 0.5;

/// Seconds a manual ramp takes to reach full speed
const RAMP_UP_SECS: f64 = 2.0;

/// Speed factor at the very start of a manual ramp
const MIN_SPEED_FACTOR: f64 = 0.2;

/// Seconds a soft stop lets motion settle before commanding the stop
const SOFT_STOP_SECS: f64 = 1.0;

/// Raw command values are three ASCII digits on the wire
const MAX_RAW_COMMAND: f64 = 999.0;

/// Control loop backoff while the link is down
const DISCONNECTED_IDLE: Duration = Duration::from_secs(1);

/// Control loop backoff while there is nothing to ramp
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Granularity of interruptible control loop waits
const SLEEP_CHUNK: Duration = Duration::from_millis(100);

/// How long stopping the control loop waits for the task
const LOOP_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Calibrated rotor position in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub azimuth: f64,
    pub elevation: f64,
}

/// Speed factor for a manual ramp `elapsed_secs` after it started
fn soft_start_factor(elapsed_secs: f64) -> f64 {
    if elapsed_secs < RAMP_UP_SECS {
        MIN_SPEED_FACTOR + (elapsed_secs / RAMP_UP_SECS) * (1.0 - MIN_SPEED_FACTOR)
    } else {
        1.0
    }
}

/// What the control loop decided to do on one tick
enum RampStep {
    /// Command the rotor toward these calibrated degrees
    Direct {
        azimuth: Option<f64>,
        elevation: Option<f64>,
    },
    /// Soft stop settled; send the stop command
    Halt,
}

/// Pending motion intent, owned by the control loop
#[derive(Debug, Default)]
struct MotionState {
    target_azimuth: Option<f64>,
    target_elevation: Option<f64>,
    manual_direction: Option<Direction>,
    stopping: bool,
    ramp_started: Option<Instant>,
    stop_started: Option<Instant>,
}

/// Motion controller for one rotor.
///
/// Clones share the same state and control loop. [`start`](Self::start)
/// launches the ramping loop; it is only needed when ramping is enabled,
/// but running it with ramping disabled is harmless.
///
/// [`stop`](Self::stop) ends the control loop; [`stop_motion`](Self::stop_motion)
/// halts the rotor.
#[derive(Clone)]
pub struct MotionController {
    shared: Arc<MotionShared>,
}

struct MotionShared {
    link: RotorLink,
    config: RwLock<MotionConfig>,
    calibration: RwLock<RotorCalibration>,
    state: Mutex<MotionState>,
    running: AtomicBool,
    worker: AsyncMutex<Option<JoinHandle<()>>>,
}

impl MotionController {
    #[must_use]
    pub fn new(link: RotorLink, config: MotionConfig, calibration: RotorCalibration) -> Self {
        Self {
            shared: Arc::new(MotionShared {
                link,
                config: RwLock::new(config),
                calibration: RwLock::new(calibration),
                state: Mutex::new(MotionState::default()),
                running: AtomicBool::new(false),
                worker: AsyncMutex::new(None),
            }),
        }
    }

    /// Start the control loop; does nothing if it is already running
    pub async fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            shared.control_loop().await;
        });
        *self.shared.worker.lock().await = Some(handle);
        info!("Motion control loop started");
    }

    /// Stop the control loop; pending ramp intent is kept but no longer
    /// acted upon
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handle = self.shared.worker.lock().await.take();
        if let Some(handle) = handle {
            match tokio::time::timeout(LOOP_JOIN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Control loop ended abnormally: {}", e),
                Err(_) => warn!(
                    "Control loop did not stop within {:?}, detaching",
                    LOOP_JOIN_TIMEOUT
                ),
            }
        }
        info!("Motion control loop stopped");
    }

    /// Replace the motion configuration at runtime.
    ///
    /// # Errors
    ///
    /// Returns error when the new configuration fails validation; the
    /// previous configuration stays in effect.
    pub fn update_config(&self, config: MotionConfig) -> Result<()> {
        config.validate()?;
        let mut guard = self
            .shared
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if *guard != config {
            *guard = config;
            info!("Motion configuration updated");
        }
        Ok(())
    }

    /// Replace the calibration used for all further conversions
    pub fn update_calibration(&self, calibration: RotorCalibration) {
        *self
            .shared
            .calibration
            .write()
            .unwrap_or_else(PoisonError::into_inner) = calibration;
        info!("Calibration updated");
    }

    /// Current motion configuration
    #[must_use]
    pub fn config(&self) -> MotionConfig {
        self.shared.config_snapshot()
    }

    /// Current calibration
    #[must_use]
    pub fn calibration(&self) -> RotorCalibration {
        self.shared.calibration_snapshot()
    }

    /// Last reported raw position, when both axes are known
    #[must_use]
    pub fn raw_position(&self) -> Option<(u16, u16)> {
        let status = self.shared.link.status()?;
        match (status.azimuth_raw, status.elevation_raw) {
            (Some(azimuth), Some(elevation)) => Some((azimuth, elevation)),
            _ => None,
        }
    }

    /// Last reported position with calibration applied
    #[must_use]
    pub fn calibrated_position(&self) -> Option<Position> {
        self.shared.calibrated_position()
    }

    /// Request rotation to a calibrated target.
    ///
    /// Either axis may be omitted. Targets are clamped into the soft
    /// limits. On rotors with more than 360° of azimuth travel the
    /// overlap-zone candidate closest to the current heading is chosen,
    /// so a request for 30° becomes 390° when that is the shorter move.
    ///
    /// With ramping disabled the command goes out immediately; with
    /// ramping enabled the control loop walks toward the target.
    ///
    /// # Errors
    ///
    /// Returns error when the immediate command cannot be sent. With
    /// ramping enabled this never fails; the intent is recorded for the
    /// control loop.
    pub async fn set_target(&self, azimuth: Option<f64>, elevation: Option<f64>) -> Result<()> {
        let config = self.shared.config_snapshot();
        let current = self.shared.calibrated_position();

        let azimuth = azimuth.map(|requested| {
            let selected = select_azimuth_candidate(requested, current, &config);
            math::clamp(selected, config.azimuth_min, config.azimuth_max)
        });
        let elevation =
            elevation.map(|e| math::clamp(e, config.elevation_min, config.elevation_max));

        {
            let mut state = self.shared.lock_state();
            state.target_azimuth = azimuth;
            state.target_elevation = elevation;
            state.manual_direction = None;
            state.stopping = false;
            state.ramp_started = Some(Instant::now());
        }
        info!("Target set: azimuth {:?}, elevation {:?}", azimuth, elevation);

        if !config.ramp_enabled {
            self.shared.send_direct_target(azimuth, elevation).await?;
        }
        Ok(())
    }

    /// Command raw controller values directly, bypassing calibration and
    /// ramping. Azimuth is clamped to the travel range, elevation to
    /// `[0, 90]`. Any pending ramp intent is cancelled.
    ///
    /// # Errors
    ///
    /// Returns error when the command cannot be sent.
    pub async fn set_target_raw(&self, azimuth: Option<f64>, elevation: Option<f64>) -> Result<()> {
        let config = self.shared.config_snapshot();
        let azimuth = azimuth.map(|a| math::clamp(a, 0.0, config.azimuth_mode));
        let elevation = elevation.map(|e| math::clamp(e, 0.0, 90.0));

        {
            let mut state = self.shared.lock_state();
            state.target_azimuth = None;
            state.target_elevation = None;
            state.manual_direction = None;
            state.stopping = false;
        }
        info!(
            "Raw target set: azimuth {:?}, elevation {:?}",
            azimuth, elevation
        );
        self.shared.send_raw_values(azimuth, elevation).await
    }

    /// Start a manual jog in `direction`.
    ///
    /// With ramping disabled this sends the rotation command and the
    /// rotor keeps turning until stopped. With ramping enabled the
    /// control loop issues soft-started position steps instead.
    ///
    /// # Errors
    ///
    /// Returns error when the immediate command cannot be sent.
    pub async fn manual_move(&self, direction: Direction) -> Result<()> {
        let config = self.shared.config_snapshot();
        {
            let mut state = self.shared.lock_state();
            state.manual_direction = Some(direction);
            state.target_azimuth = None;
            state.target_elevation = None;
            state.stopping = false;
            state.ramp_started = Some(Instant::now());
        }
        info!("Manual move: {:?}", direction);

        if !config.ramp_enabled {
            self.shared.link.send(Command::Rotate(direction)).await?;
        }
        Ok(())
    }

    /// Halt rotor motion.
    ///
    /// Clears all pending intent. With ramping enabled and a known
    /// position, a soft stop lets the motion settle for a second before
    /// the stop command goes out; otherwise the stop is immediate.
    /// Quietly does nothing when disconnected.
    ///
    /// # Errors
    ///
    /// Returns error when the stop command cannot be sent.
    pub async fn stop_motion(&self) -> Result<()> {
        {
            let mut state = self.shared.lock_state();
            state.manual_direction = None;
            state.target_azimuth = None;
            state.target_elevation = None;
        }
        if !self.shared.link.is_connected() {
            return Ok(());
        }

        let config = self.shared.config_snapshot();
        if config.ramp_enabled && self.shared.calibrated_position().is_some() {
            let mut state = self.shared.lock_state();
            state.stopping = true;
            state.stop_started = Some(Instant::now());
            info!("Soft stop engaged");
            return Ok(());
        }

        {
            let mut state = self.shared.lock_state();
            state.stopping = false;
        }
        info!("Stopping motion");
        self.shared.link.send(Command::Stop).await
    }
}

/// Pick the equivalent heading a >360° rotor should drive to.
///
/// In the overlap zone the same bearing exists twice; without a known
/// current position the request is used as given.
fn select_azimuth_candidate(
    requested: f64,
    current: Option<Position>,
    config: &MotionConfig,
) -> f64 {
    if config.azimuth_mode <= 360.0 {
        return requested;
    }
    let Some(current) = current else {
        return requested;
    };

    let mut candidates = vec![requested];
    if requested + 360.0 <= config.azimuth_mode {
        candidates.push(requested + 360.0);
    }
    if requested > 360.0 {
        candidates.push(requested - 360.0);
    }

    let selected = candidates
        .into_iter()
        .min_by(|a, b| {
            (a - current.azimuth)
                .abs()
                .total_cmp(&(b - current.azimuth).abs())
        })
        .unwrap_or(requested);

    if (selected - requested).abs() > f64::EPSILON {
        info!(
            "Smart azimuth: requested {}, current {:.1}, selected {}",
            requested, current.azimuth, selected
        );
    }
    selected
}

impl MotionShared {
    fn lock_state(&self) -> MutexGuard<'_, MotionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn config_snapshot(&self) -> MotionConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn calibration_snapshot(&self) -> RotorCalibration {
        self.calibration
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn calibrated_position(&self) -> Option<Position> {
        let status = self.link.status()?;
        let (azimuth_raw, elevation_raw) = match (status.azimuth_raw, status.elevation_raw) {
            (Some(azimuth), Some(elevation)) => (azimuth, elevation),
            _ => return None,
        };
        let calibration = self.calibration_snapshot();
        Some(Position {
            azimuth: calibration.azimuth.to_actual(f64::from(azimuth_raw)),
            elevation: calibration.elevation.to_actual(f64::from(elevation_raw)),
        })
    }

    /// Convert calibrated degrees to raw values and send the matching
    /// command. An elevation-only request reuses the reported raw
    /// azimuth because the combined command needs both values.
    async fn send_direct_target(&self, azimuth: Option<f64>, elevation: Option<f64>) -> Result<()> {
        let calibration = self.calibration_snapshot();
        let azimuth_raw = azimuth.map(|a| to_raw_command(calibration.azimuth.to_raw(a)));
        let elevation_raw = elevation.map(|e| to_raw_command(calibration.elevation.to_raw(e)));
        self.send_position(azimuth_raw, elevation_raw).await
    }

    /// Send clamped raw values without touching calibration
    async fn send_raw_values(&self, azimuth: Option<f64>, elevation: Option<f64>) -> Result<()> {
        self.send_position(
            azimuth.map(|a| a.round() as u16),
            elevation.map(|e| e.round() as u16),
        )
        .await
    }

    async fn send_position(&self, azimuth: Option<u16>, elevation: Option<u16>) -> Result<()> {
        match (azimuth, elevation) {
            (Some(azimuth), Some(elevation)) => {
                self.link
                    .send(Command::PositionTo { azimuth, elevation })
                    .await
            }
            (Some(azimuth), None) => self.link.send(Command::AzimuthTo(azimuth)).await,
            (None, Some(elevation)) => {
                let azimuth = self
                    .link
                    .status()
                    .and_then(|status| status.azimuth_raw)
                    .unwrap_or(0);
                self.link
                    .send(Command::PositionTo { azimuth, elevation })
                    .await
            }
            (None, None) => Ok(()),
        }
    }

    async fn control_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            if !self.link.is_connected() {
                self.idle(DISCONNECTED_IDLE).await;
                continue;
            }
            let config = self.config_snapshot();
            if !config.ramp_enabled {
                self.idle(IDLE_POLL).await;
                continue;
            }
            let Some(position) = self.calibrated_position() else {
                self.idle(IDLE_POLL).await;
                continue;
            };

            let dt = config.ramp_sample_time_ms as f64 / 1000.0;
            if let Some(step) = self.plan_step(&config, position, dt) {
                if let Err(e) = self.dispatch(step).await {
                    warn!("Ramp command failed: {}", e);
                    self.idle(DISCONNECTED_IDLE).await;
                    continue;
                }
            }
            self.sleep_sample_period().await;
        }
    }

    /// Decide the next tick's action from pending intent and the
    /// reported position. Intent mutation happens here, under the lock;
    /// the returned step is sent afterwards.
    fn plan_step(&self, config: &MotionConfig, position: Position, dt: f64) -> Option<RampStep> {
        let mut state = self.lock_state();

        if let Some(direction) = state.manual_direction {
            let elapsed = state
                .ramp_started
                .map_or(0.0, |started| started.elapsed().as_secs_f64());
            let factor = soft_start_factor(elapsed);

            return Some(if direction.is_azimuth() {
                let step = config.azimuth_speed_deg_per_sec * dt * factor * direction.sign();
                let next = math::clamp(
                    position.azimuth + step,
                    config.azimuth_min,
                    config.azimuth_max,
                );
                RampStep::Direct {
                    azimuth: Some(next),
                    elevation: None,
                }
            } else {
                let step = config.elevation_speed_deg_per_sec * dt * factor * direction.sign();
                let next = math::clamp(
                    position.elevation + step,
                    config.elevation_min,
                    config.elevation_max,
                );
                RampStep::Direct {
                    azimuth: None,
                    elevation: Some(next),
                }
            });
        }

        if state.target_azimuth.is_some() || state.target_elevation.is_some() {
            let mut next_azimuth = position.azimuth;
            let mut next_elevation = position.elevation;
            let mut moved = false;

            if let Some(target) = state.target_azimuth {
                let delta =
                    math::shortest_angular_delta(target, position.azimuth, config.azimuth_mode);
                if delta.abs() < ARRIVAL_THRESHOLD_DEG {
                    state.target_azimuth = None;
                    debug!("Azimuth target reached");
                } else {
                    let step = delta.abs().min(config.azimuth_speed_deg_per_sec * dt);
                    next_azimuth = position.azimuth + step * delta.signum();
                    moved = true;
                }
            }

            if let Some(target) = state.target_elevation {
                let delta = target - position.elevation;
                if delta.abs() < ARRIVAL_THRESHOLD_DEG {
                    state.target_elevation = None;
                    debug!("Elevation target reached");
                } else {
                    let step = delta.abs().min(config.elevation_speed_deg_per_sec * dt);
                    next_elevation = position.elevation + step * delta.signum();
                    moved = true;
                }
            }

            if moved {
                // Both values go out so the reached axis holds position
                return Some(RampStep::Direct {
                    azimuth: Some(next_azimuth),
                    elevation: Some(next_elevation),
                });
            }
            return None;
        }

        if state.stopping {
            let elapsed = state
                .stop_started
                .map_or(SOFT_STOP_SECS, |started| started.elapsed().as_secs_f64());
            if elapsed >= SOFT_STOP_SECS {
                state.stopping = false;
                state.stop_started = None;
                return Some(RampStep::Halt);
            }
        }

        None
    }

    async fn dispatch(&self, step: RampStep) -> Result<()> {
        match step {
            RampStep::Direct { azimuth, elevation } => {
                self.send_direct_target(azimuth, elevation).await
            }
            RampStep::Halt => {
                info!("Soft stop complete");
                self.link.send(Command::Stop).await
            }
        }
    }

    /// Interruptible sleep; returns early when the loop is stopping
    async fn idle(&self, total: Duration) {
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            let step = SLEEP_CHUNK.min(total - elapsed);
            tokio::time::sleep(step).await;
            elapsed += step;
        }
    }

    /// Sleep out one sample period. The period is re-read every chunk so
    /// a live configuration change takes effect within roughly 100ms
    /// instead of waiting out a stale, longer sleep.
    async fn sleep_sample_period(&self) {
        let mut elapsed = Duration::ZERO;
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            let period = Duration::from_millis(self.config_snapshot().ramp_sample_time_ms);
            if elapsed >= period {
                return;
            }
            let step = SLEEP_CHUNK.min(period - elapsed);
            tokio::time::sleep(step).await;
            elapsed += step;
        }
    }
}

/// Clamp a raw conversion result into the three-digit command range
fn to_raw_command(value: f64) -> u16 {
    math::clamp(value.round(), 0.0, MAX_RAW_COMMAND) as u16
}
