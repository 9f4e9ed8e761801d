//! # Rotor Link
//!
//! Supervised serial connection to a GS-232B style rotor controller.
//!
//! ## Features
//!
//! - Line-oriented reader that parses `AZ=aaa EL=eee` status frames
//! - Periodic `C2` status polling with a runtime-adjustable interval
//! - Heartbeat and staleness watchdog with health change events
//! - Automatic reconnection with exponential backoff after link loss
//! - Typed event stream for connection, health, and reconnect changes
//!
//! ## Lifecycle
//!
//! [`RotorLink::connect`] opens the port and spawns three worker tasks:
//! reader, status poller, and health watchdog. Any worker that hits an
//! unrecoverable I/O error triggers a teardown which, in turn, starts the
//! reconnect supervisor. [`RotorLink::disconnect`] tears everything down
//! without reconnecting. Teardown is idempotent; whichever caller flips
//! the connected flag first performs it, everyone else returns.

pub mod events;
pub mod health;
pub mod port;
pub mod reconnect;

pub use events::{EventChannel, LinkEvent};
pub use health::{HealthMonitor, HealthSnapshot};
pub use port::{
    available_ports, DynPort, PortIdentity, PortOpener, SerialOpener, SerialPortIO,
};
pub use reconnect::{reconnect_delay, ReconnectSnapshot, ReconnectTracker};

use bytes::BytesMut;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::LinkConfig;
use crate::error::{Result, RotorBridgeError};
use crate::protocol::{Command, StatusSample, COMMAND_TERMINATOR};

/// Cadence of the health watchdog
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on a single read await, so workers notice shutdown flags
const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Granularity of interruptible waits in the poller and reconnect loops
const SLEEP_CHUNK: Duration = Duration::from_millis(100);

/// How long teardown waits for each worker before detaching it
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on one write and flush. A device that stops draining
/// must not pin the writer lock, or teardown could never take it
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// A controller that never sends a line terminator must not grow the
/// read buffer without bound
const READ_BUFFER_LIMIT: usize = 8192;

/// Supervised connection to the rotor controller.
///
/// Cloning is cheap and every clone drives the same underlying link, so
/// the motion controller and an API layer can share one connection.
/// Workers hold a reference to the shared state; call
/// [`disconnect`](Self::disconnect) for an orderly shutdown before
/// dropping the last clone.
///
/// # Examples
///
/// ```
/// use rotor_bridge::config::LinkConfig;
/// use rotor_bridge::link::RotorLink;
///
/// let link = RotorLink::new(LinkConfig::default());
/// assert!(!link.is_connected());
/// ```
#[derive(Clone)]
pub struct RotorLink {
    shared: Arc<LinkShared>,
}

struct LinkShared {
    opener: Box<dyn PortOpener>,
    config: LinkConfig,
    events: EventChannel,
    health: HealthMonitor,
    reconnect: ReconnectTracker,

    connected: AtomicBool,
    reconnect_enabled: AtomicBool,
    reconnect_running: AtomicBool,
    read_active: AtomicBool,
    polling_active: AtomicBool,
    health_active: AtomicBool,

    port_path: Mutex<Option<String>>,
    baud_rate: AtomicU32,
    polling_interval_ms: AtomicU64,
    last_rx_ms: AtomicI64,
    last_heartbeat_ms: AtomicI64,

    status: Mutex<Option<StatusSample>>,
    writer: AsyncMutex<Option<WriteHalf<DynPort>>>,
    workers: AsyncMutex<WorkerHandles>,
    reconnect_task: AsyncMutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct WorkerHandles {
    read: Option<JoinHandle<()>>,
    polling: Option<JoinHandle<()>>,
    health: Option<JoinHandle<()>>,
}

impl RotorLink {
    /// Create a link that opens real serial ports
    #[must_use]
    pub fn new(config: LinkConfig) -> Self {
        Self::with_opener(config, Box::new(SerialOpener))
    }

    /// Create a link with a custom port opener (used by tests and
    /// embedders that provide their own transport)
    #[must_use]
    pub fn with_opener(config: LinkConfig, opener: Box<dyn PortOpener>) -> Self {
        let polling_interval_ms = config.polling_interval_ms.max(1);
        let max_reconnect_attempts = config.max_reconnect_attempts;

        Self {
            shared: Arc::new(LinkShared {
                opener,
                config,
                events: EventChannel::new(),
                health: HealthMonitor::new(),
                reconnect: ReconnectTracker::new(max_reconnect_attempts),
                connected: AtomicBool::new(false),
                reconnect_enabled: AtomicBool::new(false),
                reconnect_running: AtomicBool::new(false),
                read_active: AtomicBool::new(false),
                polling_active: AtomicBool::new(false),
                health_active: AtomicBool::new(false),
                port_path: Mutex::new(None),
                baud_rate: AtomicU32::new(0),
                polling_interval_ms: AtomicU64::new(polling_interval_ms),
                last_rx_ms: AtomicI64::new(0),
                last_heartbeat_ms: AtomicI64::new(0),
                status: Mutex::new(None),
                writer: AsyncMutex::new(None),
                workers: AsyncMutex::new(WorkerHandles::default()),
                reconnect_task: AsyncMutex::new(None),
            }),
        }
    }

    /// Open `port` at `baud_rate` and start the worker tasks.
    ///
    /// An existing connection is torn down first; an in-flight reconnect
    /// supervisor is stopped. On failure the link stays disconnected and
    /// no automatic retry is scheduled.
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be opened.
    pub async fn connect(&self, port: &str, baud_rate: u32) -> Result<()> {
        if self.is_connected() {
            Arc::clone(&self.shared)
                .close(Some("Reconnecting to new port"), false)
                .await;
        } else {
            self.shared.halt_reconnect().await;
        }

        let stream = self.shared.opener.open(port, baud_rate).await?;

        if let Ok(mut path) = self.shared.port_path.lock() {
            *path = Some(port.to_string());
        }
        self.shared.baud_rate.store(baud_rate, Ordering::SeqCst);
        Arc::clone(&self.shared).activate(stream).await;
        info!("Connected to {} at {} baud", port, baud_rate);
        Ok(())
    }

    /// Tear the link down and disable automatic reconnection.
    ///
    /// `reason` is forwarded to event subscribers before teardown starts.
    /// Safe to call when already disconnected.
    pub async fn disconnect(&self, reason: Option<&str>) {
        Arc::clone(&self.shared).close(reason, false).await;
    }

    /// Send a raw command line to the controller.
    ///
    /// A carriage return terminator is appended unless `command` already
    /// ends with one.
    ///
    /// # Errors
    ///
    /// Returns [`RotorBridgeError::NotConnected`] when the link is down,
    /// or the I/O error from the port write. A write the device does not
    /// accept within one second fails with a timed-out I/O error.
    pub async fn send_command(&self, command: &str) -> Result<()> {
        self.shared.send_command(command).await
    }

    /// Send a typed protocol command
    ///
    /// # Errors
    ///
    /// Same failure modes as [`send_command`](Self::send_command).
    pub async fn send(&self, command: Command) -> Result<()> {
        self.shared.send_command(&command.encode()).await
    }

    /// Whether the link currently holds an open port
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Port path of the current (or last attempted) connection
    #[must_use]
    pub fn port(&self) -> Option<String> {
        self.shared.port_path()
    }

    /// Baud rate of the current (or last attempted) connection
    #[must_use]
    pub fn baud_rate(&self) -> Option<u32> {
        self.port()
            .map(|_| self.shared.baud_rate.load(Ordering::SeqCst))
    }

    /// Most recent status sample received from the controller
    #[must_use]
    pub fn status(&self) -> Option<StatusSample> {
        match self.shared.status.lock() {
            Ok(status) => status.clone(),
            Err(_) => None,
        }
    }

    /// Current link health
    #[must_use]
    pub fn health_snapshot(&self) -> HealthSnapshot {
        self.shared.health.snapshot()
    }

    /// Current reconnect supervisor state
    #[must_use]
    pub fn reconnect_snapshot(&self) -> ReconnectSnapshot {
        self.shared.reconnect.snapshot()
    }

    /// Change the status polling interval; takes effect within one chunk
    /// of the current wait
    pub fn set_polling_interval_ms(&self, interval_ms: u64) {
        let clamped = interval_ms.max(1);
        self.shared
            .polling_interval_ms
            .store(clamped, Ordering::SeqCst);
        info!("Polling interval updated to {}ms", clamped);
    }

    /// Take the event receiver.
    ///
    /// # Returns
    ///
    /// The receiver on the first call, `None` afterwards. Events emitted
    /// before the first call are dropped.
    pub fn subscribe(&self) -> Option<UnboundedReceiver<LinkEvent>> {
        self.shared.events.subscribe()
    }
}

impl LinkShared {
    fn port_path(&self) -> Option<String> {
        self.port_path.lock().ok().and_then(|path| path.clone())
    }

    async fn send_command(&self, command: &str) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(RotorBridgeError::NotConnected);
        }

        let mut framed = command.to_string();
        if !framed.ends_with(COMMAND_TERMINATOR) {
            framed.push(COMMAND_TERMINATOR);
        }

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(RotorBridgeError::NotConnected);
        };
        let write = async {
            writer.write_all(framed.as_bytes()).await?;
            writer.flush().await
        };
        match tokio::time::timeout(WRITE_TIMEOUT, write).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RotorBridgeError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "serial write stalled",
                )));
            }
        }
        debug!("Sent: {}", framed.trim_end());
        Ok(())
    }

    /// Bring a freshly opened port online: reset timers, store the write
    /// half, spawn workers, and announce the new state
    async fn activate(self: Arc<Self>, stream: DynPort) {
        let now_ms = Utc::now().timestamp_millis();
        self.last_rx_ms.store(now_ms, Ordering::SeqCst);
        self.last_heartbeat_ms.store(now_ms, Ordering::SeqCst);
        self.read_active.store(true, Ordering::SeqCst);
        self.polling_active.store(true, Ordering::SeqCst);
        self.health_active.store(true, Ordering::SeqCst);
        self.reconnect_enabled.store(true, Ordering::SeqCst);

        let (read_half, write_half) = tokio::io::split(stream);
        *self.writer.lock().await = Some(write_half);
        self.connected.store(true, Ordering::SeqCst);

        {
            let mut workers = self.workers.lock().await;
            workers.read = Some(tokio::spawn(Arc::clone(&self).read_loop(read_half)));
            workers.polling = Some(tokio::spawn(Arc::clone(&self).polling_loop()));
            workers.health = Some(tokio::spawn(Arc::clone(&self).health_loop()));
        }

        let reset = self.reconnect.update(false, 0, None, None);
        self.events.emit(LinkEvent::Reconnect(reset));
        if let Some(snapshot) = self.health.update(true, Some(now_ms)) {
            self.events.emit(LinkEvent::Health(snapshot));
        }
        self.events.emit(LinkEvent::ConnectionState {
            connected: true,
            port: self.port_path(),
            baud_rate: Some(self.baud_rate.load(Ordering::SeqCst)),
        });
    }

    /// Tear the link down.
    ///
    /// Only the caller that flips the connected flag performs worker
    /// teardown. With `allow_reconnect` the supervisor is started
    /// afterwards; without it, reconnection is disabled and the stored
    /// port forgotten.
    async fn close(self: Arc<Self>, reason: Option<&str>, allow_reconnect: bool) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        let was_reconnecting = self.reconnect_running.load(Ordering::SeqCst);

        if was_connected {
            if let Some(reason) = reason {
                self.events.emit(LinkEvent::DisconnectReason {
                    reason: reason.to_string(),
                });
            }
            self.read_active.store(false, Ordering::SeqCst);
            self.polling_active.store(false, Ordering::SeqCst);
            self.health_active.store(false, Ordering::SeqCst);
            *self.writer.lock().await = None;
            self.join_workers().await;
        }

        if allow_reconnect {
            if was_connected {
                Arc::clone(&self).start_reconnect().await;
            }
        } else {
            // Join before resetting the snapshot so a mid-failure update
            // from the supervisor cannot land after the reset
            self.reconnect_enabled.store(false, Ordering::SeqCst);
            self.join_reconnect_task().await;
            let final_attempt = self.reconnect.snapshot().attempt;
            let reset = self.reconnect.update(false, final_attempt, None, None);
            self.events.emit(LinkEvent::Reconnect(reset));
            if let Ok(mut path) = self.port_path.lock() {
                *path = None;
            }
        }

        if was_connected {
            if let Ok(mut status) = self.status.lock() {
                *status = None;
            }
            let last_seen = self.health.snapshot().last_seen_ms;
            if let Some(snapshot) = self.health.update(false, last_seen) {
                self.events.emit(LinkEvent::Health(snapshot));
            }
            self.events.emit(LinkEvent::ConnectionState {
                connected: false,
                port: None,
                baud_rate: None,
            });
            info!("Disconnected");
        } else if !allow_reconnect && was_reconnecting {
            info!("Reconnect supervisor stopped");
        }
    }

    /// Quietly stop any reconnect supervisor before an explicit connect
    async fn halt_reconnect(&self) {
        self.reconnect_enabled.store(false, Ordering::SeqCst);
        let was_running = self.reconnect_running.load(Ordering::SeqCst);
        self.join_reconnect_task().await;
        if was_running {
            let snapshot = self.reconnect.snapshot();
            let halted =
                self.reconnect
                    .update(false, snapshot.attempt, None, snapshot.last_error);
            self.events.emit(LinkEvent::Reconnect(halted));
        }
    }

    /// Worker-side failure path: report the reason, mark unhealthy, and
    /// hand teardown to a fresh task so workers never join themselves
    fn trigger_error_teardown(self: Arc<Self>, reason: String) {
        error!("Connection error: {}", reason);
        self.events.emit(LinkEvent::DisconnectReason { reason });
        let last_seen = self.health.snapshot().last_seen_ms;
        if let Some(snapshot) = self.health.update(false, last_seen) {
            self.events.emit(LinkEvent::Health(snapshot));
        }

        tokio::spawn(async move {
            self.close(None, true).await;
        });
    }

    async fn join_workers(&self) {
        let handles = {
            let mut workers = self.workers.lock().await;
            [
                workers.read.take(),
                workers.polling.take(),
                workers.health.take(),
            ]
        };

        for handle in handles.into_iter().flatten() {
            match tokio::time::timeout(WORKER_JOIN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Worker task ended abnormally: {}", e),
                Err(_) => warn!(
                    "Worker did not stop within {:?}, detaching",
                    WORKER_JOIN_TIMEOUT
                ),
            }
        }
    }

    async fn join_reconnect_task(&self) {
        let handle = self.reconnect_task.lock().await.take();
        let Some(handle) = handle else {
            return;
        };
        match tokio::time::timeout(WORKER_JOIN_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Reconnect task ended abnormally: {}", e),
            Err(_) => warn!(
                "Reconnect task did not stop within {:?}, detaching",
                WORKER_JOIN_TIMEOUT
            ),
        }
    }

    async fn start_reconnect(self: Arc<Self>) {
        if !self.reconnect_enabled.load(Ordering::SeqCst) {
            return;
        }
        if self.port_path().is_none() {
            return;
        }
        if self.reconnect_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let shared = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            shared.reconnect_loop().await;
        });
        *self.reconnect_task.lock().await = Some(handle);
    }

    async fn reconnect_loop(self: Arc<Self>) {
        let max_attempts = self.reconnect.max_attempts();
        let mut attempts: u32 = 0;

        loop {
            if !self.reconnect_enabled.load(Ordering::SeqCst) {
                break;
            }
            let Some(port) = self.port_path() else {
                break;
            };
            let baud_rate = self.baud_rate.load(Ordering::SeqCst);

            if max_attempts > 0 && attempts >= max_attempts {
                warn!("Giving up after {} reconnect attempts", attempts);
                let exhausted = self.reconnect.update(
                    false,
                    attempts,
                    None,
                    Some("Max reconnect attempts reached".to_string()),
                );
                self.events.emit(LinkEvent::Reconnect(exhausted));
                break;
            }

            attempts += 1;
            let delay = reconnect_delay(
                attempts,
                self.config.reconnect_base_delay_s,
                self.config.reconnect_max_delay_s,
            );
            let next_retry_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;
            let carried_error = self.reconnect.last_error();
            let waiting = self
                .reconnect
                .update(true, attempts, Some(next_retry_ms), carried_error);
            self.events.emit(LinkEvent::Reconnect(waiting));
            info!(
                "Reconnect attempt {} to {} in {:.1}s",
                attempts,
                port,
                delay.as_secs_f64()
            );

            if !self.wait_while_reconnect_enabled(delay).await {
                break;
            }

            match self.opener.open(&port, baud_rate).await {
                Ok(stream) => {
                    // A disconnect may have raced the open; drop the port
                    if !self.reconnect_enabled.load(Ordering::SeqCst) {
                        break;
                    }
                    // Cleared before the workers start, so a failure
                    // during bring-up can spawn the next supervisor
                    self.reconnect_running.store(false, Ordering::SeqCst);
                    Arc::clone(&self).activate(stream).await;
                    info!("Reconnected to {} at {} baud", port, baud_rate);
                    return;
                }
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempts, e);
                    let failed = self
                        .reconnect
                        .update(true, attempts, None, Some(e.to_string()));
                    self.events.emit(LinkEvent::Reconnect(failed));
                }
            }
        }

        self.reconnect_running.store(false, Ordering::SeqCst);
    }

    /// Sleep in chunks so a disable is noticed promptly; returns whether
    /// reconnection is still enabled
    async fn wait_while_reconnect_enabled(&self, delay: Duration) -> bool {
        let mut elapsed = Duration::ZERO;
        while elapsed < delay {
            if !self.reconnect_enabled.load(Ordering::SeqCst) {
                return false;
            }
            let step = SLEEP_CHUNK.min(delay - elapsed);
            tokio::time::sleep(step).await;
            elapsed += step;
        }
        self.reconnect_enabled.load(Ordering::SeqCst)
    }

    async fn read_loop(self: Arc<Self>, mut reader: ReadHalf<DynPort>) {
        let mut chunk = [0u8; 256];
        let mut buffer = BytesMut::with_capacity(1024);

        while self.read_active.load(Ordering::SeqCst) {
            match tokio::time::timeout(READ_POLL_INTERVAL, reader.read(&mut chunk)).await {
                // Idle tick, go back and re-check the active flag
                Err(_) => continue,
                Ok(Ok(0)) => {
                    if self.read_active.load(Ordering::SeqCst) {
                        self.trigger_error_teardown("Serial connection closed".to_string());
                    }
                    break;
                }
                Ok(Ok(n)) => {
                    self.last_rx_ms
                        .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
                    buffer.extend_from_slice(&chunk[..n]);
                    self.drain_lines(&mut buffer);
                    if buffer.len() > READ_BUFFER_LIMIT {
                        warn!(
                            "Discarding {} buffered bytes without line terminator",
                            buffer.len()
                        );
                        buffer.clear();
                    }
                }
                Ok(Err(e)) => {
                    if self.read_active.load(Ordering::SeqCst) {
                        self.trigger_error_teardown(format!("Serial read error: {e}"));
                    }
                    break;
                }
            }
        }
    }

    fn drain_lines(&self, buffer: &mut BytesMut) {
        while let Some(pos) = buffer
            .iter()
            .position(|&b| b == b'\r' || b == b'\n')
        {
            let line_bytes = buffer.split_to(pos + 1);
            let text = String::from_utf8_lossy(&line_bytes[..pos]);
            let line = text.trim();
            if line.is_empty() {
                continue;
            }
            self.process_status_line(line);
        }
    }

    /// Every non-empty line replaces the stored sample, status frame or
    /// not, and counts as proof of life
    fn process_status_line(&self, line: &str) {
        trace!("Line from controller: {}", line);
        let sample = StatusSample::parse(line);
        let seen_ms = sample.timestamp_ms;
        if let Ok(mut status) = self.status.lock() {
            *status = Some(sample);
        }
        if let Some(snapshot) = self.health.update(true, Some(seen_ms)) {
            self.events.emit(LinkEvent::Health(snapshot));
        }
    }

    async fn polling_loop(self: Arc<Self>) {
        while self.polling_active.load(Ordering::SeqCst) && self.connected.load(Ordering::SeqCst) {
            if let Err(e) = self.send_command("C2").await {
                if self.polling_active.load(Ordering::SeqCst) {
                    self.trigger_error_teardown(format!("Polling error: {e}"));
                }
                break;
            }

            // The interval is re-read every chunk so runtime changes
            // apply mid-wait
            let mut elapsed = Duration::ZERO;
            loop {
                if !self.polling_active.load(Ordering::SeqCst)
                    || !self.connected.load(Ordering::SeqCst)
                {
                    return;
                }
                let target = Duration::from_millis(self.polling_interval_ms.load(Ordering::SeqCst));
                if elapsed >= target {
                    break;
                }
                let step = SLEEP_CHUNK.min(target - elapsed);
                tokio::time::sleep(step).await;
                elapsed += step;
            }
        }
    }

    async fn health_loop(self: Arc<Self>) {
        while self.health_active.load(Ordering::SeqCst) {
            if !self.connected.load(Ordering::SeqCst) {
                tokio::time::sleep(HEALTH_CHECK_INTERVAL).await;
                continue;
            }

            let now_ms = Utc::now().timestamp_millis();
            let stale_s =
                now_ms.saturating_sub(self.last_rx_ms.load(Ordering::SeqCst)) as f64 / 1000.0;
            let timeout_s = self.config.health_timeout_s;
            if timeout_s > 0.0 && stale_s > timeout_s {
                self.trigger_error_teardown(format!(
                    "No data received for {:.1}s (health timeout)",
                    stale_s
                ));
                break;
            }

            let heartbeat_s = self.config.heartbeat_interval_s;
            if heartbeat_s > 0.0 {
                let since_heartbeat_s = now_ms
                    .saturating_sub(self.last_heartbeat_ms.load(Ordering::SeqCst))
                    as f64
                    / 1000.0;
                if since_heartbeat_s >= heartbeat_s {
                    match self.send_command("C2").await {
                        Ok(()) => self.last_heartbeat_ms.store(now_ms, Ordering::SeqCst),
                        Err(e) => {
                            if self.health_active.load(Ordering::SeqCst) {
                                self.trigger_error_teardown(format!("Heartbeat failed: {e}"));
                            }
                            break;
                        }
                    }
                }
            }

            tokio::time::sleep(HEALTH_CHECK_INTERVAL).await;
        }
    }
}
