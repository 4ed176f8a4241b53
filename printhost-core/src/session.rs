//! The session engine itself. [`Session`] is the public, cheaply-cloned
//! handle; [`Monitor`] is the actor that owns the [`Transport`] exclusively
//! and runs the connection/print state machine.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use printhost_rtcompat::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, instrument, warn};

use crate::{
    baud,
    config::SessionConfig,
    error::SessionError,
    gcode::{GcodeEntry, Section},
    log::{Direction, LogRing},
    observer::{NullObserver, SessionObserver, TemperatureReading},
    parser,
    protocol::{matches_gcode, rewrite_feedrate, FeedrateModifiers, SendCoordinator},
    state::State,
    transport::{Line, Transport},
};

/// Lines sent in one burst when a paused host print resumes, refilling
/// whatever buffer the firmware drained while idle. The only place more
/// than one line goes out without waiting for an intervening `ok`.
const PAUSE_RESUME_REFILL_LINES: usize = 6;

/// Read-only state snapshot published to every [`Session`] handle. Cheap to
/// clone; callers poll it instead of blocking the monitor for a getter.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub state: State,
    pub temperature: TemperatureReading,
    /// Bytes done/total for an SD print, or lines sent/total for a host
    /// print — whichever is active, the other print kind leaves these at 0.
    pub print_position: u64,
    pub print_total: u64,
    pub error: Option<String>,
    pub feedrate_modifiers: HashMap<String, f64>,
    pub print_start_time: Option<Instant>,
    pub heatup_wait_time_lost: Duration,
    pub current_z: Option<f64>,
    pub sd_available: bool,
    pub sd_files: Vec<String>,
    /// `true` while `print_position`/`print_total` describe an SD print
    /// (bytes) rather than a host print (line count).
    pub sd_print_active: bool,
}

#[derive(Debug)]
enum Control {
    Connect,
    Disconnect,
    SendGcode(String),
    PrintGcode(Vec<GcodeEntry>),
    PrintSdFile(String),
    StartSdFileTransfer(String),
    EndSdFileTransfer(String),
    Pause,
    Resume,
    Cancel,
    SetFeedrateModifier(Section, f64),
    Shutdown,
}

/// Cloneable handle to a running session. Every method sends a [`Control`]
/// message to the monitor task and returns once it's been accepted for
/// processing, not once it completes; observe completion through
/// [`SessionObserver`] or [`Session::snapshot`].
#[derive(Debug, Clone)]
pub struct Session {
    control_tx: mpsc::Sender<Control>,
    snapshot_rx: watch::Receiver<Snapshot>,
}

impl Session {
    /// Spawns the monitor task and returns a handle to it. `transport` is a
    /// already-open (but not yet handshaken) connection; the monitor drives
    /// it through [`State::Connecting`] itself.
    pub fn spawn<T, O>(transport: T, config: SessionConfig, observer: O) -> Session
    where
        T: Transport,
        O: SessionObserver,
    {
        let (control_tx, control_rx) = mpsc::channel(32);
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let monitor = Monitor {
            transport,
            config,
            observer: Arc::new(observer),
            control_rx,
            snapshot_tx,
            state: State::Offline,
            send: SendCoordinator::new(),
            log: LogRing::new(),
            feedrates: FeedrateModifiers::new(),
            paused: false,
            cancel_requested: false,
            sd_available: false,
            sd_files: Vec::new(),
            sd_file_list_active: false,
            sd_file: None,
            sd_file_size: 0,
            sd_printing: false,
            heatup_wait_start: None,
            heatup_wait_time_lost: Duration::ZERO,
            current_z: None,
            print_start_time: None,
        };
        printhost_rtcompat::spawn(monitor.run());
        Session {
            control_tx,
            snapshot_rx,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn state(&self) -> State {
        self.snapshot_rx.borrow().state
    }

    /// Lines sent (host print) or bytes done (SD print) so far.
    pub fn print_pos(&self) -> u64 {
        self.snapshot().print_position
    }

    /// Wall-clock time spent printing so far, minus any time lost waiting
    /// on `M109`/`M190` heatup. `None` if no print has started.
    pub fn print_time(&self) -> Option<Duration> {
        let snapshot = self.snapshot();
        let start = snapshot.print_start_time?;
        let elapsed = printhost_rtcompat::time::now().saturating_duration_since(start);
        Some(elapsed.saturating_sub(snapshot.heatup_wait_time_lost))
    }

    /// Estimated remaining print time. `None` before there's enough data to
    /// extrapolate from (SD: no progress reported yet; host: fewer than 200
    /// lines sent).
    pub fn print_time_remaining_estimate(&self) -> Option<Duration> {
        let snapshot = self.snapshot();
        let elapsed = self.print_time()?;
        let elapsed_min = elapsed.as_secs_f64() / 60.0;
        let remaining_min = if snapshot.sd_print_active {
            let (pos, size) = (snapshot.print_position, snapshot.print_total);
            if size == 0 {
                return None;
            }
            if pos > 0 {
                elapsed_min * (size as f64 / pos as f64 - 1.0)
            } else {
                elapsed_min * size as f64
            }
        } else {
            let (pos, total) = (snapshot.print_position, snapshot.print_total);
            if pos < 200 {
                return None;
            }
            elapsed_min * ((total.saturating_sub(100)) as f64 / (pos.saturating_sub(100)) as f64 - 1.0)
        };
        Some(Duration::from_secs_f64(remaining_min.max(0.0) * 60.0))
    }

    /// `(bytes done, bytes total)` for the current SD print, if one is
    /// active.
    pub fn sd_progress(&self) -> Option<(u64, u64)> {
        let snapshot = self.snapshot();
        snapshot.sd_print_active.then_some((snapshot.print_position, snapshot.print_total))
    }

    pub fn temp(&self) -> f32 {
        self.snapshot().temperature.tool_actual
    }

    pub fn bed_temp(&self) -> Option<f32> {
        self.snapshot().temperature.bed_actual
    }

    pub fn feedrate_modifiers(&self) -> HashMap<String, f64> {
        self.snapshot().feedrate_modifiers
    }

    pub async fn connect(&self) -> Result<(), SessionError> {
        self.send(Control::Connect).await
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.send(Control::Disconnect).await
    }

    pub async fn send_gcode(&self, cmd: impl Into<String>) -> Result<(), SessionError> {
        self.send(Control::SendGcode(cmd.into())).await
    }

    pub async fn print_gcode(&self, entries: Vec<GcodeEntry>) -> Result<(), SessionError> {
        self.check_ready_to_print()?;
        self.send(Control::PrintGcode(entries)).await
    }

    pub async fn print_sd_file(&self, name: impl Into<String>) -> Result<(), SessionError> {
        self.check_ready_to_print()?;
        self.send(Control::PrintSdFile(name.into())).await
    }

    /// Begins streaming a file onto the firmware's SD card (`M28`). Requires
    /// operational & not printing; transitions [`State::ReceivingFile`].
    pub async fn start_sd_file_transfer(&self, name: impl Into<String>) -> Result<(), SessionError> {
        self.check_ready_to_print()?;
        self.send(Control::StartSdFileTransfer(name.into())).await
    }

    /// Checks the `printGCode`/`printSdFile`/`startSdFileTransfer`
    /// precondition: operational and not already busy. Checked here (against
    /// the cheaply-read snapshot) rather than only inside the monitor, since
    /// [`Self::send`] can't report back a failure the monitor discovers
    /// after accepting the message.
    fn check_ready_to_print(&self) -> Result<(), SessionError> {
        let state = self.state();
        if !state.is_operational() {
            return Err(SessionError::NotOperational);
        }
        if state.is_busy() {
            return Err(SessionError::AlreadyPrinting);
        }
        Ok(())
    }

    /// Ends a file upload started with [`Self::start_sd_file_transfer`]
    /// (`M29`), returning to [`State::Operational`].
    pub async fn end_sd_file_transfer(&self, name: impl Into<String>) -> Result<(), SessionError> {
        self.send(Control::EndSdFileTransfer(name.into())).await
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.send(Control::Pause).await
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.send(Control::Resume).await
    }

    pub async fn cancel(&self) -> Result<(), SessionError> {
        self.send(Control::Cancel).await
    }

    pub async fn set_feedrate_modifier(&self, section: Section, multiplier: f64) -> Result<(), SessionError> {
        self.send(Control::SetFeedrateModifier(section, multiplier)).await
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(Control::Shutdown).await
    }

    async fn send(&self, control: Control) -> Result<(), SessionError> {
        self.control_tx
            .send(control)
            .await
            .map_err(|_| SessionError::NotConnected)
    }
}

/// The actor. Exclusively owns `transport`; every write to it happens on
/// this task, so a send lock is unnecessary — there is only ever one
/// writer because there is only one task.
struct Monitor<T, O> {
    transport: T,
    config: SessionConfig,
    observer: Arc<O>,
    control_rx: mpsc::Receiver<Control>,
    snapshot_tx: watch::Sender<Snapshot>,
    state: State,
    send: SendCoordinator,
    log: LogRing,
    feedrates: FeedrateModifiers,
    paused: bool,
    cancel_requested: bool,
    sd_available: bool,
    sd_files: Vec<String>,
    /// Accumulating a `Begin file list` .. `End file list` directory
    /// listing; while set, received lines are names, not status chatter.
    sd_file_list_active: bool,
    sd_file: Option<String>,
    sd_file_size: u64,
    sd_printing: bool,
    /// Set to `now()` whenever `M109`/`M190` goes out; cleared once the
    /// firmware stops reporting bare (non-`ok`) temperature lines.
    heatup_wait_start: Option<Instant>,
    heatup_wait_time_lost: Duration,
    current_z: Option<f64>,
    print_start_time: Option<Instant>,
}

impl<T: Transport, O: SessionObserver> Monitor<T, O> {
    #[instrument(level = "debug", skip(self))]
    async fn run(mut self) {
        self.set_state(State::Connecting);
        if let Err(err) = self.handshake().await {
            warn!(%err, "handshake failed");
            self.fail(&err.to_string());
            self.drain_until_shutdown().await;
            return;
        }
        self.set_state(State::Operational);

        let mut print_queue: Option<PrintQueue> = None;
        loop {
            tokio::select! {
                biased;

                control = self.control_rx.recv() => {
                    match control {
                        Some(Control::Shutdown) | None => break,
                        Some(Control::Disconnect) => {
                            self.transport.close();
                            self.set_state(State::Closed);
                            break;
                        }
                        Some(control) => self.handle_control(control, &mut print_queue).await,
                    }
                }

                line = self.transport.read_line() => {
                    match line {
                        Ok(Line::Data(bytes)) => self.handle_line(&bytes, &mut print_queue).await,
                        Ok(Line::Timeout) => {}
                        Ok(Line::Closed) | Err(_) => {
                            self.fail("connection closed unexpectedly");
                            break;
                        }
                    }
                }
            }
        }

        self.transport.close();
        self.set_state(State::Closed);
    }

    async fn drain_until_shutdown(&mut self) {
        while let Some(control) = self.control_rx.recv().await {
            if matches!(control, Control::Shutdown) {
                break;
            }
        }
    }

    /// Opens the line with the firmware. With a fixed baud configured, this
    /// is just waiting for the `start` banner followed by an ack. With no
    /// baud configured it sweeps the candidate list, budgeting the full
    /// connection timeout separately for each candidate.
    async fn handshake(&mut self) -> Result<(), SessionError> {
        self.transport.set_read_timeout(self.config.read_timeout);
        let budget = self.config.connection_timeout;
        match self.config.baud_rate {
            Some(fixed) => {
                let attempt = async {
                    self.transport
                        .set_baud_rate(fixed)
                        .map_err(crate::error::TransportError::from)?;
                    self.await_start_then_ok().await
                };
                match tokio::time::timeout(budget, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(SessionError::NotConnected),
                }
            }
            None => self.detect_baudrate().await,
        }
    }

    /// Waits for a `start` banner, then for the first line containing `ok`
    /// after it. Skipped when the policy doesn't require seeing `start`.
    async fn await_start_then_ok(&mut self) -> Result<(), SessionError> {
        let mut start_seen = !self.config.wait_for_start_on_connect;
        loop {
            match self.transport.read_line().await {
                Ok(Line::Data(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes);
                    if text.contains("start") {
                        start_seen = true;
                    }
                    if start_seen && parser::looks_like_ack(&text) {
                        self.transport.set_read_timeout(Duration::from_secs(2));
                        self.send.reset_line_number(0);
                        return Ok(());
                    }
                }
                Ok(Line::Timeout) => {
                    if start_seen {
                        let probe = self.send.frame_unnumbered("M105");
                        let _ = self.transport.write_all(&probe).await;
                    }
                }
                Ok(Line::Closed) | Err(_) => return Err(SessionError::NotConnected),
            }
        }
    }

    /// Tries each candidate baud in turn, each given its own full
    /// `connection_timeout` budget rather than sharing one across the whole
    /// sweep — real hardware that isn't on the first candidate needs every
    /// candidate to get a fair shot.
    async fn detect_baudrate(&mut self) -> Result<(), SessionError> {
        let budget = self.config.connection_timeout;
        for candidate in baud::detect_list(None) {
            self.transport
                .set_baud_rate(candidate)
                .map_err(crate::error::TransportError::from)?;
            self.transport.set_read_timeout(Duration::from_millis(500));

            match tokio::time::timeout(budget, self.probe_candidate()).await {
                Ok(ProbeOutcome::Committed) => {
                    let commit = self.send.frame_unnumbered("M999");
                    let _ = self.transport.write_all(&commit).await;
                    self.transport.set_read_timeout(Duration::from_secs(2));
                    self.send.reset_line_number(0);
                    return Ok(());
                }
                Ok(ProbeOutcome::Closed) => return Err(SessionError::NotConnected),
                Ok(ProbeOutcome::Exhausted) | Err(_) => continue,
            }
        }
        Err(SessionError::NotConnected)
    }

    /// Probes one already-selected baud rate, up to `RETRIES_PER_CANDIDATE`
    /// times, confirming once `SUCCESSES_TO_COMMIT` replies in a row contain
    /// both `ok` and `T:`.
    async fn probe_candidate(&mut self) -> ProbeOutcome {
        let mut successes = 0u8;
        let mut retries = baud::RETRIES_PER_CANDIDATE;
        while retries > 0 {
            let probe = self.send.frame_unnumbered("M105");
            if self.transport.write_all(&probe).await.is_err() {
                return ProbeOutcome::Closed;
            }
            match self.transport.read_line().await {
                Ok(Line::Data(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes);
                    if text.contains("ok") && text.contains("T:") {
                        successes += 1;
                        if successes >= baud::SUCCESSES_TO_COMMIT {
                            return ProbeOutcome::Committed;
                        }
                    }
                }
                Ok(Line::Timeout) => retries -= 1,
                Ok(Line::Closed) | Err(_) => return ProbeOutcome::Closed,
            }
        }
        ProbeOutcome::Exhausted
    }

    fn set_state(&mut self, new: State) {
        let old = self.state;
        if old == new {
            return;
        }
        self.state = new;
        self.observer.on_state_change(old, new);
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_modify(|snapshot| {
            snapshot.state = self.state;
        });
    }

    /// A transport-level failure: closes the connection and moves to
    /// `ClosedWithError`. Not for firmware-reported fatal errors, which stay
    /// connected — see [`Self::raise_error`].
    fn fail(&mut self, message: &str) {
        self.log.push(Direction::Info, message.to_string());
        self.observer.on_error(message);
        self.snapshot_tx.send_modify(|snapshot| {
            snapshot.error = Some(message.to_string());
        });
        self.set_state(State::ClosedWithError);
    }

    /// A fatal condition reported by the firmware itself: the connection
    /// stays open (the firmware is still talking, just unhappy), but the
    /// session moves to `Error` until the outer application decides what to
    /// do about it.
    fn raise_error(&mut self, message: &str) {
        self.log.push(Direction::Info, message.to_string());
        self.observer.on_error(message);
        self.snapshot_tx.send_modify(|snapshot| {
            snapshot.error = Some(message.to_string());
        });
        self.set_state(State::Error);
    }

    async fn handle_control(&mut self, control: Control, print_queue: &mut Option<PrintQueue>) {
        match control {
            Control::Shutdown | Control::Disconnect => unreachable!("handled by caller"),
            Control::Connect => {}
            Control::SendGcode(cmd) => {
                self.write_command(&cmd, false).await;
            }
            Control::PrintGcode(entries) => {
                if self.state.is_busy() {
                    warn!("print requested while already busy");
                    return;
                }
                *print_queue = Some(PrintQueue::new(entries));
                self.paused = false;
                self.cancel_requested = false;
                self.current_z = None;
                self.print_start_time = Some(printhost_rtcompat::time::now());
                self.heatup_wait_start = None;
                self.heatup_wait_time_lost = Duration::ZERO;
                self.snapshot_tx.send_modify(|snapshot| {
                    snapshot.sd_print_active = false;
                    snapshot.print_start_time = self.print_start_time;
                    snapshot.heatup_wait_time_lost = Duration::ZERO;
                });
                self.set_state(State::Printing);
                self.observer.on_print_started();
                self.advance_print_queue(print_queue).await;
            }
            Control::PrintSdFile(name) => {
                self.write_command(&format!("M23 {name}"), false).await;
                self.write_command("M24", false).await;
                self.sd_printing = true;
                self.print_start_time = Some(printhost_rtcompat::time::now());
                self.heatup_wait_start = None;
                self.heatup_wait_time_lost = Duration::ZERO;
                self.snapshot_tx.send_modify(|snapshot| {
                    snapshot.sd_print_active = true;
                    snapshot.print_start_time = self.print_start_time;
                    snapshot.heatup_wait_time_lost = Duration::ZERO;
                });
                self.set_state(State::Printing);
                self.observer.on_print_started();
            }
            Control::StartSdFileTransfer(name) => {
                if self.state.is_busy() {
                    warn!("file transfer requested while already busy");
                    return;
                }
                let name = name.to_lowercase();
                self.write_command(&format!("M28 {name}"), false).await;
                self.set_state(State::ReceivingFile);
            }
            Control::EndSdFileTransfer(name) => {
                let name = name.to_lowercase();
                self.write_command(&format!("M29 {name}"), false).await;
                self.set_state(State::Operational);
            }
            Control::Pause => {
                if self.state.is_printing() {
                    self.paused = true;
                    if print_queue.is_none() {
                        self.write_command("M25", false).await;
                    }
                    self.set_state(State::Paused);
                    self.observer.on_print_paused();
                }
            }
            Control::Resume => {
                if self.state.is_paused() {
                    self.paused = false;
                    self.set_state(State::Printing);
                    let is_host_print = print_queue.is_some();
                    if is_host_print {
                        for _ in 0..PAUSE_RESUME_REFILL_LINES {
                            self.advance_print_queue(print_queue).await;
                            if print_queue.is_none() {
                                break;
                            }
                        }
                    } else {
                        self.write_command("M24", false).await;
                    }
                    self.observer.on_print_resumed();
                }
            }
            Control::Cancel => {
                self.cancel_requested = true;
                let was_sd_print = print_queue.is_none() && self.state.is_busy();
                *print_queue = None;
                if was_sd_print {
                    self.write_command("M25", false).await;
                    self.write_command("M26 S0", false).await;
                    self.sd_printing = false;
                }
                self.observer.on_print_cancelled();
                self.set_state(State::Operational);
            }
            Control::SetFeedrateModifier(section, multiplier) => {
                self.feedrates.set(section.0, multiplier);
                let snapshot_modifiers = self.feedrates.all();
                self.snapshot_tx.send_modify(|snapshot| snapshot.feedrate_modifiers = snapshot_modifiers);
            }
        }
    }

    /// Sends exactly the next queued line — "one line per `ok`" host-print
    /// pacing — substituting firmware unattended-pause codes and rewriting
    /// per-section feedrates along the way, and clears the queue once
    /// exhausted.
    async fn advance_print_queue(&mut self, print_queue: &mut Option<PrintQueue>) {
        let Some(queue) = print_queue else { return };
        self.send_next_print_line(queue).await;
        if queue.is_done() {
            self.observer.on_print_done();
            self.set_state(State::Operational);
            *print_queue = None;
        }
    }

    async fn send_next_print_line(&mut self, queue: &mut PrintQueue) {
        let Some(entry) = queue.next() else { return };
        let command = entry.command().to_string();
        let section = entry.section().map(|s| s.0.clone());

        // M0/M1 are firmware unattended-pause codes; substitute a status
        // poll and pause the host side instead of letting the firmware hang
        // waiting for a button press it'll never get.
        if matches_gcode(&command, "M0") || matches_gcode(&command, "M1") {
            self.write_command("M105", true).await;
            self.paused = true;
            self.set_state(State::Paused);
            self.observer.on_print_paused();
            self.publish_print_position(queue);
            return;
        }

        let cmd = match section.as_deref().and_then(|s| self.feedrates.get(s)) {
            Some(multiplier) => rewrite_feedrate(&command, multiplier),
            None => command,
        };

        if let Some(z) = parser::parse_z_word(&cmd) {
            if self.current_z != Some(z) {
                self.current_z = Some(z);
                self.snapshot_tx.send_modify(|snapshot| snapshot.current_z = Some(z));
                self.observer.on_z_change(z);
            }
        }

        self.write_command(&cmd, true).await;
        self.publish_print_position(queue);
    }

    fn publish_print_position(&self, queue: &PrintQueue) {
        let position = queue.position();
        let total = queue.total();
        self.snapshot_tx.send_modify(|snapshot| {
            snapshot.print_position = position;
            snapshot.print_total = total;
        });
        self.observer
            .on_print_progress(if total > 0 { position as f32 / total as f32 * 100.0 } else { 0.0 });
    }

    /// Sends one command. `checksummed` marks it as part of the print
    /// stream (always numbered); anything else is numbered only when
    /// `always_send_checksum` is set, otherwise sent bare. `M110` is always
    /// special-cased regardless of `checksummed`, since it resets the line
    /// counter rather than using it.
    #[instrument(level = "debug", skip(self))]
    async fn write_command(&mut self, cmd: &str, checksummed: bool) {
        if matches_gcode(cmd, "M110") {
            self.send_m110(cmd, checksummed).await;
            return;
        }
        if matches_gcode(cmd, "M109") || matches_gcode(cmd, "M190") {
            self.heatup_wait_start = Some(printhost_rtcompat::time::now());
        }
        let frame = if checksummed || self.config.always_send_checksum {
            self.send.frame_next(cmd)
        } else {
            self.send.frame_unnumbered(cmd)
        };
        self.transmit(cmd, frame).await;
    }

    /// `M110` resets the line-number counter and clears transmit history
    /// wherever it comes from — the handshake's own `M110 N0` or a live
    /// `send_gcode("M110 N...")` — not just during the handshake.
    async fn send_m110(&mut self, cmd: &str, checksummed: bool) {
        let new_line_number = parser::parse_m110_line_number(cmd).unwrap_or(0);
        let frame = if self.config.reset_line_numbers_with_prefixed_n {
            self.send.frame_at(new_line_number, "M110")
        } else if checksummed || self.config.always_send_checksum {
            self.send.frame_next(cmd)
        } else {
            self.send.frame_unnumbered(cmd)
        };
        self.transmit(cmd, frame).await;
        self.send.reset_line_number(new_line_number);
    }

    async fn transmit(&mut self, cmd: &str, frame: Bytes) {
        self.log.push(Direction::Sent, cmd.to_string());
        debug!(%cmd, "sent");
        if let Err(err) = self.transport.write_all(&frame).await {
            warn!(%err, "write failed, retrying once");
            if self.transport.write_all(&frame).await.is_err() {
                self.fail(&crate::error::TransportError::WriteTimeout.to_string());
            }
        }
    }

    /// The SD-card side of the status-line chain: card availability, file
    /// listings, upload/print progress. Returns `false` for a line that
    /// doesn't match any of these, so the caller can fall through to the
    /// generic message branch.
    fn handle_sd_event(&mut self, text: &str) -> bool {
        if text.contains("SD init fail") {
            self.sd_available = false;
            self.sd_files.clear();
            self.snapshot_tx.send_modify(|snapshot| snapshot.sd_available = false);
            self.observer.on_sd_state_change(false);
        } else if text.contains("SD card ok") {
            self.sd_available = true;
            self.snapshot_tx.send_modify(|snapshot| snapshot.sd_available = true);
            self.observer.on_sd_state_change(true);
        } else if text.contains("Begin file list") {
            self.sd_files.clear();
            self.sd_file_list_active = true;
        } else if text.contains("End file list") {
            self.sd_file_list_active = false;
            let files = self.sd_files.clone();
            self.snapshot_tx.send_modify(|snapshot| snapshot.sd_files = files);
            self.observer.on_sd_files(&self.sd_files);
        } else if let Some((done, total)) = parser::parse_sd_progress(text) {
            self.snapshot_tx.send_modify(|snapshot| {
                snapshot.print_position = done;
                snapshot.print_total = total;
                snapshot.sd_print_active = true;
            });
            self.observer
                .on_print_progress(if total > 0 { done as f32 / total as f32 * 100.0 } else { 0.0 });
        } else if let Some((name, size)) = parser::parse_file_opened(text) {
            self.sd_file = Some(name);
            self.sd_file_size = size;
        } else if text.contains("File selected") {
            if let Some(name) = self.sd_file.clone() {
                self.observer.on_sd_selected(&name, self.sd_file_size);
            }
        } else if text.contains("Done printing file") {
            self.sd_printing = false;
            self.snapshot_tx.send_modify(|snapshot| {
                snapshot.print_position = 0;
                snapshot.sd_print_active = false;
            });
            self.set_state(State::Operational);
            self.observer.on_sd_printing_done();
        } else {
            return false;
        }
        true
    }

    async fn handle_line(&mut self, bytes: &Bytes, print_queue: &mut Option<PrintQueue>) {
        let mut text = crate::log::ascii_replace(bytes).trim().to_string();
        self.log.push(Direction::Received, text.clone());
        self.observer.on_log(&text);

        if text.starts_with("Error:") {
            if parser::is_split_error_continuation(&text) {
                if let Ok(Line::Data(more)) = self.transport.read_line().await {
                    text.push_str(crate::log::ascii_replace(&more).trim());
                }
            }
            if let Some(message) = parser::classify_error_line(&text) {
                if !self.state.is_error() {
                    self.raise_error(message);
                }
            }
        }

        if self.config.sd_support && self.sd_file_list_active && !text.contains("End file list") {
            self.sd_files.push(text.clone());
            return;
        }

        let (tools, bed) = parser::parse_temperatures(&text);
        if !tools.is_empty() || bed.is_some() {
            let reading = TemperatureReading {
                tool_actual: tools.first().map(|t| t.actual).unwrap_or_default(),
                tool_target: tools.first().and_then(|t| t.target),
                bed_actual: bed.map(|b| b.actual),
                bed_target: bed.and_then(|b| b.target),
            };
            self.snapshot_tx.send_modify(|snapshot| snapshot.temperature = reading);
            self.observer.on_temperature(reading);

            // While waiting on an M109/M190 heatup, a temperature line that
            // isn't itself an ack means the firmware is still busy heating;
            // charge that time against the print-time-remaining estimate.
            if !text.contains("ok") {
                if let Some(start) = self.heatup_wait_start {
                    let now = printhost_rtcompat::time::now();
                    self.heatup_wait_time_lost += now.saturating_duration_since(start);
                    self.heatup_wait_start = Some(now);
                    let lost = self.heatup_wait_time_lost;
                    self.snapshot_tx.send_modify(|snapshot| snapshot.heatup_wait_time_lost = lost);
                }
            }
        } else if self.config.sd_support && self.handle_sd_event(&text) {
            // handled inside handle_sd_event
        } else if !text.is_empty()
            && text != "ok"
            && !text.starts_with("wait")
            && !text.starts_with("Resend:")
            && text != "echo:Unknown command:\"\""
            && self.state.is_operational()
        {
            self.observer.on_message(&text);
        }

        if let Some(target) = parser::parse_resend_target(&text) {
            match self.send.begin_resend(target) {
                Ok(()) => {
                    self.observer.on_resend(target);
                    if let Some(frame) = self.send.next_resend_frame() {
                        if self.transport.write_all(&frame).await.is_err() {
                            self.fail("write to serial port failed while resending");
                        }
                    }
                }
                Err(err) => {
                    // Insufficient history to satisfy the resend: fatal mid-print
                    // (there's nothing left to rescue it with), but otherwise just
                    // logged and ignored — a stray resend outside an active host
                    // print (e.g. right after the handshake's M999) isn't fatal.
                    warn!(%err, "resend request could not be satisfied");
                    if print_queue.is_some() {
                        self.raise_error(&err.to_string());
                    } else {
                        self.observer.on_error(&err.to_string());
                    }
                }
            }
            return;
        }

        if parser::looks_like_ack(&text) {
            if self.send.resend_in_progress() {
                if let Some(frame) = self.send.next_resend_frame() {
                    if self.transport.write_all(&frame).await.is_err() {
                        self.fail("write to serial port failed while resending");
                    }
                }
            } else if print_queue.is_some() && !self.paused && !self.cancel_requested {
                self.advance_print_queue(print_queue).await;
            }
        }
    }
}

/// Result of probing one baud-rate candidate during autodetection.
enum ProbeOutcome {
    /// `SUCCESSES_TO_COMMIT` consecutive good replies seen.
    Committed,
    /// Ran out of retries on this candidate without confirming it.
    Exhausted,
    /// The transport itself is gone; no candidate past this one will fare
    /// any better.
    Closed,
}

/// Cursor over a host-streamed gcode list. One entry goes out per call to
/// [`Monitor::send_next_print_line`]; there is no send-ahead window, since
/// firmware back-pressure (one `ok` per line) is what paces the stream.
struct PrintQueue {
    entries: Vec<GcodeEntry>,
    next_index: usize,
}

impl PrintQueue {
    fn new(entries: Vec<GcodeEntry>) -> Self {
        Self {
            entries,
            next_index: 0,
        }
    }

    fn next(&mut self) -> Option<&GcodeEntry> {
        let entry = self.entries.get(self.next_index)?;
        self.next_index += 1;
        Some(entry)
    }

    fn is_done(&self) -> bool {
        self.next_index >= self.entries.len()
    }

    fn position(&self) -> u64 {
        self.next_index as u64
    }

    fn total(&self) -> u64 {
        self.entries.len() as u64
    }
}

/// Convenience constructor mirroring [`Session::spawn`] but defaulting the
/// observer, for callers that don't need print-event callbacks.
pub fn spawn_with_defaults<T: Transport>(transport: T, config: SessionConfig) -> Session {
    Session::spawn(transport, config, NullObserver)
}
