//! Virtual serial bridge state machine.
//!
//! The print server writes "serial" traffic into a channel; every decoded
//! [`SerialFrame`] is handed to [`BridgeController::handle_frame`], which
//! decides what happens to the real printer port.
//!
//! # States (for beginners)
//!
//! ```text
//!            SetBaudRate(b) + device found
//!   ┌──────┐ ───────────────────────────────▶ ┌───────┐
//!   │ Idle │                                  │ Bound │ ◀─┐ SetBaudRate(b')
//!   └──────┘ ◀─────────────────────────────── └───────┘ ──┘ (b' != b or start)
//!                 Close / device detached                   close + reopen
//! ```
//!
//! - **Idle**: no session.  Data frames are dropped.
//! - **Bound**: one [`SerialSession`] exists.  Data frames are written to the
//!   device in the order they arrive.  A failed write closes the device but
//!   the bridge stays Bound; the next `SetBaudRate` reopens it.
//!
//! # Threads
//!
//! The controller itself does no background work.  When a session opens it
//! returns a [`PumpRequest`] carrying an independent device reader; the
//! runner moves that reader onto a pump thread so device-to-channel bytes
//! never wait on the controller's lock.  Each session has its own cancel
//! flag, raised when the session closes.

use std::io::Read;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use printhost_core::{
    ControlKind, DeviceInfo, DeviceSelector, EventSink, HostEvent, LineSettings, SerialFrame,
};
use tracing::{debug, info, warn};

use crate::infrastructure::serial::{SerialDevice, SerialTransport, TransportError};

/// Default bound on a single device write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default poll interval of the device read pump.
pub const DEFAULT_READ_POLL: Duration = Duration::from_millis(100);

/// Whether a session currently exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Bound,
}

/// Tunables for [`BridgeController`].
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub selector: DeviceSelector,
    pub write_timeout: Duration,
    pub read_poll: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            selector: DeviceSelector::default(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            read_poll: DEFAULT_READ_POLL,
        }
    }
}

/// The open binding between the bridge and one physical device.
pub struct SerialSession {
    id: u64,
    device: DeviceInfo,
    settings: LineSettings,
    dtr: bool,
    rts: bool,
    port: Box<dyn SerialDevice>,
    cancel: Arc<AtomicBool>,
}

impl SerialSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn baud_rate(&self) -> u32 {
        self.settings.baud_rate
    }

    pub fn settings(&self) -> &LineSettings {
        &self.settings
    }

    pub fn dtr(&self) -> bool {
        self.dtr
    }

    pub fn rts(&self) -> bool {
        self.rts
    }

    /// `false` after a write failure closed the device.
    pub fn is_open(&self) -> bool {
        self.port.is_open()
    }

    fn close(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.port.close();
    }
}

/// Reader for a freshly opened session, to be pumped on its own thread.
pub struct PumpRequest {
    pub session_id: u64,
    pub reader: Box<dyn Read + Send>,
    /// Raised when the session closes; the pump must exit promptly.
    pub cancel: Arc<AtomicBool>,
}

/// What the runner must do after a frame was handled.
#[derive(Default)]
pub struct FrameOutcome {
    /// A new session was opened and its reader needs a pump.
    pub pump: Option<PumpRequest>,
    /// The channel endpoint must be torn down and set up again.
    pub restart_channel: bool,
}

/// Serial bridge state machine over a [`SerialTransport`].
pub struct BridgeController<T: SerialTransport> {
    transport: T,
    selector: DeviceSelector,
    write_timeout: Duration,
    read_poll: Duration,
    selected: Option<DeviceInfo>,
    session: Option<SerialSession>,
    current_baud: Option<u32>,
    next_session_id: u64,
    events: Arc<dyn EventSink>,
}

impl<T: SerialTransport> BridgeController<T> {
    pub fn new(transport: T, settings: BridgeSettings, events: Arc<dyn EventSink>) -> Self {
        Self {
            transport,
            selector: settings.selector,
            write_timeout: settings.write_timeout,
            read_poll: settings.read_poll,
            selected: None,
            session: None,
            current_baud: None,
            next_session_id: 1,
            events,
        }
    }

    pub fn state(&self) -> BridgeState {
        if self.session.is_some() {
            BridgeState::Bound
        } else {
            BridgeState::Idle
        }
    }

    pub fn session(&self) -> Option<&SerialSession> {
        self.session.as_ref()
    }

    /// Baud rate of the last successful (re)configuration.
    pub fn current_baud(&self) -> Option<u32> {
        self.current_baud
    }

    pub fn selected_device(&self) -> Option<&DeviceInfo> {
        self.selected.as_ref()
    }

    /// Applies one decoded channel frame.
    pub fn handle_frame(&mut self, frame: &SerialFrame) -> FrameOutcome {
        match frame.control {
            ControlKind::SetBaudRate(baud) => FrameOutcome {
                pump: self.set_baud_rate(baud, frame.start),
                restart_channel: false,
            },
            ControlKind::Close => {
                self.close_requested();
                FrameOutcome {
                    pump: None,
                    restart_channel: true,
                }
            }
            ControlKind::None => {
                self.forward(&frame.payload);
                FrameOutcome::default()
            }
        }
    }

    fn set_baud_rate(&mut self, baud: u32, start: bool) -> Option<PumpRequest> {
        if self.selected.is_none() {
            self.selected = self.discover();
        }
        let device = match &self.selected {
            Some(device) => device.clone(),
            None => {
                debug!("no serial device available; dropping BAUDRATE {baud}");
                return None;
            }
        };

        let new_connection = start || self.current_baud != Some(baud);
        let port_open = self.session.as_ref().is_some_and(SerialSession::is_open);
        if !new_connection && port_open {
            debug!("{} already open at {baud} baud", device.path);
            return None;
        }

        // Devices may reject a second open, so the old session always goes
        // first.
        let had_session = self.session.is_some();
        self.close_session();

        match self.open_session(&device, baud, new_connection) {
            Ok((session, pump)) => {
                info!(
                    "serial session {} bound to {} at {baud} baud",
                    session.id, device.path
                );
                self.session = Some(session);
                self.current_baud = Some(baud);
                self.events.emit(HostEvent::UsbAttached {
                    port: device.path.clone(),
                });
                Some(pump)
            }
            Err(e) => {
                warn!("failed to open {}: {e}", device.path);
                // Rediscover on the next attempt; the device may have moved.
                self.selected = None;
                self.current_baud = None;
                if had_session {
                    self.events.emit(HostEvent::UsbDetached);
                }
                None
            }
        }
    }

    fn discover(&mut self) -> Option<DeviceInfo> {
        let devices = self.transport.discover();
        let picked = self.selector.select(&devices).cloned();
        match &picked {
            Some(device) => info!(
                "selected serial device {} ({})",
                device.path,
                device.product.as_deref().unwrap_or("unknown product")
            ),
            None => debug!("no matching serial device among {} ports", devices.len()),
        }
        picked
    }

    fn open_session(
        &mut self,
        device: &DeviceInfo,
        baud: u32,
        raise_signals: bool,
    ) -> Result<(SerialSession, PumpRequest), TransportError> {
        let mut port = self.transport.open(device)?;
        let settings = LineSettings::eight_n_one(baud);

        let reader = match prepare_port(port.as_mut(), &settings, raise_signals, self.read_poll) {
            Ok(reader) => reader,
            Err(e) => {
                port.close();
                return Err(e);
            }
        };

        let id = self.next_session_id;
        self.next_session_id += 1;
        let cancel = Arc::new(AtomicBool::new(false));

        let session = SerialSession {
            id,
            device: device.clone(),
            settings,
            dtr: raise_signals,
            rts: raise_signals,
            port,
            cancel: Arc::clone(&cancel),
        };
        let pump = PumpRequest {
            session_id: id,
            reader,
            cancel,
        };
        Ok((session, pump))
    }

    fn close_requested(&mut self) {
        if self.session.is_some() {
            info!("CLOSE received; releasing serial device");
            self.close_session();
            self.events.emit(HostEvent::UsbDetached);
        } else {
            debug!("CLOSE received with no session");
        }
        self.current_baud = None;
        self.selected = None;
    }

    fn forward(&mut self, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            debug!("dropping {} bytes: bridge is idle", payload.len());
            return;
        };
        if !session.is_open() {
            debug!("dropping {} bytes: device closed after an error", payload.len());
            return;
        }

        if let Err(e) = session.port.write(payload, self.write_timeout) {
            warn!("write to {} failed, closing device: {e}", session.device.path);
            session.close();
        }
    }

    fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
            debug!("serial session {} closed", session.id);
        }
    }

    /// Called by the pump when session `session_id` hit end-of-stream.
    ///
    /// Ignored if that session has already been replaced.
    pub fn device_detached(&mut self, session_id: u64) {
        let current = self.session.as_ref().map(SerialSession::id);
        if current != Some(session_id) {
            debug!("stale detach for session {session_id}");
            return;
        }

        warn!("serial device detached");
        self.close_session();
        self.current_baud = None;
        self.selected = None;
        self.events.emit(HostEvent::UsbDetached);
    }

    /// Called when the print server's end of the channel went away.
    ///
    /// Same effect as a `CLOSE` frame.
    pub fn channel_closed(&mut self) {
        self.close_requested();
    }

    /// Closes any open session.  Used on daemon shutdown.
    pub fn shutdown(&mut self) {
        if self.session.is_some() {
            self.close_session();
            self.events.emit(HostEvent::UsbDetached);
        }
        self.current_baud = None;
    }
}

fn prepare_port(
    port: &mut dyn SerialDevice,
    settings: &LineSettings,
    raise_signals: bool,
    poll: Duration,
) -> Result<Box<dyn Read + Send>, TransportError> {
    port.configure(settings)?;
    if raise_signals {
        port.set_signals(true, true)?;
    }
    port.reader(poll)
}
