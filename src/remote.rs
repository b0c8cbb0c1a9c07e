//! Connection manager for the content server.
//!
//! The [`Client`] keeps a single logical session to the server alive:
//!
//! * registers the device once the transport opens, then requests content
//! * sends a heartbeat on a fixed period while connected
//! * decodes every inbound frame into exactly one [`Event`]
//! * falls back to the built-in endpoint when the user-configured one fails
//! * reconnects with exponential backoff otherwise
//!
//! The client owns no task and no clock. Transport outcomes are fed in
//! through [`Client::handle_transport`] and timers are driven through
//! [`Client::next_deadline`] and [`Client::on_tick`], all by a single owner.

use std::{fmt, time::Duration};

use tokio::{sync::mpsc, time::Instant};

use crate::{
    config::Config,
    error::{Error, Result},
    events::{ConnectionState, Event},
    protocol::{self, Decoded, Incoming, Outgoing},
    settings::SettingsStore,
    timer::{self, Timer},
    transport::{CloseStatus, SessionId, Transport, TransportEvent},
};

/// Which endpoint configuration a connection attempt was requested with.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectMode {
    /// The persisted server address, or the default when none is set.
    #[default]
    UserConfigured,

    /// The built-in server address.
    Default,
}

impl fmt::Display for ConnectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserConfigured => write!(f, "user configured"),
            Self::Default => write!(f, "default"),
        }
    }
}

pub struct Client {
    config: Config,
    transport: Box<dyn Transport>,
    settings: Box<dyn SettingsStore>,
    observer: Option<mpsc::UnboundedSender<Event>>,

    state: ConnectionState,
    mode: ConnectMode,
    session: Option<SessionId>,
    sessions_opened: u64,

    retry_count: u32,
    reconnect: Timer,
    heartbeat: Timer,
}

impl Client {
    /// Highest power of two the reconnect delay is multiplied by.
    pub const MAX_BACKOFF_EXPONENT: u32 = 6;

    /// Creates a disconnected client.
    ///
    /// Without an `observer` the client still runs; events are only logged.
    #[must_use]
    pub fn new(
        config: Config,
        transport: Box<dyn Transport>,
        settings: Box<dyn SettingsStore>,
        observer: Option<mpsc::UnboundedSender<Event>>,
    ) -> Self {
        Self {
            config,
            transport,
            settings,
            observer,

            state: ConnectionState::Disconnected,
            mode: ConnectMode::default(),
            session: None,
            sessions_opened: 0,

            retry_count: 0,
            reconnect: Timer::new(),
            heartbeat: Timer::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The mode the latest connection attempt was requested with.
    #[must_use]
    pub fn mode(&self) -> ConnectMode {
        self.mode
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn settings_mut(&mut self) -> &mut dyn SettingsStore {
        self.settings.as_mut()
    }

    /// Delay before reconnect attempt `attempt`, counting from zero.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(Self::MAX_BACKOFF_EXPONENT);
        self.config
            .reconnect_initial_delay
            .saturating_mul(1 << exponent)
            .min(self.config.reconnect_max_delay)
    }

    /// Starts a connection attempt.
    ///
    /// Does nothing while a session is connecting or connected. A
    /// [`ConnectMode::UserConfigured`] request without a usable persisted
    /// address uses the default endpoint, but is still recorded as
    /// user-configured.
    pub fn connect(&mut self, mode: ConnectMode) {
        if let Some(session) = self.session {
            debug!("session {session} already {}", self.state);
            return;
        }

        self.reconnect.cancel();
        self.mode = mode;
        self.set_state(ConnectionState::Connecting);

        let endpoint = match mode {
            ConnectMode::UserConfigured => self.settings.endpoint().unwrap_or_else(|| {
                debug!("no server configured, using default");
                self.config.default_endpoint.clone()
            }),
            ConnectMode::Default => self.config.default_endpoint.clone(),
        };

        match endpoint.url() {
            Ok(url) => {
                self.sessions_opened += 1;
                let session = SessionId(self.sessions_opened);
                self.session = Some(session);

                info!("connecting to {url} ({mode}, session {session})");
                self.transport.open(session, url);
            }
            Err(e) => self.on_failure(&format!("invalid endpoint {endpoint}: {e}")),
        }
    }

    /// Closes the session with a normal status and cancels pending
    /// reconnects and heartbeats.
    pub fn disconnect(&mut self) {
        self.reconnect.cancel();
        self.heartbeat.cancel();
        self.retry_count = 0;

        if let Some(session) = self.session.take() {
            info!("disconnecting session {session}");
            self.transport
                .close(session, CloseStatus::NORMAL, "client disconnect");
        }

        if self.state != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Drops the current session and connects again from scratch.
    pub fn restart(&mut self) {
        self.disconnect();
        self.connect(ConnectMode::UserConfigured);
    }

    /// Requests the current content from the server.
    pub fn send_get_content(&mut self) {
        let message = Outgoing::GetContent {
            mac: self.config.device_id.clone(),
        };
        if let Err(e) = self.send(&message) {
            warn!("could not request content: {e}");
        }
    }

    /// Handles the outcome of a transport session.
    ///
    /// Events of any session other than the current one are dropped.
    pub fn handle_transport(&mut self, event: TransportEvent) {
        if self.session != Some(event.session()) {
            trace!("dropping event of stale session {}", event.session());
            return;
        }

        match event {
            TransportEvent::Opened(session) => {
                info!("connected (session {session})");
                self.retry_count = 0;
                self.set_state(ConnectionState::Connected);

                let register = Outgoing::Register {
                    mac: self.config.device_id.clone(),
                    device_name: self.config.device_name.clone(),
                };
                if let Err(e) = self.send(&register) {
                    error!("could not register: {e}");
                }

                self.heartbeat.arm(self.config.heartbeat_interval, ());
            }
            TransportEvent::Message(_, text) => self.handle_message(&text),
            TransportEvent::Failed(_, reason) => self.on_failure(&reason),
            TransportEvent::Closed(_, status) => self.on_closed(&status),
        }
    }

    /// The earliest pending reconnect or heartbeat.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        timer::earliest([self.reconnect.deadline(), self.heartbeat.deadline()])
    }

    /// Runs the reconnect and heartbeat timers that are due at `now`.
    pub fn on_tick(&mut self, now: Instant) {
        if self.reconnect.fire(now).is_some() {
            debug!("reconnect attempt {}", self.retry_count);
            self.connect(ConnectMode::UserConfigured);
        }

        if self.heartbeat.fire(now).is_some() {
            let heartbeat = Outgoing::Heartbeat {
                mac: self.config.device_id.clone(),
            };
            if let Err(e) = self.send(&heartbeat) {
                warn!("could not send heartbeat: {e}");
            }
            self.heartbeat.arm(self.config.heartbeat_interval, ());
        }
    }

    fn send(&mut self, message: &Outgoing) -> Result<()> {
        let session = self
            .session
            .filter(|_| self.is_connected())
            .ok_or_else(|| Error::failed_precondition("not connected"))?;

        let text = message.to_json()?;
        debug!("sending {}", message.tag());
        self.transport.send(session, text)
    }

    fn handle_message(&mut self, text: &str) {
        match protocol::decode(text) {
            Ok(Decoded::Message(message)) => self.dispatch(message),
            Ok(Decoded::Unknown(tag)) => warn!("ignoring unknown message type: {tag}"),
            Err(e) => {
                error!("failed to parse server message: {e}");
                self.emit(Event::Error(format!("failed to parse server message: {e}")));
            }
        }
    }

    fn dispatch(&mut self, message: Incoming) {
        match message {
            Incoming::RegisterAck(ack) => {
                let success = ack.success;
                if success {
                    info!("registered (device id {}, new: {})", ack.device_id, ack.is_new_device);
                } else {
                    warn!("registration rejected: {}", ack.msg);
                }

                self.emit(Event::Registration {
                    success,
                    message: ack.msg,
                });
                if success {
                    self.send_get_content();
                }
            }
            Incoming::ContentResponse(response) => {
                if response.success {
                    self.emit(Event::ContentReceived(response.data.unwrap_or_default()));
                } else {
                    warn!("content request failed: {}", response.msg);
                    self.emit(Event::Error(response.msg));
                }
            }
            Incoming::HeartbeatAck(ack) => self.emit(Event::HeartbeatAck {
                success: ack.success,
                active: ack.active,
                message: ack.msg,
            }),
            Incoming::ActiveStatus(status) => self.emit(Event::ActiveStatusChanged {
                active: status.active,
                message: status.msg,
            }),
            Incoming::PushContent(push) => self.emit(Event::PushContent(push.data)),
            Incoming::DisplayModeChange(change) => self.emit(Event::DisplayModeChanged {
                mode: change.mode,
                name: change.mode_name,
            }),
            Incoming::TempContent(temp) => self.emit(Event::TempContent(temp.data.into())),
            Incoming::BatchControl(control) => self.emit(Event::BatchControl {
                action: control.action,
                message: control.message,
            }),
            Incoming::Refresh(refresh) => self.emit(Event::Refresh(refresh.message)),
            Incoming::Error(error) => self.emit(Event::Error(error.msg)),
        }
    }

    fn on_failure(&mut self, reason: &str) {
        warn!("connection failed: {reason}");
        self.heartbeat.cancel();
        self.session = None;
        self.set_state(ConnectionState::Disconnected);
        self.emit(Event::Error(format!("connection failed: {reason}")));

        match self.mode {
            ConnectMode::UserConfigured => {
                info!("falling back to default server");
                self.connect(ConnectMode::Default);
            }
            ConnectMode::Default => self.schedule_reconnect(),
        }
    }

    fn on_closed(&mut self, status: &CloseStatus) {
        self.heartbeat.cancel();
        self.session = None;
        self.set_state(ConnectionState::Disconnected);

        if status.is_normal() {
            info!("connection closed by server: {status}");
        } else {
            warn!("connection closed by server: {status}");
            self.emit(Event::Error(format!("connection closed: {status}")));
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.backoff_delay(self.retry_count);
        self.retry_count = self.retry_count.saturating_add(1);
        info!(
            "reconnecting in {}s (attempt {})",
            delay.as_secs(),
            self.retry_count
        );
        self.reconnect.arm(delay, ());
    }

    fn set_state(&mut self, state: ConnectionState) {
        debug!("connection {}", state);
        self.state = state;
        self.emit(Event::StatusChanged(state));
    }

    fn emit(&mut self, event: Event) {
        trace!("event: {event}");
        if let Some(observer) = &self.observer {
            if observer.send(event).is_err() {
                warn!("observer went away, events will only be logged");
                self.observer = None;
            }
        }
    }
}
