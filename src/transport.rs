//! Message transport to the content server.
//!
//! A [`Transport`] opens sessions, sends text frames and closes sessions on
//! request of the connection manager. It never calls back: outcomes are
//! reported as [`TransportEvent`]s tagged with the [`SessionId`] they belong
//! to, so that events of a session that has since been replaced can be told
//! apart and dropped.
//!
//! [`WebSocket`] is the production transport, built on `tokio-tungstenite`.

use std::{fmt, time::Duration};

use futures_util::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::tungstenite::{
    protocol::{frame::coding::CloseCode, CloseFrame},
    Message as WebsocketMessage,
};
use url::Url;

use crate::error::{Error, Result};

/// Identifies one transport session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Close code and reason of a closed session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CloseStatus {
    pub code: u16,
    pub reason: String,
}

impl CloseStatus {
    pub const NORMAL: u16 = 1000;

    /// No status code was present in the close frame.
    pub const NO_STATUS: u16 = 1005;

    #[must_use]
    pub fn normal(reason: impl Into<String>) -> Self {
        Self {
            code: Self::NORMAL,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_normal(&self) -> bool {
        self.code == Self::NORMAL
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

/// Outcome of a transport session, reported asynchronously.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Opened(SessionId),
    Message(SessionId, String),

    /// The session could not be opened, or broke while open.
    Failed(SessionId, String),

    /// The peer closed the session.
    Closed(SessionId, CloseStatus),
}

impl TransportEvent {
    #[must_use]
    pub fn session(&self) -> SessionId {
        match self {
            Self::Opened(session)
            | Self::Message(session, _)
            | Self::Failed(session, _)
            | Self::Closed(session, _) => *session,
        }
    }
}

/// A bidirectional text message channel.
pub trait Transport: Send {
    /// Starts opening a session to `url`.
    ///
    /// The result is reported as [`TransportEvent::Opened`] or
    /// [`TransportEvent::Failed`].
    fn open(&mut self, session: SessionId, url: Url);

    /// Queues a text frame on an open session.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `session` is not the current session.
    fn send(&mut self, session: SessionId, text: String) -> Result<()>;

    /// Closes the session with a status code. No further events are
    /// reported for it.
    fn close(&mut self, session: SessionId, code: u16, reason: &str);
}

enum Command {
    Send(String),
    Close(u16, String),
}

struct Connection {
    session: SessionId,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Websocket transport.
pub struct WebSocket {
    events: mpsc::UnboundedSender<TransportEvent>,
    connect_timeout: Duration,
    current: Option<Connection>,
}

impl WebSocket {
    #[must_use]
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>, connect_timeout: Duration) -> Self {
        Self {
            events,
            connect_timeout,
            current: None,
        }
    }

    async fn run(
        session: SessionId,
        url: Url,
        connect_timeout: Duration,
        mut commands: mpsc::UnboundedReceiver<Command>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) {
        let connect = tokio::time::timeout(
            connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        );
        let ws_stream = match connect.await {
            Ok(Ok((ws_stream, _))) => ws_stream,
            Ok(Err(e)) => {
                let _ = events.send(TransportEvent::Failed(session, Error::from(e).to_string()));
                return;
            }
            Err(e) => {
                let _ = events.send(TransportEvent::Failed(session, Error::from(e).to_string()));
                return;
            }
        };

        debug!("session {session} open to {url}");
        let _ = events.send(TransportEvent::Opened(session));

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Send(text)) => {
                        trace!("session {session} sending: {text}");
                        if let Err(e) = ws_tx.send(WebsocketMessage::Text(text.into())).await {
                            let _ = events.send(TransportEvent::Failed(session, Error::from(e).to_string()));
                            return;
                        }
                    }
                    Some(Command::Close(code, reason)) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        if let Err(e) = ws_tx.send(WebsocketMessage::Close(Some(frame))).await {
                            debug!("session {session} close handshake failed: {e}");
                        }
                        return;
                    }
                    None => return,
                },
                message = ws_rx.next() => match message {
                    Some(Ok(WebsocketMessage::Text(text))) => {
                        trace!("session {session} received: {}", text.as_str());
                        let _ = events.send(TransportEvent::Message(session, text.as_str().to_owned()));
                    }
                    Some(Ok(WebsocketMessage::Close(frame))) => {
                        let status = frame.map_or(
                            CloseStatus {
                                code: CloseStatus::NO_STATUS,
                                reason: String::new(),
                            },
                            |frame| CloseStatus {
                                code: u16::from(frame.code),
                                reason: frame.reason.as_str().to_owned(),
                            },
                        );
                        let _ = events.send(TransportEvent::Closed(session, status));
                        return;
                    }
                    Some(Ok(_)) => trace!("session {session} ignoring non-text frame"),
                    Some(Err(e)) => {
                        let _ = events.send(TransportEvent::Failed(session, Error::from(e).to_string()));
                        return;
                    }
                    None => {
                        let _ = events.send(TransportEvent::Failed(
                            session,
                            "connection reset by peer".to_owned(),
                        ));
                        return;
                    }
                },
            }
        }
    }
}

impl Transport for WebSocket {
    fn open(&mut self, session: SessionId, url: Url) {
        if let Some(previous) = self.current.take() {
            if !previous.task.is_finished() {
                warn!("session {} still running, aborting", previous.session);
                previous.task.abort();
            }
        }

        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Self::run(
            session,
            url,
            self.connect_timeout,
            rx,
            self.events.clone(),
        ));

        self.current = Some(Connection {
            session,
            commands,
            task,
        });
    }

    fn send(&mut self, session: SessionId, text: String) -> Result<()> {
        match &self.current {
            Some(connection) if connection.session == session => connection
                .commands
                .send(Command::Send(text))
                .map_err(|_| Error::unavailable(format!("session {session} has ended"))),
            _ => Err(Error::failed_precondition(format!(
                "session {session} is not open"
            ))),
        }
    }

    fn close(&mut self, session: SessionId, code: u16, reason: &str) {
        match self.current.take() {
            Some(connection) if connection.session == session => {
                let _ = connection
                    .commands
                    .send(Command::Close(code, reason.to_owned()));
            }
            other => self.current = other,
        }
    }
}

impl Drop for WebSocket {
    fn drop(&mut self) {
        if let Some(connection) = self.current.take() {
            connection.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn echo_server() -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if message.is_text() {
                    ws.send(message).await.unwrap();
                } else if message.is_close() {
                    break;
                }
            }
        });
        Url::parse(&format!("ws://{addr}/ws")).unwrap()
    }

    #[tokio::test]
    async fn opens_and_echoes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = WebSocket::new(tx, Duration::from_secs(5));
        let session = SessionId(1);

        transport.open(session, echo_server().await);
        assert_eq!(rx.recv().await, Some(TransportEvent::Opened(session)));

        transport.send(session, "hello".to_owned()).unwrap();
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Message(session, "hello".to_owned()))
        );

        transport.close(session, CloseStatus::NORMAL, "bye");
        assert!(transport.send(session, "late".to_owned()).is_err());
    }

    #[tokio::test]
    async fn refused_connection_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = WebSocket::new(tx, Duration::from_secs(5));
        transport.open(SessionId(7), Url::parse(&format!("ws://{addr}/ws")).unwrap());

        assert!(matches!(
            rx.recv().await,
            Some(TransportEvent::Failed(SessionId(7), _))
        ));
    }

    #[test]
    fn sending_without_session_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = WebSocket::new(tx, Duration::from_secs(5));
        let err = transport.send(SessionId(1), "x".to_owned()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::FailedPrecondition);
    }
}
