//! Owner loop of the signage client.
//!
//! The [`Controller`] owns the connection manager, the player and the cache
//! tracker, and is the only place their state is touched. Everything that
//! happens elsewhere (transport sessions, media rendering, cache downloads)
//! reports back over a channel, and the controller applies those reports one
//! at a time between timer ticks.

use std::{ops::ControlFlow, sync::Arc, time::Duration};

use tokio::{sync::mpsc, time::Instant};

use crate::{
    cache::{Completion, HttpPreloader, Preloader, Tracker},
    config::Config,
    error::Result,
    events::Event,
    player::{Operation, Player},
    remote::{Client, ConnectMode},
    settings::SettingsStore,
    surface::{RendererEvent, Surfaces},
    timer,
    transport::{Transport, TransportEvent, WebSocket},
};

pub struct Controller {
    client: Client,
    player: Player,
    cache: Tracker,

    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    events: mpsc::UnboundedReceiver<Event>,
    renderer_events: mpsc::UnboundedReceiver<RendererEvent>,
    completions: mpsc::UnboundedReceiver<Completion>,
}

impl Controller {
    /// How long to sleep when no timer is pending.
    const IDLE: Duration = Duration::from_secs(3600);

    /// Creates a controller with a websocket transport, headless surfaces
    /// and an HTTP preloader.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the HTTP client cannot be built.
    pub fn new(config: Config, settings: Box<dyn SettingsStore>) -> Result<Self> {
        let preloader = HttpPreloader::new(config.cache_dir.clone(), &config.user_agent)?;
        let connect_timeout = config.connect_timeout;
        Ok(Self::with(
            config,
            settings,
            |events| -> Box<dyn Transport> { Box::new(WebSocket::new(events, connect_timeout)) },
            Surfaces::headless,
            Arc::new(preloader),
        ))
    }

    /// Creates a controller from its collaborators.
    ///
    /// `transport` and `surfaces` are handed the senders they report on.
    pub fn with<T, S>(
        config: Config,
        settings: Box<dyn SettingsStore>,
        transport: T,
        surfaces: S,
        preloader: Arc<dyn Preloader>,
    ) -> Self
    where
        T: FnOnce(mpsc::UnboundedSender<TransportEvent>) -> Box<dyn Transport>,
        S: FnOnce(mpsc::UnboundedSender<RendererEvent>) -> Surfaces,
    {
        let (transport_tx, transport_events) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (renderer_tx, renderer_events) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();

        let cache_ceiling = config.cache_ceiling;
        let client = Client::new(config, transport(transport_tx), settings, Some(events_tx));
        let player = Player::new(surfaces(renderer_tx), cache_ceiling);
        let cache = Tracker::new(preloader, completions_tx);

        Self {
            client,
            player,
            cache,

            transport_events,
            events,
            renderer_events,
            completions,
        }
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    #[must_use]
    pub fn player(&self) -> &Player {
        &self.player
    }

    /// Connects and runs until the server asks the device to shut down.
    ///
    /// Can be called again after the returned future was dropped; an open
    /// session is kept.
    ///
    /// # Errors
    ///
    /// Currently never returns `Err`; faults are handled and logged inside
    /// the loop.
    pub async fn start(&mut self) -> Result<()> {
        self.client.connect(ConnectMode::UserConfigured);

        loop {
            let deadline = timer::earliest([self.client.next_deadline(), self.player.next_deadline()])
                .unwrap_or_else(|| Instant::now() + Self::IDLE);

            tokio::select! {
                biased;

                Some(event) = self.transport_events.recv() => self.client.handle_transport(event),

                Some(event) = self.events.recv() => {
                    if self.handle_event(event).is_break() {
                        info!("shutdown requested by server");
                        return Ok(());
                    }
                }

                Some(event) = self.renderer_events.recv() => self.player.handle_renderer_event(event),

                Some(completion) = self.completions.recv() => self.cache.complete(completion),

                () = tokio::time::sleep_until(deadline) => {
                    let now = Instant::now();
                    self.client.on_tick(now);
                    self.player.on_tick(now);
                }
            }
        }
    }

    /// Disconnects and stops playback.
    pub fn stop(&mut self) {
        self.client.disconnect();
        self.player.operate(Operation::Stop);
    }

    /// Re-reads the persisted settings and reconnects.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the settings cannot be read. The current session
    /// is kept in that case.
    pub fn reload(&mut self) -> Result<()> {
        self.client.settings_mut().reload()?;
        self.client.restart();
        Ok(())
    }

    fn handle_event(&mut self, event: Event) -> ControlFlow<()> {
        debug!("{event}");
        match event {
            Event::ContentReceived(data) => {
                let playlist = data.playlist();
                if playlist.is_empty() {
                    info!(
                        "no content for display mode {} ({})",
                        data.display_mode, data.display_mode_name
                    );
                } else {
                    self.player.play(playlist, &mut self.cache);
                }
            }

            Event::PushContent(item) | Event::TempContent(item) => {
                self.player.play(vec![item], &mut self.cache);
            }

            Event::DisplayModeChanged { mode, name } => {
                info!("display mode changed to {mode} ({name})");
                self.client.send_get_content();
            }

            Event::Refresh(message) => {
                info!("refresh requested: {message}");
                self.client.send_get_content();
            }

            Event::BatchControl { action, message } => {
                info!("batch control {action}: {message}");
                match action.trim() {
                    "restart" => self.client.restart(),
                    "shutdown" => return ControlFlow::Break(()),
                    other => match other.parse::<Operation>() {
                        Ok(operation) => self.player.operate(operation),
                        Err(e) => warn!("ignoring batch control: {e}"),
                    },
                }
            }

            Event::ActiveStatusChanged { active, message } => {
                info!("device active: {active} ({message})");
            }

            Event::Error(message) => warn!("{message}"),

            Event::StatusChanged(_) | Event::Registration { .. } | Event::HeartbeatAck { .. } => (),
        }

        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures_util::future::BoxFuture;
    use url::Url;

    use super::*;
    use crate::{
        protocol::content::{ContentData, ContentItem, ContentType},
        settings::StaticSettings,
        transport::SessionId,
    };

    const CONTENT: &str = r#"{
        "type": "content_response",
        "success": true,
        "msg": "",
        "data": {
            "device_id": 7,
            "display_mode": 1,
            "display_mode_name": "split",
            "primary_contents": [
                {"id": 1, "title": "a", "content_type": 2, "content_url": "http://cms.local/a.png", "duration": 5}
            ],
            "secondary_contents": [
                {"id": 2, "title": "b", "content_type": "web", "content_url": "http://cms.local/b.html", "duration": 0}
            ]
        }
    }"#;

    /// Answers registration and content requests like the real server.
    struct ScriptedServer {
        events: mpsc::UnboundedSender<TransportEvent>,
        sent: Arc<Mutex<Vec<String>>>,
        then: Option<&'static str>,
    }

    impl ScriptedServer {
        fn reply(&self, session: SessionId, frame: &str) {
            let _ = self
                .events
                .send(TransportEvent::Message(session, frame.to_owned()));
        }
    }

    impl Transport for ScriptedServer {
        fn open(&mut self, session: SessionId, _url: Url) {
            let _ = self.events.send(TransportEvent::Opened(session));
        }

        fn send(&mut self, session: SessionId, text: String) -> Result<()> {
            let json: serde_json::Value = serde_json::from_str(&text).unwrap();
            let tag = json["type"].as_str().unwrap().to_owned();
            match tag.as_str() {
                "register" => self.reply(session, r#"{"type":"register_ack","success":true,"msg":"ok"}"#),
                "get_content" => {
                    self.reply(session, CONTENT);
                    if let Some(then) = self.then {
                        self.reply(session, then);
                    }
                }
                _ => (),
            }
            self.sent.lock().unwrap().push(tag);
            Ok(())
        }

        fn close(&mut self, _session: SessionId, code: u16, _reason: &str) {
            self.sent.lock().unwrap().push(format!("close {code}"));
        }
    }

    struct NullPreloader;

    impl Preloader for NullPreloader {
        fn preload(&self, _url: String, _key: String) -> BoxFuture<'static, Result<u64>> {
            Box::pin(async { Ok(0) })
        }

        fn clear(&self) -> BoxFuture<'static, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn controller(then: Option<&'static str>) -> (Controller, Arc<Mutex<Vec<String>>>) {
        let config = Config::new(Some("lobby".to_owned()), Some("02:00:00:00:00:01".to_owned()));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();
        let controller = Controller::with(
            config,
            Box::new(StaticSettings(None)),
            move |events| -> Box<dyn Transport> {
                Box::new(ScriptedServer {
                    events,
                    sent: log,
                    then,
                })
            },
            Surfaces::headless,
            Arc::new(NullPreloader),
        );
        (controller, sent)
    }

    fn ids(controller: &Controller) -> Vec<i64> {
        controller.player().playlist().iter().map(|item| item.id).collect()
    }

    fn item(id: i64) -> ContentItem {
        ContentItem {
            id,
            content_type: ContentType::Image,
            url: format!("http://cms.local/{id}.png"),
            duration: Duration::from_secs(5),
            ..ContentItem::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn registers_fetches_content_and_plays_until_shutdown() {
        let (mut controller, sent) = controller(Some(
            r#"{"type":"batch_control","action":"shutdown","message":"maintenance","timestamp":0}"#,
        ));

        controller.start().await.unwrap();

        assert_eq!(*sent.lock().unwrap(), ["register", "get_content"]);
        assert_eq!(ids(&controller), [1, 2]);
        assert_eq!(controller.player().cursor(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn playback_advances_inside_the_loop() {
        let (mut controller, _) = controller(None);
        let _ = tokio::time::timeout(Duration::from_secs(6), controller.start()).await;
        assert_eq!(controller.player().cursor(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_content_keeps_current_playlist() {
        let (mut controller, _) = controller(None);
        controller.player.play(vec![item(9), item(10)], &mut controller.cache);

        let flow = controller.handle_event(Event::ContentReceived(ContentData {
            display_mode: 3,
            secondary_contents: vec![item(1)],
            ..ContentData::default()
        }));
        assert!(flow.is_continue());
        assert_eq!(ids(&controller), [9, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn pushed_content_plays_alone() {
        let (mut controller, _) = controller(None);
        let _ = controller.handle_event(Event::PushContent(item(4)));
        assert_eq!(ids(&controller), [4]);

        let _ = controller.handle_event(Event::TempContent(item(5)));
        assert_eq!(ids(&controller), [5]);
    }

    #[tokio::test(start_paused = true)]
    async fn mode_change_and_refresh_request_content() {
        let (mut controller, sent) = controller(None);
        controller.client.connect(ConnectMode::UserConfigured);
        let opened = controller.transport_events.try_recv().unwrap();
        controller.client.handle_transport(opened);
        sent.lock().unwrap().clear();

        let _ = controller.handle_event(Event::DisplayModeChanged {
            mode: 2,
            name: "dual".to_owned(),
        });
        let _ = controller.handle_event(Event::Refresh("now".to_owned()));
        assert_eq!(*sent.lock().unwrap(), ["get_content", "get_content"]);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_controls() {
        let (mut controller, sent) = controller(None);
        controller.player.play(vec![item(1), item(2)], &mut controller.cache);

        let batch = |action: &str| Event::BatchControl {
            action: action.to_owned(),
            message: String::new(),
        };

        assert!(controller.handle_event(batch("pause")).is_continue());
        assert!(controller.player().is_paused());
        assert!(controller.handle_event(batch("resume")).is_continue());
        assert!(!controller.player().is_paused());
        assert!(controller.handle_event(batch("reboot")).is_continue());
        assert!(controller.handle_event(batch("stop")).is_continue());
        assert!(controller.player().playlist().is_empty());

        controller.client.connect(ConnectMode::UserConfigured);
        let opened = controller.transport_events.try_recv().unwrap();
        controller.client.handle_transport(opened);
        sent.lock().unwrap().clear();
        assert!(controller.handle_event(batch("restart")).is_continue());
        assert_eq!(sent.lock().unwrap().first().map(String::as_str), Some("close 1000"));

        assert!(controller.handle_event(batch("shutdown")).is_break());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_disconnects_and_clears_playback() {
        let (mut controller, sent) = controller(None);
        controller.client.connect(ConnectMode::UserConfigured);
        let opened = controller.transport_events.try_recv().unwrap();
        controller.client.handle_transport(opened);
        controller.player.play(vec![item(1)], &mut controller.cache);

        controller.stop();
        assert!(!controller.client().is_connected());
        assert_eq!(controller.player().cursor(), None);
        assert_eq!(sent.lock().unwrap().last().map(String::as_str), Some("close 1000"));
    }
}
