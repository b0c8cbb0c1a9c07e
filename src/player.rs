//! Playback scheduler for signage content.
//!
//! The [`Player`] owns the active playlist and a cursor into it. It renders
//! the current item on the surface for its type, advances on a timer, loops
//! video and audio where the planned duration asks for it, and recovers from
//! items that fail to render.
//!
//! # Timers
//!
//! The player has two single-slot timers: one for auto-advance and one for
//! recovery (retrying or skipping a failed item). Dispatching an item cancels
//! both, so a timer can never act on an item that has been replaced.
//!
//! While paused, neither timer is armed. A pending retry or skip is held
//! back and re-armed with its full delay on resume; otherwise resuming
//! re-arms auto-advance.
//!
//! # Loop policy
//!
//! Video and audio decide on looping once the media surface reports that the
//! source is ready, comparing the planned duration against the actual media
//! length:
//!
//! * planned zero: repeat the item forever, except for audio that shares the
//!   playlist with other items, which simply stays on screen
//! * planned longer than the media: repeat it, and advance once the planned
//!   duration has elapsed
//! * otherwise: play it once, and advance after the planned duration

use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use tokio::time::Instant;

use crate::{
    cache::Tracker,
    error::{Error, Result},
    protocol::content::{ContentItem, ContentType},
    surface::{FaultKind, MediaSource, PlaybackFault, RendererEvent, Surfaces},
    timer::{self, Timer},
};

/// Playback control requested by the server.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Pause,
    Resume,
    Stop,
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "stop" => Ok(Self::Stop),
            other => Err(Error::invalid_argument(format!(
                "unknown playback operation: {other}"
            ))),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pause => write!(f, "pause"),
            Self::Resume => write!(f, "resume"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

/// Recovery state of the current item.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RetryState {
    pub count: u32,
    pub use_alternate_transport: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Recovery {
    Skip,
    Redispatch,
}

pub struct Player {
    surfaces: Surfaces,
    cache_ceiling: u64,

    playlist: Vec<ContentItem>,
    cursor: Option<usize>,
    retry: RetryState,
    paused: bool,

    advance_timer: Timer,
    recovery_timer: Timer<(Duration, Recovery)>,

    /// Recovery held back while paused, with its delay.
    suspended: Option<(Duration, Recovery)>,

    /// Loop decision for the current item, taken once the media is ready.
    pending_loop: Option<ContentItem>,
}

impl Player {
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_DELAY: Duration = Duration::from_millis(2000);
    pub const ALTERNATE_TRANSPORT_DELAY: Duration = Duration::from_millis(3000);
    pub const SKIP_DELAY: Duration = Duration::from_millis(1000);

    const STATUS_PLAYING: &'static str = "Playing";
    const STATUS_LOOPING: &'static str = "Playing (looping)";

    #[must_use]
    pub fn new(surfaces: Surfaces, cache_ceiling: u64) -> Self {
        Self {
            surfaces,
            cache_ceiling,

            playlist: Vec::new(),
            cursor: None,
            retry: RetryState::default(),
            paused: false,

            advance_timer: Timer::new(),
            recovery_timer: Timer::new(),
            suspended: None,
            pending_loop: None,
        }
    }

    #[must_use]
    pub fn playlist(&self) -> &[ContentItem] {
        &self.playlist
    }

    #[must_use]
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    #[must_use]
    pub fn current(&self) -> Option<&ContentItem> {
        self.cursor.and_then(|cursor| self.playlist.get(cursor))
    }

    #[must_use]
    pub fn retry_state(&self) -> RetryState {
        self.retry
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Installs a new playlist and starts playing its first item.
    ///
    /// An empty playlist leaves playback untouched.
    pub fn play(&mut self, playlist: Vec<ContentItem>, cache: &mut Tracker) {
        if playlist.is_empty() {
            info!("received empty playlist, nothing to play");
            return;
        }

        self.cancel_timers();
        self.surfaces.media.stop();

        for item in &playlist {
            cache.preload(item);
        }
        cache.cleanup(self.cache_ceiling);
        Self::analyze(&playlist, cache);

        self.playlist = playlist;
        self.cursor = None;
        self.retry = RetryState::default();
        self.paused = false;
        self.advance();
    }

    /// Moves to the next item, wrapping around at the end of the playlist.
    pub fn advance(&mut self) {
        if self.playlist.is_empty() {
            return;
        }

        let next = self
            .cursor
            .map_or(0, |cursor| (cursor + 1) % self.playlist.len());
        self.cursor = Some(next);
        self.retry = RetryState::default();
        self.dispatch();
    }

    /// Applies a playback control.
    ///
    /// Resuming restarts the auto-advance timer from the full planned
    /// duration of the current item.
    pub fn operate(&mut self, operation: Operation) {
        info!("playback {operation}");
        match operation {
            Operation::Pause => {
                self.advance_timer.cancel();
                if let Some(recovery) = self.recovery_timer.take() {
                    self.suspended = Some(recovery);
                }
                self.paused = true;
                self.surfaces.media.pause();
            }
            Operation::Resume => {
                self.paused = false;
                self.surfaces.media.resume();
                if let Some((delay, action)) = self.suspended.take() {
                    self.arm_recovery(delay, action);
                } else if let Some(duration) = self.current().map(|item| item.duration) {
                    self.schedule_next(duration);
                }
            }
            Operation::Stop => {
                self.surfaces.media.stop();
                self.cancel_timers();
                self.surfaces.hide_all();
                self.playlist.clear();
                self.cursor = None;
                self.retry = RetryState::default();
                self.paused = false;
            }
        }
    }

    /// Handles a report from the media surface.
    pub fn handle_renderer_event(&mut self, event: RendererEvent) {
        match event {
            RendererEvent::Ready { duration } => {
                if let Some(item) = self.pending_loop.take() {
                    self.apply_loop_policy(&item, duration.unwrap_or_default());
                }
            }
            RendererEvent::Error(fault) => self.on_playback_fault(fault),
        }
    }

    /// The earliest pending advance, retry or skip.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        timer::earliest([self.advance_timer.deadline(), self.recovery_timer.deadline()])
    }

    /// Runs the timers that are due at `now`.
    pub fn on_tick(&mut self, now: Instant) {
        match self.recovery_timer.fire(now).map(|(_, action)| action) {
            Some(Recovery::Skip) => self.advance(),
            Some(Recovery::Redispatch) => self.dispatch(),
            None => (),
        }

        if self.advance_timer.fire(now).is_some() {
            self.advance();
        }
    }

    fn dispatch(&mut self) {
        let Some(item) = self.current().cloned() else {
            return;
        };

        self.cancel_timers();
        self.surfaces.hide_all();
        self.surfaces.media.stop();
        self.surfaces.media.set_repeat(false);

        info!(
            "playing {item} ({}/{})",
            self.cursor.unwrap_or_default() + 1,
            self.playlist.len()
        );

        let result = match item.content_type {
            ContentType::Web => self.show_page(&item),
            ContentType::Image => self.show_image(&item),
            ContentType::Video => self.play_video(&item),
            ContentType::Audio => self.play_audio(&item),
            ContentType::LiveStream | ContentType::Rtsp => self.play_stream(&item),
            ContentType::Unknown => Err(Error::unimplemented("unsupported content type")),
        };

        if let Err(e) = result {
            warn!("skipping {item}: {e}");
            self.skip_next();
        }
    }

    fn show_page(&mut self, item: &ContentItem) -> Result<()> {
        let url = non_blank(&item.url)?;
        self.surfaces.web.show();
        self.surfaces.web.load(url)?;
        self.schedule_next(item.duration);
        Ok(())
    }

    fn show_image(&mut self, item: &ContentItem) -> Result<()> {
        let url = non_blank(&item.url)?;
        self.surfaces.image.show();
        self.surfaces.image.load(url)?;
        self.schedule_next(item.duration);
        Ok(())
    }

    fn play_video(&mut self, item: &ContentItem) -> Result<()> {
        let source = MediaSource::progressive(&item.url)?;
        self.surfaces.media.show();
        self.surfaces.media.load(&source)?;
        self.pending_loop = Some(item.clone());
        Ok(())
    }

    fn play_audio(&mut self, item: &ContentItem) -> Result<()> {
        let source = MediaSource::progressive(&item.url)?;
        if let Some(cover) = item.cover() {
            self.surfaces.image.show();
            if let Err(e) = self.surfaces.image.load(cover) {
                warn!("could not show cover of {item}: {e}");
            }
            self.surfaces
                .overlay
                .show(item.display_title(), Self::STATUS_PLAYING);
        } else {
            self.surfaces.media.show();
        }

        self.surfaces.media.load(&source)?;
        self.pending_loop = Some(item.clone());
        Ok(())
    }

    fn play_stream(&mut self, item: &ContentItem) -> Result<()> {
        let source = MediaSource::streaming(&item.url, self.retry.use_alternate_transport)?;
        self.surfaces.media.show();
        self.surfaces.media.load(&source)?;
        self.schedule_next(item.duration);
        Ok(())
    }

    fn apply_loop_policy(&mut self, item: &ContentItem, actual: Duration) {
        let planned = item.duration;
        debug!(
            "{item}: planned {}s, actual {}s",
            planned.as_secs_f64(),
            actual.as_secs_f64()
        );

        if planned.is_zero() {
            if item.content_type == ContentType::Audio && self.playlist.len() > 1 {
                debug!("{item} stays on screen without looping");
            } else {
                self.set_looping(item);
            }
        } else if planned > actual {
            self.set_looping(item);
            self.schedule_next(planned);
        } else {
            self.schedule_next(planned);
        }
    }

    fn set_looping(&mut self, item: &ContentItem) {
        debug!("looping {item}");
        self.surfaces.media.set_repeat(true);
        if item.content_type == ContentType::Audio && item.cover().is_some() {
            self.surfaces.overlay.set_status(Self::STATUS_LOOPING);
        }
    }

    fn on_playback_fault(&mut self, fault: PlaybackFault) {
        let Some(item) = self.current() else {
            return;
        };
        if !matches!(
            item.content_type,
            ContentType::Video | ContentType::Audio | ContentType::LiveStream | ContentType::Rtsp
        ) {
            trace!("ignoring media fault while showing {item}: {fault}");
            return;
        }

        warn!("playback of {item} failed: {fault}");
        match fault.kind {
            FaultKind::Network => self.retry_current(),
            FaultKind::StreamNegotiation => self.retry_with_alternate_transport(),
            FaultKind::Other => self.skip_next(),
        }
    }

    fn retry_current(&mut self) {
        if self.retry.count < Self::MAX_RETRIES {
            self.retry.count += 1;
            info!("retrying ({}/{})", self.retry.count, Self::MAX_RETRIES);
            self.arm_recovery(Self::RETRY_DELAY, Recovery::Redispatch);
        } else {
            self.give_up();
        }
    }

    fn retry_with_alternate_transport(&mut self) {
        if self.retry.count < Self::MAX_RETRIES {
            self.retry.count += 1;
            self.retry.use_alternate_transport = !self.retry.use_alternate_transport;
            info!(
                "retrying with alternate transport ({}/{})",
                self.retry.count,
                Self::MAX_RETRIES
            );
            self.arm_recovery(Self::ALTERNATE_TRANSPORT_DELAY, Recovery::Redispatch);
        } else {
            self.give_up();
        }
    }

    fn give_up(&mut self) {
        warn!("giving up after {} retries", self.retry.count);
        self.retry = RetryState::default();
        self.skip_next();
    }

    fn skip_next(&mut self) {
        self.arm_recovery(Self::SKIP_DELAY, Recovery::Skip);
    }

    fn arm_recovery(&mut self, delay: Duration, action: Recovery) {
        self.advance_timer.cancel();
        if self.paused {
            debug!("paused, holding back {action:?}");
            self.suspended = Some((delay, action));
        } else {
            self.recovery_timer.arm(delay, (delay, action));
        }
    }

    /// Arms auto-advance after `duration`.
    ///
    /// Permanent items and single-item playlists never advance.
    fn schedule_next(&mut self, duration: Duration) {
        if duration.is_zero() {
            debug!("permanent display, not advancing");
            return;
        }
        if self.playlist.len() <= 1 {
            debug!("single item playlist, not advancing");
            return;
        }
        if self.paused {
            debug!("paused, advancing after resume");
            return;
        }

        trace!("advancing in {}s", duration.as_secs_f64());
        self.advance_timer.arm(duration, ());
    }

    fn cancel_timers(&mut self) {
        self.advance_timer.cancel();
        self.recovery_timer.cancel();
        self.suspended = None;
        self.pending_loop = None;
    }

    fn analyze(playlist: &[ContentItem], cache: &Tracker) {
        let mut types = BTreeMap::<ContentType, usize>::new();
        for item in playlist {
            *types.entry(item.content_type).or_default() += 1;
        }
        let permanent = playlist.iter().filter(|item| item.is_permanent()).count();

        let types = types
            .iter()
            .map(|(content_type, count)| format!("{count} {content_type}"))
            .collect::<Vec<_>>()
            .join(", ");
        info!(
            "new playlist with {} items ({types}), {permanent} permanent",
            playlist.len()
        );

        for (i, item) in playlist.iter().enumerate() {
            debug!(
                "{}. {item}: {}s, cache {}",
                i + 1,
                item.duration.as_secs_f64(),
                cache.status(&item.url)
            );
        }

        if permanent > 0 && playlist.len() > 1 {
            warn!("playlist mixes permanent and timed items, it stops advancing at the first permanent item");
        }
    }
}

fn non_blank(url: &str) -> Result<&str> {
    let url = url.trim();
    if url.is_empty() {
        Err(Error::invalid_argument("content url is blank"))
    } else {
        Ok(url)
    }
}
