//! Rendering surfaces driven by the player.
//!
//! Rendering itself happens elsewhere: a web view, an image view and a media
//! pipeline are reached through the narrow traits in this module. The media
//! surface reports back asynchronously through [`RendererEvent`]s, which the
//! owner feeds into the player.
//!
//! The headless implementations log what they are asked to do. They back the
//! binary on devices without a display attached.

use std::{fmt, time::Duration};

use tokio::sync::mpsc;
use url::Url;

use crate::error::{Error, Result};

/// A surface that shows a single resource: a web page or an image.
pub trait Surface: Send {
    fn show(&mut self);
    fn hide(&mut self);

    /// Loads `url` into the surface.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the surface rejects the URL.
    fn load(&mut self, url: &str) -> Result<()>;
}

/// The video and audio pipeline.
///
/// Once a loaded source is ready to play, the surface reports
/// [`RendererEvent::Ready`]; failures during playback are reported as
/// [`RendererEvent::Error`].
pub trait MediaSurface: Send {
    fn show(&mut self);
    fn hide(&mut self);

    /// Loads `source` and starts playing it.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the pipeline cannot play the source.
    fn load(&mut self, source: &MediaSource) -> Result<()>;

    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);

    /// Enables or disables repeating the current source.
    fn set_repeat(&mut self, repeat: bool);
}

/// Title and status text shown over cover art while audio plays.
pub trait Overlay: Send {
    fn show(&mut self, title: &str, status: &str);
    fn set_status(&mut self, status: &str);
    fn hide(&mut self);
}

/// The set of surfaces the player renders to.
pub struct Surfaces {
    pub web: Box<dyn Surface>,
    pub image: Box<dyn Surface>,
    pub media: Box<dyn MediaSurface>,
    pub overlay: Box<dyn Overlay>,
}

impl Surfaces {
    /// Hides every surface.
    pub fn hide_all(&mut self) {
        self.web.hide();
        self.image.hide();
        self.media.hide();
        self.overlay.hide();
    }
}

/// Transport used for streaming sources.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum StreamTransport {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for StreamTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
        }
    }
}

/// A source for the media surface.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MediaSource {
    /// A finite file, played from the start.
    Progressive { url: Url },

    /// A live stream.
    Streaming {
        url: Url,
        transport: StreamTransport,
    },
}

impl MediaSource {
    /// Builds a source for a video or audio file.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `url` is blank or not a valid URL.
    pub fn progressive(url: &str) -> Result<Self> {
        Ok(Self::Progressive {
            url: Self::parse(url)?,
        })
    }

    /// Builds a source for a live stream.
    ///
    /// `alternate_transport` switches RTSP sources from interleaved TCP to
    /// UDP.
    ///
    /// # Errors
    ///
    /// Will return `Err` if `url` is blank or invalid, or if its scheme is
    /// not one that can be streamed.
    pub fn streaming(url: &str, alternate_transport: bool) -> Result<Self> {
        let url = Self::parse(url)?;
        match url.scheme() {
            "rtsp" | "rtsps" | "http" | "https" => {
                let transport = if alternate_transport {
                    StreamTransport::Udp
                } else {
                    StreamTransport::Tcp
                };
                Ok(Self::Streaming { url, transport })
            }
            scheme => Err(Error::unimplemented(format!(
                "cannot stream from {scheme} URLs"
            ))),
        }
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        match self {
            Self::Progressive { url } | Self::Streaming { url, .. } => url,
        }
    }

    fn parse(url: &str) -> Result<Url> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::invalid_argument("media url is blank"));
        }
        Url::parse(url).map_err(Into::into)
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Progressive { url } => write!(f, "{url}"),
            Self::Streaming { url, transport } => write!(f, "{url} over {transport}"),
        }
    }
}

/// Class of a playback failure, deciding how the player recovers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// The network connection failed or timed out.
    Network,

    /// The streaming protocol could not be negotiated, for example an RTSP
    /// `SETUP` that the server rejects for the chosen transport.
    StreamNegotiation,

    Other,
}

/// A failure reported by the media surface during playback.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PlaybackFault {
    pub kind: FaultKind,
    pub message: String,
}

impl PlaybackFault {
    #[must_use]
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classifies a failure that only comes with a message.
    #[must_use]
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if message.contains("RTSP") || message.contains("SETUP") {
            FaultKind::StreamNegotiation
        } else {
            let lower = message.to_ascii_lowercase();
            if lower.contains("timeout")
                || lower.contains("timed out")
                || lower.contains("network")
                || lower.contains("connection")
            {
                FaultKind::Network
            } else {
                FaultKind::Other
            }
        };
        Self { kind, message }
    }
}

impl fmt::Display for PlaybackFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Reported by the media surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RendererEvent {
    /// The loaded source is ready to play. `duration` is the media length
    /// when it is known.
    Ready { duration: Option<Duration> },

    Error(PlaybackFault),
}

/// A surface that only logs.
pub struct HeadlessSurface {
    name: &'static str,
}

impl HeadlessSurface {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl Surface for HeadlessSurface {
    fn show(&mut self) {
        trace!("{}: show", self.name);
    }

    fn hide(&mut self) {
        trace!("{}: hide", self.name);
    }

    /// Logs the locator as given, relative ones included.
    fn load(&mut self, url: &str) -> Result<()> {
        info!("{}: {url}", self.name);
        Ok(())
    }
}

/// A media surface that only logs, reporting every source as ready with an
/// unknown duration.
pub struct HeadlessMedia {
    events: mpsc::UnboundedSender<RendererEvent>,
}

impl HeadlessMedia {
    #[must_use]
    pub fn new(events: mpsc::UnboundedSender<RendererEvent>) -> Self {
        Self { events }
    }
}

impl MediaSurface for HeadlessMedia {
    fn show(&mut self) {
        trace!("media: show");
    }

    fn hide(&mut self) {
        trace!("media: hide");
    }

    fn load(&mut self, source: &MediaSource) -> Result<()> {
        info!("media: {source}");
        self.events
            .send(RendererEvent::Ready { duration: None })
            .map_err(|_| Error::unavailable("renderer events receiver dropped"))
    }

    fn pause(&mut self) {
        debug!("media: pause");
    }

    fn resume(&mut self) {
        debug!("media: resume");
    }

    fn stop(&mut self) {
        trace!("media: stop");
    }

    fn set_repeat(&mut self, repeat: bool) {
        trace!("media: repeat {repeat}");
    }
}

pub struct HeadlessOverlay;

impl Overlay for HeadlessOverlay {
    fn show(&mut self, title: &str, status: &str) {
        info!("overlay: {title} ({status})");
    }

    fn set_status(&mut self, status: &str) {
        debug!("overlay: {status}");
    }

    fn hide(&mut self) {
        trace!("overlay: hide");
    }
}

impl Surfaces {
    /// Surfaces for running without a display.
    #[must_use]
    pub fn headless(events: mpsc::UnboundedSender<RendererEvent>) -> Self {
        Self {
            web: Box::new(HeadlessSurface::new("web")),
            image: Box::new(HeadlessSurface::new("image")),
            media: Box::new(HeadlessMedia::new(events)),
            overlay: Box::new(HeadlessOverlay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn progressive_rejects_blank_and_invalid_urls() {
        assert_eq!(
            MediaSource::progressive(" ").unwrap_err().kind,
            ErrorKind::InvalidArgument
        );
        assert!(MediaSource::progressive("not a url").is_err());
        assert!(MediaSource::progressive("http://cms.local/v.mp4").is_ok());
    }

    #[test]
    fn streaming_selects_transport() {
        let tcp = MediaSource::streaming("rtsp://cam.local/1", false).unwrap();
        let udp = MediaSource::streaming("rtsp://cam.local/1", true).unwrap();
        assert!(matches!(tcp, MediaSource::Streaming { transport: StreamTransport::Tcp, .. }));
        assert!(matches!(udp, MediaSource::Streaming { transport: StreamTransport::Udp, .. }));

        let err = MediaSource::streaming("ftp://cam.local/1", false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unimplemented);
    }

    #[test]
    fn classifies_faults() {
        assert_eq!(
            PlaybackFault::classify("RTSP SETUP failed: 461").kind,
            FaultKind::StreamNegotiation
        );
        assert_eq!(
            PlaybackFault::classify("Network connection failed").kind,
            FaultKind::Network
        );
        assert_eq!(
            PlaybackFault::classify("connect timed out").kind,
            FaultKind::Network
        );
        assert_eq!(
            PlaybackFault::classify("decoder init failed").kind,
            FaultKind::Other
        );
    }

    #[test]
    fn headless_surfaces_accept_relative_locators() {
        let mut image = HeadlessSurface::new("image");
        assert!(image.load("a.png").is_ok());
        assert!(image.load("http://cms.local/b.png").is_ok());
    }

    #[test]
    fn headless_media_reports_ready() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut media = HeadlessMedia::new(tx);
        let source = MediaSource::progressive("http://cms.local/v.mp4").unwrap();
        media.load(&source).unwrap();
        assert_eq!(rx.try_recv().unwrap(), RendererEvent::Ready { duration: None });
    }
}
