//! Content items and playlists as delivered by the content server.
//!
//! The server is loose about types: `content_type` may arrive as a name or a
//! numeric code, durations may be fractional, and optional fields may be
//! `null` or empty strings. Everything is normalized here, at the decoding
//! boundary, so the rest of the crate only deals with [`ContentType`] and
//! [`ContentItem`].
//!
//! # Wire Format
//!
//! ```json
//! {
//!     "id": 42,
//!     "title": "Lobby welcome",
//!     "content_type": 2,
//!     "content_url": "http://cms.local/media/welcome.png",
//!     "thumbnail": null,
//!     "duration": 15.0
//! }
//! ```

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull, NoneAsEmptyString};

/// Kind of content, deciding which surface renders it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentType {
    Web,
    Image,
    Video,
    Audio,
    LiveStream,
    Rtsp,
    #[default]
    Unknown,
}

impl ContentType {
    /// Maps a numeric content code to a content type.
    ///
    /// Codes `1` through `5` are web, image, video, live stream and audio.
    /// Anything else, including fractional codes, is unknown.
    #[must_use]
    #[expect(clippy::float_cmp)]
    pub fn from_code(code: f64) -> Self {
        match code {
            c if c == 1.0 => Self::Web,
            c if c == 2.0 => Self::Image,
            c if c == 3.0 => Self::Video,
            c if c == 4.0 => Self::LiveStream,
            c if c == 5.0 => Self::Audio,
            _ => Self::Unknown,
        }
    }

    /// Maps a content type name, or a numeric code in string form, to a
    /// content type. Unrecognized names are unknown.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        if let Ok(code) = name.parse::<f64>() {
            return Self::from_code(code);
        }

        match name.to_ascii_lowercase().as_str() {
            "web" => Self::Web,
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "live_stream" => Self::LiveStream,
            "rtsp" => Self::Rtsp,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::LiveStream => "live_stream",
            Self::Rtsp => "rtsp",
            Self::Unknown => "unknown",
        }
    }

    /// Whether content of this type has a single resource that can be
    /// fetched ahead of time.
    #[must_use]
    pub fn is_fetchable(self) -> bool {
        matches!(self, Self::Web | Self::Image | Self::Video | Self::Audio)
    }

    /// Whether content of this type plays on the media surface.
    #[must_use]
    pub fn is_streaming(self) -> bool {
        matches!(self, Self::LiveStream | Self::Rtsp)
    }
}

impl FromStr for ContentType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_name(s))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `content_type` as it appears on the wire.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
enum RawContentType {
    Code(f64),
    Name(String),
}

impl From<RawContentType> for ContentType {
    fn from(raw: RawContentType) -> Self {
        match raw {
            RawContentType::Code(code) => Self::from_code(code),
            RawContentType::Name(name) => Self::from_name(&name),
        }
    }
}

impl<'de> Deserialize<'de> for ContentType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Option::<RawContentType>::deserialize(deserializer)?;
        Ok(raw.map(Self::from).unwrap_or_default())
    }
}

impl Serialize for ContentType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Converts planned seconds to a duration, clamping negative and non-finite
/// values to zero.
#[must_use]
pub fn seconds(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    } else {
        Duration::ZERO
    }
}

/// One playable unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireContent")]
pub struct ContentItem {
    pub id: i64,
    pub title: String,
    pub content_type: ContentType,

    /// Resource locator. May be blank on the wire; the player skips such
    /// items.
    #[serde(rename = "content_url")]
    pub url: String,

    /// Cover art, only used for audio.
    pub thumbnail: Option<String>,

    /// Planned display time. [`Duration::ZERO`] means the item stays on
    /// screen until something else replaces it.
    #[serde(rename = "duration", serialize_with = "serialize_seconds")]
    pub duration: Duration,
}

impl ContentItem {
    /// Whether this item is displayed indefinitely.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.duration.is_zero()
    }

    /// The title to show, falling back for untitled items.
    #[must_use]
    pub fn display_title(&self) -> &str {
        let title = self.title.trim();
        if title.is_empty() {
            "Unknown audio"
        } else {
            title
        }
    }

    /// The thumbnail, if it is not blank.
    #[must_use]
    pub fn cover(&self) -> Option<&str> {
        self.thumbnail
            .as_deref()
            .map(str::trim)
            .filter(|thumbnail| !thumbnail.is_empty())
    }
}

impl fmt::Display for ContentItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\" ({})", self.content_type, self.title, self.id)
    }
}

fn serialize_seconds<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
struct WireContent {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    id: i64,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    title: String,
    content_type: ContentType,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    content_url: String,
    #[serde_as(deserialize_as = "NoneAsEmptyString")]
    thumbnail: Option<String>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    duration: f64,
}

impl From<WireContent> for ContentItem {
    fn from(wire: WireContent) -> Self {
        Self {
            id: wire.id,
            title: wire.title,
            content_type: wire.content_type,
            url: wire.content_url,
            thumbnail: wire.thumbnail,
            duration: seconds(wire.duration),
        }
    }
}

/// An ad-hoc item pushed for temporary display.
///
/// Differs from [`ContentItem`] on the wire only in field naming.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TempContent {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub content_id: i64,
    pub content_type: ContentType,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub content_url: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub title: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub duration: f64,
    #[serde_as(deserialize_as = "NoneAsEmptyString")]
    pub thumbnail: Option<String>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub is_temp: bool,
}

impl From<TempContent> for ContentItem {
    fn from(temp: TempContent) -> Self {
        Self {
            id: temp.content_id,
            title: temp.title,
            content_type: temp.content_type,
            url: temp.content_url,
            thumbnail: temp.thumbnail,
            duration: seconds(temp.duration),
        }
    }
}

/// Playlist metadata attached to playlist content.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlaylistContent {
    #[serde(flatten)]
    pub item: ContentItem,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub playlist_id: i64,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub playlist_name: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub play_mode: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub playlist_sort: i64,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub content_sort: i64,
}

impl Default for ContentItem {
    fn default() -> Self {
        WireContent::default().into()
    }
}

/// The `data` of a `content_response`.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ContentData {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub device_id: i64,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub display_mode: i64,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub display_mode_name: String,
    pub direct_content: Option<ContentItem>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub playlist_contents: Vec<PlaylistContent>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub primary_contents: Vec<ContentItem>,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub secondary_contents: Vec<ContentItem>,
}

impl ContentData {
    /// Display modes that show the secondary list after the primary one.
    pub const SPLIT_MODES: [i64; 2] = [1, 2];

    /// Builds the playlist for the current display mode.
    ///
    /// Display modes 1 and 2 play the primary list followed by the secondary
    /// list. Every other mode plays the primary list alone.
    #[must_use]
    pub fn playlist(&self) -> Vec<ContentItem> {
        let mut playlist = self.primary_contents.clone();
        if Self::SPLIT_MODES.contains(&self.display_mode) {
            playlist.extend_from_slice(&self.secondary_contents);
        }
        playlist
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_codes() {
        assert_eq!(ContentType::from_code(1.0), ContentType::Web);
        assert_eq!(ContentType::from_code(2.0), ContentType::Image);
        assert_eq!(ContentType::from_code(3.0), ContentType::Video);
        assert_eq!(ContentType::from_code(4.0), ContentType::LiveStream);
        assert_eq!(ContentType::from_code(5.0), ContentType::Audio);
        assert_eq!(ContentType::from_code(0.0), ContentType::Unknown);
        assert_eq!(ContentType::from_code(6.0), ContentType::Unknown);
        assert_eq!(ContentType::from_code(2.5), ContentType::Unknown);
        assert_eq!(ContentType::from_code(f64::NAN), ContentType::Unknown);
    }

    #[test]
    fn names() {
        assert_eq!(ContentType::from_name("web"), ContentType::Web);
        assert_eq!(ContentType::from_name(" Video "), ContentType::Video);
        assert_eq!(ContentType::from_name("RTSP"), ContentType::Rtsp);
        assert_eq!(ContentType::from_name("live_stream"), ContentType::LiveStream);
        assert_eq!(ContentType::from_name("3"), ContentType::Video);
        assert_eq!(ContentType::from_name("slideshow"), ContentType::Unknown);
        assert_eq!(ContentType::from_name(""), ContentType::Unknown);
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = ["web", "IMAGE", "4", "5.0", "rtsp", "bogus", "", "7"];
        for input in inputs {
            let once = ContentType::from_name(input);
            assert_eq!(ContentType::from_name(once.as_str()), once, "{input}");
        }
    }

    #[test]
    fn decodes_numeric_and_string_types() {
        let numeric: ContentItem = serde_json::from_str(
            r#"{"id":1,"title":"a","content_type":2.0,"content_url":"a.png","duration":5}"#,
        )
        .unwrap();
        assert_eq!(numeric.content_type, ContentType::Image);
        assert_eq!(numeric.url, "a.png");
        assert_eq!(numeric.duration, Duration::from_secs(5));

        let named: ContentItem = serde_json::from_str(
            r#"{"id":2,"title":"b","content_type":"web","content_url":"b.html","duration":0}"#,
        )
        .unwrap();
        assert_eq!(named.content_type, ContentType::Web);
        assert!(named.is_permanent());
    }

    #[test]
    fn tolerates_missing_and_null_fields() {
        let item: ContentItem =
            serde_json::from_str(r#"{"title":null,"content_type":null,"thumbnail":""}"#).unwrap();
        assert_eq!(item.content_type, ContentType::Unknown);
        assert_eq!(item.url, "");
        assert_eq!(item.thumbnail, None);
        assert!(item.is_permanent());
    }

    #[test]
    fn negative_durations_clamp_to_zero() {
        let item: ContentItem =
            serde_json::from_str(r#"{"content_type":"image","content_url":"x","duration":-3}"#)
                .unwrap();
        assert_eq!(item.duration, Duration::ZERO);
        assert_eq!(seconds(f64::INFINITY), Duration::ZERO);
        assert_eq!(seconds(1.5), Duration::from_millis(1500));
    }

    #[test]
    fn temp_content_becomes_item() {
        let temp: TempContent = serde_json::from_str(
            r#"{"content_id":9,"content_type":"video","content_url":"v.mp4","title":"t","duration":12,"is_temp":true}"#,
        )
        .unwrap();
        let item = ContentItem::from(temp);
        assert_eq!(item.id, 9);
        assert_eq!(item.content_type, ContentType::Video);
        assert_eq!(item.url, "v.mp4");
        assert_eq!(item.duration, Duration::from_secs(12));
    }

    fn item(id: i64) -> ContentItem {
        ContentItem {
            id,
            ..ContentItem::default()
        }
    }

    #[test]
    fn split_modes_append_secondary() {
        let mut data = ContentData {
            display_mode: 1,
            primary_contents: vec![item(1), item(2)],
            secondary_contents: vec![item(3)],
            ..ContentData::default()
        };
        let ids = |playlist: Vec<ContentItem>| playlist.iter().map(|i| i.id).collect::<Vec<_>>();

        assert_eq!(ids(data.playlist()), [1, 2, 3]);
        data.display_mode = 2;
        assert_eq!(ids(data.playlist()), [1, 2, 3]);
        data.display_mode = 0;
        assert_eq!(ids(data.playlist()), [1, 2]);
        data.display_mode = 3;
        assert_eq!(ids(data.playlist()), [1, 2]);
    }

    #[test]
    fn cover_ignores_blank_thumbnails() {
        let mut audio = item(1);
        audio.thumbnail = Some("  ".to_owned());
        assert_eq!(audio.cover(), None);
        audio.thumbnail = Some("cover.jpg".to_owned());
        assert_eq!(audio.cover(), Some("cover.jpg"));
        assert_eq!(audio.display_title(), "Unknown audio");
    }
}
