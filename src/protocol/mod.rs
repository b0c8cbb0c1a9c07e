//! Wire protocol between the signage client and the content server.
//!
//! Every frame is a JSON object with a `type` tag; the remaining fields
//! depend on the tag.
//!
//! # Client messages
//!
//! ```json
//! {"type": "register", "mac": "02:1A:2B:3C:4D:5E", "device_name": "lobby"}
//! {"type": "heartbeat", "mac": "02:1A:2B:3C:4D:5E"}
//! {"type": "get_content", "mac": "02:1A:2B:3C:4D:5E"}
//! ```
//!
//! # Server messages
//!
//! Decoded into [`Incoming`]. Tags this client does not know are reported as
//! [`Decoded::Unknown`] so that the caller can log and drop them; a known tag
//! with a malformed payload is an error.
//!
//! # Submodules
//!
//! * [`content`] - content items, content types and playlist assembly

pub mod content;

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_with::{formats::Flexible, serde_as, BoolFromInt, DefaultOnNull, PickFirst};

use crate::error::{Error, Result};
use content::{ContentData, ContentItem, TempContent};

/// Parses and logs a JSON frame.
///
/// Parsed frames are logged at TRACE level. Frames that are not valid JSON
/// are logged at ERROR level together with the raw text.
///
/// # Errors
///
/// Will return `Err` if `body` is not valid JSON or does not match `T`.
pub fn json<T>(body: &str, origin: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Debug,
{
    match serde_json::from_str(body) {
        Ok(result) => {
            trace!("{origin}: {result:#?}");
            Ok(result)
        }
        Err(e) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                trace!("{origin}: {json:#?}");
            } else {
                error!("{origin}: failed parsing frame ({e:?})");
                trace!("{body}");
            }
            Err(e.into())
        }
    }
}

/// Messages sent by the client.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outgoing {
    /// Announces the device after the transport opens.
    Register { mac: String, device_name: String },

    /// Keeps the session alive.
    Heartbeat { mac: String },

    /// Asks for the current playlist.
    GetContent { mac: String },
}

impl Outgoing {
    /// The `type` tag of this message.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Heartbeat { .. } => "heartbeat",
            Self::GetContent { .. } => "get_content",
        }
    }

    /// Encodes this message as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Will return `Err` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Into::into)
    }
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegisterAck {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub success: bool,
    #[serde_as(deserialize_as = "DefaultOnNull<PickFirst<(_, BoolFromInt<Flexible>)>>")]
    pub active: bool,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub device_id: i64,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub is_new_device: bool,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub msg: String,
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ContentResponse {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub success: bool,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub msg: String,
    pub data: Option<ContentData>,
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HeartbeatAck {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub success: bool,
    #[serde_as(deserialize_as = "DefaultOnNull<PickFirst<(_, BoolFromInt<Flexible>)>>")]
    pub active: bool,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub msg: String,
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ActiveStatus {
    #[serde_as(deserialize_as = "DefaultOnNull<PickFirst<(_, BoolFromInt<Flexible>)>>")]
    pub active: bool,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub msg: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PushContent {
    pub data: ContentItem,
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DisplayModeChange {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub mode: i64,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub mode_name: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct TempContentMessage {
    pub data: TempContent,
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BatchControl {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub action: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub message: String,
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub timestamp: i64,
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Refresh {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub message: String,
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ErrorMessage {
    #[serde_as(deserialize_as = "DefaultOnNull")]
    pub msg: String,
}

/// Messages sent by the server.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Incoming {
    RegisterAck(RegisterAck),
    ContentResponse(ContentResponse),
    HeartbeatAck(HeartbeatAck),
    ActiveStatus(ActiveStatus),
    PushContent(PushContent),
    DisplayModeChange(DisplayModeChange),
    TempContent(TempContentMessage),
    BatchControl(BatchControl),
    Refresh(Refresh),
    Error(ErrorMessage),
}

impl Incoming {
    /// Tags that decode into an [`Incoming`] variant.
    pub const TAGS: [&'static str; 10] = [
        "register_ack",
        "content_response",
        "heartbeat_ack",
        "active_status",
        "push_content",
        "display_mode_change",
        "temp_content",
        "batch_control",
        "refresh",
        "error",
    ];
}

/// Result of decoding a server frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Message(Incoming),

    /// A well-formed frame with a tag this client does not handle.
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    tag: String,
}

/// Decodes a server text frame.
///
/// # Errors
///
/// Will return `Err` if the frame is not a JSON object with a string `type`
/// tag, or if the payload of a known tag is malformed.
pub fn decode(text: &str) -> Result<Decoded> {
    let Envelope { tag } = serde_json::from_str::<Envelope>(text)
        .map_err(|e| Error::invalid_argument(format!("frame without type tag: {e}")))?;

    if !Incoming::TAGS.contains(&tag.as_str()) {
        return Ok(Decoded::Unknown(tag));
    }

    json::<Incoming>(text, &tag).map(Decoded::Message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::content::ContentType;

    #[test]
    fn encodes_client_messages() {
        let register = Outgoing::Register {
            mac: "AA:BB".to_owned(),
            device_name: "lobby".to_owned(),
        };
        let json: serde_json::Value = serde_json::from_str(&register.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "register", "mac": "AA:BB", "device_name": "lobby"})
        );

        let get_content = Outgoing::GetContent {
            mac: "AA:BB".to_owned(),
        };
        assert_eq!(
            get_content.to_json().unwrap(),
            r#"{"type":"get_content","mac":"AA:BB"}"#
        );
        assert_eq!(get_content.tag(), "get_content");
    }

    #[test]
    fn decodes_register_ack() {
        let frame = r#"{"type":"register_ack","success":true,"active":1,"device_id":7,"is_new_device":false,"msg":"ok"}"#;
        let Decoded::Message(Incoming::RegisterAck(ack)) = decode(frame).unwrap() else {
            panic!("expected register_ack");
        };
        assert!(ack.success);
        assert!(ack.active);
        assert_eq!(ack.device_id, 7);
        assert_eq!(ack.msg, "ok");
    }

    #[test]
    fn decodes_content_response() {
        let frame = r#"{
            "type": "content_response",
            "success": true,
            "msg": "",
            "data": {
                "device_id": 7,
                "display_mode": 1,
                "display_mode_name": "split",
                "direct_content": null,
                "playlist_contents": [],
                "primary_contents": [
                    {"id": 1, "title": "a", "content_type": 2, "content_url": "a.png", "duration": 5}
                ],
                "secondary_contents": [
                    {"id": 2, "title": "b", "content_type": "web", "content_url": "b.html", "duration": 0}
                ]
            }
        }"#;
        let Decoded::Message(Incoming::ContentResponse(response)) = decode(frame).unwrap() else {
            panic!("expected content_response");
        };
        let playlist = response.data.unwrap().playlist();
        assert_eq!(playlist.len(), 2);
        assert_eq!(playlist[0].content_type, ContentType::Image);
        assert_eq!(playlist[1].content_type, ContentType::Web);
    }

    #[test]
    fn decodes_heartbeat_ack_with_boolean_or_integer_active() {
        for active in ["1", "true"] {
            let frame = format!(r#"{{"type":"heartbeat_ack","success":true,"active":{active},"msg":""}}"#);
            let Decoded::Message(Incoming::HeartbeatAck(ack)) = decode(&frame).unwrap() else {
                panic!("expected heartbeat_ack");
            };
            assert!(ack.active, "{active}");
        }
    }

    #[test]
    fn decodes_push_and_temp_content() {
        let push = r#"{"type":"push_content","data":{"id":3,"title":"v","content_type":3,"content_url":"v.mp4","duration":10}}"#;
        let Decoded::Message(Incoming::PushContent(push)) = decode(push).unwrap() else {
            panic!("expected push_content");
        };
        assert_eq!(push.data.content_type, ContentType::Video);

        let temp = r#"{"type":"temp_content","data":{"content_id":4,"content_type":"audio","content_url":"s.mp3","title":"s","duration":0,"is_temp":true}}"#;
        let Decoded::Message(Incoming::TempContent(temp)) = decode(temp).unwrap() else {
            panic!("expected temp_content");
        };
        assert_eq!(ContentItem::from(temp.data).content_type, ContentType::Audio);
    }

    #[test]
    fn decodes_control_messages() {
        assert_eq!(
            decode(r#"{"type":"batch_control","action":"restart","message":"m","timestamp":1}"#).unwrap(),
            Decoded::Message(Incoming::BatchControl(BatchControl {
                action: "restart".to_owned(),
                message: "m".to_owned(),
                timestamp: 1,
            }))
        );
        assert_eq!(
            decode(r#"{"type":"display_mode_change","mode":2,"mode_name":"dual"}"#).unwrap(),
            Decoded::Message(Incoming::DisplayModeChange(DisplayModeChange {
                mode: 2,
                mode_name: "dual".to_owned(),
            }))
        );
        assert_eq!(
            decode(r#"{"type":"error","msg":"boom"}"#).unwrap(),
            Decoded::Message(Incoming::Error(ErrorMessage {
                msg: "boom".to_owned()
            }))
        );
    }

    #[test]
    fn unknown_tags_are_not_errors() {
        assert_eq!(
            decode(r#"{"type":"firmware_update","url":"x"}"#).unwrap(),
            Decoded::Unknown("firmware_update".to_owned())
        );
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(decode("not json").is_err());
        assert!(decode(r#"{"msg":"no tag"}"#).is_err());
        assert!(decode(r#"{"type":"push_content","data":"oops"}"#).is_err());
    }
}
