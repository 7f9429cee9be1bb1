//! Typed room events.
//!
//! Every payload crossing the fan-out boundary is one of these closed enums.
//! Unknown `kind`/`type` tags are rejected when parsing; unknown fields are
//! ignored and therefore dropped when the event is re-serialized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::room::chat::message::ChatMessage;
use crate::room::core::errors::{RoomError, RoomResult};
use crate::room::core::ids::{ContractId, RoomId};

/// WebRTC signaling payload. SDP and ICE bodies are relayed untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WebRtcSignal {
    /// Peer entered the call; the server stamps the count and time.
    Join {
        /// Participant that sent the signal.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
        /// Signaling participants after this join.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        participants: Option<u32>,
        /// Server time of the join, in Unix milliseconds.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    /// Peer left the call.
    Leave {
        /// Participant that sent the signal.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    /// Session description offer.
    Offer {
        /// Opaque session description.
        sdp: Value,
        /// Participant that sent the signal.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    /// Session description answer.
    Answer {
        /// Opaque session description.
        sdp: Value,
        /// Participant that sent the signal.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    /// ICE candidate.
    Ice {
        /// Opaque ICE candidate.
        candidate: Value,
        /// Participant that sent the signal.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    /// Request to renegotiate the connection.
    Restart {
        /// Participant that sent the signal.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    /// Connection quality report.
    Quality {
        /// Reported quality level.
        level: String,
        /// Participant that sent the signal.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
}

impl WebRtcSignal {
    /// Wire tag of the signal.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Ice { .. } => "ice",
            Self::Restart { .. } => "restart",
            Self::Quality { .. } => "quality",
        }
    }

    fn validate(&self) -> RoomResult<()> {
        match self {
            Self::Offer { sdp, .. } | Self::Answer { sdp, .. } if sdp.is_null() => Err(
                RoomError::InvalidEvent(format!("{} without sdp", self.kind())),
            ),
            Self::Ice { candidate, .. } if candidate.is_null() => Err(RoomError::InvalidEvent(
                "ice without candidate".to_string(),
            )),
            Self::Quality { level, .. } if level.trim().is_empty() => Err(
                RoomError::InvalidEvent("quality without level".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

/// Synchronization event fanned out to every subscriber of a room.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Shared document moved to a page.
    Page {
        /// One-based page number.
        page: u32,
    },
    /// Viewer scrolled.
    Scroll {
        /// Scroll offset.
        offset: f64,
        /// Page in view, if known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page: Option<u32>,
    },
    /// Shared document replaced.
    PdfPath {
        /// Location of the document.
        path: String,
    },
    /// Pen or highlighter stroke segment.
    Draw {
        /// Drawing tool, such as `pen` or `highlight`.
        mode: String,
        /// Stroke phase, such as `start` or `move`.
        phase: String,
        /// Horizontal position.
        x: f64,
        /// Vertical position.
        y: f64,
        /// One-based page number.
        page: u32,
        /// Previous horizontal position of the stroke.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_x: Option<f64>,
        /// Previous vertical position of the stroke.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_y: Option<f64>,
        /// Participant drawing.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    /// Stamp placed on a page.
    Stamp {
        /// Horizontal position.
        x: f64,
        /// Vertical position.
        y: f64,
        /// One-based page number.
        page: u32,
        /// Encoded image.
        image_data: String,
    },
    /// Signature placed on a page.
    Signature {
        /// Horizontal position.
        x: f64,
        /// Vertical position.
        y: f64,
        /// One-based page number.
        page: u32,
        /// Encoded image.
        image_data: String,
    },
    /// Text annotation.
    Text {
        /// Horizontal position.
        x: f64,
        /// Vertical position.
        y: f64,
        /// One-based page number.
        page: u32,
        /// Annotation text.
        text: String,
        /// Participant that placed the text.
        #[serde(default)]
        sender: String,
    },
    /// Participant entered a signing step.
    UserJoin {
        /// Role of the participant.
        user_type: String,
        /// Display name of the participant.
        user_name: String,
        /// Step entered, such as `stamp` or `signature`.
        entry_type: String,
        /// Client-reported time.
        timestamp: String,
        /// Transport session of the participant.
        session_id: String,
    },
    /// Late joiner asks for the current document.
    RequestPdf {
        /// Transport session of the participant.
        session_id: String,
        /// Participant asking for state.
        requester_id: String,
    },
    /// Late joiner asks for the current page.
    RequestPage {
        /// Transport session of the participant.
        session_id: String,
        /// Participant asking for state.
        requester_id: String,
    },
    /// Consultation finished; clients should leave.
    End {
        /// Finished consultation.
        contract_id: ContractId,
        /// Where participants should go next.
        redirect_url: String,
        /// Text shown to participants.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// WebRTC signaling.
    Rtc {
        /// The signal.
        signal: WebRtcSignal,
    },
    /// Chat line.
    Chat {
        /// The chat line.
        message: ChatMessage,
    },
}

impl SyncEvent {
    /// Wire tag of the event.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Page { .. } => "page",
            Self::Scroll { .. } => "scroll",
            Self::PdfPath { .. } => "pdf_path",
            Self::Draw { .. } => "draw",
            Self::Stamp { .. } => "stamp",
            Self::Signature { .. } => "signature",
            Self::Text { .. } => "text",
            Self::UserJoin { .. } => "user_join",
            Self::RequestPdf { .. } => "request_pdf",
            Self::RequestPage { .. } => "request_page",
            Self::End { .. } => "end",
            Self::Rtc { .. } => "rtc",
            Self::Chat { .. } => "chat",
        }
    }

    /// Build an event from a topic name and the variant's fields.
    ///
    /// # Errors
    /// Returns [`RoomError::InvalidEvent`] for unknown topics, bodies that are
    /// not JSON objects, and bodies missing required fields.
    pub fn from_topic(topic: &str, body: Value) -> RoomResult<Self> {
        let Value::Object(mut fields) = body else {
            return Err(RoomError::InvalidEvent(format!(
                "{topic} body must be a JSON object"
            )));
        };
        fields.insert("kind".to_string(), Value::String(topic.to_string()));
        let event: Self = serde_json::from_value(Value::Object(fields))
            .map_err(|err| RoomError::InvalidEvent(format!("{topic}: {err}")))?;
        event.validate()?;
        Ok(event)
    }

    /// Parse a complete tagged event.
    ///
    /// # Errors
    /// Returns [`RoomError::InvalidEvent`] if the value is not a valid event.
    pub fn from_value(value: Value) -> RoomResult<Self> {
        let event: Self = serde_json::from_value(value)
            .map_err(|err| RoomError::InvalidEvent(err.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    /// Check field constraints serde cannot express.
    ///
    /// # Errors
    /// Returns [`RoomError::InvalidEvent`] describing the first violation.
    pub fn validate(&self) -> RoomResult<()> {
        let invalid = |reason: &str| Err(RoomError::InvalidEvent(format!("{}: {reason}", self.kind())));
        match self {
            Self::Page { page } if *page == 0 => invalid("pages start at 1"),
            Self::PdfPath { path } if path.trim().is_empty() => invalid("empty path"),
            Self::Stamp { image_data, .. } | Self::Signature { image_data, .. }
                if image_data.is_empty() =>
            {
                invalid("missing image data")
            }
            Self::Draw { x, y, .. } | Self::Stamp { x, y, .. } | Self::Signature { x, y, .. }
            | Self::Text { x, y, .. }
                if !x.is_finite() || !y.is_finite() =>
            {
                invalid("coordinates must be finite")
            }
            Self::Scroll { offset, .. } if !offset.is_finite() => invalid("offset must be finite"),
            Self::Rtc { signal } => signal.validate(),
            _ => Ok(()),
        }
    }

    /// Whether rooms may receive this event from participants directly.
    ///
    /// `end` is only produced by the finalize pipeline, and `rtc`/`chat`
    /// have dedicated paths that apply their own bookkeeping.
    #[must_use]
    pub const fn is_participant_publishable(&self) -> bool {
        !matches!(self, Self::End { .. } | Self::Rtc { .. } | Self::Chat { .. })
    }
}

/// Envelope delivered to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutboundFrame {
    /// Room the event was published to.
    pub room: RoomId,
    /// Server fan-out time.
    pub sent_at: DateTime<Utc>,
    /// The event.
    pub event: SyncEvent,
}

impl OutboundFrame {
    /// Wrap an event for a room, stamped now.
    #[must_use]
    pub fn new(room: RoomId, event: SyncEvent) -> Self {
        Self {
            room,
            sent_at: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_topic_builds_variant() -> RoomResult<()> {
        let event = SyncEvent::from_topic("page", json!({ "page": 3 }))?;
        assert_eq!(event, SyncEvent::Page { page: 3 });

        let event = SyncEvent::from_topic(
            "stamp",
            json!({ "x": 10.0, "y": 20.5, "page": 1, "image_data": "iVBOR" }),
        )?;
        assert_eq!(event.kind(), "stamp");
        Ok(())
    }

    #[test]
    fn test_unknown_topic_rejected() {
        let result = SyncEvent::from_topic("teleport", json!({}));
        assert!(matches!(result, Err(RoomError::InvalidEvent(_))));
    }

    #[test]
    fn test_field_constraints() {
        assert!(SyncEvent::from_topic("page", json!({ "page": 0 })).is_err());
        assert!(SyncEvent::from_topic("pdf_path", json!({ "path": "  " })).is_err());
        assert!(SyncEvent::from_topic("page", json!([1])).is_err());
    }

    #[test]
    fn test_unknown_rtc_type_rejected() {
        let result = SyncEvent::from_value(json!({
            "kind": "rtc",
            "signal": { "type": "teleport" }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_rtc_unknown_fields_dropped() -> RoomResult<()> {
        let event = SyncEvent::from_value(json!({
            "kind": "rtc",
            "signal": { "type": "offer", "sdp": { "sdp": "v=0" }, "debug": true }
        }))?;
        let wire = serde_json::to_value(&event)?;
        assert_eq!(
            wire,
            json!({ "kind": "rtc", "signal": { "type": "offer", "sdp": { "sdp": "v=0" } } })
        );
        Ok(())
    }

    #[test]
    fn test_offer_requires_sdp() {
        let result = SyncEvent::from_value(json!({
            "kind": "rtc",
            "signal": { "type": "offer", "sdp": null }
        }));
        assert!(matches!(result, Err(RoomError::InvalidEvent(_))));
    }

    #[test]
    fn test_end_not_publishable_by_participants() {
        let end = SyncEvent::End {
            contract_id: ContractId(1),
            redirect_url: "/".to_string(),
            message: None,
        };
        assert!(!end.is_participant_publishable());
        assert!(SyncEvent::Page { page: 1 }.is_participant_publishable());
    }
}
