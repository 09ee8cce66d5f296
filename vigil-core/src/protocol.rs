//! Host channel protocol
//!
//! The host drives the player with short text commands plus raw binary
//! payloads, and listens for single-line status strings coming back. The
//! wire strings here are part of the host contract; hosts pattern-match on
//! the two-letter prefixes, so the formatting is exact and hand-rolled
//! rather than left to a serializer.

use bytes::Bytes;

use crate::decode::AccelPreference;
use crate::stats::RenderStatsSnapshot;

/// One message arriving from the host.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// `f <timestamp>`: presentation timestamp for the next binary payload.
    FrameTimestamp(i64),
    /// A binary payload, one encoded access unit.
    Payload(Bytes),
    /// `reset`: throw the current stream away and start over.
    Reset,
    /// Anything else. Reported back, never acted on.
    Unrecognized(String),
}

/// Parse one inbound text command.
pub fn parse_control(text: &str) -> InboundMessage {
    if text == "reset" {
        return InboundMessage::Reset;
    }
    if let Some(rest) = text.strip_prefix("f ") {
        if let Ok(timestamp_ms) = rest.trim().parse::<i64>() {
            return InboundMessage::FrameTimestamp(timestamp_ms);
        }
    }
    InboundMessage::Unrecognized(text.to_string())
}

/// One status event posted back to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// Decoder construction has begun.
    Initializing,
    /// Which acceleration mode the session was opened with.
    Acceleration(AccelPreference),
    /// First initialization finished; the player accepts frames.
    DecoderInitialized,
    /// The output size changed to match a new stream resolution.
    ViewportResized { width: u32, height: u32 },
    /// `rf`: a frame finished its swap and is on screen.
    FrameRendered {
        width: u32,
        height: u32,
        timestamp_ms: i64,
        interframe_gap_ms: i64,
    },
    /// `df`: a frame was dropped to shed latency.
    FrameDropped {
        width: u32,
        height: u32,
        timestamp_ms: i64,
        interframe_gap_ms: i64,
    },
    /// `rs`: periodic aggregate render statistics.
    RenderStats(RenderStatsSnapshot),
    /// An inbound message was not understood.
    UnrecognizedMessage,
}

impl HostEvent {
    /// The exact line put on the wire.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Initializing => "initializing".to_string(),
            Self::Acceleration(accel) => accel.announcement().to_string(),
            Self::DecoderInitialized => "decoder initialized".to_string(),
            Self::ViewportResized { width, height } => {
                format!("vr {{\"w\":{width},\"h\":{height} }}")
            }
            Self::FrameRendered {
                width,
                height,
                timestamp_ms,
                interframe_gap_ms,
            } => format!(
                "rf {{\"w\":{width},\"h\":{height},\"t\":{timestamp_ms},\"i\":{interframe_gap_ms} }}"
            ),
            Self::FrameDropped {
                width,
                height,
                timestamp_ms,
                interframe_gap_ms,
            } => format!(
                "df {{\"w\":{width},\"h\":{height},\"t\":{timestamp_ms},\"i\":{interframe_gap_ms} }}"
            ),
            Self::RenderStats(snapshot) => match serde_json::to_string(snapshot) {
                Ok(json) => format!("rs {json}"),
                Err(_) => "rs {}".to_string(),
            },
            Self::UnrecognizedMessage => "ignoring unrecognized message".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reset() {
        assert_eq!(parse_control("reset"), InboundMessage::Reset);
        // Prefix-only or cased variants are not a reset.
        assert_eq!(
            parse_control("reset now"),
            InboundMessage::Unrecognized("reset now".to_string())
        );
        assert_eq!(
            parse_control("RESET"),
            InboundMessage::Unrecognized("RESET".to_string())
        );
    }

    #[test]
    fn test_parse_frame_timestamp() {
        assert_eq!(parse_control("f 12345"), InboundMessage::FrameTimestamp(12345));
        assert_eq!(parse_control("f 0"), InboundMessage::FrameTimestamp(0));
        assert_eq!(parse_control("f -33"), InboundMessage::FrameTimestamp(-33));
    }

    #[test]
    fn test_malformed_input_is_reported_not_acted_on() {
        assert_eq!(
            parse_control("f abc"),
            InboundMessage::Unrecognized("f abc".to_string())
        );
        assert_eq!(
            parse_control(""),
            InboundMessage::Unrecognized(String::new())
        );
        assert_eq!(
            parse_control("g 100"),
            InboundMessage::Unrecognized("g 100".to_string())
        );
    }

    #[test]
    fn test_render_and_drop_wire_strings_exact() {
        let rendered = HostEvent::FrameRendered {
            width: 1280,
            height: 720,
            timestamp_ms: 4200,
            interframe_gap_ms: 33,
        };
        assert_eq!(rendered.to_wire(), "rf {\"w\":1280,\"h\":720,\"t\":4200,\"i\":33 }");

        let dropped = HostEvent::FrameDropped {
            width: 1280,
            height: 720,
            timestamp_ms: 4233,
            interframe_gap_ms: 33,
        };
        assert_eq!(dropped.to_wire(), "df {\"w\":1280,\"h\":720,\"t\":4233,\"i\":33 }");
    }

    #[test]
    fn test_viewport_wire_string_exact() {
        let resized = HostEvent::ViewportResized {
            width: 640,
            height: 480,
        };
        assert_eq!(resized.to_wire(), "vr {\"w\":640,\"h\":480 }");
    }

    #[test]
    fn test_lifecycle_wire_strings() {
        assert_eq!(HostEvent::Initializing.to_wire(), "initializing");
        assert_eq!(
            HostEvent::DecoderInitialized.to_wire(),
            "decoder initialized"
        );
        assert_eq!(
            HostEvent::Acceleration(AccelPreference::WithFallback).to_wire(),
            "acceleration withfallback"
        );
        assert_eq!(
            HostEvent::UnrecognizedMessage.to_wire(),
            "ignoring unrecognized message"
        );
    }

    #[test]
    fn test_stats_wire_string_is_prefixed_json() {
        let event = HostEvent::RenderStats(RenderStatsSnapshot {
            frames: 90,
            fps: 30.0,
            avg_swap_ms: 2.5,
            avg_decode_ms: 4.0,
        });
        let wire = event.to_wire();
        assert!(wire.starts_with("rs {"), "got {wire}");
        assert!(wire.contains("\"frames\":90"));
        assert!(wire.contains("\"fps\":30.0"));
    }
}
