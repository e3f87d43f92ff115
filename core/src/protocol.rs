// Wire protocol for the gateway stream
//
// Every frame is a JSON object with a `type` discriminant.

use crate::event::{Event, EventKind};
use crate::stats::AggregateStats;
use crate::{FlowscopeError, Result};
use serde::{Deserialize, Serialize};

/// Message received from the gateway
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    TrafficEvent { event: Event },
    PtyEvent { event: Event },
    StatsUpdate { stats: AggregateStats },
    Ping,
    Pong,
    Connected,
    /// Any `type` this client does not know about
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::TrafficEvent { .. } => "traffic_event",
            InboundMessage::PtyEvent { .. } => "pty_event",
            InboundMessage::StatsUpdate { .. } => "stats_update",
            InboundMessage::Ping => "ping",
            InboundMessage::Pong => "pong",
            InboundMessage::Connected => "connected",
            InboundMessage::Unknown => "unknown",
        }
    }
}

/// Server-side delivery scope sent with `subscribe`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<EventKind>,
}

/// Message sent to the gateway
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Ping,
    Pong,
    Subscribe { filters: SubscriptionFilters },
}

impl OutboundMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parse one text frame.
///
/// Terminal events always carry the terminal kind regardless of what the
/// payload claims.
pub fn parse_inbound(text: &str) -> Result<InboundMessage> {
    let message: InboundMessage = serde_json::from_str(text)
        .map_err(|e| FlowscopeError::Protocol(format!("malformed frame: {}", e)))?;

    Ok(match message {
        InboundMessage::PtyEvent { mut event } => {
            event.kind = EventKind::TerminalIo;
            InboundMessage::PtyEvent { event }
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_traffic_event() {
        let text = r#"{"type":"traffic_event","event":{"id":"e1","kind":"response","timestamp":1700000000000,"source":"client","destination":"api","endpoint":"/api/users","method":"GET","status":200,"durationMs":12.5}}"#;
        let message = parse_inbound(text).unwrap();
        match message {
            InboundMessage::TrafficEvent { event } => {
                assert_eq!(event.id, "e1");
                assert_eq!(event.kind, EventKind::Response);
                assert_eq!(event.status, Some(200));
                assert_eq!(event.duration_ms, Some(12.5));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn pty_events_are_terminal_io() {
        let text = r#"{"type":"pty_event","event":{"id":"p1","timestamp":1,"endpoint":"pty/1"}}"#;
        match parse_inbound(text).unwrap() {
            InboundMessage::PtyEvent { event } => assert_eq!(event.kind, EventKind::TerminalIo),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn unknown_types_are_not_errors() {
        let message = parse_inbound(r#"{"type":"session_started","session":"abc"}"#).unwrap();
        assert_eq!(message, InboundMessage::Unknown);

        let message = parse_inbound(r#"{"type":"connected","clientId":"c-1"}"#).unwrap();
        assert_eq!(message, InboundMessage::Connected);
    }

    #[test]
    fn malformed_frames_are_protocol_errors() {
        assert!(matches!(
            parse_inbound("{not json"),
            Err(FlowscopeError::Protocol(_))
        ));
        // event payload missing its required fields
        assert!(matches!(
            parse_inbound(r#"{"type":"traffic_event","event":{"endpoint":"/x"}}"#),
            Err(FlowscopeError::Protocol(_))
        ));
        assert!(parse_inbound(r#"{"event":{}}"#).is_err());
    }

    #[test]
    fn outbound_encoding() {
        assert_eq!(OutboundMessage::Ping.encode().unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(OutboundMessage::Pong.encode().unwrap(), r#"{"type":"pong"}"#);

        let subscribe = OutboundMessage::Subscribe {
            filters: SubscriptionFilters {
                session_id: Some("s-1".into()),
                ..Default::default()
            },
        };
        assert_eq!(
            subscribe.encode().unwrap(),
            r#"{"type":"subscribe","filters":{"sessionId":"s-1"}}"#
        );
    }
}
