//! Control messages exchanged with the host.

use std::fmt;

use serde::{Deserialize, Serialize};

const HEADER_START: u64 = 1;
const HEADER_STOP: u64 = 2;
const HEADER_SEND: u64 = 3;
const HEADER_CONNECTION_ESTABLISHED: u64 = 4;

/// Identifies a WebTransport session: the stream ID of its CONNECT request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A control message, selected on the wire by its `Header` value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub enum ControlMessage {
    /// Host to gateway: start the WebTransport listener.
    StartWebTransport,
    /// Host to gateway: stop the WebTransport listener.
    StopWebTransport,
    /// Host to gateway: relay `body` to a session.
    Send {
        connection_id: ConnectionId,
        body: String,
    },
    /// Gateway to host: a session was established.
    OnConnectionEstablished { connection_id: ConnectionId },
}

impl ControlMessage {
    pub fn header(&self) -> u64 {
        match self {
            ControlMessage::StartWebTransport => HEADER_START,
            ControlMessage::StopWebTransport => HEADER_STOP,
            ControlMessage::Send { .. } => HEADER_SEND,
            ControlMessage::OnConnectionEstablished { .. } => HEADER_CONNECTION_ESTABLISHED,
        }
    }
}

/// Errors decoding a control message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown header {0}")]
    UnknownHeader(u64),

    #[error("header {header} requires field {field}")]
    MissingField { header: u64, field: &'static str },

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLong(usize),
}

/// The flat JSON object on the wire.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct WireMessage {
    header: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    connection_id: Option<ConnectionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<String>,
}

impl TryFrom<WireMessage> for ControlMessage {
    type Error = DecodeError;

    fn try_from(wire: WireMessage) -> Result<Self, DecodeError> {
        let connection_id = |header| {
            wire.connection_id.ok_or(DecodeError::MissingField {
                header,
                field: "ConnectionId",
            })
        };
        match wire.header {
            HEADER_START => Ok(ControlMessage::StartWebTransport),
            HEADER_STOP => Ok(ControlMessage::StopWebTransport),
            HEADER_SEND => Ok(ControlMessage::Send {
                connection_id: connection_id(HEADER_SEND)?,
                body: wire.body.ok_or(DecodeError::MissingField {
                    header: HEADER_SEND,
                    field: "Body",
                })?,
            }),
            HEADER_CONNECTION_ESTABLISHED => Ok(ControlMessage::OnConnectionEstablished {
                connection_id: connection_id(HEADER_CONNECTION_ESTABLISHED)?,
            }),
            other => Err(DecodeError::UnknownHeader(other)),
        }
    }
}

impl From<ControlMessage> for WireMessage {
    fn from(msg: ControlMessage) -> Self {
        let header = msg.header();
        let (connection_id, body) = match msg {
            ControlMessage::StartWebTransport | ControlMessage::StopWebTransport => (None, None),
            ControlMessage::Send {
                connection_id,
                body,
            } => (Some(connection_id), Some(body)),
            ControlMessage::OnConnectionEstablished { connection_id } => {
                (Some(connection_id), None)
            }
        };
        WireMessage {
            header,
            connection_id,
            body,
        }
    }
}
