use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::chord::types::RingId;
use crate::network::messages::MessageKind;

#[derive(Error, Debug)]
pub enum ChordlingError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Chord protocol error: {0}")]
    Chord(#[from] ChordError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Peer {addr} unreachable: {reason}")]
    PeerUnreachable { addr: SocketAddr, reason: String },

    #[error("Peer {addr} did not answer within {after:?}")]
    Timeout { addr: SocketAddr, after: Duration },

    #[error("Peer {0} closed the connection before replying")]
    ConnectionClosed(SocketAddr),

    #[error("{0} is not an address peers can reach; bind a concrete one")]
    UnspecifiedAddress(std::net::IpAddr),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Bad reply: {0}")]
    Message(#[from] MessageError),
}

#[derive(Error, Debug)]
pub enum ChordError {
    #[error("Failed to join ring: {0}")]
    JoinFailed(String),

    #[error("No live candidate left while routing {0}")]
    RoutingExhausted(RingId),

    #[error("Peer {0} could not resolve the lookup")]
    LookupDeclined(std::net::SocketAddr),

    #[error("Ran out of time resolving {0}")]
    LookupExpired(RingId),

    #[error("Node is not part of a ring yet")]
    NotEstablished,

    #[error("Node is already part of a ring")]
    AlreadyEstablished,

    #[error("Invalid instruction: {0}")]
    InvalidInstruction(String),
}

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Unknown message kind {0}")]
    UnknownKind(u8),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("{kind:?} needs {expected} parameter(s), found {found}")]
    MissingParameter {
        kind: MessageKind,
        expected: usize,
        found: usize,
    },

    #[error("Parameter {index} is not a valid {expected}: {value:?}")]
    MalformedParameter {
        index: usize,
        expected: &'static str,
        value: String,
    },

    #[error("Parameter {index} may not contain ',' or a line break: {value:?}")]
    IllegalParameter { index: usize, value: String },

    #[error("Frame exceeds {0} bytes without a terminator")]
    FrameTooLong(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
