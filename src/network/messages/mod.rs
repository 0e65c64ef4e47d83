//! Peer wire vocabulary.
//!
//! A frame is `<kind byte>(,<param>)*\r\n`, where the kind byte is the raw
//! ordinal of [`MessageKind`]. Parameters are plain text; `,`, `\r` and
//! `\n` are refused when a message is built, so every message survives a
//! trip over the wire.

pub mod codec;
pub mod conversions;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::error::MessageError;

pub const FRAME_DELIMITER: &[u8] = b"\r\n";
pub const PARAM_SEPARATOR: u8 = b',';
/// Longest frame accepted before a terminator shows up
pub const MAX_FRAME_LENGTH: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum MessageKind {
    /// `,src_port` >> `,suc_ip,suc_port`
    Join = 0,
    /// `,ring_id` >> `,suc_ip,suc_port`
    FindSuccessor = 1,
    /// `,src_port` >> `,pre_ip,pre_port`
    NotifyPredecessor = 2,
    /// `,src_port` >> `,suc_ip,suc_port`
    NotifySuccessor = 3,
    /// `,pre_ip,pre_port`
    PredecessorQuit = 4,
    /// `,suc_ip,suc_port`
    SuccessorQuit = 5,
    /// `,file_name`
    Get = 6,
    /// `,src_port,file_name`
    Put = 7,
}

impl MessageKind {
    pub const HIGHEST: MessageKind = MessageKind::Put;

    /// Fewest parameters a frame of this kind may carry. Requests and their
    /// replies share a kind, so this is the smaller of the two shapes.
    pub fn min_params(self) -> usize {
        match self {
            MessageKind::Join
            | MessageKind::FindSuccessor
            | MessageKind::NotifyPredecessor
            | MessageKind::NotifySuccessor
            | MessageKind::Get => 1,
            MessageKind::PredecessorQuit | MessageKind::SuccessorQuit | MessageKind::Put => 2,
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = MessageError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            0 => MessageKind::Join,
            1 => MessageKind::FindSuccessor,
            2 => MessageKind::NotifyPredecessor,
            3 => MessageKind::NotifySuccessor,
            4 => MessageKind::PredecessorQuit,
            5 => MessageKind::SuccessorQuit,
            6 => MessageKind::Get,
            7 => MessageKind::Put,
            other => return Err(MessageError::UnknownKind(other)),
        })
    }
}

/// A parameter may not carry the separator or any part of the terminator
pub(crate) fn check_param(index: usize, param: &str) -> Result<(), MessageError> {
    if param.bytes().any(|b| b == PARAM_SEPARATOR || b == b'\r' || b == b'\n') {
        return Err(MessageError::IllegalParameter {
            index,
            value: param.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    params: Vec<String>,
}

impl Message {
    pub fn new(kind: MessageKind, params: Vec<String>) -> Result<Self, MessageError> {
        for (index, param) in params.iter().enumerate() {
            check_param(index, param)?;
        }
        Ok(Self { kind, params })
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Pulls one complete frame off the front of `buf`.
    ///
    /// `Ok(None)` means no terminator has arrived yet and nothing was
    /// consumed. A complete but invalid frame is consumed and reported as an
    /// error so the stream can move past it.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<Message>, MessageError> {
        let Some(end) = buf
            .windows(FRAME_DELIMITER.len())
            .position(|w| w == FRAME_DELIMITER)
        else {
            if buf.len() > MAX_FRAME_LENGTH {
                return Err(MessageError::FrameTooLong(MAX_FRAME_LENGTH));
            }
            return Ok(None);
        };

        let frame = buf.split_to(end);
        buf.advance(FRAME_DELIMITER.len());
        Self::parse_frame(&frame).map(Some)
    }

    /// Parses a single frame with its terminator already stripped
    pub fn parse_frame(frame: &[u8]) -> Result<Message, MessageError> {
        let (&tag, rest) = frame
            .split_first()
            .ok_or_else(|| MessageError::MalformedFrame("empty frame".into()))?;
        let kind = MessageKind::try_from(tag)?;

        let params = match rest.split_first() {
            None => Vec::new(),
            Some((&PARAM_SEPARATOR, tail)) => tail
                .split(|b| *b == PARAM_SEPARATOR)
                .map(|p| {
                    String::from_utf8(p.to_vec()).map_err(|_| {
                        MessageError::MalformedFrame("parameter is not valid UTF-8".into())
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some((other, _)) => {
                return Err(MessageError::MalformedFrame(format!(
                    "expected ',' after kind, found byte {other}"
                )))
            }
        };

        if params.len() < kind.min_params() {
            return Err(MessageError::MissingParameter {
                kind,
                expected: kind.min_params(),
                found: params.len(),
            });
        }

        Ok(Message { kind, params })
    }

    /// Appends the wire form of this message to `dst`
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(1 + self.params.iter().map(|p| p.len() + 1).sum::<usize>() + 2);
        dst.put_u8(self.kind as u8);
        for param in &self.params {
            dst.put_u8(PARAM_SEPARATOR);
            dst.put_slice(param.as_bytes());
        }
        dst.put_slice(FRAME_DELIMITER);
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.freeze()
    }
}
