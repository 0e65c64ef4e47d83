use std::net::{IpAddr, SocketAddr};

use crate::chord::types::{Node, RingId};
use crate::error::MessageError;
use crate::network::messages::{check_param, Message, MessageKind};

// Typed constructors. Numbers and addresses never contain a separator, so
// only file names go through the check.
impl Message {
    pub fn with_port(kind: MessageKind, port: u16) -> Self {
        Message {
            kind,
            params: vec![port.to_string()],
        }
    }

    /// An address travels as two parameters: ip, then port
    pub fn with_addr(kind: MessageKind, addr: SocketAddr) -> Self {
        Message {
            kind,
            params: vec![addr.ip().to_string(), addr.port().to_string()],
        }
    }

    pub fn with_ring_id(kind: MessageKind, id: RingId) -> Self {
        Message {
            kind,
            params: vec![id.to_string()],
        }
    }

    pub fn with_node(kind: MessageKind, node: &Node) -> Self {
        Self::with_addr(kind, node.addr)
    }

    pub fn get(file_name: &str) -> Result<Self, MessageError> {
        check_param(0, file_name)?;
        Ok(Message {
            kind: MessageKind::Get,
            params: vec![file_name.to_string()],
        })
    }

    pub fn put(port: u16, file_name: &str) -> Result<Self, MessageError> {
        check_param(1, file_name)?;
        Ok(Message {
            kind: MessageKind::Put,
            params: vec![port.to_string(), file_name.to_string()],
        })
    }
}

// Typed accessors
impl Message {
    fn param_or_err(&self, index: usize, expected: &'static str) -> Result<&str, MessageError> {
        self.param(index)
            .ok_or_else(|| MessageError::MalformedParameter {
                index,
                expected,
                value: String::new(),
            })
    }

    pub fn param_as_port(&self, index: usize) -> Result<u16, MessageError> {
        let raw = self.param_or_err(index, "port")?;
        raw.parse().map_err(|_| MessageError::MalformedParameter {
            index,
            expected: "port",
            value: raw.to_string(),
        })
    }

    pub fn param_as_addr(&self, start: usize) -> Result<SocketAddr, MessageError> {
        let raw = self.param_or_err(start, "ip address")?;
        let ip: IpAddr = raw.parse().map_err(|_| MessageError::MalformedParameter {
            index: start,
            expected: "ip address",
            value: raw.to_string(),
        })?;
        Ok(SocketAddr::new(ip, self.param_as_port(start + 1)?))
    }

    pub fn param_as_ring_id(&self, index: usize) -> Result<RingId, MessageError> {
        let raw = self.param_or_err(index, "ring id")?;
        raw.parse().map_err(|_| MessageError::MalformedParameter {
            index,
            expected: "ring id",
            value: raw.to_string(),
        })
    }

    /// The node whose address starts at parameter `start`
    pub fn param_as_node(&self, start: usize) -> Result<Node, MessageError> {
        self.param_as_addr(start).map(Node::from_address)
    }
}
