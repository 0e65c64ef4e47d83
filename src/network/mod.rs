pub mod messages;
pub mod node;
pub mod rpc;
pub mod tcp;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::chord::RingConfig;

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub host: IpAddr,
    pub port: Option<u16>, // Optional listen port (ephemeral if not specified)
    pub ring: RingConfig,
}

impl PeerConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port.unwrap_or(0))
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: None,
            ring: RingConfig::default(),
        }
    }
}
