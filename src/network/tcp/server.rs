use futures::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::chord::protocol::RingProtocol;
use crate::error::NetworkError;
use crate::network::messages::codec::ChordCodec;

pub struct ChordServer {
    listener: TcpListener,
    protocol: Arc<RingProtocol>,
    shutdown: CancellationToken,
}

impl ChordServer {
    /// Binds before the protocol exists, since a node's ring id is derived
    /// from the port it actually got.
    pub async fn bind(addr: SocketAddr) -> Result<TcpListener, NetworkError> {
        TcpListener::bind(addr)
            .await
            .map_err(|source| NetworkError::Bind { addr, source })
    }

    pub fn new(
        listener: TcpListener,
        protocol: Arc<RingProtocol>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            listener,
            protocol,
            shutdown,
        }
    }

    /// Accepts peers until the token is cancelled
    pub async fn run(self) {
        let Self {
            listener,
            protocol,
            shutdown,
        } = self;

        match listener.local_addr() {
            Ok(addr) => info!("Starting peer server on {}", addr),
            Err(_) => info!("Starting peer server"),
        }
        let mut incoming = TcpListenerStream::new(listener);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Peer server shutting down");
                    break;
                }
                conn = incoming.next() => match conn {
                    Some(Ok(stream)) => {
                        let protocol = protocol.clone();
                        tokio::spawn(async move {
                            serve_connection(stream, protocol).await;
                        });
                    }
                    Some(Err(e)) => warn!("Failed to accept connection: {}", e),
                    None => break,
                },
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, protocol: Arc<RingProtocol>) {
    let peer = match stream.peer_addr() {
        Ok(peer) => peer,
        Err(e) => {
            debug!("Connection vanished before it was served: {}", e);
            return;
        }
    };
    stream.set_nodelay(true).ok();
    let mut framed = Framed::new(stream, ChordCodec);

    while let Some(frame) = framed.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping connection from {}: {}", peer, e);
                return;
            }
        };

        trace!("<- {} {:?}", peer, message);
        let Some(reply) = protocol.handle(peer.ip(), message).await else {
            // closing tells a waiting caller there is no answer coming
            return;
        };
        if let Err(e) = framed.send(reply).await {
            debug!("Failed to reply to {}: {}", peer, e);
            return;
        }
    }
}
