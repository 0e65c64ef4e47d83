use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, trace};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::error::NetworkError;
use crate::network::messages::codec::ChordCodec;
use crate::network::messages::Message;
use crate::network::rpc::RpcClient;

/// Dials a fresh connection for every exchange.
#[derive(Debug, Clone)]
pub struct TcpRpcClient {
    /// Upper bound on a detached send, connect included
    detached_timeout: Duration,
}

impl TcpRpcClient {
    pub fn new(detached_timeout: Duration) -> Self {
        Self { detached_timeout }
    }

    async fn connect(addr: SocketAddr) -> Result<Framed<TcpStream, ChordCodec>, NetworkError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| NetworkError::PeerUnreachable {
                addr,
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true).ok();
        Ok(Framed::new(stream, ChordCodec))
    }

    async fn exchange(addr: SocketAddr, message: Message) -> Result<Message, NetworkError> {
        let mut framed = Self::connect(addr).await?;
        framed
            .send(message)
            .await
            .map_err(|e| NetworkError::PeerUnreachable {
                addr,
                reason: e.to_string(),
            })?;

        match framed.next().await {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(NetworkError::Message(e)),
            None => Err(NetworkError::ConnectionClosed(addr)),
        }
    }
}

#[async_trait]
impl RpcClient for TcpRpcClient {
    async fn call(
        &self,
        addr: SocketAddr,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, NetworkError> {
        trace!("-> {} {:?}", addr, message);
        // dropping the exchange on expiry abandons the connection and any late reply
        match tokio::time::timeout(timeout, Self::exchange(addr, message)).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout {
                addr,
                after: timeout,
            }),
        }
    }

    fn send_detached(&self, addr: SocketAddr, message: Message) {
        let limit = self.detached_timeout;
        tokio::spawn(async move {
            let send = async {
                let mut framed = Self::connect(addr).await?;
                framed.send(message).await.map_err(NetworkError::Message)?;
                framed.close().await.map_err(NetworkError::Message)
            };
            match tokio::time::timeout(limit, send).await {
                Ok(Ok(())) => trace!("Detached send to {} delivered", addr),
                Ok(Err(e)) => debug!("Detached send to {} failed: {}", addr, e),
                Err(_) => debug!("Detached send to {} timed out", addr),
            }
        });
    }
}
