use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::NetworkError;
use crate::network::messages::Message;

/// What the ring protocol needs from the transport.
///
/// Implementations decide whether connections are pooled or dialed per call.
/// A timeout is reported like any other failure; a reply arriving after the
/// deadline must never surface.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Sends `message` to `addr` and waits at most `timeout` for one reply
    async fn call(
        &self,
        addr: SocketAddr,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, NetworkError>;

    /// Best-effort send with no reply and no error reporting
    fn send_detached(&self, addr: SocketAddr, message: Message);
}
