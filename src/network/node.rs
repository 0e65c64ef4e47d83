use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::chord::protocol::{RingProtocol, RingSnapshot};
use crate::chord::types::{Node, RingId};
use crate::chord::workers::run_stabilize_worker;
use crate::error::{ChordError, ChordlingError, NetworkError};
use crate::instruction::Instruction;
use crate::network::messages::Message;
use crate::network::rpc::RpcClient;
use crate::network::tcp::client::TcpRpcClient;
use crate::network::tcp::server::ChordServer;
use crate::network::PeerConfig;

// Time left to departure notices before the runtime goes away
const QUIT_GRACE: Duration = Duration::from_millis(500);

/// A running node: listener, protocol and stabilizer behind one handle.
pub struct ChordPeer {
    protocol: Arc<RingProtocol>,
    client: Arc<dyn RpcClient>,
    port: u16,
    shutdown: CancellationToken,
    server_handle: Mutex<Option<JoinHandle<()>>>,
    stabilizer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ChordPeer {
    /// Binds the listener and starts serving peers. The node is not part
    /// of any ring until `create_network` or `join` succeeds.
    pub async fn new(config: PeerConfig) -> Result<Self, ChordlingError> {
        // peers hash the address they dial, so ours must be one they can dial
        if config.host.is_unspecified() {
            return Err(NetworkError::UnspecifiedAddress(config.host).into());
        }
        let bind_addr = config.bind_addr();
        let listener = ChordServer::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let local = Node::from_address(local_addr);

        let client: Arc<dyn RpcClient> = Arc::new(TcpRpcClient::new(config.ring.rpc_timeout));
        let protocol = Arc::new(RingProtocol::new(local, config.ring, client.clone()));
        let shutdown = CancellationToken::new();

        let server = ChordServer::new(listener, protocol.clone(), shutdown.clone());
        let server_handle = tokio::spawn(server.run());
        info!("Node {} listening on {}", local, local_addr);

        Ok(Self {
            protocol,
            client,
            port: local_addr.port(),
            shutdown,
            server_handle: Mutex::new(Some(server_handle)),
            stabilizer_handle: Mutex::new(None),
        })
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> Node {
        self.protocol.local()
    }

    pub fn protocol(&self) -> &Arc<RingProtocol> {
        &self.protocol
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub async fn create_network(&self) -> Result<(), ChordlingError> {
        info!("Creating new Chord ring...");
        self.protocol.self_boot().await?;
        self.start_stabilizer().await;
        Ok(())
    }

    pub async fn join(&self, target: SocketAddr) -> Result<Node, ChordlingError> {
        let successor = self.protocol.join(target).await?;
        self.start_stabilizer().await;
        Ok(successor)
    }

    async fn start_stabilizer(&self) {
        let mut handle = self.stabilizer_handle.lock().await;
        if handle.is_some() {
            return;
        }
        *handle = Some(tokio::spawn(run_stabilize_worker(
            self.protocol.clone(),
            self.protocol.config().stabilize_interval,
            self.shutdown.clone(),
        )));
    }

    /// The node currently responsible for `file_name`
    pub async fn locate(&self, file_name: &str) -> Result<Node, ChordlingError> {
        if !self.protocol.is_established().await {
            return Err(ChordError::NotEstablished.into());
        }
        let key = RingId::from_key(file_name.as_bytes());
        Ok(self.protocol.find_successor(key).await?)
    }

    pub async fn get(&self, file_name: &str) -> Result<Node, ChordlingError> {
        let owner = self.locate(file_name).await?;
        info!("{:?} is stored on {}", file_name, owner);
        Ok(owner)
    }

    /// Announces the file to its owner; the payload itself moves out of band
    pub async fn put(&self, file_name: &str) -> Result<Node, ChordlingError> {
        let announcement = Message::put(self.port, file_name)?;
        let owner = self.locate(file_name).await?;
        self.client.send_detached(owner.addr, announcement);
        info!("{:?} belongs to {}", file_name, owner);
        Ok(owner)
    }

    pub async fn snapshot(&self) -> RingSnapshot {
        self.protocol.snapshot().await
    }

    /// Leaves the ring and stops every task of this node
    pub async fn quit(&self) -> Result<(), ChordlingError> {
        let result = self.protocol.quit().await;
        self.shutdown.cancel();
        Ok(result?)
    }

    pub async fn execute(&self, instruction: Instruction) -> Result<(), ChordlingError> {
        debug!("Executing {:?}", instruction);
        match instruction {
            Instruction::Join(target) => {
                let successor = self.join(target).await?;
                info!("Joined the ring; successor is {}", successor);
            }
            Instruction::SelfBoot => self.create_network().await?,
            Instruction::Get(_) | Instruction::Put(_) => {
                let name = instruction.file_name().ok_or_else(|| {
                    ChordError::InvalidInstruction(format!("{:?} names no file", instruction))
                })?;
                if matches!(instruction, Instruction::Put(_)) {
                    self.put(&name).await?;
                } else {
                    self.get(&name).await?;
                }
            }
            Instruction::Print => {
                let snapshot = self.snapshot().await;
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }
            Instruction::Quit => self.quit().await?,
        }
        Ok(())
    }

    /// Blocks until `quit` or Ctrl-C, then waits for the node's tasks
    pub async fn run(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Received shutdown signal"),
                    Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
                }
                if let Err(e) = self.quit().await {
                    debug!("Leaving without notices: {}", e);
                }
            }
        }

        for slot in [&self.server_handle, &self.stabilizer_handle] {
            let taken = slot.lock().await.take();
            if let Some(handle) = taken {
                if let Err(e) = handle.await {
                    warn!("Node task ended abnormally: {}", e);
                }
            }
        }
        tokio::time::sleep(QUIT_GRACE).await;
        info!("Node shutdown complete");
    }
}
