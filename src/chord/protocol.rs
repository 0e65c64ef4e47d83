use log::{debug, info, trace, warn};
use rand::Rng;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::chord::routing::FingerTable;
use crate::chord::types::{Node, RingId};
use crate::chord::{RingConfig, FINGER_TABLE_SIZE};
use crate::error::{ChordError, ChordlingError, NetworkError};
use crate::network::messages::{Message, MessageKind};
use crate::network::rpc::RpcClient;

/// Everything the protocol mutates. Lives behind one lock; the successor is
/// `table[0]`.
#[derive(Debug)]
struct RingState {
    predecessor: Node,
    table: FingerTable,
    established: bool,
}

impl RingState {
    fn fresh(local: Node) -> Self {
        Self {
            predecessor: local,
            table: FingerTable::new(local),
            established: false,
        }
    }

    /// Forgets `dead` everywhere. A vacated successor slot is refilled with
    /// the closest node the table still knows, so slot 0 never falls back to
    /// the local node while a live candidate remains.
    fn evict(&mut self, local: Node, dead: &Node) {
        self.table.remove(dead);
        if self.table.successor() == local {
            let replacement = self.table.find_closest_successor(local.id);
            self.table.set_successor(replacement);
        }
    }
}

/// Point-in-time copy of the routing state, for the `print` instruction
#[derive(Debug, Clone, Serialize)]
pub struct RingSnapshot {
    pub local: Node,
    pub established: bool,
    pub predecessor: Node,
    pub successor: Node,
    pub fingers: Vec<Node>,
}

/// The ring maintenance state machine of one node.
///
/// Remote calls are always issued with the state lock released; only the
/// mutation that follows a reply is done under it.
pub struct RingProtocol {
    local: Node,
    config: RingConfig,
    client: Arc<dyn RpcClient>,
    state: Mutex<RingState>,
    /// Keeps stabilization ticks from interleaving with each other
    tick: Mutex<()>,
}

impl RingProtocol {
    pub fn new(local: Node, config: RingConfig, client: Arc<dyn RpcClient>) -> Self {
        Self {
            local,
            config,
            client,
            state: Mutex::new(RingState::fresh(local)),
            tick: Mutex::new(()),
        }
    }

    pub fn local(&self) -> Node {
        self.local
    }

    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    fn port(&self) -> u16 {
        self.local.addr.port()
    }

    pub async fn is_established(&self) -> bool {
        self.state.lock().await.established
    }

    pub async fn predecessor(&self) -> Node {
        self.state.lock().await.predecessor
    }

    pub async fn successor(&self) -> Node {
        self.state.lock().await.table.successor()
    }

    pub async fn knows(&self, node: &Node) -> bool {
        let state = self.state.lock().await;
        state.predecessor == *node || state.table.contains(node)
    }

    pub async fn snapshot(&self) -> RingSnapshot {
        let state = self.state.lock().await;
        RingSnapshot {
            local: self.local,
            established: state.established,
            predecessor: state.predecessor,
            successor: state.table.successor(),
            fingers: state.table.entries().to_vec(),
        }
    }

    // Membership

    /// Starts a new ring with this node as its only member
    pub async fn self_boot(&self) -> Result<(), ChordError> {
        let mut state = self.state.lock().await;
        if state.established {
            return Err(ChordError::AlreadyEstablished);
        }
        state.predecessor = self.local;
        state.table = FingerTable::new(self.local);
        state.established = true;
        info!("Node {} booted a new ring", self.local);
        Ok(())
    }

    /// Asks `target` to place us in its ring. Nothing is committed unless a
    /// usable reply arrives within the join timeout.
    pub async fn join(&self, target: SocketAddr) -> Result<Node, ChordError> {
        if self.is_established().await {
            return Err(ChordError::AlreadyEstablished);
        }

        info!("Node {} joining through {}", self.local, target);
        let reply = self
            .client
            .call(
                target,
                Message::with_port(MessageKind::Join, self.port()),
                self.config.join_timeout,
            )
            .await
            .map_err(|e| ChordError::JoinFailed(e.to_string()))?;
        let successor = reply
            .param_as_node(0)
            .map_err(|e| ChordError::JoinFailed(format!("bad reply from {}: {}", target, e)))?;

        let mut state = self.state.lock().await;
        if state.established {
            return Err(ChordError::AlreadyEstablished);
        }
        state.table.set_successor(successor);
        state.table.insert(successor);
        state.established = true;
        info!("Node {} joined; successor is {}", self.local, successor);
        Ok(successor)
    }

    /// Graceful departure: point our neighbours at each other, best effort
    pub async fn quit(&self) -> Result<(), ChordError> {
        let (predecessor, successor) = {
            let mut state = self.state.lock().await;
            if !state.established {
                return Err(ChordError::NotEstablished);
            }
            let neighbours = (state.predecessor, state.table.successor());
            *state = RingState::fresh(self.local);
            neighbours
        };

        if successor != self.local {
            self.client.send_detached(
                successor.addr,
                Message::with_node(MessageKind::PredecessorQuit, &predecessor),
            );
        }
        if predecessor != self.local {
            self.client.send_detached(
                predecessor.addr,
                Message::with_node(MessageKind::SuccessorQuit, &successor),
            );
        }
        info!("Node {} left the ring", self.local);
        Ok(())
    }

    // Routing

    /// Resolves the node responsible for `id`.
    ///
    /// A hop that refuses, times out or answers garbage is evicted and the
    /// decision is retried; each retry removes a candidate, so the loop is
    /// bounded.
    pub async fn find_successor(&self, id: RingId) -> Result<Node, ChordError> {
        self.lookup(id, None).await
    }

    /// Lookup on behalf of a remote caller. It has to settle before the
    /// caller's own hop timeout, so it runs on half of it, and a hop that
    /// merely outlives that shorter budget is not evicted.
    async fn forwarded_lookup(&self, id: RingId) -> Result<Node, ChordError> {
        let deadline = Instant::now() + self.config.rpc_timeout / 2;
        self.lookup(id, Some(deadline)).await
    }

    async fn lookup(&self, id: RingId, deadline: Option<Instant>) -> Result<Node, ChordError> {
        for _ in 0..=FINGER_TABLE_SIZE {
            let ask = {
                let state = self.state.lock().await;
                let successor = state.table.successor();
                if id == self.local.id {
                    return Ok(self.local);
                }
                if id.between(&self.local.id, &successor.id) {
                    return Ok(successor);
                }
                let closest = state.table.find_closest_predecessor(id);
                if closest == self.local {
                    successor
                } else {
                    closest
                }
            };

            let hop_timeout = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(ChordError::LookupExpired(id));
                    }
                    left.min(self.config.rpc_timeout)
                }
                None => self.config.rpc_timeout,
            };

            trace!("Forwarding lookup of {:?} to {}", id, ask);
            let reply = self
                .client
                .call(
                    ask.addr,
                    Message::with_ring_id(MessageKind::FindSuccessor, id),
                    hop_timeout,
                )
                .await;

            let failure = match reply {
                Ok(reply) => match reply.param_as_node(0) {
                    Ok(owner) => return Ok(owner),
                    Err(e) => ChordlingError::from(e),
                },
                // alive, but could not resolve it either
                Err(NetworkError::ConnectionClosed(addr)) => {
                    return Err(ChordError::LookupDeclined(addr))
                }
                Err(NetworkError::Timeout { .. }) if deadline.is_some() => {
                    return Err(ChordError::LookupExpired(id))
                }
                Err(e) => ChordlingError::from(e),
            };

            warn!("Lookup hop {} failed, evicting it: {}", ask, failure);
            self.state.lock().await.evict(self.local, &ask);
        }
        Err(ChordError::RoutingExhausted(id))
    }

    // Stabilization

    /// One maintenance tick: predecessor liveness, successor refresh, one
    /// random finger. A no-op while the node is not part of a ring.
    pub async fn stabilize(&self) {
        let _tick = self.tick.lock().await;
        if !self.is_established().await {
            trace!("Skipping stabilization, node not established");
            return;
        }
        self.check_predecessor().await;
        self.check_successor().await;
        let index = rand::rng().random_range(1..FINGER_TABLE_SIZE);
        if let Err(e) = self.fix_finger(index).await {
            warn!("Failed to fix finger {}: {}", index, e);
        }
    }

    async fn check_predecessor(&self) {
        let predecessor = self.state.lock().await.predecessor;
        if predecessor == self.local {
            return;
        }

        let probe = self
            .client
            .call(
                predecessor.addr,
                Message::with_port(MessageKind::NotifySuccessor, self.port()),
                self.config.liveness_timeout,
            )
            .await;

        if let Err(e) = probe {
            warn!("Predecessor {} is unresponsive: {}", predecessor, e);
            let mut state = self.state.lock().await;
            state.evict(self.local, &predecessor);
            if state.predecessor == predecessor {
                state.predecessor = state.table.find_closest_predecessor(self.local.id);
                info!("Predecessor replaced by {}", state.predecessor);
            }
        }
    }

    async fn check_successor(&self) {
        let (successor, predecessor) = {
            let state = self.state.lock().await;
            (state.table.successor(), state.predecessor)
        };

        if successor == self.local {
            if predecessor.strictly_between(&self.local, &successor) {
                let mut state = self.state.lock().await;
                if state.table.successor() == successor && state.predecessor == predecessor {
                    state.table.set_successor(predecessor);
                    state.table.insert(predecessor);
                    info!("Adopted predecessor {} as successor", predecessor);
                }
            }
            return;
        }

        let outcome = self
            .client
            .call(
                successor.addr,
                Message::with_port(MessageKind::NotifyPredecessor, self.port()),
                self.config.rpc_timeout,
            )
            .await
            .map_err(ChordlingError::from)
            .and_then(|reply| reply.param_as_node(0).map_err(ChordlingError::from));

        let mut state = self.state.lock().await;
        match outcome {
            Ok(candidate) => {
                // the successor may have moved while we were waiting
                if state.table.successor() == successor
                    && candidate.strictly_between(&self.local, &successor)
                {
                    state.table.set_successor(candidate);
                    state.table.insert(candidate);
                    info!("Successor tightened from {} to {}", successor, candidate);
                }
            }
            Err(e) => {
                warn!("Successor {} is unresponsive: {}", successor, e);
                state.evict(self.local, &successor);
                info!("Successor replaced by {}", state.table.successor());
            }
        }
    }

    /// Points slot `index` at the owner of its ideal start position
    pub async fn fix_finger(&self, index: usize) -> Result<Node, ChordError> {
        let target = self.local.id.finger_start(index);
        let owner = self.find_successor(target).await?;
        let mut state = self.state.lock().await;
        if state.established {
            state.table.set(index, owner);
            debug!("Finger {} now {}", index, owner);
        }
        Ok(owner)
    }

    // Inbound RPCs

    /// Dispatches one inbound message and produces the reply, if any.
    /// Everything is dropped while the node is not established, and so is
    /// any message whose parameters do not decode.
    pub async fn handle(&self, peer_ip: IpAddr, message: Message) -> Option<Message> {
        if !self.is_established().await {
            debug!("Dropping {:?} from {}: not established", message.kind(), peer_ip);
            return None;
        }

        let kind = message.kind();
        let result = match kind {
            MessageKind::Join => self.on_join(peer_ip, &message).await,
            MessageKind::FindSuccessor => self.on_find_successor(&message).await,
            MessageKind::NotifyPredecessor => self.on_notify_predecessor(peer_ip, &message).await,
            MessageKind::NotifySuccessor => self.on_notify_successor(peer_ip, &message).await,
            MessageKind::PredecessorQuit => self.on_predecessor_quit(&message).await,
            MessageKind::SuccessorQuit => self.on_successor_quit(&message).await,
            MessageKind::Get | MessageKind::Put => Ok(self.on_file_request(peer_ip, &message)),
        };

        result.unwrap_or_else(|e| {
            warn!("Dropping {:?} from {}: {}", kind, peer_ip, e);
            None
        })
    }

    fn sender(peer_ip: IpAddr, message: &Message) -> Result<Node, ChordlingError> {
        let port = message.param_as_port(0)?;
        Ok(Node::from_address(SocketAddr::new(peer_ip, port)))
    }

    async fn on_join(
        &self,
        peer_ip: IpAddr,
        message: &Message,
    ) -> Result<Option<Message>, ChordlingError> {
        let joiner = Self::sender(peer_ip, message)?;
        let owner = self.forwarded_lookup(joiner.id).await?;
        debug!("Routing joiner {} to {}", joiner, owner);
        Ok(Some(Message::with_node(MessageKind::Join, &owner)))
    }

    async fn on_find_successor(
        &self,
        message: &Message,
    ) -> Result<Option<Message>, ChordlingError> {
        let id = message.param_as_ring_id(0)?;
        let owner = self.forwarded_lookup(id).await?;
        Ok(Some(Message::with_node(MessageKind::FindSuccessor, &owner)))
    }

    /// "Am I your predecessor?" Always answers with the predecessor we end
    /// up with, so the caller can tighten its successor.
    async fn on_notify_predecessor(
        &self,
        peer_ip: IpAddr,
        message: &Message,
    ) -> Result<Option<Message>, ChordlingError> {
        let caller = Self::sender(peer_ip, message)?;
        let mut state = self.state.lock().await;
        if caller != self.local && caller.strictly_between(&state.predecessor, &self.local) {
            info!("Predecessor changed from {} to {}", state.predecessor, caller);
            state.predecessor = caller;
        }
        state.table.insert(caller);
        Ok(Some(Message::with_node(
            MessageKind::NotifyPredecessor,
            &state.predecessor,
        )))
    }

    /// Liveness probe from our successor; answers with our own successor
    async fn on_notify_successor(
        &self,
        peer_ip: IpAddr,
        message: &Message,
    ) -> Result<Option<Message>, ChordlingError> {
        let caller = Self::sender(peer_ip, message)?;
        let mut state = self.state.lock().await;
        state.table.insert(caller);
        Ok(Some(Message::with_node(
            MessageKind::NotifySuccessor,
            &state.table.successor(),
        )))
    }

    /// Our predecessor is leaving and hands us its own predecessor
    async fn on_predecessor_quit(
        &self,
        message: &Message,
    ) -> Result<Option<Message>, ChordlingError> {
        let replacement = message.param_as_node(0)?;
        let mut state = self.state.lock().await;
        let departed = state.predecessor;
        if departed != self.local {
            state.table.remove(&departed);
        }
        state.predecessor = replacement;
        state.table.insert(replacement);
        info!("Predecessor {} left; predecessor is now {}", departed, replacement);
        Ok(None)
    }

    /// Our successor is leaving and hands us its own successor
    async fn on_successor_quit(
        &self,
        message: &Message,
    ) -> Result<Option<Message>, ChordlingError> {
        let replacement = message.param_as_node(0)?;
        let mut state = self.state.lock().await;
        let departed = state.table.successor();
        if departed != self.local {
            state.table.remove(&departed);
        }
        state.table.set_successor(replacement);
        state.table.insert(replacement);
        info!("Successor {} left; successor is now {}", departed, replacement);
        Ok(None)
    }

    // Payload transfer is served out of band
    fn on_file_request(&self, peer_ip: IpAddr, message: &Message) -> Option<Message> {
        match message.kind() {
            MessageKind::Put => info!(
                "{} announced file {:?}",
                peer_ip,
                message.param(1).unwrap_or_default()
            ),
            _ => debug!(
                "{} asked for file {:?}; transfers are not served here",
                peer_ip,
                message.param(0).unwrap_or_default()
            ),
        }
        None
    }

    /// Overwrites predecessor and fingers in one step
    #[cfg(test)]
    pub(crate) async fn wire(&self, predecessor: Node, known: &[Node]) {
        let mut state = self.state.lock().await;
        state.predecessor = predecessor;
        state.table = FingerTable::new(self.local);
        for node in known {
            state.table.insert(*node);
        }
        state.established = true;
    }
}
