//! In-process ring harness: peers exchange messages by calling each other's
//! handlers directly, so ring scenarios run without sockets.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::chord::protocol::RingProtocol;
use crate::chord::types::{Node, RingId};
use crate::chord::RingConfig;
use crate::error::NetworkError;
use crate::network::messages::Message;
use crate::network::rpc::RpcClient;

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

#[derive(Default)]
pub(crate) struct LocalNetwork {
    peers: Mutex<HashMap<SocketAddr, Weak<RingProtocol>>>,
    down: Mutex<HashSet<SocketAddr>>,
    stalled: Mutex<HashMap<SocketAddr, Duration>>,
}

impl LocalNetwork {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn spawn_node(self: &Arc<Self>, port: u16) -> Arc<RingProtocol> {
        let addr = SocketAddr::new(LOOPBACK, port);
        self.register(Node::from_address(addr))
    }

    /// A peer whose ring id is chosen rather than hashed
    pub(crate) fn spawn_node_with_id(self: &Arc<Self>, port: u16, id: u64) -> Arc<RingProtocol> {
        let addr = SocketAddr::new(LOOPBACK, port);
        self.register(Node::with_id(RingId::new(id), addr))
    }

    fn register(self: &Arc<Self>, local: Node) -> Arc<RingProtocol> {
        let client = Arc::new(LocalClient {
            network: self.clone(),
            local: local.addr,
        });
        let config = RingConfig {
            join_timeout: Duration::from_millis(500),
            rpc_timeout: Duration::from_millis(200),
            liveness_timeout: Duration::from_millis(100),
            stabilize_interval: Duration::from_millis(50),
        };
        let protocol = Arc::new(RingProtocol::new(local, config, client));
        self.peers
            .lock()
            .unwrap()
            .insert(local.addr, Arc::downgrade(&protocol));
        protocol
    }

    /// Every later call to `addr` fails as if the process had crashed
    pub(crate) fn take_down(&self, addr: SocketAddr) {
        self.down.lock().unwrap().insert(addr);
    }

    /// `addr` still accepts calls but only starts on them after `delay`;
    /// whatever it answers once the caller has given up is lost
    pub(crate) fn stall(&self, addr: SocketAddr, delay: Duration) {
        self.stalled.lock().unwrap().insert(addr, delay);
    }

    fn delay_of(&self, addr: SocketAddr) -> Option<Duration> {
        self.stalled.lock().unwrap().get(&addr).copied()
    }

    fn reachable(&self, addr: SocketAddr) -> Option<Arc<RingProtocol>> {
        if self.down.lock().unwrap().contains(&addr) {
            return None;
        }
        self.peers.lock().unwrap().get(&addr).and_then(Weak::upgrade)
    }
}

struct LocalClient {
    network: Arc<LocalNetwork>,
    local: SocketAddr,
}

#[async_trait]
impl RpcClient for LocalClient {
    async fn call(
        &self,
        addr: SocketAddr,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, NetworkError> {
        let Some(peer) = self.network.reachable(addr) else {
            return Err(NetworkError::PeerUnreachable {
                addr,
                reason: "connection refused".into(),
            });
        };
        let from = self.local.ip();
        let delay = self.network.delay_of(addr);
        let exchange = async move {
            match delay {
                // the peer keeps going after the caller stops waiting
                Some(delay) => tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    peer.handle(from, message).await
                })
                .await
                .ok()
                .flatten(),
                None => peer.handle(from, message).await,
            }
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(NetworkError::ConnectionClosed(addr)),
            Err(_) => Err(NetworkError::Timeout {
                addr,
                after: timeout,
            }),
        }
    }

    fn send_detached(&self, addr: SocketAddr, message: Message) {
        let network = self.network.clone();
        let from = self.local.ip();
        tokio::spawn(async move {
            if let Some(peer) = network.reachable(addr) {
                peer.handle(from, message).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChordError;
    use crate::network::messages::MessageKind;

    async fn settle(nodes: &[Arc<RingProtocol>], rounds: usize) {
        for _ in 0..rounds {
            for node in nodes {
                node.stabilize().await;
            }
        }
    }

    fn sorted(nodes: &[Arc<RingProtocol>]) -> Vec<Arc<RingProtocol>> {
        let mut nodes = nodes.to_vec();
        nodes.sort_by_key(|n| n.local().id);
        nodes
    }

    async fn assert_ring(nodes: &[Arc<RingProtocol>]) {
        let ring = sorted(nodes);
        let n = ring.len();
        for (i, node) in ring.iter().enumerate() {
            let next = ring[(i + 1) % n].local();
            let prev = ring[(i + n - 1) % n].local();
            assert_eq!(node.successor().await, next, "successor of {}", node.local());
            assert_eq!(node.predecessor().await, prev, "predecessor of {}", node.local());
        }
    }

    async fn three_node_ring(network: &Arc<LocalNetwork>, base: u16) -> Vec<Arc<RingProtocol>> {
        let nodes: Vec<_> = (0..3).map(|i| network.spawn_node(base + i)).collect();
        nodes[0].self_boot().await.unwrap();
        nodes[1].join(nodes[0].local().addr).await.unwrap();
        nodes[2].join(nodes[0].local().addr).await.unwrap();
        settle(&nodes, 6).await;
        assert_ring(&nodes).await;
        nodes
    }

    #[tokio::test]
    async fn test_self_boot_owns_everything() {
        let network = LocalNetwork::new();
        let node = network.spawn_node(7000);
        node.self_boot().await.unwrap();

        assert!(node.is_established().await);
        assert_eq!(node.successor().await, node.local());
        assert_eq!(node.predecessor().await, node.local());
        for id in [0, 1, u64::MAX, node.local().id.value()] {
            assert_eq!(node.find_successor(RingId::new(id)).await.unwrap(), node.local());
        }

        assert!(matches!(
            node.self_boot().await,
            Err(ChordError::AlreadyEstablished)
        ));
    }

    #[tokio::test]
    async fn test_lookup_over_wired_ring() {
        let network = LocalNetwork::new();
        let a = network.spawn_node_with_id(7101, 10);
        let b = network.spawn_node_with_id(7102, 30);
        let c = network.spawn_node_with_id(7103, 50);
        a.wire(c.local(), &[b.local(), c.local()]).await;
        b.wire(a.local(), &[c.local(), a.local()]).await;
        c.wire(b.local(), &[a.local(), b.local()]).await;

        let owner = |id: u64| {
            let a = a.clone();
            async move { a.find_successor(RingId::new(id)).await.unwrap().addr }
        };
        assert_eq!(owner(15).await, b.local().addr);
        assert_eq!(owner(35).await, c.local().addr);
        assert_eq!(owner(55).await, a.local().addr);
        assert_eq!(owner(10).await, a.local().addr);
        assert_eq!(
            b.find_successor(RingId::new(30)).await.unwrap(),
            b.local()
        );
    }

    #[tokio::test]
    async fn test_lookup_with_successor_pointers_only() {
        let network = LocalNetwork::new();
        let nodes: Vec<_> = (0..3).map(|i| network.spawn_node(7200 + i)).collect();
        let ring = sorted(&nodes);
        let (a, b, c) = (&ring[0], &ring[1], &ring[2]);
        a.wire(c.local(), &[b.local()]).await;
        b.wire(a.local(), &[c.local()]).await;
        c.wire(b.local(), &[a.local()]).await;

        let between_b_and_c = b.local().id + RingId::new(1);
        assert_eq!(a.find_successor(between_b_and_c).await.unwrap(), c.local());
        let past_c = c.local().id + RingId::new(1);
        assert_eq!(a.find_successor(past_c).await.unwrap(), a.local());
        assert_eq!(a.find_successor(b.local().id).await.unwrap(), b.local());
    }

    #[tokio::test]
    async fn test_ring_converges_for_any_join_order() {
        let orders: [[usize; 3]; 4] = [[0, 1, 2], [2, 1, 0], [1, 0, 2], [0, 2, 1]];
        for (round, order) in orders.iter().enumerate() {
            let network = LocalNetwork::new();
            let base = 7300 + 10 * round as u16;
            let nodes: Vec<_> = (0..3).map(|i| network.spawn_node(base + i)).collect();

            let first = &nodes[order[0]];
            first.self_boot().await.unwrap();
            nodes[order[1]].join(first.local().addr).await.unwrap();
            // join through the most recent member rather than the first
            nodes[order[2]]
                .join(nodes[order[1]].local().addr)
                .await
                .unwrap();

            settle(&nodes, 6).await;
            assert_ring(&nodes).await;
        }
    }

    #[tokio::test]
    async fn test_crashed_successor_is_pruned() {
        let network = LocalNetwork::new();
        let nodes = three_node_ring(&network, 7400).await;
        let ring = sorted(&nodes);
        let (a, b, c) = (ring[0].clone(), ring[1].clone(), ring[2].clone());

        network.take_down(b.local().addr);
        let survivors = vec![a.clone(), c.clone()];
        settle(&survivors, 4).await;

        assert!(!a.knows(&b.local()).await);
        assert!(!c.knows(&b.local()).await);
        assert_ring(&survivors).await;
    }

    #[tokio::test]
    async fn test_quit_hands_over_neighbours() {
        let network = LocalNetwork::new();
        let nodes = three_node_ring(&network, 7500).await;
        let ring = sorted(&nodes);
        let (a, b, c) = (ring[0].clone(), ring[1].clone(), ring[2].clone());

        b.quit().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!b.is_established().await);
        assert_eq!(a.successor().await, c.local());
        assert_eq!(c.predecessor().await, a.local());
        assert!(!a.knows(&b.local()).await);

        assert!(matches!(b.quit().await, Err(ChordError::NotEstablished)));
    }

    #[tokio::test]
    async fn test_unestablished_node_ignores_peers() {
        let network = LocalNetwork::new();
        let node = network.spawn_node(7600);

        for message in [
            Message::with_port(MessageKind::Join, 7601),
            Message::with_ring_id(MessageKind::FindSuccessor, RingId::new(5)),
            Message::with_port(MessageKind::NotifyPredecessor, 7601),
        ] {
            assert!(node.handle(LOOPBACK, message).await.is_none());
        }

        // stabilizing an idle node must not touch its state
        node.stabilize().await;
        assert!(!node.is_established().await);
        assert_eq!(node.successor().await, node.local());
    }

    #[tokio::test]
    async fn test_join_failure_leaves_node_unestablished() {
        let network = LocalNetwork::new();
        let node = network.spawn_node(7700);
        let gone = network.spawn_node(7701);
        gone.self_boot().await.unwrap();
        network.take_down(gone.local().addr);

        assert!(matches!(
            node.join(gone.local().addr).await,
            Err(ChordError::JoinFailed(_))
        ));
        assert!(!node.is_established().await);
        assert_eq!(node.successor().await, node.local());

        // a target that is up but not part of a ring never answers
        let idle = network.spawn_node(7702);
        assert!(node.join(idle.local().addr).await.is_err());
        assert!(!node.is_established().await);
    }

    #[tokio::test]
    async fn test_notify_predecessor_adopts_and_replies() {
        let network = LocalNetwork::new();
        let node = network.spawn_node(7800);
        node.self_boot().await.unwrap();

        let caller = Node::from_address(SocketAddr::new(LOOPBACK, 7801));
        let reply = node
            .handle(LOOPBACK, Message::with_port(MessageKind::NotifyPredecessor, 7801))
            .await
            .unwrap();

        assert_eq!(reply.kind(), MessageKind::NotifyPredecessor);
        assert_eq!(reply.param_as_node(0).unwrap(), caller);
        assert_eq!(node.predecessor().await, caller);
        // a singleton learns its successor from the caller too
        assert_eq!(node.successor().await, caller);
    }

    #[tokio::test]
    async fn test_notify_predecessor_keeps_a_closer_predecessor() {
        let network = LocalNetwork::new();
        let caller = Node::from_address(SocketAddr::new(LOOPBACK, 7851));
        let base = caller.id.value();
        let node = network.spawn_node_with_id(7850, base.wrapping_add(100));
        let closer = Node::with_id(
            RingId::new(base.wrapping_add(50)),
            SocketAddr::new(LOOPBACK, 7852),
        );
        node.wire(closer, &[closer]).await;

        // the caller sits behind the current predecessor
        let reply = node
            .handle(LOOPBACK, Message::with_port(MessageKind::NotifyPredecessor, 7851))
            .await
            .unwrap();
        assert_eq!(reply.param_as_node(0).unwrap().addr, closer.addr);
        assert_eq!(node.predecessor().await, closer);

        // once the predecessor is further back the same caller is adopted
        let further = Node::with_id(
            RingId::new(base.wrapping_sub(50)),
            SocketAddr::new(LOOPBACK, 7853),
        );
        node.wire(further, &[further]).await;
        let reply = node
            .handle(LOOPBACK, Message::with_port(MessageKind::NotifyPredecessor, 7851))
            .await
            .unwrap();
        assert_eq!(reply.param_as_node(0).unwrap(), caller);
        assert_eq!(node.predecessor().await, caller);
    }

    async fn wired_ring(network: &Arc<LocalNetwork>, base: u16) -> [Arc<RingProtocol>; 3] {
        let a = network.spawn_node_with_id(base, 10);
        let b = network.spawn_node_with_id(base + 1, 30);
        let c = network.spawn_node_with_id(base + 2, 50);
        a.wire(c.local(), &[b.local(), c.local()]).await;
        b.wire(a.local(), &[c.local(), a.local()]).await;
        c.wire(b.local(), &[a.local(), b.local()]).await;
        [a, b, c]
    }

    #[tokio::test]
    async fn test_dead_hop_is_evicted_and_lookup_moves_on() {
        for stalled in [false, true] {
            let network = LocalNetwork::new();
            let base = if stalled { 7950 } else { 7900 };
            let [a, b, c] = wired_ring(&network, base).await;
            if stalled {
                network.stall(b.local().addr, Duration::from_secs(3600));
            } else {
                network.take_down(b.local().addr);
            }

            let owner = a.find_successor(RingId::new(35)).await.unwrap();
            assert_eq!(owner.addr, c.local().addr, "stalled: {stalled}");
            // the successor slot is refilled rather than left pointing home
            assert_eq!(a.successor().await, c.local());
            assert!(!a.knows(&b.local()).await);
        }
    }

    #[tokio::test]
    async fn test_lone_dead_successor_leaves_node_owning_everything() {
        let network = LocalNetwork::new();
        let a = network.spawn_node_with_id(7990, 10);
        let b = network.spawn_node_with_id(7991, 30);
        a.wire(a.local(), &[b.local()]).await;
        network.take_down(b.local().addr);

        assert_eq!(a.find_successor(RingId::new(40)).await.unwrap(), a.local());
        assert_eq!(a.successor().await, a.local());
    }

    #[tokio::test]
    async fn test_stalled_successor_is_evicted_by_stabilization() {
        let network = LocalNetwork::new();
        let [a, b, c] = wired_ring(&network, 8400).await;

        network.stall(b.local().addr, Duration::from_secs(3600));
        a.stabilize().await;

        assert_eq!(a.successor().await, c.local());
        assert!(!a.knows(&b.local()).await);
    }

    #[tokio::test]
    async fn test_late_reply_is_not_applied() {
        let network = LocalNetwork::new();
        let [a, b, c] = wired_ring(&network, 8450).await;
        // b would report 20 as its predecessor, which would tighten a's successor
        let between = Node::with_id(RingId::new(20), SocketAddr::new(LOOPBACK, 8459));
        b.wire(between, &[c.local(), a.local()]).await;

        let rpc_timeout = a.config().rpc_timeout;
        network.stall(b.local().addr, rpc_timeout * 2);
        a.stabilize().await;
        tokio::time::sleep(rpc_timeout * 3).await;

        assert_eq!(a.successor().await, c.local());
        assert!(!a.knows(&between).await);
        assert!(!a.knows(&b.local()).await);
    }

    #[tokio::test]
    async fn test_forwarded_lookup_does_not_blame_its_first_hop() {
        let network = LocalNetwork::new();
        let [a, b, c] = wired_ring(&network, 8500).await;
        // a only knows b, so a lookup of 55 goes a -> b -> c
        a.wire(c.local(), &[b.local()]).await;
        // c is alive but answers b later than b may wait
        let rpc_timeout = a.config().rpc_timeout;
        network.stall(c.local().addr, rpc_timeout * 3 / 4);

        let outcome = a.find_successor(RingId::new(55)).await;
        assert!(matches!(outcome, Err(ChordError::LookupDeclined(_))));
        assert!(a.knows(&b.local()).await);
        assert!(b.knows(&c.local()).await);
    }

    #[tokio::test]
    async fn test_file_requests_get_no_reply() {
        let network = LocalNetwork::new();
        let node = network.spawn_node(8000);
        node.self_boot().await.unwrap();

        assert!(node.handle(LOOPBACK, Message::get("notes.txt").unwrap()).await.is_none());
        assert!(node
            .handle(LOOPBACK, Message::put(8001, "notes.txt").unwrap())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_malformed_request_is_dropped() {
        let network = LocalNetwork::new();
        let node = network.spawn_node(8100);
        node.self_boot().await.unwrap();

        let garbage = Message::new(MessageKind::FindSuccessor, vec!["not-a-number".into()]).unwrap();
        assert!(node.handle(LOOPBACK, garbage).await.is_none());
    }
}
