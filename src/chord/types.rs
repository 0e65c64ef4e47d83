use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::ops::{Add, Sub};
use std::str::FromStr;

/*
The ring is the 64-bit identifier space. Every position reasoning goes through
`between` and `distance`; the derived `Ord` is a plain unsigned comparison and
only serves tie-breaking.
*/

/// RingId represents a position on the Chord ring (mod 2^64)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct RingId(u64);

impl fmt::Debug for RingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RingId({})", hex::encode(self.0.to_be_bytes()))
    }
}

/// Decimal form, which is also the wire form
impl fmt::Display for RingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RingId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(RingId)
    }
}

impl Add for RingId {
    type Output = RingId;

    fn add(self, rhs: RingId) -> RingId {
        RingId(self.0.wrapping_add(rhs.0))
    }
}

impl Sub for RingId {
    type Output = RingId;

    fn sub(self, rhs: RingId) -> RingId {
        RingId(self.0.wrapping_sub(rhs.0))
    }
}

impl RingId {
    pub const fn new(value: u64) -> Self {
        RingId(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Position of a node, hashed from its canonical `ip:port` form
    pub fn from_address(addr: &SocketAddr) -> Self {
        Self::from_key(addr.to_string().as_bytes())
    }

    /// Keys are hashed into the same space as nodes
    pub fn from_key(key: &[u8]) -> Self {
        let digest = Sha256::digest(key);
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        RingId(u64::from_be_bytes(head))
    }

    /// Forward (clockwise) distance from `self` to `other`
    pub fn distance(&self, other: &RingId) -> u64 {
        other.0.wrapping_sub(self.0)
    }

    /// Membership in the half-open ring interval `(pre, suc]`.
    /// `pre == suc` covers the whole ring (a single-node ring).
    pub fn between(&self, pre: &RingId, suc: &RingId) -> bool {
        if pre == suc {
            return true;
        }
        let span = pre.distance(suc);
        let offset = pre.distance(self);
        offset != 0 && offset <= span
    }

    /// Like `between` but excluding `suc`: the open interval `(pre, suc)`
    pub fn strictly_between(&self, pre: &RingId, suc: &RingId) -> bool {
        self != suc && self.between(pre, suc)
    }

    /// Ideal start of the finger at `index`: `self + 2^index`
    pub fn finger_start(&self, index: usize) -> RingId {
        RingId(self.0.wrapping_add(1u64.wrapping_shl(index as u32)))
    }
}

/// A ring member: its hashed position plus where to reach it.
/// Equality and hashing look at the id only.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Node {
    pub id: RingId,
    pub addr: SocketAddr,
}

impl Node {
    pub fn from_address(addr: SocketAddr) -> Self {
        Node {
            id: RingId::from_address(&addr),
            addr,
        }
    }

    /// Pins a node to an explicit position instead of the hashed one
    pub fn with_id(id: RingId, addr: SocketAddr) -> Self {
        Node { id, addr }
    }

    pub fn strictly_between(&self, pre: &Node, suc: &Node) -> bool {
        self.id.strictly_between(&pre.id, &suc.id)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", hex::encode(self.id.0.to_be_bytes()), self.addr)
    }
}
