use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;

mod conn;
mod state;
mod table;

pub use conn::*;
pub use state::*;
pub use table::*;

/// One side of a flow: an address/port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Identity of a bidirectional flow.
///
/// Equality and hashing are symmetric in the two endpoints so that packets
/// travelling in either direction land on the same flow table slot. The
/// observed src/dst order is still carried so the flow can report which side
/// initiated; only `src`/`dst` accessors see it, comparisons do not.
#[derive(Debug, Clone, Copy, Eq)]
pub struct FlowKey {
    pub src: Endpoint,
    pub dst: Endpoint,
}

impl FlowKey {
    pub fn new(src: Endpoint, dst: Endpoint) -> Self {
        FlowKey { src, dst }
    }

    /// The same flow, viewed from the opposite direction.
    pub fn reverse(&self) -> Self {
        FlowKey {
            src: self.dst,
            dst: self.src,
        }
    }
}

impl PartialEq for FlowKey {
    fn eq(&self, other: &Self) -> bool {
        (self.src == other.src && self.dst == other.dst)
            || (self.src == other.dst && self.dst == other.src)
    }
}

impl Hash for FlowKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Hash each endpoint on its own and combine with XOR. XOR commutes,
        // so the reversed key hashes identically, matching the symmetric Eq.
        state.write_u64(endpoint_hash(&self.src) ^ endpoint_hash(&self.dst));
    }
}

fn endpoint_hash(ep: &Endpoint) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    ep.hash(&mut hasher);
    hasher.finish()
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.src, self.dst)
    }
}

/// Direction of a payload relative to the flow initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToServer => write!(f, "C->S"),
            Direction::ServerToClient => write!(f, "S->C"),
        }
    }
}

/// Decoded TCP flag surface. Only SYN, ACK, FIN and RST drive the state
/// machine; PSH and URG are carried for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub psh: bool,
    pub urg: bool,
}

impl TcpFlags {
    /// An opening segment: SYN set, ACK clear. Only these create flows.
    pub fn is_opening(&self) -> bool {
        self.syn && !self.ack
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut any = false;
        for (set, c) in [
            (self.syn, 'S'),
            (self.ack, 'A'),
            (self.fin, 'F'),
            (self.rst, 'R'),
            (self.psh, 'P'),
            (self.urg, 'U'),
        ] {
            if set {
                write!(f, "{c}")?;
                any = true;
            }
        }
        if !any {
            write!(f, "-")?;
        }
        Ok(())
    }
}
