use rand::Rng as _;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Width of the DHT identifier space in bits.
pub const ID_BITS: usize = 160;

/// A 160-bit identifier in the DHT keyspace.
///
/// Node identifiers and torrent info-hashes share this space; closeness
/// between any two identifiers is the XOR metric ([`NodeId::distance`]).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub [u8; 20]);

/// A torrent info-hash. Lives in the same 160-bit space as node ids, so
/// lookups can target either interchangeably.
pub type InfoHash = NodeId;

impl NodeId {
    pub fn random() -> Self {
        let mut id = [0u8; 20];
        rand::rng().fill(&mut id);
        Self(id)
    }

    /// Parses a 20-byte slice into an id. Returns `None` for any other length.
    pub fn try_from_bytes(bytes: &[u8]) -> Option<Self> {
        let id: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// XOR distance to `other`, comparable as a 160-bit unsigned integer.
    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut xor = [0u8; 20];
        for (i, byte) in xor.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance(xor)
    }

    /// The `i`-th bit counting from the most significant end.
    pub fn bit(&self, i: usize) -> bool {
        debug_assert!(i < ID_BITS);
        self.0[i / 8] & (0x80 >> (i % 8)) != 0
    }

    /// Returns a copy with bit `i` set to `value`.
    pub fn with_bit(mut self, i: usize, value: bool) -> Self {
        debug_assert!(i < ID_BITS);
        let mask = 0x80 >> (i % 8);
        if value {
            self.0[i / 8] |= mask;
        } else {
            self.0[i / 8] &= !mask;
        }
        self
    }

    /// True when the first `bits` bits of `self` and `other` agree.
    pub fn shares_prefix(&self, other: &NodeId, bits: usize) -> bool {
        debug_assert!(bits <= ID_BITS);
        let full = bits / 8;
        if self.0[..full] != other.0[..full] {
            return false;
        }
        let rem = bits % 8;
        if rem == 0 {
            return true;
        }
        let mask = 0xffu8 << (8 - rem);
        (self.0[full] ^ other.0[full]) & mask == 0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NodeId({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// XOR distance between two identifiers.
///
/// Ordering treats the 20 bytes as a big-endian unsigned integer, so
/// `a < b` means "a is closer".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance(pub [u8; 20]);

impl Distance {
    pub const ZERO: Distance = Distance([0u8; 20]);
    pub const MAX: Distance = Distance([0xff; 20]);

    /// Number of leading zero bits, 160 for the zero distance.
    pub fn leading_zeros(&self) -> u32 {
        let mut zeros = 0;
        for byte in &self.0 {
            if *byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        zeros
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// A known contact: identifier, address, and liveness accounting.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub last_seen: Instant,
    pub success_count: u32,
    pub fail_count: u32,
}

impl NodeInfo {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            success_count: 0,
            fail_count: 0,
        }
    }

    /// A successful exchange clears accumulated failures.
    pub fn record_success(&mut self) {
        self.last_seen = Instant::now();
        self.success_count = self.success_count.saturating_add(1);
        self.fail_count = 0;
    }

    pub fn record_failure(&mut self) {
        self.fail_count = self.fail_count.saturating_add(1);
    }

    pub fn is_stale(&self, max_idle: Duration) -> bool {
        self.last_seen.elapsed() > max_idle
    }
}
