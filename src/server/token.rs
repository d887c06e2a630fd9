use std::net::SocketAddr;

use bytes::Bytes;
use sha1::{Digest, Sha1};

/// Issues and checks announce tokens: the first 8 bytes of the sha1 of a
/// rotating secret and the querier's ip. Tokens minted under the previous
/// secret stay good, so one rotation period bounds a token's life.
pub(super) struct TokenKeeper {
    current: [u8; 16],
    previous: [u8; 16],
}

impl TokenKeeper {
    pub(super) fn new() -> Self {
        Self {
            current: rand::random(),
            previous: rand::random(),
        }
    }

    pub(super) fn rotate(&mut self) {
        self.previous = self.current;
        self.current = rand::random();
    }

    pub(super) fn issue(&self, addr: &SocketAddr) -> Bytes {
        derive(&self.current, addr)
    }

    pub(super) fn check(&self, addr: &SocketAddr, token: &[u8]) -> bool {
        derive(&self.current, addr).as_ref() == token
            || derive(&self.previous, addr).as_ref() == token
    }
}

fn derive(secret: &[u8; 16], addr: &SocketAddr) -> Bytes {
    let mut hasher = Sha1::new();
    hasher.update(secret);
    hasher.update(addr.ip().to_string().as_bytes());
    let digest = hasher.finalize();
    Bytes::copy_from_slice(&digest[..8])
}
