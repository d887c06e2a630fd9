use crate::node::{NodeId, NodeInfo, ID_BITS};

/// One k-bucket, covering every id that shares the first `prefix_len`
/// bits of `prefix`.
///
/// Invariant: all bits of `prefix` at positions `prefix_len..` are zero,
/// and every entry's id falls inside the bucket's range.
#[derive(Debug)]
pub(super) struct Bucket {
    pub(super) prefix: NodeId,
    pub(super) prefix_len: usize,
    pub(super) entries: Vec<NodeInfo>,
}

impl Bucket {
    /// The root bucket spanning the whole keyspace.
    pub(super) fn root() -> Self {
        Self {
            prefix: NodeId([0u8; 20]),
            prefix_len: 0,
            entries: Vec::new(),
        }
    }

    pub(super) fn covers(&self, id: &NodeId) -> bool {
        id.shares_prefix(&self.prefix, self.prefix_len)
    }

    pub(super) fn can_split(&self) -> bool {
        self.prefix_len < ID_BITS
    }

    pub(super) fn get_mut(&mut self, id: &NodeId) -> Option<&mut NodeInfo> {
        self.entries.iter_mut().find(|e| &e.id == id)
    }

    pub(super) fn remove(&mut self, id: &NodeId) -> Option<NodeInfo> {
        let pos = self.entries.iter().position(|e| &e.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// Splits on bit `prefix_len`, redistributing entries to the two halves.
    pub(super) fn split(self) -> (Bucket, Bucket) {
        let bit = self.prefix_len;
        let mut zero = Bucket {
            prefix: self.prefix,
            prefix_len: bit + 1,
            entries: Vec::new(),
        };
        let mut one = Bucket {
            prefix: self.prefix.with_bit(bit, true),
            prefix_len: bit + 1,
            entries: Vec::new(),
        };

        for entry in self.entries {
            if entry.id.bit(bit) {
                one.entries.push(entry);
            } else {
                zero.entries.push(entry);
            }
        }

        (zero, one)
    }

    /// The least recently seen entry that has failures against it, if any.
    /// Entries with a clean record are never eviction candidates.
    pub(super) fn eviction_candidate(&self) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.fail_count > 0)
            .min_by_key(|(_, e)| e.last_seen)
            .map(|(i, _)| i)
    }
}
