use super::bucket::Bucket;
use crate::config::DhtConfig;
use crate::node::{Distance, NodeId, NodeInfo};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// How a remote node behaved in one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// A well-formed response arrived.
    Success,
    /// No response inside the RPC deadline.
    Timeout,
    /// The node answered with garbage or a KRPC error.
    ProtocolError,
}

struct Quarantined {
    node: NodeInfo,
    held_since: Instant,
}

struct TableInner {
    /// Buckets ordered by prefix; together they partition the keyspace.
    buckets: Vec<Bucket>,
    /// Node id to the position of its bucket, for O(1) membership checks.
    index: HashMap<NodeId, usize>,
    /// Candidates waiting for room in a full bucket.
    quarantine: HashMap<NodeId, Quarantined>,
}

/// The node's view of the overlay.
///
/// All methods take `&self`; the table carries its own lock and is shared
/// via `Arc` between the lookup engine, the responder, and the maintenance
/// timers.
pub struct RoutingTable {
    our_id: NodeId,
    k: usize,
    max_buckets: usize,
    node_timeout: Duration,
    quarantine_timeout: Duration,
    failcount_threshold: u32,
    inner: RwLock<TableInner>,
}

impl RoutingTable {
    pub fn new(our_id: NodeId, config: &DhtConfig) -> Self {
        Self {
            our_id,
            k: config.k,
            max_buckets: config.max_buckets,
            node_timeout: config.node_timeout,
            quarantine_timeout: config.quarantine_timeout,
            failcount_threshold: config.failcount_threshold,
            inner: RwLock::new(TableInner {
                buckets: vec![Bucket::root()],
                index: HashMap::new(),
                quarantine: HashMap::new(),
            }),
        }
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    /// Feeds one observation about a remote node into the table.
    ///
    /// A success inserts the node or refreshes its entry. A failure is
    /// charged against an existing entry and removes it once it reaches
    /// the failure threshold; failures of unknown nodes are ignored.
    /// The node's own id is never stored.
    pub fn observe(&self, node: NodeInfo, outcome: QueryOutcome) {
        if node.id == self.our_id {
            return;
        }

        let mut inner = self.inner.write();
        match outcome {
            QueryOutcome::Success => self.admit(&mut inner, node),
            QueryOutcome::Timeout | QueryOutcome::ProtocolError => {
                self.penalize(&mut inner, &node.id)
            }
        }
    }

    fn admit(&self, inner: &mut TableInner, mut node: NodeInfo) {
        if let Some(&pos) = inner.index.get(&node.id) {
            if let Some(entry) = inner.buckets[pos].get_mut(&node.id) {
                entry.record_success();
                // the freshest contact point wins
                entry.addr = node.addr;
            }
            return;
        }

        node.record_success();
        let held_since = inner
            .quarantine
            .remove(&node.id)
            .map(|held| held.held_since)
            .unwrap_or_else(Instant::now);
        self.insert(inner, node, held_since);
    }

    /// Places a node into its bucket, splitting or evicting as the policy
    /// allows. Returns false when the node went to quarantine instead.
    fn insert(&self, inner: &mut TableInner, node: NodeInfo, held_since: Instant) -> bool {
        loop {
            let TableInner {
                buckets,
                index,
                quarantine,
            } = &mut *inner;

            let pos = bucket_position(buckets, &node.id);
            let bucket_total = buckets.len();
            let bucket = &mut buckets[pos];

            if bucket.entries.len() < self.k {
                let id = node.id;
                bucket.entries.push(node);
                index.insert(id, pos);
                return true;
            }

            // a full bucket only splits while our own id is inside its range
            if bucket.covers(&self.our_id) && bucket.can_split() && bucket_total < self.max_buckets
            {
                debug!("splitting bucket at depth {}", bucket.prefix_len);
                let parent = buckets.remove(pos);
                let (zero, one) = parent.split();
                buckets.insert(pos, one);
                buckets.insert(pos, zero);

                index.clear();
                for (i, b) in buckets.iter().enumerate() {
                    for entry in &b.entries {
                        index.insert(entry.id, i);
                    }
                }
                continue;
            }

            if let Some(evict) = bucket.eviction_candidate() {
                let evicted = bucket.entries.remove(evict);
                debug!("evicting failing node {} for {}", evicted.id, node.id);
                index.remove(&evicted.id);
                let id = node.id;
                bucket.entries.push(node);
                index.insert(id, pos);
                return true;
            }

            // every incumbent has a clean record; the newcomer waits
            quarantine.insert(node.id, Quarantined { node, held_since });
            return false;
        }
    }

    fn penalize(&self, inner: &mut TableInner, id: &NodeId) {
        let TableInner {
            buckets,
            index,
            quarantine,
        } = inner;

        // a failing candidate loses its place in line
        if quarantine.remove(id).is_some() {
            return;
        }

        let Some(&pos) = index.get(id) else { return };
        let bucket = &mut buckets[pos];
        let Some(entry) = bucket.get_mut(id) else { return };

        entry.record_failure();
        if entry.fail_count >= self.failcount_threshold {
            debug!("dropping node {} after {} failures", id, entry.fail_count);
            bucket.remove(id);
            index.remove(id);
            Self::graduate_into(bucket, pos, index, quarantine, self.k);
        }
    }

    /// Moves waiting candidates into `bucket` while it has room, oldest
    /// admission first.
    fn graduate_into(
        bucket: &mut Bucket,
        pos: usize,
        index: &mut HashMap<NodeId, usize>,
        quarantine: &mut HashMap<NodeId, Quarantined>,
        k: usize,
    ) {
        while bucket.entries.len() < k {
            let candidate = quarantine
                .iter()
                .filter(|(_, held)| bucket.covers(&held.node.id))
                .min_by_key(|(_, held)| held.held_since)
                .map(|(id, _)| *id);

            let Some(id) = candidate else { return };
            if let Some(held) = quarantine.remove(&id) {
                debug!("graduating {} from quarantine", id);
                index.insert(id, pos);
                bucket.entries.push(held.node);
            }
        }
    }

    /// Drops entries idle past the node timeout and quarantined candidates
    /// older than the quarantine timeout, then fills any opened room from
    /// quarantine. Runs on the maintenance tick.
    pub fn sweep(&self, now: Instant) {
        let mut inner = self.inner.write();
        let TableInner {
            buckets,
            index,
            quarantine,
        } = &mut *inner;

        for bucket in buckets.iter_mut() {
            bucket.entries.retain(|entry| {
                let stale = now.duration_since(entry.last_seen) > self.node_timeout;
                if stale {
                    debug!("sweeping out stale node {}", entry.id);
                    index.remove(&entry.id);
                }
                !stale
            });
        }

        quarantine
            .retain(|_, held| now.duration_since(held.held_since) <= self.quarantine_timeout);

        for (pos, bucket) in buckets.iter_mut().enumerate() {
            Self::graduate_into(bucket, pos, index, quarantine, self.k);
        }
    }

    /// Up to `width` known nodes, closest to `target` first.
    ///
    /// `width` routinely exceeds the bucket size; results are drawn from
    /// as many buckets as it takes.
    pub fn find_closest(&self, target: &NodeId, width: usize) -> Vec<NodeInfo> {
        let inner = self.inner.read();

        let mut candidates: Vec<(NodeInfo, Distance)> = inner
            .buckets
            .iter()
            .flat_map(|bucket| bucket.entries.iter())
            .map(|entry| (entry.clone(), entry.id.distance(target)))
            .collect();

        candidates.sort_by(|a, b| a.1.cmp(&b.1));
        candidates.truncate(width);
        candidates.into_iter().map(|(entry, _)| entry).collect()
    }

    pub fn get(&self, id: &NodeId) -> Option<NodeInfo> {
        let inner = self.inner.read();
        let &pos = inner.index.get(id)?;
        inner.buckets[pos]
            .entries
            .iter()
            .find(|entry| &entry.id == id)
            .cloned()
    }

    pub fn node_count(&self) -> usize {
        self.inner
            .read()
            .buckets
            .iter()
            .map(|bucket| bucket.entries.len())
            .sum()
    }

    pub fn bucket_count(&self) -> usize {
        self.inner.read().buckets.len()
    }

    pub fn quarantine_count(&self) -> usize {
        self.inner.read().quarantine.len()
    }
}

/// Buckets are ordered by prefix, so the covering bucket is the last one
/// whose prefix is not past the id.
fn bucket_position(buckets: &[Bucket], id: &NodeId) -> usize {
    buckets.partition_point(|b| b.prefix <= *id).saturating_sub(1)
}
