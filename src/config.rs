use std::time::Duration;

/// Runtime knobs for a DHT node.
///
/// The defaults are the values the protocol and the well-known routers were
/// tuned around; most deployments only override `dht_port` and, in tests,
/// the timeouts. The 160-bit id width is a property of the wire format, not
/// a knob.
#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// Bucket capacity.
    pub k: usize,
    /// Upper bound on how many buckets the table may split into.
    pub max_buckets: usize,
    /// Deadline for one outbound RPC.
    pub rpc_timeout: Duration,
    /// Deadline for a whole user-facing lookup.
    pub query_timeout: Duration,
    /// How long a candidate may wait for bucket room before being dropped.
    pub quarantine_timeout: Duration,
    /// Lifetime of a stored peer announcement.
    pub peer_timeout: Duration,
    /// Idle time after which a routing entry is swept out.
    pub node_timeout: Duration,
    /// Cadence of the maintenance tick (table sweep, peer store purge).
    pub nice_interval: Duration,
    /// Failures charged to an entry before it is dropped.
    pub failcount_threshold: u32,
    /// Fan-out of one lookup round.
    pub search_width: usize,
    /// Rounds without distance improvement before a lookup settles.
    pub search_retries: u32,
    /// Bootstrap attempts before the node gives up joining.
    pub startup_retries: u32,
    /// Attempts at the initial self lookup before the node is abandoned.
    pub find_self_retries: u32,
    /// Pause between bootstrap attempts.
    pub bootstrap_retry_delay: Duration,
    /// Cadence of the steady-state presence broadcast.
    pub refresh_interval: Duration,
    /// Well-known entry points, resolved at join time.
    pub bootstrap_addresses: Vec<(String, u16)>,
    /// UDP port to bind; 0 lets the OS pick.
    pub dht_port: u16,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            k: 8,
            max_buckets: 160,
            rpc_timeout: Duration::from_secs(60),
            query_timeout: Duration::from_secs(60),
            quarantine_timeout: Duration::from_secs(180),
            peer_timeout: Duration::from_secs(12 * 60 * 60),
            node_timeout: Duration::from_secs(15 * 60),
            nice_interval: Duration::from_secs(6),
            failcount_threshold: 3,
            search_width: 32,
            search_retries: 4,
            startup_retries: 3,
            find_self_retries: 3,
            bootstrap_retry_delay: Duration::from_secs(1),
            refresh_interval: Duration::from_secs(15 * 60),
            bootstrap_addresses: vec![
                ("router.bittorrent.com".to_string(), 6881),
                ("dht.transmissionbt.com".to_string(), 6881),
                ("router.utorrent.com".to_string(), 6881),
            ],
            dht_port: 6900,
        }
    }
}
