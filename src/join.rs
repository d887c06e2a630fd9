//! Joining the overlay and staying in it.
//!
//! A fresh node knows nobody. The controller resolves the well-known
//! bootstrap hosts, pings whatever they resolve to, and walks a lookup
//! toward its own identifier so its neighborhood learns it exists. After
//! that it re-runs the self lookup on a timer, ping-verifying whatever
//! the walk turns up. A node that runs out of retries is abandoned
//! rather than left retrying forever.

use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::DhtConfig;
use crate::lookup::{IterationError, IterativeLookup};
use crate::routing::{QueryOutcome, RoutingTable};
use crate::rpc::{Resolver, RpcGateway};

/// Where the controller is in the life of the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Created,
    ResolvingSeeds,
    Joined,
    SelfLookup,
    SteadyState,
    Abandoned,
}

/// Terminal join failures. Either one abandons the node; the process
/// hosting it is unaffected.
#[derive(Debug, Error)]
pub enum JoinError {
    /// No bootstrap attempt reached a single node.
    #[error("bootstrap failed after {attempts} attempts")]
    BootstrapFailed { attempts: u32 },

    /// The initial self lookup never completed.
    #[error("self lookup failed after {attempts} attempts")]
    SelfLookupFailed {
        attempts: u32,
        #[source]
        source: IterationError,
    },
}

pub struct JoinController<G: ?Sized, R: ?Sized> {
    gateway: Arc<G>,
    resolver: Arc<R>,
    table: Arc<RoutingTable>,
    config: DhtConfig,
    state: Mutex<JoinState>,
}

impl<G, R> JoinController<G, R>
where
    G: RpcGateway + ?Sized,
    R: Resolver + ?Sized,
{
    pub fn new(
        gateway: Arc<G>,
        resolver: Arc<R>,
        table: Arc<RoutingTable>,
        config: DhtConfig,
    ) -> Self {
        Self {
            gateway,
            resolver,
            table,
            config,
            state: Mutex::new(JoinState::Created),
        }
    }

    pub fn state(&self) -> JoinState {
        *self.state.lock()
    }

    fn set_state(&self, next: JoinState) {
        *self.state.lock() = next;
        debug!("join state is now {:?}", next);
    }

    /// Takes the node from created to participating: reach the bootstrap
    /// seeds, then walk a lookup toward our own identifier.
    pub async fn join(&self) -> Result<(), JoinError> {
        self.bootstrap().await?;
        self.find_self().await?;
        self.set_state(JoinState::SteadyState);
        Ok(())
    }

    /// Runs the controller for the life of the node: join, then the
    /// periodic presence broadcast. Returns only when the node is
    /// abandoned.
    pub async fn run(&self) -> Result<(), JoinError> {
        self.join().await?;
        let mut tick = interval(self.config.refresh_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tick.tick().await;
        loop {
            tick.tick().await;
            self.refresh().await?;
        }
    }

    async fn bootstrap(&self) -> Result<(), JoinError> {
        for attempt in 1..=self.config.startup_retries {
            self.set_state(JoinState::ResolvingSeeds);
            let reached = self.bootstrap_once().await;
            if reached > 0 {
                info!("joined the overlay via {} seeds on attempt {}", reached, attempt);
                self.set_state(JoinState::Joined);
                return Ok(());
            }
            warn!(
                "bootstrap attempt {} of {} reached nobody",
                attempt, self.config.startup_retries
            );
            if attempt < self.config.startup_retries {
                sleep(self.config.bootstrap_retry_delay).await;
            }
        }
        self.set_state(JoinState::Abandoned);
        Err(JoinError::BootstrapFailed {
            attempts: self.config.startup_retries,
        })
    }

    /// One pass over the configured seeds. Returns how many answered.
    async fn bootstrap_once(&self) -> usize {
        let resolver = &self.resolver;
        let resolutions = join_all(self.config.bootstrap_addresses.iter().map(
            |(host, port)| async move { (host, resolver.resolve(host, *port).await) },
        ))
        .await;

        let mut targets = Vec::new();
        for (host, resolution) in resolutions {
            match resolution {
                Ok(addrs) => match addrs.into_iter().next() {
                    Some(addr) => targets.push(addr),
                    None => debug!("seed {} resolved to nothing", host),
                },
                Err(err) => warn!("failed to resolve seed {}: {}", host, err),
            }
        }

        let pings = join_all(targets.iter().map(|addr| self.gateway.ping(*addr))).await;
        let mut reached = 0;
        for (addr, outcome) in targets.into_iter().zip(pings) {
            match outcome {
                Ok(node) => {
                    self.table.observe(node, QueryOutcome::Success);
                    reached += 1;
                }
                Err(err) => debug!("seed {} did not answer: {}", addr, err),
            }
        }
        reached
    }

    /// Walks toward our own identifier until the walk converges, retrying
    /// with a fresh seed set from the table on each failure.
    async fn find_self(&self) -> Result<(), JoinError> {
        self.set_state(JoinState::SelfLookup);
        let lookup = self.lookup();
        let our_id = *self.table.our_id();

        let mut last = None;
        for attempt in 1..=self.config.find_self_retries {
            match lookup.find_node(our_id, Vec::new()).await {
                Ok(neighbors) => {
                    debug!(
                        "self lookup settled with {} neighbors on attempt {}",
                        neighbors.len(),
                        attempt
                    );
                    return Ok(());
                }
                Err(err) => {
                    warn!("self lookup attempt {} failed: {}", attempt, err);
                    last = Some(err);
                }
            }
        }
        self.set_state(JoinState::Abandoned);
        Err(JoinError::SelfLookupFailed {
            attempts: self.config.find_self_retries,
            source: last.unwrap_or(IterationError::NoSeeds),
        })
    }

    /// One steady-state cycle: re-walk our neighborhood and ping-verify
    /// whoever it turned up. A table that has emptied forces a full
    /// rejoin; a failed rejoin abandons the node.
    pub async fn refresh(&self) -> Result<(), JoinError> {
        if self.table.node_count() == 0 {
            warn!("routing table emptied, rejoining");
            return self.join().await;
        }

        let our_id = *self.table.our_id();
        match self.lookup().find_node(our_id, Vec::new()).await {
            Ok(discovered) => {
                let pings =
                    join_all(discovered.iter().map(|node| self.gateway.ping(node.addr))).await;
                for (node, outcome) in discovered.into_iter().zip(pings) {
                    match outcome {
                        Ok(verified) => self.table.observe(verified, QueryOutcome::Success),
                        Err(err) => {
                            if let Some(charge) = err.outcome() {
                                self.table.observe(node, charge);
                            }
                        }
                    }
                }
            }
            // transient; the next tick tries again
            Err(err) => debug!("presence broadcast failed: {}", err),
        }
        Ok(())
    }

    fn lookup(&self) -> IterativeLookup<G> {
        IterativeLookup::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.table),
            &self.config,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{contact, id_with, StaticResolver, StubGateway};

    fn config() -> DhtConfig {
        DhtConfig {
            bootstrap_addresses: vec![("seed.example".to_string(), 6881)],
            ..DhtConfig::default()
        }
    }

    fn table() -> Arc<RoutingTable> {
        Arc::new(RoutingTable::new(id_with(0xf0), &DhtConfig::default()))
    }

    fn controller(
        gateway: &Arc<StubGateway>,
        resolver: StaticResolver,
        table: &Arc<RoutingTable>,
        config: DhtConfig,
    ) -> JoinController<StubGateway, StaticResolver> {
        JoinController::new(
            Arc::clone(gateway),
            Arc::new(resolver),
            Arc::clone(table),
            config,
        )
    }

    #[tokio::test]
    async fn test_join_happy_path() {
        let gateway = Arc::new(StubGateway::default());
        let seed = contact(0x40, 8000);
        gateway.alive(&seed);
        let resolver = StaticResolver::new().with_host("seed.example", vec![seed.addr]);
        let table = table();

        let controller = controller(&gateway, resolver, &table, config());
        assert_eq!(controller.state(), JoinState::Created);

        controller.join().await.unwrap();

        assert_eq!(controller.state(), JoinState::SteadyState);
        assert!(table.get(&seed.id).is_some());
        assert_eq!(gateway.calls(seed.addr, "ping"), 1);
        assert_eq!(gateway.calls(seed.addr, "find_node"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_exhausts_retries_and_abandons() {
        let gateway = Arc::new(StubGateway::default());
        let table = table();
        let controller = controller(
            &gateway,
            StaticResolver::new(),
            &table,
            DhtConfig {
                startup_retries: 2,
                ..config()
            },
        );

        match controller.join().await {
            Err(JoinError::BootstrapFailed { attempts }) => assert_eq!(attempts, 2),
            other => panic!("expected bootstrap failure, got {:?}", other),
        }
        assert_eq!(controller.state(), JoinState::Abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_retries_after_resolver_recovers() {
        let gateway = Arc::new(StubGateway::default());
        let seed = contact(0x40, 8010);
        gateway.alive(&seed);
        let resolver = StaticResolver::new()
            .with_host("seed.example", vec![seed.addr])
            .failing_first(1);
        let table = table();

        let controller = controller(&gateway, resolver, &table, config());
        controller.join().await.unwrap();

        assert_eq!(controller.state(), JoinState::SteadyState);
        assert_eq!(gateway.calls(seed.addr, "ping"), 1);
    }

    #[tokio::test]
    async fn test_self_lookup_exhaustion_abandons() {
        let gateway = Arc::new(StubGateway::default());
        // answers the bootstrap ping, then drops every lookup query
        let seed = contact(0x40, 8020);
        gateway.alive(&seed);
        gateway.mute_queries(&seed);
        let resolver = StaticResolver::new().with_host("seed.example", vec![seed.addr]);
        let table = table();

        let controller = controller(
            &gateway,
            resolver,
            &table,
            DhtConfig {
                find_self_retries: 2,
                ..config()
            },
        );

        match controller.join().await {
            Err(JoinError::SelfLookupFailed { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected self lookup failure, got {:?}", other),
        }
        assert_eq!(controller.state(), JoinState::Abandoned);
        assert_eq!(gateway.calls(seed.addr, "find_node"), 2);
    }

    #[tokio::test]
    async fn test_refresh_rejoins_when_table_empty() {
        let gateway = Arc::new(StubGateway::default());
        let seed = contact(0x40, 8030);
        gateway.alive(&seed);
        let resolver = StaticResolver::new().with_host("seed.example", vec![seed.addr]);
        let table = table();

        let controller = controller(&gateway, resolver, &table, config());
        controller.refresh().await.unwrap();

        assert_eq!(controller.state(), JoinState::SteadyState);
        assert!(table.get(&seed.id).is_some());
    }

    #[tokio::test]
    async fn test_refresh_ping_verifies_discovered_nodes() {
        let gateway = Arc::new(StubGateway::default());
        let seed = contact(0x40, 8040);
        let neighbor = contact(0x41, 8041);
        gateway.returns_nodes(&seed, vec![neighbor.clone()]);
        gateway.alive(&neighbor);
        let table = table();
        table.observe(seed.clone(), QueryOutcome::Success);

        let controller = controller(&gateway, StaticResolver::new(), &table, config());
        controller.refresh().await.unwrap();

        assert!(gateway.calls(neighbor.addr, "ping") >= 1);
        assert!(table.get(&neighbor.id).is_some());
    }
}
