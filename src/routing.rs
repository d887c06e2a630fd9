//! Kademlia routing table.
//!
//! Contacts are kept in k-buckets, each covering a contiguous prefix range
//! of the 160-bit keyspace. A full bucket splits while it still covers this
//! node's own id; elsewhere, full buckets hold on to proven entries and new
//! candidates wait in quarantine until an incumbent fails or goes stale.

mod bucket;
mod table;

pub use table::{QueryOutcome, RoutingTable};
