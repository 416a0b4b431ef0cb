//! Increment-only telemetry of the consensus core.
//!
//! Nothing in the core reads these values back.

use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

/// Counters and gauges shared by the components of a node.
///
/// Cloning is cheap and every clone updates the same underlying metrics.
#[derive(Clone, Debug, Default)]
pub struct SystemCounters {
    pub signatures_signed: Counter,
    pub signatures_verified: Counter,
    pub bft_proposals_made: Counter,
    pub bft_processed: Counter,
    pub bft_rejected: Counter,
    pub bft_vote_quorums: Counter,
    pub bft_timeout_quorums: Counter,
    pub bft_timed_out_views: Counter,
    pub bft_indirect_parent: Counter,
    pub bft_committed_vertices: Counter,
    pub bft_sync_requests_sent: Counter,
    pub bft_vertex_store_size: Gauge,
    pub ledger_processed: Counter,
    pub ledger_state_version: Gauge,
}

impl SystemCounters {
    /// Create counters and register them with `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let counters = Self::default();
        registry.register(
            "signatures_signed",
            "number of signatures created",
            counters.signatures_signed.clone(),
        );
        registry.register(
            "signatures_verified",
            "number of signatures verified",
            counters.signatures_verified.clone(),
        );
        registry.register(
            "bft_proposals_made",
            "number of proposals broadcast by this node",
            counters.bft_proposals_made.clone(),
        );
        registry.register(
            "bft_processed",
            "number of proposals processed",
            counters.bft_processed.clone(),
        );
        registry.register(
            "bft_rejected",
            "number of proposals rejected by safety rules",
            counters.bft_rejected.clone(),
        );
        registry.register(
            "bft_vote_quorums",
            "number of QCs formed from votes",
            counters.bft_vote_quorums.clone(),
        );
        registry.register(
            "bft_timeout_quorums",
            "number of views entered from view timeouts",
            counters.bft_timeout_quorums.clone(),
        );
        registry.register(
            "bft_timed_out_views",
            "number of local view timeouts processed",
            counters.bft_timed_out_views.clone(),
        );
        registry.register(
            "bft_indirect_parent",
            "number of votes for vertices without a direct parent",
            counters.bft_indirect_parent.clone(),
        );
        registry.register(
            "bft_committed_vertices",
            "number of vertices committed",
            counters.bft_committed_vertices.clone(),
        );
        registry.register(
            "bft_sync_requests_sent",
            "number of vertex requests sent to peers",
            counters.bft_sync_requests_sent.clone(),
        );
        registry.register(
            "bft_vertex_store_size",
            "number of uncommitted vertices in the store",
            counters.bft_vertex_store_size.clone(),
        );
        registry.register(
            "ledger_processed",
            "number of commit requests processed by the ledger",
            counters.ledger_processed.clone(),
        );
        registry.register(
            "ledger_state_version",
            "state version of the committed ledger",
            counters.ledger_state_version.clone(),
        );
        counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn clones_update_registered_metrics() {
        let mut registry = Registry::default();
        let counters = SystemCounters::new(&mut registry);
        let clone = counters.clone();
        clone.signatures_signed.inc();
        clone.signatures_signed.inc();
        clone.ledger_state_version.set(7);
        assert_eq!(counters.signatures_signed.get(), 2);

        let mut buffer = String::new();
        encode(&mut buffer, &registry).expect("encoding failed");
        assert!(buffer.contains("signatures_signed_total 2"));
        assert!(buffer.contains("ledger_state_version 7"));
        assert!(buffer.contains("bft_proposals_made_total 0"));
    }
}
