//! Dynamic link resolution.
//!
//! A demultiplexer cannot declare its output ports up front: they exist only
//! after it has parsed the container header, one per elementary stream. The
//! graph therefore records a [`PendingLink`] ("whatever `qtdemux` produces,
//! feed it to `h264parse.sink`") and the [`PortResolver`] completes it when
//! the producing stage announces a port from its own processing thread.
//!
//! The pending table and the linked-input check sit behind one mutex:
//! two producer threads racing to claim the same consumer port serialize
//! there, the first writer wins, and every later announcement is dropped
//! silently — a container exposing several streams while only one is
//! consumed is expected behavior, not a fault.

use crate::caps::Caps;
use crate::stage::DiscoveredPort;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// A link awaiting a runtime-discovered producer port.
#[derive(Debug, Clone)]
pub struct PendingLink {
    /// Producing stage (owner of the dynamic output).
    pub producer: String,
    /// Consuming stage.
    pub consumer: String,
    /// Input port on the consuming stage.
    pub consumer_port: String,
    /// Caps the consumer input accepts.
    pub consumer_caps: Caps,
}

/// A link completed by the resolver.
#[derive(Debug, Clone)]
pub struct ResolvedLink {
    /// Producing stage.
    pub producer: String,
    /// The announced output port that was linked.
    pub producer_port: String,
    /// Consuming stage.
    pub consumer: String,
    /// Input port on the consuming stage.
    pub consumer_port: String,
    /// Negotiated caps (intersection of both ends).
    pub caps: Caps,
}

/// What became of a discovery announcement.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    /// The announced port was linked; the producer should complete its side
    /// of the wiring towards `consumer.consumer_port`.
    Linked {
        /// Consuming stage.
        consumer: String,
        /// Input port on the consuming stage.
        consumer_port: String,
    },
    /// The target input port is already linked (an earlier stream won).
    AlreadyLinked,
    /// No pending link is registered for this producer.
    NoPending,
    /// The announced caps do not intersect the consumer's; the link was not
    /// made and the pending entry stays, in case a later stream matches.
    Incompatible,
}

#[derive(Debug, Default)]
struct LinkTable {
    /// Pending links keyed by producer identity; one per producer.
    pending: HashMap<String, PendingLink>,
    /// Input ports that already have a link, `(stage, port)`.
    linked_inputs: HashSet<(String, String)>,
    /// Links the resolver completed this run.
    resolved: Vec<ResolvedLink>,
}

/// Shared handle over the pending-link table.
///
/// The graph holds one to register pending links and mark statically linked
/// inputs; clones go into the discovery callbacks installed on producing
/// stages. All lookups are non-owning: the table carries names, never stage
/// objects.
#[derive(Clone, Default)]
pub struct PortResolver {
    table: Arc<Mutex<LinkTable>>,
}

impl PortResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending link for a producer with a dynamic output.
    pub fn register_pending(&self, pending: PendingLink) {
        let mut table = self.table.lock().unwrap();
        table.pending.insert(pending.producer.clone(), pending);
    }

    /// Mark an input port as linked (used for static links so dynamic
    /// resolution can never double-claim it).
    pub fn mark_linked(&self, stage: &str, port: &str) {
        let mut table = self.table.lock().unwrap();
        table
            .linked_inputs
            .insert((stage.to_string(), port.to_string()));
    }

    /// Check whether an input port is already linked.
    pub fn is_linked(&self, stage: &str, port: &str) -> bool {
        let table = self.table.lock().unwrap();
        table
            .linked_inputs
            .contains(&(stage.to_string(), port.to_string()))
    }

    /// Handle a discovery announcement from a producing stage.
    ///
    /// Runs on the producer's thread; must not block on the control loop
    /// and never calls back into stage objects.
    pub fn on_port_discovered(&self, producer: &str, port: &DiscoveredPort) -> ResolveOutcome {
        let mut table = self.table.lock().unwrap();

        let Some(pending) = table.pending.get(producer) else {
            tracing::debug!("ignoring port '{}' from '{producer}': no pending link", port.name);
            return ResolveOutcome::NoPending;
        };

        let input = (pending.consumer.clone(), pending.consumer_port.clone());
        if table.linked_inputs.contains(&input) {
            // A second elementary stream; only one is consumed per run.
            tracing::debug!(
                "ignoring port '{}' from '{producer}': {}.{} already linked",
                port.name,
                input.0,
                input.1
            );
            return ResolveOutcome::AlreadyLinked;
        }

        let Some(caps) = port.caps.intersect(&pending.consumer_caps) else {
            // Non-fatal: the pipeline continues degraded and either stalls
            // or ends through the bus. The pending entry stays so a later
            // stream with matching caps can still complete the link.
            tracing::warn!(
                "port '{}' from '{producer}' does not match {}.{}: incompatible capabilities",
                port.name,
                input.0,
                input.1
            );
            return ResolveOutcome::Incompatible;
        };

        let pending = table.pending.remove(producer).unwrap();
        table.linked_inputs.insert(input);
        table.resolved.push(ResolvedLink {
            producer: pending.producer,
            producer_port: port.name.clone(),
            consumer: pending.consumer.clone(),
            consumer_port: pending.consumer_port.clone(),
            caps,
        });

        tracing::info!(
            "linked {producer}.{} -> {}.{}",
            port.name,
            pending.consumer,
            pending.consumer_port
        );
        ResolveOutcome::Linked {
            consumer: pending.consumer,
            consumer_port: pending.consumer_port,
        }
    }

    /// Wait out any in-flight discovery callback.
    ///
    /// Callbacks hold the table lock for their whole critical section, so
    /// acquiring it here proves none is running. Called during teardown
    /// before graph-level resources are released.
    pub fn quiesce(&self) {
        drop(self.table.lock().unwrap());
    }

    /// Number of unresolved pending links.
    pub fn pending_count(&self) -> usize {
        self.table.lock().unwrap().pending.len()
    }

    /// Links completed by the resolver this run.
    pub fn resolved_links(&self) -> Vec<ResolvedLink> {
        self.table.lock().unwrap().resolved.clone()
    }

    /// Number of links completed by the resolver this run.
    pub fn resolved_count(&self) -> usize {
        self.table.lock().unwrap().resolved.len()
    }

    /// Drop every pending entry and runtime link record.
    pub fn clear(&self) {
        let mut table = self.table.lock().unwrap();
        table.pending.clear();
        table.linked_inputs.clear();
        table.resolved.clear();
    }
}
