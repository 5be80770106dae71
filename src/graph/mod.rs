//! Pipeline graph: stages, links, and lifecycle control.
//!
//! The graph is the sole owner of every stage and link record. Construction
//! is all-or-nothing: a single failed instantiation or link releases every
//! stage created so far, so no partial pipeline ever lingers. Activation and
//! deactivation walk the lifecycle ladder rung by rung, and teardown releases
//! graph-level resources in strictly reverse order of acquisition.

mod lifecycle;

pub use lifecycle::LifecycleState;

use crate::bus::{BusReceiver, BusSender, ControlBus};
use crate::caps::Caps;
use crate::error::{Error, Result};
use crate::resolve::{PendingLink, PortResolver, ResolveOutcome, ResolvedLink};
use crate::stage::{
    DiscoveredPort, PortDirection, PortList, PortPresence, PortTemplate, PropertyMap,
    PropertyValue, StageImpl, StageRegistry, StageType,
};
use daggy::{Dag, NodeIndex};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Unique identifier for a stage in the graph.
///
/// Valid only for the graph that issued it, and only until a construction
/// failure releases the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageId(NodeIndex);

impl StageId {
    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0.index()
    }
}

/// A stage held by the graph.
pub struct StageNode {
    name: String,
    type_name: String,
    stage_type: StageType,
    config: PropertyMap,
    ports: PortList,
    templates: Vec<PortTemplate>,
    runtime: Arc<Mutex<Box<dyn StageImpl>>>,
}

impl StageNode {
    /// The stage's instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The registered type this stage was created from.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The stage's role tag.
    pub fn stage_type(&self) -> StageType {
        self.stage_type
    }

    /// The stage's configuration map.
    pub fn config(&self) -> &PropertyMap {
        &self.config
    }

    /// The stage's materialized (static) ports.
    pub fn ports(&self) -> &PortList {
        &self.ports
    }

    /// Whether the stage declares any dynamic output template.
    pub fn has_dynamic_output(&self) -> bool {
        self.templates.iter().any(|t| {
            t.presence == PortPresence::Dynamic && t.direction == PortDirection::Output
        })
    }

    /// Shared handle to the opaque stage implementation.
    pub fn runtime(&self) -> Arc<Mutex<Box<dyn StageImpl>>> {
        Arc::clone(&self.runtime)
    }
}

impl std::fmt::Debug for StageNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageNode")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("stage_type", &self.stage_type)
            .field("ports", &self.ports.len())
            .finish()
    }
}

/// A static link between two stages.
#[derive(Debug, Clone)]
pub struct LinkEdge {
    /// Output port on the producing stage.
    pub src_port: String,
    /// Input port on the consuming stage.
    pub dst_port: String,
    /// Negotiated caps (intersection of both ends).
    pub caps: Caps,
}

/// A directed media-processing pipeline.
pub struct PipelineGraph {
    name: String,
    registry: StageRegistry,
    graph: Dag<StageNode, LinkEdge>,
    stages_by_name: HashMap<String, StageId>,
    state: LifecycleState,
    resolver: PortResolver,
    bus: ControlBus,
}

impl PipelineGraph {
    /// Create an empty pipeline graph using the given registry.
    pub fn new(name: impl Into<String>, registry: StageRegistry) -> Self {
        Self {
            name: name.into(),
            registry,
            graph: Dag::new(),
            stages_by_name: HashMap::new(),
            state: LifecycleState::Null,
            resolver: PortResolver::new(),
            bus: ControlBus::new(),
        }
    }

    /// Create an empty pipeline graph with the built-in stage types.
    pub fn with_builtins(name: impl Into<String>) -> Self {
        Self::new(name, StageRegistry::with_builtins())
    }

    /// The pipeline's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state of the graph as a whole.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Number of stages currently owned by the graph.
    pub fn stage_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of static links.
    pub fn static_link_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Number of unresolved pending links.
    pub fn pending_link_count(&self) -> usize {
        self.resolver.pending_count()
    }

    /// Links completed by the dynamic-port resolver this run.
    pub fn resolved_links(&self) -> Vec<ResolvedLink> {
        self.resolver.resolved_links()
    }

    /// A sender for posting control events (including synthetic terminal
    /// events for early stop).
    pub fn bus_sender(&self) -> BusSender {
        self.bus.sender()
    }

    /// Look up a stage by instance name.
    pub fn stage_id(&self, name: &str) -> Option<StageId> {
        self.stages_by_name.get(name).copied()
    }

    /// Get a stage by id.
    pub fn stage(&self, id: StageId) -> Option<&StageNode> {
        self.graph.node_weight(id.0)
    }

    /// Instantiate a stage and add it to the graph.
    ///
    /// Every instantiation must happen before any link attempt. A failure
    /// releases every stage created so far: afterwards the graph holds zero
    /// stages.
    pub fn add_stage(
        &mut self,
        type_name: &str,
        instance_name: &str,
        config: PropertyMap,
    ) -> Result<StageId> {
        self.ensure_inactive()?;

        if self.stages_by_name.contains_key(instance_name) {
            let e = Error::Graph(format!("duplicate stage name '{instance_name}'"));
            self.release_all();
            return Err(e);
        }

        let runtime = match self.registry.create(type_name, instance_name, &config) {
            Ok(stage) => stage,
            Err(e) => {
                tracing::error!("could not create '{instance_name}' ({type_name}): {e}");
                self.release_all();
                return Err(e);
            }
        };

        let templates = runtime.port_templates();
        let ports = PortList::from_templates(&templates);

        let node = StageNode {
            name: instance_name.to_string(),
            type_name: type_name.to_string(),
            stage_type: runtime.stage_type(),
            config,
            ports,
            templates,
            runtime: Arc::new(Mutex::new(runtime)),
        };

        let id = StageId(self.graph.add_node(node));
        self.stages_by_name.insert(instance_name.to_string(), id);
        tracing::debug!("added stage '{instance_name}' ({type_name})");
        Ok(id)
    }

    /// Link two stages through their default "src" and "sink" ports.
    pub fn link(&mut self, src: StageId, dst: StageId) -> Result<()> {
        self.link_ports(src, "src", dst, "sink")
    }

    /// Link an output port to an input port.
    ///
    /// Both ports must be static and their caps must intersect; an input
    /// port links at most once. Any failure releases the whole graph.
    pub fn link_ports(
        &mut self,
        src: StageId,
        src_port: &str,
        dst: StageId,
        dst_port: &str,
    ) -> Result<()> {
        // Misuse on an active graph is rejected without touching it; only
        // genuine construction failures release the partial pipeline.
        self.ensure_inactive()?;
        if let Err(e) = self.try_link_ports(src, src_port, dst, dst_port) {
            self.release_all();
            return Err(e);
        }
        Ok(())
    }

    fn try_link_ports(
        &mut self,
        src: StageId,
        src_port: &str,
        dst: StageId,
        dst_port: &str,
    ) -> Result<()> {
        let src_node = self
            .graph
            .node_weight(src.0)
            .ok_or_else(|| Error::Graph("source stage not found".into()))?;
        let dst_node = self
            .graph
            .node_weight(dst.0)
            .ok_or_else(|| Error::Graph("destination stage not found".into()))?;

        let out = src_node
            .ports
            .get(src_port, PortDirection::Output)
            .ok_or_else(|| Error::PortNotFound {
                stage: src_node.name.clone(),
                port: src_port.to_string(),
                direction: PortDirection::Output.label(),
            })?;
        let inp = dst_node
            .ports
            .get(dst_port, PortDirection::Input)
            .ok_or_else(|| Error::PortNotFound {
                stage: dst_node.name.clone(),
                port: dst_port.to_string(),
                direction: PortDirection::Input.label(),
            })?;

        if self.resolver.is_linked(&dst_node.name, dst_port) {
            return Err(Error::AlreadyLinked {
                stage: dst_node.name.clone(),
                port: dst_port.to_string(),
            });
        }

        let caps = out
            .caps()
            .intersect(inp.caps())
            .ok_or_else(|| Error::IncompatibleCapability {
                src: src_node.name.clone(),
                src_port: src_port.to_string(),
                dst: dst_node.name.clone(),
                dst_port: dst_port.to_string(),
            })?;

        let dst_name = dst_node.name.clone();
        let edge = LinkEdge {
            src_port: src_port.to_string(),
            dst_port: dst_port.to_string(),
            caps,
        };

        self.graph
            .add_edge(src.0, dst.0, edge)
            .map_err(|_| Error::Graph("linking would create a cycle".into()))?;

        self.resolver.mark_linked(&dst_name, dst_port);
        Ok(())
    }

    /// Register a link whose producing port is only discovered at runtime.
    ///
    /// The producer must declare a dynamic output template; the consumer
    /// port must be a static, still-unlinked input. The link itself is
    /// completed later by the resolver, on the producer's own thread.
    pub fn register_dynamic_link(
        &mut self,
        producer: StageId,
        consumer: StageId,
        consumer_port: &str,
    ) -> Result<()> {
        self.ensure_inactive()?;
        if let Err(e) = self.try_register_dynamic_link(producer, consumer, consumer_port) {
            self.release_all();
            return Err(e);
        }
        Ok(())
    }

    fn try_register_dynamic_link(
        &mut self,
        producer: StageId,
        consumer: StageId,
        consumer_port: &str,
    ) -> Result<()> {
        let producer_node = self
            .graph
            .node_weight(producer.0)
            .ok_or_else(|| Error::Graph("producer stage not found".into()))?;
        let consumer_node = self
            .graph
            .node_weight(consumer.0)
            .ok_or_else(|| Error::Graph("consumer stage not found".into()))?;

        if !producer_node.has_dynamic_output() {
            return Err(Error::Graph(format!(
                "stage '{}' has no dynamic output ports",
                producer_node.name
            )));
        }

        let inp = consumer_node
            .ports
            .get(consumer_port, PortDirection::Input)
            .ok_or_else(|| Error::PortNotFound {
                stage: consumer_node.name.clone(),
                port: consumer_port.to_string(),
                direction: PortDirection::Input.label(),
            })?;

        if self.resolver.is_linked(&consumer_node.name, consumer_port) {
            return Err(Error::AlreadyLinked {
                stage: consumer_node.name.clone(),
                port: consumer_port.to_string(),
            });
        }

        self.resolver.register_pending(PendingLink {
            producer: producer_node.name.clone(),
            consumer: consumer_node.name.clone(),
            consumer_port: consumer_port.to_string(),
            consumer_caps: inp.caps().clone(),
        });
        tracing::debug!(
            "registered dynamic link {} -> {}.{consumer_port}",
            producer_node.name,
            consumer_node.name
        );
        Ok(())
    }

    /// Change one configuration property of an inactive stage.
    pub fn set_property(
        &mut self,
        stage: StageId,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<()> {
        let node = self
            .graph
            .node_weight_mut(stage.0)
            .ok_or_else(|| Error::Graph("stage not found".into()))?;

        if self.state != LifecycleState::Null {
            return Err(Error::ConfigFrozen {
                stage: node.name.clone(),
            });
        }

        let value = value.into();
        node.runtime.lock().unwrap().apply_property(key, &value)?;
        node.config.insert(key, value);
        Ok(())
    }

    /// Deliver a runtime port announcement on behalf of a producing stage.
    ///
    /// This is the collaborator-to-core notification; stages that announce
    /// from their own threads use the installed callback instead, which ends
    /// up in the same resolver.
    pub fn announce_port(&self, producer: StageId, port: &DiscoveredPort) -> Result<ResolveOutcome> {
        let node = self
            .graph
            .node_weight(producer.0)
            .ok_or_else(|| Error::Graph("producer stage not found".into()))?;
        Ok(self.resolver.on_port_discovered(&node.name, port))
    }

    /// Activate the pipeline: climb `Null -> Ready -> Paused -> Playing`.
    ///
    /// Wires the control bus into every stage, installs discovery callbacks
    /// on producers with pending links, then propagates each rung to every
    /// stage (consumers before producers). Returns the bus receiver for the
    /// control loop. Activation is complete when the graph itself reports
    /// `Playing`; individual stages may reach it asynchronously.
    pub fn activate(&mut self) -> Result<BusReceiver> {
        if self.state != LifecycleState::Null {
            return Err(Error::Graph(format!(
                "cannot activate from {:?}",
                self.state
            )));
        }

        // Acquisition order: bus attachments, then resolver callbacks, then
        // the state climb. Teardown releases in exact reverse.
        for idx in self.graph.graph().node_indices() {
            if let Some(node) = self.graph.node_weight(idx) {
                node.runtime.lock().unwrap().attach_bus(self.bus.sender());
            }
        }

        for idx in self.graph.graph().node_indices() {
            let Some(node) = self.graph.node_weight(idx) else {
                continue;
            };
            if node.has_dynamic_output() {
                let resolver = self.resolver.clone();
                let producer = node.name.clone();
                node.runtime
                    .lock()
                    .unwrap()
                    .install_port_callback(Box::new(move |port| {
                        resolver.on_port_discovered(&producer, &port)
                    }));
            }
        }

        let order = self.activation_order()?;
        for rung in LifecycleState::Null.path_to(LifecycleState::Playing) {
            self.walk_rung(&order, rung)?;
        }

        self.bus
            .take_receiver()
            .ok_or_else(|| Error::Graph("control bus receiver already taken".into()))
    }

    /// Deactivate the pipeline: walk `Playing -> Paused -> Ready -> Null`
    /// and release graph-level resources in reverse order of acquisition.
    ///
    /// Only the control loop's exit should trigger this; no other code path
    /// may tear down the graph while the loop is running.
    pub fn deactivate(&mut self) -> Result<()> {
        if self.state != LifecycleState::Null {
            let mut order = self.activation_order()?;
            order.reverse();
            for rung in self.state.path_to(LifecycleState::Null) {
                self.walk_rung(&order, rung)?;
            }
        }

        // No resolver callback can be in flight past this point, and every
        // runtime link record is dropped before the bus subscription.
        self.resolver.quiesce();
        self.resolver.clear();
        self.bus = ControlBus::new();
        Ok(())
    }

    /// Propagate one lifecycle rung to every stage, then record and report
    /// the graph's own transition.
    fn walk_rung(&mut self, order: &[NodeIndex], rung: LifecycleState) -> Result<()> {
        for &idx in order {
            if let Some(node) = self.graph.node_weight(idx) {
                node.runtime.lock().unwrap().set_target_state(rung)?;
            }
        }
        let old = self.state;
        self.state = rung;
        self.bus.sender().post_state_changed(self.name.clone(), old, rung);
        tracing::debug!("pipeline '{}': {:?} -> {:?}", self.name, old, rung);
        Ok(())
    }

    /// Stage order for activation: consumers before producers, so every
    /// downstream stage is ready before upstream stages may produce.
    fn activation_order(&self) -> Result<Vec<NodeIndex>> {
        let mut order = daggy::petgraph::algo::toposort(self.graph.graph(), None)
            .map_err(|_| Error::Graph("pipeline graph contains a cycle".into()))?;
        order.reverse();
        Ok(order)
    }

    fn ensure_inactive(&self) -> Result<()> {
        if self.state == LifecycleState::Null {
            Ok(())
        } else {
            Err(Error::Graph(format!(
                "graph is {:?}; construction requires Null",
                self.state
            )))
        }
    }

    /// Drop every stage and link record.
    ///
    /// Called on construction failures so no partial pipeline lingers.
    fn release_all(&mut self) {
        self.graph = Dag::new();
        self.stages_by_name.clear();
        self.resolver.clear();
        self.state = LifecycleState::Null;
        tracing::debug!("pipeline '{}' released", self.name);
    }
}

impl std::fmt::Debug for PipelineGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineGraph")
            .field("name", &self.name)
            .field("stages", &self.stage_count())
            .field("static_links", &self.static_link_count())
            .field("pending_links", &self.pending_link_count())
            .field("state", &self.state)
            .finish()
    }
}
