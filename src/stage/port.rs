//! Port abstraction for stage inputs and outputs.
//!
//! Ports are the connection points of stages. A port is either *static*
//! (materialized when the stage is created) or *dynamic* (announced by the
//! stage at runtime, once it has inspected its input — a demultiplexer only
//! knows its output topology after parsing the container header).

use crate::caps::Caps;
use smallvec::SmallVec;

/// Direction of a port (input or output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    /// An input port (receives data from upstream).
    Input,
    /// An output port (sends data downstream).
    Output,
}

impl PortDirection {
    /// Human-readable direction label, used in error messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// Whether a port exists at construction or appears at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortPresence {
    /// Port exists as soon as the stage is created.
    Static,
    /// Port is announced only after the stage starts processing.
    Dynamic,
}

/// Template describing a port a stage can have.
///
/// Static templates are materialized into [`Port`]s when the stage is added
/// to the graph; dynamic templates only describe what the stage may announce
/// later (`name` is then a pattern such as `video_%u`).
#[derive(Debug, Clone)]
pub struct PortTemplate {
    /// Name, or name pattern for dynamic ports (e.g. "src", "video_%u").
    pub name: String,
    /// Direction of ports created from this template.
    pub direction: PortDirection,
    /// Presence of ports created from this template.
    pub presence: PortPresence,
    /// Capability constraint ports created from this template carry.
    pub caps: Caps,
}

impl PortTemplate {
    /// Create a new port template.
    pub fn new(
        name: impl Into<String>,
        direction: PortDirection,
        presence: PortPresence,
        caps: Caps,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            presence,
            caps,
        }
    }

    /// Template for a static input port.
    pub fn input(name: impl Into<String>, caps: Caps) -> Self {
        Self::new(name, PortDirection::Input, PortPresence::Static, caps)
    }

    /// Template for a static output port.
    pub fn output(name: impl Into<String>, caps: Caps) -> Self {
        Self::new(name, PortDirection::Output, PortPresence::Static, caps)
    }

    /// Template for a dynamic output port.
    pub fn dynamic_output(name: impl Into<String>, caps: Caps) -> Self {
        Self::new(name, PortDirection::Output, PortPresence::Dynamic, caps)
    }
}

/// A materialized port on a stage.
#[derive(Debug, Clone)]
pub struct Port {
    name: String,
    direction: PortDirection,
    presence: PortPresence,
    caps: Caps,
}

impl Port {
    /// Create a port directly.
    pub fn new(name: impl Into<String>, direction: PortDirection, caps: Caps) -> Self {
        Self {
            name: name.into(),
            direction,
            presence: PortPresence::Static,
            caps,
        }
    }

    /// Materialize a port from a template.
    pub fn from_template(template: &PortTemplate) -> Self {
        Self {
            name: template.name.clone(),
            direction: template.direction,
            presence: template.presence,
            caps: template.caps.clone(),
        }
    }

    /// The port's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The port's direction.
    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    /// The port's presence (static or dynamic).
    pub fn presence(&self) -> PortPresence {
        self.presence
    }

    /// The port's capability constraint.
    pub fn caps(&self) -> &Caps {
        &self.caps
    }

    /// Check if this is an input port.
    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    /// Check if this is an output port.
    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }
}

/// Collection of ports belonging to one stage.
#[derive(Debug, Default)]
pub struct PortList {
    ports: SmallVec<[Port; 4]>,
}

impl PortList {
    /// Create an empty port list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize every static template into a port.
    pub fn from_templates(templates: &[PortTemplate]) -> Self {
        let ports = templates
            .iter()
            .filter(|t| t.presence == PortPresence::Static)
            .map(Port::from_template)
            .collect();
        Self { ports }
    }

    /// Add a port to the list.
    pub fn add(&mut self, port: Port) {
        self.ports.push(port);
    }

    /// Get a port by name and direction.
    pub fn get(&self, name: &str, direction: PortDirection) -> Option<&Port> {
        self.ports
            .iter()
            .find(|p| p.name() == name && p.direction() == direction)
    }

    /// All input ports.
    pub fn inputs(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| p.is_input())
    }

    /// All output ports.
    pub fn outputs(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| p.is_output())
    }

    /// All ports.
    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter()
    }

    /// Number of ports.
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Check if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}
