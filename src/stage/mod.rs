//! Stage system: the boundary between the orchestration core and the opaque
//! processing stages it drives.
//!
//! A stage is a named, typed processing unit. The core never looks inside
//! one — it instantiates stages through the [`StageRegistry`], configures
//! them through heterogeneous [`PropertyValue`] maps, wires their ports, and
//! walks them through the lifecycle. Everything else (decoding, inference,
//! packetization, socket I/O) happens behind the [`StageImpl`] trait on
//! threads the collaborating framework owns.

mod port;
mod registry;

pub use port::{Port, PortDirection, PortList, PortPresence, PortTemplate};
pub use registry::{StageConstructor, StageRegistry};

use crate::bus::BusSender;
use crate::caps::Caps;
use crate::error::Result;
use crate::graph::LifecycleState;
use crate::resolve::ResolveOutcome;
use std::collections::HashMap;

/// Coarse classification of a stage's role in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageType {
    /// Produces data (file reader, camera).
    Source,
    /// Splits container data into elementary streams; output ports appear
    /// at runtime.
    Demux,
    /// Decompresses an elementary stream.
    Decode,
    /// 1-to-1 transformation (parser, converter, queue, payloader).
    Transform,
    /// Inspects data and attaches results (detector, tracker).
    Analyze,
    /// Compresses raw data.
    Encode,
    /// Consumes data (display, network, discard).
    Sink,
}

/// A heterogeneous property value.
///
/// Stage configuration is a string-keyed map of these; the structured
/// variant carries a capability descriptor for constraint-pinning stages.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// A string value.
    String(String),
    /// An integer value.
    Integer(i64),
    /// A boolean value.
    Bool(bool),
    /// A structured capability descriptor.
    Caps(Caps),
}

impl PropertyValue {
    /// Get as a string slice, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as a string, converting if necessary.
    pub fn as_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Caps(c) => c.to_string(),
        }
    }

    /// Try to get as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get as an unsigned integer.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|i| u64::try_from(i).ok())
    }

    /// Try to get as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Integer(i) => Some(*i != 0),
            Self::String(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Try to get as a capability descriptor.
    pub fn as_caps(&self) -> Option<&Caps> {
        match self {
            Self::Caps(c) => Some(c),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Caps> for PropertyValue {
    fn from(c: Caps) -> Self {
        Self::Caps(c)
    }
}

/// String-keyed stage configuration.
///
/// Immutable once the owning graph leaves the inactive state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyMap {
    entries: HashMap<String, PropertyValue>,
}

impl PropertyMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Insert a property.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Look up a property.
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(key)
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An output port announced by a running stage.
#[derive(Debug, Clone)]
pub struct DiscoveredPort {
    /// Port name chosen by the stage (e.g. "video_0").
    pub name: String,
    /// Concrete caps of the discovered elementary stream.
    pub caps: Caps,
}

impl DiscoveredPort {
    /// Create a discovered-port announcement.
    pub fn new(name: impl Into<String>, caps: Caps) -> Self {
        Self {
            name: name.into(),
            caps,
        }
    }
}

/// Callback a stage invokes (from its own thread) when it discovers a new
/// output port. The returned [`ResolveOutcome`] tells the stage whether and
/// where the port was linked, so it can complete its side of the wiring.
pub type PortDiscoveredCallback = Box<dyn FnMut(DiscoveredPort) -> ResolveOutcome + Send>;

/// The control surface of an opaque processing stage.
///
/// The core calls these methods; data processing and threading stay inside
/// the implementation. Properties are validated only as far as the stage
/// itself chooses — values it can only check at runtime surface later as
/// `Error` events on the control bus, not as failures here.
pub trait StageImpl: Send {
    /// The stage's role tag.
    fn stage_type(&self) -> StageType;

    /// Port topology this stage declares (static and dynamic templates).
    fn port_templates(&self) -> Vec<PortTemplate>;

    /// Apply one configuration property.
    fn apply_property(&mut self, key: &str, value: &PropertyValue) -> Result<()>;

    /// Propagate a lifecycle target state to the stage.
    ///
    /// Stages may reach the state asynchronously; reporting happens via
    /// `StateChanged` events on the attached bus.
    fn set_target_state(&mut self, state: LifecycleState) -> Result<()>;

    /// Hand the stage a sender for posting control events.
    ///
    /// Called once during activation, before any state is propagated.
    fn attach_bus(&mut self, bus: BusSender) {
        let _ = bus;
    }

    /// Install the dynamic-port discovery callback.
    ///
    /// Only meaningful for stages with dynamic output templates; the default
    /// implementation drops the callback.
    fn install_port_callback(&mut self, callback: PortDiscoveredCallback) {
        let _ = callback;
    }
}
