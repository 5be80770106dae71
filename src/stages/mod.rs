//! Built-in stage descriptors.
//!
//! The pipeline vocabulary of the systems this crate orchestrates: file and
//! camera sources, a container demultiplexer, parser/decoder/encoder stages,
//! inference and tracking stages, converters, payloaders and sinks. Each is
//! a control surface only — port topology, property keys, lifecycle and bus
//! reporting. The actual media processing belongs to the collaborating
//! framework and stays out of scope.

use crate::bus::BusSender;
use crate::caps::{Caps, MemoryKind, PixelFormat, RtpFormat, VideoCaps, VideoCodec};
use crate::error::{Error, Result};
use crate::graph::LifecycleState;
use crate::resolve::ResolveOutcome;
use crate::stage::{
    DiscoveredPort, PortDiscoveredCallback, PortTemplate, PropertyMap, PropertyValue, StageImpl,
    StageRegistry, StageType,
};

/// Register every built-in stage type.
pub(crate) fn register_builtins(registry: &mut StageRegistry) {
    registry.register("filesrc", create_filesrc);
    registry.register("camerasrc", create_camerasrc);
    registry.register("capsfilter", create_capsfilter);
    registry.register("qtdemux", create_qtdemux);
    registry.register("h264parse", create_h264parse);
    registry.register("h264dec", create_h264dec);
    registry.register("h264enc", create_h264enc);
    registry.register("queue", create_queue);
    registry.register("videoconvert", create_videoconvert);
    registry.register("infer", create_infer);
    registry.register("tracker", create_tracker);
    registry.register("osd", create_osd);
    registry.register("rtph264pay", create_rtph264pay);
    registry.register("udpsink", create_udpsink);
    registry.register("videosink", create_videosink);
    registry.register("nullsink", create_nullsink);
}

/// A generic stage implementation driven by its declared descriptor data.
///
/// Stores configuration, tracks the lifecycle state, reports transitions on
/// the bus, and (for demux-type stages) forwards port announcements into the
/// installed discovery callback. Properties the underlying framework would
/// only validate at runtime — the `capsfilter` caps string — are checked on
/// the `Null -> Ready` transition and surface as `Error` events, not as
/// synchronous failures.
pub struct DescriptorStage {
    name: String,
    stage_type: StageType,
    templates: Vec<PortTemplate>,
    known_properties: &'static [&'static str],
    props: PropertyMap,
    state: LifecycleState,
    bus: Option<BusSender>,
    on_port: Option<PortDiscoveredCallback>,
    deferred_caps_key: Option<&'static str>,
}

impl DescriptorStage {
    /// Create a descriptor-backed stage.
    pub fn new(
        name: &str,
        stage_type: StageType,
        templates: Vec<PortTemplate>,
        known_properties: &'static [&'static str],
        props: PropertyMap,
    ) -> Self {
        Self {
            name: name.to_string(),
            stage_type,
            templates,
            known_properties,
            props,
            state: LifecycleState::Null,
            bus: None,
            on_port: None,
            deferred_caps_key: None,
        }
    }

    /// Defer validation of a caps-string property to the `Null -> Ready`
    /// transition.
    pub fn with_deferred_caps(mut self, key: &'static str) -> Self {
        self.deferred_caps_key = Some(key);
        self
    }

    /// Current configuration.
    pub fn props(&self) -> &PropertyMap {
        &self.props
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Announce a runtime-discovered output port.
    ///
    /// Forwards into the discovery callback installed at activation and
    /// returns the resolver's decision, or `None` when no callback is
    /// installed (stage inactive or not dynamically linked).
    pub fn announce_output(&mut self, port: DiscoveredPort) -> Option<ResolveOutcome> {
        self.on_port.as_mut().map(|callback| callback(port))
    }

    fn validate_deferred_caps(&self) {
        let Some(key) = self.deferred_caps_key else {
            return;
        };
        if let Some(PropertyValue::String(text)) = self.props.get(key)
            && let Err(e) = crate::caps::parse(text)
        {
            if let Some(bus) = &self.bus {
                bus.post_error(Some(&self.name), e.to_string());
            }
        }
    }
}

impl StageImpl for DescriptorStage {
    fn stage_type(&self) -> StageType {
        self.stage_type
    }

    fn port_templates(&self) -> Vec<PortTemplate> {
        self.templates.clone()
    }

    fn apply_property(&mut self, key: &str, value: &PropertyValue) -> Result<()> {
        if !self.known_properties.contains(&key) {
            tracing::warn!("stage '{}' has no property '{key}', ignoring", self.name);
            return Ok(());
        }
        self.props.insert(key, value.clone());
        Ok(())
    }

    fn set_target_state(&mut self, state: LifecycleState) -> Result<()> {
        let old = self.state;
        if old == LifecycleState::Null && state == LifecycleState::Ready {
            self.validate_deferred_caps();
        }
        self.state = state;
        if let Some(bus) = &self.bus {
            bus.post_state_changed(self.name.clone(), old, state);
        }
        if state == LifecycleState::Null {
            // Back in Null: release the bus attachment and any installed
            // callback before the graph releases its own resources.
            self.bus = None;
            self.on_port = None;
        }
        Ok(())
    }

    fn attach_bus(&mut self, bus: BusSender) {
        self.bus = Some(bus);
    }

    fn install_port_callback(&mut self, callback: PortDiscoveredCallback) {
        self.on_port = Some(callback);
    }
}

impl std::fmt::Debug for DescriptorStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorStage")
            .field("name", &self.name)
            .field("stage_type", &self.stage_type)
            .field("state", &self.state)
            .finish()
    }
}

fn raw_video_any() -> Caps {
    Caps::VideoRaw(VideoCaps::any())
}

// Built-in stage constructors

fn create_filesrc(name: &str, props: &PropertyMap) -> Result<Box<dyn StageImpl>> {
    if props.get("location").is_none() {
        return Err(Error::Graph("filesrc requires 'location' property".into()));
    }
    Ok(Box::new(DescriptorStage::new(
        name,
        StageType::Source,
        vec![PortTemplate::output("src", Caps::Bytes)],
        &["location"],
        props.clone(),
    )))
}

fn create_camerasrc(name: &str, props: &PropertyMap) -> Result<Box<dyn StageImpl>> {
    let caps = Caps::VideoRaw(
        VideoCaps::with_format(PixelFormat::Nv12).with_memory(MemoryKind::Device),
    );
    Ok(Box::new(DescriptorStage::new(
        name,
        StageType::Source,
        vec![PortTemplate::output("src", caps)],
        &["sensor-id"],
        props.clone(),
    )))
}

fn create_capsfilter(name: &str, props: &PropertyMap) -> Result<Box<dyn StageImpl>> {
    // A structured caps property pins both ports immediately; a caps string
    // is only validated once the stage leaves Null.
    let pinned = props
        .get("caps")
        .and_then(PropertyValue::as_caps)
        .cloned()
        .unwrap_or(Caps::Any);
    Ok(Box::new(
        DescriptorStage::new(
            name,
            StageType::Transform,
            vec![
                PortTemplate::input("sink", pinned.clone()),
                PortTemplate::output("src", pinned),
            ],
            &["caps"],
            props.clone(),
        )
        .with_deferred_caps("caps"),
    ))
}

fn create_qtdemux(name: &str, props: &PropertyMap) -> Result<Box<dyn StageImpl>> {
    Ok(Box::new(DescriptorStage::new(
        name,
        StageType::Demux,
        vec![
            PortTemplate::input("sink", Caps::Quicktime),
            PortTemplate::dynamic_output("video_%u", Caps::Any),
            PortTemplate::dynamic_output("audio_%u", Caps::Any),
        ],
        &[],
        props.clone(),
    )))
}

fn create_h264parse(name: &str, props: &PropertyMap) -> Result<Box<dyn StageImpl>> {
    Ok(Box::new(DescriptorStage::new(
        name,
        StageType::Transform,
        vec![
            PortTemplate::input("sink", Caps::Video(VideoCodec::H264)),
            PortTemplate::output("src", Caps::Video(VideoCodec::H264)),
        ],
        &["config-interval"],
        props.clone(),
    )))
}

fn create_h264dec(name: &str, props: &PropertyMap) -> Result<Box<dyn StageImpl>> {
    Ok(Box::new(DescriptorStage::new(
        name,
        StageType::Decode,
        vec![
            PortTemplate::input("sink", Caps::Video(VideoCodec::H264)),
            PortTemplate::output("src", raw_video_any()),
        ],
        &[],
        props.clone(),
    )))
}

fn create_h264enc(name: &str, props: &PropertyMap) -> Result<Box<dyn StageImpl>> {
    Ok(Box::new(DescriptorStage::new(
        name,
        StageType::Encode,
        vec![
            PortTemplate::input("sink", raw_video_any()),
            PortTemplate::output("src", Caps::Video(VideoCodec::H264)),
        ],
        &["insert-sps-pps", "bitrate"],
        props.clone(),
    )))
}

fn create_queue(name: &str, props: &PropertyMap) -> Result<Box<dyn StageImpl>> {
    Ok(Box::new(DescriptorStage::new(
        name,
        StageType::Transform,
        vec![
            PortTemplate::input("sink", Caps::Any),
            PortTemplate::output("src", Caps::Any),
        ],
        &["max-size-buffers"],
        props.clone(),
    )))
}

fn create_videoconvert(name: &str, props: &PropertyMap) -> Result<Box<dyn StageImpl>> {
    Ok(Box::new(DescriptorStage::new(
        name,
        StageType::Transform,
        vec![
            PortTemplate::input("sink", raw_video_any()),
            PortTemplate::output("src", raw_video_any()),
        ],
        &[],
        props.clone(),
    )))
}

fn create_infer(name: &str, props: &PropertyMap) -> Result<Box<dyn StageImpl>> {
    Ok(Box::new(DescriptorStage::new(
        name,
        StageType::Analyze,
        vec![
            PortTemplate::input("sink", raw_video_any()),
            PortTemplate::output("src", raw_video_any()),
        ],
        &["config-file", "model-file", "batch-size"],
        props.clone(),
    )))
}

fn create_tracker(name: &str, props: &PropertyMap) -> Result<Box<dyn StageImpl>> {
    Ok(Box::new(DescriptorStage::new(
        name,
        StageType::Analyze,
        vec![
            PortTemplate::input("sink", raw_video_any()),
            PortTemplate::output("src", raw_video_any()),
        ],
        &["tracker-width", "tracker-height", "config-file"],
        props.clone(),
    )))
}

fn create_osd(name: &str, props: &PropertyMap) -> Result<Box<dyn StageImpl>> {
    Ok(Box::new(DescriptorStage::new(
        name,
        StageType::Transform,
        vec![
            PortTemplate::input("sink", raw_video_any()),
            PortTemplate::output("src", raw_video_any()),
        ],
        &[],
        props.clone(),
    )))
}

fn create_rtph264pay(name: &str, props: &PropertyMap) -> Result<Box<dyn StageImpl>> {
    Ok(Box::new(DescriptorStage::new(
        name,
        StageType::Transform,
        vec![
            PortTemplate::input("sink", Caps::Video(VideoCodec::H264)),
            PortTemplate::output("src", Caps::Rtp(RtpFormat::H264)),
        ],
        &["pt", "mtu"],
        props.clone(),
    )))
}

fn create_udpsink(name: &str, props: &PropertyMap) -> Result<Box<dyn StageImpl>> {
    Ok(Box::new(DescriptorStage::new(
        name,
        StageType::Sink,
        vec![PortTemplate::input("sink", Caps::Any)],
        &["host", "port", "sync"],
        props.clone(),
    )))
}

fn create_videosink(name: &str, props: &PropertyMap) -> Result<Box<dyn StageImpl>> {
    Ok(Box::new(DescriptorStage::new(
        name,
        StageType::Sink,
        vec![PortTemplate::input("sink", raw_video_any())],
        &["sync"],
        props.clone(),
    )))
}

fn create_nullsink(name: &str, props: &PropertyMap) -> Result<Box<dyn StageImpl>> {
    Ok(Box::new(DescriptorStage::new(
        name,
        StageType::Sink,
        vec![PortTemplate::input("sink", Caps::Any)],
        &["sync"],
        props.clone(),
    )))
}
