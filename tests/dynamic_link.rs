//! Integration tests for the dynamic-port resolution protocol.

use millrace::bus::ControlLoop;
use millrace::caps::{AudioCodec, Caps, VideoCodec};
use millrace::graph::{LifecycleState, PipelineGraph};
use millrace::resolve::ResolveOutcome;
use millrace::runner::PipelineRunner;
use millrace::stage::{
    DiscoveredPort, PortDiscoveredCallback, PortTemplate, PropertyMap, StageImpl, StageRegistry,
    StageType,
};
use std::sync::Mutex;
use std::thread;

fn demuxed_pipeline() -> (PipelineGraph, millrace::graph::StageId) {
    let mut pipeline = PipelineGraph::with_builtins("detector");

    let src = pipeline
        .add_stage(
            "filesrc",
            "file-source",
            PropertyMap::new().with("location", "/data/sample.mp4"),
        )
        .unwrap();
    let demux = pipeline
        .add_stage("qtdemux", "demux", PropertyMap::new())
        .unwrap();
    let parse = pipeline
        .add_stage("h264parse", "parser", PropertyMap::new())
        .unwrap();
    let sink = pipeline
        .add_stage("nullsink", "sink", PropertyMap::new())
        .unwrap();

    pipeline.link(src, demux).unwrap();
    pipeline.register_dynamic_link(demux, parse, "sink").unwrap();
    pipeline.link(parse, sink).unwrap();

    (pipeline, demux)
}

/// Two candidate streams, one consumer: the first announcement links, the
/// second is silently ignored, and exactly one link is recorded.
#[tokio::test]
async fn test_second_stream_silently_ignored() {
    let (mut pipeline, demux) = demuxed_pipeline();
    let receiver = pipeline.activate().unwrap();

    let stream1 = DiscoveredPort::new("video_0", Caps::Video(VideoCodec::H264));
    let stream2 = DiscoveredPort::new("video_1", Caps::Video(VideoCodec::H264));

    let first = pipeline.announce_port(demux, &stream1).unwrap();
    assert_eq!(
        first,
        ResolveOutcome::Linked {
            consumer: "parser".to_string(),
            consumer_port: "sink".to_string(),
        }
    );

    let second = pipeline.announce_port(demux, &stream2).unwrap();
    assert_ne!(second, first);
    assert!(matches!(
        second,
        ResolveOutcome::NoPending | ResolveOutcome::AlreadyLinked
    ));

    let resolved = pipeline.resolved_links();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].producer_port, "video_0");
    assert_eq!(resolved[0].consumer, "parser");
    assert_eq!(pipeline.pending_link_count(), 0);

    pipeline.bus_sender().post_eos();
    let outcome = ControlLoop::new(receiver).run().await;
    assert!(outcome.is_success());
    pipeline.deactivate().unwrap();
}

/// An audio stream announced first does not satisfy a video-only consumer;
/// the pending link stays armed for the video stream that follows.
#[tokio::test]
async fn test_mismatched_stream_keeps_pipeline_degraded_not_dead() {
    let (mut pipeline, demux) = demuxed_pipeline();
    let receiver = pipeline.activate().unwrap();

    let audio = DiscoveredPort::new("audio_0", Caps::Audio(AudioCodec::Aac));
    assert_eq!(
        pipeline.announce_port(demux, &audio).unwrap(),
        ResolveOutcome::Incompatible
    );
    assert_eq!(pipeline.pending_link_count(), 1);
    assert!(pipeline.resolved_links().is_empty());

    let video = DiscoveredPort::new("video_0", Caps::Video(VideoCodec::H264));
    assert!(matches!(
        pipeline.announce_port(demux, &video).unwrap(),
        ResolveOutcome::Linked { .. }
    ));

    pipeline.bus_sender().post_eos();
    assert!(ControlLoop::new(receiver).run().await.is_success());
    pipeline.deactivate().unwrap();
}

/// Announcements racing from two producer threads: the table mutex makes
/// the first writer win and exactly one link is ever recorded.
#[tokio::test]
async fn test_racing_announcements_from_threads() {
    let (mut pipeline, demux) = demuxed_pipeline();
    let receiver = pipeline.activate().unwrap();

    let outcomes: Vec<ResolveOutcome> = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let pipeline = &pipeline;
                s.spawn(move || {
                    let port = DiscoveredPort::new(
                        format!("video_{i}"),
                        Caps::Video(VideoCodec::H264),
                    );
                    pipeline.announce_port(demux, &port).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let linked = outcomes
        .iter()
        .filter(|o| matches!(o, ResolveOutcome::Linked { .. }))
        .count();
    assert_eq!(linked, 1);
    assert_eq!(pipeline.resolved_links().len(), 1);

    pipeline.bus_sender().post_eos();
    assert!(ControlLoop::new(receiver).run().await.is_success());
    pipeline.deactivate().unwrap();
}

// A demux stand-in that behaves like the real collaborator: on reaching
// Playing it spawns its own thread, announces two candidate streams through
// the installed callback, records the outcomes, and signals end-of-stream.

static PROBE_OUTCOMES: Mutex<Vec<ResolveOutcome>> = Mutex::new(Vec::new());

struct HeaderProbeDemux {
    bus: Option<millrace::bus::BusSender>,
    on_port: Option<PortDiscoveredCallback>,
}

impl StageImpl for HeaderProbeDemux {
    fn stage_type(&self) -> StageType {
        StageType::Demux
    }

    fn port_templates(&self) -> Vec<PortTemplate> {
        vec![
            PortTemplate::input("sink", Caps::Quicktime),
            PortTemplate::dynamic_output("video_%u", Caps::Any),
        ]
    }

    fn apply_property(
        &mut self,
        _key: &str,
        _value: &millrace::stage::PropertyValue,
    ) -> millrace::Result<()> {
        Ok(())
    }

    fn set_target_state(&mut self, state: LifecycleState) -> millrace::Result<()> {
        if state == LifecycleState::Playing
            && let (Some(mut callback), Some(bus)) = (self.on_port.take(), self.bus.clone())
        {
            thread::spawn(move || {
                for name in ["video_0", "video_1"] {
                    let outcome =
                        callback(DiscoveredPort::new(name, Caps::Video(VideoCodec::H264)));
                    PROBE_OUTCOMES.lock().unwrap().push(outcome);
                }
                bus.post_eos();
            });
        }
        Ok(())
    }

    fn attach_bus(&mut self, bus: millrace::bus::BusSender) {
        self.bus = Some(bus);
    }

    fn install_port_callback(&mut self, callback: PortDiscoveredCallback) {
        self.on_port = Some(callback);
    }
}

fn create_probe_demux(
    _name: &str,
    _props: &PropertyMap,
) -> millrace::Result<Box<dyn StageImpl>> {
    Ok(Box::new(HeaderProbeDemux {
        bus: None,
        on_port: None,
    }))
}

/// End-to-end: a stage announcing from its own thread while the runner owns
/// the graph. Exactly one announcement connects; the run ends on the EOS the
/// stage posts afterwards.
#[tokio::test]
async fn test_stage_driven_discovery_under_runner() {
    let mut registry = StageRegistry::with_builtins();
    registry.register("probedemux", create_probe_demux);

    let mut pipeline = PipelineGraph::new("probe", registry);
    let src = pipeline
        .add_stage(
            "filesrc",
            "file-source",
            PropertyMap::new().with("location", "/data/sample.mp4"),
        )
        .unwrap();
    let demux = pipeline
        .add_stage("probedemux", "demux", PropertyMap::new())
        .unwrap();
    let parse = pipeline
        .add_stage("h264parse", "parser", PropertyMap::new())
        .unwrap();

    pipeline.link(src, demux).unwrap();
    pipeline.register_dynamic_link(demux, parse, "sink").unwrap();

    PROBE_OUTCOMES.lock().unwrap().clear();
    PipelineRunner::new().run(&mut pipeline).await.unwrap();

    let outcomes = PROBE_OUTCOMES.lock().unwrap();
    assert_eq!(outcomes.len(), 2);
    let linked = outcomes
        .iter()
        .filter(|o| matches!(o, ResolveOutcome::Linked { .. }))
        .count();
    assert_eq!(linked, 1);
    assert_eq!(pipeline.state(), LifecycleState::Null);
}
