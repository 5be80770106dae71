//! Integration tests for all-or-nothing graph construction.

use millrace::caps::{Caps, MemoryKind, PixelFormat, VideoCaps};
use millrace::error::Error;
use millrace::graph::{LifecycleState, PipelineGraph};
use millrace::runner::PipelineRunner;
use millrace::stage::PropertyMap;

/// A failed instantiation part-way through construction leaves zero live
/// stages behind.
#[test]
fn test_missing_element_releases_partial_pipeline() {
    let mut pipeline = PipelineGraph::with_builtins("detector");

    pipeline
        .add_stage(
            "filesrc",
            "file-source",
            PropertyMap::new().with("location", "/data/sample.mp4"),
        )
        .unwrap();
    pipeline
        .add_stage("qtdemux", "demux", PropertyMap::new())
        .unwrap();
    pipeline
        .add_stage("h264parse", "parser", PropertyMap::new())
        .unwrap();
    assert_eq!(pipeline.stage_count(), 3);

    // This element type does not exist; everything built so far goes away.
    let result = pipeline.add_stage("nvstreammux9000", "muxer", PropertyMap::new());
    assert!(matches!(result, Err(Error::UnknownStageType(_))));
    assert_eq!(pipeline.stage_count(), 0);
    assert_eq!(pipeline.static_link_count(), 0);
    assert_eq!(pipeline.pending_link_count(), 0);
}

/// A constructor rejecting its configuration counts as a failed
/// instantiation too.
#[test]
fn test_rejected_config_releases_partial_pipeline() {
    let mut pipeline = PipelineGraph::with_builtins("detector");

    pipeline
        .add_stage("qtdemux", "demux", PropertyMap::new())
        .unwrap();

    // filesrc without a location is unbuildable.
    let result = pipeline.add_stage("filesrc", "file-source", PropertyMap::new());
    assert!(matches!(result, Err(Error::InstantiationFailed { .. })));
    assert_eq!(pipeline.stage_count(), 0);
}

/// Disjoint capability descriptors fail the static link and release the
/// graph with no stages retained.
#[test]
fn test_disjoint_caps_fail_construction() {
    let mut pipeline = PipelineGraph::with_builtins("mismatch");

    // An H.264 payloader output cannot feed a raw-video display input.
    let pay = pipeline
        .add_stage("rtph264pay", "payloader", PropertyMap::new())
        .unwrap();
    let display = pipeline
        .add_stage("videosink", "display", PropertyMap::new())
        .unwrap();

    let result = pipeline.link(pay, display);
    assert!(matches!(result, Err(Error::IncompatibleCapability { .. })));
    assert_eq!(pipeline.stage_count(), 0);
}

/// A capsfilter with a structured caps descriptor narrows what links.
#[test]
fn test_capsfilter_pins_constraint() {
    let mut pipeline = PipelineGraph::with_builtins("streamer");

    let nvmm_1080p = Caps::VideoRaw(
        VideoCaps::with_format(PixelFormat::Nv12)
            .with_size(1920, 1080)
            .with_memory(MemoryKind::Device),
    );

    let cam = pipeline
        .add_stage("camerasrc", "camera", PropertyMap::new())
        .unwrap();
    let filter = pipeline
        .add_stage(
            "capsfilter",
            "filter",
            PropertyMap::new().with("caps", nvmm_1080p),
        )
        .unwrap();
    let enc = pipeline
        .add_stage("h264enc", "encoder", PropertyMap::new())
        .unwrap();

    pipeline.link(cam, filter).unwrap();
    pipeline.link(filter, enc).unwrap();
    assert_eq!(pipeline.static_link_count(), 2);
}

/// A capsfilter holding an RGBA-only constraint cannot sit behind an
/// NV12-only camera.
#[test]
fn test_capsfilter_conflicting_constraint_fails() {
    let mut pipeline = PipelineGraph::with_builtins("streamer");

    let rgba_only = Caps::VideoRaw(VideoCaps::with_format(PixelFormat::Rgba));

    let cam = pipeline
        .add_stage("camerasrc", "camera", PropertyMap::new())
        .unwrap();
    let filter = pipeline
        .add_stage(
            "capsfilter",
            "filter",
            PropertyMap::new().with("caps", rgba_only),
        )
        .unwrap();

    let result = pipeline.link(cam, filter);
    assert!(matches!(result, Err(Error::IncompatibleCapability { .. })));
    assert_eq!(pipeline.stage_count(), 0);
}

/// A malformed caps *string* is accepted at construction and surfaces as an
/// asynchronous error event that fails the run with the carried message.
#[tokio::test]
async fn test_malformed_caps_string_fails_run() {
    let mut pipeline = PipelineGraph::with_builtins("streamer");

    let cam = pipeline
        .add_stage("camerasrc", "camera", PropertyMap::new())
        .unwrap();
    let filter = pipeline
        .add_stage(
            "capsfilter",
            "filter",
            PropertyMap::new().with("caps", "video/x-raw, format=PURPLE"),
        )
        .unwrap();
    let sink = pipeline
        .add_stage("videosink", "display", PropertyMap::new())
        .unwrap();

    // The string is opaque at construction time, so linking succeeds.
    pipeline.link(cam, filter).unwrap();
    pipeline.link(filter, sink).unwrap();

    let err = PipelineRunner::new().run(&mut pipeline).await.unwrap_err();
    assert!(err.to_string().contains("malformed capability string"));
    assert_eq!(pipeline.state(), LifecycleState::Null);
}
