//! # Millrace
//!
//! A graph-driven orchestration core for media-processing pipelines.
//!
//! Millrace builds and drives chains of opaque processing stages — sources,
//! demultiplexers, decoders, analyzers, encoders, sinks — connected by typed
//! links. The stages themselves belong to a collaborating framework; this
//! crate owns the parts that stitch them together correctly:
//!
//! - **Graph model**: stages, ports and links, including links whose
//!   producing port only exists once a demultiplexer has parsed its input
//! - **Dynamic resolution**: a guarded, first-wins protocol completing
//!   pending links as runtime ports are announced
//! - **Control loop**: one task consuming every asynchronous lifecycle
//!   signal, whose exit is the sole trigger for teardown
//! - **Lifecycle**: ordered activation and shutdown with ordered resource
//!   release
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use millrace::prelude::*;
//!
//! let mut pipeline = PipelineGraph::with_builtins("detector");
//! let src = pipeline.add_stage(
//!     "filesrc",
//!     "file-source",
//!     PropertyMap::new().with("location", "/data/sample.mp4"),
//! )?;
//! let demux = pipeline.add_stage("qtdemux", "demux", PropertyMap::new())?;
//! let parse = pipeline.add_stage("h264parse", "parser", PropertyMap::new())?;
//! let sink = pipeline.add_stage("nullsink", "sink", PropertyMap::new())?;
//!
//! pipeline.link(src, demux)?;
//! pipeline.register_dynamic_link(demux, parse, "sink")?;
//! pipeline.link(parse, sink)?;
//!
//! PipelineRunner::new().run(&mut pipeline).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod caps;
pub mod error;
pub mod graph;
pub mod resolve;
pub mod runner;
pub mod stage;
pub mod stages;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::bus::{BusSender, ControlEvent, ControlLoop, RunOutcome};
    pub use crate::caps::Caps;
    pub use crate::error::{Error, Result};
    pub use crate::graph::{LifecycleState, PipelineGraph, StageId};
    pub use crate::runner::PipelineRunner;
    pub use crate::stage::{PropertyMap, PropertyValue, StageRegistry};
}

pub use error::{Error, Result};
