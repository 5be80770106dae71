//! Error types for millrace.

use thiserror::Error;

/// Result type alias using millrace's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for millrace operations.
///
/// Construction-time failures (`UnknownStageType`, `InstantiationFailed`,
/// `PortNotFound`, `IncompatibleCapability`, `AlreadyLinked`) are synchronous
/// and unwind the partially built graph before returning. Runtime failures
/// travel the control bus and surface as [`Error::Runtime`] when the run ends.
#[derive(Error, Debug)]
pub enum Error {
    /// No constructor registered for the requested stage type.
    #[error("unknown stage type: {0}")]
    UnknownStageType(String),

    /// The registered constructor could not build the stage.
    #[error("failed to instantiate stage '{name}' of type '{type_name}': {reason}")]
    InstantiationFailed {
        /// Requested stage type.
        type_name: String,
        /// Requested instance name.
        name: String,
        /// Constructor-reported reason.
        reason: String,
    },

    /// A named port does not exist on the stage (in the requested direction).
    #[error("stage '{stage}' has no {direction} port named '{port}'")]
    PortNotFound {
        /// Stage instance name.
        stage: String,
        /// Port name that was looked up.
        port: String,
        /// "input" or "output".
        direction: &'static str,
    },

    /// The two ports' capability constraints do not intersect.
    #[error("incompatible capabilities: {src}.{src_port} cannot feed {dst}.{dst_port}")]
    IncompatibleCapability {
        /// Producing stage.
        src: String,
        /// Producing port.
        src_port: String,
        /// Consuming stage.
        dst: String,
        /// Consuming port.
        dst_port: String,
    },

    /// The input port already has a link; input ports link at most once.
    #[error("input port {stage}.{port} is already linked")]
    AlreadyLinked {
        /// Consuming stage.
        stage: String,
        /// Consuming port.
        port: String,
    },

    /// Stage configuration is immutable once the graph leaves `Null`.
    #[error("configuration of stage '{stage}' is frozen after activation")]
    ConfigFrozen {
        /// Stage whose configuration was touched.
        stage: String,
    },

    /// A capability string could not be parsed.
    #[error("malformed capability string: {0}")]
    MalformedCaps(String),

    /// Graph structure error (duplicate name, cycle, missing stage, ...).
    #[error("graph error: {0}")]
    Graph(String),

    /// The run terminated with an error event carried on the control bus.
    #[error("pipeline failed: {0}")]
    Runtime(String),
}
