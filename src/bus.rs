//! Control bus and control loop.
//!
//! Every asynchronous lifecycle signal in the system — end-of-stream,
//! runtime errors, state-change reports — travels one channel, consumed by
//! exactly one task: the control loop. The loop's exit is the only trigger
//! for pipeline deactivation, which keeps teardown single-threaded and free
//! of races with in-flight resolver callbacks.
//!
//! Senders are cheap clones usable from whatever threads the stage
//! implementations own; the receiving side awaits cooperatively (no
//! busy-poll). There is no shared "quit" flag: termination is an explicit
//! terminal event, or channel closure.

use crate::error::{Error, Result};
use crate::graph::LifecycleState;
use std::fmt;

/// A control signal delivered on the bus.
#[derive(Debug, Clone)]
pub enum ControlEvent {
    /// All sources are exhausted; the run ends successfully.
    EndOfStream,

    /// A stage hit a fatal runtime error; the run ends as failed.
    Error {
        /// The stage that reported the error, if known.
        stage: Option<String>,
        /// The carried error message.
        message: String,
    },

    /// A stage (or the graph) reached a new lifecycle state. Informational.
    StateChanged {
        /// Who changed state.
        stage: String,
        /// Previous state.
        old: LifecycleState,
        /// New state.
        new: LifecycleState,
    },
}

impl fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream => write!(f, "end of stream"),
            Self::Error { stage, message } => match stage {
                Some(s) => write!(f, "error in {s}: {message}"),
                None => write!(f, "error: {message}"),
            },
            Self::StateChanged { stage, old, new } => {
                write!(f, "{stage}: {old:?} -> {new:?}")
            }
        }
    }
}

/// The control bus: one channel, many producers, one consumer.
///
/// Created at activation; the receiver is handed to the control loop and
/// dropped during teardown, which closes the subscription.
pub struct ControlBus {
    tx: kanal::Sender<ControlEvent>,
    rx: Option<kanal::Receiver<ControlEvent>>,
}

impl ControlBus {
    /// Create a new bus.
    pub fn new() -> Self {
        let (tx, rx) = kanal::unbounded();
        Self { tx, rx: Some(rx) }
    }

    /// Get a sender half for a stage or the graph.
    pub fn sender(&self) -> BusSender {
        BusSender {
            inner: self.tx.clone(),
        }
    }

    /// Take the single receiver half.
    ///
    /// Returns `None` if it was already taken: the bus has exactly one
    /// consumer.
    pub fn take_receiver(&mut self) -> Option<BusReceiver> {
        self.rx.take().map(|inner| BusReceiver { inner })
    }
}

impl Default for ControlBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Sender half of the control bus.
///
/// Safe to clone into stage threads; posting never blocks (the channel is
/// unbounded) and silently drops events once the consumer is gone.
#[derive(Clone)]
pub struct BusSender {
    inner: kanal::Sender<ControlEvent>,
}

impl BusSender {
    /// Post an event.
    pub fn post(&self, event: ControlEvent) {
        let _ = self.inner.send(event);
    }

    /// Post an end-of-stream event.
    pub fn post_eos(&self) {
        self.post(ControlEvent::EndOfStream);
    }

    /// Post a fatal error event.
    pub fn post_error(&self, stage: Option<&str>, message: impl Into<String>) {
        self.post(ControlEvent::Error {
            stage: stage.map(str::to_string),
            message: message.into(),
        });
    }

    /// Post a state-change report.
    pub fn post_state_changed(
        &self,
        stage: impl Into<String>,
        old: LifecycleState,
        new: LifecycleState,
    ) {
        self.post(ControlEvent::StateChanged {
            stage: stage.into(),
            old,
            new,
        });
    }
}

/// Receiver half of the control bus.
pub struct BusReceiver {
    inner: kanal::Receiver<ControlEvent>,
}

impl BusReceiver {
    /// Receive the next event, awaiting cooperatively.
    ///
    /// Returns `None` once every sender is dropped and the queue is drained.
    pub async fn recv(&self) -> Option<ControlEvent> {
        self.inner.as_async().recv().await.ok()
    }

    /// Try to receive without blocking.
    pub fn try_recv(&self) -> Option<ControlEvent> {
        match self.inner.try_recv() {
            Ok(Some(event)) => Some(event),
            _ => None,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// End-of-stream: the run completed normally.
    Completed,
    /// A fatal error event ended the run.
    Failed {
        /// The message carried by the error event.
        message: String,
    },
}

impl RunOutcome {
    /// Check if the run completed normally.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Convert into a `Result`, mapping failure to [`Error::Runtime`].
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Completed => Ok(()),
            Self::Failed { message } => Err(Error::Runtime(message)),
        }
    }
}

/// The single consumer of the control bus.
///
/// Blocks on the channel until a terminal event arrives. Only the first
/// terminal event is honored; anything still queued behind it is discarded
/// when the receiver drops, so a stray late `Error` after end-of-stream can
/// never trigger a second teardown.
pub struct ControlLoop {
    receiver: BusReceiver,
}

impl ControlLoop {
    /// Create a control loop over the bus receiver.
    pub fn new(receiver: BusReceiver) -> Self {
        Self { receiver }
    }

    /// Run the loop on its own task and return a handle to its outcome.
    ///
    /// The task is otherwise idle: it parks on the channel until an event
    /// arrives.
    pub fn spawn(self) -> tokio::task::JoinHandle<RunOutcome> {
        tokio::spawn(self.run())
    }

    /// Run until the first terminal event.
    pub async fn run(self) -> RunOutcome {
        while let Some(event) = self.receiver.recv().await {
            match event {
                ControlEvent::EndOfStream => {
                    tracing::info!("end of stream, stopping");
                    return RunOutcome::Completed;
                }
                ControlEvent::Error { stage, message } => {
                    tracing::error!(stage = stage.as_deref(), "pipeline error: {message}");
                    return RunOutcome::Failed { message };
                }
                ControlEvent::StateChanged { stage, old, new } => {
                    tracing::debug!("{stage}: {old:?} -> {new:?}");
                }
            }
        }

        // Every sender dropped without a terminal event: the pipeline went
        // away under us, which is a failure, not a clean end.
        RunOutcome::Failed {
            message: "control bus closed without a terminal event".to_string(),
        }
    }
}
