//! Pipeline runner: activation, control-loop consumption, ordered teardown.
//!
//! The runner is the one place the three lifecycle pieces meet: it activates
//! the graph, parks on the control loop until a terminal event, and only
//! then deactivates. Nothing else is allowed to tear the graph down while
//! the loop runs, which is what keeps teardown race-free against in-flight
//! resolver callbacks.

use crate::bus::{ControlLoop, RunOutcome};
use crate::error::Result;
use crate::graph::PipelineGraph;

/// Drives a [`PipelineGraph`] through one complete run.
#[derive(Debug, Default)]
pub struct PipelineRunner;

impl PipelineRunner {
    /// Create a runner.
    pub fn new() -> Self {
        Self
    }

    /// Run the pipeline to completion.
    ///
    /// Activates the graph, waits for the first terminal event
    /// (end-of-stream or error), deactivates, and maps the outcome:
    /// `Ok(())` for a normal end of stream, [`Error::Runtime`] carrying the
    /// reported message for a failed run.
    ///
    /// There is no mid-stream cancellation: a caller wanting an early stop
    /// posts a synthetic terminal event through [`PipelineGraph::bus_sender`]
    /// (cloned before calling this, since the graph is borrowed for the
    /// whole run).
    ///
    /// [`Error::Runtime`]: crate::error::Error::Runtime
    pub async fn run(&self, graph: &mut PipelineGraph) -> Result<()> {
        let outcome = self.run_inner(graph).await?;
        outcome.into_result()
    }

    /// Run the pipeline and report the outcome without turning a failed run
    /// into an `Err` (activation and teardown errors still propagate).
    pub async fn run_inner(&self, graph: &mut PipelineGraph) -> Result<RunOutcome> {
        let receiver = match graph.activate() {
            Ok(receiver) => receiver,
            Err(e) => {
                // A half-climbed ladder still has to come back down.
                tracing::error!("activation of '{}' failed: {e}", graph.name());
                graph.deactivate()?;
                return Err(e);
            }
        };
        tracing::info!("pipeline '{}' playing", graph.name());

        let control = ControlLoop::new(receiver).spawn();
        let outcome = match control.await {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome::Failed {
                message: format!("control loop task failed: {e}"),
            },
        };

        // The loop's exit is the sole trigger for deactivation.
        graph.deactivate()?;
        tracing::info!("pipeline '{}' stopped ({outcome:?})", graph.name());
        Ok(outcome)
    }
}
