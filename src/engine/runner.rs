use std::collections::HashSet;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::Level;

use crate::context::Context;
use crate::engine::{Connector, Direction, IdGenerator, Port, Ports, RunnerId, Wiring};
use crate::error::{BuildError, RunnerError};
use crate::node::{Node, NodeInfo};

/// A runner behind a mutex, as referenced by connectors and pipelines.
pub type SharedRunner = Arc<Mutex<Runner>>;

/// Timing of the last node execution.
#[derive(Debug, Clone, Copy)]
pub struct Execution {
    pub start: Instant,
    pub duration: Duration,
}

/// Execution wrapper owning exactly one [`Node`].
///
/// The runner enumerates the node's ports, holds the connectors feeding its
/// inputs and guarantees that the node never runs against inputs which were
/// not produced in the current cycle.
pub struct Runner {
    id: RunnerId,
    name: String,
    info: NodeInfo,
    node: Box<dyn Node>,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    connectors: Vec<Arc<Connector>>,
    ctx: Context,
    pub(crate) pulled: Arc<AtomicBool>,
    last_execution: Option<Execution>,
    cleaned: bool,
}

impl Runner {
    /// Wraps `node`, resolving the connectors for its inputs through
    /// `wiring` and taking a fresh identity from `ids`.
    ///
    /// No runner is returned if port discovery or wiring fails.
    pub fn new(
        ctx: Context,
        node: Box<dyn Node>,
        ids: &dyn IdGenerator,
        wiring: &mut dyn Wiring,
    ) -> Result<Self, BuildError> {
        let info = node.info();
        if info.name.is_empty() || info.version.is_empty() {
            return Err(BuildError::InvalidInfo {
                name: info.name.to_string(),
                version: info.version.to_string(),
            });
        }

        let (inputs, outputs) = discover(&info, node.as_ref())?;
        let connectors = wiring.connectors(&info, &inputs)?;

        let id = ids.next_id();
        let name = format!("{}_{}_{}", info.name, info.version, id);

        tracing::debug!(
            runner = %name,
            inputs = inputs.len(),
            outputs = outputs.len(),
            connectors = connectors.len(),
            "runner created"
        );

        Ok(Self {
            id,
            name,
            info,
            node,
            inputs,
            outputs,
            connectors,
            ctx,
            pulled: Arc::new(AtomicBool::new(false)),
            last_execution: None,
            cleaned: false,
        })
    }

    pub fn shared(self) -> SharedRunner {
        Arc::new(Mutex::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> RunnerId {
        self.id
    }

    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    pub fn output(&self, name: &str) -> Option<&Port> {
        self.outputs.iter().find(|port| port.name() == name)
    }

    pub fn connectors(&self) -> &[Arc<Connector>] {
        &self.connectors
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Timing of the most recent node execution, if the node ever ran.
    pub fn last_execution(&self) -> Option<Execution> {
        self.last_execution
    }

    /// Triggers every connector in construction order, then runs the node.
    ///
    /// The first failing connector stops the pass and its error is returned
    /// without running the node. After a failure some connectors may already
    /// be marked as produced, call [`reset`](Runner::reset) before the next
    /// cycle either way.
    pub fn process(&mut self) -> Result<(), RunnerError> {
        self.process_at(0)
    }

    pub(crate) fn process_at(&mut self, depth: usize) -> Result<(), RunnerError> {
        let span = tracing::span!(Level::INFO, "runner", runner = %self.name);
        let _enter = span.enter();

        self.ctx
            .check()
            .map_err(|reason| RunnerError::interrupted(&self.name, reason))?;

        for connector in &self.connectors {
            connector.trigger(&self.ctx, depth)?;
        }

        // inputs may have taken a while
        self.ctx
            .check()
            .map_err(|reason| RunnerError::interrupted(&self.name, reason))?;

        for output in &self.outputs {
            output.mark_stale();
        }

        let start = Instant::now();
        let mut ports = Ports::new(&self.inputs, &self.outputs);
        let node = &mut self.node;
        let ctx = &self.ctx;

        // A panicking node must not poison the mutex guarding this runner,
        // the panic is reported like any other node failure instead.
        let result = match std::panic::catch_unwind(AssertUnwindSafe(|| node.process(ctx, &mut ports))) {
            Ok(result) => result,
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    format!("Node panicked: {s}")
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    format!("Node panicked: {s}")
                } else {
                    String::from("Node panicked with unknown payload")
                };

                Err(anyhow::anyhow!(msg))
            }
        };
        let duration = start.elapsed();

        self.last_execution = Some(Execution { start, duration });

        match result {
            Ok(()) => {
                // connectors leaving this runner must not run it again this cycle
                self.pulled.store(true, Ordering::Release);
                tracing::trace!(?duration, "processed");
                Ok(())
            }
            Err(source) => Err(RunnerError::Node {
                runner: self.name.clone(),
                source,
            }),
        }
    }

    /// Clears the produced marker of every connector so the next
    /// [`process`](Runner::process) pulls fresh data. Consumers of this
    /// runner may run it again once it has been reset.
    pub fn reset(&mut self) {
        for connector in &self.connectors {
            connector.reset();
        }

        self.pulled.store(false, Ordering::Release);
        tracing::debug!(runner = %self.name, "reset");
    }

    /// Runs the node's cleanup, at most once for the runner's lifetime.
    pub fn cleanup(&mut self) {
        if !self.cleaned {
            self.node.cleanup();
            self.cleaned = true;
            tracing::debug!(runner = %self.name, "cleaned up");
        }
    }
}

impl Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("connectors", &self.connectors)
            .finish()
    }
}

/// Partitions the declared ports by direction, keeping declaration order.
fn discover(info: &NodeInfo, node: &dyn Node) -> Result<(Vec<Port>, Vec<Port>), BuildError> {
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    let mut seen = HashSet::new();

    for spec in node.ports() {
        if !seen.insert((spec.direction, spec.name.clone())) {
            return Err(BuildError::DuplicatePort {
                node: info.name.to_string(),
                port: spec.name.to_string(),
            });
        }

        let port = Port::from_spec(&spec);
        match spec.direction {
            Direction::Input => inputs.push(port),
            Direction::Output => outputs.push(port),
        }
    }

    Ok((inputs, outputs))
}
