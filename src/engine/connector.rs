use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use crate::context::Context;
use crate::engine::{Direction, Port, RunnerId, SharedRunner};
use crate::error::{BuildError, RunnerError};
use crate::node::NodeInfo;

/// A dependency edge from one runner's output port to one or more input
/// ports downstream.
///
/// Every runner consuming the same output holds the same `Arc<Connector>`,
/// so the upstream value is pulled once per cycle no matter how many
/// consumers ask for it. The *produced* marker lives here, independent of
/// the values held in the bound ports.
pub struct Connector {
    upstream: SharedRunner,
    upstream_id: RunnerId,
    upstream_name: String,
    /// Set once the upstream runner ran in this cycle, shared by every
    /// connector leaving that runner.
    pulled: Arc<AtomicBool>,
    source: Port,
    bindings: Mutex<Vec<Port>>,
    produced: AtomicBool,
}

impl Connector {
    /// Creates a connector reading the output port `port` of `upstream`.
    pub fn new(upstream: &SharedRunner, port: &str) -> Result<Arc<Self>, BuildError> {
        let runner = upstream.lock().unwrap_or_else(PoisonError::into_inner);

        let source = runner
            .outputs()
            .iter()
            .find(|output| output.name() == port)
            .cloned()
            .ok_or_else(|| BuildError::UnknownPort {
                node: runner.name().to_string(),
                port: port.to_string(),
                direction: Direction::Output,
            })?;

        Ok(Arc::new(Self {
            upstream: upstream.clone(),
            upstream_id: runner.uuid(),
            upstream_name: runner.name().to_string(),
            pulled: runner.pulled.clone(),
            source,
            bindings: Mutex::new(Vec::new()),
            produced: AtomicBool::new(false),
        }))
    }

    pub fn upstream(&self) -> &SharedRunner {
        &self.upstream
    }

    pub fn upstream_id(&self) -> RunnerId {
        self.upstream_id
    }

    pub fn upstream_name(&self) -> &str {
        &self.upstream_name
    }

    /// The upstream output port this connector reads from.
    pub fn source(&self) -> &Port {
        &self.source
    }

    /// The downstream input ports currently bound to this connector.
    pub fn bindings(&self) -> Vec<Port> {
        self.bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_produced(&self) -> bool {
        self.produced.load(Ordering::Acquire)
    }

    pub(crate) fn bind(&self, input: &Port) {
        let mut bindings = self.bindings.lock().unwrap_or_else(PoisonError::into_inner);
        if !bindings.iter().any(|port| port.same_slot(input)) {
            bindings.push(input.clone());
        }
    }

    /// Makes the upstream value available to every bound input.
    ///
    /// Returns immediately if the value was already produced in this cycle.
    /// Otherwise the upstream runner is processed first, which in turn
    /// triggers its own connectors. Errors from anywhere in the chain are
    /// returned as they were raised.
    pub fn trigger(&self, ctx: &Context, depth: usize) -> Result<(), RunnerError> {
        if self.is_produced() {
            tracing::debug!(upstream = %self.upstream_name, port = self.source.name(), "already produced");
            return Ok(());
        }

        let depth = depth + 1;
        if depth > ctx.max_depth() {
            return Err(RunnerError::DepthExceeded {
                runner: self.upstream_name.clone(),
                limit: ctx.max_depth(),
            });
        }

        {
            let mut upstream = match self.upstream.try_lock() {
                Ok(upstream) => upstream,
                Err(TryLockError::WouldBlock) => {
                    return Err(RunnerError::Busy {
                        runner: self.upstream_name.clone(),
                    });
                }
                Err(TryLockError::Poisoned(_)) => {
                    return Err(RunnerError::Poisoned {
                        runner: self.upstream_name.clone(),
                    });
                }
            };

            if !self.pulled.load(Ordering::Acquire) {
                upstream.process_at(depth)?;
                self.pulled.store(true, Ordering::Release);
            }
        }

        let value = self
            .source
            .get()
            .ok_or_else(|| RunnerError::MissingOutput {
                runner: self.upstream_name.clone(),
                port: self.source.name().to_string(),
            })?;

        for input in self
            .bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            input.set(value.clone());
        }

        self.produced.store(true, Ordering::Release);
        tracing::debug!(upstream = %self.upstream_name, port = self.source.name(), "triggered");
        Ok(())
    }

    /// Forgets that the value was produced, so the next trigger pulls from
    /// upstream again. Bound inputs keep their value but turn stale.
    pub fn reset(&self) {
        self.produced.store(false, Ordering::Release);
        self.pulled.store(false, Ordering::Release);

        for input in self
            .bindings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            input.mark_stale();
        }
    }
}

impl Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("upstream", &self.upstream_name)
            .field("port", &self.source.name())
            .field("produced", &self.is_produced())
            .finish()
    }
}

/// Resolves the connectors feeding a node's input ports.
pub trait Wiring {
    /// Returns the connectors satisfying `inputs`, in the order of the first
    /// input each one feeds, and binds every input to its connector.
    fn connectors(
        &mut self,
        node: &NodeInfo,
        inputs: &[Port],
    ) -> Result<Vec<Arc<Connector>>, BuildError>;
}

/// Wiring for source nodes, rejects any input port.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unwired;

impl Wiring for Unwired {
    fn connectors(
        &mut self,
        node: &NodeInfo,
        inputs: &[Port],
    ) -> Result<Vec<Arc<Connector>>, BuildError> {
        match inputs.first() {
            Some(input) => Err(BuildError::Unbound {
                node: node.name.to_string(),
                port: input.name().to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }
}

/// Explicit mapping from input port names to connectors.
///
/// ```rust,ignore
/// let mut links = Links::new().bind("left", &a_out).bind("right", &b_out);
/// let runner = Runner::new(ctx, Box::new(Add), &ids, &mut links)?;
/// ```
#[derive(Debug, Default, Clone)]
pub struct Links {
    links: HashMap<String, Arc<Connector>>,
}

impl Links {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, input: impl Into<String>, connector: &Arc<Connector>) -> Self {
        self.insert(input, connector);
        self
    }

    pub fn insert(&mut self, input: impl Into<String>, connector: &Arc<Connector>) {
        self.links.insert(input.into(), connector.clone());
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl Wiring for Links {
    fn connectors(
        &mut self,
        node: &NodeInfo,
        inputs: &[Port],
    ) -> Result<Vec<Arc<Connector>>, BuildError> {
        if let Some(name) = self
            .links
            .keys()
            .find(|name| !inputs.iter().any(|input| input.name() == name.as_str()))
        {
            return Err(BuildError::UnknownPort {
                node: node.name.to_string(),
                port: name.clone(),
                direction: Direction::Input,
            });
        }

        let mut connectors: Vec<Arc<Connector>> = Vec::new();

        for input in inputs {
            let connector = self
                .links
                .get(input.name())
                .ok_or_else(|| BuildError::Unbound {
                    node: node.name.to_string(),
                    port: input.name().to_string(),
                })?;

            connector.bind(input);

            if !connectors.iter().any(|known| Arc::ptr_eq(known, connector)) {
                connectors.push(connector.clone());
            }
        }

        Ok(connectors)
    }
}
