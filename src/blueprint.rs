use std::collections::HashMap;
use std::sync::Arc;

use petgraph::Graph;
use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;

use crate::context::Context;
use crate::engine::{Connector, Direction, IdGenerator, Links, PortSpec, Runner, SharedRunner};
use crate::error::BuildError;
use crate::executor::Pipeline;
use crate::node::{Node, NodeInfo};

/// The blueprint of a node graph.
///
/// `Blueprint` collects nodes and the links between their ports. Once the
/// topology is complete, [`build`](Blueprint::build) checks it for cycles
/// and turns it into a [`Pipeline`] of runners.
///
/// # Example
///
/// ```rust,ignore
/// let mut blueprint = Blueprint::new();
/// let a = blueprint.add_node(Constant(2));
/// let b = blueprint.add_node(Double);
/// blueprint.connect(a, "out", b, "in")?;
///
/// let mut pipeline = blueprint.build(&Context::new(), &RandomIds)?;
/// pipeline.run_cycle()?;
/// ```
pub struct Blueprint {
    pub(crate) graph: Graph<Entry, Link>,
}

pub(crate) struct Entry {
    node: Box<dyn Node>,
    info: NodeInfo,
    ports: Vec<PortSpec>,
}

impl Entry {
    fn find(&self, name: &str, direction: Direction) -> Option<&PortSpec> {
        self.ports
            .iter()
            .find(|port| port.direction == direction && port.name == name)
    }
}

/// An edge between an output port and an input port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub output: String,
    pub input: String,
    pub type_name: &'static str,
}

/// A lightweight, copyable reference to a node in a [`Blueprint`], and to
/// its runner in the [`Pipeline`] built from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    pub(crate) index: NodeIndex,
}

impl NodeHandle {
    /// Returns the underlying `NodeIndex` of the node in the graph.
    pub fn index(&self) -> NodeIndex {
        self.index
    }
}

impl Blueprint {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
        }
    }

    pub fn add_node<N>(&mut self, node: N) -> NodeHandle
    where
        N: Node + 'static,
    {
        self.add_boxed(Box::new(node))
    }

    pub fn add_boxed(&mut self, node: Box<dyn Node>) -> NodeHandle {
        let info = node.info();
        let ports = node.ports();
        let index = self.graph.add_node(Entry { node, info, ports });
        NodeHandle { index }
    }

    /// Feeds the input port `input` of `to` from the output port `output`
    /// of `from`. An input accepts a single link, an output any number.
    pub fn connect(
        &mut self,
        from: NodeHandle,
        output: &str,
        to: NodeHandle,
        input: &str,
    ) -> Result<&mut Self, BuildError> {
        let source = self.entry(from)?;
        let type_name = source
            .find(output, Direction::Output)
            .ok_or_else(|| BuildError::UnknownPort {
                node: source.info.name.to_string(),
                port: output.to_string(),
                direction: Direction::Output,
            })?
            .type_name;

        let target = self.entry(to)?;
        if target.find(input, Direction::Input).is_none() {
            return Err(BuildError::UnknownPort {
                node: target.info.name.to_string(),
                port: input.to_string(),
                direction: Direction::Input,
            });
        }

        let taken = self
            .graph
            .edges_directed(to.index, petgraph::Direction::Incoming)
            .any(|edge| edge.weight().input == input);

        if taken {
            return Err(BuildError::AlreadyConnected {
                node: target.info.name.to_string(),
                port: input.to_string(),
            });
        }

        self.graph.add_edge(
            from.index,
            to.index,
            Link {
                output: output.to_string(),
                input: input.to_string(),
                type_name,
            },
        );

        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Creates a runner for every node, upstream first, sharing one
    /// connector per consumed output port.
    pub fn build(self, ctx: &Context, ids: &dyn IdGenerator) -> Result<Pipeline, BuildError> {
        let order = toposort(&self.graph, None)
            .map_err(|cycle| BuildError::Cycle(self.graph[cycle.node_id()].info.name.to_string()))?;

        let links: Vec<(NodeIndex, NodeIndex, Link)> = self
            .graph
            .edge_references()
            .map(|edge| (edge.source(), edge.target(), edge.weight().clone()))
            .collect();

        let (nodes, _) = self.graph.into_nodes_edges();
        let mut entries: Vec<Option<Entry>> = nodes.into_iter().map(|node| Some(node.weight)).collect();
        let mut runners: Vec<Option<SharedRunner>> = vec![None; entries.len()];
        let mut connectors: HashMap<(NodeIndex, String), Arc<Connector>> = HashMap::new();

        for &index in &order {
            let mut wiring = Links::new();

            for (source, _, link) in links.iter().filter(|(_, target, _)| *target == index) {
                let key = (*source, link.output.clone());
                let connector = match connectors.get(&key) {
                    Some(connector) => connector.clone(),
                    None => {
                        let upstream = runners[source.index()]
                            .as_ref()
                            .ok_or(BuildError::UnknownNode(source.index()))?;
                        let connector = Connector::new(upstream, &link.output)?;
                        connectors.insert(key, connector.clone());
                        connector
                    }
                };

                wiring.insert(link.input.clone(), &connector);
            }

            let entry = entries[index.index()]
                .take()
                .ok_or(BuildError::UnknownNode(index.index()))?;

            let runner = Runner::new(ctx.clone(), entry.node, ids, &mut wiring)?;
            runners[index.index()] = Some(runner.shared());
        }

        let mut graph = Graph::with_capacity(runners.len(), links.len());
        for (index, runner) in runners.into_iter().enumerate() {
            let runner = runner.ok_or(BuildError::UnknownNode(index))?;
            graph.add_node(runner);
        }
        for (source, target, link) in links {
            graph.add_edge(source, target, link);
        }

        Ok(Pipeline::new(ctx.clone(), graph, order))
    }

    fn entry(&self, handle: NodeHandle) -> Result<&Entry, BuildError> {
        self.graph
            .node_weight(handle.index)
            .ok_or(BuildError::UnknownNode(handle.index.index()))
    }
}

impl Default for Blueprint {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Blueprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nodes: Vec<&str> = self
            .graph
            .node_weights()
            .map(|entry| entry.info.name.as_ref())
            .collect();

        f.debug_struct("Blueprint")
            .field("nodes", &nodes)
            .field("links", &self.graph.edge_count())
            .finish()
    }
}

impl std::fmt::Display for Blueprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let entry = &self.graph[index];
            let name = entry.info.name.replace('"', "\\\""); // Simple escape
            writeln!(f, "    {:?}[\"{}\"]", index.index(), name)?;
        }

        for edge in self.graph.edge_references() {
            writeln!(
                f,
                "    {:?} -- \"{}\" --> {:?}",
                edge.source().index(),
                edge_label(edge.weight()),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

pub(crate) fn edge_label(link: &Link) -> String {
    let type_name = link.type_name.replace('<', "&lt;").replace('>', "&gt;");
    format!("{} → {}: {}", link.output, link.input, type_name)
}
