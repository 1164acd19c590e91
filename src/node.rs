use std::borrow::Cow;

use crate::context::Context;
use crate::engine::{PortSpec, Ports};

/// Descriptive metadata of a node.
///
/// `name` and `version` must not be empty, they make up the runner's display
/// name together with its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: Cow<'static, str>,
    pub description: Cow<'static, str>,
    pub version: Cow<'static, str>,
}

impl NodeInfo {
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        description: impl Into<Cow<'static, str>>,
        version: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: version.into(),
        }
    }
}

/// A unit of computation with named input and output ports.
///
/// Nodes are owned by exactly one [`Runner`](crate::Runner), which calls
/// [`process`](Node::process) only once every input port has been filled for
/// the current cycle.
///
/// # Example
///
/// ```rust
/// use nodeflow::{Context, Node, NodeInfo, PortSpec, Ports};
///
/// struct Double;
///
/// impl Node for Double {
///     fn info(&self) -> NodeInfo {
///         NodeInfo::new("double", "doubles its input", "1.0")
///     }
///
///     fn ports(&self) -> Vec<PortSpec> {
///         vec![PortSpec::input::<i64>("in"), PortSpec::output::<i64>("out")]
///     }
///
///     fn process(&mut self, _: &Context, ports: &mut Ports) -> anyhow::Result<()> {
///         let value = ports.input::<i64>("in")?;
///         ports.set("out", *value * 2)?;
///         Ok(())
///     }
/// }
/// ```
pub trait Node: Send {
    fn info(&self) -> NodeInfo;

    /// Declares the ports of this node. The order of the returned list is
    /// the order in which input dependencies are triggered.
    fn ports(&self) -> Vec<PortSpec>;

    fn process(&mut self, ctx: &Context, ports: &mut Ports) -> anyhow::Result<()>;

    /// Releases resources held by the node when its graph is torn down.
    fn cleanup(&mut self) {}
}
