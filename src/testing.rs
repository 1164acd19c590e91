//! Nodes shared by the unit tests.

use std::sync::{Arc, Mutex};

use crate::context::Context;
use crate::engine::{PortSpec, Ports};
use crate::node::{Node, NodeInfo};

/// Records the order in which nodes ran.
pub(crate) type Journal = Arc<Mutex<Vec<String>>>;

pub(crate) fn journal() -> Journal {
    Arc::default()
}

pub(crate) fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

/// Source emitting a constant on `out`.
pub(crate) struct Constant {
    name: &'static str,
    description: &'static str,
    version: &'static str,
    value: i64,
    journal: Journal,
}

impl Constant {
    pub(crate) fn new(name: &'static str, value: i64, journal: &Journal) -> Self {
        Self {
            name,
            description: "emits a constant",
            version: "1.0",
            value,
            journal: journal.clone(),
        }
    }

    pub(crate) fn with_info(mut self, description: &'static str, version: &'static str) -> Self {
        self.description = description;
        self.version = version;
        self
    }
}

impl Node for Constant {
    fn info(&self) -> NodeInfo {
        NodeInfo::new(self.name, self.description, self.version)
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::output::<i64>("out")]
    }

    fn process(&mut self, _: &Context, ports: &mut Ports) -> anyhow::Result<()> {
        self.journal.lock().unwrap().push(self.name.to_string());
        ports.set("out", self.value)?;
        Ok(())
    }

    fn cleanup(&mut self) {
        self.journal
            .lock()
            .unwrap()
            .push(format!("cleanup {}", self.name));
    }
}

/// Sums all of its inputs into `out`.
pub(crate) struct Add {
    name: &'static str,
    inputs: Vec<&'static str>,
    journal: Journal,
}

impl Add {
    pub(crate) fn new(name: &'static str, inputs: &[&'static str], journal: &Journal) -> Self {
        Self {
            name,
            inputs: inputs.to_vec(),
            journal: journal.clone(),
        }
    }
}

impl Node for Add {
    fn info(&self) -> NodeInfo {
        NodeInfo::new(self.name, "adds inputs", "1.0")
    }

    fn ports(&self) -> Vec<PortSpec> {
        let mut ports: Vec<_> = self
            .inputs
            .iter()
            .map(|name| PortSpec::input::<i64>(*name))
            .collect();
        ports.push(PortSpec::output::<i64>("out"));
        ports
    }

    fn process(&mut self, _: &Context, ports: &mut Ports) -> anyhow::Result<()> {
        self.journal.lock().unwrap().push(self.name.to_string());

        let mut sum = 0;
        for name in &self.inputs {
            sum += *ports.input::<i64>(name)?;
        }

        ports.set("out", sum)?;
        Ok(())
    }
}

/// Always fails.
pub(crate) struct Failing {
    name: &'static str,
}

impl Failing {
    pub(crate) fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl Node for Failing {
    fn info(&self) -> NodeInfo {
        NodeInfo::new(self.name, "fails", "1.0")
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::output::<i64>("out")]
    }

    fn process(&mut self, _: &Context, _: &mut Ports) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("{} on purpose", self.name))
    }
}

/// Declares an output but never writes it.
pub(crate) struct Silent;

impl Node for Silent {
    fn info(&self) -> NodeInfo {
        NodeInfo::new("silent", "never writes", "1.0")
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::output::<i64>("out")]
    }

    fn process(&mut self, _: &Context, _: &mut Ports) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes its output, then cancels the context it runs under.
pub(crate) struct Cancelling;

impl Node for Cancelling {
    fn info(&self) -> NodeInfo {
        NodeInfo::new("cancelling", "cancels the run", "1.0")
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::output::<i64>("out")]
    }

    fn process(&mut self, ctx: &Context, ports: &mut Ports) -> anyhow::Result<()> {
        ports.set("out", 0_i64)?;
        ctx.cancel();
        Ok(())
    }
}
