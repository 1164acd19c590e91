use std::any::type_name;
use std::borrow::Cow;
use std::fmt::{Debug, Display};
use std::sync::{Arc, PoisonError, RwLock};

use crate::engine::Dynamic;
use crate::error::PortError;

/// Direction of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// Declaration of a single port, as returned by [`Node::ports`].
///
/// The type parameter only records a type name for diagnostics, values
/// flowing across connectors are not type-checked.
///
/// [`Node::ports`]: crate::Node::ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub name: Cow<'static, str>,
    pub direction: Direction,
    pub type_name: &'static str,
}

impl PortSpec {
    pub fn input<T: 'static>(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Input,
            type_name: type_name::<T>(),
        }
    }

    pub fn output<T: 'static>(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            direction: Direction::Output,
            type_name: type_name::<T>(),
        }
    }
}

#[derive(Default)]
struct Slot {
    value: Option<Dynamic>,
    fresh: bool,
}

/// A named, directed value slot.
///
/// `Port` is a cheap handle, clones refer to the same slot. The slot keeps
/// its last value across cycles, but only a value written during the current
/// cycle is *fresh*: [`get`](Port::get) returns fresh values only, while
/// [`last`](Port::last) also exposes the value left over from an earlier
/// cycle.
#[derive(Clone)]
pub struct Port {
    name: Arc<str>,
    direction: Direction,
    type_name: &'static str,
    slot: Arc<RwLock<Slot>>,
}

impl Port {
    pub(crate) fn from_spec(spec: &PortSpec) -> Self {
        Self {
            name: Arc::from(spec.name.as_ref()),
            direction: spec.direction,
            type_name: spec.type_name,
            slot: Arc::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the value produced in the current cycle, if any.
    pub fn get(&self) -> Option<Dynamic> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        match slot.fresh {
            true => slot.value.clone(),
            false => None,
        }
    }

    /// Returns the most recent value, even if it is stale.
    pub fn last(&self) -> Option<Dynamic> {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        slot.value.clone()
    }

    pub fn is_fresh(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .fresh
    }

    pub(crate) fn set(&self, value: Dynamic) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.value = Some(value);
        slot.fresh = true;
    }

    /// Keeps the value, but forgets that it belongs to the current cycle.
    pub(crate) fn mark_stale(&self) {
        self.slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .fresh = false;
    }

    pub(crate) fn same_slot(&self, other: &Port) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("fresh", &self.is_fresh())
            .finish()
    }
}

/// The view of its ports handed to a node while it processes.
pub struct Ports<'a> {
    inputs: &'a [Port],
    outputs: &'a [Port],
}

impl<'a> Ports<'a> {
    pub(crate) fn new(inputs: &'a [Port], outputs: &'a [Port]) -> Self {
        Self { inputs, outputs }
    }

    /// Reads the value delivered to an input port in the current cycle.
    pub fn input<T>(&self, name: &str) -> Result<Arc<T>, PortError>
    where
        T: Send + Sync + 'static,
    {
        let port = find(self.inputs, name)?;
        let value = port.get().ok_or_else(|| PortError::Empty(name.into()))?;
        downcast(name, value)
    }

    /// Reads the most recent value of an input port, fresh or not.
    pub fn last_input<T>(&self, name: &str) -> Result<Arc<T>, PortError>
    where
        T: Send + Sync + 'static,
    {
        let port = find(self.inputs, name)?;
        let value = port.last().ok_or_else(|| PortError::Empty(name.into()))?;
        downcast(name, value)
    }

    /// Writes the value of an output port for the current cycle.
    pub fn set<T>(&mut self, name: &str, value: T) -> Result<(), PortError>
    where
        T: Send + Sync + 'static,
    {
        let port = find(self.outputs, name)?;
        port.set(Arc::new(value));
        Ok(())
    }

    pub fn inputs(&self) -> &[Port] {
        self.inputs
    }

    pub fn outputs(&self) -> &[Port] {
        self.outputs
    }
}

fn find<'p>(ports: &'p [Port], name: &str) -> Result<&'p Port, PortError> {
    ports
        .iter()
        .find(|port| port.name() == name)
        .ok_or_else(|| PortError::NotFound(name.into()))
}

fn downcast<T>(name: &str, value: Dynamic) -> Result<Arc<T>, PortError>
where
    T: Send + Sync + 'static,
{
    value.downcast::<T>().map_err(|_| PortError::TypeMismatch {
        port: name.into(),
        expected: type_name::<T>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports() -> (Vec<Port>, Vec<Port>) {
        let inputs = vec![Port::from_spec(&PortSpec::input::<i64>("a"))];
        let outputs = vec![Port::from_spec(&PortSpec::output::<i64>("out"))];
        (inputs, outputs)
    }

    #[test]
    fn test_spec_records_type_name() {
        let spec = PortSpec::output::<Vec<u8>>("bytes");
        assert_eq!(spec.direction, Direction::Output);
        assert!(spec.type_name.contains("Vec<u8>"));
    }

    #[test]
    fn test_stale_value_is_hidden() {
        let port = Port::from_spec(&PortSpec::input::<i64>("a"));
        assert!(port.get().is_none());

        port.set(Arc::new(7_i64));
        assert!(port.is_fresh());
        assert!(port.get().is_some());

        port.mark_stale();
        assert!(port.get().is_none());
        let last = port.last().unwrap();
        assert_eq!(*last.downcast_ref::<i64>().unwrap(), 7);
    }

    #[test]
    fn test_clones_share_slot() {
        let port = Port::from_spec(&PortSpec::output::<i64>("out"));
        let clone = port.clone();
        clone.set(Arc::new(1_i64));
        assert!(port.is_fresh());
        assert!(port.same_slot(&clone));
    }

    #[test]
    fn test_ports_view() {
        let (inputs, outputs) = ports();
        let mut io = Ports::new(&inputs, &outputs);

        assert!(matches!(io.input::<i64>("a"), Err(PortError::Empty(_))));
        assert!(matches!(io.input::<i64>("b"), Err(PortError::NotFound(_))));

        inputs[0].set(Arc::new(20_i64));
        assert_eq!(*io.input::<i64>("a").unwrap(), 20);
        assert!(matches!(
            io.input::<String>("a"),
            Err(PortError::TypeMismatch { .. })
        ));

        io.set("out", 40_i64).unwrap();
        assert!(io.set("a", 1_i64).is_err());
        assert!(outputs[0].is_fresh());

        inputs[0].mark_stale();
        assert!(io.input::<i64>("a").is_err());
        assert_eq!(*io.last_input::<i64>("a").unwrap(), 20);
    }
}
