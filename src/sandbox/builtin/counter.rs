use async_trait::async_trait;

use crate::sandbox::env::{Capability, CapabilityContext};
use crate::sandbox::interp::Value;

/// Capability that adds a delta to the shared counter.
///
/// Returns the new total. The counter lives in the injected shared state,
/// so the mutation is visible to every later fragment.
pub struct CounterAddCapability;

#[async_trait]
impl Capability for CounterAddCapability {
    fn name(&self) -> &str {
        "counter_add"
    }

    fn description(&self) -> &str {
        "Add an integer delta to the shared counter and return the new total"
    }

    fn arity(&self) -> usize {
        1
    }

    async fn invoke(
        &self,
        args: &[Value],
        context: &CapabilityContext,
    ) -> anyhow::Result<Value> {
        let delta = match &args[0] {
            Value::Int(i) => *i,
            other => anyhow::bail!("expected an int delta, got {}", other.type_name()),
        };
        Ok(Value::Int(context.state.counter_add(delta)))
    }
}

/// Capability that reads the shared counter.
pub struct CounterValueCapability;

#[async_trait]
impl Capability for CounterValueCapability {
    fn name(&self) -> &str {
        "counter_value"
    }

    fn description(&self) -> &str {
        "Read the current value of the shared counter"
    }

    fn arity(&self) -> usize {
        0
    }

    async fn invoke(
        &self,
        _args: &[Value],
        context: &CapabilityContext,
    ) -> anyhow::Result<Value> {
        Ok(Value::Int(context.state.counter_value()))
    }
}
