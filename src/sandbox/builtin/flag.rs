use async_trait::async_trait;

use crate::sandbox::env::{Capability, CapabilityContext};
use crate::sandbox::interp::Value;

/// Capability that raises the shared start flag.
///
/// Returns true if this call flipped the flag, false if a previous
/// fragment already raised it. The flip is atomic.
pub struct StartCapability;

#[async_trait]
impl Capability for StartCapability {
    fn name(&self) -> &str {
        "start"
    }

    fn description(&self) -> &str {
        "Raise the shared start flag; returns whether this call flipped it"
    }

    fn arity(&self) -> usize {
        0
    }

    async fn invoke(
        &self,
        _args: &[Value],
        context: &CapabilityContext,
    ) -> anyhow::Result<Value> {
        Ok(Value::Bool(context.state.start()))
    }
}

/// Capability that reads the shared start flag.
pub struct StartedCapability;

#[async_trait]
impl Capability for StartedCapability {
    fn name(&self) -> &str {
        "started"
    }

    fn description(&self) -> &str {
        "Read the shared start flag"
    }

    fn arity(&self) -> usize {
        0
    }

    async fn invoke(
        &self,
        _args: &[Value],
        context: &CapabilityContext,
    ) -> anyhow::Result<Value> {
        Ok(Value::Bool(context.state.is_started()))
    }
}
