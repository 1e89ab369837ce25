use async_trait::async_trait;
use tracing::info;

use crate::sandbox::env::{Capability, CapabilityContext};
use crate::sandbox::interp::Value;

/// Capability that writes a line to the sandbox log.
///
/// The only observable effect is the log record; the fragment gets null
/// back. Accepts any value and logs its display form.
pub struct LogCapability;

#[async_trait]
impl Capability for LogCapability {
    fn name(&self) -> &str {
        "log"
    }

    fn description(&self) -> &str {
        "Write a value to the sandbox log"
    }

    fn arity(&self) -> usize {
        1
    }

    async fn invoke(
        &self,
        args: &[Value],
        _context: &CapabilityContext,
    ) -> anyhow::Result<Value> {
        info!(target: "sandpipe::fragment", "{}", args[0]);
        Ok(Value::Null)
    }
}
