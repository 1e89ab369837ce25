use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::interp::Value;
use super::state::SharedState;

/// Invocation context passed to capability execution.
///
/// Carries the injected shared state so capabilities can scope their
/// side effects deliberately instead of reaching for ambient globals.
pub struct CapabilityContext {
    pub state: Arc<SharedState>,
}

/// A function deliberately exposed into the sandbox environment.
///
/// Evaluated fragments can only reach the host through capabilities.
/// An implementation that wants fire-and-forget asynchronous side effects
/// may spawn background work and return immediately — the evaluator awaits
/// `invoke` itself but never the work it spawns.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Identifier visible to fragments. Must be lowercase alphanumeric +
    /// underscores (e.g. "counter_add").
    fn name(&self) -> &str;

    /// Human-readable description, shown in startup logs.
    fn description(&self) -> &str;

    /// Number of arguments the capability accepts; checked before `invoke`.
    fn arity(&self) -> usize;

    /// Executes the capability. Errors become evaluation faults reported
    /// in the execution response, never a crash of either side.
    async fn invoke(&self, args: &[Value], context: &CapabilityContext)
        -> anyhow::Result<Value>;
}

/// Builder for the sandbox environment.
///
/// Registration only exists here: once `build()` runs, the environment is
/// immutable for the sandbox's lifetime — no request can add or remove
/// bindings.
pub struct EnvironmentBuilder {
    capabilities: HashMap<String, Arc<dyn Capability>>,
    constants: HashMap<String, Value>,
    state: Arc<SharedState>,
}

impl EnvironmentBuilder {
    pub fn new(state: Arc<SharedState>) -> Self {
        Self {
            capabilities: HashMap::new(),
            constants: HashMap::new(),
            state,
        }
    }

    /// Registers a capability. Re-registering a name replaces the
    /// previous entry (last wins).
    pub fn register(mut self, capability: Arc<dyn Capability>) -> Self {
        let name = capability.name().to_string();
        if self.capabilities.insert(name.clone(), capability).is_some() {
            debug!("capability {name} re-registered, previous entry replaced");
        }
        self
    }

    /// Exposes a named constant to fragments.
    pub fn constant(mut self, name: &str, value: Value) -> Self {
        self.constants.insert(name.to_string(), value);
        self
    }

    pub fn build(self) -> SandboxEnvironment {
        SandboxEnvironment {
            capabilities: self.capabilities,
            constants: self.constants,
            context: CapabilityContext { state: self.state },
        }
    }
}

/// The allow-listed symbol table fragments evaluate against.
///
/// Constructed once at sandbox startup, immutable afterwards.
pub struct SandboxEnvironment {
    capabilities: HashMap<String, Arc<dyn Capability>>,
    constants: HashMap<String, Value>,
    context: CapabilityContext,
}

impl SandboxEnvironment {
    pub fn capability(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn constant(&self, name: &str) -> Option<&Value> {
        self.constants.get(name)
    }

    pub fn context(&self) -> &CapabilityContext {
        &self.context
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Capability names in stable order, for startup logs.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.capabilities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
