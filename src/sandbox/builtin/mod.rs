//! Builtin capabilities.
//!
//! The deterministic capability set exposed by the default serve
//! configuration and by the offline harness: a shared counter, a start
//! flag, and a log sink. Which of them an environment carries is decided
//! once, at build time.

pub mod counter;
pub mod flag;
pub mod log;

use std::sync::Arc;

pub use counter::{CounterAddCapability, CounterValueCapability};
pub use flag::{StartCapability, StartedCapability};
pub use log::LogCapability;

use crate::config::CapabilitiesConfig;
use crate::sandbox::env::EnvironmentBuilder;

/// Registers every builtin capability. Used by tests and the offline
/// harness, where the full deterministic set is wanted.
pub fn register_defaults(builder: EnvironmentBuilder) -> EnvironmentBuilder {
    builder
        .register(Arc::new(CounterAddCapability))
        .register(Arc::new(CounterValueCapability))
        .register(Arc::new(StartCapability))
        .register(Arc::new(StartedCapability))
        .register(Arc::new(LogCapability))
}

/// Registers the builtins enabled in the configuration.
pub fn register_configured(
    mut builder: EnvironmentBuilder,
    config: &CapabilitiesConfig,
) -> EnvironmentBuilder {
    if config.counter {
        builder = builder
            .register(Arc::new(CounterAddCapability))
            .register(Arc::new(CounterValueCapability));
    }
    if config.start_flag {
        builder = builder
            .register(Arc::new(StartCapability))
            .register(Arc::new(StartedCapability));
    }
    if config.log {
        builder = builder.register(Arc::new(LogCapability));
    }
    builder
}
