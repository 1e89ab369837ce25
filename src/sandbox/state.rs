use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Mutable state shared between stateful capabilities.
///
/// This is the explicit injected state object behind the sandbox
/// environment — capabilities receive it through their invocation context,
/// never through process-wide globals. Each accessor is individually
/// atomic; the sandbox offers no transactional guarantee across calls.
#[derive(Debug, Default)]
pub struct SharedState {
    counter: AtomicI64,
    started: AtomicBool,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` to the counter and returns the new total.
    pub fn counter_add(&self, delta: i64) -> i64 {
        self.counter.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn counter_value(&self) -> i64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Raises the start flag. Returns true if this call flipped it,
    /// false if it was already raised.
    pub fn start(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}
