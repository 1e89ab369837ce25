//! Host-side request dispatch.
//!
//! The dispatcher owns the set of pending requests, keyed by correlation
//! id. A background task drains channel events and resolves waiters as
//! responses arrive — in whatever order the sandbox finishes them. When
//! the channel faults or closes, every pending waiter resolves with a
//! channel-failure error exactly once; nothing is left hanging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::channel::{ChannelEvent, ChannelHandle};
use crate::error::{Error, Result};
use crate::protocol::{ExecutionRequest, ExecutionResponse, WireMessage};

type Waiter = oneshot::Sender<Result<ExecutionResponse>>;
type Waiters = Arc<Mutex<HashMap<String, Waiter>>>;

pub struct Dispatcher {
    handle: ChannelHandle,
    waiters: Waiters,
    /// Raised once the receive loop has terminated: no response can
    /// arrive anymore, so new submissions must fail fast.
    dead: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Takes ownership of a channel endpoint and spawns the receive loop.
    pub fn start(events: mpsc::Receiver<ChannelEvent>, handle: ChannelHandle) -> Self {
        let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));
        let dead = Arc::new(AtomicBool::new(false));

        tokio::spawn(receive_loop(events, waiters.clone(), dead.clone()));

        Self {
            handle,
            waiters,
            dead,
        }
    }

    /// Submits a fragment and suspends until its response arrives.
    ///
    /// A failed evaluation is a normal outcome — it resolves `Ok` with
    /// `error` populated. `Err` means the channel itself failed.
    pub async fn execute(&self, code: &str) -> Result<ExecutionResponse> {
        let (_id, rx) = self.submit(code).await?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Like [`execute`](Self::execute) with a local deadline. On expiry
    /// the waiter is deregistered; a response that still shows up later
    /// is discarded by the receive loop, not delivered.
    pub async fn execute_with_timeout(
        &self,
        code: &str,
        deadline: Duration,
    ) -> Result<ExecutionResponse> {
        let (id, rx) = self.submit(code).await?;
        match tokio::time::timeout(deadline, rx).await {
            Ok(response) => response.map_err(|_| Error::ChannelClosed)?,
            Err(_) => {
                self.waiters.lock().unwrap().remove(&id);
                Err(Error::Timeout {
                    duration_secs: deadline.as_secs(),
                })
            }
        }
    }

    /// Registers the waiter and sends the request.
    async fn submit(
        &self,
        code: &str,
    ) -> Result<(String, oneshot::Receiver<Result<ExecutionResponse>>)> {
        if self.dead.load(Ordering::SeqCst) || self.handle.is_closed() {
            return Err(Error::ChannelClosed);
        }

        let request = ExecutionRequest::new(code);
        let id = request.id.clone();
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().unwrap().insert(id.clone(), tx);

        // Registered after the loop died: nobody will resolve us, bail out
        if self.dead.load(Ordering::SeqCst) {
            self.waiters.lock().unwrap().remove(&id);
            return Err(Error::ChannelClosed);
        }

        if let Err(e) = self.handle.send(request.into_wire()).await {
            self.waiters.lock().unwrap().remove(&id);
            return Err(e);
        }
        Ok((id, rx))
    }

    pub fn close(&self) {
        self.handle.close();
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed() || self.dead.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        self.waiters.lock().unwrap().len()
    }
}

async fn receive_loop(
    mut events: mpsc::Receiver<ChannelEvent>,
    waiters: Waiters,
    dead: Arc<AtomicBool>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ChannelEvent::Message(WireMessage::ExecutionResult {
                id,
                result,
                error,
                command,
            }) => {
                let response = ExecutionResponse::from_wire(id, result, error, command);
                let key = response.correlation_key().to_string();
                let waiter = waiters.lock().unwrap().remove(&key);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(Ok(response));
                    }
                    // Late (timed-out) or never-asked-for: discard
                    None => warn!("No pending request for response {key}, discarding"),
                }
            }
            ChannelEvent::Message(other) => {
                warn!("Unexpected message on host side, dropped: {other:?}");
            }
            ChannelEvent::Fault(message) => {
                error!("Transport fault: {message}");
                fail_all(&waiters, &dead, || Error::Transport {
                    message: message.clone(),
                });
                break;
            }
            ChannelEvent::Closed => {
                info!("Channel closed");
                break;
            }
        }
    }
    fail_all(&waiters, &dead, || Error::ChannelClosed);
}

/// Resolves every pending waiter with a channel-failure error.
///
/// Marks the dispatcher dead *before* draining, so a submission racing
/// with shutdown either lands in the drained map or sees the flag.
fn fail_all(waiters: &Waiters, dead: &AtomicBool, make_error: impl Fn() -> Error) {
    dead.store(true, Ordering::SeqCst);
    let drained: Vec<(String, Waiter)> = waiters.lock().unwrap().drain().collect();
    if !drained.is_empty() {
        warn!("Resolving {} pending request(s) with a channel failure", drained.len());
    }
    for (_, tx) in drained {
        let _ = tx.send(Err(make_error()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::local;
    use crate::config::LimitsConfig;
    use crate::sandbox::builtin::register_defaults;
    use crate::sandbox::env::EnvironmentBuilder;
    use crate::sandbox::state::SharedState;
    use crate::sandbox::Sandbox;

    /// Dispatcher wired to a real sandbox over the in-process transport.
    fn dispatcher_with_sandbox() -> Dispatcher {
        let ((host_events, host_handle), (sandbox_events, sandbox_handle)) = local::pair();
        let state = Arc::new(SharedState::new());
        let env = register_defaults(EnvironmentBuilder::new(state)).build();
        let sandbox = Sandbox::new(Arc::new(env), LimitsConfig::default());
        tokio::spawn(async move { sandbox.serve(sandbox_events, sandbox_handle).await });
        Dispatcher::start(host_events, host_handle)
    }

    #[tokio::test]
    async fn test_execute_returns_the_computed_result() {
        let dispatcher = dispatcher_with_sandbox();
        let response = dispatcher.execute("1+1").await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.result, Some(serde_json::json!(2)));
        assert_eq!(response.command, "1+1");
    }

    #[tokio::test]
    async fn test_failed_evaluation_is_a_normal_outcome() {
        let dispatcher = dispatcher_with_sandbox();
        let response = dispatcher.execute("throw 'boom'").await.unwrap();
        assert!(!response.is_success());
        assert_eq!(response.error.as_deref(), Some("boom"));
        assert_eq!(response.result, None);
    }

    #[tokio::test]
    async fn test_capability_mutation_visible_to_later_fragment() {
        let dispatcher = dispatcher_with_sandbox();
        dispatcher.execute("counter_add(3)").await.unwrap();
        let response = dispatcher.execute("counter_value()").await.unwrap();
        assert_eq!(response.result, Some(serde_json::json!(3)));
    }

    #[tokio::test]
    async fn test_out_of_order_responses_resolve_their_own_requests() {
        let ((host_events, host_handle), (mut sandbox_events, sandbox_handle)) = local::pair();

        // Fake sandbox: buffers both requests, answers in reverse order
        tokio::spawn(async move {
            let mut pending = Vec::new();
            while pending.len() < 2 {
                if let Some(ChannelEvent::Message(WireMessage::Execute { code, id })) =
                    sandbox_events.recv().await
                {
                    pending.push((id, code));
                }
            }
            for (id, code) in pending.into_iter().rev() {
                let response = ExecutionResponse::success(
                    id,
                    code.clone(),
                    &crate::sandbox::interp::Value::Str(format!("answer to {code}")),
                );
                sandbox_handle.send(response.into_wire()).await.unwrap();
            }
        });

        let dispatcher = Arc::new(Dispatcher::start(host_events, host_handle));
        let (first, second) =
            tokio::join!(dispatcher.execute("code1"), dispatcher.execute("code2"));

        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(first.command, "code1");
        assert_eq!(first.result, Some(serde_json::json!("answer to code1")));
        assert_eq!(second.command, "code2");
        assert_eq!(second.result, Some(serde_json::json!("answer to code2")));
    }

    #[tokio::test]
    async fn test_close_resolves_every_pending_request_exactly_once() {
        // Sandbox side that never answers
        let ((host_events, host_handle), (_mute_events, _mute_handle)) = local::pair();
        let dispatcher = Arc::new(Dispatcher::start(host_events, host_handle));

        let mut tasks = Vec::new();
        for i in 0..3 {
            let dispatcher = dispatcher.clone();
            tasks.push(tokio::spawn(async move {
                dispatcher.execute(&format!("{i}+{i}")).await
            }));
        }

        // Let the requests register before pulling the plug
        while dispatcher.pending() < 3 {
            tokio::task::yield_now().await;
        }
        dispatcher.close();

        for task in tasks {
            let outcome = task.await.unwrap();
            assert!(outcome.unwrap_err().is_channel_fault());
        }
        assert_eq!(dispatcher.pending(), 0);
    }

    #[tokio::test]
    async fn test_execute_after_close_fails_fast() {
        let dispatcher = dispatcher_with_sandbox();
        dispatcher.close();
        assert!(dispatcher.is_closed());
        let err = dispatcher.execute("1+1").await.unwrap_err();
        assert!(matches!(err, Error::ChannelClosed));
    }

    #[tokio::test]
    async fn test_timeout_discards_the_late_response() {
        let ((host_events, host_handle), (mut sandbox_events, sandbox_handle)) = local::pair();

        // Fake sandbox that answers only when poked, so the first request
        // can time out deterministically
        let (poke_tx, mut poke_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            while let Some(ChannelEvent::Message(WireMessage::Execute { code, id })) =
                sandbox_events.recv().await
            {
                if code == "slow" {
                    poke_rx.recv().await;
                }
                let response = ExecutionResponse::success(
                    id,
                    code,
                    &crate::sandbox::interp::Value::Int(1),
                );
                if sandbox_handle.send(response.into_wire()).await.is_err() {
                    break;
                }
            }
        });

        let dispatcher = Dispatcher::start(host_events, host_handle);

        let err = dispatcher
            .execute_with_timeout("slow", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(dispatcher.pending(), 0);

        // Release the late response; the loop discards it and the
        // dispatcher keeps serving new requests
        poke_tx.send(()).await.unwrap();
        let response = dispatcher.execute("fast").await.unwrap();
        assert!(response.is_success());
    }
}
