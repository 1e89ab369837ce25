//! Isolated execution context.
//!
//! The sandbox owns an immutable environment and serves `execute`
//! messages from a channel endpoint. Every fault is converted into a
//! structured `error` string — nothing that happens inside a fragment
//! can crash the host or the message loop. A transport fault, on the
//! other hand, is fatal to the loop: no further messages can arrive.

pub mod builtin;
pub mod env;
pub mod interp;
pub mod state;

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelEvent, ChannelHandle};
use crate::config::LimitsConfig;
use crate::protocol::{ExecutionResponse, WireMessage};
use env::SandboxEnvironment;
use interp::EvalError;

#[derive(Clone)]
pub struct Sandbox {
    env: Arc<SandboxEnvironment>,
    limits: LimitsConfig,
    /// Serializes evaluations: one fragment in flight at a time, later
    /// ones queue. Shared across clones so concurrent connections to the
    /// same environment cannot interleave capability state.
    eval_lock: Arc<Mutex<()>>,
}

impl Sandbox {
    pub fn new(env: Arc<SandboxEnvironment>, limits: LimitsConfig) -> Self {
        Self {
            env,
            limits,
            eval_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Message loop for one channel endpoint. Runs until the channel
    /// closes or faults.
    pub async fn serve(&self, mut events: mpsc::Receiver<ChannelEvent>, handle: ChannelHandle) {
        while let Some(event) = events.recv().await {
            match event {
                ChannelEvent::Message(WireMessage::Execute { code, id }) => {
                    let response = self.execute(id, code).await;
                    if handle.send(response.into_wire()).await.is_err() {
                        warn!("Channel closed before the response could be sent");
                        break;
                    }
                }
                ChannelEvent::Message(other) => {
                    // Protocol violation: not ours to answer, drop it
                    warn!("Unexpected message on sandbox side, dropped: {other:?}");
                }
                ChannelEvent::Fault(e) => {
                    error!("Transport fault, stopping message loop: {e}");
                    break;
                }
                ChannelEvent::Closed => {
                    info!("Channel closed, sandbox message loop done");
                    break;
                }
            }
        }
    }

    /// Evaluates one fragment and wraps the outcome into a correlated
    /// response. Never fails — faults become `error` strings.
    pub async fn execute(&self, id: Option<String>, code: String) -> ExecutionResponse {
        let _guard = self.eval_lock.lock().await;

        if code.len() > self.limits.max_code_bytes {
            return ExecutionResponse::failure(
                id,
                code,
                EvalError::TooLarge {
                    limit: self.limits.max_code_bytes,
                }
                .to_string(),
            );
        }

        debug!("Evaluating fragment ({} bytes)", code.len());
        match interp::evaluate(&code, &self.env).await {
            Ok(value) => ExecutionResponse::success(id, code, &value),
            Err(e) => {
                debug!("Evaluation fault: {e}");
                ExecutionResponse::failure(id, code, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::local;
    use crate::sandbox::builtin::register_defaults;
    use crate::sandbox::env::EnvironmentBuilder;
    use crate::sandbox::state::SharedState;

    fn test_sandbox() -> Sandbox {
        let state = Arc::new(SharedState::new());
        let env = register_defaults(EnvironmentBuilder::new(state)).build();
        Sandbox::new(Arc::new(env), LimitsConfig::default())
    }

    fn spawn_serving(sandbox: Sandbox) -> local::Endpoint {
        let (host_side, (events, handle)) = local::pair();
        tokio::spawn(async move { sandbox.serve(events, handle).await });
        host_side
    }

    async fn round_trip(code: &str) -> ExecutionResponse {
        let (mut events, handle) = spawn_serving(test_sandbox());
        handle
            .send(WireMessage::Execute {
                code: code.into(),
                id: Some("req-1".into()),
            })
            .await
            .unwrap();
        loop {
            match events.recv().await.expect("response expected") {
                ChannelEvent::Message(WireMessage::ExecutionResult {
                    id,
                    result,
                    error,
                    command,
                }) => return ExecutionResponse::from_wire(id, result, error, command),
                ChannelEvent::Message(other) => panic!("unexpected message: {other:?}"),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_successful_fragment_has_result_and_no_error() {
        let response = round_trip("1+1").await;
        assert!(response.is_success());
        assert_eq!(response.result, Some(serde_json::json!(2)));
        assert_eq!(response.error, None);
        assert_eq!(response.command, "1+1");
        assert_eq!(response.id.as_deref(), Some("req-1"));
    }

    #[tokio::test]
    async fn test_faulting_fragment_has_error_and_no_result() {
        let response = round_trip("throw 'boom'").await;
        assert!(!response.is_success());
        assert_eq!(response.error.as_deref(), Some("boom"));
        assert_eq!(response.result, None);
    }

    #[tokio::test]
    async fn test_syntax_fault_is_contained() {
        let response = round_trip("1 +").await;
        assert!(response.error.unwrap().contains("syntax error"));
    }

    #[tokio::test]
    async fn test_oversized_fragment_rejected() {
        let state = Arc::new(SharedState::new());
        let env = register_defaults(EnvironmentBuilder::new(state)).build();
        let sandbox = Sandbox::new(Arc::new(env), LimitsConfig { max_code_bytes: 8 });
        let response = sandbox.execute(None, "1 + 1 + 1 + 1".into()).await;
        assert!(response.error.unwrap().contains("exceeds 8 bytes"));
    }

    #[tokio::test]
    async fn test_state_persists_across_fragments() {
        let (mut events, handle) = spawn_serving(test_sandbox());

        for (i, code) in ["counter_add(5)", "counter_value()"].iter().enumerate() {
            handle
                .send(WireMessage::Execute {
                    code: (*code).into(),
                    id: Some(format!("req-{i}")),
                })
                .await
                .unwrap();
        }

        let mut results = Vec::new();
        while results.len() < 2 {
            if let ChannelEvent::Message(WireMessage::ExecutionResult { result, .. }) =
                events.recv().await.unwrap()
            {
                results.push(result);
            }
        }
        // The second fragment observes the first one's mutation
        assert_eq!(results[1], Some(serde_json::json!(5)));
    }

    #[tokio::test]
    async fn test_unexpected_message_is_dropped_and_loop_survives() {
        let (mut events, handle) = spawn_serving(test_sandbox());

        // A result message makes no sense on the sandbox side
        handle
            .send(WireMessage::ExecutionResult {
                id: None,
                result: None,
                error: Some("stray".into()),
                command: "x".into(),
            })
            .await
            .unwrap();
        handle
            .send(WireMessage::Execute {
                code: "2*3".into(),
                id: Some("req-1".into()),
            })
            .await
            .unwrap();

        loop {
            match events.recv().await.unwrap() {
                ChannelEvent::Message(WireMessage::ExecutionResult { result, .. }) => {
                    assert_eq!(result, Some(serde_json::json!(6)));
                    break;
                }
                _ => continue,
            }
        }
    }
}
