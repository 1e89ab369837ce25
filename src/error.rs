use thiserror::Error;

/// Channel-level error taxonomy.
///
/// Evaluation faults are not here — they travel inside execution
/// responses as `error` strings and never escape the sandbox boundary
/// any other way (see `sandbox::interp::EvalError`).
#[derive(Error, Debug)]
pub enum Error {
    /// The channel was closed (gracefully or by the peer). Pending
    /// requests resolve with this exactly once each.
    #[error("channel closed")]
    ChannelClosed,

    /// The transport itself failed — broken pipe, I/O fault. Distinct
    /// from a sandboxed evaluation error.
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// A frame arrived that cannot be parsed into a wire message.
    /// Non-fatal: the frame is logged and dropped.
    #[error("malformed message: {reason}")]
    Protocol { reason: String },

    /// A dispatcher-local deadline expired. The late response, if it
    /// ever arrives, is discarded.
    #[error("request timed out after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    #[error("configuration error: {message}")]
    Config { message: String },
}

impl Error {
    /// True for both channel-fault flavors (closure and transport failure).
    pub fn is_channel_fault(&self) -> bool {
        matches!(self, Self::ChannelClosed | Self::Transport { .. })
    }

    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_fault_classification() {
        assert!(Error::ChannelClosed.is_channel_fault());
        assert!(Error::Transport {
            message: "broken pipe".into()
        }
        .is_channel_fault());
        assert!(!Error::Timeout { duration_secs: 5 }.is_channel_fault());
    }

    #[test]
    fn test_display() {
        let err = Error::Transport {
            message: "connection reset".into(),
        };
        assert_eq!(err.to_string(), "transport failure: connection reset");
        assert_eq!(
            Error::Timeout { duration_secs: 30 }.to_string(),
            "request timed out after 30s"
        );
    }
}
