//! Gateway error taxonomy.
//!
//! Classifies failures by blast radius: transport and decode errors
//! are fatal to the session that produced them, broker errors are
//! logged and survived. No error crosses a session or message
//! boundary.

/// An error raised while bridging one client to the broker.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    /// Read, write, or upgrade failure on the client connection.
    /// Fatal to the affected session only.
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection produced no inbound message within the idle
    /// window. Fatal to the affected session only.
    #[error("idle timeout")]
    IdleTimeout,

    /// Malformed inbound message. Fatal to the session (strict
    /// policy: malformed input is not skipped).
    #[error("decode error: {0}")]
    Decode(String),

    /// Broker publish or consume failure. Recoverable: the session
    /// survives and the client may resubmit.
    #[error("broker error: {0}")]
    Broker(String),
}

impl GatewayError {
    /// Whether this error must terminate the session that raised it.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::IdleTimeout | Self::Decode(_)
        )
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::IdleTimeout => "idle_timeout",
            Self::Decode(_) => "decode",
            Self::Broker(_) => "broker",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_is_session_fatal() {
        assert!(GatewayError::Transport("reset".into()).is_session_fatal());
    }

    #[test]
    fn idle_timeout_is_session_fatal() {
        assert!(GatewayError::IdleTimeout.is_session_fatal());
    }

    #[test]
    fn decode_is_session_fatal() {
        assert!(GatewayError::Decode("bad json".into()).is_session_fatal());
    }

    #[test]
    fn broker_is_recoverable() {
        assert!(!GatewayError::Broker("unreachable".into()).is_session_fatal());
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(GatewayError::Transport("x".into()).error_kind(), "transport");
        assert_eq!(GatewayError::IdleTimeout.error_kind(), "idle_timeout");
        assert_eq!(GatewayError::Decode("x".into()).error_kind(), "decode");
        assert_eq!(GatewayError::Broker("x".into()).error_kind(), "broker");
    }

    #[test]
    fn display_includes_detail() {
        let e = GatewayError::Broker("connection refused".into());
        assert!(e.to_string().contains("connection refused"));
    }
}
