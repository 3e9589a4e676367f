use crate::connection::ConnectionState;
use thiserror::Error;

/// Longest payload excerpt kept inside a [`ClientError::MalformedMessage`].
const PAYLOAD_EXCERPT_CHARS: usize = 120;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The channel could not be opened or dropped unexpectedly.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("not connected (connection is {state})")]
    NotConnected { state: ConnectionState },

    /// An inbound payload that is not a `{"data": [...]}` reply.
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String, payload: String },

    #[error("failed to encode outbound message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ClientError {
    pub(crate) fn malformed(reason: impl Into<String>, payload: &str) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
            payload: excerpt(payload),
        }
    }
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= PAYLOAD_EXCERPT_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(PAYLOAD_EXCERPT_CHARS - 3).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_keeps_short_payload_verbatim() {
        let err = ClientError::malformed("missing field `data`", r#"{"dat":[]}"#);
        match err {
            ClientError::MalformedMessage { payload, .. } => assert_eq!(payload, r#"{"dat":[]}"#),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn malformed_truncates_long_payload() {
        let body = "x".repeat(500);
        let ClientError::MalformedMessage { payload, .. } = ClientError::malformed("bad", &body)
        else {
            panic!("expected malformed message");
        };
        assert_eq!(payload.chars().count(), PAYLOAD_EXCERPT_CHARS);
        assert!(payload.ends_with("..."));
    }

    #[test]
    fn not_connected_names_the_state() {
        let err = ClientError::NotConnected {
            state: ConnectionState::Connecting,
        };
        assert_eq!(err.to_string(), "not connected (connection is connecting)");
    }
}
