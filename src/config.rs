use crate::error::ClientError;
use crate::presenter::PopupPolicy;
use crate::sync::{ReplyPolicy, SyncOptions};
use std::time::Duration;
use url::Url;

pub const DEFAULT_URL: &str = "ws://127.0.0.1:3000/ws";
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub url: String,
    pub debounce: Duration,
    pub reply_policy: ReplyPolicy,
    pub popup_policy: PopupPolicy,
    pub reply_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            debounce: Duration::ZERO,
            reply_policy: ReplyPolicy::LastMessageWins,
            popup_policy: PopupPolicy::FocusOnly,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            debounce: self.debounce,
            reply_policy: self.reply_policy,
        }
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        validate_url(&self.url).map(|_| ())
    }
}

/// Accepts only `ws://` and `wss://` endpoints with a host.
pub fn validate_url(raw: &str) -> Result<Url, ClientError> {
    let invalid = |reason: String| ClientError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_baseline_behaviour() {
        let config = ClientConfig::default();
        assert_eq!(config.url, DEFAULT_URL);
        assert_eq!(config.sync_options(), SyncOptions::default());
        assert_eq!(config.popup_policy, PopupPolicy::FocusOnly);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn accepts_ws_and_wss() {
        assert!(validate_url("ws://localhost:3000/ws").is_ok());
        assert!(validate_url("wss://search.example.com/ws").is_ok());
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        for raw in ["http://localhost:3000/ws", "localhost:3000", "", "ws://"] {
            assert!(
                matches!(validate_url(raw), Err(ClientError::InvalidUrl { .. })),
                "{raw} should be rejected"
            );
        }
    }
}
