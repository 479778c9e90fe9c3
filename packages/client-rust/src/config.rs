//! Client configuration.

use std::time::Duration;

/// Per-connection settings for request execution and inbound framing.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum time to wait for a response. `None` waits until the response
    /// arrives or the connection closes.
    pub request_timeout: Option<Duration>,
    /// Largest inbound frame accepted before the connection is considered
    /// broken.
    pub max_frame_len: usize,
    /// Raise `LdapError::UnexpectedResponse` when a response carries the
    /// wrong tag, instead of treating it as a no-op success.
    pub strict_response_tags: bool,
    /// First message identifier handed out by the correlator.
    pub initial_message_id: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            max_frame_len: 16 * 1024 * 1024, // 16 MiB
            strict_response_tags: false,
            initial_message_id: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.max_frame_len, 16_777_216);
        assert!(!config.strict_response_tags);
        assert_eq!(config.initial_message_id, 1);
    }

    #[test]
    fn struct_update_overrides_one_field() {
        let config = ClientConfig {
            strict_response_tags: true,
            ..ClientConfig::default()
        };
        assert!(config.strict_response_tags);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
    }
}
