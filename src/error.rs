//! Error types for the bridge.

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },
}

/// Errors produced by channel adapters.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel's event stream has ended. Not a failure in itself:
    /// `receive` returns this after a clean shutdown has drained the inbox.
    #[error("channel stream closed")]
    Closed,

    /// The remote service rejected an operation with a described error.
    /// The relay treats this as the event's fatal error.
    #[error("{service} API error: {description}")]
    Api { service: String, description: String },

    #[error("failed to send to {name} on {service}: {reason}")]
    SendFailed {
        name: String,
        service: String,
        reason: String,
    },

    #[error("invalid channel identifier: {0}")]
    InvalidIdentifier(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by the bridge itself.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The bridge has already been closed.
    #[error("bridge is closed")]
    Closed,

    /// A polling task failed to receive from a bridged channel.
    /// Only the first such error is reported; it is returned from `close`.
    #[error("failed to receive from {name} on {service}: {source}")]
    Poll {
        name: String,
        service: String,
        #[source]
        source: ChannelError,
    },

    /// Relaying an event to the sibling channels failed.
    #[error("relay failed: {source}")]
    Relay {
        #[source]
        source: ChannelError,
    },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_invalid_value_display() {
        let err = ConfigError::InvalidValue {
            key: "max_history".to_string(),
            message: "must be positive".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("max_history"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_channel_error_api_display() {
        let err = ChannelError::Api {
            service: "Telegram".to_string(),
            description: "Bad Request: message not found".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Telegram"));
        assert!(msg.contains("message not found"));
    }

    #[test]
    fn test_channel_error_send_failed_display() {
        let err = ChannelError::SendFailed {
            name: "general".to_string(),
            service: "Telegram".to_string(),
            reason: "rate limited".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("general"));
        assert!(msg.contains("rate limited"));
    }

    #[test]
    fn test_bridge_error_poll_display() {
        let err = BridgeError::Poll {
            name: "general".to_string(),
            service: "Telegram".to_string(),
            source: ChannelError::Closed,
        };
        let msg = err.to_string();
        assert!(msg.contains("general"));
        assert!(msg.contains("Telegram"));
    }

    #[test]
    fn test_error_from_channel_error() {
        let err = Error::from(ChannelError::Closed);
        assert!(err.to_string().contains("Channel error"));
    }

    #[test]
    fn test_error_from_bridge_error() {
        let err = Error::from(BridgeError::Closed);
        assert!(err.to_string().contains("Bridge error"));
    }
}
