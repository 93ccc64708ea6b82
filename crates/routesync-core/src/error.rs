//! Error types for the route sync system
//!
//! Init-time kinds ([`Error::Config`], [`Error::Auth`], [`Error::Metadata`],
//! [`Error::Discovery`]) bubble up to the process entry point and terminate
//! the agent. Runtime kinds are confined to a single sync cycle: they are
//! logged and the next cycle is the retry.

use thiserror::Error;

/// Result type alias for route sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the route sync system
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors (unknown provider, malformed CIDR, bad interval)
    #[error("configuration error: {0}")]
    Config(String),

    /// Credential acquisition failed
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Instance metadata service unreachable or incomplete
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Local subnet/NIC/VNet could not be matched against the instance
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Transient cloud API failure (throttling, network glitch, stale read)
    #[error("cloud API error: {0}")]
    CloudApi(String),

    /// Route strings from the kernel that fail CIDR parsing
    #[error("parse error: {0}")]
    Parse(String),

    /// A long-running cloud operation did not complete in time
    #[error("operation timed out: {0}")]
    OpTimeout(String),

    /// Netlink or socket-level errors
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Create a metadata error
    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }

    /// Create a discovery error
    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::Discovery(msg.into())
    }

    /// Create a cloud API error
    pub fn cloud_api(msg: impl Into<String>) -> Self {
        Self::CloudApi(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create an operation timeout error
    pub fn op_timeout(msg: impl Into<String>) -> Self {
        Self::OpTimeout(msg.into())
    }

    /// Whether this error must terminate the reconciler rather than be
    /// retried on the next sync cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Auth(_) | Self::Metadata(_) | Self::Discovery(_)
        )
    }
}
