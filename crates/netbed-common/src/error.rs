//! Common error types for netbed.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`NetbedError`].
pub type NetbedResult<T> = Result<T, NetbedError>;

/// Coarse classification of a [`NetbedError`], reported alongside the entity name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or incomplete topology document.
    Config,
    /// A link or bridge names an undeclared host or bridge.
    Reference,
    /// The container runtime or the kernel refused or failed an operation.
    RuntimeResource,
    /// An operation ran before its dependencies reached the required state.
    State,
}

/// Errors across the netbed workspace.
#[derive(Error, Diagnostic, Debug)]
pub enum NetbedError {
    /// Malformed or incomplete topology document.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(netbed::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Invalid CIDR address.
    #[error("Invalid CIDR address '{value}' in {context}")]
    #[diagnostic(
        code(netbed::config::cidr),
        help("Addresses are written as address/prefix, e.g. '10.0.0.1/24'")
    )]
    InvalidCidr {
        /// The rejected value.
        value: String,
        /// Where the value appeared.
        context: String,
    },

    /// Invalid network device name.
    #[error("Invalid device name '{name}': {reason}")]
    #[diagnostic(
        code(netbed::config::device_name),
        help("Linux interface names are 1-15 bytes without '/' or whitespace")
    )]
    InvalidDeviceName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Reference to an undeclared host or bridge.
    #[error("{referrer} references undeclared {target_kind} '{target}'")]
    #[diagnostic(
        code(netbed::reference),
        help("Declare every host under network.hosts and every bridge under network.bridges")
    )]
    Reference {
        /// The link or bridge entry holding the reference.
        referrer: String,
        /// "host" or "bridge".
        target_kind: &'static str,
        /// The name that could not be resolved.
        target: String,
    },

    /// Container runtime or kernel call failed.
    #[error("{operation} failed for '{entity}': {message}")]
    #[diagnostic(code(netbed::runtime_resource))]
    RuntimeResource {
        /// The node, bridge, or link concerned.
        entity: String,
        /// The operation that failed.
        operation: String,
        /// The underlying failure.
        message: String,
    },

    /// An OS-level call exceeded its deadline.
    #[error("{operation} for '{entity}' timed out after {seconds}s")]
    #[diagnostic(
        code(netbed::timeout),
        help("Raise the deadline with --timeout if the host is slow")
    )]
    Timeout {
        /// The node, bridge, or link concerned.
        entity: String,
        /// The operation that timed out.
        operation: String,
        /// The deadline in seconds.
        seconds: u64,
    },

    /// Operation attempted in the wrong entity state.
    #[error("Invalid state for '{entity}': {message}")]
    #[diagnostic(code(netbed::state))]
    State {
        /// The entity concerned.
        entity: String,
        /// What was wrong.
        message: String,
    },

    /// Permission denied.
    #[error("Permission denied: {operation}")]
    #[diagnostic(
        code(netbed::permission_denied),
        help("Managing namespaces and network devices requires root (sudo)")
    )]
    PermissionDenied {
        /// The operation that was denied.
        operation: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(netbed::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(netbed::serialization))]
    Serialization(String),
}

impl NetbedError {
    /// Build a [`NetbedError::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Build a [`NetbedError::RuntimeResource`].
    pub fn runtime(
        entity: impl Into<String>,
        operation: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        Self::RuntimeResource {
            entity: entity.into(),
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Build a [`NetbedError::State`].
    pub fn state(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::State {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// The coarse kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. }
            | Self::InvalidCidr { .. }
            | Self::InvalidDeviceName { .. }
            | Self::Serialization(_) => ErrorKind::Config,
            Self::Reference { .. } => ErrorKind::Reference,
            Self::RuntimeResource { .. }
            | Self::Timeout { .. }
            | Self::PermissionDenied { .. }
            | Self::Io(_) => ErrorKind::RuntimeResource,
            Self::State { .. } => ErrorKind::State,
        }
    }

    /// The entity this error is about, when it concerns one.
    #[must_use]
    pub fn entity(&self) -> Option<&str> {
        match self {
            Self::RuntimeResource { entity, .. }
            | Self::Timeout { entity, .. }
            | Self::State { entity, .. } => Some(entity),
            Self::Reference { referrer, .. } => Some(referrer),
            Self::InvalidDeviceName { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Attribute a device-level failure to the entity that owns the device.
    ///
    /// The original subject moves into the operation text. Errors without an
    /// entity are wrapped as [`NetbedError::RuntimeResource`] so the caller
    /// can always tell which entity failed.
    #[must_use]
    pub fn within(self, owner: &str) -> Self {
        match self {
            Self::RuntimeResource {
                entity,
                operation,
                message,
            } if entity != owner => Self::RuntimeResource {
                entity: owner.to_string(),
                operation: format!("{operation} '{entity}'"),
                message,
            },
            Self::Timeout {
                entity,
                operation,
                seconds,
            } if entity != owner => Self::Timeout {
                entity: owner.to_string(),
                operation: format!("{operation} '{entity}'"),
                seconds,
            },
            Self::PermissionDenied { operation } => Self::RuntimeResource {
                entity: owner.to_string(),
                operation,
                message: "permission denied, run as root".to_string(),
            },
            Self::Io(err) => Self::runtime(owner, "io", err),
            other => other,
        }
    }
}

impl From<serde_json::Error> for NetbedError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for NetbedError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
