//! Error types for registrar-policy.

use thiserror::Error;

use registrar_core::PolicyName;

/// Errors building a policy evaluation context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The policy declares a config schema but no config was supplied.
    #[error("policy {policy} requires a config")]
    MissingConfig { policy: PolicyName },

    /// A config was supplied for a configurationless policy.
    #[error("policy {policy} does not take a config")]
    UnexpectedConfig { policy: PolicyName },

    #[error("unknown policy '{0}'")]
    UnknownPolicy(String),
}
