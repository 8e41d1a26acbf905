//! Errors surfaced to the user-facing layer.
//!
//! Ports and adapters speak `anyhow`; these types are what a user action
//! gets back.

use thiserror::Error;

use crate::domain::call::CallState;

/// Failure of a user action on the call controller.
#[derive(Debug, Error)]
pub enum CallError {
    /// Blank target id. Nothing was sent and the state did not change.
    #[error("target peer id must not be empty")]
    EmptyTarget,

    #[error("cannot place a call while {0}")]
    Busy(CallState),

    /// The signaling bus rejected a write; the call was reverted to idle.
    #[error("signaling bus write failed: {0}")]
    Bus(String),

    #[error(transparent)]
    Activation(#[from] ActivationError),

    #[error("call controller has shut down")]
    ControllerClosed,
}

/// Media session activation failure. Whatever was acquired has been released.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActivationError {
    #[error("failed to join room: {0}")]
    Join(String),

    #[error("failed to acquire local tracks: {0}")]
    AcquireTracks(String),

    #[error("failed to publish local tracks: {0}")]
    Publish(String),

    /// A leave arrived before activation finished.
    #[error("activation cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
