use crate::config::Protocol;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Invalid label value for label {label}={value}")]
    InvalidTargetLabel { label: String, value: String },

    #[error(
        "Conflicting protocols on source port {source_port}: {existing} vs {conflicting}"
    )]
    ProtocolConflict {
        source_port: u16,
        existing: Protocol,
        conflicting: Protocol,
    },

    #[error("Shutdown already in progress")]
    ShutdownInProgress,
}

impl ControllerError {
    pub fn invalid_target_label(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidTargetLabel {
            label: label.into(),
            value: value.into(),
        }
    }

    pub fn protocol_conflict(source_port: u16, existing: Protocol, conflicting: Protocol) -> Self {
        Self::ProtocolConflict {
            source_port,
            existing,
            conflicting,
        }
    }
}
