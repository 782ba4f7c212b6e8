use crate::protocol::CommandKind;
use thiserror::Error;

/// Raw-command admission outcome reported back to the ingress caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("command queue full")]
    QueueFull,
    #[error("invalid speed {speed} for {kind:?}")]
    InvalidSpeed { kind: CommandKind, speed: u32 },
    #[error("controller is shut down")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} capacity must be non-zero")]
    ZeroCapacity(&'static str),
    #[error("{0} interval must be non-zero")]
    ZeroInterval(&'static str),
    #[error("auto stop timeout ({auto_stop_ms} ms) must be below heartbeat timeout ({heartbeat_ms} ms)")]
    TimeoutOrder { auto_stop_ms: u64, heartbeat_ms: u64 },
    #[error("config parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("controller task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid JSON format")]
    InvalidJson,
    #[error("message exceeds buffer size")]
    MessageTooLarge,
    #[error("serialization failed")]
    SerializationError,
}
