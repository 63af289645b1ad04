//! Bus error taxonomy.
//!
//! `Transport` covers connection-scoped I/O trouble and is always retryable;
//! it never takes down more than the session that hit it. `ProtocolViolation`
//! is a caller mistake (malformed filter, wildcard in a publish topic) and is
//! rejected at the call site, before any state changes.

#[derive(Debug, Clone, PartialEq)]
pub enum BusError {
    Transport(String),
    ProtocolViolation(String),
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusError::Transport(msg) => write!(f, "transport error: {}", msg),
            BusError::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for BusError {}

impl From<std::io::Error> for BusError {
    fn from(error: std::io::Error) -> Self {
        BusError::Transport(error.to_string())
    }
}
