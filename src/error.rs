//! Engine errors

use crate::graph::PatchError;

/// Errors surfaced by the engine's fallible operations
#[derive(Debug)]
pub enum EngineError {
    /// `start` was called without a successfully acquired output device
    NoContext,
    /// The output device could not be opened or resumed
    Device(String),
    Patch(PatchError),
    /// Malformed parameters or configuration
    Params(String),
    Io(std::io::Error),
    /// A take could not be written as WAV
    Encode(hound::Error),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NoContext => write!(f, "No audio context; call init_context first"),
            EngineError::Device(msg) => write!(f, "Audio device error: {}", msg),
            EngineError::Patch(e) => write!(f, "Patch error: {}", e),
            EngineError::Params(msg) => write!(f, "Invalid parameters: {}", msg),
            EngineError::Io(e) => write!(f, "I/O error: {}", e),
            EngineError::Encode(e) => write!(f, "WAV encoding error: {}", e),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Patch(e) => Some(e),
            EngineError::Io(e) => Some(e),
            EngineError::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PatchError> for EngineError {
    fn from(e: PatchError) -> Self {
        EngineError::Patch(e)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e)
    }
}

impl From<hound::Error> for EngineError {
    fn from(e: hound::Error) -> Self {
        EngineError::Encode(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display_and_source() {
        let err: EngineError = PatchError::NotCompiled.into();
        assert!(err.to_string().starts_with("Patch error"));
        assert!(err.source().is_some());

        let err = EngineError::Device("no output".into());
        assert_eq!(err.to_string(), "Audio device error: no output");
        assert!(err.source().is_none());
    }
}
