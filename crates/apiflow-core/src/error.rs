//! Compile and run error types.

use thiserror::Error;

/// Errors raised while compiling a definition into a flow program.
///
/// Compile errors are fatal: a definition that fails to compile never runs.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A check/assert expression did not split into `left op right`.
    #[error("invalid check format: {0:?}")]
    InvalidCheckFormat(String),

    /// A check/assert expression used an operator outside the registry.
    #[error("unknown operator: {0:?}")]
    UnknownOperator(String),

    /// A count loop header was neither an integer nor `<number><unit>`.
    #[error("invalid loop count: {0:?}")]
    InvalidLoopCount(String),

    /// A test definition declared both `steps` and `stages`.
    #[error("definition {0:?} declares both steps and stages")]
    AmbiguousBody(String),

    /// A call targeted an alias with no matching import.
    #[error("unknown call target: {0:?}")]
    UnknownTarget(String),
}

/// Errors raised while a compiled flow is running.
#[derive(Debug, Error)]
pub enum RunError {
    /// An assert expression evaluated false.
    #[error("assertion failed: {0}")]
    AssertFailed(String),

    /// The transport failed to perform a call.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A stage body failed; the stage id is named.
    #[error("stage {0:?} failed: {1}")]
    StageFailed(String, String),

    /// A call targeted an alias missing from the compiled import table.
    #[error("unknown call target: {0:?}")]
    UnknownTarget(String),
}

/// Errors raised by a transport performing a call.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent or the response not read.
    #[error("request failed: {0}")]
    Request(String),

    /// The declared protocol is not supported by this transport.
    #[error("unsupported protocol: {0:?}")]
    UnsupportedProtocol(String),

    /// The request template was malformed (bad url or method).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_names_offender() {
        let err = CompileError::InvalidCheckFormat("a ==".to_string());
        assert_eq!(err.to_string(), "invalid check format: \"a ==\"");

        let err = CompileError::UnknownOperator("=%".to_string());
        assert!(err.to_string().contains("=%"));
    }

    #[test]
    fn test_run_error_from_transport() {
        let err: RunError = TransportError::Request("timeout".to_string()).into();
        assert!(matches!(err, RunError::Transport(_)));
    }
}
