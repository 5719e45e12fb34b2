//! Error taxonomy for the analysis pipeline.
//!
//! Per-file failures are absorbed and recorded with retry metadata; per-job
//! failures surface through [`AnalysisError`] with a stable `kind()` tag that
//! travels on the wire.

use thiserror::Error;

use crate::ids::{JobId, ProjectId};

/// Malformed frame on a language-server stream.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length value: {0}")]
    InvalidContentLength(String),
    #[error("frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },
    #[error("unexpected EOF while reading frame headers")]
    EofInHeaders,
    #[error("malformed JSON-RPC body: {0}")]
    MalformedBody(#[from] serde_json::Error),
}

/// Subprocess or stream failure on a language-server session.
///
/// A transport error terminates every outstanding call on that session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("language server stream closed")]
    StreamClosed,
    #[error("language server request timed out")]
    Timeout,
    #[error("failed to spawn language server `{command}`: {message}")]
    Spawn { command: String, message: String },
    #[error("language server returned an error: {0}")]
    Rpc(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Job-level failures surfaced to callers and subscribers.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("no language server available for {language}")]
    SessionUnavailable { language: String },
    #[error("failed to process {path}: {message}")]
    FileProcessing { path: String, message: String },
    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),
    #[error("project path not found: {0}")]
    ProjectPathMissing(String),
    #[error("job {0} not found")]
    JobNotFound(JobId),
    #[error("unknown analyzer type: {0}")]
    UnknownAnalyzer(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("analysis failed: {0}")]
    Fatal(String),
}

impl AnalysisError {
    /// Stable error-kind tag included in user-visible failure payloads.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionUnavailable { .. } => "SessionUnavailableError",
            Self::FileProcessing { .. } => "FileProcessingError",
            Self::ProjectNotFound(_) | Self::ProjectPathMissing(_) => "ProjectValidationError",
            Self::JobNotFound(_) => "JobNotFoundError",
            Self::UnknownAnalyzer(_) => "UnknownAnalyzerError",
            Self::Transport(TransportError::Protocol(_)) => "ProtocolError",
            Self::Transport(_) => "TransportError",
            Self::Fatal(_) => "AnalysisError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        let err = AnalysisError::SessionUnavailable {
            language: "python".to_string(),
        };
        assert_eq!(err.kind(), "SessionUnavailableError");

        let err = AnalysisError::ProjectPathMissing("/missing".to_string());
        assert_eq!(err.kind(), "ProjectValidationError");

        let err = AnalysisError::Transport(TransportError::StreamClosed);
        assert_eq!(err.kind(), "TransportError");

        let err = AnalysisError::Transport(TransportError::Protocol(
            ProtocolError::MissingContentLength,
        ));
        assert_eq!(err.kind(), "ProtocolError");
    }

    #[test]
    fn messages_name_the_subject() {
        let id = JobId::new();
        let err = AnalysisError::JobNotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }
}
