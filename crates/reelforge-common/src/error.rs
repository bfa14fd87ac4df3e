//! Error taxonomy shared by the prober, resolver, sessions and HTTP layer.
//!
//! Every failure the engine can surface funnels into [`Error`]. The HTTP layer
//! derives a status code from it via [`Error::http_status`].

use std::fmt;
use std::path::PathBuf;

/// Engine-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The inspection tool failed or produced unusable output.
    #[error("Probe failed for {locator}: {message}")]
    ProbeFailure {
        /// The file that was being probed.
        locator: String,
        /// Human-readable failure description.
        message: String,
    },

    /// The inspection tool succeeded but reported zero streams.
    #[error("No streams found in {0}")]
    NoStreamsFound(String),

    /// A stream index was requested that the file does not contain.
    #[error("Stream {index} not found in {locator}")]
    StreamNotFound {
        /// The probed file.
        locator: String,
        /// The missing stream index.
        index: u32,
    },

    /// The representation id is not a known preset or could not be decoded.
    #[error("Unknown representation: {0}")]
    UnknownRepresentation(String),

    /// The requested representation does not apply to this kind of stream.
    #[error("Unsupported stream type for {representation}: {stream_type}")]
    UnsupportedStreamType {
        /// The representation that was requested.
        representation: String,
        /// The type of the stream it was requested for.
        stream_type: String,
    },

    /// The encoder subprocess could not be launched.
    #[error("Failed to spawn {program}: {message}")]
    SpawnError {
        /// The binary that failed to launch.
        program: String,
        /// Human-readable failure description.
        message: String,
    },

    /// A segment did not become available within the wait window.
    #[error("Timed out waiting for segment {segment}")]
    SegmentTimeout {
        /// Client-visible segment index (or `init`).
        segment: String,
    },

    /// A listed segment vanished before it could be read.
    #[error("Segment {segment} not found")]
    SegmentNotFound {
        /// Client-visible segment index (or `init`).
        segment: String,
    },

    /// Listing or removing a session output directory failed.
    #[error("Directory access failed for {}: {source}", path.display())]
    DirectoryAccess {
        /// The directory that could not be accessed.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// An external tool returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::ProbeFailure { .. } => 404,
            Error::NoStreamsFound(_) => 404,
            Error::StreamNotFound { .. } => 404,
            Error::UnknownRepresentation(_) => 400,
            Error::UnsupportedStreamType { .. } => 400,
            Error::SpawnError { .. } => 500,
            Error::SegmentTimeout { .. } => 408,
            Error::SegmentNotFound { .. } => 404,
            Error::DirectoryAccess { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Validation(_) => 400,
            Error::Io(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ProbeFailure { .. } => "probe_failure",
            Error::NoStreamsFound(_) => "no_streams_found",
            Error::StreamNotFound { .. } => "stream_not_found",
            Error::UnknownRepresentation(_) => "unknown_representation",
            Error::UnsupportedStreamType { .. } => "unsupported_stream_type",
            Error::SpawnError { .. } => "spawn_error",
            Error::SegmentTimeout { .. } => "segment_timeout",
            Error::SegmentNotFound { .. } => "segment_not_found",
            Error::DirectoryAccess { .. } => "directory_access_error",
            Error::Tool { .. } => "tool_error",
            Error::Validation(_) => "validation_error",
            Error::Io(_) => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::ProbeFailure`].
    pub fn probe_failure(locator: impl fmt::Display, message: impl Into<String>) -> Self {
        Error::ProbeFailure {
            locator: locator.to_string(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::SpawnError`].
    pub fn spawn(program: impl Into<String>, message: impl Into<String>) -> Self {
        Error::SpawnError {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::DirectoryAccess`].
    pub fn directory(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::DirectoryAccess {
            path: path.into(),
            source,
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::UnsupportedStreamType`].
    pub fn unsupported_stream_type(
        representation: impl fmt::Display,
        stream_type: impl fmt::Display,
    ) -> Self {
        Error::UnsupportedStreamType {
            representation: representation.to_string(),
            stream_type: stream_type.to_string(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_failure_is_not_found() {
        let err = Error::probe_failure("movies/a.mkv", "exit status 1");
        assert_eq!(err.to_string(), "Probe failed for movies/a.mkv: exit status 1");
        assert_eq!(err.http_status(), 404);
        assert_eq!(err.code(), "probe_failure");
    }

    #[test]
    fn segment_timeout_is_request_timeout() {
        let err = Error::SegmentTimeout {
            segment: "12".into(),
        };
        assert_eq!(err.to_string(), "Timed out waiting for segment 12");
        assert_eq!(err.http_status(), 408);
    }

    #[test]
    fn unknown_representation_is_bad_request() {
        let err = Error::UnknownRepresentation("999p".into());
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn spawn_error_display() {
        let err = Error::spawn("ffmpeg", "No such file or directory");
        assert_eq!(
            err.to_string(),
            "Failed to spawn ffmpeg: No such file or directory"
        );
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn directory_access_display() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = Error::directory("/tmp/session-1", io);
        assert!(err.to_string().contains("/tmp/session-1"));
        assert_eq!(err.code(), "directory_access_error");
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.http_status(), 500);
    }
}
