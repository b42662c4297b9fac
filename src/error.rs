use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the extension pipeline.
///
/// Configuration errors abort the run. Alignment-record errors are contained
/// to the offending record, tool errors to the offending contig.
#[derive(Debug, Error)]
pub enum ExtendError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed alignment: {0}")]
    MalformedAlignment(String),

    #[error("{tool} failed ({status}): {stderr}")]
    ExternalTool {
        tool: String,
        status: String,
        stderr: String,
    },
}

impl ExtendError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExtendError::Io {
            path: path.into(),
            source,
        }
    }
}
