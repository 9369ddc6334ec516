use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Unable to construct stream: {0}")]
    Construction(String),
    #[error("Stream is detached")]
    Detached,
    #[error("Stream is not readable")]
    NotReadable,
    #[error("Stream is not writable")]
    NotWritable,
    #[error("Stream is not seekable")]
    NotSeekable,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Uploaded file has already been moved")]
    AlreadyMoved,
    #[error("No stream is available for the uploaded file")]
    NoStream,
    #[error("Not a received upload: {0}")]
    NotUploaded(String),
    #[error("Unable to move upload to {target}: {source}")]
    MoveFailed {
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StreamError {
    /// Errors caused by a bad argument rather than by the state of the
    /// stream or upload.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::MoveFailed { .. } | Self::Construction(_))
    }
}

impl From<StreamError> for std::io::Error {
    fn from(value: StreamError) -> Self {
        use std::io::ErrorKind;

        let kind = match value {
            StreamError::Io(err) => return err,
            StreamError::Detached => ErrorKind::NotConnected,
            StreamError::NotReadable
            | StreamError::NotWritable
            | StreamError::NotSeekable => ErrorKind::Unsupported,
            StreamError::Construction(_) | StreamError::MoveFailed { .. } => {
                ErrorKind::InvalidInput
            }
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, value)
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(value: serde_json::Error) -> Self {
        Self::Other(anyhow::anyhow!(value.to_string()))
    }
}
