use std::env;
use std::path::PathBuf;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::{Result, StreamError};

pub const STAGING_FOLDER: &str = "uploads";
pub const DEFAULT_PREFIX: &str = "upload_";
pub const DEFAULT_STREAM_MODE: &str = "rb";

pub const TMP_DIR_VAR: &str = "UPLOAD_TMP_DIR";
pub const MAX_FILESIZE_VAR: &str = "UPLOAD_MAX_FILESIZE";

/// Where received files are staged and how they are opened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Directory receiving temp files. It is not created on demand: a
    /// missing directory is reported on the transfer record.
    pub directory: PathBuf,
    /// Largest accepted transfer in bytes, no limit when `None`.
    pub max_file_size: Option<u64>,
    /// Prefix of generated temp file names.
    pub prefix: String,
    /// Mode used to open the stream of an uploaded file.
    pub stream_mode: String,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            directory: env::temp_dir().join(STAGING_FOLDER),
            max_file_size: None,
            prefix: DEFAULT_PREFIX.to_owned(),
            stream_mode: DEFAULT_STREAM_MODE.to_owned(),
        }
    }
}

impl StagingConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `UPLOAD_TMP_DIR` and `UPLOAD_MAX_FILESIZE`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(directory) = env::var_os(TMP_DIR_VAR) {
            config.directory = PathBuf::from(directory);
        }
        if let Ok(limit) = env::var(MAX_FILESIZE_VAR) {
            let limit = limit.trim().parse::<u64>().map_err(|err| {
                StreamError::Other(anyhow!("{MAX_FILESIZE_VAR}: {err}"))
            })?;
            config.max_file_size = Some(limit);
        }
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_stream_mode<S: Into<String>>(mut self, mode: S) -> Self {
        self.stream_mode = mode.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StagingConfig::default();
        assert_eq!(config.directory, env::temp_dir().join(STAGING_FOLDER));
        assert_eq!(config.max_file_size, None);
        assert_eq!(config.prefix, DEFAULT_PREFIX);
        assert_eq!(config.stream_mode, DEFAULT_STREAM_MODE);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = StagingConfig::from_json(
            r#"{"directory": "/srv/uploads", "max_file_size": 2048}"#,
        )
        .unwrap();
        assert_eq!(config.directory, PathBuf::from("/srv/uploads"));
        assert_eq!(config.max_file_size, Some(2048));
        assert_eq!(config.stream_mode, DEFAULT_STREAM_MODE);
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = StagingConfig::from_json("{ directory: ").unwrap_err();
        assert!(matches!(err, StreamError::Other(_)));
    }

    #[test]
    fn builders() {
        let config = StagingConfig::new("/var/tmp/in")
            .with_max_file_size(10)
            .with_prefix("php")
            .with_stream_mode("r+b");
        assert_eq!(config.directory, PathBuf::from("/var/tmp/in"));
        assert_eq!(config.max_file_size, Some(10));
        assert_eq!(config.prefix, "php");
        assert_eq!(config.stream_mode, "r+b");
    }
}
