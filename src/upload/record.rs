use std::fmt;
use std::path::PathBuf;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::StreamError;

/// Outcome of a transfer, numbered like the usual upload error constants.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "i64")]
pub enum UploadErrorCode {
    #[default]
    Ok,
    ExceedsIniLimit,
    ExceedsFormLimit,
    Partial,
    NoFile,
    MissingTmpDir,
    CantWrite,
    ExtensionBlocked,
}

impl UploadErrorCode {
    pub fn code(self) -> i64 {
        match self {
            Self::Ok => 0,
            Self::ExceedsIniLimit => 1,
            Self::ExceedsFormLimit => 2,
            Self::Partial => 3,
            Self::NoFile => 4,
            Self::MissingTmpDir => 6,
            Self::CantWrite => 7,
            Self::ExtensionBlocked => 8,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl TryFrom<i64> for UploadErrorCode {
    type Error = StreamError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Ok,
            1 => Self::ExceedsIniLimit,
            2 => Self::ExceedsFormLimit,
            3 => Self::Partial,
            4 => Self::NoFile,
            6 => Self::MissingTmpDir,
            7 => Self::CantWrite,
            8 => Self::ExtensionBlocked,
            other => {
                return Err(StreamError::Other(anyhow!(
                    "unknown upload error code {other}"
                )))
            }
        })
    }
}

impl From<UploadErrorCode> for i64 {
    fn from(value: UploadErrorCode) -> Self {
        value.code()
    }
}

impl fmt::Display for UploadErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::Ok => "the file was uploaded successfully",
            Self::ExceedsIniLimit => {
                "the file exceeds the configured maximum size"
            }
            Self::ExceedsFormLimit => {
                "the file exceeds the maximum size declared by the form"
            }
            Self::Partial => "the file was only partially uploaded",
            Self::NoFile => "no file was uploaded",
            Self::MissingTmpDir => "the temporary directory is missing",
            Self::CantWrite => "the file could not be written to disk",
            Self::ExtensionBlocked => "an extension stopped the upload",
        };
        f.write_str(message)
    }
}

/// One file transfer as reported by whatever received the bytes.
///
/// Every field except `error` is untrusted client input.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub tmp_name: Option<PathBuf>,
    pub size: Option<u64>,
    pub error: UploadErrorCode,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
}

impl TransferRecord {
    /// Successful transfer staged at `tmp_name`.
    pub fn staged(tmp_name: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            tmp_name: Some(tmp_name.into()),
            size: Some(size),
            ..Self::default()
        }
    }

    /// Transfer that failed before any bytes were kept.
    pub fn failed(error: UploadErrorCode) -> Self {
        Self {
            error,
            ..Self::default()
        }
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_media_type<S: Into<String>>(mut self, media_type: S) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}
