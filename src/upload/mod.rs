mod record;
mod staging;

use std::path::{Path, PathBuf};

pub use record::{TransferRecord, UploadErrorCode};
pub use staging::StagingArea;

use crate::{Result, Stream, StreamError};

/// A file received from a client, to be moved to its final place once.
///
/// The stream over the received bytes is opened on first use and stays
/// available until [`UploadedFile::move_to`] succeeds. After that both the
/// stream and further moves are refused.
///
/// A record whose error code is not [`UploadErrorCode::Ok`] never exposes
/// its temp file, even if one is named: [`UploadedFile::stream`] fails
/// with [`StreamError::NoStream`] and [`UploadedFile::move_to`] with
/// [`StreamError::NotUploaded`]. The client-supplied size, filename and
/// media type are kept either way.
#[derive(Debug)]
pub struct UploadedFile {
    path: Option<PathBuf>,
    size: Option<u64>,
    error: UploadErrorCode,
    client_filename: Option<String>,
    client_media_type: Option<String>,
    stream: Option<Stream>,
    staging: StagingArea,
    moved: bool,
}

impl UploadedFile {
    pub fn new(record: TransferRecord, staging: &StagingArea) -> Self {
        let TransferRecord {
            tmp_name,
            size,
            error,
            name,
            media_type,
        } = record;

        let path = if error.is_ok() {
            tmp_name
        } else {
            if let Some(tmp_name) = tmp_name {
                log::debug!(
                    "ignoring {} of failed transfer: {}",
                    tmp_name.display(),
                    error
                );
            }
            None
        };

        Self {
            path,
            size,
            error,
            client_filename: name,
            client_media_type: media_type,
            stream: None,
            staging: staging.clone(),
            moved: false,
        }
    }

    /// Stream over the received bytes. Every call returns the same stream.
    ///
    /// # Errors
    /// [`StreamError::AlreadyMoved`] once the file has been moved,
    /// [`StreamError::NoStream`] if no bytes were received, or the error
    /// from opening the temp file.
    pub fn stream(&mut self) -> Result<&mut Stream> {
        if self.moved {
            return Err(StreamError::AlreadyMoved);
        }
        let path = self.path.as_ref().ok_or(StreamError::NoStream)?;
        if self.stream.is_none() {
            let mode = &self.staging.config().stream_mode;
            self.stream = Some(Stream::open(path, mode)?);
        }
        self.stream.as_mut().ok_or(StreamError::NoStream)
    }

    /// Move the received file to `target`. Works once.
    ///
    /// # Errors
    /// - [`StreamError::AlreadyMoved`] on every call after a successful one.
    /// - [`StreamError::NotUploaded`] if the file was not received by the
    ///   staging area, so arbitrary paths can't be moved through here.
    /// - [`StreamError::MoveFailed`] if `target` can't be written.
    pub fn move_to<P: AsRef<Path>>(&mut self, target: P) -> Result<()> {
        if self.moved {
            return Err(StreamError::AlreadyMoved);
        }
        let target = target.as_ref();
        let source = match &self.path {
            Some(path) if self.staging.is_received(path) => path.clone(),
            Some(path) => {
                return Err(StreamError::NotUploaded(
                    path.display().to_string(),
                ))
            }
            None => {
                return Err(StreamError::NotUploaded(format!(
                    "nothing was received: {}",
                    self.error
                )))
            }
        };

        // the temp file must not stay open while it is renamed
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
        self.staging.relocate(&source, target)?;

        self.moved = true;
        self.path = Some(target.to_path_buf());
        Ok(())
    }

    pub fn is_moved(&self) -> bool {
        self.moved
    }

    /// Temp location before the move, destination after it.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Size reported with the transfer, not measured.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn error(&self) -> UploadErrorCode {
        self.error
    }

    /// Filename sent by the client. Do not trust it.
    pub fn client_filename(&self) -> Option<&str> {
        self.client_filename.as_deref()
    }

    /// Media type sent by the client. Do not trust it.
    pub fn client_media_type(&self) -> Option<&str> {
        self.client_media_type.as_deref()
    }
}
