use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use canonical_path::CanonicalPathBuf;

use super::record::{TransferRecord, UploadErrorCode};
use crate::stream::mode;
use crate::{Result, StagingConfig, StreamError};

const KILOBYTE: usize = 1024;
const BUFFER_CAPACITY: usize = 64 * KILOBYTE;
const NAME_LENGTH: usize = 10;
const CREATE_ATTEMPTS: usize = 8;

/// Directory receiving transferred bytes, plus the registry of every file
/// it received.
///
/// Only registered files can be moved by
/// [`UploadedFile::move_to`](super::UploadedFile::move_to), so an arbitrary
/// path dressed up as a transfer record is refused. Clones share the
/// registry.
#[derive(Clone, Debug)]
pub struct StagingArea {
    config: Arc<StagingConfig>,
    received: Arc<RwLock<HashSet<CanonicalPathBuf>>>,
}

impl StagingArea {
    pub fn new(config: StagingConfig) -> Result<Self> {
        if !mode::capabilities(&config.stream_mode).readable {
            return Err(StreamError::Construction(format!(
                "stream mode {:?} can't read uploads",
                config.stream_mode
            )));
        }
        Ok(Self {
            config: Arc::new(config),
            received: Arc::new(RwLock::new(HashSet::new())),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(StagingConfig::from_env()?)
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    /// Store everything `body` yields as a new temp file and describe the
    /// outcome as a transfer record.
    ///
    /// Failures never surface as errors; they end up in the record's
    /// error code and no temp file is left behind.
    pub fn receive<R: Read>(
        &self,
        body: R,
        client_filename: Option<&str>,
        client_media_type: Option<&str>,
    ) -> TransferRecord {
        let mut record = self.stage(body, client_filename);
        record.name = client_filename.map(str::to_owned);
        record.media_type = client_media_type.map(str::to_owned);
        if !record.error.is_ok() {
            log::warn!(
                "transfer of {:?} failed: {}",
                client_filename.unwrap_or_default(),
                record.error
            );
        }
        record
    }

    fn stage<R: Read>(
        &self,
        mut body: R,
        client_filename: Option<&str>,
    ) -> TransferRecord {
        if !self.config.directory.is_dir() {
            return TransferRecord::failed(UploadErrorCode::MissingTmpDir);
        }
        let (path, mut file) = match self.create_temp() {
            Ok(created) => created,
            Err(err) => {
                log::debug!("unable to create temp file: {}", err);
                return TransferRecord::failed(UploadErrorCode::CantWrite);
            }
        };

        let outcome =
            copy_limited(&mut body, &mut file, self.config.max_file_size);
        drop(file);
        let size = match outcome {
            Ok(size) => size,
            Err(error) => {
                discard(&path);
                return TransferRecord::failed(error);
            }
        };

        if size == 0 && client_filename.map_or(true, str::is_empty) {
            discard(&path);
            return TransferRecord::failed(UploadErrorCode::NoFile);
        }

        if let Err(err) = self.register(&path) {
            log::debug!("unable to register {}: {}", path.display(), err);
            discard(&path);
            return TransferRecord::failed(UploadErrorCode::CantWrite);
        }
        log::debug!("staged {} bytes at {}", size, path.display());
        TransferRecord::staged(path, size)
    }

    fn create_temp(&self) -> io::Result<(PathBuf, File)> {
        let mut last_error = None;
        for _ in 0..CREATE_ATTEMPTS {
            let filename: String =
                std::iter::repeat_with(fastrand::alphanumeric)
                    .take(NAME_LENGTH)
                    .collect();
            let path = self
                .config
                .directory
                .join(format!("{}{}", self.config.prefix, filename));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(ErrorKind::AlreadyExists, "no free temp file name")
        }))
    }

    /// Vouch for a file that reached the disk some other way, e.g. written
    /// by a host server before this process saw it.
    pub fn adopt<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(StreamError::NotUploaded(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        self.register(path)?;
        log::debug!("adopted {}", path.display());
        Ok(())
    }

    /// Whether `path` names a file this staging area received and has not
    /// moved yet.
    pub fn is_received<P: AsRef<Path>>(&self, path: P) -> bool {
        let Ok(canonical) = CanonicalPathBuf::canonicalize(path.as_ref())
        else {
            return false;
        };
        self.registry().contains(&canonical)
    }

    /// Number of received files that are still waiting to be moved.
    pub fn pending(&self) -> usize {
        self.registry().len()
    }

    /// Move a received file to `target`. The source is gone afterwards.
    ///
    /// # Errors
    /// [`StreamError::NotUploaded`] if `source` was not received here,
    /// [`StreamError::MoveFailed`] if the file could not be moved.
    pub fn relocate<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        source: P,
        target: Q,
    ) -> Result<()> {
        let (source, target) = (source.as_ref(), target.as_ref());
        // held until the registry agrees with the filesystem again
        let mut received = self.registry_mut();
        let canonical = CanonicalPathBuf::canonicalize(source)
            .ok()
            .filter(|canonical| received.contains(canonical))
            .ok_or_else(|| {
                StreamError::NotUploaded(source.display().to_string())
            })?;

        move_file(source, target).map_err(|source| StreamError::MoveFailed {
            target: target.to_path_buf(),
            source,
        })?;
        received.remove(&canonical);
        drop(received);
        log::debug!("moved {} to {}", source.display(), target.display());
        Ok(())
    }

    /// Delete every received file that was never moved.
    ///
    /// Returns the number of files deleted.
    pub fn cleanup(&self) -> usize {
        let mut received = self.registry_mut();
        let mut deleted = 0;
        for path in received.drain() {
            match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => log::warn!(
                    "failed to delete {}: {}",
                    path.as_path().display(),
                    err
                ),
            }
        }
        log::debug!("removed {} unclaimed uploads", deleted);
        deleted
    }

    fn register(&self, path: &Path) -> Result<()> {
        let canonical = CanonicalPathBuf::canonicalize(path)?;
        self.registry_mut().insert(canonical);
        Ok(())
    }

    // Every update is a single insert, remove or drain, so a set behind a
    // poisoned lock is still whole.
    fn registry(&self) -> RwLockReadGuard<'_, HashSet<CanonicalPathBuf>> {
        self.received.read().unwrap_or_else(|poisoned| {
            log::warn!("upload registry lock was poisoned");
            poisoned.into_inner()
        })
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, HashSet<CanonicalPathBuf>> {
        self.received.write().unwrap_or_else(|poisoned| {
            log::warn!("upload registry lock was poisoned");
            poisoned.into_inner()
        })
    }
}

/// Copy `body` into `file`, classifying failures as upload error codes.
fn copy_limited<R: Read>(
    body: &mut R,
    file: &mut File,
    limit: Option<u64>,
) -> std::result::Result<u64, UploadErrorCode> {
    let mut buf = vec![0; BUFFER_CAPACITY];
    let mut total: u64 = 0;
    loop {
        let read = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                log::debug!(
                    "transfer interrupted after {} bytes: {}",
                    total,
                    err
                );
                return Err(UploadErrorCode::Partial);
            }
        };
        total += read as u64;
        if limit.map_or(false, |limit| total > limit) {
            return Err(UploadErrorCode::ExceedsIniLimit);
        }
        if let Err(err) = file.write_all(&buf[..read]) {
            log::debug!("writing temp file failed: {}", err);
            return Err(UploadErrorCode::CantWrite);
        }
    }
    file.flush().map_err(|_| UploadErrorCode::CantWrite)?;
    Ok(total)
}

fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        log::warn!("failed to remove {}: {}", path.display(), err);
    }
}

/// Rename `source` to `target`, copying across filesystems when a rename
/// is impossible.
fn move_file(source: &Path, target: &Path) -> io::Result<()> {
    let renamed = fs::rename(source, target);
    let Err(err) = renamed else {
        return Ok(());
    };
    if !source.is_file() || target.is_dir() {
        return Err(err);
    }
    log::trace!("rename failed ({}), copying {}", err, source.display());
    fs::copy(source, target)?;
    if let Err(err) = fs::remove_file(source) {
        let _ = fs::remove_file(target);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialize;
    use std::io::Cursor;
    use tempdir::TempDir;

    fn staging(dir: &TempDir) -> StagingArea {
        StagingArea::new(StagingConfig::new(dir.path())).unwrap()
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::ConnectionReset, "client went away"))
        }
    }

    #[test]
    fn receive_stages_and_registers() {
        initialize();
        let dir = TempDir::new("staging_receive").unwrap();
        let area = staging(&dir);

        let record = area.receive(
            Cursor::new(b"png bytes"),
            Some("a.png"),
            Some("image/png"),
        );
        assert_eq!(record.error, UploadErrorCode::Ok);
        assert_eq!(record.size, Some(9));
        assert_eq!(record.name.as_deref(), Some("a.png"));
        assert_eq!(record.media_type.as_deref(), Some("image/png"));

        let path = record.tmp_name.unwrap();
        assert!(path.starts_with(dir.path()));
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(crate::config::DEFAULT_PREFIX));
        assert_eq!(fs::read(&path).unwrap(), b"png bytes");
        assert!(area.is_received(&path));
        assert_eq!(area.pending(), 1);
    }

    #[test]
    fn receive_without_directory() {
        let dir = TempDir::new("staging_missing").unwrap();
        let area =
            StagingArea::new(StagingConfig::new(dir.path().join("absent")))
                .unwrap();

        let record = area.receive(Cursor::new(b"data"), Some("a.txt"), None);
        assert_eq!(record.error, UploadErrorCode::MissingTmpDir);
        assert_eq!(record.tmp_name, None);
        assert_eq!(record.name.as_deref(), Some("a.txt"));
    }

    #[test]
    fn receive_over_limit_leaves_nothing() {
        let dir = TempDir::new("staging_limit").unwrap();
        let area = StagingArea::new(
            StagingConfig::new(dir.path()).with_max_file_size(4),
        )
        .unwrap();

        let record = area.receive(Cursor::new(b"too large"), Some("big"), None);
        assert_eq!(record.error, UploadErrorCode::ExceedsIniLimit);
        assert_eq!(record.tmp_name, None);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(area.pending(), 0);
    }

    #[test]
    fn receive_at_limit_is_accepted() {
        let dir = TempDir::new("staging_at_limit").unwrap();
        let area = StagingArea::new(
            StagingConfig::new(dir.path()).with_max_file_size(4),
        )
        .unwrap();

        let record = area.receive(Cursor::new(b"four"), Some("f"), None);
        assert_eq!(record.error, UploadErrorCode::Ok);
        assert_eq!(record.size, Some(4));
    }

    #[test]
    fn interrupted_body_is_partial() {
        let dir = TempDir::new("staging_partial").unwrap();
        let area = staging(&dir);

        let record = area.receive(Broken, Some("a.bin"), None);
        assert_eq!(record.error, UploadErrorCode::Partial);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn empty_body_without_name_is_no_file() {
        let dir = TempDir::new("staging_empty").unwrap();
        let area = staging(&dir);

        let record = area.receive(io::empty(), None, None);
        assert_eq!(record.error, UploadErrorCode::NoFile);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        let named = area.receive(io::empty(), Some("empty.txt"), None);
        assert_eq!(named.error, UploadErrorCode::Ok);
        assert_eq!(named.size, Some(0));
    }

    #[test]
    fn write_only_stream_mode_is_rejected() {
        let dir = TempDir::new("staging_mode").unwrap();
        let err = StagingArea::new(
            StagingConfig::new(dir.path()).with_stream_mode("w"),
        )
        .unwrap_err();
        assert!(matches!(err, StreamError::Construction(_)));
    }

    #[test]
    fn arbitrary_paths_are_not_received() {
        let dir = TempDir::new("staging_arbitrary").unwrap();
        let area = staging(&dir);
        let path = dir.path().join("passwd");
        fs::write(&path, b"root:x:0:0").unwrap();

        assert!(!area.is_received(&path));
        assert!(!area.is_received(dir.path().join("missing")));
        let err = area.relocate(&path, dir.path().join("stolen")).unwrap_err();
        assert!(matches!(err, StreamError::NotUploaded(_)));
        assert!(path.exists());
    }

    #[test]
    fn adopt_then_relocate() {
        let dir = TempDir::new("staging_adopt").unwrap();
        let area = staging(&dir);
        let path = dir.path().join("incoming");
        fs::write(&path, b"payload").unwrap();

        area.adopt(&path).unwrap();
        assert!(area.is_received(&path));

        let target = dir.path().join("kept");
        area.relocate(&path, &target).unwrap();
        assert!(!path.exists());
        assert_eq!(fs::read(&target).unwrap(), b"payload");
        assert!(!area.is_received(&path));
        assert!(!area.is_received(&target));
    }

    #[test]
    fn adopt_refuses_directories() {
        let dir = TempDir::new("staging_adopt_dir").unwrap();
        let area = staging(&dir);
        assert!(matches!(
            area.adopt(dir.path()),
            Err(StreamError::NotUploaded(_))
        ));
    }

    #[test]
    fn relocate_into_missing_directory_fails() {
        let dir = TempDir::new("staging_bad_target").unwrap();
        let area = staging(&dir);
        let record = area.receive(Cursor::new(b"data"), Some("d"), None);
        let path = record.tmp_name.unwrap();

        let target = dir.path().join("no").join("such").join("dir");
        let err = area.relocate(&path, &target).unwrap_err();
        assert!(matches!(err, StreamError::MoveFailed { .. }));
        assert!(err.is_invalid_argument());
        assert!(path.exists());
        assert!(area.is_received(&path));
    }

    #[test]
    fn cleanup_removes_unclaimed_files() {
        let dir = TempDir::new("staging_cleanup").unwrap();
        let area = staging(&dir);
        let first = area.receive(Cursor::new(b"1"), Some("1"), None);
        let second = area.receive(Cursor::new(b"2"), Some("2"), None);
        let moved = dir.path().join("moved");
        area.relocate(second.tmp_name.unwrap(), &moved).unwrap();

        assert_eq!(area.cleanup(), 1);
        assert!(!first.tmp_name.unwrap().exists());
        assert!(moved.exists());
        assert_eq!(area.pending(), 0);
    }

    #[test]
    fn poisoned_registry_still_moves() {
        let dir = TempDir::new("staging_poisoned").unwrap();
        let area = staging(&dir);
        let record = area.receive(Cursor::new(b"payload"), Some("p"), None);
        let source = record.tmp_name.unwrap();

        let other = area.clone();
        let worker = std::thread::spawn(move || {
            let _guard = other.received.write().unwrap();
            panic!("worker died holding the registry");
        });
        assert!(worker.join().is_err());
        assert!(area.received.is_poisoned());

        let target = dir.path().join("moved");
        area.relocate(&source, &target).unwrap();
        assert!(!source.exists());
        assert_eq!(fs::read(&target).unwrap(), b"payload");
        assert!(!area.is_received(&source));
        assert_eq!(area.pending(), 0);
    }

    #[test]
    fn clones_share_registry() {
        let dir = TempDir::new("staging_clone").unwrap();
        let area = staging(&dir);
        let other = area.clone();

        let record = area.receive(Cursor::new(b"shared"), Some("s"), None);
        assert!(other.is_received(record.tmp_name.unwrap()));
    }
}
