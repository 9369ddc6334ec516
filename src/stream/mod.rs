mod handle;
mod metadata;
pub mod mode;

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::{Result, StreamError};

pub use handle::Handle;
pub use metadata::StreamMetadata;
pub use mode::Capabilities;

const MEMORY_MODE: &str = "w+b";
const READER_MODE: &str = "rb";
const WRITER_MODE: &str = "wb";
const READ_CHUNK: usize = 8 * 1024;

/// Byte stream over a file, a pipe or a memory buffer.
///
/// Capabilities are fixed when the stream is built. The size is cached and
/// dropped on every read or write, so a later [`Stream::size`] re-stats the
/// resource. After [`Stream::detach`] or [`Stream::close`] the stream is
/// inert: data operations fail with [`StreamError::Detached`] while size and
/// metadata queries return `None`.
#[derive(Debug)]
pub struct Stream {
    handle: Option<Handle>,
    mode: String,
    uri: Option<PathBuf>,
    size: Option<u64>,
    readable: bool,
    writable: bool,
    seekable: bool,
    // Set when a read on a non-seekable source came back empty.
    exhausted: bool,
    metadata: Option<StreamMetadata>,
}

impl Stream {
    /// Wrap `handle`, which was opened with `mode`.
    ///
    /// # Errors
    /// [`StreamError::Construction`] if the handle can't be inspected,
    /// e.g. a file descriptor that is no longer valid.
    pub fn new(handle: Handle, mode: &str) -> Result<Self> {
        Self::build(handle, mode, None)
    }

    /// Open `path` with an fopen-style `mode` such as `"r"`, `"w+b"`
    /// or `"a"`.
    pub fn open<P: AsRef<Path>>(path: P, mode: &str) -> Result<Self> {
        let path = path.as_ref();
        let options = mode::open_options(mode).ok_or_else(|| {
            StreamError::Construction(format!("unsupported mode {mode:?}"))
        })?;
        let file = options.open(path)?;
        log::trace!("opened {} with mode {}", path.display(), mode);
        Self::build(Handle::File(file), mode, Some(path.to_path_buf()))
    }

    /// Empty read-write buffer.
    pub fn memory() -> Self {
        Self::from_bytes(Vec::new())
    }

    /// Read-write buffer holding `data`, positioned at the start.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self::assemble(
            Handle::Memory(Cursor::new(data)),
            MEMORY_MODE,
            None,
            true,
            Some(size),
        )
    }

    /// Read-only pipe over `reader`. Not seekable, size unknown.
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self::assemble(
            Handle::Reader(Box::new(reader)),
            READER_MODE,
            None,
            false,
            None,
        )
    }

    /// Write-only pipe into `writer`. Not seekable, size unknown.
    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self::assemble(
            Handle::Writer(Box::new(writer)),
            WRITER_MODE,
            None,
            false,
            None,
        )
    }

    fn build(handle: Handle, mode: &str, uri: Option<PathBuf>) -> Result<Self> {
        let invalid = |err: io::Error| {
            StreamError::Construction(format!("invalid resource handle: {err}"))
        };
        let seekable = handle.is_seekable().map_err(invalid)?;
        let size = handle.len().map_err(invalid)?;
        Ok(Self::assemble(handle, mode, uri, seekable, size))
    }

    fn assemble(
        handle: Handle,
        mode: &str,
        uri: Option<PathBuf>,
        seekable: bool,
        size: Option<u64>,
    ) -> Self {
        let Capabilities { readable, writable } = mode::capabilities(mode);
        let mut stream = Self {
            handle: Some(handle),
            mode: mode.to_owned(),
            uri,
            size,
            readable,
            writable,
            seekable,
            exhausted: false,
            metadata: None,
        };
        stream.metadata = Some(stream.snapshot());
        stream
    }

    /// Release the underlying resource. Calling it again does nothing.
    pub fn close(&mut self) {
        if let Some(mut handle) = self.detach() {
            if let Err(err) = handle.flush() {
                log::warn!("failed to flush stream on close: {}", err);
            }
            log::trace!("closed {} stream", handle.wrapper_type());
        }
    }

    /// Separate the resource from the stream and hand it to the caller.
    /// Returns `None` if the stream was already detached or closed.
    pub fn detach(&mut self) -> Option<Handle> {
        let handle = self.handle.take()?;
        self.size = None;
        self.uri = None;
        self.readable = false;
        self.writable = false;
        self.seekable = false;
        self.metadata = None;
        Some(handle)
    }

    pub fn is_detached(&self) -> bool {
        self.handle.is_none()
    }

    /// Size in bytes if known.
    pub fn size(&mut self) -> Option<u64> {
        if self.size.is_some() {
            return self.size;
        }
        let handle = self.handle.as_ref()?;
        if let Some(uri) = &self.uri {
            log::trace!("re-reading size of {}", uri.display());
        }
        match handle.len() {
            Ok(size) => {
                self.size = size;
                size
            }
            Err(err) => {
                log::debug!("failed to stat stream: {}", err);
                None
            }
        }
    }

    pub fn tell(&mut self) -> Result<u64> {
        let handle = self.handle.as_mut().ok_or(StreamError::Detached)?;
        Ok(handle.stream_position()?)
    }

    pub fn eof(&mut self) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return true;
        };
        if !self.seekable {
            return self.exhausted;
        }
        match (handle.stream_position(), handle.len()) {
            (Ok(position), Ok(Some(len))) => position >= len,
            _ => self.exhausted,
        }
    }

    pub fn is_seekable(&self) -> bool {
        self.handle.is_some() && self.seekable
    }

    pub fn is_writable(&self) -> bool {
        self.handle.is_some() && self.writable
    }

    pub fn is_readable(&self) -> bool {
        self.handle.is_some() && self.readable
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let handle = self.handle.as_mut().ok_or(StreamError::Detached)?;
        if !self.seekable {
            return Err(StreamError::NotSeekable);
        }
        let position = handle.seek(pos)?;
        self.exhausted = false;
        self.metadata = None;
        Ok(position)
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.seek(SeekFrom::Start(0)).map(|_| ())
    }

    /// Write `data` at the current position and return how many bytes
    /// went through, which may be fewer than `data.len()`.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let handle = self.handle.as_mut().ok_or(StreamError::Detached)?;
        if !self.writable {
            return Err(StreamError::NotWritable);
        }
        self.size = None;
        self.metadata = None;
        Ok(handle.write(data)?)
    }

    /// Read up to `length` bytes. At end of data the result is empty and
    /// nothing is read.
    ///
    /// At most the current size is buffered, or one chunk when the size is
    /// unknown, so `length` may exceed what the stream holds.
    pub fn read(&mut self, length: usize) -> Result<Vec<u8>> {
        let limit = self.size().map_or(READ_CHUNK, |size| {
            usize::try_from(size).unwrap_or(usize::MAX)
        });
        let mut buf = vec![0; length.min(limit)];
        let read = self.read_into(&mut buf)?;
        buf.truncate(read);
        Ok(buf)
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.handle.is_none() {
            return Err(StreamError::Detached);
        }
        if !self.readable {
            return Err(StreamError::NotReadable);
        }
        if self.eof() {
            return Ok(0);
        }
        self.size = None;
        self.metadata = None;
        let handle = self.handle.as_mut().ok_or(StreamError::Detached)?;
        let read = loop {
            match handle.read(buf) {
                Ok(read) => break read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                    continue
                }
                Err(err) => return Err(err.into()),
            }
        };
        if read == 0 && !buf.is_empty() {
            self.exhausted = true;
        }
        Ok(read)
    }

    /// Everything from the current position to the end. Does not rewind.
    pub fn contents(&mut self) -> Result<Vec<u8>> {
        let handle = self.handle.as_mut().ok_or(StreamError::Detached)?;
        if !self.readable {
            return Err(StreamError::NotReadable);
        }
        let mut buf = vec![];
        handle.read_to_end(&mut buf)?;
        self.exhausted = true;
        self.size = None;
        self.metadata = None;
        Ok(buf)
    }

    /// Whole content of the stream, or nothing if it can't be produced.
    ///
    /// Rewinds first, so non-seekable and closed streams give an empty
    /// vector. This never fails.
    pub fn to_bytes(&mut self) -> Vec<u8> {
        if self.handle.is_none() {
            return Vec::new();
        }
        match self.rewind().and_then(|_| self.contents()) {
            Ok(contents) => contents,
            Err(err) => {
                log::debug!("stream could not be read whole: {}", err);
                Vec::new()
            }
        }
    }

    /// Lossy UTF-8 rendition of [`Stream::to_bytes`].
    pub fn to_string_lossy(&mut self) -> String {
        String::from_utf8_lossy(&self.to_bytes()).into_owned()
    }

    pub fn metadata(&mut self) -> Option<&StreamMetadata> {
        self.handle.as_ref()?;
        if self.metadata.is_none() {
            self.metadata = Some(self.snapshot());
        }
        self.metadata.as_ref()
    }

    pub fn metadata_value(&mut self, key: &str) -> Option<Value> {
        self.metadata()?.get(key)
    }

    fn snapshot(&mut self) -> StreamMetadata {
        let eof = self.eof();
        let (wrapper_type, stream_type) = match &self.handle {
            Some(handle) => (handle.wrapper_type(), handle.stream_type()),
            None => ("", ""),
        };
        StreamMetadata {
            timed_out: false,
            blocked: true,
            eof,
            wrapper_type: wrapper_type.to_owned(),
            stream_type: stream_type.to_owned(),
            mode: self.mode.clone(),
            unread_bytes: 0,
            seekable: self.seekable,
            uri: self.uri.as_ref().map(|uri| uri.display().to_string()),
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.close();
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf)?)
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(Stream::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.handle.as_mut() {
            Some(handle) => handle.flush(),
            None => Err(StreamError::Detached.into()),
        }
    }
}

impl Seek for Stream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(Stream::seek(self, pos)?)
    }
}
