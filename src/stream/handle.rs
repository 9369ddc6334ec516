use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// The resource a [`Stream`](super::Stream) owns.
///
/// A handle is moved, never shared: [`Stream::detach`](super::Stream::detach)
/// hands it back by value and the stream can no longer reach it.
pub enum Handle {
    File(File),
    Memory(Cursor<Vec<u8>>),
    /// Read end of a pipe or any other one-way source.
    Reader(Box<dyn Read + Send>),
    /// Write end of a pipe or any other one-way sink.
    Writer(Box<dyn Write + Send>),
}

impl Handle {
    pub(crate) fn wrapper_type(&self) -> &'static str {
        match self {
            Handle::File(_) => "plainfile",
            Handle::Memory(_) => "memory",
            Handle::Reader(_) | Handle::Writer(_) => "pipe",
        }
    }

    pub(crate) fn stream_type(&self) -> &'static str {
        match self {
            Handle::File(_) => "STDIO",
            Handle::Memory(_) => "MEMORY",
            Handle::Reader(_) | Handle::Writer(_) => "PIPE",
        }
    }

    /// Only regular files and memory buffers can be repositioned;
    /// a `File` wrapping a FIFO or a character device can't.
    ///
    /// Fails for a regular file whose descriptor can't report its offset.
    pub(crate) fn is_seekable(&self) -> io::Result<bool> {
        match self {
            Handle::File(file) => {
                let regular = file.metadata()?.is_file();
                if regular {
                    let mut file: &File = file;
                    file.stream_position()?;
                }
                Ok(regular)
            }
            Handle::Memory(_) => Ok(true),
            Handle::Reader(_) | Handle::Writer(_) => Ok(false),
        }
    }

    /// Byte length from a fresh stat of the handle, `None` for pipes.
    pub(crate) fn len(&self) -> io::Result<Option<u64>> {
        match self {
            Handle::File(file) => Ok(Some(file.metadata()?.len())),
            Handle::Memory(cursor) => Ok(Some(cursor.get_ref().len() as u64)),
            Handle::Reader(_) | Handle::Writer(_) => Ok(None),
        }
    }
}

fn unsupported(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, what.to_owned())
}

impl Read for Handle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Handle::File(file) => file.read(buf),
            Handle::Memory(cursor) => cursor.read(buf),
            Handle::Reader(reader) => reader.read(buf),
            Handle::Writer(_) => Err(unsupported("pipe is write-only")),
        }
    }
}

impl Write for Handle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Handle::File(file) => file.write(buf),
            Handle::Memory(cursor) => cursor.write(buf),
            Handle::Writer(writer) => writer.write(buf),
            Handle::Reader(_) => Err(unsupported("pipe is read-only")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Handle::File(file) => file.flush(),
            Handle::Memory(cursor) => cursor.flush(),
            Handle::Writer(writer) => writer.flush(),
            Handle::Reader(_) => Ok(()),
        }
    }
}

impl Seek for Handle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Handle::File(file) => file.seek(pos),
            Handle::Memory(cursor) => cursor.seek(pos),
            Handle::Reader(_) | Handle::Writer(_) => {
                Err(unsupported("pipes have no position"))
            }
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handle::File(file) => f.debug_tuple("File").field(file).finish(),
            Handle::Memory(cursor) => f
                .debug_struct("Memory")
                .field("len", &cursor.get_ref().len())
                .field("position", &cursor.position())
                .finish(),
            Handle::Reader(_) => f.write_str("Reader"),
            Handle::Writer(_) => f.write_str("Writer"),
        }
    }
}
