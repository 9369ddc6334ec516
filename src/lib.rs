//! Byte streams over files, pipes and memory buffers, and the uploaded file
//! built on top of them.
//!
//! A [`Stream`] owns exactly one resource. Its capabilities come from the
//! mode it was opened with, its size is cached until the next read or
//! write, and [`Stream::detach`] hands the resource back to the caller.
//!
//! An [`UploadedFile`] wraps one [`TransferRecord`]. The bytes it points to
//! can be streamed any number of times and moved to their destination
//! exactly once. Only files received through a [`StagingArea`] can be
//! moved.
//!
//! ```no_run
//! use std::io::Cursor;
//! use stream_upload::{StagingArea, StagingConfig, UploadedFile};
//!
//! # fn main() -> stream_upload::Result<()> {
//! let staging = StagingArea::new(StagingConfig::new("/var/tmp/uploads"))?;
//! let record = staging.receive(
//!     Cursor::new(b"hello".to_vec()),
//!     Some("hello.txt"),
//!     Some("text/plain"),
//! );
//!
//! let mut file = UploadedFile::new(record, &staging);
//! assert_eq!(file.stream()?.to_bytes(), b"hello");
//! file.move_to("/srv/files/hello.txt")?;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate lazy_static;

mod config;
pub mod errors;
pub mod stream;
pub mod upload;

use std::sync::Once;

pub use config::StagingConfig;
pub use errors::{Result, StreamError};
pub use stream::{Capabilities, Handle, Stream, StreamMetadata};
pub use upload::{StagingArea, TransferRecord, UploadErrorCode, UploadedFile};

pub static INIT: Once = Once::new();

/// Install the `env_logger` backend for the `log` records this crate
/// emits. Safe to call more than once.
pub fn initialize() {
    INIT.call_once(|| {
        if env_logger::builder().is_test(cfg!(test)).try_init().is_ok() {
            log::info!("Initializing stream-upload");
        }
    });
}
