pub mod memfile;

pub use memfile::MemFile;

use crate::sync::Mutex;
use alloc::boxed::Box;
use alloc::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub enum Error {
    /// underlying device failed
    Io,
    /// no space left on device
    NoSpace,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Io => write!(f, "i/o error"),
            Self::NoSpace => write!(f, "no space left on device"),
        }
    }
}

impl core::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

/// An open file, as the VM layer sees one.
///
/// Offsets are absolute; there is no cursor. The VM layer records a byte
/// offset per page and reads/writes at it directly.
pub trait File: Send {
    /// Current length of the file in bytes.
    fn length(&self) -> usize;

    /// Read up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes read, which is short only when the
    /// range extends past the end of the file.
    fn read_at(&mut self, buf: &mut [u8], offset: usize) -> Result<usize>;

    /// Write `buf` at `offset`, growing the file if needed.
    fn write_at(&mut self, buf: &[u8], offset: usize) -> Result<usize>;

    /// Open an independent handle to the same underlying file, so a
    /// mapping outlives the descriptor it was created from.
    fn reopen(&self) -> Box<dyn File>;
}

/// Shared handle to an open file. Every page of one mapping holds a
/// clone of the same handle.
pub type FileRef = Arc<Mutex<Box<dyn File>>>;

pub fn file_ref(file: Box<dyn File>) -> FileRef {
    Arc::new(Mutex::new(file))
}

/// A process file-table slot, as handed to `do_mmap`.
pub enum FileDescriptor {
    /// stdin/stdout; not mappable
    Console,
    Open(FileRef),
}
