use crate::block::BlockError;
use crate::vfs;
use core::error::Error;
use core::fmt::{Display, Formatter};

/// Why a fault or claim could not be satisfied.
///
/// All of these end the faulting process; none of them are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// Null or kernel-space address
    BadAddress,
    /// No entry covers the address
    NotMapped,
    /// Write fault against a read-only page
    ReadOnly,
    /// An entry already covers the address
    AlreadyMapped,
    /// Disk or file I/O failed while (un)loading a page
    Io,
}

impl Display for VmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            VmError::BadAddress => write!(f, "null or kernel address"),
            VmError::NotMapped => write!(f, "unmapped address"),
            VmError::ReadOnly => write!(f, "write to read-only page"),
            VmError::AlreadyMapped => write!(f, "address already mapped"),
            VmError::Io => write!(f, "i/o failure"),
        }
    }
}

impl Error for VmError {}

impl From<BlockError> for VmError {
    fn from(_: BlockError) -> Self {
        VmError::Io
    }
}

impl From<vfs::Error> for VmError {
    fn from(_: vfs::Error) -> Self {
        VmError::Io
    }
}

/// Why a mapping request was rejected. The address space is untouched
/// when any of these are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmapError {
    NullAddress,
    Misaligned,
    ZeroLength,
    /// mmap of a console stream
    Console,
    /// Mapping would reach kernel space
    OutOfRange,
    /// Range overlaps an existing entry
    Overlap,
}

impl Display for MmapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            MmapError::NullAddress => write!(f, "null address"),
            MmapError::Misaligned => write!(f, "address not page-aligned"),
            MmapError::ZeroLength => write!(f, "zero-length mapping"),
            MmapError::Console => write!(f, "cannot map a console stream"),
            MmapError::OutOfRange => write!(f, "mapping reaches kernel space"),
            MmapError::Overlap => write!(f, "range overlaps an existing mapping"),
        }
    }
}

impl Error for MmapError {}
