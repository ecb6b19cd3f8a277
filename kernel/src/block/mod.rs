pub mod block_error;

pub use block_error::BlockError;

/// Size of a block device sector in bytes.
///
/// All IDE disks use this sector size, as do most USB and SCSI disks.
pub const BLOCK_SECTOR_SIZE: usize = 512;

/// Index of a block device sector.
///
/// Good enough for devices up to 2 TB.
pub type BlockSector = u32;

pub type Result<T> = core::result::Result<T, BlockError>;

/// Lower-level interface to block device drivers.
///
/// Sector granularity only; callers that work in pages issue one call
/// per sector.
pub trait BlockDevice {
    /// Size of the device in sectors.
    fn sector_count(&self) -> BlockSector;

    /// Read sector `sector` into `buf`, which must be exactly
    /// `BLOCK_SECTOR_SIZE` bytes.
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<()>;

    /// Write `buf`, which must be exactly `BLOCK_SECTOR_SIZE` bytes, to
    /// sector `sector`.
    fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<()>;
}
