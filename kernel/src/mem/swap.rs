use crate::block::{BlockDevice, BlockSector, Result, BLOCK_SECTOR_SIZE};
use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use minnowos_shared::mem::PAGE_FRAME_SIZE;

/// Index of a page-sized slot on the swap device.
pub type SwapSlot = u32;

/// Sectors holding one page of swapped-out content.
pub const SECTORS_PER_PAGE: usize = PAGE_FRAME_SIZE / BLOCK_SECTOR_SIZE;

/// Slot allocator and transfer engine for the swap device.
///
/// Occupancy is a bitmap, one bit per slot, set while the slot holds the
/// content of an evicted page. A slot is owned by exactly one page from
/// `allocate` until `free`.
pub(crate) struct SwapTable {
    device: Box<dyn BlockDevice + Send>,
    bitmap: Vec<u64>,
    slot_count: u32,
    in_use: usize,
}

impl SwapTable {
    pub fn new(device: Box<dyn BlockDevice + Send>) -> Self {
        let slot_count = device.sector_count() / SECTORS_PER_PAGE as BlockSector;
        Self {
            device,
            bitmap: vec![0; (slot_count as usize).div_ceil(64)],
            slot_count,
            in_use: 0,
        }
    }

    /// Claims the lowest-numbered free slot.
    pub fn allocate(&mut self) -> Option<SwapSlot> {
        for (group_index, group) in self.bitmap.iter_mut().enumerate() {
            if *group == u64::MAX {
                continue;
            }
            let bit = (!*group).trailing_zeros();
            let slot = group_index as u32 * 64 + bit;
            if slot >= self.slot_count {
                return None;
            }
            *group |= 1 << bit;
            self.in_use += 1;
            return Some(slot);
        }
        None
    }

    pub fn free(&mut self, slot: SwapSlot) {
        let group = &mut self.bitmap[slot as usize / 64];
        debug_assert!(*group & (1 << (slot % 64)) != 0, "freeing a free swap slot");
        *group &= !(1 << (slot % 64));
        self.in_use -= 1;
    }

    /// Reads the content of `slot` into `buf`, one sector at a time.
    pub fn read_slot(&mut self, slot: SwapSlot, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_FRAME_SIZE);
        let base = slot as BlockSector * SECTORS_PER_PAGE as BlockSector;
        for k in 0..SECTORS_PER_PAGE {
            let chunk = &mut buf[k * BLOCK_SECTOR_SIZE..(k + 1) * BLOCK_SECTOR_SIZE];
            self.device.read(base + k as BlockSector, chunk)?;
        }
        Ok(())
    }

    pub fn write_slot(&mut self, slot: SwapSlot, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_FRAME_SIZE);
        let base = slot as BlockSector * SECTORS_PER_PAGE as BlockSector;
        for k in 0..SECTORS_PER_PAGE {
            let chunk = &buf[k * BLOCK_SECTOR_SIZE..(k + 1) * BLOCK_SECTOR_SIZE];
            self.device.write(base + k as BlockSector, chunk)?;
        }
        Ok(())
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }
}
