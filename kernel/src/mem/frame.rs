use super::page::PageId;
use super::VmState;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use minnowos_shared::mem::PAGE_FRAME_SIZE;

/// Index of a frame in the pool.
pub type FrameId = usize;

struct Frame {
    data: Vec<u8>,
    /// Present while the frame holds page content.
    page: Option<PageId>,
}

/// Fixed-capacity pool of user frames plus the clock hand over it.
///
/// Frames are allocated lazily up to `capacity` and recycled through the
/// free list after that. The clock hand only ever advances; a frame with
/// no attached page is never a victim.
pub(crate) struct FrameTable {
    frames: Vec<Frame>,
    free: Vec<FrameId>,
    capacity: usize,
    cursor: usize,
    evictions: u64,
}

impl FrameTable {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "frame pool must hold at least one frame");
        Self {
            frames: Vec::new(),
            free: Vec::new(),
            capacity,
            cursor: 0,
            evictions: 0,
        }
    }

    /// A zeroed frame with no page attached, if one can be had without
    /// evicting.
    pub fn try_grab(&mut self) -> Option<FrameId> {
        if let Some(id) = self.free.pop() {
            self.frames[id].data.fill(0);
            return Some(id);
        }
        if self.frames.len() < self.capacity {
            self.frames.push(Frame {
                data: vec![0; PAGE_FRAME_SIZE],
                page: None,
            });
            return Some(self.frames.len() - 1);
        }
        None
    }

    pub fn attach(&mut self, id: FrameId, page: PageId) {
        debug_assert!(self.frames[id].page.is_none());
        self.frames[id].page = Some(page);
    }

    pub fn detach(&mut self, id: FrameId) {
        self.frames[id].page = None;
    }

    /// Returns the frame to the free list.
    pub fn release(&mut self, id: FrameId) {
        debug_assert!(!self.free.contains(&id), "double free of frame");
        self.frames[id].page = None;
        self.free.push(id);
    }

    pub fn page_of(&self, id: FrameId) -> Option<PageId> {
        self.frames[id].page
    }

    pub fn data(&self, id: FrameId) -> &[u8] {
        &self.frames[id].data
    }

    pub fn data_mut(&mut self, id: FrameId) -> &mut [u8] {
        &mut self.frames[id].data
    }

    fn advance_cursor(&mut self) -> FrameId {
        let id = self.cursor;
        self.cursor = (self.cursor + 1) % self.frames.len();
        id
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn in_use(&self) -> usize {
        self.frames.len() - self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}

impl VmState {
    /// Produces a frame with no page attached, evicting if the pool is
    /// full. Second-chance scan: an accessed frame is spared once, with
    /// its accessed bit cleared, so the second lap is guaranteed to find
    /// a victim.
    ///
    /// Panics if the pool is full and holds no evictable frame, or if
    /// writing a victim out fails; neither has a recovery.
    pub(crate) fn acquire_frame(&mut self) -> FrameId {
        if let Some(id) = self.frames.try_grab() {
            return id;
        }
        let laps = 2 * self.frames.len();
        for _ in 0..laps {
            let id = self.frames.advance_cursor();
            let Some(victim) = self.frames.page_of(id) else {
                continue;
            };
            let (va, table) = {
                let page = self.pages.get(victim);
                (page.va, Arc::clone(&page.table))
            };
            {
                let mut pt = table.lock();
                if pt.is_accessed(va) {
                    pt.clear_accessed(va);
                    continue;
                }
            }
            log::trace!("evicting page {va:#x} from frame {id}");
            if let Err(e) = self.swap_out(victim) {
                panic!("eviction of page {va:#x} failed: {e}");
            }
            self.frames.evictions += 1;
            return id;
        }
        panic!("frame pool exhausted: no evictable frame");
    }
}
