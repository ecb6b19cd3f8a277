use crate::sizes::{KB, MB};

// Page size is 4KB. This is a property of x86 processors.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;

// Any virtual address at or above OFFSET is a kernel address.
pub const OFFSET: usize = 0x8000_0000;

/// User stacks start immediately below kernel space and grow downward.
pub const USER_STACK_TOP: usize = OFFSET;

/// A user stack may grow to at most this many bytes.
pub const MAX_STACK_SIZE: usize = MB;

/// Push granularity of the CPU; a push may fault this far below the
/// stack pointer.
pub const WORD_SIZE: usize = 8;

pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_FRAME_SIZE - 1)
}

pub const fn page_round_up(addr: usize) -> usize {
    (addr + PAGE_FRAME_SIZE - 1) & !(PAGE_FRAME_SIZE - 1)
}

pub const fn page_offset(addr: usize) -> usize {
    addr & (PAGE_FRAME_SIZE - 1)
}

pub const fn is_page_aligned(addr: usize) -> bool {
    addr % PAGE_FRAME_SIZE == 0
}

pub const fn is_kernel_vaddr(addr: usize) -> bool {
    addr >= OFFSET
}

pub const fn is_user_vaddr(addr: usize) -> bool {
    addr < OFFSET
}
