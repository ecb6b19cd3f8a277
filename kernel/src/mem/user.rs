//! Kernel access to user memory.
//!
//! Syscall arguments and results cross the user/kernel boundary through
//! these copies. A touched page is faulted in the same way a user access
//! would fault it in, except that kernel touches never grow the stack.
//! The copies also model what the MMU does on a real access: accessed is
//! set on every touched page, dirty on every written one.

use super::{ProcessVm, Vm, VmError};
use alloc::vec::Vec;
use minnowos_shared::mem::{page_round_down, OFFSET, PAGE_FRAME_SIZE};

/// `[addr, addr + len)` must be non-null and entirely in user space.
fn check_user_range(addr: usize, len: usize) -> Result<(), VmError> {
    if addr == 0 && len > 0 {
        return Err(VmError::BadAddress);
    }
    match addr.checked_add(len) {
        Some(end) if end <= OFFSET => Ok(()),
        _ => Err(VmError::BadAddress),
    }
}

impl Vm {
    /// Copies `len` bytes out of `proc`'s memory starting at `addr`.
    pub fn copy_from_user(
        &self,
        proc: &ProcessVm,
        addr: usize,
        len: usize,
    ) -> Result<Vec<u8>, VmError> {
        check_user_range(addr, len)?;
        let mut out = Vec::with_capacity(len);
        let mut va = addr;
        while out.len() < len {
            let page_va = page_round_down(va);
            let chunk = (page_va + PAGE_FRAME_SIZE - va).min(len - out.len());
            let mut state = self.state.lock();
            let id = proc.spt.get(page_va).ok_or(VmError::NotMapped)?;
            if state.pages.get(id).frame.is_none() {
                state.claim(id)?;
            }
            let frame = state.pages.get(id).frame.expect("just claimed");
            let at = va - page_va;
            out.extend_from_slice(&state.frames.data(frame)[at..at + chunk]);
            proc.page_table.lock().set_accessed(page_va);
            va += chunk;
        }
        Ok(out)
    }

    /// Copies `buf` into `proc`'s memory at `addr`.
    pub fn copy_to_user(&self, proc: &ProcessVm, addr: usize, buf: &[u8]) -> Result<(), VmError> {
        check_user_range(addr, buf.len())?;
        let mut copied = 0;
        while copied < buf.len() {
            let va = addr + copied;
            let page_va = page_round_down(va);
            let chunk = (page_va + PAGE_FRAME_SIZE - va).min(buf.len() - copied);
            let mut state = self.state.lock();
            let id = proc.spt.get(page_va).ok_or(VmError::NotMapped)?;
            if !state.pages.get(id).writable {
                return Err(VmError::ReadOnly);
            }
            if state.pages.get(id).frame.is_none() {
                state.claim(id)?;
            }
            let frame = state.pages.get(id).frame.expect("just claimed");
            let at = va - page_va;
            state.frames.data_mut(frame)[at..at + chunk]
                .copy_from_slice(&buf[copied..copied + chunk]);
            let mut table = proc.page_table.lock();
            table.set_accessed(page_va);
            table.set_dirty(page_va);
            copied += chunk;
        }
        Ok(())
    }
}
