//! Page fault resolution.
//!
//! The trap handler forwards user faults here with the faulting address,
//! the access kind, and the user stack pointer at the time of the fault.
//! A resolved fault returns `Ok` and the instruction is retried; an
//! error means the process is killed.

use super::page::{PageId, PageKind};
use super::{ProcessVm, Vm, VmError, VmState};
use minnowos_shared::mem::{
    is_kernel_vaddr, page_round_down, MAX_STACK_SIZE, USER_STACK_TOP, WORD_SIZE,
};

/// Whether a fault at `addr` looks like the stack growing.
///
/// `push` faults one word below the stack pointer before it moves, so
/// anything at or above `rsp - WORD_SIZE` qualifies, as does anything in
/// the page `rsp` already points into. The address must also fall inside
/// the stack region proper.
fn is_stack_access(addr: usize, rsp: usize) -> bool {
    if addr >= USER_STACK_TOP || addr < USER_STACK_TOP - MAX_STACK_SIZE {
        return false;
    }
    addr >= page_round_down(rsp).min(rsp.saturating_sub(WORD_SIZE))
}

/// Creates and immediately claims one stack page at `va`.
pub(crate) fn grow_stack(
    state: &mut VmState,
    proc: &mut ProcessVm,
    va: usize,
) -> Result<(), VmError> {
    let id = state.create_page(proc, va, true, true, PageKind::Anon { slot: None })?;
    state.claim(id)?;
    proc.stack_bottom = proc.stack_bottom.min(va);
    Ok(())
}

impl VmState {
    /// Binds page `id` to a frame and populates it.
    ///
    /// The frame is attached and mapped before the content transfer so
    /// that the transfer can be observed through the mapping; if the
    /// transfer fails the half-built mapping is torn down again.
    pub(crate) fn claim(&mut self, id: PageId) -> Result<(), VmError> {
        let frame = self.acquire_frame();
        self.frames.attach(frame, id);
        {
            let page = self.pages.get_mut(id);
            debug_assert!(page.frame.is_none(), "claiming a resident page");
            page.frame = Some(frame);
            let (va, writable) = (page.va, page.writable);
            page.table.lock().map(va, frame, writable);
        }
        if let Err(e) = self.swap_in(id, frame) {
            let page = self.pages.get_mut(id);
            page.table.lock().unmap(page.va);
            page.frame = None;
            self.frames.release(frame);
            return Err(e);
        }
        Ok(())
    }
}

impl Vm {
    /// Resolves a user page fault at `addr`.
    ///
    /// `not_present` distinguishes a miss from a rights violation, as
    /// reported by the fault's error code. `rsp` is the user stack
    /// pointer at the time of the fault and feeds the stack heuristic.
    pub fn handle_fault(
        &self,
        proc: &mut ProcessVm,
        addr: usize,
        write: bool,
        not_present: bool,
        rsp: usize,
    ) -> Result<(), VmError> {
        if page_round_down(addr) == 0 || is_kernel_vaddr(addr) {
            return Err(VmError::BadAddress);
        }
        let mut state = self.state.lock();
        match proc.spt.get(addr) {
            Some(id) => {
                let page = state.pages.get(id);
                if write && !page.writable {
                    return Err(VmError::ReadOnly);
                }
                if !not_present {
                    // Rights violation on a present page that is not a
                    // blocked write; nothing we can fix by loading.
                    return Err(VmError::BadAddress);
                }
                if page.frame.is_some() {
                    // Raced with another thread resolving the same page.
                    return Ok(());
                }
                state.claim(id)
            }
            None => {
                if not_present && is_stack_access(addr, rsp) {
                    let va = page_round_down(addr);
                    log::debug!("growing stack to {va:#x}");
                    grow_stack(&mut state, proc, va)
                } else {
                    Err(VmError::NotMapped)
                }
            }
        }
    }

    /// Makes the page covering `addr` resident without going through a
    /// fault. Used by the loader and anywhere else that wants a page
    /// populated ahead of its first access.
    pub fn claim_page(&self, proc: &ProcessVm, addr: usize) -> Result<(), VmError> {
        let mut state = self.state.lock();
        let id = proc.spt.get(addr).ok_or(VmError::NotMapped)?;
        if state.pages.get(id).frame.is_some() {
            return Ok(());
        }
        state.claim(id)
    }
}
