//! Executable loading: lazy segments and the initial stack.

use super::fault::grow_stack;
use super::page::{Backing, FileSpan};
use super::{ProcessVm, Vm, VmError};
use crate::vfs::FileRef;
use alloc::sync::Arc;
use minnowos_shared::mem::{is_page_aligned, PAGE_FRAME_SIZE, USER_STACK_TOP};

/// Declares the pages of an executable segment without reading any of
/// it; each page loads from `file` on its first fault.
///
/// `read_bytes` bytes starting at `offset` come from the file, followed
/// by `zero_bytes` of zeroes; the sum must be a whole number of pages
/// and `va` must be page-aligned. Pages load as anonymous memory: once
/// faulted in they never touch the image again.
#[allow(clippy::too_many_arguments)]
pub fn load_segment(
    vm: &Vm,
    proc: &mut ProcessVm,
    file: &FileRef,
    offset: usize,
    va: usize,
    read_bytes: usize,
    zero_bytes: usize,
    writable: bool,
) -> Result<(), VmError> {
    assert!(is_page_aligned(va), "segment start {va:#x} is not aligned");
    assert!(
        (read_bytes + zero_bytes) % PAGE_FRAME_SIZE == 0,
        "segment does not cover whole pages"
    );
    let mut offset = offset;
    let mut va = va;
    let mut read_bytes = read_bytes;
    let mut zero_bytes = zero_bytes;
    while read_bytes > 0 || zero_bytes > 0 {
        let page_read = read_bytes.min(PAGE_FRAME_SIZE);
        let load = (page_read > 0).then(|| FileSpan {
            file: Arc::clone(file),
            offset,
            read_bytes: page_read,
        });
        vm.alloc_page(proc, va, writable, Backing::Anon { load })?;
        read_bytes -= page_read;
        zero_bytes -= PAGE_FRAME_SIZE - page_read;
        offset += page_read;
        va += PAGE_FRAME_SIZE;
    }
    Ok(())
}

/// Creates and claims the first stack page. Returns the initial stack
/// pointer, which sits at the very top of user space.
pub fn setup_stack(vm: &Vm, proc: &mut ProcessVm) -> Result<usize, VmError> {
    let mut state = vm.state.lock();
    grow_stack(&mut state, proc, USER_STACK_TOP - PAGE_FRAME_SIZE)?;
    Ok(USER_STACK_TOP)
}
