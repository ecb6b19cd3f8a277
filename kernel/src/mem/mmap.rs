//! File-backed memory mappings.

use super::page::{Backing, FileSpan, PageKind};
use super::{MmapError, ProcessVm, Vm};
use crate::vfs::{file_ref, FileDescriptor};
use alloc::sync::Arc;
use minnowos_shared::mem::{is_page_aligned, page_round_down, OFFSET, PAGE_FRAME_SIZE};

impl Vm {
    /// Maps `length` bytes of the file behind `fd`, starting at file
    /// offset `offset`, into the address range beginning at `addr`.
    ///
    /// Pages are declared lazily and fault in on first touch. The file
    /// is reopened once, so the mapping survives a later close of `fd`;
    /// every page of the mapping shares that one handle. Returns the
    /// mapped address.
    ///
    /// Either the whole range maps or nothing does: all argument and
    /// overlap checks run before the first page is declared.
    pub fn do_mmap(
        &self,
        proc: &mut ProcessVm,
        addr: usize,
        length: usize,
        writable: bool,
        fd: &FileDescriptor,
        offset: usize,
    ) -> Result<usize, MmapError> {
        if addr == 0 {
            return Err(MmapError::NullAddress);
        }
        if !is_page_aligned(addr) {
            return Err(MmapError::Misaligned);
        }
        if length == 0 {
            return Err(MmapError::ZeroLength);
        }
        let FileDescriptor::Open(file) = fd else {
            return Err(MmapError::Console);
        };
        let page_count = length.div_ceil(PAGE_FRAME_SIZE);
        let end = match page_count
            .checked_mul(PAGE_FRAME_SIZE)
            .and_then(|span| addr.checked_add(span))
        {
            Some(end) if end <= OFFSET => end,
            _ => return Err(MmapError::OutOfRange),
        };
        let mut state = self.state.lock();
        if !proc.spt.range_is_free(addr, end) {
            return Err(MmapError::Overlap);
        }
        let mapping = file_ref(file.lock().reopen());
        let file_len = mapping.lock().length();
        for i in 0..page_count {
            let va = addr + i * PAGE_FRAME_SIZE;
            let page_offset = offset + i * PAGE_FRAME_SIZE;
            let read_bytes = file_len.saturating_sub(page_offset).min(PAGE_FRAME_SIZE);
            let span = FileSpan {
                file: Arc::clone(&mapping),
                offset: page_offset,
                read_bytes,
            };
            let created =
                state.create_page(proc, va, writable, false, PageKind::Uninit(Backing::File(span)));
            debug_assert!(created.is_ok(), "range was checked free");
        }
        log::debug!("mmap {length} bytes at {addr:#x} ({page_count} pages)");
        Ok(addr)
    }

    /// Unmaps the mapping that starts at `addr`.
    ///
    /// Walks forward from `addr` over consecutive pages that share the
    /// mapping's file handle; dirty pages are written back as they are
    /// torn down. Addresses that do not name a file mapping are ignored.
    pub fn do_munmap(&self, proc: &mut ProcessVm, addr: usize) {
        let mut state = self.state.lock();
        let start = page_round_down(addr);
        let Some(first) = proc.spt.get(start) else {
            return;
        };
        let Some(mapping) = state.pages.get(first).mapping_file().cloned() else {
            return;
        };
        let mut va = start;
        loop {
            let Some(id) = proc.spt.get(va) else {
                break;
            };
            let same = state
                .pages
                .get(id)
                .mapping_file()
                .is_some_and(|file| Arc::ptr_eq(file, &mapping));
            if !same {
                break;
            }
            proc.spt.remove(va);
            state.destroy_page(id);
            va += PAGE_FRAME_SIZE;
        }
        log::debug!("munmap at {start:#x} up to {va:#x}");
    }
}

#[cfg(test)]
mod tests {
    use super::super::test::{pattern, test_file, test_vm};
    use super::super::{Backing, MmapError, ProcessVm};
    use crate::vfs::{File, FileDescriptor, MemFile};
    use minnowos_shared::mem::{OFFSET, PAGE_FRAME_SIZE};

    const BASE: usize = 0x2000_0000;

    fn open(bytes: &[u8]) -> FileDescriptor {
        FileDescriptor::Open(test_file(bytes))
    }

    #[test]
    fn arguments_are_validated() {
        let vm = test_vm(2);
        let mut proc = ProcessVm::new();
        let fd = open(b"data");
        assert_eq!(
            vm.do_mmap(&mut proc, 0, 4, true, &fd, 0),
            Err(MmapError::NullAddress)
        );
        assert_eq!(
            vm.do_mmap(&mut proc, BASE + 7, 4, true, &fd, 0),
            Err(MmapError::Misaligned)
        );
        assert_eq!(
            vm.do_mmap(&mut proc, BASE, 0, true, &fd, 0),
            Err(MmapError::ZeroLength)
        );
        assert_eq!(
            vm.do_mmap(&mut proc, BASE, 4, true, &FileDescriptor::Console, 0),
            Err(MmapError::Console)
        );
        assert_eq!(
            vm.do_mmap(&mut proc, OFFSET - PAGE_FRAME_SIZE, 2 * PAGE_FRAME_SIZE, true, &fd, 0),
            Err(MmapError::OutOfRange)
        );
        assert_eq!(proc.page_count(), 0);
    }

    #[test]
    fn overlap_is_rejected_atomically() {
        let vm = test_vm(2);
        let mut proc = ProcessVm::new();
        vm.alloc_page(
            &mut proc,
            BASE + 2 * PAGE_FRAME_SIZE,
            true,
            Backing::Anon { load: None },
        )
        .unwrap();
        let fd = open(&pattern(1, 3 * PAGE_FRAME_SIZE));
        assert_eq!(
            vm.do_mmap(&mut proc, BASE, 3 * PAGE_FRAME_SIZE, true, &fd, 0),
            Err(MmapError::Overlap)
        );
        // Nothing was created for the non-overlapping prefix.
        assert_eq!(proc.page_count(), 1);
    }

    #[test]
    fn pages_fault_in_from_the_file() {
        let content = pattern(2, PAGE_FRAME_SIZE + 300);
        let vm = test_vm(4);
        let mut proc = ProcessVm::new();
        let fd = open(&content);
        let addr = vm
            .do_mmap(&mut proc, BASE, content.len(), false, &fd, 0)
            .unwrap();
        assert_eq!(addr, BASE);
        assert_eq!(proc.page_count(), 2);
        assert_eq!(vm.stats().frames_in_use, 0);
        let first = vm.copy_from_user(&proc, BASE, PAGE_FRAME_SIZE).unwrap();
        assert_eq!(first, content[..PAGE_FRAME_SIZE]);
        // Final page: 300 file bytes then zero fill.
        let last = vm
            .copy_from_user(&proc, BASE + PAGE_FRAME_SIZE, PAGE_FRAME_SIZE)
            .unwrap();
        assert_eq!(&last[..300], &content[PAGE_FRAME_SIZE..]);
        assert!(last[300..].iter().all(|&b| b == 0));
    }

    #[test]
    fn mapping_survives_closing_the_descriptor() {
        let content = pattern(6, 128);
        let vm = test_vm(2);
        let mut proc = ProcessVm::new();
        let fd = open(&content);
        vm.do_mmap(&mut proc, BASE, content.len(), false, &fd, 0)
            .unwrap();
        drop(fd);
        assert_eq!(
            vm.copy_from_user(&proc, BASE, 128).unwrap(),
            content
        );
    }

    #[test]
    fn munmap_writes_dirty_pages_back() {
        let file = MemFile::with_contents(&pattern(3, 2 * PAGE_FRAME_SIZE));
        let vm = test_vm(4);
        let mut proc = ProcessVm::new();
        let fd = FileDescriptor::Open(crate::vfs::file_ref(file.reopen()));
        vm.do_mmap(&mut proc, BASE, 2 * PAGE_FRAME_SIZE, true, &fd, 0)
            .unwrap();
        let replacement = pattern(9, PAGE_FRAME_SIZE);
        vm.copy_to_user(&proc, BASE, &replacement).unwrap();
        // Second page read but never written.
        vm.copy_from_user(&proc, BASE + PAGE_FRAME_SIZE, 64).unwrap();
        vm.do_munmap(&mut proc, BASE);
        let after = file.contents();
        assert_eq!(&after[..PAGE_FRAME_SIZE], &replacement[..]);
        assert_eq!(
            &after[PAGE_FRAME_SIZE..],
            &pattern(3, 2 * PAGE_FRAME_SIZE)[PAGE_FRAME_SIZE..]
        );
        assert_eq!(proc.page_count(), 0);
        assert_eq!(vm.stats().frames_in_use, 0);
    }

    #[test]
    fn eviction_writes_dirty_file_page_back_and_reloads() {
        let file = MemFile::with_contents(&pattern(4, PAGE_FRAME_SIZE));
        let vm = test_vm(1);
        let mut proc = ProcessVm::new();
        let fd = FileDescriptor::Open(crate::vfs::file_ref(file.reopen()));
        vm.do_mmap(&mut proc, BASE, PAGE_FRAME_SIZE, true, &fd, 0)
            .unwrap();
        let replacement = pattern(11, PAGE_FRAME_SIZE);
        vm.copy_to_user(&proc, BASE, &replacement).unwrap();
        assert_eq!(file.contents(), pattern(4, PAGE_FRAME_SIZE));
        // Force the dirty page out: writeback goes to the file, not swap.
        vm.alloc_page(&mut proc, BASE + PAGE_FRAME_SIZE, true, Backing::Anon { load: None })
            .unwrap();
        vm.claim_page(&proc, BASE + PAGE_FRAME_SIZE).unwrap();
        assert_eq!(file.contents(), replacement);
        assert_eq!(vm.stats().swap_slots_in_use, 0);
        // Reload comes from the file.
        assert_eq!(
            vm.copy_from_user(&proc, BASE, PAGE_FRAME_SIZE).unwrap(),
            replacement
        );
    }

    #[test]
    fn short_mapping_writes_back_its_span() {
        let file = MemFile::with_contents(&[0u8; 1024]);
        let vm = test_vm(2);
        let mut proc = ProcessVm::new();
        let fd = FileDescriptor::Open(crate::vfs::file_ref(file.reopen()));
        vm.do_mmap(&mut proc, 0x1000_0000, 1024, true, &fd, 0).unwrap();
        assert_eq!(proc.page_count(), 1);
        let written = pattern(7, 1024);
        vm.copy_to_user(&proc, 0x1000_0000, &written).unwrap();
        vm.do_munmap(&mut proc, 0x1000_0000);
        assert_eq!(file.contents(), written);
    }

    #[test]
    fn clean_pages_are_not_written_back() {
        let original = pattern(5, PAGE_FRAME_SIZE);
        let file = MemFile::with_contents(&original);
        let vm = test_vm(2);
        let mut proc = ProcessVm::new();
        let fd = FileDescriptor::Open(crate::vfs::file_ref(file.reopen()));
        vm.do_mmap(&mut proc, BASE, PAGE_FRAME_SIZE, true, &fd, 0)
            .unwrap();
        vm.copy_from_user(&proc, BASE, PAGE_FRAME_SIZE).unwrap();
        vm.do_munmap(&mut proc, BASE);
        assert_eq!(file.contents(), original);
    }

    #[test]
    fn munmap_stops_at_a_neighbouring_mapping() {
        let vm = test_vm(4);
        let mut proc = ProcessVm::new();
        let first = open(&pattern(1, PAGE_FRAME_SIZE));
        let second = open(&pattern(2, PAGE_FRAME_SIZE));
        vm.do_mmap(&mut proc, BASE, PAGE_FRAME_SIZE, false, &first, 0)
            .unwrap();
        vm.do_mmap(&mut proc, BASE + PAGE_FRAME_SIZE, PAGE_FRAME_SIZE, false, &second, 0)
            .unwrap();
        vm.do_munmap(&mut proc, BASE);
        assert_eq!(proc.page_count(), 1);
        assert!(proc.spt.get(BASE).is_none());
        assert!(proc.spt.get(BASE + PAGE_FRAME_SIZE).is_some());
    }

    #[test]
    fn munmap_of_non_mapping_is_a_no_op() {
        let vm = test_vm(2);
        let mut proc = ProcessVm::new();
        vm.alloc_page(&mut proc, BASE, true, Backing::Anon { load: None })
            .unwrap();
        vm.do_munmap(&mut proc, BASE);
        vm.do_munmap(&mut proc, BASE + PAGE_FRAME_SIZE);
        assert_eq!(proc.page_count(), 1);
    }
}
