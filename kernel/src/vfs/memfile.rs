use super::{File, Result};
use crate::sync::Mutex;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// A file kept entirely in kernel memory.
///
/// Used for the initrd filesystem and as the backing object in VM tests.
/// All handles produced by [`File::reopen`] share the same bytes, so a
/// writeback through one handle is visible through every other.
pub struct MemFile {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemFile {
    pub fn new() -> Self {
        Self::with_contents(&[])
    }

    pub fn with_contents(bytes: &[u8]) -> Self {
        Self {
            data: Arc::new(Mutex::new(bytes.to_vec())),
        }
    }

    /// Snapshot of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl Default for MemFile {
    fn default() -> Self {
        Self::new()
    }
}

impl File for MemFile {
    fn length(&self) -> usize {
        self.data.lock().len()
    }

    fn read_at(&mut self, buf: &mut [u8], offset: usize) -> Result<usize> {
        let data = self.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&mut self, buf: &[u8], offset: usize) -> Result<usize> {
        let mut data = self.data.lock();
        let end = offset + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn reopen(&self) -> Box<dyn File> {
        Box::new(Self {
            data: Arc::clone(&self.data),
        })
    }
}
