use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// Alignment of every block, wide enough for any sample type
const BUFFER_ALIGN: usize = 16;

/// A native buffer shared by reference between a caller and the engine
pub type SharedBuffer = Arc<Mutex<NativeBuffer>>;

/// Exclusively owned block of allocator memory
///
/// The block lives outside any Rust collection so that its address stays
/// stable until the next `resize` or `release`. Memory is returned to the
/// allocator on `release` or when the buffer is dropped; there is no other
/// reclamation path, so leaking the owner leaks the block.
///
/// Invariant: `ptr` is `Some` iff `len > 0`.
pub struct NativeBuffer {
    ptr: Option<NonNull<u8>>,
    len: usize,
    resizable: bool,
}

// The block is uniquely owned, so moving it across threads is fine and
// `&NativeBuffer` only hands out shared byte slices.
unsafe impl Send for NativeBuffer {}
unsafe impl Sync for NativeBuffer {}

impl NativeBuffer {
    /// Allocate a resizable zeroed buffer; `size == 0` yields the empty state
    pub fn new(size: usize) -> Result<Self> {
        let mut buf = NativeBuffer {
            ptr: None,
            len: 0,
            resizable: true,
        };
        buf.allocate(size)?;
        Ok(buf)
    }

    /// Allocate a fixed-capacity zeroed buffer
    pub fn fixed(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidSize {
                op: "NativeBuffer::fixed",
                size,
                need: 1,
            });
        }
        let mut buf = NativeBuffer {
            ptr: None,
            len: 0,
            resizable: false,
        };
        buf.allocate(size)?;
        Ok(buf)
    }

    /// Resizable buffer holding a copy of `data`
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut buf = NativeBuffer::new(data.len())?;
        buf.as_bytes_mut().copy_from_slice(data);
        Ok(buf)
    }

    pub fn into_shared(self) -> SharedBuffer {
        Arc::new(Mutex::new(self))
    }

    fn layout(size: usize) -> Result<Layout> {
        Layout::from_size_align(size, BUFFER_ALIGN).map_err(|_| Error::AllocFailed { size })
    }

    fn allocate(&mut self, size: usize) -> Result<()> {
        debug_assert!(self.ptr.is_none());
        if size == 0 {
            return Ok(());
        }
        let layout = Self::layout(size)?;
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(Error::AllocFailed { size })?;
        self.ptr = Some(ptr);
        self.len = size;
        Ok(())
    }

    /// Replace the block with a fresh zeroed one of `size` bytes
    ///
    /// Old contents are not carried over; copy them out first if needed.
    /// Any view obtained before the call is invalidated, which the borrow
    /// checker enforces for the safe accessors.
    pub fn resize(&mut self, size: usize) -> Result<()> {
        if !self.resizable {
            return Err(Error::NotResizable);
        }
        if size == self.len {
            return Ok(());
        }
        self.release();
        self.allocate(size)
    }

    /// Free the block and return to the empty state; safe to repeat
    pub fn release(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            // Layout was validated when the block was allocated.
            if let Ok(layout) = Self::layout(self.len) {
                unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
            }
        }
        self.len = 0;
    }

    pub fn can_resize(&self) -> bool {
        self.resizable
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base address, null in the empty state
    pub fn as_ptr(&self) -> *const u8 {
        match self.ptr {
            Some(p) => p.as_ptr(),
            None => ptr::null(),
        }
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        match self.ptr {
            Some(p) => p.as_ptr(),
            None => ptr::null_mut(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self.ptr {
            Some(p) => unsafe { slice::from_raw_parts(p.as_ptr(), self.len) },
            None => &[],
        }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        match self.ptr {
            Some(p) => unsafe { slice::from_raw_parts_mut(p.as_ptr(), self.len) },
            None => &mut [],
        }
    }

    /// Whether both ends of `data` fall inside this block
    pub fn owns(&self, data: &[u8]) -> bool {
        let base = match self.ptr {
            Some(p) => p.as_ptr() as usize,
            None => return false,
        };
        if data.is_empty() {
            return false;
        }
        let end = base + self.len;
        let first = data.as_ptr() as usize;
        let last = first + data.len() - 1;
        first >= base && first < end && last >= base && last < end
    }

    /// Grow to at least `size` bytes; never shrinks
    pub(crate) fn reserve(&mut self, size: usize) -> Result<()> {
        if self.len >= size {
            return Ok(());
        }
        self.resize(size)
    }
}

impl Drop for NativeBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for NativeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NativeBuffer")
            .field("ptr", &self.as_ptr())
            .field("len", &self.len)
            .field("resizable", &self.resizable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_state_has_null_address() {
        let mut buf = NativeBuffer::new(0).unwrap();
        assert!(buf.as_ptr().is_null());
        assert!(buf.is_empty());
        buf.resize(32).unwrap();
        assert!(!buf.as_ptr().is_null());
        buf.release();
        buf.release();
        assert!(buf.as_ptr().is_null());
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn reserve_never_shrinks() {
        let mut buf = NativeBuffer::new(64).unwrap();
        buf.reserve(16).unwrap();
        assert_eq!(buf.len(), 64);
        buf.reserve(128).unwrap();
        assert_eq!(buf.len(), 128);
    }

    #[test]
    fn blocks_are_aligned_for_wide_samples() {
        let buf = NativeBuffer::new(40).unwrap();
        assert_eq!(buf.as_ptr() as usize % BUFFER_ALIGN, 0);
    }
}
