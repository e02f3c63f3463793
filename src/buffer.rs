//! Capture buffer memory

use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, Ordering},
};

/// Default capture buffer capacity, in bytes
pub const CAPTURE_BUFFER_SIZE: usize = 256 * 1024;

/// Memory for the capture buffer
///
/// Allocate a `static` object, and take its memory once to construct
/// the [`Engine`](crate::Engine). The memory is word aligned, so that the
/// capture unit's DMA channel can write whole words into it.
///
/// ```
/// use sigprobe::{CaptureMemory, CAPTURE_BUFFER_SIZE};
///
/// static CAPTURE_MEMORY: CaptureMemory<CAPTURE_BUFFER_SIZE> = CaptureMemory::new();
///
/// let buffer = CAPTURE_MEMORY.take().unwrap();
/// assert_eq!(buffer.len(), CAPTURE_BUFFER_SIZE);
/// assert!(CAPTURE_MEMORY.take().is_none());
/// ```
#[repr(C, align(4))]
pub struct CaptureMemory<const SIZE: usize> {
    memory: UnsafeCell<[u8; SIZE]>,
    taken: AtomicBool,
}

// Safety: the memory is only reachable through take(), which hands out
// at most one reference.
unsafe impl<const SIZE: usize> Sync for CaptureMemory<SIZE> {}

impl<const SIZE: usize> CaptureMemory<SIZE> {
    /// Allocate zeroed capture memory
    pub const fn new() -> Self {
        CaptureMemory {
            memory: UnsafeCell::new([0; SIZE]),
            taken: AtomicBool::new(false),
        }
    }

    /// Take the memory
    ///
    /// Returns `None` if the memory was already taken.
    #[allow(clippy::mut_from_ref)] // Guarded by the taken flag.
    pub fn take(&self) -> Option<&mut [u8]> {
        if self.taken.swap(true, Ordering::SeqCst) {
            None
        } else {
            // Safety: first and only caller to observe !taken.
            Some(unsafe { &mut *self.memory.get() })
        }
    }
}

impl<const SIZE: usize> Default for CaptureMemory<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}
