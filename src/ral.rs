//! Register access
//!
//! Re-exports the `ral-registers` macros, and provides a volatile register
//! cell that conforms to the RAL's register API. The same register block
//! types describe memory-mapped peripherals on the device and plain memory
//! in host tests.

pub use ral_registers::{modify_reg, read_reg, write_reg};

use core::cell::UnsafeCell;

/// A read-write register
///
/// All accesses are volatile.
#[repr(transparent)]
pub struct Register<T>(UnsafeCell<T>);

// Safety: every access is a single volatile load or store.
unsafe impl<T: Send> Sync for Register<T> {}

impl<T> Register<T> {
    /// Create a register holding `val`
    ///
    /// Only meaningful for register blocks that live in RAM.
    pub const fn new(val: T) -> Self {
        Register(UnsafeCell::new(val))
    }
}

impl<T: Copy> Register<T> {
    /// Volatile load of the register value
    #[inline(always)]
    pub fn read(&self) -> T {
        // Safety: pointer comes from a live UnsafeCell.
        unsafe { self.0.get().read_volatile() }
    }

    /// Volatile store of `val`
    #[inline(always)]
    pub fn write(&self, val: T) {
        // Safety: pointer comes from a live UnsafeCell.
        unsafe { self.0.get().write_volatile(val) }
    }

    /// Address of the register, as seen by a bus master
    pub fn address(&self) -> u32 {
        self.0.get() as usize as u32
    }
}
