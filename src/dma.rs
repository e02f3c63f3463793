//! DMA channel registers
//!
//! The module implements a RAL-compatible interface for working
//! with one DMA channel. A channel moves `TRANS_COUNT` transfers
//! from `READ_ADDR` to `WRITE_ADDR`, paced by the request selected
//! in `TREQ_SEL`. Hardware decrements `TRANS_COUNT` as it goes, and
//! holds `BUSY` until the count reaches zero.

#![allow(non_snake_case, non_upper_case_globals)]

use crate::ral::Register;

#[repr(C)]
pub struct RegisterBlock {
    pub READ_ADDR: Register<u32>,
    pub WRITE_ADDR: Register<u32>,
    pub TRANS_COUNT: Register<u32>,
    pub CTRL: Register<u32>,
}

impl RegisterBlock {
    /// Create a register block with all bits cleared
    pub const fn new() -> Self {
        RegisterBlock {
            READ_ADDR: Register::new(0),
            WRITE_ADDR: Register::new(0),
            TRANS_COUNT: Register::new(0),
            CTRL: Register::new(0),
        }
    }

    /// Returns the status bits of the `CTRL` register
    pub fn status(&self) -> Status {
        Status::from_bits_truncate(self.CTRL.read())
    }
}

impl Default for RegisterBlock {
    fn default() -> Self {
        Self::new()
    }
}

bitflags::bitflags! {
    /// Channel status, as reported in `CTRL`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status : u32 {
        const BUSY = 1 << 24;
        const WRITE_ERROR = 1 << 29;
        const READ_ERROR = 1 << 30;
        const AHB_ERROR = 1 << 31;
    }
}

impl Status {
    /// Any of the bus error flags
    pub const ERRORS: Status = Status::WRITE_ERROR
        .union(Status::READ_ERROR)
        .union(Status::AHB_ERROR);
}

pub mod TRANS_COUNT {
    pub mod COUNT {
        pub const offset: u32 = 0;
        pub const mask: u32 = 0xFFFF_FFFF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}

pub mod CTRL {
    pub mod EN {
        pub const offset: u32 = 0;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod DATA_SIZE {
        pub const offset: u32 = 2;
        pub const mask: u32 = 0b11 << offset;
        pub mod RW {
            pub const SIZE_BYTE: u32 = 0;
            pub const SIZE_HALFWORD: u32 = 1;
            pub const SIZE_WORD: u32 = 2;
        }
        pub mod R {}
        pub mod W {}
    }
    pub mod INCR_READ {
        pub const offset: u32 = 4;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod INCR_WRITE {
        pub const offset: u32 = 5;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod TREQ_SEL {
        pub const offset: u32 = 15;
        pub const mask: u32 = 0x3F << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod BUSY {
        pub const offset: u32 = 24;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}
