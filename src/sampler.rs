//! Bit sampler registers
//!
//! A sampler is a small state machine that shifts one input pin into a
//! 32-bit word at the rate set by `CLKDIV`, and pushes each full word into
//! its receive FIFO (`RXF`). A DMA channel paced by the sampler's request
//! line drains the FIFO into memory.

#![allow(non_snake_case, non_upper_case_globals)]

use crate::ral::Register;

/// First DMA pacing request number used by samplers
///
/// Sampler `n` raises request `DREQ_BASE + n`.
pub const DREQ_BASE: u32 = 4;

/// Samples packed into each word that the sampler pushes
pub const SAMPLES_PER_WORD: u32 = 32;

#[repr(C)]
pub struct RegisterBlock {
    pub CTRL: Register<u32>,
    pub CLKDIV: Register<u32>,
    pub PINCTRL: Register<u32>,
    pub RXF: Register<u32>,
}

impl RegisterBlock {
    /// Create a register block with all bits cleared
    pub const fn new() -> Self {
        RegisterBlock {
            CTRL: Register::new(0),
            CLKDIV: Register::new(0),
            PINCTRL: Register::new(0),
            RXF: Register::new(0),
        }
    }
}

impl Default for RegisterBlock {
    fn default() -> Self {
        Self::new()
    }
}

pub mod CTRL {
    /// Run the state machine
    pub mod EN {
        pub const offset: u32 = 0;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    /// Connect the input pin to the state machine
    pub mod INPUT_EN {
        pub const offset: u32 = 1;
        pub const mask: u32 = 1 << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}

pub mod CLKDIV {
    pub mod FRAC {
        pub const offset: u32 = 8;
        pub const mask: u32 = 0xFF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
    pub mod INT {
        pub const offset: u32 = 16;
        pub const mask: u32 = 0xFFFF << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}

pub mod PINCTRL {
    pub mod IN_BASE {
        pub const offset: u32 = 0;
        pub const mask: u32 = 0x1F << offset;
        pub mod RW {}
        pub mod R {}
        pub mod W {}
    }
}
