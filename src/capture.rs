//! The capture unit
//!
//! A capture unit pairs one sampler with one DMA channel. Once armed, the
//! sampler shifts its input pin into words, and the DMA channel moves each
//! word into the capture buffer. Neither needs the CPU until the transfer
//! completes; software observes progress by polling.
//!
//! [`CaptureResources`] owns the register blocks, and hands out at most one
//! [`CaptureUnit`] per DMA channel, sampler, and input pin. Dropping the unit
//! stops the hardware and returns the claims.

use crate::{dma, ral, sampler, Peripherals};
use core::sync::atomic::{self, AtomicU32, Ordering};

/// Bytes in one capture word
pub const BYTES_PER_WORD: u32 = 4;

/// Capture input configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct CaptureConfig {
    /// Input pin number
    pub pin: u8,
    /// Sampler clock divider, integer part
    ///
    /// The sample rate is the system clock divided by this value.
    pub clock_divider: u16,
}

impl Default for CaptureConfig {
    /// Pin 2, sampled at 10 kHz from a 150 MHz system clock.
    fn default() -> Self {
        CaptureConfig {
            pin: 2,
            clock_divider: 15_000,
        }
    }
}

/// A buffer reservation, measured in whole capture words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Reservation {
    /// Words the DMA channel will transfer
    pub words: u32,
    /// Bytes the reservation occupies in the capture buffer
    pub byte_len: u32,
    /// Samples honored for the request
    ///
    /// This is the requested count, unless the buffer couldn't hold it. Then,
    /// it's the number of samples in the words that fit.
    pub sample_count: u32,
}

impl Reservation {
    /// Samples the hardware records, including the padding in the last word
    pub const fn captured_samples(&self) -> u32 {
        self.words * sampler::SAMPLES_PER_WORD
    }
}

/// Reserve capture words for `requested_samples`, in a buffer of `capacity_bytes`
///
/// Never silently drops samples: if the request doesn't fit, the reservation
/// reports the reduced sample count that it honors.
pub fn reserve(capacity_bytes: u32, requested_samples: u32) -> Reservation {
    let required_words = requested_samples.div_ceil(sampler::SAMPLES_PER_WORD);
    let max_words = capacity_bytes / BYTES_PER_WORD;
    if required_words > max_words {
        Reservation {
            words: max_words,
            byte_len: max_words * BYTES_PER_WORD,
            sample_count: max_words * sampler::SAMPLES_PER_WORD,
        }
    } else {
        Reservation {
            words: required_words,
            byte_len: required_words * BYTES_PER_WORD,
            sample_count: requested_samples,
        }
    }
}

/// Reasons the capture unit refused to arm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum ArmError {
    /// The unit is already transferring
    Busy,
    /// The buffer can't hold the requested words
    Capacity { words: u32, buffer_len: usize },
    /// The buffer isn't word aligned
    Misaligned,
}

/// Most channels or samplers that a `CaptureResources` tracks
const MAX_CLAIMS: usize = 32;

/// The hardware that capture units draw from
pub struct CaptureResources<'a> {
    dma: &'a [dma::RegisterBlock],
    samplers: &'a [sampler::RegisterBlock],
    dma_claims: AtomicU32,
    sampler_claims: AtomicU32,
    pin_claims: AtomicU32,
}

impl<'a> CaptureResources<'a> {
    /// Manage the provided DMA channels and samplers
    ///
    /// Only the first 32 of each are used.
    pub fn new(dma: &'a [dma::RegisterBlock], samplers: &'a [sampler::RegisterBlock]) -> Self {
        CaptureResources {
            dma: &dma[..dma.len().min(MAX_CLAIMS)],
            samplers: &samplers[..samplers.len().min(MAX_CLAIMS)],
            dma_claims: AtomicU32::new(0),
            sampler_claims: AtomicU32::new(0),
            pin_claims: AtomicU32::new(0),
        }
    }

    /// Returns the number of units that could be claimed at once
    pub fn capacity(&self) -> usize {
        self.dma.len().min(self.samplers.len())
    }

    /// Claim a DMA channel, a sampler, and the configured input pin
    ///
    /// Returns `None` if any of them is unavailable. The returned unit is
    /// configured, and idle.
    pub fn claim(&self, config: CaptureConfig) -> Option<CaptureUnit<'_>> {
        let pin_mask = 1u32.checked_shl(config.pin.into())?;
        if self.pin_claims.fetch_or(pin_mask, Ordering::SeqCst) & pin_mask != 0 {
            return None;
        }
        let Some(channel) = claim_slot(&self.dma_claims, self.dma.len()) else {
            self.pin_claims.fetch_and(!pin_mask, Ordering::SeqCst);
            return None;
        };
        let Some(unit) = claim_slot(&self.sampler_claims, self.samplers.len()) else {
            self.dma_claims.fetch_and(!(1 << channel), Ordering::SeqCst);
            self.pin_claims.fetch_and(!pin_mask, Ordering::SeqCst);
            return None;
        };

        let capture = CaptureUnit {
            resources: self,
            channel,
            sampler: unit,
            pin: config.pin,
            state: State::Idle,
        };
        capture.configure(config);
        debug!("CLAIM DMA{} SM{} PIN{}", channel, unit, config.pin);
        Some(capture)
    }

    fn release(&self, channel: usize, sampler: usize, pin: u8) {
        self.dma_claims.fetch_and(!(1 << channel), Ordering::SeqCst);
        self.sampler_claims.fetch_and(!(1 << sampler), Ordering::SeqCst);
        self.pin_claims.fetch_and(!(1 << pin), Ordering::SeqCst);
    }
}

impl CaptureResources<'static> {
    /// Manage the capture hardware described by `peripherals`
    pub fn from_peripherals<P: Peripherals>(peripherals: &P) -> Self {
        // Safety: the Peripherals implementation guarantees that the
        // pointers reference that many static register blocks.
        let (dma, samplers) = unsafe {
            (
                core::slice::from_raw_parts(
                    peripherals.dma().cast::<dma::RegisterBlock>(),
                    P::DMA_CHANNELS,
                ),
                core::slice::from_raw_parts(
                    peripherals.samplers().cast::<sampler::RegisterBlock>(),
                    P::SAMPLERS,
                ),
            )
        };
        Self::new(dma, samplers)
    }
}

/// Atomically claims the first free bit below `limit`
fn claim_slot(claims: &AtomicU32, limit: usize) -> Option<usize> {
    (0..limit).find(|&idx| claims.fetch_or(1 << idx, Ordering::SeqCst) & (1 << idx) == 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Running { words: u32 },
    Complete { words: u32 },
}

/// An exclusive binding of one sampler and one DMA channel to an input pin
///
/// The unit can't be copied or cloned. Whoever holds it has the only right
/// to arm, poll, and stop the hardware. Dropping the unit stops the transfer,
/// disables the sampler and its input, and releases the claims, exactly once.
pub struct CaptureUnit<'a> {
    resources: &'a CaptureResources<'a>,
    channel: usize,
    sampler: usize,
    pin: u8,
    state: State,
}

impl<'a> CaptureUnit<'a> {
    fn dma(&self) -> &'a dma::RegisterBlock {
        &self.resources.dma[self.channel]
    }

    fn sm(&self) -> &'a sampler::RegisterBlock {
        &self.resources.samplers[self.sampler]
    }

    /// Program the idle sampler and DMA channel
    fn configure(&self, config: CaptureConfig) {
        let sm = self.sm();
        ral::write_reg!(crate::sampler, sm, CTRL, EN: 0, INPUT_EN: 0);
        ral::write_reg!(crate::sampler, sm, CLKDIV, INT: u32::from(config.clock_divider), FRAC: 0);
        ral::write_reg!(crate::sampler, sm, PINCTRL, IN_BASE: u32::from(config.pin));

        let dma = self.dma();
        ral::write_reg!(crate::dma, dma, READ_ADDR, sm.RXF.address());
        ral::write_reg!(crate::dma, dma, TRANS_COUNT, 0);
        ral::write_reg!(
            crate::dma,
            dma,
            CTRL,
            EN: 0,
            DATA_SIZE: SIZE_WORD,
            INCR_READ: 0,
            INCR_WRITE: 1,
            TREQ_SEL: sampler::DREQ_BASE + self.sampler as u32
        );
    }

    /// Returns the input pin this unit samples
    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Returns the DMA channel index this unit owns
    pub fn channel(&self) -> usize {
        self.channel
    }

    /// Reserve capacity in a buffer of `capacity_bytes`
    ///
    /// See [`reserve`].
    pub fn reserve(&self, capacity_bytes: u32, requested_samples: u32) -> Reservation {
        reserve(capacity_bytes, requested_samples)
    }

    /// Indicates if the unit is armed, and the hardware hasn't yet been
    /// observed to finish
    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }

    /// Returns the DMA channel status
    pub fn status(&self) -> dma::Status {
        self.dma().status()
    }

    /// Start capturing `words` words into `buffer`
    ///
    /// Binds the DMA channel to the start of `buffer`, and enables the
    /// sampler and its input. The call returns immediately; the unit is
    /// running until a poll observes completion.
    pub fn arm(&mut self, buffer: &mut [u8], words: u32) -> Result<(), ArmError> {
        if self.is_running() {
            return Err(ArmError::Busy);
        }
        let byte_len = words as usize * BYTES_PER_WORD as usize;
        if byte_len > buffer.len() {
            return Err(ArmError::Capacity {
                words,
                buffer_len: buffer.len(),
            });
        }
        if buffer.as_ptr() as usize % BYTES_PER_WORD as usize != 0 {
            return Err(ArmError::Misaligned);
        }

        let dma = self.dma();
        ral::write_reg!(crate::dma, dma, WRITE_ADDR, buffer.as_mut_ptr() as usize as u32);
        ral::write_reg!(crate::dma, dma, TRANS_COUNT, words);
        // Buffer writes must land before the channel starts.
        memory_barrier();
        ral::modify_reg!(crate::sampler, self.sm(), CTRL, INPUT_EN: 1, EN: 1);
        ral::modify_reg!(crate::dma, dma, CTRL, EN: 1);

        self.state = State::Running { words };
        debug!("ARM DMA{} WORDS {}", self.channel, words);
        Ok(())
    }

    /// Returns the number of bytes that the hardware has written into the
    /// buffer since the unit was armed
    ///
    /// While running, this is the number of words transferred so far, in
    /// bytes. The poll has a side effect: when it observes that the transfer
    /// finished (count at zero, channel not busy), it disables the sampler and
    /// its input. From then on, every poll returns the full byte count until
    /// the unit is released. An idle unit reports zero.
    pub fn poll_available_bytes(&mut self) -> u32 {
        let bytes = match self.state {
            State::Idle => 0,
            State::Complete { words } => words * BYTES_PER_WORD,
            State::Running { words } => {
                let dma = self.dma();
                let remaining = ral::read_reg!(crate::dma, dma, TRANS_COUNT);
                if remaining == 0 && ral::read_reg!(crate::dma, dma, CTRL, BUSY == 0) {
                    self.halt_sampler();
                    self.state = State::Complete { words };
                    debug!("COMPLETE DMA{} WORDS {}", self.channel, words);
                    words * BYTES_PER_WORD
                } else {
                    words.saturating_sub(remaining) * BYTES_PER_WORD
                }
            }
        };
        // Reads of the reported bytes happen after the count.
        atomic::compiler_fence(Ordering::Acquire);
        bytes
    }

    /// Stop the hardware, and release the claims
    pub fn release(self) {}

    fn halt_sampler(&self) {
        ral::modify_reg!(crate::sampler, self.sm(), CTRL, EN: 0, INPUT_EN: 0);
    }
}

impl Drop for CaptureUnit<'_> {
    fn drop(&mut self) {
        ral::modify_reg!(crate::dma, self.dma(), CTRL, EN: 0);
        self.halt_sampler();
        self.resources.release(self.channel, self.sampler, self.pin);
        debug!("RELEASE DMA{} SM{} PIN{}", self.channel, self.sampler, self.pin);
    }
}

#[inline(always)]
fn memory_barrier() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    cortex_m::asm::dmb();
    atomic::compiler_fence(Ordering::SeqCst);
}
