//! Session configuration
//!
//! Turns a host request into a session the engine can stream. Pattern
//! sessions fill the capture buffer up front. Hardware sessions claim a
//! capture unit and reserve buffer space; the samples arrive after the
//! session starts.

use crate::{
    capture::{CaptureConfig, CaptureResources, CaptureUnit},
    engine::Fault,
    protocol::{SessionConfiguration, SessionKind},
};

/// The pattern sequence repeats after this many bytes
pub const PATTERN_MODULUS: usize = 251;

/// Returns the pattern byte at `index`
#[inline]
pub const fn pattern_byte(index: usize) -> u8 {
    (index % PATTERN_MODULUS) as u8
}

/// Fill `buffer` with the pattern sequence, starting at index 0
pub fn fill_pattern(buffer: &mut [u8]) {
    buffer
        .iter_mut()
        .enumerate()
        .for_each(|(idx, byte)| *byte = pattern_byte(idx));
}

/// A configured session, ready to start
pub struct Materialized<'r> {
    /// The session record reported to the host
    pub config: SessionConfiguration,
    /// The capture unit bound to a hardware session
    pub capture: Option<CaptureUnit<'r>>,
}

/// Buffer capacity as a wire count
fn capacity(buffer: &[u8]) -> u32 {
    u32::try_from(buffer.len()).unwrap_or(u32::MAX)
}

/// Validate and materialize `request` against the capture buffer
///
/// The returned record carries the sample count the session honors, which
/// may be smaller than requested, and the bytes the session will stream.
/// The caller must release any capture unit from a prior session before
/// calling, so that the hardware session can claim it.
pub fn materialize<'r>(
    request: SessionConfiguration,
    buffer: &mut [u8],
    resources: &'r CaptureResources<'r>,
    capture_config: CaptureConfig,
) -> Result<Materialized<'r>, Fault> {
    match request.kind {
        SessionKind::Pattern => {
            let sample_count = request.sample_count.min(capacity(buffer));
            fill_pattern(&mut buffer[..sample_count as usize]);
            if sample_count != request.sample_count {
                debug!(
                    "PATTERN CLAMPED {} TO {}",
                    request.sample_count, sample_count
                );
            }
            Ok(Materialized {
                config: SessionConfiguration {
                    kind: SessionKind::Pattern,
                    sample_count,
                    bytes_left: sample_count,
                },
                capture: None,
            })
        }
        SessionKind::HardwareCapture => {
            let capture = resources
                .claim(capture_config)
                .ok_or(Fault::CaptureClaim)?;
            let reservation = capture.reserve(capacity(buffer), request.sample_count);
            Ok(Materialized {
                config: SessionConfiguration {
                    kind: SessionKind::HardwareCapture,
                    sample_count: reservation.sample_count,
                    bytes_left: reservation.byte_len,
                },
                capture: Some(capture),
            })
        }
    }
}

/// Run the start path for a configured session
///
/// On success, `config.bytes_left` holds the session's byte budget. For a
/// hardware session, the capture unit is armed and running.
pub fn start(
    config: &mut SessionConfiguration,
    buffer: &mut [u8],
    capture: Option<&mut CaptureUnit<'_>>,
) -> Result<(), Fault> {
    match config.kind {
        SessionKind::Pattern => {
            config.bytes_left = config.sample_count;
            Ok(())
        }
        SessionKind::HardwareCapture => {
            let capture = capture.ok_or(Fault::CaptureNotBound)?;
            if capture.is_running() {
                return Err(Fault::CaptureBusy);
            }
            let reservation = capture.reserve(capacity(buffer), config.sample_count);
            if reservation.sample_count != config.sample_count {
                return Err(Fault::CaptureShortfall {
                    expected: config.sample_count,
                    honored: reservation.sample_count,
                });
            }
            capture
                .arm(buffer, reservation.words)
                .map_err(Fault::Arm)?;
            config.bytes_left = reservation.byte_len;
            Ok(())
        }
    }
}
