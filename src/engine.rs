//! The device engine
//!
//! The engine arbitrates the device lifecycle, owns the capture buffer and
//! the current session, and streams session bytes into a [`StreamSink`].
//! Every entry point runs to completion; none of them block. Call them all
//! from the same context, or guard the engine with a critical section.
//!
//! An operation called from a state where it isn't valid is a protocol
//! violation. The engine faults, and stays faulted until [`Engine::reset`].

use crate::{
    capture::{ArmError, CaptureConfig, CaptureResources, CaptureUnit},
    dma,
    protocol::{DecodeError, SessionConfiguration, SessionKind, Status},
    session,
};

/// Device lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum DeviceState {
    Disconnected,
    BusConnected,
    SessionOpen,
    Capturing,
    /// Absorbing; only [`Engine::reset`] leaves it
    Faulted,
}

impl DeviceState {
    /// The wire status for this state
    pub const fn status(self) -> Status {
        match self {
            DeviceState::Disconnected | DeviceState::BusConnected => Status::Closed,
            DeviceState::SessionOpen => Status::Opened,
            DeviceState::Capturing => Status::Running,
            DeviceState::Faulted => Status::Error,
        }
    }
}

/// Engine operations, as named in fault reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Operation {
    BusConnected,
    BusDisconnected,
    Open,
    Close,
    Start,
    Stop,
    ConfigureSession,
}

/// Why the engine faulted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Fault {
    /// `operation` isn't valid in `state`
    Violation {
        state: DeviceState,
        operation: Operation,
    },
    /// The device resource hook refused to acquire
    ResourceAcquisition,
    /// The device resource hook refused to release
    ResourceRelease,
    /// No capture unit was available for a hardware session
    CaptureClaim,
    /// A hardware session started without a capture unit
    CaptureNotBound,
    /// A hardware session started while its capture unit was running
    CaptureBusy,
    /// The capture unit couldn't honor the configured sample count
    CaptureShortfall { expected: u32, honored: u32 },
    /// The capture unit reported fewer bytes than were already streamed
    CaptureRegression { produced: u32, transferred: u32 },
    /// Streamed bytes would run past the end of the capture buffer
    BufferOverrun { end: u32, capacity: u32 },
    /// The DMA channel flagged a bus error; holds the status bits
    CaptureBus(u32),
    /// The capture unit refused to arm
    Arm(ArmError),
    /// The host sent a record that couldn't be decoded
    MalformedRequest(DecodeError),
}

/// Device resource hooks
///
/// Implement this to acquire and release whatever the device needs for an
/// open session, or to drive a status indicator from state changes. All
/// methods have defaults; `()` uses them all.
pub trait Resources {
    /// Called when the host opens a session
    ///
    /// Return `false` if the resources can't be acquired; the engine faults.
    fn acquire(&mut self) -> bool {
        true
    }
    /// Called when the host closes a session
    ///
    /// Return `false` if the resources can't be released; the engine faults.
    fn release(&mut self) -> bool {
        true
    }
    /// Called after every state change
    fn state_changed(&mut self, _from: DeviceState, _to: DeviceState) {}
}

impl Resources for () {}

/// Destination for streamed bytes
pub trait StreamSink {
    /// Returns the number of bytes the sink can accept right now
    fn available(&self) -> usize;
    /// Accept up to `bytes.len()` bytes, returning the number accepted
    ///
    /// `bytes` is never longer than the most recent [`available`](Self::available).
    fn write(&mut self, bytes: &[u8]) -> usize;
    /// Mark the end of a stream
    fn flush(&mut self) {}
}

/// The device engine
pub struct Engine<'a, R = ()> {
    buffer: &'a mut [u8],
    resources: &'a CaptureResources<'a>,
    capture_config: CaptureConfig,
    hooks: R,
    state: DeviceState,
    session: SessionConfiguration,
    capture: Option<CaptureUnit<'a>>,
    transfer_offset: u32,
    fault: Option<Fault>,
}

impl<'a> Engine<'a> {
    /// Create an engine that owns `buffer`, and draws capture units from
    /// `resources`
    pub fn new(buffer: &'a mut [u8], resources: &'a CaptureResources<'a>) -> Self {
        Self::with_hooks(buffer, resources, ())
    }
}

impl<'a, R: Resources> Engine<'a, R> {
    /// Create an engine that calls `hooks` for device resources
    pub fn with_hooks(
        buffer: &'a mut [u8],
        resources: &'a CaptureResources<'a>,
        hooks: R,
    ) -> Self {
        Engine {
            buffer,
            resources,
            capture_config: CaptureConfig::default(),
            hooks,
            state: DeviceState::Disconnected,
            session: SessionConfiguration::default(),
            capture: None,
            transfer_offset: 0,
            fault: None,
        }
    }

    /// Set the capture input for subsequent hardware sessions
    pub fn set_capture_config(&mut self, config: CaptureConfig) {
        self.capture_config = config;
    }

    /// Returns the capture input configuration
    pub fn capture_config(&self) -> CaptureConfig {
        self.capture_config
    }

    /// Returns the device resource hooks
    pub fn hooks(&self) -> &R {
        &self.hooks
    }

    /// Returns the device resource hooks
    pub fn hooks_mut(&mut self) -> &mut R {
        &mut self.hooks
    }

    /// Returns the lifecycle state
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Returns the wire status
    pub fn status(&self) -> Status {
        self.state.status()
    }

    /// Returns the reason the engine faulted
    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }

    /// Returns the most recent session record
    pub fn session_configuration(&self) -> SessionConfiguration {
        self.session
    }

    /// Returns the number of session bytes handed to the sink so far
    pub fn transfer_offset(&self) -> u32 {
        self.transfer_offset
    }

    /// Returns the capture buffer capacity, in bytes
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// The host configured the device
    pub fn bus_connected(&mut self) {
        match self.state {
            DeviceState::Disconnected => self.transition(DeviceState::BusConnected),
            DeviceState::BusConnected => {}
            DeviceState::Faulted => self.reject(Operation::BusConnected),
            _ => self.violation(Operation::BusConnected),
        }
    }

    /// The device left the configured state
    ///
    /// Releases any capture unit, and the device resources held for an open
    /// session. A refused release faults. Ignored while faulted.
    pub fn bus_disconnected(&mut self) {
        match self.state {
            DeviceState::Faulted => self.reject(Operation::BusDisconnected),
            DeviceState::Disconnected | DeviceState::BusConnected => {
                self.stop_capture();
                self.transition(DeviceState::Disconnected);
            }
            DeviceState::SessionOpen | DeviceState::Capturing => {
                self.stop_capture();
                if self.hooks.release() {
                    self.transition(DeviceState::Disconnected);
                } else {
                    self.fail(Fault::ResourceRelease);
                }
            }
        }
    }

    /// Open a session
    pub fn open(&mut self) -> Status {
        match self.state {
            DeviceState::BusConnected => {
                if self.hooks.acquire() {
                    self.transition(DeviceState::SessionOpen);
                } else {
                    self.fail(Fault::ResourceAcquisition);
                }
            }
            DeviceState::SessionOpen => {}
            DeviceState::Faulted => self.reject(Operation::Open),
            _ => self.violation(Operation::Open),
        }
        self.status()
    }

    /// Close the session, stopping any capture
    pub fn close(&mut self) -> Status {
        match self.state {
            DeviceState::SessionOpen | DeviceState::Capturing => {
                self.stop_capture();
                if self.hooks.release() {
                    self.transition(DeviceState::BusConnected);
                } else {
                    self.fail(Fault::ResourceRelease);
                }
            }
            DeviceState::BusConnected => {}
            DeviceState::Faulted => self.reject(Operation::Close),
            DeviceState::Disconnected => self.violation(Operation::Close),
        }
        self.status()
    }

    /// Start the configured session
    ///
    /// Starting while capturing stops the active capture, then starts again.
    /// A hardware session's capture unit is released by that stop, so the
    /// restart faults; reconfigure instead.
    pub fn start(&mut self) -> Status {
        match self.state {
            DeviceState::SessionOpen | DeviceState::Capturing => {
                if self.state == DeviceState::Capturing {
                    self.stop_capture();
                }
                match session::start(&mut self.session, self.buffer, self.capture.as_mut()) {
                    Ok(()) => {
                        self.transfer_offset = 0;
                        self.transition(DeviceState::Capturing);
                    }
                    Err(fault) => self.fail(fault),
                }
            }
            DeviceState::Faulted => self.reject(Operation::Start),
            _ => self.violation(Operation::Start),
        }
        self.status()
    }

    /// Stop the active capture, and release its capture unit
    pub fn stop(&mut self) -> Status {
        match self.state {
            DeviceState::Capturing => self.stop_capture(),
            DeviceState::SessionOpen => {}
            DeviceState::Faulted => self.reject(Operation::Stop),
            _ => self.violation(Operation::Stop),
        }
        self.status()
    }

    /// Validate and materialize a session request
    ///
    /// Fetch the result with [`session_configuration`](Self::session_configuration).
    /// Configuring while capturing stops the active capture first.
    pub fn configure_session(&mut self, request: SessionConfiguration) {
        if self.state == DeviceState::Faulted {
            return self.reject(Operation::ConfigureSession);
        }
        self.stop_capture();
        match session::materialize(
            request,
            self.buffer,
            self.resources,
            self.capture_config,
        ) {
            Ok(materialized) => {
                self.session = materialized.config;
                self.capture = materialized.capture;
                info!(
                    "SESSION {:?} SAMPLES {} BYTES {}",
                    self.session.kind, self.session.sample_count, self.session.bytes_left
                );
            }
            Err(fault) => self.fail(fault),
        }
    }

    /// Run one streaming step
    ///
    /// Moves as many produced bytes into `sink` as it can take right now.
    /// Once the session's budget is spent, flushes the sink and stops. Does
    /// nothing unless capturing.
    pub fn tick<S: StreamSink>(&mut self, sink: &mut S) {
        if self.state != DeviceState::Capturing {
            return;
        }
        if self.session.bytes_left == 0 {
            sink.flush();
            self.stop_capture();
            return;
        }

        let produced = match self.session.kind {
            SessionKind::Pattern => self.session.sample_count,
            SessionKind::HardwareCapture => {
                let Some(capture) = self.capture.as_mut() else {
                    return self.fail(Fault::CaptureNotBound);
                };
                let status = capture.status();
                if status.intersects(dma::Status::ERRORS) {
                    return self.fail(Fault::CaptureBus(status.bits()));
                }
                capture.poll_available_bytes()
            }
        };

        let Some(available) = produced.checked_sub(self.transfer_offset) else {
            return self.fail(Fault::CaptureRegression {
                produced,
                transferred: self.transfer_offset,
            });
        };
        let available = available
            .min(self.session.bytes_left)
            .min(u32::try_from(sink.available()).unwrap_or(u32::MAX));
        if available == 0 {
            return;
        }

        let start = self.transfer_offset as usize;
        let end = start + available as usize;
        let Some(bytes) = self.buffer.get(start..end) else {
            return self.fail(Fault::BufferOverrun {
                end: end as u32,
                capacity: self.buffer.len() as u32,
            });
        };
        let accepted = (sink.write(bytes) as u32).min(available);
        self.transfer_offset += accepted;
        self.session.bytes_left -= accepted;
    }

    /// Enter the faulted state for `fault`
    ///
    /// Releases the capture unit. A second fault keeps the first reason.
    pub fn fail(&mut self, fault: Fault) {
        self.capture = None;
        if self.state == DeviceState::Faulted {
            warn!("ALREADY FAULTED, DROPPING {:?}", fault);
            return;
        }
        error!("FAULT IN {:?}: {:?}", self.state, fault);
        self.fault = Some(fault);
        self.transition(DeviceState::Faulted);
    }

    /// Reinitialize the engine, as if the device was power cycled
    ///
    /// Releases the capture unit, forgets the session, and returns to
    /// [`DeviceState::Disconnected`]. Device resource hooks are not called.
    pub fn reset(&mut self) {
        self.capture = None;
        self.session = SessionConfiguration::default();
        self.transfer_offset = 0;
        self.fault = None;
        self.transition(DeviceState::Disconnected);
    }

    /// Release the capture unit, rewind the cursor, and leave the capturing
    /// state
    fn stop_capture(&mut self) {
        self.capture = None;
        self.transfer_offset = 0;
        if self.state == DeviceState::Capturing {
            self.transition(DeviceState::SessionOpen);
        }
    }

    fn violation(&mut self, operation: Operation) {
        self.fail(Fault::Violation {
            state: self.state,
            operation,
        });
    }

    #[cfg_attr(
        not(any(feature = "defmt-03", feature = "log")),
        allow(unused_variables)
    )]
    fn reject(&self, operation: Operation) {
        warn!("FAULTED, REJECTING {:?}", operation);
    }

    fn transition(&mut self, to: DeviceState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("{:?} -> {:?}", from, to);
        self.state = to;
        self.hooks.state_changed(from, to);
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use super::*;
    use crate::{capture::sim, sampler, session::pattern_byte, CaptureMemory};

    /// A sink that takes at most `capacity` bytes per call
    struct Sink {
        capacity: usize,
        received: Vec<u8>,
        largest_write: usize,
        flushes: usize,
    }

    impl Sink {
        fn new(capacity: usize) -> Self {
            Sink {
                capacity,
                received: Vec::new(),
                largest_write: 0,
                flushes: 0,
            }
        }
    }

    impl StreamSink for Sink {
        fn available(&self) -> usize {
            self.capacity
        }
        fn write(&mut self, bytes: &[u8]) -> usize {
            assert!(bytes.len() <= self.capacity);
            self.largest_write = self.largest_write.max(bytes.len());
            self.received.extend_from_slice(bytes);
            bytes.len()
        }
        fn flush(&mut self) {
            self.flushes += 1;
        }
    }

    /// Records state changes, and can refuse resources
    #[derive(Default)]
    struct Hooks {
        refuse: bool,
        acquired: usize,
        released: usize,
        changes: Vec<(DeviceState, DeviceState)>,
    }

    impl Resources for Hooks {
        fn acquire(&mut self) -> bool {
            self.acquired += 1;
            !self.refuse
        }
        fn release(&mut self) -> bool {
            self.released += 1;
            !self.refuse
        }
        fn state_changed(&mut self, from: DeviceState, to: DeviceState) {
            self.changes.push((from, to));
        }
    }

    fn no_hardware() -> &'static CaptureResources<'static> {
        std::boxed::Box::leak(std::boxed::Box::new(CaptureResources::new(&[], &[])))
    }

    fn opened(engine: &mut Engine<'_, impl Resources>) {
        engine.bus_connected();
        assert_eq!(engine.open(), Status::Opened);
    }

    #[test]
    fn scenario_pattern_session() {
        let memory = CaptureMemory::<262_144>::new();
        let mut engine = Engine::new(memory.take().unwrap(), no_hardware());
        opened(&mut engine);

        engine.configure_session(SessionConfiguration::request(SessionKind::Pattern, 1000));
        assert_eq!(
            engine.session_configuration(),
            SessionConfiguration {
                kind: SessionKind::Pattern,
                sample_count: 1000,
                bytes_left: 1000
            }
        );
        assert_eq!(engine.start(), Status::Running);

        let mut sink = Sink::new(64);
        let mut last_left = engine.session_configuration().bytes_left;
        for _ in 0..100 {
            engine.tick(&mut sink);
            let left = engine.session_configuration().bytes_left;
            assert!(left <= last_left);
            last_left = left;
            if engine.state() != DeviceState::Capturing {
                break;
            }
        }
        assert_eq!(engine.status(), Status::Opened);
        assert_eq!(sink.received.len(), 1000);
        assert!(sink.largest_write <= 64);
        assert_eq!(sink.flushes, 1);
        for (idx, &byte) in sink.received.iter().enumerate() {
            assert_eq!(byte, pattern_byte(idx));
        }
        assert_eq!(engine.session_configuration().bytes_left, 0);
    }

    #[test]
    fn scenario_pattern_clamped() {
        let memory = CaptureMemory::<262_144>::new();
        let mut engine = Engine::new(memory.take().unwrap(), no_hardware());
        opened(&mut engine);
        engine.configure_session(SessionConfiguration::request(SessionKind::Pattern, 500_000));
        assert_eq!(engine.session_configuration().sample_count, 262_144);
        assert_eq!(engine.session_configuration().bytes_left, 262_144);
    }

    #[test]
    fn scenario_start_while_disconnected() {
        let memory = CaptureMemory::<64>::new();
        let mut engine = Engine::new(memory.take().unwrap(), no_hardware());
        assert_eq!(engine.start(), Status::Error);
        assert_eq!(engine.state(), DeviceState::Faulted);
        assert_eq!(
            engine.fault(),
            Some(Fault::Violation {
                state: DeviceState::Disconnected,
                operation: Operation::Start
            })
        );

        engine.bus_connected();
        assert_eq!(engine.open(), Status::Error);
        assert_eq!(engine.status(), Status::Error);
    }

    #[test]
    fn hardware_session() {
        let dma = [dma::RegisterBlock::new()];
        let samplers = [sampler::RegisterBlock::new()];
        let resources = CaptureResources::new(&dma, &samplers);
        let memory = CaptureMemory::<1024>::new();
        let mut engine = Engine::new(memory.take().unwrap(), &resources);
        opened(&mut engine);

        engine.configure_session(SessionConfiguration::request(
            SessionKind::HardwareCapture,
            100,
        ));
        assert_eq!(
            engine.session_configuration(),
            SessionConfiguration {
                kind: SessionKind::HardwareCapture,
                sample_count: 100,
                bytes_left: 16
            }
        );
        assert_eq!(engine.start(), Status::Running);
        assert_eq!(dma[0].TRANS_COUNT.read(), 4);

        // Nothing transferred yet.
        let mut sink = Sink::new(64);
        engine.tick(&mut sink);
        assert!(sink.received.is_empty());

        sim::progress(&dma[0], 2);
        engine.tick(&mut sink);
        assert_eq!(sink.received.len(), 8);
        assert_eq!(engine.session_configuration().bytes_left, 8);

        sim::complete(&dma[0]);
        engine.tick(&mut sink);
        assert_eq!(sink.received.len(), 16);
        assert_eq!(engine.state(), DeviceState::Capturing);

        engine.tick(&mut sink);
        assert_eq!(engine.state(), DeviceState::SessionOpen);
        assert_eq!(sink.flushes, 1);
        assert_eq!(ral_ctrl_en(&dma[0]), 0);

        // The unit is free for the next session.
        engine.configure_session(SessionConfiguration::request(
            SessionKind::HardwareCapture,
            32,
        ));
        assert_eq!(engine.status(), Status::Opened);
        assert_eq!(engine.session_configuration().bytes_left, 4);
    }

    fn ral_ctrl_en(channel: &dma::RegisterBlock) -> u32 {
        crate::ral::read_reg!(crate::dma, channel, CTRL, EN)
    }

    #[test]
    fn hardware_bus_error_faults() {
        let dma = [dma::RegisterBlock::new()];
        let samplers = [sampler::RegisterBlock::new()];
        let resources = CaptureResources::new(&dma, &samplers);
        let memory = CaptureMemory::<64>::new();
        let mut engine = Engine::new(memory.take().unwrap(), &resources);
        opened(&mut engine);
        engine.configure_session(SessionConfiguration::request(
            SessionKind::HardwareCapture,
            64,
        ));
        engine.start();
        sim::bus_error(&dma[0]);

        engine.tick(&mut Sink::new(64));
        assert_eq!(engine.state(), DeviceState::Faulted);
        assert!(matches!(engine.fault(), Some(Fault::CaptureBus(_))));
        assert_eq!(ral_ctrl_en(&dma[0]), 0);
        assert!(resources.claim(CaptureConfig::default()).is_some());
    }

    #[test]
    fn hardware_regression_faults() {
        let dma = [dma::RegisterBlock::new()];
        let samplers = [sampler::RegisterBlock::new()];
        let resources = CaptureResources::new(&dma, &samplers);
        let memory = CaptureMemory::<64>::new();
        let mut engine = Engine::new(memory.take().unwrap(), &resources);
        opened(&mut engine);
        engine.configure_session(SessionConfiguration::request(
            SessionKind::HardwareCapture,
            128,
        ));
        engine.start();

        let mut sink = Sink::new(64);
        sim::progress(&dma[0], 1);
        engine.tick(&mut sink);
        assert_eq!(engine.transfer_offset(), 12);

        // Count registers reloaded behind the engine's back.
        sim::progress(&dma[0], 4);
        engine.tick(&mut sink);
        assert_eq!(
            engine.fault(),
            Some(Fault::CaptureRegression {
                produced: 0,
                transferred: 12
            })
        );
    }

    #[test]
    fn hardware_session_without_hardware_faults() {
        let memory = CaptureMemory::<64>::new();
        let mut engine = Engine::new(memory.take().unwrap(), no_hardware());
        opened(&mut engine);
        engine.configure_session(SessionConfiguration::request(
            SessionKind::HardwareCapture,
            64,
        ));
        assert_eq!(engine.fault(), Some(Fault::CaptureClaim));
        assert_eq!(engine.status(), Status::Error);
    }

    #[test]
    fn hardware_restart_faults() {
        let dma = [dma::RegisterBlock::new()];
        let samplers = [sampler::RegisterBlock::new()];
        let resources = CaptureResources::new(&dma, &samplers);
        let memory = CaptureMemory::<64>::new();
        let mut engine = Engine::new(memory.take().unwrap(), &resources);
        opened(&mut engine);
        engine.configure_session(SessionConfiguration::request(
            SessionKind::HardwareCapture,
            64,
        ));
        assert_eq!(engine.start(), Status::Running);
        assert_eq!(engine.start(), Status::Error);
        assert_eq!(engine.fault(), Some(Fault::CaptureNotBound));
    }

    /// Asserts that the DMA channel and sampler are stopped, and that the
    /// claims are free again
    fn assert_released(
        resources: &CaptureResources<'_>,
        channel: &dma::RegisterBlock,
        sm: &sampler::RegisterBlock,
    ) {
        assert_eq!(ral_ctrl_en(channel), 0);
        assert_eq!(sm.CTRL.read(), 0);
        assert!(resources.claim(CaptureConfig::default()).is_some());
    }

    /// Configure and start a hardware session, checking that it runs
    fn armed(engine: &mut Engine<'_, impl Resources>, channel: &dma::RegisterBlock) {
        opened(engine);
        engine.configure_session(SessionConfiguration::request(
            SessionKind::HardwareCapture,
            64,
        ));
        assert_eq!(engine.start(), Status::Running);
        assert_eq!(ral_ctrl_en(channel), 1);
    }

    #[test]
    fn close_releases_hardware() {
        let dma = [dma::RegisterBlock::new()];
        let samplers = [sampler::RegisterBlock::new()];
        let resources = CaptureResources::new(&dma, &samplers);
        let memory = CaptureMemory::<64>::new();
        let mut engine = Engine::new(memory.take().unwrap(), &resources);
        armed(&mut engine, &dma[0]);
        assert_ne!(samplers[0].CTRL.read(), 0);

        assert_eq!(engine.close(), Status::Closed);
        assert_released(&resources, &dma[0], &samplers[0]);
    }

    #[test]
    fn stop_releases_hardware() {
        let dma = [dma::RegisterBlock::new()];
        let samplers = [sampler::RegisterBlock::new()];
        let resources = CaptureResources::new(&dma, &samplers);
        let memory = CaptureMemory::<64>::new();
        let mut engine = Engine::new(memory.take().unwrap(), &resources);
        armed(&mut engine, &dma[0]);

        assert_eq!(engine.stop(), Status::Opened);
        assert_released(&resources, &dma[0], &samplers[0]);
    }

    #[test]
    fn disconnect_releases_hardware() {
        let dma = [dma::RegisterBlock::new()];
        let samplers = [sampler::RegisterBlock::new()];
        let resources = CaptureResources::new(&dma, &samplers);
        let memory = CaptureMemory::<64>::new();
        let mut engine = Engine::new(memory.take().unwrap(), &resources);
        armed(&mut engine, &dma[0]);

        engine.bus_disconnected();
        assert_eq!(engine.state(), DeviceState::Disconnected);
        assert_released(&resources, &dma[0], &samplers[0]);
    }

    #[test]
    fn restart_releases_hardware() {
        let dma = [dma::RegisterBlock::new()];
        let samplers = [sampler::RegisterBlock::new()];
        let resources = CaptureResources::new(&dma, &samplers);
        let memory = CaptureMemory::<64>::new();
        let mut engine = Engine::new(memory.take().unwrap(), &resources);
        armed(&mut engine, &dma[0]);

        assert_eq!(engine.start(), Status::Error);
        assert_released(&resources, &dma[0], &samplers[0]);
    }

    #[test]
    fn disconnect_before_open_releases_claim() {
        let dma = [dma::RegisterBlock::new()];
        let samplers = [sampler::RegisterBlock::new()];
        let resources = CaptureResources::new(&dma, &samplers);
        let memory = CaptureMemory::<64>::new();
        let mut engine = Engine::new(memory.take().unwrap(), &resources);
        engine.bus_connected();
        engine.configure_session(SessionConfiguration::request(
            SessionKind::HardwareCapture,
            64,
        ));
        assert!(resources.claim(CaptureConfig::default()).is_none());

        engine.bus_disconnected();
        assert_eq!(engine.state(), DeviceState::Disconnected);
        assert_released(&resources, &dma[0], &samplers[0]);

        // Same while already disconnected.
        engine.configure_session(SessionConfiguration::request(
            SessionKind::HardwareCapture,
            64,
        ));
        assert!(resources.claim(CaptureConfig::default()).is_none());
        engine.bus_disconnected();
        assert_released(&resources, &dma[0], &samplers[0]);
    }

    #[test]
    fn pattern_restart_rewinds() {
        let memory = CaptureMemory::<256>::new();
        let mut engine = Engine::new(memory.take().unwrap(), no_hardware());
        opened(&mut engine);
        engine.configure_session(SessionConfiguration::request(SessionKind::Pattern, 100));
        engine.start();

        let mut sink = Sink::new(64);
        engine.tick(&mut sink);
        assert_eq!(engine.session_configuration().bytes_left, 36);

        assert_eq!(engine.start(), Status::Running);
        assert_eq!(engine.transfer_offset(), 0);
        assert_eq!(engine.session_configuration().bytes_left, 100);
    }

    #[test]
    fn stop_keeps_remaining_bytes() {
        let memory = CaptureMemory::<256>::new();
        let mut engine = Engine::new(memory.take().unwrap(), no_hardware());
        opened(&mut engine);
        engine.configure_session(SessionConfiguration::request(SessionKind::Pattern, 100));
        engine.start();
        engine.tick(&mut Sink::new(30));

        assert_eq!(engine.stop(), Status::Opened);
        assert_eq!(engine.transfer_offset(), 0);
        assert_eq!(engine.session_configuration().bytes_left, 70);
    }

    #[test]
    fn sink_backpressure() {
        let memory = CaptureMemory::<256>::new();
        let mut engine = Engine::new(memory.take().unwrap(), no_hardware());
        opened(&mut engine);
        engine.configure_session(SessionConfiguration::request(SessionKind::Pattern, 100));
        engine.start();

        let mut full = Sink::new(0);
        for _ in 0..10 {
            engine.tick(&mut full);
        }
        assert!(full.received.is_empty());
        assert_eq!(engine.state(), DeviceState::Capturing);
        assert_eq!(engine.session_configuration().bytes_left, 100);

        let mut sink = Sink::new(7);
        engine.tick(&mut sink);
        assert_eq!(sink.received.len(), 7);
        assert_eq!(engine.transfer_offset(), 7);
    }

    #[test]
    fn partial_sink_writes() {
        struct Stingy(Vec<u8>);
        impl StreamSink for Stingy {
            fn available(&self) -> usize {
                64
            }
            fn write(&mut self, bytes: &[u8]) -> usize {
                let take = bytes.len().min(5);
                self.0.extend_from_slice(&bytes[..take]);
                take
            }
        }

        let memory = CaptureMemory::<256>::new();
        let mut engine = Engine::new(memory.take().unwrap(), no_hardware());
        opened(&mut engine);
        engine.configure_session(SessionConfiguration::request(SessionKind::Pattern, 12));
        engine.start();

        let mut sink = Stingy(Vec::new());
        for _ in 0..4 {
            engine.tick(&mut sink);
        }
        assert_eq!(sink.0, (0..12).collect::<Vec<u8>>());
        assert_eq!(engine.state(), DeviceState::SessionOpen);
    }

    #[test]
    fn tick_is_a_noop_when_idle() {
        let memory = CaptureMemory::<64>::new();
        let mut engine = Engine::new(memory.take().unwrap(), no_hardware());
        let mut sink = Sink::new(64);
        engine.tick(&mut sink);
        opened(&mut engine);
        engine.configure_session(SessionConfiguration::request(SessionKind::Pattern, 10));
        engine.tick(&mut sink);
        assert!(sink.received.is_empty());
        assert_eq!(sink.flushes, 0);
        assert_eq!(engine.state(), DeviceState::SessionOpen);
    }

    #[test]
    fn empty_session_stops_on_first_tick() {
        let memory = CaptureMemory::<64>::new();
        let mut engine = Engine::new(memory.take().unwrap(), no_hardware());
        opened(&mut engine);
        assert_eq!(engine.start(), Status::Running);
        let mut sink = Sink::new(64);
        engine.tick(&mut sink);
        assert_eq!(engine.status(), Status::Opened);
        assert_eq!(sink.flushes, 1);
    }

    #[test]
    fn configure_while_capturing_stops() {
        let memory = CaptureMemory::<256>::new();
        let mut engine = Engine::new(memory.take().unwrap(), no_hardware());
        opened(&mut engine);
        engine.configure_session(SessionConfiguration::request(SessionKind::Pattern, 100));
        engine.start();
        engine.configure_session(SessionConfiguration::request(SessionKind::Pattern, 50));
        assert_eq!(engine.state(), DeviceState::SessionOpen);
        assert_eq!(engine.session_configuration().bytes_left, 50);
    }

    /// Every operation, applied to an engine driven into a given state
    const OPERATIONS: [Operation; 7] = [
        Operation::BusConnected,
        Operation::BusDisconnected,
        Operation::Open,
        Operation::Close,
        Operation::Start,
        Operation::Stop,
        Operation::ConfigureSession,
    ];

    fn apply(engine: &mut Engine<'_, impl Resources>, operation: Operation) {
        match operation {
            Operation::BusConnected => engine.bus_connected(),
            Operation::BusDisconnected => engine.bus_disconnected(),
            Operation::Open => {
                engine.open();
            }
            Operation::Close => {
                engine.close();
            }
            Operation::Start => {
                engine.start();
            }
            Operation::Stop => {
                engine.stop();
            }
            Operation::ConfigureSession => engine.configure_session(
                SessionConfiguration::request(SessionKind::Pattern, 10),
            ),
        }
    }

    fn drive(engine: &mut Engine<'_, impl Resources>, state: DeviceState) {
        match state {
            DeviceState::Disconnected => {}
            DeviceState::BusConnected => engine.bus_connected(),
            DeviceState::SessionOpen => opened(engine),
            DeviceState::Capturing => {
                opened(engine);
                engine.configure_session(SessionConfiguration::request(SessionKind::Pattern, 10));
                engine.start();
            }
            DeviceState::Faulted => {
                engine.fail(Fault::ResourceAcquisition);
            }
        }
        assert_eq!(engine.state(), state);
    }

    /// Expected state after `operation` in `state`
    fn expected(state: DeviceState, operation: Operation) -> DeviceState {
        use DeviceState::*;
        use Operation as Op;
        match (state, operation) {
            (Faulted, _) => Faulted,
            (Disconnected, Op::BusConnected) => BusConnected,
            (Disconnected, Op::BusDisconnected) => Disconnected,
            (Disconnected, Op::ConfigureSession) => Disconnected,
            (Disconnected, _) => Faulted,
            (BusConnected, Op::BusConnected) => BusConnected,
            (BusConnected, Op::BusDisconnected) => Disconnected,
            (BusConnected, Op::Open) => SessionOpen,
            (BusConnected, Op::Close) => BusConnected,
            (BusConnected, Op::ConfigureSession) => BusConnected,
            (BusConnected, _) => Faulted,
            (SessionOpen, Op::BusDisconnected) => Disconnected,
            (SessionOpen, Op::Open) => SessionOpen,
            (SessionOpen, Op::Close) => BusConnected,
            (SessionOpen, Op::Start) => Capturing,
            (SessionOpen, Op::Stop) => SessionOpen,
            (SessionOpen, Op::ConfigureSession) => SessionOpen,
            (SessionOpen, Op::BusConnected) => Faulted,
            (Capturing, Op::BusDisconnected) => Disconnected,
            (Capturing, Op::Close) => BusConnected,
            (Capturing, Op::Start) => Capturing,
            (Capturing, Op::Stop) => SessionOpen,
            (Capturing, Op::ConfigureSession) => SessionOpen,
            (Capturing, Op::Open) => Faulted,
            (Capturing, Op::BusConnected) => Faulted,
        }
    }

    #[test]
    fn state_table() {
        use DeviceState::*;
        for state in [Disconnected, BusConnected, SessionOpen, Capturing, Faulted] {
            for operation in OPERATIONS {
                let memory = CaptureMemory::<64>::new();
                let mut engine = Engine::new(memory.take().unwrap(), no_hardware());
                drive(&mut engine, state);
                apply(&mut engine, operation);
                assert_eq!(
                    engine.state(),
                    expected(state, operation),
                    "{state:?} {operation:?}"
                );
                if engine.state() == Faulted && state != Faulted {
                    assert_eq!(engine.fault(), Some(Fault::Violation { state, operation }));
                }
            }
        }
    }

    #[test]
    fn faulted_is_absorbing() {
        let memory = CaptureMemory::<64>::new();
        let mut engine = Engine::new(memory.take().unwrap(), no_hardware());
        opened(&mut engine);
        engine.fail(Fault::CaptureBusy);

        assert_eq!(engine.open(), Status::Error);
        assert_eq!(engine.close(), Status::Error);
        assert_eq!(engine.start(), Status::Error);
        assert_eq!(engine.stop(), Status::Error);
        engine.bus_connected();
        engine.bus_disconnected();
        engine.configure_session(SessionConfiguration::request(SessionKind::Pattern, 10));
        engine.tick(&mut Sink::new(64));
        engine.fail(Fault::CaptureClaim);

        assert_eq!(engine.status(), Status::Error);
        assert_eq!(engine.fault(), Some(Fault::CaptureBusy));
        assert_eq!(engine.session_configuration().sample_count, 0);
    }

    #[test]
    fn reset_recovers() {
        let memory = CaptureMemory::<64>::new();
        let mut engine = Engine::new(memory.take().unwrap(), no_hardware());
        engine.stop();
        assert_eq!(engine.status(), Status::Error);

        engine.reset();
        assert_eq!(engine.state(), DeviceState::Disconnected);
        assert_eq!(engine.fault(), None);
        opened(&mut engine);
    }

    #[test]
    fn resource_hooks() {
        let memory = CaptureMemory::<64>::new();
        let mut engine = Engine::with_hooks(memory.take().unwrap(), no_hardware(), Hooks::default());
        opened(&mut engine);
        assert_eq!(engine.close(), Status::Closed);
        engine.bus_disconnected();
        assert_eq!(engine.hooks().acquired, 1);
        assert_eq!(engine.hooks().released, 1);
        assert_eq!(
            engine.hooks().changes,
            [
                (DeviceState::Disconnected, DeviceState::BusConnected),
                (DeviceState::BusConnected, DeviceState::SessionOpen),
                (DeviceState::SessionOpen, DeviceState::BusConnected),
                (DeviceState::BusConnected, DeviceState::Disconnected),
            ]
        );

        engine.bus_connected();
        engine.hooks_mut().refuse = true;
        assert_eq!(engine.open(), Status::Error);
        assert_eq!(engine.fault(), Some(Fault::ResourceAcquisition));
    }

    #[test]
    fn refused_release_faults() {
        let memory = CaptureMemory::<64>::new();
        let mut engine = Engine::with_hooks(memory.take().unwrap(), no_hardware(), Hooks::default());
        opened(&mut engine);
        engine.hooks_mut().refuse = true;
        assert_eq!(engine.close(), Status::Error);
        assert_eq!(engine.fault(), Some(Fault::ResourceRelease));
    }

    #[test]
    fn refused_release_on_disconnect_faults() {
        let dma = [dma::RegisterBlock::new()];
        let samplers = [sampler::RegisterBlock::new()];
        let resources = CaptureResources::new(&dma, &samplers);
        let memory = CaptureMemory::<64>::new();
        let mut engine = Engine::with_hooks(memory.take().unwrap(), &resources, Hooks::default());
        armed(&mut engine, &dma[0]);
        engine.hooks_mut().refuse = true;

        engine.bus_disconnected();
        assert_eq!(engine.state(), DeviceState::Faulted);
        assert_eq!(engine.fault(), Some(Fault::ResourceRelease));
        assert_eq!(engine.hooks().released, 1);
        assert_released(&resources, &dma[0], &samplers[0]);
    }
}
