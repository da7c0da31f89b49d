//! # Transmitter Engine
//!
//! Owns the active [`Protocol`] and the [`Scheduler`] that drives it. The
//! embedding loop calls [`Transmitter::tick`] with a monotonic microsecond
//! clock; everything else (bring-up retries, power requests, packet capture
//! and status reporting) hangs off this type.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::bus::RadioBus;
use crate::config::Config;
use crate::controls::ControlVector;
use crate::error::{Result, RfError};
use crate::power::TxPower;
use crate::protocol::{Diagnostic, DiagnosticId, Protocol};
use crate::protocol_id::ProtocolId;
use crate::scheduler::Scheduler;
use crate::telemetry::{CaptureRecord, CaptureWriter, Telemetry};

/// Snapshot of the engine for periodic status logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub protocol: ProtocolId,
    pub running: bool,
    pub state: Option<u8>,
    pub channel: Option<u8>,
    pub packets: Option<u32>,
    pub power: TxPower,
    pub steps: u64,
    pub late_steps: u64,
    pub telemetry_frames: u32,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} state={} ch={} pkts={} power={} steps={} late={} telem={}",
            self.protocol,
            if self.running { "running" } else { "stopped" },
            opt_hex(self.state),
            opt_hex(self.channel),
            self.packets.map_or_else(|| "-".to_string(), |n| n.to_string()),
            self.power,
            self.steps,
            self.late_steps,
            self.telemetry_frames
        )
    }
}

fn opt_hex(value: Option<u8>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("0x{:02X}", v))
}

fn byte(diag: Diagnostic) -> Option<u8> {
    match diag {
        Diagnostic::Byte(b) => Some(b),
        _ => None,
    }
}

fn word(diag: Diagnostic) -> Option<u32> {
    match diag {
        Diagnostic::Word(w) => Some(w),
        _ => None,
    }
}

/// One protocol session on one transceiver.
#[derive(Debug)]
pub struct Transmitter<B: RadioBus> {
    protocol: Protocol<B>,
    scheduler: Scheduler,
    reset_attempts: u32,
    running: bool,
    capture: Option<CaptureWriter>,
    captured_payloads: u32,
    captured_frames: u32,
}

impl<B: RadioBus> Transmitter<B> {
    /// Wraps an already built protocol.
    ///
    /// # Arguments
    ///
    /// * `protocol` - State machine, not yet initialized
    /// * `reset_attempts` - How many times `start` tries to bring the chip up
    #[must_use]
    pub fn new(protocol: Protocol<B>, reset_attempts: u32) -> Self {
        Self {
            protocol,
            scheduler: Scheduler::new(),
            reset_attempts: reset_attempts.max(1),
            running: false,
            capture: None,
            captured_payloads: 0,
            captured_frames: 0,
        }
    }

    /// Builds the protocol `config` selects on top of `bus`.
    pub fn from_config(config: &Config, controls: Arc<ControlVector>, bus: B) -> Result<Self> {
        let id = config.protocol_id()?;
        let mut protocol = Protocol::new(id, config.radio.controller_id, controls, bus)?;
        protocol.set_power(config.radio.power);
        Ok(Self::new(protocol, config.device.reset_attempts))
    }

    /// Records every transmitted packet and decoded telemetry frame.
    #[must_use]
    pub fn with_capture(mut self, writer: CaptureWriter) -> Self {
        self.capture = Some(writer);
        self
    }

    /// Initializes the protocol and arms the scheduler.
    ///
    /// A missing chip or a failed calibration restarts from chip reset, up
    /// to `reset_attempts` times. Any other init failure is returned
    /// straight away.
    ///
    /// # Errors
    ///
    /// * `RfError::ChipNotFound` - The chip never answered
    /// * `RfError::Calibration` - A7105 calibration failed on the last attempt
    pub fn start(&mut self, now_us: u64) -> Result<()> {
        self.scheduler.cancel();
        self.running = false;
        let chip = self.protocol.kind().chip();
        let mut last_err = None;

        for attempt in 1..=self.reset_attempts {
            match self.protocol.init() {
                Ok(delay) => {
                    self.scheduler.schedule(delay, now_us);
                    self.running = self.scheduler.is_armed();
                    self.captured_payloads = self.protocol.tx_log().count();
                    self.captured_frames = self.telemetry().map_or(0, |t| t.frames);
                    info!(
                        "{} started after {} attempt(s), first step in {}us",
                        self.protocol.id(),
                        attempt,
                        delay
                    );
                    return Ok(());
                }
                Err(RfError::ChipNotFound { .. }) => {
                    warn!(
                        "{} did not answer (attempt {}/{})",
                        chip.name(),
                        attempt,
                        self.reset_attempts
                    );
                    last_err = None;
                }
                Err(RfError::Calibration(reason)) => {
                    warn!(
                        "{} calibration failed: {} (attempt {}/{})",
                        chip.name(),
                        reason,
                        attempt,
                        self.reset_attempts
                    );
                    last_err = Some(RfError::Calibration(reason));
                }
                Err(e) => return Err(e),
            }
        }

        error!(
            "{} not ready after {} attempts, giving up",
            chip.name(),
            self.reset_attempts
        );
        Err(last_err.unwrap_or(RfError::ChipNotFound {
            chip: chip.name(),
            attempts: self.reset_attempts,
        }))
    }

    /// Runs the protocol step if it is due. Returns `true` if it ran.
    pub fn tick(&mut self, now_us: u64) -> bool {
        if !self.running {
            return false;
        }

        let protocol = &mut self.protocol;
        let fired = self.scheduler.tick(now_us, || protocol.step());
        if fired {
            self.capture_step();
            if !self.scheduler.is_armed() {
                info!("{} finished", self.protocol.id());
                self.running = false;
            }
        }
        fired
    }

    /// Stops stepping and powers the transceiver down.
    ///
    /// Returns `true` if the chip still answered after the reset.
    pub fn stop(&mut self) -> bool {
        self.scheduler.cancel();
        self.running = false;
        let present = self.protocol.close();
        if let Some(writer) = self.capture.as_mut() {
            if let Err(e) = writer.flush() {
                warn!("Failed to flush capture: {}", e);
            }
        }
        info!("{} stopped (chip present: {})", self.protocol.id(), present);
        present
    }

    /// Requests a new RF power level for the next safe point.
    pub fn set_power(&mut self, level: TxPower) {
        debug!("Power change requested: {}", level);
        self.protocol.set_power(level);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Absolute time of the next step, if running.
    pub fn next_deadline(&self) -> Option<u64> {
        self.scheduler.deadline()
    }

    pub fn diagnostic(&self, id: DiagnosticId) -> Diagnostic {
        self.protocol.diagnostic(id)
    }

    pub fn telemetry(&self) -> Option<&Telemetry> {
        self.protocol.telemetry()
    }

    pub fn protocol(&self) -> &Protocol<B> {
        &self.protocol
    }

    pub fn status(&self) -> Status {
        Status {
            protocol: self.protocol.id(),
            running: self.running,
            state: byte(self.diagnostic(DiagnosticId::State)),
            channel: byte(self.diagnostic(DiagnosticId::Channel)),
            packets: word(self.diagnostic(DiagnosticId::PacketCtr)),
            power: TxPower::from_bits(byte(self.diagnostic(DiagnosticId::RfPower)).unwrap_or(0)),
            steps: self.scheduler.fired(),
            late_steps: self.scheduler.late_events(),
            telemetry_frames: self.telemetry().map_or(0, |t| t.frames),
        }
    }

    fn capture_step(&mut self) {
        let Some(writer) = self.capture.as_mut() else {
            return;
        };
        let id = self.protocol.id();
        let mut records = Vec::new();

        // a step loads at most one payload
        let tx_log = self.protocol.tx_log();
        if tx_log.count() != self.captured_payloads {
            self.captured_payloads = tx_log.count();
            records.push(CaptureRecord::transmitted(
                id,
                byte(self.protocol.diagnostic(DiagnosticId::State)),
                byte(self.protocol.diagnostic(DiagnosticId::Channel)),
                tx_log.last(),
            ));
        }

        if let Some(telemetry) = self.protocol.telemetry() {
            if telemetry.frames != self.captured_frames {
                self.captured_frames = telemetry.frames;
                if let Some(frame) = telemetry.last_frame {
                    records.push(CaptureRecord::received(id, frame, telemetry));
                }
            }
        }

        for record in &records {
            if let Err(e) = writer.write(record) {
                warn!("Capture disabled after write failure: {}", e);
                self.capture = None;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Pin;
    use crate::device::a7105;
    use crate::protocol_id::{ChipModel, ProtocolKind};
    use crate::sim::SimBus;
    use tempfile::tempdir;

    fn transmitter(kind: ProtocolKind, option: u8, attempts: u32) -> (Transmitter<SimBus>, SimBus) {
        let bus = SimBus::new(kind.chip());
        let protocol = Protocol::new(
            ProtocolId::for_kind(kind, option),
            0x1357_9BDF,
            ControlVector::new(),
            bus.clone(),
        )
        .unwrap();
        (Transmitter::new(protocol, attempts), bus)
    }

    /// Drives the engine with a 50us tick until `until_us`.
    fn run(tx: &mut Transmitter<SimBus>, from_us: u64, until_us: u64) -> usize {
        (from_us..until_us)
            .step_by(50)
            .filter(|&now| tx.tick(now))
            .count()
    }

    #[test]
    fn test_start_arms_first_step() {
        let (mut tx, _) = transmitter(ProtocolKind::Yd717, 0, 3);
        tx.start(1_000).unwrap();
        assert!(tx.is_running());
        // YD717 waits 50ms before the first packet
        assert_eq!(tx.next_deadline(), Some(51_000));
        assert!(!tx.tick(50_999));
        assert!(tx.tick(51_000));
    }

    #[test]
    fn test_missing_chip_exhausts_attempts() {
        let (mut tx, bus) = transmitter(ProtocolKind::Devo, 0, 4);
        bus.set_present(false);
        match tx.start(0) {
            Err(RfError::ChipNotFound { chip, attempts }) => {
                assert_eq!(chip, ChipModel::Cyrf6936.name());
                assert_eq!(attempts, 4);
            }
            other => panic!("expected ChipNotFound, got {:?}", other),
        }
        assert!(!tx.is_running());
        assert!(!tx.tick(1_000_000), "nothing scheduled");
    }

    /// Reports an IF filter bank failure on the first `failures` reads of
    /// A7105 `IF_CALIB_I`.
    struct FlakyCalibration {
        inner: SimBus,
        failures: u32,
        frame: Vec<u8>,
    }

    impl RadioBus for FlakyCalibration {
        fn chip_select(&mut self, active: bool) {
            if active {
                self.frame.clear();
            }
            self.inner.chip_select(active);
        }

        fn transfer(&mut self, byte: u8) -> u8 {
            let miso = self.inner.transfer(byte);
            self.frame.push(byte);
            let if_read = self.frame.len() == 2 && self.frame[0] == 0x40 | a7105::reg::IF_CALIB_I;
            if if_read && self.failures > 0 {
                self.failures -= 1;
                return a7105::MASK_FBCF;
            }
            miso
        }

        fn set_pin(&mut self, pin: Pin, high: bool) {
            self.inner.set_pin(pin, high);
        }

        fn delay_us(&mut self, us: u32) {
            self.inner.delay_us(us);
        }
    }

    fn flaky_flysky(failures: u32, attempts: u32) -> (Transmitter<FlakyCalibration>, SimBus) {
        let sim = SimBus::new(ChipModel::A7105);
        let bus = FlakyCalibration {
            inner: sim.clone(),
            failures,
            frame: Vec::new(),
        };
        let protocol = Protocol::new(
            ProtocolId::for_kind(ProtocolKind::Flysky, 0),
            0x1357_9BDF,
            ControlVector::new(),
            bus,
        )
        .unwrap();
        (Transmitter::new(protocol, attempts), sim)
    }

    #[test]
    fn test_calibration_failure_restarts_from_reset() {
        let (mut tx, sim) = flaky_flysky(1, 5);
        tx.start(0).expect("second attempt should calibrate");
        assert!(tx.is_running());

        let resets = sim
            .frames()
            .iter()
            .filter(|frame| frame.as_slice() == [a7105::reg::MODE, 0x00])
            .count();
        assert_eq!(resets, 2, "one failed attempt, one good one");
    }

    #[test]
    fn test_calibration_failure_exhausts_attempts() {
        let (mut tx, _) = flaky_flysky(10, 3);
        assert!(matches!(tx.start(0), Err(RfError::Calibration(_))));
        assert!(!tx.is_running());
    }

    #[test]
    fn test_ticks_follow_protocol_period() {
        let (mut tx, bus) = transmitter(ProtocolKind::HiSky, 1, 1);
        tx.start(0).unwrap();
        // 1ms phases, one data packet every nine
        let steps = run(&mut tx, 0, 91_000);
        assert_eq!(steps, 90);
        assert_eq!(bus.tx_packets().len(), 10);
        assert_eq!(tx.status().steps, 90);
    }

    #[test]
    fn test_stop_idles_radio() {
        let (mut tx, bus) = transmitter(ProtocolKind::Syma, 0, 1);
        tx.start(0).unwrap();
        run(&mut tx, 0, 20_000);
        assert!(tx.stop());
        assert!(!tx.is_running());
        bus.clear_log();
        assert_eq!(run(&mut tx, 20_000, 40_000), 0);
        assert!(bus.tx_packets().is_empty());
    }

    #[test]
    fn test_power_request_reported() {
        let (mut tx, _) = transmitter(ProtocolKind::CFlie, 0, 1);
        tx.start(0).unwrap();
        tx.set_power(TxPower::P1mW);
        assert_eq!(tx.status().power, TxPower::P1mW);
    }

    #[test]
    fn test_status_line() {
        let (mut tx, _) = transmitter(ProtocolKind::V2x2, 0, 1);
        tx.start(0).unwrap();
        let status = tx.status();
        assert!(status.running);
        assert_eq!(status.packets, Some(0));
        let line = status.to_string();
        assert!(line.starts_with("NRF24L01/v2x2"), "got {}", line);
        assert!(line.contains("running"));
    }

    #[test]
    fn test_capture_writes_one_line_per_packet() {
        let dir = tempdir().unwrap();
        let (tx, bus) = transmitter(ProtocolKind::HiSky, 1, 1);
        let writer = CaptureWriter::new(dir.path(), 100, 5).unwrap();
        let mut tx = tx.with_capture(writer);
        tx.start(0).unwrap();
        run(&mut tx, 0, 46_000);
        tx.stop();

        let packets = bus.tx_packets().len();
        assert_eq!(packets, 5);
        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 1);
        let path = std::fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap().path();
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text.lines().count(), packets);
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first["direction"], "tx");
        assert_eq!(first["payload"].as_str().unwrap().len(), 20, "10 bytes in hex");
    }
}
