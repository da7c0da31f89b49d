//! # Protocol State Machines
//!
//! One state machine per vendor, all behind the same contract:
//!
//! - `init` programs the transceiver, derives IDs and hop tables from the
//!   controller ID and returns the delay before the first step
//! - `step` performs exactly one unit of work and returns the delay until
//!   the next one (zero stops the scheduler)
//! - `close`/`reset` force the radio idle and re-check chip presence
//! - `diagnostic` exposes state, channel and packet counter
//!
//! [`Protocol`] is the tagged variant the engine owns. It is built from a
//! packed [`ProtocolId`] and dispatches to the vendor type.

pub mod cflie;
pub mod devo;
pub mod dsm;
pub mod flysky;
pub mod hisky;
pub mod hubsan;
pub mod syma;
pub mod v2x2;
pub mod yd717;

pub use cflie::CFlie;
pub use devo::Devo;
pub use dsm::Dsm;
pub use flysky::Flysky;
pub use hisky::HiSky;
pub use hubsan::Hubsan;
pub use syma::Syma;
pub use v2x2::V2x2;
pub use yd717::Yd717;

use std::sync::Arc;

use crate::bus::RadioBus;
use crate::controls::ControlVector;
use crate::device::{Cyrf6936, Nrf24l01, Transceiver, TxLog, A7105};
use crate::error::{Result, RfError};
use crate::power::{PowerSetting, TxPower};
use crate::protocol_id::{ProtocolId, ProtocolKind};
use crate::telemetry::Telemetry;

/// Diagnostic quantities a protocol can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticId {
    State = 0,
    Channel = 1,
    PacketCtr = 2,
    Id = 3,
    RfPower = 4,
}

impl DiagnosticId {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::State),
            1 => Some(Self::Channel),
            2 => Some(Self::PacketCtr),
            3 => Some(Self::Id),
            4 => Some(Self::RfPower),
            _ => None,
        }
    }
}

/// A diagnostic value: one byte, one little-endian word, or nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    Empty,
    Byte(u8),
    Word(u32),
}

impl Diagnostic {
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        match *self {
            Diagnostic::Empty => Vec::new(),
            Diagnostic::Byte(b) => vec![b],
            Diagnostic::Word(w) => w.to_le_bytes().to_vec(),
        }
    }
}

/// Per-session context every vendor state machine carries.
#[derive(Debug)]
pub struct Session {
    pub id: ProtocolId,
    pub controller_id: u32,
    pub controls: Arc<ControlVector>,
    pub power: PowerSetting,
}

impl Session {
    pub fn new(id: ProtocolId, controller_id: u32, controls: Arc<ControlVector>) -> Self {
        Self {
            id,
            controller_id,
            controls,
            power: PowerSetting::default(),
        }
    }

    pub fn option(&self) -> u8 {
        self.id.option()
    }

    /// Control by channel index (THROTTLE, RUDDER, ...).
    pub fn control(&self, ch: usize) -> i16 {
        self.controls.get(ch)
    }

    /// Control by transmit order (AILERON, ELEVATOR, THROTTLE, RUDDER, AUX...).
    pub fn control_by_order(&self, slot: usize) -> i16 {
        self.controls.by_order(slot)
    }

    pub fn power_level(&self) -> TxPower {
        self.power.level()
    }
}

/// Contract implemented by each vendor state machine.
pub trait RfProtocol {
    /// Configures the chip and returns the delay before the first step.
    fn init(&mut self) -> Result<u32>;

    /// Runs one unit of work and returns the delay until the next call.
    fn step(&mut self) -> u32;

    /// Forces the radio idle and reports whether the chip still answers.
    fn close(&mut self) -> bool;

    fn reset(&mut self) -> bool {
        self.close()
    }

    fn session(&self) -> &Session;

    fn session_mut(&mut self) -> &mut Session;

    /// State, channel and packet counter. Anything else is answered by
    /// [`Protocol::diagnostic`].
    fn vendor_diagnostic(&self, id: DiagnosticId) -> Diagnostic;

    /// Payloads handed to the radio, counted at the driver so bind,
    /// probe and data packets all show up.
    fn tx_log(&self) -> &TxLog;

    /// Latest decoded downlink data, for protocols that listen.
    fn telemetry(&self) -> Option<&Telemetry> {
        None
    }
}

/// Resets a chip and converts a missing identity echo into an error.
pub(crate) fn reset_chip<T: Transceiver>(dev: &mut T) -> Result<()> {
    if dev.reset() {
        Ok(())
    } else {
        Err(RfError::ChipNotFound {
            chip: T::CHIP.name(),
            attempts: 1,
        })
    }
}

/// Active protocol instance.
#[derive(Debug)]
pub enum Protocol<B: RadioBus> {
    V2x2(V2x2<B>),
    HiSky(HiSky<B>),
    Yd717(Yd717<B>),
    Syma(Syma<B>),
    CFlie(CFlie<B>),
    Flysky(Flysky<B>),
    Hubsan(Hubsan<B>),
    Devo(Devo<B>),
    Dsm(Dsm<B>),
}

macro_rules! dispatch {
    ($self:expr, $p:ident => $body:expr) => {
        match $self {
            Protocol::V2x2($p) => $body,
            Protocol::HiSky($p) => $body,
            Protocol::Yd717($p) => $body,
            Protocol::Syma($p) => $body,
            Protocol::CFlie($p) => $body,
            Protocol::Flysky($p) => $body,
            Protocol::Hubsan($p) => $body,
            Protocol::Devo($p) => $body,
            Protocol::Dsm($p) => $body,
        }
    };
}

impl<B: RadioBus> Protocol<B> {
    /// Builds the state machine `id` selects on top of `bus`.
    ///
    /// # Arguments
    ///
    /// * `id` - Packed module/protocol/option
    /// * `controller_id` - Seed for addresses and hop tables
    /// * `controls` - Shared control vector written by the input layer
    /// * `bus` - Bus the selected chip is wired to
    ///
    /// # Returns
    ///
    /// * `Result<Protocol<B>>` - The instance, not yet initialized
    pub fn new(
        id: ProtocolId,
        controller_id: u32,
        controls: Arc<ControlVector>,
        bus: B,
    ) -> Result<Self> {
        let kind = id.kind().ok_or(RfError::UnsupportedProtocol(id))?;
        let session = Session::new(id, controller_id, controls);

        Ok(match kind {
            ProtocolKind::V2x2 => Protocol::V2x2(V2x2::new(Nrf24l01::new(bus), session)),
            ProtocolKind::HiSky => Protocol::HiSky(HiSky::new(Nrf24l01::new(bus), session)),
            ProtocolKind::Yd717 => Protocol::Yd717(Yd717::new(Nrf24l01::new(bus), session)),
            ProtocolKind::Syma => Protocol::Syma(Syma::new(Nrf24l01::new(bus), session)),
            ProtocolKind::CFlie => Protocol::CFlie(CFlie::new(Nrf24l01::new(bus), session)),
            ProtocolKind::Flysky => Protocol::Flysky(Flysky::new(A7105::new(bus), session)),
            ProtocolKind::Hubsan => Protocol::Hubsan(Hubsan::new(A7105::new(bus), session)),
            ProtocolKind::Devo => Protocol::Devo(Devo::new(Cyrf6936::new(bus), session)),
            ProtocolKind::Dsm => Protocol::Dsm(Dsm::new(Cyrf6936::new(bus), session)),
        })
    }

    pub fn id(&self) -> ProtocolId {
        self.session().id
    }

    pub fn kind(&self) -> ProtocolKind {
        match self {
            Protocol::V2x2(_) => ProtocolKind::V2x2,
            Protocol::HiSky(_) => ProtocolKind::HiSky,
            Protocol::Yd717(_) => ProtocolKind::Yd717,
            Protocol::Syma(_) => ProtocolKind::Syma,
            Protocol::CFlie(_) => ProtocolKind::CFlie,
            Protocol::Flysky(_) => ProtocolKind::Flysky,
            Protocol::Hubsan(_) => ProtocolKind::Hubsan,
            Protocol::Devo(_) => ProtocolKind::Devo,
            Protocol::Dsm(_) => ProtocolKind::Dsm,
        }
    }

    pub fn init(&mut self) -> Result<u32> {
        dispatch!(self, p => p.init())
    }

    pub fn step(&mut self) -> u32 {
        dispatch!(self, p => p.step())
    }

    pub fn close(&mut self) -> bool {
        dispatch!(self, p => p.close())
    }

    pub fn reset(&mut self) -> bool {
        dispatch!(self, p => p.reset())
    }

    /// Requests a new RF power level. The hardware picks it up at the
    /// protocol's next safe point.
    pub fn set_power(&mut self, level: TxPower) {
        self.session_mut().power.set(level);
    }

    pub fn diagnostic(&self, id: DiagnosticId) -> Diagnostic {
        match id {
            DiagnosticId::Id => Diagnostic::Word(self.id().raw()),
            DiagnosticId::RfPower => Diagnostic::Byte(self.session().power.raw()),
            _ => dispatch!(self, p => p.vendor_diagnostic(id)),
        }
    }

    pub fn tx_log(&self) -> &TxLog {
        dispatch!(self, p => p.tx_log())
    }

    pub fn telemetry(&self) -> Option<&Telemetry> {
        dispatch!(self, p => p.telemetry())
    }

    fn session(&self) -> &Session {
        dispatch!(self, p => p.session())
    }

    fn session_mut(&mut self) -> &mut Session {
        dispatch!(self, p => p.session_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_id::{module, ChipModel};
    use crate::sim::SimBus;

    fn build(kind: ProtocolKind, option: u8) -> (Protocol<SimBus>, SimBus) {
        let bus = SimBus::new(kind.chip());
        let protocol = Protocol::new(
            ProtocolId::for_kind(kind, option),
            0x1234_5678,
            ControlVector::new(),
            bus.clone(),
        )
        .expect("known protocol");
        (protocol, bus)
    }

    #[test]
    fn test_every_kind_builds_matching_variant() {
        for kind in ProtocolKind::ALL {
            let (protocol, _) = build(kind, 0);
            assert_eq!(protocol.kind(), kind);
            assert_eq!(protocol.id().kind(), Some(kind));
        }
    }

    #[test]
    fn test_unknown_id_is_rejected() {
        let id = ProtocolId::new(module::CYRF6936, 9, 0);
        let result = Protocol::new(id, 0, ControlVector::new(), SimBus::new(ChipModel::Cyrf6936));
        assert!(matches!(result, Err(RfError::UnsupportedProtocol(_))));
    }

    #[test]
    fn test_every_kind_inits_and_steps_on_sim() {
        for kind in ProtocolKind::ALL {
            let (mut protocol, _) = build(kind, 0);
            let first = protocol.init().unwrap_or_else(|e| panic!("{:?} init: {}", kind, e));
            assert!(first > 0, "{:?} must schedule a first step", kind);
            for _ in 0..50 {
                assert!(protocol.step() > 0, "{:?} stopped unexpectedly", kind);
            }
            assert!(protocol.close(), "{:?} close should find the chip", kind);
        }
    }

    #[test]
    fn test_init_fails_without_chip() {
        for kind in ProtocolKind::ALL {
            let (mut protocol, bus) = build(kind, 0);
            bus.set_present(false);
            assert!(protocol.init().is_err(), "{:?} should notice the missing chip", kind);
        }
    }

    #[test]
    fn test_common_diagnostics() {
        let (mut protocol, _) = build(ProtocolKind::Flysky, 2);
        assert_eq!(
            protocol.diagnostic(DiagnosticId::Id).bytes(),
            vec![0x02, 0x00, 0x01, 0x00]
        );
        assert_eq!(
            protocol.diagnostic(DiagnosticId::RfPower).bytes(),
            vec![TxPower::P10mW.bits()]
        );

        protocol.set_power(TxPower::P100mW);
        assert_eq!(
            protocol.diagnostic(DiagnosticId::RfPower).bytes(),
            vec![0x80 | TxPower::P100mW.bits()],
            "pending power change is flagged"
        );
    }

    #[test]
    fn test_diagnostic_id_from_raw() {
        assert_eq!(DiagnosticId::from_raw(2), Some(DiagnosticId::PacketCtr));
        assert_eq!(DiagnosticId::from_raw(5), None);
        assert_eq!(Diagnostic::Empty.bytes(), Vec::<u8>::new());
        assert_eq!(Diagnostic::Word(0x0403_0201).bytes(), vec![1, 2, 3, 4]);
    }
}
