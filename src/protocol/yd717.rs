//! # YD717 (NRF24L01)
//!
//! Fixed-channel, auto-ack protocol shared by several toy brands. The first
//! data packet is sent straight away on the session address; if the
//! receiver acknowledges it, the link is already up. On timeout the
//! transmitter falls back to the well-known bind address, sends
//! [`MAX_BIND_COUNT`] bind packets carrying the session address, then
//! retries the data address.

use tracing::{debug, info};

use super::{reset_chip, Diagnostic, DiagnosticId, RfProtocol, Session};
use crate::bus::RadioBus;
use crate::codec::{Checksum, Scale};
use crate::controls::channels;
use crate::device::nrf24l01::{config, reg, status, AckStatus, Bitrate};
use crate::device::{Nrf24l01, RfMode, Transceiver, TxLog};
use crate::error::Result;
use crate::hopping::{pump_lfsr, rand32_r};

pub const MAX_BIND_COUNT: u16 = 60;
const PACKET_PERIOD_US: u32 = 8000;
const INITIAL_WAIT_US: u32 = 50000;
/// Wait while a packet is neither acknowledged nor timed out
const PACKET_CHECK_US: u32 = 5000;

/// Stock transmitters use this channel; receivers only bind on it.
pub const RF_CHANNEL: u8 = 0x3C;

/// Receive pipes are configured for this size although nothing is received
const PAYLOAD_SIZE: u8 = 8;
const MAX_PACKET_SIZE: usize = 9;

const FLAG_FLIP: u8 = 0x0F;
const FLAG_LIGHT: u8 = 0x10;

const STICK: Scale = Scale::new(0xFF, 0x100, 0, 0x1FF);
const CHECKSUM: Checksum = Checksum::Additive { offset: 0 };

/// Sub-variants selected by the option byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Yd717Variant {
    Yd717,
    SkyWalker,
    XinXun,
    NiHui,
    SymaX4,
}

impl Yd717Variant {
    pub fn from_option(option: u8) -> Self {
        match option {
            1 => Yd717Variant::SkyWalker,
            2 => Yd717Variant::XinXun,
            3 => Yd717Variant::NiHui,
            4 => Yd717Variant::SymaX4,
            _ => Yd717Variant::Yd717,
        }
    }

    fn bind_address(self) -> [u8; 5] {
        match self {
            Yd717Variant::SymaX4 => [0x60; 5],
            Yd717Variant::NiHui => [0x64; 5],
            _ => [0x65; 5],
        }
    }

    /// Plain YD717 sends 8 bytes; the others append an inverted sum.
    fn packet_len(self) -> usize {
        if self == Yd717Variant::Yd717 {
            8
        } else {
            MAX_PACKET_SIZE
        }
    }
}

const INIT_REGS: [Option<u8>; 0x18] = [
    Some(config::EN_CRC | config::PWR_UP),
    // auto-ack on all pipes
    Some(0x3F),
    Some(0x3F),
    Some(0x03),
    // 500 µs retransmit timeout, 10 tries
    Some(0x1A),
    Some(RF_CHANNEL),
    None,
    Some(0x70),
    None,
    None,
    None,
    None,
    Some(0xC3),
    Some(0xC4),
    Some(0xC5),
    Some(0xC6),
    None,
    Some(PAYLOAD_SIZE),
    Some(PAYLOAD_SIZE),
    Some(PAYLOAD_SIZE),
    Some(PAYLOAD_SIZE),
    Some(PAYLOAD_SIZE),
    Some(PAYLOAD_SIZE),
    Some(0x00),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Yd717State {
    /// First data packet on the session address
    Init,
    /// Sending bind packets on the bind address
    Bind,
    /// Waiting for the verdict on a data packet
    Verify,
    Data,
}

impl Yd717State {
    pub fn code(self) -> u8 {
        match self {
            Yd717State::Init => 0,
            Yd717State::Bind => 1,
            Yd717State::Verify => 2,
            Yd717State::Data => 0x10,
        }
    }
}

#[derive(Debug)]
pub struct Yd717<B> {
    dev: Nrf24l01<B>,
    session: Session,
    variant: Yd717Variant,
    state: Yd717State,
    address: [u8; 5],
    packet: [u8; MAX_PACKET_SIZE],
    packet_ctr: u32,
    bind_ctr: u16,
}

impl<B: RadioBus> Yd717<B> {
    pub fn new(dev: Nrf24l01<B>, session: Session) -> Self {
        let variant = Yd717Variant::from_option(session.option());
        Self {
            dev,
            session,
            variant,
            state: Yd717State::Init,
            address: [0; 5],
            packet: [0; MAX_PACKET_SIZE],
            packet_ctr: 0,
            bind_ctr: 0,
        }
    }

    pub fn state(&self) -> Yd717State {
        self.state
    }

    pub fn address(&self) -> [u8; 5] {
        self.address
    }

    pub fn bind_counter(&self) -> u16 {
        self.bind_ctr
    }

    fn stick(&self, ch: usize) -> u8 {
        (STICK.encode(self.session.control(ch)) >> 1) as u8
    }

    fn build_data(&mut self) {
        let throttle = self.stick(channels::THROTTLE);
        let (rudder, rudder_trim) = if self.variant == Yd717Variant::XinXun {
            let rudder = self.stick(channels::RUDDER);
            (rudder, (0xff - rudder) >> 1)
        } else {
            let rudder = 0xff - self.stick(channels::RUDDER);
            (rudder, rudder >> 1)
        };
        let elevator = self.stick(channels::ELEVATOR);
        let aileron = 0xff - self.stick(channels::AILERON);

        let mut flags = 0;
        if self.session.control(channels::AUX1) > 0 {
            flags |= FLAG_FLIP;
        }
        if self.session.control(channels::AUX2) > 0 {
            flags |= FLAG_LIGHT;
        }

        self.packet[0] = throttle;
        self.packet[1] = rudder;
        self.packet[3] = elevator;
        self.packet[4] = aileron;
        self.packet[7] = flags;
        let (rudder_at, elevator_at, aileron_at) = if self.variant == Yd717Variant::Yd717 {
            (6, 2, 5)
        } else {
            (2, 5, 6)
        };
        self.packet[rudder_at] = rudder_trim;
        self.packet[elevator_at] = elevator >> 1;
        self.packet[aileron_at] = aileron >> 1;
    }

    fn build_bind(&mut self) {
        self.packet[..4].copy_from_slice(&self.address[..4]);
        self.packet[4] = 0x56;
        self.packet[5] = 0xAA;
        self.packet[6] = if self.variant == Yd717Variant::NiHui {
            0x00
        } else {
            0x32
        };
        self.packet[7] = 0x00;
    }

    fn send_packet(&mut self, bind: bool) {
        if bind {
            self.build_bind();
        } else {
            self.build_data();
        }

        self.dev.write_reg(reg::STATUS, status::TX_DS | status::MAX_RT);
        let len = self.variant.packet_len();
        if len == MAX_PACKET_SIZE {
            self.packet[8] = !CHECKSUM.compute(&self.packet);
        }
        self.dev.write_payload(&self.packet[..len]);
        self.packet_ctr = self.packet_ctr.wrapping_add(1);

        if let Some(level) = self.session.power.take_update() {
            self.dev.set_power(level);
        }
    }

    fn use_address(&mut self, address: [u8; 5]) {
        self.dev.write_burst(reg::RX_ADDR_P0, &address);
        self.dev.write_burst(reg::TX_ADDR, &address);
    }
}

impl<B: RadioBus> RfProtocol for Yd717<B> {
    fn init(&mut self) -> Result<u32> {
        self.packet_ctr = 0;

        let mut lfsr = self.session.controller_id;
        pump_lfsr(&mut lfsr, 4);
        self.address[4] = 0xC1;
        for i in 0..4 {
            self.address[i] = lfsr as u8;
            rand32_r(&mut lfsr, i as u8);
        }

        reset_chip(&mut self.dev)?;
        self.dev.set_mode(RfMode::Transmit);
        for (addr, value) in INIT_REGS.iter().enumerate() {
            let addr = addr as u8;
            if addr == reg::RF_SETUP {
                self.dev.set_bitrate(Bitrate::Mbps1);
                self.dev.set_power(self.session.power_level());
            } else if let Some(value) = value {
                self.dev.write_reg(addr, *value);
            }
        }
        self.dev.write_reg(reg::DYNPD, 0x3F);

        // stock-transmitter modules need the feature register unlocked
        self.dev.read_reg(reg::FEATURE);
        self.dev.activate(0x73);
        self.dev.read_reg(reg::FEATURE);
        self.dev.write_reg(reg::DYNPD, 0x3F);
        self.dev.write_reg(reg::FEATURE, 0x07);

        self.use_address(self.address);
        self.state = Yd717State::Init;
        info!(
            "YD717 init: variant={:?} address={:02X?}",
            self.variant, self.address
        );
        Ok(INITIAL_WAIT_US)
    }

    fn step(&mut self) -> u32 {
        match self.state {
            Yd717State::Init => {
                self.send_packet(false);
                self.state = Yd717State::Verify;
            }
            Yd717State::Bind => {
                if self.dev.ack_status() == AckStatus::Pending {
                    return PACKET_CHECK_US;
                }
                if self.bind_ctr == 0 {
                    self.use_address(self.address);
                    self.send_packet(false);
                    self.state = Yd717State::Verify;
                } else {
                    self.send_packet(true);
                    self.bind_ctr -= 1;
                }
            }
            Yd717State::Verify => match self.dev.ack_status() {
                AckStatus::Pending => return PACKET_CHECK_US,
                AckStatus::Acked => {
                    debug!("YD717 data packet acknowledged");
                    self.state = Yd717State::Data;
                }
                AckStatus::TimedOut => {
                    // back to binding; the address switch happens only here
                    debug!("YD717 no ack, binding");
                    self.use_address(self.variant.bind_address());
                    self.bind_ctr = MAX_BIND_COUNT;
                    self.state = Yd717State::Bind;
                    self.send_packet(true);
                }
            },
            Yd717State::Data => {
                if self.dev.ack_status() == AckStatus::Pending {
                    return PACKET_CHECK_US;
                }
                self.send_packet(false);
            }
        }
        PACKET_PERIOD_US
    }

    fn close(&mut self) -> bool {
        self.dev.set_mode(RfMode::Idle);
        self.dev.reset()
    }

    fn session(&self) -> &Session {
        &self.session
    }

    fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    fn vendor_diagnostic(&self, id: DiagnosticId) -> Diagnostic {
        match id {
            DiagnosticId::State => Diagnostic::Byte(self.state.code()),
            DiagnosticId::Channel => Diagnostic::Byte(RF_CHANNEL),
            DiagnosticId::PacketCtr => Diagnostic::Word(self.packet_ctr),
            _ => Diagnostic::Empty,
        }
    }

    fn tx_log(&self) -> &TxLog {
        self.dev.tx_log()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::{ControlVector, CHAN_MAX_VALUE};
    use crate::protocol_id::{ChipModel, ProtocolId, ProtocolKind};
    use crate::sim::{AckMode, SimBus};
    use std::sync::Arc;

    const CONTROLLER_ID: u32 = 0xCAFE_0001;

    fn yd717(option: u8) -> (Yd717<SimBus>, SimBus, Arc<ControlVector>) {
        let bus = SimBus::new(ChipModel::Nrf24l01);
        let controls = ControlVector::new();
        let session = Session::new(
            ProtocolId::for_kind(ProtocolKind::Yd717, option),
            CONTROLLER_ID,
            controls.clone(),
        );
        (Yd717::new(Nrf24l01::new(bus.clone()), session), bus, controls)
    }

    #[test]
    fn test_address_from_lfsr() {
        let (mut y, bus, _) = yd717(0);
        y.init().unwrap();

        let mut lfsr = CONTROLLER_ID;
        pump_lfsr(&mut lfsr, 4);
        let mut expected = [0u8; 5];
        expected[4] = 0xC1;
        for i in 0..4 {
            expected[i] = lfsr as u8;
            rand32_r(&mut lfsr, i as u8);
        }
        assert_eq!(y.address(), expected);
        assert_eq!(bus.file(reg::TX_ADDR), expected.to_vec());

        let (mut again, _, _) = yd717(3);
        again.init().unwrap();
        assert_eq!(again.address(), expected, "address does not depend on the variant");
    }

    #[test]
    fn test_acked_first_packet_skips_bind() {
        let (mut y, bus, _) = yd717(0);
        y.init().unwrap();
        assert_eq!(y.step(), PACKET_PERIOD_US);
        assert_eq!(y.state(), Yd717State::Verify);
        y.step();
        assert_eq!(y.state(), Yd717State::Data);
        assert_eq!(bus.tx_channels(), vec![RF_CHANNEL]);
    }

    #[test]
    fn test_pending_waits() {
        let (mut y, bus, _) = yd717(0);
        y.init().unwrap();
        bus.set_ack_mode(AckMode::Pending);
        y.step();
        assert_eq!(y.step(), PACKET_CHECK_US);
        assert_eq!(y.state(), Yd717State::Verify);
    }

    #[test]
    fn test_timeout_binds_sixty_packets_then_data() {
        let (mut y, bus, _) = yd717(0);
        y.init().unwrap();
        bus.set_ack_mode(AckMode::Timeout);
        y.step();
        bus.clear_log();
        y.step();
        assert_eq!(y.state(), Yd717State::Bind);
        assert_eq!(bus.file(reg::TX_ADDR), vec![0x65; 5]);

        for _ in 0..MAX_BIND_COUNT {
            y.step();
        }
        assert_eq!(y.bind_counter(), 0);
        let packets = bus.tx_packets();
        assert_eq!(packets.len(), usize::from(MAX_BIND_COUNT) + 1);
        let bind = &packets[0];
        assert_eq!(&bind[..4], &y.address()[..4]);
        assert_eq!(&bind[4..8], &[0x56, 0xAA, 0x32, 0x00]);

        bus.set_ack_mode(AckMode::Ack);
        y.step();
        assert_eq!(y.state(), Yd717State::Verify);
        assert_eq!(bus.file(reg::TX_ADDR), y.address().to_vec());
        y.step();
        assert_eq!(y.state(), Yd717State::Data);

        for _ in 0..5 {
            y.step();
        }
        assert_eq!(y.bind_counter(), 0, "counter stays at zero once bound");
        assert_eq!(y.state(), Yd717State::Data);
    }

    #[test]
    fn test_plain_yd717_data_layout() {
        let (mut y, bus, controls) = yd717(0);
        controls.handle().set(channels::AILERON, CHAN_MAX_VALUE);
        controls.handle().set(channels::AUX1, 100);
        y.init().unwrap();
        y.step();

        let p = &bus.tx_packets()[0];
        assert_eq!(p.len(), 8);
        assert_eq!(p[0], 0, "throttle");
        assert_eq!(p[1], 0xff - 0x80, "rudder reversed");
        assert_eq!(p[3], 0x80);
        assert_eq!(p[4], 0x00, "aileron reversed");
        assert_eq!(p[6], (0xff - 0x80) >> 1, "rudder trim");
        assert_eq!(p[2], 0x40, "elevator trim");
        assert_eq!(p[5], 0x00, "aileron trim");
        assert_eq!(p[7], FLAG_FLIP);
    }

    #[test]
    fn test_variant_checksum_and_trims() {
        let (mut y, bus, _) = yd717(2);
        y.init().unwrap();
        y.step();

        let p = &bus.tx_packets()[0];
        assert_eq!(p.len(), 9);
        assert_eq!(p[1], 0x80, "XinXun rudder not reversed");
        assert_eq!(p[2], (0xff - 0x80) >> 1);
        let sum = p[..8].iter().fold(0u8, |a, &b| a.wrapping_add(b));
        assert_eq!(p[8], !sum);
    }

    #[test]
    fn test_variant_bind_addresses() {
        for (option, expected, byte6) in [(3u8, 0x64u8, 0x00u8), (4, 0x60, 0x32)] {
            let (mut y, bus, _) = yd717(option);
            y.init().unwrap();
            bus.set_ack_mode(AckMode::Timeout);
            y.step();
            bus.clear_log();
            y.step();
            assert_eq!(bus.file(reg::TX_ADDR), vec![expected; 5]);
            assert_eq!(bus.tx_packets()[0][6], byte6);
        }
    }
}
