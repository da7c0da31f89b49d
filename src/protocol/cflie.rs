//! # Crazyflie (NRF24L01)
//!
//! The quadcopter listens on a fixed address with auto-ack. A one-byte
//! search packet sweeps channels 0..=125 at each bitrate until the craft
//! acknowledges; from then on commander packets carry roll, pitch and yaw as
//! IEEE-754 floats plus a 16-bit thrust.

use tracing::{debug, info};

use super::{reset_chip, Diagnostic, DiagnosticId, RfProtocol, Session};
use crate::bus::RadioBus;
use crate::controls::{channels, CHAN_MAX_VALUE, CHAN_MIN_VALUE};
use crate::device::nrf24l01::{config, reg, status, AckStatus, Bitrate};
use crate::device::{Nrf24l01, RfMode, Transceiver, TxLog};
use crate::error::Result;

const PACKET_PERIOD_US: u32 = 10000;
const PACKET_CHECK_US: u32 = 1000;
const INITIAL_WAIT_US: u32 = 50000;

const ADDRESS: [u8; 5] = [0xE7; 5];
const COMMANDER_SIZE: usize = 15;
/// Commander port, channel 0
const COMMANDER_HEADER: u8 = 0x30;
const LAST_CHANNEL: u8 = 125;

const FRAC_BITS: u32 = 16;
const FRAC_SCALE: i64 = 1 << FRAC_BITS;

/// Converts 16.16 fixed point to `f32`, truncating the mantissa.
pub fn frac_to_f32(n: i32) -> f32 {
    if n == 0 {
        return 0.0;
    }
    let mut m = n.unsigned_abs();
    let lz = m.leading_zeros();
    let exponent = (127 + 31 - FRAC_BITS as i32 - lz as i32) as u32;
    m <<= lz;
    // drop the implicit leading one
    m = (m << 1) >> 9;
    if n < 0 {
        m |= 0x8000_0000;
    }
    f32::from_bits(m | (exponent << 23))
}

fn next_bitrate(rate: Bitrate) -> Bitrate {
    match rate {
        Bitrate::Kbps250 => Bitrate::Mbps1,
        Bitrate::Mbps1 => Bitrate::Mbps2,
        Bitrate::Mbps2 => Bitrate::Kbps250,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CFlieState {
    InitSearch,
    Search,
    Data,
}

impl CFlieState {
    pub fn code(self) -> u8 {
        match self {
            CFlieState::InitSearch => 0,
            CFlieState::Search => 2,
            CFlieState::Data => 0x10,
        }
    }
}

#[derive(Debug)]
pub struct CFlie<B> {
    dev: Nrf24l01<B>,
    session: Session,
    state: CFlieState,
    channel: u8,
    bitrate: Bitrate,
    packet: [u8; COMMANDER_SIZE],
    packet_ctr: u32,
}

impl<B: RadioBus> CFlie<B> {
    pub fn new(dev: Nrf24l01<B>, session: Session) -> Self {
        Self {
            dev,
            session,
            state: CFlieState::InitSearch,
            channel: 0,
            bitrate: Bitrate::Kbps250,
            packet: [0; COMMANDER_SIZE],
            packet_ctr: 0,
        }
    }

    pub fn state(&self) -> CFlieState {
        self.state
    }

    /// Channel and bitrate the search has reached.
    pub fn link(&self) -> (u8, Bitrate) {
        (self.channel, self.bitrate)
    }

    fn clear_and_flush(&mut self) {
        self.dev.write_reg(reg::STATUS, status::TX_DS | status::MAX_RT);
        self.dev.flush_tx();
    }

    fn send_search_packet(&mut self) {
        self.clear_and_flush();

        let probed = self.channel;
        self.channel = self.channel.wrapping_add(1);
        if probed > LAST_CHANNEL {
            self.channel = 0;
            self.bitrate = next_bitrate(self.bitrate);
            debug!("CFlie search wrapped, bitrate {:?}", self.bitrate);
        }
        self.dev.set_channel(self.channel);
        self.dev.set_bitrate(self.bitrate);

        self.packet[0] = 0xff;
        self.dev.write_payload(&self.packet[..1]);
        self.packet_ctr = self.packet_ctr.wrapping_add(1);
    }

    /// Roll, pitch and yaw in 16.16 fixed point, sticks rotated 45° for
    /// X-frame flight. Returns `(x_roll, x_pitch, yaw)`.
    fn attitude(&self) -> (i32, i32, i32) {
        let control = |ch| i64::from(self.session.control(ch));
        // ±50 degrees
        let roll = -control(channels::AILERON) * FRAC_SCALE / (10000 / 50);
        let pitch = -control(channels::ELEVATOR) * FRAC_SCALE / (10000 / 50);
        // ±400 degrees per second
        let yaw = -control(channels::RUDDER) * FRAC_SCALE / (10000 / 400);

        // 181 / 256 ~ sqrt(2) / 2
        let x_roll = (roll + pitch) * 181 / 256;
        let x_pitch = (pitch - roll) * 181 / 256;
        (x_roll as i32, x_pitch as i32, yaw as i32)
    }

    fn thrust(&self) -> u16 {
        let throttle = self
            .session
            .control(channels::THROTTLE)
            .clamp(CHAN_MIN_VALUE, CHAN_MAX_VALUE);
        (i32::from(throttle) * 3 + 35535) as u16
    }

    fn send_commander_packet(&mut self) {
        let (x_roll, x_pitch, yaw) = self.attitude();
        let thrust = self.thrust();

        self.packet[0] = COMMANDER_HEADER;
        self.packet[1..5].copy_from_slice(&frac_to_f32(x_roll).to_le_bytes());
        self.packet[5..9].copy_from_slice(&frac_to_f32(x_pitch).to_le_bytes());
        self.packet[9..13].copy_from_slice(&frac_to_f32(yaw).to_le_bytes());
        self.packet[13..15].copy_from_slice(&thrust.to_le_bytes());

        self.clear_and_flush();
        self.dev.write_payload(&self.packet);
        self.packet_ctr = self.packet_ctr.wrapping_add(1);

        if let Some(level) = self.session.power.take_update() {
            self.dev.set_power(level);
        }
    }
}

impl<B: RadioBus> RfProtocol for CFlie<B> {
    fn init(&mut self) -> Result<u32> {
        self.packet_ctr = 0;
        self.channel = 0;
        self.bitrate = Bitrate::Kbps250;
        self.state = CFlieState::InitSearch;

        reset_chip(&mut self.dev)?;
        self.dev.set_mode(RfMode::Transmit);
        self.dev
            .write_reg(reg::CONFIG, config::EN_CRC | config::CRCO | config::PWR_UP);
        // auto-ack on pipe 0 only
        self.dev.write_reg(reg::EN_AA, 0x01);
        self.dev.write_reg(reg::EN_RXADDR, 0x01);
        self.dev.write_reg(reg::SETUP_AW, ADDRESS.len() as u8 - 2);
        // 3 retransmits, 500 µs apart
        self.dev.write_reg(reg::SETUP_RETR, 0x13);
        self.dev.set_channel(self.channel);
        self.dev.set_bitrate(self.bitrate);
        self.dev.set_power(self.session.power_level());
        self.dev.write_reg(reg::STATUS, 0x70);
        self.dev.write_reg(reg::FIFO_STATUS, 0x00);

        self.dev.read_reg(reg::FEATURE);
        self.dev.activate(0x73);
        self.dev.read_reg(reg::FEATURE);
        // dynamic payload length and payload-with-ack
        self.dev.write_reg(reg::DYNPD, 0x01);
        self.dev.write_reg(reg::FEATURE, 0x06);

        self.dev.write_burst(reg::RX_ADDR_P0, &ADDRESS);
        self.dev.write_burst(reg::TX_ADDR, &ADDRESS);

        info!("CFlie init");
        Ok(INITIAL_WAIT_US)
    }

    fn step(&mut self) -> u32 {
        match self.state {
            CFlieState::InitSearch => {
                self.send_search_packet();
                self.state = CFlieState::Search;
            }
            CFlieState::Search => match self.dev.ack_status() {
                AckStatus::Pending => return PACKET_CHECK_US,
                AckStatus::Acked => {
                    info!(
                        "CFlie found on channel {} at {:?}",
                        self.channel, self.bitrate
                    );
                    self.state = CFlieState::Data;
                }
                AckStatus::TimedOut => self.send_search_packet(),
            },
            CFlieState::Data => {
                if self.dev.ack_status() == AckStatus::Pending {
                    return PACKET_CHECK_US;
                }
                self.send_commander_packet();
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
            DiagnosticId::Channel => Diagnostic::Byte(self.channel),
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
    use crate::controls::ControlVector;
    use crate::protocol_id::{ChipModel, ProtocolId, ProtocolKind};
    use crate::sim::{AckMode, SimBus};
    use std::sync::Arc;

    fn cflie() -> (CFlie<SimBus>, SimBus, Arc<ControlVector>) {
        let bus = SimBus::new(ChipModel::Nrf24l01);
        let controls = ControlVector::new();
        let session = Session::new(
            ProtocolId::for_kind(ProtocolKind::CFlie, 0),
            0x1234,
            controls.clone(),
        );
        (CFlie::new(Nrf24l01::new(bus.clone()), session), bus, controls)
    }

    fn f32_at(p: &[u8], at: usize) -> f32 {
        f32::from_le_bytes([p[at], p[at + 1], p[at + 2], p[at + 3]])
    }

    #[test]
    fn test_frac_to_f32() {
        assert_eq!(frac_to_f32(0), 0.0);
        assert_eq!(frac_to_f32(1 << 16), 1.0);
        assert_eq!(frac_to_f32(-(1 << 16)), -1.0);
        assert_eq!(frac_to_f32(46336), 0.70703125);
        assert_eq!(frac_to_f32(50 << 16), 50.0);
        assert_eq!(frac_to_f32(1), 1.0 / 65536.0);
        assert_eq!(frac_to_f32(3 << 15), 1.5);
    }

    #[test]
    fn test_frac_to_f32_truncates() {
        // 2^14 + 2^-10 needs 25 significant bits
        let n = (1 << 30) + (1 << 6);
        assert_eq!(frac_to_f32(n), 16384.0);
    }

    #[test]
    fn test_search_acked_enters_data() {
        let (mut c, bus, _) = cflie();
        assert_eq!(c.init().unwrap(), INITIAL_WAIT_US);
        assert_eq!(bus.file(reg::TX_ADDR), ADDRESS.to_vec());
        bus.clear_log();

        assert_eq!(c.step(), PACKET_PERIOD_US);
        assert_eq!(bus.tx_packets(), vec![vec![0xff]]);
        assert_eq!(bus.tx_channels(), vec![1]);
        c.step();
        assert_eq!(c.state(), CFlieState::Data);
        c.step();
        assert_eq!(bus.tx_packets()[1].len(), COMMANDER_SIZE);
    }

    #[test]
    fn test_search_sweeps_channels_and_bitrates() {
        let (mut c, bus, _) = cflie();
        bus.set_ack_mode(AckMode::Timeout);
        c.init().unwrap();
        for _ in 0..126 {
            c.step();
        }
        assert_eq!(c.link(), (126, Bitrate::Kbps250));
        c.step();
        assert_eq!(c.link(), (0, Bitrate::Mbps1), "wraps to the next bitrate");
        assert_eq!(c.state(), CFlieState::Search);
        c.step();
        assert_eq!(c.link(), (1, Bitrate::Mbps1));
    }

    #[test]
    fn test_pending_ack_polls() {
        let (mut c, bus, _) = cflie();
        bus.set_ack_mode(AckMode::Pending);
        c.init().unwrap();
        c.step();
        assert_eq!(c.step(), PACKET_CHECK_US);
        assert_eq!(c.state(), CFlieState::Search);
    }

    #[test]
    fn test_commander_packet() {
        let (mut c, bus, controls) = cflie();
        c.init().unwrap();
        c.step();
        c.step();
        let handle = controls.handle();
        handle.set(channels::AILERON, 200);
        handle.set(channels::RUDDER, 25);
        handle.set(channels::THROTTLE, 500);
        bus.clear_log();
        c.step();

        let p = &bus.tx_packets()[0];
        assert_eq!(p[0], COMMANDER_HEADER);
        assert_eq!(f32_at(p, 1), -0.70703125, "x roll");
        assert_eq!(f32_at(p, 5), 0.70703125, "x pitch");
        assert_eq!(f32_at(p, 9), -1.0, "yaw");
        assert_eq!(u16::from_le_bytes([p[13], p[14]]), 37035);
    }

    #[test]
    fn test_thrust_range() {
        let (c, _, controls) = cflie();
        assert_eq!(c.thrust(), 34035);
        controls.handle().set(channels::THROTTLE, 9000);
        assert_eq!(c.thrust(), 37035, "clamped");
    }
}
