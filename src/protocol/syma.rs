//! # Syma X (NRF24L01)
//!
//! Two generations share this state machine. The X4-class receivers bind on
//! a fixed address over four channels and then move to a session address
//! whose last byte picks the data channels. The X5C (option 1) uses one
//! fixed address and two fixed channel lists, 16-byte packets and 1 Mbps.
//! Every channel carries two consecutive packets.

use tracing::{debug, info};

use super::{reset_chip, Diagnostic, DiagnosticId, RfProtocol, Session};
use crate::bus::RadioBus;
use crate::codec::Checksum;
use crate::controls::{channels, CHAN_MAX_VALUE, CHAN_MIN_VALUE};
use crate::device::nrf24l01::{config, reg, Bitrate};
use crate::device::{Nrf24l01, RfMode, Transceiver, TxLog};
use crate::error::Result;
use crate::hopping::{pump_lfsr, rand32_r};

/// Receive pipes are sized for this although nothing is received
const PAYLOAD_SIZE: u8 = 10;
const MAX_PACKET_SIZE: usize = 16;
pub const MAX_BIND_COUNT: u16 = 345;

const PACKET_PERIOD_US: u32 = 4000;
const INITIAL_WAIT_US: u32 = 500;
const FIRST_PACKET_US: u32 = 12000;

pub const OPT_X5C: u8 = 0x01;

const FLAG_FLIP: u8 = 0x01;
const FLAG_VIDEO: u8 = 0x02;
const FLAG_PICTURE: u8 = 0x04;

const BIND_ADDR: [u8; 5] = [0xab, 0xac, 0xad, 0xae, 0xaf];
/// X5C binds and flies on the same address
const X5C_ADDR: [u8; 5] = [0x6d, 0x6a, 0x73, 0x73, 0x73];

/// Sent once on channel 8 before binding starts
const FIRST_PACKET: [u8; 15] = [
    0xf9, 0x96, 0x82, 0x1b, 0x20, 0x08, 0x08, 0xf2, 0x7d, 0xef, 0xff, 0x00, 0x00, 0x00, 0x00,
];
const FIRST_CHANNEL: u8 = 0x08;

const BIND_CHANNELS: [u8; 4] = [0x4b, 0x30, 0x40, 0x2e];
const X5C_BIND_CHANNELS: [u8; 16] = [
    0x27, 0x1b, 0x39, 0x28, 0x24, 0x22, 0x2e, 0x36, 0x19, 0x21, 0x29, 0x14, 0x1e, 0x12, 0x2d, 0x18,
];
const X5C_DATA_CHANNELS: [u8; 15] = [
    0x1d, 0x2f, 0x26, 0x3d, 0x15, 0x2b, 0x25, 0x24, 0x27, 0x2c, 0x1c, 0x3e, 0x39, 0x2d, 0x22,
];

const START_CHANNELS_1: [u8; 4] = [0x0a, 0x1a, 0x2a, 0x3a];
const START_CHANNELS_2: [u8; 4] = [0x2a, 0x0a, 0x42, 0x22];
const START_CHANNELS_3: [u8; 4] = [0x1a, 0x3a, 0x12, 0x32];

const INIT_REGS: [Option<u8>; 0x18] = [
    // 2-byte CRC, radio off
    Some(config::EN_CRC | config::CRCO),
    Some(0x00),
    Some(0x3F),
    Some(0x03),
    Some(0xee),
    Some(FIRST_CHANNEL),
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

/// Data channels of an X4-class session, picked by the low five bits of
/// the first address byte.
pub fn data_channels(address: u8) -> [u8; 4] {
    let laddress = address & 0x1f;
    match laddress {
        0x00..=0x0f => {
            let offset = if laddress == 6 { 7 } else { laddress };
            START_CHANNELS_1.map(|ch| ch + offset)
        }
        0x10..=0x17 => {
            let mut chans = START_CHANNELS_2.map(|ch| ch + (laddress & 0x07));
            if laddress == 0x16 {
                chans[0] += 1;
                chans[1] += 1;
            }
            chans
        }
        0x18..=0x1d => START_CHANNELS_3.map(|ch| ch + (laddress & 0x07)),
        0x1e => [0x21, 0x41, 0x18, 0x38],
        _ => [0x21, 0x41, 0x19, 0x39],
    }
}

/// Sign-magnitude stick byte: bit 7 set for negative, magnitude 0..=127.
fn sign_magnitude(value: i16) -> u8 {
    let v = i32::from(value.clamp(CHAN_MIN_VALUE, CHAN_MAX_VALUE)) * 127 / i32::from(CHAN_MAX_VALUE);
    if v < 0 {
        0x80 | v.unsigned_abs() as u8
    } else {
        v as u8
    }
}

/// Maps a sign-magnitude byte onto 0..=255 with 0x80 at center.
fn unsigned_stick(value: u8) -> u8 {
    if value & 0x80 != 0 {
        0xff - value
    } else {
        0x80 + value
    }
}

fn x5c_trim(value: u8) -> u8 {
    (unsigned_stick(value) >> 2) + 0x20
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymaState {
    Init,
    /// First bind packet, arms the bind counter
    Bind,
    Binding,
    Data,
}

impl SymaState {
    pub fn code(self) -> u8 {
        match self {
            SymaState::Init => 0,
            SymaState::Bind => 1,
            SymaState::Binding => 2,
            SymaState::Data => 0x10,
        }
    }
}

struct Sticks {
    throttle: u8,
    rudder: u8,
    elevator: u8,
    aileron: u8,
    flags: u8,
}

#[derive(Debug)]
pub struct Syma<B> {
    dev: Nrf24l01<B>,
    session: Session,
    x5c: bool,
    state: SymaState,
    address: [u8; 5],
    hops: Vec<u8>,
    cur_chan: usize,
    packet: [u8; MAX_PACKET_SIZE],
    packet_size: usize,
    packet_ctr: u32,
    bind_ctr: u16,
}

impl<B: RadioBus> Syma<B> {
    pub fn new(dev: Nrf24l01<B>, session: Session) -> Self {
        let x5c = session.option() == OPT_X5C;
        Self {
            dev,
            session,
            x5c,
            state: SymaState::Init,
            address: [0; 5],
            hops: Vec::new(),
            cur_chan: 0,
            packet: [0; MAX_PACKET_SIZE],
            packet_size: if x5c { 16 } else { 10 },
            packet_ctr: 0,
            bind_ctr: 0,
        }
    }

    pub fn state(&self) -> SymaState {
        self.state
    }

    pub fn address(&self) -> [u8; 5] {
        self.address
    }

    pub fn hop_table(&self) -> &[u8] {
        &self.hops
    }

    fn checksum(&self) -> Checksum {
        if self.x5c {
            Checksum::Additive { offset: 0 }
        } else {
            Checksum::XorFold { offset: 0x55 }
        }
    }

    fn stick(&self, ch: usize) -> u8 {
        sign_magnitude(self.session.control(ch))
    }

    fn sticks(&self) -> Sticks {
        let mut flags = 0;
        for (ch, flag) in [
            (channels::AUX1, FLAG_FLIP),
            (channels::AUX2, FLAG_PICTURE),
            (channels::AUX3, FLAG_VIDEO),
        ] {
            if self.session.control(ch) > 0 {
                flags |= flag;
            }
        }
        Sticks {
            throttle: unsigned_stick(self.stick(channels::THROTTLE)),
            rudder: self.stick(channels::RUDDER),
            elevator: self.stick(channels::ELEVATOR),
            aileron: self.stick(channels::AILERON),
            flags,
        }
    }

    fn derive_address(&mut self) {
        let mut lfsr = self.session.controller_id;
        pump_lfsr(&mut lfsr, 4);
        self.address[4] = 0xa2;
        for i in 0..4 {
            self.address[i] = lfsr as u8;
            rand32_r(&mut lfsr, i as u8);
        }
    }

    fn build_x5c(&mut self, bind: bool) {
        self.packet = [0; MAX_PACKET_SIZE];
        self.packet[7] = 0xae;
        self.packet[8] = 0xa9;
        if bind {
            self.packet[14] = 0xc0;
            self.packet[15] = 0x17;
            return;
        }

        let s = self.sticks();
        self.packet[0] = s.throttle;
        self.packet[1] = s.rudder;
        self.packet[2] = s.elevator ^ 0x80;
        self.packet[3] = s.aileron;
        // trims extend the control range
        self.packet[4] = x5c_trim(s.rudder ^ 0x80);
        self.packet[5] = x5c_trim(s.elevator);
        self.packet[6] = x5c_trim(s.aileron ^ 0x80);
        let mut flags = 0x04;
        if s.flags & FLAG_VIDEO != 0 {
            flags |= 0x10;
        }
        if s.flags & FLAG_PICTURE != 0 {
            flags |= 0x08;
        }
        if s.flags & FLAG_FLIP != 0 {
            flags |= 0x01;
        }
        self.packet[14] = flags;
        self.checksum().apply(&mut self.packet[..self.packet_size]);
    }

    fn build_x4(&mut self, bind: bool) {
        if bind {
            for (i, &b) in self.address.iter().rev().enumerate() {
                self.packet[i] = b;
            }
            self.packet[5..8].copy_from_slice(&[0xaa; 3]);
        } else {
            let s = self.sticks();
            self.packet[0] = s.throttle;
            self.packet[1] = s.elevator;
            self.packet[2] = s.rudder;
            self.packet[3] = s.aileron;
            let mut media = 0;
            if s.flags & FLAG_VIDEO != 0 {
                media |= 0x80;
            }
            if s.flags & FLAG_PICTURE != 0 {
                media |= 0x40;
            }
            self.packet[4] = media;
            // high rates in bit 7
            self.packet[5] = (s.elevator >> 2) | 0xc0;
            self.packet[6] = (s.rudder >> 2) | if s.flags & FLAG_FLIP != 0 { 0x40 } else { 0 };
            self.packet[7] = s.aileron >> 2;
        }
        self.packet[8] = 0x00;
        self.checksum().apply(&mut self.packet[..self.packet_size]);
    }

    fn send_packet(&mut self, bind: bool) {
        if self.x5c {
            self.build_x5c(bind);
        } else {
            self.build_x4(bind);
        }

        self.dev.write_reg(reg::STATUS, 0x70);
        self.dev.write_reg(reg::CONFIG, 0x2e);
        self.dev.set_channel(self.hops[self.cur_chan]);
        self.dev.flush_tx();
        self.dev.write_payload(&self.packet[..self.packet_size]);

        // each channel is used twice
        if self.packet_ctr % 2 == 1 {
            self.cur_chan = (self.cur_chan + 1) % self.hops.len();
        }
        self.packet_ctr = self.packet_ctr.wrapping_add(1);

        if let Some(level) = self.session.power.take_update() {
            self.dev.set_power(level);
        }
    }

    fn start_bind(&mut self) {
        self.dev.flush_tx();
        self.dev.set_channel(FIRST_CHANNEL);
        self.dev.write_payload(&FIRST_PACKET);

        if self.x5c {
            self.hops = X5C_BIND_CHANNELS.to_vec();
        } else {
            self.derive_address();
            self.hops = BIND_CHANNELS.to_vec();
        }
        self.cur_chan = 0;
        self.packet_ctr = 0;
    }

    fn start_data(&mut self) {
        if self.x5c {
            self.hops = X5C_DATA_CHANNELS.to_vec();
        } else {
            self.hops = data_channels(self.address[0]).to_vec();
            self.dev.write_burst(reg::TX_ADDR, &self.address);
        }
        self.cur_chan = 0;
        self.packet_ctr = 0;
        debug!("Syma data channels {:02X?}", self.hops);
    }
}

impl<B: RadioBus> RfProtocol for Syma<B> {
    fn init(&mut self) -> Result<u32> {
        self.packet_ctr = 0;
        self.hops = BIND_CHANNELS.to_vec();

        reset_chip(&mut self.dev)?;
        self.dev.set_mode(RfMode::Transmit);
        self.dev.read_reg(reg::STATUS);

        let bitrate = if self.x5c {
            Bitrate::Mbps1
        } else {
            Bitrate::Kbps250
        };
        for (addr, value) in INIT_REGS.iter().enumerate() {
            let addr = addr as u8;
            if addr == reg::RF_SETUP {
                self.dev.set_bitrate(bitrate);
                self.dev.set_power(self.session.power_level());
            } else if let Some(value) = value {
                self.dev.write_reg(addr, *value);
            }
        }
        let tx_addr = if self.x5c { X5C_ADDR } else { BIND_ADDR };
        self.dev.write_burst(reg::TX_ADDR, &tx_addr);

        self.dev.flush_tx();
        self.dev.write_reg(reg::STATUS, 0x0e);
        self.dev.write_reg(reg::CONFIG, 0x0c);
        self.dev.write_reg(reg::CONFIG, 0x0e);

        self.state = SymaState::Init;
        info!("Syma init: x5c={}", self.x5c);
        Ok(INITIAL_WAIT_US)
    }

    fn step(&mut self) -> u32 {
        match self.state {
            SymaState::Init => {
                self.start_bind();
                self.state = SymaState::Bind;
                return FIRST_PACKET_US;
            }
            SymaState::Bind => {
                self.bind_ctr = MAX_BIND_COUNT;
                self.state = SymaState::Binding;
                self.send_packet(true);
            }
            SymaState::Binding => {
                if self.bind_ctr == 0 {
                    self.start_data();
                    self.state = SymaState::Data;
                } else {
                    self.send_packet(true);
                    self.bind_ctr -= 1;
                }
            }
            SymaState::Data => self.send_packet(false),
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
            DiagnosticId::Channel => {
                Diagnostic::Byte(self.hops.get(self.cur_chan).copied().unwrap_or(FIRST_CHANNEL))
            }
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
    use crate::sim::SimBus;
    use std::sync::Arc;

    const CONTROLLER_ID: u32 = 0x5A5A_1234;

    fn syma(option: u8) -> (Syma<SimBus>, SimBus, Arc<ControlVector>) {
        let bus = SimBus::new(ChipModel::Nrf24l01);
        let controls = ControlVector::new();
        let session = Session::new(
            ProtocolId::for_kind(ProtocolKind::Syma, option),
            CONTROLLER_ID,
            controls.clone(),
        );
        (Syma::new(Nrf24l01::new(bus.clone()), session), bus, controls)
    }

    /// Runs the first-packet step and the whole bind phase.
    fn run_through_bind(s: &mut Syma<SimBus>) {
        s.step();
        for _ in 0..=MAX_BIND_COUNT + 1 {
            s.step();
        }
        assert_eq!(s.state(), SymaState::Data);
    }

    #[test]
    fn test_sign_magnitude() {
        assert_eq!(sign_magnitude(0), 0x00);
        assert_eq!(sign_magnitude(500), 0x7f);
        assert_eq!(sign_magnitude(-500), 0xff);
        assert_eq!(sign_magnitude(250), 63);
        assert_eq!(sign_magnitude(-250), 0x80 | 63);
        assert_eq!(sign_magnitude(2000), 0x7f, "clamped");
    }

    #[test]
    fn test_throttle_is_unsigned() {
        assert_eq!(unsigned_stick(sign_magnitude(-500)), 0x00);
        assert_eq!(unsigned_stick(sign_magnitude(0)), 0x80);
        assert_eq!(unsigned_stick(sign_magnitude(500)), 0xff);
    }

    #[test]
    fn test_data_channels_by_address() {
        assert_eq!(data_channels(0x03), [0x0d, 0x1d, 0x2d, 0x3d]);
        assert_eq!(data_channels(0x06), [0x11, 0x21, 0x31, 0x41], "6 is remapped to 7");
        assert_eq!(data_channels(0x12), [0x2c, 0x0c, 0x44, 0x24]);
        assert_eq!(data_channels(0x16), [0x31, 0x11, 0x48, 0x28]);
        assert_eq!(data_channels(0x19), [0x1b, 0x3b, 0x13, 0x33]);
        assert_eq!(data_channels(0x1e), [0x21, 0x41, 0x18, 0x38]);
        assert_eq!(data_channels(0xff), [0x21, 0x41, 0x19, 0x39]);
    }

    #[test]
    fn test_first_packet_then_bind_channels_twice() {
        let (mut s, bus, _) = syma(0);
        assert_eq!(s.init().unwrap(), INITIAL_WAIT_US);
        assert_eq!(bus.file(reg::TX_ADDR), BIND_ADDR.to_vec());
        bus.clear_log();

        assert_eq!(s.step(), FIRST_PACKET_US);
        for _ in 0..6 {
            assert_eq!(s.step(), PACKET_PERIOD_US);
        }
        let packets = bus.tx_packets();
        assert_eq!(packets[0], FIRST_PACKET.to_vec());
        assert_eq!(
            bus.tx_channels(),
            vec![FIRST_CHANNEL, 0x4b, 0x4b, 0x30, 0x30, 0x40, 0x40]
        );
        assert_eq!(s.address()[4], 0xa2);
    }

    #[test]
    fn test_bind_packet_layout() {
        let (mut s, bus, _) = syma(0);
        s.init().unwrap();
        s.step();
        s.step();
        let p = bus.tx_packets()[1].clone();
        let addr = s.address();
        assert_eq!(p.len(), 10);
        assert_eq!(&p[..5], &[addr[4], addr[3], addr[2], addr[1], addr[0]]);
        assert_eq!(&p[5..9], &[0xaa, 0xaa, 0xaa, 0x00]);
        assert_eq!(p[9], xor8_plus(&p[..9], 0x55));
    }

    fn xor8_plus(data: &[u8], offset: u8) -> u8 {
        data.iter().fold(0, |acc, b| acc ^ b).wrapping_add(offset)
    }

    #[test]
    fn test_data_moves_to_session_address() {
        let (mut s, bus, controls) = syma(0);
        s.init().unwrap();
        run_through_bind(&mut s);
        assert_eq!(bus.file(reg::TX_ADDR), s.address().to_vec());
        assert_eq!(s.hop_table(), &data_channels(s.address()[0]));

        let handle = controls.handle();
        handle.set(channels::ELEVATOR, 500);
        handle.set(channels::AUX1, 500);
        handle.set(channels::AUX3, 500);
        bus.clear_log();
        s.step();
        let p = &bus.tx_packets()[0];
        assert_eq!(bus.tx_channels()[0], s.hop_table()[0]);
        assert_eq!(p[0], 0x00, "throttle low");
        assert_eq!(p[1], 0x7f);
        assert_eq!(p[4], 0x80, "video");
        assert_eq!(p[5], (0x7f >> 2) | 0xc0);
        assert_eq!(p[6], 0x40, "flip");
        assert_eq!(p[9], xor8_plus(&p[..9], 0x55));
    }

    #[test]
    fn test_bind_length() {
        let (mut s, bus, _) = syma(0);
        s.init().unwrap();
        s.step();
        bus.clear_log();
        run_bind_only(&mut s);
        assert_eq!(bus.tx_packets().len(), usize::from(MAX_BIND_COUNT) + 1);
    }

    fn run_bind_only(s: &mut Syma<SimBus>) {
        while s.state() != SymaState::Data {
            s.step();
        }
    }

    #[test]
    fn test_x5c_packets() {
        let (mut s, bus, controls) = syma(OPT_X5C);
        s.init().unwrap();
        assert_eq!(bus.file(reg::TX_ADDR), X5C_ADDR.to_vec());
        s.step();
        s.step();
        let bind = bus.tx_packets()[1].clone();
        assert_eq!(bind.len(), 16);
        assert_eq!((bind[7], bind[8], bind[14], bind[15]), (0xae, 0xa9, 0xc0, 0x17));
        assert_eq!(bus.tx_channels()[1], X5C_BIND_CHANNELS[0]);

        run_bind_only(&mut s);
        assert_eq!(s.hop_table(), &X5C_DATA_CHANNELS);
        controls.handle().set(channels::AUX2, 500);
        bus.clear_log();
        s.step();
        let p = &bus.tx_packets()[0];
        assert_eq!(p[0], 0x00);
        assert_eq!(p[2], 0x80, "elevator reversed");
        assert_eq!(p[5], (0x80 >> 2) + 0x20);
        assert_eq!(p[14], 0x04 | 0x08);
        let sum = p[..15].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        assert_eq!(p[15], sum);
        assert_eq!(bus.tx_channels()[0], X5C_DATA_CHANNELS[0]);
    }

    #[test]
    fn test_power_applied_after_packet() {
        let (mut s, bus, _) = syma(0);
        s.init().unwrap();
        s.session_mut().power.set(crate::power::TxPower::P150mW);
        s.step();
        s.step();
        assert_eq!(bus.register(reg::RF_SETUP) & 0x06, 6);
    }
}
