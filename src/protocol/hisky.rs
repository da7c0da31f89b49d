//! # HiSky (NRF24L01)
//!
//! Runs a fixed nine-phase cycle at 1 ms per phase: while binding, one of
//! four rotating bind packets goes out on channel 81 to the shared bind
//! address, then a data packet goes out on the next of 20 hop channels.
//! Channel values are 10-bit, 0..=1000, with the two high bits of each
//! packed into bytes 8 and 9.

use tracing::{debug, info};

use super::{reset_chip, Diagnostic, DiagnosticId, RfProtocol, Session};
use crate::bus::RadioBus;
use crate::codec::Scale;
use crate::controls::{channels, CHAN_MAX_VALUE, CHAN_MIN_VALUE};
use crate::device::nrf24l01::{config, reg, Bitrate};
use crate::device::{Nrf24l01, RfMode, Transceiver, TxLog};
use crate::error::Result;
use crate::hopping::{pump_lfsr, rand32_r, Band, HopTableSpec};

const PACKET_SIZE: usize = 10;
const ADDR_SIZE: usize = 5;
pub const HOP_CHANNELS: usize = 20;
const MAX_BIND_COUNT: u16 = 800;
const PHASE_US: u32 = 1000;
const INITIAL_WAIT_US: u32 = 1000;
const PHASES: u8 = 9;

/// Every plane listens here while binding
const BIND_CHANNEL: u8 = 81;
const BIND_ADDR: [u8; ADDR_SIZE] = [0x12, 0x23, 0x23, 0x45, 0x78];

/// Servo range ±125 %: 50..=950 for in-range controls
const SERVO: Scale = Scale::new(450, 500, 0, 1000);

const BANDS: [Band; 3] = [
    Band { last: 26, cap: 8 },
    Band { last: 50, cap: 8 },
    Band { last: 255, cap: 8 },
];

/// 73 is prime, so channels 75 and up are never used
const HOP_TABLE: HopTableSpec<'static> = HopTableSpec {
    count: HOP_CHANNELS,
    modulus: 73,
    offset: 2,
    bands: &BANDS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiSkyState {
    Init,
    Data,
}

#[derive(Debug)]
pub struct HiSky<B> {
    dev: Nrf24l01<B>,
    session: Session,
    state: HiSkyState,
    address: [u8; ADDR_SIZE],
    hops: Vec<u8>,
    cur_chan: usize,
    bind_packets: [[u8; PACKET_SIZE]; 4],
    bind_idx: usize,
    bind_ctr: u16,
    phase: u8,
    packet: [u8; PACKET_SIZE],
    packet_ctr: u32,
}

impl<B: RadioBus> HiSky<B> {
    pub fn new(dev: Nrf24l01<B>, session: Session) -> Self {
        Self {
            dev,
            session,
            state: HiSkyState::Init,
            address: [0; ADDR_SIZE],
            hops: Vec::new(),
            cur_chan: 0,
            bind_packets: [[0; PACKET_SIZE]; 4],
            bind_idx: 0,
            bind_ctr: 0,
            phase: 0,
            packet: [0; PACKET_SIZE],
            packet_ctr: 0,
        }
    }

    pub fn state(&self) -> HiSkyState {
        self.state
    }

    pub fn address(&self) -> [u8; ADDR_SIZE] {
        self.address
    }

    pub fn hop_table(&self) -> &[u8] {
        &self.hops
    }

    fn derive_address(&mut self) {
        let mut lfsr = self.session.controller_id;
        pump_lfsr(&mut lfsr, ADDR_SIZE);
        for i in 0..ADDR_SIZE {
            self.address[i] = lfsr as u8;
            rand32_r(&mut lfsr, i as u8);
        }
        // one more divergence round before seeding the hop table
        pump_lfsr(&mut lfsr, 4);
        self.hops = HOP_TABLE.generate(lfsr);
    }

    /// Packet 0 carries the address, packets 1-3 the hop table in chunks of
    /// 7, 7 and 6 behind the address sum.
    fn build_bind_packets(&mut self) {
        let sum: u16 = self.address.iter().map(|&b| u16::from(b)).sum();
        let [sum_h, sum_l] = sum.to_be_bytes();

        self.bind_packets = [[0; PACKET_SIZE]; 4];
        self.bind_packets[0][..3].copy_from_slice(&[0xff, 0xaa, 0x55]);
        self.bind_packets[0][3..8].copy_from_slice(&self.address);

        for (i, chunk) in self.hops.chunks(7).enumerate() {
            let packet = &mut self.bind_packets[i + 1];
            packet[0] = sum_l;
            packet[1] = sum_h;
            packet[2] = i as u8;
            packet[3..3 + chunk.len()].copy_from_slice(chunk);
        }
        self.bind_idx = 0;
        self.cur_chan = 0;
        self.phase = 0;
    }

    /// 0..=1000, throttle reversed.
    fn servo(&self, ch: usize) -> u16 {
        let value = self
            .session
            .control(ch)
            .clamp(CHAN_MIN_VALUE, CHAN_MAX_VALUE);
        let ret = SERVO.encode(value);
        let ret = if ch == channels::THROTTLE { 1000 - ret } else { ret };
        ret.clamp(0, 1000) as u16
    }

    /// Order on air: aileron, elevator, throttle, rudder, gear, pitch.
    fn build_data_packet(&mut self) {
        let mut high = 0u8;
        for (slot, ch, shift, mask) in [
            (0, channels::AILERON, 8, 0x03),
            (1, channels::ELEVATOR, 6, 0x0c),
            (2, channels::THROTTLE, 4, 0x30),
            (3, channels::RUDDER, 2, 0xc0),
        ] {
            let value = self.servo(ch);
            self.packet[slot] = value as u8;
            high |= (value >> shift) as u8 & mask;
        }
        self.packet[8] = high;

        let mut aux = 0u8;
        for slot in (4..=7).rev() {
            let value = self.servo(slot);
            self.packet[slot] = value as u8;
            aux |= (value >> 2) as u8 & 0x03;
            aux <<= 2;
        }
        self.packet[9] = aux;
        self.packet_ctr = self.packet_ctr.wrapping_add(1);
    }
}

impl<B: RadioBus> RfProtocol for HiSky<B> {
    fn init(&mut self) -> Result<u32> {
        self.packet_ctr = 0;
        self.derive_address();
        self.build_bind_packets();

        reset_chip(&mut self.dev)?;
        // pipe 0 only, no auto-ack
        self.dev.write_reg(reg::EN_RXADDR, 0x01);
        self.dev.write_reg(reg::EN_AA, 0x00);
        self.dev.write_burst(reg::TX_ADDR, &self.address);
        self.dev.write_burst(reg::RX_ADDR_P0, &self.address);
        self.dev.write_reg(reg::RX_PW_P0, PACKET_SIZE as u8);
        self.dev.set_channel(BIND_CHANNEL);

        self.dev.set_mode(RfMode::Transmit);
        self.dev
            .write_reg(reg::CONFIG, config::EN_CRC | config::CRCO | config::PWR_UP);
        self.dev.write_reg(reg::SETUP_AW, 0x03);
        self.dev.set_bitrate(Bitrate::Mbps1);
        self.dev.set_power(self.session.power_level());
        self.dev.write_reg(reg::STATUS, 0x70);

        if self.session.option() != 0 {
            self.bind_ctr = 0;
            self.state = HiSkyState::Data;
        } else {
            self.bind_ctr = MAX_BIND_COUNT;
            self.state = HiSkyState::Init;
        }

        info!(
            "HiSky init: address={:02X?} hops={:?}",
            self.address, self.hops
        );
        Ok(INITIAL_WAIT_US)
    }

    fn step(&mut self) -> u32 {
        self.phase += 1;
        let phase = self.phase;
        let binding = self.bind_ctr > 0;

        match phase {
            1 => {
                self.dev.flush_tx();
            }
            2 if binding => {
                self.dev.write_burst(reg::TX_ADDR, &BIND_ADDR);
                self.dev.set_channel(BIND_CHANNEL);
            }
            3 if binding => {
                self.bind_ctr -= 1;
                if self.bind_ctr == 0 {
                    debug!("HiSky bind finished");
                    self.state = HiSkyState::Data;
                }
                self.dev.write_payload(&self.bind_packets[self.bind_idx]);
                self.bind_idx = (self.bind_idx + 1) % self.bind_packets.len();
            }
            4 if binding => {
                self.dev.flush_tx();
            }
            5 => {
                if let Some(level) = self.session.power.take_update() {
                    self.dev.set_power(level);
                }
            }
            6 => {
                self.dev.write_burst(reg::TX_ADDR, &self.address);
                self.dev.set_channel(self.hops[self.cur_chan]);
                self.cur_chan = (self.cur_chan + 1) % self.hops.len();
            }
            7 => self.build_data_packet(),
            _ if phase >= PHASES => {
                self.phase = 0;
                self.dev.write_payload(&self.packet);
            }
            _ => {}
        }

        PHASE_US
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
            DiagnosticId::State => Diagnostic::Byte(match self.state {
                HiSkyState::Init => 0,
                HiSkyState::Data => 0x10,
            }),
            DiagnosticId::Channel => {
                Diagnostic::Byte(self.hops.get(self.cur_chan).copied().unwrap_or(BIND_CHANNEL))
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

    const CONTROLLER_ID: u32 = 0x0BAD_F00D;

    fn hisky(option: u8) -> (HiSky<SimBus>, SimBus, Arc<ControlVector>) {
        let bus = SimBus::new(ChipModel::Nrf24l01);
        let controls = ControlVector::new();
        let session = Session::new(
            ProtocolId::for_kind(ProtocolKind::HiSky, option),
            CONTROLLER_ID,
            controls.clone(),
        );
        (HiSky::new(Nrf24l01::new(bus.clone()), session), bus, controls)
    }

    #[test]
    fn test_hop_table_rules() {
        let (mut h, _, _) = hisky(0);
        h.init().unwrap();
        let hops = h.hop_table().to_vec();
        assert_eq!(hops.len(), HOP_CHANNELS);
        for (i, &ch) in hops.iter().enumerate() {
            assert!((2..=74).contains(&ch), "channel {} out of range", ch);
            assert!(!hops[..i].contains(&ch), "duplicate {}", ch);
        }
        let parity = hops[0] & 1;
        assert!(hops.iter().all(|ch| ch & 1 == parity), "all channels share parity");
        for (lo, hi) in [(0u8, 26u8), (27, 50), (51, 255)] {
            assert!(hops.iter().filter(|&&ch| (lo..=hi).contains(&ch)).count() <= 8);
        }

        let (mut again, _, _) = hisky(0);
        again.init().unwrap();
        assert_eq!(again.hop_table(), hops.as_slice());
        assert_eq!(again.address(), h.address());
    }

    #[test]
    fn test_bind_packets_carry_address_and_hops() {
        let (mut h, _, _) = hisky(0);
        h.init().unwrap();
        let addr = h.address();
        let sum: u16 = addr.iter().map(|&b| u16::from(b)).sum();

        assert_eq!(&h.bind_packets[0][..3], &[0xff, 0xaa, 0x55]);
        assert_eq!(&h.bind_packets[0][3..8], &addr);
        for i in 1..4 {
            assert_eq!(h.bind_packets[i][0], sum as u8);
            assert_eq!(h.bind_packets[i][1], (sum >> 8) as u8);
            assert_eq!(h.bind_packets[i][2], (i - 1) as u8);
        }
        assert_eq!(&h.bind_packets[1][3..10], &h.hop_table()[..7]);
        assert_eq!(&h.bind_packets[3][3..9], &h.hop_table()[14..]);
        assert_eq!(h.bind_packets[3][9], 0);
    }

    #[test]
    fn test_nine_phase_cycle_while_binding() {
        let (mut h, bus, _) = hisky(0);
        h.init().unwrap();
        bus.clear_log();
        for _ in 0..PHASES {
            assert_eq!(h.step(), PHASE_US);
        }
        let hops = h.hop_table().to_vec();
        assert_eq!(bus.tx_channels(), vec![BIND_CHANNEL, hops[0]]);
        let packets = bus.tx_packets();
        assert_eq!(packets[0][0], 0xff, "first bind packet");
        assert_eq!(packets[1].len(), PACKET_SIZE);
        assert_eq!(bus.file(reg::TX_ADDR), h.address().to_vec());

        for _ in 0..PHASES {
            h.step();
        }
        assert_eq!(bus.tx_packets()[2][2], 0, "second bind packet");
        assert_eq!(bus.tx_channels()[3], hops[1]);
    }

    #[test]
    fn test_bind_ends_after_count() {
        let (mut h, bus, _) = hisky(0);
        h.init().unwrap();
        h.bind_ctr = 2;
        for _ in 0..2 * PHASES {
            h.step();
        }
        assert_eq!(h.state(), HiSkyState::Data);
        bus.clear_log();
        for _ in 0..PHASES {
            h.step();
        }
        assert_eq!(bus.tx_packets().len(), 1, "data only");
    }

    #[test]
    fn test_option_skips_bind() {
        let (mut h, bus, _) = hisky(1);
        h.init().unwrap();
        assert_eq!(h.state(), HiSkyState::Data);
        for _ in 0..PHASES {
            h.step();
        }
        assert_eq!(bus.tx_channels(), vec![h.hop_table()[0]]);
    }

    #[test]
    fn test_data_packet_high_bits() {
        let (mut h, bus, _) = hisky(1);
        h.init().unwrap();
        for _ in 0..PHASES {
            h.step();
        }
        let p = &bus.tx_packets()[0];
        // aileron, elevator, rudder, aux at 500; throttle reversed to 950
        assert_eq!(p[0], (500u16 & 0xff) as u8);
        assert_eq!(p[2], (950u16 & 0xff) as u8);
        assert_eq!(p[8], 0x01 | 0x04 | 0x30 | 0x40);
        assert_eq!(p[9], 0x54);
    }

    #[test]
    fn test_out_of_range_control_is_clamped() {
        let (mut h, _, controls) = hisky(1);
        controls.handle().set(channels::AILERON, 900);
        h.init().unwrap();
        assert_eq!(h.servo(channels::AILERON), 950);
    }
}
