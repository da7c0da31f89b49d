//! # Devo (CYRF6936)
//!
//! Frequency hopper over three quiet channels found by an RSSI scan at
//! init. Four packets go out per channel; each data packet carries four
//! controls and is XOR-scrambled with the first four bytes of the chip's
//! factory ID. Binding is a long countdown alternating bind and data
//! packets. Once bound, every tenth packet is a failsafe beacon, which
//! alternates lower and upper halves when more than eight channels are
//! configured.
//!
//! Option byte: bits 0-4 channel count (0 means 8, rounded up to a multiple
//! of 4, at most 12), bit 7 enables the telemetry window.

use tracing::{debug, info, warn};

use super::{reset_chip, Diagnostic, DiagnosticId, RfProtocol, Session};
use crate::bus::{bounded_poll, RadioBus};
use crate::codec::{map_range, scramble};
use crate::controls::{CHAN_MAX_VALUE, CHAN_MIN_VALUE};
use crate::device::cyrf6936::reg;
use crate::device::{Cyrf6936, RfMode, Transceiver, TxLog};
use crate::error::Result;
use crate::telemetry::Telemetry;

const PACKET_SIZE: usize = 16;
const PKTS_PER_CHANNEL: u8 = 4;
const MAX_BIND_COUNT: u16 = 0x1388;
const PACKET_PERIOD_US: u32 = 1200;
const INITIAL_WAIT_US: u32 = 2400;
/// About 5 µs per poll, never more than 100 µs.
const NUM_WAIT_LOOPS: u32 = 100 / 5;

pub const OPT_TELEMETRY: u8 = 0x80;
const OPT_CHANNELS: u8 = 0x1f;

/// Telemetry-mode sub-steps per packet: 16 × 100 µs slots.
const TELEMETRY_SLOTS: u8 = 16;

/// SOP codes, in transmit order (LSB first).
const SOP_CODES: [[u8; 8]; 10] = [
    [0x3C, 0x37, 0xCC, 0x91, 0xE2, 0xF8, 0xCC, 0x91],
    [0x9B, 0xC5, 0xA1, 0x0F, 0xAD, 0x39, 0xA2, 0x0F],
    [0xEF, 0x64, 0xB0, 0x2A, 0xD2, 0x8F, 0xB1, 0x2A],
    [0x66, 0xCD, 0x7C, 0x50, 0xDD, 0x26, 0x7C, 0x50],
    [0x5C, 0xE1, 0xF6, 0x44, 0xAD, 0x16, 0xF6, 0x44],
    [0x5A, 0xCC, 0xAE, 0x46, 0xB6, 0x31, 0xAE, 0x46],
    [0xA1, 0x78, 0xDC, 0x3C, 0x9E, 0x82, 0xDC, 0x3C],
    [0xB9, 0x8E, 0x19, 0x74, 0x6F, 0x65, 0x18, 0x74],
    [0xDF, 0xB1, 0xC0, 0x49, 0x62, 0xDF, 0xC1, 0x49],
    [0x97, 0xE5, 0x14, 0x72, 0x7F, 0x1A, 0x14, 0x72],
];

const INIT_REGS: [(u8, u8); 22] = [
    (reg::MODE_OVERRIDE, 0x38),
    (reg::TX_CFG, 0x08),
    (reg::RX_CFG, 0x4A),
    (reg::PWR_CTRL, 0x00),
    (reg::IO_CFG, 0x04),
    (reg::GPIO_CTRL, 0x20),
    (reg::FRAMING_CFG, 0xA4),
    (reg::DATA32_THOLD, 0x05),
    (reg::DATA64_THOLD, 0x0E),
    (reg::TX_OFFSET_LSB, 0x55),
    (reg::TX_OFFSET_MSB, 0x05),
    (reg::AUTO_CAL_TIME, 0x3C),
    (reg::AUTOCAL_OFFSET, 0x14),
    (reg::ANALOG_CTRL, 0x01),
    (reg::RX_OVERRIDE, 0x10),
    (reg::TX_OVERRIDE, 0x00),
    (reg::TX_LENGTH, 0x10),
    (reg::XTAL_CTRL, 0xC0),
    (reg::XACT_CFG, 0x10),
    (reg::CLK_OVERRIDE, 0x02),
    (reg::CLK_EN, 0x02),
    // force tx end
    (reg::XACT_CFG, 0x28),
];

/// Packet phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevoState {
    Bind,
    BindSendChannels,
    /// Bind countdown over; switching to the bound SOP code
    Bound,
    /// Bound packet 1..=10, the tenth being the beacon
    BoundN(u8),
}

impl DevoState {
    pub fn code(self) -> u8 {
        match self {
            DevoState::Bind => 0,
            DevoState::BindSendChannels => 1,
            DevoState::Bound => 2,
            DevoState::BoundN(n) => 2 + n,
        }
    }
}

#[derive(Debug)]
pub struct Devo<B> {
    dev: Cyrf6936<B>,
    session: Session,
    state: DevoState,
    mfg_id: [u8; 6],
    /// Hop trio with the first two repeated so `[i + 1]`, `[i + 2]` always exist
    channels: [u8; 5],
    chan_idx: usize,
    fixed_id: u32,
    bind_ctr: u16,
    packet: [u8; PACKET_SIZE],
    num_channels: u8,
    con_chan_idx: u8,
    pkt_in_channel: u8,
    packets_sent: u32,
    tx_state: u8,
    failsafe_upper: bool,
    telemetry: Telemetry,
}

impl<B: RadioBus> Devo<B> {
    pub fn new(dev: Cyrf6936<B>, session: Session) -> Self {
        let requested = session.option() & OPT_CHANNELS;
        let num_channels = if requested == 0 {
            8
        } else {
            (requested.div_ceil(4) * 4).clamp(4, 12)
        };
        Self {
            dev,
            session,
            state: DevoState::Bind,
            mfg_id: [0; 6],
            channels: [0; 5],
            chan_idx: 0,
            fixed_id: 0,
            bind_ctr: 0,
            packet: [0; PACKET_SIZE],
            num_channels,
            con_chan_idx: 0,
            pkt_in_channel: 0,
            packets_sent: 0,
            tx_state: 0,
            failsafe_upper: false,
            telemetry: Telemetry::new(),
        }
    }

    pub fn state(&self) -> DevoState {
        self.state
    }

    /// The three hop channels chosen at init.
    pub fn hop_channels(&self) -> [u8; 3] {
        [self.channels[0], self.channels[1], self.channels[2]]
    }

    pub fn fixed_id(&self) -> u32 {
        self.fixed_id
    }

    pub fn num_channels(&self) -> u8 {
        self.num_channels
    }

    fn telemetry_enabled(&self) -> bool {
        self.session.option() & OPT_TELEMETRY != 0
    }

    fn scramble_packet(&mut self) {
        let key = [self.mfg_id[0], self.mfg_id[1], self.mfg_id[2], self.mfg_id[3]];
        scramble(&mut self.packet[1..], &key);
    }

    fn add_packet_suffix(&mut self) {
        // no fixed ID is configured, so the bind-state bits stay clear
        let bind_state = 0x00;
        self.packet[10] = bind_state | (PKTS_PER_CHANNEL - self.pkt_in_channel - 1);
        self.packet[11] = self.channels[self.chan_idx + 1];
        self.packet[12] = self.channels[self.chan_idx + 2];
        let id = self.fixed_id.to_le_bytes();
        self.packet[13..16].copy_from_slice(&id[..3]);
    }

    fn build_beacon_packet(&mut self, upper: bool) {
        let (count, header) = if upper { (4, 0x08) } else { (8, 0x07) };
        self.packet[0] = (self.num_channels << 4) | header;
        // failsafe values are not configured: every slot disabled
        for slot in &mut self.packet[1..1 + count] {
            *slot = 0;
        }
        self.packet[9] = 0;
        self.add_packet_suffix();
    }

    fn build_bind_packet(&mut self) {
        self.packet[0] = (self.num_channels << 4) | 0x0a;
        self.packet[1..3].copy_from_slice(&self.bind_ctr.to_le_bytes());
        self.packet[3..6].copy_from_slice(&self.channels[self.chan_idx..self.chan_idx + 3]);
        self.packet[6..10].copy_from_slice(&self.mfg_id[..4]);
        self.add_packet_suffix();
        // the fixed-id part is additionally scrambled in bind packets
        for i in 0..3 {
            self.packet[13 + i] ^= self.mfg_id[i];
        }
    }

    fn build_data_packet(&mut self) {
        let mut sign = 0x0b;
        self.packet[0] = (self.num_channels << 4) | (0x0b + self.con_chan_idx);
        for i in 0..4 {
            let slot = usize::from(self.con_chan_idx) * 4 + i;
            let mut value = map_range(
                i32::from(self.session.control_by_order(slot)),
                i32::from(CHAN_MIN_VALUE),
                i32::from(CHAN_MAX_VALUE),
                -2000,
                2000,
            ) as i16;
            if value < 0 {
                value = value.wrapping_neg();
                sign |= 1 << (7 - i);
            }
            self.packet[2 * i + 1..2 * i + 3].copy_from_slice(&value.to_le_bytes());
        }
        self.packet[9] = sign;

        self.con_chan_idx += 1;
        if self.con_chan_idx * 4 >= self.num_channels {
            self.con_chan_idx = 0;
        }
        self.add_packet_suffix();
    }

    fn build_packet(&mut self) {
        match self.state {
            DevoState::Bind => {
                self.bind_ctr = self.bind_ctr.saturating_sub(1);
                self.build_bind_packet();
                self.state = DevoState::BindSendChannels;
            }
            DevoState::BindSendChannels => {
                self.bind_ctr = self.bind_ctr.saturating_sub(1);
                self.build_data_packet();
                self.scramble_packet();
                self.state = if self.bind_ctr == 0 {
                    DevoState::Bound
                } else {
                    DevoState::Bind
                };
            }
            DevoState::Bound | DevoState::BoundN(1..=9) => {
                self.build_data_packet();
                self.scramble_packet();
                self.state = match self.state {
                    DevoState::BoundN(n) => DevoState::BoundN(n + 1),
                    _ => DevoState::BoundN(1),
                };
                self.bind_ctr = self.bind_ctr.saturating_sub(1);
            }
            DevoState::BoundN(_) => {
                let upper = self.num_channels > 8 && self.failsafe_upper;
                self.build_beacon_packet(upper);
                self.failsafe_upper = !self.failsafe_upper;
                self.scramble_packet();
                self.state = DevoState::BoundN(1);
            }
        }

        self.packets_sent = self.packets_sent.wrapping_add(1);
        self.pkt_in_channel += 1;
        if self.pkt_in_channel == PKTS_PER_CHANNEL {
            self.pkt_in_channel = 0;
        }
    }

    fn set_bound_sop_codes(&mut self) {
        let m = self.mfg_id;
        let mut crc = m[0].wrapping_add(m[1] >> 6).wrapping_add(m[2]);
        let sop_idx = (m[0].wrapping_shl(2).wrapping_add(m[1]).wrapping_add(m[2]) % 10) as usize;
        // a zero seed is not allowed
        if crc == 0 {
            crc = 1;
        }
        self.dev.set_mode(RfMode::Transmit);
        self.dev.set_crc_seed(u16::from_be_bytes([crc, crc]));
        self.dev.set_sop_code(&SOP_CODES[sop_idx]);
        self.dev.set_power(self.session.power_level());
        info!("Devo bound: sop={} crc=0x{:02X}{:02X}", sop_idx, crc, crc);
    }

    fn tx_done(&mut self) -> bool {
        bounded_poll(NUM_WAIT_LOOPS, || {
            self.dev.read_reg(reg::TX_IRQ_STATUS) & 0x02 != 0
        })
    }

    fn leave_bind_if_done(&mut self) {
        if self.state == DevoState::Bound {
            self.state = DevoState::BoundN(3);
            self.set_bound_sop_codes();
        }
    }

    fn next_channel(&mut self) {
        if let Some(level) = self.session.power.take_update() {
            self.dev.set_power(level);
        }
        self.chan_idx = (self.chan_idx + 1) % 3;
        self.dev.set_channel(self.channels[self.chan_idx]);
    }

    fn step_normal(&mut self) -> u32 {
        if self.tx_state == 0 {
            self.build_packet();
            self.dev.write_payload(&self.packet);
        } else {
            if !self.tx_done() {
                warn!("Devo TX IRQ not raised, polling again");
                return PACKET_PERIOD_US;
            }
            self.leave_bind_if_done();
            if self.pkt_in_channel == 0 {
                self.next_channel();
            }
        }
        self.tx_state ^= 1;
        PACKET_PERIOD_US
    }

    fn step_telemetry(&mut self) -> u32 {
        let mut delay = 100;

        match self.tx_state {
            0 => {
                self.build_packet();
                self.dev.write_payload(&self.packet);
                delay = 900;
            }
            1 => {
                if !self.tx_done() {
                    warn!("Devo TX IRQ not raised");
                    self.tx_state = TELEMETRY_SLOTS - 1;
                    delay = 1500;
                }
                self.leave_bind_if_done();
                if self.pkt_in_channel == 0 || self.bind_ctr > 0 {
                    delay = 1500;
                    self.tx_state = TELEMETRY_SLOTS - 1;
                } else {
                    self.dev.set_mode(RfMode::Receive);
                    self.dev.write_reg(reg::RX_IRQ_STATUS, 0x80);
                    self.dev.write_reg(reg::RX_CTRL, 0x80);
                }
            }
            _ => {
                let status = self.dev.read_reg(reg::RX_IRQ_STATUS);
                if status & 0x23 == 0x22 {
                    self.dev.read_payload(&mut self.packet);
                    self.parse_telemetry();
                    delay = 100 * u32::from(TELEMETRY_SLOTS - self.tx_state);
                    self.tx_state = TELEMETRY_SLOTS - 1;
                }
            }
        }

        self.tx_state += 1;
        if self.tx_state == TELEMETRY_SLOTS {
            self.dev.set_mode(RfMode::Transmit);
            if self.pkt_in_channel == 0 {
                self.next_channel();
            }
            self.tx_state = 0;
        }
        delay
    }

    fn parse_telemetry(&mut self) {
        if self.packet[0] & 0xF0 != 0x30 {
            return;
        }
        self.scramble_packet();
        let id = self.fixed_id.to_le_bytes();
        if self.packet[13..16] != id[..3] {
            debug!("Devo telemetry for another transmitter ignored");
            return;
        }
        match self.telemetry.apply_devo(&self.packet) {
            Ok(Some(frame)) => debug!("Devo telemetry {:?}", frame),
            Ok(None) => {}
            Err(e) => debug!("Devo telemetry dropped: {}", e),
        }
    }
}

impl<B: RadioBus> RfProtocol for Devo<B> {
    fn init(&mut self) -> Result<u32> {
        self.dev.set_mode(RfMode::Idle);
        reset_chip(&mut self.dev)?;
        let power = self.session.power_level().bits();
        for (addr, value) in INIT_REGS {
            let value = if addr == reg::TX_CFG { value | power } else { value };
            self.dev.write_reg(addr, value);
        }

        self.mfg_id = self.dev.read_mfg_id();
        self.dev.set_mode(RfMode::Transmit);
        self.dev.set_crc_seed(0x0000);
        self.dev.set_sop_code(&SOP_CODES[0]);

        let quiet = self.dev.find_best_channels(3, 4, 4, 80);
        self.channels = [quiet[0], quiet[1], quiet[2], quiet[0], quiet[1]];
        self.chan_idx = 0;
        self.dev.set_channel(self.channels[0]);

        self.failsafe_upper = false;
        self.con_chan_idx = 0;
        self.pkt_in_channel = 0;
        self.packets_sent = 0;
        self.tx_state = 0;

        let m = self.mfg_id;
        let c = self.channels;
        self.fixed_id = (u32::from(c[0] ^ m[0] ^ m[3]) << 16
            | u32::from(c[1] ^ m[1] ^ m[4]) << 8
            | u32::from(c[2] ^ m[2] ^ m[5]))
            % 1_000_000;
        self.bind_ctr = MAX_BIND_COUNT;
        self.state = DevoState::Bind;

        info!(
            "Devo init: channels={:?} fixed_id={} num_channels={}",
            self.hop_channels(),
            self.fixed_id,
            self.num_channels
        );
        Ok(INITIAL_WAIT_US)
    }

    fn step(&mut self) -> u32 {
        if self.telemetry_enabled() {
            self.step_telemetry()
        } else {
            self.step_normal()
        }
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
            DiagnosticId::Channel => Diagnostic::Byte(self.channels[self.chan_idx]),
            DiagnosticId::PacketCtr => Diagnostic::Word(self.packets_sent),
            _ => Diagnostic::Empty,
        }
    }

    fn tx_log(&self) -> &TxLog {
        self.dev.tx_log()
    }

    fn telemetry(&self) -> Option<&Telemetry> {
        self.telemetry_enabled().then_some(&self.telemetry)
    }
}
