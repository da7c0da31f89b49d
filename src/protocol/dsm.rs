//! # DSM2 / DSMX (CYRF6936)
//!
//! Spektrum-compatible link. Each frame sends the same packet on two
//! channels, 4 ms apart, each with its own PN row and an inverted CRC seed.
//! DSM2 derives its two channels from the factory ID; DSMX hops over a
//! 23-channel table built by the shared LCG generator.
//!
//! With seven or fewer channels one packet covers everything and a frame
//! lasts 22 ms. With more, the lower and upper halves alternate every 11 ms.
//!
//! Option byte: bit 0 selects DSMX, bit 1 opens a receive window after
//! every frame.

use tracing::{debug, info, warn};

use super::{reset_chip, Diagnostic, DiagnosticId, RfProtocol, Session};
use crate::bus::{bounded_poll, RadioBus};
use crate::codec::map_range;
use crate::controls::{channels, CHAN_MAX_VALUE, CHAN_MIN_VALUE};
use crate::device::cyrf6936::reg;
use crate::device::{Cyrf6936, RfMode, Transceiver, TxLog};
use crate::error::Result;
use crate::hopping::{Band, HopTableSpec};
use crate::telemetry::Telemetry;

pub const OPT_DSMX: u8 = 0x01;
pub const OPT_TELEMETRY: u8 = 0x02;

const PACKET_SIZE: usize = 16;
/// Bind packets go out every other step, one per 10 ms
const BIND_COUNT: u16 = 600;
/// Any odd channel works for binding
const BIND_CHANNEL: u8 = 0x0d;
const NUM_WAIT_LOOPS: u32 = 100 / 5;
const DSMX_CHANNELS: usize = 23;
pub const DEFAULT_CHANNELS: u8 = 7;

const CH1_CH2_DELAY_US: u32 = 4010;
const WRITE_DELAY_US: u32 = 1550;
const READ_DELAY_US: u32 = 400;
const INITIAL_WAIT_US: u32 = 10000;

/// Stick travel (out of ±500) that ends the bind dialog
const STICK_MOVED_THRESHOLD: i16 = 50;

const DSMX_BANDS: [Band; 3] = [
    Band { last: 27, cap: 8 },
    Band { last: 51, cap: 7 },
    Band { last: 255, cap: 8 },
];

const DSMX_HOP_TABLE: HopTableSpec<'static> = HopTableSpec {
    count: DSMX_CHANNELS,
    modulus: 0x49,
    offset: 3,
    bands: &DSMX_BANDS,
};

/// PN codes, row by column, in transmit order (LSB first).
const PN_CODES: [[[u8; 8]; 9]; 5] = [
    [
        [0x03, 0xBC, 0x6E, 0x8A, 0xEF, 0xBD, 0xFE, 0xF8],
        [0x88, 0x17, 0x13, 0x3B, 0x2D, 0xBF, 0x06, 0xD6],
        [0xF1, 0x94, 0x30, 0x21, 0xA1, 0x1C, 0x88, 0xA9],
        [0xD0, 0xD2, 0x8E, 0xBC, 0x82, 0x2F, 0xE3, 0xB4],
        [0x8C, 0xFA, 0x47, 0x9B, 0x83, 0xA5, 0x66, 0xD0],
        [0x07, 0xBD, 0x9F, 0x26, 0xC8, 0x31, 0x0F, 0xB8],
        [0xEF, 0x03, 0x95, 0x89, 0xB4, 0x71, 0x61, 0x9D],
        [0x40, 0xBA, 0x97, 0xD5, 0x86, 0x4F, 0xCC, 0xD1],
        [0xD7, 0xA1, 0x54, 0xB1, 0x5E, 0x89, 0xAE, 0x86],
    ],
    [
        [0x83, 0xF7, 0xA8, 0x2D, 0x7A, 0x44, 0x64, 0xD3],
        [0x3F, 0x2C, 0x4E, 0xAA, 0x71, 0x48, 0x7A, 0xC9],
        [0x17, 0xFF, 0x9E, 0x21, 0x36, 0x90, 0xC7, 0x82],
        [0xBC, 0x5D, 0x9A, 0x5B, 0xEE, 0x7F, 0x42, 0xEB],
        [0x24, 0xF5, 0xDD, 0xF8, 0x7A, 0x77, 0x74, 0xE7],
        [0x3D, 0x70, 0x7C, 0x94, 0xDC, 0x84, 0xAD, 0x95],
        [0x1E, 0x6A, 0xF0, 0x37, 0x52, 0x7B, 0x11, 0xD4],
        [0x62, 0xF5, 0x2B, 0xAA, 0xFC, 0x33, 0xBF, 0xAF],
        [0x40, 0x56, 0x32, 0xD9, 0x0F, 0xD9, 0x5D, 0x97],
    ],
    [
        [0x40, 0x56, 0x32, 0xD9, 0x0F, 0xD9, 0x5D, 0x97],
        [0x8E, 0x4A, 0xD0, 0xA9, 0xA7, 0xFF, 0x20, 0xCA],
        [0x4C, 0x97, 0x9D, 0xBF, 0xB8, 0x3D, 0xB5, 0xBE],
        [0x0C, 0x5D, 0x24, 0x30, 0x9F, 0xCA, 0x6D, 0xBD],
        [0x50, 0x14, 0x33, 0xDE, 0xF1, 0x78, 0x95, 0xAD],
        [0x0C, 0x3C, 0xFA, 0xF9, 0xF0, 0xF2, 0x10, 0xC9],
        [0xF4, 0xDA, 0x06, 0xDB, 0xBF, 0x4E, 0x6F, 0xB3],
        [0x9E, 0x08, 0xD1, 0xAE, 0x59, 0x5E, 0xE8, 0xF0],
        [0xC0, 0x90, 0x8F, 0xBB, 0x7C, 0x8E, 0x2B, 0x8E],
    ],
    [
        [0xC0, 0x90, 0x8F, 0xBB, 0x7C, 0x8E, 0x2B, 0x8E],
        [0x80, 0x69, 0x26, 0x80, 0x08, 0xF8, 0x49, 0xE7],
        [0x7D, 0x2D, 0x49, 0x54, 0xD0, 0x80, 0x40, 0xC1],
        [0xB6, 0xF2, 0xE6, 0x1B, 0x80, 0x5A, 0x36, 0xB4],
        [0x42, 0xAE, 0x9C, 0x1C, 0xDA, 0x67, 0x05, 0xF6],
        [0x9B, 0x75, 0xF7, 0xE0, 0x14, 0x8D, 0xB5, 0x80],
        [0xBF, 0x54, 0x98, 0xB9, 0xB7, 0x30, 0x5A, 0x88],
        [0x35, 0xD1, 0xFC, 0x97, 0x23, 0xD4, 0xC9, 0x88],
        [0x88, 0xE1, 0xD6, 0x31, 0x26, 0x5F, 0xBD, 0x40],
    ],
    [
        [0xE1, 0xD6, 0x31, 0x26, 0x5F, 0xBD, 0x40, 0x93],
        [0xDC, 0x68, 0x08, 0x99, 0x97, 0xAE, 0xAF, 0x8C],
        [0xC3, 0x0E, 0x01, 0x16, 0x0E, 0x32, 0x06, 0xBA],
        [0xE0, 0x83, 0x01, 0xFA, 0xAB, 0x3E, 0x8F, 0xAC],
        [0x5C, 0xD5, 0x9C, 0xB8, 0x46, 0x9C, 0x7D, 0x84],
        [0xF1, 0xC6, 0xFE, 0x5C, 0x9D, 0xA5, 0x4F, 0xB7],
        [0x58, 0xB5, 0xB3, 0xDD, 0x0E, 0x28, 0xF1, 0xB0],
        [0x5F, 0x30, 0x3B, 0x56, 0x96, 0x45, 0xF4, 0xA1],
        [0x03, 0xBC, 0x6E, 0x8A, 0xEF, 0xBD, 0xFE, 0xF8],
    ],
];

const PN_BIND: [u8; 8] = [0xc6, 0x94, 0x22, 0xfe, 0x48, 0xe6, 0x57, 0x4e];

const UNUSED: u8 = 0xff;

/// Packet slot to channel index, per channel count (4..=12). Indices 0-3
/// are T A E R, the rest map straight to aux channels.
const CHANNEL_MAPS: [[u8; 14]; 9] = [
    [0, 1, 2, 3, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED],
    [0, 1, 2, 3, 4, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED],
    [1, 5, 2, 3, 0, 4, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED],
    [1, 5, 2, 4, 3, 6, 0, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED],
    [1, 5, 2, 3, 6, UNUSED, UNUSED, 4, 0, 7, UNUSED, UNUSED, UNUSED, UNUSED],
    [3, 2, 1, 5, 0, 4, 6, 7, 8, UNUSED, UNUSED, UNUSED, UNUSED, UNUSED],
    [3, 2, 1, 5, 0, 4, 6, 7, 8, 9, UNUSED, UNUSED, UNUSED, UNUSED],
    [3, 2, 1, 5, 0, 4, 6, 7, 8, 9, 10, UNUSED, UNUSED, UNUSED],
    [3, 2, 1, 5, 0, 4, 6, 7, 8, 9, 10, 11, UNUSED, UNUSED],
];

const PRIMARY_CONTROLS: [usize; 4] = [
    channels::THROTTLE,
    channels::AILERON,
    channels::ELEVATOR,
    channels::RUDDER,
];

const CONFIG_REGS: [(u8, u8); 24] = [
    (reg::TX_CTRL, 0x02),
    (reg::RX_CTRL, 0x00),
    (reg::CLK_EN, 0x02),
    (reg::AUTO_CAL_TIME, 0x3c),
    (reg::AUTOCAL_OFFSET, 0x14),
    (reg::RX_CFG, 0x4A),
    (reg::TX_OFFSET_LSB, 0x55),
    (reg::TX_OFFSET_MSB, 0x05),
    (reg::XACT_CFG, 0x24),
    (reg::TX_CFG, 0x38),
    (reg::DATA64_THOLD, 0x0a),
    (reg::XACT_CFG, 0x04),
    (reg::ANALOG_CTRL, 0x01),
    // force idle
    (reg::XACT_CFG, 0x24),
    (reg::RX_ABORT, 0x00),
    // PN correlation threshold
    (reg::DATA64_THOLD, 0x0a),
    // SOP length and threshold
    (reg::FRAMING_CFG, 0x4a),
    (reg::RX_ABORT, 0x0f),
    // 64 chip, SDR mode
    (reg::TX_CFG, 0x38),
    (reg::FRAMING_CFG, 0x4a),
    // TX and RX CRC off, EOP sync 2, 16 byte packets
    (reg::TX_OVERRIDE, 0x04),
    (reg::RX_OVERRIDE, 0x14),
    (reg::EOP_CTRL, 0x02),
    (reg::TX_LENGTH, 0x10),
];

const DATA_REGS: [(u8, u8); 15] = [
    // RSSI read setup
    (reg::RX_CTRL, 0x83),
    (reg::RX_ABORT, 0x20),
    (reg::XACT_CFG, 0x24),
    (reg::RX_ABORT, 0x00),
    (reg::TX_CFG, 0x08),
    (reg::FRAMING_CFG, 0xea),
    (reg::TX_OVERRIDE, 0x00),
    (reg::RX_OVERRIDE, 0x00),
    (reg::TX_CFG, 0x28),
    (reg::DATA64_THOLD, 0x3f),
    (reg::FRAMING_CFG, 0xff),
    // switch to writing
    (reg::XACT_CFG, 0x24),
    (reg::RX_ABORT, 0x00),
    (reg::DATA64_THOLD, 0x0a),
    (reg::FRAMING_CFG, 0xea),
];

/// Lower (A) or upper (B) half of the channel set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    A,
    B,
}

impl Half {
    fn other(self) -> Self {
        match self {
            Half::A => Half::B,
            Half::B => Half::A,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsmState {
    /// Bind step counter, 0..BIND_COUNT
    Bind(u16),
    ChannelSelect,
    Ch1Write(Half),
    Ch1Check(Half),
    Ch2Write(Half),
    Ch2Check(Half),
    Ch2Read(Half),
}

impl DsmState {
    pub fn code(self) -> u8 {
        let phase = |half: Half, n: u8| 2 + n + if half == Half::B { 5 } else { 0 };
        match self {
            DsmState::Bind(_) => 0,
            DsmState::ChannelSelect => 1,
            DsmState::Ch1Write(h) => phase(h, 0),
            DsmState::Ch1Check(h) => phase(h, 1),
            DsmState::Ch2Write(h) => phase(h, 2),
            DsmState::Ch2Check(h) => phase(h, 3),
            DsmState::Ch2Read(h) => phase(h, 4),
        }
    }
}

#[derive(Debug)]
pub struct Dsm<B> {
    dev: Cyrf6936<B>,
    session: Session,
    state: DsmState,
    mfg_id: [u8; 6],
    channels: Vec<u8>,
    chan_idx: usize,
    crc: u16,
    sop_col: usize,
    data_col: usize,
    num_channels: u8,
    binding: bool,
    stick_origin: [i16; 4],
    packet: [u8; PACKET_SIZE],
    rx_buf: [u8; PACKET_SIZE],
    packets_sent: u32,
    telemetry: Telemetry,
}

impl<B: RadioBus> Dsm<B> {
    pub fn new(dev: Cyrf6936<B>, session: Session) -> Self {
        Self {
            dev,
            session,
            state: DsmState::Bind(0),
            mfg_id: [0; 6],
            channels: Vec::new(),
            chan_idx: 0,
            crc: 0,
            sop_col: 0,
            data_col: 0,
            num_channels: DEFAULT_CHANNELS,
            binding: false,
            stick_origin: [0; 4],
            packet: [0; PACKET_SIZE],
            rx_buf: [0; PACKET_SIZE],
            packets_sent: 0,
            telemetry: Telemetry::new(),
        }
    }

    /// Channel count carried in the bind packet, clamped to 6..=12.
    #[cfg(test)]
    fn with_channels(mut self, count: u8) -> Self {
        self.num_channels = count.clamp(6, 12);
        self
    }

    pub fn state(&self) -> DsmState {
        self.state
    }

    pub fn hop_channels(&self) -> &[u8] {
        &self.channels
    }

    pub fn is_binding(&self) -> bool {
        self.binding
    }

    fn is_dsmx(&self) -> bool {
        self.session.option() & OPT_DSMX != 0
    }

    fn telemetry_enabled(&self) -> bool {
        self.session.option() & OPT_TELEMETRY != 0
    }

    fn pn_row(&self, channel: u8) -> usize {
        if self.is_dsmx() {
            usize::from(channel.wrapping_sub(2) % 5)
        } else {
            usize::from(channel % 5)
        }
    }

    /// Sixteen bytes of data code: the data column and the one after it.
    fn data_code(row: usize, col: usize) -> [u8; 16] {
        let mut code = [0u8; 16];
        code[..8].copy_from_slice(&PN_CODES[row][col]);
        code[8..].copy_from_slice(&PN_CODES[row][col + 1]);
        code
    }

    fn stick_moved(&self) -> bool {
        PRIMARY_CONTROLS
            .iter()
            .zip(self.stick_origin)
            .any(|(&ch, origin)| (self.session.control(ch) - origin).abs() > STICK_MOVED_THRESHOLD)
    }

    fn build_bind_packet(&mut self) {
        let mut sum: u16 = 384 - 0x10;
        for i in 0..4 {
            self.packet[i] = 0xff ^ self.mfg_id[i];
            self.packet[i + 4] = self.packet[i];
        }
        sum = self.packet[..8]
            .iter()
            .fold(sum, |acc, &b| acc.wrapping_add(u16::from(b)));
        self.packet[8..10].copy_from_slice(&sum.to_be_bytes());
        self.packet[10] = 0x01;
        self.packet[11] = self.num_channels;
        self.packet[12] = match (self.is_dsmx(), self.num_channels < 8) {
            (true, true) => 0xa2,
            (true, false) => 0xb2,
            (false, true) => 0x01,
            (false, false) => 0x02,
        };
        self.packet[13] = 0x00;
        sum = self.packet[8..14]
            .iter()
            .fold(sum, |acc, &b| acc.wrapping_add(u16::from(b)));
        self.packet[14..16].copy_from_slice(&sum.to_be_bytes());
    }

    fn build_data_packet(&mut self, half: Half) {
        if self.binding && self.stick_moved() {
            info!("DSM bind finished: sticks moved");
            self.binding = false;
        }

        let bits = if self.is_dsmx() {
            self.packet[0] = self.mfg_id[2];
            self.packet[1] = self.mfg_id[3];
            11
        } else {
            self.packet[0] = 0xff ^ self.mfg_id[2];
            self.packet[1] = 0xff ^ self.mfg_id[3];
            10
        };
        let max: i32 = 1 << bits;
        let map = &CHANNEL_MAPS[usize::from(self.num_channels - 4)];
        let upper = half == Half::B;

        for i in 0..7 {
            let idx = map[if upper { 7 + i } else { i }];
            let value: u16 = if idx == UNUSED {
                0xffff
            } else {
                let raw = if self.binding {
                    if idx == 0 {
                        1
                    } else {
                        max >> 1
                    }
                } else {
                    let ch = PRIMARY_CONTROLS
                        .get(usize::from(idx))
                        .copied()
                        .unwrap_or(usize::from(idx));
                    map_range(
                        i32::from(self.session.control(ch)),
                        i32::from(CHAN_MIN_VALUE),
                        i32::from(CHAN_MAX_VALUE),
                        0,
                        max - 1,
                    )
                };
                let flag = if upper && i == 0 { 0x8000 } else { 0 };
                raw as u16 | flag | (u16::from(idx) << bits)
            };
            self.packet[i * 2 + 2..i * 2 + 4].copy_from_slice(&value.to_be_bytes());
        }
    }

    fn configure(&mut self) {
        let power = self.session.power_level().bits();
        for (addr, value) in CONFIG_REGS {
            let value = if addr == reg::TX_CFG { value | power } else { value };
            self.dev.write_reg(addr, value);
        }
        self.dev.write_preamble(0x0033_3304);
        self.dev.set_channel(0x61);
    }

    fn configure_data(&mut self) {
        let power = self.session.power_level().bits();
        for (addr, value) in DATA_REGS {
            let value = if addr == reg::TX_CFG { value | power } else { value };
            self.dev.write_reg(addr, value);
        }
    }

    fn enter_bind(&mut self) {
        self.dev.set_channel(BIND_CHANNEL);
        let row = self.pn_row(BIND_CHANNEL);
        self.dev.set_crc_seed(self.crc);
        self.dev.set_sop_code(&PN_CODES[row][self.sop_col]);

        let mut code = [0u8; 32];
        code[..16].copy_from_slice(&Self::data_code(row, self.data_col));
        code[16..24].copy_from_slice(&PN_CODES[0][8]);
        code[24..].copy_from_slice(&PN_BIND);
        self.dev.set_data_code(&code);
        self.build_bind_packet();
    }

    /// Tunes to the next hop channel with its PN codes and flips the CRC seed.
    fn set_sop_data_crc(&mut self) {
        let channel = self.channels[self.chan_idx];
        let row = self.pn_row(channel);
        self.dev.set_channel(channel);
        self.dev.set_crc_seed(self.crc);
        self.crc = !self.crc;
        self.dev.set_sop_code(&PN_CODES[row][self.sop_col]);
        self.dev.set_data_code(&Self::data_code(row, self.data_col));
        self.chan_idx = (self.chan_idx + 1) % self.channels.len();
    }

    fn dsm2_channels(&self) -> Vec<u8> {
        let m: [u32; 6] = self.mfg_id.map(u32::from);
        vec![
            ((m[0] + m[2] + m[4]) % 39 + 1) as u8,
            ((m[1] + m[3] + m[5]) % 40 + 40) as u8,
        ]
    }

    fn dsmx_channels(&self) -> Vec<u8> {
        let m = self.mfg_id;
        let seed = !u32::from_be_bytes([m[0], m[1], m[2], m[3]]);
        DSMX_HOP_TABLE.generate(seed)
    }

    fn wait_tx(&mut self) {
        let done = bounded_poll(NUM_WAIT_LOOPS, || {
            self.dev.read_reg(reg::TX_IRQ_STATUS) & 0x02 != 0
        });
        if !done {
            warn!("DSM TX IRQ not raised");
        }
    }

    fn read_telemetry(&mut self) {
        let mut status = self.dev.read_reg(reg::RX_IRQ_STATUS);
        // RXC without RXE needs a second look
        if status & 0x03 == 0x02 {
            status |= self.dev.read_reg(reg::RX_IRQ_STATUS);
        }
        if status & 0x07 != 0x02 {
            return;
        }
        // RXOW before reading the buffer
        self.dev.write_reg(reg::RX_IRQ_STATUS, 0x80);
        let len = usize::from(self.dev.read_reg(reg::RX_COUNT)).min(PACKET_SIZE);
        let mut buf = [0u8; PACKET_SIZE];
        self.dev.read_payload(&mut buf[..len]);
        self.rx_buf = buf;
        let frame = self.telemetry.apply_raw(&self.rx_buf[..len]);
        debug!("DSM telemetry {:?}: {} bytes", frame, len);
    }

    fn rearm_receiver(&mut self) {
        let xact = self.dev.read_reg(reg::XACT_CFG);
        self.dev.write_reg(reg::XACT_CFG, xact | 0x20);
        if !bounded_poll(NUM_WAIT_LOOPS, || {
            self.dev.read_reg(reg::XACT_CFG) & 0x20 == 0
        }) {
            debug!("DSM receiver did not leave its transaction");
        }
        self.dev.write_reg(reg::RX_CTRL, 0x80);
    }
}

impl<B: RadioBus> RfProtocol for Dsm<B> {
    fn init(&mut self) -> Result<u32> {
        self.chan_idx = 0;
        self.packets_sent = 0;
        self.stick_origin = PRIMARY_CONTROLS.map(|ch| self.session.control(ch));

        reset_chip(&mut self.dev)?;
        self.mfg_id = self.dev.read_mfg_id();

        self.configure();
        self.channels = if self.is_dsmx() {
            self.dsmx_channels()
        } else {
            self.dsm2_channels()
        };

        let m = self.mfg_id;
        self.crc = !((u16::from(m[0]) << 8).wrapping_add(u16::from(m[1])));
        self.sop_col = usize::from(m[0].wrapping_add(m[1]).wrapping_add(m[2]).wrapping_add(2) & 0x07);
        self.data_col = 7 - self.sop_col;

        self.dev.set_mode(RfMode::Transmit);
        self.state = DsmState::Bind(0);
        self.enter_bind();
        self.binding = true;

        info!(
            "DSM init: {} channels={:?} sop_col={} data_col={}",
            if self.is_dsmx() { "DSMX" } else { "DSM2" },
            self.channels,
            self.sop_col,
            self.data_col
        );
        Ok(INITIAL_WAIT_US)
    }

    fn step(&mut self) -> u32 {
        match self.state {
            DsmState::Bind(n) => {
                let n = n + 1;
                self.state = if n >= BIND_COUNT {
                    DsmState::ChannelSelect
                } else {
                    DsmState::Bind(n)
                };
                if n & 1 == 1 {
                    self.dev.write_payload(&self.packet);
                    self.packets_sent = self.packets_sent.wrapping_add(1);
                    8500
                } else {
                    self.wait_tx();
                    1500
                }
            }
            DsmState::ChannelSelect => {
                self.configure_data();
                self.dev.set_mode(RfMode::Transmit);
                self.chan_idx = 0;
                self.state = DsmState::Ch1Write(Half::A);
                self.set_sop_data_crc();
                10000
            }
            DsmState::Ch1Write(half) => {
                self.build_data_packet(half);
                self.dev.write_payload(&self.packet);
                self.packets_sent = self.packets_sent.wrapping_add(1);
                self.state = DsmState::Ch1Check(half);
                WRITE_DELAY_US
            }
            DsmState::Ch2Write(half) => {
                self.dev.write_payload(&self.packet);
                self.packets_sent = self.packets_sent.wrapping_add(1);
                self.state = DsmState::Ch2Check(half);
                WRITE_DELAY_US
            }
            DsmState::Ch1Check(half) => {
                self.wait_tx();
                self.set_sop_data_crc();
                self.state = DsmState::Ch2Write(half);
                CH1_CH2_DELAY_US - WRITE_DELAY_US
            }
            DsmState::Ch2Check(half) => {
                self.wait_tx();
                if half == Half::A {
                    self.session.power.take_update();
                    let power = self.session.power_level().bits();
                    self.dev.write_reg(reg::TX_CFG, 0x28 | power);
                }
                let frame_rest = 11000 - CH1_CH2_DELAY_US - WRITE_DELAY_US;
                if self.telemetry_enabled() {
                    self.state = DsmState::Ch2Read(half);
                    self.dev.set_mode(RfMode::Receive);
                    self.dev.write_reg(reg::RX_CTRL, 0x80);
                    return frame_rest - READ_DELAY_US;
                }
                self.set_sop_data_crc();
                if half == Half::A && self.num_channels < 8 {
                    self.state = DsmState::Ch1Write(Half::A);
                    return 22000 - CH1_CH2_DELAY_US - WRITE_DELAY_US;
                }
                self.state = DsmState::Ch1Write(half.other());
                frame_rest
            }
            DsmState::Ch2Read(half) => {
                self.read_telemetry();
                if half == Half::A && self.num_channels < 8 {
                    self.state = DsmState::Ch2Read(Half::B);
                    self.rearm_receiver();
                    return 11000;
                }
                self.state = DsmState::Ch1Write(half.other());
                self.dev.set_mode(RfMode::Transmit);
                self.set_sop_data_crc();
                READ_DELAY_US
            }
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
            DiagnosticId::Channel => Diagnostic::Byte(self.channels.first().copied().unwrap_or(0)),
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
