//! # V2x2 (NRF24L01)
//!
//! WLToys V202/V222 family. The 3-byte TX id comes out of the LFSR; its
//! byte sum picks one of four base hop rows plus an increment. Every
//! channel carries two packets. Aux 1 sets the LED blink rate, aux 2-4
//! drive the flip, camera and video flags.

use tracing::{debug, info};

use super::{reset_chip, Diagnostic, DiagnosticId, RfProtocol, Session};
use crate::bus::RadioBus;
use crate::codec::{Checksum, Scale};
use crate::controls::{channels, CHAN_MAX_VALUE, CHAN_MIN_VALUE};
use crate::device::nrf24l01::{config, reg, status, Bitrate};
use crate::device::{Nrf24l01, RfMode, Transceiver, TxLog};
use crate::error::Result;
use crate::hopping::pump_lfsr;

const PACKET_SIZE: usize = 16;
const MAX_BIND_COUNT: u16 = 1000;
const PACKET_PERIOD_US: u32 = 4000;
const PACKET_CHECK_US: u32 = 100;
const INITIAL_WAIT_US: u32 = 50000;

const BLINK_COUNT: u16 = 250;
const BLINK_COUNT_MIN: u16 = 64;
const BLINK_COUNT_MAX: u16 = 512;

pub const OPT_SKIP_BIND: u8 = 0x01;

pub mod flag {
    /// Also the automatic missile launcher and hoist (one way)
    pub const CAMERA: u8 = 0x01;
    /// Also sprayer, bubbler and hoist (other way)
    pub const VIDEO: u8 = 0x02;
    pub const FLIP: u8 = 0x04;
    pub const LED: u8 = 0x10;
    pub const BIND: u8 = 0xC0;
}

/// `((ch * 255 / 500) + 256) >> 1` on clamped input.
const STICK: Scale = Scale::new(0xFF, 0x100, 0, 0x1FF);
const CHECKSUM: Checksum = Checksum::Additive { offset: 0 };

const RX_TX_ADDR: [u8; 5] = [0x66, 0x88, 0x68, 0x68, 0x68];
const RX_P1_ADDR: [u8; 5] = [0x88, 0x66, 0x86, 0x86, 0x86];

/// Registers 0x00..=0x17; `None` is skipped, RF_SETUP is written separately.
const INIT_REGS: [Option<u8>; 0x18] = [
    // 2-byte CRC, radio off
    Some(config::EN_CRC | config::CRCO),
    // no auto-ack
    Some(0x00),
    Some(0x3F),
    // 5-byte addresses
    Some(0x03),
    // 3.75 ms retransmit timeout, 14 tries
    Some(0xee),
    Some(0x08),
    None,
    // clear RX_DR, TX_DS and MAX_RT
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
    Some(PACKET_SIZE as u8),
    Some(PACKET_SIZE as u8),
    Some(PACKET_SIZE as u8),
    Some(PACKET_SIZE as u8),
    Some(PACKET_SIZE as u8),
    Some(PACKET_SIZE as u8),
    Some(0x00),
];

/// First four of the 32 hop patterns; the rest add an increment to these.
const HOP_ROWS: [[u8; 16]; 4] = [
    [0x27, 0x1B, 0x39, 0x28, 0x24, 0x22, 0x2E, 0x36, 0x19, 0x21, 0x29, 0x14, 0x1E, 0x12, 0x2D, 0x18],
    [0x2E, 0x33, 0x25, 0x38, 0x19, 0x12, 0x18, 0x16, 0x2A, 0x1C, 0x1F, 0x37, 0x2F, 0x23, 0x34, 0x10],
    [0x11, 0x1A, 0x35, 0x24, 0x28, 0x18, 0x25, 0x2A, 0x32, 0x2C, 0x14, 0x27, 0x36, 0x34, 0x1C, 0x17],
    [0x22, 0x27, 0x17, 0x39, 0x34, 0x28, 0x2B, 0x1D, 0x18, 0x2A, 0x21, 0x38, 0x10, 0x26, 0x20, 0x1F],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum V2x2State {
    /// Power up then bind
    Init2,
    /// Power up then go straight to data
    Init2NoBind,
    Bind,
    Data,
}

impl V2x2State {
    pub fn code(self) -> u8 {
        match self {
            V2x2State::Init2 => 0,
            V2x2State::Init2NoBind => 1,
            V2x2State::Bind => 3,
            V2x2State::Data => 0x10,
        }
    }
}

/// Derives the 3-byte TX id and the 16-entry hop table from a seed.
pub fn derive_tx_id(seed: u32) -> ([u8; 3], [u8; 16]) {
    let id = seed.to_be_bytes();
    let tx_id = [id[1], id[2], id[3]];
    let sum = tx_id.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));

    let row = &HOP_ROWS[usize::from(sum & 0x03)];
    let increment = (sum & 0x1e) >> 2;
    let hops = std::array::from_fn(|i| {
        let val = row[i] + increment;
        // channels divisible by 16 are avoided
        if val & 0x0f != 0 {
            val
        } else {
            val - 3
        }
    });
    (tx_id, hops)
}

#[derive(Debug)]
pub struct V2x2<B> {
    dev: Nrf24l01<B>,
    session: Session,
    state: V2x2State,
    tx_id: [u8; 3],
    hops: [u8; 16],
    cur_chan: u8,
    packet: [u8; PACKET_SIZE],
    packet_ctr: u32,
    packet_sent: bool,
    bind_ctr: u16,
    led_blink: u16,
    aux_flags: u8,
}

impl<B: RadioBus> V2x2<B> {
    pub fn new(dev: Nrf24l01<B>, session: Session) -> Self {
        Self {
            dev,
            session,
            state: V2x2State::Init2,
            tx_id: [0; 3],
            hops: [0; 16],
            cur_chan: 0,
            packet: [0; PACKET_SIZE],
            packet_ctr: 0,
            packet_sent: false,
            bind_ctr: 0,
            led_blink: BLINK_COUNT_MAX,
            aux_flags: 0,
        }
    }

    pub fn state(&self) -> V2x2State {
        self.state
    }

    pub fn tx_id(&self) -> [u8; 3] {
        self.tx_id
    }

    pub fn hop_table(&self) -> &[u8; 16] {
        &self.hops
    }

    fn stick(&self, ch: usize) -> u8 {
        (STICK.encode(self.session.control(ch)) >> 1) as u8
    }

    /// Below center the direction flips: 0x00..0x7f becomes 0x7f..0x00.
    fn folded_stick(&self, ch: usize) -> u8 {
        let a = self.stick(ch);
        if a < 0x80 {
            0x7f - a
        } else {
            a
        }
    }

    fn switch(&mut self, ch: usize, mask: u8) {
        if self.session.control(ch) <= 0 {
            self.aux_flags &= !mask;
        } else {
            self.aux_flags |= mask;
        }
    }

    fn update_controls(&mut self) {
        self.packet[0] = self.stick(channels::THROTTLE);
        self.packet[1] = self.folded_stick(channels::RUDDER);
        self.packet[2] = self.folded_stick(channels::ELEVATOR);
        self.packet[3] = self.folded_stick(channels::AILERON);

        // 512 blinks slowly (about 4 s), 64 fast (about 0.5 s)
        let aux1 = self.session.control(channels::AUX1);
        let blink = match aux1 {
            CHAN_MIN_VALUE => BLINK_COUNT_MAX + 1,
            CHAN_MAX_VALUE => BLINK_COUNT_MIN - 1,
            _ => {
                let mid = i32::from(BLINK_COUNT_MAX + BLINK_COUNT_MIN) / 2;
                let span = i32::from(BLINK_COUNT_MAX - BLINK_COUNT_MIN);
                (mid - i32::from(aux1) * span / (2 * i32::from(CHAN_MAX_VALUE))) as u16
            }
        };
        if self.led_blink != blink {
            self.bind_ctr = self.bind_ctr.min(blink);
            self.led_blink = blink;
        }

        self.switch(channels::AUX2, flag::FLIP);
        self.switch(channels::AUX3, flag::CAMERA);
        self.switch(channels::AUX4, flag::VIDEO);
    }

    fn send_packet(&mut self, bind: bool) {
        if bind {
            self.aux_flags = flag::BIND;
            self.packet[..7].fill(0);
        } else {
            self.update_controls();
            // trims, centred at 0x40
            self.packet[4..7].fill(0x40);
        }
        self.packet[7..10].copy_from_slice(&self.tx_id);
        self.packet[10..14].fill(0);
        self.packet[14] = self.aux_flags;
        CHECKSUM.apply(&mut self.packet);

        // two packets per channel
        let channel = self.hops[usize::from(self.cur_chan >> 1)];
        self.cur_chan = (self.cur_chan + 1) & 0x1F;
        self.packet_sent = false;
        self.dev.set_channel(channel);
        self.dev.flush_tx();
        self.dev.write_payload(&self.packet);
        self.packet_ctr = self.packet_ctr.wrapping_add(1);
        self.packet_sent = true;

        if let Some(level) = self.session.power.take_update() {
            self.dev.set_power(level);
        }
    }

    /// True while the last payload is neither sent nor timed out.
    fn awaiting_ack(&mut self) -> bool {
        if !self.packet_sent {
            return false;
        }
        let stat = self.dev.read_reg(reg::STATUS);
        stat & (status::TX_DS | status::MAX_RT) != status::TX_DS
    }

    fn power_up(&mut self) {
        self.dev.flush_tx();
        self.dev.set_mode(RfMode::Transmit);
        self.cur_chan = 0;
        self.packet_sent = false;
    }
}

impl<B: RadioBus> RfProtocol for V2x2<B> {
    fn init(&mut self) -> Result<u32> {
        self.packet_ctr = 0;
        self.aux_flags = 0;
        self.led_blink = BLINK_COUNT_MAX;

        reset_chip(&mut self.dev)?;
        for (addr, value) in INIT_REGS.iter().enumerate() {
            let addr = addr as u8;
            if addr == reg::RF_SETUP {
                self.dev.set_bitrate(Bitrate::Mbps1);
                self.dev.set_power(self.session.power_level());
            } else if let Some(value) = value {
                self.dev.write_reg(addr, *value);
            }
        }
        self.dev.write_burst(reg::RX_ADDR_P0, &RX_TX_ADDR);
        self.dev.write_burst(reg::RX_ADDR_P1, &RX_P1_ADDR);
        self.dev.write_burst(reg::TX_ADDR, &RX_TX_ADDR);

        if self.session.option() & OPT_SKIP_BIND != 0 {
            self.state = V2x2State::Init2NoBind;
            self.bind_ctr = BLINK_COUNT;
        } else {
            self.state = V2x2State::Init2;
            self.bind_ctr = MAX_BIND_COUNT;
        }

        let mut lfsr = self.session.controller_id;
        pump_lfsr(&mut lfsr, 4);
        (self.tx_id, self.hops) = derive_tx_id(lfsr);
        info!("V2x2 init: tx_id={:02X?} hops={:02X?}", self.tx_id, self.hops);
        Ok(INITIAL_WAIT_US)
    }

    fn step(&mut self) -> u32 {
        match self.state {
            V2x2State::Init2 => {
                self.power_up();
                self.state = V2x2State::Bind;
                return 1;
            }
            V2x2State::Init2NoBind => {
                self.power_up();
                self.state = V2x2State::Data;
                return 1;
            }
            V2x2State::Bind => {
                if self.awaiting_ack() {
                    return PACKET_CHECK_US;
                }
                self.send_packet(true);
                self.bind_ctr -= 1;
                if self.bind_ctr == 0 {
                    debug!("V2x2 bound after {} packets", self.packet_ctr);
                    self.state = V2x2State::Data;
                    self.bind_ctr = self.led_blink;
                    self.aux_flags = 0;
                }
            }
            V2x2State::Data => {
                if self.led_blink > BLINK_COUNT_MAX {
                    self.aux_flags |= flag::LED;
                } else if self.led_blink < BLINK_COUNT_MIN {
                    self.aux_flags &= !flag::LED;
                } else {
                    self.bind_ctr = self.bind_ctr.saturating_sub(1);
                    if self.bind_ctr == 0 {
                        self.bind_ctr = self.led_blink;
                        self.aux_flags ^= flag::LED;
                    }
                }
                if self.awaiting_ack() {
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
            DiagnosticId::Channel => Diagnostic::Byte(self.hops[usize::from(self.cur_chan >> 1)]),
            DiagnosticId::PacketCtr => Diagnostic::Word(self.packet_ctr),
            _ => Diagnostic::Empty,
        }
    }

    fn tx_log(&self) -> &TxLog {
        self.dev.tx_log()
    }
}
