//! # Flysky (A7105)
//!
//! Fire-and-forget binding: 2500 bind packets on channel 1, then data
//! packets hopping through one row of a 16×16 channel table. The option
//! byte selects a WLToys receiver flavour that adds extra flag bytes.

use tracing::{debug, info};

use super::{reset_chip, Diagnostic, DiagnosticId, RfProtocol, Session};
use crate::bus::RadioBus;
use crate::codec::Scale;
use crate::device::a7105::{reg, strobe, MASK_VBCF};
use crate::device::{RfMode, Transceiver, TxLog, A7105};
use crate::error::{Result, RfError};

const PACKET_SIZE: usize = 21;
const MAX_BIND_COUNT: u16 = 2500;
const INITIAL_WAIT_US: u32 = 2400;
const PACKET_PERIOD_US: u32 = 1460;
const CHIP_ID: u32 = 0x5475_c52a;

/// Receiver flavours selected by the option byte.
pub mod variant {
    pub const PLAIN: u8 = 0x00;
    pub const WLTOYS_V9X9: u8 = 0x01;
    pub const WLTOYS_V6X6: u8 = 0x02;
    pub const WLTOYS_V912: u8 = 0x03;
}

// V9x9 flags: byte 10 and byte 12
const V9X9_VIDEO: u8 = 0x40;
const V9X9_CAMERA: u8 = 0x80;
const V9X9_UNK: u8 = 0x10;
const V9X9_LED: u8 = 0x20;

// V6x6 flags: byte 13 and byte 14
const V6X6_HLESS1: u8 = 0x80;
const V6X6_VIDEO: u8 = 0x01;
const V6X6_YCAL: u8 = 0x02;
const V6X6_XCAL: u8 = 0x04;
const V6X6_RTH: u8 = 0x08;
const V6X6_CAMERA: u8 = 0x10;
const V6X6_HLESS2: u8 = 0x20;
const V6X6_LED: u8 = 0x40;
const V6X6_FLIP: u8 = 0x80;

// V912 flags: byte 14
const V912_TOPBTN: u8 = 0x40;
const V912_BTMBTN: u8 = 0x80;

const V912_SEQ: [u8; 10] = [0x14, 0x31, 0x40, 0x49, 0x49, 0x49, 0x49, 0x49, 0x49, 0x49];

/// `-100%` ≈ 0x03e8, `+100%` ≈ 0x07ca; only the lower bound is clamped.
const SCALE: Scale = Scale::new(0x1f1, 0x5d9, 0, i32::MAX);

/// Register image written at init; `None` entries are skipped.
const INIT_REGS: [Option<u8>; 0x33] = {
    const X: Option<u8> = None;
    const fn v(b: u8) -> Option<u8> {
        Some(b)
    }
    [
        X, v(0x42), v(0x00), v(0x14), v(0x00), X, X, v(0x00),
        v(0x00), v(0x00), v(0x00), v(0x01), v(0x21), v(0x05), v(0x00), v(0x50),
        v(0x9e), v(0x4b), v(0x00), v(0x02), v(0x16), v(0x2b), v(0x12), v(0x00),
        v(0x62), v(0x80), v(0x80), v(0x00), v(0x0a), v(0x32), v(0xc3), v(0x0f),
        v(0x13), v(0xc3), v(0x00), X, v(0x00), v(0x00), v(0x3b), v(0x00),
        v(0x17), v(0x47), v(0x80), v(0x03), v(0x01), v(0x45), v(0x18), v(0x00),
        v(0x01), v(0x0f), X,
    ]
};

const TX_CHANNELS: [[u8; 16]; 16] = [
    [0x0a, 0x5a, 0x14, 0x64, 0x1e, 0x6e, 0x28, 0x78, 0x32, 0x82, 0x3c, 0x8c, 0x46, 0x96, 0x50, 0xa0],
    [0xa0, 0x50, 0x96, 0x46, 0x8c, 0x3c, 0x82, 0x32, 0x78, 0x28, 0x6e, 0x1e, 0x64, 0x14, 0x5a, 0x0a],
    [0x0a, 0x5a, 0x50, 0xa0, 0x14, 0x64, 0x46, 0x96, 0x1e, 0x6e, 0x3c, 0x8c, 0x28, 0x78, 0x32, 0x82],
    [0x82, 0x32, 0x78, 0x28, 0x8c, 0x3c, 0x6e, 0x1e, 0x96, 0x46, 0x64, 0x14, 0xa0, 0x50, 0x5a, 0x0a],
    [0x28, 0x78, 0x0a, 0x5a, 0x50, 0xa0, 0x14, 0x64, 0x1e, 0x6e, 0x3c, 0x8c, 0x32, 0x82, 0x46, 0x96],
    [0x96, 0x46, 0x82, 0x32, 0x8c, 0x3c, 0x6e, 0x1e, 0x64, 0x14, 0xa0, 0x50, 0x5a, 0x0a, 0x78, 0x28],
    [0x50, 0xa0, 0x28, 0x78, 0x0a, 0x5a, 0x1e, 0x6e, 0x3c, 0x8c, 0x32, 0x82, 0x46, 0x96, 0x14, 0x64],
    [0x64, 0x14, 0x96, 0x46, 0x82, 0x32, 0x8c, 0x3c, 0x6e, 0x1e, 0x5a, 0x0a, 0x78, 0x28, 0xa0, 0x50],
    [0x50, 0xa0, 0x46, 0x96, 0x3c, 0x8c, 0x28, 0x78, 0x0a, 0x5a, 0x32, 0x82, 0x1e, 0x6e, 0x14, 0x64],
    [0x64, 0x14, 0x6e, 0x1e, 0x82, 0x32, 0x5a, 0x0a, 0x78, 0x28, 0x8c, 0x3c, 0x96, 0x46, 0xa0, 0x50],
    [0x46, 0x96, 0x3c, 0x8c, 0x50, 0xa0, 0x28, 0x78, 0x0a, 0x5a, 0x1e, 0x6e, 0x32, 0x82, 0x14, 0x64],
    [0x64, 0x14, 0x82, 0x32, 0x6e, 0x1e, 0x5a, 0x0a, 0x78, 0x28, 0xa0, 0x50, 0x8c, 0x3c, 0x96, 0x46],
    [0x46, 0x96, 0x0a, 0x5a, 0x3c, 0x8c, 0x14, 0x64, 0x50, 0xa0, 0x28, 0x78, 0x1e, 0x6e, 0x32, 0x82],
    [0x82, 0x32, 0x6e, 0x1e, 0x78, 0x28, 0xa0, 0x50, 0x64, 0x14, 0x8c, 0x3c, 0x5a, 0x0a, 0x96, 0x46],
    [0x46, 0x96, 0x0a, 0x5a, 0x50, 0xa0, 0x3c, 0x8c, 0x28, 0x78, 0x1e, 0x6e, 0x32, 0x82, 0x14, 0x64],
    [0x64, 0x14, 0x82, 0x32, 0x6e, 0x1e, 0x78, 0x28, 0x8c, 0x3c, 0xa0, 0x50, 0x5a, 0x0a, 0x96, 0x46],
];

#[derive(Debug)]
pub struct Flysky<B> {
    dev: A7105<B>,
    session: Session,
    tx_id: u32,
    packet: [u8; PACKET_SIZE],
    packet_ctr: u32,
    bind_ctr: u16,
    chan_row: usize,
    chan_col: usize,
    chan_offset: u8,
    cur_chan: u8,
    v912_seq: u8,
}

impl<B: RadioBus> Flysky<B> {
    pub fn new(dev: A7105<B>, session: Session) -> Self {
        Self {
            dev,
            session,
            tx_id: 0,
            packet: [0; PACKET_SIZE],
            packet_ctr: 0,
            bind_ctr: 0,
            chan_row: 0,
            chan_col: 0,
            chan_offset: 0,
            cur_chan: 0,
            v912_seq: 0,
        }
    }

    pub fn is_binding(&self) -> bool {
        self.bind_ctr > 0
    }

    fn configure(&mut self) -> Result<()> {
        self.dev.write_id(CHIP_ID);
        for (addr, value) in INIT_REGS.iter().enumerate() {
            if let Some(value) = *value {
                self.dev.write_reg(addr as u8, value);
            }
        }
        self.dev.strobe(strobe::STANDBY);

        self.dev.calibrate_if()?;
        // current and bank limits recommended by the datasheet
        self.dev.write_reg(reg::VCO_CURCAL, 0x13);
        self.dev.write_reg(reg::VCO_SBCAL_II, 0x3b);
        let vco0 = self.dev.calibrate_vco(0x00)?;
        if vco0 & MASK_VBCF != 0 {
            return Err(RfError::Calibration(format!(
                "VCO bank flagged failure on channel 0 (0x{:02X})",
                vco0
            )));
        }
        let vco1 = self.dev.calibrate_vco(0xa0)?;
        if vco1 & MASK_VBCF != 0 {
            debug!("Flysky VCO calibration on 0xa0 flagged 0x{:02X}, continuing", vco1);
        }

        self.dev.write_reg(reg::VCO_SBCAL_I, 0x08);
        self.dev.set_mode(RfMode::Transmit);
        self.dev.set_power(self.session.power_level());
        self.dev.strobe(strobe::STANDBY);
        Ok(())
    }

    fn build_packet(&mut self, bind: bool) {
        self.packet = [0; PACKET_SIZE];
        self.packet[0] = if bind { 0xaa } else { 0x55 };
        self.packet[1..5].copy_from_slice(&self.tx_id.to_le_bytes());
        for slot in 0..8 {
            let value = SCALE.encode(self.session.control_by_order(slot)) as u16;
            self.packet[5 + slot * 2..7 + slot * 2].copy_from_slice(&value.to_le_bytes());
        }
        self.apply_ext_flags();
    }

    fn aux_on(&self, slot: usize) -> bool {
        self.session.control_by_order(slot) > 0
    }

    fn apply_ext_flags(&mut self) {
        match self.session.option() & 0x03 {
            variant::WLTOYS_V9X9 => {
                if self.aux_on(4) {
                    self.packet[12] |= V9X9_LED;
                }
                if self.aux_on(5) {
                    self.packet[10] |= V9X9_VIDEO;
                }
                if self.aux_on(6) {
                    self.packet[10] |= V9X9_CAMERA;
                }
                if self.aux_on(7) {
                    self.packet[12] |= V9X9_UNK;
                }
            }
            variant::WLTOYS_V6X6 => {
                let flags14 = [
                    (4, V6X6_LED),
                    (5, V6X6_FLIP),
                    (6, V6X6_CAMERA),
                    (7, V6X6_VIDEO),
                    (8, V6X6_HLESS1),
                    (9, V6X6_RTH),
                    (10, V6X6_XCAL),
                    (11, V6X6_YCAL),
                ];
                self.packet[13] = 0x00;
                self.packet[14] = 0x00;
                for (slot, flag) in flags14 {
                    if self.aux_on(slot) {
                        self.packet[14] |= flag;
                    }
                }
                // headless is signalled in both bytes
                if self.aux_on(8) {
                    self.packet[13] |= V6X6_HLESS2;
                }
                self.packet[15..21].copy_from_slice(&[0x10, 0x10, 0xAA, 0xAA, 0x60, 0x02]);
            }
            variant::WLTOYS_V912 => {
                self.v912_seq = (self.v912_seq + 1) % 10;
                self.packet[12] |= 0x20;
                self.packet[13] = 0x00;
                self.packet[14] = 0x00;
                if self.aux_on(4) {
                    self.packet[14] |= V912_BTMBTN;
                }
                if self.aux_on(5) {
                    self.packet[14] |= V912_TOPBTN;
                }
                self.packet[15] = 0x27;
                self.packet[16] = 0x03;
                self.packet[17] = V912_SEQ[self.v912_seq as usize];
                self.packet[18] = if self.v912_seq == 0 { 0x02 } else { 0x00 };
                self.packet[19] = 0x00;
                self.packet[20] = 0x00;
            }
            _ => {}
        }
    }
}

impl<B: RadioBus> RfProtocol for Flysky<B> {
    fn init(&mut self) -> Result<u32> {
        reset_chip(&mut self.dev)?;
        self.configure()?;

        let mut tx_id = self.session.controller_id;
        // offsets above 9 break some receivers (V912)
        if (tx_id & 0xf0) > 0x90 {
            tx_id = tx_id.wrapping_sub(0x70);
        }
        self.tx_id = tx_id;
        self.chan_row = (tx_id % 16) as usize;
        self.chan_col = 0;
        self.chan_offset = ((tx_id & 0xff) / 16) as u8;
        self.bind_ctr = MAX_BIND_COUNT;
        self.packet_ctr = 0;
        self.v912_seq = 0;

        info!(
            "Flysky init: tx_id=0x{:08X} row={} offset={}",
            self.tx_id, self.chan_row, self.chan_offset
        );
        Ok(INITIAL_WAIT_US)
    }

    fn step(&mut self) -> u32 {
        if self.bind_ctr > 0 {
            self.build_packet(true);
            self.cur_chan = 1;
            self.dev.write_packet(&self.packet, self.cur_chan);
            self.bind_ctr -= 1;
            if self.bind_ctr == 0 {
                info!("Flysky bind complete");
            }
        } else {
            self.build_packet(false);
            self.cur_chan = TX_CHANNELS[self.chan_row][self.chan_col].wrapping_sub(self.chan_offset);
            self.dev.write_packet(&self.packet, self.cur_chan);
            self.chan_col = (self.chan_col + 1) % 16;
            if self.chan_col == 0 {
                if let Some(level) = self.session.power.take_update() {
                    self.dev.set_power(level);
                }
            }
            self.packet_ctr = self.packet_ctr.wrapping_add(1);
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
            DiagnosticId::State => Diagnostic::Byte(u8::from(self.is_binding())),
            DiagnosticId::Channel => Diagnostic::Byte(self.cur_chan),
            DiagnosticId::PacketCtr => Diagnostic::Word(self.packet_ctr),
            _ => Diagnostic::Empty,
        }
    }

    fn tx_log(&self) -> &TxLog {
        self.dev.tx_log()
    }
}
