//! # Hubsan (A7105)
//!
//! Handshake binding: the transmitter sends bind packets 1, 3, 5 and 7,
//! listening after each for the receiver's answer. A missing answer restarts
//! the handshake; after step 4 the chip ID switches to the session ID the
//! receiver echoed. Data packets go out every 10 ms, every fifth one on an
//! offset channel. With telemetry enabled (option bit 7) the remaining 7 ms
//! of each 10 ms frame are spent listening.

use tracing::{debug, info};

use super::{reset_chip, Diagnostic, DiagnosticId, RfProtocol, Session};
use crate::bus::{bounded_poll, RadioBus};
use crate::codec::{Checksum, Scale};
use crate::controls::channels;
use crate::device::a7105::{reg, strobe, MASK_VBCF};
use crate::device::{RfMode, Transceiver, TxLog, A7105};
use crate::error::{Result, RfError};
use crate::hopping::rand32_r;
use crate::telemetry::Telemetry;

const PACKET_SIZE: usize = 16;
const INITIAL_WAIT_US: u32 = 10_000;
const CHIP_ID: u32 = 0x5520_1041;
const TX_ID: u32 = 0xdb04_2679;

/// Option bit enabling the telemetry window.
pub const OPT_TELEMETRY: u8 = 0x80;

const FLAG_VIDEO: u8 = 0x01;
const FLAG_LED: u8 = 0x04;
const FLAG_FLIP: u8 = 0x08;

/// Packets sent with LED and flip forced on before the switches take over.
const DEFAULT_FLAG_PACKETS: u8 = 100;

/// Channel offset of every fifth data packet.
const DATA_5_OFFSET: u8 = 0x23;

const ALLOWED_CH: [u8; 12] = [
    0x14, 0x1e, 0x28, 0x32, 0x3c, 0x46, 0x50, 0x5a, 0x64, 0x6e, 0x78, 0x82,
];

const INIT_REGS: [(u8, u8); 11] = [
    (reg::MODE_CONTROL, 0x63),
    (reg::FIFO_I, 0x0f),
    (reg::CLOCK, 0x05),
    (reg::DATA_RATE, 0x04),
    (reg::TX_II, 0x2b),
    (reg::RX, 0x62),
    (reg::RX_GAIN_I, 0x80),
    (reg::RX_GAIN_IV, 0x0A),
    (reg::CODE_I, 0x07),
    (reg::CODE_II, 0x17),
    (reg::RX_DEM_TEST_I, 0x47),
];

/// Checksum is the two's complement of the byte sum.
const CHECKSUM: Checksum = Checksum::Additive { offset: 0 };

const STICK: Scale = Scale::new(0x80, 0x80, 0, 0xff);

/// Handshake and data phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubsanState {
    /// Bind step 1..=8; odd steps send and then wait for the write
    Bind { step: u8, waiting: bool },
    /// Data packet 1..=5
    Data(u8),
}

impl HubsanState {
    /// Matches the numbering receivers and logs use: BIND_1 = 0 ..
    /// DATA_5 = 12, with 0x80 set while waiting for a write.
    pub fn code(self) -> u8 {
        match self {
            HubsanState::Bind { step, waiting } => (step - 1) | if waiting { 0x80 } else { 0 },
            HubsanState::Data(n) => 7 + n,
        }
    }
}

#[derive(Debug)]
pub struct Hubsan<B> {
    dev: A7105<B>,
    session: Session,
    state: HubsanState,
    session_id: u32,
    packet: [u8; PACKET_SIZE],
    packet_ctr: u8,
    cur_chan: u8,
    vtx_freq: u16,
    tx_phase: u8,
    listening: bool,
    delay: u32,
    telemetry: Telemetry,
}

impl<B: RadioBus> Hubsan<B> {
    pub fn new(dev: A7105<B>, session: Session) -> Self {
        Self {
            dev,
            session,
            state: HubsanState::Bind { step: 1, waiting: false },
            session_id: 0,
            packet: [0; PACKET_SIZE],
            packet_ctr: 0,
            cur_chan: 0,
            vtx_freq: 0,
            tx_phase: 0,
            listening: false,
            delay: 0,
            telemetry: Telemetry::new(),
        }
    }

    pub fn state(&self) -> HubsanState {
        self.state
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// VTX frequency in MHz selected by option bits 0-6.
    pub fn vtx_frequency(&self) -> u16 {
        5645 + u16::from(self.session.option() & 0x7f) * 5
    }

    fn telemetry_enabled(&self) -> bool {
        self.session.option() & OPT_TELEMETRY != 0
    }

    fn configure(&mut self) -> Result<()> {
        self.dev.write_id(CHIP_ID);
        for (addr, value) in INIT_REGS {
            self.dev.write_reg(addr, value);
        }
        self.dev.strobe(strobe::STANDBY);

        self.dev.calibrate_if()?;
        let vco0 = self.dev.calibrate_vco(0x00)?;
        if vco0 & MASK_VBCF != 0 {
            return Err(RfError::Calibration(format!(
                "VCO bank flagged failure on channel 0 (0x{:02X})",
                vco0
            )));
        }
        let vco1 = self.dev.calibrate_vco(0xa0)?;
        if vco1 & MASK_VBCF != 0 {
            debug!("Hubsan VCO calibration on 0xa0 flagged 0x{:02X}, continuing", vco1);
        }

        self.dev.set_mode(RfMode::Transmit);
        self.dev.set_power(self.session.power_level());
        self.dev.strobe(strobe::STANDBY);
        Ok(())
    }

    fn build_bind_packet(&mut self, bind_state: u8) {
        self.packet[0] = bind_state;
        self.packet[1] = self.cur_chan;
        self.packet[2..6].copy_from_slice(&self.session_id.to_be_bytes());
        self.packet[6..11].copy_from_slice(&[0x08, 0xe4, 0xea, 0x9e, 0x50]);
        self.packet[11..15].copy_from_slice(&TX_ID.to_be_bytes());
        self.update_checksum();
    }

    fn update_checksum(&mut self) {
        let sum = CHECKSUM.compute(&self.packet);
        self.packet[PACKET_SIZE - 1] = sum.wrapping_neg();
    }

    fn checksum_ok(&self) -> bool {
        CHECKSUM.compute(&self.packet).wrapping_neg() == self.packet[PACKET_SIZE - 1]
    }

    fn stick(&self, ch: usize) -> u8 {
        STICK.encode(self.session.control(ch)) as u8
    }

    fn build_data_packet(&mut self) {
        self.packet = [0; PACKET_SIZE];

        let vtx = self.vtx_frequency();
        if self.vtx_freq != vtx || self.packet_ctr == DEFAULT_FLAG_PACKETS {
            self.vtx_freq = vtx;
            self.packet[0] = 0x40;
            self.packet[1..3].copy_from_slice(&vtx.to_be_bytes());
            self.packet[3] = 0x82;
            self.packet_ctr = self.packet_ctr.wrapping_add(1);
        } else {
            self.packet[0] = 0x20;
            self.packet[2] = self.stick(channels::THROTTLE);
        }
        // rudder and elevator are reversed
        self.packet[4] = 0xff - self.stick(channels::RUDDER);
        self.packet[6] = 0xff - self.stick(channels::ELEVATOR);
        self.packet[8] = self.stick(channels::AILERON);

        if self.packet_ctr < DEFAULT_FLAG_PACKETS {
            self.packet[9] = 0x02 | FLAG_LED | FLAG_FLIP;
            self.packet_ctr += 1;
        } else {
            self.packet[9] = 0x02;
            if self.session.control(channels::AUX1) >= 0 {
                self.packet[9] |= FLAG_LED;
            }
            if self.session.control(channels::AUX2) >= 0 {
                self.packet[9] |= FLAG_FLIP;
            }
            if self.session.control(channels::AUX3) > 0 {
                self.packet[9] |= FLAG_VIDEO;
            }
        }
        self.packet[10] = 0x64;
        self.packet[11..15].copy_from_slice(&TX_ID.to_be_bytes());
        self.update_checksum();
    }

    /// `MODE` bit 0 stays set while a TX or RX is still in progress.
    fn busy(&mut self) -> bool {
        self.dev.read_reg(reg::MODE) & 0x01 != 0
    }

    fn bind_send(&mut self, step: u8) -> u32 {
        let bind_state = match step {
            7 => 9,
            5 => 1,
            n => n,
        };
        self.build_bind_packet(bind_state);
        self.dev.strobe(strobe::STANDBY);
        self.dev.write_packet(&self.packet, self.cur_chan);
        self.state = HubsanState::Bind { step, waiting: true };
        3000
    }

    fn bind_wait_write(&mut self, step: u8) -> u32 {
        if !bounded_poll(20, || !self.busy()) {
            debug!("Hubsan bind write did not complete");
        }
        self.dev.set_mode(RfMode::Receive);
        self.dev.strobe(strobe::RX);
        self.state = HubsanState::Bind { step: step + 1, waiting: false };
        4500
    }

    fn bind_listen(&mut self, step: u8) -> u32 {
        self.dev.set_mode(RfMode::Transmit);
        if self.busy() {
            debug!("Hubsan bind step {} got no answer, restarting", step);
            self.state = HubsanState::Bind { step: 1, waiting: false };
            return 4500;
        }

        self.dev.read_packet(&mut self.packet);
        let next = step + 1;
        self.state = HubsanState::Bind { step: next, waiting: false };
        if next == 5 {
            let id = u32::from_be_bytes([self.packet[2], self.packet[3], self.packet[4], self.packet[5]]);
            debug!("Hubsan receiver session id 0x{:08X}", id);
            self.dev.write_id(id);
        }
        500
    }

    fn bind_confirm(&mut self) -> u32 {
        self.dev.set_mode(RfMode::Transmit);
        if self.busy() {
            self.state = HubsanState::Bind { step: 7, waiting: false };
            return 15_000;
        }
        self.dev.read_packet(&mut self.packet);
        if self.packet[1] == 9 {
            info!("Hubsan bound on channel 0x{:02X}", self.cur_chan);
            self.state = HubsanState::Data(1);
            self.dev.write_reg(reg::CODE_I, 0x0F);
            28_000
        } else {
            self.state = HubsanState::Bind { step: 7, waiting: false };
            15_000
        }
    }

    fn data_step(&mut self, n: u8) -> u32 {
        if self.tx_phase == 0 {
            self.listening = false;
            if n == 1 {
                if let Some(level) = self.session.power.take_update() {
                    self.dev.set_power(level);
                }
            }
            self.build_data_packet();
            self.dev.strobe(strobe::STANDBY);
            let channel = if n == 5 {
                self.cur_chan.wrapping_add(DATA_5_OFFSET)
            } else {
                self.cur_chan
            };
            self.dev.write_packet(&self.packet, channel);
            self.state = HubsanState::Data(if n == 5 { 1 } else { n + 1 });
            self.delay = 3000;
        } else {
            if self.telemetry_enabled() {
                self.telemetry_window();
            }
            self.delay = 1000;
        }

        // 3 ms + 7 × 1 ms = 10 ms frame
        self.tx_phase += 1;
        if self.tx_phase == 8 {
            self.dev.set_mode(RfMode::Transmit);
            self.tx_phase = 0;
        }
        self.delay
    }

    fn telemetry_window(&mut self) {
        if !self.listening && bounded_poll(10, || !self.busy()) {
            self.dev.set_mode(RfMode::Receive);
            self.dev.strobe(strobe::RX);
            self.listening = true;
        }
        if self.listening && bounded_poll(10, || !self.busy()) {
            self.dev.read_packet(&mut self.packet);
            if self.checksum_ok() {
                if let Some(frame) = self.telemetry.apply_hubsan(&self.packet) {
                    debug!("Hubsan telemetry {:?}: {:?}", frame, self.telemetry.volt[0]);
                }
            }
            self.dev.strobe(strobe::RX);
        }
    }
}

impl<B: RadioBus> RfProtocol for Hubsan<B> {
    fn init(&mut self) -> Result<u32> {
        reset_chip(&mut self.dev)?;
        self.configure()?;

        let mut seed = self.session.controller_id;
        self.session_id = rand32_r(&mut seed, 0);
        self.cur_chan = ALLOWED_CH[(self.session_id % ALLOWED_CH.len() as u32) as usize];
        self.packet_ctr = 0;
        self.vtx_freq = 0;
        self.tx_phase = 0;
        self.listening = false;
        self.delay = 0;
        self.state = HubsanState::Bind { step: 1, waiting: false };

        info!(
            "Hubsan init: session=0x{:08X} channel=0x{:02X}",
            self.session_id, self.cur_chan
        );
        Ok(INITIAL_WAIT_US)
    }

    fn step(&mut self) -> u32 {
        match self.state {
            HubsanState::Bind { step, waiting: false } if step % 2 == 1 => self.bind_send(step),
            HubsanState::Bind { step, waiting: true } => self.bind_wait_write(step),
            HubsanState::Bind { step: 8, .. } => self.bind_confirm(),
            HubsanState::Bind { step, .. } => self.bind_listen(step),
            HubsanState::Data(n) => self.data_step(n),
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
            DiagnosticId::Channel => Diagnostic::Byte(self.cur_chan),
            DiagnosticId::PacketCtr => Diagnostic::Word(u32::from(self.packet_ctr)),
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
