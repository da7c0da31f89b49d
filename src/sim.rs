//! # Simulated Transceiver Bus
//!
//! A register-level stand-in for the three radio chips, used by the unit
//! tests and by the bench binary when no hardware is attached.
//!
//! [`SimBus`] decodes the SPI command set of the selected [`ChipModel`],
//! keeps a register file, records every transaction it sees and captures
//! each packet the driver fires. Clones share the same state, so a test can
//! hand one clone to a driver and inspect the other.
//!
//! The model is deliberately small: calibration completes instantly, every
//! transmission completes (and on the NRF24L01 is acknowledged unless told
//! otherwise), RSSI comes from a per-channel table and received data comes
//! from a queue the test fills.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bus::{Pin, RadioBus};
use crate::protocol_id::ChipModel;

/// How a simulated NRF24L01 answers a transmitted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// TX_DS is raised after every payload
    #[default]
    Ack,
    /// MAX_RT is raised after every payload
    Timeout,
    /// Neither flag is raised
    Pending,
}

/// Where the next data byte of a frame goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Command,
    Write(u8),
    Read(u8),
    Payload,
    RxPayload,
    Ignore,
}

#[derive(Debug)]
struct SimState {
    chip: ChipModel,
    present: bool,
    regs: [u8; 0x40],
    files: HashMap<u8, Vec<u8>>,
    frame: Vec<u8>,
    frames: Vec<Vec<u8>>,
    phase: Phase,
    tx_fifo: Vec<u8>,
    tx_packets: Vec<Vec<u8>>,
    tx_channels: Vec<u8>,
    rx_fifo: VecDeque<u8>,
    rssi: [u8; 128],
    mfg_id: [u8; 6],
    mfg_index: usize,
    ack: AckMode,
    pins: HashMap<Pin, bool>,
    elapsed_us: u64,
}

impl SimState {
    fn new(chip: ChipModel) -> Self {
        let mut state = Self {
            chip,
            present: true,
            regs: [0; 0x40],
            files: HashMap::new(),
            frame: Vec::new(),
            frames: Vec::new(),
            phase: Phase::Command,
            tx_fifo: Vec::new(),
            tx_packets: Vec::new(),
            tx_channels: Vec::new(),
            rx_fifo: VecDeque::new(),
            rssi: [0; 128],
            mfg_id: [0x5a, 0x3c, 0x81, 0x1f, 0xe2, 0x07],
            mfg_index: 0,
            ack: AckMode::Ack,
            pins: HashMap::new(),
            elapsed_us: 0,
        };
        state.power_on();
        state
    }

    fn power_on(&mut self) {
        self.regs = [0; 0x40];
        match self.chip {
            ChipModel::A7105 => self.regs[0x10] = 0x9E,
            ChipModel::Cyrf6936 => self.regs[0x10] = 0xA5,
            ChipModel::Nrf24l01 => self.regs[0x07] = 0x0E,
        }
    }

    fn begin(&mut self) {
        self.frame.clear();
        self.phase = Phase::Command;
    }

    fn end(&mut self) {
        if self.chip == ChipModel::Nrf24l01 && self.phase == Phase::Payload {
            self.tx_packets.push(self.tx_fifo.clone());
            self.tx_channels.push(self.regs[0x05]);
            match self.ack {
                AckMode::Ack => self.regs[0x07] |= 0x20,
                AckMode::Timeout => self.regs[0x07] |= 0x10,
                AckMode::Pending => {}
            }
        }
        self.frames.push(std::mem::take(&mut self.frame));
        self.phase = Phase::Command;
    }

    fn transfer(&mut self, mosi: u8) -> u8 {
        self.frame.push(mosi);
        if !self.present {
            return 0xFF;
        }
        match self.chip {
            ChipModel::A7105 => self.a7105(mosi),
            ChipModel::Cyrf6936 => self.cyrf(mosi),
            ChipModel::Nrf24l01 => self.nrf(mosi),
        }
    }

    fn a7105(&mut self, mosi: u8) -> u8 {
        match self.phase {
            Phase::Command if mosi & 0x80 != 0 => {
                match mosi {
                    0xD0 => {
                        self.tx_packets.push(self.tx_fifo.clone());
                        self.tx_channels.push(self.regs[0x0F]);
                    }
                    0xE0 => self.tx_fifo.clear(),
                    _ => {}
                }
                // a strobe may be followed by a fresh command in the same frame
                0
            }
            Phase::Command if mosi & 0x40 != 0 => {
                self.phase = Phase::Read(mosi & 0x3F);
                0
            }
            Phase::Command => {
                self.phase = Phase::Write(mosi & 0x3F);
                if mosi == 0x06 {
                    self.files.insert(0x06, Vec::new());
                }
                0
            }
            Phase::Write(0x05) => {
                self.tx_fifo.push(mosi);
                0
            }
            Phase::Write(0x06) => {
                self.files.entry(0x06).or_default().push(mosi);
                0
            }
            Phase::Write(reg) => {
                match reg {
                    0x00 => self.power_on(),
                    // self-calibration finishes immediately
                    0x02 => self.regs[0x02] = 0,
                    _ => self.regs[reg as usize] = mosi,
                }
                0
            }
            Phase::Read(0x05) => self.rx_fifo.pop_front().unwrap_or(0),
            Phase::Read(reg) => self.regs[reg as usize],
            _ => 0,
        }
    }

    fn cyrf(&mut self, mosi: u8) -> u8 {
        match self.phase {
            Phase::Command if mosi & 0x80 != 0 => {
                let reg = mosi & 0x3F;
                self.phase = Phase::Write(reg);
                if (0x20..=0x24).contains(&reg) {
                    self.files.insert(reg, Vec::new());
                }
                0
            }
            Phase::Command => {
                let reg = mosi & 0x3F;
                self.phase = Phase::Read(reg);
                if reg == 0x25 {
                    self.mfg_index = 0;
                }
                0
            }
            Phase::Write(reg) if (0x20..=0x24).contains(&reg) => {
                self.files.entry(reg).or_default().push(mosi);
                0
            }
            Phase::Write(reg) => {
                match reg {
                    0x1D if mosi & 0x01 != 0 => self.power_on(),
                    0x02 if mosi & 0x80 != 0 => {
                        let packet = self.files.get(&0x20).cloned().unwrap_or_default();
                        self.tx_packets.push(packet);
                        self.tx_channels.push(self.regs[0x00]);
                        self.regs[0x02] = mosi;
                    }
                    _ => self.regs[reg as usize] = mosi,
                }
                0
            }
            Phase::Read(0x04) => 0x02,
            Phase::Read(0x13) => self.rssi[(self.regs[0x00] & 0x7F) as usize],
            Phase::Read(0x21) => self.rx_fifo.pop_front().unwrap_or(0),
            Phase::Read(0x25) => {
                let value = self.mfg_id.get(self.mfg_index).copied().unwrap_or(0xFF);
                self.mfg_index += 1;
                value
            }
            Phase::Read(reg) => self.regs[reg as usize],
            _ => 0,
        }
    }

    fn nrf(&mut self, mosi: u8) -> u8 {
        let status = self.regs[0x07];
        match self.phase {
            Phase::Command => {
                self.phase = match mosi {
                    0x00..=0x1F => Phase::Read(mosi),
                    0x20..=0x3F => {
                        let reg = mosi & 0x1F;
                        if matches!(reg, 0x0A..=0x10) {
                            self.files.insert(reg, Vec::new());
                        }
                        Phase::Write(reg)
                    }
                    0xA0 | 0xB0 => {
                        self.tx_fifo.clear();
                        Phase::Payload
                    }
                    0x61 => Phase::RxPayload,
                    _ => Phase::Ignore,
                };
                status
            }
            Phase::Write(0x07) => {
                self.regs[0x07] &= !(mosi & 0x70);
                status
            }
            Phase::Write(reg) if matches!(reg, 0x0A..=0x10) => {
                self.files.entry(reg).or_default().push(mosi);
                self.regs[reg as usize] = mosi;
                status
            }
            Phase::Write(reg) => {
                self.regs[reg as usize] = mosi;
                status
            }
            Phase::Read(reg) => self.regs[reg as usize],
            Phase::Payload => {
                self.tx_fifo.push(mosi);
                status
            }
            Phase::RxPayload => self.rx_fifo.pop_front().unwrap_or(0),
            Phase::Ignore => status,
        }
    }
}

/// Shared handle to a simulated chip.
#[derive(Debug, Clone)]
pub struct SimBus {
    state: Arc<Mutex<SimState>>,
    selected: bool,
}

impl SimBus {
    pub fn new(chip: ChipModel) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(chip))),
            selected: false,
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn chip(&self) -> ChipModel {
        self.state().chip
    }

    /// A missing chip answers every byte with 0xFF.
    pub fn set_present(&self, present: bool) {
        self.state().present = present;
    }

    pub fn register(&self, reg: u8) -> u8 {
        self.state().regs[(reg & 0x3F) as usize]
    }

    pub fn set_register(&self, reg: u8, value: u8) {
        self.state().regs[(reg & 0x3F) as usize] = value;
    }

    /// Last multi-byte value written to `reg` (ID, address, SOP/data code).
    pub fn file(&self, reg: u8) -> Vec<u8> {
        self.state().files.get(&reg).cloned().unwrap_or_default()
    }

    /// MOSI bytes of every completed transaction, in order.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.state().frames.clone()
    }

    /// Every packet the chip was told to transmit.
    pub fn tx_packets(&self) -> Vec<Vec<u8>> {
        self.state().tx_packets.clone()
    }

    /// Channel register value at the moment each packet was fired.
    pub fn tx_channels(&self) -> Vec<u8> {
        self.state().tx_channels.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.state();
        state.frames.clear();
        state.tx_packets.clear();
        state.tx_channels.clear();
    }

    pub fn queue_rx(&self, data: &[u8]) {
        self.state().rx_fifo.extend(data.iter().copied());
    }

    pub fn set_rssi(&self, channel: u8, value: u8) {
        if let Some(slot) = self.state().rssi.get_mut(channel as usize) {
            *slot = value;
        }
    }

    pub fn set_mfg_id(&self, id: [u8; 6]) {
        self.state().mfg_id = id;
    }

    pub fn set_ack_mode(&self, mode: AckMode) {
        self.state().ack = mode;
    }

    pub fn pin(&self, pin: Pin) -> bool {
        self.state().pins.get(&pin).copied().unwrap_or(false)
    }

    /// Total time spent in `delay_us`.
    pub fn elapsed_us(&self) -> u64 {
        self.state().elapsed_us
    }
}

impl RadioBus for SimBus {
    fn chip_select(&mut self, active: bool) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match (self.selected, active) {
            (false, true) => state.begin(),
            (true, false) => state.end(),
            _ => {}
        }
        self.selected = active;
    }

    fn transfer(&mut self, byte: u8) -> u8 {
        self.state().transfer(byte)
    }

    fn set_pin(&mut self, pin: Pin, high: bool) {
        self.state().pins.insert(pin, high);
    }

    fn delay_us(&mut self, us: u32) {
        self.state().elapsed_us += u64::from(us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Transaction;

    #[test]
    fn test_frames_recorded_per_transaction() {
        let mut bus = SimBus::new(ChipModel::A7105);
        {
            let mut txn = Transaction::begin(&mut bus);
            txn.write(&[0x0F, 0x21]);
        }
        assert_eq!(bus.frames(), vec![vec![0x0F, 0x21]]);
        assert_eq!(bus.register(0x0F), 0x21);
    }

    #[test]
    fn test_clones_share_state() {
        let bus = SimBus::new(ChipModel::Cyrf6936);
        let mut other = bus.clone();
        other.delay_us(250);
        assert_eq!(bus.elapsed_us(), 250);
    }

    #[test]
    fn test_nrf_status_write_clears_flags() {
        let bus = SimBus::new(ChipModel::Nrf24l01);
        bus.set_register(0x07, 0x7E);
        let mut dev = bus.clone();
        {
            let mut txn = Transaction::begin(&mut dev);
            txn.write(&[0x27, 0x70]);
        }
        assert_eq!(bus.register(0x07), 0x0E);
    }

    #[test]
    fn test_absent_chip_floats_high() {
        let mut bus = SimBus::new(ChipModel::Nrf24l01);
        bus.set_present(false);
        let mut txn = Transaction::begin(&mut bus);
        assert_eq!(txn.xfer(0xFF), 0xFF);
    }
}
