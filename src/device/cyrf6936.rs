//! # CYRF6936 Driver
//!
//! Cypress WirelessUSB DSSS transceiver. Writes set bit 7 of the address
//! byte, reads send the bare address. Registers 0x20..=0x25 are FIFO-style
//! "files" that accept a whole burst at one address.

use tracing::debug;

use super::{RfMode, Transceiver, TxLog};
use crate::bus::{RadioBus, Transaction};
use crate::hopping::pick_quiet_channels;
use crate::power::TxPower;
use crate::protocol_id::ChipModel;

/// Register addresses.
pub mod reg {
    pub const CHANNEL: u8 = 0x00;
    pub const TX_LENGTH: u8 = 0x01;
    pub const TX_CTRL: u8 = 0x02;
    pub const TX_CFG: u8 = 0x03;
    pub const TX_IRQ_STATUS: u8 = 0x04;
    pub const RX_CTRL: u8 = 0x05;
    pub const RX_CFG: u8 = 0x06;
    pub const RX_IRQ_STATUS: u8 = 0x07;
    pub const RX_STATUS: u8 = 0x08;
    pub const RX_COUNT: u8 = 0x09;
    pub const RX_LENGTH: u8 = 0x0A;
    pub const PWR_CTRL: u8 = 0x0B;
    pub const XTAL_CTRL: u8 = 0x0C;
    pub const IO_CFG: u8 = 0x0D;
    pub const GPIO_CTRL: u8 = 0x0E;
    pub const XACT_CFG: u8 = 0x0F;
    pub const FRAMING_CFG: u8 = 0x10;
    pub const DATA32_THOLD: u8 = 0x11;
    pub const DATA64_THOLD: u8 = 0x12;
    pub const RSSI: u8 = 0x13;
    pub const EOP_CTRL: u8 = 0x14;
    pub const CRC_SEED_LSB: u8 = 0x15;
    pub const CRC_SEED_MSB: u8 = 0x16;
    pub const TX_CRC_LSB: u8 = 0x17;
    pub const TX_CRC_MSB: u8 = 0x18;
    pub const RX_CRC_LSB: u8 = 0x19;
    pub const RX_CRC_MSB: u8 = 0x1A;
    pub const TX_OFFSET_LSB: u8 = 0x1B;
    pub const TX_OFFSET_MSB: u8 = 0x1C;
    pub const MODE_OVERRIDE: u8 = 0x1D;
    pub const RX_OVERRIDE: u8 = 0x1E;
    pub const TX_OVERRIDE: u8 = 0x1F;
    pub const TX_BUFFER: u8 = 0x20;
    pub const RX_BUFFER: u8 = 0x21;
    pub const SOP_CODE: u8 = 0x22;
    pub const DATA_CODE: u8 = 0x23;
    pub const PREAMBLE: u8 = 0x24;
    pub const MFG_ID: u8 = 0x25;
    pub const XTAL_CFG: u8 = 0x26;
    pub const CLK_OVERRIDE: u8 = 0x27;
    pub const CLK_EN: u8 = 0x28;
    pub const RX_ABORT: u8 = 0x29;
    pub const AUTO_CAL_TIME: u8 = 0x32;
    pub const AUTOCAL_OFFSET: u8 = 0x35;
    pub const ANALOG_CTRL: u8 = 0x39;
}

/// Number of channels the RSSI scan covers.
pub const NUM_FREQ: usize = 80;
/// Lowest channel the scan may pick.
pub const FREQ_OFFSET: u8 = 4;

const FRAMING_SIGNATURE: u8 = 0xA5;
const RESET_SETTLE_US: u32 = 200_000;
const PREAMP_SETTLE_US: u32 = 1_000_000;
const RSSI_SETTLE_US: u32 = 10_000;

/// CYRF6936 on a [`RadioBus`].
#[derive(Debug)]
pub struct Cyrf6936<B> {
    bus: B,
    tx: TxLog,
}

impl<B: RadioBus> Cyrf6936<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            tx: TxLog::default(),
        }
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_inner(self) -> B {
        self.bus
    }

    /// Reads the six factory ID bytes.
    pub fn read_mfg_id(&mut self) -> [u8; 6] {
        let mut id = [0u8; 6];
        // fuses on
        self.write_reg(reg::MFG_ID, 0xFF);
        self.read_burst(reg::MFG_ID, &mut id);
        // fuses off
        self.write_reg(reg::MFG_ID, 0x00);
        id
    }

    pub fn set_channel(&mut self, ch: u8) {
        self.write_reg(reg::CHANNEL, ch);
    }

    pub fn set_crc_seed(&mut self, crc: u16) {
        let [msb, lsb] = crc.to_be_bytes();
        self.write_reg(reg::CRC_SEED_LSB, lsb);
        self.write_reg(reg::CRC_SEED_MSB, msb);
    }

    pub fn set_sop_code(&mut self, code: &[u8; 8]) {
        self.write_burst(reg::SOP_CODE, code);
    }

    pub fn set_data_code(&mut self, code: &[u8]) {
        self.write_burst(reg::DATA_CODE, code);
    }

    /// Writes the 24-bit preamble, least significant byte first.
    pub fn write_preamble(&mut self, preamble: u32) {
        let bytes = preamble.to_le_bytes();
        self.write_burst(reg::PREAMBLE, &bytes[..3]);
    }

    pub fn start_receive(&mut self) {
        self.write_reg(reg::RX_CTRL, 0x87);
    }

    /// Clears the TX buffer, loads `data` and starts transmission.
    pub fn write_payload(&mut self, data: &[u8]) -> u8 {
        self.tx.record(data);
        let status = self.write_reg(reg::TX_LENGTH, data.len() as u8);
        self.write_reg(reg::TX_CTRL, 0x40);
        self.write_burst(reg::TX_BUFFER, data);
        self.write_reg(reg::TX_CTRL, 0xBF);
        status
    }

    pub fn read_payload(&mut self, buf: &mut [u8]) -> u8 {
        self.read_burst(reg::RX_BUFFER, buf)
    }

    /// Current RSSI, 5-bit value. A reading with bit 7 set is stale and is
    /// taken again.
    pub fn read_rssi(&mut self, dummy_read: bool) -> u8 {
        if dummy_read {
            self.read_reg(reg::RSSI);
        }
        let mut rssi = self.read_reg(reg::RSSI);
        if rssi & 0x80 != 0 {
            rssi = self.read_reg(reg::RSSI);
        }
        rssi & 0x0F
    }

    /// Parks the receiver on each of the [`NUM_FREQ`] channels and records
    /// the raw RSSI register. Resets the CRC seed and leaves RX enabled.
    pub fn scan_rssi(&mut self) -> [u8; NUM_FREQ] {
        let mut rssi = [0u8; NUM_FREQ];
        self.set_crc_seed(0x0000);
        self.set_mode(RfMode::Receive);
        self.bus.delay_us(PREAMP_SETTLE_US);
        for (ch, slot) in rssi.iter_mut().enumerate() {
            self.set_channel(ch as u8);
            self.read_reg(reg::RSSI);
            self.start_receive();
            self.bus.delay_us(RSSI_SETTLE_US);
            *slot = self.read_reg(reg::RSSI);
        }
        rssi
    }

    /// Picks `count` quiet channels in `min..max`, at least `min_space`
    /// apart, then returns to transmit mode.
    pub fn find_best_channels(&mut self, count: usize, min_space: u8, min: u8, max: u8) -> Vec<u8> {
        let min = min.max(FREQ_OFFSET);
        let max = max.min(NUM_FREQ as u8);
        let rssi = self.scan_rssi();
        let channels = pick_quiet_channels(&rssi, count, min_space, min, max);
        debug!("CYRF6936 quiet channels {:?}", channels);
        self.set_mode(RfMode::Transmit);
        channels
    }
}

impl<B: RadioBus> Transceiver for Cyrf6936<B> {
    const CHIP: ChipModel = ChipModel::Cyrf6936;

    fn write_reg(&mut self, reg: u8, value: u8) -> u8 {
        let mut txn = Transaction::begin(&mut self.bus);
        let status = txn.xfer(0x80 | reg);
        txn.xfer(value);
        status
    }

    fn read_reg(&mut self, reg: u8) -> u8 {
        let mut txn = Transaction::begin(&mut self.bus);
        txn.xfer(reg);
        txn.xfer(0xFF)
    }

    fn write_burst(&mut self, reg: u8, data: &[u8]) -> u8 {
        let mut txn = Transaction::begin(&mut self.bus);
        let status = txn.xfer(0x80 | reg);
        txn.write(data);
        status
    }

    fn read_burst(&mut self, reg: u8, buf: &mut [u8]) -> u8 {
        let mut txn = Transaction::begin(&mut self.bus);
        let status = txn.xfer(reg);
        txn.read_into(buf);
        status
    }

    fn strobe(&mut self, command: u8) -> u8 {
        let mut txn = Transaction::begin(&mut self.bus);
        txn.xfer(command)
    }

    /// The PA/LNA switch hangs off the chip's own XOUT/PACTL GPIOs.
    fn set_mode(&mut self, mode: RfMode) {
        let gpio = if mode == RfMode::Transmit { 0x20 } else { 0x80 };
        self.write_reg(reg::GPIO_CTRL, gpio);
    }

    fn set_power(&mut self, power: TxPower) {
        let cfg = self.read_reg(reg::TX_CFG) & 0xF8;
        self.write_reg(reg::TX_CFG, cfg | power.bits());
    }

    fn reset(&mut self) -> bool {
        self.write_reg(reg::MODE_OVERRIDE, 0x01);
        self.bus.delay_us(RESET_SETTLE_US);
        // XOUT and PACTL as GPIO
        self.write_reg(reg::XTAL_CTRL, 0xC0);
        self.write_reg(reg::IO_CFG, 0x04);
        self.set_mode(RfMode::Idle);
        let signature = self.read_reg(reg::FRAMING_CFG);
        debug!("CYRF6936 framing signature 0x{:02X}", signature);
        signature == FRAMING_SIGNATURE
    }

    /// The CYRF6936 has no ID register; its identity is the SOP code.
    fn write_id(&mut self, id: u32) {
        let bytes = id.to_le_bytes();
        let mut code = [0u8; 8];
        code[..4].copy_from_slice(&bytes);
        code[4..].copy_from_slice(&bytes);
        self.set_sop_code(&code);
    }

    fn delay_us(&mut self, us: u32) {
        self.bus.delay_us(us);
    }

    fn tx_log(&self) -> &TxLog {
        &self.tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    fn device() -> (Cyrf6936<SimBus>, SimBus) {
        let bus = SimBus::new(ChipModel::Cyrf6936);
        (Cyrf6936::new(bus.clone()), bus)
    }

    #[test]
    fn test_reset_signature() {
        let (mut dev, bus) = device();
        assert!(dev.reset());
        bus.set_present(false);
        assert!(!dev.reset());
    }

    #[test]
    fn test_mfg_id_read() {
        let (mut dev, bus) = device();
        bus.set_mfg_id([1, 2, 3, 4, 5, 6]);
        assert_eq!(dev.read_mfg_id(), [1, 2, 3, 4, 5, 6]);
        assert_eq!(bus.register(reg::MFG_ID), 0x00, "fuses must be powered off again");
    }

    #[test]
    fn test_power_preserves_upper_bits() {
        let (mut dev, bus) = device();
        bus.set_register(reg::TX_CFG, 0x28);
        dev.set_power(TxPower::P100mW);
        assert_eq!(bus.register(reg::TX_CFG), 0x2E);
    }

    #[test]
    fn test_crc_seed_split() {
        let (mut dev, bus) = device();
        dev.set_crc_seed(0xBEEF);
        assert_eq!(bus.register(reg::CRC_SEED_LSB), 0xEF);
        assert_eq!(bus.register(reg::CRC_SEED_MSB), 0xBE);
    }

    #[test]
    fn test_preamble_lsb_first() {
        let (mut dev, bus) = device();
        dev.write_preamble(0x333304);
        assert_eq!(bus.file(reg::PREAMBLE), vec![0x04, 0x33, 0x33]);
    }

    #[test]
    fn test_payload_captured() {
        let (mut dev, bus) = device();
        dev.set_channel(0x22);
        dev.write_payload(&[0xA0, 0x11, 0x22]);
        assert_eq!(bus.tx_packets(), vec![vec![0xA0, 0x11, 0x22]]);
        assert_eq!(bus.tx_channels(), vec![0x22]);
        assert_eq!(bus.register(reg::TX_LENGTH), 3);
        assert_eq!(dev.tx_log().count(), 1);
        assert_eq!(dev.tx_log().last(), &[0xA0, 0x11, 0x22]);
    }

    #[test]
    fn test_find_best_channels_uses_scan() {
        let (mut dev, bus) = device();
        for ch in 0..80 {
            bus.set_rssi(ch, 0x0A);
        }
        bus.set_rssi(12, 1);
        bus.set_rssi(40, 2);
        bus.set_rssi(66, 3);

        let picked = dev.find_best_channels(3, 4, 4, 80);
        assert_eq!(picked, vec![12, 40, 66]);
        assert_eq!(bus.register(reg::GPIO_CTRL), 0x20, "scan must end in transmit mode");
        assert_eq!(bus.register(reg::CRC_SEED_LSB), 0);
    }
}
