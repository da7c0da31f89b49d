//! # A7105 Driver
//!
//! AMICCOM A7105 FSK transceiver. Registers are addressed by a plain byte
//! for writes and `0x40 | reg` for reads; strobes have the top bit set.

use tracing::{debug, warn};

use super::{RfMode, Transceiver, TxLog};
use crate::bus::{bounded_poll, Pin, RadioBus, Transaction};
use crate::error::{Result, RfError};
use crate::power::TxPower;
use crate::protocol_id::ChipModel;

/// Register addresses.
pub mod reg {
    pub const MODE: u8 = 0x00;
    pub const MODE_CONTROL: u8 = 0x01;
    pub const CALC: u8 = 0x02;
    pub const FIFO_I: u8 = 0x03;
    pub const FIFO_II: u8 = 0x04;
    pub const FIFO_DATA: u8 = 0x05;
    pub const ID_DATA: u8 = 0x06;
    pub const GPIO1_PIN1: u8 = 0x0B;
    pub const GPIO2_PIN_II: u8 = 0x0C;
    pub const CLOCK: u8 = 0x0D;
    pub const DATA_RATE: u8 = 0x0E;
    pub const PLL_I: u8 = 0x0F;
    pub const PLL_II: u8 = 0x10;
    pub const TX_II: u8 = 0x15;
    pub const RX: u8 = 0x18;
    pub const RX_GAIN_I: u8 = 0x19;
    pub const RX_GAIN_IV: u8 = 0x1C;
    pub const CODE_I: u8 = 0x1F;
    pub const CODE_II: u8 = 0x20;
    pub const IF_CALIB_I: u8 = 0x22;
    pub const VCO_CURCAL: u8 = 0x24;
    pub const VCO_SBCAL_I: u8 = 0x25;
    pub const VCO_SBCAL_II: u8 = 0x26;
    pub const TX_TEST: u8 = 0x28;
    pub const RX_DEM_TEST_I: u8 = 0x29;
}

/// Strobe commands.
pub mod strobe {
    pub const SLEEP: u8 = 0x80;
    pub const IDLE: u8 = 0x90;
    pub const STANDBY: u8 = 0xA0;
    pub const PLL: u8 = 0xB0;
    pub const RX: u8 = 0xC0;
    pub const TX: u8 = 0xD0;
    pub const RST_WRPTR: u8 = 0xE0;
    pub const RST_RDPTR: u8 = 0xF0;
}

/// IF filter bank calibration failed flag in `IF_CALIB_I`.
pub const MASK_FBCF: u8 = 0x10;
/// VCO bank calibration failed flag in `VCO_SBCAL_I`.
pub const MASK_VBCF: u8 = 0x08;

/// Calibration polls `CALC` once per millisecond for at most this long.
const CALIBRATION_TIMEOUT_MS: u32 = 500;

/// Value `PLL_II` reads back after a soft reset.
const RESET_SIGNATURE: u8 = 0x9E;

/// PA current and buffer gain per power level.
const POWER_TABLE: [(u8, u8); 8] = [
    (0, 0),
    (0, 1),
    (0, 2),
    (0, 4),
    (1, 5),
    (2, 7),
    (3, 7),
    (3, 7),
];

/// A7105 on a [`RadioBus`].
#[derive(Debug)]
pub struct A7105<B> {
    bus: B,
    tx: TxLog,
}

impl<B: RadioBus> A7105<B> {
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

    /// Loads `packet` into the TX FIFO, tunes to `channel` and fires TX.
    pub fn write_packet(&mut self, packet: &[u8], channel: u8) -> u8 {
        self.tx.record(packet);
        let status = {
            let mut txn = Transaction::begin(&mut self.bus);
            txn.xfer(strobe::RST_WRPTR);
            let status = txn.xfer(reg::FIFO_DATA);
            txn.write(packet);
            status
        };
        self.write_reg(reg::PLL_I, channel);
        self.strobe(strobe::TX);
        status
    }

    /// Runs the IF filter bank calibration.
    pub fn calibrate_if(&mut self) -> Result<()> {
        self.write_reg(reg::CALC, 0x01);
        self.read_reg(reg::CALC);
        self.wait_calibration("IF filter bank")?;

        let result = self.read_reg(reg::IF_CALIB_I);
        self.read_reg(reg::VCO_CURCAL);
        if result & MASK_FBCF != 0 {
            return Err(RfError::Calibration(format!(
                "IF filter bank flagged failure (0x{:02X})",
                result
            )));
        }
        Ok(())
    }

    /// Runs a VCO bank calibration on `channel` and returns the raw
    /// `VCO_SBCAL_I` result. The caller decides whether `MASK_VBCF` is fatal.
    pub fn calibrate_vco(&mut self, channel: u8) -> Result<u8> {
        self.write_reg(reg::PLL_I, channel);
        self.write_reg(reg::CALC, 0x02);
        self.wait_calibration("VCO bank")?;
        Ok(self.read_reg(reg::VCO_SBCAL_I))
    }

    fn wait_calibration(&mut self, stage: &str) -> Result<()> {
        let done = bounded_poll(CALIBRATION_TIMEOUT_MS, || {
            if self.read_reg(reg::CALC) == 0 {
                return true;
            }
            self.bus.delay_us(1000);
            false
        });
        if done {
            Ok(())
        } else {
            warn!("A7105 {} calibration timed out", stage);
            Err(RfError::Calibration(format!("{} calibration timed out", stage)))
        }
    }

    /// Reads `buf.len()` bytes out of the RX FIFO.
    pub fn read_packet(&mut self, buf: &mut [u8]) -> u8 {
        let status = self.strobe(strobe::RST_RDPTR);
        self.read_burst(reg::FIFO_DATA, buf);
        status
    }
}

impl<B: RadioBus> Transceiver for A7105<B> {
    const CHIP: ChipModel = ChipModel::A7105;

    fn write_reg(&mut self, reg: u8, value: u8) -> u8 {
        let mut txn = Transaction::begin(&mut self.bus);
        let status = txn.xfer(reg);
        txn.xfer(value);
        status
    }

    fn read_reg(&mut self, reg: u8) -> u8 {
        let mut txn = Transaction::begin(&mut self.bus);
        txn.xfer(0x40 | reg);
        txn.xfer(0xFF)
    }

    fn write_burst(&mut self, reg: u8, data: &[u8]) -> u8 {
        let mut txn = Transaction::begin(&mut self.bus);
        let status = txn.xfer(reg);
        txn.write(data);
        status
    }

    fn read_burst(&mut self, reg: u8, buf: &mut [u8]) -> u8 {
        let mut txn = Transaction::begin(&mut self.bus);
        let status = txn.xfer(0x40 | reg);
        txn.read_into(buf);
        status
    }

    fn strobe(&mut self, command: u8) -> u8 {
        let mut txn = Transaction::begin(&mut self.bus);
        txn.xfer(command)
    }

    fn set_mode(&mut self, mode: RfMode) {
        let (tx, rx) = match mode {
            RfMode::Transmit => (true, false),
            RfMode::Receive => (false, true),
            RfMode::Idle => (false, false),
        };
        self.bus.set_pin(Pin::RxEnable, rx);
        self.bus.set_pin(Pin::TxEnable, tx);
    }

    fn set_power(&mut self, power: TxPower) {
        let (pac, tbg) = POWER_TABLE[power.bits() as usize];
        self.write_reg(reg::TX_TEST, (pac << 3) | tbg);
    }

    fn reset(&mut self) -> bool {
        self.write_reg(reg::MODE, 0x00);
        self.bus.delay_us(1000);
        // 4-wire SPI, GIO1 drives MISO
        self.write_reg(reg::GPIO1_PIN1, 0x19);
        self.set_mode(RfMode::Idle);
        let signature = self.read_reg(reg::PLL_II);
        self.strobe(strobe::STANDBY);
        debug!("A7105 reset signature 0x{:02X}", signature);
        signature == RESET_SIGNATURE
    }

    fn write_id(&mut self, id: u32) {
        self.write_burst(reg::ID_DATA, &id.to_be_bytes());
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

    fn device() -> (A7105<SimBus>, SimBus) {
        let bus = SimBus::new(ChipModel::A7105);
        (A7105::new(bus.clone()), bus)
    }

    #[test]
    fn test_reset_checks_signature() {
        let (mut dev, _) = device();
        assert!(dev.reset());
    }

    #[test]
    fn test_reset_fails_on_dead_chip() {
        let (mut dev, bus) = device();
        bus.set_present(false);
        assert!(!dev.reset());
    }

    #[test]
    fn test_power_encoding() {
        let (mut dev, bus) = device();
        dev.set_power(TxPower::P10mW);
        assert_eq!(bus.register(reg::TX_TEST), (1 << 3) | 5);
        dev.set_power(TxPower::P150mW);
        assert_eq!(bus.register(reg::TX_TEST), (3 << 3) | 7);
    }

    #[test]
    fn test_write_id_big_endian() {
        let (mut dev, bus) = device();
        dev.write_id(0x5475c52a);
        let frames = bus.frames();
        assert_eq!(frames.last().unwrap(), &vec![0x06, 0x54, 0x75, 0xc5, 0x2a]);
    }

    #[test]
    fn test_write_packet_sequence() {
        let (mut dev, bus) = device();
        dev.write_packet(&[0xAA, 1, 2], 0x21);
        let frames = bus.frames();
        let n = frames.len();
        assert_eq!(frames[n - 3], vec![strobe::RST_WRPTR, reg::FIFO_DATA, 0xAA, 1, 2]);
        assert_eq!(frames[n - 2], vec![reg::PLL_I, 0x21]);
        assert_eq!(frames[n - 1], vec![strobe::TX]);
        assert_eq!(bus.tx_packets(), vec![vec![0xAA, 1, 2]]);
        assert_eq!(dev.tx_log().count(), 1);
        assert_eq!(dev.tx_log().last(), &[0xAA, 1, 2]);
    }

    #[test]
    fn test_read_packet_advances_through_fifo() {
        let (mut dev, bus) = device();
        bus.queue_rx(&[9, 8, 7, 6]);
        let mut buf = [0u8; 4];
        dev.read_packet(&mut buf);
        assert_eq!(buf, [9, 8, 7, 6]);
    }

    #[test]
    fn test_calibration_passes_on_sim() {
        let (mut dev, bus) = device();
        assert!(dev.calibrate_if().is_ok());
        assert_eq!(dev.calibrate_vco(0xa0).unwrap(), 0);
        assert_eq!(bus.register(reg::PLL_I), 0xa0);
    }

    #[test]
    fn test_calibration_reports_filter_failure() {
        let (mut dev, bus) = device();
        bus.set_register(reg::IF_CALIB_I, MASK_FBCF);
        let err = dev.calibrate_if().unwrap_err();
        assert!(matches!(err, RfError::Calibration(_)));
    }

    #[test]
    fn test_calibration_times_out_on_dead_chip() {
        let (mut dev, bus) = device();
        bus.set_present(false);
        let before = bus.elapsed_us();
        assert!(dev.calibrate_vco(0).is_err());
        assert!(bus.elapsed_us() - before >= 500_000, "should wait out the full bound");
    }

    #[test]
    fn test_mode_pins() {
        let (mut dev, bus) = device();
        dev.set_mode(RfMode::Transmit);
        assert!(bus.pin(Pin::TxEnable));
        assert!(!bus.pin(Pin::RxEnable));
        dev.set_mode(RfMode::Receive);
        assert!(!bus.pin(Pin::TxEnable));
        assert!(bus.pin(Pin::RxEnable));
        dev.set_mode(RfMode::Idle);
        assert!(!bus.pin(Pin::TxEnable) && !bus.pin(Pin::RxEnable));
    }
}
