//! # NRF24L01 Driver
//!
//! Nordic nRF24L01(+) GFSK transceiver. Every command returns the STATUS
//! register on its first byte; `CE` gates the actual RF activity.

use tracing::debug;

use super::{RfMode, Transceiver, TxLog};
use crate::bus::{Pin, RadioBus, Transaction};
use crate::power::TxPower;
use crate::protocol_id::ChipModel;

/// Register addresses.
pub mod reg {
    pub const CONFIG: u8 = 0x00;
    pub const EN_AA: u8 = 0x01;
    pub const EN_RXADDR: u8 = 0x02;
    pub const SETUP_AW: u8 = 0x03;
    pub const SETUP_RETR: u8 = 0x04;
    pub const RF_CH: u8 = 0x05;
    pub const RF_SETUP: u8 = 0x06;
    pub const STATUS: u8 = 0x07;
    pub const OBSERVE_TX: u8 = 0x08;
    pub const CD: u8 = 0x09;
    pub const RX_ADDR_P0: u8 = 0x0A;
    pub const RX_ADDR_P1: u8 = 0x0B;
    pub const RX_ADDR_P2: u8 = 0x0C;
    pub const RX_ADDR_P3: u8 = 0x0D;
    pub const RX_ADDR_P4: u8 = 0x0E;
    pub const RX_ADDR_P5: u8 = 0x0F;
    pub const TX_ADDR: u8 = 0x10;
    pub const RX_PW_P0: u8 = 0x11;
    pub const RX_PW_P1: u8 = 0x12;
    pub const RX_PW_P2: u8 = 0x13;
    pub const RX_PW_P3: u8 = 0x14;
    pub const RX_PW_P4: u8 = 0x15;
    pub const RX_PW_P5: u8 = 0x16;
    pub const FIFO_STATUS: u8 = 0x17;
    pub const DYNPD: u8 = 0x1C;
    pub const FEATURE: u8 = 0x1D;
}

/// Instruction mnemonics.
pub mod cmd {
    pub const W_REGISTER: u8 = 0x20;
    pub const REGISTER_MASK: u8 = 0x1F;
    pub const ACTIVATE: u8 = 0x50;
    pub const R_RX_PL_WID: u8 = 0x60;
    pub const R_RX_PAYLOAD: u8 = 0x61;
    pub const W_TX_PAYLOAD: u8 = 0xA0;
    pub const W_TX_PAYLOAD_NOACK: u8 = 0xB0;
    pub const FLUSH_TX: u8 = 0xE1;
    pub const FLUSH_RX: u8 = 0xE2;
    pub const REUSE_TX_PL: u8 = 0xE3;
    pub const NOP: u8 = 0xFF;
}

/// STATUS bits.
pub mod status {
    pub const RX_DR: u8 = 1 << 6;
    pub const TX_DS: u8 = 1 << 5;
    pub const MAX_RT: u8 = 1 << 4;
}

/// CONFIG bits.
pub mod config {
    pub const EN_CRC: u8 = 1 << 3;
    pub const CRCO: u8 = 1 << 2;
    pub const PWR_UP: u8 = 1 << 1;
    pub const PRIM_RX: u8 = 1 << 0;
}

/// On-air data rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitrate {
    Mbps1 = 0,
    Mbps2 = 1,
    Kbps250 = 2,
}

const POWER_UP_SETTLE_US: u32 = 150;

/// Outcome of the last auto-ack transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Pending,
    Acked,
    TimedOut,
}

/// NRF24L01 on a [`RadioBus`].
#[derive(Debug)]
pub struct Nrf24l01<B> {
    bus: B,
    rf_setup: u8,
    tx: TxLog,
}

impl<B: RadioBus> Nrf24l01<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            rf_setup: 0x0F,
            tx: TxLog::default(),
        }
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_inner(self) -> B {
        self.bus
    }

    pub fn write_payload(&mut self, data: &[u8]) -> u8 {
        self.tx.record(data);
        self.command_with(cmd::W_TX_PAYLOAD, data)
    }

    pub fn read_payload(&mut self, buf: &mut [u8]) -> u8 {
        let mut txn = Transaction::begin(&mut self.bus);
        let status = txn.xfer(cmd::R_RX_PAYLOAD);
        txn.read_into(buf);
        status
    }

    pub fn flush_tx(&mut self) -> u8 {
        self.strobe(cmd::FLUSH_TX)
    }

    pub fn flush_rx(&mut self) -> u8 {
        self.strobe(cmd::FLUSH_RX)
    }

    pub fn activate(&mut self, code: u8) -> u8 {
        self.command_with(cmd::ACTIVATE, &[code])
    }

    pub fn set_bitrate(&mut self, bitrate: Bitrate) -> u8 {
        let br = bitrate as u8;
        // bit 0 goes to RF_DR_HIGH, bit 1 to RF_DR_LOW
        self.rf_setup = (self.rf_setup & 0xD7) | ((br & 0x02) << 4) | ((br & 0x01) << 3);
        self.write_reg(reg::RF_SETUP, self.rf_setup)
    }

    pub fn set_channel(&mut self, ch: u8) -> u8 {
        self.write_reg(reg::RF_CH, ch)
    }

    /// Clears RX_DR, TX_DS and MAX_RT.
    pub fn clear_status(&mut self) -> u8 {
        self.write_reg(reg::STATUS, status::RX_DR | status::TX_DS | status::MAX_RT)
    }

    /// Reads STATUS and reports whether the last packet was acknowledged.
    pub fn ack_status(&mut self) -> AckStatus {
        match self.read_reg(reg::STATUS) & (status::TX_DS | status::MAX_RT) {
            status::TX_DS => AckStatus::Acked,
            status::MAX_RT => AckStatus::TimedOut,
            _ => AckStatus::Pending,
        }
    }

    /// STATUS as returned by a NOP.
    pub fn status(&mut self) -> u8 {
        self.strobe(cmd::NOP)
    }

    fn command_with(&mut self, command: u8, data: &[u8]) -> u8 {
        let mut txn = Transaction::begin(&mut self.bus);
        let status = txn.xfer(command);
        txn.write(data);
        status
    }
}

impl<B: RadioBus> Transceiver for Nrf24l01<B> {
    const CHIP: ChipModel = ChipModel::Nrf24l01;

    fn write_reg(&mut self, reg: u8, value: u8) -> u8 {
        self.command_with(cmd::W_REGISTER | (cmd::REGISTER_MASK & reg), &[value])
    }

    fn read_reg(&mut self, reg: u8) -> u8 {
        let mut txn = Transaction::begin(&mut self.bus);
        txn.xfer(cmd::REGISTER_MASK & reg);
        txn.xfer(cmd::NOP)
    }

    fn write_burst(&mut self, reg: u8, data: &[u8]) -> u8 {
        self.command_with(cmd::W_REGISTER | (cmd::REGISTER_MASK & reg), data)
    }

    fn read_burst(&mut self, reg: u8, buf: &mut [u8]) -> u8 {
        let mut txn = Transaction::begin(&mut self.bus);
        let status = txn.xfer(cmd::REGISTER_MASK & reg);
        txn.read_into(buf);
        status
    }

    fn strobe(&mut self, command: u8) -> u8 {
        let mut txn = Transaction::begin(&mut self.bus);
        txn.xfer(command)
    }

    fn set_mode(&mut self, mode: RfMode) {
        let tx_config = config::EN_CRC | config::CRCO | config::PWR_UP;
        match mode {
            RfMode::Transmit => {
                self.bus.set_pin(Pin::ChipEnable, false);
                self.clear_status();
                self.write_reg(reg::CONFIG, tx_config);
                self.bus.delay_us(POWER_UP_SETTLE_US);
                self.bus.set_pin(Pin::ChipEnable, true);
            }
            RfMode::Receive => {
                self.bus.set_pin(Pin::ChipEnable, false);
                self.write_reg(reg::STATUS, 0x70);
                self.write_reg(reg::CONFIG, 0x0F);
                self.clear_status();
                self.write_reg(reg::CONFIG, tx_config | config::PRIM_RX);
                self.bus.delay_us(POWER_UP_SETTLE_US);
                self.bus.set_pin(Pin::ChipEnable, true);
            }
            RfMode::Idle => {
                self.write_reg(reg::CONFIG, config::EN_CRC);
                self.bus.set_pin(Pin::ChipEnable, false);
            }
        }
    }

    /// Only four hardware steps exist; the eight levels fold onto them.
    fn set_power(&mut self, power: TxPower) {
        let nrf_power = match power {
            TxPower::P100uW | TxPower::P300uW | TxPower::P1mW => 0,
            TxPower::P3mW | TxPower::P10mW => 1,
            TxPower::P30mW => 2,
            TxPower::P100mW | TxPower::P150mW => 3,
        };
        self.rf_setup = (self.rf_setup & 0xF9) | (nrf_power << 1);
        self.write_reg(reg::RF_SETUP, self.rf_setup);
    }

    fn reset(&mut self) -> bool {
        self.flush_tx();
        self.flush_rx();
        let status1 = self.strobe(cmd::NOP);
        let status2 = self.read_reg(reg::STATUS);
        self.set_mode(RfMode::Idle);
        debug!("NRF24L01 status 0x{:02X}/0x{:02X}", status1, status2);
        status1 == status2 && (status1 & 0x0F) == 0x0E
    }

    /// Sets both TX address and pipe-0 RX address (for auto-ack).
    fn write_id(&mut self, id: u32) {
        let addr = id.to_le_bytes();
        self.write_burst(reg::RX_ADDR_P0, &addr);
        self.write_burst(reg::TX_ADDR, &addr);
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

    fn device() -> (Nrf24l01<SimBus>, SimBus) {
        let bus = SimBus::new(ChipModel::Nrf24l01);
        (Nrf24l01::new(bus.clone()), bus)
    }

    #[test]
    fn test_reset_status_echo() {
        let (mut dev, bus) = device();
        assert!(dev.reset());
        assert_eq!(bus.register(reg::CONFIG), config::EN_CRC);
        bus.set_present(false);
        assert!(!dev.reset());
    }

    #[test]
    fn test_bitrate_bits() {
        let (mut dev, bus) = device();
        dev.set_bitrate(Bitrate::Kbps250);
        assert_eq!(bus.register(reg::RF_SETUP), 0x27);
        dev.set_bitrate(Bitrate::Mbps2);
        assert_eq!(bus.register(reg::RF_SETUP), 0x0F);
        dev.set_bitrate(Bitrate::Mbps1);
        assert_eq!(bus.register(reg::RF_SETUP), 0x07);
    }

    #[test]
    fn test_power_folding() {
        let (mut dev, bus) = device();
        dev.set_power(TxPower::P100uW);
        assert_eq!(bus.register(reg::RF_SETUP) & 0x06, 0);
        dev.set_power(TxPower::P10mW);
        assert_eq!(bus.register(reg::RF_SETUP) & 0x06, 2);
        dev.set_power(TxPower::P30mW);
        assert_eq!(bus.register(reg::RF_SETUP) & 0x06, 4);
        dev.set_power(TxPower::P150mW);
        assert_eq!(bus.register(reg::RF_SETUP) & 0x06, 6);
    }

    #[test]
    fn test_tx_mode_sets_ce_and_config() {
        let (mut dev, bus) = device();
        dev.set_mode(RfMode::Transmit);
        assert_eq!(bus.register(reg::CONFIG), 0x0E);
        assert!(bus.pin(Pin::ChipEnable));
        dev.set_mode(RfMode::Receive);
        assert_eq!(bus.register(reg::CONFIG), 0x0F);
        dev.set_mode(RfMode::Idle);
        assert!(!bus.pin(Pin::ChipEnable));
    }

    #[test]
    fn test_payload_and_ack() {
        let (mut dev, bus) = device();
        dev.clear_status();
        dev.set_channel(0x3C);
        dev.write_payload(&[1, 2, 3, 4]);
        assert_eq!(bus.tx_packets(), vec![vec![1, 2, 3, 4]]);
        assert_eq!(bus.tx_channels(), vec![0x3C]);
        assert_eq!(dev.tx_log().last(), &[1, 2, 3, 4]);
        assert_ne!(dev.status() & status::TX_DS, 0, "sim acks by default");
    }

    #[test]
    fn test_ack_status_follows_sim_mode() {
        let (mut dev, bus) = device();
        dev.clear_status();
        assert_eq!(dev.ack_status(), AckStatus::Pending);
        dev.write_payload(&[0xAA]);
        assert_eq!(dev.ack_status(), AckStatus::Acked);

        bus.set_ack_mode(crate::sim::AckMode::Timeout);
        dev.clear_status();
        dev.write_payload(&[0xAA]);
        assert_eq!(dev.ack_status(), AckStatus::TimedOut);
    }
}
