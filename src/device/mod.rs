//! # Transceiver Drivers
//!
//! One driver per chip family, all exposing the same register-level
//! capability set through [`Transceiver`]:
//!
//! - single register read/write and multi-byte bursts
//! - strobe commands (one byte, no data phase)
//! - idle/transmit/receive switching, including the external PA/LNA switch
//! - RF power mapping and the identity check performed by `reset`
//!
//! Every call is one or more complete [`Transaction`](crate::bus::Transaction)s,
//! so chip-select is never left asserted between calls.

pub mod a7105;
pub mod cyrf6936;
pub mod nrf24l01;

pub use a7105::A7105;
pub use cyrf6936::Cyrf6936;
pub use nrf24l01::Nrf24l01;

use crate::power::TxPower;
use crate::protocol_id::ChipModel;

/// Radio operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfMode {
    Idle,
    Transmit,
    Receive,
}

/// Register-level contract shared by the three chip drivers.
pub trait Transceiver {
    /// Chip family this driver talks to.
    const CHIP: ChipModel;

    /// Writes one register, returning the status byte clocked back.
    fn write_reg(&mut self, reg: u8, value: u8) -> u8;

    fn read_reg(&mut self, reg: u8) -> u8;

    /// Writes `data` to `reg` in one transaction.
    fn write_burst(&mut self, reg: u8, data: &[u8]) -> u8;

    /// Fills `buf` from `reg` in one transaction.
    fn read_burst(&mut self, reg: u8, buf: &mut [u8]) -> u8;

    fn strobe(&mut self, command: u8) -> u8;

    fn set_mode(&mut self, mode: RfMode);

    fn set_power(&mut self, power: TxPower);

    /// Resets the chip and reports whether it echoed its identity value.
    fn reset(&mut self) -> bool;

    /// Programs the chip's address/ID registers.
    fn write_id(&mut self, id: u32);

    fn delay_us(&mut self, us: u32);

    /// Payloads handed to the chip so far.
    fn tx_log(&self) -> &TxLog;
}

/// Count of payloads loaded for transmission, and the most recent one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxLog {
    count: u32,
    last: Vec<u8>,
}

impl TxLog {
    pub fn record(&mut self, payload: &[u8]) {
        self.count = self.count.wrapping_add(1);
        self.last.clear();
        self.last.extend_from_slice(payload);
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn last(&self) -> &[u8] {
        &self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_log_keeps_latest_payload() {
        let mut log = TxLog::default();
        assert_eq!(log.count(), 0);
        assert!(log.last().is_empty());

        log.record(&[1, 2, 3]);
        log.record(&[9]);
        assert_eq!(log.count(), 2);
        assert_eq!(log.last(), &[9], "shorter payload replaces the longer one");
    }
}
