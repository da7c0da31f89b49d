//! # Radio Bus
//!
//! The electrical contract every transceiver driver sits on: one SPI bus
//! with a chip-select line, a few control pins and a microsecond delay.
//!
//! All register traffic goes through a [`Transaction`]. Creating one asserts
//! chip-select and dropping it deasserts, and because it mutably borrows the
//! bus no second transaction can begin until the first has ended.

/// Control lines besides chip-select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pin {
    /// PA transmit enable on the external RF switch
    TxEnable,
    /// LNA receive enable on the external RF switch
    RxEnable,
    /// NRF24L01 CE
    ChipEnable,
    /// CYRF6936 hardware reset
    Reset,
}

/// Raw access to an SPI-attached transceiver.
#[cfg_attr(test, mockall::automock)]
pub trait RadioBus {
    /// Drives chip-select active (`true`) or inactive.
    fn chip_select(&mut self, active: bool);

    /// Clocks one byte out and returns the byte clocked in.
    fn transfer(&mut self, byte: u8) -> u8;

    fn set_pin(&mut self, pin: Pin, high: bool);

    fn delay_us(&mut self, us: u32);
}

impl<B: RadioBus + ?Sized> RadioBus for &mut B {
    fn chip_select(&mut self, active: bool) {
        (**self).chip_select(active);
    }

    fn transfer(&mut self, byte: u8) -> u8 {
        (**self).transfer(byte)
    }

    fn set_pin(&mut self, pin: Pin, high: bool) {
        (**self).set_pin(pin, high);
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us);
    }
}

/// Scoped chip-select guard.
pub struct Transaction<'a, B: RadioBus + ?Sized> {
    bus: &'a mut B,
}

impl<'a, B: RadioBus + ?Sized> Transaction<'a, B> {
    pub fn begin(bus: &'a mut B) -> Self {
        bus.chip_select(true);
        Self { bus }
    }

    pub fn xfer(&mut self, byte: u8) -> u8 {
        self.bus.transfer(byte)
    }

    /// Sends every byte of `data`, discarding what comes back.
    pub fn write(&mut self, data: &[u8]) {
        for &byte in data {
            self.bus.transfer(byte);
        }
    }

    /// Fills `buf` by clocking out 0xFF filler bytes.
    pub fn read_into(&mut self, buf: &mut [u8]) {
        for slot in buf.iter_mut() {
            *slot = self.bus.transfer(0xFF);
        }
    }
}

impl<B: RadioBus + ?Sized> Drop for Transaction<'_, B> {
    fn drop(&mut self) {
        self.bus.chip_select(false);
    }
}

/// Polls `ready` up to `attempts` times.
///
/// Returns `true` as soon as `ready` reports success and `false` once the
/// bound is exhausted. Callers carry on either way; a miss just means the
/// hardware was not ready in time for this step.
pub fn bounded_poll<F>(attempts: u32, mut ready: F) -> bool
where
    F: FnMut() -> bool,
{
    (0..attempts).any(|_| ready())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use mockall::Sequence;

    #[test]
    fn test_transaction_brackets_transfers() {
        let mut bus = MockRadioBus::new();
        let mut seq = Sequence::new();

        bus.expect_chip_select()
            .with(eq(true))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        bus.expect_transfer()
            .with(eq(0x45))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(0x0Eu8);
        bus.expect_transfer()
            .with(eq(0xFF))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(0x9Eu8);
        bus.expect_chip_select()
            .with(eq(false))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let mut txn = Transaction::begin(&mut bus);
        assert_eq!(txn.xfer(0x45), 0x0E);
        let mut out = [0u8; 1];
        txn.read_into(&mut out);
        drop(txn);

        assert_eq!(out, [0x9E]);
    }

    #[test]
    fn test_chip_select_released_on_early_exit() {
        let mut bus = MockRadioBus::new();
        bus.expect_chip_select().with(eq(true)).times(1).return_const(());
        bus.expect_chip_select().with(eq(false)).times(1).return_const(());
        bus.expect_transfer().times(2).return_const(0u8);

        fn write_two(bus: &mut MockRadioBus) -> Option<()> {
            let mut txn = Transaction::begin(bus);
            txn.write(&[1, 2]);
            None::<()>?;
            Some(())
        }
        assert!(write_two(&mut bus).is_none());
    }

    #[test]
    fn test_bounded_poll_success() {
        let mut count = 0;
        assert!(bounded_poll(20, || {
            count += 1;
            count == 3
        }));
        assert_eq!(count, 3, "polling should stop at first success");
    }

    #[test]
    fn test_bounded_poll_exhausts() {
        let mut count = 0;
        assert!(!bounded_poll(20, || {
            count += 1;
            false
        }));
        assert_eq!(count, 20);
    }
}
