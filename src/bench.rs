//! # Bench Loop
//!
//! Drives a [`Transmitter`] from a tokio interval with a synthetic stick
//! sweep. The binary runs it over a simulated bus so a protocol can be
//! watched end to end without hardware.

use std::future::Future;
use std::time::Duration;

use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::bus::RadioBus;
use crate::config::SchedulerConfig;
use crate::controls::{channels, ControlHandle, CHAN_MAX_VALUE, CHAN_MIN_VALUE};
use crate::engine::Transmitter;

/// One sweep from minimum to maximum and back
const SWEEP_PERIOD_MS: u64 = 4000;

/// Triangle wave over the control range, starting at the minimum.
pub fn sweep_value(elapsed_ms: u64, period_ms: u64) -> i16 {
    let period = period_ms.max(2);
    let half = period / 2;
    let phase = elapsed_ms % period;
    let span = i64::from(CHAN_MAX_VALUE) - i64::from(CHAN_MIN_VALUE);
    let offset = if phase < half {
        phase as i64 * span / half as i64
    } else {
        span - (phase - half) as i64 * span / half as i64
    };
    (i64::from(CHAN_MIN_VALUE) + offset) as i16
}

/// Moves the sticks along phase-shifted sweeps; throttle runs at half speed.
pub fn animate(handle: &ControlHandle, elapsed_ms: u64) {
    let quarter = SWEEP_PERIOD_MS / 4;
    handle.set(channels::THROTTLE, sweep_value(elapsed_ms, SWEEP_PERIOD_MS * 2));
    handle.set(channels::AILERON, sweep_value(elapsed_ms + quarter, SWEEP_PERIOD_MS));
    handle.set(channels::ELEVATOR, sweep_value(elapsed_ms + 2 * quarter, SWEEP_PERIOD_MS));
    handle.set(channels::RUDDER, sweep_value(elapsed_ms + 3 * quarter, SWEEP_PERIOD_MS));
}

/// What a bench run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BenchSummary {
    pub ticks: u64,
    pub steps: u64,
    pub elapsed_us: u64,
}

/// Ticks `tx` until `shutdown` resolves, then stops it.
///
/// # Arguments
///
/// * `tx` - Started transmitter
/// * `handle` - Writer side of the transmitter's control vector
/// * `timing` - Tick and status intervals
/// * `shutdown` - Resolves when the loop should end (Ctrl+C in the binary)
pub async fn run<B, F>(
    tx: &mut Transmitter<B>,
    handle: ControlHandle,
    timing: &SchedulerConfig,
    shutdown: F,
) -> BenchSummary
where
    B: RadioBus,
    F: Future<Output = ()>,
{
    let start = Instant::now();
    let mut ticker = interval(Duration::from_micros(timing.tick_interval_us));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status = interval(Duration::from_millis(timing.status_interval_ms));
    status.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut summary = BenchSummary::default();
    info!(
        "Bench loop running, tick every {}us",
        timing.tick_interval_us
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now_us = start.elapsed().as_micros() as u64;
                animate(&handle, now_us / 1000);
                summary.ticks += 1;
                if tx.tick(now_us) {
                    summary.steps += 1;
                }
                if !tx.is_running() {
                    debug!("Transmitter stopped on its own");
                    break;
                }
            }

            _ = status.tick() => {
                info!("{}", tx.status());
            }

            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    summary.elapsed_us = start.elapsed().as_micros() as u64;
    tx.stop();
    info!(
        "Bench finished: {} steps in {} ticks",
        summary.steps, summary.ticks
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::ControlVector;
    use crate::protocol::Protocol;
    use crate::protocol_id::{ProtocolId, ProtocolKind};
    use crate::sim::SimBus;

    #[test]
    fn test_sweep_is_triangle() {
        assert_eq!(sweep_value(0, 4000), CHAN_MIN_VALUE);
        assert_eq!(sweep_value(1000, 4000), 0);
        assert_eq!(sweep_value(2000, 4000), CHAN_MAX_VALUE);
        assert_eq!(sweep_value(3000, 4000), 0);
        assert_eq!(sweep_value(4000, 4000), CHAN_MIN_VALUE, "wraps");
    }

    #[test]
    fn test_animate_stays_in_range() {
        let controls = ControlVector::new();
        let handle = controls.handle();
        for ms in (0..20_000).step_by(37) {
            animate(&handle, ms);
            for ch in 0..4 {
                let v = controls.get(ch);
                assert!((CHAN_MIN_VALUE..=CHAN_MAX_VALUE).contains(&v), "ch {} = {}", ch, v);
            }
        }
    }

    #[test]
    fn test_run_until_shutdown() {
        let controls = ControlVector::new();
        let bus = SimBus::new(ProtocolKind::HiSky.chip());
        let protocol = Protocol::new(
            ProtocolId::for_kind(ProtocolKind::HiSky, 1),
            7,
            controls.clone(),
            bus.clone(),
        )
        .unwrap();
        let mut tx = Transmitter::new(protocol, 1);
        tx.start(0).unwrap();

        let timing = SchedulerConfig {
            tick_interval_us: 250,
            status_interval_ms: 10,
        };
        let summary = tokio_test::block_on(run(
            &mut tx,
            controls.handle(),
            &timing,
            async { tokio::time::sleep(Duration::from_millis(40)).await },
        ));

        assert!(summary.ticks > 0);
        assert!(summary.steps > 0, "HiSky steps every millisecond");
        assert!(!tx.is_running(), "stopped on shutdown");
        assert_ne!(controls.get(channels::AILERON), 0, "sticks animated");
    }
}
