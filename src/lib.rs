//! # MultiRF TX Library
//!
//! Multi-protocol 2.4 GHz RC transmitter engine.
//!
//! One [`engine::Transmitter`] owns one transceiver (A7105, CYRF6936 or
//! NRF24L01) behind a [`bus::RadioBus`] and runs one vendor state machine
//! from [`protocol`] on it. The embedding loop writes stick values into a
//! shared [`controls::ControlVector`] and calls `tick` with a microsecond
//! clock; the protocol decides what goes on air and when.

pub mod bench;
pub mod bus;
pub mod codec;
pub mod config;
pub mod controls;
pub mod device;
pub mod engine;
pub mod error;
pub mod hopping;
pub mod power;
pub mod protocol;
pub mod protocol_id;
pub mod scheduler;
pub mod sim;
pub mod telemetry;
