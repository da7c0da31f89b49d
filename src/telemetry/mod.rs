//! # Telemetry Module
//!
//! Downlink telemetry and packet capture.
//!
//! This module handles:
//! - Decoding the fixed-layout reply frames some receivers send back
//! - Formatting transmitted packets and decoded frames as JSONL
//! - Writing to rotating capture files (max N records per file)
//! - Retaining only the last M files

pub mod logger;
pub mod types;

pub use logger::{CaptureRecord, CaptureWriter, Direction};
pub use types::{GpsData, Telemetry, TelemetryFrame};
