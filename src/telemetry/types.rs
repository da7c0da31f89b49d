//! # Telemetry Types
//!
//! Latest values reported by the receiver, plus the decoders for each
//! vendor's reply layout. Decoders expect frames that the protocol has
//! already unscrambled and matched against its session ID.

use serde::Serialize;

use crate::error::{Result, RfError};

/// Devo frame carrying voltages and RPM.
pub const DEVO_VOLTAGE: u8 = 0x30;
pub const DEVO_TEMPERATURE: u8 = 0x31;
pub const DEVO_GPS_LONG: u8 = 0x32;
pub const DEVO_GPS_LAT: u8 = 0x33;
pub const DEVO_GPS_ALT: u8 = 0x34;
pub const DEVO_GPS_SPEED: u8 = 0x35;
pub const DEVO_GPS_TIME: u8 = 0x36;

/// Hubsan frame carrying battery voltage.
pub const HUBSAN_STATUS: u8 = 0xe1;

/// Which group of values a frame updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryFrame {
    Voltage,
    Temperature,
    Longitude,
    Latitude,
    Altitude,
    Speed,
    Time,
    Battery,
    Raw,
}

/// GPS fix as reported by Devo receivers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GpsData {
    /// Milli-arcseconds / 10 (degrees * 3_600_000), negative south
    pub latitude: i32,
    /// Same scale as latitude, negative west
    pub longitude: i32,
    /// Metres * 1000
    pub altitude: i32,
    pub velocity: i32,
    /// Packed `yy:6 mm:4 dd:5 hh:5 mi:6 ss:6`
    pub time: u32,
}

/// Latest decoded downlink values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Telemetry {
    /// Tenths of a volt
    pub volt: [u8; 3],
    pub rpm: [u32; 2],
    /// Degrees Celsius
    pub temp: [i16; 4],
    pub gps: GpsData,
    /// Last frame that had no decoder, kept verbatim
    pub raw: Vec<u8>,
    pub frames: u32,
    /// Group updated by the most recent frame
    #[serde(skip)]
    pub last_frame: Option<TelemetryFrame>,
}

impl Telemetry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one Devo frame.
    ///
    /// # Arguments
    ///
    /// * `packet` - 16-byte frame, already unscrambled
    ///
    /// # Returns
    ///
    /// * `Ok(Some(frame))` - Values updated
    /// * `Ok(None)` - Not a telemetry frame
    /// * `Err(RfError::Telemetry)` - Frame too short or GPS text malformed
    pub fn apply_devo(&mut self, packet: &[u8]) -> Result<Option<TelemetryFrame>> {
        if packet.len() < 13 {
            return Err(RfError::Telemetry(format!(
                "Devo frame too short: {} bytes",
                packet.len()
            )));
        }

        let frame = match packet[0] {
            DEVO_VOLTAGE => {
                self.volt = [packet[1], packet[3], packet[5]];
                self.rpm = [u32::from(packet[7]) * 120, u32::from(packet[9]) * 120];
                TelemetryFrame::Voltage
            }
            DEVO_TEMPERATURE => {
                for (slot, &raw) in self.temp.iter_mut().zip(&packet[1..5]) {
                    *slot = if raw == 0xff { 0 } else { i16::from(raw) - 20 };
                }
                TelemetryFrame::Temperature
            }
            DEVO_GPS_LONG => {
                let deg = digits(&packet[1..4])?;
                let min = digits(&packet[4..6])?;
                let frac = digits(&packet[7..11])?;
                let mut longitude = deg * 3_600_000 + min * 60_000 + frac * 6;
                if packet[11] == b'W' {
                    longitude = -longitude;
                }
                self.gps.longitude = longitude;
                TelemetryFrame::Longitude
            }
            DEVO_GPS_LAT => {
                let deg = digits(&packet[1..3])?;
                let min = digits(&packet[3..5])?;
                let frac = digits(&packet[6..10])?;
                let mut latitude = deg * 3_600_000 + min * 60_000 + frac * 6;
                if packet[10] == b'S' {
                    latitude = -latitude;
                }
                self.gps.latitude = latitude;
                TelemetryFrame::Latitude
            }
            DEVO_GPS_ALT => {
                self.gps.altitude = decimal_text(&packet[1..8]);
                TelemetryFrame::Altitude
            }
            DEVO_GPS_SPEED => {
                self.gps.velocity = decimal_text(&packet[7..]);
                TelemetryFrame::Speed
            }
            DEVO_GPS_TIME => {
                let field = |at: usize| digits(&packet[at..at + 2]).map(|v| v as u32);
                let (hour, min, sec) = (field(1)?, field(3)?, field(5)?);
                let (day, month, year) = (field(7)?, field(9)?, field(11)?);
                self.gps.time = ((year & 0x3F) << 26)
                    | ((month & 0x0F) << 22)
                    | ((day & 0x1F) << 17)
                    | ((hour & 0x1F) << 12)
                    | ((min & 0x3F) << 6)
                    | (sec & 0x3F);
                TelemetryFrame::Time
            }
            _ => return Ok(None),
        };
        self.record(frame);
        Ok(Some(frame))
    }

    /// Applies one Hubsan reply whose checksum has been verified.
    pub fn apply_hubsan(&mut self, packet: &[u8]) -> Option<TelemetryFrame> {
        if packet.len() < 14 || packet[0] != HUBSAN_STATUS {
            return None;
        }
        self.volt[0] = packet[13];
        Some(self.record(TelemetryFrame::Battery))
    }

    /// Keeps a frame with no known layout.
    pub fn apply_raw(&mut self, packet: &[u8]) -> TelemetryFrame {
        self.raw = packet.to_vec();
        self.record(TelemetryFrame::Raw)
    }

    fn record(&mut self, frame: TelemetryFrame) -> TelemetryFrame {
        self.frames = self.frames.wrapping_add(1);
        self.last_frame = Some(frame);
        frame
    }
}

/// ASCII decimal digits to an integer.
fn digits(text: &[u8]) -> Result<i32> {
    text.iter().try_fold(0i32, |acc, &c| {
        if c.is_ascii_digit() {
            Ok(acc * 10 + i32::from(c - b'0'))
        } else {
            Err(RfError::Telemetry(format!(
                "expected digit, found 0x{:02X}",
                c
            )))
        }
    })
}

/// Parses a NUL-terminated decimal like `"12.8"` into thousandths
/// (12800). Digits before the point are scaled only once the point is seen,
/// so text without a point is returned unscaled. At most 7 characters and
/// three decimals are read.
fn decimal_text(text: &[u8]) -> i32 {
    let mut value = 0i32;
    let mut place = 0i32;
    for &c in text.iter().take(7) {
        if c == b'.' {
            value *= 1000;
            place = 100;
            continue;
        }
        if c == 0 {
            break;
        }
        let digit = i32::from(c.wrapping_sub(b'0'));
        if place != 0 {
            value += digit * place;
            place /= 10;
            if place == 0 {
                break;
            }
        } else {
            value = value * 10 + digit;
        }
    }
    value
}
