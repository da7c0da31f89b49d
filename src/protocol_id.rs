//! # Protocol Identifiers
//!
//! A session is selected by one packed 32-bit value:
//!
//! ```text
//! bits 23..16  module   (transceiver family)
//! bits 15..8   protocol (vendor state machine on that module)
//! bits  7..0   option   (vendor sub-variant)
//! ```
//!
//! The value is decoded once when a protocol is constructed and never changes
//! for the lifetime of the session.

use std::fmt;

/// Transceiver family numbers as they appear in the packed id.
pub mod module {
    pub const NRF24L01: u8 = 0;
    pub const A7105: u8 = 1;
    pub const CYRF6936: u8 = 2;
}

/// Transceiver chip families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipModel {
    Nrf24l01,
    A7105,
    Cyrf6936,
}

impl ChipModel {
    /// Module number used in the packed id.
    pub const fn module(self) -> u8 {
        match self {
            ChipModel::Nrf24l01 => module::NRF24L01,
            ChipModel::A7105 => module::A7105,
            ChipModel::Cyrf6936 => module::CYRF6936,
        }
    }

    pub fn from_module(module: u8) -> Option<Self> {
        match module {
            module::NRF24L01 => Some(ChipModel::Nrf24l01),
            module::A7105 => Some(ChipModel::A7105),
            module::CYRF6936 => Some(ChipModel::Cyrf6936),
            _ => None,
        }
    }

    /// Parse a configuration name (`"nrf24l01"`, `"a7105"`, `"cyrf6936"`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "nrf24l01" | "nrf" => Some(ChipModel::Nrf24l01),
            "a7105" => Some(ChipModel::A7105),
            "cyrf6936" | "cyrf" => Some(ChipModel::Cyrf6936),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ChipModel::Nrf24l01 => "NRF24L01",
            ChipModel::A7105 => "A7105",
            ChipModel::Cyrf6936 => "CYRF6936",
        }
    }
}

/// Every vendor state machine the engine can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolKind {
    V2x2,
    HiSky,
    Yd717,
    Syma,
    CFlie,
    Flysky,
    Hubsan,
    Devo,
    Dsm,
}

impl ProtocolKind {
    pub const ALL: [ProtocolKind; 9] = [
        ProtocolKind::V2x2,
        ProtocolKind::HiSky,
        ProtocolKind::Yd717,
        ProtocolKind::Syma,
        ProtocolKind::CFlie,
        ProtocolKind::Flysky,
        ProtocolKind::Hubsan,
        ProtocolKind::Devo,
        ProtocolKind::Dsm,
    ];

    /// Chip family and protocol number within that family.
    pub const fn parts(self) -> (ChipModel, u8) {
        match self {
            ProtocolKind::V2x2 => (ChipModel::Nrf24l01, 0),
            ProtocolKind::HiSky => (ChipModel::Nrf24l01, 1),
            ProtocolKind::Yd717 => (ChipModel::Nrf24l01, 2),
            ProtocolKind::Syma => (ChipModel::Nrf24l01, 3),
            ProtocolKind::CFlie => (ChipModel::Nrf24l01, 4),
            ProtocolKind::Flysky => (ChipModel::A7105, 0),
            ProtocolKind::Hubsan => (ChipModel::A7105, 1),
            ProtocolKind::Devo => (ChipModel::Cyrf6936, 0),
            ProtocolKind::Dsm => (ChipModel::Cyrf6936, 1),
        }
    }

    pub const fn chip(self) -> ChipModel {
        self.parts().0
    }

    pub fn from_parts(module: u8, protocol: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| {
            let (chip, proto) = kind.parts();
            chip.module() == module && proto == protocol
        })
    }

    pub const fn name(self) -> &'static str {
        match self {
            ProtocolKind::V2x2 => "v2x2",
            ProtocolKind::HiSky => "hisky",
            ProtocolKind::Yd717 => "yd717",
            ProtocolKind::Syma => "syma",
            ProtocolKind::CFlie => "cflie",
            ProtocolKind::Flysky => "flysky",
            ProtocolKind::Hubsan => "hubsan",
            ProtocolKind::Devo => "devo",
            ProtocolKind::Dsm => "dsm",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// Packed `(module << 16 | protocol << 8 | option)` session selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolId(u32);

impl ProtocolId {
    pub const fn new(module: u8, protocol: u8, option: u8) -> Self {
        Self((module as u32) << 16 | (protocol as u32) << 8 | option as u32)
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn for_kind(kind: ProtocolKind, option: u8) -> Self {
        let (chip, proto) = kind.parts();
        Self::new(chip.module(), proto, option)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn module(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn protocol(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn option(self) -> u8 {
        self.0 as u8
    }

    /// Vendor state machine selected by this id, if any.
    pub fn kind(self) -> Option<ProtocolKind> {
        ProtocolKind::from_parts(self.module(), self.protocol())
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(kind) => write!(
                f,
                "{}/{} opt 0x{:02X}",
                kind.chip().name(),
                kind.name(),
                self.option()
            ),
            None => write!(f, "0x{:06X}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let id = ProtocolId::new(2, 1, 0x03);
        assert_eq!(id.raw(), 0x0002_0103);
        assert_eq!(id.module(), 2);
        assert_eq!(id.protocol(), 1);
        assert_eq!(id.option(), 3);
    }

    #[test]
    fn test_kind_lookup() {
        assert_eq!(ProtocolId::new(1, 1, 0).kind(), Some(ProtocolKind::Hubsan));
        assert_eq!(ProtocolId::new(0, 3, 1).kind(), Some(ProtocolKind::Syma));
        assert_eq!(ProtocolId::new(2, 9, 0).kind(), None);
        assert_eq!(ProtocolId::new(7, 0, 0).kind(), None);
    }

    #[test]
    fn test_for_kind_round_trips_every_protocol() {
        for kind in ProtocolKind::ALL {
            let id = ProtocolId::for_kind(kind, 0x42);
            assert_eq!(id.kind(), Some(kind), "{:?} should decode back", kind);
            assert_eq!(id.option(), 0x42);
        }
    }

    #[test]
    fn test_names() {
        assert_eq!(ChipModel::from_name("CYRF6936"), Some(ChipModel::Cyrf6936));
        assert_eq!(ProtocolKind::from_name("Devo"), Some(ProtocolKind::Devo));
        assert_eq!(ProtocolKind::from_name("frsky"), None);
    }

    #[test]
    fn test_display() {
        let id = ProtocolId::for_kind(ProtocolKind::Flysky, 2);
        assert_eq!(id.to_string(), "A7105/flysky opt 0x02");
        assert_eq!(ProtocolId::from_raw(0x00090000).to_string(), "0x090000");
    }
}
