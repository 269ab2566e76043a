//! Shared types, error enum, and address helpers for relay-core.

use thiserror::Error;

/// All errors produced by relay-core.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("unrecognized downlink format: {0}")]
    UnknownDownlinkFormat(u8),
    #[error("unrecognized BDS register {register:#04x} for DF{df}")]
    UnknownRegister { df: u8, register: u8 },
    #[error("field record for DF{df} is missing `{field}`")]
    MissingField { df: u8, field: &'static str },
    #[error("address {0:#x} does not fit in 24 bits")]
    InvalidAddress(u32),
    #[error("unknown record tag {0} on the wire")]
    UnknownTag(u32),
    #[error("truncated record: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

impl RelayError {
    /// True when the byte stream can no longer be framed and must be resynced.
    pub fn is_desync(&self) -> bool {
        matches!(self, RelayError::UnknownTag(_))
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

/// Current wall-clock time as Unix seconds.
pub fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// ICAO address helpers
// ---------------------------------------------------------------------------

/// 3-byte ICAO address.
pub type Icao = [u8; 3];

/// Largest value a 24-bit address can hold.
pub const MAX_ADDRESS: u32 = 0x00FF_FFFF;

/// Format ICAO address as 6-char uppercase hex string.
pub fn icao_to_string(icao: &Icao) -> String {
    format!("{:02X}{:02X}{:02X}", icao[0], icao[1], icao[2])
}

/// Parse a 6-char hex string into an ICAO address.
pub fn icao_from_hex(hex: &str) -> Option<Icao> {
    if hex.len() != 6 {
        return None;
    }
    u32::from_str_radix(hex, 16).ok().map(icao_from_u32)
}

/// Convert ICAO bytes to u32 (wire and JSON representation).
pub fn icao_to_u32(icao: &Icao) -> u32 {
    ((icao[0] as u32) << 16) | ((icao[1] as u32) << 8) | (icao[2] as u32)
}

/// Build ICAO from a 24-bit integer. Bits above 24 are discarded.
pub fn icao_from_u32(val: u32) -> Icao {
    [
        ((val >> 16) & 0xFF) as u8,
        ((val >> 8) & 0xFF) as u8,
        (val & 0xFF) as u8,
    ]
}

/// Build ICAO from an integer, rejecting values wider than 24 bits.
pub fn checked_icao(val: u32) -> Result<Icao> {
    if val > MAX_ADDRESS {
        return Err(RelayError::InvalidAddress(val));
    }
    Ok(icao_from_u32(val))
}

// ---------------------------------------------------------------------------
// Update categories
// ---------------------------------------------------------------------------

/// Category of a track update; the discriminant is the wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Position = 1,
    Velocity = 2,
    Squawk = 3,
    Identification = 4,
}

impl UpdateKind {
    pub const ALL: [UpdateKind; 4] = [
        UpdateKind::Position,
        UpdateKind::Velocity,
        UpdateKind::Squawk,
        UpdateKind::Identification,
    ];

    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }
}

impl std::fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateKind::Position => write!(f, "position"),
            UpdateKind::Velocity => write!(f, "velocity"),
            UpdateKind::Squawk => write!(f, "squawk"),
            UpdateKind::Identification => write!(f, "identification"),
        }
    }
}

// ---------------------------------------------------------------------------
// Track updates (the unit carried on the wire)
// ---------------------------------------------------------------------------

/// Payload of one relayed update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdatePayload {
    Position {
        latitude: f64,
        longitude: f64,
        altitude: f64,
    },
    Velocity {
        velocity: f64,
        heading: f64,
        vertical_rate: f64,
    },
    Squawk {
        squawk: u16,
    },
    Identification {
        flight_id: String,
    },
}

impl UpdatePayload {
    pub fn kind(&self) -> UpdateKind {
        match self {
            UpdatePayload::Position { .. } => UpdateKind::Position,
            UpdatePayload::Velocity { .. } => UpdateKind::Velocity,
            UpdatePayload::Squawk { .. } => UpdateKind::Squawk,
            UpdatePayload::Identification { .. } => UpdateKind::Identification,
        }
    }
}

/// A field update for one aircraft, stamped with the record's `last_seen`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackUpdate {
    pub icao: Icao,
    pub timestamp: f64,
    pub payload: UpdatePayload,
}

impl TrackUpdate {
    pub fn kind(&self) -> UpdateKind {
        self.payload.kind()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icao_roundtrip() {
        let icao = icao_from_hex("4840D6").unwrap();
        assert_eq!(icao, [0x48, 0x40, 0xD6]);
        assert_eq!(icao_to_string(&icao), "4840D6");
        assert_eq!(icao_to_u32(&icao), 0x4840D6);
    }

    #[test]
    fn test_icao_from_hex_rejects_bad_input() {
        assert!(icao_from_hex("4840D").is_none());
        assert!(icao_from_hex("ZZZZZZ").is_none());
    }

    #[test]
    fn test_checked_icao() {
        assert_eq!(checked_icao(0xFFFFFF).unwrap(), [0xFF, 0xFF, 0xFF]);
        assert!(matches!(
            checked_icao(0x0100_0000),
            Err(RelayError::InvalidAddress(0x0100_0000))
        ));
    }

    #[test]
    fn test_update_kind_tags() {
        for kind in UpdateKind::ALL {
            assert_eq!(UpdateKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(UpdateKind::Position.tag(), 1);
        assert_eq!(UpdateKind::Identification.tag(), 4);
        assert!(UpdateKind::from_tag(0).is_none());
        assert!(UpdateKind::from_tag(5).is_none());
    }

    #[test]
    fn test_desync_classification() {
        assert!(RelayError::UnknownTag(9).is_desync());
        assert!(!RelayError::InvalidAddress(0x0100_0000).is_desync());
    }
}
