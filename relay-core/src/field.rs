//! Decoded field records handed to the relay by an external Mode S decoder.
//!
//! A `FieldRecord` is the flat, serde-friendly mapping the decoder emits
//! (one JSON object per message). `classify()` turns it into a typed
//! `FieldUpdate` by dispatching on downlink format and BDS register.

use serde::Deserialize;

use crate::types::*;

/// DF5: surveillance identity reply (squawk).
pub const DF_IDENTITY_REPLY: u8 = 5;
/// DF17: ADS-B extended squitter.
pub const DF_EXTENDED_SQUITTER: u8 = 17;

/// BDS 0,5: airborne position.
pub const BDS_AIRBORNE_POSITION: u8 = 0x05;
/// BDS 0,8: identification and category.
pub const BDS_IDENTIFICATION: u8 = 0x08;
/// BDS 0,9: airborne velocity.
pub const BDS_AIRBORNE_VELOCITY: u8 = 0x09;

/// One decoded message as produced by the upstream decoder.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FieldRecord {
    /// Downlink format.
    pub df: u8,
    /// Announced address (24-bit ICAO).
    #[serde(rename = "aa")]
    pub address: u32,
    /// ME type / BDS register for extended squitters.
    #[serde(default)]
    pub bds: Option<u8>,
    #[serde(default)]
    pub bds09_subtype: Option<u8>,
    #[serde(default, rename = "lat")]
    pub latitude: Option<f64>,
    #[serde(default, rename = "lon")]
    pub longitude: Option<f64>,
    #[serde(default, rename = "alt")]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub velocity: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default, rename = "vert_rate")]
    pub vertical_rate: Option<f64>,
    #[serde(default)]
    pub squawk: Option<u16>,
    #[serde(default)]
    pub flight_id: Option<String>,
}

/// The subset of track fields a single message supplies.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
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

impl FieldUpdate {
    pub fn kind(&self) -> UpdateKind {
        match self {
            FieldUpdate::Position { .. } => UpdateKind::Position,
            FieldUpdate::Velocity { .. } => UpdateKind::Velocity,
            FieldUpdate::Squawk { .. } => UpdateKind::Squawk,
            FieldUpdate::Identification { .. } => UpdateKind::Identification,
        }
    }
}

impl FieldRecord {
    /// Validated 24-bit address of the record.
    pub fn icao(&self) -> Result<Icao> {
        checked_icao(self.address)
    }

    /// Classify the record into a field update.
    ///
    /// `Ok(None)` means the message is well-formed but carries nothing to
    /// track: a position without an unambiguous fix, or a velocity subtype
    /// other than ground speed (0/1).
    pub fn classify(&self) -> Result<Option<FieldUpdate>> {
        match self.df {
            DF_IDENTITY_REPLY => Ok(Some(FieldUpdate::Squawk {
                squawk: self.require(self.squawk, "squawk")?,
            })),
            DF_EXTENDED_SQUITTER => self.classify_squitter(),
            other => Err(RelayError::UnknownDownlinkFormat(other)),
        }
    }

    fn classify_squitter(&self) -> Result<Option<FieldUpdate>> {
        let register = self.require(self.bds, "bds")?;
        match register {
            BDS_AIRBORNE_POSITION => {
                let (Some(latitude), Some(longitude)) = (self.latitude, self.longitude) else {
                    return Ok(None);
                };
                Ok(Some(FieldUpdate::Position {
                    latitude,
                    longitude,
                    altitude: self.require(self.altitude, "alt")?,
                }))
            }
            BDS_IDENTIFICATION => {
                let flight_id = self.require(self.flight_id.clone(), "flight_id")?;
                Ok(Some(FieldUpdate::Identification { flight_id }))
            }
            BDS_AIRBORNE_VELOCITY => match self.bds09_subtype {
                Some(0) | Some(1) => Ok(Some(FieldUpdate::Velocity {
                    velocity: self.require(self.velocity, "velocity")?,
                    heading: self.require(self.heading, "heading")?,
                    vertical_rate: self.require(self.vertical_rate, "vert_rate")?,
                })),
                _ => Ok(None),
            },
            register => Err(RelayError::UnknownRegister {
                df: self.df,
                register,
            }),
        }
    }

    fn require<T>(&self, value: Option<T>, field: &'static str) -> Result<T> {
        value.ok_or(RelayError::MissingField { df: self.df, field })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn squitter(bds: u8) -> FieldRecord {
        FieldRecord {
            df: DF_EXTENDED_SQUITTER,
            address: 0x4840D6,
            bds: Some(bds),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_json_record() {
        let rec: FieldRecord = serde_json::from_str(
            r#"{"df":17,"aa":4735190,"bds":5,"lat":52.25,"lon":3.92,"alt":38000}"#,
        )
        .unwrap();
        assert_eq!(rec.icao().unwrap(), [0x48, 0x40, 0xD6]);
        assert_eq!(rec.bds, Some(BDS_AIRBORNE_POSITION));
        assert_eq!(rec.altitude, Some(38000.0));
        assert!(rec.velocity.is_none());
    }

    #[test]
    fn test_classify_squawk() {
        let rec = FieldRecord {
            df: DF_IDENTITY_REPLY,
            address: 0xABCDEF,
            squawk: Some(7700),
            ..Default::default()
        };
        assert_eq!(
            rec.classify().unwrap(),
            Some(FieldUpdate::Squawk { squawk: 7700 })
        );
    }

    #[test]
    fn test_classify_position() {
        let rec = FieldRecord {
            latitude: Some(52.25),
            longitude: Some(3.92),
            altitude: Some(38000.0),
            ..squitter(BDS_AIRBORNE_POSITION)
        };
        let update = rec.classify().unwrap().unwrap();
        assert_eq!(update.kind(), UpdateKind::Position);
    }

    #[test]
    fn test_position_without_fix_is_not_an_update() {
        let rec = FieldRecord {
            altitude: Some(38000.0),
            ..squitter(BDS_AIRBORNE_POSITION)
        };
        assert_eq!(rec.classify().unwrap(), None);
    }

    #[test]
    fn test_classify_identification() {
        let rec = FieldRecord {
            flight_id: Some("KLM1023".into()),
            ..squitter(BDS_IDENTIFICATION)
        };
        assert_eq!(
            rec.classify().unwrap(),
            Some(FieldUpdate::Identification {
                flight_id: "KLM1023".into()
            })
        );
    }

    #[test]
    fn test_classify_velocity_subtypes() {
        let base = FieldRecord {
            velocity: Some(450.0),
            heading: Some(90.0),
            vertical_rate: Some(-832.0),
            ..squitter(BDS_AIRBORNE_VELOCITY)
        };
        for subtype in [0, 1] {
            let rec = FieldRecord {
                bds09_subtype: Some(subtype),
                ..base.clone()
            };
            assert_eq!(rec.classify().unwrap().unwrap().kind(), UpdateKind::Velocity);
        }
        let airspeed = FieldRecord {
            bds09_subtype: Some(3),
            ..base
        };
        assert_eq!(airspeed.classify().unwrap(), None);
    }

    #[test]
    fn test_unknown_downlink_format() {
        let rec = FieldRecord {
            df: 11,
            address: 0x4840D6,
            ..Default::default()
        };
        assert!(matches!(
            rec.classify(),
            Err(RelayError::UnknownDownlinkFormat(11))
        ));
    }

    #[test]
    fn test_unknown_register() {
        let rec = squitter(0x20);
        assert!(matches!(
            rec.classify(),
            Err(RelayError::UnknownRegister { df: 17, register: 0x20 })
        ));
    }

    #[test]
    fn test_missing_field() {
        let rec = FieldRecord {
            df: DF_IDENTITY_REPLY,
            address: 0x4840D6,
            ..Default::default()
        };
        assert!(matches!(
            rec.classify(),
            Err(RelayError::MissingField { field: "squawk", .. })
        ));
    }
}
