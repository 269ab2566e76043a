//! Binary wire protocol for relayed track updates.
//!
//! Every record starts with an 8-byte prefix: the 32-bit address followed by
//! a 32-bit tag. The tag selects a fixed payload layout, so the record length
//! is known as soon as the prefix is available. All fields are big-endian.
//!
//! | Tag | Kind           | Payload after tag                       | Total |
//! |-----|----------------|-----------------------------------------|-------|
//! | 1   | position       | ts f64, lat f64, lon f64, alt f64       | 40    |
//! | 2   | velocity       | ts f64, speed f64, heading f64, vr f64  | 40    |
//! | 3   | squawk         | ts f64, squawk u16                      | 18    |
//! | 4   | identification | ts f64, flight id `[u8; 8]`             | 24    |

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::types::*;

/// Address + tag.
pub const PREFIX_LEN: usize = 8;

/// Fixed width of the flight identifier field.
pub const FLIGHT_ID_LEN: usize = 8;

/// Tag → total record length.
pub const RECORD_LENGTHS: &[(UpdateKind, usize)] = &[
    (UpdateKind::Position, 40),
    (UpdateKind::Velocity, 40),
    (UpdateKind::Squawk, 18),
    (UpdateKind::Identification, 24),
];

/// Total record length for a wire tag, or `None` for an unknown tag.
pub fn record_len(tag: u32) -> Option<usize> {
    let kind = UpdateKind::from_tag(tag)?;
    RECORD_LENGTHS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, len)| *len)
}

/// Length of the record at the head of `buf`.
///
/// `Ok(None)` until the prefix is buffered; an unknown tag is an error
/// because the stream can no longer be framed.
pub fn peek_record_len(buf: &[u8]) -> Result<Option<usize>> {
    if buf.len() < PREFIX_LEN {
        return Ok(None);
    }
    let mut tag_bytes = &buf[4..PREFIX_LEN];
    let tag = tag_bytes.get_u32();
    record_len(tag).map(Some).ok_or(RelayError::UnknownTag(tag))
}

/// Encode an update into its wire record.
pub fn encode(update: &TrackUpdate) -> Bytes {
    let kind = update.kind();
    let len = record_len(kind.tag()).unwrap_or(PREFIX_LEN);
    let mut buf = BytesMut::with_capacity(len);

    buf.put_u32(icao_to_u32(&update.icao));
    buf.put_u32(kind.tag());
    buf.put_f64(update.timestamp);

    match &update.payload {
        UpdatePayload::Position {
            latitude,
            longitude,
            altitude,
        } => {
            buf.put_f64(*latitude);
            buf.put_f64(*longitude);
            buf.put_f64(*altitude);
        }
        UpdatePayload::Velocity {
            velocity,
            heading,
            vertical_rate,
        } => {
            buf.put_f64(*velocity);
            buf.put_f64(*heading);
            buf.put_f64(*vertical_rate);
        }
        UpdatePayload::Squawk { squawk } => buf.put_u16(*squawk),
        UpdatePayload::Identification { flight_id } => {
            let mut field = [0u8; FLIGHT_ID_LEN];
            // Cut on a char boundary so the field stays valid UTF-8.
            let mut n = flight_id.len().min(FLIGHT_ID_LEN);
            while !flight_id.is_char_boundary(n) {
                n -= 1;
            }
            field[..n].copy_from_slice(&flight_id.as_bytes()[..n]);
            buf.put_slice(&field);
        }
    }

    buf.freeze()
}

/// Decode exactly one record from the start of `buf`.
///
/// The tag is checked against the length table before any payload byte is
/// read. Trailing bytes beyond the record are ignored.
pub fn decode(buf: &[u8]) -> Result<TrackUpdate> {
    let len = match peek_record_len(buf)? {
        Some(len) => len,
        None => {
            return Err(RelayError::Truncated {
                expected: PREFIX_LEN,
                actual: buf.len(),
            })
        }
    };
    if buf.len() < len {
        return Err(RelayError::Truncated {
            expected: len,
            actual: buf.len(),
        });
    }

    let mut rec = &buf[..len];
    let address = rec.get_u32();
    let tag = rec.get_u32();
    let timestamp = rec.get_f64();

    let payload = match UpdateKind::from_tag(tag).ok_or(RelayError::UnknownTag(tag))? {
        UpdateKind::Position => UpdatePayload::Position {
            latitude: rec.get_f64(),
            longitude: rec.get_f64(),
            altitude: rec.get_f64(),
        },
        UpdateKind::Velocity => UpdatePayload::Velocity {
            velocity: rec.get_f64(),
            heading: rec.get_f64(),
            vertical_rate: rec.get_f64(),
        },
        UpdateKind::Squawk => UpdatePayload::Squawk {
            squawk: rec.get_u16(),
        },
        UpdateKind::Identification => {
            let mut field = [0u8; FLIGHT_ID_LEN];
            rec.copy_to_slice(&mut field);
            let end = field.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            UpdatePayload::Identification {
                flight_id: String::from_utf8_lossy(&field[..end]).into_owned(),
            }
        }
    };

    Ok(TrackUpdate {
        icao: checked_icao(address)?,
        timestamp,
        payload,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const KLM: Icao = [0x48, 0x40, 0xD6];

    fn update(timestamp: f64, payload: UpdatePayload) -> TrackUpdate {
        TrackUpdate {
            icao: KLM,
            timestamp,
            payload,
        }
    }

    fn samples(timestamp: f64) -> Vec<TrackUpdate> {
        vec![
            update(
                timestamp,
                UpdatePayload::Position {
                    latitude: 52.257_202_148_437_5,
                    longitude: 3.919_372_558_593_75,
                    altitude: 38000.0,
                },
            ),
            update(
                timestamp,
                UpdatePayload::Velocity {
                    velocity: 159.200_502_5,
                    heading: 182.880_419_27,
                    vertical_rate: -832.0,
                },
            ),
            update(timestamp, UpdatePayload::Squawk { squawk: 7700 }),
            update(
                timestamp,
                UpdatePayload::Identification {
                    flight_id: "KLM1023".into(),
                },
            ),
        ]
    }

    #[test]
    fn test_record_lengths() {
        assert_eq!(record_len(1), Some(40));
        assert_eq!(record_len(2), Some(40));
        assert_eq!(record_len(3), Some(18));
        assert_eq!(record_len(4), Some(24));
        assert_eq!(record_len(0), None);
        assert_eq!(record_len(5), None);
    }

    #[test]
    fn test_encoded_lengths_match_table() {
        for u in samples(1.0) {
            assert_eq!(Some(encode(&u).len()), record_len(u.kind().tag()));
        }
    }

    #[test]
    fn test_position_layout() {
        let bytes = encode(&samples(1.5)[0]);
        assert_eq!(&bytes[..4], &[0x00, 0x48, 0x40, 0xD6]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 1]);
        assert_eq!(&bytes[8..16], &1.5f64.to_be_bytes());
        assert_eq!(&bytes[32..40], &38000.0f64.to_be_bytes());
    }

    #[test]
    fn test_squawk_layout() {
        let bytes = encode(&samples(0.0)[2]);
        assert_eq!(bytes.len(), 18);
        assert_eq!(&bytes[16..18], &7700u16.to_be_bytes());
    }

    #[test]
    fn test_roundtrip_boundary_timestamps() {
        for ts in [0.0, 1_700_000_000.123_456_7, f64::from_bits(0x41D9_5A7F_0C4E_6B3D)] {
            for u in samples(ts) {
                let decoded = decode(&encode(&u)).unwrap();
                assert_eq!(decoded, u);
                assert_eq!(decoded.timestamp.to_bits(), ts.to_bits());
            }
        }
    }

    #[test]
    fn test_flight_id_padding_and_truncation() {
        let long = update(
            0.0,
            UpdatePayload::Identification {
                flight_id: "ABCDEFGHIJ".into(),
            },
        );
        let decoded = decode(&encode(&long)).unwrap();
        assert_eq!(
            decoded.payload,
            UpdatePayload::Identification {
                flight_id: "ABCDEFGH".into()
            }
        );

        let bytes = encode(&samples(0.0)[3]);
        assert_eq!(&bytes[16..24], b"KLM1023\0");
    }

    #[test]
    fn test_flight_id_truncates_on_char_boundary() {
        // Seven ASCII bytes then a two-byte char straddling the field end.
        let accented = update(
            0.0,
            UpdatePayload::Identification {
                flight_id: "ABCDEFG\u{e9}".into(),
            },
        );
        let bytes = encode(&accented);
        assert_eq!(&bytes[16..24], b"ABCDEFG\0");
        assert_eq!(
            decode(&bytes).unwrap().payload,
            UpdatePayload::Identification {
                flight_id: "ABCDEFG".into()
            }
        );
    }

    #[test]
    fn test_decode_unknown_tag() {
        let mut bytes = encode(&samples(0.0)[0]).to_vec();
        bytes[7] = 9;
        assert!(matches!(decode(&bytes), Err(RelayError::UnknownTag(9))));
        assert!(matches!(peek_record_len(&bytes), Err(RelayError::UnknownTag(9))));
    }

    #[test]
    fn test_decode_truncated() {
        let bytes = encode(&samples(0.0)[3]);
        assert!(matches!(
            decode(&bytes[..20]),
            Err(RelayError::Truncated {
                expected: 24,
                actual: 20
            })
        ));
        assert!(matches!(
            decode(&bytes[..5]),
            Err(RelayError::Truncated { expected: 8, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_wide_address() {
        let mut bytes = encode(&samples(0.0)[2]).to_vec();
        bytes[0] = 0x01;
        assert!(matches!(decode(&bytes), Err(RelayError::InvalidAddress(_))));
    }

    #[test]
    fn test_peek_needs_prefix() {
        let bytes = encode(&samples(0.0)[2]);
        assert_eq!(peek_record_len(&bytes[..7]).unwrap(), None);
        assert_eq!(peek_record_len(&bytes[..8]).unwrap(), Some(18));
    }
}
