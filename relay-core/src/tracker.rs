//! Per-aircraft track table with sequence IDs, capacity and staleness eviction.
//!
//! Pure logic with no I/O and no locking. The producer feeds it `FieldRecord`s and
//! gets back `TrackUpdate`s to relay; the consumer feeds it decoded
//! `TrackUpdate`s and reads snapshots. Callers decide how to share it.

use std::collections::{BTreeMap, HashMap};

use crate::field::{FieldRecord, FieldUpdate};
use crate::types::*;

/// Default maximum number of tracked aircraft.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Default consumer-side staleness window, in seconds.
pub const STALE_TIMEOUT: f64 = 120.0;

// ---------------------------------------------------------------------------
// Track record
// ---------------------------------------------------------------------------

/// Aggregated state for a single aircraft address.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRecord {
    pub sequence_id: u64,
    pub last_seen: f64,

    // Position
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,

    // Velocity
    pub velocity: Option<f64>,
    pub heading: Option<f64>,
    pub vertical_rate: Option<f64>,

    pub squawk: Option<u16>,
    pub flight_id: Option<String>,
}

impl TrackRecord {
    pub fn new(sequence_id: u64, timestamp: f64) -> Self {
        TrackRecord {
            sequence_id,
            last_seen: timestamp,
            latitude: None,
            longitude: None,
            altitude: None,
            velocity: None,
            heading: None,
            vertical_rate: None,
            squawk: None,
            flight_id: None,
        }
    }

    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    pub fn age(&self, now: f64) -> f64 {
        now - self.last_seen
    }

    /// Strictly older than the window; a record exactly at the edge is kept.
    pub fn is_stale(&self, now: f64, window: f64) -> bool {
        self.age(now) > window
    }

    fn merge_position(&mut self, latitude: f64, longitude: f64, altitude: f64) {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self.altitude = Some(altitude);
    }

    fn merge_velocity(&mut self, velocity: f64, heading: f64, vertical_rate: f64) {
        self.velocity = Some(velocity);
        self.heading = Some(heading);
        self.vertical_rate = Some(vertical_rate);
    }
}

// ---------------------------------------------------------------------------
// Track table
// ---------------------------------------------------------------------------

/// Address-keyed table of track records.
///
/// `by_sequence` mirrors `tracks` ordered by sequence ID so capacity
/// eviction always removes the oldest-assigned entries first.
#[derive(Debug, Clone)]
pub struct TrackTable {
    tracks: HashMap<Icao, TrackRecord>,
    by_sequence: BTreeMap<u64, Icao>,
    last_sequence: u64,
    capacity: usize,
}

impl Default for TrackTable {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TrackTable {
    pub fn new(capacity: usize) -> Self {
        TrackTable {
            tracks: HashMap::new(),
            by_sequence: BTreeMap::new(),
            last_sequence: 0,
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, icao: &Icao) -> Option<&TrackRecord> {
        self.tracks.get(icao)
    }

    pub fn contains(&self, icao: &Icao) -> bool {
        self.tracks.contains_key(icao)
    }

    /// Return the sequence ID for `icao`, allocating the next one on first sighting.
    ///
    /// A new entry may push the table over capacity, in which case the
    /// oldest-assigned entries are evicted. The new entry always has the
    /// highest ID and therefore survives.
    pub fn assign_or_lookup(&mut self, icao: Icao) -> u64 {
        self.assign_at(icao, 0.0)
    }

    fn assign_at(&mut self, icao: Icao, timestamp: f64) -> u64 {
        if let Some(track) = self.tracks.get(&icao) {
            return track.sequence_id;
        }

        self.last_sequence += 1;
        let sequence_id = self.last_sequence;
        self.tracks
            .insert(icao, TrackRecord::new(sequence_id, timestamp));
        self.by_sequence.insert(sequence_id, icao);
        self.evict_over_capacity();
        sequence_id
    }

    /// Remove lowest-sequence entries until the table is back at capacity.
    fn evict_over_capacity(&mut self) -> usize {
        let mut evicted = 0;
        while self.tracks.len() > self.capacity {
            let Some((_, icao)) = self.by_sequence.pop_first() else {
                break;
            };
            self.tracks.remove(&icao);
            evicted += 1;
        }
        evicted
    }

    fn track_mut(&mut self, icao: Icao, timestamp: f64) -> &mut TrackRecord {
        let sequence_id = self.assign_at(icao, timestamp);
        self.tracks
            .entry(icao)
            .or_insert_with(|| TrackRecord::new(sequence_id, timestamp))
    }

    /// Apply one message's fields to the record for `icao`, creating it if needed.
    ///
    /// Only the fields carried by `update` are overwritten; `last_seen` is
    /// set to `now`.
    pub fn apply_field_update(&mut self, icao: Icao, update: &FieldUpdate, now: f64) -> UpdateKind {
        let track = self.track_mut(icao, now);
        track.last_seen = now;
        match update {
            FieldUpdate::Position {
                latitude,
                longitude,
                altitude,
            } => track.merge_position(*latitude, *longitude, *altitude),
            FieldUpdate::Velocity {
                velocity,
                heading,
                vertical_rate,
            } => track.merge_velocity(*velocity, *heading, *vertical_rate),
            FieldUpdate::Squawk { squawk } => track.squawk = Some(*squawk),
            FieldUpdate::Identification { flight_id } => {
                track.flight_id = Some(flight_id.clone())
            }
        }
        update.kind()
    }

    /// Build the relayable update of `kind` for `icao`, if the record is complete enough.
    ///
    /// Position and velocity updates are both withheld until the record
    /// has a position fix *and* a velocity, so early position-only reports
    /// produce nothing.
    pub fn build_update_record(&self, icao: &Icao, kind: UpdateKind) -> Option<TrackUpdate> {
        let track = self.tracks.get(icao)?;
        let payload = match kind {
            UpdateKind::Position => {
                track.velocity?;
                UpdatePayload::Position {
                    latitude: track.latitude?,
                    longitude: track.longitude?,
                    altitude: track.altitude?,
                }
            }
            UpdateKind::Velocity => {
                track.latitude?;
                UpdatePayload::Velocity {
                    velocity: track.velocity?,
                    heading: track.heading?,
                    vertical_rate: track.vertical_rate?,
                }
            }
            UpdateKind::Squawk => UpdatePayload::Squawk {
                squawk: track.squawk?,
            },
            UpdateKind::Identification => UpdatePayload::Identification {
                flight_id: track.flight_id.clone()?,
            },
        };
        Some(TrackUpdate {
            icao: *icao,
            timestamp: track.last_seen,
            payload,
        })
    }

    /// Producer step: classify a decoded record, merge it, and build the update to relay.
    ///
    /// Returns `Ok(None)` when the message carried nothing trackable or the
    /// record is not yet complete enough for its category.
    pub fn ingest(&mut self, record: &FieldRecord, now: f64) -> Result<Option<TrackUpdate>> {
        let icao = record.icao()?;
        let Some(update) = record.classify()? else {
            return Ok(None);
        };
        let kind = self.apply_field_update(icao, &update, now);
        Ok(self.build_update_record(&icao, kind))
    }

    /// Consumer step: merge a relayed update into the local record.
    pub fn apply_track_update(&mut self, update: &TrackUpdate) {
        let track = self.track_mut(update.icao, update.timestamp);
        track.last_seen = update.timestamp;
        match &update.payload {
            UpdatePayload::Position {
                latitude,
                longitude,
                altitude,
            } => track.merge_position(*latitude, *longitude, *altitude),
            UpdatePayload::Velocity {
                velocity,
                heading,
                vertical_rate,
            } => track.merge_velocity(*velocity, *heading, *vertical_rate),
            UpdatePayload::Squawk { squawk } => track.squawk = Some(*squawk),
            UpdatePayload::Identification { flight_id } => {
                track.flight_id = Some(flight_id.clone())
            }
        }
    }

    /// Remove records not heard from within `window` seconds of `now`. Returns count removed.
    pub fn prune_stale(&mut self, now: f64, window: f64) -> usize {
        let stale: Vec<(Icao, u64)> = self
            .tracks
            .iter()
            .filter(|(_, track)| track.is_stale(now, window))
            .map(|(icao, track)| (*icao, track.sequence_id))
            .collect();
        for (icao, sequence_id) in &stale {
            self.tracks.remove(icao);
            self.by_sequence.remove(sequence_id);
        }
        stale.len()
    }

    /// Point-in-time copy of every record.
    pub fn snapshot(&self) -> HashMap<Icao, TrackRecord> {
        self.tracks.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Icao, &TrackRecord)> {
        self.tracks.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
