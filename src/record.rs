//! Extraction results.
//!
//! A [`ResultMapping`] maps each selected frame's presentation timestamp
//! (µs) to its [`FrameRecord`]. It serializes as a plain JSON object whose
//! keys are the timestamps, which is also the payload the worker sends
//! back across the message boundary.

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// One rendered frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// PNG image, base64 encoded.
    pub base64: String,
    /// Presentation timestamp in microseconds.
    pub timestamp: i64,
    /// Width of the PNG in pixels.
    pub width: u32,
    /// Height of the PNG in pixels.
    pub height: u32,
    /// Display duration in microseconds, zero when unknown.
    pub duration: i64,
}

impl FrameRecord {
    /// Presentation timestamp in seconds.
    pub fn seconds(&self) -> f64 {
        self.timestamp as f64 / crate::utilities::MICROS_PER_SECOND
    }
}

/// Selected frames keyed by presentation timestamp, in ascending order.
///
/// Every key equals the `timestamp` of the record it maps to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResultMapping {
    frames: BTreeMap<i64, FrameRecord>,
}

impl ResultMapping {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record under its own timestamp, returning any record it
    /// replaced.
    pub fn insert(&mut self, record: FrameRecord) -> Option<FrameRecord> {
        self.frames.insert(record.timestamp, record)
    }

    /// Look a frame up by timestamp (µs).
    pub fn get(&self, timestamp: i64) -> Option<&FrameRecord> {
        self.frames.get(&timestamp)
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// `true` when no frame was selected.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Timestamps in ascending order.
    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        self.frames.keys().copied()
    }

    /// Records in ascending timestamp order.
    pub fn iter(&self) -> btree_map::Values<'_, i64, FrameRecord> {
        self.frames.values()
    }

    /// Consume the mapping, returning the records in timestamp order.
    pub fn into_frames(self) -> Vec<FrameRecord> {
        self.frames.into_values().collect()
    }

    /// Check that every key matches its record's timestamp.
    ///
    /// Always true: [`insert`](Self::insert) keys by timestamp and
    /// deserialization rejects mismatched keys.
    pub fn is_consistent(&self) -> bool {
        self.frames
            .iter()
            .all(|(timestamp, record)| *timestamp == record.timestamp)
    }
}

// Keys are read as strings so this also works inside buffered formats such
// as an internally tagged enum, where integer keys cannot be recovered.
impl<'de> Deserialize<'de> for ResultMapping {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, FrameRecord>::deserialize(deserializer)?;
        let mut frames = BTreeMap::new();
        for (key, record) in raw {
            let timestamp = key.parse::<i64>().map_err(|_| {
                D::Error::custom(format!("frame key '{key}' is not a timestamp"))
            })?;
            if timestamp != record.timestamp {
                return Err(D::Error::custom(format!(
                    "frame key {timestamp} does not match timestamp {}",
                    record.timestamp
                )));
            }
            frames.insert(timestamp, record);
        }
        Ok(Self { frames })
    }
}

impl IntoIterator for ResultMapping {
    type Item = FrameRecord;
    type IntoIter = btree_map::IntoValues<i64, FrameRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_values()
    }
}

impl<'a> IntoIterator for &'a ResultMapping {
    type Item = &'a FrameRecord;
    type IntoIter = btree_map::Values<'a, i64, FrameRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.values()
    }
}
