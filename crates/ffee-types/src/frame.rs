//! Raw telemetry as it arrives from a publish/subscribe channel, plus the two
//! payload shapes carried inside it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::FeeError;

/// Leading message-kind tag of a telemetry frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageKind(pub u8);

impl MessageKind {
    pub const SYNC_TIMECODE: MessageKind = MessageKind(0x80);
    pub const SYNC_HK_PACKET: MessageKind = MessageKind(0x81);
    pub const SYNC_DATA_PACKET: MessageKind = MessageKind(0x82);
    pub const N_FEE_REGISTER_MAP: MessageKind = MessageKind(0x83);
    pub const NUM_CYCLES: MessageKind = MessageKind(0x84);
    pub const SYNC_ERROR_FLAGS: MessageKind = MessageKind(0x85);
    pub const SYNC_HK_DATA: MessageKind = MessageKind(0x86);
    pub const F_FEE_REGISTER_MAP: MessageKind = MessageKind(0x87);
    pub const STATUS: MessageKind = MessageKind(0x90);
    /// Single-part messages carry no tag of their own.
    pub const ALL: MessageKind = MessageKind(0xFF);

    /// Subscription filter selecting only this kind.
    pub fn filter(self) -> Vec<u8> {
        vec![self.0]
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            MessageKind::SYNC_TIMECODE => "SYNC_TIMECODE",
            MessageKind::SYNC_HK_PACKET => "SYNC_HK_PACKET",
            MessageKind::SYNC_DATA_PACKET => "SYNC_DATA_PACKET",
            MessageKind::N_FEE_REGISTER_MAP => "N_FEE_REGISTER_MAP",
            MessageKind::NUM_CYCLES => "NUM_CYCLES",
            MessageKind::SYNC_ERROR_FLAGS => "SYNC_ERROR_FLAGS",
            MessageKind::SYNC_HK_DATA => "SYNC_HK_DATA",
            MessageKind::F_FEE_REGISTER_MAP => "F_FEE_REGISTER_MAP",
            MessageKind::STATUS => "STATUS",
            MessageKind::ALL => "ALL",
            _ => return None,
        })
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:02X}", self.0),
        }
    }
}

/// One telemetry message: a kind tag followed by serialized segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageKind,
    pub parts: Vec<Vec<u8>>,
}

impl Frame {
    pub fn new(kind: MessageKind, parts: Vec<Vec<u8>>) -> Self {
        Self { kind, parts }
    }

    /// A frame carrying one JSON-encoded segment.
    pub fn from_json<T: Serialize>(kind: MessageKind, value: &T) -> Result<Self, FeeError> {
        Ok(Self {
            kind,
            parts: vec![serde_json::to_vec(value)?],
        })
    }

    /// Decode segment `index` as JSON.
    pub fn part_json<T: DeserializeOwned>(&self, index: usize) -> Result<T, FeeError> {
        let bytes = self.parts.get(index).ok_or_else(|| {
            FeeError::Decode(format!("{} frame has no segment {index}", self.kind))
        })?;
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Register map / housekeeping fields keyed by `(block, field)`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMap(BTreeMap<String, BTreeMap<String, u32>>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, block: &str, field: &str) -> Result<u32, FeeError> {
        self.0
            .get(block)
            .and_then(|fields| fields.get(field))
            .copied()
            .ok_or_else(|| FeeError::MissingField {
                block: block.to_string(),
                field: field.to_string(),
            })
    }

    pub fn insert(&mut self, block: impl Into<String>, field: impl Into<String>, value: u32) {
        self.0
            .entry(block.into())
            .or_default()
            .insert(field.into(), value);
    }

    /// Builder form of [`FieldMap::insert`].
    pub fn with(mut self, block: impl Into<String>, field: impl Into<String>, value: u32) -> Self {
        self.insert(block, field, value);
        self
    }
}

/// Housekeeping record of the DEB.
pub const DEB_HK_COMMAND: &str = "command_deb_read_hk";
/// Housekeeping record of one AEB; the unit list holds its id.
pub const AEB_HK_COMMAND: &str = "command_aeb_read_hk";

/// `(command-name, unit-id-list, raw-data, timestamp)` tuple published for
/// every housekeeping read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HousekeepingRecord {
    pub command: String,
    #[serde(default)]
    pub units: Vec<String>,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}
