use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fee::{AebStateKey, DebMode, DtcInMod, Outbuff};

/// Envelope for everything the background workers post to the presentation
/// layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "ffee-runtime::monitor"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed from workers to the event sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum EventPayload {
    DebModeChanged(DebMode),
    AebStateChanged { key: AebStateKey, state: bool },
    DtcInModChanged(DtcInMod),
    /// Accumulated overflow counters in DTC IN_MOD order.
    OutbuffChanged(Outbuff),
    /// Telemetry silent past the soft threshold.
    TimeoutReached(String),
    /// Telemetry silent past the hard threshold; displayed state must be reset.
    ShutdownReached(String),
    ExceptionCaught { error: String, trace: String },
    CommandThreadCrashed(String),
    ProblemDetected(String),
    LogRetrieved(String),
    /// Active/inactive indicator for one registered channel.
    ServiceStatusChanged { service: String, active: bool },
}

impl EventPayload {
    /// Short variant name, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::DebModeChanged(_) => "DebModeChanged",
            EventPayload::AebStateChanged { .. } => "AebStateChanged",
            EventPayload::DtcInModChanged(_) => "DtcInModChanged",
            EventPayload::OutbuffChanged(_) => "OutbuffChanged",
            EventPayload::TimeoutReached(_) => "TimeoutReached",
            EventPayload::ShutdownReached(_) => "ShutdownReached",
            EventPayload::ExceptionCaught { .. } => "ExceptionCaught",
            EventPayload::CommandThreadCrashed(_) => "CommandThreadCrashed",
            EventPayload::ProblemDetected(_) => "ProblemDetected",
            EventPayload::LogRetrieved(_) => "LogRetrieved",
            EventPayload::ServiceStatusChanged { .. } => "ServiceStatusChanged",
        }
    }
}
