//! Frame decoding and state diffing for the telemetry monitor.
//!
//! [`TelemetryDecoder`] owns the last-known DEB mode and AEB statuses plus
//! the OUTBUFF accumulator.  Each frame is decoded into the events the
//! presentation layer needs:
//!
//! | Frame | Events |
//! |---|---|
//! | `F_FEE_REGISTER_MAP` | `DtcInModChanged`, every time |
//! | `SYNC_HK_DATA`, DEB | `DebModeChanged` on change; `OutbuffChanged` if any overflow flag is set |
//! | `SYNC_HK_DATA`, AEB | `AebStateChanged` on change; `ProblemDetected` for FAILURE/unknown codes |
//!
//! Register-map and housekeeping state are independent sources; no attempt is
//! made to cross-check one against the other.

use ffee_types::frame::{AEB_HK_COMMAND, DEB_HK_COMMAND};
use ffee_types::{
    AebStateKey, AebStatus, AebUnit, DebMode, DtcInMod, EventPayload, FeeError, FieldMap, Frame,
    HousekeepingRecord, MessageKind, OUTBUFF_TO_DTC, Outbuff,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Turns raw payloads into `(block, field)` lookups.
pub trait FieldDecoder: Send {
    /// Decode the raw data of a housekeeping record for `unit`.
    fn decode_housekeeping(&self, unit: &str, data: &Value) -> Result<FieldMap, FeeError>;

    /// Decode the register map carried by a register-map frame.
    fn decode_register_map(&self, frame: &Frame) -> Result<FieldMap, FeeError>;
}

/// Payloads that are already JSON `{block: {field: value}}` maps.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFieldDecoder;

impl FieldDecoder for JsonFieldDecoder {
    fn decode_housekeeping(&self, _unit: &str, data: &Value) -> Result<FieldMap, FeeError> {
        Ok(FieldMap::deserialize(data)?)
    }

    fn decode_register_map(&self, frame: &Frame) -> Result<FieldMap, FeeError> {
        frame.part_json(0)
    }
}

/// Monitor-owned decoding state.
pub struct TelemetryDecoder<D: FieldDecoder = JsonFieldDecoder> {
    decoder: D,
    deb_mode: Option<DebMode>,
    aeb_status: [Option<AebStatus>; 4],
    accumulated: Outbuff,
}

impl Default for TelemetryDecoder<JsonFieldDecoder> {
    fn default() -> Self {
        Self::new(JsonFieldDecoder)
    }
}

impl<D: FieldDecoder> TelemetryDecoder<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            deb_mode: None,
            aeb_status: [None; 4],
            accumulated: [0; 8],
        }
    }

    /// Decode one frame into the events it produces.
    ///
    /// # Errors
    ///
    /// Any decoding failure, including [`FeeError::UnsupportedFrame`] for
    /// kinds other than register map and housekeeping.  Snapshots are left
    /// untouched on error.
    pub fn handle_frame(&mut self, frame: &Frame) -> Result<Vec<EventPayload>, FeeError> {
        match frame.kind {
            MessageKind::F_FEE_REGISTER_MAP => {
                let map = self.decoder.decode_register_map(frame)?;
                Ok(vec![EventPayload::DtcInModChanged(decode_dtc_in_mod(&map)?)])
            }
            MessageKind::SYNC_HK_DATA => {
                let record: HousekeepingRecord = frame.part_json(0)?;
                match record.command.as_str() {
                    DEB_HK_COMMAND => self.handle_deb(&record),
                    AEB_HK_COMMAND => self.handle_aeb(&record),
                    other => {
                        debug!(command = %other, "Ignoring housekeeping record");
                        Ok(Vec::new())
                    }
                }
            }
            other => Err(FeeError::UnsupportedFrame(other.0)),
        }
    }

    fn handle_deb(&mut self, record: &HousekeepingRecord) -> Result<Vec<EventPayload>, FeeError> {
        let hk = self.decoder.decode_housekeeping("DEB", &record.data)?;

        let raw = hk.get("STATUS", "OPER_MOD")?;
        let mode = DebMode::from_raw(narrow(raw, "STATUS", "OPER_MOD")?);
        let mut flags = [0u32; 8];
        for (i, flag) in flags.iter_mut().enumerate() {
            *flag = hk.get("OVF", &format!("OUTBUFF_{}", i + 1))?;
        }

        let mut events = Vec::new();
        if self.deb_mode != Some(mode) {
            if !mode.is_known() {
                warn!(raw = mode.raw(), "DEB reports an unknown operating mode");
            }
            debug!(mode = %mode, "DEB mode changed");
            self.deb_mode = Some(mode);
            events.push(EventPayload::DebModeChanged(mode));
        }

        if flags.iter().any(|&f| f != 0) {
            for (slot, &source) in self.accumulated.iter_mut().zip(OUTBUFF_TO_DTC.iter()) {
                *slot = slot.saturating_add(flags[source]);
            }
            debug!(outbuff = ?self.accumulated, "OUTBUFF errors accumulated");
            events.push(EventPayload::OutbuffChanged(self.accumulated));
        }
        Ok(events)
    }

    fn handle_aeb(&mut self, record: &HousekeepingRecord) -> Result<Vec<EventPayload>, FeeError> {
        let unit: AebUnit = record
            .units
            .first()
            .ok_or_else(|| FeeError::Decode("AEB housekeeping without unit id".into()))?
            .parse()?;
        let hk = self
            .decoder
            .decode_housekeeping(&unit.to_string(), &record.data)?;
        let raw = hk.get("STATUS", "AEB_STATUS")?;
        let status = AebStatus::from_raw(narrow(raw, "STATUS", "AEB_STATUS")?);

        let snapshot = &mut self.aeb_status[unit.index()];
        if *snapshot == Some(status) {
            return Ok(Vec::new());
        }
        *snapshot = Some(status);
        debug!(unit = %unit, status = %status, "AEB state changed");

        let event = match status {
            AebStatus::Off => EventPayload::AebStateChanged {
                key: AebStateKey::on_off(unit),
                state: false,
            },
            AebStatus::Failure | AebStatus::Unknown(_) => {
                warn!(unit = %unit, status = %status, "AEB reports a problem");
                EventPayload::ProblemDetected(format!("{unit} reports status {status}"))
            }
            other => match other.sub_state() {
                Some(sub) => EventPayload::AebStateChanged {
                    key: AebStateKey::sub_state(unit, sub),
                    state: true,
                },
                None => return Ok(Vec::new()),
            },
        };
        Ok(vec![event])
    }

    /// Zero the accumulator and return the event announcing it.  Always
    /// produces an event, even if the accumulator was already zero.
    pub fn reset_accumulator(&mut self) -> EventPayload {
        self.accumulated = [0; 8];
        EventPayload::OutbuffChanged(self.accumulated)
    }

    /// Forget DEB/AEB snapshots so the next frames are reported as changes.
    pub fn forget_snapshots(&mut self) {
        self.deb_mode = None;
        self.aeb_status = [None; 4];
    }

    pub fn accumulated(&self) -> Outbuff {
        self.accumulated
    }

    pub fn deb_mode(&self) -> Option<DebMode> {
        self.deb_mode
    }

    pub fn aeb_status(&self, unit: AebUnit) -> Option<AebStatus> {
        self.aeb_status[unit.index()]
    }
}

/// T0..T3 live in `DEB_DTC_IN_MOD_2`, T4..T7 in `DEB_DTC_IN_MOD_1`.
pub fn decode_dtc_in_mod(map: &FieldMap) -> Result<DtcInMod, FeeError> {
    let mut fields = [0u8; 8];
    for (n, slot) in fields.iter_mut().enumerate() {
        let block = if n < 4 {
            "DEB_DTC_IN_MOD_2"
        } else {
            "DEB_DTC_IN_MOD_1"
        };
        let field = format!("T{n}_IN_MOD");
        *slot = narrow(map.get(block, &field)?, block, &field)?;
    }
    Ok(DtcInMod::new(fields))
}

fn narrow(raw: u32, block: &str, field: &str) -> Result<u8, FeeError> {
    u8::try_from(raw).map_err(|_| FeeError::Decode(format!("{block}/{field} out of range: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ffee_types::AebSubState;

    fn hk(command: &str, unit: &str, data: FieldMap) -> Frame {
        let record = HousekeepingRecord {
            command: command.into(),
            units: vec![unit.into()],
            data: serde_json::to_value(data).unwrap(),
            timestamp: Utc::now(),
        };
        Frame::from_json(MessageKind::SYNC_HK_DATA, &record).unwrap()
    }

    fn deb_hk(mode: u32, flags: [u32; 8]) -> Frame {
        let mut data = FieldMap::new().with("STATUS", "OPER_MOD", mode);
        for (i, f) in flags.iter().enumerate() {
            data.insert("OVF", format!("OUTBUFF_{}", i + 1), *f);
        }
        hk(DEB_HK_COMMAND, "DEB", data)
    }

    fn aeb_hk(unit: &str, status: u32) -> Frame {
        hk(
            AEB_HK_COMMAND,
            unit,
            FieldMap::new().with("STATUS", "AEB_STATUS", status),
        )
    }

    fn register_map(fields: [u32; 8]) -> Frame {
        let mut map = FieldMap::new();
        for (n, v) in fields.iter().enumerate() {
            let block = if n < 4 { "DEB_DTC_IN_MOD_2" } else { "DEB_DTC_IN_MOD_1" };
            map.insert(block, format!("T{n}_IN_MOD"), *v);
        }
        Frame::from_json(MessageKind::F_FEE_REGISTER_MAP, &map).unwrap()
    }

    #[test]
    fn register_map_always_emits_dtc_in_mod() {
        let mut decoder = TelemetryDecoder::default();
        let frame = register_map([1, 2, 0, 1, 1, 0, 2, 1]);
        let expected = EventPayload::DtcInModChanged(DtcInMod::new([1, 2, 0, 1, 1, 0, 2, 1]));
        assert_eq!(decoder.handle_frame(&frame).unwrap(), vec![expected.clone()]);
        assert_eq!(decoder.handle_frame(&frame).unwrap(), vec![expected]);
    }

    #[test]
    fn deb_mode_is_diffed() {
        let mut decoder = TelemetryDecoder::default();
        assert_eq!(
            decoder.handle_frame(&deb_hk(7, [0; 8])).unwrap(),
            vec![EventPayload::DebModeChanged(DebMode::On)]
        );
        assert!(decoder.handle_frame(&deb_hk(7, [0; 8])).unwrap().is_empty());
        assert_eq!(
            decoder.handle_frame(&deb_hk(6, [0; 8])).unwrap(),
            vec![EventPayload::DebModeChanged(DebMode::Standby)]
        );
    }

    #[test]
    fn unknown_deb_mode_is_reported_raw() {
        let mut decoder = TelemetryDecoder::default();
        assert_eq!(
            decoder.handle_frame(&deb_hk(4, [0; 8])).unwrap(),
            vec![EventPayload::DebModeChanged(DebMode::Unknown(4))]
        );
    }

    #[test]
    fn outbuff_is_permuted_and_accumulated() {
        let mut decoder = TelemetryDecoder::default();
        decoder.handle_frame(&deb_hk(7, [0; 8])).unwrap();

        // OUTBUFF_2 maps to DTC position 2, OUTBUFF_6 to position 6.
        let events = decoder
            .handle_frame(&deb_hk(7, [0, 1, 0, 0, 0, 1, 0, 0]))
            .unwrap();
        assert_eq!(events, vec![EventPayload::OutbuffChanged([0, 0, 1, 0, 0, 0, 1, 0])]);

        let events = decoder
            .handle_frame(&deb_hk(7, [0, 1, 0, 0, 0, 0, 0, 0]))
            .unwrap();
        assert_eq!(events, vec![EventPayload::OutbuffChanged([0, 0, 2, 0, 0, 0, 1, 0])]);
    }

    #[test]
    fn no_overflow_no_outbuff_event() {
        let mut decoder = TelemetryDecoder::default();
        let events = decoder.handle_frame(&deb_hk(7, [0; 8])).unwrap();
        assert!(!events.iter().any(|e| matches!(e, EventPayload::OutbuffChanged(_))));
    }

    #[test]
    fn reset_always_emits_zero_vector() {
        let mut decoder = TelemetryDecoder::default();
        decoder.handle_frame(&deb_hk(7, [1; 8])).unwrap();
        assert_eq!(decoder.reset_accumulator(), EventPayload::OutbuffChanged([0; 8]));
        assert_eq!(decoder.reset_accumulator(), EventPayload::OutbuffChanged([0; 8]));
        assert_eq!(decoder.accumulated(), [0; 8]);
    }

    #[test]
    fn aeb_status_maps_to_state_keys() {
        let mut decoder = TelemetryDecoder::default();
        assert_eq!(
            decoder.handle_frame(&aeb_hk("AEB2", 3)).unwrap(),
            vec![EventPayload::AebStateChanged {
                key: AebStateKey::sub_state(AebUnit::Aeb2, AebSubState::Image),
                state: true
            }]
        );
        assert!(decoder.handle_frame(&aeb_hk("AEB2", 3)).unwrap().is_empty());
        assert_eq!(
            decoder.handle_frame(&aeb_hk("AEB2", 0)).unwrap(),
            vec![EventPayload::AebStateChanged {
                key: AebStateKey::on_off(AebUnit::Aeb2),
                state: false
            }]
        );
    }

    #[test]
    fn aeb_failure_is_a_problem() {
        let mut decoder = TelemetryDecoder::default();
        let events = decoder.handle_frame(&aeb_hk("AEB4", 7)).unwrap();
        assert!(matches!(&events[..], [EventPayload::ProblemDetected(msg)] if msg.contains("AEB4")));
    }

    #[test]
    fn forget_snapshots_re_emits_state() {
        let mut decoder = TelemetryDecoder::default();
        decoder.handle_frame(&deb_hk(7, [0; 8])).unwrap();
        decoder.handle_frame(&aeb_hk("AEB1", 1)).unwrap();
        decoder.forget_snapshots();
        assert_eq!(decoder.handle_frame(&deb_hk(7, [0; 8])).unwrap().len(), 1);
        assert_eq!(decoder.handle_frame(&aeb_hk("AEB1", 1)).unwrap().len(), 1);
    }

    #[test]
    fn malformed_frames_are_errors() {
        let mut decoder = TelemetryDecoder::default();
        let missing = hk(DEB_HK_COMMAND, "DEB", FieldMap::new());
        assert!(matches!(
            decoder.handle_frame(&missing),
            Err(FeeError::MissingField { .. })
        ));

        let garbage = Frame::new(MessageKind::SYNC_HK_DATA, vec![b"not json".to_vec()]);
        assert!(matches!(decoder.handle_frame(&garbage), Err(FeeError::Decode(_))));

        let other = Frame::new(MessageKind::NUM_CYCLES, vec![]);
        assert_eq!(
            decoder.handle_frame(&other).unwrap_err(),
            FeeError::UnsupportedFrame(0x84)
        );

        let bad_unit = aeb_hk("AEB9", 1);
        assert!(decoder.handle_frame(&bad_unit).is_err());
    }

    #[test]
    fn other_housekeeping_is_ignored() {
        let mut decoder = TelemetryDecoder::default();
        let frame = hk("command_pcu_read_hk", "PCU", FieldMap::new());
        assert!(decoder.handle_frame(&frame).unwrap().is_empty());
    }
}
