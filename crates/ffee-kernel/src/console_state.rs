//! [`ConsoleState`] – presentation-side reducer for the event stream.
//!
//! The console never reads hardware state directly; it folds every
//! [`EventPayload`] into a `ConsoleState` and renders from that.  The reducer
//! is where the exclusivity rules of the indicators live:
//!
//! - at most one DEB mode indicator is lit, and none for unknown codes;
//! - per AEB, at most one sub-state is lit, and lighting one also lights the
//!   power latch;
//! - `ShutdownReached` puts DEB, AEB and DTC back to "unknown".

use std::collections::BTreeMap;
use std::fmt;

use ffee_types::{
    AebIndicator, AebStateKey, AebSubState, AebUnit, DebMode, DtcInMod, EventPayload, Outbuff,
};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Something the operator should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub title: &'static str,
    pub message: String,
}

impl Notice {
    fn new(severity: Severity, title: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity,
            title,
            message: message.into(),
        }
    }
}

/// Indicators of one AEB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AebView {
    pub powered: bool,
    pub sub_state: Option<AebSubState>,
}

#[derive(Debug, Clone, Default)]
pub struct ConsoleState {
    deb_mode: Option<DebMode>,
    aeb: [AebView; 4],
    dtc_in_mod: Option<DtcInMod>,
    outbuff: Outbuff,
    stale: bool,
    services: BTreeMap<String, bool>,
}

impl ConsoleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the state.  Returns the notification to show, if
    /// the event warrants one.
    pub fn apply(&mut self, payload: &EventPayload) -> Option<Notice> {
        match payload {
            EventPayload::DebModeChanged(mode) => {
                self.stale = false;
                if mode.is_known() {
                    self.deb_mode = Some(*mode);
                    None
                } else {
                    warn!(raw = mode.raw(), "No indicator for DEB mode");
                    self.deb_mode = None;
                    Some(Notice::new(
                        Severity::Warning,
                        "DEB",
                        format!("DEB reports unknown mode {}", mode.raw()),
                    ))
                }
            }
            EventPayload::AebStateChanged { key, state } => {
                self.stale = false;
                self.set_aeb(*key, *state);
                None
            }
            EventPayload::DtcInModChanged(dtc) => {
                self.stale = false;
                self.dtc_in_mod = Some(*dtc);
                None
            }
            EventPayload::OutbuffChanged(outbuff) => {
                self.outbuff = *outbuff;
                None
            }
            EventPayload::TimeoutReached(message) => {
                self.stale = true;
                Some(Notice::new(Severity::Warning, "Timeout", message.clone()))
            }
            EventPayload::ShutdownReached(message) => {
                self.clear_hardware();
                self.stale = true;
                Some(Notice::new(Severity::Warning, "Shutdown", message.clone()))
            }
            EventPayload::ExceptionCaught { error, trace } => {
                debug!(%trace, "Exception trace");
                Some(Notice::new(Severity::Error, "Exception", error.clone()))
            }
            EventPayload::CommandThreadCrashed(error) => Some(Notice::new(
                Severity::Error,
                "Command Thread Crashed",
                error.clone(),
            )),
            EventPayload::ProblemDetected(message) => {
                Some(Notice::new(Severity::Warning, "WARNING", message.clone()))
            }
            EventPayload::LogRetrieved(message) => {
                Some(Notice::new(Severity::Info, "Log INFO", message.clone()))
            }
            EventPayload::ServiceStatusChanged { service, active } => {
                self.services.insert(service.clone(), *active);
                (!active).then(|| {
                    Notice::new(
                        Severity::Warning,
                        "Service",
                        format!("{service} stopped publishing"),
                    )
                })
            }
        }
    }

    fn set_aeb(&mut self, key: AebStateKey, state: bool) {
        let view = &mut self.aeb[key.unit.index()];
        match key.indicator {
            AebIndicator::OnOff => view.powered = state,
            AebIndicator::Sub(sub) if state => {
                view.sub_state = Some(sub);
                view.powered = true;
            }
            AebIndicator::Sub(sub) => {
                if view.sub_state == Some(sub) {
                    view.sub_state = None;
                }
            }
        }
    }

    fn clear_hardware(&mut self) {
        self.deb_mode = None;
        self.aeb = [AebView::default(); 4];
        self.dtc_in_mod = None;
    }

    /// The lit DEB mode indicator, if any.
    pub fn deb_mode(&self) -> Option<DebMode> {
        self.deb_mode
    }

    pub fn deb_indicator(&self, mode: DebMode) -> bool {
        self.deb_mode == Some(mode)
    }

    pub fn aeb(&self, unit: AebUnit) -> AebView {
        self.aeb[unit.index()]
    }

    /// Whether the indicator addressed by `key` is lit.
    pub fn aeb_indicator(&self, key: AebStateKey) -> bool {
        let view = self.aeb(key.unit);
        match key.indicator {
            AebIndicator::OnOff => view.powered,
            AebIndicator::Sub(sub) => view.sub_state == Some(sub),
        }
    }

    pub fn dtc_in_mod(&self) -> Option<&DtcInMod> {
        self.dtc_in_mod.as_ref()
    }

    pub fn outbuff(&self) -> Outbuff {
        self.outbuff
    }

    /// `true` while telemetry is known to be silent.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// `None` until the poller has reported on `service`.
    pub fn service_active(&self, service: &str) -> Option<bool> {
        self.services.get(service).copied()
    }

    pub fn services(&self) -> impl Iterator<Item = (&str, bool)> {
        self.services.iter().map(|(name, active)| (name.as_str(), *active))
    }
}

impl fmt::Display for ConsoleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.deb_mode {
            Some(mode) => writeln!(f, "DEB       {mode}")?,
            None => writeln!(f, "DEB       -")?,
        }
        for unit in AebUnit::ALL {
            let view = self.aeb(unit);
            let sub = view.sub_state.map_or("-", AebSubState::suffix);
            let power = if view.powered { "ON " } else { "OFF" };
            writeln!(f, "{unit}      {power} {sub}")?;
        }
        match &self.dtc_in_mod {
            Some(dtc) => {
                let labels: Vec<String> = dtc.active_paths().iter().map(|p| p.label()).collect();
                writeln!(f, "DTC       {}", labels.join(" "))?;
            }
            None => writeln!(f, "DTC       -")?,
        }
        writeln!(f, "OUTBUFF   {:?}", self.outbuff)?;
        if self.stale {
            writeln!(f, "telemetry STALE")?;
        }
        for (name, active) in &self.services {
            writeln!(f, "{name:<10}{}", if *active { "active" } else { "inactive" })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(unit: AebUnit, sub: AebSubState, state: bool) -> EventPayload {
        EventPayload::AebStateChanged {
            key: AebStateKey::sub_state(unit, sub),
            state,
        }
    }

    #[test]
    fn exactly_one_deb_indicator_is_lit() {
        let mut state = ConsoleState::new();
        for raw in [0u8, 1, 2, 3, 6, 7] {
            let mode = DebMode::from_raw(raw);
            state.apply(&EventPayload::DebModeChanged(mode));
            let lit: Vec<_> = DebMode::KNOWN
                .into_iter()
                .filter(|m| state.deb_indicator(*m))
                .collect();
            assert_eq!(lit, vec![mode]);
        }
    }

    #[test]
    fn unknown_deb_mode_lights_nothing() {
        let mut state = ConsoleState::new();
        state.apply(&EventPayload::DebModeChanged(DebMode::On));
        let notice = state
            .apply(&EventPayload::DebModeChanged(DebMode::from_raw(4)))
            .unwrap();
        assert_eq!(notice.severity, Severity::Warning);
        assert!(DebMode::KNOWN.iter().all(|m| !state.deb_indicator(*m)));
    }

    #[test]
    fn aeb_sub_states_are_exclusive_and_power_the_unit() {
        let mut state = ConsoleState::new();
        let unit = AebUnit::Aeb2;
        for s in AebSubState::ALL {
            state.apply(&sub(unit, s, true));
            let lit = AebSubState::ALL
                .into_iter()
                .filter(|o| state.aeb_indicator(AebStateKey::sub_state(unit, *o)))
                .count();
            assert_eq!(lit, 1);
            assert!(state.aeb(unit).powered);
        }
        assert_eq!(state.aeb(AebUnit::Aeb1), AebView::default());
    }

    #[test]
    fn clearing_a_sub_state_only_touches_the_matching_one() {
        let mut state = ConsoleState::new();
        state.apply(&sub(AebUnit::Aeb1, AebSubState::Config, true));
        state.apply(&sub(AebUnit::Aeb1, AebSubState::Init, false));
        assert_eq!(state.aeb(AebUnit::Aeb1).sub_state, Some(AebSubState::Config));
        state.apply(&sub(AebUnit::Aeb1, AebSubState::Config, false));
        assert_eq!(state.aeb(AebUnit::Aeb1).sub_state, None);
    }

    #[test]
    fn power_off_clears_only_the_latch() {
        let mut state = ConsoleState::new();
        state.apply(&sub(AebUnit::Aeb3, AebSubState::Image, true));
        state.apply(&EventPayload::AebStateChanged {
            key: AebStateKey::on_off(AebUnit::Aeb3),
            state: false,
        });
        let view = state.aeb(AebUnit::Aeb3);
        assert!(!view.powered);
        assert_eq!(view.sub_state, Some(AebSubState::Image));
    }

    #[test]
    fn shutdown_resets_hardware_but_keeps_services() {
        let mut state = ConsoleState::new();
        state.apply(&EventPayload::DebModeChanged(DebMode::Standby));
        state.apply(&sub(AebUnit::Aeb4, AebSubState::Init, true));
        state.apply(&EventPayload::DtcInModChanged(DtcInMod::new([1; 8])));
        state.apply(&EventPayload::OutbuffChanged([1, 0, 0, 0, 0, 0, 0, 2]));
        state.apply(&EventPayload::ServiceStatusChanged {
            service: "cm_cs".into(),
            active: true,
        });

        let notice = state
            .apply(&EventPayload::ShutdownReached("no telemetry for 10s".into()))
            .unwrap();
        assert_eq!(notice.title, "Shutdown");
        assert_eq!(state.deb_mode(), None);
        assert_eq!(state.aeb(AebUnit::Aeb4), AebView::default());
        assert!(state.dtc_in_mod().is_none());
        assert_eq!(state.outbuff(), [1, 0, 0, 0, 0, 0, 0, 2]);
        assert_eq!(state.service_active("cm_cs"), Some(true));
        assert!(state.is_stale());
    }

    #[test]
    fn telemetry_clears_the_stale_flag() {
        let mut state = ConsoleState::new();
        state.apply(&EventPayload::TimeoutReached("silent".into()));
        assert!(state.is_stale());
        state.apply(&EventPayload::DebModeChanged(DebMode::On));
        assert!(!state.is_stale());
    }

    #[test]
    fn severities_follow_event_kind() {
        let mut state = ConsoleState::new();
        let crash = state
            .apply(&EventPayload::CommandThreadCrashed("refused".into()))
            .unwrap();
        let exc = state
            .apply(&EventPayload::ExceptionCaught {
                error: "bad op".into(),
                trace: "at dispatcher".into(),
            })
            .unwrap();
        let log = state
            .apply(&EventPayload::LogRetrieved("Executing".into()))
            .unwrap();
        assert_eq!(crash.severity, Severity::Error);
        assert_eq!(exc.severity, Severity::Error);
        assert_eq!(log.severity, Severity::Info);
        assert_ne!(crash.title, exc.title);
    }

    #[test]
    fn only_inactive_services_notify() {
        let mut state = ConsoleState::new();
        let up = EventPayload::ServiceStatusChanged {
            service: "sm_cs".into(),
            active: true,
        };
        let down = EventPayload::ServiceStatusChanged {
            service: "sm_cs".into(),
            active: false,
        };
        assert!(state.apply(&up).is_none());
        assert!(state.apply(&down).is_some());
        assert_eq!(state.services().collect::<Vec<_>>(), vec![("sm_cs", false)]);
    }
}
